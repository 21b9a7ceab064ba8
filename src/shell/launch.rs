//! Shell 启动参数解析
//!
//! 由 (平台, 默认 shell, 覆盖项) 计算出可执行文件和参数列表。
//! 各 shell 家族的参数以数据表形式维护。

use super::detect::{shell_family, ShellFamily};

/// 目标平台
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    /// 当前编译目标所在平台
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// 最终的启动命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLaunch {
    pub program: String,
    pub args: Vec<String>,
}

/// 单个 shell 家族的启动配置
struct LaunchProfile {
    family: ShellFamily,
    /// 作为默认 shell 被检测到时改用的可执行文件
    substitute: Option<&'static str>,
    /// 命令之前的参数
    flags: &'static [&'static str],
}

const PROFILES: &[LaunchProfile] = &[
    LaunchProfile {
        family: ShellFamily::Zsh,
        substitute: None,
        flags: &["--no-globalrcs", "--no-rcs", "-i", "-c"],
    },
    LaunchProfile {
        family: ShellFamily::Bash,
        substitute: None,
        flags: &["--noprofile", "--norc", "-i", "-c"],
    },
    LaunchProfile {
        family: ShellFamily::Csh,
        substitute: None,
        flags: &["-f", "-c"],
    },
    LaunchProfile {
        family: ShellFamily::Posix,
        substitute: Some("/bin/bash"),
        flags: &["-c"],
    },
    LaunchProfile {
        family: ShellFamily::PowerShell,
        substitute: None,
        flags: &["-NoLogo", "-NoProfile", "-Command"],
    },
    LaunchProfile {
        family: ShellFamily::Cmd,
        substitute: None,
        flags: &["/C"],
    },
];

/// Windows 上未指定 shell 时使用的可执行文件
const WINDOWS_SHELL: &str = "powershell.exe";

fn profile_for(family: ShellFamily) -> &'static LaunchProfile {
    PROFILES
        .iter()
        .find(|p| p.family == family)
        .unwrap_or(&PROFILES[PROFILES.len() - 1])
}

/// 计算启动命令
///
/// - `shell_override` 存在时直接使用，参数按其家族选取；
/// - Windows 默认使用 PowerShell；
/// - Unix 使用检测到的默认 shell，若其家族声明了替代程序则改用替代程序。
///
/// `args_override` 替换家族参数，`command` 始终作为最后一个参数。
pub fn resolve_launch(
    platform: Platform,
    default_shell: &str,
    shell_override: Option<&str>,
    args_override: Option<&[String]>,
    command: &str,
) -> ShellLaunch {
    let (program, family) = match shell_override {
        Some(shell) => (shell.to_string(), shell_family(shell)),
        None => match platform {
            Platform::Windows => (WINDOWS_SHELL.to_string(), ShellFamily::PowerShell),
            Platform::Unix => {
                let family = shell_family(default_shell);
                match profile_for(family).substitute {
                    Some(sub) => (sub.to_string(), shell_family(sub)),
                    None => (default_shell.to_string(), family),
                }
            }
        },
    };

    let mut args: Vec<String> = match args_override {
        Some(args) => args.to_vec(),
        None => profile_for(family)
            .flags
            .iter()
            .map(|f| f.to_string())
            .collect(),
    };
    args.push(command.to_string());

    ShellLaunch { program, args }
}
