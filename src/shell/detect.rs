//! Shell 检测
//!
//! 检测系统默认 shell 并识别 shell 家族。

use std::env;

/// Shell 家族，决定非交互启动参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFamily {
    /// zsh
    Zsh,
    /// bash
    Bash,
    /// csh / tcsh
    Csh,
    /// sh / dash 等其他 Bourne 兼容 shell
    Posix,
    /// powershell / pwsh
    PowerShell,
    /// cmd.exe
    Cmd,
}

/// 检测系统默认 shell
pub fn detect_default_shell() -> String {
    #[cfg(unix)]
    {
        // Unix: 使用 SHELL 环境变量
        env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }

    #[cfg(windows)]
    {
        // Windows: 使用 COMSPEC 环境变量
        env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
}

/// 获取 shell 名称
pub fn get_shell_name(shell_path: &str) -> &str {
    std::path::Path::new(shell_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("shell")
}

/// 根据 shell 路径识别家族
pub fn shell_family(shell_path: &str) -> ShellFamily {
    let name = get_shell_name(shell_path).to_ascii_lowercase();
    let name = name.trim_end_matches(".exe");

    match name {
        n if n.contains("zsh") => ShellFamily::Zsh,
        "bash" => ShellFamily::Bash,
        "csh" | "tcsh" => ShellFamily::Csh,
        "powershell" | "pwsh" => ShellFamily::PowerShell,
        "cmd" => ShellFamily::Cmd,
        _ => ShellFamily::Posix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_default_shell() {
        let shell = detect_default_shell();
        assert!(!shell.is_empty());
    }

    #[test]
    fn test_get_shell_name() {
        assert_eq!(get_shell_name("/bin/zsh"), "zsh");
        assert_eq!(get_shell_name("/bin/bash"), "bash");
        assert_eq!(get_shell_name("/usr/local/bin/fish"), "fish");
        assert_eq!(get_shell_name("cmd.exe"), "cmd.exe");
    }

    #[test]
    fn test_shell_family() {
        assert_eq!(shell_family("/bin/zsh"), ShellFamily::Zsh);
        assert_eq!(shell_family("/usr/local/bin/zsh-5.9"), ShellFamily::Zsh);
        assert_eq!(shell_family("/bin/tcsh"), ShellFamily::Csh);
        assert_eq!(shell_family("/bin/csh"), ShellFamily::Csh);
        assert_eq!(shell_family("/bin/bash"), ShellFamily::Bash);
        assert_eq!(shell_family("/bin/sh"), ShellFamily::Posix);
        assert_eq!(shell_family("/usr/bin/fish"), ShellFamily::Posix);
        assert_eq!(shell_family("powershell.exe"), ShellFamily::PowerShell);
        assert_eq!(shell_family("PWSH.EXE"), ShellFamily::PowerShell);
        assert_eq!(shell_family("cmd.exe"), ShellFamily::Cmd);
    }
}
