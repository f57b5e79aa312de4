//! Command deny-list.

use std::sync::OnceLock;

use regex::Regex;

/// Substrings that mark a command as destructive regardless of target OS.
pub const DANGEROUS_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "rm -rf ~",
    "format c:",
    "del /s /q c:\\",
    ":(){ :|:& };:",
    ":(){:|:&};:",
    "mkfs",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    "> /dev/sda",
    "chmod -r 777 /",
    "chown -r root:root /",
    "shutdown -h now",
    "init 0",
    "shutdown /s",
];

fn whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Case-insensitive substring match against [`DANGEROUS_COMMANDS`].
///
/// Runs of whitespace are collapsed first so `rm  -rf   /` is caught too.
/// The verdict is boolean only; the command is never rewritten.
pub fn is_dangerous_command(command: &str) -> bool {
    matched_pattern(command).is_some()
}

/// Returns the deny-list entry that matched, for error messages.
pub fn matched_pattern(command: &str) -> Option<&'static str> {
    let lowered = command.to_lowercase();
    let collapsed = whitespace().replace_all(lowered.trim(), " ");
    DANGEROUS_COMMANDS
        .iter()
        .copied()
        .find(|pattern| collapsed.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangerous_commands() {
        assert!(is_dangerous_command("rm -rf /"));
        assert!(is_dangerous_command("sudo rm -rf /home"));
        assert!(is_dangerous_command("FORMAT C:"));
        assert!(is_dangerous_command("rm   -rf    /"));
        assert!(is_dangerous_command("mkfs.ext4 /dev/sdb1"));
        assert!(is_dangerous_command(":(){ :|:& };:"));
        assert!(!is_dangerous_command("ls -la"));
        assert!(!is_dangerous_command("echo hello"));
        assert!(!is_dangerous_command("rm -rf ./build"));
    }

    #[test]
    fn test_matched_pattern() {
        assert_eq!(matched_pattern("shutdown -h now"), Some("shutdown -h now"));
        assert_eq!(matched_pattern("uptime"), None);
        assert_eq!(matched_pattern("sudo  DD   if=/dev/zero of=/dev/sda"), Some("dd if=/dev/zero"));
    }

    #[test]
    fn test_verdict_agrees_with_match() {
        for command in ["rm -rf /", "RM\t-RF  /", "ls -la", "init 0", "Get-Service"] {
            assert_eq!(is_dangerous_command(command), matched_pattern(command).is_some());
        }
    }
}
