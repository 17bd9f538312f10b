//! Command splitting
//!
//! A raw command string may hold several commands separated by the two
//! characters `\n` (backslash, letter n). Writing `\\n` keeps a literal
//! backslash-n inside a command instead of splitting.

/// Two-character command delimiter
pub const DELIMITER: &str = "\\n";

/// Escaped form of the delimiter, collapsed back to `\n` inside a command
const ESCAPED_DELIMITER: &str = "\\\\n";

/// Instruction appended to session scripts so the remote shell terminates
const SESSION_EXIT: &str = "exit";

/// Split a raw command string into individual commands.
///
/// A `\n` whose backslash is not preceded by another backslash is a
/// boundary and is consumed. In every fragment `\\n` collapses to `\n`.
/// Empty fragments produced by leading, trailing, or repeated delimiters are
/// kept. An empty input yields no commands.
///
/// # Examples
/// ```
/// use ssh_dispatch::ssh::split::split_commands;
///
/// assert_eq!(split_commands(r"uptime\nwhoami"), vec!["uptime", "whoami"]);
/// assert_eq!(split_commands(r"printf 'a\\nb'"), vec![r"printf 'a\nb'"]);
/// ```
pub fn split_commands(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }

    let bytes = raw.as_bytes();
    let mut commands = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        let at_delimiter = bytes[i] == b'\\' && bytes[i + 1] == b'n';
        if at_delimiter && (i == 0 || bytes[i - 1] != b'\\') {
            commands.push(unescape(&raw[start..i]));
            i += DELIMITER.len();
            start = i;
        } else {
            i += 1;
        }
    }

    commands.push(unescape(&raw[start..]));
    commands
}

/// Build the payload written to an interactive shell session.
///
/// Commands are joined by real line feeds and followed by an `exit` line so
/// the shell ends once the script is done.
///
/// ```
/// use ssh_dispatch::ssh::split::session_script;
///
/// assert_eq!(session_script(r"ls\nexit 3"), "ls\nexit 3\nexit\n");
/// ```
pub fn session_script(raw: &str) -> String {
    let mut script = split_commands(raw).join("\n");
    script.push('\n');
    script.push_str(SESSION_EXIT);
    script.push('\n');
    script
}

/// Join commands back into a single raw string using the delimiter.
///
/// Literal `\n` sequences are escaped so they survive a later split.
pub fn join_commands<S: AsRef<str>>(commands: &[S]) -> String {
    commands
        .iter()
        .map(|c| c.as_ref().replace(DELIMITER, ESCAPED_DELIMITER))
        .collect::<Vec<_>>()
        .join(DELIMITER)
}

fn unescape(fragment: &str) -> String {
    fragment.replace(ESCAPED_DELIMITER, DELIMITER)
}
