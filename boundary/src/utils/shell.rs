//! Quoting for values interpolated into remote shell commands.

use shell_escape::unix::escape;
use std::borrow::Cow;

/// Quotes `value` so a POSIX shell reads it back as one literal word.
pub fn quote(value: &str) -> String {
    escape(Cow::Borrowed(value)).into_owned()
}

/// Wraps `command` as a single `sh -c` argument.
pub fn sh_c(command: &str) -> String {
    format!("sh -c {}", quote(command))
}
