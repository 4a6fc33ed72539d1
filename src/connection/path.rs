//! Pure path-resolution and CWD-tracking helpers, kept free of any I/O so
//! they can be unit tested without a live SSH session.

/// Resolve `path` against `cwd` (the Connection's tracked working directory,
/// not the process's) and normalize away `.` and `..` segments. Never
/// touches the filesystem — there is no sandbox to enforce here, only
/// lexical normalization.
pub fn resolve(cwd: &str, path: &str) -> String {
    let absolute = if path.starts_with('/') {
        path.to_string()
    } else if path == "~" || path.starts_with("~/") {
        path.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), path)
    };

    if absolute.starts_with('~') {
        return absolute;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in absolute.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Wrap a user command so the remote shell reports its final working
/// directory after execution, without masking the command's own exit code.
pub fn wrap_with_cwd_tracking(cwd: &str, command: &str, nonce: &str) -> String {
    format!(
        "cd {} && {}; __rc=$?; printf '\\n'; printf '%s\\n' {}; pwd; exit $__rc",
        shell_quote(cwd),
        command,
        nonce
    )
}

/// Split the wrapped command's stdout on the nonce line. Returns the
/// pre-nonce output (what the caller should see) and the trimmed post-nonce
/// line (the shell's final `pwd`, the new CWD).
pub fn split_on_nonce<'a>(raw: &'a str, nonce: &str) -> (&'a str, String) {
    let marker = format!("\n{nonce}\n");
    match raw.find(&marker) {
        Some(idx) => {
            let output = &raw[..idx];
            let after = &raw[idx + marker.len()..];
            let cwd = after.lines().next().unwrap_or("").trim().to_string();
            (output, cwd)
        }
        None => (raw, String::new()),
    }
}

/// Single-quote a shell argument, doubling embedded single quotes the
/// conventional POSIX way: close the quote, emit an escaped quote, reopen.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_against_cwd() {
        assert_eq!(resolve("/home/user", "project/src"), "/home/user/project/src");
    }

    #[test]
    fn resolves_absolute_unchanged() {
        assert_eq!(resolve("/home/user", "/etc/hosts"), "/etc/hosts");
    }

    #[test]
    fn normalizes_dot_dot() {
        assert_eq!(resolve("/home/user/project", "../other"), "/home/user/other");
    }

    #[test]
    fn normalizes_repeated_slashes_and_dot() {
        assert_eq!(resolve("/home/user", "./a//b/./c"), "/home/user/a/b/c");
    }

    #[test]
    fn leaves_tilde_untouched() {
        assert_eq!(resolve("/home/user", "~/docs"), "~/docs");
    }

    #[test]
    fn cwd_round_trip_through_wrap_and_split() {
        let wrapped = wrap_with_cwd_tracking("/tmp", "cd /var/log && true", "n0nce123");
        assert!(wrapped.starts_with("cd '/tmp' &&"));
        assert!(wrapped.contains("exit $__rc"));

        let raw = "\nn0nce123\n/var/log\n";
        let (output, cwd) = split_on_nonce(raw, "n0nce123");
        assert_eq!(output, "");
        assert_eq!(cwd, "/var/log");
    }

    #[test]
    fn split_preserves_output_before_nonce() {
        let raw = "hello\nworld\nn0nce\n/home/user\n";
        let (output, cwd) = split_on_nonce(raw, "n0nce");
        assert_eq!(output, "hello\nworld");
        assert_eq!(cwd, "/home/user");
    }

    #[test]
    fn quotes_embedded_single_quote() {
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn quotes_plain_argument() {
        assert_eq!(shell_quote("hello"), "'hello'");
    }
}
