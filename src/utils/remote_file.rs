//! Shell commands for small state files on a host.
//!
//! Reads of an absent file succeed with empty output so that a failed command
//! always means the host (or its shell) failed, not that the file is missing.

use super::shell::{quote_arg, quote_path, remote_parent};

fn ensure_parent(path: &str) -> String {
    match remote_parent(path) {
        Some(parent) => format!("mkdir -p {} && ", quote_path(parent)),
        None => String::new(),
    }
}

/// Print the file, or nothing if it does not exist.
pub fn read(path: &str) -> String {
    let quoted = quote_path(path);
    format!("if [ -f {q} ]; then cat {q}; fi", q = quoted)
}

/// Replace the file contents via a temp file and rename.
pub fn write(path: &str, content: &str) -> String {
    let tmp = format!("{}.tmp", path);
    format!(
        "{}printf '%s\\n' {} > {} && mv {} {}",
        ensure_parent(path),
        quote_path(content),
        quote_path(&tmp),
        quote_path(&tmp),
        quote_path(path)
    )
}

/// Append lines to the file, creating it if needed.
pub fn append(path: &str, content: &str) -> String {
    format!(
        "{}printf '%s\\n' {} >> {}",
        ensure_parent(path),
        quote_path(content),
        quote_path(path)
    )
}

pub fn remove(path: &str) -> String {
    format!("rm -f {}", quote_path(path))
}

/// Last `lines` lines of the file, or nothing if it does not exist.
pub fn tail(path: &str, lines: usize) -> String {
    let quoted = quote_path(path);
    format!(
        "if [ -f {q} ]; then tail -n {n} {q}; fi",
        q = quoted,
        n = quote_arg(&lines.to_string())
    )
}
