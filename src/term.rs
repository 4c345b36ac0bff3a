/// Helpers for raw terminal output: escape stripping and working-directory
/// detection.
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").expect("valid regex")
});

static OSC7: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\]7;file://[^/\x07\x1b]*(/[^\x07\x1b]*)(?:\x07|\x1b\\)").expect("valid regex")
});

/// Remove CSI/OSC escapes and carriage returns.
pub fn strip_ansi(s: &str) -> String {
    ANSI.replace_all(s, "").replace('\r', "")
}

/// Drop the echoed command line a PTY prints before the command's output.
pub fn trim_echo<'a>(output: &'a str, command: &str) -> &'a str {
    let trimmed = output.trim_start_matches('\n');
    match trimmed.split_once('\n') {
        Some((first, rest)) if first.trim_end().ends_with(command.trim()) => rest,
        None if trimmed.trim_end().ends_with(command.trim()) => "",
        _ => output,
    }
}

/// Drop a trailing prompt: whatever follows the last newline when the text
/// does not end in one.
pub fn trim_prompt(output: &str) -> &str {
    if output.is_empty() || output.ends_with('\n') {
        return output;
    }
    match output.rfind('\n') {
        Some(i) => &output[..=i],
        None => "",
    }
}

/// The last directory reported via an OSC 7 sequence, if any.
pub fn detect_osc7_cwd(raw: &str) -> Option<PathBuf> {
    OSC7
        .captures_iter(raw)
        .last()
        .map(|cap| PathBuf::from(percent_decode(&cap[1])))
}

/// `cd` target of a simple `cd <dir>` command. `cd` alone means home.
pub fn parse_cd_target(command: &str) -> Option<&str> {
    let mut words = command.split_whitespace();
    if words.next()? != "cd" {
        return None;
    }
    match (words.next(), words.next()) {
        (None, _) => Some("~"),
        (Some("-"), _) => None,
        (Some(target), None) => Some(target),
        _ => None,
    }
}

/// Resolve a `cd` target against `cwd`, expanding `~`.
pub fn resolve_cd(target: &str, cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
    let path = if target == "~" {
        home?.to_path_buf()
    } else if let Some(rest) = target.strip_prefix("~/") {
        home?.join(rest)
    } else {
        cwd.join(target)
    };
    path.canonicalize().ok().filter(|p| p.is_dir())
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
