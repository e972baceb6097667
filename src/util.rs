use std::path::{Component, Path};

/// Display a path relative to `base` when possible, always with `/` separators
/// so document ids are stable across platforms.
pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    let shown = match base.and_then(|base| path.strip_prefix(base).ok()) {
        Some(relative) if !relative.as_os_str().is_empty() => relative,
        _ => path,
    };
    shown
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
        .replace("//", "/")
}

pub fn truncate_bytes(bytes: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    truncate_string(&text, max_bytes)
}

pub fn truncate_string(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = text[..end].to_string();
    truncated.push_str("\n[... output truncated ...]\n");
    truncated
}

/// Render an error with its full context chain on one line.
pub fn error_chain_message(err: &anyhow::Error) -> String {
    err.chain()
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
