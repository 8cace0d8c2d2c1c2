//! Output path derivation from untrusted titles.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AutoleetError, Result};

/// Extension of persisted solution scripts.
pub const SCRIPT_EXTENSION: &str = "py";

/// Upper bound on the file stem, in UTF-8 bytes. Leaves room for the
/// extension within the usual 255-byte name limit.
pub const MAX_STEM_BYTES: usize = 200;

const FALLBACK_STEM: &str = "untitled";

fn disallowed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s-]").expect("disallowed pattern is valid"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Reduce a title to word characters, `-` and `_`.
///
/// Idempotent. May return an empty string.
pub fn sanitize_title(title: &str) -> String {
    let kept = disallowed_re().replace_all(title, "");
    let collapsed = whitespace_re().replace_all(kept.trim(), "_");
    truncate_on_char_boundary(&collapsed, MAX_STEM_BYTES).to_string()
}

fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    &text[..cut]
}

/// File stem for a solution: the sanitized title, else the sanitized input
/// stem, else `untitled`.
pub fn output_stem(title: Option<&str>, input: &Path) -> String {
    let from_title = title.map(sanitize_title).unwrap_or_default();
    if !from_title.is_empty() {
        return from_title;
    }
    let from_input = input
        .file_stem()
        .map(|s| sanitize_title(&s.to_string_lossy()))
        .unwrap_or_default();
    if !from_input.is_empty() {
        return from_input;
    }
    FALLBACK_STEM.to_string()
}

/// Resolve `<output_dir>/<stem>.py`, refusing anything that would land
/// outside `output_dir`.
pub fn resolve_output_path(output_dir: &Path, title: Option<&str>, input: &Path) -> Result<PathBuf> {
    let file_name = format!("{}.{}", output_stem(title, input), SCRIPT_EXTENSION);
    contained_join(output_dir, Path::new(&file_name))
}

/// Join `relative` onto `base` only if every component is a plain name.
pub fn contained_join(base: &Path, relative: &Path) -> Result<PathBuf> {
    let escapes = relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes {
        return Err(AutoleetError::FileHandling(format!(
            "refusing output path {} outside {}",
            relative.display(),
            base.display()
        )));
    }
    let joined = base.join(relative);
    if !joined.starts_with(base) {
        return Err(AutoleetError::FileHandling(format!(
            "refusing output path {} outside {}",
            joined.display(),
            base.display()
        )));
    }
    Ok(joined)
}
