//! Normalization of untrusted names into safe file and folder identifiers.

const MARKDOWN_EXTENSIONS: [&str; 2] = [".md", ".markdown"];

/// Turn `name` into a safe markdown file name.
///
/// Path separators and NUL are dropped, anything outside `[A-Za-z0-9._-]`
/// becomes `_`, and `.md` is appended unless a markdown extension is already
/// present (an upper-case one is lower-cased).
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = map_chars(name, true);
    if out.is_empty() {
        out.push_str("unnamed");
    }

    let lower = out.to_ascii_lowercase();
    match MARKDOWN_EXTENSIONS.iter().find(|ext| lower.ends_with(*ext)) {
        Some(ext) => {
            let stem_len = out.len() - ext.len();
            out.truncate(stem_len);
            out.push_str(ext);
        },
        None => out.push_str(".md"),
    }
    out
}

/// Turn `name` into a safe folder name. Dots are not allowed at all.
pub fn sanitize_folder_name(name: &str) -> String {
    let out = map_chars(name, false);
    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}

pub(crate) fn has_markdown_extension(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    MARKDOWN_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn map_chars(name: &str, allow_dot: bool) -> String {
    name.chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_dot && c == '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
