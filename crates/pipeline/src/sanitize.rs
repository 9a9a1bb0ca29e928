//! Filename sanitization
//!
//! Turns a free-text media title into something safe to use as a file name
//! on any common filesystem and short enough to display on a phone.

use thiserror::Error;

/// Titles longer than this are truncated.
const MAX_NAME_CHARS: usize = 100;

/// A space past this index is preferred as the truncation point.
const WORD_BOUNDARY_MIN_INDEX: usize = 70;

/// Error type for sanitization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    #[error("title is empty")]
    EmptyTitle,
    #[error("title '{0}' has no usable characters")]
    UnsanitizableTitle(String),
}

/// Sanitizes `title` into a filesystem-safe base name (no extension).
///
/// Policy:
/// 1. Control characters (< U+0020) are dropped
/// 2. `/ \ < > : " |` become `-`; `?` and `*` are dropped
/// 3. Leading/trailing spaces and periods are trimmed
/// 4. Runs of spaces collapse to one
/// 5. Names over 100 characters are cut, at the last space past index 70
///    when there is one
pub fn sanitize_file_name(title: &str) -> Result<String, SanitizeError> {
    if title.is_empty() {
        return Err(SanitizeError::EmptyTitle);
    }

    let replaced: String = title
        .chars()
        .filter_map(|c| match c {
            c if (c as u32) < 32 => None,
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' => Some('-'),
            '?' | '*' => None,
            c => Some(c),
        })
        .collect();

    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');

    let mut collapsed = String::with_capacity(trimmed.len());
    let mut prev_space = false;
    for c in trimmed.chars() {
        if c == ' ' {
            if prev_space {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        collapsed.push(c);
    }

    let truncated = truncate_at_word(&collapsed);

    let result = truncated.trim();
    if result.is_empty() {
        return Err(SanitizeError::UnsanitizableTitle(title.to_string()));
    }

    Ok(result.to_string())
}

fn truncate_at_word(name: &str) -> String {
    if name.chars().count() <= MAX_NAME_CHARS {
        return name.to_string();
    }

    let head: Vec<char> = name.chars().take(MAX_NAME_CHARS).collect();
    let cut = match head.iter().rposition(|&c| c == ' ') {
        Some(idx) if idx > WORD_BOUNDARY_MIN_INDEX => idx,
        _ => MAX_NAME_CHARS,
    };
    head[..cut].iter().collect()
}
