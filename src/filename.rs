//! Filename sanitization for exported documents.

/// Characters Windows refuses in file names.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of a sanitized name, in characters.
pub const MAX_FILENAME_CHARS: usize = 200;

/// Name used when a title sanitizes to nothing.
pub const DEFAULT_STEM: &str = "Untitled page";

const PDF_EXTENSION: &str = ".pdf";

/// Replace illegal characters with `_`, collapse whitespace runs into one
/// space, trim, and cap the result at 200 characters.
pub fn sanitize_filename(name: &str) -> String {
    truncate_trimmed(&clean(name), MAX_FILENAME_CHARS)
}

/// Derive the exported file name from a page title.
///
/// The result always ends in `.pdf` and never exceeds 200 characters.
pub fn pdf_filename(title: &str) -> String {
    let cleaned = clean(title);
    let mut stem = truncate_trimmed(&cleaned, MAX_FILENAME_CHARS - PDF_EXTENSION.len());
    if stem.is_empty() {
        stem = DEFAULT_STEM.to_string();
    }
    format!("{}{}", stem, PDF_EXTENSION)
}

fn clean(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if ILLEGAL.contains(&c) { '_' } else { c })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_trimmed(s: &str, max_chars: usize) -> String {
    s.chars()
        .take(max_chars)
        .collect::<String>()
        .trim()
        .to_string()
}
