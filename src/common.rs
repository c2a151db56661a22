//! Small string helpers shared by the pipeline.

use std::path::Path;

/// Sanitize a string for use in filenames.
pub fn sanitize_filename(name: &str, fallback: &str) -> String {
    let mut result = String::new();
    let mut last_dash = false;

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            result.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if (ch.is_whitespace() || ch == '-' || ch == '_' || ch == '.')
            && !last_dash
            && !result.is_empty()
        {
            result.push('-');
            last_dash = true;
        }
    }

    let result = result.trim_matches('-');
    if result.is_empty() {
        return fallback.to_string();
    }
    result.to_string()
}

/// Base name for the generated files of a form, e.g. `contrato-f1`.
pub fn artifact_stem(template_storage_path: &str, form_id: &str) -> String {
    let template_stem = Path::new(template_storage_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default();
    format!(
        "{}-{}",
        sanitize_filename(template_stem, "documento"),
        sanitize_filename(form_id, "form")
    )
}

/// Cuts `text` to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_separators() {
        assert_eq!(sanitize_filename("  Contrato de Locação_v2 ", "x"), "contrato-de-locao-v2");
        assert_eq!(sanitize_filename("***", "fallback"), "fallback");
    }

    #[test]
    fn artifact_stem_combines_template_and_form() {
        assert_eq!(artifact_stem("templates/office1/Contrato.docx", "F1"), "contrato-f1");
        assert_eq!(artifact_stem("", "f1"), "documento-f1");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("ação", 2), "aç");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars(&"x".repeat(600), 500).len(), 500);
    }
}
