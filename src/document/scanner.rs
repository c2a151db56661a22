use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use super::paragraph::Paragraph;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder pattern is valid"));

/// Collects the distinct `{{name}}` tokens found in the given paragraphs.
///
/// Each paragraph is matched on its full visible text, so a token whose braces
/// sit in different runs is still found.
pub(crate) fn scan_paragraphs(paragraphs: &[Paragraph]) -> BTreeSet<String> {
    paragraphs
        .iter()
        .flat_map(|paragraph| {
            let text = paragraph.text();
            PLACEHOLDER
                .captures_iter(&text)
                .map(|caps| caps[1].to_string())
                .collect::<Vec<_>>()
        })
        .collect()
}
