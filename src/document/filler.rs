use std::collections::BTreeMap;

use regex::Regex;

use crate::models::FormValues;

use super::paragraph::{Paragraph, ParsedPart};
use super::DocumentError;

/// Rewrites every `{{key}}` in the part whose key appears in `values`.
///
/// Returns the new XML and the number of tokens replaced.
pub(crate) fn fill_part(part: &ParsedPart, values: &FormValues) -> Result<(String, usize), DocumentError> {
    let Some(pattern) = token_pattern(values)? else {
        return Ok((part.write(&BTreeMap::new())?, 0));
    };

    let texts: BTreeMap<&str, String> = values
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_text()))
        .collect();

    let mut replaced = BTreeMap::new();
    let mut count = 0;
    for paragraph in &part.paragraphs {
        count += fill_paragraph(paragraph, &pattern, &texts, &mut replaced);
    }

    Ok((part.write(&replaced)?, count))
}

/// Literal `{{key}}` for every key, longest first so a key never shadows a
/// longer one sharing its prefix.
fn token_pattern(values: &FormValues) -> Result<Option<Regex>, DocumentError> {
    if values.is_empty() {
        return Ok(None);
    }
    let mut keys: Vec<&str> = values.keys().map(String::as_str).collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()));
    let alternation = keys
        .iter()
        .map(|key| regex::escape(key))
        .collect::<Vec<_>>()
        .join("|");

    Regex::new(&format!(r"\{{\{{(?:{alternation})\}}\}}"))
        .map(Some)
        .map_err(|e| DocumentError::TemplateMalformed(format!("unusable field name: {e}")))
}

/// Substitutes tokens on the paragraph's joined text and maps the result back
/// onto its runs.
///
/// Characters outside a token stay in the run they came from. The value lands
/// in the run holding the token's first character and the rest of the token is
/// removed from whichever runs it spilled into, so formatting of untouched
/// runs is kept.
fn fill_paragraph(
    paragraph: &Paragraph,
    pattern: &Regex,
    texts: &BTreeMap<&str, String>,
    replaced: &mut BTreeMap<usize, (usize, String)>,
) -> usize {
    let full = paragraph.text();
    let matches: Vec<_> = pattern.find_iter(&full).collect();
    if matches.is_empty() {
        return 0;
    }

    let mut starts = Vec::with_capacity(paragraph.segments.len());
    let mut ends = Vec::with_capacity(paragraph.segments.len());
    let mut offset = 0;
    for segment in &paragraph.segments {
        starts.push(offset);
        offset += segment.text.len();
        ends.push(offset);
    }
    let segment_at = |pos: usize| starts.partition_point(|&start| start <= pos) - 1;

    let mut output = vec![String::new(); paragraph.segments.len()];
    let keep = |output: &mut Vec<String>, from: usize, to: usize| {
        let mut pos = from;
        while pos < to {
            let index = segment_at(pos);
            let chunk_end = to.min(ends[index]);
            output[index].push_str(&full[pos..chunk_end]);
            pos = chunk_end;
        }
    };

    let mut last = 0;
    for m in &matches {
        keep(&mut output, last, m.start());
        let key = &full[m.start() + 2..m.end() - 2];
        if let Some(value) = texts.get(key) {
            output[segment_at(m.start())].push_str(value);
        }
        last = m.end();
    }
    keep(&mut output, last, full.len());

    for (segment, text) in paragraph.segments.iter().zip(output) {
        if segment.text != text {
            replaced.insert(segment.start, (segment.end, text));
        }
    }

    matches.len()
}
