//! Paragraph-level view over WordprocessingML.
//!
//! Word splits the visible text of a paragraph across any number of `w:t`
//! elements (one per formatting run, spell-check boundary, revision, ...).
//! This module keeps the raw event stream so the document can be written back
//! untouched, and groups each `w:t` under its innermost enclosing `w:p`. Table
//! cells hold ordinary paragraphs, so they are covered by the same walk.

use std::collections::BTreeMap;

use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use super::DocumentError;

const PARAGRAPH: &[u8] = b"w:p";
const TEXT: &[u8] = b"w:t";

/// One `w:t` element: the index of its start event, the index of its end event
/// and its decoded content.
#[derive(Debug, Clone)]
pub(crate) struct TextSegment {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Paragraph {
    pub segments: Vec<TextSegment>,
}

impl Paragraph {
    /// Visible text of the paragraph with run boundaries removed.
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }
}

pub(crate) struct ParsedPart {
    events: Vec<Event<'static>>,
    pub paragraphs: Vec<Paragraph>,
}

pub(crate) fn parse(xml: &str) -> Result<ParsedPart, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut events = Vec::new();
    let mut paragraphs: Vec<Paragraph> = Vec::new();
    let mut open_paragraphs: Vec<usize> = Vec::new();
    let mut open_text: Option<TextSegment> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DocumentError::TemplateMalformed(format!("XML parsing error: {e}")))?;
        let index = events.len();

        match &event {
            Event::Start(e) if e.name().as_ref() == PARAGRAPH => {
                paragraphs.push(Paragraph::default());
                open_paragraphs.push(paragraphs.len() - 1);
            }
            Event::End(e) if e.name().as_ref() == PARAGRAPH => {
                open_paragraphs.pop();
            }
            Event::Start(e) if e.name().as_ref() == TEXT => {
                open_text = Some(TextSegment {
                    start: index,
                    end: index,
                    text: String::new(),
                });
            }
            Event::End(e) if e.name().as_ref() == TEXT => {
                if let Some(mut segment) = open_text.take() {
                    segment.end = index;
                    if let Some(&paragraph) = open_paragraphs.last() {
                        paragraphs[paragraph].segments.push(segment);
                    }
                }
            }
            Event::Text(e) => {
                if let Some(segment) = open_text.as_mut() {
                    segment.text.push_str(&decode_text(e)?);
                }
            }
            Event::GeneralRef(e) => {
                if let Some(segment) = open_text.as_mut() {
                    let name = std::str::from_utf8(&**e)
                        .map_err(|e| DocumentError::TemplateMalformed(e.to_string()))?;
                    segment.text.push_str(&resolve_reference(name)?);
                }
            }
            Event::CData(e) => {
                if let Some(segment) = open_text.as_mut() {
                    segment.text.push_str(&String::from_utf8_lossy(&**e));
                }
            }
            Event::Eof => break,
            _ => {}
        }

        events.push(event.into_owned());
    }

    if !open_paragraphs.is_empty() || open_text.is_some() {
        return Err(DocumentError::TemplateMalformed(
            "unterminated paragraph in document body".to_string(),
        ));
    }

    Ok(ParsedPart { events, paragraphs })
}

fn decode_text(text: &BytesText<'_>) -> Result<String, DocumentError> {
    let raw = std::str::from_utf8(&**text)
        .map_err(|e| DocumentError::TemplateMalformed(e.to_string()))?;
    unescape(raw)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| DocumentError::TemplateMalformed(format!("bad text escape: {e}")))
}

fn resolve_reference(name: &str) -> Result<String, DocumentError> {
    if let Some(code) = name.strip_prefix('#') {
        let value = match code.strip_prefix('x').or_else(|| code.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => code.parse::<u32>(),
        };
        return value
            .ok()
            .and_then(char::from_u32)
            .map(String::from)
            .ok_or_else(|| DocumentError::TemplateMalformed(format!("bad character reference &{name};")));
    }

    resolve_predefined_entity(name)
        .map(str::to_string)
        .ok_or_else(|| DocumentError::TemplateMalformed(format!("unknown entity &{name};")))
}

impl ParsedPart {
    /// Serializes the part, replacing the content of the `w:t` elements keyed
    /// by their start-event index.
    pub fn write(&self, replaced: &BTreeMap<usize, (usize, String)>) -> Result<String, DocumentError> {
        let mut writer = Writer::new(Vec::new());
        let mut index = 0;

        while index < self.events.len() {
            if let Some((end, text)) = replaced.get(&index) {
                if let Event::Start(start) = &self.events[index] {
                    write_event(&mut writer, Event::Start(with_preserved_space(start)))?;
                    if !text.is_empty() {
                        write_event(&mut writer, Event::Text(BytesText::new(text)))?;
                    }
                    write_event(&mut writer, self.events[*end].clone())?;
                    index = end + 1;
                    continue;
                }
            }

            write_event(&mut writer, self.events[index].clone())?;
            index += 1;
        }

        String::from_utf8(writer.into_inner())
            .map_err(|e| DocumentError::TemplateMalformed(e.to_string()))
    }
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), DocumentError> {
    writer
        .write_event(event)
        .map_err(|e| DocumentError::TemplateMalformed(format!("XML write error: {e}")))
}

/// Substituted values may start or end with spaces, which Word drops unless
/// the element asks to keep them.
fn with_preserved_space(start: &BytesStart<'_>) -> BytesStart<'static> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = BytesStart::new(name);
    for attr in start.attributes().flatten() {
        if attr.key.as_ref() != b"xml:space" {
            element.push_attribute(attr);
        }
    }
    element.push_attribute(("xml:space", "preserve"));
    element
}
