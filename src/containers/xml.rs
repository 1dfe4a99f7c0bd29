// src/containers/xml.rs

//! Hierarchical XML container adapter
//!
//! Streams events through quick-xml and offers every text node, CDATA
//! section, and attribute value to the rewriter. Unchanged events are
//! written back from their original bytes, entity escapes included; an
//! element is only rebuilt when one of its attribute values actually
//! changed. Elements named in the skip list (prose fields such as plot
//! outlines, where slashes are common and paths are not) keep their text
//! untouched.

use quick_xml::events::{BytesCData, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::ValueRewriter;
use crate::diag::Coordinate;
use crate::error::{Error, Result};

/// Rewrite an XML container in place; true when the file changed
pub fn process(path: &Path, rewriter: &mut dyn ValueRewriter, skip_elements: &[String]) -> Result<bool> {
    let input = fs::read_to_string(path)?;
    match rewrite_document(&input, rewriter, skip_elements)? {
        Some(out) => {
            fs::write(path, out)?;
            debug!(file = %path.display(), "rewrote document values");
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Rewrite text nodes, CDATA sections, and attribute values of a document
///
/// Returns `None` when nothing changed so the caller can skip the write.
pub fn rewrite_document(
    input: &str,
    rewriter: &mut dyn ValueRewriter,
    skip_elements: &[String],
) -> Result<Option<String>> {
    let mut reader = Reader::from_str(input);
    let mut writer = Writer::new(Vec::with_capacity(input.len()));
    let mut stack: Vec<String> = Vec::new();
    let mut changed = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match rewritten_start(&e, &name, rewriter)? {
                    Some(elem) => {
                        changed = true;
                        writer.write_event(Event::Start(elem))?;
                    }
                    None => writer.write_event(Event::Start(e))?,
                }
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match rewritten_start(&e, &name, rewriter)? {
                    Some(elem) => {
                        changed = true;
                        writer.write_event(Event::Empty(elem))?;
                    }
                    None => writer.write_event(Event::Empty(e))?,
                }
            }
            Event::End(e) => {
                stack.pop();
                writer.write_event(Event::End(e))?;
            }
            Event::Text(t) => {
                let element = stack.last().map(String::as_str).unwrap_or("").to_string();
                if skip_elements.iter().any(|s| s == &element) {
                    writer.write_event(Event::Text(t))?;
                    continue;
                }
                let text = t.unescape()?.into_owned();
                let at = Coordinate::Node {
                    element,
                    attribute: None,
                };
                match rewriter.rewrite(&text, &at) {
                    Some(new) if new != text => {
                        changed = true;
                        writer.write_event(Event::Text(BytesText::new(&new)))?;
                    }
                    _ => writer.write_event(Event::Text(t))?,
                }
            }
            Event::CData(t) => {
                let element = stack.last().map(String::as_str).unwrap_or("").to_string();
                if skip_elements.iter().any(|s| s == &element) {
                    writer.write_event(Event::CData(t))?;
                    continue;
                }
                let text = String::from_utf8_lossy(&t).into_owned();
                let at = Coordinate::Node {
                    element,
                    attribute: None,
                };
                match rewriter.rewrite(&text, &at) {
                    Some(new) if new != text => {
                        changed = true;
                        writer.write_event(Event::CData(BytesCData::new(&new)))?;
                    }
                    _ => writer.write_event(Event::CData(t))?,
                }
            }
            other => writer.write_event(other)?,
        }
    }

    if !changed {
        return Ok(None);
    }
    let out = writer.into_inner();
    String::from_utf8(out)
        .map(Some)
        .map_err(|e| Error::Other(format!("rewritten document is not valid UTF-8: {e}")))
}

/// Rebuild a start tag only when an attribute value changed
fn rewritten_start(
    e: &BytesStart<'_>,
    name: &str,
    rewriter: &mut dyn ValueRewriter,
) -> Result<Option<BytesStart<'static>>> {
    let mut changed = false;
    let mut attrs: Vec<(String, String)> = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        let at = Coordinate::Node {
            element: name.to_string(),
            attribute: Some(key.clone()),
        };
        match rewriter.rewrite(&value, &at) {
            Some(new) if new != value => {
                changed = true;
                attrs.push((key, new));
            }
            _ => attrs.push((key, value)),
        }
    }
    if !changed {
        return Ok(None);
    }
    let mut elem = BytesStart::new(name.to_string());
    for (key, value) in &attrs {
        elem.push_attribute((key.as_str(), value.as_str()));
    }
    Ok(Some(elem))
}
