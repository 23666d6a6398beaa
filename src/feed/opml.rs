use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::util::validate_url;

/// Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack exhaustion from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A feed outline extracted from an OPML document.
///
/// Nested category outlines are flattened away; only outlines carrying an
/// `xmlUrl` are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outline {
    /// Display text of the outline (`text`, falling back to `title`).
    /// Empty when the document provides neither.
    pub text: String,
    /// URL of the RSS/Atom feed. Validated to be HTTP(S) and not pointing
    /// to localhost or private IP ranges.
    pub xml_url: String,
}

/// Reads an OPML file from disk and extracts its feed outlines.
pub async fn read_opml(path: &std::path::Path) -> Result<Vec<Outline>, OpmlError> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_opml(&content)
}

/// Parses OPML content and extracts feed outlines in document order.
///
/// Handles both nested and flat OPML structures. Outlines with invalid URLs
/// (localhost, private IPs, non-HTTP schemes) are skipped with a warning.
///
/// quick-xml (0.37) never parses `<!ENTITY>` declarations; only the five
/// XML builtin entities are resolved, so external entities cannot be
/// expanded. Custom entity references surface as parse errors.
pub fn parse_opml(content: &str) -> Result<Vec<Outline>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut outlines = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                depth += 1;
                if depth > MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                if let Some(outline) = parse_outline_attributes(&e, &reader)? {
                    outlines.push(outline);
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline doesn't affect depth
                if let Some(outline) = parse_outline_attributes(&e, &reader)? {
                    outlines.push(outline);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(outlines)
}

/// Returns `Some(Outline)` if the element has a valid `xmlUrl`, `None` for
/// category/folder outlines or rejected URLs.
fn parse_outline_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Option<Outline>, OpmlError> {
    let mut xml_url = None;
    let mut text = None;
    let mut title = None;

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = || {
            attr.decode_and_unescape_value(reader.decoder())
                .map(|v| v.trim().to_string())
                .map_err(|e| OpmlError::XmlParse(e.to_string()))
        };
        match attr.key.as_ref() {
            b"xmlUrl" => xml_url = Some(value()?),
            b"text" => text = Some(value()?),
            b"title" => title = Some(value()?),
            _ => {}
        }
    }

    let Some(url) = xml_url.filter(|u| !u.is_empty()) else {
        return Ok(None);
    };

    match validate_url(&url) {
        Ok(_) => Ok(Some(Outline {
            text: text
                .filter(|t| !t.is_empty())
                .or(title.filter(|t| !t.is_empty()))
                .unwrap_or_default(),
            xml_url: url,
        })),
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
            Ok(None)
        }
    }
}
