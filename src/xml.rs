//! # Reader/writer seam
//!
//! The codecs never touch the transport directly. They drive whatever the
//! host hands them through [`EnvelopeWriter`] and [`EnvelopeReader`], which
//! mirror the start/end-element, attribute, and base64-content operations
//! every XML infoset reader/writer offers.
//!
//! [`XmlTextWriter`] and [`XmlTextReader`] are reference implementations
//! over plain XML text. They are complete enough for tests and for hosts
//! without a streaming XML stack; production hosts are expected to adapt
//! their own reader/writer instead. The reader can be configured to hand
//! content back in small chunks ([`XmlTextReader::with_chunk_size`]) or to
//! withhold the content length ([`XmlTextReader::with_unknown_length`]),
//! which exercises the codecs' partial-read and fallback paths.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::EnvelopeError;

/// Writer side of the envelope seam.
pub trait EnvelopeWriter {
    /// Open an element with the given name.
    fn write_start_element(&mut self, name: &str) -> Result<(), EnvelopeError>;

    /// Write an attribute on the currently open start tag.
    fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), EnvelopeError>;

    /// Write bytes as base64 text content of the current element.
    fn write_base64(&mut self, bytes: &[u8]) -> Result<(), EnvelopeError>;

    /// Close the most recently opened element.
    fn write_end_element(&mut self) -> Result<(), EnvelopeError>;
}

/// Reader side of the envelope seam.
///
/// The read sequence the codecs drive is always: [`move_to_content`],
/// inspect ([`node_name`] / [`is_empty_element`] / [`attribute`]),
/// [`read_start_element`], content reads, [`read_end_element`] (skipped
/// for self-closing elements, which `read_start_element` consumes whole).
///
/// [`move_to_content`]: EnvelopeReader::move_to_content
/// [`node_name`]: EnvelopeReader::node_name
/// [`is_empty_element`]: EnvelopeReader::is_empty_element
/// [`attribute`]: EnvelopeReader::attribute
/// [`read_start_element`]: EnvelopeReader::read_start_element
/// [`read_end_element`]: EnvelopeReader::read_end_element
pub trait EnvelopeReader {
    /// Position the reader on the next element, skipping whitespace.
    /// Idempotent once positioned.
    fn move_to_content(&mut self) -> Result<(), EnvelopeError>;

    /// Name of the element the reader is positioned on, if any.
    fn node_name(&self) -> Option<&str>;

    /// Whether the current element is self-closing (`<name />`).
    fn is_empty_element(&self) -> bool;

    /// Value of the named attribute on the current element, if present.
    fn attribute(&self, name: &str) -> Option<&str>;

    /// Consume the start tag. A self-closing element is consumed entirely.
    fn read_start_element(&mut self) -> Result<(), EnvelopeError>;

    /// Consume the matching end tag. Fails if undrained content remains.
    fn read_end_element(&mut self) -> Result<(), EnvelopeError>;

    /// Decoded length of the base64 content, when the reader knows it in
    /// advance. `None` forces callers onto their unbounded read path.
    fn base64_content_length(&self) -> Option<usize>;

    /// Read decoded base64 content into `buf`, returning the number of
    /// bytes written. May fill less than `buf` per call; returns 0 once
    /// the content is exhausted (and always for an empty `buf`).
    fn read_base64(&mut self, buf: &mut [u8]) -> Result<usize, EnvelopeError>;

    /// Read all remaining decoded base64 content.
    fn read_base64_to_end(&mut self) -> Result<Vec<u8>, EnvelopeError>;
}

fn malformed(msg: impl Into<String>) -> EnvelopeError {
    EnvelopeError::MalformedEnvelope(msg.into())
}

/// [`EnvelopeWriter`] that renders plain XML text into a string.
#[derive(Default)]
pub struct XmlTextWriter {
    out: String,
    open: Vec<String>,
    tag_open: bool,
}

impl XmlTextWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the XML written so far.
    #[must_use]
    pub fn into_string(self) -> String {
        self.out
    }

    fn close_start_tag(&mut self) {
        if self.tag_open {
            self.out.push('>');
            self.tag_open = false;
        }
    }
}

impl EnvelopeWriter for XmlTextWriter {
    fn write_start_element(&mut self, name: &str) -> Result<(), EnvelopeError> {
        self.close_start_tag();
        self.out.push('<');
        self.out.push_str(name);
        self.open.push(name.to_string());
        self.tag_open = true;
        Ok(())
    }

    fn write_attribute(&mut self, name: &str, value: &str) -> Result<(), EnvelopeError> {
        if !self.tag_open {
            return Err(malformed("attribute written outside a start tag"));
        }
        self.out.push(' ');
        self.out.push_str(name);
        self.out.push_str("=\"");
        self.out.push_str(value);
        self.out.push('"');
        Ok(())
    }

    fn write_base64(&mut self, bytes: &[u8]) -> Result<(), EnvelopeError> {
        if self.open.is_empty() {
            return Err(malformed("content written outside an element"));
        }
        self.close_start_tag();
        self.out.push_str(&STANDARD.encode(bytes));
        Ok(())
    }

    fn write_end_element(&mut self) -> Result<(), EnvelopeError> {
        let Some(name) = self.open.pop() else {
            return Err(malformed("no element open to close"));
        };
        if self.tag_open {
            self.out.push_str(" />");
            self.tag_open = false;
        } else {
            self.out.push_str("</");
            self.out.push_str(&name);
            self.out.push('>');
        }
        Ok(())
    }
}

struct ParsedElement {
    name: String,
    attributes: Vec<(String, String)>,
    self_closing: bool,
}

struct Content {
    bytes: Vec<u8>,
    cursor: usize,
}

/// [`EnvelopeReader`] over plain XML text holding a single envelope element.
pub struct XmlTextReader {
    text: String,
    pos: usize,
    element: Option<ParsedElement>,
    open_name: Option<String>,
    content: Option<Content>,
    finished: bool,
    chunk_limit: Option<usize>,
    report_length: bool,
}

impl XmlTextReader {
    /// Creates a reader over the given XML text.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            pos: 0,
            element: None,
            open_name: None,
            content: None,
            finished: false,
            chunk_limit: None,
            report_length: true,
        }
    }

    /// Limits each [`read_base64`](EnvelopeReader::read_base64) call to at
    /// most `n` bytes, forcing callers through their partial-read loop.
    #[must_use]
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_limit = Some(n.max(1));
        self
    }

    /// Makes [`base64_content_length`](EnvelopeReader::base64_content_length)
    /// report `None`, as a host reader without length knowledge would.
    #[must_use]
    pub fn with_unknown_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn parse_start_tag(&mut self) -> Result<ParsedElement, EnvelopeError> {
        let bytes = self.text.as_bytes();
        if self.pos >= bytes.len() || bytes[self.pos] != b'<' {
            return Err(malformed("expected an element"));
        }
        self.pos += 1;
        let name = self.parse_name()?;
        let mut attributes = Vec::new();
        let self_closing;
        loop {
            self.skip_whitespace();
            let rest = &self.text.as_bytes()[self.pos..];
            if rest.starts_with(b"/>") {
                self.pos += 2;
                self_closing = true;
                break;
            }
            if rest.first() == Some(&b'>') {
                self.pos += 1;
                self_closing = false;
                break;
            }
            if rest.is_empty() {
                return Err(malformed("unterminated start tag"));
            }
            attributes.push(self.parse_attribute()?);
        }
        Ok(ParsedElement {
            name,
            attributes,
            self_closing,
        })
    }

    fn parse_name(&mut self) -> Result<String, EnvelopeError> {
        let start = self.pos;
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            let b = bytes[self.pos];
            if b.is_ascii_alphanumeric() || matches!(b, b':' | b'.' | b'_' | b'-') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(malformed("empty element name"));
        }
        Ok(self.text[start..self.pos].to_string())
    }

    fn parse_attribute(&mut self) -> Result<(String, String), EnvelopeError> {
        let name = self.parse_name()?;
        self.skip_whitespace();
        if self.text.as_bytes().get(self.pos) != Some(&b'=') {
            return Err(malformed(format!("attribute `{name}` is missing `=`")));
        }
        self.pos += 1;
        self.skip_whitespace();
        if self.text.as_bytes().get(self.pos) != Some(&b'"') {
            return Err(malformed(format!("attribute `{name}` is missing quotes")));
        }
        self.pos += 1;
        let start = self.pos;
        let Some(end) = self.text[start..].find('"') else {
            return Err(malformed(format!("attribute `{name}` has no closing quote")));
        };
        let value = self.text[start..start + end].to_string();
        self.pos = start + end + 1;
        Ok((name, value))
    }

    fn content_remaining(&self) -> usize {
        self.content
            .as_ref()
            .map_or(0, |c| c.bytes.len() - c.cursor)
    }
}

impl EnvelopeReader for XmlTextReader {
    fn move_to_content(&mut self) -> Result<(), EnvelopeError> {
        if self.element.is_some() || self.open_name.is_some() || self.finished {
            return Ok(());
        }
        self.skip_whitespace();
        self.element = Some(self.parse_start_tag()?);
        Ok(())
    }

    fn node_name(&self) -> Option<&str> {
        self.element.as_ref().map(|e| e.name.as_str())
    }

    fn is_empty_element(&self) -> bool {
        self.element.as_ref().is_some_and(|e| e.self_closing)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.element.as_ref().and_then(|e| {
            e.attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str())
        })
    }

    fn read_start_element(&mut self) -> Result<(), EnvelopeError> {
        let Some(element) = self.element.take() else {
            return Err(malformed("reader is not positioned on a start element"));
        };
        if element.self_closing {
            self.finished = true;
            return Ok(());
        }
        // Text content runs until the end tag. Whitespace is insignificant
        // inside base64, strip it before decoding.
        let start = self.pos;
        let Some(offset) = self.text[start..].find('<') else {
            return Err(malformed(format!(
                "element `{}` has no end tag",
                element.name
            )));
        };
        let compact: String = self.text[start..start + offset]
            .chars()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();
        self.pos = start + offset;
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| malformed(format!("invalid base64 content: {e}")))?;
        self.content = Some(Content { bytes, cursor: 0 });
        self.open_name = Some(element.name);
        Ok(())
    }

    fn read_end_element(&mut self) -> Result<(), EnvelopeError> {
        let Some(open_name) = self.open_name.take() else {
            return Err(malformed("no element open to end"));
        };
        if self.content_remaining() > 0 {
            return Err(malformed(format!(
                "element `{open_name}` has undrained content before its end tag"
            )));
        }
        if !self.text[self.pos..].starts_with("</") {
            return Err(malformed(format!("expected end tag for `{open_name}`")));
        }
        self.pos += 2;
        let name = self.parse_name()?;
        if name != open_name {
            return Err(malformed(format!(
                "end tag `{name}` does not match start tag `{open_name}`"
            )));
        }
        self.skip_whitespace();
        if self.text.as_bytes().get(self.pos) != Some(&b'>') {
            return Err(malformed(format!("unterminated end tag for `{name}`")));
        }
        self.pos += 1;
        self.content = None;
        self.finished = true;
        Ok(())
    }

    fn base64_content_length(&self) -> Option<usize> {
        if !self.report_length {
            return None;
        }
        self.content.as_ref().map(|c| c.bytes.len())
    }

    fn read_base64(&mut self, buf: &mut [u8]) -> Result<usize, EnvelopeError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let chunk_limit = self.chunk_limit.unwrap_or(usize::MAX);
        let Some(content) = self.content.as_mut() else {
            return Ok(0);
        };
        let remaining = content.bytes.len() - content.cursor;
        let n = remaining.min(buf.len()).min(chunk_limit);
        buf[..n].copy_from_slice(&content.bytes[content.cursor..content.cursor + n]);
        content.cursor += n;
        Ok(n)
    }

    fn read_base64_to_end(&mut self) -> Result<Vec<u8>, EnvelopeError> {
        let Some(content) = self.content.as_mut() else {
            return Ok(Vec::new());
        };
        let rest = content.bytes[content.cursor..].to_vec();
        content.cursor = content.bytes.len();
        Ok(rest)
    }
}
