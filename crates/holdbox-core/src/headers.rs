//! Byte-preserving header rewriting
//!
//! A [`RawMessage`] splits a stored message into its header fields and
//! everything from the blank separator line onward. Fields keep their
//! exact source bytes, folding and line endings included, so only the
//! fields touched by [`RawMessage::remove`] or [`RawMessage::upsert`]
//! change when the message is serialized again. The body is never
//! inspected.

use crate::release::ReleaseError;

/// Preferred maximum line length for generated fields, excluding CRLF
const MAX_LINE_LENGTH: usize = 78;

/// A single header field as it appeared in the source
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderField {
    /// Field name, or `None` for lines that do not look like a field
    /// (an mbox `From ` line, stray garbage). Those are carried through
    /// untouched.
    name: Option<String>,
    /// Offset of the colon ending the name
    colon: usize,
    /// Source bytes including continuation lines and line terminators
    raw: Vec<u8>,
}

impl HeaderField {
    fn parse(line: &[u8]) -> Self {
        let colon = line.iter().position(|&b| b == b':');
        let name = colon
            .map(|colon| trim_end_wsp(&line[..colon]))
            .filter(|name| !name.is_empty() && name.iter().all(|&b| b.is_ascii_graphic()))
            .and_then(|name| std::str::from_utf8(name).ok())
            .map(String::from);

        Self {
            colon: if name.is_some() { colon.unwrap_or(0) } else { 0 },
            name,
            raw: line.to_vec(),
        }
    }

    fn is(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }

    /// Unfolded value with surrounding whitespace trimmed
    fn value(&self) -> Option<String> {
        self.name.as_ref()?;
        let value = &self.raw[self.colon + 1..];
        let unfolded: Vec<u8> = value
            .iter()
            .copied()
            .filter(|&b| b != b'\r' && b != b'\n')
            .collect();
        Some(String::from_utf8_lossy(&unfolded).trim().to_string())
    }
}

/// Line terminator style of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Crlf,
    Lf,
}

impl LineEnding {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Crlf => b"\r\n",
            LineEnding::Lf => b"\n",
        }
    }
}

/// A message split into header fields and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    fields: Vec<HeaderField>,
    line_ending: LineEnding,
    /// The blank separator line and everything after it
    body: Vec<u8>,
}

impl RawMessage {
    /// Split raw bytes at the first blank line.
    ///
    /// Fails with [`ReleaseError::MalformedMessage`] when there is no
    /// header/body separator.
    pub fn parse(raw: &[u8]) -> Result<Self, ReleaseError> {
        let mut fields: Vec<HeaderField> = Vec::new();
        let mut line_ending = None;
        let mut pos = 0;

        let body_start = loop {
            if pos >= raw.len() {
                return Err(ReleaseError::MalformedMessage(
                    "missing header/body separator".to_string(),
                ));
            }

            let end = raw[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| pos + i + 1)
                .unwrap_or(raw.len());
            let line = &raw[pos..end];

            if line_ending.is_none() && line.ends_with(b"\n") {
                line_ending = Some(if line.ends_with(b"\r\n") {
                    LineEnding::Crlf
                } else {
                    LineEnding::Lf
                });
            }

            if line == b"\r\n" || line == b"\n" {
                break pos;
            }

            match fields.last_mut() {
                Some(last) if line.starts_with(b" ") || line.starts_with(b"\t") => {
                    last.raw.extend_from_slice(line);
                }
                _ => fields.push(HeaderField::parse(line)),
            }

            pos = end;
        };

        Ok(Self {
            fields,
            line_ending: line_ending.unwrap_or(LineEnding::Crlf),
            body: raw[body_start..].to_vec(),
        })
    }

    /// Line terminator used for rewritten fields
    pub fn line_ending(&self) -> LineEnding {
        self.line_ending
    }

    /// Unfolded value of the first field with this name
    pub fn get_first(&self, name: &str) -> Option<String> {
        self.fields
            .iter()
            .find(|f| f.is(name))
            .and_then(HeaderField::value)
    }

    /// All named fields in source order, as `(name, unfolded value)`
    pub fn fields(&self) -> impl Iterator<Item = (&str, String)> + '_ {
        self.fields
            .iter()
            .filter_map(|f| Some((f.name.as_deref()?, f.value()?)))
    }

    /// Delete every field whose name matches one of `names`,
    /// case-insensitively. Absent names are ignored.
    pub fn remove(&mut self, names: &[&str]) {
        self.fields.retain(|f| !names.iter().any(|n| f.is(n)));
    }

    /// Replace the first `name` field and drop later duplicates, or append
    /// a new field at the end of the header block.
    ///
    /// A replaced field keeps its original name spelling and position.
    pub fn upsert(&mut self, name: &str, value: &str) {
        let ending = self.line_ending.as_bytes();

        match self.fields.iter().position(|f| f.is(name)) {
            Some(index) => {
                let field = &mut self.fields[index];
                let original = field.name.clone().unwrap_or_else(|| name.to_string());
                field.colon = original.len();
                field.raw = fold(&original, value, ending);

                let mut seen = 0;
                self.fields.retain(|f| {
                    if f.is(name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.fields.push(HeaderField {
                name: Some(name.to_string()),
                colon: name.len(),
                raw: fold(name, value, ending),
            }),
        }
    }

    /// Serialize back to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let header_len: usize = self.fields.iter().map(|f| f.raw.len()).sum();
        let mut out = Vec::with_capacity(header_len + self.body.len());
        for field in &self.fields {
            out.extend_from_slice(&field.raw);
        }
        out.extend_from_slice(&self.body);
        out
    }
}

fn trim_end_wsp(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Render `name: value`, folding at whitespace so lines stay within
/// [`MAX_LINE_LENGTH`] where the value allows it.
fn fold(name: &str, value: &str, ending: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + value.len() + 4);
    out.extend_from_slice(name.as_bytes());
    out.push(b':');

    let prefix_len = name.len() + 1;
    let mut line_len = prefix_len;

    for word in value.split_whitespace() {
        if line_len > prefix_len && line_len + 1 + word.len() > MAX_LINE_LENGTH {
            out.extend_from_slice(ending);
            line_len = 0;
        }
        out.push(b' ');
        out.extend_from_slice(word.as_bytes());
        line_len += 1 + word.len();
    }

    out.extend_from_slice(ending);
    out
}
