use crate::error::{SinkError, SinkResult};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain tag that opens every structured digest, so a structured hash never
/// equals the raw hash of the same bytes.
const JSON_ELEMENTS_DOMAIN: &[u8] = b"hashsink-json-elements-v1:";

/// Hex-encoded SHA-256 identifying stored content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    fn from_digest(digest: Sha256) -> Self {
        Self(hex::encode(digest.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incremental content digest.
///
/// The hash only exists once the input has ended: `finish` consumes the
/// hasher, so there is no way to observe a partial digest.
pub trait ContentHasher: Send {
    fn update(&mut self, chunk: &[u8]) -> SinkResult<()>;

    fn finish(self: Box<Self>) -> SinkResult<ContentHash>;
}

/// Compute the raw SHA-256 content hash of data
pub fn compute_hash(data: &[u8]) -> ContentHash {
    let mut digest = Sha256::new();
    digest.update(data);
    ContentHash::from_digest(digest)
}

#[derive(Default)]
pub struct RawHasher {
    digest: Sha256,
}

impl RawHasher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentHasher for RawHasher {
    fn update(&mut self, chunk: &[u8]) -> SinkResult<()> {
        self.digest.update(chunk);
        Ok(())
    }

    fn finish(self: Box<Self>) -> SinkResult<ContentHash> {
        Ok(ContentHash::from_digest(self.digest))
    }
}

/// Hashes a JSON document element by element.
///
/// Each element of the top-level array is parsed, re-serialized with sorted
/// object keys and no insignificant whitespace, length-prefixed and folded
/// into the digest. A document whose top level is not an array counts as a
/// single element.
pub struct JsonElementHasher {
    digest: Sha256,
    splitter: ElementSplitter,
    elements: u64,
}

impl JsonElementHasher {
    pub fn new() -> Self {
        let mut digest = Sha256::new();
        digest.update(JSON_ELEMENTS_DOMAIN);
        Self {
            digest,
            splitter: ElementSplitter::default(),
            elements: 0,
        }
    }

    pub fn elements(&self) -> u64 {
        self.elements
    }
}

impl Default for JsonElementHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHasher for JsonElementHasher {
    fn update(&mut self, chunk: &[u8]) -> SinkResult<()> {
        let Self {
            digest,
            splitter,
            elements,
        } = self;
        splitter.feed(chunk, &mut |element: &[u8]| {
            fold_element(digest, elements, element)
        })
    }

    fn finish(self: Box<Self>) -> SinkResult<ContentHash> {
        let Self {
            mut digest,
            splitter,
            mut elements,
        } = *self;
        if let Some(document) = splitter.finish()? {
            fold_element(&mut digest, &mut elements, &document)?;
        }
        tracing::debug!("Hashed {} JSON elements", elements);
        Ok(ContentHash::from_digest(digest))
    }
}

fn fold_element(digest: &mut Sha256, elements: &mut u64, element: &[u8]) -> SinkResult<()> {
    let value: Value = serde_json::from_slice(element)?;
    let canonical = serde_json::to_vec(&canonicalize(value))?;
    digest.update((canonical.len() as u64).to_be_bytes());
    digest.update(&canonical);
    *elements += 1;
    Ok(())
}

/// Rebuilds objects with their keys inserted in sorted order.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum SplitState {
    #[default]
    Start,
    /// Inside the top-level array, between elements.
    Between,
    /// Inside an element of the top-level array.
    Element,
    /// After the closing bracket of the top-level array.
    Done,
    /// Top level is not an array; the whole input is one element.
    Document,
}

/// Byte-level splitter that cuts a streamed top-level JSON array into its
/// elements, independent of how the input is chunked.
#[derive(Debug, Default)]
struct ElementSplitter {
    state: SplitState,
    buf: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    after_comma: bool,
}

impl ElementSplitter {
    fn feed(
        &mut self,
        chunk: &[u8],
        emit: &mut dyn FnMut(&[u8]) -> SinkResult<()>,
    ) -> SinkResult<()> {
        for &byte in chunk {
            match self.state {
                SplitState::Start => {
                    if byte.is_ascii_whitespace() {
                        continue;
                    }
                    if byte == b'[' {
                        self.state = SplitState::Between;
                        self.after_comma = false;
                    } else {
                        self.state = SplitState::Document;
                        self.buf.push(byte);
                    }
                }
                SplitState::Document => self.buf.push(byte),
                SplitState::Between => {
                    if byte.is_ascii_whitespace() {
                        continue;
                    }
                    match byte {
                        b']' if self.after_comma => {
                            return Err(SinkError::Parse(
                                "trailing comma in JSON array".to_string(),
                            ));
                        }
                        b']' => self.state = SplitState::Done,
                        b',' => {
                            return Err(SinkError::Parse(
                                "unexpected ',' in JSON array".to_string(),
                            ));
                        }
                        _ => {
                            self.state = SplitState::Element;
                            self.buf.clear();
                            self.depth = 0;
                            self.after_comma = false;
                            self.scan(byte, emit)?;
                        }
                    }
                }
                SplitState::Element => self.scan(byte, emit)?,
                SplitState::Done => {
                    if !byte.is_ascii_whitespace() {
                        return Err(SinkError::Parse(
                            "unexpected content after JSON array".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn scan(&mut self, byte: u8, emit: &mut dyn FnMut(&[u8]) -> SinkResult<()>) -> SinkResult<()> {
        if self.in_string {
            self.buf.push(byte);
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return Ok(());
        }

        match byte {
            b'"' => {
                self.in_string = true;
                self.buf.push(byte);
            }
            b'[' | b'{' => {
                self.depth += 1;
                self.buf.push(byte);
            }
            b']' | b'}' if self.depth > 0 => {
                self.depth -= 1;
                self.buf.push(byte);
            }
            b']' => {
                emit(&self.buf)?;
                self.buf.clear();
                self.state = SplitState::Done;
            }
            b'}' => {
                return Err(SinkError::Parse("unbalanced '}' in JSON array".to_string()));
            }
            b',' if self.depth == 0 => {
                emit(&self.buf)?;
                self.buf.clear();
                self.state = SplitState::Between;
                self.after_comma = true;
            }
            _ => self.buf.push(byte),
        }
        Ok(())
    }

    /// Ends the input. Returns the buffered document when the top level was
    /// not an array.
    fn finish(self) -> SinkResult<Option<Vec<u8>>> {
        match self.state {
            SplitState::Done => Ok(None),
            SplitState::Document => Ok(Some(self.buf)),
            SplitState::Start => Err(SinkError::Parse("empty JSON document".to_string())),
            SplitState::Between | SplitState::Element => Err(SinkError::Parse(
                "unexpected end of JSON array".to_string(),
            )),
        }
    }
}
