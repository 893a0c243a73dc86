//! Incremental JSON tokenizer
//!
//! Pulls bytes from an [`AsyncBufRead`] and yields one [`JsonEvent`] at a time,
//! validating the grammar as it goes. Memory use is bounded by the longest
//! single string or number token; containers are never buffered.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{IngestError, IngestResult};

/// Elementary parse event
#[derive(Debug, Clone, PartialEq)]
pub enum JsonEvent {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    /// Member name inside an object; always followed by that member's value
    Key(String),
    /// String, number, boolean or null
    Scalar(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the grammar allows next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    ValueOrEnd,
    Key,
    KeyOrEnd,
    Colon,
    CommaOrEnd,
    Eof,
}

pub struct JsonLexer<R> {
    reader: R,
    offset: u64,
    containers: Vec<Container>,
    expect: Expect,
}

fn read_failure(offset: u64, err: std::io::Error) -> IngestError {
    IngestError::read(format!("source stream at byte {}", offset), err)
}

impl<R: AsyncBufRead + Unpin> JsonLexer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            offset: 0,
            containers: Vec::new(),
            expect: Expect::Value,
        }
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn malformed(&self, message: impl Into<String>) -> IngestError {
        IngestError::malformed(self.offset, message)
    }

    async fn peek(&mut self) -> IngestResult<Option<u8>> {
        let offset = self.offset;
        let buf = self
            .reader
            .fill_buf()
            .await
            .map_err(|e| read_failure(offset, e))?;
        Ok(buf.first().copied())
    }

    fn bump(&mut self) {
        self.reader.consume(1);
        self.offset += 1;
    }

    async fn skip_whitespace(&mut self) -> IngestResult<Option<u8>> {
        loop {
            match self.peek().await? {
                Some(b' ' | b'\t' | b'\n' | b'\r') => self.bump(),
                other => return Ok(other),
            }
        }
    }

    /// Next event, or `None` once the root value and trailing whitespace are consumed
    pub async fn next_event(&mut self) -> IngestResult<Option<JsonEvent>> {
        loop {
            let Some(byte) = self.skip_whitespace().await? else {
                return if self.expect == Expect::Eof {
                    Ok(None)
                } else {
                    Err(self.malformed("unexpected end of document"))
                };
            };

            match self.expect {
                Expect::Eof => {
                    return Err(self.malformed("trailing characters after document"));
                },
                Expect::Colon => {
                    if byte != b':' {
                        return Err(self.malformed("expected ':' after object key"));
                    }
                    self.bump();
                    self.expect = Expect::Value;
                },
                Expect::CommaOrEnd => match (byte, self.containers.last()) {
                    (b',', Some(Container::Object)) => {
                        self.bump();
                        self.expect = Expect::Key;
                    },
                    (b',', Some(Container::Array)) => {
                        self.bump();
                        self.expect = Expect::Value;
                    },
                    (b'}', Some(Container::Object)) | (b']', Some(Container::Array)) => {
                        self.bump();
                        return Ok(Some(self.close()));
                    },
                    _ => {
                        return Err(self.malformed(format!(
                            "unexpected '{}', expected ',' or end of container",
                            byte as char
                        )));
                    },
                },
                Expect::Key | Expect::KeyOrEnd => {
                    if byte == b'}' && self.expect == Expect::KeyOrEnd {
                        self.bump();
                        return Ok(Some(self.close()));
                    }
                    if byte != b'"' {
                        return Err(self.malformed("expected string object key"));
                    }
                    let key = self.read_string().await?;
                    self.expect = Expect::Colon;
                    return Ok(Some(JsonEvent::Key(key)));
                },
                Expect::Value | Expect::ValueOrEnd => {
                    if byte == b']' && self.expect == Expect::ValueOrEnd {
                        self.bump();
                        return Ok(Some(self.close()));
                    }
                    return self.read_value(byte).await.map(Some);
                },
            }
        }
    }

    fn close(&mut self) -> JsonEvent {
        let event = match self.containers.pop() {
            Some(Container::Object) => JsonEvent::EndObject,
            _ => JsonEvent::EndArray,
        };
        self.value_finished();
        event
    }

    fn value_finished(&mut self) {
        self.expect = if self.containers.is_empty() {
            Expect::Eof
        } else {
            Expect::CommaOrEnd
        };
    }

    async fn read_value(&mut self, byte: u8) -> IngestResult<JsonEvent> {
        let event = match byte {
            b'{' => {
                self.bump();
                self.containers.push(Container::Object);
                self.expect = Expect::KeyOrEnd;
                return Ok(JsonEvent::StartObject);
            },
            b'[' => {
                self.bump();
                self.containers.push(Container::Array);
                self.expect = Expect::ValueOrEnd;
                return Ok(JsonEvent::StartArray);
            },
            b'"' => JsonEvent::Scalar(Value::String(self.read_string().await?)),
            b't' => {
                self.read_literal(b"true").await?;
                JsonEvent::Scalar(Value::Bool(true))
            },
            b'f' => {
                self.read_literal(b"false").await?;
                JsonEvent::Scalar(Value::Bool(false))
            },
            b'n' => {
                self.read_literal(b"null").await?;
                JsonEvent::Scalar(Value::Null)
            },
            b'-' | b'0'..=b'9' => JsonEvent::Scalar(self.read_number().await?),
            other => {
                return Err(self.malformed(format!("unexpected character '{}'", other as char)));
            },
        };
        self.value_finished();
        Ok(event)
    }

    async fn read_literal(&mut self, literal: &'static [u8]) -> IngestResult<()> {
        for &expected in literal {
            match self.peek().await? {
                Some(b) if b == expected => self.bump(),
                _ => {
                    return Err(self.malformed(format!(
                        "invalid literal, expected '{}'",
                        String::from_utf8_lossy(literal)
                    )));
                },
            }
        }
        Ok(())
    }

    /// Reads a quoted string; the reader is positioned on the opening quote
    async fn read_string(&mut self) -> IngestResult<String> {
        let start = self.offset;
        let mut raw = vec![b'"'];
        let mut escaped = false;
        self.bump();

        loop {
            let offset = self.offset;
            let buf = self
                .reader
                .fill_buf()
                .await
                .map_err(|e| read_failure(offset, e))?;
            if buf.is_empty() {
                return Err(IngestError::malformed(start, "unterminated string"));
            }

            let mut end = None;
            for (i, &b) in buf.iter().enumerate() {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    end = Some(i);
                    break;
                }
            }

            let take = end.map_or(buf.len(), |i| i + 1);
            raw.extend_from_slice(&buf[..take]);
            self.reader.consume(take);
            self.offset += take as u64;

            if end.is_some() {
                break;
            }
        }

        // Escapes, control characters and UTF-8 are validated by serde_json
        serde_json::from_slice::<String>(&raw)
            .map_err(|e| IngestError::malformed(start, format!("invalid string: {}", e)))
    }

    async fn read_number(&mut self) -> IngestResult<Value> {
        let start = self.offset;
        let mut raw = Vec::new();

        loop {
            let offset = self.offset;
            let buf = self
                .reader
                .fill_buf()
                .await
                .map_err(|e| read_failure(offset, e))?;
            if buf.is_empty() {
                break;
            }

            let available = buf.len();
            let take = buf
                .iter()
                .position(|b| !matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E'))
                .unwrap_or(available);
            raw.extend_from_slice(&buf[..take]);
            self.reader.consume(take);
            self.offset += take as u64;

            if take < available {
                break;
            }
        }

        match serde_json::from_slice::<Value>(&raw) {
            Ok(value @ Value::Number(_)) => Ok(value),
            _ => Err(IngestError::malformed(
                start,
                format!("invalid number '{}'", String::from_utf8_lossy(&raw)),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    async fn events(input: &[u8]) -> IngestResult<Vec<JsonEvent>> {
        let mut lexer = JsonLexer::new(input);
        let mut out = Vec::new();
        while let Some(event) = lexer.next_event().await? {
            out.push(event);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_nested_document_events() {
        let out = events(br#" {"a": [1, "x\"y", true, null], "b": {}} "#)
            .await
            .unwrap();
        assert_eq!(
            out,
            vec![
                JsonEvent::StartObject,
                JsonEvent::Key("a".into()),
                JsonEvent::StartArray,
                JsonEvent::Scalar(json!(1)),
                JsonEvent::Scalar(json!("x\"y")),
                JsonEvent::Scalar(json!(true)),
                JsonEvent::Scalar(json!(null)),
                JsonEvent::EndArray,
                JsonEvent::Key("b".into()),
                JsonEvent::StartObject,
                JsonEvent::EndObject,
                JsonEvent::EndObject,
            ]
        );
    }

    #[tokio::test]
    async fn test_tokens_split_across_tiny_buffers() {
        let input = r#"{"name": "café \\ soup", "qty": -12.5e2}"#.as_bytes();
        let reader = BufReader::with_capacity(1, &input[..]);
        let mut lexer = JsonLexer::new(reader);
        let mut out = Vec::new();
        while let Some(event) = lexer.next_event().await.unwrap() {
            out.push(event);
        }
        assert_eq!(out[2], JsonEvent::Scalar(json!("café \\ soup")));
        assert_eq!(out[4], JsonEvent::Scalar(json!(-1250.0)));
        assert_eq!(lexer.offset(), input.len() as u64);
    }

    #[tokio::test]
    async fn test_rejects_trailing_content() {
        let err = events(b"[1] [2]").await.unwrap_err();
        assert!(matches!(err, IngestError::MalformedSource { offset: 4, .. }));
    }

    #[tokio::test]
    async fn test_rejects_truncated_document() {
        assert!(matches!(
            events(br#"{"a": [1, 2"#).await,
            Err(IngestError::MalformedSource { .. })
        ));
        assert!(matches!(
            events(br#"{"a": "unterminated"#).await,
            Err(IngestError::MalformedSource { .. })
        ));
        assert!(matches!(events(b"").await, Err(IngestError::MalformedSource { .. })));
    }

    #[tokio::test]
    async fn test_rejects_grammar_errors() {
        for input in [
            &br#"{"a" 1}"#[..],
            br#"{"a": 1,}"#,
            br#"[1,,2]"#,
            br#"[1 2]"#,
            br#"{1: 2}"#,
            br#"[tru]"#,
            br#"[01]"#,
            br#"[1}"#,
        ] {
            assert!(
                matches!(events(input).await, Err(IngestError::MalformedSource { .. })),
                "accepted {}",
                String::from_utf8_lossy(input)
            );
        }
    }
}
