//! Streaming record parser
//!
//! [`RecordStream`] walks a JSON document event by event and yields the
//! elements of the array found at a [`JsonPath`] as [`Record`]s. Only the
//! record currently being built is held in memory; everything outside the
//! target array is skipped as it streams past.

mod lexer;
mod path;

pub use lexer::{JsonEvent, JsonLexer};
pub use path::{JsonPath, PathSegment};

use futures::stream::{self, Stream};
use serde_json::Value;
use tokio::io::AsyncBufRead;
use tracing::debug;

use crate::error::{IngestError, IngestResult};
use crate::types::Record;

/// Container on the path from the root to the current position
#[derive(Debug)]
enum Frame {
    /// `key` is the member whose value comes next
    Object { key: Option<String> },
    /// `index` is the position of the next element
    Array { index: usize },
}

impl Frame {
    fn matches(&self, segment: &PathSegment) -> bool {
        match (self, segment) {
            (Frame::Object { key: Some(key) }, PathSegment::Key(want)) => key == want,
            (Frame::Array { index }, PathSegment::Index(want)) => index == want,
            _ => false,
        }
    }

    /// The value this frame was waiting for has been fully read
    fn advance(&mut self) {
        match self {
            Frame::Object { key } => *key = None,
            Frame::Array { index } => *index += 1,
        }
    }
}

/// Nested value under construction inside the current record
#[derive(Debug)]
enum Partial {
    Object { map: Record, key: Option<String> },
    Array(Vec<Value>),
}

impl Partial {
    fn attach(&mut self, value: Value) {
        match self {
            Partial::Object { map, key } => {
                if let Some(key) = key.take() {
                    // Duplicate keys: the last value wins
                    map.insert(key, value);
                }
            },
            Partial::Array(items) => items.push(value),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Partial::Object { map, .. } => Value::Object(map),
            Partial::Array(items) => Value::Array(items),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Seeking,
    InTarget,
    Draining,
    Done,
}

/// Lazy sequence of records from the target array of one JSON document
pub struct RecordStream<R> {
    lexer: JsonLexer<R>,
    target: JsonPath,
    frames: Vec<Frame>,
    building: Vec<Partial>,
    phase: Phase,
    emitted: u64,
}

impl<R: AsyncBufRead + Unpin> RecordStream<R> {
    pub fn new(reader: R, target: JsonPath) -> Self {
        Self {
            lexer: JsonLexer::new(reader),
            target,
            frames: Vec::new(),
            building: Vec::new(),
            phase: Phase::Seeking,
            emitted: 0,
        }
    }

    /// Records yielded so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn malformed(&self, message: impl Into<String>) -> IngestError {
        IngestError::malformed(self.lexer.offset(), message)
    }

    /// Whether the value about to start sits at the target path
    fn at_target(&self) -> bool {
        self.frames.len() == self.target.len()
            && self
                .frames
                .iter()
                .zip(self.target.segments())
                .all(|(frame, segment)| frame.matches(segment))
    }

    fn value_closed(&mut self) {
        if let Some(parent) = self.frames.last_mut() {
            parent.advance();
        }
    }

    /// Next record of the target array
    ///
    /// After the array closes the remainder of the document is still read and
    /// validated before `None` is returned.
    pub async fn next_record(&mut self) -> IngestResult<Option<Record>> {
        loop {
            if self.phase == Phase::Done {
                return Ok(None);
            }

            let Some(event) = self.lexer.next_event().await? else {
                if self.phase == Phase::Seeking {
                    return Err(self.malformed(format!("target array '{}' not found", self.target)));
                }
                self.phase = Phase::Done;
                debug!(records = self.emitted, "Source document fully read");
                return Ok(None);
            };

            let record = match self.phase {
                Phase::InTarget => self.on_target_event(event)?,
                _ => {
                    self.on_outer_event(event)?;
                    None
                },
            };
            if let Some(record) = record {
                self.emitted += 1;
                return Ok(Some(record));
            }
        }
    }

    /// Event outside the target array: only the path is tracked
    fn on_outer_event(&mut self, event: JsonEvent) -> IngestResult<()> {
        let starts_value = matches!(
            event,
            JsonEvent::StartObject | JsonEvent::StartArray | JsonEvent::Scalar(_)
        );

        if starts_value && self.at_target() {
            if self.phase == Phase::Draining {
                return Err(self.malformed(format!(
                    "target path '{}' occurs more than once",
                    self.target
                )));
            }
            if event != JsonEvent::StartArray {
                return Err(self.malformed(format!("value at '{}' is not an array", self.target)));
            }
            debug!(path = %self.target, offset = self.lexer.offset(), "Entered target array");
            self.frames.push(Frame::Array { index: 0 });
            self.phase = Phase::InTarget;
            return Ok(());
        }

        match event {
            JsonEvent::StartObject => self.frames.push(Frame::Object { key: None }),
            JsonEvent::StartArray => self.frames.push(Frame::Array { index: 0 }),
            JsonEvent::Key(key) => {
                if let Some(Frame::Object { key: slot }) = self.frames.last_mut() {
                    *slot = Some(key);
                }
            },
            JsonEvent::Scalar(_) => self.value_closed(),
            JsonEvent::EndObject | JsonEvent::EndArray => {
                self.frames.pop();
                self.value_closed();
            },
        }
        Ok(())
    }

    /// Event inside the target array; returns a record when one closes
    fn on_target_event(&mut self, event: JsonEvent) -> IngestResult<Option<Record>> {
        if self.building.is_empty() {
            return match event {
                JsonEvent::StartObject => {
                    self.building.push(Partial::Object {
                        map: Record::new(),
                        key: None,
                    });
                    Ok(None)
                },
                JsonEvent::EndArray => {
                    self.frames.pop();
                    self.value_closed();
                    self.phase = Phase::Draining;
                    debug!(records = self.emitted, "Target array closed");
                    Ok(None)
                },
                _ => {
                    let index = match self.frames.last() {
                        Some(Frame::Array { index }) => *index,
                        _ => 0,
                    };
                    Err(self.malformed(format!("array element {} is not an object", index)))
                },
            };
        }

        match event {
            JsonEvent::StartObject => self.building.push(Partial::Object {
                map: Record::new(),
                key: None,
            }),
            JsonEvent::StartArray => self.building.push(Partial::Array(Vec::new())),
            JsonEvent::Key(key) => {
                if let Some(Partial::Object { key: slot, .. }) = self.building.last_mut() {
                    *slot = Some(key);
                }
            },
            JsonEvent::Scalar(value) => {
                if let Some(top) = self.building.last_mut() {
                    top.attach(value);
                }
            },
            JsonEvent::EndObject | JsonEvent::EndArray => {
                let Some(closed) = self.building.pop() else {
                    return Ok(None);
                };
                match self.building.last_mut() {
                    Some(parent) => parent.attach(closed.into_value()),
                    None => {
                        self.value_closed();
                        if let Partial::Object { map, .. } = closed {
                            return Ok(Some(map));
                        }
                    },
                }
            },
        }
        Ok(None)
    }

    /// Adapt into a [`Stream`] of records
    pub fn into_stream(self) -> impl Stream<Item = IngestResult<Record>>
    where
        R: Send,
    {
        stream::try_unfold(self, |mut records| async move {
            Ok(records.next_record().await?.map(|record| (record, records)))
        })
    }
}
