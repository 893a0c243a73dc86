//! Durable fan-out/fan-in workflow
//!
//! A job is an append-only journal of [`JobEvent`]s. [`JobState`] is the fold
//! of that journal and [`Orchestrator`] is the only writer.

pub mod events;
pub mod journal;
pub mod orchestrator;
pub mod state;

pub use events::{JobEvent, JournalEntry};
pub use journal::{EventJournal, JsonLinesJournal, MemoryJournal};
pub use orchestrator::Orchestrator;
pub use state::JobState;
