// Bounded message log for the debug console.

use chrono::{DateTime, Local};
use serde::Serialize;
use strum::Display;

/// Appending past this many entries triggers a trim.
pub const TRANSCRIPT_LIMIT: usize = 500;

/// Entries kept after a trim (the most recent ones).
pub const TRANSCRIPT_RETAIN: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub direction: Direction,
    pub topic: String,
    pub payload: String,
    pub at: DateTime<Local>,
}

impl TranscriptEntry {
    pub fn new(direction: Direction, topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            direction,
            topic: topic.into(),
            payload: payload.into(),
            at: Local::now(),
        }
    }

    /// Local wall-clock time as `HH:MM:SS.mmm`.
    pub fn time_label(&self) -> String {
        self.at.format("%H:%M:%S%.3f").to_string()
    }
}

/// Recent messages, oldest first.
///
/// Trimming is batched: the log grows to [`TRANSCRIPT_LIMIT`] + 1 entries,
/// then drops back to the newest [`TRANSCRIPT_RETAIN`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
        if self.entries.len() > TRANSCRIPT_LIMIT {
            let excess = self.entries.len() - TRANSCRIPT_RETAIN;
            self.entries.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize) -> Transcript {
        let mut transcript = Transcript::default();
        for i in 0..n {
            transcript.push(TranscriptEntry::new(Direction::In, format!("t/{i}"), "x"));
        }
        transcript
    }

    #[test]
    fn grows_untrimmed_up_to_limit() {
        let transcript = filled(TRANSCRIPT_LIMIT);
        assert_eq!(transcript.len(), 500);
        assert_eq!(transcript.entries()[0].topic, "t/0");
    }

    #[test]
    fn entry_501_trims_to_newest_400() {
        let transcript = filled(TRANSCRIPT_LIMIT + 1);

        assert_eq!(transcript.len(), TRANSCRIPT_RETAIN);
        assert_eq!(transcript.entries()[0].topic, "t/101");
        assert_eq!(transcript.last().map(|e| e.topic.as_str()), Some("t/500"));
    }

    #[test]
    fn time_label_has_millisecond_precision() {
        let entry = TranscriptEntry::new(Direction::Out, "a", "b");
        let label = entry.time_label();
        assert_eq!(label.len(), "12:34:56.789".len());
        assert_eq!(label.as_bytes()[8], b'.');
    }
}
