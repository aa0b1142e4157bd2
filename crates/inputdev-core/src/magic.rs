// Inputdev Magic Sequence
// Timeout-bounded detector for the "detach this device" key sequence

use std::time::{Duration, Instant};

use crate::action::Action;
use crate::key::Key;

/// Time allowed between two steps of the sequence
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2500);

/// LSHIFT, LSHIFT, ESC, LSHIFT
pub const DEFAULT_SEQUENCE: &[Key] = &[Key::LEFT_SHIFT, Key::LEFT_SHIFT, Key::ESC, Key::LEFT_SHIFT];

/// Per-device state machine for the magic key sequence.
///
/// Only clean presses are considered; releases and repeats neither advance
/// nor reset the match. Right shift counts as left shift.
#[derive(Debug, Clone)]
pub struct MagicSequenceMatcher {
    sequence: &'static [Key],
    timeout: Duration,
    position: usize,
    deadline: Option<Instant>,
}

impl MagicSequenceMatcher {
    pub fn new(timeout: Duration) -> Self {
        Self::with_sequence(DEFAULT_SEQUENCE, timeout)
    }

    pub fn with_sequence(sequence: &'static [Key], timeout: Duration) -> Self {
        Self {
            sequence,
            timeout,
            position: 0,
            deadline: None,
        }
    }

    fn alias(key: Key) -> Key {
        match key {
            Key::RIGHT_SHIFT => Key::LEFT_SHIFT,
            other => other,
        }
    }

    /// Number of sequence steps matched so far
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.deadline = None;
    }

    /// Feed one key event observed at `now`; true when the sequence completes.
    ///
    /// A completed match leaves the matcher at position 0.
    pub fn process(&mut self, key: Key, action: Action, now: Instant) -> bool {
        if !action.is_press() || self.sequence.is_empty() {
            return false;
        }

        let key = Self::alias(key);

        if self.position > 0 && self.deadline.map_or(true, |d| d < now) {
            self.reset();
        }

        if self.sequence[self.position] != key {
            self.reset();
            return false;
        }

        self.position += 1;
        self.deadline = Some(now + self.timeout);

        if self.position == self.sequence.len() {
            self.reset();
            return true;
        }

        false
    }
}

impl Default for MagicSequenceMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}
