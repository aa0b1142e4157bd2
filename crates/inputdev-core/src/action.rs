// Inputdev Key Actions
// Press/release/repeat state carried by EV_KEY values

use std::fmt;

/// Represents the action state of a key event.
///
/// The kernel reports EV_KEY values as:
///   0 == 'released'
///   1 == 'pressed'
///   2 == 'repeated'
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Action {
    Release = 0,
    Press = 1,
    Repeat = 2,
}

impl Action {
    /// Decode a raw EV_KEY value; anything but 0, 1 and 2 is invalid
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Action::Release),
            1 => Some(Action::Press),
            2 => Some(Action::Repeat),
            _ => None,
        }
    }

    /// Returns true only for a fresh press (not a repeat)
    pub fn is_press(self) -> bool {
        matches!(self, Action::Press)
    }

    pub fn is_release(self) -> bool {
        matches!(self, Action::Release)
    }

    pub fn is_repeat(self) -> bool {
        matches!(self, Action::Repeat)
    }

    pub fn value(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Release => write!(f, "release"),
            Action::Press => write!(f, "press"),
            Action::Repeat => write!(f, "repeat"),
        }
    }
}
