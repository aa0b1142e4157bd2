// Inputdev Device Quirks
// Named per-device workaround switches

use std::fmt;

/// Errors that can occur when changing quirks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuirkError {
    #[error("unknown quirk '{0}'")]
    Unknown(String),
}

/// Workarounds for non-standard hardware behaviour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quirks {
    /// Device fires duplicate presses faster than its configured repeat rate
    pub broken_repeat: bool,
}

impl Quirks {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_quirk(&mut self, name: &str) -> Result<&mut bool, QuirkError> {
        if name.eq_ignore_ascii_case("broken_repeat") {
            Ok(&mut self.broken_repeat)
        } else {
            Err(QuirkError::Unknown(name.to_string()))
        }
    }

    /// Enable or disable a quirk by (case-insensitive) name.
    ///
    /// Unknown names leave every quirk untouched.
    pub fn change(&mut self, name: &str, enabled: bool) -> Result<(), QuirkError> {
        *self.find_quirk(name)? = enabled;
        Ok(())
    }
}

/// Split a `[+|-]name` toggle; no sign means enable
pub fn parse_toggle(toggle: &str) -> (&str, bool) {
    if let Some(name) = toggle.strip_prefix('-') {
        (name, false)
    } else {
        (toggle.strip_prefix('+').unwrap_or(toggle), true)
    }
}

impl fmt::Display for Quirks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.broken_repeat {
            write!(f, "+broken_repeat")
        } else {
            write!(f, "-")
        }
    }
}
