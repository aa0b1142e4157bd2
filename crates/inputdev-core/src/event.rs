// Inputdev Events
// Raw kernel input records and the events handed to the application

use std::fmt;

/// Event type codes from input-event-codes.h
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_CNT: usize = 0x20;

/// One `struct input_event` record without its timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInputEvent {
    pub ev_type: u16,
    pub code: u16,
    pub value: i32,
}

impl RawInputEvent {
    pub fn new(ev_type: u16, code: u16, value: i32) -> Self {
        Self {
            ev_type,
            code,
            value,
        }
    }

    /// Shorthand for an EV_KEY record
    pub fn key(code: u16, value: i32) -> Self {
        Self::new(EV_KEY, code, value)
    }

    pub fn is_key(&self) -> bool {
        self.ev_type == EV_KEY
    }

    /// Pack this record into a raw opcode (see [`generate_code`])
    pub fn opcode(&self) -> u64 {
        generate_code(self.ev_type, self.code, self.value as u32)
    }
}

impl fmt::Display for RawInputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:02x},{:04x},{}]", self.ev_type, self.code, self.value)
    }
}

/// Pack type/code/value into one 64-bit opcode.
///
/// Layout: type in bits 48..64, code in bits 32..48, value in bits 0..32.
pub fn generate_code(ev_type: u16, code: u16, value: u32) -> u64 {
    (u64::from(ev_type) << 48) | (u64::from(code) << 32) | u64::from(value)
}

/// Event delivered to the application sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    /// Keycode-domain event; no symbol was mapped for the key
    Raw {
        opcode: u64,
        repeat: bool,
        release: bool,
    },
    /// Character-domain event resolved through the modifier tables
    Translated {
        symbol: char,
        repeat: bool,
        release: bool,
    },
}

impl AppEvent {
    pub fn is_repeat(&self) -> bool {
        match self {
            AppEvent::Raw { repeat, .. } | AppEvent::Translated { repeat, .. } => *repeat,
        }
    }

    pub fn is_release(&self) -> bool {
        match self {
            AppEvent::Raw { release, .. } | AppEvent::Translated { release, .. } => *release,
        }
    }
}

impl fmt::Display for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = match (self.is_release(), self.is_repeat()) {
            (true, _) => " (release)",
            (false, true) => " (repeat)",
            _ => "",
        };
        match self {
            AppEvent::Raw { opcode, .. } => write!(f, "raw {:016X}{}", opcode, flags),
            AppEvent::Translated { symbol, .. } => {
                write!(f, "char {:?} U+{:04X}{}", symbol, *symbol as u32, flags)
            }
        }
    }
}
