// Inputdev Modifier Translation
// (keycode, modifier mask) -> symbol lookup over per-modifier key tables

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::bitset::ModifierMask;
use crate::key::{Key, KEY_CNT};

/// Logical modifiers tracked in a [`ModifierMask`].
///
/// Left and right physical keys map to the same logical modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(usize)]
pub enum ModifierBit {
    Shift = 0,
    Control,
    Alt,
    Meta,
    NumLock,
    CapsLock,
    Mode,
}

impl ModifierBit {
    pub fn bit(self) -> usize {
        self as usize
    }

    /// Modifier driven by a physical key, if the key is a modifier key.
    ///
    /// CapsLock and Mode are never produced by a key; they only take part
    /// in table selection when a caller sets them.
    pub fn from_key(key: Key) -> Option<Self> {
        match key {
            Key::LEFT_SHIFT | Key::RIGHT_SHIFT => Some(ModifierBit::Shift),
            Key::LEFT_CTRL | Key::RIGHT_CTRL => Some(ModifierBit::Control),
            Key::LEFT_ALT | Key::RIGHT_ALT => Some(ModifierBit::Alt),
            Key::LEFT_META | Key::RIGHT_META => Some(ModifierBit::Meta),
            Key::NUMLOCK => Some(ModifierBit::NumLock),
            _ => None,
        }
    }
}

/// Build a mask from a list of modifiers
pub fn modifier_mask(bits: &[ModifierBit]) -> ModifierMask {
    bits.iter().map(|b| b.bit()).collect()
}

/// The key tables, same semantics as the keycode columns of xmodmap(1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[repr(usize)]
pub enum KeyTable {
    Normal = 0,
    Shift,
    Control,
    Mode,
    ModeShift,
}

impl KeyTable {
    pub const COUNT: usize = 5;

    /// Select the table for a modifier mask.
    ///
    /// CapsLock inverts Shift. NumLock is masked out and has no effect.
    pub fn select(mask: ModifierMask) -> Self {
        let mut mask = mask;
        if mask.test(ModifierBit::CapsLock.bit()) {
            mask.toggle(ModifierBit::Shift.bit());
        }
        mask.clear(ModifierBit::CapsLock.bit());
        mask.clear(ModifierBit::NumLock.bit());

        let shift = mask.test(ModifierBit::Shift.bit());
        let mode = mask.test(ModifierBit::Mode.bit());

        if mask.test(ModifierBit::Control.bit()) {
            KeyTable::Control
        } else if shift && mode {
            KeyTable::ModeShift
        } else if shift {
            KeyTable::Shift
        } else if mode {
            KeyTable::Mode
        } else {
            KeyTable::Normal
        }
    }
}

// US layout defaults for the normal and shift tables
const DEFAULT_MAP: &[(u16, [char; 2])] = &[
    (30, ['a', 'A']),
    (48, ['b', 'B']),
    (46, ['c', 'C']),
    (32, ['d', 'D']),
    (18, ['e', 'E']),
    (33, ['f', 'F']),
    (34, ['g', 'G']),
    (35, ['h', 'H']),
    (23, ['i', 'I']),
    (36, ['j', 'J']),
    (37, ['k', 'K']),
    (38, ['l', 'L']),
    (50, ['m', 'M']),
    (49, ['n', 'N']),
    (24, ['o', 'O']),
    (25, ['p', 'P']),
    (16, ['q', 'Q']),
    (19, ['r', 'R']),
    (31, ['s', 'S']),
    (20, ['t', 'T']),
    (22, ['u', 'U']),
    (47, ['v', 'V']),
    (17, ['w', 'W']),
    (45, ['x', 'X']),
    (21, ['y', 'Y']),
    (44, ['z', 'Z']),
    (11, ['0', ')']),
    (2, ['1', '!']),
    (3, ['2', '@']),
    (4, ['3', '#']),
    (5, ['4', '$']),
    (6, ['5', '%']),
    (7, ['6', '^']),
    (8, ['7', '&']),
    (9, ['8', '*']),
    (10, ['9', '(']),
];

// The first 27 default entries (a..z, then 0) get control codes 1..=27
const CONTROL_ENTRIES: usize = 27;

/// Per-modifier key tables used to translate key codes into symbols.
///
/// Built once at startup (defaults plus configured overrides) and shared
/// read-only by every device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    tables: Vec<Vec<Option<char>>>,
}

impl KeyMap {
    /// Create a map with every slot empty
    pub fn empty() -> Self {
        Self {
            tables: vec![vec![None; KEY_CNT]; KeyTable::COUNT],
        }
    }

    /// Create a map populated with the default US tables
    pub fn new() -> Self {
        let mut map = Self::empty();
        for (i, &(code, [normal, shifted])) in DEFAULT_MAP.iter().enumerate() {
            map.set(KeyTable::Normal, code, Some(normal));
            map.set(KeyTable::Shift, code, Some(shifted));
            if i < CONTROL_ENTRIES {
                map.set(KeyTable::Control, code, char::from_u32(i as u32 + 1));
            }
        }
        map
    }

    /// Assign a slot; `None` or NUL empties it. Fails for codes above KEY_MAX.
    pub fn set(&mut self, table: KeyTable, code: u16, symbol: Option<char>) -> bool {
        match self.tables[table as usize].get_mut(code as usize) {
            Some(slot) => {
                *slot = symbol.filter(|c| *c != '\0');
                true
            }
            None => false,
        }
    }

    pub fn get(&self, table: KeyTable, code: u16) -> Option<char> {
        self.tables[table as usize]
            .get(code as usize)
            .copied()
            .flatten()
    }

    /// Translate a key code under the given modifier mask
    pub fn translate(&self, code: u16, mask: ModifierMask) -> Option<char> {
        self.get(KeyTable::select(mask), code)
    }

    /// Number of populated slots per table, in table order
    pub fn populated(&self) -> Vec<(KeyTable, usize)> {
        KeyTable::iter()
            .map(|t| (t, self.tables[t as usize].iter().flatten().count()))
            .collect()
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::new()
    }
}
