// Inputdev Key Type
// Key codes from Linux input-event-codes.h and their names

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Highest key code known to the kernel (KEY_MAX)
pub const KEY_MAX: u16 = 0x2ff;

/// Number of slots needed for a table indexed by key code
pub const KEY_CNT: usize = KEY_MAX as usize + 1;

/// Represents a single keyboard key code.
///
/// The numeric values match Linux input-event-codes.h definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Key(pub u16);

impl Key {
    pub const ESC: Key = Key(1);
    pub const KEY_1: Key = Key(2);
    pub const KEY_0: Key = Key(11);
    pub const Q: Key = Key(16);
    pub const A: Key = Key(30);
    pub const Z: Key = Key(44);
    pub const LEFT_CTRL: Key = Key(29);
    pub const LEFT_SHIFT: Key = Key(42);
    pub const RIGHT_SHIFT: Key = Key(54);
    pub const LEFT_ALT: Key = Key(56);
    pub const SPACE: Key = Key(57);
    pub const CAPSLOCK: Key = Key(58);
    pub const NUMLOCK: Key = Key(69);
    pub const RIGHT_CTRL: Key = Key(97);
    pub const RIGHT_ALT: Key = Key(100);
    pub const UP: Key = Key(103);
    pub const LEFT_META: Key = Key(125);
    pub const RIGHT_META: Key = Key(126);
    pub const OK: Key = Key(0x160);

    /// Get the raw numeric code value
    pub fn code(self) -> u16 {
        self.0
    }

    /// Get the name of this key
    pub fn name(self) -> &'static str {
        key_name(self.0)
    }
}

impl From<u16> for Key {
    fn from(code: u16) -> Self {
        Key(code)
    }
}

impl From<Key> for u16 {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_from_name(s).ok_or_else(|| format!("Unknown key: {}", s))
    }
}

// Names as spelled in input-event-codes.h
const KEY_NAMES: &[(u16, &str)] = &[
    (0, "KEY_RESERVED"),
    (1, "KEY_ESC"),
    (2, "KEY_1"),
    (3, "KEY_2"),
    (4, "KEY_3"),
    (5, "KEY_4"),
    (6, "KEY_5"),
    (7, "KEY_6"),
    (8, "KEY_7"),
    (9, "KEY_8"),
    (10, "KEY_9"),
    (11, "KEY_0"),
    (12, "KEY_MINUS"),
    (13, "KEY_EQUAL"),
    (14, "KEY_BACKSPACE"),
    (15, "KEY_TAB"),
    (16, "KEY_Q"),
    (17, "KEY_W"),
    (18, "KEY_E"),
    (19, "KEY_R"),
    (20, "KEY_T"),
    (21, "KEY_Y"),
    (22, "KEY_U"),
    (23, "KEY_I"),
    (24, "KEY_O"),
    (25, "KEY_P"),
    (26, "KEY_LEFTBRACE"),
    (27, "KEY_RIGHTBRACE"),
    (28, "KEY_ENTER"),
    (29, "KEY_LEFTCTRL"),
    (30, "KEY_A"),
    (31, "KEY_S"),
    (32, "KEY_D"),
    (33, "KEY_F"),
    (34, "KEY_G"),
    (35, "KEY_H"),
    (36, "KEY_J"),
    (37, "KEY_K"),
    (38, "KEY_L"),
    (39, "KEY_SEMICOLON"),
    (40, "KEY_APOSTROPHE"),
    (41, "KEY_GRAVE"),
    (42, "KEY_LEFTSHIFT"),
    (43, "KEY_BACKSLASH"),
    (44, "KEY_Z"),
    (45, "KEY_X"),
    (46, "KEY_C"),
    (47, "KEY_V"),
    (48, "KEY_B"),
    (49, "KEY_N"),
    (50, "KEY_M"),
    (51, "KEY_COMMA"),
    (52, "KEY_DOT"),
    (53, "KEY_SLASH"),
    (54, "KEY_RIGHTSHIFT"),
    (55, "KEY_KPASTERISK"),
    (56, "KEY_LEFTALT"),
    (57, "KEY_SPACE"),
    (58, "KEY_CAPSLOCK"),
    (59, "KEY_F1"),
    (60, "KEY_F2"),
    (61, "KEY_F3"),
    (62, "KEY_F4"),
    (63, "KEY_F5"),
    (64, "KEY_F6"),
    (65, "KEY_F7"),
    (66, "KEY_F8"),
    (67, "KEY_F9"),
    (68, "KEY_F10"),
    (69, "KEY_NUMLOCK"),
    (70, "KEY_SCROLLLOCK"),
    (71, "KEY_KP7"),
    (72, "KEY_KP8"),
    (73, "KEY_KP9"),
    (74, "KEY_KPMINUS"),
    (75, "KEY_KP4"),
    (76, "KEY_KP5"),
    (77, "KEY_KP6"),
    (78, "KEY_KPPLUS"),
    (79, "KEY_KP1"),
    (80, "KEY_KP2"),
    (81, "KEY_KP3"),
    (82, "KEY_KP0"),
    (83, "KEY_KPDOT"),
    (86, "KEY_102ND"),
    (87, "KEY_F11"),
    (88, "KEY_F12"),
    (96, "KEY_KPENTER"),
    (97, "KEY_RIGHTCTRL"),
    (98, "KEY_KPSLASH"),
    (99, "KEY_SYSRQ"),
    (100, "KEY_RIGHTALT"),
    (102, "KEY_HOME"),
    (103, "KEY_UP"),
    (104, "KEY_PAGEUP"),
    (105, "KEY_LEFT"),
    (106, "KEY_RIGHT"),
    (107, "KEY_END"),
    (108, "KEY_DOWN"),
    (109, "KEY_PAGEDOWN"),
    (110, "KEY_INSERT"),
    (111, "KEY_DELETE"),
    (113, "KEY_MUTE"),
    (114, "KEY_VOLUMEDOWN"),
    (115, "KEY_VOLUMEUP"),
    (116, "KEY_POWER"),
    (117, "KEY_KPEQUAL"),
    (119, "KEY_PAUSE"),
    (125, "KEY_LEFTMETA"),
    (126, "KEY_RIGHTMETA"),
    (127, "KEY_COMPOSE"),
    (128, "KEY_STOP"),
    (139, "KEY_MENU"),
    (158, "KEY_BACK"),
    (159, "KEY_FORWARD"),
    (163, "KEY_NEXTSONG"),
    (164, "KEY_PLAYPAUSE"),
    (165, "KEY_PREVIOUSSONG"),
    (166, "KEY_STOPCD"),
    (167, "KEY_RECORD"),
    (168, "KEY_REWIND"),
    (174, "KEY_EXIT"),
    (207, "KEY_PLAY"),
    (208, "KEY_FASTFORWARD"),
    (0x160, "KEY_OK"),
    (0x161, "KEY_SELECT"),
    (0x166, "KEY_INFO"),
    (0x16a, "KEY_PROGRAM"),
    (0x16d, "KEY_EPG"),
    (0x16b, "KEY_CHANNEL"),
    (0x170, "KEY_SUBTITLE"),
    (0x188, "KEY_AUDIO"),
    (0x18e, "KEY_RED"),
    (0x18f, "KEY_GREEN"),
    (0x190, "KEY_YELLOW"),
    (0x191, "KEY_BLUE"),
    (0x192, "KEY_CHANNELUP"),
    (0x193, "KEY_CHANNELDOWN"),
    (0x19c, "KEY_PREVIOUS"),
];

/// Display name for a key code
pub fn key_name(code: u16) -> &'static str {
    static KEY_NAME_TABLE: OnceLock<Vec<&'static str>> = OnceLock::new();
    KEY_NAME_TABLE
        .get_or_init(|| {
            let mut names = vec!["KEY_UNKNOWN"; KEY_CNT];
            for &(code, name) in KEY_NAMES {
                names[code as usize] = name;
            }
            names
        })
        .get(code as usize)
        .copied()
        .unwrap_or("KEY_UNKNOWN")
}

/// Try to parse a key name to a key code.
///
/// Accepts the header spelling (`KEY_A`), the name without prefix (`a`)
/// or a decimal/`0x` hex code.
pub fn key_from_name(name: &str) -> Option<Key> {
    let name = name.trim();
    if let Some(hex) = name.strip_prefix("0x").or_else(|| name.strip_prefix("0X")) {
        return u16::from_str_radix(hex, 16)
            .ok()
            .filter(|c| *c <= KEY_MAX)
            .map(Key);
    }
    if let Ok(code) = name.parse::<u16>() {
        return (code <= KEY_MAX).then_some(Key(code));
    }

    let upper = name.to_ascii_uppercase();
    let bare = upper.strip_prefix("KEY_").unwrap_or(&upper);
    KEY_NAMES
        .iter()
        .find(|(_, n)| n.strip_prefix("KEY_") == Some(bare))
        .map(|(code, _)| Key(*code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_names() {
        assert_eq!(Key::LEFT_SHIFT.name(), "KEY_LEFTSHIFT");
        assert_eq!(Key::ESC.to_string(), "KEY_ESC");
        assert_eq!(key_name(0x2fe), "KEY_UNKNOWN");
        assert_eq!(key_name(0xffff), "KEY_UNKNOWN");
    }

    #[test]
    fn test_key_from_name() {
        assert_eq!(key_from_name("KEY_A"), Some(Key::A));
        assert_eq!(key_from_name("a"), Some(Key::A));
        assert_eq!(key_from_name("leftshift"), Some(Key::LEFT_SHIFT));
        assert_eq!(key_from_name("0x160"), Some(Key::OK));
        assert_eq!(key_from_name("30"), Some(Key::A));
        assert_eq!(key_from_name("KEY_NOPE"), None);
        assert_eq!(key_from_name("4000"), None);
    }

    #[test]
    fn test_key_from_str() {
        assert_eq!("KEY_ESC".parse::<Key>(), Ok(Key::ESC));
        assert!("bogus".parse::<Key>().is_err());
    }
}
