// Inputdev Configuration
// TOML settings for the daemon: paths, repeat rate, magic timeout and keymap

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use strum::IntoEnumIterator;

use crate::backend::RepeatRate;
use crate::controller::ControllerOptions;
use crate::key::key_from_name;
use crate::keymap::{KeyMap, KeyTable};
use crate::magic;

/// Control socket path used when nothing else is configured
pub const DEFAULT_SOCKET: &str = "/run/vdr/inputdev";

/// Keymap symbol that keeps the built-in default
const KEEP_DEFAULT: &str = "DEF";

/// Errors that can occur when loading the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("invalid key name '{0}'")]
    InvalidKey(String),

    #[error("invalid symbol '{symbol}' for {key}: {reason}")]
    InvalidSymbol {
        key: String,
        symbol: String,
        reason: String,
    },

    #[error("invalid setting value: {0}")]
    InvalidValue(String),
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Control socket path
    pub socket: PathBuf,
    /// Directory device names are resolved against
    pub device_root: PathBuf,
    /// Directory scanned at startup
    pub coldplug_dir: PathBuf,
    /// Global auto-repeat timing, if configured
    pub repeat: Option<RepeatRate>,
    pub magic_timeout: Duration,
    /// Default tables plus the `[keymap]` overrides
    pub keymap: KeyMap,
    /// File the configuration came from
    pub source_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigToml {
    #[serde(default)]
    control: Option<ControlSection>,

    #[serde(default)]
    devices: Option<DevicesSection>,

    #[serde(default)]
    repeat: Option<RepeatSection>,

    #[serde(default)]
    magic: Option<MagicSection>,

    #[serde(default)]
    keymap: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlSection {
    socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct DevicesSection {
    root: Option<PathBuf>,
    coldplug_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct RepeatSection {
    delay_ms: Option<u32>,
    period_ms: Option<u32>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct MagicSection {
    timeout_ms: Option<u64>,
}

impl Config {
    /// Built-in defaults
    pub fn new() -> Self {
        let options = ControllerOptions::default();
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET),
            device_root: options.device_root,
            coldplug_dir: options.coldplug_dir,
            repeat: None,
            magic_timeout: magic::DEFAULT_TIMEOUT,
            keymap: KeyMap::new(),
            source_path: None,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path)?;
        let mut config = Self::from_toml(&content)?;
        config.source_path = Some(path.as_ref().to_path_buf());
        Ok(config)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let parsed: ConfigToml =
            toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;

        let mut config = Self::new();

        if let Some(socket) = parsed.control.and_then(|c| c.socket) {
            config.socket = socket;
        }

        if let Some(devices) = parsed.devices {
            if let Some(root) = devices.root {
                config.device_root = root;
            }
            if let Some(dir) = devices.coldplug_dir {
                config.coldplug_dir = dir;
            }
        }

        if let Some(repeat) = parsed.repeat {
            config.repeat = match (repeat.delay_ms, repeat.period_ms) {
                (Some(delay), Some(period)) => Some(RepeatRate::new(delay, period)),
                (None, None) => None,
                _ => {
                    return Err(ConfigError::InvalidValue(
                        "repeat.delay_ms and repeat.period_ms must be set together".to_string(),
                    ))
                }
            };
        }

        if let Some(timeout) = parsed.magic.and_then(|m| m.timeout_ms) {
            config.magic_timeout = Duration::from_millis(timeout);
        }

        for (name, symbols) in &parsed.keymap {
            apply_keymap_entry(&mut config.keymap, name, symbols)?;
        }

        Ok(config)
    }

    /// Default config path (~/.config/inputdev/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("inputdev").join("config.toml"))
    }

    /// Load from the default location, falling back to built-in defaults
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        Ok(Self::new())
    }

    /// Options handed to the controller
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            device_root: self.device_root.clone(),
            coldplug_dir: self.coldplug_dir.clone(),
            repeat: self.repeat,
            magic_timeout: self.magic_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_keymap_entry(map: &mut KeyMap, name: &str, symbols: &[String]) -> Result<(), ConfigError> {
    let key = key_from_name(name).ok_or_else(|| ConfigError::InvalidKey(name.to_string()))?;

    if symbols.len() > KeyTable::COUNT {
        return Err(ConfigError::InvalidValue(format!(
            "{} lists {} symbols, at most {} tables exist",
            name,
            symbols.len(),
            KeyTable::COUNT
        )));
    }

    for (table, symbol) in KeyTable::iter().zip(symbols) {
        let invalid = |reason: &str| ConfigError::InvalidSymbol {
            key: name.to_string(),
            symbol: symbol.clone(),
            reason: reason.to_string(),
        };

        let Some(value) = parse_symbol(symbol).map_err(|reason| invalid(&reason))? else {
            continue;
        };
        if !map.set(table, key.code(), value) {
            return Err(invalid("key code out of range"));
        }
    }

    Ok(())
}

/// Parse one keymap symbol.
///
/// `None` keeps the default slot; `Some(None)` empties it.
fn parse_symbol(s: &str) -> Result<Option<Option<char>>, String> {
    if s == KEEP_DEFAULT {
        return Ok(None);
    }

    let numeric = if let Some(hex) = s.strip_prefix("\\x") {
        Some(u32::from_str_radix(hex, 16).map_err(|e| e.to_string())?)
    } else if let Some(oct) = s.strip_prefix('\\').filter(|o| !o.is_empty()) {
        Some(u32::from_str_radix(oct, 8).map_err(|e| e.to_string())?)
    } else {
        None
    };

    if let Some(value) = numeric {
        let c = char::from_u32(value).ok_or_else(|| format!("U+{:X} is not a character", value))?;
        return Ok(Some(Some(c).filter(|c| *c != '\0')));
    }

    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Some(Some(c))),
        (None, _) => Err("empty symbol".to_string()),
        _ => Err("expected a single character".to_string()),
    }
}
