// Inputdev Core Library
// Hot-pluggable input device multiplexing for a single application event stream

pub mod action;
pub mod backend;
pub mod bitset;
pub mod config;
pub mod control;
pub mod controller;
pub mod device;
pub mod event;
pub mod key;
pub mod keymap;
pub mod magic;
pub mod quirks;
pub mod sink;

pub use action::Action;
pub use backend::{DeviceNumber, DeviceOpener, InputBackend, RepeatRate};
pub use bitset::{BitSet, EventMask, ModifierMask};
pub use config::{Config, ConfigError};
pub use control::{Command, ControlError, DumpScope, ProtocolError};
pub use controller::{Controller, ControllerError, ControllerHandle, ControllerOptions};
pub use device::{DecodeOutcome, DeviceHandle, DeviceSummary, OpenError, StartError};
pub use event::{AppEvent, RawInputEvent};
pub use key::Key;
pub use keymap::{KeyMap, KeyTable, ModifierBit};
pub use magic::MagicSequenceMatcher;
pub use quirks::{QuirkError, Quirks};
pub use sink::{EventSink, LogSink, SinkError};

#[cfg(feature = "evdev-backend")]
pub use backend::{EvdevBackend, EvdevOpener};
