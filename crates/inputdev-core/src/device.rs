// Inputdev Device Handle
// One grabbed input device: lifecycle, decode state and event translation

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};

use crate::action::Action;
use crate::backend::{DeviceNumber, DeviceOpener, InputBackend, RepeatRate};
use crate::bitset::ModifierMask;
use crate::event::{AppEvent, RawInputEvent, EV_KEY};
use crate::key::Key;
use crate::keymap::{KeyMap, ModifierBit};
use crate::magic::MagicSequenceMatcher;
use crate::quirks::{QuirkError, Quirks};

/// Errors that make a device unusable; the device is skipped
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("device node {0} not found")]
    NotFound(PathBuf),

    #[error("failed to open {path}: {source}")]
    Inaccessible { path: PathBuf, source: io::Error },

    #[error("{0} does not report key events")]
    NotKeyCapable(PathBuf),

    #[error("ioctl {request} on {path} failed: {source}")]
    IoctlFailed {
        path: PathBuf,
        request: &'static str,
        source: io::Error,
    },
}

/// Errors from [`DeviceHandle::start`]
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("grab failed: {0}")]
    Grab(io::Error),

    #[error("multiplexer registration failed: {0}")]
    Register(io::Error),
}

/// Result of handling one readable record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Event for the application sink
    Emit(AppEvent),
    /// A modifier key changed the modifier mask; nothing to emit
    ModifierUpdated,
    /// Dropped: non-key event, duplicate repeat or short read
    Ignored,
    /// Value outside release/press/repeat
    Invalid,
    /// The magic sequence completed; the device must be removed
    MagicMatch,
    /// ENODEV; the device must be removed
    Disappeared,
    /// Nothing left to read until the next readiness notification
    Drained,
}

/// Diagnostic snapshot of a device for `dump`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub path: PathBuf,
    pub description: String,
    pub device_number: DeviceNumber,
    pub fd: i32,
    pub quirks: Quirks,
    pub repeat: Option<RepeatRate>,
}

impl std::fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) dev={:#x} fd={} quirks={}",
            self.path.display(),
            self.description,
            self.device_number,
            self.fd,
            self.quirks
        )?;
        if let Some(rate) = self.repeat {
            write!(f, " repeat={}", rate)?;
        }
        Ok(())
    }
}

/// An open input device and its decode state
pub struct DeviceHandle<B: InputBackend> {
    path: PathBuf,
    description: String,
    device_number: DeviceNumber,
    backend: B,
    keymap: Arc<KeyMap>,
    token: Option<Token>,
    grabbed: bool,
    modifiers: ModifierMask,
    magic: MagicSequenceMatcher,
    quirks: Quirks,
    original_repeat: Option<RepeatRate>,
    repeat: Option<RepeatRate>,
    repeat_altered: bool,
    last_code: Option<u16>,
    next_repeat: Option<Instant>,
}

impl<B: InputBackend> DeviceHandle<B> {
    /// Open `path` and verify that it reports key events
    pub fn open<O>(
        opener: &O,
        path: &Path,
        keymap: Arc<KeyMap>,
        magic_timeout: Duration,
    ) -> Result<Self, OpenError>
    where
        O: DeviceOpener<Device = B>,
    {
        let backend = opener.open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => OpenError::NotFound(path.to_path_buf()),
            _ => OpenError::Inaccessible {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        Self::from_backend(backend, path, keymap, magic_timeout)
    }

    /// Wrap an already opened backend
    pub fn from_backend(
        backend: B,
        path: &Path,
        keymap: Arc<KeyMap>,
        magic_timeout: Duration,
    ) -> Result<Self, OpenError> {
        let ioctl_failed = |request: &'static str| {
            let path = path.to_path_buf();
            move |source| OpenError::IoctlFailed {
                path,
                request,
                source,
            }
        };

        let device_number = backend.device_number().map_err(ioctl_failed("fstat"))?;
        let description = backend.name().map_err(ioctl_failed("EVIOCGNAME"))?;
        let events = backend
            .event_capabilities()
            .map_err(ioctl_failed("EVIOCGBIT"))?;

        if !events.test(EV_KEY as usize) {
            return Err(OpenError::NotKeyCapable(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            description,
            device_number,
            backend,
            keymap,
            token: None,
            grabbed: false,
            modifiers: ModifierMask::new(),
            magic: MagicSequenceMatcher::new(magic_timeout),
            quirks: Quirks::new(),
            original_repeat: None,
            repeat: None,
            repeat_altered: false,
            last_code: None,
            next_repeat: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn device_number(&self) -> DeviceNumber {
        self.device_number
    }

    /// Multiplexer token while registered
    pub fn token(&self) -> Option<Token> {
        self.token
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    pub fn modifiers(&self) -> ModifierMask {
        self.modifiers
    }

    /// Effective repeat timing used by the `broken_repeat` quirk
    pub fn repeat_rate(&self) -> Option<RepeatRate> {
        self.repeat
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            path: self.path.clone(),
            description: self.description.clone(),
            device_number: self.device_number,
            fd: self.backend.raw_fd(),
            quirks: self.quirks,
            repeat: self.repeat,
        }
    }

    /// Grab the device, capture its repeat timing and register it for readability.
    ///
    /// On failure the caller must run [`DeviceHandle::stop`] and must not keep
    /// the handle active.
    pub fn start(&mut self, registry: &Registry, token: Token) -> Result<(), StartError> {
        self.backend.grab().map_err(StartError::Grab)?;
        self.grabbed = true;

        self.original_repeat = self.backend.auto_repeat();
        self.repeat = self.original_repeat;
        if self.original_repeat.is_none() {
            log::debug!(
                "{}: no auto-repeat support; skipping repeat rate management",
                self.path.display()
            );
        }

        let fd = self.backend.raw_fd();
        registry
            .register(&mut SourceFd(&fd), token, Interest::READABLE)
            .map_err(StartError::Register)?;
        self.token = Some(token);

        Ok(())
    }

    /// Best-effort teardown: restore repeat timing, ungrab, deregister.
    ///
    /// Failures are logged; a disconnected device fails all of these.
    pub fn stop(&mut self, registry: &Registry) {
        if self.repeat_altered {
            if let Some(original) = self.original_repeat {
                if let Err(e) = self.backend.set_auto_repeat(original) {
                    log::warn!(
                        "{}: failed to restore repeat rate {}: {}",
                        self.path.display(),
                        original,
                        e
                    );
                }
            }
            self.repeat_altered = false;
        }

        if self.grabbed {
            if let Err(e) = self.backend.ungrab() {
                log::warn!("{}: ungrab failed: {}", self.path.display(), e);
            }
            self.grabbed = false;
        }

        if self.token.take().is_some() {
            let fd = self.backend.raw_fd();
            if let Err(e) = registry.deregister(&mut SourceFd(&fd)) {
                log::warn!("{}: deregistration failed: {}", self.path.display(), e);
            }
        }
    }

    pub fn handle_hup(&self) {
        log::info!(
            "device '{}' ({}) hung up",
            self.path.display(),
            self.description
        );
    }

    /// Read and decode one record
    pub fn handle_readable(&mut self) -> DecodeOutcome {
        self.handle_readable_at(Instant::now())
    }

    /// [`DeviceHandle::handle_readable`] with an explicit timestamp
    pub fn handle_readable_at(&mut self, now: Instant) -> DecodeOutcome {
        loop {
            match self.backend.read_event() {
                Ok(Some(ev)) => return self.decode(ev, now),
                Ok(None) => {
                    log::error!("{}: short read from device", self.path.display());
                    return DecodeOutcome::Ignored;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return DecodeOutcome::Drained,
                Err(e) if e.raw_os_error() == Some(libc::ENODEV) => {
                    log::info!("device '{}' removed", self.path.display());
                    return DecodeOutcome::Disappeared;
                }
                // Persistent errors would spin the drain loop
                Err(e) => {
                    log::error!("failed to read from {}: {}", self.path.display(), e);
                    return DecodeOutcome::Drained;
                }
            }
        }
    }

    /// Decode one raw record observed at `now`
    pub fn decode(&mut self, ev: RawInputEvent, now: Instant) -> DecodeOutcome {
        if !ev.is_key() {
            return DecodeOutcome::Ignored;
        }

        log::trace!("event{{{}}}={}", self.path.display(), ev);

        let Some(action) = Action::from_value(ev.value) else {
            log::error!("{}: unexpected key event {}", self.path.display(), ev);
            return DecodeOutcome::Invalid;
        };

        if self.is_duplicate_repeat(ev.code, action, now) {
            log::trace!("{}: dropping early repeat of {}", self.path.display(), ev.code);
            return DecodeOutcome::Ignored;
        }

        let key = Key(ev.code);

        if self.magic.process(key, action, now) {
            log::info!(
                "magic keysequence from {}; detaching device",
                self.path.display()
            );
            return DecodeOutcome::MagicMatch;
        }

        if let Some(modifier) = ModifierBit::from_key(key) {
            match action {
                Action::Release => self.modifiers.clear(modifier.bit()),
                Action::Press => self.modifiers.set(modifier.bit()),
                Action::Repeat => {}
            }
            return DecodeOutcome::ModifierUpdated;
        }

        let repeat = action.is_repeat();
        let release = action.is_release();
        let event = match self.keymap.translate(ev.code, self.modifiers) {
            Some(symbol) => AppEvent::Translated {
                symbol,
                repeat,
                release,
            },
            None => AppEvent::Raw {
                opcode: ev.opcode(),
                repeat,
                release,
            },
        };

        DecodeOutcome::Emit(event)
    }

    fn is_duplicate_repeat(&mut self, code: u16, action: Action, now: Instant) -> bool {
        if !self.quirks.broken_repeat || action.is_release() {
            return false;
        }
        let Some(rate) = self.repeat else {
            return false;
        };

        let early = self.last_code == Some(code) && self.next_repeat.is_some_and(|d| now < d);
        if !early {
            self.last_code = Some(code);
            self.next_repeat = Some(now + Duration::from_millis(u64::from(rate.period_ms)));
        }
        early
    }

    /// Reprogram hardware auto-repeat.
    ///
    /// Devices without repeat support are skipped and report success. On
    /// failure the tracked rate is cleared so the repeat quirk goes inert.
    pub fn set_repeat_rate(&mut self, rate: RepeatRate) -> bool {
        if self.original_repeat.is_none() {
            return true;
        }

        self.repeat_altered = true;
        match self.backend.set_auto_repeat(rate) {
            Ok(()) => {
                // the hardware may round or clamp
                let effective = self.backend.auto_repeat().unwrap_or(rate);
                log::debug!(
                    "{}: repeat rate set to {} (requested {})",
                    self.path.display(),
                    effective,
                    rate
                );
                self.repeat = Some(effective);
                true
            }
            Err(e) => {
                log::error!(
                    "{}: failed to set repeat rate {}: {}",
                    self.path.display(),
                    rate,
                    e
                );
                self.repeat = None;
                self.last_code = None;
                self.next_repeat = None;
                false
            }
        }
    }

    /// Toggle a named quirk
    pub fn change_quirk(&mut self, name: &str, enabled: bool) -> Result<(), QuirkError> {
        self.quirks.change(name, enabled)?;
        log::info!(
            "{}: quirk {} {}",
            self.path.display(),
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }
}

impl<B: InputBackend> Drop for DeviceHandle<B> {
    fn drop(&mut self) {
        // closing the descriptor drops the epoll registration, not the grab
        if self.grabbed {
            let _ = self.backend.ungrab();
        }
        log::debug!("destroyed device '{}'", self.path.display());
    }
}

impl<B: InputBackend> std::fmt::Debug for DeviceHandle<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("path", &self.path)
            .field("description", &self.description)
            .field("device_number", &self.device_number)
            .field("token", &self.token)
            .field("grabbed", &self.grabbed)
            .field("quirks", &self.quirks)
            .finish()
    }
}
