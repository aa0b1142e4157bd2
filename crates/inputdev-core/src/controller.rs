// Inputdev Controller
// Device set ownership, hot-plug control protocol and the dispatch loop

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use indexmap::IndexMap;
use mio::event::Event;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::backend::{DeviceNumber, DeviceOpener, InputBackend, RepeatRate};
use crate::control::{Command, ControlError, ControlSocket, DumpScope, BUFFER_SIZE};
use crate::device::{DecodeOutcome, DeviceHandle, DeviceSummary};
use crate::event::AppEvent;
use crate::keymap::KeyMap;
use crate::magic;
use crate::quirks;
use crate::sink::EventSink;

const CONTROL: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_DEVICE_TOKEN: usize = 2;

const EVENTS_CAPACITY: usize = 10;

/// How long `stop` waits for the dispatch thread
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Name of the dispatch thread
pub const THREAD_NAME: &str = "inputdev handler";

/// Fatal controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("failed to create multiplexer: {0}")]
    Multiplexer(io::Error),

    #[error("failed to register control channel: {0}")]
    Register(io::Error),

    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(io::Error),

    #[error("dispatch thread already started")]
    AlreadyStarted,

    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Settings the controller is built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// Directory device names in control commands are relative to
    pub device_root: PathBuf,
    /// Directory scanned by [`Controller::initialize`]
    pub coldplug_dir: PathBuf,
    /// Repeat rate applied to added devices
    pub repeat: Option<RepeatRate>,
    pub magic_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            device_root: PathBuf::from("/dev/input"),
            coldplug_dir: PathBuf::from("/dev/vdr/input"),
            repeat: None,
            magic_timeout: magic::DEFAULT_TIMEOUT,
        }
    }
}

/// Active and pending-destruction devices.
///
/// A device lives in exactly one of the two collections.
struct DeviceSet<B: InputBackend> {
    active: IndexMap<DeviceNumber, DeviceHandle<B>>,
    garbage: Vec<DeviceHandle<B>>,
    repeat: Option<RepeatRate>,
}

impl<B: InputBackend> DeviceSet<B> {
    fn position_of(&self, token: Token) -> Option<usize> {
        self.active.values().position(|d| d.token() == Some(token))
    }

    /// Move an active device to the garbage list after stopping it
    fn retire(&mut self, index: usize, registry: &Registry) {
        if let Some((_, mut dev)) = self.active.shift_remove_index(index) {
            dev.stop(registry);
            log::info!(
                "removed input device '{}' ({})",
                dev.path().display(),
                dev.description()
            );
            self.garbage.push(dev);
        }
    }
}

/// What a wake reported for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// Peer hung up and nothing is left to read
    HangUp,
    Readable,
    Unexpected,
}

impl Readiness {
    fn classify(readable: bool, read_closed: bool) -> Self {
        match (readable, read_closed) {
            (true, _) => Readiness::Readable,
            (false, true) => Readiness::HangUp,
            (false, false) => Readiness::Unexpected,
        }
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self::classify(event.is_readable(), event.is_read_closed())
    }
}

struct Shared<O: DeviceOpener> {
    opener: O,
    registry: Registry,
    waker: Waker,
    running: AtomicBool,
    devices: Mutex<DeviceSet<O::Device>>,
    control: Mutex<Option<ControlSocket>>,
    keymap: Arc<KeyMap>,
    options: ControllerOptions,
    sink: Box<dyn EventSink>,
    next_token: AtomicUsize,
}

/// Owns the device set and the dispatch thread
pub struct Controller<O: DeviceOpener> {
    shared: Arc<Shared<O>>,
    poll: Option<Poll>,
    thread: Option<JoinHandle<()>>,
    done: Mutex<Option<mpsc::Receiver<()>>>,
}

/// Cloneable access to a controller's device operations.
///
/// Safe to use from the event sink while the dispatch thread runs. Every
/// operation fails once the controller is dropped.
pub struct ControllerHandle<O: DeviceOpener> {
    shared: Weak<Shared<O>>,
}

impl<O: DeviceOpener> Clone for ControllerHandle<O> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<O: DeviceOpener> ControllerHandle<O> {
    pub fn add_device(&self, name: &str) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|s| s.add_device(Path::new(name)))
    }

    pub fn remove_device(&self, name: &str) -> bool {
        self.shared.upgrade().is_some_and(|s| s.remove_device(name))
    }

    pub fn change_quirk(&self, name: &str, quirk: &str) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|s| s.change_quirk(name, quirk))
    }

    pub fn set_repeat_rate(&self, rate: RepeatRate) -> bool {
        self.shared.upgrade().is_some_and(|s| s.set_repeat_rate(rate))
    }

    pub fn dump(&self, scope: DumpScope) -> Vec<DeviceSummary> {
        self.shared
            .upgrade()
            .map(|s| s.dump(scope))
            .unwrap_or_default()
    }
}

impl<O: DeviceOpener> Controller<O> {
    pub fn new(
        opener: O,
        sink: impl EventSink + 'static,
        keymap: Arc<KeyMap>,
        options: ControllerOptions,
    ) -> Result<Self, ControllerError> {
        let poll = Poll::new().map_err(ControllerError::Multiplexer)?;
        let registry = poll
            .registry()
            .try_clone()
            .map_err(ControllerError::Multiplexer)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ControllerError::Multiplexer)?;

        let repeat = options.repeat;
        let shared = Shared {
            opener,
            registry,
            waker,
            running: AtomicBool::new(false),
            devices: Mutex::new(DeviceSet {
                active: IndexMap::new(),
                garbage: Vec::new(),
                repeat,
            }),
            control: Mutex::new(None),
            keymap,
            options,
            sink: Box::new(sink),
            next_token: AtomicUsize::new(FIRST_DEVICE_TOKEN),
        };

        Ok(Self {
            shared: Arc::new(shared),
            poll: Some(poll),
            thread: None,
            done: Mutex::new(None),
        })
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.shared.options
    }

    pub fn handle(&self) -> ControllerHandle<O> {
        ControllerHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Bind the control socket at `path` and start listening on it
    pub fn open_control_socket(&self, path: &Path) -> Result<(), ControllerError> {
        // bind() replaces the node at path
        if self.shared.control.lock().is_some() {
            return Err(ControlError::AlreadyOpen.into());
        }
        let socket = ControlSocket::bind(path)?;
        self.shared.install_control(socket)?;
        log::info!("listening for control commands on {}", path.display());
        Ok(())
    }

    /// Listen on an inherited datagram socket.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor that nothing else owns.
    pub unsafe fn open_control_fd(&self, fd: RawFd) -> Result<(), ControllerError> {
        let socket = ControlSocket::from_raw_fd(fd)?;
        self.shared.install_control(socket)?;
        log::info!("listening for control commands on inherited fd {}", fd);
        Ok(())
    }

    /// Coldplug: add every entry of the coldplug directory.
    ///
    /// Returns false when at least one entry failed.
    pub fn initialize(&self) -> bool {
        self.shared.coldplug()
    }

    /// Spawn the dispatch thread
    pub fn start(&mut self) -> Result<(), ControllerError> {
        let poll = self.poll.take().ok_or(ControllerError::AlreadyStarted)?;
        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);

        shared.running.store(true, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                shared.run(poll);
                let _ = done_tx.send(());
            });

        match spawned {
            Ok(handle) => {
                self.thread = Some(handle);
                *self.done.get_mut() = Some(done_rx);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(ControllerError::Spawn(e))
            }
        }
    }

    /// Ask the dispatch thread to exit and wait up to [`STOP_TIMEOUT`]
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let Some(handle) = self.thread.take() else {
            return;
        };

        if let Err(e) = self.shared.waker.wake() {
            log::error!("failed to wake dispatch thread: {}", e);
        }

        let finished = match self.done.get_mut().take() {
            Some(done) => !matches!(
                done.recv_timeout(STOP_TIMEOUT),
                Err(mpsc::RecvTimeoutError::Timeout)
            ),
            None => true,
        };

        if !finished {
            log::error!("dispatch thread did not stop within {:?}", STOP_TIMEOUT);
            return;
        }
        if handle.join().is_err() {
            log::error!("dispatch thread panicked");
        }
    }

    /// Whether the dispatch thread is alive
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Open and start `<device_root>/<name>`
    pub fn add_device(&self, name: &str) -> bool {
        self.shared.add_device(Path::new(name))
    }

    pub fn remove_device(&self, name: &str) -> bool {
        self.shared.remove_device(name)
    }

    /// Toggle a quirk on a device; `quirk` is `[+|-]name`
    pub fn change_quirk(&self, name: &str, quirk: &str) -> bool {
        self.shared.change_quirk(name, quirk)
    }

    /// Apply `rate` to all active devices.
    ///
    /// Returns false if any device rejected it. Devices that accepted the
    /// rate keep it. On success the rate becomes the default for new devices.
    pub fn set_repeat_rate(&self, rate: RepeatRate) -> bool {
        self.shared.set_repeat_rate(rate)
    }

    /// Repeat rate applied to newly added devices
    pub fn default_repeat_rate(&self) -> Option<RepeatRate> {
        self.shared.devices.lock().repeat
    }

    pub fn dump(&self, scope: DumpScope) -> Vec<DeviceSummary> {
        self.shared.dump(scope)
    }
}

impl<O: DeviceOpener> Drop for Controller<O> {
    fn drop(&mut self) {
        self.stop();

        let mut set = self.shared.devices.lock();
        for (_, mut dev) in set.active.drain(..) {
            dev.stop(&self.shared.registry);
        }
        set.garbage.clear();
    }
}

impl<O: DeviceOpener> Shared<O> {
    fn install_control(&self, socket: ControlSocket) -> Result<(), ControllerError> {
        let mut control = self.control.lock();
        if control.is_some() {
            return Err(ControlError::AlreadyOpen.into());
        }

        let fd = socket.as_raw_fd();
        self.registry
            .register(&mut SourceFd(&fd), CONTROL, Interest::READABLE)
            .map_err(ControllerError::Register)?;
        *control = Some(socket);
        Ok(())
    }

    fn device_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.options.device_root.join(name)
    }

    fn add_device(&self, name: &Path) -> bool {
        let path = self.device_path(name);
        let mut dev = match DeviceHandle::open(
            &self.opener,
            &path,
            Arc::clone(&self.keymap),
            self.options.magic_timeout,
        ) {
            Ok(dev) => dev,
            Err(e) => {
                log::error!("{}", e);
                return false;
            }
        };

        let mut set = self.devices.lock();

        if let Some(existing) = set.active.get(&dev.device_number()) {
            log::debug!(
                "device '{}' ({}) already registered as {}",
                name.display(),
                dev.description(),
                existing.path().display()
            );
            return false;
        }

        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        if let Err(e) = dev.start(&self.registry, token) {
            log::error!("failed to start {}: {}", path.display(), e);
            dev.stop(&self.registry);
            set.garbage.push(dev);
            return false;
        }

        if let Some(rate) = set.repeat {
            dev.set_repeat_rate(rate);
        }

        log::info!("added input device '{}' ({})", name.display(), dev.description());
        set.active.insert(dev.device_number(), dev);
        true
    }

    fn lookup(&self, name: &str) -> Option<DeviceNumber> {
        let path = self.device_path(name);
        match self.opener.device_number(&path) {
            Ok(number) => Some(number),
            Err(e) => {
                log::error!("failed to stat {}: {}", path.display(), e);
                None
            }
        }
    }

    fn remove_device(&self, name: &str) -> bool {
        let Some(number) = self.lookup(name) else {
            return false;
        };

        let mut set = self.devices.lock();
        match set.active.get_index_of(&number) {
            Some(index) => {
                set.retire(index, &self.registry);
                true
            }
            None => {
                log::error!("device '{}' not found", name);
                false
            }
        }
    }

    fn change_quirk(&self, name: &str, quirk: &str) -> bool {
        let (quirk_name, enabled) = quirks::parse_toggle(quirk);
        let Some(number) = self.lookup(name) else {
            return false;
        };

        let mut set = self.devices.lock();
        let Some(dev) = set.active.get_mut(&number) else {
            log::error!("device '{}' not found", name);
            return false;
        };

        match dev.change_quirk(quirk_name, enabled) {
            Ok(()) => true,
            Err(e) => {
                log::error!("{}: {}", dev.path().display(), e);
                false
            }
        }
    }

    fn set_repeat_rate(&self, rate: RepeatRate) -> bool {
        let mut set = self.devices.lock();
        let ok = set
            .active
            .values_mut()
            .fold(true, |ok, dev| dev.set_repeat_rate(rate) && ok);

        if ok {
            set.repeat = Some(rate);
        }
        ok
    }

    fn dump(&self, scope: DumpScope) -> Vec<DeviceSummary> {
        let set = self.devices.lock();
        let mut out = Vec::new();

        if scope.includes_active() {
            log::debug!("active devices:");
            for dev in set.active.values() {
                let summary = dev.summary();
                log::debug!("  {}", summary);
                out.push(summary);
            }
        }
        if scope.includes_gc() {
            log::debug!("gc devices:");
            for dev in &set.garbage {
                let summary = dev.summary();
                log::debug!("  {}", summary);
                out.push(summary);
            }
        }

        out
    }

    fn coldplug(&self) -> bool {
        let dir = &self.options.coldplug_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("no coldplug directory {}", dir.display());
                return true;
            }
            Err(e) => {
                log::error!("failed to scan {}: {}", dir.display(), e);
                return false;
            }
        };

        let mut ok = true;
        for entry in entries {
            let name = match entry {
                Ok(entry) => entry.file_name(),
                Err(e) => {
                    log::error!("failed to scan {}: {}", dir.display(), e);
                    ok = false;
                    continue;
                }
            };
            let name: &OsStr = &name;

            if self.add_device(Path::new(name)) {
                log::info!("coldplugged '{}'", name.to_string_lossy());
            } else {
                log::error!("failed to coldplug '{}'", name.to_string_lossy());
                ok = false;
            }
        }
        ok
    }

    /// Dispatch loop; returns when `running` is cleared or the control
    /// channel hangs up
    fn run(&self, mut poll: Poll) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        log::debug!("dispatch thread started");

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("poll failed: {}", e);
                break;
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            for event in events.iter() {
                let readiness = Readiness::from(event);
                log::trace!("{:?} {:?}", event.token(), readiness);
                match event.token() {
                    WAKER => log::error!("internal error: wake channel signalled while running"),
                    CONTROL => {
                        if !self.handle_control(readiness) {
                            self.running.store(false, Ordering::SeqCst);
                        }
                    }
                    token => self.handle_device(token, readiness),
                }
            }

            self.collect_garbage();
        }

        self.running.store(false, Ordering::SeqCst);
        log::debug!("dispatch thread finished");
    }

    /// False when the control channel is lost
    fn handle_control(&self, readiness: Readiness) -> bool {
        match readiness {
            Readiness::HangUp => {
                log::error!("control channel hung up; stopping");
                return false;
            }
            Readiness::Unexpected => {
                log::warn!("unexpected control channel event");
                return true;
            }
            Readiness::Readable => {}
        }

        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            let command = {
                let control = self.control.lock();
                let Some(socket) = control.as_ref() else {
                    return true;
                };
                match socket.recv(&mut buf) {
                    Ok(data) => Command::parse(data),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                    Err(e) => {
                        log::error!("failed to read control channel: {}", e);
                        return true;
                    }
                }
            };

            match command {
                Ok(command) => self.execute(command),
                Err(e) => log::error!("control channel: {}", e),
            }
        }
    }

    fn execute(&self, command: Command) {
        log::debug!("control command {:?}", command);
        match command {
            Command::Add(name) => {
                self.add_device(Path::new(&name));
            }
            Command::Remove(name) => {
                self.remove_device(&name);
            }
            Command::Quirk { device, quirk } => {
                self.change_quirk(&device, &quirk);
            }
            Command::Dump(scope) => {
                self.dump(scope);
            }
        }
    }

    fn handle_device(&self, token: Token, readiness: Readiness) {
        let mut pending: SmallVec<[AppEvent; 8]> = SmallVec::new();

        {
            let mut set = self.devices.lock();
            let Some(index) = set.position_of(token) else {
                log::debug!("readiness for detached device {:?}", token);
                return;
            };

            match readiness {
                Readiness::HangUp => {
                    if let Some((_, dev)) = set.active.get_index(index) {
                        dev.handle_hup();
                    }
                    set.retire(index, &self.registry);
                }
                Readiness::Readable => {
                    if self.drain(&mut set, index, &mut pending) {
                        set.retire(index, &self.registry);
                    }
                }
                Readiness::Unexpected => log::warn!("unexpected device event {:?}", token),
            }
        }

        for ev in pending {
            if let Err(e) = self.sink.deliver(ev) {
                log::error!("failed to deliver {}: {}", ev, e);
            }
        }
    }

    /// Read until the device would block; true when it must be removed
    fn drain(
        &self,
        set: &mut DeviceSet<O::Device>,
        index: usize,
        pending: &mut SmallVec<[AppEvent; 8]>,
    ) -> bool {
        let Some((_, dev)) = set.active.get_index_mut(index) else {
            return false;
        };

        loop {
            match dev.handle_readable() {
                DecodeOutcome::Emit(ev) => pending.push(ev),
                DecodeOutcome::ModifierUpdated
                | DecodeOutcome::Ignored
                | DecodeOutcome::Invalid => {}
                DecodeOutcome::MagicMatch | DecodeOutcome::Disappeared => return true,
                DecodeOutcome::Drained => return false,
            }
        }
    }

    /// Destroy garbage devices one at a time, releasing the lock in between
    fn collect_garbage(&self) {
        loop {
            let mut set = self.devices.lock();
            let Some(dev) = set.garbage.pop() else {
                break;
            };
            drop(dev);
        }
    }
}
