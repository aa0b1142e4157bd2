// Shared fixtures for controller integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use inputdev_core::event::{RawInputEvent, EV_KEY, EV_SYN};
use inputdev_core::{
    AppEvent, Controller, ControllerOptions, DeviceNumber, DeviceOpener, EventMask, InputBackend,
    KeyMap, RepeatRate,
};

pub const DEVICE_ROOT: &str = "/fake/input";

/// Record type that makes the fake backend report ENODEV
pub const UNPLUG: u16 = 0xffff;

/// Observable state of one fake device node
#[derive(Clone)]
pub struct FakeNode {
    pub number: DeviceNumber,
    pub name: String,
    pub key_capable: bool,
    pub fail_grab: bool,
    pub reject_repeat: bool,
    pub grabbed: Arc<AtomicBool>,
    pub repeat: Arc<Mutex<Option<RepeatRate>>>,
    writer: Arc<Mutex<Option<UnixDatagram>>>,
}

impl FakeNode {
    pub fn keyboard(number: DeviceNumber) -> Self {
        Self {
            number,
            name: format!("Fake Keyboard {}", number),
            key_capable: true,
            fail_grab: false,
            reject_repeat: false,
            grabbed: Arc::new(AtomicBool::new(false)),
            repeat: Arc::new(Mutex::new(Some(RepeatRate::new(250, 33)))),
            writer: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_grabbed(&self) -> bool {
        self.grabbed.load(Ordering::SeqCst)
    }

    pub fn repeat(&self) -> Option<RepeatRate> {
        *self.repeat.lock()
    }

    /// Write one raw record to the most recently opened instance
    pub fn send(&self, ev_type: u16, code: u16, value: i32) {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&ev_type.to_ne_bytes());
        buf[2..4].copy_from_slice(&code.to_ne_bytes());
        buf[4..8].copy_from_slice(&value.to_ne_bytes());

        let writer = self.writer.lock();
        if let Some(w) = writer.as_ref() {
            w.send(&buf).unwrap();
        }
    }

    pub fn key(&self, code: u16, value: i32) {
        self.send(EV_KEY, code, value);
        self.send(EV_SYN, 0, 0);
    }

    pub fn press(&self, code: u16) {
        self.key(code, 1);
    }

    pub fn tap(&self, code: u16) {
        self.key(code, 1);
        self.key(code, 0);
    }

    pub fn unplug(&self) {
        self.send(UNPLUG, 0, 0);
    }
}

pub struct FakeBackend {
    node: FakeNode,
    reader: UnixDatagram,
}

impl InputBackend for FakeBackend {
    fn raw_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    fn device_number(&self) -> io::Result<DeviceNumber> {
        Ok(self.node.number)
    }

    fn name(&self) -> io::Result<String> {
        Ok(self.node.name.clone())
    }

    fn event_capabilities(&self) -> io::Result<EventMask> {
        let mut mask = EventMask::new();
        mask.set(EV_SYN as usize);
        if self.node.key_capable {
            mask.set(EV_KEY as usize);
        }
        Ok(mask)
    }

    fn grab(&mut self) -> io::Result<()> {
        if self.node.fail_grab {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        self.node.grabbed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ungrab(&mut self) -> io::Result<()> {
        self.node.grabbed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn auto_repeat(&self) -> Option<RepeatRate> {
        *self.node.repeat.lock()
    }

    fn set_auto_repeat(&mut self, rate: RepeatRate) -> io::Result<()> {
        if self.node.reject_repeat {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        *self.node.repeat.lock() = Some(rate);
        Ok(())
    }

    fn read_event(&mut self) -> io::Result<Option<RawInputEvent>> {
        let mut buf = [0u8; 8];
        let n = self.reader.recv(&mut buf)?;
        if n != buf.len() {
            return Ok(None);
        }

        let ev_type = u16::from_ne_bytes([buf[0], buf[1]]);
        if ev_type == UNPLUG {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        let code = u16::from_ne_bytes([buf[2], buf[3]]);
        let value = i32::from_ne_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Some(RawInputEvent::new(ev_type, code, value)))
    }
}

/// Opener over an in-memory table of fake nodes
#[derive(Clone, Default)]
pub struct FakeOpener {
    nodes: Arc<Mutex<HashMap<PathBuf, FakeNode>>>,
}

impl FakeOpener {
    pub fn insert(&self, name: impl AsRef<Path>, node: FakeNode) -> FakeNode {
        self.nodes
            .lock()
            .insert(Path::new(DEVICE_ROOT).join(name), node.clone());
        node
    }

    /// Remove the node from the table so later lookups fail
    pub fn delete(&self, name: &str) {
        self.nodes.lock().remove(&Path::new(DEVICE_ROOT).join(name));
    }
}

impl DeviceOpener for FakeOpener {
    type Device = FakeBackend;

    fn open(&self, path: &Path) -> io::Result<FakeBackend> {
        let node = self
            .nodes
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;

        let (reader, writer) = UnixDatagram::pair()?;
        reader.set_nonblocking(true)?;
        *node.writer.lock() = Some(writer);

        Ok(FakeBackend { node, reader })
    }

    fn device_number(&self, path: &Path) -> io::Result<DeviceNumber> {
        self.nodes
            .lock()
            .get(path)
            .map(|n| n.number)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
    }
}

pub fn options() -> ControllerOptions {
    ControllerOptions {
        device_root: PathBuf::from(DEVICE_ROOT),
        ..ControllerOptions::default()
    }
}

pub fn new_controller(
    opener: &FakeOpener,
    options: ControllerOptions,
) -> (Controller<FakeOpener>, mpsc::Receiver<AppEvent>) {
    let (tx, rx) = mpsc::channel();
    let controller = Controller::new(opener.clone(), tx, Arc::new(KeyMap::new()), options).unwrap();
    (controller, rx)
}

/// Poll `cond` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub const WAIT: Duration = Duration::from_secs(2);

/// Unique scratch path under the temp dir
pub fn scratch_path(tag: &str) -> PathBuf {
    static COUNTER: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("inputdev-{}-{}-{}", tag, std::process::id(), n))
}
