// Inputdev Device Backends
// OS capability interfaces used by device handles, plus the evdev adapter

use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;

use crate::bitset::EventMask;
use crate::event::RawInputEvent;

/// Stable identity of a device node (`st_rdev`)
pub type DeviceNumber = u64;

/// Hardware auto-repeat timing in milliseconds (EVIOCGREP/EVIOCSREP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepeatRate {
    /// Delay before the first repeat
    pub delay_ms: u32,
    /// Interval between repeats
    pub period_ms: u32,
}

impl RepeatRate {
    pub fn new(delay_ms: u32, period_ms: u32) -> Self {
        Self {
            delay_ms,
            period_ms,
        }
    }
}

impl std::fmt::Display for RepeatRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms/{}ms", self.delay_ms, self.period_ms)
    }
}

/// Per-device OS controls.
///
/// Implementations wrap one open device node. Errors are plain
/// `io::Error`s; callers classify them (`ENODEV` means the device is gone,
/// `Interrupted`/`WouldBlock` are transient).
pub trait InputBackend: Send {
    /// Descriptor registered with the multiplexer
    fn raw_fd(&self) -> RawFd;

    /// Device number of the open node
    fn device_number(&self) -> io::Result<DeviceNumber>;

    /// Human readable device name (EVIOCGNAME)
    fn name(&self) -> io::Result<String>;

    /// Supported event types (EVIOCGBIT(0, ..))
    fn event_capabilities(&self) -> io::Result<EventMask>;

    /// Claim exclusive access (EVIOCGRAB 1)
    fn grab(&mut self) -> io::Result<()>;

    /// Release exclusive access (EVIOCGRAB 0)
    fn ungrab(&mut self) -> io::Result<()>;

    /// Current auto-repeat timing; `None` when the device has none
    fn auto_repeat(&self) -> Option<RepeatRate>;

    fn set_auto_repeat(&mut self, rate: RepeatRate) -> io::Result<()>;

    /// Read exactly one event record.
    ///
    /// `Ok(None)` reports a short read.
    fn read_event(&mut self) -> io::Result<Option<RawInputEvent>>;
}

/// Opens device nodes and resolves their device numbers
pub trait DeviceOpener: Send + Sync + 'static {
    type Device: InputBackend + 'static;

    fn open(&self, path: &Path) -> io::Result<Self::Device>;

    /// Device number currently behind `path` (stat)
    fn device_number(&self, path: &Path) -> io::Result<DeviceNumber>;
}

#[cfg(feature = "evdev-backend")]
pub use self::evdev_backend::{EvdevBackend, EvdevOpener};

#[cfg(feature = "evdev-backend")]
mod evdev_backend {
    use std::io;
    use std::mem;
    use std::os::unix::fs::MetadataExt;
    use std::os::unix::io::{AsRawFd, RawFd};
    use std::path::Path;

    use evdev::{AutoRepeat, Device};

    use super::{DeviceNumber, DeviceOpener, InputBackend, RepeatRate};
    use crate::bitset::EventMask;
    use crate::event::RawInputEvent;

    /// evdev-backed device node
    pub struct EvdevBackend {
        device: Device,
    }

    impl EvdevBackend {
        pub fn open(path: &Path) -> io::Result<Self> {
            let device = Device::open(path)?;
            set_nonblocking(device.as_raw_fd())?;
            Ok(Self { device })
        }
    }

    fn set_nonblocking(fd: RawFd) -> io::Result<()> {
        // SAFETY: fd belongs to the device opened above
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    impl InputBackend for EvdevBackend {
        fn raw_fd(&self) -> RawFd {
            self.device.as_raw_fd()
        }

        fn device_number(&self) -> io::Result<DeviceNumber> {
            let mut st = mem::MaybeUninit::<libc::stat>::uninit();
            // SAFETY: valid descriptor and out pointer; st is only read on success
            let rc = unsafe { libc::fstat(self.raw_fd(), st.as_mut_ptr()) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            let st = unsafe { st.assume_init() };
            Ok(st.st_rdev as DeviceNumber)
        }

        fn name(&self) -> io::Result<String> {
            Ok(self.device.name().unwrap_or("Unknown").to_string())
        }

        fn event_capabilities(&self) -> io::Result<EventMask> {
            Ok(self
                .device
                .supported_events()
                .iter()
                .map(|ty| ty.0 as usize)
                .collect())
        }

        fn grab(&mut self) -> io::Result<()> {
            self.device.grab()
        }

        fn ungrab(&mut self) -> io::Result<()> {
            self.device.ungrab()
        }

        fn auto_repeat(&self) -> Option<RepeatRate> {
            self.device
                .get_auto_repeat()
                .map(|rep| RepeatRate::new(rep.delay, rep.period))
        }

        fn set_auto_repeat(&mut self, rate: RepeatRate) -> io::Result<()> {
            self.device.update_auto_repeat(&AutoRepeat {
                delay: rate.delay_ms,
                period: rate.period_ms,
            })
        }

        fn read_event(&mut self) -> io::Result<Option<RawInputEvent>> {
            let size = mem::size_of::<libc::input_event>();
            // SAFETY: input_event is plain old data
            let mut ev: libc::input_event = unsafe { mem::zeroed() };
            let rc = unsafe {
                libc::read(
                    self.raw_fd(),
                    &mut ev as *mut libc::input_event as *mut libc::c_void,
                    size,
                )
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            if rc as usize != size {
                return Ok(None);
            }
            Ok(Some(RawInputEvent::new(ev.type_, ev.code, ev.value)))
        }
    }

    /// Opens `/dev/input/event*` style nodes through evdev
    #[derive(Debug, Default, Clone, Copy)]
    pub struct EvdevOpener;

    impl DeviceOpener for EvdevOpener {
        type Device = EvdevBackend;

        fn open(&self, path: &Path) -> io::Result<EvdevBackend> {
            EvdevBackend::open(path)
        }

        fn device_number(&self, path: &Path) -> io::Result<DeviceNumber> {
            Ok(std::fs::metadata(path)?.rdev())
        }
    }
}
