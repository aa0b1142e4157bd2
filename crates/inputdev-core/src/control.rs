// Inputdev Control Channel
// Datagram control socket and its one-line text protocol

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use strum_macros::{Display, EnumString};

/// Receive buffer size; datagrams filling `MAX_DATAGRAM` bytes are rejected
pub const BUFFER_SIZE: usize = 128;

/// Longest accepted datagram is one byte shorter than this
pub const MAX_DATAGRAM: usize = BUFFER_SIZE - 1;

/// Errors while setting up the control socket
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("failed to bind control socket {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },

    #[error("descriptor {fd} is not a datagram socket")]
    NotDatagram { fd: RawFd },

    #[error("control channel already open")]
    AlreadyOpen,

    #[error("control socket I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Rejected control datagrams; logged and ignored
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("received too much data ({0} bytes)")]
    Oversized(usize),

    #[error("command is not valid UTF-8")]
    NotUtf8,

    #[error("invalid command '{0}'")]
    Malformed(String),

    #[error("invalid command '{verb}' for '{argument}'")]
    UnknownVerb { verb: String, argument: String },

    #[error("invalid dump scope '{0}'")]
    UnknownScope(String),
}

/// Which collections `dump` lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DumpScope {
    Active,
    Gc,
    All,
}

impl DumpScope {
    pub fn includes_active(self) -> bool {
        matches!(self, DumpScope::Active | DumpScope::All)
    }

    pub fn includes_gc(self) -> bool {
        matches!(self, DumpScope::Gc | DumpScope::All)
    }
}

/// A parsed control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `add <device>` or `change <device>`
    Add(String),
    /// `remove <device>`
    Remove(String),
    /// `quirk:[+|-]<name> <device>`; `quirk` keeps its sign prefix
    Quirk { device: String, quirk: String },
    /// `dump active|gc|all`
    Dump(DumpScope),
}

impl Command {
    /// Parse one datagram: `<verb> <argument>`, whitespace separated.
    ///
    /// Tokens after the argument are ignored.
    pub fn parse(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() >= MAX_DATAGRAM {
            return Err(ProtocolError::Oversized(datagram.len()));
        }

        let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::NotUtf8)?;
        let mut tokens = text.split_whitespace();
        let (Some(verb), Some(argument)) = (tokens.next(), tokens.next()) else {
            return Err(ProtocolError::Malformed(text.trim_end().to_string()));
        };

        let lower = verb.to_ascii_lowercase();
        let command = match lower.as_str() {
            "add" | "change" => Command::Add(argument.to_string()),
            "remove" => Command::Remove(argument.to_string()),
            "dump" => Command::Dump(
                DumpScope::from_str(argument)
                    .map_err(|_| ProtocolError::UnknownScope(argument.to_string()))?,
            ),
            _ => match lower.strip_prefix("quirk:") {
                Some(quirk) if !quirk.trim_start_matches(['+', '-']).is_empty() => {
                    Command::Quirk {
                        device: argument.to_string(),
                        quirk: verb["quirk:".len()..].to_string(),
                    }
                }
                _ => {
                    return Err(ProtocolError::UnknownVerb {
                        verb: verb.to_string(),
                        argument: argument.to_string(),
                    })
                }
            },
        };

        Ok(command)
    }
}

/// Nonblocking datagram socket receiving control commands
#[derive(Debug)]
pub struct ControlSocket {
    socket: UnixDatagram,
    bound_path: Option<PathBuf>,
}

impl ControlSocket {
    /// Bind a fresh socket at `path`, replacing a stale node.
    ///
    /// The node is created with mode 0600 (umask 0077).
    pub fn bind(path: &Path) -> Result<Self, ControlError> {
        match std::fs::remove_file(path) {
            Ok(()) => log::debug!("removed stale control socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ControlError::Bind {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }

        // SAFETY: umask only swaps the process file creation mask
        let old_mask = unsafe { libc::umask(0o077) };
        let bound = UnixDatagram::bind(path);
        unsafe { libc::umask(old_mask) };

        let socket = bound.map_err(|source| ControlError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            bound_path: Some(path.to_path_buf()),
        })
    }

    /// Adopt an inherited descriptor (socket activation).
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor owned by nobody else.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Result<Self, ControlError> {
        let mut ty: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut ty as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        );
        if rc < 0 {
            return Err(ControlError::Io(io::Error::last_os_error()));
        }
        if ty != libc::SOCK_DGRAM {
            return Err(ControlError::NotDatagram { fd });
        }

        let socket = UnixDatagram::from_raw_fd(fd);
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket,
            bound_path: None,
        })
    }

    /// Receive one datagram; at most `MAX_DATAGRAM` bytes are kept
    pub fn recv<'a>(&self, buf: &'a mut [u8; BUFFER_SIZE]) -> io::Result<&'a [u8]> {
        let n = self.socket.recv(&mut buf[..MAX_DATAGRAM])?;
        Ok(&buf[..n])
    }
}

impl AsRawFd for ControlSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        if let Some(path) = &self.bound_path {
            let _ = std::fs::remove_file(path);
        }
    }
}
