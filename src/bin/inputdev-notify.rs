// Inputdev Notify
// udev helper forwarding one device event to the daemon's control socket

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use inputdev_core::config::DEFAULT_SOCKET;

/// sysexits.h
const EX_USAGE: u8 = 64;
const EX_OSERR: u8 = 71;

/// Send "<ACTION> <device>" to a running inputdev daemon
#[derive(Parser, Debug)]
#[command(name = "inputdev-notify")]
#[command(version)]
#[command(about = "Forward a udev input event to inputdev", long_about = None)]
struct Args {
    /// Device name, with or without the "input/" prefix
    device: String,

    /// Control socket of the daemon
    #[arg(default_value = DEFAULT_SOCKET)]
    socket: PathBuf,
}

/// Build the control datagram for `action` on `device`
fn build_command(action: Option<&str>, device: &str) -> String {
    let device = device.strip_prefix("input/").unwrap_or(device);
    format!("{} {}\n", action.unwrap_or("add"), device)
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EX_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let action = std::env::var("ACTION").ok();
    let command = build_command(action.as_deref(), &args.device);

    let socket = match UnixDatagram::unbound() {
        Ok(socket) => socket,
        Err(e) => {
            eprintln!("socket(): {}", e);
            return ExitCode::from(EX_OSERR);
        }
    };

    match socket.send_to(command.as_bytes(), &args.socket) {
        Ok(n) if n == command.len() => ExitCode::SUCCESS,
        Ok(_) => {
            eprintln!("not all data sent");
            ExitCode::from(EX_OSERR)
        }
        Err(e) => {
            eprintln!("sendto({}): {}", args.socket.display(), e);
            ExitCode::from(EX_OSERR)
        }
    }
}
