// Inputdev Daemon
// Runs the input device controller and logs the events it delivers

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;

use inputdev_core::{Config, Controller, EvdevOpener, LogSink};

/// Multiplex hot-pluggable input devices into one event stream
#[derive(Parser, Debug)]
#[command(name = "inputdev")]
#[command(version)]
#[command(about = "Input device multiplexer", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Bind the control socket at this path
    #[arg(short, long, value_name = "PATH", conflicts_with = "systemd")]
    socket: Option<PathBuf>,

    /// Use the IDX-th socket passed by systemd socket activation
    #[arg(long, value_name = "IDX")]
    systemd: Option<usize>,

    /// Directory scanned for devices at startup
    #[arg(long, value_name = "DIR")]
    coldplug_dir: Option<PathBuf>,

    /// Directory device names are resolved against
    #[arg(long, value_name = "DIR")]
    device_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::load_default().context("failed to load default config")?,
    };

    if let Some(socket) = &args.socket {
        config.socket = socket.clone();
    }
    if let Some(dir) = &args.coldplug_dir {
        config.coldplug_dir = dir.clone();
    }
    if let Some(root) = &args.device_root {
        config.device_root = root.clone();
    }
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = load_config(&args)?;
    if let Some(path) = &config.source_path {
        log::info!("loaded configuration from {}", path.display());
    }
    for (table, count) in config.keymap.populated() {
        log::debug!("keymap table {}: {} symbols", table, count);
    }

    let mut controller = Controller::new(
        EvdevOpener,
        LogSink,
        Arc::new(config.keymap.clone()),
        config.controller_options(),
    )?;

    match args.systemd {
        Some(idx) => {
            let fd = sd_notify::listen_fds()
                .context("socket activation unavailable")?
                .nth(idx);
            let Some(fd) = fd else {
                bail!("no socket-activated descriptor at index {}", idx);
            };
            // SAFETY: descriptors passed by systemd belong to this process
            unsafe { controller.open_control_fd(fd) }?;
        }
        None => controller.open_control_socket(&config.socket)?,
    }

    if !controller.initialize() {
        log::warn!("some devices failed to coldplug");
    }
    controller.start()?;

    let running = Arc::new(AtomicBool::new(true));
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let running = running.clone();
        let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to install signal handler")?;
        std::thread::spawn(move || {
            if let Some(signal) = signals.forever().next() {
                log::info!("received signal {}, shutting down", signal);
                running.store(false, Ordering::SeqCst);
            }
        });
    }

    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        log::debug!("sd_notify failed: {}", e);
    }
    log::info!(
        "inputdev {} running (socket {})",
        env!("CARGO_PKG_VERSION"),
        if args.systemd.is_some() {
            "inherited".to_string()
        } else {
            config.socket.display().to_string()
        }
    );

    while running.load(Ordering::SeqCst) {
        if !controller.is_running() {
            log::error!("dispatch thread stopped unexpectedly");
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]);
    controller.stop();
    Ok(())
}
