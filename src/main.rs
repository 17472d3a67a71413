//! modemftp - FTP over an AT-command WiFi module
//!
//! Opens the serial link (or a TCP bridge to it), initialises the module
//! and hands the terminal to the command shell.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use modemftp::cli::Args;
use modemftp::clock::FrameClock;
use modemftp::config::{default_config_path, Config};
use modemftp::ftp::{Engine, Settings};
use modemftp::link::Link;
use modemftp::logger::{Logger, NoopLogger, TextLogger};
use modemftp::progress::TerminalConsole;
use modemftp::serial::{SerialDevice, SerialPortDevice, TcpBridgeDevice};
use modemftp::shell::{connect_command, Shell};

fn open_device(cfg: &Config, logger: &dyn Logger) -> Result<Box<dyn SerialDevice>> {
    if let Some(addr) = &cfg.link.bridge {
        return Ok(Box::new(TcpBridgeDevice::connect(addr)?));
    }
    match &cfg.link.port {
        Some(port) => Ok(Box::new(SerialPortDevice::open(port, cfg.link.baud, logger)?)),
        None => Err(anyhow!(
            "No serial port configured. Use --port <device> or --bridge <host:port>."
        )),
    }
}

fn main() -> Result<()> {
    // Ctrl-C cancels the running operation; at the prompt it exits
    let cancel = Arc::new(AtomicBool::new(false));
    let busy = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        let busy = busy.clone();
        ctrlc::set_handler(move || {
            if busy.load(Ordering::SeqCst) {
                cancel.store(true, Ordering::SeqCst);
            } else {
                eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
                std::process::exit(130);
            }
        })
        .expect("Error setting Ctrl-C handler");
    }

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    args.apply(&mut config);

    // Choose logger once; zero overhead in hot paths with NoopLogger
    let logger: Arc<dyn Logger> = if let Some(ref p) = config.log_file {
        match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("Log file {} unavailable: {:#}", p.display(), e);
                Arc::new(NoopLogger)
            }
        }
    } else {
        Arc::new(NoopLogger)
    };

    let device = open_device(&config, logger.as_ref())?;
    logger.session("start", &format!("baud={}", config.link.baud));
    let tick = Duration::from_millis(config.link.tick_ms.max(1));
    let link = Link::new(
        device,
        FrameClock::new(tick),
        config.link.settings(),
        logger.clone(),
    );
    let settings = Settings {
        timing: config.timing,
        page_lines: config.listing.page_lines,
        block_size: config.transfer.block_size,
        progress_step: config.transfer.progress_step,
    };
    let mut engine = Engine::new(link, settings);
    engine.set_trace(args.debug);

    let target = if args.target.is_empty() {
        None
    } else {
        Some(connect_command(&args.target).map_err(|e| anyhow!(e))?)
    };

    let ui = TerminalConsole::new(cancel, busy);
    let mut shell = Shell::new(engine, ui, config, Some(config_path));
    if !args.no_init {
        shell.init();
    }
    if let Some(cmd) = target {
        shell.run_command(cmd);
    }
    shell.run(tick);
    logger.session("exit", "");
    Ok(())
}
