//! Command-line arguments

use clap::Parser;
use std::path::PathBuf;

use crate::config::Config;

#[derive(Clone, Debug, Parser)]
#[command(
    author,
    version,
    about = "modemftp - FTP client for AT-command WiFi modules on a serial line"
)]
pub struct Args {
    /// Connect right away: host[:port][/path] [user] [pass]
    pub target: Vec<String>,

    /// Serial port the module is attached to (e.g. /dev/ttyUSB0, COM3)
    #[arg(short = 'p', long)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    pub baud: Option<u32>,

    /// Reach the module through a TCP-to-serial bridge (host:port) instead of a port
    #[arg(long, conflicts_with = "port")]
    pub bridge: Option<String>,

    /// Configuration file (default: per-user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Append diagnostic log lines to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append one JSON line per download to this file
    #[arg(long = "history-file")]
    pub history_file: Option<PathBuf>,

    /// Directory downloads are stored in
    #[arg(short = 'd', long = "download-dir")]
    pub download_dir: Option<PathBuf>,

    /// Store downloads under 8.3 names
    #[arg(long = "short-names")]
    pub short_names: bool,

    /// Trace module traffic to the log file
    #[arg(long)]
    pub debug: bool,

    /// Skip module initialisation at start-up
    #[arg(long = "no-init")]
    pub no_init: bool,
}

impl Args {
    /// Command-line values override the configuration file
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(p) = &self.port {
            cfg.link.port = Some(p.clone());
            cfg.link.bridge = None;
        }
        if let Some(b) = &self.bridge {
            cfg.link.bridge = Some(b.clone());
        }
        if let Some(baud) = self.baud {
            cfg.link.baud = baud;
        }
        if let Some(p) = &self.log_file {
            cfg.log_file = Some(p.clone());
        }
        if let Some(p) = &self.history_file {
            cfg.history_file = Some(p.clone());
        }
        if let Some(d) = &self.download_dir {
            cfg.transfer.download_dir = d.clone();
        }
        if self.short_names {
            cfg.transfer.short_names = true;
        }
    }
}
