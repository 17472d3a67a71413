//! Persistent client settings (TOML)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::clock::DEFAULT_TICK_MS;
use crate::link::LinkSettings;
use crate::protocol::ticks;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: Option<String>,
    pub baud: u32,
    /// host:port of a TCP-to-serial bridge, used instead of `port`
    pub bridge: Option<String>,
    pub tick_ms: u64,
    pub ring_capacity: usize,
    pub responsive_cap: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            bridge: None,
            tick_ms: DEFAULT_TICK_MS,
            ring_capacity: 512,
            responsive_cap: 32,
        }
    }
}

impl LinkConfig {
    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            ring_capacity: self.ring_capacity,
            responsive_cap: self.responsive_cap,
            ..LinkSettings::default()
        }
    }
}

/// Tick budgets for every wait the engine performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub probe: u32,
    pub probe_attempts: u32,
    pub module_check: u32,
    pub join_check: u32,
    pub station_ip: u32,
    pub connect: u32,
    pub banner: u32,
    pub reply: u32,
    pub type_binary: u32,
    pub cwd: u32,
    pub pasv: u32,
    pub size: u32,
    pub list_start: u32,
    pub retr_start: u32,
    pub list_silence: u32,
    pub retr_silence: u32,
    pub complete_grace: u32,
    pub data_residual: u32,
    pub noop: u32,
    pub pause_risk: u32,
    pub quit_grace: u32,
    pub quit_residual: u32,
    pub batch_gap: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            probe: ticks::PROBE,
            probe_attempts: ticks::PROBE_ATTEMPTS,
            module_check: ticks::MODULE_CHECK,
            join_check: ticks::JOIN_CHECK,
            station_ip: ticks::STATION_IP,
            connect: ticks::CONNECT,
            banner: ticks::BANNER,
            reply: ticks::REPLY,
            type_binary: ticks::TYPE,
            cwd: ticks::CWD,
            pasv: ticks::PASV,
            size: ticks::SIZE,
            list_start: ticks::LIST_START,
            retr_start: ticks::RETR_START,
            list_silence: ticks::LIST_SILENCE,
            retr_silence: ticks::RETR_SILENCE,
            complete_grace: ticks::COMPLETE_GRACE,
            data_residual: ticks::DATA_RESIDUAL,
            noop: ticks::NOOP,
            pause_risk: ticks::PAUSE_RISK,
            quit_grace: ticks::QUIT_GRACE,
            quit_residual: ticks::QUIT_RESIDUAL,
            batch_gap: ticks::BATCH_GAP,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Entries shown before pausing; 0 disables paging
    pub page_lines: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self { page_lines: 17 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub block_size: usize,
    pub download_dir: PathBuf,
    /// Store downloads under 8.3 names
    pub short_names: bool,
    pub progress_step: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size: 512,
            download_dir: PathBuf::from("."),
            short_names: false,
            progress_step: 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecentHost {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub anonymous_password: String,
    pub log_file: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub link: LinkConfig,
    pub timing: Timing,
    pub listing: ListingConfig,
    pub transfer: TransferConfig,
    pub recent_hosts: Vec<RecentHost>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            anonymous_password: "guest@example.com".to_string(),
            log_file: None,
            history_file: None,
            link: LinkConfig::default(),
            timing: Timing::default(),
            listing: ListingConfig::default(),
            transfer: TransferConfig::default(),
            recent_hosts: Vec::new(),
        }
    }
}

/// Per-user configuration directory
pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("modemftp");
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("modemftp");
    }
    PathBuf::from(".modemftp")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("modemftp.toml")
}

impl Config {
    /// Read `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => toml::from_str(&data)
                .with_context(|| format!("parse config {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("read config {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).ok();
        let data = toml::to_string(self)?;
        // atomic write
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        use std::io::Write as _;
        tmp.write_all(data.as_bytes())?;
        tmp.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600));
        }
        tmp.persist(path)
            .with_context(|| format!("write config {}", path.display()))?;
        Ok(())
    }

    pub fn add_recent_host(&mut self, host: &str, port: u16) {
        let entry = RecentHost {
            host: host.to_string(),
            port,
        };
        self.recent_hosts
            .retain(|h| !(h.host.eq_ignore_ascii_case(&entry.host) && h.port == entry.port));
        self.recent_hosts.insert(0, entry);
        if self.recent_hosts.len() > 10 {
            self.recent_hosts.truncate(10);
        }
    }
}
