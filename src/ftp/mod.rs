//! FTP session engine on top of the module link
//!
//! The engine owns the link and the session state. Every operation that
//! changes state first inspects whatever is already buffered for an
//! unsolicited disconnect notice, so a stale `0,CLOSED` or `421` is never
//! mistaken for the reply to a new command.

mod auth;
pub mod listing;
mod nav;
pub mod reply;
mod transfer;

pub use listing::{format_size, ListEntry, ListFilter, ListSummary, TypeFilter};
pub use nav::{decode_escapes, track_path};
pub use reply::Reply;
pub use transfer::{BatchItem, BatchSummary, TransferOutcome, MAX_BATCH};

use std::net::Ipv4Addr;

use crate::channel::Channel;
use crate::clock::Clock;
use crate::config::Timing;
use crate::console::{Console, StatusSnapshot, Style};
use crate::error::{FtpError, Result};
use crate::link::{Budget, Flow, Link, LinkEvent};
use crate::protocol::{at, code, MAX_COMMAND_LEN};
use crate::serial::SerialDevice;

/// Displayed while the server has not told us where we are
pub const UNKNOWN_PATH: &str = "---";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    #[default]
    Disconnected,
    WifiOk,
    FtpConnected,
    LoggedIn,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::Disconnected => "offline",
            SessionState::WifiOk => "wifi ok",
            SessionState::FtpConnected => "connected",
            SessionState::LoggedIn => "logged in",
        }
    }
}

/// Session state plus advisory display fields. The display fields never
/// drive protocol decisions.
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub state: SessionState,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub path: String,
    pub station_ip: Option<Ipv4Addr>,
}

impl Session {
    fn reset_to_wifi(&mut self) {
        self.state = SessionState::WifiOk;
        self.host.clear();
        self.port = 0;
        self.user.clear();
        self.path.clear();
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Settings {
    pub timing: Timing,
    /// Listing rows per page; 0 disables paging
    pub page_lines: usize,
    pub block_size: usize,
    pub progress_step: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            page_lines: 17,
            block_size: 512,
            progress_step: 1024,
        }
    }
}

pub struct Engine<D, K> {
    link: Link<D, K>,
    session: Session,
    settings: Settings,
}

impl<D: SerialDevice, K: Clock> Engine<D, K> {
    pub fn new(link: Link<D, K>, settings: Settings) -> Self {
        Self {
            link,
            session: Session::default(),
            settings,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn link(&self) -> &Link<D, K> {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link<D, K> {
        &mut self.link
    }

    pub fn set_trace(&mut self, on: bool) {
        self.link.set_trace(on);
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.session.state,
            host: self.session.host.clone(),
            user: self.session.user.clone(),
            path: self.session.path.clone(),
            station_ip: self.session.station_ip.map(|ip| ip.to_string()),
        }
    }

    fn publish(&self, ui: &mut dyn Console) {
        ui.report_status(&self.status());
    }

    /// Bring the module into multiplexed client mode and check the WiFi join.
    /// Falls back to the probe sequence when the module does not answer.
    pub fn initialize(&mut self, ui: &mut dyn Console) -> Result<SessionState> {
        let t = self.settings.timing;
        self.session = Session::default();
        ui.print_line("Initializing module...", Style::Info);
        self.link.reset_module();
        match self.link.command_expect(ui, at::ATTENTION, "OK", t.module_check, true) {
            Ok(()) => {}
            Err(FtpError::Cancelled) => return Err(FtpError::Cancelled),
            Err(_) => return self.reinitialize(ui),
        }
        self.link.flush();
        match self
            .link
            .command_expect(ui, at::JOINED_AP, at::JOINED_MARK, t.join_check, false)
        {
            Ok(()) => {
                self.session.state = SessionState::WifiOk;
                self.link.flush();
                self.session.station_ip = self.link.station_ip(ui, t.station_ip)?;
                ui.print_line("WiFi OK", Style::Success);
            }
            Err(FtpError::Cancelled) => return Err(FtpError::Cancelled),
            Err(e) => {
                self.link.logger().warn("init", &e.to_string());
                ui.print_line("WiFi not connected", Style::Warning);
            }
        }
        self.link.flush();
        self.publish(ui);
        Ok(self.session.state)
    }

    /// Slow path: probe the module (bounded retries) and infer WiFi from
    /// whether it holds a station address
    pub fn reinitialize(&mut self, ui: &mut dyn Console) -> Result<SessionState> {
        let t = self.settings.timing;
        self.session = Session::default();
        self.link.reset_module();
        if !self.link.probe(ui, t.probe_attempts, t.probe)? {
            ui.print_line("Module not responding", Style::Error);
            self.publish(ui);
            return Err(FtpError::ModuleSilent);
        }
        self.link.flush();
        self.session.station_ip = self.link.station_ip(ui, t.station_ip)?;
        self.link.flush();
        if self.session.station_ip.is_some() {
            self.session.state = SessionState::WifiOk;
            ui.print_line("WiFi OK", Style::Success);
        } else {
            ui.print_line("WiFi not connected", Style::Warning);
        }
        self.publish(ui);
        Ok(self.session.state)
    }

    /// Idle-time monitor. Returns true when a disconnect was detected
    /// (reported once; later notices find the session already reset).
    pub fn poll_idle(&mut self, ui: &mut dyn Console) -> bool {
        self.link.drain_pending();
        self.link.discard_pending();
        let Some(reason) = self.link.take_lost() else {
            return false;
        };
        if self.session.state < SessionState::FtpConnected {
            return false;
        }
        self.lose_connection(&reason);
        ui.print_line(&reason, Style::Warning);
        self.publish(ui);
        true
    }

    /// Stale-notice check plus state requirement, run before any command
    fn require(&mut self, needed: SessionState) -> Result<()> {
        self.link.drain_pending();
        self.link.discard_pending();
        if let Some(reason) = self.link.take_lost() {
            if self.session.state >= SessionState::FtpConnected {
                return Err(FtpError::ConnectionLost(reason));
            }
        }
        match needed {
            SessionState::LoggedIn if self.session.state == SessionState::FtpConnected => {
                Err(FtpError::NotLoggedIn)
            }
            _ if self.session.state < needed.min(SessionState::FtpConnected) => {
                Err(FtpError::NotConnected)
            }
            _ if self.session.state < needed => Err(FtpError::NotLoggedIn),
            _ => Ok(()),
        }
    }

    /// Apply session consequences of an operation's outcome
    fn conclude<T>(&mut self, ui: &mut dyn Console, r: Result<T>) -> Result<T> {
        if let Err(FtpError::ConnectionLost(reason)) = &r {
            let reason = reason.clone();
            self.lose_connection(&reason);
        }
        self.publish(ui);
        r
    }

    fn lose_connection(&mut self, reason: &str) {
        self.link.logger().session("lost", reason);
        self.session.reset_to_wifi();
        self.link.close_channel(Channel::Control, 0);
    }

    /// Send one FTP command line on the control channel
    fn command(&mut self, ui: &mut dyn Console, line: &str) -> Result<()> {
        self.command_bytes(ui, line.as_bytes())
    }

    /// Raw variant for arguments that were escape-decoded into arbitrary bytes
    fn command_bytes(&mut self, ui: &mut dyn Console, line: &[u8]) -> Result<()> {
        send_command(&mut self.link, ui, line)
    }

    /// Wait for the terminal line of the next reply. A `ddd-` line keeps
    /// the wait open until `ddd ` arrives; `421` means the server is gone.
    fn reply(&mut self, ui: &mut dyn Console, budget: u32, what: &'static str) -> Result<Reply> {
        wait_reply(&mut self.link, ui, budget, what)
    }
}

pub(crate) fn send_command<D: SerialDevice, K: Clock>(
    link: &mut Link<D, K>,
    ui: &mut dyn Console,
    line: &[u8],
) -> Result<()> {
    if line.len() > MAX_COMMAND_LEN || line.iter().any(|&b| b == b'\r' || b == b'\n') {
        return Err(FtpError::CommandTooLong);
    }
    let mut wire = Vec::with_capacity(line.len() + 2);
    wire.extend_from_slice(line);
    wire.extend_from_slice(b"\r\n");
    link.send_on(ui, Channel::Control, &wire)
}

pub(crate) fn wait_reply<D: SerialDevice, K: Clock>(
    link: &mut Link<D, K>,
    ui: &mut dyn Console,
    budget: u32,
    what: &'static str,
) -> Result<Reply> {
    let mut open: Option<u16> = None;
    link.wait_for(ui, Budget::Ticks(budget), what, |ev| match ev {
        LinkEvent::Reply(line) => match Reply::parse(line) {
            Some(r) if r.code == code::SERVICE_CLOSING => Flow::Pass,
            Some(r) if r.continued => {
                open.get_or_insert(r.code);
                Flow::Continue
            }
            Some(r) if open.map_or(true, |c| c == r.code) => Flow::Done(r),
            _ => Flow::Continue,
        },
        _ => Flow::Pass,
    })
}
