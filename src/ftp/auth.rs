//! Connect, log in, and hang up

use crate::channel::Channel;
use crate::clock::Clock;
use crate::console::{Console, Style};
use crate::error::{FtpError, Result};
use crate::link::{Budget, Flow, LinkEvent};
use crate::protocol::code;
use crate::serial::SerialDevice;

use super::reply::Reply;
use super::{Engine, SessionState, UNKNOWN_PATH};

/// Keep going after a best-effort step unless the connection itself died
pub(super) fn tolerate<T>(r: Result<T>) -> Result<()> {
    match r {
        Err(e) if e.is_disconnect() => Err(e),
        _ => Ok(()),
    }
}

impl<D: SerialDevice, K: Clock> Engine<D, K> {
    /// Open the control connection and wait for the server greeting.
    /// When already connected the user is asked before hanging up.
    pub fn connect(&mut self, ui: &mut dyn Console, host: &str, port: u16) -> Result<()> {
        let r = self.connect_inner(ui, host, port);
        self.conclude(ui, r)
    }

    fn connect_inner(&mut self, ui: &mut dyn Console, host: &str, port: u16) -> Result<()> {
        self.require(SessionState::Disconnected)?;
        if self.session.state >= SessionState::FtpConnected {
            if !ui.confirm("Already connected. Disconnect? (Y/N)") {
                return Err(FtpError::Cancelled);
            }
            self.hang_up(ui);
        }
        let t = self.settings.timing;
        ui.print_line(&format!("Connecting to {}:{}...", host, port), Style::Info);
        self.link.flush();

        let mut greeting = self
            .link
            .open_channel(ui, Channel::Control, host, port, t.connect)
            .map(|()| String::new());
        if greeting.is_ok() {
            greeting = self.await_banner(ui, t.banner);
        }
        let banner = match greeting {
            Ok(line) => line,
            Err(e) => {
                self.link.close_channel(Channel::Control, 0);
                return Err(match e {
                    // we never got as far as a session, so nothing was lost
                    FtpError::ConnectionLost(_) => {
                        FtpError::Rejected("Connection rejected".to_string())
                    }
                    other => other,
                });
            }
        };

        self.session.state = SessionState::FtpConnected;
        self.session.host = host.to_string();
        self.session.port = port;
        self.session.user.clear();
        self.session.path = UNKNOWN_PATH.to_string();
        self.link
            .logger()
            .session("connect", &format!("host={} port={}", host, port));
        ui.print_line(&banner, Style::Normal);
        ui.print_line("Connected", Style::Success);
        Ok(())
    }

    /// `220` anywhere in a control line counts; a `220-` line holds the
    /// wait open for the terminal greeting line
    fn await_banner(&mut self, ui: &mut dyn Console, budget: u32) -> Result<String> {
        self.link
            .wait_for(ui, Budget::Ticks(budget), "FTP banner", |ev| match ev {
                LinkEvent::Reply(line) => match Reply::parse(line) {
                    Some(r) if r.code == code::READY && r.continued => Flow::Continue,
                    Some(r) if r.code == code::SERVICE_CLOSING => {
                        Flow::Fail(FtpError::Rejected("Connection rejected".to_string()))
                    }
                    _ if line.contains("220") => Flow::Done(line.clone()),
                    Some(r) if r.is_failure() => Flow::Fail(FtpError::Rejected(format!(
                        "Connection rejected ({})",
                        r.code
                    ))),
                    _ => Flow::Continue,
                },
                LinkEvent::Module(line) if line.contains("CLOSED") || line.contains("ERROR") => {
                    Flow::Fail(FtpError::Rejected("Connection rejected".to_string()))
                }
                _ => Flow::Continue,
            })
    }

    /// USER, then PASS if asked for. A `230` straight after USER skips PASS.
    pub fn login(&mut self, ui: &mut dyn Console, user: &str, pass: &str) -> Result<()> {
        let r = self.login_inner(ui, user, pass);
        self.conclude(ui, r)
    }

    fn login_inner(&mut self, ui: &mut dyn Console, user: &str, pass: &str) -> Result<()> {
        self.require(SessionState::FtpConnected)?;
        if self.session.state == SessionState::LoggedIn {
            return Err(FtpError::AlreadyLoggedIn);
        }
        let t = self.settings.timing;

        self.command(ui, &format!("USER {}", user))?;
        let r = self.reply(ui, t.reply, "USER")?;
        match r.code {
            code::LOGGED_IN => {}
            code::NEED_PASSWORD => {
                self.command(ui, &format!("PASS {}", pass))?;
                let r = self.reply(ui, t.reply, "PASS")?;
                match r.code {
                    code::LOGGED_IN => {}
                    code::NOT_LOGGED_IN => return Err(FtpError::LoginIncorrect),
                    _ => return Err(FtpError::unexpected(r.code, &r.text)),
                }
            }
            code::NOT_LOGGED_IN => return Err(FtpError::LoginIncorrect),
            _ => return Err(FtpError::unexpected(r.code, &r.text)),
        }

        self.session.state = SessionState::LoggedIn;
        self.session.user = user.to_string();
        self.link.logger().session("login", &format!("user={}", user));
        ui.print_line("Logged in", Style::Success);

        // binary mode and the starting directory are nice to have
        tolerate(self.set_binary(ui))?;
        tolerate(self.refresh_path(ui, true))?;
        Ok(())
    }

    fn set_binary(&mut self, ui: &mut dyn Console) -> Result<()> {
        let t = self.settings.timing;
        self.command(ui, "TYPE I")?;
        let r = self.reply(ui, t.type_binary, "TYPE")?;
        if r.code != code::COMMAND_OK {
            self.link
                .logger()
                .warn("type", &format!("TYPE I answered {}", r.code));
        }
        Ok(())
    }

    /// Ask, then QUIT and close the control channel. Returns false if the
    /// user declined.
    pub fn quit(&mut self, ui: &mut dyn Console) -> Result<bool> {
        let r = self.quit_inner(ui);
        self.conclude(ui, r)
    }

    fn quit_inner(&mut self, ui: &mut dyn Console) -> Result<bool> {
        self.require(SessionState::FtpConnected)?;
        if !ui.confirm("Disconnect (Y/N)?") {
            return Ok(false);
        }
        self.hang_up(ui);
        ui.print_line("Disconnected", Style::Info);
        Ok(true)
    }

    /// Polite teardown that cannot fail: QUIT, grace period, close channel 0
    pub(super) fn hang_up(&mut self, ui: &mut dyn Console) {
        let t = self.settings.timing;
        if let Err(e) = self.command(ui, "QUIT") {
            self.link.logger().warn("quit", &e.to_string());
        }
        self.link.idle(t.quit_grace);
        self.link.close_channel(Channel::Control, t.quit_residual);
        self.link
            .logger()
            .session("quit", &format!("host={}", self.session.host));
        self.session.reset_to_wifi();
    }
}
