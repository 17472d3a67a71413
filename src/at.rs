//! AT/TCP adapter: open, close and send over a module channel
//!
//! Every operation is a full round-trip on the tick clock; the link keeps
//! draining and (except during teardown) sampling cancel while it waits.

use std::net::Ipv4Addr;

use crate::channel::{parse_closed, Channel};
use crate::clock::Clock;
use crate::console::Console;
use crate::error::{FtpError, Result};
use crate::link::{disconnect_notice, Budget, Flow, Link, LinkEvent};
use crate::protocol::{at, ticks};
use crate::serial::SerialDevice;

/// Coarse classification of a module status line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtReply {
    Ok,
    Failed,
    Connected,
    SendOk,
    LinkDown,
    Other,
}

pub fn classify(line: &str) -> AtReply {
    let line = line.trim();
    if line.contains("CONNECT FAIL")
        || line.contains("DNS Fail")
        || line.starts_with("ERR")
        || line.starts_with("FAI")
    {
        AtReply::Failed
    } else if line.contains("link is not") {
        AtReply::LinkDown
    } else if line.contains("ALREADY") || line.contains("CONNECT") {
        AtReply::Connected
    } else if line.starts_with("SEND OK") {
        AtReply::SendOk
    } else if line.starts_with("OK") {
        AtReply::Ok
    } else {
        AtReply::Other
    }
}

/// First plausible dotted quad in a line (three dots, no leading zero octet)
pub fn parse_station_ip(line: &str) -> Option<Ipv4Addr> {
    line.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|t| t.matches('.').count() == 3 && !t.starts_with('0'))
        .find_map(|t| t.parse().ok())
}

impl<D: SerialDevice, K: Clock> Link<D, K> {
    /// Open a TCP connection on `channel`; waits for `CONNECT`
    pub fn open_channel(
        &mut self,
        ui: &mut dyn Console,
        channel: Channel,
        host: &str,
        port: u16,
        budget: u32,
    ) -> Result<()> {
        self.send_line(&at::start_tcp(channel.id(), host, port));
        self.wait_for(ui, Budget::Ticks(budget), "CONNECT", |ev| match ev {
            LinkEvent::Module(line) if parse_closed(line) == Some(channel) => {
                Flow::Fail(FtpError::Rejected(format!("{} refused the connection", host)))
            }
            LinkEvent::Module(line) => match classify(line) {
                AtReply::Connected | AtReply::Ok => Flow::Done(()),
                AtReply::Failed => Flow::Fail(FtpError::Rejected(line.clone())),
                _ => Flow::Pass,
            },
            _ => Flow::Pass,
        })
    }

    /// Best-effort close followed by a residual drain, so late bytes from
    /// the dying socket cannot leak into the next operation. Ignores cancel.
    pub fn close_channel(&mut self, channel: Channel, residual: u32) {
        self.send_line(&at::close(channel.id()));
        let mut notice = None;
        let closed = self.wait_uncancellable(Budget::Ticks(ticks::CLOSE), "CIPCLOSE", |ev| {
            match ev {
                LinkEvent::Module(line)
                    if line.starts_with("OK") || line.contains("ERROR") || line.contains("UNLINK") =>
                {
                    return Flow::Done(());
                }
                _ => {}
            }
            if let Some(n) = disconnect_notice(ev) {
                notice.get_or_insert(n);
            }
            Flow::Continue
        });
        if let Err(e) = closed {
            self.logger().warn("close", &format!("channel {}: {}", channel, e));
        }
        self.idle(residual);
        self.flush();
        match channel {
            // our own teardown notice is not news
            Channel::Control => {
                self.take_lost();
            }
            Channel::Data => {
                if let Some(n) = notice {
                    self.note_lost(n);
                }
            }
        }
    }

    /// Length-prefixed send: `AT+CIPSEND`, wait for `>`, write the bytes
    pub fn send_on(&mut self, ui: &mut dyn Console, channel: Channel, bytes: &[u8]) -> Result<()> {
        self.send_line(&at::send(channel.id(), bytes.len()));
        self.settle(ticks::SEND_SETTLE);
        self.wait_for(ui, Budget::Ticks(ticks::SEND_PROMPT), "send prompt", |ev| match ev {
            LinkEvent::Prompt => Flow::Done(()),
            LinkEvent::Module(line) => match parse_closed(line) {
                Some(Channel::Control) => Flow::Pass,
                Some(other) if other == channel => {
                    Flow::Fail(FtpError::SendFailed(line.clone()))
                }
                Some(_) => Flow::Continue,
                None if line.contains("ERROR") || line.contains("CLOSED") => {
                    Flow::Fail(FtpError::SendFailed(line.clone()))
                }
                None if classify(line) == AtReply::LinkDown => {
                    Flow::Fail(FtpError::SendFailed(line.clone()))
                }
                None => Flow::Pass,
            },
            _ => Flow::Pass,
        })?;
        self.write_raw(bytes);
        self.settle(ticks::SEND_SETTLE);
        Ok(())
    }

    /// Issue an AT command and wait for `expected` (or `OK` when
    /// `ok_suffices`). Module failure lines end the wait early.
    pub fn command_expect(
        &mut self,
        ui: &mut dyn Console,
        command: &str,
        expected: &str,
        budget: u32,
        ok_suffices: bool,
    ) -> Result<()> {
        self.send_line(command);
        self.wait_for(ui, Budget::Ticks(budget), "module reply", |ev| match ev {
            LinkEvent::Module(line) if line.contains(expected) => Flow::Done(()),
            LinkEvent::Module(line) => match classify(line) {
                AtReply::Failed => Flow::Fail(FtpError::Rejected(line.clone())),
                AtReply::Ok if ok_suffices => Flow::Done(()),
                AtReply::Ok => Flow::Fail(FtpError::Rejected(format!("no {} in reply", expected))),
                _ => Flow::Continue,
            },
            _ => Flow::Continue,
        })
    }

    /// Is anything answering? `OK` and `ERROR` both prove the module is alive.
    pub fn probe(&mut self, ui: &mut dyn Console, attempts: u32, budget: u32) -> Result<bool> {
        for _ in 0..attempts {
            self.send_line(at::ATTENTION);
            let answered = self.wait_for(ui, Budget::Ticks(budget), "probe", |ev| match ev {
                LinkEvent::Module(line) if line.starts_with("OK") || line.contains("ERROR") => {
                    Flow::Done(())
                }
                _ => Flow::Continue,
            });
            match answered {
                Ok(()) => return Ok(true),
                Err(FtpError::Cancelled) => return Err(FtpError::Cancelled),
                Err(_) => self.flush(),
            }
        }
        Ok(false)
    }

    /// Station address from `AT+CIFSR`, preferring the `STAIP` line
    pub fn station_ip(&mut self, ui: &mut dyn Console, budget: u32) -> Result<Option<Ipv4Addr>> {
        self.send_line(at::STATION_IP);
        let mut station = None;
        let mut first = None;
        let r = self.wait_for(ui, Budget::Ticks(budget), "CIFSR", |ev| match ev {
            LinkEvent::Module(line) if line.starts_with("OK") => Flow::Done(()),
            LinkEvent::Module(line) if classify(line) == AtReply::Failed => Flow::Done(()),
            LinkEvent::Module(line) => {
                if let Some(ip) = parse_station_ip(line) {
                    if line.contains("STAIP") {
                        station.get_or_insert(ip);
                    } else {
                        first.get_or_insert(ip);
                    }
                }
                Flow::Continue
            }
            _ => Flow::Continue,
        });
        match r {
            Ok(()) | Err(FtpError::Timeout(_)) => Ok(station.or(first)),
            Err(e) => Err(e),
        }
    }

    /// Leave transparent mode and put the module into multiplexed client mode
    pub fn reset_module(&mut self) {
        self.write_raw(at::ESCAPE.as_bytes());
        self.idle(ticks::SETTLE);
        self.flush();
        for cmd in [at::ECHO_OFF, at::SERVER_OFF, at::CLOSE_ALL, at::MULTIPLEX_ON] {
            self.send_line(cmd);
            self.idle(ticks::SETTLE);
            self.flush();
        }
        self.take_lost();
    }
}
