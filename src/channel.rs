//! The two logical sockets multiplexed over the module link

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// FTP control connection, open for the whole session
    Control,
    /// FTP data connection, opened and closed per transfer
    Data,
}

impl Channel {
    pub fn id(self) -> u8 {
        match self {
            Channel::Control => 0,
            Channel::Data => 1,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Channel::Control),
            1 => Some(Channel::Data),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Payload bytes still owed to an in-flight `+IPD` frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelFrame {
    pub channel: Channel,
    pub remaining: u16,
}

impl ChannelFrame {
    /// Account for one payload byte; true when the frame is complete
    pub fn consume(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining == 0
    }
}

/// Parse `+IPD,<ch>,<len>` (optionally followed by `,<ip>,<port>`).
/// Only channels 0 and 1 are accepted.
pub fn parse_ipd_header(header: &str) -> Option<ChannelFrame> {
    let rest = header.trim_start().strip_prefix("+IPD,")?;
    let mut fields = rest.split(',');
    let channel = Channel::from_id(fields.next()?.trim().parse().ok()?)?;
    let len: u32 = fields.next()?.trim().parse().ok()?;
    let remaining = u16::try_from(len).ok()?;
    Some(ChannelFrame { channel, remaining })
}

/// Recognise `<n>,CLOSED` socket teardown notices, tolerating junk in front
pub fn parse_closed(line: &str) -> Option<Channel> {
    let head = line.trim().strip_suffix(",CLOSED")?;
    let digit = head.chars().last()?.to_digit(10)?;
    let before = head.chars().rev().nth(1);
    if before.map_or(false, |c| c.is_ascii_digit()) {
        return None;
    }
    Channel::from_id(digit)
}
