//! Line/frame demuxer for the module byte stream
//!
//! Splits the raw stream into plain control lines (`OK`, `0,CONNECT`,
//! `1,CLOSED`, ...), the send prompt `>`, and the payload of
//! `+IPD,<ch>,<len>:<bytes>` frames. A frame header is picked up as soon
//! as its `:` arrives, at the start of a line or behind other text. A
//! header still sitting in a line when the terminator arrives is recovered
//! at line end. Once `+IPD,` is in the line buffer bytes are kept raw, so
//! both paths hand over the same payload.

use crate::channel::{parse_ipd_header, Channel, ChannelFrame};

/// Control line capacity, terminator excluded
pub const LINE_CAPACITY: usize = 128;

const IPD_PREFIX: &[u8] = b"+IPD,";

/// Bounded accumulator for one text line. A line that does not fit is
/// dropped whole at its terminator instead of being cut short.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    capacity: usize,
    overflow: bool,
    overflows: u64,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity: capacity.max(2),
            overflow: false,
            overflows: 0,
        }
    }

    pub fn push(&mut self, byte: u8) {
        if self.overflow {
            return;
        }
        if self.buf.len() + 1 >= self.capacity {
            self.overflow = true;
            self.overflows += 1;
            self.buf.clear();
            return;
        }
        self.buf.push(byte);
    }

    /// Close the current line; `None` if it overflowed
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if std::mem::replace(&mut self.overflow, false) {
            self.buf.clear();
            return None;
        }
        Some(std::mem::take(&mut self.buf))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_blank(&self) -> bool {
        !self.overflow && self.buf.iter().all(|b| b.is_ascii_whitespace())
    }

    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.overflow = false;
    }
}

/// Reassembles `\n`-terminated text out of a byte payload (used for the
/// FTP control channel, whose replies arrive inside frames)
#[derive(Debug)]
pub struct LineAssembler {
    line: LineBuffer,
}

impl LineAssembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            line: LineBuffer::new(capacity),
        }
    }

    pub fn push(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\r' => None,
            b'\n' => self
                .line
                .take()
                .map(|l| String::from_utf8_lossy(&l).trim_end().to_string())
                .filter(|l| !l.is_empty()),
            _ => {
                self.line.push(byte);
                None
            }
        }
    }

    pub fn overflows(&self) -> u64 {
        self.line.overflows()
    }

    pub fn clear(&mut self) {
        self.line.clear();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unit {
    Line(String),
    Prompt,
    Data(Channel, Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Control,
    InData(ChannelFrame),
}

pub struct Demuxer {
    state: State,
    line: LineBuffer,
    malformed: u64,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer {
    pub fn new() -> Self {
        Self::with_capacity(LINE_CAPACITY)
    }

    pub fn with_capacity(line_capacity: usize) -> Self {
        Self {
            state: State::Control,
            line: LineBuffer::new(line_capacity),
            malformed: 0,
        }
    }

    /// Consume one byte, appending any completed units to `out`.
    /// Consecutive payload bytes of one channel are merged.
    pub fn push(&mut self, byte: u8, out: &mut Vec<Unit>) {
        match self.state {
            State::InData(mut frame) => {
                emit_data(out, frame.channel, &[byte]);
                self.state = if frame.consume() {
                    State::Control
                } else {
                    State::InData(frame)
                };
            }
            State::Control => self.control(byte, out),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Unit> {
        let mut out = Vec::new();
        for &b in bytes {
            self.push(b, &mut out);
        }
        out
    }

    /// Frame currently receiving payload, if any
    pub fn in_frame(&self) -> Option<ChannelFrame> {
        match self.state {
            State::InData(f) => Some(f),
            State::Control => None,
        }
    }

    pub fn line_overflows(&self) -> u64 {
        self.line.overflows()
    }

    /// Frame headers that failed to parse and were kept as text
    pub fn malformed_headers(&self) -> u64 {
        self.malformed
    }

    pub fn reset(&mut self) {
        self.state = State::Control;
        self.line.clear();
    }

    fn control(&mut self, byte: u8, out: &mut Vec<Unit>) {
        match byte {
            b'\n' => self.end_line(out),
            b'\r' if !self.header_pending() => {}
            b'>' if self.line.is_blank() => {
                self.line.clear();
                out.push(Unit::Prompt);
            }
            b':' => match rfind(self.line.as_bytes(), IPD_PREFIX) {
                Some(pos) => match header_frame(&self.line.as_bytes()[pos..]) {
                    Some(frame) => {
                        emit_line(out, &self.line.as_bytes()[..pos]);
                        self.line.clear();
                        if frame.remaining > 0 {
                            self.state = State::InData(frame);
                        }
                    }
                    None => {
                        self.malformed += 1;
                        self.line.push(byte);
                    }
                },
                None => self.line.push(byte),
            },
            _ => self.line.push(byte),
        }
    }

    fn header_pending(&self) -> bool {
        rfind(self.line.as_bytes(), IPD_PREFIX).is_some()
    }

    fn end_line(&mut self, out: &mut Vec<Unit>) {
        let Some(text) = self.line.take() else {
            return;
        };
        let Some((pos, colon, frame)) = late_header(&text) else {
            emit_line(out, &text);
            return;
        };
        emit_line(out, &text[..pos]);
        let mut payload = text[colon + 1..].to_vec();
        // the terminator we just consumed belonged to the payload
        payload.push(b'\n');
        let total = frame.remaining as usize;
        if payload.len() >= total {
            let excess = payload.split_off(total);
            emit_data(out, frame.channel, &payload);
            for b in excess {
                self.push(b, out);
            }
        } else {
            emit_data(out, frame.channel, &payload);
            self.state = State::InData(ChannelFrame {
                channel: frame.channel,
                remaining: (total - payload.len()) as u16,
            });
        }
    }
}

/// Header position, its `:` and the frame, for a header left in a
/// finished line
fn late_header(text: &[u8]) -> Option<(usize, usize, ChannelFrame)> {
    let pos = rfind(text, IPD_PREFIX)?;
    text.iter()
        .enumerate()
        .skip(pos)
        .filter(|&(_, &b)| b == b':')
        .find_map(|(i, _)| header_frame(&text[pos..i]).map(|f| (pos, i, f)))
}

fn header_frame(header: &[u8]) -> Option<ChannelFrame> {
    std::str::from_utf8(header).ok().and_then(parse_ipd_header)
}

fn rfind(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).rposition(|w| w == needle)
}

fn emit_line(out: &mut Vec<Unit>, bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if !text.is_empty() {
        out.push(Unit::Line(text.to_string()));
    }
}

fn emit_data(out: &mut Vec<Unit>, channel: Channel, bytes: &[u8]) {
    if let Some(Unit::Data(c, buf)) = out.last_mut() {
        if *c == channel {
            buf.extend_from_slice(bytes);
            return;
        }
    }
    out.push(Unit::Data(channel, bytes.to_vec()));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(units: Vec<Unit>) -> Vec<Unit> {
        let mut out: Vec<Unit> = Vec::new();
        for u in units {
            if let (Some(Unit::Data(c, buf)), Unit::Data(ch, more)) = (out.last_mut(), &u) {
                if *c == *ch {
                    buf.extend_from_slice(more);
                    continue;
                }
            }
            out.push(u);
        }
        out
    }

    fn expected_round_trip() -> Vec<Unit> {
        vec![
            Unit::Line("OK".into()),
            Unit::Data(Channel::Data, b"ABCDE".to_vec()),
            Unit::Line("226 done".into()),
        ]
    }

    #[test]
    fn test_round_trip_byte_by_byte() {
        let input = b"OK\r\n+IPD,1,5:ABCDE\r\n226 done\r\n";
        let mut d = Demuxer::new();
        let mut units = Vec::new();
        for b in input.iter() {
            units.extend(d.feed(&[*b]));
        }
        assert_eq!(merged(units), expected_round_trip());
    }

    #[test]
    fn test_round_trip_independent_of_chunking() {
        let input: &[u8] = b"OK\r\n+IPD,1,5:ABCDE226 done\r\n";
        for i in 0..=input.len() {
            for j in i..=input.len() {
                let mut d = Demuxer::new();
                let mut units = d.feed(&input[..i]);
                units.extend(d.feed(&input[i..j]));
                units.extend(d.feed(&input[j..]));
                assert_eq!(merged(units), expected_round_trip(), "split at {i},{j}");
            }
        }
    }

    #[test]
    fn payload_bytes_are_not_interpreted() {
        let mut d = Demuxer::new();
        let units = d.feed(b"+IPD,1,6:a\r\nb>:\n");
        assert_eq!(units, vec![Unit::Data(Channel::Data, b"a\r\nb>:".to_vec())]);
        assert!(d.in_frame().is_none());
    }

    #[test]
    fn header_with_peer_address() {
        let mut d = Demuxer::new();
        let units = d.feed(b"+IPD,0,8,10.0.0.2,21:220 hi\r\n");
        assert_eq!(units, vec![Unit::Data(Channel::Control, b"220 hi\r\n".to_vec())]);
    }

    #[test]
    fn test_overflowing_line_is_dropped_whole() {
        let mut d = Demuxer::with_capacity(8);
        let units = d.feed(b"0123456789ABC\r\nOK\r\n");
        assert_eq!(units, vec![Unit::Line("OK".into())]);
        assert_eq!(d.line_overflows(), 1);
    }

    #[test]
    fn prompt_only_on_blank_line() {
        let mut d = Demuxer::new();
        assert_eq!(
            d.feed(b"OK\r\n> "),
            vec![Unit::Line("OK".into()), Unit::Prompt]
        );
        assert_eq!(d.feed(b"a>b\r\n"), vec![Unit::Line("a>b".into())]);
    }

    #[test]
    fn malformed_header_stays_text() {
        let mut d = Demuxer::new();
        let units = d.feed(b"+IPD,7,3:xyz\r\n");
        assert_eq!(units, vec![Unit::Line("+IPD,7,3:xyz".into())]);
        assert_eq!(d.malformed_headers(), 1);
    }

    #[test]
    fn embedded_header_switches_at_colon() {
        let mut d = Demuxer::new();
        // frame longer than what precedes the terminator
        let mut units = d.feed(b"busy p...+IPD,1,6:abc\ndef");
        units.extend(d.feed(b"\r\nOK\r\n"));
        assert_eq!(
            merged(units),
            vec![
                Unit::Line("busy p...".into()),
                Unit::Data(Channel::Data, b"abc\nde".to_vec()),
                Unit::Line("f".into()),
                Unit::Line("OK".into()),
            ]
        );
    }

    #[test]
    fn embedded_header_short_frame() {
        let mut d = Demuxer::new();
        let units = d.feed(b"x+IPD,1,2:ab1,CLOSED\n");
        assert_eq!(
            units,
            vec![
                Unit::Line("x".into()),
                Unit::Data(Channel::Data, b"ab".to_vec()),
                Unit::Line("1,CLOSED".into()),
            ]
        );
    }

    #[test]
    fn embedded_header_keeps_carriage_returns() {
        let mut d = Demuxer::new();
        let mut units = d.feed(b"x+IPD,1,4:a\r\nb");
        units.extend(d.feed(b"OK\r\n"));
        assert_eq!(
            merged(units),
            vec![
                Unit::Line("x".into()),
                Unit::Data(Channel::Data, b"a\r\nb".to_vec()),
                Unit::Line("OK".into()),
            ]
        );
    }

    #[test]
    fn header_left_in_line_is_recovered_byte_exact() {
        let mut d = Demuxer::new();
        for b in b"x+IPD,1,4:a\r" {
            d.line.push(*b);
        }
        let units = d.feed(b"\nbOK\r\n");
        assert_eq!(
            units,
            vec![
                Unit::Line("x".into()),
                Unit::Data(Channel::Data, b"a\r\nb".to_vec()),
                Unit::Line("OK".into()),
            ]
        );
    }

    #[test]
    fn latest_header_in_line_wins() {
        let mut d = Demuxer::new();
        let units = d.feed(b"+IPD,9:x+IPD,1,3:abcOK\r\n");
        assert_eq!(
            units,
            vec![
                Unit::Line("+IPD,9:x".into()),
                Unit::Data(Channel::Data, b"abc".to_vec()),
                Unit::Line("OK".into()),
            ]
        );
        assert_eq!(d.malformed_headers(), 1);
    }

    #[test]
    fn closed_notice_right_after_payload() {
        let mut d = Demuxer::new();
        let units = d.feed(b"+IPD,1,3:xyz1,CLOSED\r\n");
        assert_eq!(
            units,
            vec![
                Unit::Data(Channel::Data, b"xyz".to_vec()),
                Unit::Line("1,CLOSED".into()),
            ]
        );
    }

    #[test]
    fn line_assembler_splits_replies() {
        let mut a = LineAssembler::new(64);
        let mut lines = Vec::new();
        for b in b"220-Hello\r\n\r\n220 Ready\r\n" {
            if let Some(l) = a.push(*b) {
                lines.push(l);
            }
        }
        assert_eq!(lines, vec!["220-Hello", "220 Ready"]);
    }
}
