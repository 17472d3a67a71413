//! The engine's view of the module link
//!
//! Owns the serial device, receive ring, demuxer and tick clock. Each
//! service pass drains the device into the ring (capped by the drain
//! mode), runs the demuxer over the ring, and queues the resulting events.
//! Waits are tick loops: drain, sample cancel, interpret events, yield.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::buffer::{DrainMode, RingBuffer};
use crate::channel::{parse_closed, Channel};
use crate::clock::Clock;
use crate::console::Console;
use crate::demux::{Demuxer, LineAssembler, Unit, LINE_CAPACITY};
use crate::error::{FtpError, Result};
use crate::logger::{Direction, Logger};
use crate::serial::SerialDevice;

/// Service passes per `drain_pending` call
const MAX_DRAIN_PASSES: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEvent {
    /// Plain line from the module itself (`OK`, `0,CONNECT`, `1,CLOSED`)
    Module(String),
    /// Send prompt `>`
    Prompt,
    /// Text line received on the FTP control channel
    Reply(String),
    /// Payload received on the FTP data channel
    Data(Vec<u8>),
}

/// Unsolicited "the control connection is gone" notices
pub fn disconnect_notice(ev: &LinkEvent) -> Option<String> {
    match ev {
        LinkEvent::Module(line) if parse_closed(line) == Some(Channel::Control) => {
            Some("Remote host closed socket".to_string())
        }
        LinkEvent::Reply(line) if line.starts_with("421") => {
            if line.contains("imeout") {
                Some("Idle Timeout (421)".to_string())
            } else {
                Some("Service Closing (421)".to_string())
            }
        }
        _ => None,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LinkSettings {
    pub ring_capacity: usize,
    pub responsive_cap: usize,
    pub reply_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            ring_capacity: 512,
            responsive_cap: 32,
            reply_capacity: 256,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub ring_dropped: u64,
    pub line_overflows: u64,
    pub reply_overflows: u64,
    pub malformed_headers: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Budget {
    /// Bounded total wait
    Ticks(u32),
    /// Bounded gap since the last received byte
    Silence(u32),
}

impl Budget {
    fn limit(self) -> u32 {
        match self {
            Budget::Ticks(n) | Budget::Silence(n) => n,
        }
    }
}

/// Verdict of a wait predicate on one event
pub enum Flow<T> {
    /// Consumed, keep waiting
    Continue,
    Done(T),
    Fail(FtpError),
    /// Not interesting here; apply the default disconnect check
    Pass,
}

pub struct Link<D, K> {
    device: D,
    clock: K,
    ring: RingBuffer,
    demux: Demuxer,
    replies: LineAssembler,
    events: VecDeque<LinkEvent>,
    units: Vec<Unit>,
    drain: DrainMode,
    responsive_cap: usize,
    lost: Option<String>,
    trace: bool,
    logger: Arc<dyn Logger>,
    bytes_in: u64,
    bytes_out: u64,
    warned: LinkStats,
}

impl<D: SerialDevice, K: Clock> Link<D, K> {
    pub fn new(device: D, clock: K, settings: LinkSettings, logger: Arc<dyn Logger>) -> Self {
        Self {
            device,
            clock,
            ring: RingBuffer::new(settings.ring_capacity),
            demux: Demuxer::with_capacity(LINE_CAPACITY),
            replies: LineAssembler::new(settings.reply_capacity),
            events: VecDeque::new(),
            units: Vec::new(),
            drain: DrainMode::Responsive,
            responsive_cap: settings.responsive_cap,
            lost: None,
            trace: false,
            logger,
            bytes_in: 0,
            bytes_out: 0,
            warned: LinkStats::default(),
        }
    }

    /// Drain the device and demux everything buffered. Returns bytes drained.
    pub fn service(&mut self) -> usize {
        let cap = self.drain.cap(self.responsive_cap);
        let n = self.ring.fill_from(&mut self.device, cap);
        self.bytes_in += n as u64;
        if let Some(e) = self.device.take_error() {
            self.logger.error("device", &e.to_string());
        }

        let mut units = std::mem::take(&mut self.units);
        while let Some(b) = self.ring.pop() {
            self.demux.push(b, &mut units);
        }
        for unit in units.drain(..) {
            self.route(unit);
        }
        self.units = units;
        self.note_overflows();
        n
    }

    fn route(&mut self, unit: Unit) {
        match unit {
            Unit::Line(line) => {
                self.wire_in(&line);
                self.events.push_back(LinkEvent::Module(line));
            }
            Unit::Prompt => self.events.push_back(LinkEvent::Prompt),
            Unit::Data(Channel::Control, bytes) => {
                for b in bytes {
                    if let Some(line) = self.replies.push(b) {
                        self.wire_in(&line);
                        self.events.push_back(LinkEvent::Reply(line));
                    }
                }
            }
            Unit::Data(Channel::Data, bytes) => {
                if let Some(LinkEvent::Data(buf)) = self.events.back_mut() {
                    buf.extend_from_slice(&bytes);
                } else {
                    self.events.push_back(LinkEvent::Data(bytes));
                }
            }
        }
    }

    fn note_overflows(&mut self) {
        let now = self.stats();
        if now.ring_dropped > self.warned.ring_dropped {
            self.logger.warn(
                "ring",
                &format!("{} bytes dropped, stream may desync", now.ring_dropped - self.warned.ring_dropped),
            );
        }
        if now.line_overflows > self.warned.line_overflows
            || now.reply_overflows > self.warned.reply_overflows
        {
            self.logger.warn("demux", "overlong line discarded");
        }
        if now.malformed_headers > self.warned.malformed_headers {
            self.logger.warn("demux", "malformed frame header kept as text");
        }
        self.warned = now;
    }

    pub fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.pop_front()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn tick(&mut self) {
        self.clock.wait_tick();
    }

    pub fn ticks(&self) -> u64 {
        self.clock.ticks()
    }

    /// One scheduler step: drain, then sample the cancel signal
    pub fn poll(&mut self, ui: &mut dyn Console) -> Result<usize> {
        let n = self.service();
        if ui.cancel_requested() {
            return Err(FtpError::Cancelled);
        }
        Ok(n)
    }

    /// Service until the device has nothing more to give, without
    /// waiting for ticks. Bounded so a chattering module cannot stall us.
    pub fn drain_pending(&mut self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_DRAIN_PASSES {
            let n = self.service();
            if n == 0 {
                break;
            }
            total += n;
        }
        total
    }

    /// Let `ticks` pass while draining; queued events are kept
    pub fn settle(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
            self.service();
        }
    }

    /// Let `ticks` pass while draining and discarding events
    pub fn idle(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.tick();
            self.service();
            self.discard_pending();
        }
    }

    /// Drop queued events, remembering any disconnect notice among them
    pub fn discard_pending(&mut self) {
        while let Some(ev) = self.events.pop_front() {
            if let Some(notice) = disconnect_notice(&ev) {
                self.lost.get_or_insert(notice);
            }
        }
    }

    /// Disconnect notice swallowed by an earlier drain, if any
    pub fn take_lost(&mut self) -> Option<String> {
        self.lost.take()
    }

    pub fn note_lost(&mut self, notice: String) {
        self.lost.get_or_insert(notice);
    }

    /// Drop everything received so far: queued events, ring contents and
    /// a bounded number of pending device bytes. Parsers restart clean.
    pub fn flush(&mut self) {
        self.service();
        self.discard_pending();
        self.ring.flush(&mut self.device);
        self.demux.reset();
        self.replies.clear();
    }

    pub fn wait_for<T>(
        &mut self,
        ui: &mut dyn Console,
        budget: Budget,
        what: &'static str,
        on_event: impl FnMut(&LinkEvent) -> Flow<T>,
    ) -> Result<T> {
        self.wait_inner(Some(ui), budget, what, on_event)
    }

    /// Same as `wait_for` but ignores the cancel signal (teardown paths)
    pub fn wait_uncancellable<T>(
        &mut self,
        budget: Budget,
        what: &'static str,
        on_event: impl FnMut(&LinkEvent) -> Flow<T>,
    ) -> Result<T> {
        self.wait_inner(None, budget, what, on_event)
    }

    fn wait_inner<T>(
        &mut self,
        mut ui: Option<&mut dyn Console>,
        budget: Budget,
        what: &'static str,
        mut on_event: impl FnMut(&LinkEvent) -> Flow<T>,
    ) -> Result<T> {
        let mut waited = 0u32;
        loop {
            let mut heard = self.service() > 0;
            if let Some(ui) = ui.as_deref_mut() {
                if ui.cancel_requested() {
                    return Err(FtpError::Cancelled);
                }
            }
            while let Some(ev) = self.events.pop_front() {
                heard = true;
                match on_event(&ev) {
                    Flow::Continue => {}
                    Flow::Done(v) => return Ok(v),
                    Flow::Fail(e) => return Err(e),
                    Flow::Pass => self.unhandled(ev)?,
                }
            }
            if heard && matches!(budget, Budget::Silence(_)) {
                waited = 0;
            }
            if waited >= budget.limit() {
                return Err(FtpError::Timeout(what));
            }
            self.tick();
            waited += 1;
        }
    }

    fn unhandled(&mut self, ev: LinkEvent) -> Result<()> {
        if let Some(notice) = disconnect_notice(&ev) {
            return Err(FtpError::ConnectionLost(notice));
        }
        if let LinkEvent::Data(bytes) = &ev {
            self.logger
                .warn("link", &format!("{} stray data bytes dropped", bytes.len()));
        }
        Ok(())
    }

    pub fn send_line(&mut self, line: &str) {
        if self.trace {
            self.logger.wire(Direction::Out, line);
        }
        self.device.send_all(line.as_bytes());
        self.device.send_all(b"\r\n");
        self.bytes_out += line.len() as u64 + 2;
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        if self.trace {
            self.logger
                .wire(Direction::Out, &String::from_utf8_lossy(bytes));
        }
        self.device.send_all(bytes);
        self.bytes_out += bytes.len() as u64;
    }

    fn wire_in(&self, line: &str) {
        if self.trace {
            self.logger.wire(Direction::In, line);
        }
    }

    /// Switch drain mode, returning the previous one
    pub fn set_drain(&mut self, mode: DrainMode) -> DrainMode {
        std::mem::replace(&mut self.drain, mode)
    }

    pub fn drain_mode(&self) -> DrainMode {
        self.drain
    }

    pub fn set_trace(&mut self, on: bool) {
        self.trace = on;
    }

    pub fn tracing(&self) -> bool {
        self.trace
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            ring_dropped: self.ring.dropped(),
            line_overflows: self.demux.line_overflows(),
            reply_overflows: self.replies.overflows(),
            malformed_headers: self.demux.malformed_headers(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}
