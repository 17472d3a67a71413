//! Passive-mode data transfers: LIST and RETR
//!
//! Both share one shape: PASV, open channel 1, send the command on
//! channel 0, then consume events until the server and the module agree
//! the transfer is over. Channel 1 is owned by a guard for the whole
//! exchange, so every exit path (success, error, cancel, timeout) restores
//! the drain mode and closes the data channel before anything else runs.

use std::io::Write;
use std::net::Ipv4Addr;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

use crate::buffer::DrainMode;
use crate::channel::{parse_closed, Channel};
use crate::clock::Clock;
use crate::config::Timing;
use crate::console::{Console, Style, Uncancellable};
use crate::error::{FtpError, Result};
use crate::link::{disconnect_notice, Link, LinkEvent};
use crate::protocol::code;
use crate::serial::SerialDevice;
use crate::storage::{LocalFile, Storage};

use super::listing::{format_size, ListFilter, ListSummary, ListingSink};
use super::reply::{parse_pasv, parse_size, Reply};
use super::{send_command, wait_reply, Engine, SessionState};

/// Files accepted by one GET
pub const MAX_BATCH: usize = 10;

/// Consumer of channel-1 payload
pub(super) trait DataSink {
    /// Ok(false) ends the transfer early at the user's request
    fn accept<D: SerialDevice, K: Clock>(
        &mut self,
        link: &mut Link<D, K>,
        ui: &mut dyn Console,
        bytes: &[u8],
    ) -> Result<bool>;

    /// Called once after channel 1 is closed, whatever the outcome
    fn finish(&mut self, ui: &mut dyn Console, complete: bool) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DataKind {
    List,
    Retrieve,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DataEnd {
    /// Completion reply and/or channel-1 close seen
    Complete,
    /// Server answered 550 to LIST: nothing to show
    Empty,
    /// Stream went quiet after it had started
    Silent,
    /// The sink asked to stop
    Stopped,
}

/// Holds channel 1 open. Dropping it restores the drain mode and closes
/// the channel with a residual drain.
struct DataChannel<'a, D: SerialDevice, K: Clock> {
    link: &'a mut Link<D, K>,
    previous: DrainMode,
    residual: u32,
}

impl<'a, D: SerialDevice, K: Clock> DataChannel<'a, D, K> {
    fn new(link: &'a mut Link<D, K>, residual: u32) -> Self {
        let previous = link.set_drain(DrainMode::Throughput);
        Self {
            link,
            previous,
            residual,
        }
    }
}

impl<D: SerialDevice, K: Clock> Deref for DataChannel<'_, D, K> {
    type Target = Link<D, K>;

    fn deref(&self) -> &Self::Target {
        self.link
    }
}

impl<D: SerialDevice, K: Clock> DerefMut for DataChannel<'_, D, K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.link
    }
}

impl<D: SerialDevice, K: Clock> Drop for DataChannel<'_, D, K> {
    fn drop(&mut self) {
        self.link.set_drain(self.previous);
        self.link.close_channel(Channel::Data, self.residual);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransferOutcome {
    pub remote: String,
    /// Where the bytes went, as the storage reports it
    pub local: String,
    pub bytes: u64,
    /// From SIZE, when the server answered it
    pub expected: Option<u64>,
    pub seconds: f64,
}

impl TransferOutcome {
    pub fn is_short(&self) -> bool {
        self.expected.map_or(false, |n| self.bytes < n)
    }
}

#[derive(Debug)]
pub enum BatchItem {
    Done(TransferOutcome),
    Cancelled,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub items: Vec<(String, BatchItem)>,
    pub cancelled: bool,
}

impl BatchSummary {
    pub fn downloaded(&self) -> usize {
        self.items
            .iter()
            .filter(|(_, item)| matches!(item, BatchItem::Done(_)))
            .count()
    }

    pub fn bytes(&self) -> u64 {
        self.items
            .iter()
            .filter_map(|(_, item)| match item {
                BatchItem::Done(o) => Some(o.bytes),
                _ => None,
            })
            .sum()
    }
}

/// Writes RETR payload to local storage in fixed-size blocks
struct DownloadSink<'s> {
    storage: &'s mut dyn Storage,
    remote: String,
    file: Option<Box<dyn LocalFile>>,
    local: String,
    block: Vec<u8>,
    block_size: usize,
    received: u64,
    expected: Option<u64>,
    progress_step: u64,
    next_progress: u64,
}

impl<'s> DownloadSink<'s> {
    fn new(
        storage: &'s mut dyn Storage,
        remote: &str,
        expected: Option<u64>,
        block_size: usize,
        progress_step: u64,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            storage,
            remote: remote.to_string(),
            file: None,
            local: String::new(),
            block: Vec::with_capacity(block_size),
            block_size,
            received: 0,
            expected,
            progress_step: progress_step.max(1),
            next_progress: progress_step.max(1),
        }
    }

    /// Local file is created on the first byte so a refused RETR leaves nothing behind
    fn open(&mut self) -> Result<&mut Box<dyn LocalFile>> {
        if self.file.is_none() {
            let file = self.storage.create(&self.remote).map_err(FtpError::Storage)?;
            self.local = file.location();
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| FtpError::Storage(anyhow::anyhow!("local file missing")))
    }

    fn write_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let block = std::mem::take(&mut self.block);
        let written = self
            .open()?
            .write_all(&block)
            .map_err(|e| FtpError::Storage(e.into()));
        self.block = block;
        self.block.clear();
        written
    }
}

impl DataSink for DownloadSink<'_> {
    fn accept<D: SerialDevice, K: Clock>(
        &mut self,
        _link: &mut Link<D, K>,
        ui: &mut dyn Console,
        mut bytes: &[u8],
    ) -> Result<bool> {
        self.open()?;
        self.received += bytes.len() as u64;
        while !bytes.is_empty() {
            let room = self.block_size - self.block.len();
            let (now, later) = bytes.split_at(room.min(bytes.len()));
            self.block.extend_from_slice(now);
            bytes = later;
            if self.block.len() >= self.block_size {
                self.write_block()?;
            }
        }
        if self.received >= self.next_progress {
            ui.report_progress(&self.remote, self.received, self.expected);
            self.next_progress = self.received + self.progress_step;
        }
        Ok(true)
    }

    fn finish(&mut self, ui: &mut dyn Console, complete: bool) -> Result<()> {
        let flushed = if complete || self.file.is_some() {
            // an empty remote file still produces an empty local one
            self.write_block().and_then(|()| self.open().map(|_| ()))
        } else {
            Ok(())
        };
        let closed = match self.file.as_mut() {
            Some(f) => f.flush().map_err(|e| FtpError::Storage(e.into())),
            None => Ok(()),
        };
        self.file = None;
        if complete {
            ui.report_progress(&self.remote, self.received, self.expected.or(Some(self.received)));
        }
        ui.finish_progress();
        flushed.and(closed)
    }
}

/// Walk the event stream of one data transfer until it ends
fn exchange<D: SerialDevice, K: Clock, S: DataSink>(
    link: &mut Link<D, K>,
    ui: &mut dyn Console,
    kind: DataKind,
    t: &Timing,
    sink: &mut S,
) -> Result<DataEnd> {
    let (start_budget, silence_budget, what) = match kind {
        DataKind::List => (t.list_start, t.list_silence, "LIST"),
        DataKind::Retrieve => (t.retr_start, t.retr_silence, "RETR"),
    };
    let mut started = false;
    let mut complete = false;
    let mut data_closed = false;
    let mut waited = 0u32;
    loop {
        let mut heard = link.poll(ui)? > 0;
        while let Some(ev) = link.next_event() {
            heard = true;
            if let Some(notice) = disconnect_notice(&ev) {
                return Err(FtpError::ConnectionLost(notice));
            }
            match ev {
                LinkEvent::Data(bytes) => {
                    started = true;
                    if !sink.accept(link, ui, &bytes)? {
                        return Ok(DataEnd::Stopped);
                    }
                }
                LinkEvent::Reply(line) => {
                    let Some(r) = Reply::parse(&line) else { continue };
                    if r.continued {
                        continue;
                    }
                    match r.code {
                        code::OPENING_DATA | code::DATA_ALREADY_OPEN => started = true,
                        code::TRANSFER_COMPLETE | code::FILE_ACTION_OK => complete = true,
                        code::UNAVAILABLE if kind == DataKind::List => return Ok(DataEnd::Empty),
                        code::UNAVAILABLE | code::NAME_NOT_ALLOWED => {
                            return Err(FtpError::NotFound("File not found"))
                        }
                        c if c >= 400 => return Err(FtpError::unexpected(r.code, &r.text)),
                        _ => {}
                    }
                }
                LinkEvent::Module(line) => {
                    if parse_closed(&line) == Some(Channel::Data) {
                        data_closed = true;
                    }
                }
                LinkEvent::Prompt => {}
            }
        }

        if complete && data_closed {
            return Ok(DataEnd::Complete);
        }
        if complete || (data_closed && started) {
            // one side is done; give the other a moment to catch up
            if heard {
                waited = 0;
            }
            if waited >= t.complete_grace {
                return Ok(DataEnd::Complete);
            }
        } else if !started {
            if waited >= start_budget {
                return Err(FtpError::Timeout(what));
            }
        } else {
            if heard {
                waited = 0;
            }
            if waited >= silence_budget {
                return Ok(DataEnd::Silent);
            }
        }
        link.tick();
        waited += 1;
    }
}

fn open_data<D: SerialDevice, K: Clock>(
    link: &mut Link<D, K>,
    ui: &mut dyn Console,
    addr: (Ipv4Addr, u16),
    budget: u32,
) -> Result<()> {
    link.open_channel(ui, Channel::Data, &addr.0.to_string(), addr.1, budget)
        .map_err(|e| match e {
            FtpError::Rejected(_) | FtpError::Timeout(_) => FtpError::DataConnectFailed,
            other => other,
        })
}

impl<D: SerialDevice, K: Clock> Engine<D, K> {
    /// PASV → data address. A server that answers 0.0.0.0 means "my own address".
    fn passive(&mut self, ui: &mut dyn Console) -> Result<(Ipv4Addr, u16)> {
        let t = self.settings.timing;
        self.command(ui, "PASV")?;
        let r = self.reply(ui, t.pasv, "PASV")?;
        if r.code != code::PASSIVE {
            return Err(FtpError::PasvFailed);
        }
        let (ip, port) = parse_pasv(&format!("{} {}", r.code, r.text)).ok_or(FtpError::PasvFailed)?;
        if ip.is_unspecified() {
            if let Ok(host) = self.session.host.parse() {
                return Ok((host, port));
            }
        }
        Ok((ip, port))
    }

    /// PASV, open channel 1, issue `command`, and run the exchange. Channel 1
    /// is closed and the sink finished before this returns.
    fn run_transfer<S: DataSink>(
        &mut self,
        ui: &mut dyn Console,
        command: &[u8],
        kind: DataKind,
        sink: &mut S,
    ) -> Result<DataEnd> {
        let t = self.settings.timing;
        let addr = self.passive(ui)?;
        let mut data = DataChannel::new(&mut self.link, t.data_residual);
        let mut end = open_data(&mut *data, ui, addr, t.connect).map(|()| DataEnd::Empty);
        if end.is_ok() {
            end = send_command(&mut *data, ui, command).map(|()| DataEnd::Empty);
        }
        if end.is_ok() {
            end = exchange(&mut *data, ui, kind, &t, sink);
        }
        drop(data);
        let complete = matches!(end, Ok(DataEnd::Complete | DataEnd::Empty));
        let finished = sink.finish(ui, complete);
        let end = end?;
        finished?;
        Ok(end)
    }

    /// SIZE is optional on many servers; any failure just means "unknown"
    fn remote_size(&mut self, ui: &mut dyn Console, name: &str) -> Result<Option<u64>> {
        let t = self.settings.timing;
        let probe = self
            .command(ui, &format!("SIZE {}", name))
            .and_then(|()| self.reply(ui, t.size, "SIZE"));
        match probe {
            Ok(r) if r.code == code::FILE_STATUS => Ok(parse_size(&r.text)),
            Ok(_) => Ok(None),
            Err(e @ (FtpError::ConnectionLost(_) | FtpError::Cancelled)) => Err(e),
            Err(_) => Ok(None),
        }
    }

    /// List the current directory through `filter`, paginating the output
    pub fn list(&mut self, ui: &mut dyn Console, filter: &ListFilter) -> Result<ListSummary> {
        let r = self.list_inner(ui, filter);
        self.conclude(ui, r)
    }

    fn list_inner(&mut self, ui: &mut dyn Console, filter: &ListFilter) -> Result<ListSummary> {
        self.require(SessionState::LoggedIn)?;
        let t = self.settings.timing;
        ui.print_line(&filter.describe(), Style::Info);
        let mut sink = ListingSink::new(filter, self.settings.page_lines, t.pause_risk);
        let end = self.run_transfer(ui, b"LIST", DataKind::List, &mut sink);
        let summary = ListSummary {
            shown: sink.shown,
            search: filter.is_search(),
            stopped: matches!(end, Ok(DataEnd::Stopped)),
        };
        if matches!(end, Ok(_) | Err(FtpError::Cancelled)) {
            ui.print_line(&summary.footer(), Style::Info);
        }
        if let Ok(DataEnd::Silent) = end {
            self.link.logger().warn("list", "listing ended on silence");
        }
        end?;
        if sink.needs_probe {
            self.keepalive_probe(ui)?;
        }
        Ok(summary)
    }

    /// NOOP after a long pause. Any completion reply proves the session is
    /// alive; silence means the server dropped us while we waited.
    fn keepalive_probe(&mut self, ui: &mut dyn Console) -> Result<()> {
        let t = self.settings.timing;
        self.require(SessionState::FtpConnected)?;
        // a stop at the page prompt leaves cancel raised; the probe must still run
        let mut ui = Uncancellable(ui);
        send_command(&mut self.link, &mut ui, b"NOOP")?;
        match wait_reply(&mut self.link, &mut ui, t.noop, "NOOP") {
            Ok(r) => {
                if !r.is_completion() {
                    self.link
                        .logger()
                        .warn("noop", &format!("NOOP answered {}", r.code));
                }
                Ok(())
            }
            Err(FtpError::Timeout(_)) => Err(FtpError::ConnectionLost(
                "Disconnected (NOOP timeout)".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    /// RETR one file into `storage`
    pub fn download(
        &mut self,
        ui: &mut dyn Console,
        storage: &mut dyn Storage,
        name: &str,
    ) -> Result<TransferOutcome> {
        let r = self.download_inner(ui, storage, name);
        self.conclude(ui, r)
    }

    fn download_inner(
        &mut self,
        ui: &mut dyn Console,
        storage: &mut dyn Storage,
        name: &str,
    ) -> Result<TransferOutcome> {
        self.require(SessionState::LoggedIn)?;
        if name.is_empty() {
            return Err(FtpError::NotFound("File not found"));
        }
        let began = Instant::now();
        let expected = self.remote_size(ui, name)?;
        self.link.logger().transfer_start(name, expected);

        let mut sink = DownloadSink::new(
            storage,
            name,
            expected,
            self.settings.block_size,
            self.settings.progress_step,
        );
        let mut line = b"RETR ".to_vec();
        line.extend_from_slice(name.as_bytes());
        let end = self.run_transfer(ui, &line, DataKind::Retrieve, &mut sink)?;

        let outcome = TransferOutcome {
            remote: name.to_string(),
            local: sink.local.clone(),
            bytes: sink.received,
            expected,
            seconds: began.elapsed().as_secs_f64(),
        };
        if end == DataEnd::Silent && !outcome.expected.map_or(false, |n| outcome.bytes >= n) {
            return Err(FtpError::Timeout("No data"));
        }
        if outcome.is_short() {
            let msg = format!(
                "Short transfer: {} of {} bytes",
                outcome.bytes,
                outcome.expected.unwrap_or(0)
            );
            self.link.logger().warn("get", &msg);
            ui.print_line(&msg, Style::Warning);
        }
        self.link
            .logger()
            .transfer_done(name, outcome.bytes, outcome.seconds);
        ui.print_line(
            &format!("OK: {} ({})", outcome.local, format_size(outcome.bytes)),
            Style::Success,
        );
        Ok(outcome)
    }

    /// GET with several names: one file at a time with a short drained gap
    /// between them. A cancel or a lost connection stops the batch.
    pub fn download_batch<S: AsRef<str>>(
        &mut self,
        ui: &mut dyn Console,
        storage: &mut dyn Storage,
        names: &[S],
    ) -> Result<BatchSummary> {
        let t = self.settings.timing;
        let names = if names.len() > MAX_BATCH {
            ui.print_line(
                &format!("Only the first {} files are fetched", MAX_BATCH),
                Style::Warning,
            );
            &names[..MAX_BATCH]
        } else {
            names
        };
        let total = names.len();
        let mut summary = BatchSummary::default();
        for (i, name) in names.iter().map(AsRef::as_ref).enumerate() {
            if i > 0 {
                self.link.idle(t.batch_gap);
            }
            if total > 1 {
                ui.print_line(&format!("Requesting: {} ({}/{})", name, i + 1, total), Style::Info);
            } else {
                ui.print_line(&format!("Requesting: {}", name), Style::Info);
            }
            match self.download(ui, storage, name) {
                Ok(outcome) => summary.items.push((name.to_string(), BatchItem::Done(outcome))),
                Err(FtpError::Cancelled) => {
                    summary.items.push((name.to_string(), BatchItem::Cancelled));
                    summary.cancelled = true;
                    ui.print_line(
                        if total > 1 {
                            "Batch cancelled by user"
                        } else {
                            "Download cancelled by user"
                        },
                        Style::Warning,
                    );
                    break;
                }
                Err(e) => {
                    ui.print_line(&format!("{}: {}", name, e), Style::Error);
                    let lost = e.is_disconnect() || self.session.state < SessionState::LoggedIn;
                    summary.items.push((name.to_string(), BatchItem::Failed(e.to_string())));
                    if lost {
                        break;
                    }
                }
            }
        }
        if total > 1 || summary.downloaded() > 0 {
            ui.print_line(
                &format!(
                    "{} files downloaded (Total {})",
                    summary.downloaded(),
                    format_size(summary.bytes())
                ),
                Style::Info,
            );
        }
        // the drained gap may have swallowed a disconnect notice
        self.poll_idle(ui);
        Ok(summary)
    }
}
