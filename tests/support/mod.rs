//! In-memory radio module that speaks the AT wire format and plays an FTP
//! server behind channel 0, with passive data on channel 1.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;

use modemftp::clock::ManualClock;
use modemftp::console::{Console, StatusSnapshot, Style};
use modemftp::ftp::{Engine, Settings};
use modemftp::link::{Link, LinkSettings};
use modemftp::logger::NoopLogger;
use modemftp::naming::unique_name;
use modemftp::serial::SerialDevice;
use modemftp::storage::{LocalFile, Storage};

pub const SERVER_IP: &str = "10.0.0.2";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tag {
    Module,
    Control,
    Data,
}

/// What the FTP server wants sent back
enum Action {
    Reply(String),
    Data(Vec<u8>),
    CloseData,
    CloseControl,
}

pub struct FakeFtp {
    pub banner: Vec<String>,
    /// user → password; `anonymous` takes any password
    pub users: BTreeMap<String, String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: BTreeSet<String>,
    pub cwd: String,
    pub pasv_reply: String,
    pub size_supported: bool,
    /// RETR sends at most this many bytes, then goes quiet
    pub stall_after: Option<usize>,
    pub list_denied: bool,
    /// NOOP goes unanswered (server dropped us)
    pub noop_silent: bool,
    /// Code USER is answered with: 331 asks for PASS, 230 lets the user
    /// straight in, 530 turns them away
    pub user_code: u16,
    pending_user: Option<String>,
}

impl Default for FakeFtp {
    fn default() -> Self {
        let mut users = BTreeMap::new();
        users.insert("bob".to_string(), "secret".to_string());
        Self {
            banner: vec!["220 Fake FTP ready".to_string()],
            users,
            files: BTreeMap::new(),
            dirs: ["/".to_string()].into_iter().collect(),
            cwd: "/".to_string(),
            pasv_reply: "227 Entering Passive Mode (10,0,0,2,195,80)".to_string(),
            size_supported: true,
            stall_after: None,
            list_denied: false,
            noop_silent: false,
            user_code: 331,
            pending_user: None,
        }
    }
}

impl FakeFtp {
    pub fn add_dir(&mut self, path: &str) {
        self.dirs.insert(path.to_string());
    }

    pub fn add_file(&mut self, path: &str, bytes: Vec<u8>) {
        self.files.insert(path.to_string(), bytes);
    }

    fn resolve(&self, arg: &str) -> String {
        let mut parts: Vec<&str> = if arg.starts_with('/') {
            Vec::new()
        } else {
            self.cwd.split('/').filter(|p| !p.is_empty()).collect()
        };
        for part in arg.split('/').filter(|p| !p.is_empty()) {
            match part {
                "." => {}
                ".." => {
                    parts.pop();
                }
                p => parts.push(p),
            }
        }
        format!("/{}", parts.join("/"))
    }

    fn children(&self) -> Vec<String> {
        let prefix = if self.cwd == "/" {
            "/".to_string()
        } else {
            format!("{}/", self.cwd)
        };
        let direct = |p: &String| {
            p.strip_prefix(&prefix)
                .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                .map(str::to_string)
        };
        let mut lines = vec![format!("total {}", self.files.len())];
        for name in self.dirs.iter().filter_map(direct) {
            lines.push(format!("drwxr-xr-x    2 ftp      ftp          4096 Jan 01 12:00 {}", name));
        }
        for (path, bytes) in &self.files {
            if let Some(name) = direct(path) {
                lines.push(format!(
                    "-rw-r--r--    1 ftp      ftp      {:>8} Jan 01 12:00 {}",
                    bytes.len(),
                    name
                ));
            }
        }
        lines
    }

    fn handle(&mut self, line: &str, data_open: bool) -> Vec<Action> {
        let (verb, arg) = match line.split_once(' ') {
            Some((v, a)) => (v.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        let reply = |s: &str| vec![Action::Reply(s.to_string())];
        match verb.as_str() {
            "USER" => match self.user_code {
                230 => reply("230 Login successful."),
                530 => reply("530 This FTP server is anonymous only."),
                _ => {
                    self.pending_user = Some(arg);
                    reply("331 Please specify the password.")
                }
            },
            "PASS" => {
                let ok = match self.pending_user.take() {
                    Some(u) if u == "anonymous" => true,
                    Some(u) => self.users.get(&u) == Some(&arg),
                    None => false,
                };
                if ok {
                    reply("230 Login successful.")
                } else {
                    reply("530 Login incorrect.")
                }
            }
            "TYPE" => reply("200 Switching to Binary mode."),
            "PWD" => reply(&format!("257 \"{}\" is the current directory", self.cwd)),
            "CWD" => {
                let target = self.resolve(&arg);
                if self.dirs.contains(&target) {
                    self.cwd = target;
                    reply("250 Directory successfully changed.")
                } else {
                    reply("550 Failed to change directory.")
                }
            }
            "PASV" => reply(&self.pasv_reply.clone()),
            "SIZE" => match self.files.get(&self.resolve(&arg)) {
                Some(bytes) if self.size_supported => reply(&format!("213 {}", bytes.len())),
                _ => reply("550 Could not get file size."),
            },
            "NOOP" if self.noop_silent => Vec::new(),
            "NOOP" => reply("200 NOOP ok."),
            "LIST" if !data_open => reply("425 Use PORT or PASV first."),
            "LIST" if self.list_denied => reply("550 Permission denied."),
            "LIST" => {
                let mut listing = Vec::new();
                for l in self.children() {
                    listing.extend_from_slice(l.as_bytes());
                    listing.extend_from_slice(b"\r\n");
                }
                vec![
                    Action::Reply("150 Here comes the directory listing.".into()),
                    Action::Data(listing),
                    Action::CloseData,
                    Action::Reply("226 Directory send OK.".into()),
                ]
            }
            "RETR" if !data_open => reply("425 Use PORT or PASV first."),
            "RETR" => match self.files.get(&self.resolve(&arg)) {
                None => reply("550 Failed to open file."),
                Some(bytes) => {
                    let mut out = vec![Action::Reply(format!(
                        "150 Opening BINARY mode data connection for {} ({} bytes).",
                        arg,
                        bytes.len()
                    ))];
                    match self.stall_after {
                        Some(n) => out.push(Action::Data(bytes[..n.min(bytes.len())].to_vec())),
                        None => {
                            out.push(Action::Data(bytes.clone()));
                            out.push(Action::CloseData);
                            out.push(Action::Reply("226 Transfer complete.".into()));
                        }
                    }
                    out
                }
            },
            "QUIT" => vec![Action::Reply("221 Goodbye.".into()), Action::CloseControl],
            _ => reply("502 Command not implemented."),
        }
    }
}

/// The module plus the server behind it
pub struct FakeModem {
    out: VecDeque<(Tag, Vec<u8>)>,
    line: Vec<u8>,
    /// (channel, bytes still owed) while a CIPSEND payload is arriving
    payload: Option<(u8, usize, Vec<u8>)>,
    pub alive: bool,
    pub wifi: bool,
    pub refuse_connect: bool,
    control_open: bool,
    data_open: bool,
    pub at_log: Vec<String>,
    pub ftp_log: Vec<String>,
    pub server: FakeFtp,
}

impl Default for FakeModem {
    fn default() -> Self {
        Self {
            out: VecDeque::new(),
            line: Vec::new(),
            payload: None,
            alive: true,
            wifi: true,
            refuse_connect: false,
            control_open: false,
            data_open: false,
            at_log: Vec::new(),
            ftp_log: Vec::new(),
            server: FakeFtp::default(),
        }
    }
}

impl FakeModem {
    pub fn new(server: FakeFtp) -> Self {
        Self {
            server,
            ..Self::default()
        }
    }

    /// Module with no access point joined
    pub fn without_wifi(mut self) -> Self {
        self.wifi = false;
        self
    }

    /// Module that never answers
    pub fn silent(mut self) -> Self {
        self.alive = false;
        self
    }

    /// Every CIPSTART fails
    pub fn refusing_connections(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    fn emit(&mut self, tag: Tag, bytes: Vec<u8>) {
        self.out.push_back((tag, bytes));
    }

    fn module(&mut self, text: &str) {
        self.emit(Tag::Module, format!("\r\n{}\r\n", text).into_bytes());
    }

    /// Unsolicited module line, e.g. `0,CLOSED`
    pub fn inject_line(&mut self, text: &str) {
        self.module(text);
    }

    /// Raw module bytes, no framing added
    pub fn inject_bytes(&mut self, bytes: &[u8]) {
        self.emit(Tag::Module, bytes.to_vec());
    }

    /// Unsolicited control-channel line, e.g. `421 Timeout.`
    pub fn inject_reply(&mut self, text: &str) {
        self.control_reply(text);
    }

    fn control_reply(&mut self, text: &str) {
        let body = format!("{}\r\n", text);
        let mut frame = format!("\r\n+IPD,0,{}:", body.len()).into_bytes();
        frame.extend_from_slice(body.as_bytes());
        self.emit(Tag::Control, frame);
    }

    fn data(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(512) {
            let mut frame = format!("\r\n+IPD,1,{}:", chunk.len()).into_bytes();
            frame.extend_from_slice(chunk);
            self.emit(Tag::Data, frame);
        }
    }

    pub fn sent(&self, command: &str) -> bool {
        self.at_log.iter().any(|c| c == command)
    }

    pub fn received(&self, ftp_command: &str) -> bool {
        self.ftp_log.iter().any(|c| c == ftp_command)
    }

    fn on_line(&mut self, raw: &str) {
        let cmd = raw.trim_start_matches('+').trim().to_string();
        if cmd.is_empty() {
            return;
        }
        self.at_log.push(cmd.clone());
        if !self.alive {
            return;
        }
        if let Some(args) = cmd.strip_prefix("AT+CIPSTART=") {
            self.start(args);
        } else if let Some(ch) = cmd.strip_prefix("AT+CIPCLOSE=") {
            self.close(ch);
        } else if let Some(args) = cmd.strip_prefix("AT+CIPSEND=") {
            self.begin_send(args);
        } else if cmd == "AT+CWJAP?" {
            if self.wifi {
                self.module("+CWJAP:\"HomeNet\",\"aa:bb:cc:dd:ee:ff\",6,-52");
                self.module("OK");
            } else {
                self.module("No AP");
                self.module("OK");
            }
        } else if cmd == "AT+CIFSR" {
            if self.wifi {
                self.module("+CIFSR:STAIP,\"192.168.1.50\"");
            } else {
                self.module("+CIFSR:STAIP,\"0.0.0.0\"");
            }
            self.module("+CIFSR:STAMAC,\"5c:cf:7f:00:11:22\"");
            self.module("OK");
        } else if cmd.starts_with("AT") {
            self.module("OK");
        } else {
            self.module("ERROR");
        }
    }

    fn start(&mut self, args: &str) {
        let channel = args.split(',').next().unwrap_or("");
        if self.refuse_connect || !self.wifi {
            self.module("ERROR");
            self.module(&format!("{},CLOSED", channel));
            return;
        }
        match channel {
            "0" => {
                self.control_open = true;
                self.module("0,CONNECT");
                self.module("OK");
                for line in self.server.banner.clone() {
                    self.control_reply(&line);
                }
            }
            "1" => {
                self.data_open = true;
                self.module("1,CONNECT");
                self.module("OK");
            }
            _ => self.module("ERROR"),
        }
    }

    fn close(&mut self, channel: &str) {
        let open = match channel {
            "0" => std::mem::replace(&mut self.control_open, false),
            "1" => {
                // undelivered payload of a closed socket is gone; a frame
                // already half read still arrives whole
                let mut front = true;
                self.out.retain(|(tag, _)| {
                    let keep = front || *tag != Tag::Data;
                    front = false;
                    keep
                });
                std::mem::replace(&mut self.data_open, false)
            }
            _ => false,
        };
        if open {
            self.module(&format!("{},CLOSED", channel));
            self.module("OK");
        } else {
            self.module("UNLINK");
            self.module("ERROR");
        }
    }

    fn begin_send(&mut self, args: &str) {
        let mut it = args.split(',');
        let channel: u8 = it.next().and_then(|c| c.trim().parse().ok()).unwrap_or(9);
        let len: usize = it.next().and_then(|n| n.trim().parse().ok()).unwrap_or(0);
        let open = match channel {
            0 => self.control_open,
            1 => self.data_open,
            _ => false,
        };
        if !open || len == 0 {
            self.module("link is not valid");
            self.module("ERROR");
            return;
        }
        self.emit(Tag::Module, b"\r\nOK\r\n> ".to_vec());
        self.payload = Some((channel, len, Vec::new()));
    }

    fn on_payload(&mut self, channel: u8, bytes: Vec<u8>) {
        self.module(&format!("Recv {} bytes", bytes.len()));
        self.module("SEND OK");
        if channel != 0 {
            return;
        }
        let text = String::from_utf8_lossy(&bytes);
        let line = text.trim_end_matches(['\r', '\n']).to_string();
        self.ftp_log.push(line.clone());
        for action in self.server.handle(&line, self.data_open) {
            match action {
                Action::Reply(r) => self.control_reply(&r),
                Action::Data(d) => self.data(&d),
                Action::CloseData => {
                    self.data_open = false;
                    self.module("1,CLOSED");
                }
                Action::CloseControl => {
                    self.control_open = false;
                    self.module("0,CLOSED");
                }
            }
        }
    }
}

impl SerialDevice for FakeModem {
    fn ready(&mut self) -> bool {
        while let Some((_, front)) = self.out.front() {
            if !front.is_empty() {
                return true;
            }
            self.out.pop_front();
        }
        false
    }

    fn read(&mut self) -> u8 {
        match self.out.front_mut() {
            Some((_, bytes)) if !bytes.is_empty() => bytes.remove(0),
            _ => 0,
        }
    }

    fn send(&mut self, byte: u8) {
        if let Some((channel, owed, mut buf)) = self.payload.take() {
            buf.push(byte);
            if buf.len() >= owed {
                self.on_payload(channel, buf);
            } else {
                self.payload = Some((channel, owed, buf));
            }
            return;
        }
        if byte == b'\n' {
            let line = String::from_utf8_lossy(&self.line).to_string();
            self.line.clear();
            self.on_line(&line);
        } else if byte != b'\r' {
            self.line.push(byte);
        }
    }
}

/// Console driven by a script instead of a keyboard
#[derive(Default)]
pub struct ScriptConsole {
    pub lines: Vec<(String, Style)>,
    /// Answers for `confirm`, in order; an empty queue answers no
    pub answers: VecDeque<bool>,
    /// Raise cancel once a printed line contains this text
    pub cancel_on: Option<String>,
    /// Raise cancel on the first progress report
    pub cancel_on_progress: bool,
    /// Key polls that go unanswered before each simulated key press
    pub key_delay: usize,
    key_polls: usize,
    cancelled: bool,
    pub progress: Vec<(String, u64, Option<u64>)>,
    pub bars_finished: usize,
    pub statuses: Vec<StatusSnapshot>,
}

impl ScriptConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn printed(&self, needle: &str) -> bool {
        self.lines.iter().any(|(l, _)| l.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines.iter().filter(|(l, _)| l.contains(needle)).count()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Console for ScriptConsole {
    fn print_line(&mut self, text: &str, style: Style) {
        if self.cancel_on.as_deref().map_or(false, |c| text.contains(c)) {
            self.cancelled = true;
        }
        self.lines.push((text.to_string(), style));
    }

    fn report_progress(&mut self, name: &str, received: u64, total: Option<u64>) {
        if self.cancel_on_progress {
            self.cancelled = true;
        }
        self.progress.push((name.to_string(), received, total));
    }

    fn finish_progress(&mut self) {
        self.bars_finished += 1;
    }

    fn report_status(&mut self, status: &StatusSnapshot) {
        self.statuses.push(status.clone());
    }

    fn cancel_requested(&mut self) -> bool {
        self.cancelled
    }

    fn key_pressed(&mut self) -> bool {
        if self.key_polls >= self.key_delay {
            self.key_polls = 0;
            true
        } else {
            self.key_polls += 1;
            false
        }
    }

    fn confirm(&mut self, question: &str) -> bool {
        self.lines.push((question.to_string(), Style::Error));
        self.answers.pop_front().unwrap_or(false)
    }

    fn begin_operation(&mut self) {
        self.cancelled = false;
    }
}

/// Storage that keeps every download in memory
#[derive(Clone, Default)]
pub struct MemStorage {
    files: Rc<RefCell<BTreeMap<String, Vec<u8>>>>,
}

impl MemStorage {
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.files.borrow().keys().cloned().collect()
    }
}

struct MemFile {
    name: String,
    files: Rc<RefCell<BTreeMap<String, Vec<u8>>>>,
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.files
            .borrow_mut()
            .entry(self.name.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LocalFile for MemFile {
    fn location(&self) -> String {
        format!("mem:{}", self.name)
    }
}

impl Storage for MemStorage {
    fn create(&mut self, remote: &str) -> anyhow::Result<Box<dyn LocalFile>> {
        let name = {
            let files = self.files.borrow();
            unique_name(remote, false, |n| files.contains_key(n))
        };
        self.files.borrow_mut().insert(name.clone(), Vec::new());
        Ok(Box::new(MemFile {
            name,
            files: self.files.clone(),
        }))
    }
}

pub type TestEngine = Engine<FakeModem, ManualClock>;

pub fn engine_with(modem: FakeModem, settings: Settings) -> TestEngine {
    let link = Link::new(
        modem,
        ManualClock::new(),
        LinkSettings::default(),
        Arc::new(NoopLogger),
    );
    Engine::new(link, settings)
}

pub fn engine(modem: FakeModem) -> TestEngine {
    engine_with(modem, Settings::default())
}

/// Server with a small tree: /pub, /pub/games, a few files
pub fn sample_server() -> FakeFtp {
    let mut server = FakeFtp::default();
    server.add_dir("/pub");
    server.add_dir("/pub/games");
    server.add_dir("/my stuff");
    server.add_file("/readme.txt", b"hello from the server\n".to_vec());
    server.add_file("/pub/manic.tap", pattern(3000));
    server.add_file("/pub/jetpac.tap", pattern(1500));
    server.add_file("/pub/empty.bin", Vec::new());
    server.add_file("/pub/games/GAME LIST.TXT", pattern(4096));
    server
}

/// Deterministic, non-repeating-looking payload
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + i / 7) as u8).collect()
}

/// Initialised, connected to SERVER_IP and logged in anonymously
pub fn logged_in(modem: FakeModem, settings: Settings) -> (TestEngine, ScriptConsole) {
    let mut engine = engine_with(modem, settings);
    let mut ui = ScriptConsole::new();
    engine.initialize(&mut ui).unwrap();
    engine.connect(&mut ui, SERVER_IP, 21).unwrap();
    engine.login(&mut ui, "anonymous", "guest@example.com").unwrap();
    ui.clear();
    (engine, ui)
}
