//! Interactive command shell: parses one line, dispatches it to the engine

use std::path::PathBuf;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::Config;
use crate::console::{Console, Input, Prompt, Style};
use crate::error::FtpError;
use crate::ftp::{format_size, Engine, ListFilter, SessionState};
use crate::log::{TransferLog, TransferLogEntry};
use crate::serial::SerialDevice;
use crate::storage::FsStorage;

pub const DEFAULT_FTP_PORT: u16 = 21;

const HELP: &[&str] = &[
    "OPEN host[:port]         connect to an FTP server",
    "USER name [pass]         log in",
    "PWD                      show the remote directory",
    "CD path                  change directory (%HH and \\xHH escapes)",
    "LS [-d|-f] [>size] [pat] list the remote directory",
    "GET file [file ...]      download files",
    "QUIT                     close the FTP session",
    "!CONNECT host[:port][/path] user [pass]",
    "!SEARCH a [b [c]]        filtered listing",
    "!STATUS  !INIT  !DEBUG  !CLS  !ABOUT",
    "EXIT                     leave",
];

/// `host[:port][/path]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
}

impl Target {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let spec = spec.strip_prefix("ftp://").unwrap_or(spec);
        let (hostport, path) = match spec.find('/') {
            Some(i) => (&spec[..i], Some(spec[i..].to_string())),
            None => (spec, None),
        };
        let (host, port) = match hostport.rsplit_once(':') {
            Some((h, p)) => {
                let port = p
                    .parse::<u16>()
                    .ok()
                    .filter(|&p| p != 0)
                    .ok_or_else(|| format!("Bad port: {}", p))?;
                (h, port)
            }
            None => (hostport, DEFAULT_FTP_PORT),
        };
        if host.is_empty() {
            return Err("Missing host".to_string());
        }
        Ok(Self {
            host: host.to_string(),
            port,
            path: path.filter(|p| p != "/"),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Empty,
    Open(Target),
    User { name: String, pass: Option<String> },
    Pwd,
    Cd(String),
    Ls(Vec<String>),
    Get(Vec<String>),
    Quit,
    Help,
    Connect {
        target: Target,
        user: String,
        pass: Option<String>,
    },
    Search(Vec<String>),
    Status,
    Init,
    Debug,
    Cls,
    About,
    Exit,
}

/// Split on whitespace; double quotes group words
pub fn tokenize(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut started = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                started = true;
            }
            c if c.is_whitespace() && !quoted => {
                if started {
                    out.push(std::mem::take(&mut cur));
                    started = false;
                }
            }
            c => {
                cur.push(c);
                started = true;
            }
        }
    }
    if started {
        out.push(cur);
    }
    out
}

/// Everything after the verb, quotes stripped, inner spacing kept
fn rest_of_line(line: &str) -> String {
    let trimmed = line.trim_start();
    let rest = trimmed
        .find(char::is_whitespace)
        .map(|i| trimmed[i..].trim())
        .unwrap_or("");
    rest.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(rest)
        .to_string()
}

/// `!CONNECT` from already split words (command-line target)
pub fn connect_command(words: &[String]) -> Result<Command, String> {
    match words {
        [target] => Ok(Command::Connect {
            target: Target::parse(target)?,
            user: "anonymous".into(),
            pass: None,
        }),
        [target, user] => Ok(Command::Connect {
            target: Target::parse(target)?,
            user: user.clone(),
            pass: None,
        }),
        [target, user, pass] => Ok(Command::Connect {
            target: Target::parse(target)?,
            user: user.clone(),
            pass: Some(pass.clone()),
        }),
        _ => Err("Usage: !CONNECT host[:port][/path] user [pass]".into()),
    }
}

pub fn parse_command(line: &str) -> Result<Command, String> {
    let words = tokenize(line);
    let Some((verb, args)) = words.split_first() else {
        return Ok(Command::Empty);
    };
    let cmd = match verb.to_ascii_uppercase().as_str() {
        "OPEN" => match args {
            [target] => Command::Open(Target::parse(target)?),
            _ => return Err("Usage: OPEN host[:port]".into()),
        },
        "USER" => match args {
            [] => Command::User {
                name: "anonymous".into(),
                pass: None,
            },
            [name] => Command::User {
                name: name.clone(),
                pass: None,
            },
            [name, pass] => Command::User {
                name: name.clone(),
                pass: Some(pass.clone()),
            },
            _ => return Err("Usage: USER name [pass]".into()),
        },
        "PWD" => Command::Pwd,
        "CD" | "CWD" => {
            let path = rest_of_line(line);
            if path.is_empty() {
                return Err("Usage: CD path".into());
            }
            Command::Cd(path)
        }
        "LS" | "DIR" | "LIST" => Command::Ls(args.to_vec()),
        "GET" => {
            if args.is_empty() {
                return Err("Usage: GET file [file ...]".into());
            }
            Command::Get(args.to_vec())
        }
        "QUIT" | "BYE" => Command::Quit,
        "HELP" | "?" => Command::Help,
        "!CONNECT" => connect_command(args)?,
        "!SEARCH" => {
            if args.is_empty() || args.len() > 3 {
                return Err("Usage: !SEARCH a [b [c]]".into());
            }
            Command::Search(args.to_vec())
        }
        "!STATUS" => Command::Status,
        "!INIT" => Command::Init,
        "!DEBUG" => Command::Debug,
        "!CLS" | "CLS" => Command::Cls,
        "!ABOUT" => Command::About,
        "EXIT" => Command::Exit,
        other => return Err(format!("Unknown command: {}. Type HELP.", other)),
    };
    Ok(cmd)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    Continue,
    Exit,
}

pub struct Shell<D, K, C> {
    engine: Engine<D, K>,
    ui: C,
    config: Config,
    config_path: Option<PathBuf>,
    storage: FsStorage,
    history: Option<TransferLog>,
}

impl<D: SerialDevice, K: Clock, C: Console> Shell<D, K, C> {
    pub fn new(engine: Engine<D, K>, ui: C, config: Config, config_path: Option<PathBuf>) -> Self {
        let storage = FsStorage::new(&config.transfer.download_dir, config.transfer.short_names);
        let history = config.history_file.as_deref().map(TransferLog::new);
        Self {
            engine,
            ui,
            config,
            config_path,
            storage,
            history,
        }
    }

    pub fn engine(&self) -> &Engine<D, K> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<D, K> {
        &mut self.engine
    }

    pub fn ui(&self) -> &C {
        &self.ui
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Background monitor between commands
    pub fn idle(&mut self) -> bool {
        self.engine.poll_idle(&mut self.ui)
    }

    /// Start-up module initialisation
    pub fn init(&mut self) {
        self.ui.begin_operation();
        if let Err(e) = self.engine.initialize(&mut self.ui) {
            self.ui.print_line(&e.to_string(), Style::Error);
        }
        self.ui.end_operation();
    }

    pub fn execute(&mut self, line: &str) -> Next {
        let cmd = match parse_command(line) {
            Ok(cmd) => cmd,
            Err(usage) => {
                self.ui.print_line(&usage, Style::Error);
                return Next::Continue;
            }
        };
        self.run_command(cmd)
    }

    pub fn run_command(&mut self, cmd: Command) -> Next {
        self.ui.begin_operation();
        let next = self.dispatch(cmd);
        self.ui.end_operation();
        next
    }

    fn dispatch(&mut self, cmd: Command) -> Next {
        let ui = &mut self.ui;
        let r: Result<(), FtpError> = match cmd {
            Command::Empty => Ok(()),
            Command::Exit => return Next::Exit,
            Command::Help => {
                for line in HELP {
                    ui.print_line(line, Style::Info);
                }
                Ok(())
            }
            Command::About => {
                ui.print_line(
                    concat!("modemftp ", env!("CARGO_PKG_VERSION")),
                    Style::Header,
                );
                ui.print_line(
                    "FTP client for AT-command WiFi modules on a serial line",
                    Style::Normal,
                );
                Ok(())
            }
            Command::Cls => {
                ui.clear_screen();
                Ok(())
            }
            Command::Debug => {
                let on = !self.engine.link().tracing();
                self.engine.set_trace(on);
                ui.print_line(
                    if on { "Debug trace ON" } else { "Debug trace OFF" },
                    Style::Info,
                );
                Ok(())
            }
            Command::Status => {
                self.show_status();
                Ok(())
            }
            Command::Init => self.engine.reinitialize(ui).map(|_| ()),
            Command::Open(target) => self.open(&target),
            Command::User { name, pass } => {
                let pass = pass.unwrap_or_else(|| self.config.anonymous_password.clone());
                self.engine.login(ui, &name, &pass)
            }
            Command::Pwd => self.engine.pwd(ui).map(|_| ()),
            Command::Cd(path) => self.engine.change_dir(ui, &path).map(|_| ()),
            Command::Ls(args) | Command::Search(args) => {
                let filter = ListFilter::from_args(&args);
                self.engine.list(ui, &filter).map(|_| ())
            }
            Command::Get(names) => self.get(&names),
            Command::Quit => self.engine.quit(ui).map(|_| ()),
            Command::Connect { target, user, pass } => self.connect(&target, &user, pass),
        };
        if let Err(e) = r {
            self.ui.print_line(&e.to_string(), Style::Error);
        }
        Next::Continue
    }

    fn open(&mut self, target: &Target) -> Result<(), FtpError> {
        self.engine.connect(&mut self.ui, &target.host, target.port)?;
        self.remember_host(&target.host, target.port);
        Ok(())
    }

    /// OPEN + USER + CD in one go
    fn connect(&mut self, target: &Target, user: &str, pass: Option<String>) -> Result<(), FtpError> {
        self.open(target)?;
        let pass = pass.unwrap_or_else(|| self.config.anonymous_password.clone());
        self.engine.login(&mut self.ui, user, &pass)?;
        if let Some(path) = &target.path {
            self.engine.change_dir(&mut self.ui, path)?;
        }
        Ok(())
    }

    fn remember_host(&mut self, host: &str, port: u16) {
        self.config.add_recent_host(host, port);
        if let Some(path) = &self.config_path {
            if let Err(e) = self.config.save(path) {
                self.engine.link().logger().warn("config", &format!("{:#}", e));
            }
        }
    }

    fn get(&mut self, names: &[String]) -> Result<(), FtpError> {
        let summary = self
            .engine
            .download_batch(&mut self.ui, &mut self.storage, names)?;
        if let Some(history) = &self.history {
            let host = &self.engine.session().host;
            for (remote, item) in &summary.items {
                let entry = TransferLogEntry::from_item(host, remote, item);
                if let Err(e) = history.add_entry(&entry) {
                    self.engine.link().logger().warn("history", &format!("{:#}", e));
                }
            }
        }
        Ok(())
    }

    fn show_status(&mut self) {
        let s = self.engine.session();
        let stats = self.engine.link().stats();
        let mut lines = vec![format!("State: {}", s.state.label())];
        if let Some(ip) = s.station_ip {
            lines.push(format!("Local IP: {}", ip));
        }
        if s.state >= SessionState::FtpConnected {
            lines.push(format!("Host: {}:{}", s.host, s.port));
        }
        if s.state == SessionState::LoggedIn {
            lines.push(format!("User: {}", s.user));
            lines.push(format!("Path: {}", s.path));
        }
        lines.push(format!(
            "Link: {} in, {} out",
            format_size(stats.bytes_in),
            format_size(stats.bytes_out)
        ));
        lines.push(format!(
            "Overflows: ring {}, line {}, reply {}, bad frames {}",
            stats.ring_dropped, stats.line_overflows, stats.reply_overflows, stats.malformed_headers
        ));
        lines.push(format!(
            "Trace: {}",
            if self.engine.link().tracing() { "on" } else { "off" }
        ));
        for line in &lines {
            self.ui.print_line(line, Style::Info);
        }
    }
}

impl<D: SerialDevice, K: Clock, C: Console + Prompt> Shell<D, K, C> {
    /// Prompt loop. The idle monitor runs whenever no key arrives for
    /// `tick`.
    pub fn run(&mut self, tick: Duration) {
        loop {
            let prompt = self.prompt();
            self.ui.show_prompt(&prompt);
            let line = loop {
                match self.ui.poll_input(tick) {
                    Input::Line(line) => break Some(line),
                    Input::Closed => break None,
                    Input::Pending => {
                        if self.idle() {
                            self.ui.show_prompt(&prompt);
                        }
                    }
                }
            };
            let Some(line) = line else {
                return;
            };
            if self.execute(&line) == Next::Exit {
                return;
            }
        }
    }

    fn prompt(&self) -> String {
        let s = self.engine.session();
        match s.state {
            SessionState::LoggedIn => format!("{}:{}> ", s.host, s.path),
            SessionState::FtpConnected => format!("{}> ", s.host),
            _ => "ftp> ".to_string(),
        }
    }
}
