use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    fn arrow(self) -> &'static str {
        match self {
            Direction::Out => ">>",
            Direction::In => "<<",
        }
    }
}

pub trait Logger: Send + Sync {
    /// Raw AT/FTP traffic; only called while tracing is enabled
    fn wire(&self, _dir: Direction, _text: &str) {}
    fn session(&self, _event: &str, _detail: &str) {}
    fn transfer_start(&self, _name: &str, _expected: Option<u64>) {}
    fn transfer_done(&self, _name: &str, _bytes: u64, _seconds: f64) {}
    fn warn(&self, _context: &str, _msg: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn wire(&self, dir: Direction, text: &str) {
        self.line(&format!("WIRE {} {}", dir.arrow(), text.escape_debug()));
    }
    fn session(&self, event: &str, detail: &str) {
        self.line(&format!("SESSION event={} {}", event, detail));
    }
    fn transfer_start(&self, name: &str, expected: Option<u64>) {
        match expected {
            Some(n) => self.line(&format!("GET name={} expected={}", name, n)),
            None => self.line(&format!("GET name={} expected=unknown", name)),
        }
    }
    fn transfer_done(&self, name: &str, bytes: u64, seconds: f64) {
        self.line(&format!("DONE name={name} bytes={bytes} seconds={seconds:.3}"));
    }
    fn warn(&self, context: &str, msg: &str) {
        self.line(&format!("WARN ctx={} msg={}", context, msg));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
}
