//! What the engine needs from the user interface

use crate::ftp::SessionState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Style {
    Normal,
    Info,
    Success,
    Warning,
    Error,
    Header,
    Entry,
    Prompt,
}

/// Advisory session fields for a status line
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub host: String,
    pub user: String,
    pub path: String,
    pub station_ip: Option<String>,
}

pub trait Console {
    fn print_line(&mut self, text: &str, style: Style);

    /// `total` is `None` when the server did not report a size
    fn report_progress(&mut self, name: &str, received: u64, total: Option<u64>);

    fn finish_progress(&mut self) {}

    fn report_status(&mut self, _status: &StatusSnapshot) {}

    /// Latest pending cancel request. Sampled once per tick.
    fn cancel_requested(&mut self) -> bool;

    /// True if a key was pressed since the last call (resumes a paused listing)
    fn key_pressed(&mut self) -> bool;

    /// Blocking yes/no question
    fn confirm(&mut self, question: &str) -> bool;

    /// A user command starts: forget stale cancel requests and start
    /// watching the keyboard
    fn begin_operation(&mut self) {}

    fn end_operation(&mut self) {}

    fn clear_screen(&mut self) {}
}

/// Forwards everything except the cancel signal, for steps that must run
/// to completion once started
pub struct Uncancellable<'a>(pub &'a mut dyn Console);

impl Console for Uncancellable<'_> {
    fn print_line(&mut self, text: &str, style: Style) {
        self.0.print_line(text, style);
    }

    fn report_progress(&mut self, name: &str, received: u64, total: Option<u64>) {
        self.0.report_progress(name, received, total);
    }

    fn finish_progress(&mut self) {
        self.0.finish_progress();
    }

    fn report_status(&mut self, status: &StatusSnapshot) {
        self.0.report_status(status);
    }

    fn cancel_requested(&mut self) -> bool {
        false
    }

    fn key_pressed(&mut self) -> bool {
        self.0.key_pressed()
    }

    fn confirm(&mut self, question: &str) -> bool {
        self.0.confirm(question)
    }
}

/// Result of polling for a command line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Nothing complete yet; the caller may do idle work
    Pending,
    /// End of input
    Closed,
}

/// Interactive command-line source, polled so idle work can interleave
pub trait Prompt {
    fn show_prompt(&mut self, prompt: &str);

    /// Wait at most `wait` for the user to finish a line
    fn poll_input(&mut self, wait: std::time::Duration) -> Input;
}
