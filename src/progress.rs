//! Terminal front end: styled output, a download bar, and key polling
//!
//! Output scrolls above the progress bar the way cargo does it. The
//! terminal stays in raw mode for the console's lifetime: Esc and single
//! key presses reach us without Enter, and command lines are edited here
//! so the idle monitor can run between key presses.

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    style::{Color, Stylize},
    terminal::{self, ClearType},
    ExecutableCommand,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::console::{Console, Input, Prompt, StatusSnapshot, Style};

enum Answer {
    Yes,
    No,
}

pub struct TerminalConsole {
    bar: Option<ProgressBar>,
    bar_name: String,
    cancel: Arc<AtomicBool>,
    /// Set by the Ctrl-C handler while an operation runs
    busy: Arc<AtomicBool>,
    key_waiting: bool,
    line: String,
}

impl TerminalConsole {
    pub fn new(cancel: Arc<AtomicBool>, busy: Arc<AtomicBool>) -> Self {
        let _ = terminal::enable_raw_mode();
        Self {
            bar: None,
            bar_name: String::new(),
            cancel,
            busy,
            key_waiting: false,
            line: String::new(),
        }
    }

    /// Drain pending terminal events without blocking
    fn poll_keys(&mut self) {
        while let Ok(true) = event::poll(Duration::ZERO) {
            match event::read() {
                Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => self.on_key(key),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        let ctrl_c = key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL);
        if key.code == KeyCode::Esc || ctrl_c {
            self.cancel.store(true, Ordering::SeqCst);
        } else {
            self.key_waiting = true;
        }
    }

    fn read_answer(&mut self) -> Answer {
        loop {
            match event::read() {
                Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => match key.code {
                    KeyCode::Char('y' | 'Y') | KeyCode::Enter => return Answer::Yes,
                    KeyCode::Char('n' | 'N') | KeyCode::Esc => return Answer::No,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return Answer::No
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(_) => return Answer::No,
            }
        }
    }

    fn styled(text: &str, style: Style) -> String {
        match style {
            Style::Normal => text.to_string(),
            Style::Info => text.with(Color::Cyan).to_string(),
            Style::Success => text.with(Color::Green).bold().to_string(),
            Style::Warning => text.with(Color::Yellow).to_string(),
            Style::Error => text.with(Color::Red).bold().to_string(),
            Style::Header => text.with(Color::Cyan).bold().to_string(),
            Style::Entry => text.with(Color::White).to_string(),
            Style::Prompt => text.with(Color::Magenta).bold().to_string(),
        }
    }

    fn write_raw(text: &str) {
        let mut out = io::stdout();
        let _ = write!(out, "{}", text);
        let _ = out.flush();
    }

    fn new_bar(total: Option<u64>) -> ProgressBar {
        match total {
            Some(n) => {
                let bar = ProgressBar::new(n);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=> "),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {msg} {bytes} {bytes_per_sec}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
                );
                bar
            }
        }
    }
}

impl Console for TerminalConsole {
    fn print_line(&mut self, text: &str, style: Style) {
        // raw mode does not translate \n
        let line = format!("{}\r\n", Self::styled(text, style));
        match &self.bar {
            Some(bar) => bar.suspend(|| Self::write_raw(&line)),
            None => Self::write_raw(&line),
        }
    }

    fn report_progress(&mut self, name: &str, received: u64, total: Option<u64>) {
        if self.bar.is_none() || self.bar_name != name {
            if let Some(old) = self.bar.take() {
                old.finish_and_clear();
            }
            let bar = Self::new_bar(total);
            bar.set_message(name.to_string());
            self.bar_name = name.to_string();
            self.bar = Some(bar);
        }
        if let Some(bar) = &self.bar {
            if let Some(n) = total {
                bar.set_length(n.max(received));
            }
            bar.set_position(received);
        }
    }

    fn finish_progress(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.bar_name.clear();
    }

    fn report_status(&mut self, status: &StatusSnapshot) {
        let mut title = format!("modemftp - {}", status.state.label());
        if !status.host.is_empty() {
            title.push_str(&format!(" {}", status.host));
            if !status.path.is_empty() {
                title.push_str(&format!(":{}", status.path));
            }
        }
        let _ = io::stdout().execute(terminal::SetTitle(title));
    }

    fn cancel_requested(&mut self) -> bool {
        self.poll_keys();
        self.cancel.load(Ordering::SeqCst)
    }

    fn key_pressed(&mut self) -> bool {
        self.poll_keys();
        std::mem::take(&mut self.key_waiting)
    }

    fn confirm(&mut self, question: &str) -> bool {
        self.print_line(question, Style::Error);
        match self.read_answer() {
            Answer::Yes => true,
            Answer::No => {
                self.print_line("Aborted", Style::Normal);
                false
            }
        }
    }

    fn begin_operation(&mut self) {
        self.cancel.store(false, Ordering::SeqCst);
        self.key_waiting = false;
        self.busy.store(true, Ordering::SeqCst);
    }

    fn end_operation(&mut self) {
        self.finish_progress();
        self.busy.store(false, Ordering::SeqCst);
    }

    fn clear_screen(&mut self) {
        let mut out = io::stdout();
        let _ = out.execute(terminal::Clear(ClearType::All));
        let _ = out.execute(cursor::MoveTo(0, 0));
    }
}

impl Prompt for TerminalConsole {
    fn show_prompt(&mut self, prompt: &str) {
        Self::write_raw(&format!("{}{}", prompt.with(Color::Green).bold(), self.line));
    }

    fn poll_input(&mut self, wait: Duration) -> Input {
        match event::poll(wait) {
            Ok(true) => {}
            Ok(false) => return Input::Pending,
            Err(_) => return Input::Closed,
        }
        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => key,
            Ok(_) => return Input::Pending,
            Err(_) => return Input::Closed,
        };
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Enter => {
                Self::write_raw("\r\n");
                Input::Line(std::mem::take(&mut self.line))
            }
            KeyCode::Char('d') if ctrl && self.line.is_empty() => Input::Closed,
            KeyCode::Char('c') if ctrl => {
                self.line.clear();
                Self::write_raw("^C\r\n");
                Input::Line(String::new())
            }
            KeyCode::Esc => {
                // wipe the typed text
                let n = self.line.chars().count();
                Self::write_raw(&"\x08 \x08".repeat(n));
                self.line.clear();
                Input::Pending
            }
            KeyCode::Backspace => {
                if self.line.pop().is_some() {
                    Self::write_raw("\x08 \x08");
                }
                Input::Pending
            }
            KeyCode::Char(c) if !ctrl => {
                self.line.push(c);
                Self::write_raw(c.encode_utf8(&mut [0u8; 4]));
                Input::Pending
            }
            _ => Input::Pending,
        }
    }
}

impl Drop for TerminalConsole {
    fn drop(&mut self) {
        self.finish_progress();
        let _ = terminal::disable_raw_mode();
        let _ = io::stdout().execute(cursor::Show);
    }
}
