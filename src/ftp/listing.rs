//! Directory listing: `ls -l` line parsing, filters, and the paged printer

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::buffer::DrainMode;
use crate::clock::Clock;
use crate::console::{Console, Style};
use crate::demux::LineAssembler;
use crate::error::Result;
use crate::link::Link;
use crate::serial::SerialDevice;

use super::transfer::DataSink;

pub const LIST_HEADER: &str = "T      Size Filename";
pub const MORE_PROMPT: &str = "-- More? EDIT=stop --";
/// Displayed names longer than this are cut and marked with `..`
pub const NAME_WIDTH: usize = 38;
const LIST_LINE_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    Link,
    File,
    Other(char),
}

impl EntryKind {
    fn from_marker(c: char) -> Self {
        match c {
            'd' => EntryKind::Dir,
            'l' => EntryKind::Link,
            '-' => EntryKind::File,
            other => EntryKind::Other(other),
        }
    }

    pub fn marker(self) -> char {
        match self {
            EntryKind::Dir => 'd',
            EntryKind::Link => 'l',
            EntryKind::File => '-',
            EntryKind::Other(c) => c,
        }
    }

    /// Links are treated as directories: that is what users cd into
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Dir | EntryKind::Link)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    pub kind: EntryKind,
    pub size: u64,
    pub name: String,
}

/// Skip `n` whitespace-delimited fields; the rest of the line follows
fn skip_fields(mut s: &str, n: usize) -> Option<&str> {
    for _ in 0..n {
        s = s.trim_start();
        let end = s.find(char::is_whitespace)?;
        s = &s[end..];
    }
    let rest = s.trim_start();
    (!rest.is_empty()).then_some(rest)
}

/// Parse one Unix `ls -l` line: type, links, owner, group, size,
/// three date fields, then the name (which may contain spaces)
pub fn parse_list_line(line: &str) -> Option<ListEntry> {
    let line = line.trim();
    if line.len() < 10 || line.get(..3).map_or(false, |p| p.eq_ignore_ascii_case("tot")) {
        return None;
    }
    let kind = EntryKind::from_marker(line.chars().next()?);
    let after_group = skip_fields(line, 4)?;
    let size = after_group
        .split_whitespace()
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .unwrap_or(0);
    let name = skip_fields(after_group, 4)?;
    Some(ListEntry {
        kind,
        size,
        name: name.to_string(),
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TypeFilter {
    #[default]
    All,
    Dirs,
    Files,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub kind: TypeFilter,
    /// Entries smaller than this are hidden; 0 shows everything
    pub min_size: u64,
    /// Case-insensitive substring
    pub pattern: Option<String>,
}

impl ListFilter {
    /// `-d`/`dirs`, `-f`/`files`, `>N[k|m]`; any other word is the pattern
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut filter = ListFilter::default();
        for arg in args.iter().map(AsRef::as_ref).filter(|a| !a.is_empty()) {
            match arg {
                "-d" | "-D" | "dirs" => filter.kind = TypeFilter::Dirs,
                "-f" | "-F" | "files" => filter.kind = TypeFilter::Files,
                _ if arg.starts_with('>') => filter.min_size = parse_size_arg(arg),
                _ => filter.pattern = Some(arg.to_string()),
            }
        }
        filter
    }

    pub fn matches(&self, entry: &ListEntry) -> bool {
        let kind_ok = match self.kind {
            TypeFilter::All => true,
            TypeFilter::Dirs => entry.kind.is_dir(),
            TypeFilter::Files => !entry.kind.is_dir(),
        };
        kind_ok
            && entry.size >= self.min_size
            && self.pattern.as_deref().map_or(true, |p| {
                entry.name.to_lowercase().contains(&p.to_lowercase())
            })
    }

    pub fn is_search(&self) -> bool {
        self.pattern.is_some()
    }

    /// Status line announcing what is about to be listed
    pub fn describe(&self) -> String {
        let mut s = if self.is_search() {
            "Searching".to_string()
        } else {
            match self.kind {
                TypeFilter::Dirs => "Retrieving directories".to_string(),
                TypeFilter::Files => "Retrieving files".to_string(),
                TypeFilter::All => "Retrieving directory contents".to_string(),
            }
        };
        if let Some(p) = &self.pattern {
            s.push_str(&format!(" '{}'", p));
        }
        if self.min_size > 0 {
            s.push_str(&format!(" >{}B", self.min_size));
        }
        s.push_str("...");
        s
    }
}

/// `>10k` → 10240; digits then an optional k/m multiplier
pub fn parse_size_arg(arg: &str) -> u64 {
    let s = arg.strip_prefix('>').unwrap_or(arg);
    let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
    let value: u64 = digits.parse().unwrap_or(0);
    match s[digits.len()..].chars().next() {
        Some('k' | 'K') => value.saturating_mul(1024),
        Some('m' | 'M') => value.saturating_mul(1024 * 1024),
        _ => value,
    }
}

/// `512B`, `48KB`, `1.5MB`
pub fn format_size(bytes: u64) -> String {
    const MB: u64 = 1024 * 1024;
    if bytes >= MB {
        format!("{}.{}MB", bytes / MB, (bytes % MB) * 10 / MB)
    } else if bytes >= 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{}B", bytes)
    }
}

/// Cut by terminal columns, so wide characters count double
pub fn display_name(name: &str) -> String {
    if name.width() > NAME_WIDTH {
        let mut cut = String::new();
        let mut cols = 0;
        for c in name.chars() {
            cols += c.width().unwrap_or(0);
            if cols > NAME_WIDTH - 2 {
                break;
            }
            cut.push(c);
        }
        cut.push_str("..");
        cut
    } else {
        name.to_string()
    }
}

pub fn format_row(entry: &ListEntry) -> String {
    format!(
        "{} {:>9} {}",
        entry.kind.marker(),
        format_size(entry.size),
        display_name(&entry.name)
    )
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListSummary {
    /// Entries that passed the filter and were printed
    pub shown: usize,
    pub search: bool,
    /// The user stopped the listing at a page prompt
    pub stopped: bool,
}

impl ListSummary {
    pub fn footer(&self) -> String {
        format!(
            "({} {})",
            self.shown,
            if self.search { "matches" } else { "items" }
        )
    }
}

/// Turns channel-1 bytes into printed, filtered, paginated rows
pub(super) struct ListingSink<'f> {
    filter: &'f ListFilter,
    lines: LineAssembler,
    page_lines: usize,
    on_page: usize,
    header_shown: bool,
    pause_risk: u32,
    pub(super) shown: usize,
    /// The user sat at a page prompt long enough for the server to time out
    pub(super) needs_probe: bool,
}

impl<'f> ListingSink<'f> {
    pub(super) fn new(filter: &'f ListFilter, page_lines: usize, pause_risk: u32) -> Self {
        Self {
            filter,
            lines: LineAssembler::new(LIST_LINE_CAPACITY),
            page_lines,
            on_page: 0,
            header_shown: false,
            pause_risk,
            shown: 0,
            needs_probe: false,
        }
    }

    fn emit<D: SerialDevice, K: Clock>(
        &mut self,
        link: &mut Link<D, K>,
        ui: &mut dyn Console,
        line: &str,
    ) -> bool {
        let Some(entry) = parse_list_line(line) else {
            return true;
        };
        if !self.filter.matches(&entry) {
            return true;
        }
        if !self.header_shown {
            ui.print_line(LIST_HEADER, Style::Header);
            ui.print_line(&"-".repeat(22), Style::Header);
            self.header_shown = true;
            self.on_page = 1;
        }
        let style = if entry.kind.is_dir() {
            Style::Info
        } else {
            Style::Entry
        };
        ui.print_line(&format_row(&entry), style);
        self.shown += 1;
        self.on_page += 1;
        if self.page_lines > 0 && self.on_page >= self.page_lines {
            self.on_page = 0;
            return self.pause(link, ui);
        }
        true
    }

    /// Wait for a key while the ring keeps draining at the responsive rate.
    /// Returns false when the user chose to stop.
    fn pause<D: SerialDevice, K: Clock>(&mut self, link: &mut Link<D, K>, ui: &mut dyn Console) -> bool {
        ui.print_line(MORE_PROMPT, Style::Prompt);
        let previous = link.set_drain(DrainMode::Responsive);
        let mut paused = 0u32;
        let resume = loop {
            link.tick();
            link.service();
            if ui.cancel_requested() {
                break false;
            }
            if ui.key_pressed() {
                break true;
            }
            paused = paused.saturating_add(1);
            if paused >= self.pause_risk {
                self.needs_probe = true;
            }
        };
        link.set_drain(previous);
        resume
    }
}

impl DataSink for ListingSink<'_> {
    fn accept<D: SerialDevice, K: Clock>(
        &mut self,
        link: &mut Link<D, K>,
        ui: &mut dyn Console,
        bytes: &[u8],
    ) -> Result<bool> {
        for &b in bytes {
            if let Some(line) = self.lines.push(b) {
                if !self.emit(link, ui, &line) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn finish(&mut self, _ui: &mut dyn Console, _complete: bool) -> Result<()> {
        self.lines.clear();
        Ok(())
    }
}
