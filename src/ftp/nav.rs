//! Working directory: PWD, CWD and client-side path tracking

use crate::clock::Clock;
use crate::console::{Console, Style};
use crate::error::{FtpError, Result};
use crate::protocol::code;
use crate::serial::SerialDevice;

use super::auth::tolerate;
use super::reply::parse_quoted_path;
use super::{Engine, SessionState, UNKNOWN_PATH};

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Decode `%HH` and `\xHH` escapes so users can type bytes their keyboard
/// lacks. Malformed escapes pass through literally.
pub fn decode_escapes(arg: &str) -> Vec<u8> {
    let b = arg.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        let pair = |at: usize| Some(hex_value(*b.get(at)?)? << 4 | hex_value(*b.get(at + 1)?)?);
        if b[i] == b'%' {
            if let Some(v) = pair(i + 1) {
                out.push(v);
                i += 3;
                continue;
            }
        } else if b[i] == b'\\' && b.get(i + 1) == Some(&b'x') {
            if let Some(v) = pair(i + 2) {
                out.push(v);
                i += 4;
                continue;
            }
        }
        out.push(b[i]);
        i += 1;
    }
    out
}

/// Advisory path after a successful CWD. Absolute arguments replace the
/// path, `..` trims one component, anything else is appended.
pub fn track_path(current: &str, arg: &str) -> String {
    if arg.starts_with('/') {
        return arg.to_string();
    }
    let base = if current.is_empty() || current == UNKNOWN_PATH {
        "/"
    } else {
        current
    };
    match arg {
        "" | "." => base.to_string(),
        ".." => match base.trim_end_matches('/').rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(i) => base[..i].to_string(),
        },
        _ if base.ends_with('/') => format!("{}{}", base, arg),
        _ => format!("{}/{}", base, arg),
    }
}

impl<D: SerialDevice, K: Clock> Engine<D, K> {
    pub fn pwd(&mut self, ui: &mut dyn Console) -> Result<String> {
        let r = self
            .require(SessionState::LoggedIn)
            .and_then(|()| self.refresh_path(ui, false));
        self.conclude(ui, r)
    }

    /// PWD and adopt the server's answer as the displayed path
    pub(super) fn refresh_path(&mut self, ui: &mut dyn Console, silent: bool) -> Result<String> {
        let t = self.settings.timing;
        self.command(ui, "PWD")?;
        let r = self.reply(ui, t.reply, "PWD")?;
        if r.code != code::PATH_CREATED {
            return Err(FtpError::unexpected(r.code, &r.text));
        }
        let path = parse_quoted_path(&r.text).ok_or_else(|| FtpError::unexpected(r.code, &r.text))?;
        self.session.path = path.clone();
        if !silent {
            ui.print_line(&path, Style::Normal);
        }
        Ok(path)
    }

    pub fn change_dir(&mut self, ui: &mut dyn Console, path: &str) -> Result<String> {
        let r = self.change_dir_inner(ui, path);
        self.conclude(ui, r)
    }

    fn change_dir_inner(&mut self, ui: &mut dyn Console, path: &str) -> Result<String> {
        self.require(SessionState::LoggedIn)?;
        let raw = decode_escapes(path.trim());
        if raw.is_empty() {
            return Err(FtpError::NotFound("Directory not found"));
        }
        let t = self.settings.timing;
        let mut line = b"CWD ".to_vec();
        line.extend_from_slice(&raw);
        self.command_bytes(ui, &line)?;
        let r = self.reply(ui, t.cwd, "CD")?;
        match r.code {
            code::FILE_ACTION_OK => {
                let arg = String::from_utf8_lossy(&raw);
                self.session.path = track_path(&self.session.path, &arg);
                // the server's own idea of the path wins when it answers
                tolerate(self.refresh_path(ui, true))?;
                ui.print_line(&self.session.path, Style::Normal);
                Ok(self.session.path.clone())
            }
            code::UNAVAILABLE | code::NAME_NOT_ALLOWED | code::ARGUMENT_ERROR | code::SYNTAX_ERROR => {
                Err(FtpError::NotFound("Directory not found"))
            }
            _ => Err(FtpError::unexpected(r.code, &r.text)),
        }
    }
}
