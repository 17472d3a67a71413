//! FTP reply line parsing

use std::net::Ipv4Addr;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// `ddd-text`: more lines follow until `ddd text`
    pub continued: bool,
    pub text: String,
}

impl Reply {
    /// Lines that do not start with a three-digit code are not replies
    /// (continuation bodies, banners' ASCII art, module noise)
    pub fn parse(line: &str) -> Option<Self> {
        let bytes = line.as_bytes();
        if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return None;
        }
        let continued = match bytes.get(3) {
            None | Some(b' ') => false,
            Some(b'-') => true,
            Some(_) => return None,
        };
        let code = line[..3].parse().ok()?;
        Some(Self {
            code,
            continued,
            text: line.get(4..).unwrap_or("").trim().to_string(),
        })
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_failure(&self) -> bool {
        self.code >= 400
    }
}

/// `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` → address, p1*256+p2
pub fn parse_pasv(line: &str) -> Option<(Ipv4Addr, u16)> {
    let body = match line.find('(') {
        Some(open) => {
            let rest = &line[open + 1..];
            &rest[..rest.find(')').unwrap_or(rest.len())]
        }
        None => {
            // some servers omit the parentheses; take the first digit run after the code
            let rest = line.get(3..)?;
            let start = rest.find(|c: char| c.is_ascii_digit())?;
            &rest[start..]
        }
    };
    let nums: Vec<u8> = body
        .split(',')
        .take(6)
        .map(|n| {
            let digits: String = n.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u8>().ok()
        })
        .collect::<Option<_>>()?;
    if nums.len() != 6 {
        return None;
    }
    let ip = Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]);
    let port = u16::from(nums[4]) * 256 + u16::from(nums[5]);
    Some((ip, port))
}

/// Quoted path of a `257` reply; `""` inside the quotes is an escaped quote
pub fn parse_quoted_path(text: &str) -> Option<String> {
    let start = text.find('"')? + 1;
    let mut out = String::new();
    let mut chars = text[start..].chars().peekable();
    while let Some(c) = chars.next() {
        if c == '"' {
            if chars.peek() == Some(&'"') {
                chars.next();
                out.push('"');
                continue;
            }
            return Some(out);
        }
        out.push(c);
    }
    None
}

/// Size from a `213 <n>` reply text
pub fn parse_size(text: &str) -> Option<u64> {
    text.split_whitespace().next()?.parse().ok()
}
