//! Local names for downloaded files

/// Characters FAT refuses (plus `.` inside a base or extension)
fn fat_safe(c: char) -> char {
    match c {
        ' ' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '.' => '_',
        c if c.is_control() || !c.is_ascii() => '_',
        c => c.to_ascii_uppercase(),
    }
}

/// Split at the last dot, ignoring a leading one (hidden files)
fn split_ext(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(i) => (&name[..i], Some(&name[i + 1..])),
    }
}

/// Uppercase 8.3 name: eight base characters, three extension characters
pub fn short_name(remote: &str) -> String {
    let (base, ext) = split_ext(remote);
    let mut out: String = base.chars().take(8).map(fat_safe).collect();
    if out.is_empty() {
        out.push('_');
    }
    if let Some(ext) = ext {
        out.push('.');
        out.extend(ext.chars().take(3).map(fat_safe));
    }
    out
}

/// Remote name made safe as a single path component
pub fn long_name(remote: &str) -> String {
    let cleaned: String = remote
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// First of `name`, `name~1` .. `name~9` (before the extension) that `taken`
/// rejects. Short names cut their base to six characters to fit the suffix.
/// With ten collisions the last candidate is reused.
pub fn unique_name(name: &str, short: bool, taken: impl Fn(&str) -> bool) -> String {
    if !taken(name) {
        return name.to_string();
    }
    let (base, ext) = split_ext(name);
    let base: String = if short {
        base.chars().take(6).collect()
    } else {
        base.to_string()
    };
    let ext = ext.map(|e| format!(".{}", e)).unwrap_or_default();
    let mut candidate = String::new();
    for i in 1..=9 {
        candidate = format!("{}~{}{}", base, i, ext);
        if !taken(&candidate) {
            break;
        }
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_three_names() {
        assert_eq!(short_name("readme.txt"), "README.TXT");
        assert_eq!(short_name("my long file name.tar.gz"), "MY_LONG_.GZ");
        assert_eq!(short_name(".profile"), "_PROFILE");
        assert_eq!(short_name("game.html"), "GAME.HTM");
        assert_eq!(short_name("noext"), "NOEXT");
        assert_eq!(short_name("caf\u{e9}.z80"), "CAF_.Z80");
    }

    #[test]
    fn long_names_stay_in_one_directory() {
        assert_eq!(long_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(long_name(".."), "_");
        assert_eq!(long_name("Report 2024.pdf"), "Report 2024.pdf");
    }

    #[test]
    fn collisions_get_a_tilde_suffix() {
        let existing = ["README.TXT", "README~1.TXT"];
        let taken = |n: &str| existing.contains(&n);
        assert_eq!(unique_name("README.TXT", true, taken), "README~2.TXT");
        assert_eq!(unique_name("OTHER.TXT", true, taken), "OTHER.TXT");

        let existing = ["LONGNAME.BIN"];
        assert_eq!(
            unique_name("LONGNAME.BIN", true, |n| existing.contains(&n)),
            "LONGNA~1.BIN"
        );
        assert_eq!(
            unique_name("notes.txt", false, |n| n == "notes.txt"),
            "notes~1.txt"
        );
    }

    #[test]
    fn ten_collisions_reuse_the_last_slot() {
        assert_eq!(unique_name("A.B", true, |_| true), "A~9.B");
    }
}
