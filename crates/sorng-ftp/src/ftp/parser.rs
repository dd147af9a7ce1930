//! Directory listing parser.
//!
//! Three formats are understood, tried in this order per line:
//! 1. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//! 2. **Unix** (`ls -l`): `-rw-r--r-- 1 owner group 1234 Jan  1 12:00 file.txt`
//! 3. **Windows/IIS**: `01-01-26  12:00AM       1234 file.txt`
//!
//! Lines matching none of them are dropped with a debug log; a mirror must
//! not guess at sizes.

use crate::ftp::types::{FtpEntry, FtpEntryKind};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNIX_LINE: Regex = Regex::new(
        r"(?x)
        ^([dlcbps-])[rwxsStT-]{9}[@+.]?\s+  # type + permissions
        \d+\s+                             # link count
        \S+\s+                             # owner
        \S+\s+                             # group
        (\d+)\s+                           # size
        (\w{3}\s+\d{1,2}\s+[\d:]+)\s       # date
        (.+)$                              # name (possibly with -> target)
        ",
    )
    .expect("valid unix listing pattern");
    static ref WINDOWS_LINE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+          # date
        (\d{1,2}:\d{2}(?:AM|PM)?)\s+       # time
        (<DIR>|\d+)\s+                     # size or <DIR>
        (.+)$                              # name
        ",
    )
    .expect("valid windows listing pattern");
}

/// Parse a full LIST or MLSD body. `.` and `..` are never returned.
pub fn parse_listing(raw: &str) -> Vec<FtpEntry> {
    parse_listing_at(raw, Utc::now())
}

/// Same as [`parse_listing`] with an explicit clock, for year inference.
pub fn parse_listing_at(raw: &str, now: DateTime<Utc>) -> Vec<FtpEntry> {
    raw.lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .filter(|l| !l.starts_with("total "))
        .filter_map(|line| {
            let entry = parse_line(line, now);
            if entry.is_none() {
                log::debug!("FTP listing: unrecognised line '{}'", line);
            }
            entry
        })
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

fn parse_line(line: &str, now: DateTime<Utc>) -> Option<FtpEntry> {
    if line.contains(';') && line.contains('=') {
        if let Some(e) = parse_mlsd(line.trim_start()) {
            return Some(e);
        }
    }
    parse_unix(line, now).or_else(|| parse_windows(line))
}

// ─── MLSD ────────────────────────────────────────────────────────────

fn parse_mlsd(line: &str) -> Option<FtpEntry> {
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut kind = FtpEntryKind::Unknown;
    let mut size = 0;
    let mut modified = None;
    for fact in facts.split(';') {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "file" => FtpEntryKind::File,
                    "dir" | "cdir" | "pdir" => FtpEntryKind::Directory,
                    v if v.contains("link") => FtpEntryKind::Symlink,
                    _ => FtpEntryKind::Unknown,
                }
            }
            "size" | "sizd" => size = value.parse().unwrap_or(0),
            "modify" => modified = parse_mlsd_time(value),
            _ => {}
        }
    }

    // cdir / pdir entries are the listed directory and its parent.
    if facts.to_ascii_lowercase().contains("type=cdir")
        || facts.to_ascii_lowercase().contains("type=pdir")
    {
        return None;
    }

    Some(FtpEntry {
        name: name.to_string(),
        kind,
        size,
        modified,
        link_target: None,
    })
}

/// `YYYYMMDDHHmmSS[.fraction]`, always UTC per RFC 3659.
fn parse_mlsd_time(s: &str) -> Option<DateTime<Utc>> {
    let base = s.get(..14)?;
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix ────────────────────────────────────────────────────────────

fn parse_unix(line: &str, now: DateTime<Utc>) -> Option<FtpEntry> {
    let caps = UNIX_LINE.captures(line)?;

    let kind = match &caps[1] {
        "d" => FtpEntryKind::Directory,
        "l" => FtpEntryKind::Symlink,
        "-" => FtpEntryKind::File,
        _ => FtpEntryKind::Unknown,
    };
    let size = caps[2].parse::<u64>().unwrap_or(0);
    let modified = parse_unix_date(&caps[3], now);
    let raw_name = caps[4].trim_start();

    let (name, link_target) = match (kind, raw_name.split_once(" -> ")) {
        (FtpEntryKind::Symlink, Some((name, target))) => (name, Some(target.to_string())),
        _ => (raw_name, None),
    };

    Some(FtpEntry {
        name: name.to_string(),
        kind,
        size,
        modified,
        link_target,
    })
}

/// `Jan  1 12:00` (recent, year omitted) or `Jan  1  2025`.
///
/// `ls` omits the year for entries from the last six months, so a recent-form
/// date that would land in the future belongs to the previous year.
fn parse_unix_date(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let normalised = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalised.contains(':') {
        let year = now.year();
        let dt = NaiveDateTime::parse_from_str(
            &format!("{} {}", year, normalised),
            "%Y %b %d %H:%M",
        )
        .ok()?;
        let dt = Utc.from_utc_datetime(&dt);
        if dt > now + Duration::days(1) {
            let previous = dt.with_year(year - 1)?;
            return Some(previous);
        }
        return Some(dt);
    }

    let date = NaiveDate::parse_from_str(&normalised, "%b %d %Y").ok()?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

// ─── Windows / IIS ───────────────────────────────────────────────────

fn parse_windows(line: &str) -> Option<FtpEntry> {
    let caps = WINDOWS_LINE.captures(line)?;

    let (kind, size) = match &caps[3] {
        "<DIR>" => (FtpEntryKind::Directory, 0),
        n => (FtpEntryKind::File, n.parse::<u64>().unwrap_or(0)),
    };

    Some(FtpEntry {
        name: caps[4].to_string(),
        kind,
        size,
        modified: parse_windows_date(&caps[1], &caps[2]),
        link_target: None,
    })
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{} {}", date, time);
    ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %I:%M%p", "%m-%d-%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn unix_file() {
        let entries = parse_listing_at(
            "-rw-r--r--   1 user group  1234 Jan  1 12:00 readme.txt",
            fixed_now(),
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "readme.txt");
        assert_eq!(entries[0].kind, FtpEntryKind::File);
        assert_eq!(entries[0].size, 1234);
        assert_eq!(
            entries[0].modified,
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn unix_recent_date_in_future_is_last_year() {
        let entries = parse_listing_at(
            "-rw-r--r--   1 user group  10 Dec 24 08:30 gift.mkv",
            fixed_now(),
        );
        assert_eq!(
            entries[0].modified,
            Some(Utc.with_ymd_and_hms(2025, 12, 24, 8, 30, 0).unwrap())
        );
    }

    #[test]
    fn unix_name_with_spaces_and_old_date() {
        let entries = parse_listing_at(
            "-rw-r--r--   1 user group  77 Jun  5  2023 Show Name S01E01.mkv",
            fixed_now(),
        );
        assert_eq!(entries[0].name, "Show Name S01E01.mkv");
        assert_eq!(
            entries[0].modified,
            Some(Utc.with_ymd_and_hms(2023, 6, 5, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn unix_dir_and_symlink() {
        let raw = "total 8\n\
                   drwxr-xr-x   2 root root  4096 Mar  1 09:30 subdir\n\
                   lrwxrwxrwx   1 root root    22 Jan  5 08:00 link -> /var/target";
        let entries = parse_listing_at(raw, fixed_now());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, FtpEntryKind::Directory);
        assert_eq!(entries[1].kind, FtpEntryKind::Symlink);
        assert_eq!(entries[1].name, "link");
        assert_eq!(entries[1].link_target.as_deref(), Some("/var/target"));
    }

    #[test]
    fn mlsd_facts() {
        let entries = parse_listing("type=file;size=1024;modify=20260101120000.123; example bin.mkv");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "example bin.mkv");
        assert_eq!(entries[0].kind, FtpEntryKind::File);
        assert_eq!(entries[0].size, 1024);
        assert_eq!(
            entries[0].modified,
            Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn mlsd_skips_current_and_parent() {
        let raw = "type=cdir;modify=20260101120000; .\n\
                   type=pdir;modify=20260101120000; ..\n\
                   type=cdir;modify=20260101120000; /show\n\
                   type=file;size=10; real.txt";
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "real.txt");
    }

    #[test]
    fn windows_entries() {
        let raw = "01-01-26  12:00AM      <DIR> My Documents\n\
                   02-14-26  03:15PM          512 notes.txt";
        let entries = parse_listing(raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, FtpEntryKind::Directory);
        assert_eq!(entries[0].name, "My Documents");
        assert_eq!(entries[1].size, 512);
        assert_eq!(
            entries[1].modified,
            Some(Utc.with_ymd_and_hms(2026, 2, 14, 15, 15, 0).unwrap())
        );
    }

    #[test]
    fn drops_unrecognised_lines() {
        assert!(parse_listing("what even is this").is_empty());
    }
}
