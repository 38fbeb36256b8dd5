//! Timestamp parsing and mask formatting.
//!
//! Masks use the classic day/month/hour token language (`dddd, mmmm d, yyyy`,
//! `h:MM TT`, ...). Quoted runs are copied literally and a leading `UTC:`
//! renders in UTC instead of the offset carried by the timestamp.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Timelike, Utc};

use crate::error::{ClientError, ClientResult};

const NAMED_MASKS: &[(&str, &str)] = &[
    ("default", "ddd mmm dd yyyy HH:MM:ss"),
    ("shortDate", "m/d/yy"),
    ("mediumDate", "mmm d, yyyy"),
    ("longDate", "mmmm d, yyyy"),
    ("fullDate", "dddd, mmmm d, yyyy"),
    ("fullDateTime", "dddd, mmmm d, yyyy h:MM:ss TT"),
    ("shortTime", "h:MM TT"),
    ("mediumTime", "h:MM:ss TT"),
    ("longTime", "h:MM:ss TT Z"),
    ("isoDate", "yyyy-mm-dd"),
    ("isoTime", "HH:MM:ss"),
    ("isoDateTime", "yyyy-mm-dd'T'HH:MM:ss"),
    ("isoUtcDateTime", "UTC:yyyy-mm-dd'T'HH:MM:ss'Z'"),
];

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Format `raw` with `pattern`. An empty pattern returns `raw` unchanged.
pub fn format_timestamp(raw: &str, pattern: &str) -> ClientResult<String> {
    if pattern.is_empty() {
        return Ok(raw.to_string());
    }
    let parsed =
        parse_timestamp(raw).ok_or_else(|| ClientError::InvalidTimestamp(raw.to_string()))?;
    Ok(format_datetime(&parsed, pattern))
}

/// Accepts RFC 3339, RFC 2822, Go `Time.String()`, Unix-date and epoch forms.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt);
    }
    parse_epoch(raw)
        .or_else(|| parse_go_string(raw))
        .or_else(|| parse_unix_date(raw))
}

fn parse_epoch(raw: &str) -> Option<DateTime<FixedOffset>> {
    let digits = raw.strip_suffix('Z').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    let utc = if digits.len() > 11 {
        DateTime::from_timestamp_millis(value)?
    } else {
        DateTime::from_timestamp(value, 0)?
    };
    Some(utc.fixed_offset())
}

// "2006-01-02 15:04:05.999999999 -0700 MST", optionally followed by "m=+0.01".
fn parse_go_string(raw: &str) -> Option<DateTime<FixedOffset>> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() < 3 || !parts[2].starts_with(['+', '-']) {
        return None;
    }
    let head = parts[..3].join(" ");
    DateTime::parse_from_str(&head, "%Y-%m-%d %H:%M:%S%.f %z").ok()
}

// "Mon Jan  2 15:04:05 UTC 2006"
fn parse_unix_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    if parts.len() != 6 || !matches!(parts[4], "UTC" | "GMT" | "Z") {
        return None;
    }
    let text = format!(
        "{} {} {} {} {}",
        parts[0], parts[1], parts[2], parts[3], parts[5]
    );
    let naive = NaiveDateTime::parse_from_str(&text, "%a %b %d %H:%M:%S %Y").ok()?;
    Some(naive.and_utc().fixed_offset())
}

fn resolve_mask(pattern: &str) -> &str {
    NAMED_MASKS
        .iter()
        .find(|(name, _)| *name == pattern)
        .map(|(_, mask)| *mask)
        .unwrap_or(pattern)
}

/// Render `dt` with a mask or named mask.
pub fn format_datetime(dt: &DateTime<FixedOffset>, pattern: &str) -> String {
    let mask = resolve_mask(pattern);
    let (mask, dt, utc) = match mask.strip_prefix("UTC:") {
        Some(rest) => (rest, dt.with_timezone(&Utc).fixed_offset(), true),
        None => (mask, *dt, false),
    };

    let chars: Vec<char> = mask.chars().collect();
    let mut out = String::with_capacity(mask.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' || c == '"' {
            let end = chars[i + 1..]
                .iter()
                .position(|&q| q == c)
                .map(|p| i + 1 + p)
                .unwrap_or(chars.len());
            out.extend(&chars[i + 1..end]);
            i = end + 1;
            continue;
        }

        let run = chars[i..].iter().take_while(|&&r| r == c).count();
        let taken = match c {
            'd' | 'm' => run.min(4),
            'y' if run >= 4 => 4,
            'y' if run >= 2 => 2,
            'h' | 'H' | 'M' | 's' | 't' | 'T' => run.min(2),
            'l' | 'L' | 'o' | 'S' | 'Z' => 1,
            _ => 0,
        };
        if taken == 0 {
            out.push(c);
            i += 1;
            continue;
        }
        push_token(&mut out, &dt, c, taken, utc);
        i += taken;
    }
    out
}

fn push_token(out: &mut String, dt: &DateTime<FixedOffset>, token: char, width: usize, utc: bool) {
    let hour12 = match dt.hour() % 12 {
        0 => 12,
        h => h,
    };
    let pm = dt.hour() >= 12;
    let millis = dt.timestamp_subsec_millis().min(999);
    let weekday = dt.weekday().num_days_from_sunday() as usize;
    let month = dt.month0() as usize;

    let text = match (token, width) {
        ('d', 1) => dt.day().to_string(),
        ('d', 2) => format!("{:02}", dt.day()),
        ('d', 3) => DAY_NAMES[weekday][..3].to_string(),
        ('d', _) => DAY_NAMES[weekday].to_string(),
        ('m', 1) => dt.month().to_string(),
        ('m', 2) => format!("{:02}", dt.month()),
        ('m', 3) => MONTH_NAMES[month][..3].to_string(),
        ('m', _) => MONTH_NAMES[month].to_string(),
        ('y', 2) => format!("{:02}", dt.year().rem_euclid(100)),
        ('y', _) => dt.year().to_string(),
        ('h', 1) => hour12.to_string(),
        ('h', _) => format!("{hour12:02}"),
        ('H', 1) => dt.hour().to_string(),
        ('H', _) => format!("{:02}", dt.hour()),
        ('M', 1) => dt.minute().to_string(),
        ('M', _) => format!("{:02}", dt.minute()),
        ('s', 1) => dt.second().to_string(),
        ('s', _) => format!("{:02}", dt.second()),
        ('l', _) => format!("{millis:03}"),
        ('L', _) => format!("{:02}", millis / 10),
        ('t', 1) => (if pm { "p" } else { "a" }).to_string(),
        ('t', _) => (if pm { "pm" } else { "am" }).to_string(),
        ('T', 1) => (if pm { "P" } else { "A" }).to_string(),
        ('T', _) => (if pm { "PM" } else { "AM" }).to_string(),
        ('Z', _) => zone_name(dt, utc),
        ('o', _) => offset_hhmm(dt),
        ('S', _) => ordinal_suffix(dt.day()).to_string(),
        _ => String::new(),
    };
    out.push_str(&text);
}

fn offset_hhmm(dt: &DateTime<FixedOffset>) -> String {
    let seconds = dt.offset().local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.abs() / 60;
    format!("{sign}{:02}{:02}", minutes / 60, minutes % 60)
}

fn zone_name(dt: &DateTime<FixedOffset>, utc: bool) -> String {
    if utc || dt.offset().local_minus_utc() == 0 {
        "UTC".to_string()
    } else {
        format!("GMT{}", offset_hhmm(dt))
    }
}

fn ordinal_suffix(day: u32) -> &'static str {
    match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    }
}
