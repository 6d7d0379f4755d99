use std::collections::BTreeMap;
use std::fmt::Write as _;

use time::{macros::format_description, OffsetDateTime, UtcOffset};

/// Body used when a sweep found nothing listening.
pub const NO_PORTS_OPEN: &str = "No ports open.";
/// Shown in the banner column for a port that accepted but said nothing.
pub const NO_BANNER: &str = "None";

/// Render the open-port map into the stored report text.
///
/// The header carries the completion time in UTC. Ports are listed in
/// ascending order regardless of how workers delivered them; banners are
/// quoted with control and non-UTF-8 bytes escaped.
pub fn build_report(results: &BTreeMap<u16, Vec<u8>>, completed: OffsetDateTime) -> String {
    let mut out = format!("Scan finished at {}", format_completion(completed));

    if results.is_empty() {
        out.push_str("\n\n");
        out.push_str(NO_PORTS_OPEN);
        return out;
    }

    out.push_str("\n\n  Port | Banner");
    out.push_str("\n-------+-------");
    // BTreeMap iterates in ascending key order
    for (port, banner) in results {
        let shown = if banner.is_empty() {
            NO_BANNER.to_string()
        } else {
            quote_banner(banner)
        };
        let _ = write!(out, "\n{port:<6} | {shown}");
    }
    out
}

fn format_completion(t: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    t.to_offset(UtcOffset::UTC)
        .format(&fmt)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}

/// Double-quote a banner, escaping quotes, backslashes, control characters and invalid UTF-8.
pub fn quote_banner(banner: &[u8]) -> String {
    let mut out = String::with_capacity(banner.len() + 2);
    out.push('"');
    for chunk in banner.utf8_chunks() {
        for c in chunk.valid().chars() {
            match c {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
                c => out.push(c),
            }
        }
        for b in chunk.invalid() {
            let _ = write!(out, "\\x{b:02x}");
        }
    }
    out.push('"');
    out
}
