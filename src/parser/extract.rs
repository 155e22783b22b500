//! Field extractors for game server log lines.
//!
//! Every extractor is total: a missing or malformed field produces an empty
//! string, `None` or zero instead of an error.

use std::sync::LazyLock;

use regex::Regex;

static RECEIVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Received:\s*(\d+)\s*bytes").expect("valid regex"));
static SENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Sent:\s*(\d+)\s*bytes").expect("valid regex"));
static CSP_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Version=(\d+)").expect("valid regex"));
static CSP_PLAYER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"from\s+(.+?)\s*\(").expect("valid regex"));
static AI_SLOTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AI Slots?:?\s*(\d+)").expect("valid regex"));

/// Strip leading `[...]` prefixes such as timestamps or log levels.
pub fn strip_log_prefix(line: &str) -> &str {
    let mut rest = line.trim_start();
    while let Some(stripped) = rest.strip_prefix('[') {
        match stripped.find(']') {
            Some(end) => rest = stripped[end + 1..].trim_start(),
            None => break,
        }
    }
    rest
}

/// Whether a Steam id looks valid: non-empty and all ASCII digits.
pub fn is_valid_steam_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

/// First parenthesised group in `text`, without the parentheses.
fn first_group(text: &str) -> Option<&str> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    Some(&text[start + 1..end])
}

/// Last parenthesised group in `text`, without the parentheses.
fn last_group(text: &str) -> Option<&str> {
    let start = text.rfind('(')?;
    let end = text[start..].find(')')? + start;
    Some(&text[start + 1..end])
}

fn first_field(group: &str) -> &str {
    group.split(',').next().unwrap_or_default().trim()
}

/// Fields of a `has connected` / `has disconnected` line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerFields {
    pub name: String,
    pub steam_id: String,
    pub car_model: String,
}

/// Extract player fields from lines such as
/// `Alice (76561197960287930) has connected (ks_mx5)`.
pub fn player_fields(line: &str, marker: &str) -> PlayerFields {
    let body = strip_log_prefix(line);
    let (before, after) = match body.find(marker) {
        Some(idx) => (&body[..idx], &body[idx + marker.len()..]),
        None => (body, ""),
    };

    let name = match before.find('(') {
        Some(idx) => &before[..idx],
        None => before,
    }
    .trim()
    .to_string();

    let id_group = first_group(before);
    let steam_id = id_group.map(first_field).unwrap_or_default().to_string();

    let car_model = last_group(after)
        .map(first_field)
        .or_else(|| {
            id_group
                .and_then(|g| g.split(',').nth(1))
                .map(str::trim)
        })
        .unwrap_or_default()
        .to_string();

    PlayerFields {
        name,
        steam_id,
        car_model,
    }
}

/// Text following `marker`, cut at `stop` when present.
fn after_marker<'a>(line: &'a str, marker: &str, stop: Option<&str>) -> Option<&'a str> {
    let idx = line.find(marker)?;
    let mut rest = &line[idx + marker.len()..];
    if let Some(stop) = stop
        && let Some(end) = rest.find(stop)
    {
        rest = &rest[..end];
    }
    let rest = rest.trim();
    (!rest.is_empty()).then_some(rest)
}

/// Track name following `TRACK:`.
pub fn track_name(line: &str) -> String {
    after_marker(line, "TRACK:", Some("TIME:"))
        .unwrap_or_default()
        .to_string()
}

/// Remaining time following `TIME:`.
pub fn remaining_time(line: &str) -> Option<String> {
    after_marker(line, "TIME:", None).map(str::to_string)
}

pub fn bytes_received(line: &str) -> u64 {
    capture_u64(&RECEIVED, line).unwrap_or(0)
}

pub fn bytes_sent(line: &str) -> u64 {
    capture_u64(&SENT, line).unwrap_or(0)
}

pub fn csp_version(line: &str) -> Option<u32> {
    capture_u64(&CSP_VERSION, line).and_then(|v| u32::try_from(v).ok())
}

/// Player named in `CSP handshake received from NAME (id): Version=N`.
pub fn csp_player(line: &str) -> String {
    CSP_PLAYER
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn ai_slots(line: &str) -> Option<u32> {
    capture_u64(&AI_SLOTS, line).and_then(|v| u32::try_from(v).ok())
}

/// Remainder of the line after `marker`, or `fallback` when nothing follows.
pub fn suffix(line: &str, marker: &str, fallback: &str) -> String {
    after_marker(line, marker, None)
        .map(|s| s.trim_start_matches(':').trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn capture_u64(re: &Regex, line: &str) -> Option<u64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_fields_connect() {
        let fields = player_fields(
            "Alice (76561197960287930) has connected (ks_mx5)",
            "has connected",
        );
        assert_eq!(fields.name, "Alice");
        assert_eq!(fields.steam_id, "76561197960287930");
        assert_eq!(fields.car_model, "ks_mx5");
    }

    #[test]
    fn test_player_fields_with_timestamp_and_extras() {
        let fields = player_fields(
            "[2024-05-01 12:00:00] Bob Smith (76561198000000001, 2) has connected (bmw_m3_e30, red)",
            "has connected",
        );
        assert_eq!(fields.name, "Bob Smith");
        assert_eq!(fields.steam_id, "76561198000000001");
        assert_eq!(fields.car_model, "bmw_m3_e30");
    }

    #[test]
    fn test_player_fields_car_inside_id_group() {
        let fields = player_fields(
            "Carol (76561198000000002, ks_audi_r8) has connected",
            "has connected",
        );
        assert_eq!(fields.steam_id, "76561198000000002");
        assert_eq!(fields.car_model, "ks_audi_r8");
    }

    #[test]
    fn test_player_fields_missing_id() {
        let fields = player_fields("Dave has connected (ks_mx5)", "has connected");
        assert_eq!(fields.name, "Dave");
        assert_eq!(fields.steam_id, "");
        assert_eq!(fields.car_model, "ks_mx5");
    }

    #[test]
    fn test_steam_id_validation() {
        assert!(is_valid_steam_id("76561197960287930"));
        assert!(!is_valid_steam_id(""));
        assert!(!is_valid_steam_id("ks_mx5"));
        assert!(!is_valid_steam_id("7656 1197"));
    }

    #[test]
    fn test_strip_log_prefix() {
        assert_eq!(strip_log_prefix("[12:00] [INF] hello"), "hello");
        assert_eq!(strip_log_prefix("plain"), "plain");
        assert_eq!(strip_log_prefix("[unterminated"), "[unterminated");
    }

    #[test]
    fn test_track_and_time() {
        let line = "Next session: RACE TRACK: ks_nordschleife TIME: 20:00";
        assert_eq!(track_name(line), "ks_nordschleife");
        assert_eq!(remaining_time(line).as_deref(), Some("20:00"));
        assert_eq!(track_name("Next session: RACE"), "");
        assert_eq!(remaining_time("Next session: RACE"), None);
    }

    #[test]
    fn test_network_bytes() {
        let line = "Network stats: Received: 1024 bytes, Sent: 2048 bytes";
        assert_eq!(bytes_received(line), 1024);
        assert_eq!(bytes_sent(line), 2048);
        assert_eq!(bytes_received("Network stats: Received: lots"), 0);
    }

    #[test]
    fn test_csp_fields() {
        let line = "CSP handshake received from Alice (0): Version=2651 Flags=1";
        assert_eq!(csp_player(line), "Alice");
        assert_eq!(csp_version(line), Some(2651));
        assert_eq!(csp_player("CSP handshake received"), "unknown");
        assert_eq!(csp_version("CSP handshake received"), None);
    }

    #[test]
    fn test_ai_slots() {
        assert_eq!(ai_slots("No. AI Slots: 12 - 4 in use"), Some(12));
        assert_eq!(ai_slots("AI Slot allocation pending"), None);
    }

    #[test]
    fn test_suffix() {
        assert_eq!(
            suffix("Loaded plugin: AutoModerationPlugin", "Loaded plugin", "unknown"),
            "AutoModerationPlugin"
        );
        assert_eq!(suffix("Loaded plugin", "Loaded plugin", "unknown"), "unknown");
    }
}
