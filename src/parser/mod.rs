//! Classification of game server output.
//!
//! [`parse_line`] maps every line to exactly one [`OutputEvent`]. Rules in
//! [`RULES`] are tried in order and the first whose marker matches wins;
//! markers are case-sensitive substrings. Lines that match nothing become
//! [`OutputEvent::Unclassified`] so gaps in coverage show up in metrics.

pub mod extract;

pub use extract::is_valid_steam_id;

use crate::state::SessionKind;

/// A domain event recognised in one line of server output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    ServerStarting,
    LobbyRegistered,
    SessionEnded,
    PlayerConnected {
        name: String,
        steam_id: String,
        car_model: String,
    },
    PlayerDisconnected {
        name: String,
        steam_id: String,
    },
    SessionChanged {
        kind: SessionKind,
        track: String,
        remaining: Option<String>,
    },
    ServerError {
        message: String,
    },
    SteamAuthSucceeded,
    SteamApiFailure {
        message: String,
    },
    NetworkStats {
        received: u64,
        sent: u64,
    },
    SteamInitWarning {
        message: String,
    },
    CspHandshake {
        player: String,
        version: Option<u32>,
    },
    ServerVersion {
        version: String,
    },
    ConfigLoading {
        file: String,
    },
    PluginLoaded {
        plugin: String,
    },
    AiSlots {
        total: Option<u32>,
    },
    ChecksumAdded {
        asset: String,
    },
    Unclassified,
}

impl OutputEvent {
    /// Stable name used for the `event_type` metric label and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServerStarting => "server_starting",
            Self::LobbyRegistered => "lobby_registered",
            Self::SessionEnded => "session_ended",
            Self::PlayerConnected { .. } => "player_connected",
            Self::PlayerDisconnected { .. } => "player_disconnected",
            Self::SessionChanged { .. } => "session_changed",
            Self::ServerError { .. } => "server_error",
            Self::SteamAuthSucceeded => "steam_auth",
            Self::SteamApiFailure { .. } => "steam_api_failure",
            Self::NetworkStats { .. } => "network_stats",
            Self::SteamInitWarning { .. } => "steam_init",
            Self::CspHandshake { .. } => "csp_handshake",
            Self::ServerVersion { .. } => "server_version",
            Self::ConfigLoading { .. } => "config_loading",
            Self::PluginLoaded { .. } => "plugin_loaded",
            Self::AiSlots { .. } => "ai_slots",
            Self::ChecksumAdded { .. } => "checksum_added",
            Self::Unclassified => "unclassified",
        }
    }
}

/// One entry of the ordered rule table.
pub struct Rule {
    pub name: &'static str,
    matches: fn(&str) -> bool,
    build: fn(&str) -> OutputEvent,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

const CONNECTED: &str = "has connected";
const DISCONNECTED: &str = "has disconnected";

/// Ordered rule table. Earlier entries take priority.
pub static RULES: &[Rule] = &[
    Rule {
        name: "server_starting",
        matches: |l| l.contains("Starting Assetto Corsa Server..."),
        build: |_| OutputEvent::ServerStarting,
    },
    Rule {
        name: "lobby_registered",
        matches: |l| l.contains("Lobby registration successful"),
        build: |_| OutputEvent::LobbyRegistered,
    },
    Rule {
        name: "session_ended",
        matches: |l| l.contains("End of session"),
        build: |_| OutputEvent::SessionEnded,
    },
    Rule {
        name: "player_connected",
        matches: |l| l.contains(CONNECTED),
        build: |l| {
            let fields = extract::player_fields(l, CONNECTED);
            OutputEvent::PlayerConnected {
                name: fields.name,
                steam_id: fields.steam_id,
                car_model: fields.car_model,
            }
        },
    },
    Rule {
        name: "player_disconnected",
        matches: |l| l.contains(DISCONNECTED),
        build: |l| {
            let fields = extract::player_fields(l, DISCONNECTED);
            OutputEvent::PlayerDisconnected {
                name: fields.name,
                steam_id: fields.steam_id,
            }
        },
    },
    Rule {
        name: "session_changed",
        matches: |l| l.contains("Next session:"),
        build: |l| OutputEvent::SessionChanged {
            kind: SessionKind::detect(l),
            track: extract::track_name(l),
            remaining: extract::remaining_time(l),
        },
    },
    Rule {
        name: "server_error",
        matches: |l| l.contains("[ERR]"),
        build: |l| OutputEvent::ServerError {
            message: l.to_string(),
        },
    },
    Rule {
        name: "steam_auth",
        matches: |l| l.contains("Steam authentication succeeded"),
        build: |_| OutputEvent::SteamAuthSucceeded,
    },
    Rule {
        name: "steam_api_failure",
        matches: |l| l.contains("[S_API FAIL]"),
        build: |l| OutputEvent::SteamApiFailure {
            message: l.to_string(),
        },
    },
    Rule {
        name: "network_stats",
        matches: |l| l.contains("Network stats"),
        build: |l| OutputEvent::NetworkStats {
            received: extract::bytes_received(l),
            sent: extract::bytes_sent(l),
        },
    },
    Rule {
        name: "steam_init",
        matches: |l| l.contains("steamclient.so") || l.contains("SteamAPI"),
        build: |l| OutputEvent::SteamInitWarning {
            message: l.to_string(),
        },
    },
    Rule {
        name: "csp_handshake",
        matches: |l| l.contains("CSP handshake received"),
        build: |l| OutputEvent::CspHandshake {
            player: extract::csp_player(l),
            version: extract::csp_version(l),
        },
    },
    Rule {
        name: "server_version",
        matches: |l| l.contains("AssettoServer"),
        build: |l| OutputEvent::ServerVersion {
            version: extract::suffix(l, "AssettoServer", "unknown"),
        },
    },
    Rule {
        name: "config_loading",
        matches: |l| l.contains("Loading") && l.contains(".ini"),
        build: |l| OutputEvent::ConfigLoading {
            file: extract::suffix(l, "Loading", "unknown"),
        },
    },
    Rule {
        name: "plugin_loaded",
        matches: |l| l.contains("Loaded plugin"),
        build: |l| OutputEvent::PluginLoaded {
            plugin: extract::suffix(l, "Loaded plugin", "unknown"),
        },
    },
    Rule {
        name: "ai_slots",
        matches: |l| l.contains("AI Slot"),
        build: |l| OutputEvent::AiSlots {
            total: extract::ai_slots(l),
        },
    },
    Rule {
        name: "checksum_added",
        matches: |l| l.contains("Added checksum"),
        build: |l| OutputEvent::ChecksumAdded {
            asset: extract::suffix(
                l.replacen("Added checksum for", "Added checksum", 1).as_str(),
                "Added checksum",
                "unknown",
            ),
        },
    },
];

/// Classify one line of output. Never fails.
pub fn parse_line(line: &str) -> OutputEvent {
    let line = line.trim();
    if line.is_empty() {
        return OutputEvent::Unclassified;
    }
    RULES
        .iter()
        .find(|rule| (rule.matches)(line))
        .map(|rule| (rule.build)(line))
        .unwrap_or(OutputEvent::Unclassified)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_lifecycle_markers() {
        assert_eq!(
            parse_line("Starting Assetto Corsa Server..."),
            OutputEvent::ServerStarting
        );
        assert_eq!(
            parse_line("[INF] Lobby registration successful"),
            OutputEvent::LobbyRegistered
        );
        assert_eq!(parse_line("End of session"), OutputEvent::SessionEnded);
    }

    #[test]
    fn test_player_connect_and_disconnect() {
        assert_eq!(
            parse_line("Alice (76561197960287930) has connected (ks_mx5)"),
            OutputEvent::PlayerConnected {
                name: "Alice".to_string(),
                steam_id: "76561197960287930".to_string(),
                car_model: "ks_mx5".to_string(),
            }
        );
        assert_eq!(
            parse_line("Alice (76561197960287930) has disconnected"),
            OutputEvent::PlayerDisconnected {
                name: "Alice".to_string(),
                steam_id: "76561197960287930".to_string(),
            }
        );
    }

    #[test]
    fn test_session_change() {
        assert_eq!(
            parse_line("Next session: Qualify TRACK: spa TIME: 15:00"),
            OutputEvent::SessionChanged {
                kind: SessionKind::Qualifying,
                track: "spa".to_string(),
                remaining: Some("15:00".to_string()),
            }
        );
    }

    #[test]
    fn test_priority_order() {
        // Connect marker outranks the error marker.
        assert!(matches!(
            parse_line("[ERR] Eve (1) has connected (x)"),
            OutputEvent::PlayerConnected { .. }
        ));
        // Lobby marker outranks everything after it.
        assert_eq!(
            parse_line("SteamAPI: Lobby registration successful"),
            OutputEvent::LobbyRegistered
        );
        // [S_API FAIL] is matched before the generic SteamAPI rule.
        assert!(matches!(
            parse_line("[S_API FAIL] SteamAPI_Init() failed"),
            OutputEvent::SteamApiFailure { .. }
        ));
    }

    #[test]
    fn test_markers_are_case_sensitive() {
        assert_eq!(parse_line("end of session"), OutputEvent::Unclassified);
        assert_eq!(
            parse_line("lobby registration successful"),
            OutputEvent::Unclassified
        );
    }

    #[test]
    fn test_misc_rules() {
        assert_eq!(
            parse_line("Network stats: Received: 10 bytes Sent: 20 bytes"),
            OutputEvent::NetworkStats {
                received: 10,
                sent: 20
            }
        );
        assert_eq!(
            parse_line("dlopen failed trying to load: steamclient.so"),
            OutputEvent::SteamInitWarning {
                message: "dlopen failed trying to load: steamclient.so".to_string()
            }
        );
        assert_eq!(
            parse_line("CSP handshake received from Bob (3): Version=2144"),
            OutputEvent::CspHandshake {
                player: "Bob".to_string(),
                version: Some(2144)
            }
        );
        assert_eq!(
            parse_line("AssettoServer 0.0.54+abc"),
            OutputEvent::ServerVersion {
                version: "0.0.54+abc".to_string()
            }
        );
        assert_eq!(
            parse_line("Loading cfg/server_cfg.ini"),
            OutputEvent::ConfigLoading {
                file: "cfg/server_cfg.ini".to_string()
            }
        );
        assert_eq!(
            parse_line("Loaded plugin VotingWeatherPlugin"),
            OutputEvent::PluginLoaded {
                plugin: "VotingWeatherPlugin".to_string()
            }
        );
        assert_eq!(
            parse_line("No. AI Slots: 8"),
            OutputEvent::AiSlots { total: Some(8) }
        );
        assert_eq!(
            parse_line("Added checksum for content/tracks/spa/data/surfaces.ini"),
            OutputEvent::ChecksumAdded {
                asset: "content/tracks/spa/data/surfaces.ini".to_string()
            }
        );
        assert_eq!(
            parse_line("Steam authentication succeeded"),
            OutputEvent::SteamAuthSucceeded
        );
    }

    #[test]
    fn test_unmatched_and_blank_lines() {
        assert_eq!(parse_line(""), OutputEvent::Unclassified);
        assert_eq!(parse_line("   \t "), OutputEvent::Unclassified);
        assert_eq!(
            parse_line("Weather: 18C clear"),
            OutputEvent::Unclassified
        );
    }

    #[test]
    fn test_rule_names_match_event_kinds() {
        let samples = [
            "Starting Assetto Corsa Server...",
            "Lobby registration successful",
            "End of session",
            "A (1) has connected (c)",
            "A (1) has disconnected",
            "Next session: RACE",
            "[ERR] boom",
            "Steam authentication succeeded",
            "[S_API FAIL] x",
            "Network stats",
            "SteamAPI init",
            "CSP handshake received from A (0)",
            "AssettoServer 1.0",
            "Loading x.ini",
            "Loaded plugin P",
            "AI Slot 1",
            "Added checksum for x",
        ];
        assert_eq!(samples.len(), RULES.len());
        for (rule, sample) in RULES.iter().zip(samples) {
            assert_eq!(parse_line(sample).kind(), rule.name, "sample {sample:?}");
        }
    }
}
