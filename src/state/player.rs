use serde::Serialize;

/// A driver connected to the game server, keyed by Steam id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub name: String,
    pub steam_id: String,
    pub car_model: String,
    /// Best lap in milliseconds.
    pub best_lap_ms: Option<u64>,
    /// Most recent lap in milliseconds.
    pub last_lap_ms: Option<u64>,
    pub latency_ms: u32,
    pub packet_loss_percent: f64,
}

impl Player {
    pub fn new(
        name: impl Into<String>,
        steam_id: impl Into<String>,
        car_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            steam_id: steam_id.into(),
            car_model: car_model.into(),
            best_lap_ms: None,
            last_lap_ms: None,
            latency_ms: 0,
            packet_loss_percent: 0.0,
        }
    }
}
