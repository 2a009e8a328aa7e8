//! Statistics periodically published by the node over the control channel.

/// A `stats` payload from the node.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStats {
    /// Number of players the node is tracking.
    pub players: i32,
    /// Number of players currently playing audio.
    pub playing_players: i32,
    /// Milliseconds the node has been up.
    pub uptime: i64,
    pub memory: MemoryStats,
    pub cpu: CpuStats,
    /// Audio frame statistics. Only reported once the node has players, so
    /// its absence is expected rather than an error.
    #[serde(default)]
    pub frame_stats: Option<FrameStats>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub reservable: i64,
    pub used: i64,
    pub free: i64,
    pub allocated: i64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: i32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    /// Average frames sent per minute.
    pub sent: i32,
    /// Average frame deficit per minute.
    pub deficit: i32,
    /// Average nulled frames per minute.
    pub nulled: i32,
}
