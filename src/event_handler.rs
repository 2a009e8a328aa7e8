use futures::Future;
use ::decoder::Track;
use ::stats::RemoteStats;

/// The seam between the node manager and the voice gateway, plus the public
/// notification fan-out.
///
/// The three tymethods are the operations the manager needs from the
/// gateway; the remaining methods are no-op notification hooks that
/// consumers override for the events they care about. Hooks receive guild
/// IDs and owned values rather than references into the player registry.
pub trait EventHandler {
    /// Tymethod called for retrieving the gateway's current user ID, if the
    /// gateway has identified yet.
    fn current_user_id(&mut self) -> Option<u64>;

    /// Tymethod called for initiating a voice channel join over the gateway.
    fn join_voice(&mut self, guild_id: u64, channel_id: u64)
        -> Box<Future<Item = (), Error = ()>>;

    /// Tymethod called for leaving a guild's voice channel over the gateway.
    fn leave_voice(&mut self, guild_id: u64)
        -> Box<Future<Item = (), Error = ()>>;

    /// Called when the node reports a player's position. The player's state
    /// has already been updated.
    fn player_update(&mut self, _guild_id: u64, _track: Option<Track>, _position: i64) {}

    /// Called when a track ended. The player is idle again; starting the
    /// next track is the consumer's responsibility.
    fn track_end(&mut self, _guild_id: u64, _track: Option<Track>, _reason: &str) {}

    /// Called when the node reports an error playing a track. The player is
    /// idle again.
    fn track_exception(&mut self, _guild_id: u64, _track: Option<Track>, _error: &str) {}

    /// Called when a track got stuck for at least the threshold duration.
    /// The player is idle again.
    fn track_stuck(&mut self, _guild_id: u64, _track: Option<Track>, _threshold_ms: i64) {}

    /// Called when the node publishes fresh statistics.
    fn stats(&mut self, _stats: RemoteStats) {}
}
