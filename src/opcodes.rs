//! The `op` discriminators used by messages on the node's control channel.

/// Opcode of a control-channel message, in either direction.
///
/// An inbound payload whose `op` is not one of these fails to deserialize;
/// dispatch logs and drops it rather than treating it as fatal, keeping the
/// client forward-compatible with newer node protocols.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Opcode {
    /// Outbound: tear down a guild's player on the node.
    Destroy,
    /// Inbound: a player event, sub-typed by the payload's `type` field.
    Event,
    /// Outbound: pause or unpause a guild's player.
    Pause,
    /// Inbound: a periodic position report for a guild's player.
    PlayerUpdate,
    /// Outbound: play a track on a guild's player.
    Play,
    /// Outbound: seek a guild's player to a position.
    Seek,
    /// Inbound: periodic statistics about the node itself.
    Stats,
    /// Outbound: stop a guild's player.
    Stop,
    /// Outbound: forward a voice session update to the node.
    VoiceUpdate,
    /// Outbound: set the volume of a guild's player.
    Volume,
}
