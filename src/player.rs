//! Module containing structs for tracking guilds' audio players and issuing
//! play, pause, and other control messages for them.

use futures::unsync::mpsc::Sender as MpscSender;
use futures::{AsyncSink, Sink};
use std::collections::HashMap;
use websocket::OwnedMessage;
use ::decoder::Track;
use ::model::{
    Destroy,
    IntoWebSocketMessage,
    Pause,
    Play,
    Seek,
    Stop,
    VoiceUpdate,
    Volume,
};
use ::Error;

/// The maximum accepted volume setting.
const VOLUME_MAX: u64 = 150;

/// A light wrapper around a hashmap keyed by guild IDs with audio players.
///
/// A guild has an entry here exactly while a voice connection handshake for
/// it has been initiated and not yet torn down.
#[derive(Clone, Debug, Default)]
pub struct AudioPlayerManager {
    players: HashMap<u64, AudioPlayer>,
}

impl AudioPlayerManager {
    /// Creates a new default `AudioPlayerManager`.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an audio player for the guild of the given ID.
    ///
    /// The `sender` must be a clone of the current node's write queue.
    ///
    /// Returns [`Error::PlayerAlreadyExists`] - without touching the
    /// registered player - if the guild already has one.
    ///
    /// [`Error::PlayerAlreadyExists`]: ../enum.Error.html#variant.PlayerAlreadyExists
    pub fn create(
        &mut self,
        guild_id: u64,
        channel_id: u64,
        sender: MpscSender<OwnedMessage>,
    ) -> Result<&mut AudioPlayer, Error> {
        if self.players.contains_key(&guild_id) {
            return Err(Error::PlayerAlreadyExists);
        }

        self.players.insert(guild_id, AudioPlayer::new(guild_id, channel_id, sender));

        Ok(self.players.get_mut(&guild_id).unwrap())
    }

    /// Retrieves an immutable reference to the audio player for the guild,
    /// if it exists.
    pub fn get(&self, guild_id: &u64) -> Option<&AudioPlayer> {
        self.players.get(guild_id)
    }

    /// Retrieves a mutable reference to the audio player for the guild, if
    /// it exists.
    pub fn get_mut(&mut self, guild_id: &u64) -> Option<&mut AudioPlayer> {
        self.players.get_mut(guild_id)
    }

    /// Whether the manager contains a player for the given guild.
    pub fn has(&self, guild_id: &u64) -> bool {
        self.players.contains_key(guild_id)
    }

    /// Removes and returns the guild's player, if it exists.
    pub fn remove(&mut self, guild_id: &u64) -> Option<AudioPlayer> {
        self.players.remove(guild_id)
    }

    /// The IDs of all guilds that currently have a player, in no particular
    /// order.
    pub fn guild_ids(&self) -> Vec<u64> {
        self.players.keys().cloned().collect()
    }

    /// The number of registered players.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Whether no players are registered.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Drops every player.
    pub fn clear(&mut self) {
        self.players.clear();
    }
}

/// Playback state of an [`AudioPlayer`].
///
/// [`AudioPlayer`]: struct.AudioPlayer.html
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlayerState {
    /// No current track. Track end, exceptions, stuck tracks, and stops all
    /// land here; nothing advances automatically.
    Idle,
    Playing,
    Paused,
}

/// Voice server routing information received from the gateway.
#[derive(Clone, Debug)]
pub struct VoiceServerInfo {
    pub token: String,
    pub guild_id: u64,
    pub endpoint: String,
}

/// A change to a player's voice session, applied via
/// [`AudioPlayer::update_session`].
///
/// [`AudioPlayer::update_session`]: struct.AudioPlayer.html#method.update_session
#[derive(Clone, Debug)]
pub enum SessionChange {
    /// The gateway delivered voice server routing for the guild; forward it
    /// to the node.
    Connect(VoiceServerInfo),
    /// The voice session is over; tell the node to destroy the guild's
    /// player.
    Disconnect(u64),
    /// The bot was moved to another voice channel in the same guild.
    Moved(u64),
}

/// An event dispatched to a player from the node.
#[derive(Clone, Copy, Debug)]
pub(crate) enum PlayerEvent {
    PositionUpdate { time: i64, position: i64 },
    TrackEnd,
    TrackException,
    TrackStuck,
}

/// A struct containing the state of a guild's audio player.
#[derive(Clone, Debug)]
pub struct AudioPlayer {
    /// The ID of the guild that the player represents.
    pub guild_id: u64,
    /// The ID of the voice channel the player is bound to.
    pub channel_id: u64,
    /// The playback state of the player.
    pub state: PlayerState,
    /// The last position reported by the node, in milliseconds.
    pub position: i64,
    /// The timestamp of the node's last position report.
    pub time: i64,
    /// The track that the player is playing.
    pub track: Option<Track>,
    /// The volume setting, on a scale of 0 to 150.
    pub volume: u64,
    sender: MpscSender<OwnedMessage>,
    session_id: String,
}

impl AudioPlayer {
    /// Creates a new audio player.
    ///
    /// Using [`AudioPlayerManager::create`] via [`NodeManager::join`] is the
    /// preferred method of creating a new player.
    ///
    /// [`AudioPlayerManager::create`]: struct.AudioPlayerManager.html#method.create
    /// [`NodeManager::join`]: ../nodes/struct.NodeManager.html#method.join
    pub fn new(guild_id: u64, channel_id: u64, sender: MpscSender<OwnedMessage>) -> Self {
        Self {
            state: PlayerState::Idle,
            position: 0,
            time: 0,
            track: None,
            volume: 100,
            session_id: String::new(),
            channel_id,
            guild_id,
            sender,
        }
    }

    /// Sends a message to the node telling it to play a track, and records
    /// it as the current track.
    pub fn play(&mut self, track: &Track) -> Result<(), Error> {
        let msg = Play::new(self.guild_id, &track.track).into_ws_message()?;
        self.send(msg)?;

        self.track = Some(track.clone());
        self.state = PlayerState::Playing;

        Ok(())
    }

    /// Sends a message to the node telling it to pause the player.
    ///
    /// Fails with [`Error::InvalidPlayerState`] - without sending anything -
    /// unless the player is currently playing.
    ///
    /// [`Error::InvalidPlayerState`]: ../enum.Error.html#variant.InvalidPlayerState
    pub fn pause(&mut self) -> Result<(), Error> {
        if self.state != PlayerState::Playing {
            return Err(Error::InvalidPlayerState("the player is not currently playing"));
        }

        let msg = Pause::new(self.guild_id, true).into_ws_message()?;
        self.send(msg)?;

        self.state = PlayerState::Paused;

        Ok(())
    }

    /// Sends a message to the node telling it to resume the player.
    ///
    /// Fails with [`Error::InvalidPlayerState`] - without sending anything -
    /// unless the player is currently paused.
    ///
    /// [`Error::InvalidPlayerState`]: ../enum.Error.html#variant.InvalidPlayerState
    pub fn resume(&mut self) -> Result<(), Error> {
        if self.state != PlayerState::Paused {
            return Err(Error::InvalidPlayerState("the player is not currently paused"));
        }

        let msg = Pause::new(self.guild_id, false).into_ws_message()?;
        self.send(msg)?;

        self.state = PlayerState::Playing;

        Ok(())
    }

    /// Sends a message to the node telling it to stop the player. The voice
    /// connection stays alive.
    pub fn stop(&mut self) -> Result<(), Error> {
        let msg = Stop::new(self.guild_id).into_ws_message()?;
        self.send(msg)?;

        self.track = None;
        self.state = PlayerState::Idle;

        Ok(())
    }

    /// Sends a message to the node telling it to seek the player to a
    /// position, in milliseconds.
    ///
    /// The local position is not touched; the node remains authoritative and
    /// reports the new position through a player update.
    pub fn seek(&mut self, position: i64) -> Result<(), Error> {
        let msg = Seek::new(self.guild_id, position).into_ws_message()?;

        self.send(msg)
    }

    /// Sends a message to the node telling it to mutate the volume setting.
    ///
    /// Fails with [`Error::VolumeOutOfRange`] - without sending anything -
    /// for volumes above 150.
    ///
    /// [`Error::VolumeOutOfRange`]: ../enum.Error.html#variant.VolumeOutOfRange
    pub fn set_volume(&mut self, volume: u64) -> Result<(), Error> {
        if volume > VOLUME_MAX {
            return Err(Error::VolumeOutOfRange(volume));
        }

        let msg = Volume::new(self.guild_id, volume).into_ws_message()?;
        self.send(msg)?;

        self.volume = volume;

        Ok(())
    }

    /// The voice session ID received from the gateway; empty while the
    /// player is not joined to a voice channel.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn set_session_id(&mut self, session_id: String) {
        self.session_id = session_id;
    }

    /// Applies a change to the player's voice session.
    pub(crate) fn update_session(&mut self, change: SessionChange) -> Result<(), Error> {
        match change {
            SessionChange::Connect(server) => {
                let msg = VoiceUpdate::new(
                    server.guild_id,
                    &self.session_id,
                    &server.token,
                    &server.endpoint,
                ).into_ws_message()?;

                self.send(msg)
            },
            SessionChange::Disconnect(guild_id) => {
                let msg = Destroy::new(guild_id).into_ws_message()?;

                self.send(msg)
            },
            SessionChange::Moved(channel_id) => {
                self.channel_id = channel_id;

                Ok(())
            },
        }
    }

    /// Applies an event dispatched from the node.
    pub(crate) fn fire_event(&mut self, event: PlayerEvent) {
        match event {
            PlayerEvent::PositionUpdate { time, position } => {
                self.time = time;
                self.position = position;
            },
            PlayerEvent::TrackEnd | PlayerEvent::TrackException | PlayerEvent::TrackStuck => {
                self.track = None;
                self.state = PlayerState::Idle;
            },
        }
    }

    fn send(&mut self, message: OwnedMessage) -> Result<(), Error> {
        match self.sender.start_send(message) {
            Ok(AsyncSink::Ready) => Ok(()),
            Ok(AsyncSink::NotReady(_)) => Err(Error::SendQueueFull),
            Err(_) => Err(Error::NotConnected),
        }
    }
}
