use futures::future::{self, Future, Loop};
use hyper::client::{Client as HyperClient, HttpConnector};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use super::node::Node;
use super::{NodeConfig, State};
use tokio_core::reactor::{Handle, Timeout};
use ::decoder::Track;
use ::player::{AudioPlayerManager, SessionChange, VoiceServerInfo};
use ::rest::{self, LoadedTracks};
use ::stats::RemoteStats;
use ::{Error, EventHandler};

/// Initial wait between reconnect attempts.
const BACKOFF_BASE_MS: u64 = 3_000;
/// Added to the wait after every failed attempt; reset after a success.
const BACKOFF_STEP_MS: u64 = 1_000;

/// Owner of the node connection and the per-guild player registry.
///
/// All of the registry, the current [`Node`], and the node [`State`] are
/// shared with the spawned supervisor and receive loop through `Rc`s; every
/// multi-step registry mutation happens under a single `RefCell` borrow.
///
/// [`Node`]: struct.Node.html
/// [`State`]: struct.State.html
pub struct NodeManager {
    config: NodeConfig,
    current_user: Cell<Option<u64>>,
    handle: Handle,
    handler: Rc<RefCell<Box<EventHandler>>>,
    http: HyperClient<HttpConnector>,
    node: Rc<RefCell<Option<Node>>>,
    pub player_manager: Rc<RefCell<AudioPlayerManager>>,
    shutdown: Rc<Cell<bool>>,
    state: Rc<RefCell<State>>,
}

impl NodeManager {
    /// Creates a new manager, validating the configuration.
    pub fn new(
        handle: Handle,
        config: NodeConfig,
        handler: Box<EventHandler>,
    ) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            current_user: Cell::new(None),
            handler: Rc::new(RefCell::new(handler)),
            http: HyperClient::new(&handle),
            node: Rc::new(RefCell::new(None)),
            player_manager: Rc::new(RefCell::new(AudioPlayerManager::new())),
            shutdown: Rc::new(Cell::new(false)),
            state: Rc::new(RefCell::new(State::default())),
            config,
            handle,
        })
    }

    /// Starts the reconnect supervisor, which opens - and keeps reopening -
    /// the node connection.
    ///
    /// Fails with [`Error::CurrentUserUnavailable`] until the voice gateway
    /// has identified: the handshake requires the current user's ID.
    ///
    /// [`Error::CurrentUserUnavailable`]: ../enum.Error.html#variant.CurrentUserUnavailable
    pub fn start(&self) -> Result<(), Error> {
        let user_id = match self.handler.borrow_mut().current_user_id() {
            Some(user_id) => user_id,
            None => return Err(Error::CurrentUserUnavailable),
        };

        self.current_user.set(Some(user_id));
        self.shutdown.set(false);

        self.handle.spawn(supervise(
            self.handle.clone(),
            self.config.clone(),
            user_id,
            Rc::clone(&self.node),
            Rc::clone(&self.player_manager),
            Rc::clone(&self.handler),
            Rc::clone(&self.state),
            Rc::clone(&self.shutdown),
        ));

        Ok(())
    }

    /// Cancels the reconnect supervisor and closes the node connection.
    ///
    /// The supervisor checks the cancellation flag once per iteration, so it
    /// winds down at its next wake-up rather than preemptively.
    pub fn stop(&self) {
        self.shutdown.set(true);

        if let Some(mut node) = self.node.borrow_mut().take() {
            node.close(&self.handle, self.config.timeout);
        }
    }

    /// Whether a node connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.node.borrow().as_ref().map(Node::is_connected).unwrap_or(false)
    }

    /// The statistics most recently published by the node, if any.
    pub fn stats(&self) -> Option<RemoteStats> {
        self.state.borrow().stats.clone()
    }

    /// Joins a voice channel and registers a player for its guild.
    ///
    /// The guild's voice connection is dropped first so the gateway hands
    /// out a fresh voice session ID. Resolves once the join has been
    /// initiated; the registered player is then available through
    /// [`player_manager`].
    ///
    /// Fails with [`Error::PlayerAlreadyExists`] - leaving the existing
    /// player untouched - if the guild already has one, and with
    /// [`Error::NotConnected`] if no node connection is up.
    ///
    /// [`Error::NotConnected`]: ../enum.Error.html#variant.NotConnected
    /// [`Error::PlayerAlreadyExists`]: ../enum.Error.html#variant.PlayerAlreadyExists
    /// [`player_manager`]: #structfield.player_manager
    pub fn join(&self, guild_id: u64, channel_id: u64)
        -> Box<Future<Item = (), Error = Error>> {
        if self.player_manager.borrow().has(&guild_id) {
            return Box::new(future::err(Error::PlayerAlreadyExists));
        }

        let sender = match *self.node.borrow() {
            Some(ref node) if node.is_connected() => node.sender(),
            _ => return Box::new(future::err(Error::NotConnected)),
        };

        let players = Rc::clone(&self.player_manager);
        let handler = Rc::clone(&self.handler);

        // Leave first: a stale voice connection would keep its old session
        // id, which the node can not resume from.
        let leave = self.handler.borrow_mut().leave_voice(guild_id);
        let done = leave.then(move |_| -> Box<Future<Item = (), Error = Error>> {
            {
                let mut players = players.borrow_mut();

                if let Err(why) = players.create(guild_id, channel_id, sender) {
                    return Box::new(future::err(why));
                }
            }

            let join = handler.borrow_mut().join_voice(guild_id, channel_id);

            Box::new(join.then(move |result| match result {
                Ok(()) => Ok(()),
                Err(()) => {
                    players.borrow_mut().remove(&guild_id);

                    Err(Error::VoiceJoinFailed)
                },
            }))
        });

        Box::new(done)
    }

    /// Leaves a guild's voice channel, destroying its player on the node and
    /// removing it from the registry.
    ///
    /// Fails with [`Error::PlayerNotFound`] if the guild has no player.
    ///
    /// [`Error::PlayerNotFound`]: ../enum.Error.html#variant.PlayerNotFound
    pub fn leave(&self, guild_id: u64) -> Box<Future<Item = (), Error = Error>> {
        {
            let mut players = self.player_manager.borrow_mut();

            let mut player = match players.remove(&guild_id) {
                Some(player) => player,
                None => return Box::new(future::err(Error::PlayerNotFound)),
            };

            if let Err(why) = player.update_session(SessionChange::Disconnect(guild_id)) {
                warn!("Failed to send destroy for guild {}: {:?}", guild_id, why);
            }
        }

        let done = self.handler.borrow_mut()
            .leave_voice(guild_id)
            .then(|_| -> Result<(), Error> { Ok(()) });

        Box::new(done)
    }

    /// Resolves an identifier through the node's REST API into the full
    /// typed response.
    pub fn load_tracks(&self, identifier: &str)
        -> Box<Future<Item = Option<LoadedTracks>, Error = Error>> {
        rest::load_tracks(
            &self.http,
            &self.handle,
            &self.config.http_host,
            &self.config.password,
            identifier,
            self.config.timeout,
        )
    }

    /// Resolves an identifier into all of its tracks, or `None` when the
    /// response yields no track array.
    pub fn get_tracks(&self, identifier: &str)
        -> Box<Future<Item = Option<Vec<Track>>, Error = Error>> {
        Box::new(self.load_tracks(identifier).map(|loaded| {
            loaded.map(|loaded| loaded.tracks)
        }))
    }

    /// Resolves an identifier into its first track, if any.
    pub fn get_track(&self, identifier: &str)
        -> Box<Future<Item = Option<Track>, Error = Error>> {
        Box::new(self.load_tracks(identifier).map(|loaded| {
            loaded.and_then(|loaded| loaded.tracks.into_iter().next())
        }))
    }

    /// Handles a voice server update from the gateway by forwarding the
    /// session to the node.
    ///
    /// A no-op - logged - when the guild has no player.
    pub fn voice_server_update(&self, guild_id: u64, token: &str, endpoint: &str) {
        debug!("VOICE_SERVER_UPDATE({}): updating session", guild_id);

        let mut players = self.player_manager.borrow_mut();

        match players.get_mut(&guild_id) {
            Some(player) => {
                let info = VoiceServerInfo {
                    token: token.to_owned(),
                    endpoint: endpoint.to_owned(),
                    guild_id,
                };

                if let Err(why) = player.update_session(SessionChange::Connect(info)) {
                    warn!("Failed to send voice update for guild {}: {:?}", guild_id, why);
                }
            },
            None => debug!("Voice server update for guild {} without a player", guild_id),
        }
    }

    /// Handles a voice state update from the gateway.
    ///
    /// Only the bot's own states matter here. Gaining a channel stores the
    /// voice session ID on the guild's player; moving between channels of
    /// the guild re-binds the player; losing the channel destroys the
    /// player on the node and deregisters it.
    pub fn voice_state_update(
        &self,
        user_id: u64,
        guild_id: u64,
        channel_id: Option<u64>,
        session_id: &str,
    ) {
        if self.current_user.get() != Some(user_id) {
            return;
        }

        let mut players = self.player_manager.borrow_mut();

        match channel_id {
            Some(channel_id) => {
                match players.get_mut(&guild_id) {
                    Some(player) => {
                        debug!("VOICE_STATE_UPDATE({}): connected", guild_id);

                        if player.channel_id != channel_id {
                            let _ = player.update_session(SessionChange::Moved(channel_id));
                        }

                        player.set_session_id(session_id.to_owned());
                    },
                    None => debug!("Voice state update for guild {} without a player", guild_id),
                }
            },
            None => {
                debug!("VOICE_STATE_UPDATE({}): disconnected", guild_id);

                if let Some(mut player) = players.remove(&guild_id) {
                    player.set_session_id(String::new());

                    if let Err(why) = player.update_session(SessionChange::Disconnect(guild_id)) {
                        warn!("Failed to send destroy for guild {}: {:?}", guild_id, why);
                    }
                }
            },
        }
    }

    /// Tears down every player whose guild is served by the given shard.
    ///
    /// Call when one shard of a sharded gateway connection drops: its voice
    /// sessions are gone, and players must not outlive them.
    pub fn shard_disconnected(&self, shard_id: u64) {
        let num_shards = self.config.num_shards;

        self.sweep(|guild_id| (guild_id >> 22) % num_shards == shard_id);
    }

    /// Tears down every player. The monolithic-connection counterpart of
    /// [`shard_disconnected`].
    ///
    /// [`shard_disconnected`]: #method.shard_disconnected
    pub fn gateway_disconnected(&self) {
        self.sweep(|_| true);
    }

    fn sweep<F: Fn(u64) -> bool>(&self, affected: F) {
        // One registry borrow for the whole multi-step teardown.
        let mut players = self.player_manager.borrow_mut();

        let guild_ids = players.guild_ids();

        for guild_id in guild_ids {
            if !affected(guild_id) {
                continue;
            }

            if let Some(mut player) = players.remove(&guild_id) {
                player.set_session_id(String::new());

                if let Err(why) = player.update_session(SessionChange::Disconnect(guild_id)) {
                    warn!("Failed to send destroy for guild {}: {:?}", guild_id, why);
                }
            }
        }
    }
}

impl Drop for NodeManager {
    /// Drops the manager, closing the node connection if possible.
    fn drop(&mut self) {
        self.stop();
    }
}

/// The reconnect supervisor loop.
///
/// Polls the connection state once per backoff interval: connects when
/// disconnected, backs off further after each failure, resets after a
/// success, and winds down - with a warning, not a crash - once the maximum
/// number of tries is reached. Because the loop keeps polling after a successful
/// connect, an unexpected close (which flips the connected flag and clears
/// the registry) is observed on the next tick and leads straight back into
/// connection attempts.
fn supervise(
    handle: Handle,
    config: NodeConfig,
    user_id: u64,
    node: Rc<RefCell<Option<Node>>>,
    players: Rc<RefCell<AudioPlayerManager>>,
    handler: Rc<RefCell<Box<EventHandler>>>,
    state: Rc<RefCell<State>>,
    shutdown: Rc<Cell<bool>>,
) -> Box<Future<Item = (), Error = ()>> {
    let base = Duration::from_millis(BACKOFF_BASE_MS);

    let done = future::loop_fn((0u64, base), move |(tries, wait)|
        -> Box<Future<Item = Loop<(), (u64, Duration)>, Error = ()>> {
        if shutdown.get() {
            debug!("Reconnect supervisor cancelled");

            return Box::new(future::ok(Loop::Break(())));
        }

        let connected = node.borrow().as_ref().map(Node::is_connected).unwrap_or(false);

        if connected {
            return Box::new(sleep(&handle, base).map(move |_| Loop::Continue((0, base))));
        }

        if config.max_tries != 0 && tries >= config.max_tries {
            warn!("Maximum number of tries reached");

            return Box::new(future::ok(Loop::Break(())));
        }

        let slot = Rc::clone(&node);
        let sleep_handle = handle.clone();
        let host = config.websocket_host.clone();

        let attempt = Node::connect(
            handle.clone(),
            config.clone(),
            user_id,
            Rc::clone(&players),
            Rc::clone(&handler),
            Rc::clone(&state),
        ).then(move |result| -> Box<Future<Item = Loop<(), (u64, Duration)>, Error = ()>> {
            match result {
                Ok(node) => {
                    info!("Connected to node at {}", host);

                    *slot.borrow_mut() = Some(node);

                    Box::new(sleep(&sleep_handle, base).map(move |_| {
                        Loop::Continue((0, base))
                    }))
                },
                Err(why) => {
                    warn!(
                        "Failed to connect to node at {}, waiting {}s: {:?}",
                        host,
                        wait.as_secs(),
                        why,
                    );

                    let next = wait + Duration::from_millis(BACKOFF_STEP_MS);

                    Box::new(sleep(&sleep_handle, wait).map(move |_| {
                        Loop::Continue((tries + 1, next))
                    }))
                },
            }
        });

        Box::new(attempt)
    });

    Box::new(done)
}

fn sleep(handle: &Handle, duration: Duration) -> Box<Future<Item = (), Error = ()>> {
    match Timeout::new(duration, handle) {
        Ok(timer) => Box::new(timer.map_err(|why| warn!("Timer error: {:?}", why))),
        Err(why) => {
            warn!("Failed to create timer: {:?}", why);

            Box::new(future::ok(()))
        },
    }
}

#[cfg(test)]
mod tests {
    use futures::unsync::mpsc::Sender;
    use std::cell::RefCell;
    use std::rc::Rc;
    use super::super::node::Node;
    use super::super::NodeConfig;
    use super::NodeManager;
    use tokio_core::reactor::Core;
    use serde_json::Value;
    use websocket::OwnedMessage;
    use ::player::PlayerState;
    use ::test_support::{channel_pair, drain, sample_track, Recorded, RecordingHandler};
    use ::Error;

    fn manager(core: &Core, user_id: Option<u64>) -> (NodeManager, Rc<RefCell<Vec<Recorded>>>) {
        manager_with_config(core, user_id, NodeConfig::default())
    }

    fn manager_with_config(
        core: &Core,
        user_id: Option<u64>,
        config: NodeConfig,
    ) -> (NodeManager, Rc<RefCell<Vec<Recorded>>>) {
        let (handler, events) = RecordingHandler::new(user_id);
        let manager = NodeManager::new(core.handle(), config, Box::new(handler)).unwrap();
        manager.current_user.set(user_id);

        (manager, events)
    }

    fn attach_node(manager: &NodeManager, sender: Sender<OwnedMessage>) {
        *manager.node.borrow_mut() = Some(Node::stub(sender));
    }

    fn ops_of(messages: &[Value]) -> Vec<String> {
        messages.iter()
            .map(|message| message["op"].as_str().unwrap().to_owned())
            .collect()
    }

    #[test]
    fn test_new_rejects_empty_hosts() {
        let core = Core::new().unwrap();
        let (handler, _events) = RecordingHandler::new(Some(1));

        let config = NodeConfig {
            websocket_host: String::new(),
            ..NodeConfig::default()
        };

        match NodeManager::new(core.handle(), config, Box::new(handler)) {
            Err(Error::InvalidConfig(_)) => {},
            other => panic!("expected InvalidConfig, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_start_requires_the_gateway_identity() {
        let core = Core::new().unwrap();
        let (manager, _events) = manager(&core, None);

        match manager.start() {
            Err(Error::CurrentUserUnavailable) => {},
            other => panic!("expected CurrentUserUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_join_registers_a_player_after_a_fresh_leave() {
        let mut core = Core::new().unwrap();
        let (manager, events) = manager(&core, Some(10));
        let (tx, _rx) = channel_pair();
        attach_node(&manager, tx);

        core.run(manager.join(1, 2)).unwrap();

        assert_eq!(*events.borrow(), vec![
            Recorded::LeaveVoice(1),
            Recorded::JoinVoice(1, 2),
        ]);

        let players = manager.player_manager.borrow();
        let player = players.get(&1).unwrap();
        assert_eq!(player.channel_id, 2);
        assert_eq!(player.state, PlayerState::Idle);
    }

    #[test]
    fn test_join_rejects_duplicates_without_mutation() {
        let mut core = Core::new().unwrap();
        let (manager, _events) = manager(&core, Some(10));
        let (tx, _rx) = channel_pair();
        attach_node(&manager, tx.clone());

        manager.player_manager.borrow_mut()
            .create(1, 2, tx)
            .unwrap()
            .play(&sample_track())
            .unwrap();

        match core.run(manager.join(1, 9)) {
            Err(Error::PlayerAlreadyExists) => {},
            other => panic!("expected PlayerAlreadyExists, got {:?}", other),
        }

        let players = manager.player_manager.borrow();
        let player = players.get(&1).unwrap();
        assert_eq!(player.channel_id, 2);
        assert_eq!(player.state, PlayerState::Playing);
    }

    #[test]
    fn test_join_requires_a_connection() {
        let mut core = Core::new().unwrap();
        let (manager, _events) = manager(&core, Some(10));

        match core.run(manager.join(1, 2)) {
            Err(Error::NotConnected) => {},
            other => panic!("expected NotConnected, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_voice_join_deregisters_the_player() {
        let mut core = Core::new().unwrap();
        let (mut handler, _events) = RecordingHandler::new(Some(10));
        handler.fail_join = true;

        let manager = NodeManager::new(
            core.handle(),
            NodeConfig::default(),
            Box::new(handler),
        ).unwrap();

        let (tx, _rx) = channel_pair();
        attach_node(&manager, tx);

        match core.run(manager.join(1, 2)) {
            Err(Error::VoiceJoinFailed) => {},
            other => panic!("expected VoiceJoinFailed, got {:?}", other),
        }

        assert!(manager.player_manager.borrow().is_empty());
    }

    #[test]
    fn test_leave_destroys_and_deregisters() {
        let mut core = Core::new().unwrap();
        let (manager, events) = manager(&core, Some(10));
        let (tx, mut rx) = channel_pair();
        attach_node(&manager, tx.clone());

        manager.player_manager.borrow_mut().create(1, 2, tx).unwrap();

        core.run(manager.leave(1)).unwrap();

        assert!(manager.player_manager.borrow().is_empty());
        assert_eq!(ops_of(&drain(&mut rx)), vec!["destroy"]);
        assert_eq!(*events.borrow(), vec![Recorded::LeaveVoice(1)]);

        match core.run(manager.leave(1)) {
            Err(Error::PlayerNotFound) => {},
            other => panic!("expected PlayerNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_voice_session_flow_produces_a_voice_update() {
        let mut core = Core::new().unwrap();
        let (manager, _events) = manager(&core, Some(10));
        let (tx, mut rx) = channel_pair();
        attach_node(&manager, tx);

        core.run(manager.join(1, 2)).unwrap();

        manager.voice_state_update(10, 1, Some(2), "sess123");
        assert_eq!(manager.player_manager.borrow().get(&1).unwrap().session_id(), "sess123");

        manager.voice_server_update(1, "tok", "voice.example.com");

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["op"], Value::String("voiceUpdate".to_owned()));
        assert_eq!(messages[0]["guildId"], Value::String("1".to_owned()));
        assert_eq!(messages[0]["sessionId"], Value::String("sess123".to_owned()));
        assert_eq!(messages[0]["event"]["token"], Value::String("tok".to_owned()));
        assert_eq!(
            messages[0]["event"]["endpoint"],
            Value::String("voice.example.com".to_owned()),
        );
    }

    #[test]
    fn test_foreign_voice_states_are_ignored() {
        let mut core = Core::new().unwrap();
        let (manager, _events) = manager(&core, Some(10));
        let (tx, _rx) = channel_pair();
        attach_node(&manager, tx);

        core.run(manager.join(1, 2)).unwrap();

        // Another user joining the channel must not leak a session id in.
        manager.voice_state_update(99, 1, Some(2), "not-ours");

        assert_eq!(manager.player_manager.borrow().get(&1).unwrap().session_id(), "");
    }

    #[test]
    fn test_losing_the_channel_destroys_the_player() {
        let mut core = Core::new().unwrap();
        let (manager, _events) = manager(&core, Some(10));
        let (tx, mut rx) = channel_pair();
        attach_node(&manager, tx);

        core.run(manager.join(1, 2)).unwrap();
        manager.voice_state_update(10, 1, Some(2), "sess123");

        manager.voice_state_update(10, 1, None, "");

        assert!(manager.player_manager.borrow().is_empty());
        assert_eq!(ops_of(&drain(&mut rx)), vec!["destroy"]);
    }

    #[test]
    fn test_moving_channels_rebinds_the_player() {
        let mut core = Core::new().unwrap();
        let (manager, _events) = manager(&core, Some(10));
        let (tx, _rx) = channel_pair();
        attach_node(&manager, tx);

        core.run(manager.join(1, 2)).unwrap();
        manager.voice_state_update(10, 1, Some(7), "sess456");

        let players = manager.player_manager.borrow();
        let player = players.get(&1).unwrap();
        assert_eq!(player.channel_id, 7);
        assert_eq!(player.session_id(), "sess456");
    }

    #[test]
    fn test_shard_disconnect_sweeps_only_its_guilds() {
        let core = Core::new().unwrap();
        let config = NodeConfig {
            num_shards: 2,
            ..NodeConfig::default()
        };
        let (manager, _events) = manager_with_config(&core, Some(10), config);
        let (tx, mut rx) = channel_pair();

        // Shards: (guild_id >> 22) % 2.
        let on_shard_zero = 2 << 22;
        let on_shard_one = 1 << 22;
        let also_shard_one = 3 << 22;

        {
            let mut players = manager.player_manager.borrow_mut();
            players.create(on_shard_zero, 1, tx.clone()).unwrap();
            players.create(on_shard_one, 1, tx.clone()).unwrap();
            players.create(also_shard_one, 1, tx).unwrap();
        }

        manager.shard_disconnected(1);

        let players = manager.player_manager.borrow();
        assert_eq!(players.len(), 1);
        assert!(players.has(&on_shard_zero));
        assert_eq!(ops_of(&drain(&mut rx)), vec!["destroy", "destroy"]);
    }

    #[test]
    fn test_gateway_disconnect_sweeps_everything() {
        let core = Core::new().unwrap();
        let (manager, _events) = manager(&core, Some(10));
        let (tx, mut rx) = channel_pair();

        {
            let mut players = manager.player_manager.borrow_mut();
            players.create(1, 1, tx.clone()).unwrap();
            players.create(2, 1, tx.clone()).unwrap();
            players.create(3, 1, tx).unwrap();
        }

        manager.gateway_disconnected();

        assert!(manager.player_manager.borrow().is_empty());
        assert_eq!(ops_of(&drain(&mut rx)), vec!["destroy", "destroy", "destroy"]);
    }
}
