use futures::future::{self, Either, Future};
use futures::unsync::mpsc::{self, Sender as UnsyncSender};
use futures::unsync::oneshot::{self, Sender as TeardownSender};
use futures::{AsyncSink, Sink, Stream};
use serde::Deserialize;
use serde_json::{self, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::str;
use std::time::Duration;
use super::{NodeConfig, State};
use tokio_core::reactor::{Handle, Timeout};
use websocket::header::Headers;
use websocket::{ClientBuilder, OwnedMessage, WebSocketError};
use ::opcodes::Opcode;
use ::player::{AudioPlayerManager, PlayerEvent};
use ::stats::RemoteStats;
use ::{Error, EventHandler};

/// Outbound messages queued beyond this limit are rejected with
/// [`Error::SendQueueFull`] until the forwarder catches up.
///
/// [`Error::SendQueueFull`]: ../enum.Error.html#variant.SendQueueFull
const SEND_QUEUE_SIZE: usize = 64;

/// A single established control-channel connection to the node.
///
/// Owned by the [`NodeManager`], which replaces the whole `Node` on
/// reconnect. The receive loop and the write forwarder run as spawned tasks;
/// the loop never restarts itself - reconnecting is the manager's
/// supervisor's responsibility.
///
/// [`NodeManager`]: struct.NodeManager.html
pub struct Node {
    connected: Rc<Cell<bool>>,
    sender: UnsyncSender<OwnedMessage>,
    teardown: Option<TeardownSender<()>>,
}

impl Node {
    /// Opens a connection to the node, performing the authorization
    /// handshake and spawning the receive loop.
    ///
    /// Resolves to the connected `Node`, or to an error if the transport
    /// could not be opened within the configured timeout.
    pub fn connect(
        handle: Handle,
        config: NodeConfig,
        user_id: u64,
        players: Rc<RefCell<AudioPlayerManager>>,
        handler: Rc<RefCell<Box<EventHandler>>>,
        state: Rc<RefCell<State>>,
    ) -> Box<Future<Item = Node, Error = Error>> {
        let mut headers = Headers::new();
        headers.set_raw("Authorization", vec![config.password.clone().into_bytes()]);
        headers.set_raw("Num-Shards", vec![config.num_shards.to_string().into_bytes()]);
        headers.set_raw("User-Id", vec![user_id.to_string().into_bytes()]);

        let timer = match Timeout::new(config.timeout, &handle) {
            Ok(timer) => timer,
            Err(why) => return Box::new(future::err(Error::Io(why))),
        };

        let connect_handle = handle.clone();
        let done = future::result(ClientBuilder::new(&config.websocket_host).map_err(Error::from))
            .and_then(move |builder| {
                builder
                    .custom_headers(&headers)
                    .async_connect_insecure(&connect_handle)
                    .map_err(Error::from)
            })
            .select2(timer.map_err(Error::Io))
            .then(|result| match result {
                Ok(Either::A(((duplex, _), _))) => Ok(duplex),
                Ok(Either::B(_)) => Err(Error::TimedOut),
                Err(Either::A((why, _))) | Err(Either::B((why, _))) => Err(why),
            })
            .map(move |duplex| {
                let (user_to_node, node_from_user) = mpsc::channel(SEND_QUEUE_SIZE);
                let (teardown_tx, teardown_rx) = oneshot::channel();
                let connected = Rc::new(Cell::new(true));
                let (sink, stream) = duplex.split();

                // Every write goes through this forwarder, keeping the
                // transport single-writer no matter how many players hold a
                // queue handle.
                let writer = node_from_user
                    .map_err(|_| WebSocketError::ProtocolError("write queue dropped"))
                    .forward(sink)
                    .map(|_| ())
                    .or_else(|why| -> Result<(), ()> {
                        debug!("WebSocket writer ended: {:?}", why);

                        Ok(())
                    });
                handle.spawn(writer);

                let mut reply = user_to_node.clone();
                let read_connected = Rc::clone(&connected);
                let read_players = Rc::clone(&players);
                let read_handler = Rc::clone(&handler);
                let read_state = Rc::clone(&state);

                let reader = stream.for_each(move |message| {
                    match message {
                        OwnedMessage::Text(text) => {
                            trace!("Received text: {:?}", text);

                            handle_message(&text, &read_players, &read_handler, &read_state);
                        },
                        OwnedMessage::Binary(bytes) => {
                            trace!("Received binary: {:?}", bytes);

                            match str::from_utf8(&bytes) {
                                Ok(text) => {
                                    handle_message(text, &read_players, &read_handler, &read_state);
                                },
                                Err(why) => warn!("Received non-UTF-8 binary frame: {:?}", why),
                            }
                        },
                        OwnedMessage::Ping(data) => {
                            debug!("Received a ping: {:?}", data);

                            let _ = reply.start_send(OwnedMessage::Pong(data));
                        },
                        OwnedMessage::Pong(data) => {
                            debug!("Received a pong: {:?}", data);
                        },
                        OwnedMessage::Close(data) => {
                            info!("Received a close: {:?}", data);

                            if read_connected.replace(false) {
                                connection_lost(&read_players);
                            }

                            let _ = reply.start_send(OwnedMessage::Close(None));
                        },
                    }

                    Ok(())
                });

                let cleanup_connected = Rc::clone(&connected);
                let cleanup_players = Rc::clone(&players);
                let done = reader
                    .map_err(|why| warn!("WebSocket receive loop errored: {:?}", why))
                    .select2(teardown_rx)
                    .then(move |_| -> Result<(), ()> {
                        // The transport died without a close frame, or the
                        // close handshake timed out.
                        if cleanup_connected.replace(false) {
                            connection_lost(&cleanup_players);
                        }

                        Ok(())
                    });
                handle.spawn(done);

                Node {
                    sender: user_to_node,
                    teardown: Some(teardown_tx),
                    connected,
                }
            });

        Box::new(done)
    }

    /// Whether the connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected.get()
    }

    /// Queues a complete text frame for sending.
    pub fn send(&mut self, text: String) -> Result<(), Error> {
        match self.sender.start_send(OwnedMessage::Text(text)) {
            Ok(AsyncSink::Ready) => Ok(()),
            Ok(AsyncSink::NotReady(_)) => Err(Error::SendQueueFull),
            Err(_) => Err(Error::NotConnected),
        }
    }

    /// A clone of the write queue, for handing to players.
    pub(crate) fn sender(&self) -> UnsyncSender<OwnedMessage> {
        self.sender.clone()
    }

    /// Sends a close code over the WebSocket, terminating the connection.
    ///
    /// The receive loop gets the timeout window to observe the server's
    /// answering close frame before it is torn down.
    pub fn close(&mut self, handle: &Handle, timeout: Duration) {
        let _ = self.sender.start_send(OwnedMessage::Close(None));

        if let Some(teardown) = self.teardown.take() {
            match Timeout::new(timeout, handle) {
                Ok(timer) => {
                    handle.spawn(timer.then(move |_| -> Result<(), ()> {
                        let _ = teardown.send(());

                        Ok(())
                    }));
                },
                Err(why) => {
                    warn!("Failed to create close timer: {:?}", why);

                    let _ = teardown.send(());
                },
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn stub(sender: UnsyncSender<OwnedMessage>) -> Node {
        Node {
            connected: Rc::new(Cell::new(true)),
            teardown: None,
            sender,
        }
    }
}

/// Drops every registered player. Playback state can not be assumed intact
/// once the node connection has gone away.
fn connection_lost(players: &Rc<RefCell<AudioPlayerManager>>) {
    let mut players = players.borrow_mut();
    let dropped = players.len();
    players.clear();

    if dropped > 0 {
        info!("Dropped {} player(s) after losing the node connection", dropped);
    }
}

/// Dispatches one decoded control-channel message.
///
/// Anything unrecognized - unparseable JSON, an unknown `op`, an unknown
/// event type - is logged and dropped so newer node protocols never take the
/// connection down.
pub(crate) fn handle_message(
    text: &str,
    players: &Rc<RefCell<AudioPlayerManager>>,
    handler: &Rc<RefCell<Box<EventHandler>>>,
    state: &Rc<RefCell<State>>,
) {
    let json = match serde_json::from_str::<Value>(text) {
        Ok(json) => json,
        Err(why) => {
            warn!("Error parsing received JSON: {:?}", why);

            return;
        },
    };

    let op = match json.get("op").map(Opcode::deserialize) {
        Some(Ok(op)) => op,
        Some(Err(why)) => {
            warn!("Failed to deserialize opcode: {:?}", why);

            return;
        },
        None => {
            warn!("No opcode present in payload: {:?}", json);

            return;
        },
    };

    match op {
        Opcode::PlayerUpdate => handle_player_update(&json, players, handler),
        Opcode::Event => handle_event(&json, players, handler),
        Opcode::Stats => handle_stats(&json, handler, state),
        other => debug!("Received unexpected opcode: {:?}", other),
    }
}

fn guild_id_of(json: &Value) -> Option<u64> {
    match json.get("guildId") {
        Some(&Value::String(ref id)) => id.parse().ok(),
        Some(value) => value.as_u64(),
        None => None,
    }
}

fn handle_player_update(
    json: &Value,
    players: &Rc<RefCell<AudioPlayerManager>>,
    handler: &Rc<RefCell<Box<EventHandler>>>,
) {
    let guild_id = match guild_id_of(json) {
        Some(guild_id) => guild_id,
        None => {
            warn!("playerUpdate without a usable guild id: {:?}", json);

            return;
        },
    };

    let position = json["state"]["position"].as_i64().unwrap_or(0);
    let time = json["state"]["time"].as_i64().unwrap_or(0);

    // The registry borrow has to end before the handler runs.
    let track = {
        let mut players = players.borrow_mut();

        match players.get_mut(&guild_id) {
            Some(player) => {
                player.fire_event(PlayerEvent::PositionUpdate { time, position });

                Some(player.track.clone())
            },
            None => None,
        }
    };

    match track {
        Some(track) => handler.borrow_mut().player_update(guild_id, track, position),
        None => debug!("playerUpdate for guild {} without a player", guild_id),
    }
}

fn handle_event(
    json: &Value,
    players: &Rc<RefCell<AudioPlayerManager>>,
    handler: &Rc<RefCell<Box<EventHandler>>>,
) {
    let guild_id = match guild_id_of(json) {
        Some(guild_id) => guild_id,
        None => {
            warn!("event without a usable guild id: {:?}", json);

            return;
        },
    };

    let kind = match json["type"].as_str() {
        Some(kind) => kind,
        None => {
            warn!("event without a type: {:?}", json);

            return;
        },
    };

    let event = match kind {
        "TrackEndEvent" => PlayerEvent::TrackEnd,
        "TrackExceptionEvent" => PlayerEvent::TrackException,
        "TrackStuckEvent" => PlayerEvent::TrackStuck,
        other => {
            debug!("Received unknown event type: {}", other);

            return;
        },
    };

    // Take the pre-update track, then let the event settle the player back
    // to idle. The registry borrow has to end before the handler runs.
    let track = {
        let mut players = players.borrow_mut();

        match players.get_mut(&guild_id) {
            Some(player) => {
                let track = player.track.clone();
                player.fire_event(event);

                Some(track)
            },
            None => None,
        }
    };

    let track = match track {
        Some(track) => track,
        None => {
            debug!("{} for guild {} without a player", kind, guild_id);

            return;
        },
    };

    let mut handler = handler.borrow_mut();

    match event {
        PlayerEvent::TrackEnd => {
            handler.track_end(guild_id, track, json["reason"].as_str().unwrap_or(""));
        },
        PlayerEvent::TrackException => {
            handler.track_exception(guild_id, track, json["error"].as_str().unwrap_or(""));
        },
        PlayerEvent::TrackStuck => {
            handler.track_stuck(guild_id, track, json["thresholdMs"].as_i64().unwrap_or(0));
        },
        PlayerEvent::PositionUpdate { .. } => {},
    }
}

fn handle_stats(
    json: &Value,
    handler: &Rc<RefCell<Box<EventHandler>>>,
    state: &Rc<RefCell<State>>,
) {
    let stats = match serde_json::from_value::<RemoteStats>(json.clone()) {
        Ok(stats) => stats,
        Err(why) => {
            warn!("Failed to deserialize node stats: {:?}", why);

            return;
        },
    };

    state.borrow_mut().stats = Some(stats.clone());
    handler.borrow_mut().stats(stats);
}
