mod node;
mod node_manager;

pub use self::node::Node;
pub use self::node_manager::NodeManager;

use std::time::Duration;
use ::stats::RemoteStats;
use ::Error;

/// Connection parameters for a Lavalink node.
///
/// Defaults follow the node's `application.yml.example`. Validated when the
/// [`NodeManager`] is constructed; a negative retry count is unrepresentable
/// by construction.
///
/// [`NodeManager`]: struct.NodeManager.html
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Address of the REST API, e.g. `http://127.0.0.1:2333`.
    pub http_host: String,
    /// Address of the WebSocket control channel, e.g. `ws://127.0.0.1:80`.
    pub websocket_host: String,
    /// The authorization token expected by the node.
    pub password: String,
    /// Total number of shards the gateway connection is split into.
    pub num_shards: u64,
    /// Maximum number of connection attempts before the reconnect supervisor
    /// gives up. 0 means unlimited.
    pub max_tries: u64,
    /// Bound on the connect handshake, the REST lookup, and the close
    /// handshake.
    pub timeout: Duration,
}

impl NodeConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.websocket_host.is_empty() {
            return Err(Error::InvalidConfig("websocket_host must not be empty"));
        }

        if self.http_host.is_empty() {
            return Err(Error::InvalidConfig("http_host must not be empty"));
        }

        if self.num_shards == 0 {
            return Err(Error::InvalidConfig("num_shards must be at least 1"));
        }

        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            http_host: "http://127.0.0.1:2333".to_owned(),
            websocket_host: "ws://127.0.0.1:80".to_owned(),
            password: "youshallnotpass".to_owned(),
            num_shards: 1,
            max_tries: 0,
            timeout: Duration::from_secs(10),
        }
    }
}

/// State reported by the node, updated as `stats` payloads arrive.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub stats: Option<RemoteStats>,
}
