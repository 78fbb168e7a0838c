use std::time::Duration;

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{Client, RedisResult};

/// Upper bound for a single command. Must stay above the XREADGROUP block time.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Open a connection manager on its own socket.
///
/// The manager reconnects transparently and is cheap to clone. Clones share
/// one socket, so commands from every clone are pipelined in order: blocking
/// reads need a manager of their own.
pub async fn create_redis_pool(client: &Client) -> RedisResult<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_response_timeout(RESPONSE_TIMEOUT)
        .set_connection_timeout(CONNECTION_TIMEOUT);
    ConnectionManager::new_with_config(client.clone(), config).await
}

/// Strip credentials from a connection URL before logging it.
pub fn redacted(redis_url: &str) -> String {
    match redis_url.split_once("://") {
        Some((scheme, rest)) => {
            let host = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
            format!("{scheme}://{host}")
        }
        None => redis_url.to_string(),
    }
}
