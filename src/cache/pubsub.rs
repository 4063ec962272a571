//! Pub/sub subscriptions
//!
//! Subscriptions run on their own Redis connection, separate from the
//! multiplexed request connection, so a long-lived listener never shares the
//! request path's timeouts.

use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::cache::keys::KeyCodec;
use crate::error::CacheResult;

/// Opens dedicated pub/sub connections
#[derive(Clone)]
pub struct Subscriber {
    client: redis::Client,
    keys: KeyCodec,
}

impl Subscriber {
    /// `prefix` is the cache key prefix; channels are namespaced under it the
    /// same way [`CacheService::publish`](crate::cache::CacheService::publish)
    /// does.
    pub fn new(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            keys: KeyCodec::new(prefix),
        }
    }

    pub fn channel_name(&self, channel: &str) -> String {
        self.keys.channel(channel)
    }

    /// Subscribe to a channel and stream its text payloads.
    ///
    /// The stream ends when the connection drops. Non-text payloads are
    /// skipped.
    pub async fn subscribe(&self, channel: &str) -> CacheResult<impl Stream<Item = String>> {
        let name = self.channel_name(channel);

        #[allow(deprecated)]
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(&name).await?;
        debug!(channel = %name, "Subscribed");

        Ok(pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(channel = %msg.get_channel_name(), error = %e, "Dropping non-text message");
                    None
                }
            }
        }))
    }
}
