//! # Pub/Sub Subscriber
//!
//! Dedicated subscriber connection. Channels pass through the same namespace
//! as keys, so `Store::publish("events", ..)` reaches `subscribe("events")`
//! on any store sharing the namespace.

use std::borrow::Cow;

use futures::StreamExt;
use redis::aio::PubSub;
use serde::de::DeserializeOwned;
use tracing::debug;

use skv_common::codec;
use skv_common::{Namespace, StoreConfig};

use crate::error::{ClientError, ClientResult};

/// Message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published on, without the namespace.
    pub channel: String,
    /// Store-side pattern that matched, for pattern subscriptions.
    pub pattern: Option<String>,
    /// Payload bytes exactly as published.
    pub payload: Vec<u8>,
}

impl Message {
    /// Payload as text. Invalid UTF-8 is replaced, so use `payload` for
    /// binary messages.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Decodes the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        Ok(codec::decode_slice(&self.channel, &self.payload)?)
    }
}

/// Subscriber bound to one pub/sub connection.
pub struct Subscriber {
    name: String,
    namespace: Namespace,
    pubsub: PubSub,
}

impl Subscriber {
    /// Opens a pub/sub connection for the instance `name`.
    pub async fn connect(name: &str, config: &StoreConfig) -> ClientResult<Self> {
        config.validate()?;
        let client = redis::Client::open(config.url.as_str())?;
        let pubsub = match config.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, client.get_async_pubsub())
                .await
                .map_err(|_| ClientError::ConnectTimeout {
                    name: name.to_string(),
                    timeout,
                })??,
            None => client.get_async_pubsub().await?,
        };
        debug!(instance = name, "subscriber connected");

        Ok(Subscriber {
            name: name.to_string(),
            namespace: config.namespace(),
            pubsub,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn subscribe(&mut self, channel: &str) -> ClientResult<()> {
        let channel = self.namespace.qualify(channel)?;
        self.pubsub.subscribe(&channel).await?;
        debug!(instance = %self.name, channel = %channel, "subscribed");
        Ok(())
    }

    /// Subscribes to a glob pattern of channels inside the namespace.
    pub async fn psubscribe(&mut self, pattern: &str) -> ClientResult<()> {
        let pattern = self.namespace.qualify_pattern(pattern);
        self.pubsub.psubscribe(&pattern).await?;
        debug!(instance = %self.name, pattern = %pattern, "pattern subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&mut self, channel: &str) -> ClientResult<()> {
        let channel = self.namespace.qualify(channel)?;
        self.pubsub.unsubscribe(&channel).await?;
        Ok(())
    }

    /// Waits for the next message. Returns `None` once the connection ends.
    pub async fn next_message(&mut self) -> Option<Message> {
        let msg = {
            let mut stream = std::pin::pin!(self.pubsub.on_message());
            stream.next().await?
        };

        let pattern = if msg.from_pattern() {
            msg.get_pattern::<String>().ok()
        } else {
            None
        };
        Some(Message {
            channel: self.namespace.strip(msg.get_channel_name()).to_string(),
            pattern,
            payload: msg.get_payload_bytes().to_vec(),
        })
    }
}
