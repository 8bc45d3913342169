use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::channel::Channel;

/// The logical endpoints PiecesOS streams over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Copilot questions and streamed answers.
    Ask,
}

impl ChannelKind {
    pub fn path(self) -> &'static str {
        match self {
            Self::Ask => "/qgpt/stream",
        }
    }
}

/// Where the local PiecesOS instance listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn ws_url(&self, kind: ChannelKind) -> String {
        format!("ws://{}:{}{}", self.host, self.port, kind.path())
    }
}

/// Hands out one shared [`Channel`] per kind.
pub struct ConnectionRegistry {
    endpoint: Endpoint,
    channels: Mutex<HashMap<ChannelKind, Arc<Channel>>>,
}

impl ConnectionRegistry {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Return the channel for `kind`, creating and starting it on first use.
    pub async fn get_or_create(&self, kind: ChannelKind) -> Arc<Channel> {
        let mut channels = self.channels.lock().await;
        if let Some(channel) = channels.get(&kind) {
            return channel.clone();
        }
        let channel = Arc::new(Channel::new(kind, self.endpoint.ws_url(kind)));
        channel.start().await;
        channels.insert(kind, channel.clone());
        channel
    }

    pub async fn close_all(&self) {
        let channels = self.channels.lock().await;
        for channel in channels.values() {
            channel.close().await;
        }
        info!(count = channels.len(), "closed copilot channels");
    }
}
