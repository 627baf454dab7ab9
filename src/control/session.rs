// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::message::Message;

/// Keepalive and deadline settings for sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub ping_interval: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        SessionTiming {
            ping_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),
}

/// The write half of a client connection.
#[async_trait]
pub trait SessionSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError>;

    async fn send_ping(&mut self) -> Result<(), SessionError>;

    async fn close(&mut self);
}

/// A connected client. Every write goes through the session lock, so replies, broadcasts
/// and pings never interleave on the wire.
pub struct Session {
    id: u64,
    sink: tokio::sync::Mutex<Box<dyn SessionSink>>,
    write_timeout: Duration,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn send(&self, message: &Message) -> Result<(), SessionError> {
        self.send_text(message.to_text()).await
    }

    pub async fn send_text(&self, text: String) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        tokio::time::timeout(self.write_timeout, sink.send_text(text))
            .await
            .map_err(|_| SessionError::Timeout(self.write_timeout))?
    }

    pub async fn ping(&self) -> Result<(), SessionError> {
        let mut sink = self.sink.lock().await;
        tokio::time::timeout(self.write_timeout, sink.send_ping())
            .await
            .map_err(|_| SessionError::Timeout(self.write_timeout))?
    }

    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = tokio::time::timeout(self.write_timeout, sink.close()).await;
    }
}

/// The live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<u64, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn register(&self, sink: Box<dyn SessionSink>, write_timeout: Duration) -> Arc<Session> {
        let session = Arc::new(Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            sink: tokio::sync::Mutex::new(sink),
            write_timeout,
        });
        self.sessions.write().insert(session.id, session.clone());
        session
    }

    pub fn remove(&self, id: u64) -> Option<Arc<Session>> {
        self.sessions.write().remove(&id)
    }

    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
pub(crate) use mock::MockSink;
