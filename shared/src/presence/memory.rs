use super::{PresenceRegistry, SocketRef};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    sockets: HashMap<String, Vec<SocketRef>>,
    /// Registered but no longer reachable (emit returns false)
    gone: HashSet<SocketRef>,
    failing_users: HashSet<String>,
    emitted: Vec<(SocketRef, serde_json::Value)>,
}

/// In-process presence registry that records every emission
#[derive(Default)]
pub struct InMemoryPresence {
    state: Mutex<State>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, user_id: &str, socket: SocketRef) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sockets.entry(user_id.to_string()).or_default().push(socket);
    }

    pub fn disconnect_all(&self, user_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.sockets.remove(user_id);
    }

    /// Keep the socket registered but make emission to it fail softly
    pub fn mark_gone(&self, socket: &SocketRef) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.gone.insert(socket.clone());
    }

    /// Lookups for `user_id` return an error
    pub fn fail_lookups_for(&self, user_id: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failing_users.insert(user_id.to_string());
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.failing_users.clear();
    }

    pub fn emitted(&self) -> Vec<(SocketRef, serde_json::Value)> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .emitted
            .clone()
    }

    pub fn emitted_to(&self, socket: &SocketRef) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .emitted
            .iter()
            .filter(|(s, _)| s == socket)
            .count()
    }
}

#[async_trait]
impl PresenceRegistry for InMemoryPresence {
    async fn connections(&self, user_id: &str) -> Result<Vec<SocketRef>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.failing_users.contains(user_id) {
            bail!("injected presence lookup failure");
        }
        Ok(state.sockets.get(user_id).cloned().unwrap_or_default())
    }

    async fn emit(&self, socket: &SocketRef, payload: &serde_json::Value) -> Result<bool> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.gone.contains(socket) {
            return Ok(false);
        }
        state.emitted.push((socket.clone(), payload.clone()));
        Ok(true)
    }
}
