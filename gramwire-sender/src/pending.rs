//! Requests written to the server and still waiting for an answer.

use std::collections::HashMap;

use crate::request_state::RequestState;

/// In-flight requests keyed by the msg id they were sent with.
#[derive(Debug, Default)]
pub struct PendingState {
    map: HashMap<i64, RequestState>,
}

impl PendingState {
    pub fn new() -> Self { Self::default() }

    /// Track `state` under its assigned msg id. Requests that were never
    /// packed are ignored.
    pub fn insert(&mut self, state: RequestState) {
        if let Some(msg_id) = state.msg_id() {
            self.map.insert(msg_id, state);
        }
    }

    pub fn remove(&mut self, msg_id: i64) -> Option<RequestState> {
        self.map.remove(&msg_id)
    }

    /// Every request that travelled inside container `container_id`.
    pub fn remove_by_container(&mut self, container_id: i64) -> Vec<RequestState> {
        let ids: Vec<i64> = self.map
            .iter()
            .filter(|(_, s)| s.container_id() == Some(container_id))
            .map(|(id, _)| *id)
            .collect();
        let mut states: Vec<RequestState> = ids.into_iter().filter_map(|id| self.map.remove(&id)).collect();
        states.sort_by_key(|s| s.msg_id());
        states
    }

    /// Take everything, oldest first.
    pub fn drain(&mut self) -> Vec<RequestState> {
        let mut states: Vec<RequestState> = self.map.drain().map(|(_, s)| s).collect();
        states.sort_by_key(|s| s.msg_id());
        states
    }

    pub fn contains(&self, msg_id: i64) -> bool { self.map.contains_key(&msg_id) }

    pub fn len(&self) -> usize { self.map.len() }

    pub fn is_empty(&self) -> bool { self.map.is_empty() }

    pub fn clear(&mut self) { self.map.clear(); }
}
