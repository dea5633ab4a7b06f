//! Outgoing queue and container packing.

use std::collections::VecDeque;
use std::sync::Arc;

use gramwire_mtproto::MtProtoState;
use gramwire_tl::{Identifiable, types::MsgContainer};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

use crate::errors::InvocationError;
use crate::request_state::{Link, RequestState};

/// Most messages the server accepts in one container.
pub const MAX_CONTAINER_ITEMS: usize = 100;

/// Largest container payload the server accepts.
pub const MAX_CONTAINER_BYTES: usize = 1_044_448;

// `invokeAfterMsg` id plus the dependency's msg id.
const INVOKE_AFTER_OVERHEAD: usize = 12;

/// One frame's worth of requests, ready to encrypt.
#[derive(Debug)]
pub struct Batch {
    /// Msg id of the outermost message: the container, or the only request.
    pub msg_id: i64,
    /// Unencrypted `msg_id | seq_no | length | body` bytes.
    pub data:   Vec<u8>,
    pub states: Vec<RequestState>,
}

#[derive(Debug, Default)]
struct Queue {
    items:      VecDeque<RequestState>,
    // Most recent ordered request, possibly already sent.
    last_after: Option<Arc<Link>>,
}

/// FIFO of requests waiting to be written, drained by the send loop.
#[derive(Debug)]
pub struct MessagePacker {
    queue:     Mutex<Queue>,
    notify:    Notify,
    max_items: usize,
    max_bytes: usize,
}

impl Default for MessagePacker {
    fn default() -> Self { Self::new() }
}

impl MessagePacker {
    pub fn new() -> Self { Self::with_limits(MAX_CONTAINER_ITEMS, MAX_CONTAINER_BYTES) }

    pub fn with_limits(max_items: usize, max_bytes: usize) -> Self {
        Self {
            queue: Mutex::default(),
            notify: Notify::new(),
            max_items: max_items.max(1),
            max_bytes,
        }
    }

    /// Queue a request, at the back or (for retries) at the front.
    ///
    /// Requests flagged `invoke_after` are chained: each one is wrapped in
    /// `invokeAfterMsg` referring to the previous such request while that
    /// one is still unanswered.
    pub async fn append(&self, mut state: RequestState, at_start: bool) {
        let mut queue = self.queue.lock().await;
        if state.invoke_after {
            if at_start {
                if let Some(next) = queue.items.iter_mut().find(|s| s.invoke_after) {
                    next.after = Some(state.link());
                }
            } else {
                state.after = queue
                    .items
                    .iter()
                    .rev()
                    .find(|s| s.invoke_after)
                    .map(RequestState::link)
                    .or_else(|| queue.last_after.clone().filter(|l| !l.is_settled()));
                queue.last_after = Some(state.link());
            }
        }
        if at_start {
            queue.items.push_front(state);
        } else {
            queue.items.push_back(state);
        }
        drop(queue);
        self.notify.notify_one();
    }

    /// Queue already-linked requests at the back, e.g. for a resend.
    pub async fn extend(&self, states: impl IntoIterator<Item = RequestState>) {
        let mut queue = self.queue.lock().await;
        queue.items.extend(states);
        drop(queue);
        self.notify.notify_one();
    }

    /// Queue requests ahead of everything else, keeping their order.
    pub async fn prepend(&self, states: Vec<RequestState>) {
        let mut queue = self.queue.lock().await;
        for state in states.into_iter().rev() {
            queue.items.push_front(state);
        }
        drop(queue);
        self.notify.notify_one();
    }

    /// Wake a pending [`get`](Self::get) without queueing anything.
    pub fn wake(&self) { self.notify.notify_one(); }

    pub async fn len(&self) -> usize { self.queue.lock().await.items.len() }

    pub async fn is_empty(&self) -> bool { self.queue.lock().await.items.is_empty() }

    /// Take everything still queued.
    pub async fn drain(&self) -> Vec<RequestState> {
        self.queue.lock().await.items.drain(..).collect()
    }

    /// Wait for requests and pack as many as fit into one batch.
    ///
    /// Returns `None` if woken with nothing to send. Requests too large to
    /// ever fit are rejected here with
    /// [`InvocationError::PayloadTooLarge`].
    pub async fn get(&self, state: &Mutex<MtProtoState>) -> Option<Batch> {
        if self.queue.lock().await.items.is_empty() {
            self.notify.notified().await;
        }

        let mut queue = self.queue.lock().await;
        if queue.items.is_empty() {
            return None;
        }
        let mut state = state.lock().await;
        self.pack(&mut queue.items, &mut state)
    }

    fn pack(&self, queue: &mut VecDeque<RequestState>, state: &mut MtProtoState) -> Option<Batch> {
        let mut buffer = Vec::new();
        let mut states: Vec<RequestState> = Vec::new();
        let mut size = MsgContainer::HEADER_LEN;

        while let Some(mut rs) = queue.pop_front() {
            let after_id = rs.after_msg_id();
            let item = MsgContainer::ITEM_HEADER_LEN
                + rs.data.len()
                + if after_id.is_some() { INVOKE_AFTER_OVERHEAD } else { 0 };

            if states.len() >= self.max_items || size + item > self.max_bytes {
                if states.is_empty() {
                    warn!(
                        "[gramwire] request of {} bytes is too large to send, dropping it",
                        rs.data.len()
                    );
                    let len = rs.data.len();
                    rs.reject(InvocationError::PayloadTooLarge { len, max: self.max_bytes });
                    continue;
                }
                queue.push_front(rs);
                break;
            }

            rs.container_id = None;
            let msg_id = state.write_data_as_message(&mut buffer, &rs.data, rs.content_related, after_id);
            rs.set_msg_id(msg_id);
            size += item;
            states.push(rs);
        }

        match states.len() {
            0 => None,
            1 => {
                let msg_id = states[0].msg_id()?;
                Some(Batch { msg_id, data: buffer, states })
            }
            n => {
                let mut container = Vec::with_capacity(MsgContainer::HEADER_LEN + buffer.len());
                container.extend(MsgContainer::CONSTRUCTOR_ID.to_le_bytes());
                container.extend((n as i32).to_le_bytes());
                container.extend(buffer);

                let mut data = Vec::with_capacity(MsgContainer::ITEM_HEADER_LEN + container.len());
                let msg_id = state.write_data_as_message(&mut data, &container, false, None);
                for rs in &mut states {
                    rs.container_id = Some(msg_id);
                }
                Some(Batch { msg_id, data, states })
            }
        }
    }
}
