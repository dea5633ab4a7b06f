//! One outgoing request and the future waiting on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use tokio::sync::oneshot;

use crate::errors::InvocationError;

/// What the caller of a request eventually receives: the raw response body.
pub type Response = Result<Vec<u8>, InvocationError>;

/// Shared view of a request that others may depend on.
#[derive(Debug, Default)]
pub(crate) struct Link {
    msg_id:  AtomicI64,
    settled: AtomicBool,
}

impl Link {
    /// The msg id last assigned to the request, if it was ever packed.
    pub(crate) fn msg_id(&self) -> Option<i64> {
        match self.msg_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }
}

/// A serialized request on its way to the server.
///
/// Created by the sender when a caller issues a request and dropped once its
/// response is delivered. Requests without a caller (acknowledgements,
/// state replies) are "untracked": resolving them is a no-op.
#[derive(Debug)]
pub struct RequestState {
    pub(crate) data:            Vec<u8>,
    pub(crate) content_related: bool,
    pub(crate) invoke_after:    bool,
    pub(crate) container_id:    Option<i64>,
    pub(crate) after:           Option<Arc<Link>>,
    link:                       Arc<Link>,
    resolver:                   Option<oneshot::Sender<Response>>,
}

impl RequestState {
    /// A request whose response is awaited through the returned receiver.
    pub fn new(data: Vec<u8>, invoke_after: bool) -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let state = Self {
            data,
            content_related: true,
            invoke_after,
            container_id: None,
            after: None,
            link: Arc::default(),
            resolver: Some(tx),
        };
        (state, rx)
    }

    /// A service message nobody waits on.
    pub fn untracked(data: Vec<u8>) -> Self {
        Self {
            data,
            content_related: false,
            invoke_after: false,
            container_id: None,
            after: None,
            link: Arc::default(),
            resolver: None,
        }
    }

    pub fn msg_id(&self) -> Option<i64> { self.link.msg_id() }

    pub fn container_id(&self) -> Option<i64> { self.container_id }

    pub fn data(&self) -> &[u8] { &self.data }

    /// Constructor id of the serialized request.
    pub fn constructor_id(&self) -> Option<u32> {
        let head: [u8; 4] = self.data.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(head))
    }

    /// Whether a caller is waiting on this request.
    pub fn is_tracked(&self) -> bool { self.resolver.is_some() }

    /// `true` if there is no dependency or the dependency has settled.
    pub fn is_ready(&self) -> bool {
        self.after.as_ref().is_none_or(|link| link.is_settled())
    }

    /// The msg id this request must be invoked after, if still relevant.
    pub(crate) fn after_msg_id(&self) -> Option<i64> {
        if self.is_ready() {
            return None;
        }
        self.after.as_ref().and_then(|link| link.msg_id())
    }

    pub(crate) fn set_msg_id(&mut self, msg_id: i64) {
        self.link.msg_id.store(msg_id, Ordering::Release);
    }

    pub(crate) fn link(&self) -> Arc<Link> { Arc::clone(&self.link) }

    /// Deliver the response body.
    pub fn resolve(mut self, body: Vec<u8>) {
        if let Some(tx) = self.resolver.take() {
            let _ = tx.send(Ok(body));
        }
    }

    /// Fail the request.
    pub fn reject(mut self, error: InvocationError) {
        if let Some(tx) = self.resolver.take() {
            let _ = tx.send(Err(error));
        }
    }
}

impl Drop for RequestState {
    fn drop(&mut self) {
        self.link.settled.store(true, Ordering::Release);
    }
}
