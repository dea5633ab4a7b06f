//! The sender: connection lifecycle, send and receive loops, dispatch.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use gramwire_crypto::AuthKey;
use gramwire_mtproto::{DecodeError, DecryptError, Envelope, MtProtoState, TlMessage};
use gramwire_tl::{Deserializable, Identifiable, RemoteCall, Serializable, name_for_id, types};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::authenticator::do_authentication;
use crate::connection::Connection;
use crate::errors::{BadMessageError, InvocationError, RpcError};
use crate::message_packer::MessagePacker;
use crate::pending::PendingState;
use crate::request_state::RequestState;
use crate::{ConnectionState, SenderConfig, Update};

/// Sent acknowledgements kept around in case the server reports them bad.
const LAST_ACKS: usize = 10;

/// `upload.file`, which may legitimately arrive for a request that was
/// already dropped.
const UPLOAD_FILE_ID: u32 = 0x096a18d5;

fn boxed<T: Identifiable + Serializable>(value: &T) -> Vec<u8> {
    let mut data = T::CONSTRUCTOR_ID.to_le_bytes().to_vec();
    value.serialize(&mut data);
    data
}

// Constructor of a serialized body, for log lines.
fn type_name(body: &[u8]) -> String {
    match body.get(..4).and_then(|head| <[u8; 4]>::try_from(head).ok()) {
        Some(head) => {
            let id = u32::from_le_bytes(head);
            name_for_id(id).map_or_else(|| format!("{id:08x}"), str::to_owned)
        }
        None => "truncated body".to_owned(),
    }
}

// Both loops of one connection.
struct Epoch {
    token:   CancellationToken,
    tracker: TaskTracker,
}

struct Inner<C> {
    config:         SenderConfig,
    state:          Mutex<MtProtoState>,
    pending:        Mutex<PendingState>,
    packer:         MessagePacker,
    pending_ack:    Mutex<HashSet<i64>>,
    last_acks:      Mutex<VecDeque<RequestState>>,
    connection:     Mutex<Option<Arc<C>>>,
    connect_lock:   Mutex<()>,
    user_connected: AtomicBool,
    reconnecting:   AtomicBool,
    epoch:          Mutex<Option<Epoch>>,
    state_tx:       watch::Sender<ConnectionState>,
}

/// An encrypted MTProto session over a [`Connection`].
///
/// Cheap to clone; clones share the session.
pub struct MtProtoSender<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for MtProtoSender<C> {
    fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<C: Connection> MtProtoSender<C> {
    pub fn new(config: SenderConfig) -> Self {
        let mut state = MtProtoState::new(config.auth_key.clone(), config.security_checks);
        state.set_time_offset(config.time_offset);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                pending: Mutex::default(),
                packer: MessagePacker::new(),
                pending_ack: Mutex::default(),
                last_acks: Mutex::default(),
                connection: Mutex::default(),
                connect_lock: Mutex::default(),
                user_connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                epoch: Mutex::default(),
                state_tx,
            }),
        }
    }

    /// Open `connection`, generate an auth key if there is none, and start
    /// sending.
    ///
    /// Returns `Ok(false)` without doing anything when already connected,
    /// unless `force` is set.
    pub async fn connect(&self, connection: C, force: bool) -> Result<bool, InvocationError> {
        let inner = &self.inner;
        let _guard = inner.connect_lock.lock().await;
        if inner.user_connected.load(Ordering::Acquire) && !force {
            info!("[gramwire] already connected to DC {}", inner.config.dc_id);
            return Ok(false);
        }
        inner.report(ConnectionState::Connecting);
        inner.connect_locked(connection, false).await?;
        Ok(true)
    }

    /// Stop both loops and close the connection.
    ///
    /// Requests still waiting for an answer stay queued and are sent again by
    /// the next [`connect`](Self::connect).
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.user_connected.store(false, Ordering::Release);
        let _guard = inner.connect_lock.lock().await;
        // A reconnect that held the lock may have finished in between.
        inner.user_connected.store(false, Ordering::Release);
        inner.stop_epoch().await;
        let connection = inner.connection.lock().await.take();
        if let Some(connection) = connection {
            connection.disconnect().await;
        }
        inner.report(ConnectionState::Disconnected);
        info!("[gramwire] disconnected from DC {}", inner.config.dc_id);
    }

    /// Drop the current connection and connect again on a fresh one.
    pub async fn reconnect(&self) {
        let inner = &self.inner;
        if inner.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        inner.reconnect().await;
        inner.reconnecting.store(false, Ordering::Release);
    }

    /// Send `request` and wait for its answer.
    pub async fn send<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        let body = self.send_raw(request.to_bytes(), R::INVOKE_AFTER).await?;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Send an already serialized request and wait for the raw answer.
    ///
    /// With `invoke_after`, the server runs it only after the previous
    /// request sent this way.
    pub async fn send_raw(&self, data: Vec<u8>, invoke_after: bool) -> Result<Vec<u8>, InvocationError> {
        if !self.inner.user_connected.load(Ordering::Acquire) {
            return Err(InvocationError::NotConnected);
        }
        let (state, rx) = RequestState::new(data, invoke_after);
        self.inner.packer.append(state, false).await;
        rx.await.map_err(|_| InvocationError::Dropped)?
    }

    pub fn is_connected(&self) -> bool { self.inner.user_connected.load(Ordering::Acquire) }

    pub fn state(&self) -> ConnectionState { *self.inner.state_tx.borrow() }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> { self.inner.state_tx.subscribe() }

    pub fn config(&self) -> &SenderConfig { &self.inner.config }

    pub async fn auth_key(&self) -> Option<AuthKey> { self.inner.state.lock().await.auth_key().cloned() }

    pub async fn salt(&self) -> i64 { self.inner.state.lock().await.salt() }

    pub async fn time_offset(&self) -> i32 { self.inner.state.lock().await.time_offset() }
}

impl<C: Connection> Inner<C> {
    fn report(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        if let Some(callback) = &self.config.on_state {
            callback(state);
        }
    }

    // ─── Connecting ───────────────────────────────────────────────────────────

    // Caller holds `connect_lock`. When `reconnecting`, a `disconnect` issued
    // meanwhile wins and the new connection is closed again.
    async fn connect_locked(self: &Arc<Self>, connection: C, reconnecting: bool) -> Result<(), InvocationError> {
        let abandoned = || reconnecting && !self.user_connected.load(Ordering::Acquire);
        let connection = Arc::new(connection);
        let attempts = self.config.retries.max(1);
        let mut attempt = 0;
        let opened = loop {
            if abandoned() {
                break false;
            }
            attempt += 1;
            match self.try_connect(&connection).await {
                Ok(()) => break true,
                Err(e) => {
                    warn!(
                        "[gramwire] attempt {attempt}/{attempts} to connect to DC {} failed: {e}",
                        self.config.dc_id
                    );
                    connection.disconnect().await;
                    if attempt >= attempts {
                        self.report(ConnectionState::Disconnected);
                        return Err(e);
                    }
                    tokio::time::sleep(self.config.delay).await;
                }
            }
        };

        if !opened || abandoned() {
            debug!("[gramwire] disconnected while reconnecting to DC {}", self.config.dc_id);
            connection.disconnect().await;
            return Ok(());
        }
        self.stop_epoch().await;
        *self.connection.lock().await = Some(Arc::clone(&connection));
        self.user_connected.store(true, Ordering::Release);
        self.start_epoch(connection).await;
        self.report(ConnectionState::Connected);
        info!("[gramwire] connected to DC {}", self.config.dc_id);
        Ok(())
    }

    async fn try_connect(&self, connection: &C) -> Result<(), InvocationError> {
        if !connection.is_connected() {
            connection.connect().await?;
        }
        if self.state.lock().await.auth_key().is_some() {
            return Ok(());
        }

        info!("[gramwire] generating new auth key for DC {}", self.config.dc_id);
        let finished = do_authentication(connection, &self.config.server_keys).await?;
        {
            let mut state = self.state.lock().await;
            state.set_auth_key(Some(finished.auth_key.clone()));
            state.set_time_offset(finished.time_offset);
            state.set_salt(finished.first_salt);
        }
        if let Some(callback) = &self.config.on_auth_key {
            callback(&finished.auth_key);
        }
        Ok(())
    }

    async fn start_epoch(self: &Arc<Self>, connection: Arc<C>) {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(Arc::clone(self).send_loop(Arc::clone(&connection), token.clone()));
        tracker.spawn(Arc::clone(self).recv_loop(connection, token.clone()));
        tracker.close();
        *self.epoch.lock().await = Some(Epoch { token, tracker });
    }

    async fn stop_epoch(&self) {
        let epoch = self.epoch.lock().await.take();
        if let Some(Epoch { token, tracker }) = epoch {
            token.cancel();
            tracker.wait().await;
        }
    }

    // ─── Reconnecting ─────────────────────────────────────────────────────────

    // Called by a loop that is about to exit.
    fn connection_lost(self: &Arc<Self>) {
        if !self.user_connected.load(Ordering::Acquire) {
            return;
        }
        let inner = Arc::clone(self);
        if !self.config.auto_reconnect {
            warn!("[gramwire] connection to DC {} lost", self.config.dc_id);
            tokio::spawn(async move {
                let _guard = inner.connect_lock.lock().await;
                inner.user_connected.store(false, Ordering::Release);
                inner.stop_epoch().await;
                let connection = inner.connection.lock().await.take();
                if let Some(connection) = connection {
                    connection.disconnect().await;
                }
                inner.report(ConnectionState::Disconnected);
            });
            return;
        }
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        tokio::spawn(async move {
            inner.reconnect().await;
            inner.reconnecting.store(false, Ordering::Release);
        });
    }

    async fn reconnect(self: &Arc<Self>) {
        if !self.user_connected.load(Ordering::Acquire) {
            return;
        }
        self.report(ConnectionState::Reconnecting);
        info!(
            "[gramwire] reconnecting to DC {} in {:?}",
            self.config.dc_id, self.config.reconnect_delay
        );
        tokio::time::sleep(self.config.reconnect_delay).await;

        let _guard = self.connect_lock.lock().await;
        if !self.user_connected.load(Ordering::Acquire) {
            debug!("[gramwire] disconnected before reconnecting, giving up");
            return;
        }
        self.stop_epoch().await;
        let old = self.connection.lock().await.take();
        let Some(old) = old else { return };
        old.disconnect().await;
        let fresh = old.fresh();

        self.state.lock().await.reset();
        if let Err(e) = self.connect_locked(fresh, true).await {
            error!("[gramwire] reconnect to DC {} failed: {e}", self.config.dc_id);
            self.user_connected.store(false, Ordering::Release);
        }
    }

    // The server answered with 404: our auth key is gone.
    async fn auth_key_revoked(&self, connection: &C) {
        error!(
            "[gramwire] DC {} no longer recognizes our auth key, a new one must be generated",
            self.config.dc_id
        );
        self.state.lock().await.set_auth_key(None);
        self.user_connected.store(false, Ordering::Release);
        self.report(ConnectionState::Broken);

        let epoch = self.epoch.lock().await.take();
        if let Some(epoch) = epoch {
            epoch.token.cancel();
        }
        self.connection.lock().await.take();
        connection.disconnect().await;
    }

    // ─── Send loop ────────────────────────────────────────────────────────────

    async fn send_loop(self: Arc<Self>, connection: Arc<C>, token: CancellationToken) {
        let unanswered = self.pending.lock().await.drain();
        if !unanswered.is_empty() {
            debug!("[gramwire] re-sending {} unanswered requests", unanswered.len());
            self.packer.prepend(unanswered).await;
        }

        loop {
            self.flush_acks().await;

            let batch = tokio::select! {
                _ = token.cancelled() => break,
                batch = self.packer.get(&self.state) => batch,
            };
            let Some(batch) = batch else { continue };

            let encrypted = self.state.lock().await.encrypt_message_data(&batch.data);
            let frame = match encrypted {
                Ok(frame) => frame,
                Err(e) => {
                    error!("[gramwire] cannot send: {e}");
                    self.packer.prepend(batch.states).await;
                    break;
                }
            };
            debug!(
                "[gramwire] sending {:?} as {} ({} bytes)",
                batch.states.iter().map(|s| type_name(&s.data)).collect::<Vec<_>>(),
                batch.msg_id,
                frame.len()
            );

            // Recorded before writing so that a fast answer finds its owner.
            let mut acks = Vec::new();
            {
                let mut pending = self.pending.lock().await;
                for state in batch.states {
                    if state.content_related {
                        pending.insert(state);
                    } else if state.constructor_id() == Some(types::MsgsAck::CONSTRUCTOR_ID) {
                        acks.push(state);
                    }
                }
            }
            if !acks.is_empty() {
                let mut last_acks = self.last_acks.lock().await;
                for ack in acks {
                    if last_acks.len() == LAST_ACKS {
                        last_acks.pop_front();
                    }
                    last_acks.push_back(ack);
                }
            }

            let written = tokio::select! {
                _ = token.cancelled() => break,
                written = connection.send(&frame) => written,
            };
            if let Err(e) = written {
                warn!("[gramwire] write to DC {} failed: {e}", self.config.dc_id);
                self.connection_lost();
                break;
            }
        }
        debug!("[gramwire] send loop stopped");
    }

    async fn flush_acks(&self) {
        let msg_ids: Vec<i64> = self.pending_ack.lock().await.drain().collect();
        if msg_ids.is_empty() {
            return;
        }
        debug!("[gramwire] acknowledging {} message(s)", msg_ids.len());
        let ack = types::MsgsAck { msg_ids };
        self.packer.append(RequestState::untracked(boxed(&ack)), false).await;
    }

    async fn queue_ack(&self, msg_id: i64) {
        self.pending_ack.lock().await.insert(msg_id);
        self.packer.wake();
    }

    // ─── Receive loop ─────────────────────────────────────────────────────────

    async fn recv_loop(self: Arc<Self>, connection: Arc<C>, token: CancellationToken) {
        loop {
            let read = tokio::select! {
                _ = token.cancelled() => break,
                read = connection.recv() => read,
            };
            let mut frame = match read {
                Ok(frame) => frame,
                Err(e) => {
                    if !token.is_cancelled() {
                        warn!("[gramwire] read from DC {} failed: {e}", self.config.dc_id);
                        self.connection_lost();
                    }
                    break;
                }
            };

            let decrypted = self.state.lock().await.decrypt_message_data(&mut frame);
            let message = match decrypted {
                Ok(message) => message,
                Err(DecryptError::Security(e)) => {
                    warn!("[gramwire] ignoring message: {e}");
                    continue;
                }
                Err(DecryptError::InvalidBuffer(e)) if e.is_auth_key_revoked() => {
                    self.auth_key_revoked(&connection).await;
                    break;
                }
                Err(DecryptError::InvalidBuffer(e)) => {
                    warn!("[gramwire] invalid frame from DC {}: {e}", self.config.dc_id);
                    self.connection_lost();
                    break;
                }
                Err(DecryptError::NoAuthKey) => {
                    error!("[gramwire] received a message without an auth key");
                    break;
                }
            };
            self.process_message(message).await;
        }
        debug!("[gramwire] receive loop stopped");
    }

    // ─── Dispatch ─────────────────────────────────────────────────────────────

    fn process_message(&self, message: TlMessage) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if message.is_content_related() {
                self.queue_ack(message.msg_id).await;
            }

            let envelope = match Envelope::decode(&message.body) {
                Ok(envelope) => envelope,
                Err(DecodeError::TypeNotFound(e)) => {
                    warn!("[gramwire] skipping message {}: {e}", message.msg_id);
                    return;
                }
                Err(e) => {
                    warn!(
                        "[gramwire] cannot decode {} message {}: {e}",
                        type_name(&message.body),
                        message.msg_id
                    );
                    return;
                }
            };

            debug!("[gramwire] received {} as {}", type_name(&message.body), message.msg_id);
            match envelope {
                Envelope::RpcResult { req_msg_id, result } => self.handle_rpc_result(req_msg_id, result).await,
                Envelope::Container(messages) => {
                    debug!("[gramwire] container {} with {} message(s)", message.msg_id, messages.len());
                    for inner in messages {
                        self.process_message(inner).await;
                    }
                }
                Envelope::Gzip(body) => {
                    self.process_message(TlMessage { msg_id: message.msg_id, seq_no: message.seq_no, body })
                        .await;
                }
                Envelope::Update { constructor_id, body } => match &self.config.on_update {
                    Some(callback) => callback(Update { constructor_id, body }),
                    None => debug!("[gramwire] no update handler, dropping update {constructor_id:08x}"),
                },
                Envelope::Pong(pong) => {
                    debug!("[gramwire] pong for {}", pong.msg_id);
                    let owner = self.pending.lock().await.remove(pong.msg_id);
                    if let Some(state) = owner {
                        state.resolve(message.body);
                    }
                }
                Envelope::BadServerSalt(bad) => {
                    debug!("[gramwire] bad salt for {}, now using {}", bad.bad_msg_id, bad.new_server_salt);
                    self.state.lock().await.set_salt(bad.new_server_salt);
                    let states = self.pop_states(bad.bad_msg_id).await;
                    self.packer.extend(states).await;
                }
                Envelope::BadMsgNotification(bad) => self.handle_bad_notification(message.msg_id, bad).await,
                Envelope::MsgDetailedInfo(info) => self.queue_ack(info.answer_msg_id).await,
                Envelope::MsgNewDetailedInfo(info) => self.queue_ack(info.answer_msg_id).await,
                Envelope::NewSessionCreated(session) => {
                    debug!("[gramwire] new session created, salt {}", session.server_salt);
                    self.state.lock().await.set_salt(session.server_salt);
                }
                Envelope::MsgsAck(ack) => debug!("[gramwire] server acknowledged {:?}", ack.msg_ids),
                Envelope::MsgsAllInfo(info) => debug!("[gramwire] state info for {:?}", info.msg_ids),
                Envelope::FutureSalts(salts) => {
                    debug!("[gramwire] {} future salts", salts.salts.0.len());
                    let owner = self.pending.lock().await.remove(salts.req_msg_id);
                    if let Some(state) = owner {
                        state.resolve(message.body);
                    }
                }
                Envelope::MsgsStateReq(types::MsgsStateReq { msg_ids })
                | Envelope::MsgResendReq(types::MsgResendReq { msg_ids }) => {
                    let info = types::MsgsStateInfo { req_msg_id: message.msg_id, info: vec![1; msg_ids.len()] };
                    self.packer.append(RequestState::untracked(boxed(&info)), false).await;
                }
            }
        })
    }

    async fn handle_rpc_result(&self, req_msg_id: i64, result: Result<Vec<u8>, types::RpcError>) {
        let owner = self.pending.lock().await.remove(req_msg_id);
        match (owner, result) {
            (Some(state), Ok(body)) => {
                debug!("[gramwire] result for {req_msg_id} ({} bytes)", body.len());
                state.resolve(body);
            }
            (Some(state), Err(e)) => {
                let error = RpcError::from_telegram(e.error_code, &e.error_message);
                debug!("[gramwire] {req_msg_id} failed: {error}");
                self.queue_ack(req_msg_id).await;
                state.reject(InvocationError::Rpc(error));
            }
            (None, Ok(body)) if body.get(..4) == Some(&UPLOAD_FILE_ID.to_le_bytes()[..]) => {
                debug!("[gramwire] late upload.file for {req_msg_id}, ignoring");
            }
            (None, Ok(body)) => {
                warn!("[gramwire] {} for unknown request {req_msg_id}, dropping it", type_name(&body));
            }
            (None, Err(e)) => {
                warn!("[gramwire] rpc_error {} for unknown request {req_msg_id}", e.error_message);
            }
        }
    }

    async fn handle_bad_notification(&self, server_msg_id: i64, bad: types::BadMsgNotification) {
        let states = self.pop_states(bad.bad_msg_id).await;
        debug!(
            "[gramwire] bad message {} (code {}), {} request(s) affected",
            bad.bad_msg_id,
            bad.error_code,
            states.len()
        );

        match bad.error_code {
            16 | 17 => {
                let offset = self.state.lock().await.update_time_offset(server_msg_id);
                info!("[gramwire] system clock is off, time offset now {offset}s");
            }
            32 => self.state.lock().await.shift_sequence(64),
            33 => self.state.lock().await.shift_sequence(-16),
            code => {
                for state in states {
                    state.reject(InvocationError::BadMessage(BadMessageError::new(code)));
                }
                return;
            }
        }
        self.packer.extend(states).await;
    }

    // Requests affected by a notification about `msg_id`: the request
    // itself, everything in the container with that id, or a recent ack.
    async fn pop_states(&self, msg_id: i64) -> Vec<RequestState> {
        {
            let mut pending = self.pending.lock().await;
            if let Some(state) = pending.remove(msg_id) {
                return vec![state];
            }
            let states = pending.remove_by_container(msg_id);
            if !states.is_empty() {
                return states;
            }
        }

        let mut last_acks = self.last_acks.lock().await;
        last_acks
            .iter()
            .position(|s| s.msg_id() == Some(msg_id) || s.container_id() == Some(msg_id))
            .and_then(|i| last_acks.remove(i))
            .into_iter()
            .collect()
    }
}
