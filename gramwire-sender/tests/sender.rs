use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use gramwire_crypto::{AuthKey, Side, aes, decrypt_data_as, encrypt_data_as, generate_key_data_from_nonce, rsa};
use gramwire_mtproto::PlainMessage;
use gramwire_mtproto::envelope::gzip_packed;
use gramwire_sender::{
    Connection, ConnectionState, InvocationError, MAX_CONTAINER_BYTES, MtProtoSender, SenderConfig,
    ServerKeys, Update,
};
use gramwire_tl::{Blob, Deserializable, Identifiable, RawVec, Serializable, enums, functions, types};
use num_bigint::BigUint;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future).await.expect("timed out")
}

fn auth_key() -> AuthKey {
    let mut data = [0u8; 256];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i * 13 + 7) as u8;
    }
    AuthKey::from_bytes(data)
}

fn config() -> SenderConfig {
    SenderConfig {
        auth_key: Some(auth_key()),
        retries: 2,
        delay: Duration::from_millis(10),
        reconnect_delay: Duration::from_millis(10),
        ..SenderConfig::default()
    }
}

fn boxed<T: Identifiable + Serializable>(value: &T) -> Vec<u8> {
    let mut data = T::CONSTRUCTOR_ID.to_le_bytes().to_vec();
    value.serialize(&mut data);
    data
}

fn rpc_result(req_msg_id: i64, result: Vec<u8>) -> Vec<u8> {
    boxed(&types::RpcResult { req_msg_id, result: Blob(result) })
}

fn read_i64(b: &[u8]) -> i64 { i64::from_le_bytes(b[..8].try_into().unwrap()) }

fn read_i32(b: &[u8]) -> i32 { i32::from_le_bytes(b[..4].try_into().unwrap()) }

// ─── In-memory connection ─────────────────────────────────────────────────────

/// Server end of one opened connection.
struct Peer {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Hands every opened connection to the test.
#[derive(Clone)]
struct Hub {
    accept: mpsc::UnboundedSender<Peer>,
    /// Held by a test to stall `connect` after the peer is accepted.
    gate:   Arc<Mutex<()>>,
}

fn hub() -> (Hub, mpsc::UnboundedReceiver<Peer>) {
    let (accept, peers) = mpsc::unbounded_channel();
    (Hub { accept, gate: Arc::default() }, peers)
}

struct MockConnection {
    hub:       Hub,
    tx:        StdMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx:        Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    closed:    StdMutex<CancellationToken>,
    connected: AtomicBool,
}

impl MockConnection {
    fn new(hub: &Hub) -> Self {
        Self {
            hub:       hub.clone(),
            tx:        StdMutex::new(None),
            rx:        Mutex::new(None),
            closed:    StdMutex::new(CancellationToken::new()),
            connected: AtomicBool::new(false),
        }
    }
}

fn gone() -> io::Error { io::Error::new(io::ErrorKind::BrokenPipe, "peer closed the connection") }

impl Connection for MockConnection {
    async fn connect(&self) -> io::Result<()> {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        self.hub
            .accept
            .send(Peer { rx: server_rx, tx: server_tx })
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        drop(self.hub.gate.lock().await);

        *self.tx.lock().unwrap() = Some(client_tx);
        *self.closed.lock().unwrap() = CancellationToken::new();
        *self.rx.lock().await = Some(client_rx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let tx = self.tx.lock().unwrap().clone().ok_or_else(gone)?;
        tx.send(frame.to_vec()).map_err(|_| gone())
    }

    async fn recv(&self) -> io::Result<Vec<u8>> {
        let closed = self.closed.lock().unwrap().clone();
        let mut rx = self.rx.lock().await;
        let rx = rx.as_mut().ok_or_else(gone)?;
        tokio::select! {
            _ = closed.cancelled() => Err(gone()),
            frame = rx.recv() => frame.ok_or_else(gone),
        }
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.lock().unwrap().cancel();
        self.tx.lock().unwrap().take();
    }

    fn is_connected(&self) -> bool { self.connected.load(Ordering::SeqCst) }

    fn fresh(&self) -> Self { Self::new(&self.hub) }
}

// ─── Scripted server ──────────────────────────────────────────────────────────

#[derive(Debug)]
struct Received {
    salt:       i64,
    session_id: i64,
    msg_id:     i64,
    seq_no:     i32,
    body:       Vec<u8>,
}

impl Received {
    fn constructor_id(&self) -> u32 { read_i32(&self.body) as u32 }
}

struct Server {
    peer:        Peer,
    key:         AuthKey,
    session_id:  i64,
    salt:        i64,
    last_msg_id: i64,
    clock_skew:  i64,
}

impl Server {
    async fn accept(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Self {
        let peer = timeout(peers.recv()).await.expect("hub closed");
        Self { peer, key: auth_key(), session_id: 0, salt: 0, last_msg_id: 0, clock_skew: 0 }
    }

    /// Every message of the next frame, containers flattened.
    async fn recv_all(&mut self) -> Vec<Received> {
        let mut frame = timeout(self.peer.rx.recv()).await.expect("client closed the connection");
        let plain = decrypt_data_as(&mut frame, &self.key, Side::Client).unwrap();

        let salt = read_i64(&plain[0..]);
        let session_id = read_i64(&plain[8..]);
        let msg_id = read_i64(&plain[16..]);
        let seq_no = read_i32(&plain[24..]);
        let len = read_i32(&plain[28..]) as usize;
        let body = plain[32..32 + len].to_vec();
        self.session_id = session_id;

        if read_i32(&body) as u32 != types::MsgContainer::CONSTRUCTOR_ID {
            return vec![Received { salt, session_id, msg_id, seq_no, body }];
        }
        types::MsgContainer::from_bytes(&body[4..])
            .unwrap()
            .messages
            .into_iter()
            .map(|m| Received { salt, session_id, msg_id: m.msg_id, seq_no: m.seqno, body: m.body })
            .collect()
    }

    /// The next messages that are not acknowledgements.
    async fn recv(&mut self) -> Vec<Received> {
        loop {
            let messages: Vec<Received> = self
                .recv_all()
                .await
                .into_iter()
                .filter(|m| m.constructor_id() != types::MsgsAck::CONSTRUCTOR_ID)
                .collect();
            if !messages.is_empty() {
                return messages;
            }
        }
    }

    // Pretend the server clock is `secs` seconds off from ours.
    fn skew_clock(&mut self, secs: i64) {
        self.clock_skew = secs;
        self.last_msg_id = 0;
    }

    fn next_msg_id(&mut self) -> i64 {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64 + self.clock_skew;
        let msg_id = ((secs << 32) | 1).max(self.last_msg_id + 4);
        self.last_msg_id = msg_id;
        msg_id
    }

    fn send_message(&mut self, msg_id: i64, seq_no: i32, body: &[u8]) {
        let mut plain = Vec::new();
        plain.extend(self.salt.to_le_bytes());
        plain.extend(self.session_id.to_le_bytes());
        plain.extend(msg_id.to_le_bytes());
        plain.extend(seq_no.to_le_bytes());
        plain.extend((body.len() as i32).to_le_bytes());
        plain.extend_from_slice(body);
        let frame = encrypt_data_as(&plain, &self.key, Side::Server);
        self.peer.tx.send(frame).unwrap();
    }

    fn send(&mut self, body: &[u8], content_related: bool) -> i64 {
        let msg_id = self.next_msg_id();
        self.send_message(msg_id, i32::from(content_related), body);
        msg_id
    }

    fn send_container(&mut self, bodies: Vec<Vec<u8>>) {
        let messages = bodies
            .into_iter()
            .map(|body| types::Message { msg_id: self.next_msg_id(), seqno: 1, body })
            .collect();
        let container = boxed(&types::MsgContainer { messages });
        self.send(&container, false);
    }

    // Answer one ping so the session id is known.
    async fn ping_roundtrip(&mut self, sender: &MtProtoSender<MockConnection>) {
        let task = tokio::spawn({
            let sender = sender.clone();
            async move { sender.send(&functions::Ping { ping_id: 1 }).await }
        });
        let ping = self.recv().await.remove(0);
        self.send(&boxed(&types::Pong { msg_id: ping.msg_id, ping_id: 1 }), true);
        timeout(task).await.unwrap().unwrap();
    }
}

// Every msg id the client acknowledged, until `wanted` are all seen.
async fn wait_for_acks(server: &mut Server, wanted: &[i64]) {
    let mut acked = Vec::new();
    while !wanted.iter().all(|id| acked.contains(id)) {
        for message in server.recv_all().await {
            if message.constructor_id() == types::MsgsAck::CONSTRUCTOR_ID {
                acked.extend(types::MsgsAck::from_bytes(&message.body[4..]).unwrap().msg_ids);
            }
        }
    }
}

// ─── Scripted handshake ───────────────────────────────────────────────────────

// RFC 3526 group 14.
const DH_PRIME: &str = "ffffffffffffffffc90fdaa22168c234c4c6628b80dc1cd129024e088a67cc74020bbea63b139b22514a08798e3404ddef9519b3cd3a431b302b0a6df25f14374fe1356d6d51c245e485b576625e7ec6f44c42e9a637ed6b0bff5cb6f406b7edee386bfb5a899fa5ae9f24117c4b1fe649286651ece45b3dc2007cb8a163bf0598da48361c55d39a69163fa8fd24cf5f83655d23dca3ad961c62f356208552bb9ed529077096966d670c354e4abc9804f1746c08ca18217c32905e462e36ce3be39e772c180e86039b2783a2ec07a28fb5c55df06f4c52c9de2bcbf6955817183995497cea956ae515d2261898fa051015728e5a8aacaa68ffffffffffffffff";

const PQ: u64 = 1470626929934143021;

/// Server half of an RSA key: the Mersenne primes M1279 and M2203.
struct ServerRsa {
    public: rsa::Key,
    n:      BigUint,
    d:      BigUint,
}

impl ServerRsa {
    fn new() -> Self {
        let one = BigUint::from(1u32);
        let p = (&one << 1279usize) - &one;
        let q = (&one << 2203usize) - &one;
        let phi = (&p - &one) * (&q - &one);
        let e = BigUint::from(65537u32);
        let d = e.modinv(&phi).unwrap();
        let n = &p * &q;
        Self { public: rsa::Key::from_parts(n.clone(), e), n, d }
    }

    // Undo RSA_PAD and read the `p_q_inner_data` inside.
    fn decrypt(&self, data: &[u8]) -> types::PQInnerData {
        let raw = BigUint::from_bytes_be(data).modpow(&self.d, &self.n).to_bytes_be();
        let mut block = vec![0u8; 256 - raw.len()];
        block.extend(raw);

        let (key_xor, aes_part) = block.split_at(32);
        let hash = gramwire_crypto::sha256!(aes_part);
        let temp_key: [u8; 32] = std::array::from_fn(|i| key_xor[i] ^ hash[i]);
        let plain = aes::decrypt_ige(aes_part, &temp_key, &[0; 32]).unwrap();
        let padded: Vec<u8> = plain[..192].iter().rev().copied().collect();
        let enums::PQInnerData::PQInnerData(inner) = enums::PQInnerData::from_bytes(&padded).unwrap();
        inner
    }
}

async fn plain_recv(peer: &mut Peer) -> PlainMessage {
    let frame = timeout(peer.rx.recv()).await.expect("client closed the connection");
    PlainMessage::from_bytes(&frame).unwrap()
}

fn plain_reply(peer: &Peer, request: &PlainMessage, body: Vec<u8>) {
    peer.tx.send(PlainMessage { msg_id: request.msg_id | 1, body }.to_bytes()).unwrap();
}

/// Answer the three handshake requests and return the agreed key.
async fn serve_handshake(peer: &mut Peer, rsa: &ServerRsa) -> AuthKey {
    let server_nonce = [0x5e; 16];

    let request = plain_recv(peer).await;
    let nonce = functions::ReqPqMulti::from_bytes(&request.body[4..]).unwrap().nonce;
    let res_pq = types::ResPq {
        nonce,
        server_nonce,
        pq: PQ.to_be_bytes().to_vec(),
        server_public_key_fingerprints: vec![rsa.public.fingerprint()],
    };
    plain_reply(peer, &request, boxed(&res_pq));

    let request = plain_recv(peer).await;
    let req_dh = functions::ReqDhParams::from_bytes(&request.body[4..]).unwrap();
    assert_eq!(req_dh.public_key_fingerprint, rsa.public.fingerprint());
    let pq_inner = rsa.decrypt(&req_dh.encrypted_data);
    assert_eq!(pq_inner.nonce, nonce);
    let new_nonce = pq_inner.new_nonce;

    let prime = BigUint::parse_bytes(DH_PRIME.as_bytes(), 16).unwrap();
    let secret = BigUint::from_bytes_be(&[0x5a; 256]);
    let g_a = BigUint::from(2u32).modpow(&secret, &prime);
    let server_time = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i32;
    let inner = boxed(&types::ServerDhInnerData {
        nonce,
        server_nonce,
        g: 2,
        dh_prime: prime.to_bytes_be(),
        g_a: g_a.to_bytes_be(),
        server_time,
    });
    let mut answer = gramwire_crypto::sha1!(&inner).to_vec();
    answer.extend_from_slice(&inner);
    answer.resize(answer.len().div_ceil(16) * 16, 0);
    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    aes::ige_encrypt(&mut answer, &key, &iv);
    let dh_params = types::ServerDhParamsOk { nonce, server_nonce, encrypted_answer: answer };
    plain_reply(peer, &request, boxed(&dh_params));

    let request = plain_recv(peer).await;
    let set_dh = functions::SetClientDhParams::from_bytes(&request.body[4..]).unwrap();
    let plain = aes::decrypt_ige(&set_dh.encrypted_data, &key, &iv).unwrap();
    let enums::ClientDhInnerData::ClientDhInnerData(client) =
        enums::ClientDhInnerData::from_bytes(&plain[20..]).unwrap();
    let gab = BigUint::from_bytes_be(&client.g_b).modpow(&secret, &prime).to_bytes_be();
    let mut data = [0u8; 256];
    data[256 - gab.len()..].copy_from_slice(&gab);
    let auth_key = AuthKey::from_bytes(data);

    let ok = types::DhGenOk {
        nonce,
        server_nonce,
        new_nonce_hash1: auth_key.calc_new_nonce_hash(&new_nonce, 1),
    };
    plain_reply(peer, &request, boxed(&ok));
    auth_key
}

async fn connected() -> (MtProtoSender<MockConnection>, Server, Hub, mpsc::UnboundedReceiver<Peer>) {
    connected_with(config()).await
}

async fn connected_with(
    config: SenderConfig,
) -> (MtProtoSender<MockConnection>, Server, Hub, mpsc::UnboundedReceiver<Peer>) {
    init();
    let (hub, mut peers) = hub();
    let sender = MtProtoSender::new(config);
    assert!(sender.connect(MockConnection::new(&hub), false).await.unwrap());
    let server = Server::accept(&mut peers).await;
    (sender, server, hub, peers)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ping_is_answered() {
    let (sender, mut server, hub, _peers) = connected().await;
    assert_eq!(sender.state(), ConnectionState::Connected);
    assert!(!sender.connect(MockConnection::new(&hub), false).await.unwrap());

    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send(&functions::Ping { ping_id: 7 }).await }
    });

    let ping = server.recv().await.remove(0);
    assert_eq!(ping.constructor_id(), functions::Ping::CONSTRUCTOR_ID);
    assert_eq!(ping.msg_id % 4, 0);
    assert_eq!(ping.seq_no % 2, 1);
    server.send(&boxed(&types::Pong { msg_id: ping.msg_id, ping_id: 7 }), true);

    let enums::Pong::Pong(pong) = timeout(task).await.unwrap().unwrap();
    assert_eq!(pong.ping_id, 7);
}

#[tokio::test]
async fn content_messages_are_acknowledged() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0xef, 0xbe, 0xad, 0xde], false).await }
    });
    let request = server.recv().await.remove(0);
    let answer = server.send(&rpc_result(request.msg_id, vec![5; 4]), true);
    assert_eq!(timeout(task).await.unwrap().unwrap(), vec![5; 4]);

    loop {
        let acks: Vec<i64> = server
            .recv_all()
            .await
            .iter()
            .filter(|m| m.constructor_id() == types::MsgsAck::CONSTRUCTOR_ID)
            .flat_map(|m| types::MsgsAck::from_bytes(&m.body[4..]).unwrap().msg_ids)
            .collect();
        if acks.contains(&answer) {
            break;
        }
    }
}

#[tokio::test]
async fn rpc_error_rejects_the_request() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0xef, 0xbe, 0xad, 0xde], false).await }
    });

    let request = server.recv().await.remove(0);
    assert_eq!(request.body, vec![0xef, 0xbe, 0xad, 0xde]);
    let error = boxed(&types::RpcError { error_code: 420, error_message: "FLOOD_WAIT_3".into() });
    server.send(&rpc_result(request.msg_id, error), true);

    match timeout(task).await.unwrap() {
        Err(InvocationError::Rpc(e)) => {
            assert_eq!(e.code, 420);
            assert_eq!(e.name, "FLOOD_WAIT");
            assert_eq!(e.value, Some(3));
        }
        other => panic!("expected an rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn bad_server_salt_resends_with_new_salt() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0x11; 8], false).await }
    });

    let first = server.recv().await.remove(0);
    server.send(
        &boxed(&types::BadServerSalt {
            bad_msg_id: first.msg_id,
            bad_msg_seqno: first.seq_no,
            error_code: 48,
            new_server_salt: 0x5a5a,
        }),
        false,
    );

    let again = server.recv().await.remove(0);
    assert_eq!(again.body, first.body);
    assert!(again.msg_id > first.msg_id);
    assert_eq!(again.salt, 0x5a5a);

    server.send(&rpc_result(again.msg_id, vec![1, 2, 3, 4]), true);
    assert_eq!(timeout(task).await.unwrap().unwrap(), vec![1, 2, 3, 4]);
    assert_eq!(sender.salt().await, 0x5a5a);
}

#[tokio::test]
async fn clock_correction_resends() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0x22; 8], false).await }
    });

    let first = server.recv().await.remove(0);
    server.skew_clock(-100);
    server.send(
        &boxed(&types::BadMsgNotification {
            bad_msg_id: first.msg_id,
            bad_msg_seqno: first.seq_no,
            error_code: 17,
        }),
        false,
    );

    let again = server.recv().await.remove(0);
    assert_eq!(again.body, first.body);
    let offset = sender.time_offset().await;
    assert!((-101..=-99).contains(&offset), "offset {offset}");

    server.send(&rpc_result(again.msg_id, vec![9; 4]), true);
    assert_eq!(timeout(task).await.unwrap().unwrap(), vec![9; 4]);
}

#[tokio::test]
async fn unrecoverable_bad_message_rejects() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0x33; 8], false).await }
    });

    let first = server.recv().await.remove(0);
    server.send(
        &boxed(&types::BadMsgNotification {
            bad_msg_id: first.msg_id,
            bad_msg_seqno: first.seq_no,
            error_code: 64,
        }),
        false,
    );
    match timeout(task).await.unwrap() {
        Err(InvocationError::BadMessage(e)) => assert_eq!(e.code, 64),
        other => panic!("expected a bad message error, got {other:?}"),
    }
}

#[tokio::test]
async fn container_answers_resolve_each_request() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let a = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0xaa; 4], false).await }
    });
    let b = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0xbb; 4], false).await }
    });

    let mut requests = Vec::new();
    while requests.len() < 2 {
        requests.extend(server.recv().await);
    }
    let answers = requests
        .iter()
        .map(|r| rpc_result(r.msg_id, r.body.iter().map(|b| !b).collect()))
        .collect();
    server.send_container(answers);

    assert_eq!(timeout(a).await.unwrap().unwrap(), vec![0x55; 4]);
    assert_eq!(timeout(b).await.unwrap().unwrap(), vec![0x44; 4]);
}

#[tokio::test]
async fn oversized_request_does_not_block_others() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let big = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0; MAX_CONTAINER_BYTES + 1], false).await }
    });
    assert!(matches!(
        timeout(big).await.unwrap(),
        Err(InvocationError::PayloadTooLarge { .. })
    ));
    server.ping_roundtrip(&sender).await;
}

#[tokio::test]
async fn state_requests_are_answered() {
    let (sender, mut server, _hub, _peers) = connected().await;
    server.ping_roundtrip(&sender).await;

    let request = server.send(&boxed(&types::MsgsStateReq { msg_ids: vec![10, 20] }), true);
    let reply = server.recv().await.remove(0);
    assert_eq!(reply.constructor_id(), types::MsgsStateInfo::CONSTRUCTOR_ID);
    assert_eq!(reply.seq_no % 2, 0);

    let info = types::MsgsStateInfo::from_bytes(&reply.body[4..]).unwrap();
    assert_eq!(info.req_msg_id, request);
    assert_eq!(info.info, vec![1, 1]);
}

#[tokio::test]
async fn updates_reach_the_callback() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = SenderConfig {
        on_update: Some(Arc::new(move |update: Update| {
            let _ = tx.send(update);
        })),
        ..config()
    };
    let (sender, mut server, _hub, _peers) = connected_with(config).await;
    server.ping_roundtrip(&sender).await;

    let mut body = 0xe317af7eu32.to_le_bytes().to_vec();
    body.extend([1, 2, 3, 4]);
    server.send(&body, true);

    let update = timeout(rx.recv()).await.unwrap();
    assert_eq!(update.constructor_id, 0xe317af7e);
    assert_eq!(update.body, body);
}

#[tokio::test]
async fn dropped_connection_is_replaced() {
    let states = Arc::new(StdMutex::new(Vec::new()));
    let config = SenderConfig {
        on_state: Some(Arc::new({
            let states = Arc::clone(&states);
            move |state: ConnectionState| states.lock().unwrap().push(state)
        })),
        ..config()
    };
    let (sender, mut server, _hub, mut peers) = connected_with(config).await;

    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send(&functions::Ping { ping_id: 3 }).await }
    });
    let first = server.recv().await.remove(0);
    drop(server);

    let mut server = Server::accept(&mut peers).await;
    let again = server.recv().await.remove(0);
    assert_eq!(again.body, first.body);
    assert_ne!(again.session_id, first.session_id);
    server.send(&boxed(&types::Pong { msg_id: again.msg_id, ping_id: 3 }), true);

    let enums::Pong::Pong(pong) = timeout(task).await.unwrap().unwrap();
    assert_eq!(pong.ping_id, 3);
    assert_eq!(sender.state(), ConnectionState::Connected);
    assert!(states.lock().unwrap().contains(&ConnectionState::Reconnecting));
}

#[tokio::test]
async fn revoked_auth_key_breaks_the_sender() {
    let (sender, server, _hub, _peers) = connected().await;
    let mut states = sender.subscribe();

    server.peer.tx.send((-404i32).to_le_bytes().to_vec()).unwrap();
    timeout(states.wait_for(|s| *s == ConnectionState::Broken)).await.unwrap();

    assert!(sender.auth_key().await.is_none());
    assert!(!sender.is_connected());
    assert!(matches!(sender.send_raw(vec![0; 4], false).await, Err(InvocationError::NotConnected)));
}

#[tokio::test]
async fn disconnect_stops_the_sender() {
    let (sender, mut server, _hub, _peers) = connected().await;
    sender.disconnect().await;

    assert_eq!(sender.state(), ConnectionState::Disconnected);
    assert!(timeout(server.peer.rx.recv()).await.is_none());
    assert!(matches!(
        sender.send(&functions::Ping { ping_id: 1 }).await,
        Err(InvocationError::NotConnected)
    ));
}

#[tokio::test]
async fn send_before_connect_fails() {
    let sender: MtProtoSender<MockConnection> = MtProtoSender::new(config());
    assert!(matches!(
        sender.send(&functions::Ping { ping_id: 1 }).await,
        Err(InvocationError::NotConnected)
    ));
    assert_eq!(sender.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn failed_handshake_is_retried_then_reported() {
    init();
    let (hub, mut peers) = hub();
    let config = SenderConfig { auth_key: None, server_keys: ServerKeys::new(), ..config() };
    let sender = MtProtoSender::new(config);

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let mut peer = peers.recv().await.unwrap();
            let frame = peer.rx.recv().await.unwrap();
            let request = PlainMessage::from_bytes(&frame).unwrap();
            assert_eq!(read_i32(&request.body) as u32, functions::ReqPqMulti::CONSTRUCTOR_ID);
            let req_pq = functions::ReqPqMulti::from_bytes(&request.body[4..]).unwrap();

            let res_pq = boxed(&types::ResPq {
                nonce: req_pq.nonce,
                server_nonce: [0x22; 16],
                pq: 1470626929934143021u64.to_be_bytes().to_vec(),
                server_public_key_fingerprints: vec![0x0bad_f00d],
            });
            peer.tx.send(PlainMessage { msg_id: request.msg_id | 1, body: res_pq }.to_bytes()).unwrap();
            // Held until the client gives up on this attempt.
            assert!(peer.rx.recv().await.is_none());
        }
    });

    let result = timeout(sender.connect(MockConnection::new(&hub), false)).await;
    assert!(matches!(result, Err(InvocationError::Handshake(_))), "{result:?}");
    assert_eq!(sender.state(), ConnectionState::Disconnected);
    assert!(!sender.is_connected());
    timeout(server).await.unwrap();
}

#[tokio::test]
async fn disconnect_during_reconnect_wins() {
    let (sender, server, hub, mut peers) = connected().await;
    let mut states = sender.subscribe();
    let gate = Arc::clone(&hub.gate).lock_owned().await;

    drop(server);
    timeout(states.wait_for(|s| *s == ConnectionState::Reconnecting)).await.unwrap();
    // The reconnect is now inside `connect`, holding the connect lock.
    let mut stalled = Server::accept(&mut peers).await;

    let disconnecting = tokio::spawn({
        let sender = sender.clone();
        async move { sender.disconnect().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!disconnecting.is_finished());
    drop(gate);
    timeout(disconnecting).await.unwrap();

    assert_eq!(sender.state(), ConnectionState::Disconnected);
    assert!(!sender.is_connected());
    assert!(timeout(stalled.peer.rx.recv()).await.is_none());
    assert!(matches!(sender.send_raw(vec![0; 4], false).await, Err(InvocationError::NotConnected)));

    assert!(sender.connect(MockConnection::new(&hub), false).await.unwrap());
    let mut server = Server::accept(&mut peers).await;
    server.ping_roundtrip(&sender).await;
}

#[tokio::test]
async fn clock_correction_from_a_server_ahead_of_us() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0x23; 8], false).await }
    });

    let first = server.recv().await.remove(0);
    server.skew_clock(120);
    server.send(
        &boxed(&types::BadMsgNotification {
            bad_msg_id: first.msg_id,
            bad_msg_seqno: first.seq_no,
            error_code: 16,
        }),
        false,
    );

    let again = server.recv().await.remove(0);
    assert_eq!(again.body, first.body);
    assert!((again.msg_id >> 32) - (first.msg_id >> 32) >= 119);
    let offset = sender.time_offset().await;
    assert!((119..=121).contains(&offset), "offset {offset}");

    server.send(&rpc_result(again.msg_id, vec![8; 4]), true);
    assert_eq!(timeout(task).await.unwrap().unwrap(), vec![8; 4]);
}

#[tokio::test]
async fn sequence_corrections_resend() {
    let (sender, mut server, _hub, _peers) = connected().await;

    for (code, raised) in [(32, true), (33, false)] {
        let task = tokio::spawn({
            let sender = sender.clone();
            async move { sender.send_raw(vec![0x32; 8], false).await }
        });
        let first = server.recv().await.remove(0);
        server.send(
            &boxed(&types::BadMsgNotification {
                bad_msg_id: first.msg_id,
                bad_msg_seqno: first.seq_no,
                error_code: code,
            }),
            false,
        );

        let again = server.recv().await.remove(0);
        assert_eq!(again.body, first.body);
        assert_eq!(again.seq_no % 2, 1);
        if raised {
            assert!(again.seq_no >= first.seq_no + 128, "{} -> {}", first.seq_no, again.seq_no);
        } else {
            assert!(again.seq_no < first.seq_no, "{} -> {}", first.seq_no, again.seq_no);
        }

        server.send(&rpc_result(again.msg_id, vec![code as u8; 4]), true);
        assert_eq!(timeout(task).await.unwrap().unwrap(), vec![code as u8; 4]);
    }
}

#[tokio::test]
async fn new_session_created_sets_the_salt() {
    let (sender, mut server, _hub, _peers) = connected().await;
    server.ping_roundtrip(&sender).await;

    server.send(
        &boxed(&types::NewSessionCreated { first_msg_id: 0, unique_id: 9, server_salt: 0x7777 }),
        true,
    );
    timeout(async {
        while sender.salt().await != 0x7777 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;

    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send(&functions::Ping { ping_id: 2 }).await }
    });
    let ping = server.recv().await.remove(0);
    assert_eq!(ping.salt, 0x7777);
    server.send(&boxed(&types::Pong { msg_id: ping.msg_id, ping_id: 2 }), true);
    timeout(task).await.unwrap().unwrap();
}

#[tokio::test]
async fn future_salts_answer_their_request() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send(&functions::GetFutureSalts { num: 1 }).await }
    });

    let request = server.recv().await.remove(0);
    assert_eq!(request.constructor_id(), functions::GetFutureSalts::CONSTRUCTOR_ID);
    let salt = types::FutureSalt { valid_since: 100, valid_until: 200, salt: 0x5a17 };
    server.send(
        &boxed(&types::FutureSalts { req_msg_id: request.msg_id, now: 150, salts: RawVec(vec![salt.clone()]) }),
        false,
    );

    let enums::FutureSalts::FutureSalts(salts) = timeout(task).await.unwrap().unwrap();
    assert_eq!(salts.req_msg_id, request.msg_id);
    assert_eq!(salts.salts.0, vec![salt]);
}

#[tokio::test]
async fn gzip_packed_answer_is_inflated() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let task = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0x44; 4], false).await }
    });

    let request = server.recv().await.remove(0);
    let packed = gzip_packed(&rpc_result(request.msg_id, vec![7; 600])).unwrap();
    assert_eq!(read_i32(&packed) as u32, types::GzipPacked::CONSTRUCTOR_ID);
    server.send(&packed, true);

    assert_eq!(timeout(task).await.unwrap().unwrap(), vec![7; 600]);
}

#[tokio::test]
async fn detailed_info_answers_are_acknowledged() {
    let (sender, mut server, _hub, _peers) = connected().await;
    server.ping_roundtrip(&sender).await;

    server.send(
        &boxed(&types::MsgDetailedInfo { msg_id: 4, answer_msg_id: 0x0777_0001, bytes: 16, status: 0 }),
        false,
    );
    server.send(
        &boxed(&types::MsgNewDetailedInfo { answer_msg_id: 0x0777_0005, bytes: 16, status: 0 }),
        false,
    );
    timeout(wait_for_acks(&mut server, &[0x0777_0001, 0x0777_0005])).await;
}

#[tokio::test]
async fn late_upload_file_is_dropped_quietly() {
    let (sender, mut server, _hub, _peers) = connected().await;
    server.ping_roundtrip(&sender).await;

    let mut file = 0x096a18d5u32.to_le_bytes().to_vec();
    file.extend([0; 12]);
    let answer = server.send(&rpc_result(0x4000_0000, file), true);
    timeout(wait_for_acks(&mut server, &[answer])).await;

    server.ping_roundtrip(&sender).await;
    assert!(sender.is_connected());
}

#[tokio::test]
async fn ordered_requests_wait_for_the_previous_one() {
    let (sender, mut server, _hub, _peers) = connected().await;
    let a = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0xa1; 4], true).await }
    });
    let first = server.recv().await.remove(0);
    assert_eq!(first.body, vec![0xa1; 4]);

    let b = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0xb2; 4], true).await }
    });
    let second = server.recv().await.remove(0);
    assert_eq!(second.constructor_id(), functions::INVOKE_AFTER_MSG_ID);
    let wrapped = functions::InvokeAfterMsg::<Blob>::from_bytes(&second.body[4..]).unwrap();
    assert_eq!(wrapped.msg_id, first.msg_id);
    assert_eq!(wrapped.query.0, vec![0xb2; 4]);

    server.send(&rpc_result(first.msg_id, vec![1; 4]), true);
    server.send(&rpc_result(second.msg_id, vec![2; 4]), true);
    assert_eq!(timeout(a).await.unwrap().unwrap(), vec![1; 4]);
    assert_eq!(timeout(b).await.unwrap().unwrap(), vec![2; 4]);

    // Nothing left to wait for.
    let c = tokio::spawn({
        let sender = sender.clone();
        async move { sender.send_raw(vec![0xc3; 4], true).await }
    });
    let third = server.recv().await.remove(0);
    assert_eq!(third.body, vec![0xc3; 4]);
    server.send(&rpc_result(third.msg_id, vec![3; 4]), true);
    assert_eq!(timeout(c).await.unwrap().unwrap(), vec![3; 4]);
}

#[tokio::test]
async fn connect_generates_and_reports_an_auth_key() {
    init();
    let rsa = ServerRsa::new();
    let (hub, mut peers) = hub();
    let (tx, mut generated) = mpsc::unbounded_channel();
    let config = SenderConfig {
        auth_key: None,
        server_keys: ServerKeys::new().with_key(rsa.public.clone()),
        on_auth_key: Some(Arc::new(move |key: &AuthKey| {
            let _ = tx.send(key.clone());
        })),
        ..config()
    };
    let sender = MtProtoSender::new(config);

    let handshake = tokio::spawn(async move {
        let mut peer = peers.recv().await.unwrap();
        let auth_key = serve_handshake(&mut peer, &rsa).await;
        (peer, auth_key, peers)
    });
    let connecting = tokio::time::timeout(Duration::from_secs(60), sender.connect(MockConnection::new(&hub), false));
    assert!(connecting.await.expect("handshake timed out").unwrap());
    let (peer, auth_key, _peers) = timeout(handshake).await.unwrap();

    assert_eq!(timeout(generated.recv()).await.unwrap(), auth_key);
    assert_eq!(sender.auth_key().await, Some(auth_key.clone()));
    assert!(sender.time_offset().await.abs() <= 1);

    let mut server = Server { peer, key: auth_key, session_id: 0, salt: 0, last_msg_id: 0, clock_skew: 0 };
    server.ping_roundtrip(&sender).await;
}
