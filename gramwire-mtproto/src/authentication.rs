//! Sans-IO MTProto authorization key generation.
//!
//! # Flow
//!
//! ```text
//! let (req, s1) = authentication::step1()?;
//! // send req, receive resp
//! let (req, s2) = authentication::step2(s1, resp, &server_keys)?;
//! // send req, receive resp
//! let (req, s3) = authentication::step3(s2, resp)?;
//! // send req, receive resp
//! let done = authentication::finish(s3, resp)?;
//! // done.auth_key is ready
//! ```
//!
//! Each step consumes the previous state, so a response can only ever be
//! fed to the step that expects it.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use gramwire_crypto::{AuthKey, FactorizeError, aes, factorize, generate_key_data_from_nonce, rsa, sha1};
use gramwire_tl::{Cursor, Deserializable, Serializable, enums, functions, types};
use log::{debug, info};
use num_bigint::{BigUint, ToBigUint};

// ─── Error ────────────────────────────────────────────────────────────────────

/// Errors that can occur during auth key generation.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    InvalidNonce         { got: [u8; 16], expected: [u8; 16] },
    InvalidPqSize        { size: usize },
    Factorize(FactorizeError),
    UnknownFingerprints  { fingerprints: Vec<i64> },
    /// `p_q_inner_data` does not fit in one RSA_PAD block.
    PayloadTooLarge      { len: usize },
    /// No temporary key produced a block below the modulus.
    RsaEncrypt,
    DhParamsFail,
    InvalidServerNonce   { got: [u8; 16], expected: [u8; 16] },
    EncryptedResponseNotPadded { len: usize },
    InvalidDhInnerData   { error: gramwire_tl::deserialize::Error },
    GParameterOutOfRange { value: BigUint, low: BigUint, high: BigUint },
    /// `dh_prime` is not a 2048-bit number.
    InvalidDhPrime       { bits: u64 },
    DhGenRetry,
    DhGenFail,
    InvalidAnswerHash    { got: [u8; 20], expected: [u8; 20] },
    InvalidNewNonceHash  { got: [u8; 16], expected: [u8; 16] },
    /// The server answered with something other than the expected object.
    UnexpectedResponse   { error: gramwire_tl::deserialize::Error },
}

impl Error {
    /// Whether the server's answer failed a nonce or hash check.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Self::InvalidNonce { .. }
                | Self::InvalidServerNonce { .. }
                | Self::InvalidAnswerHash { .. }
                | Self::InvalidNewNonceHash { .. }
                | Self::GParameterOutOfRange { .. }
                | Self::InvalidDhPrime { .. }
        )
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNonce { got, expected }
                => write!(f, "nonce mismatch: got {got:?}, expected {expected:?}"),
            Self::InvalidPqSize { size }
                => write!(f, "pq size {size} invalid (expected 8)"),
            Self::Factorize(e)
                => write!(f, "cannot factorize pq: {e}"),
            Self::UnknownFingerprints { fingerprints }
                => write!(f, "no known fingerprint in {fingerprints:?}"),
            Self::PayloadTooLarge { len }
                => write!(f, "p_q_inner_data of {len} bytes exceeds {}", rsa::MAX_HASHED_LEN),
            Self::RsaEncrypt
                => write!(f, "RSA_PAD found no block below the modulus"),
            Self::DhParamsFail
                => write!(f, "server returned DH params failure"),
            Self::InvalidServerNonce { got, expected }
                => write!(f, "server_nonce mismatch: got {got:?}, expected {expected:?}"),
            Self::EncryptedResponseNotPadded { len }
                => write!(f, "encrypted answer len {len} is not 16-byte aligned"),
            Self::InvalidDhInnerData { error }
                => write!(f, "DH inner data deserialization error: {error}"),
            Self::GParameterOutOfRange { value, low, high }
                => write!(f, "g={value} not in range ({low}, {high})"),
            Self::InvalidDhPrime { bits }
                => write!(f, "dh_prime has {bits} bits (expected 2048)"),
            Self::DhGenRetry  => write!(f, "DH gen retry requested"),
            Self::DhGenFail   => write!(f, "DH gen failed"),
            Self::InvalidAnswerHash { got, expected }
                => write!(f, "answer hash mismatch: got {got:?}, expected {expected:?}"),
            Self::InvalidNewNonceHash { got, expected }
                => write!(f, "new nonce hash mismatch: got {got:?}, expected {expected:?}"),
            Self::UnexpectedResponse { error }
                => write!(f, "unexpected handshake response: {error}"),
        }
    }
}

impl From<FactorizeError> for Error {
    fn from(e: FactorizeError) -> Self { Self::Factorize(e) }
}

/// Decode a plaintext handshake answer into the boxed type a step expects.
pub fn parse_response<T: Deserializable>(body: &[u8]) -> Result<T, Error> {
    T::from_bytes(body).map_err(|error| Error::UnexpectedResponse { error })
}

// ─── Server keys ─────────────────────────────────────────────────────────────

/// RSA public keys the client trusts, by fingerprint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServerKeys {
    keys: HashMap<i64, rsa::Key>,
}

impl ServerKeys {
    /// An empty table. No handshake can succeed until a key is added.
    pub fn new() -> Self { Self::default() }

    /// The production and test data-center keys.
    #[allow(clippy::unreadable_literal)]
    pub fn telegram() -> Self {
        const KEYS: [&str; 2] = [
            // production, fingerprint -3414540481677951611
            "29379598170669337022986177149456128565388431120058863768162556424047512191330847455146576344487764408661701890505066208632169112269581063774293102577308490531282748465986139880977280302242772832972539403531316010870401287642763009136156734339538042419388722777357134487746169093539093850251243897188928735903389451772730245253062963384108812842079887538976360465290946139638691491496062099570836476454855996319192747663615955633778034897140982517446405334423701359108810182097749467210509584293428076654573384828809574217079944388301239431309115013843331317877374435868468779972014486325557807783825502498215169806323",
            // test, fingerprint -5595554452916591101
            "25342889448840415564971689590713473206898847759084779052582026594546022463853940585885215951168491965708222649399180603818074200620463776135424884632162512403163793083921641631564740959529419359595852941166848940585952337613333022396096584117954892216031229237302943701877588456738335398602461675225081791820393153757504952636234951323237820036543581047826906120927972487366805292115792231423684261262330394324750785450942589751755390156647751460719351439969059949569615302809050721500330239005077889855323917509948255722081644689442127297605422579707142646660768825302832201908302295573257427896031830742328565032949",
        ];
        KEYS.iter()
            .filter_map(|n| rsa::Key::new(n, "65537"))
            .fold(Self::new(), Self::with_key)
    }

    /// Add `key`, returning its fingerprint.
    pub fn insert(&mut self, key: rsa::Key) -> i64 {
        let fingerprint = key.fingerprint();
        self.keys.insert(fingerprint, key);
        fingerprint
    }

    pub fn with_key(mut self, key: rsa::Key) -> Self {
        self.insert(key);
        self
    }

    pub fn get(&self, fingerprint: i64) -> Option<&rsa::Key> {
        self.keys.get(&fingerprint)
    }

    pub fn len(&self) -> usize { self.keys.len() }

    pub fn is_empty(&self) -> bool { self.keys.is_empty() }
}

// ─── Step state ──────────────────────────────────────────────────────────────

/// Waiting for `resPQ`.
pub struct AwaitingPq { nonce: [u8; 16] }

/// Waiting for `server_DH_params_*`.
pub struct AwaitingDhParams {
    nonce:        [u8; 16],
    server_nonce: [u8; 16],
    new_nonce:    [u8; 32],
}

/// Waiting for `dh_gen_*`.
pub struct AwaitingDhConfirm {
    nonce:        [u8; 16],
    server_nonce: [u8; 16],
    new_nonce:    [u8; 32],
    gab:          BigUint,
    time_offset:  i32,
}

/// The final output of a successful auth key handshake.
#[derive(Clone, Debug, PartialEq)]
pub struct Finished {
    pub auth_key:    AuthKey,
    /// Clock skew in seconds relative to the server.
    pub time_offset: i32,
    /// Initial server salt.
    pub first_salt:  i64,
}

// ─── Step 1: req_pq_multi ────────────────────────────────────────────────────

/// Generate a `req_pq_multi` request. Returns the request + opaque state.
pub fn step1() -> Result<(functions::ReqPqMulti, AwaitingPq), Error> {
    let mut buf = [0u8; 16];
    getrandom::getrandom(&mut buf).expect("getrandom");
    do_step1(&buf)
}

fn do_step1(random: &[u8; 16]) -> Result<(functions::ReqPqMulti, AwaitingPq), Error> {
    let nonce = *random;
    Ok((functions::ReqPqMulti { nonce }, AwaitingPq { nonce }))
}

// ─── Step 2: req_DH_params ───────────────────────────────────────────────────

/// Process `resPQ` and generate `req_DH_params`.
pub fn step2(
    data:     AwaitingPq,
    response: enums::ResPq,
    keys:     &ServerKeys,
) -> Result<(functions::ReqDhParams, AwaitingDhParams), Error> {
    let mut rnd = [0u8; 256];
    getrandom::getrandom(&mut rnd).expect("getrandom");
    do_step2(data, response, keys, &rnd)
}

fn do_step2(
    data:     AwaitingPq,
    response: enums::ResPq,
    keys:     &ServerKeys,
    random:   &[u8; 256],
) -> Result<(functions::ReqDhParams, AwaitingDhParams), Error> {
    let AwaitingPq { nonce } = data;
    let enums::ResPq::ResPq(res_pq) = response;

    check_nonce(&res_pq.nonce, &nonce)?;

    let pq: [u8; 8] = res_pq.pq.as_slice().try_into()
        .map_err(|_| Error::InvalidPqSize { size: res_pq.pq.len() })?;
    let pq = u64::from_be_bytes(pq);
    let (p, q) = factorize(pq)?;
    debug!("[gramwire] factorized pq {pq} into {p} * {q}");

    let mut new_nonce = [0u8; 32];
    new_nonce.copy_from_slice(&random[..32]);

    // random[32..256] is 224 bytes for RSA_PAD
    let mut rnd224 = [0u8; 224];
    rnd224.copy_from_slice(&random[32..]);

    fn trim_be(v: u64) -> Vec<u8> {
        let b = v.to_be_bytes();
        let skip = b.iter().position(|&x| x != 0).unwrap_or(7);
        b[skip..].to_vec()
    }

    let p_bytes = trim_be(p);
    let q_bytes = trim_be(q);

    let pq_inner = enums::PQInnerData::PQInnerData(types::PQInnerData {
        pq: pq.to_be_bytes().to_vec(),
        p: p_bytes.clone(),
        q: q_bytes.clone(),
        nonce,
        server_nonce: res_pq.server_nonce,
        new_nonce,
    })
    .to_bytes();

    if pq_inner.len() > rsa::MAX_HASHED_LEN {
        return Err(Error::PayloadTooLarge { len: pq_inner.len() });
    }

    let (fingerprint, key) = res_pq.server_public_key_fingerprints
        .iter()
        .find_map(|&fp| keys.get(fp).map(|key| (fp, key)))
        .ok_or_else(|| Error::UnknownFingerprints {
            fingerprints: res_pq.server_public_key_fingerprints.clone(),
        })?;

    let ciphertext = rsa::encrypt_hashed(&pq_inner, key, &rnd224).ok_or(Error::RsaEncrypt)?;

    Ok((
        functions::ReqDhParams {
            nonce,
            server_nonce: res_pq.server_nonce,
            p: p_bytes,
            q: q_bytes,
            public_key_fingerprint: fingerprint,
            encrypted_data: ciphertext,
        },
        AwaitingDhParams { nonce, server_nonce: res_pq.server_nonce, new_nonce },
    ))
}

// ─── Step 3: set_client_DH_params ────────────────────────────────────────────

/// Process `server_DH_params` and generate `set_client_DH_params`.
pub fn step3(
    data:     AwaitingDhParams,
    response: enums::ServerDhParams,
) -> Result<(functions::SetClientDhParams, AwaitingDhConfirm), Error> {
    let mut rnd = [0u8; 272]; // 256 for DH b, 16 for padding
    getrandom::getrandom(&mut rnd).expect("getrandom");
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i32)
        .unwrap_or_default();
    do_step3(data, response, &rnd, now)
}

fn do_step3(
    data:     AwaitingDhParams,
    response: enums::ServerDhParams,
    random:   &[u8; 272],
    now:      i32,
) -> Result<(functions::SetClientDhParams, AwaitingDhConfirm), Error> {
    let AwaitingDhParams { nonce, server_nonce, new_nonce } = data;

    let mut server_dh_ok = match response {
        enums::ServerDhParams::Fail(f) => {
            check_nonce(&f.nonce, &nonce)?;
            check_server_nonce(&f.server_nonce, &server_nonce)?;
            let digest = sha1!(new_nonce);
            let mut expected_hash = [0u8; 16];
            expected_hash.copy_from_slice(&digest[4..]);
            check_new_nonce_hash(&f.new_nonce_hash, &expected_hash)?;
            return Err(Error::DhParamsFail);
        }
        enums::ServerDhParams::Ok(x) => x,
    };

    check_nonce(&server_dh_ok.nonce, &nonce)?;
    check_server_nonce(&server_dh_ok.server_nonce, &server_nonce)?;

    let answer_len = server_dh_ok.encrypted_answer.len();
    if answer_len % 16 != 0 || answer_len < 32 {
        return Err(Error::EncryptedResponseNotPadded { len: answer_len });
    }

    let (key, iv) = generate_key_data_from_nonce(&server_nonce, &new_nonce);
    aes::ige_decrypt(&mut server_dh_ok.encrypted_answer, &key, &iv);
    let plain = server_dh_ok.encrypted_answer;

    let mut got_hash = [0u8; 20];
    got_hash.copy_from_slice(&plain[..20]);
    let mut cursor = Cursor::from_slice(&plain[20..]);

    let enums::ServerDhInnerData::ServerDhInnerData(inner) =
        enums::ServerDhInnerData::deserialize(&mut cursor)
            .map_err(|error| Error::InvalidDhInnerData { error })?;

    let expected_hash = sha1!(&plain[20..20 + cursor.pos()]);
    if got_hash != expected_hash {
        return Err(Error::InvalidAnswerHash { got: got_hash, expected: expected_hash });
    }

    check_nonce(&inner.nonce, &nonce)?;
    check_server_nonce(&inner.server_nonce, &server_nonce)?;

    let dh_prime = BigUint::from_bytes_be(&inner.dh_prime);
    if dh_prime.bits() != 2048 {
        return Err(Error::InvalidDhPrime { bits: dh_prime.bits() });
    }
    let g = inner.g.to_biguint().unwrap_or_default();
    let g_a = BigUint::from_bytes_be(&inner.g_a);
    let time_offset = inner.server_time.wrapping_sub(now);

    let one = BigUint::from(1u32);
    check_g_in_range(&g, &one, &(&dh_prime - &one))?;
    check_g_in_range(&g_a, &one, &(&dh_prime - &one))?;

    let b = BigUint::from_bytes_be(&random[..256]);
    let g_b = g.modpow(&b, &dh_prime);
    let gab = g_a.modpow(&b, &dh_prime);

    check_g_in_range(&g_b, &one, &(&dh_prime - &one))?;
    let safety = one.clone() << (2048 - 64);
    check_g_in_range(&g_a, &safety, &(&dh_prime - &safety))?;
    check_g_in_range(&g_b, &safety, &(&dh_prime - &safety))?;

    let client_dh_inner = enums::ClientDhInnerData::ClientDhInnerData(types::ClientDhInnerData {
        nonce,
        server_nonce,
        retry_id: 0,
        g_b: g_b.to_bytes_be(),
    })
    .to_bytes();

    let digest = sha1!(&client_dh_inner);
    let pad_len = (16 - ((20 + client_dh_inner.len()) % 16)) % 16;

    let mut hashed = Vec::with_capacity(20 + client_dh_inner.len() + pad_len);
    hashed.extend_from_slice(&digest);
    hashed.extend_from_slice(&client_dh_inner);
    hashed.extend_from_slice(&random[256..256 + pad_len]);

    aes::ige_encrypt(&mut hashed, &key, &iv);

    Ok((
        functions::SetClientDhParams { nonce, server_nonce, encrypted_data: hashed },
        AwaitingDhConfirm { nonce, server_nonce, new_nonce, gab, time_offset },
    ))
}

// ─── finish: create_key ──────────────────────────────────────────────────────

/// Finalise the handshake. Returns the ready [`Finished`] on success.
pub fn finish(
    data:     AwaitingDhConfirm,
    response: enums::SetClientDhParamsAnswer,
) -> Result<Finished, Error> {
    let AwaitingDhConfirm { nonce, server_nonce, new_nonce, gab, time_offset } = data;

    struct DhData { nonce: [u8; 16], server_nonce: [u8; 16], hash: [u8; 16], num: u8 }

    let dh = match response {
        enums::SetClientDhParamsAnswer::DhGenOk(x) =>
            DhData { nonce: x.nonce, server_nonce: x.server_nonce, hash: x.new_nonce_hash1, num: 1 },
        enums::SetClientDhParamsAnswer::DhGenRetry(x) =>
            DhData { nonce: x.nonce, server_nonce: x.server_nonce, hash: x.new_nonce_hash2, num: 2 },
        enums::SetClientDhParamsAnswer::DhGenFail(x) =>
            DhData { nonce: x.nonce, server_nonce: x.server_nonce, hash: x.new_nonce_hash3, num: 3 },
    };

    check_nonce(&dh.nonce, &nonce)?;
    check_server_nonce(&dh.server_nonce, &server_nonce)?;

    let mut key_bytes = [0u8; 256];
    let gab_bytes = gab.to_bytes_be();
    let skip = 256usize.saturating_sub(gab_bytes.len());
    key_bytes[skip..].copy_from_slice(&gab_bytes[gab_bytes.len().saturating_sub(256)..]);

    let auth_key = AuthKey::from_bytes(key_bytes);
    let expected_hash = auth_key.calc_new_nonce_hash(&new_nonce, dh.num);
    check_new_nonce_hash(&dh.hash, &expected_hash)?;

    let first_salt = {
        let mut buf = [0u8; 8];
        for ((dst, a), b) in buf.iter_mut().zip(&new_nonce[..8]).zip(&server_nonce[..8]) {
            *dst = a ^ b;
        }
        i64::from_le_bytes(buf)
    };

    match dh.num {
        1 => {
            info!("[gramwire] auth key {:?} generated (time offset {time_offset}s)", auth_key);
            Ok(Finished { auth_key, time_offset, first_salt })
        }
        2 => Err(Error::DhGenRetry),
        _ => Err(Error::DhGenFail),
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn check_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected { Ok(()) } else {
        Err(Error::InvalidNonce { got: *got, expected: *expected })
    }
}
fn check_server_nonce(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected { Ok(()) } else {
        Err(Error::InvalidServerNonce { got: *got, expected: *expected })
    }
}
fn check_new_nonce_hash(got: &[u8; 16], expected: &[u8; 16]) -> Result<(), Error> {
    if got == expected { Ok(()) } else {
        Err(Error::InvalidNewNonceHash { got: *got, expected: *expected })
    }
}
fn check_g_in_range(val: &BigUint, lo: &BigUint, hi: &BigUint) -> Result<(), Error> {
    if lo < val && val < hi { Ok(()) } else {
        Err(Error::GParameterOutOfRange { value: val.clone(), low: lo.clone(), high: hi.clone() })
    }
}
