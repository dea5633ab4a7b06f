use gramwire_tl::deserialize::Error;
use gramwire_tl::{Blob, Cursor, Deserializable, Identifiable, RawVec, Serializable, enums, functions, types};

// ── Primitives ────────────────────────────────────────────────────────────────

#[test]
fn integers_are_little_endian() {
    assert_eq!(0x01020304i32.to_bytes(), [4, 3, 2, 1]);
    assert_eq!((-2i64).to_bytes(), [0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
    assert_eq!(i64::from_bytes(&i64::MIN.to_bytes()).unwrap(), i64::MIN);
}

#[test]
fn bool_uses_constructor_ids() {
    assert_eq!(true.to_bytes(), 0x997275b5u32.to_le_bytes());
    assert_eq!(false.to_bytes(), 0xbc799737u32.to_le_bytes());
    assert_eq!(
        bool::from_bytes(&7u32.to_le_bytes()),
        Err(Error::UnexpectedConstructor { id: 7 })
    );
}

// ── Bytes ─────────────────────────────────────────────────────────────────────

#[test]
fn short_bytes_are_padded_to_four() {
    let bytes = b"abcde".to_vec().to_bytes();
    assert_eq!(bytes, [5, b'a', b'b', b'c', b'd', b'e', 0, 0]);
    assert_eq!(Vec::<u8>::from_bytes(&bytes).unwrap(), b"abcde");
}

#[test]
fn long_bytes_use_four_byte_header() {
    let data = vec![0x42u8; 300];
    let bytes = data.to_bytes();
    assert_eq!(&bytes[..4], &[0xfe, 0x2c, 0x01, 0x00]);
    assert_eq!(bytes.len(), 304);
    assert_eq!(Vec::<u8>::from_bytes(&bytes).unwrap(), data);
}

#[test]
fn declared_length_past_end_is_eof() {
    assert_eq!(Vec::<u8>::from_bytes(&[10, 1, 2, 3]), Err(Error::UnexpectedEof));
}

#[test]
fn invalid_utf8_string() {
    let bytes = vec![0xffu8, 0xfe].to_bytes();
    assert_eq!(String::from_bytes(&bytes), Err(Error::InvalidUtf8));
}

#[test]
fn blob_consumes_everything() {
    let mut cur = Cursor::from_slice(&[1, 2, 3, 4, 5]);
    assert_eq!(u32::deserialize(&mut cur).unwrap(), 0x04030201);
    assert_eq!(Blob::deserialize(&mut cur).unwrap(), Blob(vec![5]));
    assert_eq!(cur.remaining(), 0);
}

// ── Vectors ───────────────────────────────────────────────────────────────────

#[test]
fn boxed_vector_has_header() {
    let bytes = vec![7i64].to_bytes();
    assert_eq!(&bytes[..4], &0x1cb5c415u32.to_le_bytes());
    assert_eq!(Vec::<i64>::from_bytes(&bytes).unwrap(), vec![7]);
}

#[test]
fn negative_vector_length_is_rejected() {
    let mut bytes = 0x1cb5c415u32.to_le_bytes().to_vec();
    bytes.extend((-1i32).to_le_bytes());
    assert_eq!(Vec::<i32>::from_bytes(&bytes), Err(Error::UnexpectedEof));
}

// ── Service objects ───────────────────────────────────────────────────────────

#[test]
fn functions_write_their_constructor() {
    let req = functions::ReqPqMulti { nonce: [9; 16] };
    let bytes = req.to_bytes();
    assert_eq!(&bytes[..4], &0xbe7e8ef1u32.to_le_bytes());
    assert_eq!(bytes.len(), 20);

    let mut cur = Cursor::from_slice(&bytes[4..]);
    assert_eq!(functions::ReqPqMulti::deserialize(&mut cur).unwrap(), req);
}

#[test]
fn boxed_enum_dispatches_on_constructor() {
    let ok = types::DhGenRetry {
        nonce: [1; 16],
        server_nonce: [2; 16],
        new_nonce_hash2: [3; 16],
    };
    let bytes = enums::SetClientDhParamsAnswer::from(ok.clone()).to_bytes();
    assert_eq!(&bytes[..4], &types::DhGenRetry::CONSTRUCTOR_ID.to_le_bytes());
    assert_eq!(
        enums::SetClientDhParamsAnswer::from_bytes(&bytes).unwrap(),
        enums::SetClientDhParamsAnswer::DhGenRetry(ok)
    );

    let pong = types::Pong { msg_id: 1, ping_id: 2 };
    let bytes = enums::Pong::from(pong).to_bytes();
    assert_eq!(
        enums::SetClientDhParamsAnswer::from_bytes(&bytes),
        Err(Error::UnexpectedConstructor { id: types::Pong::CONSTRUCTOR_ID })
    );
}

#[test]
fn container_items_carry_raw_length() {
    let container = types::MsgContainer {
        messages: vec![
            types::Message { msg_id: 4, seqno: 1, body: vec![1, 2, 3, 4] },
            types::Message { msg_id: 8, seqno: 3, body: vec![] },
        ],
    };
    let bytes = container.to_bytes();
    assert_eq!(&bytes[..4], &2i32.to_le_bytes());
    assert_eq!(&bytes[16..20], &4i32.to_le_bytes());
    assert_eq!(types::MsgContainer::from_bytes(&bytes).unwrap(), container);
}

#[test]
fn future_salts_use_bare_vector() {
    let salts = types::FutureSalts {
        req_msg_id: 99,
        now: 1000,
        salts: RawVec(vec![types::FutureSalt { valid_since: 1, valid_until: 2, salt: 3 }]),
    };
    let bytes = salts.to_bytes();
    // req_msg_id, now, count, then one 16-byte bare salt
    assert_eq!(bytes.len(), 8 + 4 + 4 + 16);
    assert_eq!(types::FutureSalts::from_bytes(&bytes).unwrap(), salts);
}

#[test]
fn invoke_after_wraps_opaque_query() {
    let inner = functions::Ping { ping_id: 5 }.to_bytes();
    let wrapped = functions::InvokeAfterMsg { msg_id: 0x100, query: Blob(inner.clone()) }.to_bytes();
    assert_eq!(&wrapped[..4], &functions::INVOKE_AFTER_MSG_ID.to_le_bytes());
    assert_eq!(&wrapped[4..12], &0x100i64.to_le_bytes());
    assert_eq!(&wrapped[12..], inner.as_slice());
}

#[test]
fn names_known_constructors() {
    assert_eq!(gramwire_tl::name_for_id(0xedab447b), Some("bad_server_salt"));
    assert_eq!(gramwire_tl::name_for_id(0xdeadbeef), None);
}
