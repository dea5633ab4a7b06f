//! Auth key generation over a freshly opened connection.

use gramwire_mtproto::authentication::{self, Finished, ServerKeys};
use gramwire_mtproto::{MtProtoState, PlainMessage};
use gramwire_tl::{RemoteCall, Serializable};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::errors::InvocationError;

// Unencrypted request/response exchange used before a key exists.
struct PlainSender<'a, C> {
    conn:  &'a C,
    state: MtProtoState,
}

impl<'a, C: Connection> PlainSender<'a, C> {
    fn new(conn: &'a C) -> Self {
        Self { conn, state: MtProtoState::new(None, false) }
    }

    async fn invoke<R: RemoteCall>(&mut self, request: &R) -> Result<R::Return, InvocationError> {
        let msg_id = self.state.get_new_msg_id();
        let frame = PlainMessage { msg_id, body: request.to_bytes() }.to_bytes();
        self.conn.send(&frame).await?;

        let response = self.conn.recv().await?;
        let message = PlainMessage::from_bytes(&response)?;
        Ok(authentication::parse_response::<R::Return>(&message.body)?)
    }
}

/// Run the three-step key exchange.
///
/// The connection must already be open; nothing else may use it until this
/// returns.
pub async fn do_authentication<C: Connection>(
    conn: &C,
    keys: &ServerKeys,
) -> Result<Finished, InvocationError> {
    let mut plain = PlainSender::new(conn);

    let (request, data) = authentication::step1()?;
    debug!("[gramwire] auth key step 1: req_pq_multi");
    let res_pq = plain.invoke(&request).await?;

    let (request, data) = authentication::step2(data, res_pq, keys)?;
    debug!("[gramwire] auth key step 2: req_DH_params");
    let dh_params = plain.invoke(&request).await?;

    let (request, data) = authentication::step3(data, dh_params)?;
    debug!("[gramwire] auth key step 3: set_client_DH_params");
    let answer = plain.invoke(&request).await?;

    let finished = authentication::finish(data, answer)?;
    info!("[gramwire] auth key generated (time offset {}s)", finished.time_offset);
    Ok(finished)
}
