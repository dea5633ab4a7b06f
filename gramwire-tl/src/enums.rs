//! Boxed types: each enum reads its constructor id and dispatches.

use crate::types;

tl_enum! {
    ResPq { ResPq(types::ResPq) }
}

tl_enum! {
    PQInnerData { PQInnerData(types::PQInnerData) }
}

tl_enum! {
    ServerDhParams {
        Fail(types::ServerDhParamsFail),
        Ok(types::ServerDhParamsOk),
    }
}

tl_enum! {
    ServerDhInnerData { ServerDhInnerData(types::ServerDhInnerData) }
}

tl_enum! {
    ClientDhInnerData { ClientDhInnerData(types::ClientDhInnerData) }
}

tl_enum! {
    SetClientDhParamsAnswer {
        DhGenOk(types::DhGenOk),
        DhGenRetry(types::DhGenRetry),
        DhGenFail(types::DhGenFail),
    }
}

tl_enum! {
    RpcError { RpcError(types::RpcError) }
}

tl_enum! {
    Pong { Pong(types::Pong) }
}

tl_enum! {
    BadMsgNotification {
        BadMsgNotification(types::BadMsgNotification),
        BadServerSalt(types::BadServerSalt),
    }
}

tl_enum! {
    MsgDetailedInfo {
        MsgDetailedInfo(types::MsgDetailedInfo),
        MsgNewDetailedInfo(types::MsgNewDetailedInfo),
    }
}

tl_enum! {
    NewSession { NewSessionCreated(types::NewSessionCreated) }
}

tl_enum! {
    MsgsAck { MsgsAck(types::MsgsAck) }
}

tl_enum! {
    FutureSalts { FutureSalts(types::FutureSalts) }
}

tl_enum! {
    MsgsStateReq { MsgsStateReq(types::MsgsStateReq) }
}

tl_enum! {
    MsgsStateInfo { MsgsStateInfo(types::MsgsStateInfo) }
}

tl_enum! {
    MsgsAllInfo { MsgsAllInfo(types::MsgsAllInfo) }
}

tl_enum! {
    MsgResendReq { MsgResendReq(types::MsgResendReq) }
}
