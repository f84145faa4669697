//! Message and acknowledgement types.

use bytes::Bytes;

/// Delivery guarantee requested for a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Qos::AtMostOnce),
            1 => Some(Qos::AtLeastOnce),
            2 => Some(Qos::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// Last-will message registered on CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

/// Credentials and session options presented on CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub protocol_level: u8,
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub topic: String,
    pub qos: Qos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub message_id: u16,
    pub filters: Vec<TopicFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub message_id: u16,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    /// Zero for QoS 0, which carries no identifier on the wire.
    pub message_id: u16,
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub dup: bool,
    pub retain: bool,
}

/// A decoded client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Connect(Connect),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    Publish(Publish),
    PingRequest,
    Disconnect,
}

impl Message {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Connect(_) => "connect",
            Message::Subscribe(_) => "subscribe",
            Message::Unsubscribe(_) => "unsubscribe",
            Message::Publish(_) => "publish",
            Message::PingRequest => "pingreq",
            Message::Disconnect => "disconnect",
        }
    }
}

/// CONNACK return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    NotAuthorized,
}

impl ConnectReturnCode {
    pub fn as_u8(self) -> u8 {
        match self {
            ConnectReturnCode::Accepted => 0x00,
            ConnectReturnCode::NotAuthorized => 0x05,
        }
    }
}

/// Per-filter result carried by a SUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubackCode {
    Granted(Qos),
    Failure,
}

impl SubackCode {
    pub const FAILURE: u8 = 0x80;

    pub fn as_u8(self) -> u8 {
        match self {
            SubackCode::Granted(qos) => qos.as_u8(),
            SubackCode::Failure => Self::FAILURE,
        }
    }
}

/// A server acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Connack { code: ConnectReturnCode },
    Suback { message_id: u16, codes: Vec<SubackCode> },
    Unsuback { message_id: u16 },
    Puback { message_id: u16 },
    Pingresp,
}

impl Ack {
    pub fn kind(&self) -> &'static str {
        match self {
            Ack::Connack { .. } => "connack",
            Ack::Suback { .. } => "suback",
            Ack::Unsuback { .. } => "unsuback",
            Ack::Puback { .. } => "puback",
            Ack::Pingresp => "pingresp",
        }
    }
}
