//! MQTT wire protocol.
//!
//! # Data Flow
//! ```text
//! transport bytes
//!     → codec.rs (read_message: one frame, size-limited)
//!     → packet.rs (Message enum handed to the session)
//!
//! Ack enum
//!     → codec.rs (encode_ack / write_ack)
//!     → transport bytes
//! ```
//!
//! Only the client-to-server kinds the gateway dispatches are decoded;
//! anything else is a decode error and ends the connection.

pub mod codec;
pub mod packet;

pub use codec::{encode_ack, encode_message, read_message, write_ack, DecodeError};
pub use packet::{
    Ack, Connect, ConnectReturnCode, Message, Publish, Qos, SubackCode, Subscribe, TopicFilter,
    Unsubscribe, Will,
};
