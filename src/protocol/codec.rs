//! MQTT 3.1.1 frame codec.
//!
//! Decoding reads exactly one frame from an async byte stream and refuses
//! frames whose remaining length exceeds the caller's limit before any body
//! bytes are buffered. Encoding writes into a `BytesMut`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::packet::{
    Ack, Connect, Message, Publish, Qos, Subscribe, TopicFilter, Unsubscribe, Will,
};

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const SUBSCRIBE: u8 = 8;
const UNSUBSCRIBE: u8 = 10;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

/// Errors raised while decoding a frame. All of them end the connection.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("transport read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed remaining length")]
    MalformedLength,
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("unsupported packet type {0}")]
    UnsupportedType(u8),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
}

/// Read one message from the stream, refusing frames larger than `max_size`.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> Result<Message, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    match reader.read_exact(&mut first).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(DecodeError::ConnectionClosed)
        }
        Err(err) => return Err(err.into()),
    }
    let packet_type = first[0] >> 4;
    let flags = first[0] & 0x0F;

    let size = read_remaining_length(reader).await?;
    if size > max_size {
        return Err(DecodeError::TooLarge {
            size,
            max: max_size,
        });
    }

    let mut body = BytesMut::zeroed(size);
    reader.read_exact(&mut body).await?;
    decode_body(packet_type, flags, body.freeze())
}

async fn read_remaining_length<R>(reader: &mut R) -> Result<usize, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut value = 0usize;
    for shift in [0u32, 7, 14, 21] {
        let byte = reader.read_u8().await?;
        value |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(DecodeError::MalformedLength)
}

fn decode_body(packet_type: u8, flags: u8, mut body: Bytes) -> Result<Message, DecodeError> {
    match packet_type {
        CONNECT => decode_connect(&mut body).map(Message::Connect),
        PUBLISH => decode_publish(flags, &mut body).map(Message::Publish),
        SUBSCRIBE => decode_subscribe(&mut body).map(Message::Subscribe),
        UNSUBSCRIBE => decode_unsubscribe(&mut body).map(Message::Unsubscribe),
        PINGREQ => Ok(Message::PingRequest),
        DISCONNECT => Ok(Message::Disconnect),
        other => Err(DecodeError::UnsupportedType(other)),
    }
}

fn decode_connect(body: &mut Bytes) -> Result<Connect, DecodeError> {
    let protocol_name = take_string(body)?;
    let protocol_level = take_u8(body)?;
    match (protocol_name.as_str(), protocol_level) {
        ("MQTT", 4) | ("MQIsdp", 3) => {}
        _ => return Err(DecodeError::Malformed("unsupported protocol name or level")),
    }

    let flags = take_u8(body)?;
    if flags & 0x01 != 0 {
        return Err(DecodeError::Malformed("reserved connect flag set"));
    }
    let keep_alive = take_u16(body)?;
    let client_id = take_string(body)?;

    let will = if flags & 0x04 != 0 {
        let topic = take_string(body)?;
        let payload = take_bytes(body)?;
        let qos = Qos::from_u8((flags >> 3) & 0x03)
            .ok_or(DecodeError::Malformed("invalid will QoS"))?;
        Some(Will {
            topic,
            payload,
            qos,
            retain: flags & 0x20 != 0,
        })
    } else {
        None
    };
    let username = if flags & 0x80 != 0 {
        Some(take_string(body)?)
    } else {
        None
    };
    let password = if flags & 0x40 != 0 {
        Some(take_bytes(body)?)
    } else {
        None
    };

    Ok(Connect {
        protocol_level,
        client_id,
        keep_alive,
        clean_session: flags & 0x02 != 0,
        will,
        username,
        password,
    })
}

fn decode_publish(flags: u8, body: &mut Bytes) -> Result<Publish, DecodeError> {
    let qos = Qos::from_u8((flags >> 1) & 0x03).ok_or(DecodeError::Malformed("invalid QoS"))?;
    let topic = take_string(body)?;
    let message_id = if qos == Qos::AtMostOnce {
        0
    } else {
        take_u16(body)?
    };
    Ok(Publish {
        message_id,
        topic,
        payload: body.split_off(0),
        qos,
        dup: flags & 0x08 != 0,
        retain: flags & 0x01 != 0,
    })
}

fn decode_subscribe(body: &mut Bytes) -> Result<Subscribe, DecodeError> {
    let message_id = take_u16(body)?;
    let mut filters = Vec::new();
    while body.has_remaining() {
        let topic = take_string(body)?;
        let qos = Qos::from_u8(take_u8(body)?)
            .ok_or(DecodeError::Malformed("invalid requested QoS"))?;
        filters.push(TopicFilter { topic, qos });
    }
    if filters.is_empty() {
        return Err(DecodeError::Malformed("subscribe without topic filters"));
    }
    Ok(Subscribe {
        message_id,
        filters,
    })
}

fn decode_unsubscribe(body: &mut Bytes) -> Result<Unsubscribe, DecodeError> {
    let message_id = take_u16(body)?;
    let mut topics = Vec::new();
    while body.has_remaining() {
        topics.push(take_string(body)?);
    }
    if topics.is_empty() {
        return Err(DecodeError::Malformed("unsubscribe without topics"));
    }
    Ok(Unsubscribe { message_id, topics })
}

fn take_u8(body: &mut Bytes) -> Result<u8, DecodeError> {
    if body.remaining() < 1 {
        return Err(DecodeError::Malformed("truncated packet"));
    }
    Ok(body.get_u8())
}

fn take_u16(body: &mut Bytes) -> Result<u16, DecodeError> {
    if body.remaining() < 2 {
        return Err(DecodeError::Malformed("truncated packet"));
    }
    Ok(body.get_u16())
}

fn take_bytes(body: &mut Bytes) -> Result<Bytes, DecodeError> {
    let len = take_u16(body)? as usize;
    if body.remaining() < len {
        return Err(DecodeError::Malformed("truncated packet"));
    }
    Ok(body.split_to(len))
}

fn take_string(body: &mut Bytes) -> Result<String, DecodeError> {
    let raw = take_bytes(body)?;
    String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}

/// Append the MQTT variable-length encoding of `len`.
pub fn encode_remaining_length(mut len: usize, buf: &mut BytesMut) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Encode a server acknowledgement.
pub fn encode_ack(ack: &Ack, buf: &mut BytesMut) {
    match ack {
        Ack::Connack { code } => {
            // Session-present is always 0: the gateway keeps no session state.
            buf.put_slice(&[0x20, 0x02, 0x00, code.as_u8()]);
        }
        Ack::Suback { message_id, codes } => {
            buf.put_u8(0x90);
            encode_remaining_length(2 + codes.len(), buf);
            buf.put_u16(*message_id);
            for code in codes {
                buf.put_u8(code.as_u8());
            }
        }
        Ack::Unsuback { message_id } => {
            buf.put_slice(&[0xB0, 0x02]);
            buf.put_u16(*message_id);
        }
        Ack::Puback { message_id } => {
            buf.put_slice(&[0x40, 0x02]);
            buf.put_u16(*message_id);
        }
        Ack::Pingresp => buf.put_slice(&[0xD0, 0x00]),
    }
}

/// Encode and write one acknowledgement, flushing the writer.
pub async fn write_ack<W>(writer: &mut W, ack: &Ack) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(8);
    encode_ack(ack, &mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await
}

/// Encode a client message. Used by clients and test harnesses.
pub fn encode_message(message: &Message, buf: &mut BytesMut) {
    let mut body = BytesMut::new();
    let header = match message {
        Message::Connect(connect) => {
            put_str(&mut body, if connect.protocol_level == 3 { "MQIsdp" } else { "MQTT" });
            body.put_u8(connect.protocol_level);
            let mut flags = 0u8;
            if connect.clean_session {
                flags |= 0x02;
            }
            if let Some(will) = &connect.will {
                flags |= 0x04 | (will.qos.as_u8() << 3);
                if will.retain {
                    flags |= 0x20;
                }
            }
            if connect.password.is_some() {
                flags |= 0x40;
            }
            if connect.username.is_some() {
                flags |= 0x80;
            }
            body.put_u8(flags);
            body.put_u16(connect.keep_alive);
            put_str(&mut body, &connect.client_id);
            if let Some(will) = &connect.will {
                put_str(&mut body, &will.topic);
                put_bytes(&mut body, &will.payload);
            }
            if let Some(username) = &connect.username {
                put_str(&mut body, username);
            }
            if let Some(password) = &connect.password {
                put_bytes(&mut body, password);
            }
            CONNECT << 4
        }
        Message::Subscribe(subscribe) => {
            body.put_u16(subscribe.message_id);
            for filter in &subscribe.filters {
                put_str(&mut body, &filter.topic);
                body.put_u8(filter.qos.as_u8());
            }
            (SUBSCRIBE << 4) | 0x02
        }
        Message::Unsubscribe(unsubscribe) => {
            body.put_u16(unsubscribe.message_id);
            for topic in &unsubscribe.topics {
                put_str(&mut body, topic);
            }
            (UNSUBSCRIBE << 4) | 0x02
        }
        Message::Publish(publish) => {
            put_str(&mut body, &publish.topic);
            if publish.qos != Qos::AtMostOnce {
                body.put_u16(publish.message_id);
            }
            body.put_slice(&publish.payload);
            let mut header = (PUBLISH << 4) | (publish.qos.as_u8() << 1);
            if publish.dup {
                header |= 0x08;
            }
            if publish.retain {
                header |= 0x01;
            }
            header
        }
        Message::PingRequest => PINGREQ << 4,
        Message::Disconnect => DISCONNECT << 4,
    };
    buf.put_u8(header);
    encode_remaining_length(body.len(), buf);
    buf.put_slice(&body);
}

fn put_str(buf: &mut BytesMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packet::{ConnectReturnCode, SubackCode};

    async fn decode(bytes: &[u8], max: usize) -> Result<Message, DecodeError> {
        let mut reader = bytes;
        read_message(&mut reader, max).await
    }

    #[tokio::test]
    async fn decodes_connect_with_credentials() {
        let frame = [
            0x10, 0x1A, // CONNECT, remaining 26
            0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, // protocol
            0xC2, // username + password + clean session
            0x00, 0x3C, // keep alive 60
            0x00, 0x02, b'c', b'1', // client id
            0x00, 0x04, b'u', b's', b'e', b'r', // username
            0x00, 0x04, b'p', b'a', b's', b's', // password
        ];
        let message = decode(&frame, 65536).await.unwrap();
        let Message::Connect(connect) = message else {
            panic!("expected connect, got {message:?}");
        };
        assert_eq!(connect.client_id, "c1");
        assert_eq!(connect.keep_alive, 60);
        assert!(connect.clean_session);
        assert_eq!(connect.username.as_deref(), Some("user"));
        assert_eq!(connect.password.as_deref(), Some(&b"pass"[..]));
        assert!(connect.will.is_none());
    }

    #[tokio::test]
    async fn decodes_subscribe_filters_in_order() {
        let frame = [
            0x82, 0x0E, 0x00, 0x07, // message id 7
            0x00, 0x03, b'a', b'/', b'b', 0x01, // a/b qos1
            0x00, 0x03, b'c', b'/', b'#', 0x02, // c/# qos2
        ];
        let message = decode(&frame, 65536).await.unwrap();
        assert_eq!(
            message,
            Message::Subscribe(Subscribe {
                message_id: 7,
                filters: vec![
                    TopicFilter { topic: "a/b".into(), qos: Qos::AtLeastOnce },
                    TopicFilter { topic: "c/#".into(), qos: Qos::ExactlyOnce },
                ],
            })
        );
    }

    #[tokio::test]
    async fn qos0_publish_has_no_message_id() {
        let frame = [0x30, 0x05, 0x00, 0x01, b't', b'h', b'i'];
        let Message::Publish(publish) = decode(&frame, 65536).await.unwrap() else {
            panic!("expected publish");
        };
        assert_eq!(publish.qos, Qos::AtMostOnce);
        assert_eq!(publish.message_id, 0);
        assert_eq!(publish.topic, "t");
        assert_eq!(&publish.payload[..], b"hi");
    }

    #[tokio::test]
    async fn qos1_publish_carries_message_id() {
        let frame = [0x32, 0x06, 0x00, 0x01, b't', 0x12, 0x34, b'x'];
        let Message::Publish(publish) = decode(&frame, 65536).await.unwrap() else {
            panic!("expected publish");
        };
        assert_eq!(publish.qos, Qos::AtLeastOnce);
        assert_eq!(publish.message_id, 0x1234);
        assert_eq!(&publish.payload[..], b"x");
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected_before_body() {
        // Remaining length 200 declared; only the header is present.
        let frame = [0x30, 0xC8, 0x01];
        let err = decode(&frame, 100).await.unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { size: 200, max: 100 }));
    }

    #[tokio::test]
    async fn five_byte_length_is_malformed() {
        let frame = [0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let err = decode(&frame, usize::MAX).await.unwrap_err();
        assert!(matches!(err, DecodeError::MalformedLength));
    }

    #[tokio::test]
    async fn empty_stream_is_connection_closed() {
        let err = decode(&[], 65536).await.unwrap_err();
        assert!(matches!(err, DecodeError::ConnectionClosed));
    }

    #[tokio::test]
    async fn truncated_body_is_io_error() {
        let err = decode(&[0xC0, 0x02, 0x00], 65536).await.unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[tokio::test]
    async fn server_bound_types_are_unsupported() {
        // PUBACK from a client has no meaning for this gateway.
        let err = decode(&[0x40, 0x02, 0x00, 0x01], 65536).await.unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedType(4)));
    }

    #[tokio::test]
    async fn invalid_publish_qos_is_malformed() {
        let err = decode(&[0x36, 0x03, 0x00, 0x01, b't'], 65536).await.unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[tokio::test]
    async fn subscribe_without_filters_is_malformed() {
        let err = decode(&[0x82, 0x02, 0x00, 0x01], 65536).await.unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[tokio::test]
    async fn unknown_protocol_name_is_malformed() {
        let frame = [0x10, 0x0C, 0x00, 0x04, b'H', b'T', b'T', b'P', 0x04, 0x02, 0x00, 0x00, 0x00, 0x00];
        let err = decode(&frame, 65536).await.unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn encodes_acks() {
        let cases = [
            (Ack::Connack { code: ConnectReturnCode::NotAuthorized }, vec![0x20, 0x02, 0x00, 0x05]),
            (Ack::Unsuback { message_id: 9 }, vec![0xB0, 0x02, 0x00, 0x09]),
            (Ack::Puback { message_id: 0x0102 }, vec![0x40, 0x02, 0x01, 0x02]),
            (Ack::Pingresp, vec![0xD0, 0x00]),
            (
                Ack::Suback {
                    message_id: 3,
                    codes: vec![
                        SubackCode::Granted(Qos::AtMostOnce),
                        SubackCode::Failure,
                        SubackCode::Granted(Qos::ExactlyOnce),
                    ],
                },
                vec![0x90, 0x05, 0x00, 0x03, 0x00, 0x80, 0x02],
            ),
        ];
        for (ack, expected) in cases {
            let mut buf = BytesMut::new();
            encode_ack(&ack, &mut buf);
            assert_eq!(&buf[..], &expected[..], "{}", ack.kind());
        }
    }

    #[test]
    fn remaining_length_uses_continuation_bytes() {
        let mut buf = BytesMut::new();
        encode_remaining_length(321, &mut buf);
        assert_eq!(&buf[..], &[0xC1, 0x02]);
    }
}
