//! Shared utilities for session and service tests.
#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use mqtt_gateway::config::BrokerConfig;
use mqtt_gateway::protocol::{
    encode_ack, encode_message, Ack, Connect, Message, Publish, Qos, Subscribe, TopicFilter,
    Unsubscribe,
};
use mqtt_gateway::{Handler, HandlerError};

/// A handler call as observed by [`RecordingHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    Subscribe(String),
    Unsubscribe(String),
    Publish(String, Bytes),
}

/// Records every call; refuses or panics according to its rules.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<Call>>,
    reject_connect: bool,
    rejected_topics: Vec<String>,
    panic_on_publish: bool,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_connect(mut self) -> Self {
        self.reject_connect = true;
        self
    }

    /// Subscribe, unsubscribe and publish on `topic` fail.
    pub fn reject_topic(mut self, topic: &str) -> Self {
        self.rejected_topics.push(topic.to_string());
        self
    }

    pub fn panic_on_publish(mut self) -> Self {
        self.panic_on_publish = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_topic(&self, topic: &str) -> Result<(), HandlerError> {
        if self.rejected_topics.iter().any(|t| t == topic) {
            Err(HandlerError::Rejected(topic.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn on_connect(&self, connect: &Connect) -> Result<(), HandlerError> {
        self.record(Call::Connect(connect.client_id.clone()));
        if self.reject_connect {
            return Err(HandlerError::NotAuthorized);
        }
        Ok(())
    }

    async fn on_subscribe(&self, topic: &str) -> Result<(), HandlerError> {
        self.record(Call::Subscribe(topic.to_string()));
        self.check_topic(topic)
    }

    async fn on_unsubscribe(&self, topic: &str) -> Result<(), HandlerError> {
        self.record(Call::Unsubscribe(topic.to_string()));
        self.check_topic(topic)
    }

    async fn on_publish(&self, publish: &Publish) -> Result<(), HandlerError> {
        self.record(Call::Publish(publish.topic.clone(), publish.payload.clone()));
        if self.panic_on_publish {
            panic!("boom on {}", publish.topic);
        }
        self.check_topic(&publish.topic)
    }
}

/// Default config with a local ephemeral bind address.
pub fn test_config() -> BrokerConfig {
    let mut config = BrokerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.shutdown.drain_timeout_secs = 2;
    config
}

pub fn connect(client_id: &str) -> Message {
    Message::Connect(Connect {
        protocol_level: 4,
        client_id: client_id.to_string(),
        keep_alive: 60,
        clean_session: true,
        will: None,
        username: None,
        password: None,
    })
}

pub fn subscribe(message_id: u16, filters: &[(&str, Qos)]) -> Message {
    Message::Subscribe(Subscribe {
        message_id,
        filters: filters
            .iter()
            .map(|(topic, qos)| TopicFilter {
                topic: topic.to_string(),
                qos: *qos,
            })
            .collect(),
    })
}

pub fn unsubscribe(message_id: u16, topics: &[&str]) -> Message {
    Message::Unsubscribe(Unsubscribe {
        message_id,
        topics: topics.iter().map(|t| t.to_string()).collect(),
    })
}

pub fn publish(message_id: u16, topic: &str, qos: Qos, payload: &'static [u8]) -> Message {
    Message::Publish(Publish {
        message_id,
        topic: topic.to_string(),
        payload: Bytes::from_static(payload),
        qos,
        dup: false,
        retain: false,
    })
}

pub fn frame(message: &Message) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_message(message, &mut buf);
    buf.to_vec()
}

pub fn ack_bytes(ack: &Ack) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_ack(ack, &mut buf);
    buf.to_vec()
}

pub async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) {
    writer.write_all(&frame(message)).await.unwrap();
}

/// Read exactly one encoded `ack` worth of bytes and compare.
pub async fn expect_ack<R: AsyncRead + Unpin>(reader: &mut R, ack: &Ack) {
    let expected = ack_bytes(ack);
    let mut actual = vec![0u8; expected.len()];
    reader.read_exact(&mut actual).await.unwrap();
    assert_eq!(actual, expected, "expected {}", ack.kind());
}

/// Assert the peer closed without sending anything further.
pub async fn expect_eof<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf).await.unwrap_or(0);
    assert_eq!(n, 0, "unexpected bytes: {:?}", &buf[..n]);
}
