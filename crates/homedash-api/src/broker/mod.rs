//! Message-broker transport for the debug console.
//!
//! The console talks to the broker through two traits: a
//! [`BrokerConnector`] opens a link and hands back a stream of
//! [`LinkEvent`]s, and the returned [`BrokerLink`] carries operator
//! requests that resolve on broker acknowledgment. [`MqttConnector`] is the
//! production implementation over MQTT-on-WebSocket; tests substitute an
//! in-memory fake.

mod ack;
mod mqtt;
mod tls;

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Error;

pub use mqtt::{MqttConnector, MqttLink};

// ── QoS ──────────────────────────────────────────────────────────────

/// Delivery guarantee for a subscription or publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("invalid QoS level {other} (expected 0, 1 or 2)")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl FromStr for QoS {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid QoS level '{s}' (expected 0, 1 or 2)"))?;
        Self::try_from(level)
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

// ── ProtocolVersion ──────────────────────────────────────────────────

/// MQTT protocol level. Serialized as the wire level (4 or 5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolVersion {
    /// MQTT 3.1.1
    #[default]
    V311,
    V5,
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            4 => Ok(Self::V311),
            5 => Ok(Self::V5),
            other => Err(format!("unsupported protocol version {other} (expected 4 or 5)")),
        }
    }
}

impl From<ProtocolVersion> for u8 {
    fn from(version: ProtocolVersion) -> Self {
        match version {
            ProtocolVersion::V311 => 4,
            ProtocolVersion::V5 => 5,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V311 => f.write_str("3.1.1"),
            Self::V5 => f.write_str("5"),
        }
    }
}

// ── LinkOptions ──────────────────────────────────────────────────────

/// Fully resolved parameters for one broker link.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// `ws://` or `wss://` endpoint, including path (e.g. `/mqtt`).
    pub url: String,
    /// Blank means "generate one".
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub protocol: ProtocolVersion,
    /// Only consulted for `wss://`.
    pub verify_tls: bool,
    /// MQTT 5 session expiry interval, in seconds.
    pub session_expiry: Option<u32>,
}

// ── LinkEvent ────────────────────────────────────────────────────────

/// Asynchronous notifications from an open link.
///
/// `Closed` is always the last event; nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake completed.
    Connected,
    /// Inbound application message.
    Message { topic: String, payload: Bytes },
    /// Transport or protocol failure. Followed by `Closed`.
    Error(String),
    Closed,
}

// ── Traits ───────────────────────────────────────────────────────────

/// A live (or still connecting) broker link.
///
/// Request futures resolve when the broker acknowledges (SUBACK, UNSUBACK,
/// PUBACK/PUBCOMP; QoS 0 publishes once written) and fail with
/// [`Error::BrokerClosed`] if the link goes away first.
pub trait BrokerLink: Send + Sync + 'static {
    fn subscribe(&self, topic: &str, qos: QoS) -> impl Future<Output = Result<(), Error>> + Send;

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), Error>> + Send;

    fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Tear the transport down immediately, without a graceful goodbye.
    fn force_close(&self);
}

/// Opens broker links.
pub trait BrokerConnector: Send + Sync + 'static {
    type Link: BrokerLink;

    /// Start connecting. Returns as soon as the attempt is underway; the
    /// outcome arrives as `Connected` or `Error` on the event receiver.
    fn open(
        &self,
        options: LinkOptions,
    ) -> Result<(Self::Link, mpsc::UnboundedReceiver<LinkEvent>), Error>;
}
