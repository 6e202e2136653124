// MQTT over WebSocket, via rumqttc.
//
// `open` builds the client and spawns a driver task that owns the event
// loop. The driver forwards connection milestones and inbound messages as
// `LinkEvent`s and feeds packet-level acks into the shared `AckTracker`.
// There is no automatic reconnect: the first transport error ends the link.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS as QoSV5;
use rumqttc::v5::mqttbytes::v5::{Packet as PacketV5, SubscribeReasonCode as ReasonV5};
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode, TlsConfiguration, Transport};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::ack::{AckKind, AckResult, AckTracker};
use super::{BrokerConnector, BrokerLink, LinkEvent, LinkOptions, ProtocolVersion, QoS, tls};
use crate::error::Error;

/// Request channel depth between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;

// ── MqttConnector ────────────────────────────────────────────────────

/// Opens MQTT links over `ws://` / `wss://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

impl BrokerConnector for MqttConnector {
    type Link = MqttLink;

    fn open(
        &self,
        options: LinkOptions,
    ) -> Result<(MqttLink, mpsc::UnboundedReceiver<LinkEvent>), Error> {
        let transport = transport_for(&options)?;
        let port = endpoint_port(&options.url)?;
        let client_id = resolve_client_id(&options.client_id);

        info!(
            url = %options.url,
            client_id,
            protocol = %options.protocol,
            "opening broker link"
        );

        let (client, session) = match options.protocol {
            ProtocolVersion::V311 => {
                let mut opts = rumqttc::MqttOptions::new(&client_id, &options.url, port);
                opts.set_transport(transport)
                    .set_keep_alive(options.keep_alive)
                    .set_clean_session(options.clean_session);
                if let Some(username) = &options.username {
                    opts.set_credentials(username, password_of(&options));
                }
                let (client, eventloop) = rumqttc::AsyncClient::new(opts, REQUEST_CAPACITY);
                (Client::V4(client), EventSession::V4(eventloop))
            }
            ProtocolVersion::V5 => {
                let mut opts = rumqttc::v5::MqttOptions::new(&client_id, &options.url, port);
                opts.set_transport(transport)
                    .set_keep_alive(options.keep_alive)
                    .set_clean_start(options.clean_session)
                    .set_session_expiry_interval(options.session_expiry);
                if let Some(username) = &options.username {
                    opts.set_credentials(username, password_of(&options));
                }
                let (client, eventloop) = rumqttc::v5::AsyncClient::new(opts, REQUEST_CAPACITY);
                (Client::V5(client), EventSession::V5(eventloop))
            }
        };

        let acks = Arc::new(Mutex::new(AckTracker::default()));
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(drive(session, Arc::clone(&acks), events_tx, cancel.clone()));

        Ok((
            MqttLink {
                client,
                acks,
                cancel,
            },
            events_rx,
        ))
    }
}

// ── MqttLink ─────────────────────────────────────────────────────────

/// Handle to one MQTT link. Dropping it closes the transport.
pub struct MqttLink {
    client: Client,
    acks: Arc<Mutex<AckTracker>>,
    cancel: CancellationToken,
}

impl MqttLink {
    /// Register the ack waiter and hand the request to the client under one
    /// lock, so tracker order always matches wire order.
    fn request(
        &self,
        kind: AckKind,
        qos: QoS,
        send: impl FnOnce(&Client) -> Result<(), String>,
    ) -> Result<tokio::sync::oneshot::Receiver<AckResult>, Error> {
        let mut acks = self.acks.lock().expect("ack tracker lock poisoned");
        if acks.is_closed() {
            return Err(Error::BrokerClosed);
        }
        let rx = acks.expect(kind, qos);
        if let Err(e) = send(&self.client) {
            acks.abandon_last();
            return Err(Error::BrokerRequest(e));
        }
        Ok(rx)
    }
}

impl BrokerLink for MqttLink {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), Error> {
        let rx = self.request(AckKind::Subscribe, qos, |c| c.subscribe(topic, qos))?;
        rx.await.unwrap_or(Err(Error::BrokerClosed))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), Error> {
        let rx = self.request(AckKind::Unsubscribe, QoS::AtMostOnce, |c| c.unsubscribe(topic))?;
        rx.await.unwrap_or(Err(Error::BrokerClosed))
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<(), Error> {
        let rx = self.request(AckKind::Publish, qos, |c| {
            c.publish(topic, payload, qos, retain)
        })?;
        rx.await.unwrap_or(Err(Error::BrokerClosed))
    }

    fn force_close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Protocol-specific client / event loop ────────────────────────────

enum Client {
    V4(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

impl Client {
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), String> {
        match self {
            Self::V4(c) => c.try_subscribe(topic, qos_v4(qos)).map_err(|e| e.to_string()),
            Self::V5(c) => c.try_subscribe(topic, qos_v5(qos)).map_err(|e| e.to_string()),
        }
    }

    fn unsubscribe(&self, topic: &str) -> Result<(), String> {
        match self {
            Self::V4(c) => c.try_unsubscribe(topic).map_err(|e| e.to_string()),
            Self::V5(c) => c.try_unsubscribe(topic).map_err(|e| e.to_string()),
        }
    }

    fn publish(&self, topic: &str, payload: Bytes, qos: QoS, retain: bool) -> Result<(), String> {
        match self {
            Self::V4(c) => c
                .try_publish(topic, qos_v4(qos), retain, payload)
                .map_err(|e| e.to_string()),
            Self::V5(c) => c
                .try_publish(topic, qos_v5(qos), retain, payload)
                .map_err(|e| e.to_string()),
        }
    }
}

enum EventSession {
    V4(rumqttc::EventLoop),
    V5(rumqttc::v5::EventLoop),
}

impl EventSession {
    async fn poll(&mut self) -> Result<Wire, String> {
        match self {
            Self::V4(el) => el.poll().await.map(wire_v4).map_err(|e| e.to_string()),
            Self::V5(el) => el.poll().await.map(wire_v5).map_err(|e| e.to_string()),
        }
    }
}

/// Protocol-neutral view of one event-loop step.
enum Wire {
    ConnAck,
    Message { topic: String, payload: Bytes },
    Sent(AckKind, u16),
    Acked(AckKind, u16, AckResult),
    Disconnect,
    Other,
}

fn wire_v4(event: Event) -> Wire {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => Wire::ConnAck,
        Event::Incoming(Packet::Publish(p)) => Wire::Message {
            topic: p.topic,
            payload: p.payload,
        },
        Event::Incoming(Packet::SubAck(ack)) => {
            let rejected: Vec<String> = ack
                .return_codes
                .iter()
                .filter(|code| !matches!(code, SubscribeReasonCode::Success(_)))
                .map(|code| format!("{code:?}"))
                .collect();
            Wire::Acked(AckKind::Subscribe, ack.pkid, suback_result(&rejected))
        }
        Event::Incoming(Packet::UnsubAck(ack)) => Wire::Acked(AckKind::Unsubscribe, ack.pkid, Ok(())),
        Event::Incoming(Packet::PubAck(ack)) => Wire::Acked(AckKind::Publish, ack.pkid, Ok(())),
        Event::Incoming(Packet::PubComp(ack)) => Wire::Acked(AckKind::Publish, ack.pkid, Ok(())),
        Event::Incoming(Packet::Disconnect) => Wire::Disconnect,
        Event::Incoming(_) => Wire::Other,
        Event::Outgoing(out) => wire_outgoing(out),
    }
}

fn wire_v5(event: rumqttc::v5::Event) -> Wire {
    use rumqttc::v5::Event as EventV5;

    match event {
        EventV5::Incoming(PacketV5::ConnAck(_)) => Wire::ConnAck,
        EventV5::Incoming(PacketV5::Publish(p)) => Wire::Message {
            topic: String::from_utf8_lossy(&p.topic).into_owned(),
            payload: p.payload,
        },
        EventV5::Incoming(PacketV5::SubAck(ack)) => {
            let rejected: Vec<String> = ack
                .return_codes
                .iter()
                .filter(|code| !matches!(code, ReasonV5::Success(_)))
                .map(|code| format!("{code:?}"))
                .collect();
            Wire::Acked(AckKind::Subscribe, ack.pkid, suback_result(&rejected))
        }
        EventV5::Incoming(PacketV5::UnsubAck(ack)) => {
            Wire::Acked(AckKind::Unsubscribe, ack.pkid, Ok(()))
        }
        EventV5::Incoming(PacketV5::PubAck(ack)) => Wire::Acked(AckKind::Publish, ack.pkid, Ok(())),
        EventV5::Incoming(PacketV5::PubComp(ack)) => {
            Wire::Acked(AckKind::Publish, ack.pkid, Ok(()))
        }
        EventV5::Incoming(PacketV5::Disconnect(_)) => Wire::Disconnect,
        EventV5::Incoming(_) => Wire::Other,
        EventV5::Outgoing(out) => wire_outgoing(out),
    }
}

fn wire_outgoing(out: Outgoing) -> Wire {
    match out {
        Outgoing::Subscribe(pkid) => Wire::Sent(AckKind::Subscribe, pkid),
        Outgoing::Unsubscribe(pkid) => Wire::Sent(AckKind::Unsubscribe, pkid),
        Outgoing::Publish(pkid) => Wire::Sent(AckKind::Publish, pkid),
        _ => Wire::Other,
    }
}

fn suback_result(rejected: &[String]) -> AckResult {
    if rejected.is_empty() {
        Ok(())
    } else {
        Err(Error::BrokerRequest(format!(
            "subscription rejected: {}",
            rejected.join(", ")
        )))
    }
}

// ── Driver task ──────────────────────────────────────────────────────

/// Poll the event loop until the link closes, locally or remotely.
async fn drive(
    mut session: EventSession,
    acks: Arc<Mutex<AckTracker>>,
    events: mpsc::UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
) {
    loop {
        let step = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("broker link closed locally");
                break;
            }
            step = session.poll() => step,
        };

        match step {
            Ok(Wire::ConnAck) => {
                info!("broker link connected");
                let _ = events.send(LinkEvent::Connected);
            }
            Ok(Wire::Message { topic, payload }) => {
                let _ = events.send(LinkEvent::Message { topic, payload });
            }
            Ok(Wire::Sent(kind, pkid)) => {
                acks.lock().expect("ack tracker lock poisoned").sent(kind, pkid);
            }
            Ok(Wire::Acked(kind, pkid, result)) => {
                acks.lock()
                    .expect("ack tracker lock poisoned")
                    .acked(kind, pkid, result);
            }
            Ok(Wire::Disconnect) => {
                info!("broker closed the link");
                break;
            }
            Ok(Wire::Other) => {}
            Err(e) => {
                warn!(error = %e, "broker link failed");
                let _ = events.send(LinkEvent::Error(e));
                break;
            }
        }
    }

    acks.lock().expect("ack tracker lock poisoned").fail_all();
    let _ = events.send(LinkEvent::Closed);
}

// ── Option helpers ───────────────────────────────────────────────────

fn transport_for(options: &LinkOptions) -> Result<Transport, Error> {
    let url = Url::parse(&options.url)
        .map_err(|e| Error::BrokerConnect(format!("invalid broker URL '{}': {e}", options.url)))?;
    match url.scheme() {
        "ws" => Ok(Transport::Ws),
        "wss" if options.verify_tls => Ok(Transport::wss_with_default_config()),
        "wss" => {
            warn!("broker TLS certificate verification disabled");
            Ok(Transport::Wss(TlsConfiguration::Rustls(
                tls::insecure_client_config(),
            )))
        }
        other => Err(Error::BrokerConnect(format!(
            "unsupported broker scheme '{other}' (expected ws or wss)"
        ))),
    }
}

fn endpoint_port(url: &str) -> Result<u16, Error> {
    let url =
        Url::parse(url).map_err(|e| Error::BrokerConnect(format!("invalid broker URL: {e}")))?;
    url.port_or_known_default()
        .ok_or_else(|| Error::BrokerConnect(format!("broker URL has no port: {url}")))
}

/// Blank ids get a random `homedash_xxxxxxxx`.
pub(crate) fn resolve_client_id(client_id: &str) -> String {
    let trimmed = client_id.trim();
    if trimmed.is_empty() {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("homedash_{}", &suffix[..8])
    } else {
        trimmed.to_owned()
    }
}

fn password_of(options: &LinkOptions) -> String {
    options
        .password
        .as_ref()
        .map(|p| p.expose_secret().to_owned())
        .unwrap_or_default()
}

fn qos_v4(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn qos_v5(qos: QoS) -> QoSV5 {
    match qos {
        QoS::AtMostOnce => QoSV5::AtMostOnce,
        QoS::AtLeastOnce => QoSV5::AtLeastOnce,
        QoS::ExactlyOnce => QoSV5::ExactlyOnce,
    }
}
