// Acknowledgment correlation for broker requests.
//
// Requests are handed to the client in order and written to the wire in
// the same order. Each request is first queued (no packet id yet); when
// the event loop reports the outgoing packet, the oldest queued request of
// that kind is bound to its packet id. The matching ack then resolves it.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tracing::trace;

use super::QoS;
use crate::error::Error;

pub(super) type AckResult = Result<(), Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum AckKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

struct Queued {
    kind: AckKind,
    qos: QoS,
    tx: oneshot::Sender<AckResult>,
}

#[derive(Default)]
pub(super) struct AckTracker {
    queued: VecDeque<Queued>,
    in_flight: HashMap<(AckKind, u16), oneshot::Sender<AckResult>>,
    closed: bool,
}

impl AckTracker {
    pub(super) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Register a request about to be handed to the client.
    pub(super) fn expect(&mut self, kind: AckKind, qos: QoS) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        self.queued.push_back(Queued { kind, qos, tx });
        rx
    }

    /// Undo the most recent `expect` after the client refused the request.
    pub(super) fn abandon_last(&mut self) {
        self.queued.pop_back();
    }

    /// The event loop wrote a request packet.
    pub(super) fn sent(&mut self, kind: AckKind, pkid: u16) {
        let Some(index) = self.queued.iter().position(|q| q.kind == kind) else {
            trace!(?kind, pkid, "outgoing packet with no waiting request");
            return;
        };
        let Some(queued) = self.queued.remove(index) else {
            return;
        };

        if kind == AckKind::Publish && queued.qos == QoS::AtMostOnce {
            let _ = queued.tx.send(Ok(()));
        } else {
            self.in_flight.insert((kind, pkid), queued.tx);
        }
    }

    /// The broker acknowledged packet `pkid`.
    pub(super) fn acked(&mut self, kind: AckKind, pkid: u16, result: AckResult) {
        match self.in_flight.remove(&(kind, pkid)) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => trace!(?kind, pkid, "ack with no waiting request"),
        }
    }

    /// The link is gone: fail everything still waiting, refuse new requests.
    pub(super) fn fail_all(&mut self) {
        self.closed = true;
        for queued in self.queued.drain(..) {
            let _ = queued.tx.send(Err(Error::BrokerClosed));
        }
        for (_, tx) in self.in_flight.drain() {
            let _ = tx.send(Err(Error::BrokerClosed));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn settled(rx: &mut oneshot::Receiver<AckResult>) -> Option<AckResult> {
        rx.try_recv().ok()
    }

    #[test]
    fn subscribe_resolves_on_matching_suback() {
        let mut acks = AckTracker::default();
        let mut first = acks.expect(AckKind::Subscribe, QoS::AtLeastOnce);
        let mut second = acks.expect(AckKind::Subscribe, QoS::AtMostOnce);

        acks.sent(AckKind::Subscribe, 7);
        acks.sent(AckKind::Subscribe, 8);
        assert!(settled(&mut first).is_none());

        acks.acked(AckKind::Subscribe, 8, Ok(()));
        assert!(matches!(settled(&mut second), Some(Ok(()))));
        assert!(settled(&mut first).is_none());

        acks.acked(
            AckKind::Subscribe,
            7,
            Err(Error::BrokerRequest("not authorized".into())),
        );
        assert!(matches!(settled(&mut first), Some(Err(Error::BrokerRequest(_)))));
    }

    #[test]
    fn qos0_publish_resolves_when_written() {
        let mut acks = AckTracker::default();
        let mut rx = acks.expect(AckKind::Publish, QoS::AtMostOnce);

        acks.sent(AckKind::Publish, 0);
        assert!(matches!(settled(&mut rx), Some(Ok(()))));
    }

    #[test]
    fn kinds_are_bound_independently() {
        let mut acks = AckTracker::default();
        let mut publish = acks.expect(AckKind::Publish, QoS::AtLeastOnce);
        let mut unsubscribe = acks.expect(AckKind::Unsubscribe, QoS::AtMostOnce);

        acks.sent(AckKind::Unsubscribe, 3);
        acks.sent(AckKind::Publish, 3);

        acks.acked(AckKind::Unsubscribe, 3, Ok(()));
        assert!(matches!(settled(&mut unsubscribe), Some(Ok(()))));
        assert!(settled(&mut publish).is_none());

        acks.acked(AckKind::Publish, 3, Ok(()));
        assert!(matches!(settled(&mut publish), Some(Ok(()))));
    }

    #[test]
    fn close_fails_queued_and_in_flight() {
        let mut acks = AckTracker::default();
        let mut in_flight = acks.expect(AckKind::Subscribe, QoS::AtLeastOnce);
        acks.sent(AckKind::Subscribe, 1);
        let mut queued = acks.expect(AckKind::Publish, QoS::ExactlyOnce);

        acks.fail_all();

        assert!(acks.is_closed());
        assert!(matches!(settled(&mut in_flight), Some(Err(Error::BrokerClosed))));
        assert!(matches!(settled(&mut queued), Some(Err(Error::BrokerClosed))));
    }

    #[test]
    fn abandoned_request_is_not_bound() {
        let mut acks = AckTracker::default();
        let mut kept = acks.expect(AckKind::Subscribe, QoS::AtMostOnce);
        let _dropped = acks.expect(AckKind::Subscribe, QoS::AtMostOnce);
        acks.abandon_last();

        acks.sent(AckKind::Subscribe, 4);
        acks.acked(AckKind::Subscribe, 4, Ok(()));
        assert!(matches!(settled(&mut kept), Some(Ok(()))));
    }
}
