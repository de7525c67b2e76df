//! In-process transport — two linked endpoints in one address space.
//!
//! Delivery is synchronous and in post order. Envelopes go through a JSON
//! encode/decode on the way, so the wire shape matches the browser backend.

use std::sync::{Arc, Weak};

use crate::error::TransportError;

use super::{target_matches, Envelope, Handler, Inbound, Listeners, Subscription, Transport};

/// One end of an in-process link.
pub struct MemoryTransport {
    origin: String,
    peer_origin: String,
    listeners: Arc<Listeners>,
    peer: Weak<Listeners>,
}

impl MemoryTransport {
    /// Create two linked endpoints at `origin_a` and `origin_b`.
    pub fn pair(origin_a: &str, origin_b: &str) -> (Self, Self) {
        let a = Listeners::new();
        let b = Listeners::new();
        (
            Self {
                origin: origin_a.to_string(),
                peer_origin: origin_b.to_string(),
                listeners: Arc::clone(&a),
                peer: Arc::downgrade(&b),
            },
            Self {
                origin: origin_b.to_string(),
                peer_origin: origin_a.to_string(),
                listeners: b,
                peer: Arc::downgrade(&a),
            },
        )
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn peer_origin(&self) -> &str {
        &self.peer_origin
    }

    /// Deliver an envelope to this endpoint as if posted from `origin`.
    ///
    /// Models any window posting to us, including ones we never bound to.
    pub fn deliver(&self, origin: &str, envelope: Envelope) {
        self.listeners.dispatch(&Inbound {
            origin: origin.to_string(),
            envelope,
        });
    }

    /// Deliver raw JSON from `origin`. Undecodable input is dropped.
    pub fn deliver_raw(&self, origin: &str, json: &str) {
        match Envelope::from_json(json) {
            Ok(envelope) => self.deliver(origin, envelope),
            Err(e) => tracing::debug!("Ignoring undecodable message from {}: {}", origin, e),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Transport for MemoryTransport {
    fn post(&self, envelope: &Envelope, target_origin: &str) -> Result<(), TransportError> {
        if !target_matches(target_origin, &self.peer_origin) {
            tracing::debug!(
                "Dropping {} post: target {} does not match peer",
                envelope.topic,
                target_origin
            );
            return Ok(());
        }

        let peer = self.peer.upgrade().ok_or(TransportError::NotConnected)?;
        let wire = envelope
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        let envelope =
            Envelope::from_json(&wire).map_err(|e| TransportError::SendFailed(e.to_string()))?;

        peer.dispatch(&Inbound {
            origin: self.origin.clone(),
            envelope,
        });
        Ok(())
    }

    fn subscribe(&self, handler: Handler) -> Subscription {
        self.listeners.add(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Topic;
    use std::sync::Mutex;

    fn recorder(t: &MemoryTransport) -> Arc<Mutex<Vec<Inbound>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        t.subscribe(Arc::new(move |inbound: &Inbound| {
            sink.lock().unwrap().push(inbound.clone());
        }));
        seen
    }

    #[test]
    fn test_post_reaches_peer_with_sender_origin() {
        let (a, b) = MemoryTransport::pair("https://a.com", "https://b.com");
        let seen = recorder(&b);
        a.post(&Envelope::new(Topic::Ready), "*").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].origin, "https://a.com");
        assert_eq!(seen[0].envelope.topic, Topic::Ready);
    }

    #[test]
    fn test_post_with_wrong_target_is_dropped() {
        let (a, b) = MemoryTransport::pair("https://a.com", "https://b.com");
        let seen = recorder(&b);
        a.post(&Envelope::new(Topic::Ready), "https://c.com").unwrap();
        a.post(&Envelope::new(Topic::Close), "https://b.com").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].envelope.topic, Topic::Close);
    }

    #[test]
    fn test_post_preserves_order() {
        let (a, b) = MemoryTransport::pair("https://a.com", "https://b.com");
        let seen = recorder(&b);
        for i in 0..5 {
            a.post(&Envelope::new(Topic::Success).with_id(i.to_string()), "*")
                .unwrap();
        }
        let ids: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|i| i.envelope.id.clone())
            .collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_post_after_peer_dropped() {
        let (a, b) = MemoryTransport::pair("https://a.com", "https://b.com");
        drop(b);
        let result = a.post(&Envelope::new(Topic::Ready), "*");
        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[test]
    fn test_deliver_raw_ignores_garbage() {
        let (a, _b) = MemoryTransport::pair("https://a.com", "https://b.com");
        let seen = recorder(&a);
        a.deliver_raw("https://x.com", "not json");
        a.deliver_raw("https://x.com", r#"{"topic":"nope"}"#);
        a.deliver_raw("https://x.com", r#"{"topic":"close"}"#);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
