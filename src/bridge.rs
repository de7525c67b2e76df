//! `Bridge` — two channels composed into one duplex link with a ready gate.
//!
//! The "from" channel receives, the "to" channel sends. With
//! `wait_for_ready`, every outbound message except `ready` itself waits until
//! the peer has announced `ready`, so no RPC traffic reaches a half-initialized
//! peer.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;

use crate::error::{BridgeError, TransportError};
use crate::transport::{
    new_correlation_id, Channel, Envelope, Inbound, RejectReason, Reply, SendOptions, Subscription, Topic,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadyState {
    Pending,
    Ready,
    Destroyed,
}

/// Options for [`Bridge::new`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeOptions {
    pub wait_for_ready: bool,
}

pub struct Bridge {
    from: Arc<Channel>,
    to: Arc<Channel>,
    options: BridgeOptions,
    ready_tx: Arc<watch::Sender<ReadyState>>,
}

impl Bridge {
    pub fn new(from: Arc<Channel>, to: Arc<Channel>, options: BridgeOptions) -> Result<Self, BridgeError> {
        let (ready_tx, _) = watch::channel(ReadyState::Pending);
        let ready_tx = Arc::new(ready_tx);

        let notify = Arc::clone(&ready_tx);
        from.on(
            Topic::Ready,
            move |_inbound| {
                let changed = notify.send_if_modified(|state| {
                    if *state == ReadyState::Pending {
                        *state = ReadyState::Ready;
                        true
                    } else {
                        false
                    }
                });
                if changed {
                    tracing::info!("Bridge peer is ready");
                }
            },
            None,
        )?;

        Ok(Self {
            from,
            to,
            options,
            ready_tx,
        })
    }

    /// Announce readiness to the peer. Never gated.
    pub fn ready<P: Serialize + ?Sized>(&self, payload: &P) -> Result<Envelope, BridgeError> {
        self.to.send(Topic::Ready, payload, None)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_tx.borrow() == ReadyState::Ready
    }

    /// Resolve once the peer's `ready` has been observed.
    ///
    /// Fails with [`BridgeError::Destroyed`] if the bridge is torn down first.
    pub async fn wait_for_ready(&self) -> Result<(), BridgeError> {
        let mut rx = self.ready_tx.subscribe();
        let state = rx
            .wait_for(|s| *s != ReadyState::Pending)
            .await
            .map(|s| *s)
            .unwrap_or(ReadyState::Destroyed);
        match state {
            ReadyState::Ready => Ok(()),
            _ => Err(BridgeError::Destroyed),
        }
    }

    /// Send on the "to" side, after the ready gate when configured.
    pub async fn send<P: Serialize + ?Sized>(
        &self,
        topic: Topic,
        payload: &P,
        target_origin: Option<&str>,
    ) -> Result<Envelope, BridgeError> {
        self.gate(topic).await?;
        self.to.send(topic, payload, target_origin)
    }

    /// Request/reply across the bridge: sends on "to", waits for the reply on "from".
    pub async fn send_async<P, R>(&self, topic: Topic, payload: &P, options: SendOptions) -> Reply<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if self.gate(topic).await.is_err() {
            return Reply::Rejected(RejectReason::Destroyed);
        }

        let id = new_correlation_id();
        let pending = match self.from.expect_reply(options.reply_topic.unwrap_or(topic), &id) {
            Ok(pending) => pending,
            Err(_) => return Reply::Rejected(RejectReason::Destroyed),
        };

        if let Err(e) = self.to.reply(&id, topic, payload, options.target_origin.as_deref()) {
            pending.cancel();
            return Reply::Rejected(match e {
                BridgeError::Transport(e) => RejectReason::from(e),
                BridgeError::Serde(e) => RejectReason::Malformed(e.to_string()),
                other => RejectReason::SendFailed(other.to_string()),
            });
        }

        pending.wait(options.timeout, options.cancel).await
    }

    /// Listen on the "from" side.
    pub fn on<F>(&self, topic: Topic, listener: F, id: Option<&str>) -> Result<Subscription, TransportError>
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        self.from.on(topic, listener, id)
    }

    /// Tear down both sides and fail any pending `wait_for_ready`. Idempotent.
    pub fn destroy(&self) {
        self.from.destroy();
        self.to.destroy();
        self.ready_tx.send_if_modified(|state| {
            if *state == ReadyState::Pending {
                *state = ReadyState::Destroyed;
                true
            } else {
                false
            }
        });
    }

    async fn gate(&self, topic: Topic) -> Result<(), BridgeError> {
        if self.options.wait_for_ready && topic != Topic::Ready {
            self.wait_for_ready().await?;
        }
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelOptions, MemoryTransport, Transport};
    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, assert_ready_err, task};

    fn bridge(wait_for_ready: bool) -> (Bridge, Channel) {
        let (a, b) = MemoryTransport::pair("https://a.com", "https://b.com");
        let local = Arc::new(Channel::new(Arc::new(a), ChannelOptions::default()));
        let peer = Channel::new(Arc::new(b) as Arc<dyn Transport>, ChannelOptions::default());
        let bridge = Bridge::new(Arc::clone(&local), local, BridgeOptions { wait_for_ready }).unwrap();
        (bridge, peer)
    }

    #[test]
    fn test_wait_for_ready_resolves_on_peer_ready() {
        let (bridge, peer) = bridge(true);
        let mut wait = task::spawn(bridge.wait_for_ready());
        assert_pending!(wait.poll());

        peer.notify(Topic::Ready, None).unwrap();
        assert!(wait.is_woken());
        assert_ready!(wait.poll()).unwrap();
        assert!(bridge.is_ready());
    }

    #[test]
    fn test_ungated_send_goes_out_immediately() {
        let (bridge, _peer) = bridge(false);
        let payload = json!({"x": 1});
        let mut send = task::spawn(bridge.send(Topic::Success, &payload, None));
        let envelope = assert_ready!(send.poll()).unwrap();
        assert!(envelope.id.is_some());
    }

    #[test]
    fn test_gated_send_waits_for_ready() {
        let (bridge, peer) = bridge(true);
        let payload = json!({"x": 1});
        let mut send = task::spawn(bridge.send(Topic::Success, &payload, None));
        assert_pending!(send.poll());

        peer.notify(Topic::Ready, None).unwrap();
        assert_ready!(send.poll()).unwrap();
    }

    #[test]
    fn test_destroy_rejects_waiters() {
        let (bridge, _peer) = bridge(true);
        {
            let mut wait = task::spawn(bridge.wait_for_ready());
            assert_pending!(wait.poll());
            bridge.destroy();
            assert_ready_err!(wait.poll());
        }
        assert!(!bridge.is_ready());
        assert!(matches!(
            bridge.ready(&json!(null)),
            Err(BridgeError::Transport(TransportError::Destroyed))
        ));
    }

    #[test]
    fn test_ready_after_ready_is_noop() {
        let (bridge, peer) = bridge(true);
        peer.notify(Topic::Ready, None).unwrap();
        peer.notify(Topic::Ready, None).unwrap();
        assert!(bridge.is_ready());
        bridge.destroy();
        // Already-resolved readiness is not revoked.
        assert!(bridge.is_ready());
    }
}
