//! `Channel` — typed send / subscribe / request-reply over one transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{select, AbortRegistration, Abortable, Either};
use futures_util::pin_mut;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::{BridgeConfig, DEFAULT_REQUEST_TIMEOUT, DEFAULT_TARGET_ORIGIN};
use crate::error::{BridgeError, TransportError};
use crate::trust::TrustedOrigins;

use super::{new_correlation_id, Envelope, Handler, Inbound, Subscription, Topic, Transport};

// ─── Options ─────────────────────────────────────────────────────────────────

/// Construction options for a [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// When set, inbound messages from origins it does not trust are dropped
    /// before any listener runs.
    pub trusted_origins: Option<TrustedOrigins>,
    pub default_target_origin: String,
    pub default_timeout: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            trusted_origins: None,
            default_target_origin: DEFAULT_TARGET_ORIGIN.to_string(),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ChannelOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            trusted_origins: Some(config.trusted_origins.clone()),
            default_target_origin: config.default_target_origin.clone(),
            default_timeout: config.request_timeout,
        }
    }
}

/// Per-call options for [`Channel::send_async`].
#[derive(Debug, Default)]
pub struct SendOptions {
    pub target_origin: Option<String>,
    /// Topic the reply arrives on. Defaults to the request topic.
    pub reply_topic: Option<Topic>,
    /// Defaults to the channel's timeout.
    pub timeout: Option<Duration>,
    /// Abort the wait early via the paired `AbortHandle`.
    pub cancel: Option<AbortRegistration>,
}

impl SendOptions {
    pub fn reply_on(topic: Topic) -> Self {
        Self {
            reply_topic: Some(topic),
            ..Default::default()
        }
    }

    pub fn target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = Some(origin.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel(mut self, registration: AbortRegistration) -> Self {
        self.cancel = Some(registration);
        self
    }
}

// ─── Reply ───────────────────────────────────────────────────────────────────

/// Outcome of a request/reply exchange. Always settles.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    Ok(T),
    TimedOut,
    Rejected(RejectReason),
}

impl<T> Reply<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Self::Ok(v) => Reply::Ok(f(v)),
            Self::TimedOut => Reply::TimedOut,
            Self::Rejected(r) => Reply::Rejected(r),
        }
    }
}

/// Why a request/reply exchange settled without a usable reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The caller aborted the wait.
    Cancelled,
    /// The channel was destroyed before a reply arrived.
    Destroyed,
    /// The request could not be encoded, or the reply did not decode as `T`.
    Malformed(String),
    SendFailed(String),
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::Destroyed => write!(f, "channel destroyed"),
            Self::Malformed(e) => write!(f, "malformed: {}", e),
            Self::SendFailed(e) => write!(f, "send failed: {}", e),
        }
    }
}

impl From<TransportError> for RejectReason {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Destroyed => Self::Destroyed,
            other => Self::SendFailed(other.to_string()),
        }
    }
}

// ─── Channel ─────────────────────────────────────────────────────────────────

/// Typed envelope channel bound to one peer through a [`Transport`].
pub struct Channel {
    transport: Arc<dyn Transport>,
    options: ChannelOptions,
    subscriptions: Mutex<Vec<Subscription>>,
    destroyed: AtomicBool,
}

impl Channel {
    pub fn new(transport: Arc<dyn Transport>, options: ChannelOptions) -> Self {
        Self {
            transport,
            options,
            subscriptions: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Post `payload` under `topic`. Returns the envelope as posted.
    ///
    /// Every topic except `ready`/`close` gets a fresh correlation id.
    pub fn send<P: Serialize + ?Sized>(
        &self,
        topic: Topic,
        payload: &P,
        target_origin: Option<&str>,
    ) -> Result<Envelope, BridgeError> {
        let mut envelope = Envelope::new(topic).with_payload(serde_json::to_value(payload)?);
        if !topic.is_fire_and_forget() {
            envelope.id = Some(new_correlation_id());
        }
        self.post(&envelope, target_origin)?;
        Ok(envelope)
    }

    /// Post a payload-less envelope (`ready`, `close`).
    pub fn notify(&self, topic: Topic, target_origin: Option<&str>) -> Result<Envelope, BridgeError> {
        let envelope = Envelope::new(topic);
        self.post(&envelope, target_origin)?;
        Ok(envelope)
    }

    /// Post under a caller-chosen correlation id, answering a peer's `send_async`.
    pub fn reply<P: Serialize + ?Sized>(
        &self,
        id: &str,
        topic: Topic,
        payload: &P,
        target_origin: Option<&str>,
    ) -> Result<Envelope, BridgeError> {
        let envelope = Envelope::new(topic)
            .with_id(id)
            .with_payload(serde_json::to_value(payload)?);
        self.post(&envelope, target_origin)?;
        Ok(envelope)
    }

    /// Register `listener` for envelopes on `topic` (and with correlation `id`, if given).
    ///
    /// Envelopes from untrusted origins never reach the listener.
    pub fn on<F>(
        &self,
        topic: Topic,
        listener: F,
        id: Option<&str>,
    ) -> Result<Subscription, TransportError>
    where
        F: Fn(&Inbound) + Send + Sync + 'static,
    {
        if self.is_destroyed() {
            return Err(TransportError::Destroyed);
        }

        let filter = EnvelopeFilter {
            topic,
            id: id.map(str::to_string),
            trusted_origins: self.options.trusted_origins.clone(),
        };
        let handler: Handler = Arc::new(move |inbound: &Inbound| {
            if filter.admits(inbound) {
                listener(inbound);
            }
        });

        let subscription = self.transport.subscribe(handler);
        let mut subs = self.lock_subscriptions();
        subs.retain(Subscription::is_active);
        subs.push(subscription.clone());
        Ok(subscription)
    }

    /// Register a one-shot listener for the reply to correlation `id` on `reply_topic`.
    ///
    /// The listener fires at most once; later matching envelopes are ignored.
    pub fn expect_reply(&self, reply_topic: Topic, id: &str) -> Result<PendingReply, TransportError> {
        let (tx, rx) = oneshot::channel::<Option<serde_json::Value>>();
        let slot = Mutex::new(Some(tx));

        let subscription = self.on(
            reply_topic,
            move |inbound| {
                let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    let _ = sender.send(inbound.envelope.payload.clone());
                }
            },
            Some(id),
        )?;

        Ok(PendingReply {
            id: id.to_string(),
            reply_topic,
            default_timeout: self.options.default_timeout,
            subscription,
            rx,
        })
    }

    /// Send and wait for the first reply carrying the same correlation id.
    ///
    /// Settles as `TimedOut` after the configured timeout and as
    /// `Rejected(Destroyed)` if the channel is destroyed while waiting.
    pub async fn send_async<P, R>(&self, topic: Topic, payload: &P, options: SendOptions) -> Reply<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => return Reply::Rejected(RejectReason::Malformed(e.to_string())),
        };

        let id = new_correlation_id();
        let pending = match self.expect_reply(options.reply_topic.unwrap_or(topic), &id) {
            Ok(pending) => pending,
            Err(_) => return Reply::Rejected(RejectReason::Destroyed),
        };

        let envelope = Envelope::new(topic).with_id(id).with_payload(payload);
        if let Err(e) = self.post(&envelope, options.target_origin.as_deref()) {
            pending.cancel();
            return Reply::Rejected(RejectReason::from(e));
        }

        pending.wait(options.timeout, options.cancel).await
    }

    /// Remove every listener this channel registered. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subs = std::mem::take(&mut *self.lock_subscriptions());
        let removed = subs.iter().filter(|s| s.unsubscribe()).count();
        tracing::debug!("Channel destroyed, removed {} listener(s)", removed);
    }

    fn post(&self, envelope: &Envelope, target_origin: Option<&str>) -> Result<(), TransportError> {
        if self.is_destroyed() {
            return Err(TransportError::Destroyed);
        }
        let target = target_origin.unwrap_or(&self.options.default_target_origin);
        self.transport.post(envelope, target)
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ─── Filtering ───────────────────────────────────────────────────────────────

struct EnvelopeFilter {
    topic: Topic,
    id: Option<String>,
    trusted_origins: Option<TrustedOrigins>,
}

impl EnvelopeFilter {
    fn admits(&self, inbound: &Inbound) -> bool {
        if let Some(trusted) = &self.trusted_origins {
            if !trusted.is_trusted(&inbound.origin) {
                tracing::debug!("Dropping {} from untrusted origin", inbound.envelope.topic);
                return false;
            }
        }
        if inbound.envelope.topic != self.topic {
            return false;
        }
        match &self.id {
            Some(id) => inbound.envelope.id.as_deref() == Some(id.as_str()),
            None => true,
        }
    }
}

// ─── Reply wait ──────────────────────────────────────────────────────────────

/// A one-shot reply listener, removed when the wait settles.
pub struct PendingReply {
    id: String,
    reply_topic: Topic,
    default_timeout: Duration,
    subscription: Subscription,
    rx: oneshot::Receiver<Option<serde_json::Value>>,
}

impl PendingReply {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop waiting without consuming a reply.
    pub fn cancel(self) {
        self.subscription.unsubscribe();
    }

    /// Wait for the reply, bounded by `timeout` (or the channel default).
    pub async fn wait<R: DeserializeOwned>(
        self,
        timeout: Option<Duration>,
        cancel: Option<AbortRegistration>,
    ) -> Reply<R> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let rx = self.rx;
        let race = async move {
            let delay = futures_timer::Delay::new(timeout);
            pin_mut!(rx);
            pin_mut!(delay);
            match select(rx, delay).await {
                Either::Left((Ok(payload), _)) => Settled::Reply(payload),
                Either::Left((Err(_), _)) => Settled::Dropped,
                Either::Right(_) => Settled::TimedOut,
            }
        };

        let settled = match cancel {
            Some(registration) => Abortable::new(race, registration)
                .await
                .unwrap_or(Settled::Cancelled),
            None => race.await,
        };
        self.subscription.unsubscribe();

        match settled {
            Settled::Reply(payload) => {
                match serde_json::from_value(payload.unwrap_or(serde_json::Value::Null)) {
                    Ok(v) => Reply::Ok(v),
                    Err(e) => Reply::Rejected(RejectReason::Malformed(e.to_string())),
                }
            }
            Settled::Dropped => Reply::Rejected(RejectReason::Destroyed),
            Settled::TimedOut => {
                tracing::warn!(
                    "No {} reply for correlation id {} within {}ms",
                    self.reply_topic,
                    self.id,
                    timeout.as_millis()
                );
                Reply::TimedOut
            }
            Settled::Cancelled => Reply::Rejected(RejectReason::Cancelled),
        }
    }
}

enum Settled {
    Reply(Option<serde_json::Value>),
    /// The listener (and its sender) went away: the channel was destroyed.
    Dropped,
    TimedOut,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use futures_util::future::AbortHandle;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    const HOST: &str = "https://app.lightcone.xyz";
    const WALLET: &str = "https://wallet.lightcone.xyz";

    fn trusted_options() -> ChannelOptions {
        ChannelOptions {
            trusted_origins: Some(TrustedOrigins::parse(Some(WALLET.into()), HOST)),
            ..Default::default()
        }
    }

    fn pair() -> (Arc<MemoryTransport>, Arc<MemoryTransport>) {
        let (host, wallet) = MemoryTransport::pair(HOST, WALLET);
        (Arc::new(host), Arc::new(wallet))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Inbound) + Send + Sync + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&hits);
        (hits, move |_: &Inbound| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_send_assigns_fresh_ids() {
        let (host, _wallet) = pair();
        let channel = Channel::new(host, ChannelOptions::default());
        let a = channel.send(Topic::RpcRequests, &json!([]), None).unwrap();
        let b = channel.send(Topic::RpcRequests, &json!([]), None).unwrap();
        assert!(a.id.is_some());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_send_fire_and_forget_has_no_id() {
        let (host, _wallet) = pair();
        let channel = Channel::new(host, ChannelOptions::default());
        let env = channel.notify(Topic::Close, None).unwrap();
        assert!(env.id.is_none());
        let env = channel.send(Topic::Ready, &json!({"mode": "iframe"}), None).unwrap();
        assert!(env.id.is_none());
    }

    #[test]
    fn test_on_filters_topic_and_id() {
        let (host, wallet) = pair();
        let host_ch = Channel::new(host, ChannelOptions::default());
        let wallet_ch = Channel::new(wallet, trusted_options());

        let (hits, listener) = counter();
        wallet_ch.on(Topic::RpcRequests, listener, Some("match")).unwrap();

        host_ch.reply("match", Topic::RpcRequests, &json!([]), None).unwrap();
        host_ch.reply("other", Topic::RpcRequests, &json!([]), None).unwrap();
        host_ch.reply("match", Topic::RpcResponse, &json!({}), None).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_untrusted_origin_dropped_silently() {
        let (_host, wallet) = pair();
        let wallet_ch = Channel::new(Arc::clone(&wallet) as Arc<dyn Transport>, trusted_options());
        let (hits, listener) = counter();
        wallet_ch.on(Topic::RpcRequests, listener, None).unwrap();

        wallet.deliver("https://evil.example", Envelope::new(Topic::RpcRequests));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        wallet.deliver(HOST, Envelope::new(Topic::RpcRequests));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_trust_policy_admits_any_origin() {
        let (_host, wallet) = pair();
        let ch = Channel::new(Arc::clone(&wallet) as Arc<dyn Transport>, ChannelOptions::default());
        let (hits, listener) = counter();
        ch.on(Topic::Success, listener, None).unwrap();
        wallet.deliver("https://anyone.example", Envelope::new(Topic::Success));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_async_resolves_with_matching_reply() {
        let (host, wallet) = pair();
        let host_ch = Channel::new(host, ChannelOptions::default());
        let wallet_ch = Arc::new(Channel::new(wallet, trusted_options()));

        let responder = Arc::clone(&wallet_ch);
        wallet_ch
            .on(
                Topic::Internal,
                move |inbound| {
                    let id = inbound.envelope.id.clone().unwrap();
                    responder
                        .reply("decoy", Topic::Internal, &json!({"n": 0}), None)
                        .unwrap();
                    responder.reply(&id, Topic::Internal, &json!({"n": 1}), None).unwrap();
                    responder.reply(&id, Topic::Internal, &json!({"n": 2}), None).unwrap();
                },
                None,
            )
            .unwrap();

        let reply: Reply<serde_json::Value> = host_ch
            .send_async(Topic::Internal, &json!({"ping": true}), SendOptions::default())
            .await;
        assert_eq!(reply, Reply::Ok(json!({"n": 1})));
    }

    #[tokio::test]
    async fn test_send_async_times_out() {
        let (host, _wallet) = pair();
        let host_ch = Channel::new(host, ChannelOptions::default());
        let reply: Reply<serde_json::Value> = host_ch
            .send_async(
                Topic::Internal,
                &json!({}),
                SendOptions::default().timeout(Duration::from_millis(20)),
            )
            .await;
        assert_eq!(reply, Reply::TimedOut);
    }

    #[tokio::test]
    async fn test_send_async_cancelled() {
        let (host, _wallet) = pair();
        let host_ch = Channel::new(host, ChannelOptions::default());
        let (handle, registration) = AbortHandle::new_pair();
        handle.abort();
        let reply: Reply<serde_json::Value> = host_ch
            .send_async(Topic::Internal, &json!({}), SendOptions::default().cancel(registration))
            .await;
        assert_eq!(reply, Reply::Rejected(RejectReason::Cancelled));
    }

    #[tokio::test]
    async fn test_send_async_malformed_reply() {
        let (host, wallet) = pair();
        let host_ch = Channel::new(host, ChannelOptions::default());
        let wallet_ch = Arc::new(Channel::new(wallet, ChannelOptions::default()));
        let responder = Arc::clone(&wallet_ch);
        wallet_ch
            .on(
                Topic::Internal,
                move |inbound| {
                    let id = inbound.envelope.id.clone().unwrap();
                    responder.reply(&id, Topic::Internal, &json!("text"), None).unwrap();
                },
                None,
            )
            .unwrap();

        let reply: Reply<u64> = host_ch
            .send_async(Topic::Internal, &json!({}), SendOptions::default())
            .await;
        assert!(matches!(reply, Reply::Rejected(RejectReason::Malformed(_))));
    }

    #[tokio::test]
    async fn test_send_async_rejected_when_destroyed() {
        let (host, _wallet) = pair();
        let host_ch = Arc::new(Channel::new(host, ChannelOptions::default()));
        let waiter = Arc::clone(&host_ch);
        let task = tokio::spawn(async move {
            waiter
                .send_async::<_, serde_json::Value>(
                    Topic::Internal,
                    &json!({}),
                    SendOptions::default().timeout(Duration::from_secs(30)),
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        host_ch.destroy();
        let reply = task.await.unwrap();
        assert_eq!(reply, Reply::Rejected(RejectReason::Destroyed));
    }

    #[test]
    fn test_destroy_is_idempotent_and_blocks_sends() {
        let (host, _wallet) = pair();
        let transport = Arc::clone(&host);
        let ch = Channel::new(host, ChannelOptions::default());
        ch.on(Topic::Ready, |_| {}, None).unwrap();
        ch.on(Topic::Close, |_| {}, None).unwrap();
        assert_eq!(transport.listener_count(), 2);

        ch.destroy();
        ch.destroy();
        assert_eq!(transport.listener_count(), 0);
        assert!(matches!(
            ch.notify(Topic::Close, None),
            Err(BridgeError::Transport(TransportError::Destroyed))
        ));
        assert!(ch.on(Topic::Ready, |_| {}, None).is_err());
    }
}
