//! Lifecycle actor — the single owner of the dialog state.
//!
//! Inbound requests and user decisions both arrive as messages; after each one
//! the actor publishes a [`DialogSnapshot`] on a `watch` channel for the UI.

use tokio::sync::{mpsc, watch};

use crate::classify::Presentation;
use crate::error::{BridgeError, LifecycleError, TransportError};
use crate::transport::{Channel, Inbound, Subscription, Topic};
use crate::trust::Referrer;

use super::keys::{KeyValueStore, PasskeyProvider};
use super::lifecycle::{PendingRequest, RequestLifecycle};
use super::state::{DialogState, Display, Mode};

// ─── Messages ────────────────────────────────────────────────────────────────

/// A decision or setting from the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UserCommand {
    Approve,
    Reject,
    Retry,
    Close,
    SetDisplay(Display),
    SetMode(Mode),
    SetReferrer(Referrer),
}

/// What the UI renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogSnapshot {
    pub dialog: DialogState,
    pub current: Option<PendingRequest>,
    pub presentation: Option<Presentation>,
}

// ─── Inbox ───────────────────────────────────────────────────────────────────

/// Request envelopes from a channel, queued for the actor.
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<Inbound>,
    subscriptions: Vec<Subscription>,
}

impl Inbox {
    /// Listen for `rpc-requests` and `rpc-request` on `channel`.
    pub fn subscribe(channel: &Channel) -> Result<Self, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscriptions = Vec::with_capacity(2);
        for topic in [Topic::RpcRequests, Topic::RpcRequest] {
            let tx = tx.clone();
            subscriptions.push(channel.on(
                topic,
                move |inbound| {
                    let _ = tx.send(inbound.clone());
                },
                None,
            )?);
        }
        Ok(Self { rx, subscriptions })
    }

    pub async fn recv(&mut self) -> Option<Inbound> {
        self.rx.recv().await
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        for sub in &self.subscriptions {
            sub.unsubscribe();
        }
    }
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// UI-side handle: send decisions, observe snapshots.
#[derive(Clone)]
pub struct LifecycleHandle {
    commands: mpsc::UnboundedSender<UserCommand>,
    snapshots: watch::Receiver<DialogSnapshot>,
}

impl LifecycleHandle {
    pub fn send(&self, command: UserCommand) -> Result<(), BridgeError> {
        self.commands.send(command).map_err(|_| BridgeError::Destroyed)
    }

    pub fn approve(&self) -> Result<(), BridgeError> {
        self.send(UserCommand::Approve)
    }

    pub fn reject(&self) -> Result<(), BridgeError> {
        self.send(UserCommand::Reject)
    }

    pub fn retry(&self) -> Result<(), BridgeError> {
        self.send(UserCommand::Retry)
    }

    pub fn close(&self) -> Result<(), BridgeError> {
        self.send(UserCommand::Close)
    }

    pub fn snapshot(&self) -> DialogSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Wait for the next published snapshot.
    pub async fn changed(&mut self) -> Result<DialogSnapshot, BridgeError> {
        self.snapshots
            .changed()
            .await
            .map_err(|_| BridgeError::Destroyed)?;
        Ok(self.snapshots.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate`.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&DialogSnapshot) -> bool,
    ) -> Result<DialogSnapshot, BridgeError> {
        self.snapshots
            .wait_for(predicate)
            .await
            .map(|s| (*s).clone())
            .map_err(|_| BridgeError::Destroyed)
    }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

pub struct LifecycleActor<S, P> {
    lifecycle: RequestLifecycle<S, P>,
    inbox: Inbox,
    commands: mpsc::UnboundedReceiver<UserCommand>,
    snapshots: watch::Sender<DialogSnapshot>,
}

impl<S: KeyValueStore, P: PasskeyProvider> LifecycleActor<S, P> {
    /// Subscribe to the lifecycle's channel and create the UI handle.
    pub fn new(lifecycle: RequestLifecycle<S, P>) -> Result<(Self, LifecycleHandle), TransportError> {
        let inbox = Inbox::subscribe(lifecycle.channel())?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(snapshot_of(&lifecycle));

        let actor = Self {
            lifecycle,
            inbox,
            commands: cmd_rx,
            snapshots: snap_tx,
        };
        let handle = LifecycleHandle {
            commands: cmd_tx,
            snapshots: snap_rx,
        };
        Ok((actor, handle))
    }

    /// Run until every handle is dropped or the channel goes away.
    pub async fn run(mut self) -> RequestLifecycle<S, P> {
        loop {
            tokio::select! {
                inbound = self.inbox.recv() => {
                    match inbound {
                        Some(inbound) => {
                            let dispatch = self.lifecycle.handle(&inbound);
                            tracing::debug!("Dispatched inbound request: {:?}", dispatch);
                        }
                        None => break,
                    }
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.apply(command).await,
                        None => break,
                    }
                }
            }
            self.publish();
        }

        tracing::info!("Lifecycle actor stopped");
        self.lifecycle
    }

    async fn apply(&mut self, command: UserCommand) {
        let outcome = match command {
            UserCommand::Approve => self.approve_or_abandon().await,
            other => self.apply_now(other),
        };
        if let Err(e) = outcome {
            tracing::warn!("User command failed: {}", e);
        }
    }

    /// Run the approval while still listening for commands.
    ///
    /// `Reject` or `Close` abandons the pending passkey/signing step and
    /// answers 4001. Setting changes arriving meanwhile apply afterwards.
    async fn approve_or_abandon(&mut self) -> Result<(), LifecycleError> {
        let mut deferred = Vec::new();
        let abandoned = {
            let approve = self.lifecycle.approve();
            tokio::pin!(approve);
            loop {
                tokio::select! {
                    result = &mut approve => {
                        result?;
                        break None;
                    }
                    command = self.commands.recv() => match command {
                        Some(command @ (UserCommand::Reject | UserCommand::Close)) => break Some(command),
                        Some(command) => deferred.push(command),
                        None => {
                            (&mut approve).await?;
                            break None;
                        }
                    },
                }
            }
        };

        if let Some(command) = abandoned {
            tracing::info!("Approval abandoned by {:?}", command);
            self.apply_now(command)?;
        }
        for command in deferred {
            if let Err(e) = self.apply_now(command) {
                tracing::warn!("User command failed: {}", e);
            }
        }
        Ok(())
    }

    fn apply_now(&mut self, command: UserCommand) -> Result<(), LifecycleError> {
        match command {
            UserCommand::Approve => {
                tracing::debug!("Ignoring approve while an approval is running");
                Ok(())
            }
            UserCommand::Reject => self.lifecycle.reject().map(|_| ()),
            UserCommand::Retry => self.lifecycle.retry(),
            UserCommand::Close => self.lifecycle.close().map(|_| ()),
            UserCommand::SetDisplay(display) => {
                self.lifecycle.set_display(display);
                Ok(())
            }
            UserCommand::SetMode(mode) => {
                self.lifecycle.set_mode(mode);
                Ok(())
            }
            UserCommand::SetReferrer(referrer) => {
                self.lifecycle.set_referrer(referrer);
                Ok(())
            }
        }
    }

    fn publish(&self) {
        let snapshot = snapshot_of(&self.lifecycle);
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

fn snapshot_of<S: KeyValueStore, P: PasskeyProvider>(lifecycle: &RequestLifecycle<S, P>) -> DialogSnapshot {
    DialogSnapshot {
        dialog: lifecycle.state().clone(),
        current: lifecycle.current().cloned(),
        presentation: lifecycle.presentation(),
    }
}
