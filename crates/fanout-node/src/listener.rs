//! Channel listener registrations and the promise-based veto contract.

use std::fmt;
use std::sync::Arc;

use fanout_core::{ChannelId, Message, Session};
use futures::channel::oneshot;
use thiserror::Error;

use crate::channel::Channel;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("listener failed: {0}")]
    Failed(String),
}

/// What a message listener sees of one message under evaluation.
pub struct MessageView<'a> {
    channel: &'a Channel,
    sender: Option<&'a str>,
    message: &'a Message,
}

impl<'a> MessageView<'a> {
    pub(crate) fn new(channel: &'a Channel, sender: Option<&'a str>, message: &'a Message) -> Self {
        Self {
            channel,
            sender,
            message,
        }
    }

    pub fn channel(&self) -> &'a Channel {
        self.channel
    }

    pub fn channel_id(&self) -> &'a ChannelId {
        self.channel.id()
    }

    /// Publishing session id, absent for server-originated packets.
    pub fn sender(&self) -> Option<&'a str> {
        self.sender
    }

    pub fn message(&self) -> &'a Message {
        self.message
    }
}

/// Single-resolution accept/reject decision for one message.
///
/// Dropping a promise without resolving it rejects the message.
pub struct Promise {
    decision: oneshot::Sender<bool>,
}

impl Promise {
    pub(crate) fn pending() -> (Self, oneshot::Receiver<bool>) {
        let (decision, outcome) = oneshot::channel();
        (Self { decision }, outcome)
    }

    pub fn accept(self) {
        self.complete(true);
    }

    pub fn reject(self) {
        self.complete(false);
    }

    pub fn complete(self, accepted: bool) {
        // The evaluator may have given up on a failed listener already.
        let _ = self.decision.send(accepted);
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("resolved", &self.decision.is_canceled())
            .finish()
    }
}

/// Gatekeeper consulted for every message sent through a channel.
///
/// The promise may be resolved after `on_message` returns, from any thread.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, view: &MessageView<'_>, promise: Promise) -> Result<(), ListenerError>;
}

impl<F> MessageListener for F
where
    F: Fn(&MessageView<'_>, Promise) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_message(&self, view: &MessageView<'_>, promise: Promise) -> Result<(), ListenerError> {
        self(view, promise)
    }
}

/// Synchronous predicate listener: accepts exactly the messages `F` returns true for.
pub struct MessageFilter<F>(pub F);

impl<F> MessageFilter<F>
where
    F: Fn(&MessageView<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self(predicate)
    }
}

impl<F> MessageListener for MessageFilter<F>
where
    F: Fn(&MessageView<'_>) -> bool + Send + Sync,
{
    fn on_message(&self, view: &MessageView<'_>, promise: Promise) -> Result<(), ListenerError> {
        promise.complete((self.0)(view));
        Ok(())
    }
}

/// Notified after a session joins or leaves a channel.
pub trait SubscriptionListener: Send + Sync {
    fn subscribed(&self, _channel: &ChannelId, _session: &dyn Session) {}
    fn unsubscribed(&self, _channel: &ChannelId, _session: &dyn Session) {}
}

/// Notified when channels enter or leave an engine's registry.
pub trait ChannelLifecycleListener: Send + Sync {
    fn channel_added(&self, _channel: &Arc<Channel>) {}
    fn channel_removed(&self, _channel: &ChannelId) {}
}

#[derive(Clone)]
pub enum ChannelListener {
    Message(Arc<dyn MessageListener>),
    Subscription(Arc<dyn SubscriptionListener>),
}

impl ChannelListener {
    pub fn message(listener: impl MessageListener + 'static) -> Self {
        Self::Message(Arc::new(listener))
    }

    pub fn subscription(listener: impl SubscriptionListener + 'static) -> Self {
        Self::Subscription(Arc::new(listener))
    }
}

impl fmt::Debug for ChannelListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(_) => f.write_str("ChannelListener::Message"),
            Self::Subscription(_) => f.write_str("ChannelListener::Subscription"),
        }
    }
}

/// Whether a listener keeps its channel alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerStrength {
    #[default]
    Strong,
    /// Does not by itself prevent the channel from expiring.
    Weak,
}

/// Handle returned by `Channel::add_listener`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

#[derive(Debug, Clone)]
pub(crate) struct Registration {
    pub(crate) id: ListenerId,
    pub(crate) strength: ListenerStrength,
    pub(crate) listener: ChannelListener,
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::Promise;

    #[test]
    fn promise_resolves_once() {
        let (promise, outcome) = Promise::pending();
        promise.reject();
        assert_eq!(block_on(outcome), Ok(false));
    }

    #[test]
    fn dropped_promise_is_observed_as_cancelled() {
        let (promise, outcome) = Promise::pending();
        drop(promise);
        assert!(block_on(outcome).is_err());
    }

    #[test]
    fn promise_can_resolve_from_another_thread() {
        let (promise, outcome) = Promise::pending();
        let handle = std::thread::spawn(move || promise.accept());
        assert_eq!(block_on(outcome), Ok(true));
        handle.join().expect("resolver thread");
    }
}
