use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fanout_core::time::now_millis;
use fanout_core::{ChannelId, Delivery, Packet, Session};
use futures::executor::block_on;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::listener::{
    ChannelListener, ListenerId, ListenerStrength, MessageListener, MessageView, Promise,
    Registration, SubscriptionListener,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelStateError {
    #[error("channel {0} is persistent and cannot be removed")]
    Persistent(String),
}

#[derive(Debug)]
struct Lifecycle {
    persistent: bool,
    /// Set once the registry has detached the channel.
    terminated: bool,
    /// `None` while pinned or not yet recomputed after a keep-alive event.
    expiration: Option<i64>,
}

/// Addressable pub/sub topic with subscribers, listeners and a lifecycle.
///
/// `persistent` and the expiration timestamp share one lock; subscribers,
/// listeners and attributes are lock-free so delivery never blocks
/// concurrent (un)subscription.
pub struct Channel {
    id: ChannelId,
    inactive_lifetime_millis: i64,
    max_lazy_timeout_millis: i64,
    subscribers: DashMap<String, Arc<dyn Session>>,
    listeners: ArcSwap<Vec<Registration>>,
    next_listener_id: AtomicU64,
    attributes: DashMap<String, Value>,
    lifecycle: RwLock<Lifecycle>,
    lazy: AtomicBool,
    lazy_timeout_millis: AtomicI64,
    broadcast_to_publisher: AtomicBool,
    initialized: AtomicBool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id.id())
            .field("subscribers", &self.subscribers.len())
            .field("listeners", &self.listeners.load().len())
            .field("lifecycle", &*self.lifecycle.read())
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub fn new(id: ChannelId, config: &EngineConfig) -> Self {
        let inactive_lifetime_millis = config.inactive_lifetime_millis();
        Self {
            id,
            inactive_lifetime_millis,
            max_lazy_timeout_millis: config.max_lazy_timeout_millis(),
            subscribers: DashMap::new(),
            listeners: ArcSwap::from_pointee(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            attributes: DashMap::new(),
            lifecycle: RwLock::new(Lifecycle {
                persistent: false,
                terminated: false,
                expiration: Some(now_millis() + inactive_lifetime_millis),
            }),
            lazy: AtomicBool::new(false),
            lazy_timeout_millis: AtomicI64::new(-1),
            broadcast_to_publisher: AtomicBool::new(config.broadcast_to_publisher),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Adds `session`; returns whether it was not already subscribed.
    ///
    /// Meta and terminated channels refuse subscriptions. Any accepted call
    /// pins the channel.
    pub fn subscribe(&self, session: Arc<dyn Session>) -> bool {
        if self.id.is_meta() {
            return false;
        }

        let added = {
            let mut lifecycle = self.lifecycle.write();
            if lifecycle.terminated {
                return false;
            }
            lifecycle.expiration = None;
            match self.subscribers.entry(session.id().to_string()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&session));
                    true
                }
            }
        };

        if added {
            for listener in self.subscription_listeners() {
                listener.subscribed(&self.id, session.as_ref());
            }
        }
        added
    }

    /// Removes the session with `session_id`; returns whether it was subscribed.
    pub fn unsubscribe(&self, session_id: &str) -> bool {
        let Some((_, session)) = self.subscribers.remove(session_id) else {
            return false;
        };

        for listener in self.subscription_listeners() {
            listener.unsubscribed(&self.id, session.as_ref());
        }
        if self.subscribers.is_empty() {
            let mut lifecycle = self.lifecycle.write();
            self.reset_expiration_if_idle(&mut lifecycle);
        }
        true
    }

    /// Unsubscribes every current subscriber, notifying listeners for each.
    pub fn unsubscribe_all(&self) -> usize {
        let ids: Vec<String> = self.subscribers.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.unsubscribe(id)).count()
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.subscribers.contains_key(session_id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn subscribers(&self) -> Vec<Arc<dyn Session>> {
        self.subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn add_listener(&self, listener: ChannelListener, strength: ListenerStrength) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let mut lifecycle = self.lifecycle.write();

        let mut next = Vec::clone(&self.listeners.load());
        next.push(Registration {
            id,
            strength,
            listener,
        });
        self.listeners.store(Arc::new(next));

        if strength == ListenerStrength::Strong {
            lifecycle.expiration = None;
        }
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut lifecycle = self.lifecycle.write();

        let current = self.listeners.load();
        if !current.iter().any(|registration| registration.id == id) {
            return false;
        }
        let next: Vec<Registration> = current
            .iter()
            .filter(|registration| registration.id != id)
            .cloned()
            .collect();
        self.listeners.store(Arc::new(next));

        self.reset_expiration_if_idle(&mut lifecycle);
        true
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    pub fn is_persistent(&self) -> bool {
        self.lifecycle.read().persistent
    }

    pub fn set_persistent(&self, persistent: bool) {
        let mut lifecycle = self.lifecycle.write();
        lifecycle.persistent = persistent;
        if persistent {
            lifecycle.expiration = None;
        } else {
            self.reset_expiration_if_idle(&mut lifecycle);
        }
    }

    /// Whether the registry has detached this channel.
    pub fn is_terminated(&self) -> bool {
        self.lifecycle.read().terminated
    }

    /// Terminates a non-persistent channel.
    pub(crate) fn terminate(&self) -> Result<(), ChannelStateError> {
        let mut lifecycle = self.lifecycle.write();
        if lifecycle.persistent {
            return Err(ChannelStateError::Persistent(self.id.to_string()));
        }
        lifecycle.terminated = true;
        Ok(())
    }

    /// Terminates the channel if it has expired at `now`.
    pub(crate) fn terminate_if_expired(&self, now: i64) -> bool {
        let mut lifecycle = self.lifecycle.write();
        let expired = lifecycle
            .expiration
            .is_some_and(|expiration| expiration < now);
        if expired {
            lifecycle.terminated = true;
        }
        expired
    }

    /// Absolute expiration in epoch millis, `None` while pinned.
    pub fn expiration(&self) -> Option<i64> {
        self.lifecycle.read().expiration
    }

    pub fn has_expired(&self, now: i64) -> bool {
        self.lifecycle
            .read()
            .expiration
            .is_some_and(|expiration| expiration < now)
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy.load(Ordering::Acquire)
    }

    pub fn set_lazy(&self, lazy: bool) {
        self.lazy.store(lazy, Ordering::Release);
    }

    pub fn lazy_timeout_millis(&self) -> i64 {
        self.lazy_timeout_millis.load(Ordering::Acquire)
    }

    /// A positive timeout also makes the channel lazy.
    pub fn set_lazy_timeout_millis(&self, timeout: i64) {
        self.lazy_timeout_millis.store(timeout, Ordering::Release);
        if timeout > 0 {
            self.set_lazy(true);
        }
    }

    pub fn is_broadcast_to_publisher(&self) -> bool {
        self.broadcast_to_publisher.load(Ordering::Acquire)
    }

    pub fn set_broadcast_to_publisher(&self, broadcast: bool) {
        self.broadcast_to_publisher.store(broadcast, Ordering::Release);
    }

    /// Whether first-use initializers have run.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn set_attribute(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.attributes.insert(name.into(), value)
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).map(|value| value.clone())
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.attributes.remove(name).map(|(_, value)| value)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.iter().map(|e| e.key().clone()).collect()
    }

    /// Runs every message listener over each message and keeps the survivors.
    ///
    /// Messages are evaluated independently; the first rejection drops that
    /// message and skips the remaining listeners for it only.
    pub fn on_message_sent(&self, packet: &Packet) -> Packet {
        let registrations = self.listeners.load();
        let message_listeners: Vec<&Arc<dyn MessageListener>> = registrations
            .iter()
            .filter_map(|registration| match &registration.listener {
                ChannelListener::Message(listener) => Some(listener),
                ChannelListener::Subscription(_) => None,
            })
            .collect();
        if message_listeners.is_empty() {
            return packet.clone();
        }

        let mut survivors = Vec::with_capacity(packet.len());
        for message in packet.messages() {
            let mut view = None;
            let accepted = message_listeners.iter().all(|listener| {
                let view =
                    view.get_or_insert_with(|| MessageView::new(self, packet.sender(), message));
                self.evaluate(listener.as_ref(), view)
            });
            if accepted {
                survivors.push(message.clone());
            }
        }
        packet.with_messages(survivors)
    }

    fn evaluate(&self, listener: &dyn MessageListener, view: &MessageView<'_>) -> bool {
        let (promise, outcome) = Promise::pending();
        if let Err(err) = listener.on_message(view, promise) {
            warn!(channel = %self.id, error = %err, "message listener failed; message rejected");
            return false;
        }
        match block_on(outcome) {
            Ok(accepted) => accepted,
            Err(_) => {
                warn!(channel = %self.id, "message listener abandoned its promise; message rejected");
                false
            }
        }
    }

    /// Promotes `packet` and hands it to every subscriber not yet in `delivered`.
    ///
    /// Each session reached is added to `delivered`; returns how many were reached.
    pub fn send(&self, packet: &Packet, delivered: &mut HashSet<String>) -> usize {
        let promoted = self.on_message_sent(packet);
        if promoted.is_empty() {
            debug!(channel = %self.id, "every message vetoed; nothing to deliver");
            return 0;
        }

        let delivery = self.wrap(Arc::new(promoted));
        let skip = if self.is_broadcast_to_publisher() {
            None
        } else {
            packet.sender()
        };

        let mut reached = 0;
        for session in self.subscribers() {
            let session_id = session.id();
            if Some(session_id) == skip || !delivered.insert(session_id.to_string()) {
                continue;
            }
            match session.send(delivery.clone()) {
                Ok(()) => reached += 1,
                Err(err) => {
                    warn!(channel = %self.id, session = session_id, error = %err, "session delivery failed");
                }
            }
        }
        reached
    }

    fn wrap(&self, packet: Arc<Packet>) -> Delivery {
        if !self.is_lazy() {
            return Delivery::Immediate(packet);
        }
        let timeout = self.lazy_timeout_millis();
        let window = if timeout <= 0 {
            self.max_lazy_timeout_millis
        } else {
            timeout
        };
        Delivery::Lazy {
            packet,
            flush_deadline: now_millis() + window,
        }
    }

    fn subscription_listeners(&self) -> Vec<Arc<dyn SubscriptionListener>> {
        self.listeners
            .load()
            .iter()
            .filter_map(|registration| match &registration.listener {
                ChannelListener::Subscription(listener) => Some(Arc::clone(listener)),
                ChannelListener::Message(_) => None,
            })
            .collect()
    }

    fn has_strong_listener(&self) -> bool {
        self.listeners
            .load()
            .iter()
            .any(|registration| registration.strength == ListenerStrength::Strong)
    }

    /// Caller holds the lifecycle write lock.
    fn reset_expiration_if_idle(&self, lifecycle: &mut Lifecycle) {
        if lifecycle.expiration.is_none()
            && !lifecycle.persistent
            && self.subscribers.is_empty()
            && !self.has_strong_listener()
        {
            lifecycle.expiration = Some(now_millis() + self.inactive_lifetime_millis);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use fanout_core::time::now_millis;
    use fanout_core::{ChannelId, Message, Packet, RecordingSession, Session};
    use serde_json::json;

    use super::Channel;
    use crate::config::EngineConfig;
    use crate::listener::{
        ChannelListener, ListenerError, ListenerStrength, MessageFilter, MessageListener,
        MessageView, Promise, SubscriptionListener,
    };

    const FAR_FUTURE: i64 = i64::MAX;

    fn channel(id: &str) -> Channel {
        Channel::new(ChannelId::parse(id).expect("valid id"), &EngineConfig::default())
    }

    fn short_lived(id: &str) -> Channel {
        let config = EngineConfig {
            inactive_channel_lifetime: Duration::from_millis(10),
            ..EngineConfig::default()
        };
        Channel::new(ChannelId::parse(id).expect("valid id"), &config)
    }

    fn packet(channel: &Channel, sender: Option<&str>, bodies: &[serde_json::Value]) -> Packet {
        Packet::new(
            sender.map(str::to_string),
            channel.id().clone(),
            bodies.iter().cloned().map(Message::new).collect(),
        )
    }

    #[derive(Default)]
    struct CountingSubscriptions {
        joined: AtomicUsize,
        left: AtomicUsize,
    }

    impl SubscriptionListener for Arc<CountingSubscriptions> {
        fn subscribed(&self, _channel: &ChannelId, _session: &dyn Session) {
            self.joined.fetch_add(1, Ordering::SeqCst);
        }

        fn unsubscribed(&self, _channel: &ChannelId, _session: &dyn Session) {
            self.left.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn subscribe_is_idempotent() {
        let channel = channel("/chat/room1");
        let session = Arc::new(RecordingSession::new("s-1"));

        assert!(channel.subscribe(session.clone()));
        assert!(!channel.subscribe(session));
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[test]
    fn terminated_channel_refuses_subscribers() {
        let channel = channel("/chat/room1");
        assert!(channel.subscribe(Arc::new(RecordingSession::new("a"))));
        channel.terminate().expect("not persistent");

        assert!(channel.is_terminated());
        assert!(!channel.subscribe(Arc::new(RecordingSession::new("b"))));
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[test]
    fn subscribed_channel_is_not_terminated_as_expired() {
        let channel = short_lived("/chat/room1");
        assert!(channel.subscribe(Arc::new(RecordingSession::new("a"))));
        assert!(!channel.terminate_if_expired(FAR_FUTURE));
        assert!(!channel.is_terminated());

        channel.unsubscribe("a");
        assert!(channel.terminate_if_expired(FAR_FUTURE));
        assert!(channel.is_terminated());
    }

    #[test]
    fn meta_channels_refuse_subscribers() {
        let channel = channel("/meta/handshake");
        assert!(!channel.subscribe(Arc::new(RecordingSession::new("s-1"))));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn subscription_listeners_fire_on_changes_only() {
        let channel = channel("/chat/room1");
        let counts = Arc::new(CountingSubscriptions::default());
        channel.add_listener(
            ChannelListener::subscription(Arc::clone(&counts)),
            ListenerStrength::Weak,
        );
        let session = Arc::new(RecordingSession::new("s-1"));

        channel.subscribe(session.clone());
        channel.subscribe(session);
        assert!(channel.unsubscribe("s-1"));
        assert!(!channel.unsubscribe("s-1"));

        assert_eq!(counts.joined.load(Ordering::SeqCst), 1);
        assert_eq!(counts.left.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_channel_expires_after_inactive_window() {
        let channel = short_lived("/chat/room1");
        let expiration = channel.expiration().expect("finite window on creation");
        assert!(!channel.has_expired(expiration));
        assert!(channel.has_expired(expiration + 1));
    }

    #[test]
    fn persistent_channel_never_expires() {
        let channel = short_lived("/chat/room1");
        channel.set_persistent(true);
        assert_eq!(channel.expiration(), None);
        assert!(!channel.has_expired(FAR_FUTURE));

        channel.set_persistent(false);
        assert!(channel.has_expired(FAR_FUTURE));
    }

    #[test]
    fn subscribers_pin_until_last_leaves() {
        let channel = short_lived("/chat/room1");
        channel.subscribe(Arc::new(RecordingSession::new("a")));
        channel.subscribe(Arc::new(RecordingSession::new("b")));
        assert!(!channel.has_expired(FAR_FUTURE));

        channel.unsubscribe("a");
        assert!(!channel.has_expired(FAR_FUTURE));

        let before = now_millis();
        channel.unsubscribe("b");
        let expiration = channel.expiration().expect("window recomputed");
        assert!(expiration >= before + 10);
        assert!(channel.has_expired(FAR_FUTURE));
    }

    #[test]
    fn weak_listeners_do_not_pin() {
        let channel = short_lived("/chat/room1");
        let weak = channel.add_listener(
            ChannelListener::message(MessageFilter::new(|_view: &MessageView<'_>| true)),
            ListenerStrength::Weak,
        );
        assert!(channel.has_expired(FAR_FUTURE));

        let strong = channel.add_listener(
            ChannelListener::message(MessageFilter::new(|_view: &MessageView<'_>| true)),
            ListenerStrength::Strong,
        );
        assert!(!channel.has_expired(FAR_FUTURE));

        assert!(channel.remove_listener(weak));
        assert!(!channel.has_expired(FAR_FUTURE));
        assert!(channel.remove_listener(strong));
        assert!(!channel.remove_listener(strong));
        assert!(channel.has_expired(FAR_FUTURE));
    }

    #[test]
    fn veto_drops_only_matching_messages() {
        let channel = channel("/chat/room1");
        channel.add_listener(
            ChannelListener::message(MessageFilter::new(|view: &MessageView<'_>| {
                view.message().data["text"] != "m1"
            })),
            ListenerStrength::Strong,
        );
        let session = Arc::new(RecordingSession::new("s-1"));
        channel.subscribe(session.clone());

        let reached = channel.send(
            &packet(&channel, None, &[json!({"text": "m1"}), json!({"text": "m2"})]),
            &mut HashSet::new(),
        );
        assert_eq!(reached, 1);

        let received = session.take_received();
        assert_eq!(received.len(), 1);
        let bodies: Vec<_> = received[0].packet().messages().iter().map(|m| m.data.clone()).collect();
        assert_eq!(bodies, vec![json!({"text": "m2"})]);
    }

    #[test]
    fn first_rejection_skips_later_listeners_for_that_message_only() {
        let channel = channel("/chat/room1");
        let later_calls = Arc::new(AtomicUsize::new(0));
        channel.add_listener(
            ChannelListener::message(MessageFilter::new(|view: &MessageView<'_>| {
                view.message().data != json!(1)
            })),
            ListenerStrength::Strong,
        );
        let counter = Arc::clone(&later_calls);
        channel.add_listener(
            ChannelListener::message(MessageFilter::new(move |_view: &MessageView<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            })),
            ListenerStrength::Strong,
        );

        let promoted = channel.on_message_sent(&packet(&channel, None, &[json!(1), json!(2), json!(3)]));
        let bodies: Vec<_> = promoted.messages().iter().map(|m| m.data.clone()).collect();
        assert_eq!(bodies, vec![json!(2), json!(3)]);
        assert_eq!(later_calls.load(Ordering::SeqCst), 2);
    }

    struct Failing;

    impl MessageListener for Failing {
        fn on_message(&self, _view: &MessageView<'_>, _promise: Promise) -> Result<(), ListenerError> {
            Err(ListenerError::Failed("boom".into()))
        }
    }

    struct Forgetful;

    impl MessageListener for Forgetful {
        fn on_message(&self, _view: &MessageView<'_>, promise: Promise) -> Result<(), ListenerError> {
            drop(promise);
            Ok(())
        }
    }

    struct Deferred;

    impl MessageListener for Deferred {
        fn on_message(&self, view: &MessageView<'_>, promise: Promise) -> Result<(), ListenerError> {
            let accept = view.message().id.is_some();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                promise.complete(accept);
            });
            Ok(())
        }
    }

    #[test]
    fn failing_or_abandoning_listener_rejects_without_propagating() {
        for listener in [ChannelListener::message(Failing), ChannelListener::message(Forgetful)] {
            let channel = channel("/chat/room1");
            channel.add_listener(listener, ListenerStrength::Strong);
            let promoted = channel.on_message_sent(&packet(&channel, None, &[json!("x")]));
            assert!(promoted.is_empty());
        }
    }

    #[test]
    fn asynchronous_decisions_are_awaited_per_message() {
        let channel = channel("/chat/room1");
        channel.add_listener(ChannelListener::message(Deferred), ListenerStrength::Strong);
        let source = Packet::new(
            None,
            channel.id().clone(),
            vec![
                Message::new(json!("keep")).with_id("1"),
                Message::new(json!("drop")),
                Message::new(json!("keep too")).with_id("3"),
            ],
        );

        let promoted = channel.on_message_sent(&source);
        let ids: Vec<_> = promoted.messages().iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![Some("1".to_string()), Some("3".to_string())]);
    }

    #[test]
    fn fully_vetoed_packet_is_not_sent() {
        let channel = channel("/chat/room1");
        channel.add_listener(
            ChannelListener::message(MessageFilter::new(|_view: &MessageView<'_>| false)),
            ListenerStrength::Strong,
        );
        let session = Arc::new(RecordingSession::new("s-1"));
        channel.subscribe(session.clone());

        assert_eq!(channel.send(&packet(&channel, None, &[json!(1)]), &mut HashSet::new()), 0);
        assert_eq!(session.received_count(), 0);
    }

    #[test]
    fn send_skips_sessions_already_delivered() {
        let channel = channel("/chat/room1");
        let a = Arc::new(RecordingSession::new("a"));
        let b = Arc::new(RecordingSession::new("b"));
        channel.subscribe(a.clone());
        channel.subscribe(b.clone());

        let mut delivered = HashSet::from(["a".to_string()]);
        assert_eq!(channel.send(&packet(&channel, None, &[json!(1)]), &mut delivered), 1);
        assert_eq!(a.received_count(), 0);
        assert_eq!(b.received_count(), 1);
        assert!(delivered.contains("b"));
    }

    #[test]
    fn publisher_excluded_when_broadcast_disabled() {
        let channel = channel("/chat/room1");
        let publisher = Arc::new(RecordingSession::new("pub"));
        let other = Arc::new(RecordingSession::new("other"));
        channel.subscribe(publisher.clone());
        channel.subscribe(other.clone());

        channel.send(&packet(&channel, Some("pub"), &[json!(1)]), &mut HashSet::new());
        assert_eq!(publisher.received_count(), 1);

        channel.set_broadcast_to_publisher(false);
        channel.send(&packet(&channel, Some("pub"), &[json!(2)]), &mut HashSet::new());
        assert_eq!(publisher.received_count(), 1);
        assert_eq!(other.received_count(), 2);
    }

    #[test]
    fn closed_session_does_not_stop_fan_out() {
        let channel = channel("/chat/room1");
        let closed = Arc::new(RecordingSession::new("closed"));
        let open = Arc::new(RecordingSession::new("open"));
        closed.close();
        channel.subscribe(closed);
        channel.subscribe(open.clone());

        assert_eq!(channel.send(&packet(&channel, None, &[json!(1)]), &mut HashSet::new()), 1);
        assert_eq!(open.received_count(), 1);
    }

    #[test]
    fn lazy_channel_wraps_with_flush_deadline() {
        let channel = channel("/chat/room1");
        let session = Arc::new(RecordingSession::new("s-1"));
        channel.subscribe(session.clone());

        channel.set_lazy(true);
        let before = now_millis();
        channel.send(&packet(&channel, None, &[json!(1)]), &mut HashSet::new());
        let deadline = session.take_received()[0].flush_deadline().expect("lazy");
        assert!(deadline >= before + 5_000);

        channel.set_lazy(false);
        channel.set_lazy_timeout_millis(250);
        assert!(channel.is_lazy());
        let before = now_millis();
        channel.send(&packet(&channel, None, &[json!(2)]), &mut HashSet::new());
        let deadline = session.take_received()[0].flush_deadline().expect("lazy");
        assert!(deadline >= before + 250 && deadline < before + 5_000);
    }

    #[test]
    fn attributes_round_trip() {
        let channel = channel("/chat/room1");
        assert_eq!(channel.set_attribute("owner", json!("ops")), None);
        assert_eq!(channel.set_attribute("owner", json!("dev")), Some(json!("ops")));
        assert_eq!(channel.attribute("owner"), Some(json!("dev")));
        assert_eq!(channel.attribute_names(), vec!["owner".to_string()]);
        assert_eq!(channel.remove_attribute("owner"), Some(json!("dev")));
        assert_eq!(channel.attribute("owner"), None);
    }

    #[test]
    fn unsubscribe_all_notifies_for_each_session() {
        let channel = short_lived("/chat/room1");
        let counts = Arc::new(CountingSubscriptions::default());
        channel.add_listener(
            ChannelListener::subscription(Arc::clone(&counts)),
            ListenerStrength::Weak,
        );
        channel.subscribe(Arc::new(RecordingSession::new("a")));
        channel.subscribe(Arc::new(RecordingSession::new("b")));

        assert_eq!(channel.unsubscribe_all(), 2);
        assert_eq!(counts.left.load(Ordering::SeqCst), 2);
        assert!(channel.has_expired(FAR_FUTURE));
    }
}
