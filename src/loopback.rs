//! In-memory provider for tests and local development.
//!
//! A [`Broker`] keeps every queue and topic subscription of one process. Sessions created from it
//! support the queue and topic domains, temporary destinations, durable and shared subscriptions,
//! transactions and client acknowledgement.
//!
//! Limitations:
//! - message selectors are rejected with `InvalidSelector`
//! - asynchronous listeners are not supported, consumers receive synchronously
//! - delivery delay is ignored, messages are delivered as soon as they are sent
use crate::consumer::{
    normalize_timeout, ConsumerOptions, MessageConsumer, MessageListener, QueueBrowser, QueueReceiver,
    TopicSubscriber,
};
use crate::delivery::SendOptions;
use crate::destination::{
    Destination, DestinationKind, DestinationRef, Queue, TemporaryQueue, TemporaryTopic, Topic,
};
use crate::error::JmsError;
use crate::message::{now_millis, Acknowledger, Message};
use crate::producer::{
    prepare_send, CompletionListener, MessageProducer, ProducerSettings, QueueSender, TopicPublisher,
};
use crate::session::{AcknowledgeMode, QueueSession, Session, TopicSession};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

static TEMPORARY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, JmsError> {
    mutex
        .lock()
        .map_err(|_| JmsError::resource_allocation("Loopback broker state is poisoned"))
}

fn check_name(name: &str) -> Result<(), JmsError> {
    if name.trim().is_empty() {
        return Err(JmsError::invalid_destination("Destination name must not be empty"));
    }
    Ok(())
}

fn reject_selector(selector: Option<&str>) -> Result<(), JmsError> {
    match selector {
        Some(selector) if !selector.trim().is_empty() => Err(JmsError::invalid_selector(format!(
            "Loopback consumers do not evaluate selectors: `{}`",
            selector
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackQueue {
    name: String,
}

impl Destination for LoopbackQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Queue
    }
}

impl Queue for LoopbackQueue {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackTopic {
    name: String,
}

impl Destination for LoopbackTopic {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DestinationKind {
        DestinationKind::Topic
    }
}

impl Topic for LoopbackTopic {}

/// Temporary destination of either domain, removed from the broker on `delete`.
#[derive(Debug, Clone)]
pub struct LoopbackTemporary {
    name: String,
    kind: DestinationKind,
    broker: Weak<BrokerState>,
    deleted: Arc<AtomicBool>,
}

impl LoopbackTemporary {
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn delete_from_broker(&self) -> Result<(), JmsError> {
        if self.is_deleted() {
            return Ok(());
        }
        if let Some(state) = self.broker.upgrade() {
            Broker { state }.remove_temporary(self)?;
        }
        self.deleted.store(true, Ordering::Release);
        debug!(name = %self.name, "Deleted temporary destination");
        Ok(())
    }
}

impl Destination for LoopbackTemporary {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DestinationKind {
        self.kind
    }
}

impl Queue for LoopbackTemporary {}

impl Topic for LoopbackTemporary {}

#[async_trait]
impl TemporaryQueue for LoopbackTemporary {
    async fn delete(&self) -> Result<(), JmsError> {
        self.delete_from_broker()
    }
}

#[async_trait]
impl TemporaryTopic for LoopbackTemporary {
    async fn delete(&self) -> Result<(), JmsError> {
        self.delete_from_broker()
    }
}

#[derive(Debug, Default)]
struct Mailbox {
    messages: Mutex<VecDeque<Message>>,
    notify: Notify,
    consumers: AtomicUsize,
}

impl Mailbox {
    fn push(&self, message: Message) -> Result<(), JmsError> {
        lock(&self.messages)?.push_back(message);
        self.notify.notify_waiters();
        Ok(())
    }

    fn push_front(&self, message: Message) -> Result<(), JmsError> {
        lock(&self.messages)?.push_front(message);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Next unexpired message. Expired messages are dropped.
    fn pop(&self) -> Result<Option<Message>, JmsError> {
        let mut messages = lock(&self.messages)?;
        let now = now_millis();
        while let Some(message) = messages.pop_front() {
            let expiration = message.headers().expiration();
            if expiration != 0 && expiration <= now {
                trace!(expiration, "Dropping expired message");
                continue;
            }
            return Ok(Some(message));
        }
        Ok(None)
    }

    fn snapshot(&self) -> Result<Vec<Message>, JmsError> {
        Ok(lock(&self.messages)?.iter().cloned().collect())
    }
}

#[derive(Debug)]
struct Subscription {
    name: Option<String>,
    durable: bool,
    shared: bool,
    mailbox: Arc<Mailbox>,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, Arc<Mailbox>>>,
    topics: Mutex<HashMap<String, Vec<Subscription>>>,
}

/// Process local message broker.
#[derive(Debug, Clone, Default)]
pub struct Broker {
    state: Arc<BrokerState>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, mode: AcknowledgeMode) -> LoopbackSession {
        LoopbackSession {
            inner: Arc::new(SessionState {
                broker: self.clone(),
                mode,
                closed: AtomicBool::new(false),
                consumers: Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                unacked: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Number of messages waiting on queue `name`.
    pub fn queue_depth(&self, name: &str) -> Result<usize, JmsError> {
        let queues = lock(&self.state.queues)?;
        match queues.get(name) {
            Some(mailbox) => Ok(lock(&mailbox.messages)?.len()),
            None => Ok(0),
        }
    }

    /// Queues plus topics currently known to the broker.
    #[cfg(test)]
    pub(crate) fn destination_count(&self) -> Result<usize, JmsError> {
        Ok(lock(&self.state.queues)?.len() + lock(&self.state.topics)?.len())
    }

    fn queue(&self, destination: &dyn Destination) -> Result<Arc<Mailbox>, JmsError> {
        let mut queues = lock(&self.state.queues)?;
        if let Some(mailbox) = queues.get(destination.name()) {
            return Ok(Arc::clone(mailbox));
        }
        if destination.kind().is_temporary() {
            return Err(JmsError::invalid_destination(format!(
                "Temporary queue `{}` does not exist",
                destination.name()
            )));
        }
        let mailbox = Arc::new(Mailbox::default());
        queues.insert(destination.name().to_owned(), Arc::clone(&mailbox));
        Ok(mailbox)
    }

    fn route(&self, message: Message) -> Result<(), JmsError> {
        let destination = match message.headers().destination() {
            Some(destination) => Arc::clone(destination),
            None => {
                return Err(JmsError::invalid_destination(
                    "Message has no destination header",
                ))
            }
        };
        if destination.kind().is_queue() {
            return self.queue(destination.as_ref())?.push(message);
        }
        let topics = lock(&self.state.topics)?;
        match topics.get(destination.name()) {
            Some(subscriptions) => {
                for subscription in subscriptions {
                    subscription.mailbox.push(message.clone())?;
                }
                Ok(())
            }
            None if destination.kind().is_temporary() => Err(JmsError::invalid_destination(format!(
                "Temporary topic `{}` does not exist",
                destination.name()
            ))),
            None => Ok(()),
        }
    }

    fn subscribe(
        &self,
        topic: &dyn Destination,
        name: Option<&str>,
        durable: bool,
        shared: bool,
    ) -> Result<Arc<Mailbox>, JmsError> {
        if !topic.kind().is_topic() {
            return Err(JmsError::invalid_destination(format!(
                "`{}` is not a topic",
                topic.name()
            )));
        }
        let mut topics = lock(&self.state.topics)?;
        if topic.kind().is_temporary() && !topics.contains_key(topic.name()) {
            return Err(JmsError::invalid_destination(format!(
                "Temporary topic `{}` does not exist",
                topic.name()
            )));
        }
        let subscriptions = topics.entry(topic.name().to_owned()).or_default();
        if let Some(name) = name {
            let existing = subscriptions
                .iter_mut()
                .find(|s| s.name.as_deref() == Some(name) && s.durable == durable);
            if let Some(existing) = existing {
                let active = existing.mailbox.consumers.load(Ordering::Acquire);
                if active > 0 && !(shared && existing.shared) {
                    return Err(JmsError::illegal_state(format!(
                        "Subscription `{}` already has an active consumer",
                        name
                    )));
                }
                existing.shared = shared;
                existing.mailbox.consumers.fetch_add(1, Ordering::AcqRel);
                return Ok(Arc::clone(&existing.mailbox));
            }
        }
        let mailbox = Arc::new(Mailbox::default());
        mailbox.consumers.store(1, Ordering::Release);
        subscriptions.push(Subscription {
            name: name.map(str::to_owned),
            durable,
            shared,
            mailbox: Arc::clone(&mailbox),
        });
        Ok(mailbox)
    }

    fn release(&self, consumer: &ConsumerState) -> Result<(), JmsError> {
        if consumer.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let remaining = consumer.mailbox.consumers.fetch_sub(1, Ordering::AcqRel) - 1;
        consumer.mailbox.notify.notify_waiters();
        if remaining == 0 && consumer.topic {
            let mut topics = lock(&self.state.topics)?;
            for subscriptions in topics.values_mut() {
                subscriptions.retain(|s| s.durable || !Arc::ptr_eq(&s.mailbox, &consumer.mailbox));
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, name: &str) -> Result<(), JmsError> {
        let mut topics = lock(&self.state.topics)?;
        for subscriptions in topics.values_mut() {
            let position = subscriptions
                .iter()
                .position(|s| s.durable && s.name.as_deref() == Some(name));
            if let Some(position) = position {
                if subscriptions[position].mailbox.consumers.load(Ordering::Acquire) > 0 {
                    return Err(JmsError::illegal_state(format!(
                        "Durable subscription `{}` has an active consumer",
                        name
                    )));
                }
                subscriptions.remove(position);
                return Ok(());
            }
        }
        Err(JmsError::invalid_destination(format!(
            "No durable subscription named `{}`",
            name
        )))
    }

    fn create_temporary(&self, kind: DestinationKind) -> Result<LoopbackTemporary, JmsError> {
        let sequence = TEMPORARY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let name = if kind.is_queue() {
            let name = format!("loopback.temporary-queue.{}", sequence);
            lock(&self.state.queues)?.insert(name.clone(), Arc::new(Mailbox::default()));
            name
        } else {
            let name = format!("loopback.temporary-topic.{}", sequence);
            lock(&self.state.topics)?.insert(name.clone(), Vec::new());
            name
        };
        debug!(name = %name, "Created temporary destination");
        Ok(LoopbackTemporary {
            name,
            kind,
            broker: Arc::downgrade(&self.state),
            deleted: Arc::new(AtomicBool::new(false)),
        })
    }

    fn remove_temporary(&self, temporary: &LoopbackTemporary) -> Result<(), JmsError> {
        let in_use = || {
            JmsError::illegal_state(format!(
                "Temporary destination `{}` still has consumers",
                temporary.name
            ))
        };
        if temporary.kind.is_queue() {
            let mut queues = lock(&self.state.queues)?;
            if let Some(mailbox) = queues.get(&temporary.name) {
                if mailbox.consumers.load(Ordering::Acquire) > 0 {
                    return Err(in_use());
                }
            }
            queues.remove(&temporary.name);
        } else {
            let mut topics = lock(&self.state.topics)?;
            if let Some(subscriptions) = topics.get(&temporary.name) {
                if !subscriptions.is_empty() {
                    return Err(in_use());
                }
            }
            topics.remove(&temporary.name);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ConsumerState {
    mailbox: Arc<Mailbox>,
    topic: bool,
    closed: AtomicBool,
}

#[derive(Debug)]
struct SessionState {
    broker: Broker,
    mode: AcknowledgeMode,
    closed: AtomicBool,
    consumers: Mutex<Vec<Arc<ConsumerState>>>,
    /// Sends held back until commit.
    pending: Mutex<Vec<Message>>,
    /// Received messages not yet acknowledged or committed.
    unacked: Mutex<Vec<(Arc<Mailbox>, Message)>>,
}

impl SessionState {
    fn check_open(&self) -> Result<(), JmsError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(JmsError::illegal_state("Session is closed"));
        }
        Ok(())
    }

    fn check_transacted(&self, operation: &str) -> Result<(), JmsError> {
        self.check_open()?;
        if self.mode != AcknowledgeMode::SessionTransacted {
            return Err(JmsError::illegal_state(format!(
                "Cannot {} a session that is not transacted",
                operation
            )));
        }
        Ok(())
    }

    fn dispatch(&self, message: Message) -> Result<(), JmsError> {
        self.check_open()?;
        if self.mode == AcknowledgeMode::SessionTransacted {
            lock(&self.pending)?.push(message);
            return Ok(());
        }
        self.broker.route(message)
    }

    fn delivered(
        self: &Arc<Self>,
        mailbox: &Arc<Mailbox>,
        mut message: Message,
    ) -> Result<Message, JmsError> {
        match self.mode {
            AcknowledgeMode::AutoAcknowledge | AcknowledgeMode::DupsOkAcknowledge => {}
            AcknowledgeMode::ClientAcknowledge => {
                message.set_acknowledger(Arc::new(SessionAcknowledger {
                    session: Arc::downgrade(self),
                }));
                lock(&self.unacked)?.push((Arc::clone(mailbox), message.clone()));
            }
            AcknowledgeMode::SessionTransacted => {
                lock(&self.unacked)?.push((Arc::clone(mailbox), message.clone()));
            }
        }
        Ok(message)
    }

    fn redeliver_unacked(&self) -> Result<(), JmsError> {
        let unacked: Vec<_> = lock(&self.unacked)?.drain(..).collect();
        for (mailbox, mut message) in unacked.into_iter().rev() {
            message.headers_mut().set_redelivered(true);
            mailbox.push_front(message)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct SessionAcknowledger {
    session: Weak<SessionState>,
}

impl Acknowledger for SessionAcknowledger {
    fn acknowledge(&self) -> Result<(), JmsError> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| JmsError::illegal_state("Session is closed"))?;
        session.check_open()?;
        lock(&session.unacked)?.clear();
        Ok(())
    }
}

/// Session on a [`Broker`].
#[derive(Debug, Clone)]
pub struct LoopbackSession {
    inner: Arc<SessionState>,
}

impl LoopbackSession {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn attach(
        &self,
        destination: DestinationRef,
        mailbox: Arc<Mailbox>,
        options: ConsumerOptions,
    ) -> Result<LoopbackConsumer, JmsError> {
        let state = Arc::new(ConsumerState {
            mailbox,
            topic: destination.kind().is_topic(),
            closed: AtomicBool::new(false),
        });
        lock(&self.inner.consumers)?.push(Arc::clone(&state));
        Ok(LoopbackConsumer {
            session: Arc::clone(&self.inner),
            state,
            destination,
            no_local: options.no_local,
        })
    }
}

#[async_trait]
impl Session for LoopbackSession {
    type Queue = LoopbackQueue;
    type Topic = LoopbackTopic;
    type TemporaryQueue = LoopbackTemporary;
    type TemporaryTopic = LoopbackTemporary;
    type Producer = LoopbackProducer;
    type Consumer = LoopbackConsumer;
    type Browser = LoopbackBrowser;

    fn acknowledge_mode(&self) -> AcknowledgeMode {
        self.inner.mode
    }

    async fn commit(&self) -> Result<(), JmsError> {
        self.inner.check_transacted("commit")?;
        let pending: Vec<_> = lock(&self.inner.pending)?.drain(..).collect();
        for message in pending {
            self.inner.broker.route(message)?;
        }
        lock(&self.inner.unacked)?.clear();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), JmsError> {
        self.inner.check_transacted("roll back")?;
        lock(&self.inner.pending)?.clear();
        self.inner.redeliver_unacked()
    }

    async fn recover(&self) -> Result<(), JmsError> {
        self.inner.check_open()?;
        match self.inner.mode {
            AcknowledgeMode::SessionTransacted => {
                Err(JmsError::illegal_state("Cannot recover a transacted session"))
            }
            _ => self.inner.redeliver_unacked(),
        }
    }

    async fn close(&self) -> Result<(), JmsError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        lock(&self.inner.pending)?.clear();
        self.inner.redeliver_unacked()?;
        let consumers: Vec<_> = lock(&self.inner.consumers)?.drain(..).collect();
        for consumer in consumers {
            self.inner.broker.release(&consumer)?;
        }
        debug!(mode = ?self.inner.mode, "Closed loopback session");
        Ok(())
    }

    fn message_listener(&self) -> Option<Arc<dyn MessageListener>> {
        None
    }

    fn set_message_listener(&self, _listener: Option<Arc<dyn MessageListener>>) -> Result<(), JmsError> {
        Err(JmsError::illegal_state(
            "Loopback sessions have no distinguished listener",
        ))
    }

    async fn run(&self) -> Result<(), JmsError> {
        Err(JmsError::illegal_state(
            "Loopback sessions have no distinguished listener",
        ))
    }

    fn create_queue(&self, name: &str) -> Result<LoopbackQueue, JmsError> {
        self.inner.check_open()?;
        check_name(name)?;
        Ok(LoopbackQueue { name: name.to_owned() })
    }

    fn create_topic(&self, name: &str) -> Result<LoopbackTopic, JmsError> {
        self.inner.check_open()?;
        check_name(name)?;
        Ok(LoopbackTopic { name: name.to_owned() })
    }

    async fn create_temporary_queue(&self) -> Result<LoopbackTemporary, JmsError> {
        self.inner.check_open()?;
        self.inner.broker.create_temporary(DestinationKind::TemporaryQueue)
    }

    async fn create_temporary_topic(&self) -> Result<LoopbackTemporary, JmsError> {
        self.inner.check_open()?;
        self.inner.broker.create_temporary(DestinationKind::TemporaryTopic)
    }

    async fn create_producer(&self, destination: Option<DestinationRef>) -> Result<LoopbackProducer, JmsError> {
        self.inner.check_open()?;
        if let Some(destination) = &destination {
            check_name(destination.name())?;
        }
        Ok(LoopbackProducer {
            session: Arc::clone(&self.inner),
            destination,
            settings: Mutex::new(ProducerSettings::default()),
            closed: AtomicBool::new(false),
        })
    }

    async fn create_consumer(
        &self,
        destination: DestinationRef,
        options: ConsumerOptions,
    ) -> Result<LoopbackConsumer, JmsError> {
        self.inner.check_open()?;
        reject_selector(options.selector.as_deref())?;
        let mailbox = if destination.kind().is_queue() {
            let mailbox = self.inner.broker.queue(destination.as_ref())?;
            mailbox.consumers.fetch_add(1, Ordering::AcqRel);
            mailbox
        } else {
            self.inner
                .broker
                .subscribe(destination.as_ref(), None, false, false)?
        };
        self.attach(destination, mailbox, options)
    }

    async fn create_shared_consumer(
        &self,
        topic: DestinationRef,
        subscription: &str,
        selector: Option<&str>,
    ) -> Result<LoopbackConsumer, JmsError> {
        self.inner.check_open()?;
        reject_selector(selector)?;
        let mailbox = self
            .inner
            .broker
            .subscribe(topic.as_ref(), Some(subscription), false, true)?;
        self.attach(topic, mailbox, ConsumerOptions::new())
    }

    async fn create_durable_consumer(
        &self,
        topic: DestinationRef,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<LoopbackConsumer, JmsError> {
        self.inner.check_open()?;
        reject_selector(options.selector.as_deref())?;
        let mailbox = self
            .inner
            .broker
            .subscribe(topic.as_ref(), Some(name), true, false)?;
        self.attach(topic, mailbox, options)
    }

    async fn create_shared_durable_consumer(
        &self,
        topic: DestinationRef,
        name: &str,
        selector: Option<&str>,
    ) -> Result<LoopbackConsumer, JmsError> {
        self.inner.check_open()?;
        reject_selector(selector)?;
        let mailbox = self
            .inner
            .broker
            .subscribe(topic.as_ref(), Some(name), true, true)?;
        self.attach(topic, mailbox, ConsumerOptions::new())
    }

    async fn create_browser(
        &self,
        queue: DestinationRef,
        selector: Option<&str>,
    ) -> Result<LoopbackBrowser, JmsError> {
        self.inner.check_open()?;
        reject_selector(selector)?;
        if !queue.kind().is_queue() {
            return Err(JmsError::invalid_destination(format!(
                "Cannot browse `{}`, it is not a queue",
                queue.name()
            )));
        }
        let mailbox = self.inner.broker.queue(queue.as_ref())?;
        Ok(LoopbackBrowser {
            queue,
            mailbox,
            closed: AtomicBool::new(false),
        })
    }

    async fn unsubscribe(&self, name: &str) -> Result<(), JmsError> {
        self.inner.check_open()?;
        self.inner.broker.unsubscribe(name)
    }
}

#[async_trait]
impl QueueSession for LoopbackSession {
    type Receiver = LoopbackConsumer;
    type Sender = LoopbackProducer;

    async fn create_receiver(
        &self,
        queue: DestinationRef,
        selector: Option<&str>,
    ) -> Result<LoopbackConsumer, JmsError> {
        if !queue.kind().is_queue() {
            return Err(JmsError::invalid_destination(format!(
                "`{}` is not a queue",
                queue.name()
            )));
        }
        let options = match selector {
            Some(selector) => ConsumerOptions::new().with_selector(selector),
            None => ConsumerOptions::new(),
        };
        self.create_consumer(queue, options).await
    }

    async fn create_sender(&self, queue: Option<DestinationRef>) -> Result<LoopbackProducer, JmsError> {
        if let Some(queue) = &queue {
            if !queue.kind().is_queue() {
                return Err(JmsError::invalid_destination(format!(
                    "`{}` is not a queue",
                    queue.name()
                )));
            }
        }
        self.create_producer(queue).await
    }
}

#[async_trait]
impl TopicSession for LoopbackSession {
    type Subscriber = LoopbackConsumer;
    type Publisher = LoopbackProducer;

    async fn create_subscriber(
        &self,
        topic: DestinationRef,
        options: ConsumerOptions,
    ) -> Result<LoopbackConsumer, JmsError> {
        if !topic.kind().is_topic() {
            return Err(JmsError::invalid_destination(format!(
                "`{}` is not a topic",
                topic.name()
            )));
        }
        self.create_consumer(topic, options).await
    }

    async fn create_durable_subscriber(
        &self,
        topic: DestinationRef,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<LoopbackConsumer, JmsError> {
        self.create_durable_consumer(topic, name, options).await
    }

    async fn create_publisher(&self, topic: Option<DestinationRef>) -> Result<LoopbackProducer, JmsError> {
        if let Some(topic) = &topic {
            if !topic.kind().is_topic() {
                return Err(JmsError::invalid_destination(format!(
                    "`{}` is not a topic",
                    topic.name()
                )));
            }
        }
        self.create_producer(topic).await
    }
}

#[derive(Debug)]
pub struct LoopbackProducer {
    session: Arc<SessionState>,
    destination: Option<DestinationRef>,
    settings: Mutex<ProducerSettings>,
    closed: AtomicBool,
}

impl LoopbackProducer {
    fn check_open(&self) -> Result<(), JmsError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(JmsError::illegal_state("Producer is closed"));
        }
        self.session.check_open()
    }

    fn current_settings(&self) -> Result<ProducerSettings, JmsError> {
        Ok(*lock(&self.settings)?)
    }

    fn deliver(
        &self,
        message: &mut Message,
        explicit: Option<DestinationRef>,
        options: SendOptions,
    ) -> Result<(), JmsError> {
        self.check_open()?;
        let settings = self.current_settings()?;
        let sent = prepare_send(message, self.destination.as_ref(), explicit, options, &settings)?;
        self.session.dispatch(sent)
    }
}

#[async_trait]
impl MessageProducer for LoopbackProducer {
    fn settings(&self) -> ProducerSettings {
        match self.current_settings() {
            Ok(settings) => settings,
            Err(e) => {
                warn!(error = %e, "Reporting default producer settings");
                ProducerSettings::default()
            }
        }
    }

    fn set_settings(&self, settings: ProducerSettings) -> Result<(), JmsError> {
        self.check_open()?;
        *lock(&self.settings)? = settings;
        Ok(())
    }

    fn destination(&self) -> Option<DestinationRef> {
        self.destination.clone()
    }

    async fn send_with(&self, message: &mut Message, options: SendOptions) -> Result<(), JmsError> {
        self.deliver(message, None, options)
    }

    async fn send_to(
        &self,
        destination: DestinationRef,
        message: &mut Message,
        options: Option<SendOptions>,
    ) -> Result<(), JmsError> {
        let options = match options {
            Some(options) => options,
            None => self.current_settings()?.send_options(),
        };
        self.deliver(message, Some(destination), options)
    }

    async fn send_async(
        &self,
        destination: Option<DestinationRef>,
        mut message: Message,
        listener: Arc<dyn CompletionListener>,
    ) -> Result<(), JmsError> {
        self.check_open()?;
        let options = self.current_settings()?.send_options();
        match self.deliver(&mut message, destination, options) {
            Ok(()) => listener.on_completion(&message),
            Err(e) => listener.on_exception(&message, e),
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), JmsError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

impl QueueSender for LoopbackProducer {}

impl TopicPublisher for LoopbackProducer {}

#[derive(Debug)]
pub struct LoopbackConsumer {
    session: Arc<SessionState>,
    state: Arc<ConsumerState>,
    destination: DestinationRef,
    no_local: bool,
}

impl LoopbackConsumer {
    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::Acquire)
    }

    fn take(&self) -> Result<Option<Message>, JmsError> {
        match self.state.mailbox.pop()? {
            Some(message) => self
                .session
                .delivered(&self.state.mailbox, message)
                .map(Some),
            None => Ok(None),
        }
    }

    async fn next(&self) -> Result<Option<Message>, JmsError> {
        loop {
            let notified = self.state.mailbox.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return Ok(None);
            }
            if let Some(message) = self.take()? {
                return Ok(Some(message));
            }
            notified.await;
        }
    }
}

#[async_trait]
impl MessageConsumer for LoopbackConsumer {
    fn message_selector(&self) -> Option<&str> {
        None
    }

    fn message_listener(&self) -> Option<Arc<dyn MessageListener>> {
        None
    }

    fn set_message_listener(&self, _listener: Option<Arc<dyn MessageListener>>) -> Result<(), JmsError> {
        Err(JmsError::illegal_state(
            "Loopback consumers only support synchronous receive",
        ))
    }

    async fn receive(&self) -> Result<Option<Message>, JmsError> {
        self.next().await
    }

    async fn receive_timeout(&self, timeout: Duration) -> Result<Option<Message>, JmsError> {
        match normalize_timeout(timeout) {
            None => self.next().await,
            Some(timeout) => match tokio::time::timeout(timeout, self.next()).await {
                Ok(received) => received,
                Err(_) => Ok(None),
            },
        }
    }

    async fn receive_no_wait(&self) -> Result<Option<Message>, JmsError> {
        if self.is_closed() {
            return Ok(None);
        }
        self.take()
    }

    async fn close(&self) -> Result<(), JmsError> {
        self.session.broker.release(&self.state)?;
        lock(&self.session.consumers)?.retain(|c| !Arc::ptr_eq(c, &self.state));
        Ok(())
    }
}

impl QueueReceiver for LoopbackConsumer {
    fn queue(&self) -> DestinationRef {
        Arc::clone(&self.destination)
    }
}

impl TopicSubscriber for LoopbackConsumer {
    fn topic(&self) -> DestinationRef {
        Arc::clone(&self.destination)
    }

    fn no_local(&self) -> bool {
        self.no_local
    }
}

#[derive(Debug)]
pub struct LoopbackBrowser {
    queue: DestinationRef,
    mailbox: Arc<Mailbox>,
    closed: AtomicBool,
}

#[async_trait]
impl QueueBrowser for LoopbackBrowser {
    fn queue(&self) -> DestinationRef {
        Arc::clone(&self.queue)
    }

    fn message_selector(&self) -> Option<&str> {
        None
    }

    async fn messages(&self) -> Result<Vec<Message>, JmsError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(JmsError::illegal_state("Browser is closed"));
        }
        self.mailbox.snapshot()
    }

    async fn close(&self) -> Result<(), JmsError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn init_log() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::destination_ref;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;

    fn queue(session: &LoopbackSession, name: &str) -> Result<DestinationRef, JmsError> {
        Ok(Arc::new(session.create_queue(name)?))
    }

    fn topic(session: &LoopbackSession, name: &str) -> Result<DestinationRef, JmsError> {
        Ok(Arc::new(session.create_topic(name)?))
    }

    #[tokio::test]
    async fn test_queue_point_to_point() -> Result<(), Box<dyn std::error::Error>> {
        init_log();
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let orders = queue(&session, "orders")?;

        let sender = session.create_sender(Some(Arc::clone(&orders))).await?;
        sender.send(&mut Message::text("first")).await?;
        sender.send(&mut Message::text("second")).await?;
        assert_eq!(broker.queue_depth("orders")?, 2);

        let receiver = session.create_receiver(Arc::clone(&orders), None).await?;
        let first = receiver.receive().await?.ok_or("no message")?;
        assert_eq!(first.get_text()?, Some("first"));
        assert!(first.headers().message_id().is_some());
        let second = receiver.receive_no_wait().await?.ok_or("no message")?;
        assert_eq!(second.get_text()?, Some("second"));
        assert_matches!(receiver.receive_no_wait().await, Ok(None));
        Ok(())
    }

    #[tokio::test]
    async fn test_receive_timeout_expires() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let receiver = session
            .create_consumer(queue(&session, "idle")?, ConsumerOptions::new())
            .await?;
        assert_matches!(receiver.receive_timeout(Duration::from_millis(20)).await, Ok(None));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_unblocks_receive() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let consumer = Arc::new(
            session
                .create_consumer(queue(&session, "blocked")?, ConsumerOptions::new())
                .await?,
        );

        let pending = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.close().await?;

        assert_matches!(pending.await?, Ok(None));
        assert!(session.is_closed());
        assert_matches!(
            session.create_queue("late"),
            Err(e) if e.kind() == ErrorKind::IllegalState
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_consumer_close_unblocks_receive() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let consumer = Arc::new(
            session
                .create_consumer(queue(&session, "idle")?, ConsumerOptions::new())
                .await?,
        );

        let pending = {
            let consumer = Arc::clone(&consumer);
            tokio::spawn(async move { consumer.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        consumer.close().await?;

        assert_matches!(pending.await?, Ok(None));
        assert!(!session.is_closed());
        assert_matches!(consumer.receive_no_wait().await, Ok(None));

        let producer = session.create_producer(Some(queue(&session, "idle")?)).await?;
        producer.send(&mut Message::text("after close")).await?;
        assert_eq!(broker.queue_depth("idle")?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_poisoned_settings_fall_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let producer = session.create_producer(None).await?;
        let mut settings = ProducerSettings::default();
        settings.set_priority(9)?;
        producer.set_settings(settings)?;
        assert_eq!(producer.settings().priority(), 9);

        let poisoned = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    let _guard = producer.settings.lock();
                    panic!("poison producer settings");
                })
                .join()
        });
        assert!(poisoned.is_err());

        assert_eq!(producer.settings(), ProducerSettings::default());
        assert_matches!(
            producer.set_settings(settings),
            Err(e) if e.kind() == ErrorKind::ResourceAllocation
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_topic_fan_out() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let prices = topic(&session, "prices")?;

        let a = session.create_subscriber(Arc::clone(&prices), ConsumerOptions::new()).await?;
        let b = session.create_subscriber(Arc::clone(&prices), ConsumerOptions::new()).await?;
        let publisher = session.create_publisher(Some(Arc::clone(&prices))).await?;
        publisher.publish(&mut Message::text("1.25")).await?;

        for subscriber in [&a, &b] {
            let message = subscriber.receive_no_wait().await?.ok_or("no message")?;
            assert_eq!(message.get_text()?, Some("1.25"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_durable_subscription_retains_messages() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let events = topic(&session, "events")?;

        let durable = session
            .create_durable_consumer(Arc::clone(&events), "audit", ConsumerOptions::new())
            .await?;
        assert_matches!(
            session
                .create_durable_consumer(Arc::clone(&events), "audit", ConsumerOptions::new())
                .await,
            Err(e) if e.kind() == ErrorKind::IllegalState
        );
        durable.close().await?;

        let producer = session.create_producer(None).await?;
        producer
            .send_to(Arc::clone(&events), &mut Message::text("while away"), None)
            .await?;

        let durable = session
            .create_durable_consumer(Arc::clone(&events), "audit", ConsumerOptions::new())
            .await?;
        let message = durable.receive_no_wait().await?.ok_or("no message")?;
        assert_eq!(message.get_text()?, Some("while away"));

        assert_matches!(
            session.unsubscribe("audit").await,
            Err(e) if e.kind() == ErrorKind::IllegalState
        );
        durable.close().await?;
        session.unsubscribe("audit").await?;
        assert_matches!(
            session.unsubscribe("audit").await,
            Err(e) if e.kind() == ErrorKind::InvalidDestination
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_shared_subscription_splits_messages() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let jobs = topic(&session, "jobs")?;

        let a = session.create_shared_consumer(Arc::clone(&jobs), "workers", None).await?;
        let b = session.create_shared_consumer(Arc::clone(&jobs), "workers", None).await?;
        let publisher = session.create_publisher(Some(Arc::clone(&jobs))).await?;
        publisher.publish(&mut Message::text("one")).await?;
        publisher.publish(&mut Message::text("two")).await?;

        let mut received = 0;
        for consumer in [&a, &b, &a, &b] {
            if consumer.receive_no_wait().await?.is_some() {
                received += 1;
            }
        }
        assert_eq!(received, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_transacted_session() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::SessionTransacted);
        let ledger = queue(&session, "ledger")?;
        let producer = session.create_producer(Some(Arc::clone(&ledger))).await?;

        producer.send(&mut Message::text("discarded")).await?;
        session.rollback().await?;
        assert_eq!(broker.queue_depth("ledger")?, 0);

        producer.send(&mut Message::text("kept")).await?;
        assert_eq!(broker.queue_depth("ledger")?, 0);
        session.commit().await?;
        assert_eq!(broker.queue_depth("ledger")?, 1);

        let consumer = session.create_consumer(Arc::clone(&ledger), ConsumerOptions::new()).await?;
        let message = consumer.receive_no_wait().await?.ok_or("no message")?;
        assert!(!message.headers().redelivered());
        session.rollback().await?;

        let message = consumer.receive_no_wait().await?.ok_or("no message")?;
        assert!(message.headers().redelivered());
        session.commit().await?;
        assert_eq!(broker.queue_depth("ledger")?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_transacted_commit_fails() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        assert_matches!(session.commit().await, Err(e) if e.kind() == ErrorKind::IllegalState);
        assert_matches!(session.rollback().await, Err(e) if e.kind() == ErrorKind::IllegalState);
        Ok(())
    }

    #[tokio::test]
    async fn test_client_acknowledge_and_recover() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::ClientAcknowledge);
        let inbox = queue(&session, "inbox")?;
        let producer = session.create_producer(Some(Arc::clone(&inbox))).await?;
        producer.send(&mut Message::text("a")).await?;
        producer.send(&mut Message::text("b")).await?;

        let consumer = session.create_consumer(Arc::clone(&inbox), ConsumerOptions::new()).await?;
        consumer.receive_no_wait().await?.ok_or("no message")?;
        session.recover().await?;

        let again = consumer.receive_no_wait().await?.ok_or("no message")?;
        assert_eq!(again.get_text()?, Some("a"));
        assert!(again.headers().redelivered());
        let b = consumer.receive_no_wait().await?.ok_or("no message")?;
        b.acknowledge()?;

        session.recover().await?;
        assert_matches!(consumer.receive_no_wait().await, Ok(None));
        Ok(())
    }

    #[tokio::test]
    async fn test_temporary_queue_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let temporary = session.create_temporary_queue().await?;
        let reply_to = destination_ref(&temporary);
        assert_eq!(reply_to.kind(), DestinationKind::TemporaryQueue);

        let consumer = session.create_consumer(Arc::clone(&reply_to), ConsumerOptions::new()).await?;
        assert_matches!(
            TemporaryQueue::delete(&temporary).await,
            Err(e) if e.kind() == ErrorKind::IllegalState
        );
        consumer.close().await?;
        TemporaryQueue::delete(&temporary).await?;
        assert!(temporary.is_deleted());

        let producer = session.create_producer(None).await?;
        assert_matches!(
            producer.send_to(reply_to, &mut Message::new(), None).await,
            Err(e) if e.kind() == ErrorKind::InvalidDestination
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_messages_are_dropped() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let stale = queue(&session, "stale")?;
        let producer = session.create_producer(Some(Arc::clone(&stale))).await?;
        let options = SendOptions::new(Default::default(), 4, Duration::from_millis(1))?;
        producer.send_with(&mut Message::text("soon gone"), options).await?;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let consumer = session.create_consumer(stale, ConsumerOptions::new()).await?;
        assert_matches!(consumer.receive_no_wait().await, Ok(None));
        Ok(())
    }

    #[tokio::test]
    async fn test_browser_and_selector_rejection() -> Result<(), Box<dyn std::error::Error>> {
        let broker = Broker::new();
        let session = broker.session(AcknowledgeMode::AutoAcknowledge);
        let backlog = queue(&session, "backlog")?;
        let producer = session.create_producer(Some(Arc::clone(&backlog))).await?;
        producer.send(&mut Message::text("peek")).await?;

        let browser = session.create_browser(Arc::clone(&backlog), None).await?;
        assert_eq!(browser.messages().await?.len(), 1);
        assert_eq!(broker.queue_depth("backlog")?, 1);
        browser.close().await?;
        assert_matches!(browser.messages().await, Err(e) if e.kind() == ErrorKind::IllegalState);

        assert_matches!(
            session
                .create_consumer(backlog, ConsumerOptions::new().with_selector("a = 1"))
                .await,
            Err(e) if e.kind() == ErrorKind::InvalidSelector
        );
        Ok(())
    }
}
