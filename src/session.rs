//!
//! Sessions: the single-threaded context for producing and consuming messages.
//!
use crate::body::MessageBody;
use crate::consumer::{
    ConsumerOptions, MessageConsumer, MessageListener, QueueBrowser, QueueReceiver, TopicSubscriber,
};
use crate::destination::{DestinationRef, Queue, TemporaryQueue, TemporaryTopic, Topic};
use crate::error::JmsError;
use crate::message::Message;
use crate::producer::{MessageProducer, QueueSender, TopicPublisher};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

/// How consumed messages are acknowledged.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcknowledgeMode {
    /// Acknowledgement happens on commit.
    SessionTransacted = 0,

    /// The session acknowledges each message as soon as `receive` returns or the listener
    /// returns.
    #[default]
    AutoAcknowledge = 1,

    /// The client acknowledges by calling [`Message::acknowledge`].
    ClientAcknowledge = 2,

    /// Lazy acknowledgement; duplicates are possible after a failure.
    DupsOkAcknowledge = 3,
}

impl AcknowledgeMode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// The classic `(transacted, mode)` pair: `mode` is ignored when `transacted` is set.
    pub fn from_transacted(transacted: bool, mode: AcknowledgeMode) -> AcknowledgeMode {
        if transacted {
            AcknowledgeMode::SessionTransacted
        } else {
            mode
        }
    }
}

impl TryFrom<i32> for AcknowledgeMode {
    type Error = JmsError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AcknowledgeMode::SessionTransacted),
            1 => Ok(AcknowledgeMode::AutoAcknowledge),
            2 => Ok(AcknowledgeMode::ClientAcknowledge),
            3 => Ok(AcknowledgeMode::DupsOkAcknowledge),
            other => Err(JmsError::generic(format!("Unknown session mode `{}`", other))),
        }
    }
}

/// Single-threaded context for producing and consuming messages.
///
/// Only one task may use a session, and the producers and consumers it created, at a time. The
/// one exception is [`MessageConsumer::close`]. Listeners registered on consumers of a session
/// are invoked one at a time and never overlap with a synchronous receive on the same session.
///
/// Destination arguments are checked by the provider: passing a destination of the wrong domain
/// or one it does not recognise fails with `InvalidDestination`.
#[async_trait]
pub trait Session: Send + Sync {
    type Queue: Queue + Clone;
    type Topic: Topic + Clone;
    type TemporaryQueue: TemporaryQueue + Clone;
    type TemporaryTopic: TemporaryTopic + Clone;
    type Producer: MessageProducer;
    type Consumer: MessageConsumer;
    type Browser: QueueBrowser;

    fn acknowledge_mode(&self) -> AcknowledgeMode;

    fn transacted(&self) -> bool {
        self.acknowledge_mode() == AcknowledgeMode::SessionTransacted
    }

    fn create_message(&self) -> Result<Message, JmsError> {
        Ok(Message::new())
    }

    fn create_text_message(&self, text: Option<String>) -> Result<Message, JmsError> {
        Ok(Message::with_body(MessageBody::Text(text)))
    }

    fn create_bytes_message(&self) -> Result<Message, JmsError> {
        Ok(Message::bytes())
    }

    fn create_map_message(&self) -> Result<Message, JmsError> {
        Ok(Message::map())
    }

    fn create_stream_message(&self) -> Result<Message, JmsError> {
        Ok(Message::stream())
    }

    fn create_object_message<T: Serialize>(&self, value: &T) -> Result<Message, JmsError> {
        Message::object(value)
    }

    /// Fails with `IllegalState` unless the session is transacted.
    async fn commit(&self) -> Result<(), JmsError>;

    async fn rollback(&self) -> Result<(), JmsError>;

    /// Stop delivery and restart it with the oldest unacknowledged message.
    async fn recover(&self) -> Result<(), JmsError>;

    /// Close the session and everything created from it. A closed session fails every further
    /// operation with `IllegalState`; closing twice is a no-op.
    async fn close(&self) -> Result<(), JmsError>;

    /// The distinguished listener used by application servers, see [`Session::run`].
    fn message_listener(&self) -> Option<Arc<dyn MessageListener>>;

    fn set_message_listener(&self, listener: Option<Arc<dyn MessageListener>>) -> Result<(), JmsError>;

    /// Deliver the messages loaded into this session by a connection consumer to its
    /// distinguished listener.
    async fn run(&self) -> Result<(), JmsError>;

    /// Get a provider queue by name. Does not create the physical queue.
    fn create_queue(&self, name: &str) -> Result<Self::Queue, JmsError>;

    fn create_topic(&self, name: &str) -> Result<Self::Topic, JmsError>;

    async fn create_temporary_queue(&self) -> Result<Self::TemporaryQueue, JmsError>;

    async fn create_temporary_topic(&self) -> Result<Self::TemporaryTopic, JmsError>;

    /// `None` creates an unidentified producer.
    async fn create_producer(&self, destination: Option<DestinationRef>) -> Result<Self::Producer, JmsError>;

    async fn create_consumer(
        &self,
        destination: DestinationRef,
        options: ConsumerOptions,
    ) -> Result<Self::Consumer, JmsError>;

    /// Non-durable subscription whose messages are shared between every consumer using the same
    /// subscription name.
    async fn create_shared_consumer(
        &self,
        topic: DestinationRef,
        subscription: &str,
        selector: Option<&str>,
    ) -> Result<Self::Consumer, JmsError>;

    /// Unshared durable subscription. Requires a client id on the connection.
    async fn create_durable_consumer(
        &self,
        topic: DestinationRef,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<Self::Consumer, JmsError>;

    async fn create_shared_durable_consumer(
        &self,
        topic: DestinationRef,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Self::Consumer, JmsError>;

    async fn create_browser(
        &self,
        queue: DestinationRef,
        selector: Option<&str>,
    ) -> Result<Self::Browser, JmsError>;

    /// Delete a durable subscription. Fails with `IllegalState` while it has an active consumer or
    /// unacknowledged messages in a transaction.
    async fn unsubscribe(&self, name: &str) -> Result<(), JmsError>;
}

/// Session restricted to the point-to-point domain.
#[async_trait]
pub trait QueueSession: Session {
    type Receiver: QueueReceiver;
    type Sender: QueueSender;

    async fn create_receiver(
        &self,
        queue: DestinationRef,
        selector: Option<&str>,
    ) -> Result<Self::Receiver, JmsError>;

    async fn create_sender(&self, queue: Option<DestinationRef>) -> Result<Self::Sender, JmsError>;
}

/// Session restricted to the publish/subscribe domain.
#[async_trait]
pub trait TopicSession: Session {
    type Subscriber: TopicSubscriber;
    type Publisher: TopicPublisher;

    async fn create_subscriber(
        &self,
        topic: DestinationRef,
        options: ConsumerOptions,
    ) -> Result<Self::Subscriber, JmsError>;

    async fn create_durable_subscriber(
        &self,
        topic: DestinationRef,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<Self::Subscriber, JmsError>;

    async fn create_publisher(&self, topic: Option<DestinationRef>) -> Result<Self::Publisher, JmsError>;
}

/// Identifier of a distributed transaction branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_transaction_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    pub const MAX_ID_LENGTH: usize = 64;

    pub fn new(
        format_id: i32,
        global_transaction_id: Vec<u8>,
        branch_qualifier: Vec<u8>,
    ) -> Result<Self, JmsError> {
        if global_transaction_id.len() > Self::MAX_ID_LENGTH
            || branch_qualifier.len() > Self::MAX_ID_LENGTH
        {
            return Err(JmsError::generic(format!(
                "Transaction ids are limited to {} bytes",
                Self::MAX_ID_LENGTH
            )));
        }
        Ok(Self {
            format_id,
            global_transaction_id,
            branch_qualifier,
        })
    }

    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    pub fn global_transaction_id(&self) -> &[u8] {
        &self.global_transaction_id
    }

    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }
}

/// Flags passed to [`XaResource`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct XaFlags(u32);

impl XaFlags {
    pub const NONE: XaFlags = XaFlags(0);
    pub const END_RSCAN: XaFlags = XaFlags(0x0080_0000);
    pub const START_RSCAN: XaFlags = XaFlags(0x0100_0000);
    pub const SUSPEND: XaFlags = XaFlags(0x0200_0000);
    pub const SUCCESS: XaFlags = XaFlags(0x0400_0000);
    pub const RESUME: XaFlags = XaFlags(0x0800_0000);
    pub const FAIL: XaFlags = XaFlags(0x2000_0000);
    pub const JOIN: XaFlags = XaFlags(0x0020_0000);
    pub const ONE_PHASE: XaFlags = XaFlags(0x4000_0000);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: XaFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for XaFlags {
    type Output = XaFlags;

    fn bitor(self, rhs: XaFlags) -> XaFlags {
        XaFlags(self.0 | rhs.0)
    }
}

/// Outcome of the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XaVote {
    Commit,
    /// The branch did no work and has already been forgotten.
    ReadOnly,
}

/// Resource manager interface driven by an external transaction manager.
#[async_trait]
pub trait XaResource: Send + Sync {
    /// Identity of the underlying resource manager.
    fn resource_manager_id(&self) -> &str;

    fn is_same_rm(&self, other: &dyn XaResource) -> bool {
        self.resource_manager_id() == other.resource_manager_id()
    }

    async fn start(&self, xid: &Xid, flags: XaFlags) -> Result<(), JmsError>;

    async fn end(&self, xid: &Xid, flags: XaFlags) -> Result<(), JmsError>;

    async fn prepare(&self, xid: &Xid) -> Result<XaVote, JmsError>;

    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), JmsError>;

    async fn rollback(&self, xid: &Xid) -> Result<(), JmsError>;

    async fn forget(&self, xid: &Xid) -> Result<(), JmsError>;

    async fn recover(&self, flags: XaFlags) -> Result<Vec<Xid>, JmsError>;

    fn transaction_timeout(&self) -> Duration;

    /// Returns false when the resource manager does not support timeouts.
    fn set_transaction_timeout(&self, timeout: Duration) -> Result<bool, JmsError>;
}

/// Session whose transaction boundaries are controlled by an external transaction manager.
///
/// An XA session always reports itself as transacted; its local `commit` and `rollback` fail
/// with `TransactionInProgress`, see [`xa_local_transaction_error`].
pub trait XaSession: Session {
    type Resource: XaResource;

    fn xa_resource(&self) -> &Self::Resource;
}

pub trait XaQueueSession: XaSession + QueueSession {}

impl<T: XaSession + QueueSession> XaQueueSession for T {}

pub trait XaTopicSession: XaSession + TopicSession {}

impl<T: XaSession + TopicSession> XaTopicSession for T {}

/// The error XA sessions return from local `commit`/`rollback`.
pub fn xa_local_transaction_error(operation: &str) -> JmsError {
    JmsError::transaction_in_progress(format!(
        "`{}` is not allowed on a session enlisted in a distributed transaction",
        operation
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(0, AcknowledgeMode::SessionTransacted)]
    #[case(1, AcknowledgeMode::AutoAcknowledge)]
    #[case(2, AcknowledgeMode::ClientAcknowledge)]
    #[case(3, AcknowledgeMode::DupsOkAcknowledge)]
    fn test_acknowledge_mode_values(#[case] raw: i32, #[case] mode: AcknowledgeMode) {
        assert_eq!(mode.as_i32(), raw);
        assert_eq!(AcknowledgeMode::try_from(raw).ok(), Some(mode));
    }

    #[test]
    fn test_acknowledge_mode_rejects_unknown() {
        assert!(AcknowledgeMode::try_from(4).is_err());
        assert!(AcknowledgeMode::try_from(-1).is_err());
    }

    #[test]
    fn test_from_transacted() {
        assert_eq!(
            AcknowledgeMode::from_transacted(true, AcknowledgeMode::ClientAcknowledge),
            AcknowledgeMode::SessionTransacted
        );
        assert_eq!(
            AcknowledgeMode::from_transacted(false, AcknowledgeMode::ClientAcknowledge),
            AcknowledgeMode::ClientAcknowledge
        );
    }

    #[test]
    fn test_xid_limits() {
        assert!(Xid::new(1, vec![0; 64], vec![0; 64]).is_ok());
        assert!(Xid::new(1, vec![0; 65], vec![]).is_err());
    }

    #[test]
    fn test_xa_flags() {
        let flags = XaFlags::START_RSCAN | XaFlags::END_RSCAN;
        assert!(flags.contains(XaFlags::START_RSCAN));
        assert!(!flags.contains(XaFlags::JOIN));
        assert_eq!(XaFlags::default(), XaFlags::NONE);
    }

    #[test]
    fn test_xa_local_transaction_error() {
        let e = xa_local_transaction_error("commit");
        assert_eq!(e.kind(), ErrorKind::TransactionInProgress);
        assert!(e.reason().contains("commit"));
    }
}
