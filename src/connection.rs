//!
//! This module defines connection and connection factory related traits.
//!
//! A connection is the client's active link to a provider. It authenticates the client, owns
//! the client identifier and creates sessions. Connection factories are administered objects a
//! client uses to create connections or simplified contexts.
//!
use crate::context::{JmsContext, XaJmsContext};
use crate::destination::DestinationRef;
use crate::error::{JmsError, JmsRuntimeError};
use crate::session::{AcknowledgeMode, QueueSession, Session, TopicSession, XaSession};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// User name and password used to authenticate a connection.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user_name: &str, password: &str) -> Self {
        Self {
            user_name: user_name.to_owned(),
            password: password.to_owned(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Information about the provider behind a connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetaData {
    pub jms_major_version: u32,
    pub jms_minor_version: u32,
    pub provider_name: String,
    pub provider_version: String,
    pub provider_major_version: u32,
    pub provider_minor_version: u32,
    /// Names of the `JMSX` properties the provider supports.
    #[serde(default)]
    pub jmsx_property_names: Vec<String>,
}

impl ConnectionMetaData {
    pub fn new(provider_name: &str, provider_major_version: u32, provider_minor_version: u32) -> Self {
        Self {
            jms_major_version: 2,
            jms_minor_version: 0,
            provider_name: provider_name.to_owned(),
            provider_version: format!("{}.{}", provider_major_version, provider_minor_version),
            provider_major_version,
            provider_minor_version,
            jmsx_property_names: vec!["JMSXGroupID".to_owned(), "JMSXGroupSeq".to_owned()],
        }
    }

    pub fn jms_version(&self) -> String {
        format!("{}.{}", self.jms_major_version, self.jms_minor_version)
    }
}

/// Notified of problems with a connection detected outside of any client call.
pub trait ExceptionListener: Send + Sync {
    fn on_exception(&self, error: &JmsError);
}

/// A session supplied by an application server to process messages on a server thread.
#[async_trait]
pub trait ServerSession: Send + Sync {
    type Session: Session;

    fn session(&self) -> Result<&Self::Session, JmsError>;

    /// Have the server run the session's distinguished listener.
    async fn start(&self) -> Result<(), JmsError>;
}

/// Pool of [`ServerSession`]s an application server hands to a [`ConnectionConsumer`].
#[async_trait]
pub trait ServerSessionPool: Send + Sync {
    type Session: Session;

    /// May wait until a server session becomes available.
    async fn server_session(&self) -> Result<Box<dyn ServerSession<Session = Self::Session>>, JmsError>;
}

pub type ServerSessionPoolRef<S> = Arc<dyn ServerSessionPool<Session = S>>;

/// Provider side consumer that loads messages into server sessions for concurrent processing.
#[async_trait]
pub trait ConnectionConsumer: Send + Sync {
    type Session: Session;

    fn server_session_pool(&self) -> ServerSessionPoolRef<Self::Session>;

    async fn close(&self) -> Result<(), JmsError>;
}

/// Parameters shared by every kind of connection consumer.
#[derive(Debug, Clone)]
pub struct ConnectionConsumerOptions {
    pub destination: DestinationRef,
    /// Subscription name for shared and durable connection consumers.
    pub subscription: Option<String>,
    pub selector: Option<String>,
    /// Most messages loaded into a server session at once.
    pub max_messages: usize,
}

impl ConnectionConsumerOptions {
    pub fn new(destination: DestinationRef, max_messages: usize) -> Self {
        Self {
            destination,
            subscription: None,
            selector: None,
            max_messages,
        }
    }

    pub fn with_subscription(mut self, name: &str) -> Self {
        self.subscription = Some(name.to_owned());
        self
    }

    pub fn with_selector(mut self, selector: &str) -> Self {
        self.selector = Some(selector.to_owned());
        self
    }

    /// Shared and durable connection consumers need a subscription name.
    pub fn require_subscription(&self) -> Result<&str, JmsError> {
        self.subscription
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| JmsError::generic("A subscription name is required"))
    }
}

/// An active connection to a provider.
///
/// A connection starts in stopped mode: messages can be sent but are not delivered to consumers
/// until [`start`](Self::start) is called.
#[async_trait]
pub trait Connection: Send + Sync {
    type Session: Session;
    type ConnectionConsumer: ConnectionConsumer<Session = Self::Session>;

    async fn create_session(&self, mode: AcknowledgeMode) -> Result<Self::Session, JmsError>;

    async fn client_id(&self) -> Result<Option<String>, JmsError>;

    /// Only allowed before the connection is used for anything else. Fails with
    /// `InvalidClientId` when the id is already in use.
    async fn set_client_id(&self, client_id: &str) -> Result<(), JmsError>;

    fn metadata(&self) -> Result<ConnectionMetaData, JmsError>;

    fn exception_listener(&self) -> Option<Arc<dyn ExceptionListener>>;

    fn set_exception_listener(&self, listener: Option<Arc<dyn ExceptionListener>>) -> Result<(), JmsError>;

    async fn start(&self) -> Result<(), JmsError>;

    /// Pause delivery. Returns once in-flight listener callbacks have completed.
    async fn stop(&self) -> Result<(), JmsError>;

    /// Close the connection and all its sessions. Pending receives return `None`.
    async fn close(&self) -> Result<(), JmsError>;

    async fn create_connection_consumer(
        &self,
        options: ConnectionConsumerOptions,
        pool: ServerSessionPoolRef<Self::Session>,
    ) -> Result<Self::ConnectionConsumer, JmsError>;

    async fn create_shared_connection_consumer(
        &self,
        options: ConnectionConsumerOptions,
        pool: ServerSessionPoolRef<Self::Session>,
    ) -> Result<Self::ConnectionConsumer, JmsError>;

    async fn create_durable_connection_consumer(
        &self,
        options: ConnectionConsumerOptions,
        pool: ServerSessionPoolRef<Self::Session>,
    ) -> Result<Self::ConnectionConsumer, JmsError>;

    async fn create_shared_durable_connection_consumer(
        &self,
        options: ConnectionConsumerOptions,
        pool: ServerSessionPoolRef<Self::Session>,
    ) -> Result<Self::ConnectionConsumer, JmsError>;
}

#[async_trait]
pub trait QueueConnection: Connection {
    type QueueSession: QueueSession;

    async fn create_queue_session(&self, mode: AcknowledgeMode) -> Result<Self::QueueSession, JmsError>;
}

#[async_trait]
pub trait TopicConnection: Connection {
    type TopicSession: TopicSession;

    async fn create_topic_session(&self, mode: AcknowledgeMode) -> Result<Self::TopicSession, JmsError>;
}

#[async_trait]
pub trait XaConnection: Connection {
    type XaSession: XaSession;

    async fn create_xa_session(&self) -> Result<Self::XaSession, JmsError>;
}

pub trait XaQueueConnection: XaConnection + QueueConnection {}

impl<T: XaConnection + QueueConnection> XaQueueConnection for T {}

pub trait XaTopicConnection: XaConnection + TopicConnection {}

impl<T: XaConnection + TopicConnection> XaTopicConnection for T {}

/// Administered object used to create connections and contexts.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection;
    type Context: JmsContext;

    /// `None` uses the default identity of the factory.
    async fn create_connection(&self, credentials: Option<Credentials>) -> Result<Self::Connection, JmsError>;

    async fn create_context(
        &self,
        credentials: Option<Credentials>,
        mode: AcknowledgeMode,
    ) -> Result<Self::Context, JmsRuntimeError>;
}

#[async_trait]
pub trait QueueConnectionFactory: ConnectionFactory {
    type QueueConnection: QueueConnection;

    async fn create_queue_connection(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<Self::QueueConnection, JmsError>;
}

#[async_trait]
pub trait TopicConnectionFactory: ConnectionFactory {
    type TopicConnection: TopicConnection;

    async fn create_topic_connection(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<Self::TopicConnection, JmsError>;
}

#[async_trait]
pub trait XaConnectionFactory: Send + Sync {
    type XaConnection: XaConnection;
    type XaContext: XaJmsContext;

    async fn create_xa_connection(&self, credentials: Option<Credentials>) -> Result<Self::XaConnection, JmsError>;

    async fn create_xa_context(&self, credentials: Option<Credentials>) -> Result<Self::XaContext, JmsRuntimeError>;
}

#[async_trait]
pub trait XaQueueConnectionFactory: XaConnectionFactory + QueueConnectionFactory {
    type XaQueueConnection: XaQueueConnection;

    async fn create_xa_queue_connection(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<Self::XaQueueConnection, JmsError>;
}

#[async_trait]
pub trait XaTopicConnectionFactory: XaConnectionFactory + TopicConnectionFactory {
    type XaTopicConnection: XaTopicConnection;

    async fn create_xa_topic_connection(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<Self::XaTopicConnection, JmsError>;
}
