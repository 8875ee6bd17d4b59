//!
//! The simplified API: a context combines a connection and a session, and reports failures as
//! [`JmsRuntimeError`] only.
//!
//! [`ProducerAdapter`] and [`ConsumerAdapter`] let a provider expose its classic producers and
//! consumers through this API.
//!
use crate::connection::{ConnectionMetaData, ExceptionListener};
use crate::consumer::{ConsumerOptions, MessageConsumer, MessageListener, QueueBrowser};
use crate::delivery::DeliveryMode;
use crate::destination::{DestinationRef, Queue, TemporaryQueue, TemporaryTopic, Topic};
use crate::error::{JmsError, JmsRuntimeError};
use crate::message::Message;
use crate::producer::{CompletionListener, MessageProducer, ProducerSettings};
use crate::property::{Properties, PropertyValue};
use crate::session::{AcknowledgeMode, XaResource};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-producer state of the simplified API, applied to every message it sends.
#[derive(Clone, Default)]
pub struct JmsProducerOptions {
    pub settings: ProducerSettings,
    pub properties: Properties,
    pub correlation_id: Option<String>,
    pub message_type: Option<String>,
    pub reply_to: Option<DestinationRef>,
    /// When set, sends are asynchronous and complete through this listener.
    pub completion_listener: Option<Arc<dyn CompletionListener>>,
}

impl std::fmt::Debug for JmsProducerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JmsProducerOptions")
            .field("settings", &self.settings)
            .field("properties", &self.properties)
            .field("correlation_id", &self.correlation_id)
            .field("message_type", &self.message_type)
            .field("reply_to", &self.reply_to)
            .field("async", &self.completion_listener.is_some())
            .finish()
    }
}

impl JmsProducerOptions {
    /// Copy properties and client headers onto `message`, overriding values already there.
    pub fn apply_to(&self, message: &mut Message) -> Result<(), JmsRuntimeError> {
        for (name, value) in self.properties.iter() {
            message.set_property(name, value.clone())?;
        }
        let headers = message.headers_mut();
        if self.correlation_id.is_some() {
            headers.set_correlation_id(self.correlation_id.clone());
        }
        if self.message_type.is_some() {
            headers.set_message_type(self.message_type.clone());
        }
        if self.reply_to.is_some() {
            headers.set_reply_to(self.reply_to.clone());
        }
        Ok(())
    }
}

/// Fluent producer of the simplified API.
#[async_trait]
pub trait JmsProducer: Send + Sync {
    fn options(&self) -> &JmsProducerOptions;

    fn options_mut(&mut self) -> &mut JmsProducerOptions;

    /// Apply the producer options to `message` and send it. With a completion listener set the
    /// call returns as soon as the send is handed over.
    async fn send(&mut self, destination: DestinationRef, message: Message) -> Result<(), JmsRuntimeError>;

    async fn send_text(&mut self, destination: DestinationRef, text: &str) -> Result<(), JmsRuntimeError> {
        self.send(destination, Message::text(text)).await
    }

    async fn send_bytes(&mut self, destination: DestinationRef, body: &[u8]) -> Result<(), JmsRuntimeError> {
        let mut message = Message::bytes();
        message.bytes_body()?.write_bytes(body)?;
        self.send(destination, message).await
    }

    async fn send_map(
        &mut self,
        destination: DestinationRef,
        body: HashMap<String, PropertyValue>,
    ) -> Result<(), JmsRuntimeError> {
        let mut message = Message::map();
        let map = message.map_body_mut()?;
        for (name, value) in body {
            map.set(&name, value)?;
        }
        self.send(destination, message).await
    }

    async fn send_object<T: Serialize + Sync>(
        &mut self,
        destination: DestinationRef,
        body: &T,
    ) -> Result<(), JmsRuntimeError> {
        let message = Message::object(body)?;
        self.send(destination, message).await
    }

    fn set_disable_message_id(&mut self, value: bool) -> &mut Self {
        self.options_mut().settings.set_disable_message_id(value);
        self
    }

    fn set_disable_message_timestamp(&mut self, value: bool) -> &mut Self {
        self.options_mut().settings.set_disable_message_timestamp(value);
        self
    }

    fn set_delivery_mode(&mut self, mode: DeliveryMode) -> &mut Self {
        self.options_mut().settings.set_delivery_mode(mode);
        self
    }

    fn set_priority(&mut self, priority: u8) -> Result<&mut Self, JmsRuntimeError> {
        self.options_mut().settings.set_priority(priority)?;
        Ok(self)
    }

    fn set_time_to_live(&mut self, ttl: Duration) -> &mut Self {
        self.options_mut().settings.set_time_to_live(ttl);
        self
    }

    fn set_delivery_delay(&mut self, delay: Duration) -> &mut Self {
        self.options_mut().settings.set_delivery_delay(delay);
        self
    }

    fn set_async(&mut self, listener: Option<Arc<dyn CompletionListener>>) -> &mut Self {
        self.options_mut().completion_listener = listener;
        self
    }

    fn set_property(
        &mut self,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<&mut Self, JmsRuntimeError> {
        self.options_mut().properties.set(name, value)?;
        Ok(self)
    }

    fn clear_properties(&mut self) -> &mut Self {
        self.options_mut().properties.clear();
        self
    }

    fn set_correlation_id(&mut self, correlation_id: Option<String>) -> &mut Self {
        self.options_mut().correlation_id = correlation_id;
        self
    }

    fn set_message_type(&mut self, message_type: Option<String>) -> &mut Self {
        self.options_mut().message_type = message_type;
        self
    }

    fn set_reply_to(&mut self, reply_to: Option<DestinationRef>) -> &mut Self {
        self.options_mut().reply_to = reply_to;
        self
    }
}

/// Consumer of the simplified API.
#[async_trait]
pub trait JmsConsumer: Send + Sync {
    fn message_selector(&self) -> Option<&str>;

    fn message_listener(&self) -> Option<Arc<dyn MessageListener>>;

    fn set_message_listener(&self, listener: Option<Arc<dyn MessageListener>>) -> Result<(), JmsRuntimeError>;

    async fn receive(&self) -> Result<Option<Message>, JmsRuntimeError>;

    /// A zero timeout waits indefinitely.
    async fn receive_timeout(&self, timeout: Duration) -> Result<Option<Message>, JmsRuntimeError>;

    async fn receive_no_wait(&self) -> Result<Option<Message>, JmsRuntimeError>;

    async fn close(&self) -> Result<(), JmsRuntimeError>;

    /// Receive a text message and return its body. A message of another type fails with
    /// `MessageFormat`.
    async fn receive_text(&self, timeout: Duration) -> Result<Option<String>, JmsRuntimeError> {
        match self.receive_timeout(timeout).await? {
            Some(message) => Ok(message.get_text()?.map(str::to_owned)),
            None => Ok(None),
        }
    }
}

/// An active connection plus one session, with runtime errors only.
#[async_trait]
pub trait JmsContext: Send + Sync {
    type Queue: Queue + Clone;
    type Topic: Topic + Clone;
    type TemporaryQueue: TemporaryQueue + Clone;
    type TemporaryTopic: TemporaryTopic + Clone;
    type Producer: JmsProducer;
    type Consumer: JmsConsumer;
    type Browser: QueueBrowser;

    /// A new context sharing this context's connection.
    async fn create_context(&self, mode: AcknowledgeMode) -> Result<Self, JmsRuntimeError>
    where
        Self: Sized;

    async fn create_producer(&self) -> Result<Self::Producer, JmsRuntimeError>;

    async fn client_id(&self) -> Result<Option<String>, JmsRuntimeError>;

    async fn set_client_id(&self, client_id: &str) -> Result<(), JmsRuntimeError>;

    fn metadata(&self) -> Result<ConnectionMetaData, JmsRuntimeError>;

    fn exception_listener(&self) -> Option<Arc<dyn ExceptionListener>>;

    fn set_exception_listener(&self, listener: Option<Arc<dyn ExceptionListener>>) -> Result<(), JmsRuntimeError>;

    async fn start(&self) -> Result<(), JmsRuntimeError>;

    async fn stop(&self) -> Result<(), JmsRuntimeError>;

    /// Whether creating a consumer starts the underlying connection. Defaults to true.
    fn auto_start(&self) -> bool;

    fn set_auto_start(&self, auto_start: bool) -> Result<(), JmsRuntimeError>;

    async fn close(&self) -> Result<(), JmsRuntimeError>;

    fn session_mode(&self) -> AcknowledgeMode;

    fn transacted(&self) -> bool {
        self.session_mode() == AcknowledgeMode::SessionTransacted
    }

    fn create_message(&self) -> Message {
        Message::new()
    }

    fn create_text_message(&self, text: &str) -> Message {
        Message::text(text)
    }

    fn create_bytes_message(&self) -> Message {
        Message::bytes()
    }

    fn create_map_message(&self) -> Message {
        Message::map()
    }

    fn create_stream_message(&self) -> Message {
        Message::stream()
    }

    fn create_object_message<T: Serialize>(&self, value: &T) -> Result<Message, JmsRuntimeError> {
        Ok(Message::object(value)?)
    }

    async fn commit(&self) -> Result<(), JmsRuntimeError>;

    async fn rollback(&self) -> Result<(), JmsRuntimeError>;

    async fn recover(&self) -> Result<(), JmsRuntimeError>;

    /// Acknowledge all messages consumed by this context so far. Only meaningful with
    /// [`AcknowledgeMode::ClientAcknowledge`].
    async fn acknowledge(&self) -> Result<(), JmsRuntimeError>;

    async fn create_consumer(
        &self,
        destination: DestinationRef,
        options: ConsumerOptions,
    ) -> Result<Self::Consumer, JmsRuntimeError>;

    async fn create_durable_consumer(
        &self,
        topic: DestinationRef,
        name: &str,
        options: ConsumerOptions,
    ) -> Result<Self::Consumer, JmsRuntimeError>;

    async fn create_shared_durable_consumer(
        &self,
        topic: DestinationRef,
        name: &str,
        selector: Option<&str>,
    ) -> Result<Self::Consumer, JmsRuntimeError>;

    async fn create_shared_consumer(
        &self,
        topic: DestinationRef,
        subscription: &str,
        selector: Option<&str>,
    ) -> Result<Self::Consumer, JmsRuntimeError>;

    async fn create_browser(
        &self,
        queue: DestinationRef,
        selector: Option<&str>,
    ) -> Result<Self::Browser, JmsRuntimeError>;

    fn create_queue(&self, name: &str) -> Result<Self::Queue, JmsRuntimeError>;

    fn create_topic(&self, name: &str) -> Result<Self::Topic, JmsRuntimeError>;

    async fn create_temporary_queue(&self) -> Result<Self::TemporaryQueue, JmsRuntimeError>;

    async fn create_temporary_topic(&self) -> Result<Self::TemporaryTopic, JmsRuntimeError>;

    async fn unsubscribe(&self, name: &str) -> Result<(), JmsRuntimeError>;
}

/// Context whose session takes part in distributed transactions.
pub trait XaJmsContext: JmsContext {
    type Resource: XaResource;

    fn xa_resource(&self) -> &Self::Resource;
}

/// Expose a [`MessageProducer`] through the simplified API.
///
/// The wrapped producer must be unidentified; the destination is given on each send.
pub struct ProducerAdapter<P> {
    producer: P,
    options: JmsProducerOptions,
}

impl<P: MessageProducer> ProducerAdapter<P> {
    pub fn new(producer: P) -> Self {
        let options = JmsProducerOptions {
            settings: producer.settings(),
            ..Default::default()
        };
        Self { producer, options }
    }

    pub fn into_inner(self) -> P {
        self.producer
    }
}

#[async_trait]
impl<P: MessageProducer> JmsProducer for ProducerAdapter<P> {
    fn options(&self) -> &JmsProducerOptions {
        &self.options
    }

    fn options_mut(&mut self) -> &mut JmsProducerOptions {
        &mut self.options
    }

    async fn send(&mut self, destination: DestinationRef, mut message: Message) -> Result<(), JmsRuntimeError> {
        self.options.apply_to(&mut message)?;
        self.producer.set_settings(self.options.settings)?;
        match &self.options.completion_listener {
            Some(listener) => {
                self.producer
                    .send_async(Some(destination), message, Arc::clone(listener))
                    .await?
            }
            None => {
                let options = self.options.settings.send_options();
                self.producer
                    .send_to(destination, &mut message, Some(options))
                    .await?
            }
        }
        Ok(())
    }
}

/// Expose a [`MessageConsumer`] through the simplified API.
pub struct ConsumerAdapter<C> {
    consumer: C,
}

impl<C: MessageConsumer> ConsumerAdapter<C> {
    pub fn new(consumer: C) -> Self {
        Self { consumer }
    }

    pub fn inner(&self) -> &C {
        &self.consumer
    }
}

fn runtime<T>(result: Result<T, JmsError>) -> Result<T, JmsRuntimeError> {
    result.map_err(JmsRuntimeError::from)
}

#[async_trait]
impl<C: MessageConsumer> JmsConsumer for ConsumerAdapter<C> {
    fn message_selector(&self) -> Option<&str> {
        self.consumer.message_selector()
    }

    fn message_listener(&self) -> Option<Arc<dyn MessageListener>> {
        self.consumer.message_listener()
    }

    fn set_message_listener(&self, listener: Option<Arc<dyn MessageListener>>) -> Result<(), JmsRuntimeError> {
        runtime(self.consumer.set_message_listener(listener))
    }

    async fn receive(&self) -> Result<Option<Message>, JmsRuntimeError> {
        runtime(self.consumer.receive().await)
    }

    async fn receive_timeout(&self, timeout: Duration) -> Result<Option<Message>, JmsRuntimeError> {
        runtime(self.consumer.receive_timeout(timeout).await)
    }

    async fn receive_no_wait(&self) -> Result<Option<Message>, JmsRuntimeError> {
        runtime(self.consumer.receive_no_wait().await)
    }

    async fn close(&self) -> Result<(), JmsRuntimeError> {
        runtime(self.consumer.close().await)
    }
}
