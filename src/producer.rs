//!
//! This module defines message producers and the header stamping shared by their implementations.
//!
use crate::delivery::{
    check_priority, DeliveryMode, SendOptions, DEFAULT_DELIVERY_DELAY, DEFAULT_PRIORITY,
    DEFAULT_TIME_TO_LIVE,
};
use crate::destination::{Destination, DestinationRef};
use crate::error::JmsError;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Producer defaults applied to every send that does not override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSettings {
    disable_message_id: bool,
    disable_message_timestamp: bool,
    delivery_mode: DeliveryMode,
    priority: u8,
    time_to_live: Duration,
    delivery_delay: Duration,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            disable_message_id: false,
            disable_message_timestamp: false,
            delivery_mode: DeliveryMode::default(),
            priority: DEFAULT_PRIORITY,
            time_to_live: DEFAULT_TIME_TO_LIVE,
            delivery_delay: DEFAULT_DELIVERY_DELAY,
        }
    }
}

impl ProducerSettings {
    pub fn disable_message_id(&self) -> bool {
        self.disable_message_id
    }

    /// A hint: providers may still assign ids.
    pub fn set_disable_message_id(&mut self, value: bool) {
        self.disable_message_id = value;
    }

    pub fn disable_message_timestamp(&self) -> bool {
        self.disable_message_timestamp
    }

    pub fn set_disable_message_timestamp(&mut self, value: bool) {
        self.disable_message_timestamp = value;
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    pub fn set_delivery_mode(&mut self, mode: DeliveryMode) {
        self.delivery_mode = mode;
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: u8) -> Result<(), JmsError> {
        self.priority = check_priority(priority)?;
        Ok(())
    }

    pub fn time_to_live(&self) -> Duration {
        self.time_to_live
    }

    pub fn set_time_to_live(&mut self, ttl: Duration) {
        self.time_to_live = ttl;
    }

    pub fn delivery_delay(&self) -> Duration {
        self.delivery_delay
    }

    pub fn set_delivery_delay(&mut self, delay: Duration) {
        self.delivery_delay = delay;
    }

    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            delivery_mode: self.delivery_mode,
            priority: self.priority,
            time_to_live: self.time_to_live,
        }
    }
}

/// Notified when an asynchronous send completes.
///
/// Failures of an asynchronous send are reported to [`on_exception`](Self::on_exception) and
/// never returned from the send call itself.
pub trait CompletionListener: Send + Sync {
    fn on_completion(&self, message: &Message);

    fn on_exception(&self, message: &Message, error: JmsError);
}

/// Select the destination of a send and stamp the message headers.
///
/// `bound` is the producer's own destination, `explicit` the one passed to the call. Exactly one
/// of them must be present. On success the caller's message is marked read-only and the copy to
/// hand over for delivery is returned.
pub fn prepare_send(
    message: &mut Message,
    bound: Option<&DestinationRef>,
    explicit: Option<DestinationRef>,
    options: SendOptions,
    settings: &ProducerSettings,
) -> Result<Message, JmsError> {
    let destination = match (bound, explicit) {
        (Some(bound), None) => Arc::clone(bound),
        (None, Some(explicit)) => explicit,
        (Some(bound), Some(_)) => {
            return Err(JmsError::illegal_state(format!(
                "Producer is bound to `{}`, a destination cannot be given per send",
                bound.name()
            )))
        }
        (None, None) => {
            return Err(JmsError::invalid_destination(
                "Producer has no destination and none was given",
            ))
        }
    };
    check_priority(options.priority)?;
    message
        .headers_mut()
        .stamp_for_send(destination, options, settings);
    message.mark_read_only();
    Ok(message.clone())
}

/// Sends messages to a destination.
///
/// A producer created without a destination is unidentified and needs one on every send.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    fn settings(&self) -> ProducerSettings;

    fn set_settings(&self, settings: ProducerSettings) -> Result<(), JmsError>;

    /// `None` for an unidentified producer.
    fn destination(&self) -> Option<DestinationRef>;

    /// Send with the producer defaults to the bound destination.
    async fn send(&self, message: &mut Message) -> Result<(), JmsError> {
        self.send_with(message, self.settings().send_options()).await
    }

    async fn send_with(&self, message: &mut Message, options: SendOptions) -> Result<(), JmsError>;

    /// Send to `destination`. Only valid for unidentified producers.
    async fn send_to(
        &self,
        destination: DestinationRef,
        message: &mut Message,
        options: Option<SendOptions>,
    ) -> Result<(), JmsError>;

    /// Returns once the send has been handed over; completion or failure is reported to
    /// `listener`.
    async fn send_async(
        &self,
        destination: Option<DestinationRef>,
        message: Message,
        listener: Arc<dyn CompletionListener>,
    ) -> Result<(), JmsError>;

    async fn close(&self) -> Result<(), JmsError>;
}

/// Producer for the point-to-point domain.
pub trait QueueSender: MessageProducer {
    fn queue(&self) -> Option<DestinationRef> {
        self.destination()
    }
}

/// Producer for the publish/subscribe domain.
#[async_trait]
pub trait TopicPublisher: MessageProducer {
    fn topic(&self) -> Option<DestinationRef> {
        self.destination()
    }

    async fn publish(&self, message: &mut Message) -> Result<(), JmsError> {
        self.send(message).await
    }

    async fn publish_with(&self, message: &mut Message, options: SendOptions) -> Result<(), JmsError> {
        self.send_with(message, options).await
    }

    async fn publish_to(
        &self,
        topic: DestinationRef,
        message: &mut Message,
        options: Option<SendOptions>,
    ) -> Result<(), JmsError> {
        self.send_to(topic, message, options).await
    }
}
