//!
//! Messages: identifiers, standard headers, properties and body.
//!
//! Clients fill the body, properties and the reply-to, correlation id and type headers. The
//! remaining headers are stamped by the producer on send, or restored by a provider when it
//! rebuilds a message received from its transport.
//!
use crate::body::{BodyType, BytesBody, MapBody, MessageBody, StreamBody};
use crate::delivery::{check_priority, DeliveryMode, SendOptions, DEFAULT_PRIORITY};
use crate::destination::DestinationRef;
use crate::error::JmsError;
use crate::producer::ProducerSettings;
use crate::property::{Properties, PropertyValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{self, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ID_PREFIX: &str = "ID:";

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Provider assigned message identifier. Always starts with `ID:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: &str) -> Result<Self, JmsError> {
        if !id.starts_with(ID_PREFIX) || id.len() == ID_PREFIX.len() {
            return Err(JmsError::generic(format!(
                "Message id `{}` must start with `{}`",
                id, ID_PREFIX
            )));
        }
        Ok(Self(id.to_owned()))
    }

    // Generate the next process-unique identifier.
    pub fn next() -> Self {
        static SEQUENCE: atomic::AtomicU64 = atomic::AtomicU64::new(0);
        static EPOCH: OnceLock<i64> = OnceLock::new();
        let epoch = *EPOCH.get_or_init(now_millis);
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}{}-{}-{}",
            ID_PREFIX,
            std::process::id(),
            epoch,
            seq
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Standard header fields.
///
/// Destination, delivery mode, priority, expiration, delivery time, message id and timestamp are
/// assigned when the message is sent; values set beforehand are overwritten. Reply-to,
/// correlation id and type are set by the client.
#[derive(Debug, Clone)]
pub struct MessageHeaders {
    destination: Option<DestinationRef>,
    delivery_mode: DeliveryMode,
    priority: u8,
    // 0 means the message never expires
    expiration: i64,
    delivery_time: i64,
    message_id: Option<MessageId>,
    timestamp: i64,
    correlation_id: Option<String>,
    reply_to: Option<DestinationRef>,
    message_type: Option<String>,
    redelivered: bool,
}

impl Default for MessageHeaders {
    fn default() -> Self {
        Self {
            destination: None,
            delivery_mode: DeliveryMode::default(),
            priority: DEFAULT_PRIORITY,
            expiration: 0,
            delivery_time: 0,
            message_id: None,
            timestamp: 0,
            correlation_id: None,
            reply_to: None,
            message_type: None,
            redelivered: false,
        }
    }
}

impl MessageHeaders {
    pub fn destination(&self) -> Option<&DestinationRef> {
        self.destination.as_ref()
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn expiration(&self) -> i64 {
        self.expiration
    }

    pub fn delivery_time(&self) -> i64 {
        self.delivery_time
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.message_id.as_ref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn reply_to(&self) -> Option<&DestinationRef> {
        self.reply_to.as_ref()
    }

    pub fn message_type(&self) -> Option<&str> {
        self.message_type.as_deref()
    }

    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn set_correlation_id(&mut self, correlation_id: Option<String>) {
        self.correlation_id = correlation_id;
    }

    pub fn set_reply_to(&mut self, reply_to: Option<DestinationRef>) {
        self.reply_to = reply_to;
    }

    pub fn set_message_type(&mut self, message_type: Option<String>) {
        self.message_type = message_type;
    }

    /// Set by the provider on delivery.
    pub fn set_redelivered(&mut self, redelivered: bool) {
        self.redelivered = redelivered;
    }

    /// The correlation id as raw bytes.
    pub fn correlation_id_bytes(&self) -> Option<&[u8]> {
        self.correlation_id.as_deref().map(str::as_bytes)
    }

    /// Correlation ids are stored as text, so the bytes must be UTF-8.
    pub fn set_correlation_id_bytes(&mut self, correlation_id: Vec<u8>) -> Result<(), JmsError> {
        let correlation_id = String::from_utf8(correlation_id).map_err(|e| {
            JmsError::message_format("Correlation id is not valid UTF-8").with_linked(e)
        })?;
        self.correlation_id = Some(correlation_id);
        Ok(())
    }

    /// Set by the provider when rebuilding a received message.
    pub fn set_message_id(&mut self, message_id: Option<MessageId>) {
        self.message_id = message_id;
    }

    // The setters below restore headers a provider received from its transport. A send
    // overwrites all of them.

    pub fn set_destination(&mut self, destination: Option<DestinationRef>) {
        self.destination = destination;
    }

    pub fn set_delivery_mode(&mut self, delivery_mode: DeliveryMode) {
        self.delivery_mode = delivery_mode;
    }

    /// Fails for a priority above 9 and keeps the current value.
    pub fn set_priority(&mut self, priority: u8) -> Result<(), JmsError> {
        self.priority = check_priority(priority)?;
        Ok(())
    }

    /// Milliseconds since the Unix epoch, 0 for never.
    pub fn set_expiration(&mut self, expiration: i64) {
        self.expiration = expiration;
    }

    pub fn set_delivery_time(&mut self, delivery_time: i64) {
        self.delivery_time = delivery_time;
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    /// Assign the fields owned by a send or publish, overwriting whatever the caller set.
    ///
    /// A disabled message id or timestamp is cleared rather than generated.
    pub fn stamp_for_send(
        &mut self,
        destination: DestinationRef,
        options: SendOptions,
        settings: &ProducerSettings,
    ) {
        let now = now_millis();
        self.destination = Some(destination);
        self.delivery_mode = options.delivery_mode;
        self.priority = options.priority;
        self.expiration = if options.time_to_live.is_zero() {
            0
        } else {
            now.saturating_add(millis(options.time_to_live))
        };
        self.delivery_time = now.saturating_add(millis(settings.delivery_delay()));
        self.message_id = if settings.disable_message_id() {
            None
        } else {
            Some(MessageId::next())
        };
        self.timestamp = if settings.disable_message_timestamp() {
            0
        } else {
            now
        };
        tracing::trace!(
            message_id = ?self.message_id,
            expiration = self.expiration,
            "Stamped message headers for send"
        );
    }
}

/// Client side acknowledgement hook installed by the provider on delivered messages.
pub trait Acknowledger: fmt::Debug + Send + Sync {
    /// Acknowledge every message consumed so far by the owning session.
    fn acknowledge(&self) -> Result<(), JmsError>;
}

fn format_error(expected: &str, found: &str) -> JmsError {
    JmsError::message_format(format!(
        "Expected a {} body but message has a {} body",
        expected, found
    ))
}

/// The unit of data exchanged through a provider.
#[derive(Debug, Clone, Default)]
pub struct Message {
    headers: MessageHeaders,
    properties: Properties,
    body: MessageBody,
    body_read_only: bool,
    acknowledger: Option<Arc<dyn Acknowledger>>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(body: MessageBody) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_body(MessageBody::Text(Some(text.into())))
    }

    pub fn bytes() -> Self {
        Self::with_body(MessageBody::Bytes(BytesBody::new()))
    }

    pub fn map() -> Self {
        Self::with_body(MessageBody::Map(MapBody::new()))
    }

    pub fn stream() -> Self {
        Self::with_body(MessageBody::Stream(StreamBody::new()))
    }

    pub fn object<T: Serialize>(value: &T) -> Result<Self, JmsError> {
        Ok(Self::with_body(MessageBody::Object(Some(
            serde_json::to_value(value)?,
        ))))
    }

    pub fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut MessageHeaders {
        &mut self.headers
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<(), JmsError> {
        self.properties.set(name, value)
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn is_body_read_only(&self) -> bool {
        self.body_read_only
    }

    /// The whole body as `T`. Any `T` yields `None` for a body without content; a stream body
    /// is never assignable.
    pub fn get_body<T: BodyType>(&self) -> Result<Option<T>, JmsError> {
        if let MessageBody::Stream(_) = self.body {
            return Err(JmsError::message_format(
                "A stream body cannot be read as a whole",
            ));
        }
        if !self.body.has_content() {
            return Ok(None);
        }
        match T::extract(&self.body) {
            Some(value) => value.map(Some),
            None => Err(format_error(T::NAME, self.body.type_name())),
        }
    }

    pub fn is_body_assignable_to<T: BodyType>(&self) -> bool {
        match &self.body {
            MessageBody::Stream(_) => false,
            body if !body.has_content() => true,
            body => matches!(T::extract(body), Some(Ok(_))),
        }
    }

    fn check_writeable(&self) -> Result<(), JmsError> {
        if self.body_read_only {
            return Err(JmsError::message_not_writeable("Message body is read-only"));
        }
        Ok(())
    }

    pub fn get_text(&self) -> Result<Option<&str>, JmsError> {
        match &self.body {
            MessageBody::Text(text) => Ok(text.as_deref()),
            other => Err(format_error("text", other.type_name())),
        }
    }

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), JmsError> {
        self.check_writeable()?;
        match &mut self.body {
            MessageBody::Text(slot) => {
                *slot = Some(text.into());
                Ok(())
            }
            other => Err(format_error("text", other.type_name())),
        }
    }

    pub fn get_object<T: DeserializeOwned>(&self) -> Result<Option<T>, JmsError> {
        match &self.body {
            MessageBody::Object(Some(value)) => Ok(Some(serde_json::from_value(value.clone())?)),
            MessageBody::Object(None) => Ok(None),
            other => Err(format_error("object", other.type_name())),
        }
    }

    pub fn set_object<T: Serialize>(&mut self, value: &T) -> Result<(), JmsError> {
        self.check_writeable()?;
        let value = serde_json::to_value(value)?;
        match &mut self.body {
            MessageBody::Object(slot) => {
                *slot = Some(value);
                Ok(())
            }
            other => Err(format_error("object", other.type_name())),
        }
    }

    /// Bytes body; its read/write mode is enforced by [`BytesBody`].
    pub fn bytes_body(&mut self) -> Result<&mut BytesBody, JmsError> {
        match &mut self.body {
            MessageBody::Bytes(body) => Ok(body),
            other => Err(format_error("bytes", other.type_name())),
        }
    }

    pub fn stream_body(&mut self) -> Result<&mut StreamBody, JmsError> {
        match &mut self.body {
            MessageBody::Stream(body) => Ok(body),
            other => Err(format_error("stream", other.type_name())),
        }
    }

    pub fn map_body(&self) -> Result<&MapBody, JmsError> {
        match &self.body {
            MessageBody::Map(body) => Ok(body),
            other => Err(format_error("map", other.type_name())),
        }
    }

    pub fn map_body_mut(&mut self) -> Result<&mut MapBody, JmsError> {
        match &mut self.body {
            MessageBody::Map(body) => Ok(body),
            other => Err(format_error("map", other.type_name())),
        }
    }

    /// Freeze body and properties. Providers do this on send and on delivery.
    pub fn mark_read_only(&mut self) {
        self.body_read_only = true;
        self.body.make_read_only();
        self.properties.set_read_only(true);
    }

    /// Empty the body, keeping its variant, and make it writeable again.
    pub fn clear_body(&mut self) {
        self.body = self.body.cleared();
        self.body_read_only = false;
    }

    pub fn clear_properties(&mut self) {
        self.properties.clear();
    }

    pub fn set_acknowledger(&mut self, acknowledger: Arc<dyn Acknowledger>) {
        self.acknowledger = Some(acknowledger);
    }

    /// A no-op unless the consuming session uses client acknowledgement.
    pub fn acknowledge(&self) -> Result<(), JmsError> {
        match &self.acknowledger {
            Some(ack) => ack.acknowledge(),
            None => Ok(()),
        }
    }
}
