//!
//! This module defines message consumers, listeners and queue browsers.
//!
use crate::destination::DestinationRef;
use crate::error::JmsError;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Asynchronous delivery callback.
///
/// A session delivers to its listeners serially: `on_message` is never re-entered concurrently
/// for consumers of the same session.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: Message);
}

/// Filter and local-delivery options of a new consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerOptions {
    pub selector: Option<String>,
    /// Topic consumers only: skip messages published on the consumer's own connection.
    pub no_local: bool,
}

impl ConsumerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty selector is the same as no selector.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        self.selector = if selector.trim().is_empty() {
            None
        } else {
            Some(selector)
        };
        self
    }

    pub fn with_no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }
}

/// `Duration::ZERO` means wait indefinitely and yields `None`.
pub fn normalize_timeout(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

/// Receives messages from a destination, synchronously or through a listener.
///
/// Apart from [`close`](Self::close) a consumer is used by one task at a time, like the session
/// that created it. `close` may be called while a `receive` is pending on another task; the
/// pending call then returns `Ok(None)`. When a listener callback is running, `close` waits for
/// it to finish, unless it is called from within that callback.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    fn message_selector(&self) -> Option<&str>;

    fn message_listener(&self) -> Option<Arc<dyn MessageListener>>;

    /// `None` removes the current listener.
    fn set_message_listener(&self, listener: Option<Arc<dyn MessageListener>>) -> Result<(), JmsError>;

    /// Block until a message arrives or the consumer is closed.
    async fn receive(&self) -> Result<Option<Message>, JmsError>;

    /// Like [`receive`](Self::receive), giving up after `timeout`. A zero timeout waits
    /// indefinitely.
    async fn receive_timeout(&self, timeout: Duration) -> Result<Option<Message>, JmsError>;

    /// Return a message only if one is immediately available.
    async fn receive_no_wait(&self) -> Result<Option<Message>, JmsError>;

    async fn close(&self) -> Result<(), JmsError>;
}

pub trait QueueReceiver: MessageConsumer {
    fn queue(&self) -> DestinationRef;
}

pub trait TopicSubscriber: MessageConsumer {
    fn topic(&self) -> DestinationRef;

    fn no_local(&self) -> bool;
}

/// Looks at messages on a queue without removing them.
#[async_trait]
pub trait QueueBrowser: Send + Sync {
    fn queue(&self) -> DestinationRef;

    fn message_selector(&self) -> Option<&str>;

    /// Snapshot of the messages currently matching the selector, in queue order. The content may
    /// already be stale when returned.
    async fn messages(&self) -> Result<Vec<Message>, JmsError>;

    async fn close(&self) -> Result<(), JmsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_options() {
        let options = ConsumerOptions::new().with_selector("  ").with_no_local(true);
        assert_eq!(options.selector, None);
        assert!(options.no_local);

        let options = ConsumerOptions::new().with_selector("color = 'red'");
        assert_eq!(options.selector.as_deref(), Some("color = 'red'"));
        assert!(!options.no_local);
    }

    #[test]
    fn test_normalize_timeout() {
        assert_eq!(normalize_timeout(Duration::ZERO), None);
        assert_eq!(
            normalize_timeout(Duration::from_millis(5)),
            Some(Duration::from_millis(5))
        );
    }
}
