//!
//! Destinations are the addresses messages are sent to and consumed from.
//!
//! Providers implement these capability traits on their own destination types. Where a message
//! has to carry a destination, such as the destination and reply-to headers, it holds a shared
//! [`DestinationRef`].
//!
use crate::error::JmsError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub type DestinationRef = Arc<dyn Destination>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    Queue,
    Topic,
    TemporaryQueue,
    TemporaryTopic,
}

impl DestinationKind {
    pub fn is_queue(self) -> bool {
        matches!(self, DestinationKind::Queue | DestinationKind::TemporaryQueue)
    }

    pub fn is_topic(self) -> bool {
        !self.is_queue()
    }

    pub fn is_temporary(self) -> bool {
        matches!(
            self,
            DestinationKind::TemporaryQueue | DestinationKind::TemporaryTopic
        )
    }
}

/// An administered or temporary destination. The name is provider specific.
pub trait Destination: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> DestinationKind;

    /// Whether both refer to the same provider destination.
    fn same_as(&self, other: &dyn Destination) -> bool {
        self.kind() == other.kind() && self.name() == other.name()
    }
}

/// Point-to-point destination.
pub trait Queue: Destination {
    fn queue_name(&self) -> &str {
        self.name()
    }
}

/// Publish/subscribe destination.
pub trait Topic: Destination {
    fn topic_name(&self) -> &str {
        self.name()
    }
}

/// A queue whose lifetime is bound to the connection that created it.
#[async_trait]
pub trait TemporaryQueue: Queue {
    /// Fails with `IllegalState` while consumers are still using it.
    async fn delete(&self) -> Result<(), JmsError>;
}

/// A topic whose lifetime is bound to the connection that created it.
#[async_trait]
pub trait TemporaryTopic: Topic {
    async fn delete(&self) -> Result<(), JmsError>;
}

/// Box any destination into the shared form carried by message headers.
pub fn destination_ref<D: Destination + Clone>(destination: &D) -> DestinationRef {
    Arc::new(destination.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Named(&'static str, DestinationKind);

    impl Destination for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> DestinationKind {
            self.1
        }
    }

    #[test]
    fn test_same_as() {
        let a = Named("orders", DestinationKind::Queue);
        let b = destination_ref(&Named("orders", DestinationKind::Queue));
        let c = Named("orders", DestinationKind::Topic);
        assert!(a.same_as(b.as_ref()));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_kind_predicates() {
        assert!(DestinationKind::TemporaryQueue.is_queue());
        assert!(DestinationKind::TemporaryQueue.is_temporary());
        assert!(DestinationKind::Topic.is_topic());
        assert!(!DestinationKind::Topic.is_temporary());
    }
}
