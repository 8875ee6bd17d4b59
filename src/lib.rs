//! This crate provides the API surface of a Java Message Service style messaging system: the
//! traits a provider implements for connections, sessions, producers and consumers, the message
//! model they exchange, and the error taxonomy they report with.
//!
//! [`requestor`] builds request/reply on top of any provider, and [`loopback`] is an in-memory
//! provider for tests.
pub mod body;
pub mod connection;
pub mod consumer;
pub mod context;
pub mod definition;
pub mod delivery;
pub mod destination;
pub mod error;
pub mod loopback;
pub mod message;
pub mod producer;
pub mod property;
pub mod requestor;
pub mod session;

pub use delivery::DeliveryMode;
pub use destination::{Destination, DestinationKind, DestinationRef};
pub use error::{ErrorKind, JmsError, JmsRuntimeError};
pub use message::Message;
pub use requestor::{QueueRequestor, TopicRequestor};
