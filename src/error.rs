//!
//! This module defines the error taxonomy shared by providers and clients.
//!
//! Two error types carry the same set of [`ErrorKind`]s. [`JmsError`] is returned by the classic
//! connection/session API, where every operation declares its failure. [`JmsRuntimeError`] is
//! returned by the simplified context API. Both convert into each other without losing kind,
//! reason, vendor code or linked cause.
//!
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// A linked, provider specific cause.
pub type LinkedError = Box<dyn StdError + Send + Sync + 'static>;

/// The condition which caused an operation to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Any failure no more specific kind applies to.
    Generic,

    /// A method was invoked at an illegal or inappropriate time, e.g. on a closed session.
    IllegalState,

    /// The client identifier is already in use or malformed.
    InvalidClientId,

    /// The destination is not understood by the provider or is no longer valid.
    InvalidDestination,

    /// The message selector is syntactically invalid.
    InvalidSelector,

    /// Authentication or authorization failed.
    Security,

    /// A stream or bytes message body was read past its end.
    MessageEof,

    /// A body or property value has the wrong type.
    MessageFormat,

    /// A write-only message body was read.
    MessageNotReadable,

    /// A read-only message body or property was written.
    MessageNotWriteable,

    /// The provider could not allocate a resource the operation needs.
    ResourceAllocation,

    /// A local transaction boundary was requested while a distributed transaction is in progress.
    TransactionInProgress,

    /// Committing a transacted session resulted in a rollback.
    TransactionRolledBack,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::Generic,
        ErrorKind::IllegalState,
        ErrorKind::InvalidClientId,
        ErrorKind::InvalidDestination,
        ErrorKind::InvalidSelector,
        ErrorKind::Security,
        ErrorKind::MessageEof,
        ErrorKind::MessageFormat,
        ErrorKind::MessageNotReadable,
        ErrorKind::MessageNotWriteable,
        ErrorKind::ResourceAllocation,
        ErrorKind::TransactionInProgress,
        ErrorKind::TransactionRolledBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Generic => "messaging failure",
            ErrorKind::IllegalState => "illegal state",
            ErrorKind::InvalidClientId => "invalid client id",
            ErrorKind::InvalidDestination => "invalid destination",
            ErrorKind::InvalidSelector => "invalid selector",
            ErrorKind::Security => "security violation",
            ErrorKind::MessageEof => "unexpected end of message body",
            ErrorKind::MessageFormat => "message format mismatch",
            ErrorKind::MessageNotReadable => "message not readable",
            ErrorKind::MessageNotWriteable => "message not writeable",
            ErrorKind::ResourceAllocation => "resource allocation failure",
            ErrorKind::TransactionInProgress => "transaction in progress",
            ErrorKind::TransactionRolledBack => "transaction rolled back",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the connection/session API.
#[derive(Error, Debug)]
#[error("{kind}: {reason}")]
pub struct JmsError {
    kind: ErrorKind,
    reason: String,
    error_code: Option<String>,
    #[source]
    linked: Option<LinkedError>,
}

/// Failure reported by the simplified context API.
#[derive(Error, Debug)]
#[error("{kind}: {reason}")]
pub struct JmsRuntimeError {
    kind: ErrorKind,
    reason: String,
    error_code: Option<String>,
    #[source]
    linked: Option<LinkedError>,
}

macro_rules! error_impl {
    ($ty:ident { $($ctor:ident => $kind:ident),+ $(,)? }) => {
        impl $ty {
            pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
                Self {
                    kind,
                    reason: reason.into(),
                    error_code: None,
                    linked: None,
                }
            }

            $(
                pub fn $ctor(reason: impl Into<String>) -> Self {
                    Self::new(ErrorKind::$kind, reason)
                }
            )+

            /// Attach a provider specific error code.
            pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
                self.error_code = Some(code.into());
                self
            }

            /// Attach the lower level failure that caused this one.
            pub fn with_linked(mut self, cause: impl Into<LinkedError>) -> Self {
                self.linked = Some(cause.into());
                self
            }

            pub fn set_linked(&mut self, cause: impl Into<LinkedError>) {
                self.linked = Some(cause.into());
            }

            pub fn kind(&self) -> ErrorKind {
                self.kind
            }

            pub fn reason(&self) -> &str {
                &self.reason
            }

            pub fn error_code(&self) -> Option<&str> {
                self.error_code.as_deref()
            }

            pub fn linked(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
                self.linked.as_deref()
            }

            pub fn take_linked(&mut self) -> Option<LinkedError> {
                self.linked.take()
            }
        }
    };
}

error_impl!(JmsError {
    generic => Generic,
    illegal_state => IllegalState,
    invalid_client_id => InvalidClientId,
    invalid_destination => InvalidDestination,
    invalid_selector => InvalidSelector,
    security => Security,
    message_eof => MessageEof,
    message_format => MessageFormat,
    message_not_readable => MessageNotReadable,
    message_not_writeable => MessageNotWriteable,
    resource_allocation => ResourceAllocation,
    transaction_in_progress => TransactionInProgress,
    transaction_rolled_back => TransactionRolledBack,
});

error_impl!(JmsRuntimeError {
    generic => Generic,
    illegal_state => IllegalState,
    invalid_client_id => InvalidClientId,
    invalid_destination => InvalidDestination,
    invalid_selector => InvalidSelector,
    security => Security,
    message_eof => MessageEof,
    message_format => MessageFormat,
    message_not_readable => MessageNotReadable,
    message_not_writeable => MessageNotWriteable,
    resource_allocation => ResourceAllocation,
    transaction_in_progress => TransactionInProgress,
    transaction_rolled_back => TransactionRolledBack,
});

impl From<JmsError> for JmsRuntimeError {
    fn from(e: JmsError) -> Self {
        JmsRuntimeError {
            kind: e.kind,
            reason: e.reason,
            error_code: e.error_code,
            linked: e.linked,
        }
    }
}

impl From<JmsRuntimeError> for JmsError {
    fn from(e: JmsRuntimeError) -> Self {
        JmsError {
            kind: e.kind,
            reason: e.reason,
            error_code: e.error_code,
            linked: e.linked,
        }
    }
}

impl From<serde_json::Error> for JmsError {
    fn from(e: serde_json::Error) -> Self {
        JmsError::message_format("Object body could not be (de)serialized").with_linked(e)
    }
}
