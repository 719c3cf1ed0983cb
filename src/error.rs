//! Main Crate Error

use crate::dispatcher::EventCategory;

#[derive(thiserror::Error, Debug)]
/// Dstack crate error enum.
pub enum Error {
    /// The call was made with a malformed argument, like a bootstrap address without a port.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// [crate::initialize] was called while a process-wide node is already running.
    #[error("Network was already initialized in this process")]
    AlreadyInitialized,

    /// An operation of the process-wide facade was called before [crate::initialize].
    #[error("Network is not initialized, call initialize first")]
    NotInitialized,

    /// Binding the socket, or resolving the bootstrap node, failed.
    #[error("Failed to initialize the network: {0}")]
    NetworkInit(#[source] std::io::Error),

    /// A key string that is not exactly 40 hexadecimal digits.
    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    /// The value can't be canonically encoded, so it can't be hashed into a key.
    #[error("Could not hash value: {0}")]
    UnhashableValue(String),

    /// The handler's calling convention doesn't match the event category.
    #[error("Handler is not callable for {0} events")]
    NotCallable(EventCategory),

    /// Handlers for this event category are not supported.
    #[error("Can't handle {0} events yet")]
    NotImplemented(EventCategory),

    /// The overlay engine thread is no longer running.
    #[error("Overlay engine was shutdown")]
    Shutdown,

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),
}

/// Alias for `Result<T, dstack::Error>`.
pub type Result<T, E = Error> = core::result::Result<T, E>;
