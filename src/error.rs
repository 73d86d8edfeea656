use thiserror::Error;

use crate::packet_metadata::PacketId;
use crate::verdict_code::VerdictCode;

/// Error type a callback may return from [`QueueHandler::run`].
///
/// [`QueueHandler::run`]: crate::QueueHandler::run
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Error from the netlink socket
    #[error("netlink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport is closed")]
    Closed,

    #[error("transport is not bound to a queue")]
    NotBound,

    #[error("bind rejected: {0}")]
    BindRejected(String),

    /// The id is not awaiting a verdict: already decided, expired, or never delivered.
    #[error("no packet awaiting a verdict with id {0}")]
    UnknownPacket(PacketId),

    #[error("verdict {0} cannot be expressed by this transport")]
    Unsupported(VerdictCode),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl TransportError {
    pub fn lock_poisoned(resource: &str) -> Self {
        Self::LockPoisoned(format!("Failed to acquire lock on {}", resource))
    }
}

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("queue handler is already open (queue {queue_num})")]
    AlreadyOpen { queue_num: u16 },

    #[error("buffer size must be greater than zero")]
    InvalidBufferSize,

    #[error("failed to bind queue {queue_num}: {source}")]
    TransportFailure {
        queue_num: u16,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Error)]
pub enum VerdictError {
    #[error("packet {0} already has a verdict")]
    AlreadyDecided(PacketId),

    #[error("verdict ordinal {0} is not a netfilter verdict")]
    InvalidVerdict(u32),

    #[error("failed to relay verdict for packet {id}: {source}")]
    TransportFailure {
        id: PacketId,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("queue handler is not open")]
    NotOpen,

    #[error("receive loop failed: {0}")]
    TransportFailure(#[source] TransportError),

    #[error("callback failed on packet {id}: {source}")]
    CallbackFailure {
        id: PacketId,
        #[source]
        source: BoxError,
    },
}

/// Error of the open-then-run convenience path.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Open(#[from] OpenError),

    #[error(transparent)]
    Run(#[from] RunError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
