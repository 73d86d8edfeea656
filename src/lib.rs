//! User-space verdicts for packets diverted to a netfilter queue.
//!
//! ```rust,ignore
//! use nfq_handler::{NfqTransport, QueueHandler, VerdictCode};
//!
//! let mut handler = QueueHandler::new(NfqTransport::default());
//! handler.open(1, 65535)?;
//! handler.run(|mut packet| packet.set_verdict(VerdictCode::Accept))?;
//! ```

pub mod config;
pub mod decoder;
pub mod error;
mod intercepted_packet;
mod packet_metadata;
mod queue_handler;
pub mod transport;
mod verdict;
mod verdict_code;

pub use config::QueueConfig;
pub use decoder::{IpHeaderDecoder, IpView, PacketDecoder};
pub use error::{BoxError, HandlerError, OpenError, RunError, TransportError, VerdictError};
pub use intercepted_packet::InterceptedPacket;
pub use packet_metadata::{METADATA_VERSION, PacketId, PacketMetadata, interface_name};
pub use queue_handler::{CloseHandle, OpenState, QueueHandler, create_queue_handler};
pub use transport::{MemoryTransport, MonitorTransport, NfqOptions, NfqTransport, Transport};
pub use verdict::Verdict;
pub use verdict_code::VerdictCode;
