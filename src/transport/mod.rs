use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::packet_metadata::{PacketId, PacketMetadata};
use crate::verdict_code::VerdictCode;

mod memory;
mod monitor;
mod nfq_transport;

pub use memory::{MemoryRecorder, MemoryTransport, SentVerdict};
pub use monitor::{MonitorTransport, QueueStats};
pub use nfq_transport::{NfqOptions, NfqTransport};

/// One packet handed over by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDelivery {
    pub metadata: PacketMetadata,
    pub payload: Vec<u8>,
}

impl RawDelivery {
    pub fn new(metadata: PacketMetadata, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            metadata,
            payload: payload.into(),
        }
    }
}

/// Outcome of asking a transport for the next delivery.
#[derive(Debug)]
pub enum Delivery {
    Packet(RawDelivery),
    /// Nothing pending right now; ask again later.
    Idle,
    /// The stream has ended and no more packets will arrive.
    Closed,
}

/// The kernel-facing side of a queue.
///
/// `next_delivery` must not block indefinitely: the receive loop only holds
/// the transport while polling, so deferred verdicts can reach it in between.
pub trait Transport: Send {
    fn bind(&mut self, queue_num: u16, max_capture_bytes: u32) -> Result<(), TransportError>;

    fn next_delivery(&mut self) -> Result<Delivery, TransportError>;

    fn send_verdict(
        &mut self,
        id: PacketId,
        verdict: VerdictCode,
        mark: Option<u32>,
        payload: Option<Vec<u8>>,
    ) -> Result<(), TransportError>;

    /// Forgets a delivered packet without relaying a verdict for it.
    ///
    /// The kernel still holds the packet until its queue timeout expires.
    fn release(&mut self, id: PacketId) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bind(&mut self, queue_num: u16, max_capture_bytes: u32) -> Result<(), TransportError> {
        (**self).bind(queue_num, max_capture_bytes)
    }

    fn next_delivery(&mut self) -> Result<Delivery, TransportError> {
        (**self).next_delivery()
    }

    fn send_verdict(
        &mut self,
        id: PacketId,
        verdict: VerdictCode,
        mark: Option<u32>,
        payload: Option<Vec<u8>>,
    ) -> Result<(), TransportError> {
        (**self).send_verdict(id, verdict, mark, payload)
    }

    fn release(&mut self, id: PacketId) -> Result<(), TransportError> {
        (**self).release(id)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

/// A transport shared between the receive loop and the packets it hands out.
pub(crate) type SharedTransport = Arc<Mutex<dyn Transport>>;
