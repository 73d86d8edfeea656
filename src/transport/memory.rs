use std::collections::{HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::TransportError;
use crate::packet_metadata::{PacketId, PacketMetadata};
use crate::transport::{Delivery, RawDelivery, Transport};
use crate::verdict_code::VerdictCode;

/// A verdict as the transport received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentVerdict {
    pub id: PacketId,
    pub verdict: VerdictCode,
    pub mark: Option<u32>,
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    bound: Option<(u16, u32)>,
    bind_attempts: usize,
    delivered: usize,
    pending: HashSet<PacketId>,
    verdicts: Vec<SentVerdict>,
    released: Vec<PacketId>,
    closed: bool,
}

/// Read side of a [`MemoryTransport`], still usable after the transport
/// has been moved into a handler.
#[derive(Debug, Clone)]
pub struct MemoryRecorder(Arc<Mutex<MemoryState>>);

impl MemoryRecorder {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide what was recorded
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue number and capture size of the last successful bind.
    pub fn bound(&self) -> Option<(u16, u32)> {
        self.state().bound
    }

    pub fn bind_attempts(&self) -> usize {
        self.state().bind_attempts
    }

    pub fn delivered(&self) -> usize {
        self.state().delivered
    }

    /// Delivered packets the transport still holds for a verdict.
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    pub fn verdicts(&self) -> Vec<SentVerdict> {
        self.state().verdicts.clone()
    }

    /// Packets given up without a verdict, in release order.
    pub fn released(&self) -> Vec<PacketId> {
        self.state().released.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

// ==========================================
// Scripted in-memory transport
// ==========================================
/// Serves a fixed list of deliveries and records every verdict.
///
/// Once the script is exhausted it reports [`Delivery::Closed`].
#[derive(Debug, Default)]
pub struct MemoryTransport {
    script: VecDeque<RawDelivery>,
    expired: HashSet<PacketId>,
    reject_bind: Option<String>,
    fail_after: Option<usize>,
    idle_polls: usize,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delivery to the script.
    pub fn with_delivery(mut self, metadata: PacketMetadata, payload: impl Into<Vec<u8>>) -> Self {
        self.script.push_back(RawDelivery::new(metadata, payload));
        self
    }

    /// Appends a delivery with bare metadata for `id`.
    pub fn with_packet(self, id: u32, payload: impl Into<Vec<u8>>) -> Self {
        let payload = payload.into();
        let mut metadata = PacketMetadata::new(id);
        metadata.payload_len = payload.len();
        metadata.original_len = payload.len();
        self.with_delivery(metadata, payload)
    }

    /// Reports [`Delivery::Idle`] this many times before the first packet.
    pub fn with_idle_polls(mut self, polls: usize) -> Self {
        self.idle_polls = polls;
        self
    }

    /// Makes every bind fail with `reason`.
    pub fn reject_bind(mut self, reason: impl Into<String>) -> Self {
        self.reject_bind = Some(reason.into());
        self
    }

    /// Breaks the receive side after `deliveries` packets.
    pub fn fail_receive_after(mut self, deliveries: usize) -> Self {
        self.fail_after = Some(deliveries);
        self
    }

    /// Treats `id` as timed out on the kernel side: verdicts for it fail.
    pub fn expire(mut self, id: u32) -> Self {
        self.expired.insert(PacketId(id));
        self
    }

    pub fn recorder(&self) -> MemoryRecorder {
        MemoryRecorder(Arc::clone(&self.state))
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, TransportError> {
        self.state
            .lock()
            .map_err(|_| TransportError::lock_poisoned("memory transport state"))
    }
}

impl Transport for MemoryTransport {
    fn bind(&mut self, queue_num: u16, max_capture_bytes: u32) -> Result<(), TransportError> {
        let reject = self.reject_bind.clone();
        let mut state = self.state()?;
        state.bind_attempts += 1;
        if let Some(reason) = reject {
            return Err(TransportError::BindRejected(reason));
        }
        state.bound = Some((queue_num, max_capture_bytes));
        state.closed = false;
        Ok(())
    }

    fn next_delivery(&mut self) -> Result<Delivery, TransportError> {
        let delivered = {
            let state = self.state()?;
            if state.closed {
                return Err(TransportError::Closed);
            }
            if state.bound.is_none() {
                return Err(TransportError::NotBound);
            }
            state.delivered
        };

        if self.fail_after.is_some_and(|limit| delivered >= limit) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "netlink socket reset").into());
        }

        if self.idle_polls > 0 {
            self.idle_polls -= 1;
            return Ok(Delivery::Idle);
        }

        match self.script.pop_front() {
            Some(delivery) => {
                let mut state = self.state()?;
                state.pending.insert(delivery.metadata.id);
                state.delivered += 1;
                Ok(Delivery::Packet(delivery))
            }
            None => Ok(Delivery::Closed),
        }
    }

    fn send_verdict(
        &mut self,
        id: PacketId,
        verdict: VerdictCode,
        mark: Option<u32>,
        payload: Option<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let expired = self.expired.contains(&id);
        let mut state = self.state()?;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !state.pending.remove(&id) || expired {
            return Err(TransportError::UnknownPacket(id));
        }

        state.verdicts.push(SentVerdict {
            id,
            verdict,
            mark,
            payload,
        });
        Ok(())
    }

    fn release(&mut self, id: PacketId) -> Result<(), TransportError> {
        let mut state = self.state()?;
        if state.closed {
            return Err(TransportError::Closed);
        }
        if !state.pending.remove(&id) {
            return Err(TransportError::UnknownPacket(id));
        }
        state.released.push(id);
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state()?;
        state.pending.clear();
        state.closed = true;
        Ok(())
    }
}
