use std::fmt;

use log::{debug, warn};

use crate::error::{TransportError, VerdictError};
use crate::packet_metadata::{PacketId, PacketMetadata};
use crate::transport::SharedTransport;
use crate::verdict::Verdict;
use crate::verdict_code::VerdictCode;

/// A packet held by the kernel until it receives a verdict.
///
/// Handed to the callback by [`QueueHandler::run`]. The callback owns it and
/// may decide right away or keep it and decide later, from any thread.
///
/// [`QueueHandler::run`]: crate::QueueHandler::run
pub struct InterceptedPacket {
    metadata: PacketMetadata,
    payload: Vec<u8>,
    transport: SharedTransport,
    decided: bool,
}

impl InterceptedPacket {
    pub(crate) fn new(
        metadata: PacketMetadata,
        mut payload: Vec<u8>,
        max_len: usize,
        transport: SharedTransport,
    ) -> Self {
        if payload.len() > max_len {
            debug!(
                "Truncating packet {} payload from {} to {} bytes",
                metadata.id,
                payload.len(),
                max_len
            );
            payload.truncate(max_len);
        }

        Self {
            metadata,
            payload,
            transport,
            decided: false,
        }
    }

    pub fn id(&self) -> PacketId {
        self.metadata.id
    }

    pub fn metadata(&self) -> &PacketMetadata {
        &self.metadata
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether a verdict was already attempted, successfully or not.
    pub fn is_decided(&self) -> bool {
        self.decided
    }

    /// Relays a verdict for this packet to the kernel.
    ///
    /// Accepts a bare [`VerdictCode`], a `(code, mark)` pair or a full
    /// [`Verdict`]. A packet takes exactly one verdict attempt: after the
    /// first call, successful or not, every call fails with
    /// [`VerdictError::AlreadyDecided`].
    pub fn set_verdict(&mut self, verdict: impl Into<Verdict>) -> Result<(), VerdictError> {
        if self.decided {
            return Err(VerdictError::AlreadyDecided(self.id()));
        }
        self.relay(verdict.into())
    }

    /// Like [`set_verdict`](Self::set_verdict) for a raw verdict ordinal.
    ///
    /// Out-of-range ordinals fail with [`VerdictError::InvalidVerdict`]
    /// without reaching the transport and leave the packet undecided.
    pub fn set_verdict_ordinal(
        &mut self,
        ordinal: u32,
        mark: Option<u32>,
        payload: Option<Vec<u8>>,
    ) -> Result<(), VerdictError> {
        if self.decided {
            return Err(VerdictError::AlreadyDecided(self.id()));
        }

        let code = VerdictCode::try_from(ordinal)?;
        self.relay(Verdict {
            code,
            mark,
            payload,
        })
    }

    fn relay(&mut self, verdict: Verdict) -> Result<(), VerdictError> {
        let id = self.id();
        self.decided = true;

        debug!(
            "Verdict {} for packet {} (mark {:?}, payload {})",
            verdict.code,
            id,
            verdict.mark,
            verdict.payload.as_ref().map_or(0, |p| p.len())
        );

        let mut transport = self
            .transport
            .lock()
            .map_err(|_| VerdictError::TransportFailure {
                id,
                source: TransportError::lock_poisoned("queue transport"),
            })?;

        transport
            .send_verdict(id, verdict.code, verdict.mark, verdict.payload)
            .map_err(|source| VerdictError::TransportFailure { id, source })
    }
}

impl fmt::Debug for InterceptedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedPacket")
            .field("metadata", &self.metadata)
            .field("payload_len", &self.payload.len())
            .field("decided", &self.decided)
            .finish()
    }
}

impl Drop for InterceptedPacket {
    fn drop(&mut self) {
        if self.decided {
            return;
        }

        let id = self.metadata.id;
        warn!(
            "Packet {} released without a verdict, the kernel queue timeout applies",
            id
        );

        // A poisoned lock still guards a usable transport
        let mut transport = self.transport.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = transport.release(id) {
            debug!("Transport could not release packet {}: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::transport::{MemoryRecorder, MemoryTransport, SentVerdict};

    /// Delivers the scripted packets and wraps them as the receive loop would.
    fn delivered(transport: MemoryTransport, count: usize) -> (Vec<InterceptedPacket>, MemoryRecorder) {
        let recorder = transport.recorder();
        let shared: SharedTransport = Arc::new(Mutex::new(transport));
        let mut packets = Vec::new();
        {
            let mut guard = shared.lock().unwrap();
            guard.bind(0, 65535).unwrap();
            for _ in 0..count {
                match guard.next_delivery().unwrap() {
                    crate::transport::Delivery::Packet(raw) => packets.push(InterceptedPacket::new(
                        raw.metadata,
                        raw.payload,
                        65535,
                        Arc::clone(&shared),
                    )),
                    other => panic!("unexpected {:?}", other),
                }
            }
        }
        (packets, recorder)
    }

    #[test]
    fn test_second_verdict_is_rejected() {
        let (mut packets, recorder) = delivered(MemoryTransport::new().with_packet(5, vec![1]), 1);
        let packet = &mut packets[0];

        packet.set_verdict(VerdictCode::Accept).unwrap();
        assert!(matches!(
            packet.set_verdict(VerdictCode::Drop),
            Err(VerdictError::AlreadyDecided(PacketId(5)))
        ));
        assert!(matches!(
            packet.set_verdict_ordinal(99, None, None),
            Err(VerdictError::AlreadyDecided(PacketId(5)))
        ));
        assert_eq!(recorder.verdicts().len(), 1);
    }

    #[test]
    fn test_invalid_ordinal_never_reaches_transport() {
        let (mut packets, recorder) = delivered(MemoryTransport::new().with_packet(5, vec![1]), 1);
        let packet = &mut packets[0];

        for ordinal in [6, 100, u32::MAX] {
            assert!(matches!(
                packet.set_verdict_ordinal(ordinal, Some(1), None),
                Err(VerdictError::InvalidVerdict(o)) if o == ordinal
            ));
        }
        assert!(!packet.is_decided());
        assert!(recorder.verdicts().is_empty());

        packet.set_verdict_ordinal(1, None, None).unwrap();
        assert_eq!(recorder.verdicts()[0].verdict, VerdictCode::Accept);
    }

    #[test]
    fn test_missing_mark_differs_from_zero_mark() {
        let transport = MemoryTransport::new()
            .with_packet(1, vec![])
            .with_packet(2, vec![]);
        let (mut packets, recorder) = delivered(transport, 2);

        packets[0].set_verdict(VerdictCode::Drop).unwrap();
        packets[1].set_verdict((VerdictCode::Drop, 0)).unwrap();

        let verdicts = recorder.verdicts();
        assert_eq!(verdicts[0].mark, None);
        assert_eq!(verdicts[0].payload, None);
        assert_eq!(verdicts[1].mark, Some(0));
    }

    #[test]
    fn test_replacement_payload_is_relayed() {
        let (mut packets, recorder) = delivered(MemoryTransport::new().with_packet(3, vec![1, 2]), 1);

        packets[0]
            .set_verdict(Verdict::accept().with_mark(9).with_payload(vec![7, 7, 7]))
            .unwrap();

        assert_eq!(
            recorder.verdicts(),
            vec![SentVerdict {
                id: PacketId(3),
                verdict: VerdictCode::Accept,
                mark: Some(9),
                payload: Some(vec![7, 7, 7]),
            }]
        );
        assert_eq!(packets[0].payload(), &[1, 2]);
    }

    #[test]
    fn test_transport_failure_still_decides() {
        let transport = MemoryTransport::new().with_packet(8, vec![]).expire(8);
        let (mut packets, recorder) = delivered(transport, 1);
        let packet = &mut packets[0];

        assert!(matches!(
            packet.set_verdict(VerdictCode::Accept),
            Err(VerdictError::TransportFailure {
                id: PacketId(8),
                source: TransportError::UnknownPacket(PacketId(8)),
            })
        ));
        assert!(packet.is_decided());
        assert!(matches!(
            packet.set_verdict(VerdictCode::Accept),
            Err(VerdictError::AlreadyDecided(_))
        ));
        assert!(recorder.verdicts().is_empty());
    }

    #[test]
    fn test_undecided_drop_frees_transport_entry() {
        let mut transport = MemoryTransport::new();
        for id in 0..1000 {
            transport = transport.with_packet(id, vec![]);
        }
        let (packets, recorder) = delivered(transport, 1000);
        assert_eq!(recorder.pending(), 1000);

        drop(packets);

        assert_eq!(recorder.pending(), 0);
        assert_eq!(recorder.released().len(), 1000);
        assert!(recorder.verdicts().is_empty());
    }

    #[test]
    fn test_decided_drop_releases_nothing() {
        let (mut packets, recorder) = delivered(MemoryTransport::new().with_packet(2, vec![]), 1);
        packets[0].set_verdict(VerdictCode::Accept).unwrap();

        drop(packets);

        assert!(recorder.released().is_empty());
        assert_eq!(recorder.verdicts().len(), 1);
    }

    #[test]
    fn test_payload_is_capped_at_buffer_size() {
        let shared: SharedTransport = Arc::new(Mutex::new(MemoryTransport::new()));
        let packet = InterceptedPacket::new(PacketMetadata::new(1), vec![0u8; 100], 64, shared);
        assert_eq!(packet.payload().len(), 64);
        assert_eq!(packet.metadata().id, PacketId(1));
    }
}
