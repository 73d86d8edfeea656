use std::collections::HashMap;
use std::io::ErrorKind;

use log::{debug, info, warn};
use nfq::{Message, Queue, Verdict};

use crate::error::TransportError;
use crate::packet_metadata::{PacketId, PacketMetadata};
use crate::transport::{Delivery, RawDelivery, Transport};
use crate::verdict_code::VerdictCode;

/// Queue settings applied at bind time.
#[derive(Debug, Clone)]
pub struct NfqOptions {
    /// Packets the kernel may hold for this queue before applying the fail policy.
    pub queue_max_len: u32,
    /// Accept instead of drop when the kernel queue overflows.
    pub fail_open: bool,
    /// Ask the kernel for the sending socket's UID/GID.
    pub recv_uid_gid: bool,
    /// Ask the kernel for the sending process's security context.
    pub recv_security_context: bool,
    /// Accept GSO packets and packets with partial checksums.
    pub recv_gso: bool,
}

impl Default for NfqOptions {
    fn default() -> Self {
        Self {
            queue_max_len: 10000,
            fail_open: false,
            recv_uid_gid: false,
            recv_security_context: false,
            recv_gso: false,
        }
    }
}

// ==========================================
// Kernel transport over NETLINK_NETFILTER
// ==========================================
/// Messages awaiting a verdict are held here under the kernel's packet id,
/// since `nfq` verdicts a whole `Message` rather than an id.
pub struct NfqTransport {
    options: NfqOptions,
    queue: Option<Queue>,
    queue_num: u16,
    pending: HashMap<u32, Message>,
    closed: bool,
}

impl NfqTransport {
    pub fn new(options: NfqOptions) -> Self {
        Self {
            options,
            queue: None,
            queue_num: 0,
            pending: HashMap::new(),
            closed: false,
        }
    }

    /// Packets delivered but not yet given a verdict.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn queue_mut(&mut self) -> Result<&mut Queue, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.queue.as_mut().ok_or(TransportError::NotBound)
    }

    fn metadata_of(msg: &Message) -> PacketMetadata {
        let mut meta = PacketMetadata::new(msg.get_packet_id());
        meta.payload_len = msg.get_payload().len();
        meta.original_len = msg.get_original_len();
        meta.nfmark = msg.get_nfmark();
        meta.timestamp = msg.get_timestamp();
        meta.indev = msg.get_indev();
        meta.outdev = msg.get_outdev();
        meta.physindev = msg.get_physindev();
        meta.physoutdev = msg.get_physoutdev();
        meta.hw_addr = msg.get_hw_addr().map(|addr| addr.to_vec());
        meta.hw_protocol = msg.get_hw_protocol();
        meta.hook = msg.get_hook();
        meta.uid = msg.get_uid();
        meta.gid = msg.get_gid();

        if let Some(secctx) = msg.get_security_context() {
            meta.extras.insert("secctx".to_string(), secctx.to_string());
        }
        meta.extras.insert(
            "seg_offloaded".to_string(),
            msg.is_seg_offloaded().to_string(),
        );
        meta.extras.insert(
            "checksum_ready".to_string(),
            msg.is_checksum_ready().to_string(),
        );
        meta
    }
}

impl Default for NfqTransport {
    fn default() -> Self {
        Self::new(NfqOptions::default())
    }
}

/// Maps a verdict onto what `nfq` can send. `nfq` has no way to express
/// `NF_STOLEN`; `NF_QUEUE` targets queue 0.
pub(crate) fn to_nfq_verdict(code: VerdictCode) -> Option<Verdict> {
    match code {
        VerdictCode::Drop => Some(Verdict::Drop),
        VerdictCode::Accept => Some(Verdict::Accept),
        VerdictCode::Stolen => None,
        VerdictCode::Queue => Some(Verdict::Queue(0)),
        VerdictCode::Repeat => Some(Verdict::Repeat),
        VerdictCode::Stop => Some(Verdict::Stop),
    }
}

impl Transport for NfqTransport {
    fn bind(&mut self, queue_num: u16, max_capture_bytes: u32) -> Result<(), TransportError> {
        if self.queue.is_some() {
            return Err(TransportError::BindRejected(format!(
                "already bound to queue {}",
                self.queue_num
            )));
        }

        // Copy range is a 16 bit quantity on the wire
        let copy_range = u16::try_from(max_capture_bytes).unwrap_or(u16::MAX);

        let mut q = Queue::open()?;
        q.bind(queue_num)?;
        q.set_copy_range(queue_num, copy_range.into())?;
        q.set_queue_max_len(queue_num, self.options.queue_max_len)?;
        q.set_fail_open(queue_num, self.options.fail_open)?;
        q.set_recv_uid_gid(queue_num, self.options.recv_uid_gid)?;
        q.set_recv_security_context(queue_num, self.options.recv_security_context)?;
        q.set_recv_gso(queue_num, self.options.recv_gso)?;
        q.set_nonblocking(true);

        info!(
            "Bound netfilter queue {} (copy range {}, max len {}, fail open {})",
            queue_num, copy_range, self.options.queue_max_len, self.options.fail_open
        );
        debug!(
            "Queue {} metadata: uid/gid {}, secctx {}, gso {}",
            queue_num,
            self.options.recv_uid_gid,
            self.options.recv_security_context,
            self.options.recv_gso
        );

        self.queue = Some(q);
        self.queue_num = queue_num;
        self.closed = false;
        Ok(())
    }

    fn next_delivery(&mut self) -> Result<Delivery, TransportError> {
        let q = self.queue_mut()?;
        match q.recv() {
            Ok(msg) => {
                let metadata = Self::metadata_of(&msg);
                let payload = msg.get_payload().to_vec();
                self.pending.insert(metadata.id.0, msg);
                Ok(Delivery::Packet(RawDelivery::new(metadata, payload)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(Delivery::Idle),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(Delivery::Idle),
            Err(e) => Err(e.into()),
        }
    }

    fn send_verdict(
        &mut self,
        id: PacketId,
        verdict: VerdictCode,
        mark: Option<u32>,
        payload: Option<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.queue_mut()?;
        let mut msg = self
            .pending
            .remove(&id.0)
            .ok_or(TransportError::UnknownPacket(id))?;

        let Some(nfq_verdict) = to_nfq_verdict(verdict) else {
            warn!("Releasing packet {} without a verdict: {} unsupported", id, verdict);
            return Err(TransportError::Unsupported(verdict));
        };

        if let Some(mark) = mark {
            msg.set_nfmark(mark);
        }
        if let Some(payload) = payload {
            if verdict == VerdictCode::Drop {
                debug!("Replacement payload for dropped packet {} is ignored", id);
            }
            msg.set_payload(payload);
        }
        msg.set_verdict(nfq_verdict);

        self.queue_mut()?.verdict(msg)?;
        Ok(())
    }

    fn release(&mut self, id: PacketId) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        // Dropping the message sends nothing to the kernel
        self.pending
            .remove(&id.0)
            .map(|_| ())
            .ok_or(TransportError::UnknownPacket(id))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        if !self.pending.is_empty() {
            warn!(
                "Closing queue {} with {} packets still awaiting a verdict",
                self.queue_num,
                self.pending.len()
            );
            self.pending.clear();
        }

        if let Some(mut q) = self.queue.take() {
            q.unbind(self.queue_num)?;
            info!("Unbound netfilter queue {}", self.queue_num);
        }
        Ok(())
    }
}
