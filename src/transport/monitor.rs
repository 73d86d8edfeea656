use std::time::{Duration, Instant};

use chrono::Local;
use log::info;

use crate::error::TransportError;
use crate::packet_metadata::PacketId;
use crate::transport::{Delivery, Transport};
use crate::verdict_code::VerdictCode;

// ==========================================
// 1. Queue counters (rates + backlog)
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub in_pkts: u64,
    pub in_bytes: u64,
    /// Relayed verdicts, indexed by verdict ordinal.
    pub verdicts: [u64; 6],
    pub failed_verdicts: u64,

    /// Packets delivered and still waiting for a verdict. Never reset.
    pub backlog_pkts: i64,
}

impl QueueStats {
    pub fn verdicts_of(&self, code: VerdictCode) -> u64 {
        self.verdicts[code.ordinal() as usize]
    }

    fn reset_rates(&mut self) {
        let backlog_pkts = self.backlog_pkts;
        *self = Self {
            backlog_pkts,
            ..Self::default()
        };
    }
}

// ==========================================
// 2. Monitoring decorator around any transport
// ==========================================
/// Counts traffic through the wrapped transport and logs a report every
/// `interval`. A zero interval disables reporting but keeps counting.
pub struct MonitorTransport<T> {
    name: String,
    pub inner: T,
    interval: Duration,
    current: QueueStats,
    totals: QueueStats,
    last_report: Instant,
}

impl<T: Transport> MonitorTransport<T> {
    pub fn new(name: &str, inner: T, interval: Duration) -> Self {
        Self {
            name: name.to_string(),
            inner,
            interval,
            current: QueueStats::default(),
            totals: QueueStats::default(),
            last_report: Instant::now(),
        }
    }

    /// Counters since the transport was created.
    pub fn totals(&self) -> &QueueStats {
        &self.totals
    }

    fn record(&mut self, update: impl Fn(&mut QueueStats)) {
        update(&mut self.current);
        update(&mut self.totals);
    }

    fn check_and_report(&mut self) {
        if self.interval.is_zero() {
            return;
        }

        let elapsed = self.last_report.elapsed();
        if elapsed < self.interval {
            return;
        }

        let now_str = Local::now().format("%H:%M:%S");
        let stat = &self.current;
        let mbps = (stat.in_bytes as f64 * 8.0) / 1_000_000.0 / elapsed.as_secs_f64();

        info!(
            "[{}] {}: in {} pkts ({:.2} Mbps) | accept {} | drop {} | other {} | failed {} | backlog {}",
            now_str,
            self.name,
            stat.in_pkts,
            mbps,
            stat.verdicts_of(VerdictCode::Accept),
            stat.verdicts_of(VerdictCode::Drop),
            stat.verdicts.iter().sum::<u64>()
                - stat.verdicts_of(VerdictCode::Accept)
                - stat.verdicts_of(VerdictCode::Drop),
            stat.failed_verdicts,
            stat.backlog_pkts
        );

        self.current.reset_rates();
        self.last_report = Instant::now();
    }
}

// ==========================================
// 3. Transport pass-through with bookkeeping
// ==========================================
impl<T: Transport> Transport for MonitorTransport<T> {
    fn bind(&mut self, queue_num: u16, max_capture_bytes: u32) -> Result<(), TransportError> {
        self.inner.bind(queue_num, max_capture_bytes)
    }

    fn next_delivery(&mut self) -> Result<Delivery, TransportError> {
        let result = self.inner.next_delivery();

        if let Ok(Delivery::Packet(ref delivery)) = result {
            let bytes = delivery.payload.len() as u64;
            self.record(|stat| {
                stat.in_pkts += 1;
                stat.in_bytes += bytes;
                stat.backlog_pkts += 1;
            });
        }

        self.check_and_report();
        result
    }

    fn send_verdict(
        &mut self,
        id: PacketId,
        verdict: VerdictCode,
        mark: Option<u32>,
        payload: Option<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let result = self.inner.send_verdict(id, verdict, mark, payload);

        match result {
            Ok(()) => self.record(|stat| {
                stat.verdicts[verdict.ordinal() as usize] += 1;
                stat.backlog_pkts -= 1;
            }),
            // Unknown ids and anything after close are already out of the backlog
            Err(TransportError::UnknownPacket(_) | TransportError::Closed) => {
                self.record(|stat| stat.failed_verdicts += 1)
            }
            Err(_) => self.record(|stat| {
                stat.failed_verdicts += 1;
                stat.backlog_pkts -= 1;
            }),
        }

        result
    }

    fn release(&mut self, id: PacketId) -> Result<(), TransportError> {
        let result = self.inner.release(id);
        if result.is_ok() {
            self.record(|stat| stat.backlog_pkts -= 1);
        }
        result
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.record(|stat| stat.backlog_pkts = 0);
        self.inner.close()
    }
}
