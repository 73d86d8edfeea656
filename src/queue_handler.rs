use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};

use crate::config::{DEFAULT_BUFFER_SIZE, DEFAULT_IDLE_BACKOFF_US};
use crate::error::{BoxError, HandlerError, OpenError, RunError, TransportError};
use crate::intercepted_packet::InterceptedPacket;
use crate::transport::{Delivery, SharedTransport, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    Unopened,
    Open,
    Closed,
}

/// Asks a running receive loop to stop at its next wait for a delivery.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn close(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ==========================================
// One bound netfilter queue
// ==========================================
/// Owns the transport of one queue and runs its receive loop.
///
/// Lifecycle: `Unopened` -> [`open`](Self::open) -> `Open` ->
/// [`run`](Self::run) / [`close`](Self::close) -> `Closed`. A handler is
/// opened at most once.
pub struct QueueHandler {
    transport: SharedTransport,
    state: OpenState,
    queue_num: u16,
    buffer_size: u32,
    idle_backoff: Duration,
    close_handle: CloseHandle,
}

impl QueueHandler {
    pub fn new(transport: impl Transport + 'static) -> Self {
        let transport: SharedTransport = Arc::new(Mutex::new(transport));
        Self {
            transport,
            state: OpenState::Unopened,
            queue_num: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            idle_backoff: Duration::from_micros(DEFAULT_IDLE_BACKOFF_US),
            close_handle: CloseHandle::default(),
        }
    }

    /// How long the loop sleeps when the transport has nothing to deliver.
    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn state(&self) -> OpenState {
        self.state
    }

    /// Queue number, once opened.
    pub fn queue_num(&self) -> Option<u16> {
        match self.state {
            OpenState::Unopened => None,
            _ => Some(self.queue_num),
        }
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn close_handle(&self) -> CloseHandle {
        self.close_handle.clone()
    }

    /// Binds the transport to `queue_num`, capturing at most `buffer_size`
    /// bytes per packet.
    ///
    /// A rejected bind leaves the handler unopened, so the caller may retry.
    pub fn open(&mut self, queue_num: u16, buffer_size: u32) -> Result<(), OpenError> {
        if self.state != OpenState::Unopened {
            return Err(OpenError::AlreadyOpen {
                queue_num: self.queue_num,
            });
        }
        if buffer_size == 0 {
            return Err(OpenError::InvalidBufferSize);
        }

        self.lock_transport()
            .and_then(|mut transport| transport.bind(queue_num, buffer_size))
            .map_err(|source| {
                error!("Failed to open queue {}: {}", queue_num, source);
                OpenError::TransportFailure { queue_num, source }
            })?;

        self.queue_num = queue_num;
        self.buffer_size = buffer_size;
        self.state = OpenState::Open;
        info!("Queue {} open (buffer size {})", queue_num, buffer_size);
        Ok(())
    }

    /// Runs the receive loop, handing every packet to `callback` in delivery
    /// order, one at a time.
    ///
    /// Blocks until the queue shuts down: `Ok(())` once the close handle is
    /// triggered or the transport ends its stream, an error when the
    /// transport breaks or the callback fails. A callback failure stops the
    /// loop; no verdict is issued on its behalf.
    pub fn run<F, E>(&mut self, mut callback: F) -> Result<(), RunError>
    where
        F: FnMut(InterceptedPacket) -> Result<(), E>,
        E: Into<BoxError>,
    {
        if self.state != OpenState::Open {
            return Err(RunError::NotOpen);
        }
        debug!("Receive loop started on queue {}", self.queue_num);

        loop {
            if self.close_handle.is_closed() {
                info!("Close requested on queue {}", self.queue_num);
                self.close().map_err(RunError::TransportFailure)?;
                return Ok(());
            }

            // The transport lock is released before the callback runs
            let delivery = self
                .lock_transport()
                .and_then(|mut transport| transport.next_delivery())
                .map_err(|e| {
                    error!("Receive loop on queue {} failed: {}", self.queue_num, e);
                    RunError::TransportFailure(e)
                })?;

            match delivery {
                Delivery::Packet(raw) => {
                    let id = raw.metadata.id;
                    debug!(
                        "Packet {} received on queue {} ({} bytes)",
                        id,
                        self.queue_num,
                        raw.payload.len()
                    );

                    let packet = InterceptedPacket::new(
                        raw.metadata,
                        raw.payload,
                        self.buffer_size as usize,
                        Arc::clone(&self.transport),
                    );

                    callback(packet).map_err(|e| {
                        let source: BoxError = e.into();
                        error!("Callback failed on packet {}: {}", id, source);
                        RunError::CallbackFailure { id, source }
                    })?;
                }
                Delivery::Idle => thread::sleep(self.idle_backoff),
                Delivery::Closed => {
                    info!("Transport for queue {} ended its stream", self.queue_num);
                    self.close().map_err(RunError::TransportFailure)?;
                    return Ok(());
                }
            }
        }
    }

    /// Unbinds the transport. Packets still holding the transport fail their
    /// verdicts from here on.
    pub fn close(&mut self) -> Result<(), TransportError> {
        if self.state != OpenState::Open {
            return Ok(());
        }
        self.state = OpenState::Closed;
        self.lock_transport()?.close()?;
        info!("Queue {} closed", self.queue_num);
        Ok(())
    }

    fn lock_transport(&self) -> Result<MutexGuard<'_, dyn Transport + 'static>, TransportError> {
        self.transport
            .lock()
            .map_err(|_| TransportError::lock_poisoned("queue transport"))
    }
}

impl Drop for QueueHandler {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Error closing queue {} on drop: {}", self.queue_num, e);
        }
    }
}

/// Opens `queue_num` on `transport` and runs `callback` on it.
///
/// `buffer_size` defaults to 65535. Blocks for as long as the receive loop
/// runs and returns the closed handler afterwards.
pub fn create_queue_handler<T, F, E>(
    transport: T,
    queue_num: u16,
    buffer_size: Option<u32>,
    callback: F,
) -> Result<QueueHandler, HandlerError>
where
    T: Transport + 'static,
    F: FnMut(InterceptedPacket) -> Result<(), E>,
    E: Into<BoxError>,
{
    let mut handler = QueueHandler::new(transport);
    handler.open(queue_num, buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE))?;
    handler.run(callback)?;
    Ok(handler)
}
