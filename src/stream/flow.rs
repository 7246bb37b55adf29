//! Pending-acknowledgement window for outbound streams.
//!
//! A producer reserves one slot per `STREAM_DATA` packet it sends and the
//! matching `STREAM_ACK` releases it. While the window is full the producer
//! stops pulling from its source. Closing the window wakes the producer so it
//! can observe that its proxy was settled from elsewhere.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
pub struct FlowControl {
    window: usize,
    pending: AtomicUsize,
    closed: AtomicBool,
    notify: Notify,
}

impl FlowControl {
    /// Pause once `window` packets are unacknowledged.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// No acknowledgements expected; only closing is tracked.
    ///
    /// Buffering is then bounded by nothing but the consumer's memory.
    pub fn unbounded() -> Self {
        Self {
            window: usize::MAX,
            ..Self::new(1)
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn is_bounded(&self) -> bool {
        self.window != usize::MAX
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn has_capacity(&self) -> bool {
        self.pending() < self.window
    }

    /// Count one sent, unacknowledged packet.
    pub fn reserve(&self) {
        if self.is_bounded() {
            self.pending.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Count one acknowledgement.
    pub fn release(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.notify.notify_waiters();
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until a packet may be sent. Returns `false` if the window was closed.
    pub async fn wait_for_capacity(&self) -> bool {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return false;
            }
            if self.has_capacity() {
                return true;
            }
            notified.await;
        }
    }

    /// Resolve once the window is closed.
    pub async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}
