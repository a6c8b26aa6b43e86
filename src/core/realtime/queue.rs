//! Response queue between the socket read path and the consumer.
//!
//! The queue is split into two sub-channels with different backpressure
//! policies:
//!
//! - **data**: bounded, carries audio/text deltas, partial transcripts and
//!   unknown frames. When full the newest event is dropped.
//! - **control**: unbounded, carries function calls, errors, lifecycle markers
//!   and final transcripts. Never drops.
//!
//! Pushing never waits, so a slow consumer cannot stall the read loop. Every
//! event is stamped with a sequence number at push time and [`EventStream`]
//! merges both sub-channels back into socket order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use super::base::RealtimeEvent;

#[derive(Debug)]
struct Sequenced {
    seq: u64,
    event: RealtimeEvent,
}

/// Result of a single push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Event is in the queue
    Queued,
    /// Data sub-channel was full; the event was discarded
    Dropped,
    /// Consumer is gone
    Closed,
}

/// Create a response queue whose data sub-channel holds `capacity` events.
pub fn channel(capacity: usize) -> (EventSender, EventStream) {
    let (data_tx, data_rx) = mpsc::channel(capacity.max(1));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let dropped = Arc::new(AtomicU64::new(0));

    let sender = EventSender {
        data: data_tx,
        control: control_tx,
        next_seq: Arc::new(AtomicU64::new(0)),
        dropped: dropped.clone(),
    };
    let stream = EventStream {
        data: data_rx,
        control: control_rx,
        pending_data: None,
        pending_control: None,
        data_open: true,
        control_open: true,
        dropped,
    };
    (sender, stream)
}

/// Producer half. The stream ends once every clone is dropped.
#[derive(Debug, Clone)]
pub struct EventSender {
    data: mpsc::Sender<Sequenced>,
    control: mpsc::UnboundedSender<Sequenced>,
    next_seq: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Push without waiting.
    pub fn push(&self, event: RealtimeEvent) -> PushOutcome {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let item = Sequenced { seq, event };

        if item.event.is_control() {
            return match self.control.send(item) {
                Ok(()) => PushOutcome::Queued,
                Err(_) => PushOutcome::Closed,
            };
        }

        match self.data.try_send(item) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(item)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = item.event.kind(),
                    dropped, "Response queue full, dropping event"
                );
                PushOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// Whether the consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct EventStream {
    data: mpsc::Receiver<Sequenced>,
    control: mpsc::UnboundedReceiver<Sequenced>,
    pending_data: Option<Sequenced>,
    pending_control: Option<Sequenced>,
    data_open: bool,
    control_open: bool,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Receive the next event in socket order. Returns `None` once the
    /// producer side has shut down and everything buffered was delivered.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        loop {
            if let Some(event) = self.next_ready() {
                return Some(event);
            }

            // Both sub-channels are empty: wait for whichever fills first.
            tokio::select! {
                biased;
                item = self.control.recv(), if self.control_open => match item {
                    Some(item) => self.pending_control = Some(item),
                    None => self.control_open = false,
                },
                item = self.data.recv(), if self.data_open => match item {
                    Some(item) => self.pending_data = Some(item),
                    None => self.data_open = false,
                },
                else => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<RealtimeEvent> {
        self.next_ready()
    }

    /// Number of data events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop accepting events. Already queued events can still be received.
    pub fn close(&mut self) {
        self.data.close();
        self.control.close();
    }

    fn next_ready(&mut self) -> Option<RealtimeEvent> {
        // Control is polled before data: once a data event with sequence `n`
        // is visible, every control event below `n` is visible too.
        if self.pending_control.is_none() {
            self.pending_control = self.control.try_recv().ok();
        }
        if self.pending_data.is_none() {
            self.pending_data = self.data.try_recv().ok();
            if self.pending_data.is_some() && self.pending_control.is_none() {
                self.pending_control = self.control.try_recv().ok();
            }
        }

        let take_control = match (&self.pending_control, &self.pending_data) {
            (Some(control), Some(data)) => control.seq < data.seq,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return None,
        };

        let item = if take_control {
            self.pending_control.take()
        } else {
            self.pending_data.take()
        };
        item.map(|item| item.event)
    }
}
