//! Fixed-rate publication of registry snapshots.
//!
//! Two threads cooperate: a timer thread snapshots the registry every period
//! and pushes the batch into a bounded queue, and a publisher thread drains
//! that queue into the sink. When the queue is full the oldest batch is
//! dropped, so a slow sink never delays a tick.

use crate::TransformRegistry;
use calib_frames_core::{Clock, FrameTransform, Timestamp};
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 10 Hz.
pub const DEFAULT_BROADCAST_PERIOD: Duration = Duration::from_millis(100);

pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// One broadcast message: every live transform at `stamp`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformBatch {
    pub stamp: Timestamp,
    pub transforms: Vec<FrameTransform>,
}

impl TransformBatch {
    pub fn from_registry(registry: &TransformRegistry, now: Timestamp) -> Self {
        Self {
            stamp: now,
            transforms: registry.snapshot(now),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to encode batch: {0}")]
    Encode(String),
    #[error("sink closed")]
    Closed,
}

/// Downstream consumer of broadcast batches.
pub trait TransformSink: Send + 'static {
    fn publish(&mut self, batch: &TransformBatch) -> Result<(), SinkError>;
}

impl<F> TransformSink for F
where
    F: FnMut(&TransformBatch) -> Result<(), SinkError> + Send + 'static,
{
    fn publish(&mut self, batch: &TransformBatch) -> Result<(), SinkError> {
        self(batch)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BroadcastConfig {
    pub period: Duration,
    pub queue_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_BROADCAST_PERIOD,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    sink_errors: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastStats {
    pub ticks: u64,
    pub published: u64,
    pub dropped: u64,
    pub sink_errors: u64,
}

impl Counters {
    fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

/// Called on the timer thread with the tick time, before the snapshot.
pub type TickHook = Box<dyn FnMut(Timestamp) + Send>;

/// Handle to the running timer and publisher threads.
///
/// Dropping the handle shuts both down after draining queued batches.
pub struct Broadcaster {
    stop_tx: Option<Sender<()>>,
    timer: Option<JoinHandle<()>>,
    publisher: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Broadcaster {
    pub fn spawn<C, S>(
        registry: Arc<TransformRegistry>,
        clock: C,
        config: BroadcastConfig,
        sink: S,
    ) -> std::io::Result<Self>
    where
        C: Clock + 'static,
        S: TransformSink,
    {
        Self::spawn_with_hook(registry, clock, config, sink, Box::new(|_| {}))
    }

    /// Like [`spawn`](Self::spawn), running `on_tick` with the tick time
    /// before each snapshot.
    pub fn spawn_with_hook<C, S>(
        registry: Arc<TransformRegistry>,
        clock: C,
        config: BroadcastConfig,
        mut sink: S,
        mut on_tick: TickHook,
    ) -> std::io::Result<Self>
    where
        C: Clock + 'static,
        S: TransformSink,
    {
        let capacity = config.queue_capacity.max(1);
        let (batch_tx, batch_rx) = bounded::<TransformBatch>(capacity);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let counters = Arc::new(Counters::default());
        // The timer keeps its own receiver so it can evict the oldest batch.
        let overflow_rx = batch_rx.clone();

        let publisher = {
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name("calib-frames-publish".into())
                .spawn(move || {
                    for batch in batch_rx.iter() {
                        match sink.publish(&batch) {
                            Ok(()) => {
                                counters.published.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(err) => {
                                counters.sink_errors.fetch_add(1, Ordering::Relaxed);
                                warn!("sink rejected batch stamped {}: {err}", batch.stamp);
                            }
                        }
                    }
                    debug!("publisher drained");
                })?
        };

        let timer = {
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name("calib-frames-timer".into())
                .spawn(move || {
                    let ticker = tick(config.period);
                    loop {
                        select! {
                            recv(ticker) -> _ => {
                                let now = clock.now();
                                on_tick(now);
                                let batch = TransformBatch::from_registry(&registry, now);
                                counters.ticks.fetch_add(1, Ordering::Relaxed);
                                push_drop_oldest(&batch_tx, &overflow_rx, batch, &counters);
                            }
                            recv(stop_rx) -> _ => break,
                        }
                    }
                    debug!("broadcast timer stopped");
                })?
        };

        info!(
            "broadcasting every {:?} (queue capacity {capacity})",
            config.period
        );
        Ok(Self {
            stop_tx: Some(stop_tx),
            timer: Some(timer),
            publisher: Some(publisher),
            counters,
        })
    }

    pub fn stats(&self) -> BroadcastStats {
        self.counters.snapshot()
    }

    /// Stop the timer, publish whatever is still queued and join both threads.
    pub fn shutdown(mut self) -> BroadcastStats {
        self.stop();
        self.counters.snapshot()
    }

    fn stop(&mut self) {
        // Dropping the only sender disconnects `stop_rx`, which wakes the timer.
        drop(self.stop_tx.take());
        if let Some(timer) = self.timer.take() {
            if timer.join().is_err() {
                warn!("broadcast timer panicked");
            }
        }
        if let Some(publisher) = self.publisher.take() {
            if publisher.join().is_err() {
                warn!("publisher panicked");
            }
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.stop();
    }
}

fn push_drop_oldest(
    tx: &Sender<TransformBatch>,
    rx: &Receiver<TransformBatch>,
    batch: TransformBatch,
    counters: &Counters,
) {
    let mut pending = batch;
    loop {
        match tx.try_send(pending) {
            Ok(()) => return,
            Err(TrySendError::Full(back)) => {
                if rx.try_recv().is_ok() {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                }
                pending = back;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}
