//! Per-client batching of outbound zone events.
//!
//! Zone fan-out produces bursts of small sub-messages (user joins, moves,
//! group updates). Sending each as its own WebSocket frame wastes both
//! bandwidth and client wake-ups, so every client carries a [`BatchEmitter`]
//! that coalesces sub-messages into a `batchMessage` envelope. A batch is
//! flushed when it reaches the configured size or when the flush-interval
//! tick fires, whichever comes first.

use crate::client::ClientFrame;
use pusher_protocol::{BatchSubMessage, PusherToClientMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

/// Batching parameters.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Flush as soon as this many sub-messages are queued
    pub max_size: usize,
    /// Flush at least this often regardless of queue depth
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: 32,
            flush_interval: Duration::from_millis(100),
        }
    }
}

/// Coalesces zone sub-messages for one client.
#[derive(Debug)]
pub struct BatchEmitter {
    queue: Mutex<Vec<BatchSubMessage>>,
    config: BatchConfig,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    disconnecting: Arc<AtomicBool>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl BatchEmitter {
    /// Creates the emitter and spawns its flush-interval task.
    ///
    /// The task holds only a weak reference; dropping the emitter stops it.
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientFrame>,
        disconnecting: Arc<AtomicBool>,
        config: BatchConfig,
    ) -> Arc<Self> {
        let emitter = Arc::new(Self {
            queue: Mutex::new(Vec::new()),
            config,
            outbound,
            disconnecting,
            flusher: Mutex::new(None),
        });

        let weak: Weak<BatchEmitter> = Arc::downgrade(&emitter);
        let flush_interval = config.flush_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(flush_interval);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(emitter) => emitter.flush(),
                    None => break,
                }
            }
        });
        *emitter.flusher.lock().expect("flusher lock") = Some(handle);

        emitter
    }

    /// Queues a sub-message; flushes immediately when the batch is full.
    pub fn push(&self, sub: BatchSubMessage) {
        let full = {
            let mut queue = self.queue.lock().expect("batch queue lock");
            queue.push(sub);
            queue.len() >= self.config.max_size
        };
        if full {
            self.flush();
        }
    }

    /// Drains the queue into one `batchMessage` envelope.
    pub fn flush(&self) {
        let payload = {
            let mut queue = self.queue.lock().expect("batch queue lock");
            if queue.is_empty() {
                return;
            }
            std::mem::take(&mut *queue)
        };
        if self.disconnecting.load(Ordering::SeqCst) {
            return;
        }
        let _ = self
            .outbound
            .send(ClientFrame::Message(PusherToClientMessage::Batch {
                payload,
            }));
    }

    /// Number of queued sub-messages (for tests and gauges).
    pub fn pending(&self) -> usize {
        self.queue.lock().expect("batch queue lock").len()
    }
}

impl Drop for BatchEmitter {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.flusher.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_emitter(max_size: usize) -> (Arc<BatchEmitter>, mpsc::UnboundedReceiver<ClientFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = BatchEmitter::new(
            tx,
            Arc::new(AtomicBool::new(false)),
            BatchConfig {
                max_size,
                flush_interval: Duration::from_secs(3600),
            },
        );
        (emitter, rx)
    }

    #[tokio::test]
    async fn flushes_when_batch_is_full() {
        let (emitter, mut rx) = make_emitter(2);
        emitter.push(BatchSubMessage::UserLeft { user_id: 1 });
        assert!(rx.try_recv().is_err());
        emitter.push(BatchSubMessage::UserLeft { user_id: 2 });

        match rx.try_recv().expect("batch flushed") {
            ClientFrame::Message(PusherToClientMessage::Batch { payload }) => {
                assert_eq!(payload.len(), 2);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(emitter.pending(), 0);
    }

    #[tokio::test]
    async fn explicit_flush_drains_partial_batch() {
        let (emitter, mut rx) = make_emitter(100);
        emitter.push(BatchSubMessage::UserLeft { user_id: 1 });
        emitter.flush();
        assert!(matches!(
            rx.try_recv().expect("flushed"),
            ClientFrame::Message(PusherToClientMessage::Batch { .. })
        ));
    }

    #[tokio::test]
    async fn disconnecting_gates_the_flush() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let disconnecting = Arc::new(AtomicBool::new(false));
        let emitter = BatchEmitter::new(tx, disconnecting.clone(), BatchConfig::default());

        emitter.push(BatchSubMessage::UserLeft { user_id: 1 });
        disconnecting.store(true, Ordering::SeqCst);
        emitter.flush();
        assert!(rx.try_recv().is_err());
    }
}
