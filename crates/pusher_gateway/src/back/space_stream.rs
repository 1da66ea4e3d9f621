//! Shared per-back-end space streams.
//!
//! All spaces living on the same back-end share one bidirectional stream.
//! Its lifetime is the union of the lifetimes of those spaces: it is opened
//! when the first space on that back-end is joined and disposed when the
//! last one is deleted. The demux task routes inbound frames to the owning
//! space, answers pings, and enforces the 60-second heartbeat watchdog.

use super::SpaceStreamPair;
use crate::error::GatewayError;
use crate::multiplexer::SessionMultiplexer;
use pusher_protocol::{BackId, SpaceInMessage, SpaceOutMessage};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

/// The back must ping at least this often; a silent stream is presumed dead.
pub const PING_TIMEOUT: Duration = Duration::from_secs(60);

/// The shared stream to one back-end's space service.
#[derive(Debug)]
pub struct BackSpaceConnection {
    back_id: BackId,
    writer: mpsc::Sender<SpaceInMessage>,
    demux: Mutex<Option<JoinHandle<()>>>,
}

impl BackSpaceConnection {
    /// Wires a freshly opened stream: spawns the demux/watchdog task.
    ///
    /// The task holds only a weak reference to the multiplexer so a dropped
    /// multiplexer (tests) tears the task down instead of leaking it.
    pub fn spawn(
        back_id: BackId,
        pair: SpaceStreamPair,
        mux: Weak<SessionMultiplexer>,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            back_id,
            writer: pair.writer.clone(),
            demux: Mutex::new(None),
        });
        let handle = tokio::spawn(demux_space_stream(back_id, pair.reader, pair.writer, mux));
        *connection.demux.lock().expect("demux lock") = Some(handle);
        connection
    }

    pub fn back_id(&self) -> BackId {
        self.back_id
    }

    /// Writes a frame toward the back.
    pub async fn write(&self, message: SpaceInMessage) -> Result<(), GatewayError> {
        self.writer
            .send(message)
            .await
            .map_err(|_| GatewayError::BackStreamClosed)
    }

    /// Ends the stream; dropping the last writer closes the outbound half.
    pub fn end(&self) {
        if let Ok(mut guard) = self.demux.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for BackSpaceConnection {
    fn drop(&mut self) {
        self.end();
    }
}

/// Demultiplexes inbound frames and enforces the ping watchdog.
async fn demux_space_stream(
    back_id: BackId,
    mut reader: mpsc::Receiver<Result<SpaceOutMessage, GatewayError>>,
    writer: mpsc::Sender<SpaceInMessage>,
    mux: Weak<SessionMultiplexer>,
) {
    let watchdog = sleep(PING_TIMEOUT);
    tokio::pin!(watchdog);

    loop {
        tokio::select! {
            frame = reader.recv() => match frame {
                Some(Ok(SpaceOutMessage::Ping)) => {
                    if writer.send(SpaceInMessage::Pong).await.is_err() {
                        warn!("Pong to {} failed; stream is gone", back_id);
                        break;
                    }
                    watchdog.as_mut().reset(Instant::now() + PING_TIMEOUT);
                }
                Some(Ok(SpaceOutMessage::KickOff { space_name, user_id })) => {
                    // Legacy protocol: the back expects its own kick command
                    // relayed back to it after authorization.
                    let echo = SpaceInMessage::KickOff { space_name, user_id };
                    if writer.send(echo).await.is_err() {
                        break;
                    }
                }
                Some(Ok(frame)) => {
                    let Some(mux) = mux.upgrade() else { break };
                    mux.dispatch_space_frame(frame);
                }
                Some(Err(err)) => {
                    error!("Space stream to {} errored: {}", back_id, err);
                    break;
                }
                None => {
                    debug!("Space stream to {} ended", back_id);
                    break;
                }
            },
            _ = &mut watchdog => {
                warn!("⏱️ No ping from {} within {:?}; ending stream", back_id, PING_TIMEOUT);
                break;
            }
        }
    }

    if let Some(mux) = mux.upgrade() {
        info!("Evicting spaces on {} after stream loss", back_id);
        mux.evict_back(back_id);
    }
}
