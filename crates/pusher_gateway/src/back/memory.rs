//! In-memory back-end implementation.
//!
//! Used by the test-suite and by local development without a back pool.
//! Every opened stream hands its server-side halves to the owning
//! [`MemoryBackClient`] so a test can read what the gateway wrote and
//! inject frames as if it were the back.

use super::{
    BackClient, BackConnector, BackStreamPair, RoomStreamPair, SpaceStreamPair, ZoneFeed,
    STREAM_BUFFER,
};
use crate::error::GatewayError;
use async_trait::async_trait;
use dashmap::DashMap;
use pusher_protocol::{
    AdminMessage, AdminRoomMessage, BackId, BanUserMessage, RoomInMessage, RoomOutMessage,
    SpaceInMessage, SpaceOutMessage, ZoneEvent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Server-side halves of a room stream opened by the gateway.
#[derive(Debug)]
pub struct MemoryRoomStream {
    /// What the gateway wrote toward the back
    pub incoming: mpsc::Receiver<RoomInMessage>,
    /// Frames the fake back sends toward the gateway
    pub outgoing: mpsc::Sender<Result<RoomOutMessage, GatewayError>>,
}

/// Server-side halves of the shared space stream.
#[derive(Debug)]
pub struct MemorySpaceStream {
    pub incoming: mpsc::Receiver<SpaceInMessage>,
    pub outgoing: mpsc::Sender<Result<SpaceOutMessage, GatewayError>>,
}

/// Server-side half of a zone feed.
#[derive(Debug)]
pub struct MemoryZoneFeed {
    pub room_url: String,
    pub outgoing: mpsc::Sender<Result<ZoneEvent, GatewayError>>,
}

/// One fake back-end instance.
#[derive(Debug, Default)]
pub struct MemoryBackClient {
    room_streams: Mutex<Vec<MemoryRoomStream>>,
    space_streams: Mutex<Vec<MemorySpaceStream>>,
    zone_feeds: Mutex<Vec<MemoryZoneFeed>>,
    watch_space_calls: AtomicUsize,
    admin_messages: Mutex<Vec<AdminMessage>>,
    bans: Mutex<Vec<BanUserMessage>>,
    room_broadcasts: Mutex<Vec<AdminRoomMessage>>,
}

impl MemoryBackClient {
    /// Takes ownership of every room stream opened so far.
    pub fn take_room_streams(&self) -> Vec<MemoryRoomStream> {
        std::mem::take(&mut *self.room_streams.lock().expect("room streams lock"))
    }

    /// Takes ownership of every space stream opened so far.
    pub fn take_space_streams(&self) -> Vec<MemorySpaceStream> {
        std::mem::take(&mut *self.space_streams.lock().expect("space streams lock"))
    }

    /// Takes ownership of every zone feed opened so far.
    pub fn take_zone_feeds(&self) -> Vec<MemoryZoneFeed> {
        std::mem::take(&mut *self.zone_feeds.lock().expect("zone feeds lock"))
    }

    /// How many times `watch_space` was called on this back-end.
    pub fn watch_space_calls(&self) -> usize {
        self.watch_space_calls.load(Ordering::SeqCst)
    }

    /// Admin messages received via the unary RPC.
    pub fn admin_messages(&self) -> Vec<AdminMessage> {
        self.admin_messages.lock().expect("admin lock").clone()
    }

    /// Ban requests received via the unary RPC.
    pub fn bans(&self) -> Vec<BanUserMessage> {
        self.bans.lock().expect("bans lock").clone()
    }

    /// Room broadcasts received via the unary RPC.
    pub fn room_broadcasts(&self) -> Vec<AdminRoomMessage> {
        self.room_broadcasts.lock().expect("broadcasts lock").clone()
    }
}

#[async_trait]
impl BackClient for MemoryBackClient {
    async fn join_room(&self) -> Result<RoomStreamPair, GatewayError> {
        let (in_tx, in_rx) = mpsc::channel(STREAM_BUFFER);
        let (out_tx, out_rx) = mpsc::channel(STREAM_BUFFER);
        self.room_streams
            .lock()
            .expect("room streams lock")
            .push(MemoryRoomStream {
                incoming: in_rx,
                outgoing: out_tx,
            });
        Ok(BackStreamPair {
            writer: in_tx,
            reader: out_rx,
        })
    }

    async fn watch_space(&self) -> Result<SpaceStreamPair, GatewayError> {
        self.watch_space_calls.fetch_add(1, Ordering::SeqCst);
        let (in_tx, in_rx) = mpsc::channel(STREAM_BUFFER);
        let (out_tx, out_rx) = mpsc::channel(STREAM_BUFFER);
        self.space_streams
            .lock()
            .expect("space streams lock")
            .push(MemorySpaceStream {
                incoming: in_rx,
                outgoing: out_tx,
            });
        Ok(BackStreamPair {
            writer: in_tx,
            reader: out_rx,
        })
    }

    async fn watch_zones(&self, room_url: &str) -> Result<ZoneFeed, GatewayError> {
        let (out_tx, out_rx) = mpsc::channel(STREAM_BUFFER);
        self.zone_feeds
            .lock()
            .expect("zone feeds lock")
            .push(MemoryZoneFeed {
                room_url: room_url.to_string(),
                outgoing: out_tx,
            });
        Ok(ZoneFeed { reader: out_rx })
    }

    async fn send_admin_message(&self, message: AdminMessage) -> Result<(), GatewayError> {
        self.admin_messages.lock().expect("admin lock").push(message);
        Ok(())
    }

    async fn ban(&self, message: BanUserMessage) -> Result<(), GatewayError> {
        self.bans.lock().expect("bans lock").push(message);
        Ok(())
    }

    async fn send_admin_message_to_room(
        &self,
        message: AdminRoomMessage,
    ) -> Result<(), GatewayError> {
        self.room_broadcasts
            .lock()
            .expect("broadcasts lock")
            .push(message);
        Ok(())
    }
}

/// Connector handing out one [`MemoryBackClient`] per back-end index.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    backs: DashMap<BackId, Arc<MemoryBackClient>>,
    connect_count: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fake back-end at `back`, creating it if no stream reached it yet.
    pub fn back(&self, back: BackId) -> Arc<MemoryBackClient> {
        self.backs
            .entry(back)
            .or_insert_with(|| Arc::new(MemoryBackClient::default()))
            .clone()
    }

    /// How many dials the directory performed.
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackConnector for MemoryConnector {
    async fn connect(&self, back: BackId) -> Result<Arc<dyn BackClient>, GatewayError> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.back(back))
    }
}
