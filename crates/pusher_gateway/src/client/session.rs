//! Individual client sessions.

use super::ClientFrame;
use crate::back::room_stream::RoomStreamHandle;
use crate::batch::{BatchConfig, BatchEmitter};
use pusher_protocol::{
    ClientId, PusherToClientMessage, SpaceFilter, SpaceUser, SpaceUserId, Viewport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Lifecycle of a client session.
///
/// `disconnecting` is tracked separately as a sticky flag because teardown
/// can race in-flight handlers; the state enum records forward progress
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// WebSocket established, room join not yet issued
    Upgraded,
    /// `joinRoomMessage` sent, waiting for the back to confirm
    JoiningRoom,
    /// In a room, possibly watching spaces
    InRoom,
    /// Teardown started
    Disconnecting,
    /// Fully torn down
    Closed,
}

/// Per-socket state owned by the WebSocket layer and read by the core.
#[derive(Debug)]
pub struct SocketData {
    /// Stable account identifier from the upgrade request
    pub user_uuid: String,
    /// Back-assigned numeric id, captured from `roomJoinedMessage`
    pub user_id: Option<SpaceUserId>,
    /// Remote address, for the admin listener protocol
    pub ip_address: String,
    /// Moderation/permission tags ("admin" gates the admin operations)
    pub tags: Vec<String>,
    /// Display name
    pub name: String,
    /// Character textures selected by the client
    pub character_texture_ids: Vec<String>,
    /// External chat identifier
    pub chat_id: String,
    /// Whether the back granted map-edit rights on join
    pub can_edit: bool,
    /// The room URL this client plays in
    pub room_id: String,
    /// Last reported viewport
    pub viewport: Viewport,
    /// Session lifecycle state
    pub state: ClientState,
    /// The client's room back-stream, present once the join was issued
    pub room_stream: Option<Arc<RoomStreamHandle>>,
    /// Names of the spaces this client watches
    pub spaces: Vec<String>,
    /// Per-space filter mirror, kept in sync with the Space-side state
    pub space_filters: HashMap<String, Vec<SpaceFilter>>,
    /// The canonical presence record, mutated via field-mask merges
    pub space_user: SpaceUser,
}

/// A connected front socket as seen by the multiplexer.
///
/// All mutable state lives behind a `RwLock` that is only ever held for
/// straight-line sections (never across an await point); the sticky
/// `disconnecting` flag is atomic so the batch emitter and stream pumps can
/// consult it without locking.
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    data: RwLock<SocketData>,
    disconnecting: Arc<AtomicBool>,
    batch: Arc<BatchEmitter>,
}

/// Identity captured from the upgrade request.
#[derive(Debug, Clone, Default)]
pub struct ClientIdentity {
    pub user_uuid: String,
    pub name: String,
    pub ip_address: String,
    pub tags: Vec<String>,
    pub character_texture_ids: Vec<String>,
    pub chat_id: String,
    pub room_id: String,
}

impl ClientSession {
    /// Creates a session and the receiver its socket writer task drains.
    pub fn new(
        identity: ClientIdentity,
        batch_config: BatchConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ClientFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let disconnecting = Arc::new(AtomicBool::new(false));
        let batch = BatchEmitter::new(tx.clone(), disconnecting.clone(), batch_config);

        let space_user = SpaceUser {
            uuid: identity.user_uuid.clone(),
            name: identity.name.clone(),
            play_uri: identity.room_id.clone(),
            tags: identity.tags.clone(),
            chat_id: identity.chat_id.clone(),
            ..Default::default()
        };

        let session = Arc::new(Self {
            id: ClientId::new(),
            outbound: tx,
            data: RwLock::new(SocketData {
                user_uuid: identity.user_uuid,
                user_id: None,
                ip_address: identity.ip_address,
                tags: identity.tags,
                name: identity.name,
                character_texture_ids: identity.character_texture_ids,
                chat_id: identity.chat_id,
                can_edit: false,
                room_id: identity.room_id,
                viewport: Viewport::default(),
                state: ClientState::Upgraded,
                room_stream: None,
                spaces: Vec::new(),
                space_filters: HashMap::new(),
                space_user,
            }),
            disconnecting,
            batch,
        });
        (session, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The per-client zone-event coalescer.
    pub fn batch(&self) -> &BatchEmitter {
        &self.batch
    }

    /// Read access to the socket data.
    pub fn data(&self) -> std::sync::RwLockReadGuard<'_, SocketData> {
        self.data.read().expect("socket data lock")
    }

    /// Write access to the socket data. Never hold across an await point.
    pub fn data_mut(&self) -> std::sync::RwLockWriteGuard<'_, SocketData> {
        self.data.write().expect("socket data lock")
    }

    /// True once teardown has started; sticky.
    pub fn is_disconnecting(&self) -> bool {
        self.disconnecting.load(Ordering::SeqCst)
    }

    /// Marks the session as disconnecting. Every later send is dropped.
    pub fn begin_disconnect(&self) {
        self.disconnecting.store(true, Ordering::SeqCst);
        self.data_mut().state = ClientState::Disconnecting;
    }

    /// True if the client carries the "admin" tag.
    pub fn is_admin(&self) -> bool {
        self.data().tags.iter().any(|t| t == "admin")
    }

    /// Back-assigned user id, if the room join completed.
    pub fn user_id(&self) -> Option<SpaceUserId> {
        self.data().user_id
    }

    /// Queues a message for the client unless it is disconnecting.
    ///
    /// Delivery is best effort: a message to a torn-down socket is dropped.
    pub fn send(&self, message: PusherToClientMessage) {
        if self.is_disconnecting() {
            return;
        }
        let _ = self.outbound.send(ClientFrame::Message(message));
    }

    /// Sends an `errorMessage` frame.
    pub fn send_error(&self, message: impl Into<String>) {
        self.send(PusherToClientMessage::Error {
            message: message.into(),
        });
    }

    /// Requests a WebSocket close with the given code and reason.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.outbound.send(ClientFrame::Close {
            code,
            reason: reason.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sends_are_dropped_once_disconnecting() {
        let (session, mut rx) = ClientSession::new(ClientIdentity::default(), BatchConfig::default());
        session.send(PusherToClientMessage::Error {
            message: "one".to_string(),
        });
        assert!(rx.try_recv().is_ok());

        session.begin_disconnect();
        session.send(PusherToClientMessage::Error {
            message: "two".to_string(),
        });
        assert!(rx.try_recv().is_err());
        assert!(session.is_disconnecting());
    }

    #[tokio::test]
    async fn admin_tag_is_detected() {
        let identity = ClientIdentity {
            tags: vec!["member".to_string(), "admin".to_string()],
            ..Default::default()
        };
        let (session, _rx) = ClientSession::new(identity, BatchConfig::default());
        assert!(session.is_admin());
    }
}
