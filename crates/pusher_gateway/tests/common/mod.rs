//! Shared harness for gateway integration tests: an in-memory back pool, a
//! canned admin service, and helpers to build sessions and drain their
//! outbound channels.
#![allow(dead_code)] // each test binary uses a different subset

use async_trait::async_trait;
use pusher_gateway::admin::{AdminService, ChatMemberList, OauthRefresh, PlayerReport};
use pusher_gateway::back::memory::MemoryConnector;
use pusher_gateway::back::BackendDirectory;
use pusher_gateway::batch::BatchConfig;
use pusher_gateway::client::session::ClientIdentity;
use pusher_gateway::client::{ClientFrame, ClientSession};
use pusher_gateway::embed::EmbeddableChecker;
use pusher_gateway::error::GatewayError;
use pusher_gateway::{GatewayConfig, SessionMultiplexer};
use pusher_protocol::client::Member;
use pusher_protocol::PusherToClientMessage;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Admin service with canned answers and call recording.
#[derive(Debug, Default)]
pub struct FakeAdminService {
    pub same_world_rooms: Mutex<Vec<String>>,
    pub reports: Mutex<Vec<PlayerReport>>,
    pub chat_id_updates: Mutex<Vec<(String, String)>>,
}

impl FakeAdminService {
    pub fn with_same_world_rooms(rooms: Vec<&str>) -> Arc<Self> {
        let service = Self::default();
        *service.same_world_rooms.lock().unwrap() =
            rooms.into_iter().map(str::to_string).collect();
        Arc::new(service)
    }
}

#[async_trait]
impl AdminService for FakeAdminService {
    async fn report_player(&self, report: PlayerReport) -> Result<(), GatewayError> {
        self.reports.lock().unwrap().push(report);
        Ok(())
    }

    async fn ban_user_by_uuid(
        &self,
        _uuid: &str,
        _room_url: &str,
        _name: &str,
        _message: &str,
        _by_user_uuid: &str,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn tags_list(&self, _room_url: &str) -> Result<Vec<String>, GatewayError> {
        Ok(vec!["admin".to_string()])
    }

    async fn rooms_from_same_world(&self, _room_url: &str) -> Result<Vec<String>, GatewayError> {
        Ok(self.same_world_rooms.lock().unwrap().clone())
    }

    async fn search_members(
        &self,
        _play_uri: &str,
        _search: &str,
    ) -> Result<Vec<Member>, GatewayError> {
        Ok(Vec::new())
    }

    async fn search_tags(
        &self,
        _play_uri: &str,
        _search: &str,
    ) -> Result<Vec<String>, GatewayError> {
        Ok(Vec::new())
    }

    async fn get_member(&self, _uuid: &str) -> Result<Member, GatewayError> {
        Ok(Member::default())
    }

    async fn world_chat_members(
        &self,
        _play_uri: &str,
        _search: &str,
    ) -> Result<ChatMemberList, GatewayError> {
        Ok(ChatMemberList::default())
    }

    async fn update_chat_id(&self, uuid: &str, chat_id: &str) -> Result<(), GatewayError> {
        self.chat_id_updates
            .lock()
            .unwrap()
            .push((uuid.to_string(), chat_id.to_string()));
        Ok(())
    }

    async fn refresh_oauth_token(&self, _token: &str) -> Result<OauthRefresh, GatewayError> {
        Ok(OauthRefresh {
            token: "refreshed".to_string(),
            message: String::new(),
        })
    }
}

/// A multiplexer wired to an in-memory back pool.
pub struct TestHarness {
    pub connector: Arc<MemoryConnector>,
    pub admin: Arc<FakeAdminService>,
    pub mux: Arc<SessionMultiplexer>,
}

pub fn harness(back_count: u32) -> TestHarness {
    harness_with_admin(back_count, Arc::new(FakeAdminService::default()))
}

pub fn harness_with_admin(back_count: u32, admin: Arc<FakeAdminService>) -> TestHarness {
    let connector = Arc::new(MemoryConnector::new());
    let directory = Arc::new(BackendDirectory::new(connector.clone(), back_count));
    let mux = SessionMultiplexer::new(
        directory,
        admin.clone(),
        EmbeddableChecker::new(Vec::new()),
        GatewayConfig::default(),
    );
    TestHarness {
        connector,
        admin,
        mux,
    }
}

/// A session with a long batch flush so tests control flushing themselves.
pub fn client_in_room(
    room_id: &str,
    name: &str,
) -> (Arc<ClientSession>, mpsc::UnboundedReceiver<ClientFrame>) {
    client_with_tags(room_id, name, Vec::new())
}

pub fn client_with_tags(
    room_id: &str,
    name: &str,
    tags: Vec<String>,
) -> (Arc<ClientSession>, mpsc::UnboundedReceiver<ClientFrame>) {
    ClientSession::new(
        ClientIdentity {
            user_uuid: format!("uuid-{name}"),
            name: name.to_string(),
            ip_address: "127.0.0.1".to_string(),
            tags,
            room_id: room_id.to_string(),
            ..Default::default()
        },
        BatchConfig {
            max_size: 32,
            flush_interval: Duration::from_secs(3600),
        },
    )
}

/// Lets the spawned pump/demux tasks run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Drains every queued protocol message from a session channel.
pub fn drain_messages(
    rx: &mut mpsc::UnboundedReceiver<ClientFrame>,
) -> Vec<PusherToClientMessage> {
    let mut messages = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        if let ClientFrame::Message(message) = frame {
            messages.push(message);
        }
    }
    messages
}
