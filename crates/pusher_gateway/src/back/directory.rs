//! Back-end resolution and client memoization.
//!
//! Rooms and spaces are partitioned over the configured back-end pool by a
//! stable hash of their name. The directory memoizes one connected RPC
//! client per back-end; concurrent resolutions of the same back-end share a
//! single pending dial by storing the future itself in the map.

use super::{BackClient, BackConnector};
use crate::error::GatewayError;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use pusher_protocol::BackId;
use std::sync::Arc;
use tracing::{debug, warn};

type SharedClient = Shared<BoxFuture<'static, Result<Arc<dyn BackClient>, Arc<GatewayError>>>>;

/// Maps room URLs and space names to back-end instances and hands out the
/// memoized RPC client for each.
#[derive(Debug)]
pub struct BackendDirectory {
    connector: Arc<dyn BackConnector>,
    back_count: u32,
    clients: DashMap<BackId, SharedClient>,
}

impl BackendDirectory {
    /// Creates a directory over `back_count` back-end instances.
    pub fn new(connector: Arc<dyn BackConnector>, back_count: u32) -> Self {
        assert!(back_count > 0, "back-end pool cannot be empty");
        Self {
            connector,
            back_count,
            clients: DashMap::new(),
        }
    }

    /// Resolves a key (room URL or space name) to its back-end index.
    ///
    /// FNV-1a; stable for the process lifetime, which is all the contract
    /// requires.
    pub fn index(&self, key: &str) -> BackId {
        const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
        let mut hash = FNV_OFFSET;
        for byte in key.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        BackId((hash % u64::from(self.back_count)) as u32)
    }

    /// The RPC client for the back-end owning `room_id`.
    pub async fn room_client(&self, room_id: &str) -> Result<Arc<dyn BackClient>, GatewayError> {
        self.client_for(self.index(room_id)).await
    }

    /// The RPC client for the back-end owning `space_name`.
    pub async fn space_client(
        &self,
        space_name: &str,
    ) -> Result<Arc<dyn BackClient>, GatewayError> {
        self.client_for(self.index(space_name)).await
    }

    /// The memoized client for a back-end index, dialing on first use.
    ///
    /// The pending dial is inserted synchronously under the map shard lock,
    /// so concurrent callers await the same future instead of dialing
    /// twice. A failed dial removes the entry so the next caller retries.
    pub async fn client_for(&self, back: BackId) -> Result<Arc<dyn BackClient>, GatewayError> {
        let pending = self
            .clients
            .entry(back)
            .or_insert_with(|| {
                debug!("🔌 Dialing {}", back);
                let connector = self.connector.clone();
                async move { connector.connect(back).await.map_err(Arc::new) }
                    .boxed()
                    .shared()
            })
            .clone();

        match pending.await {
            Ok(client) => Ok(client),
            Err(err) => {
                warn!("Dial to {} failed: {}", back, err);
                self.clients.remove(&back);
                Err(GatewayError::BackUnreachable(back, err.to_string()))
            }
        }
    }

    /// Number of configured back-end instances.
    pub fn back_count(&self) -> u32 {
        self.back_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::memory::MemoryConnector;

    #[test]
    fn index_is_stable_and_in_range() {
        let directory = BackendDirectory::new(Arc::new(MemoryConnector::new()), 4);
        let first = directory.index("space/town-square");
        assert_eq!(first, directory.index("space/town-square"));
        assert!(first.0 < 4);
    }

    #[tokio::test]
    async fn concurrent_resolution_dials_once() {
        let connector = Arc::new(MemoryConnector::new());
        let directory = Arc::new(BackendDirectory::new(connector.clone(), 2));

        let a = directory.clone();
        let b = directory.clone();
        let (ra, rb) = tokio::join!(a.client_for(BackId(1)), b.client_for(BackId(1)));
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(connector.connect_count(), 1);
    }
}
