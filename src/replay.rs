use crate::address::{ObjectId, ObjectKind};
use crate::debug;
use crate::error::Result;
use crate::objects::SharingSpace;
use crate::protocol::{self, ProtocolMessage};
use crate::values::PayloadValue;
use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::Arc;

/// The transport/session contract: connect, room membership, keyed
/// properties, and networked spawn/despawn.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn join_room(&self, room: &str) -> Result<()>;
    async fn leave_room(&self) -> Result<()>;
    async fn get_property(&self, key: &str) -> Result<Option<PayloadValue>>;
    async fn set_property(&self, key: &str, value: PayloadValue) -> Result<()>;
    async fn send_message(&self, target: Option<&str>, message: &ProtocolMessage) -> Result<()>;
    async fn spawn_object(&self, id: &ObjectId) -> Result<()>;
    async fn despawn_object(&self, id: &ObjectId) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct ReplayStats {
    pub objects_replayed: u32,
    pub server_wins: u32,
    pub local_pushes: u32,
    pub skipped_properties: u32,
}

struct CapturedObject {
    kind: ObjectKind,
    id: ObjectId,
    properties: AHashMap<String, PayloadValue>,
}

/// Drives the join-time reconciliation sequence: capture, destroy dynamic
/// objects, join, then replay properties with server-wins precedence.
pub struct ReplaySession<P: SessionProvider> {
    space: Arc<SharingSpace>,
    provider: Arc<P>,
}

impl<P: SessionProvider> ReplaySession<P> {
    pub fn new(space: Arc<SharingSpace>, provider: Arc<P>) -> Self {
        Self { space, provider }
    }

    pub fn space(&self) -> &Arc<SharingSpace> {
        &self.space
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Rejoins `room` and reconciles local state with the server.
    ///
    /// A join failure aborts the whole sequence; replay itself is
    /// best-effort per property.
    pub async fn rejoin(&self, room: &str) -> Result<ReplayStats> {
        // Capture shallow snapshots first; properties may keep mutating
        // while the join is in flight.
        let captured: Vec<CapturedObject> = self
            .space
            .roots()
            .iter()
            .map(|root| CapturedObject {
                kind: root.id().kind,
                id: root.id().clone(),
                properties: root.properties(),
            })
            .collect();

        // Dynamic identities do not survive a room change; destroy them
        // locally and regenerate after the join.
        for object in &captured {
            if object.kind == ObjectKind::Dynamic {
                self.space.remove(&object.id);
            }
        }

        self.provider.join_room(room).await?;
        debug::trace_replay(&format!("joined '{}', replaying {} objects", room, captured.len()));

        let mut stats = ReplayStats::default();
        let mut pushes: Vec<(String, PayloadValue)> = Vec::new();

        // Notify phase: every server-known value is surfaced locally before
        // any local value is pushed back.
        for object in &captured {
            let live = if object.kind == ObjectKind::Dynamic {
                let fresh = self.space.create_root(object.kind, "");
                if let Err(e) = self.provider.spawn_object(fresh.id()).await {
                    debug::trace_replay(&format!("spawn of {} failed: {}", fresh.id(), e));
                    stats.skipped_properties += object.properties.len() as u32;
                    continue;
                }
                fresh
            } else {
                self.space.resolve(&object.id)
            };

            stats.objects_replayed += 1;

            for (name, local_value) in &object.properties {
                let key = protocol::encode_property_key(&live.id().encode(), name);

                match self.provider.get_property(&key).await {
                    Ok(Some(server_value)) => {
                        if server_value != *local_value {
                            // Server wins on replay: it may reflect changes
                            // made by other clients while we were away.
                            live.notify_property_changed(name, server_value);
                            stats.server_wins += 1;
                        }
                    }
                    Ok(None) => {
                        // Locally novel; the server never saw it.
                        pushes.push((key, local_value.clone()));
                    }
                    Err(e) => {
                        debug::trace_replay(&format!("lookup of '{}' failed: {}", key, e));
                        stats.skipped_properties += 1;
                    }
                }
            }
        }

        // Push phase.
        for (key, value) in pushes {
            match self.provider.set_property(&key, value).await {
                Ok(()) => stats.local_pushes += 1,
                Err(e) => {
                    debug::trace_replay(&format!("push of '{}' failed: {}", key, e));
                    stats.skipped_properties += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Leaves the current room and disposes every dynamic object.
    pub async fn leave(&self) -> Result<()> {
        self.provider.leave_room().await?;
        for root in self.space.roots() {
            if root.id().kind == ObjectKind::Dynamic {
                self.space.remove(root.id());
            }
        }
        Ok(())
    }
}
