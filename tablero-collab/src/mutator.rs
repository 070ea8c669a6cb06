//! Serialized application of room mutations.
//!
//! ```text
//!  session A ──┐                 ┌──────────── room lock ─────────────┐
//!              ├── apply(room) ──┤ resolve room → read → modify →     │
//!  session B ──┘                 │ write → re-read → broadcast        │
//!                                └────────────────────────────────────┘
//! ```
//!
//! Every mutation of a room runs under that room's lock, including the
//! broadcast of the resulting state. Two mutations of the same room can
//! therefore never interleave between a read and its write-back, and each
//! broadcast is handed to the room's sessions before the next mutation's
//! broadcast is computed. Rooms use independent locks.

use std::sync::Arc;

use crate::broadcast::BroadcastHub;
use crate::locks::RoomLocks;
use crate::model::{is_unit_ratio, Component, ComponentId, Device, NewScreen, RoomId, ScreenId};
use crate::storage::{RoomStore, StoreError};

/// One logical change to a room's screens.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    AddComponent {
        screen_id: ScreenId,
        component: Component,
    },
    MoveComponent {
        screen_id: ScreenId,
        component_id: ComponentId,
        x_ratio: f64,
        y_ratio: f64,
    },
    DeleteComponent {
        screen_id: ScreenId,
        component_id: ComponentId,
    },
    AddScreen(NewScreen),
    DeleteScreen(ScreenId),
    RenameScreen {
        screen_id: ScreenId,
        new_name: String,
    },
    ChangeDevice {
        screen_id: ScreenId,
        device: Device,
    },
}

impl Mutation {
    /// Check required fields and ranges. Never touches storage.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::AddComponent { component, .. } => {
                if component.id.0.is_null() {
                    return Err("Component id is required".into());
                }
                if !is_unit_ratio(component.x_ratio) || !is_unit_ratio(component.y_ratio) {
                    return Err("Component position must be within [0, 1]".into());
                }
            }
            Self::MoveComponent { x_ratio, y_ratio, .. } => {
                if !is_unit_ratio(*x_ratio) || !is_unit_ratio(*y_ratio) {
                    return Err("xRatio and yRatio must be within [0, 1]".into());
                }
            }
            Self::AddScreen(screen) => {
                if screen.name.is_empty() {
                    return Err("Screen name is required".into());
                }
                if screen.components.iter().any(|c| !c.is_valid()) {
                    return Err("Screen contains an invalid component".into());
                }
            }
            Self::DeleteComponent { .. }
            | Self::DeleteScreen(_)
            | Self::RenameScreen { .. }
            | Self::ChangeDevice { .. } => {}
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddComponent { .. } => "addComponent",
            Self::MoveComponent { .. } => "moveComponent",
            Self::DeleteComponent { .. } => "deleteComponent",
            Self::AddScreen(_) => "addScreen",
            Self::DeleteScreen(_) => "deleteScreen",
            Self::RenameScreen { .. } => "renameScreen",
            Self::ChangeDevice { .. } => "changeDevice",
        }
    }
}

/// Why a mutation was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Missing or out-of-range field
    Validation(String),
    /// The referenced screen does not belong to the session's room
    ScreenNotInRoom(ScreenId),
    /// `deleteScreen` on the room's only screen
    LastScreen,
    /// The room no longer exists
    RoomNotFound,
}

/// Result of [`StateMutator::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Written to storage; `delivered` sessions were handed the new state.
    Committed { delivered: usize },
    /// Refused without writing anything; nothing was broadcast.
    Rejected(RejectReason),
    /// Storage failure; dropped without a broadcast.
    Failed(String),
}

impl MutationOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// What a successful write did.
enum Applied {
    Written,
    /// `deleteScreen` refused by the min-screen guard
    KeptLastScreen,
}

/// Applies mutations one at a time per room, then broadcasts.
pub struct StateMutator {
    store: Arc<RoomStore>,
    hub: Arc<BroadcastHub>,
    locks: Arc<RoomLocks>,
}

impl StateMutator {
    /// `locks` must be the same instance the hub was built with.
    pub fn new(store: Arc<RoomStore>, hub: Arc<BroadcastHub>, locks: Arc<RoomLocks>) -> Self {
        Self { store, hub, locks }
    }

    /// Apply `mutation` to `room` and broadcast the resulting state.
    ///
    /// `room` is the name the calling session authenticated into; screen
    /// ids in the mutation are only honoured if they belong to it.
    pub async fn apply(&self, room: &str, mutation: Mutation) -> MutationOutcome {
        if let Err(reason) = mutation.validate() {
            log::debug!("Rejected {} in room {room}: {reason}", mutation.name());
            return MutationOutcome::Rejected(RejectReason::Validation(reason));
        }

        let _guard = self.locks.acquire(room).await;

        let name = mutation.name();
        let result = self
            .store
            .get_room(room)
            .and_then(|record| self.write(record.id, mutation));

        match result {
            Ok(Applied::Written) => {
                log::debug!("Committed {name} in room {room}");
                let delivered = match self.hub.broadcast_room_state(room).await {
                    Ok(n) => n,
                    Err(e) => {
                        log::error!("Committed {name} in room {room} but broadcast failed: {e}");
                        0
                    }
                };
                MutationOutcome::Committed { delivered }
            }
            Ok(Applied::KeptLastScreen) => {
                log::debug!("Refused to delete the last screen of room {room}");
                MutationOutcome::Rejected(RejectReason::LastScreen)
            }
            Err(StoreError::ScreenNotFound { screen_id, .. }) => {
                log::warn!("Ignored {name} in room {room}: screen {screen_id} is not in this room");
                MutationOutcome::Rejected(RejectReason::ScreenNotInRoom(screen_id))
            }
            Err(StoreError::RoomNotFound(_)) => {
                log::warn!("Ignored {name}: room {room} no longer exists");
                MutationOutcome::Rejected(RejectReason::RoomNotFound)
            }
            Err(e) => {
                log::error!("Error applying {name} in room {room}: {e}");
                MutationOutcome::Failed(e.to_string())
            }
        }
    }

    /// The storage half of a mutation. Caller holds the room lock.
    fn write(&self, room_id: RoomId, mutation: Mutation) -> Result<Applied, StoreError> {
        match mutation {
            Mutation::AddComponent { screen_id, component } => {
                self.store.append_component(screen_id, room_id, component)?;
            }
            Mutation::MoveComponent {
                screen_id,
                component_id,
                x_ratio,
                y_ratio,
            } => {
                let mut components = self.store.get_screen_components(screen_id, room_id)?;
                for component in components.iter_mut().filter(|c| c.id == component_id) {
                    component.x_ratio = x_ratio;
                    component.y_ratio = y_ratio;
                }
                self.store
                    .replace_screen_components(screen_id, room_id, components)?;
            }
            Mutation::DeleteComponent {
                screen_id,
                component_id,
            } => {
                let mut components = self.store.get_screen_components(screen_id, room_id)?;
                components.retain(|c| c.id != component_id);
                self.store
                    .replace_screen_components(screen_id, room_id, components)?;
            }
            Mutation::AddScreen(screen) => {
                self.store.create_screen(room_id, screen)?;
            }
            Mutation::DeleteScreen(screen_id) => {
                if !self.store.delete_screen(screen_id, room_id)? {
                    return Ok(Applied::KeptLastScreen);
                }
            }
            Mutation::RenameScreen {
                screen_id,
                new_name,
            } => {
                self.store.rename_screen(screen_id, room_id, &new_name)?;
            }
            Mutation::ChangeDevice { screen_id, device } => {
                self.store.replace_device(screen_id, room_id, device)?;
            }
        }
        Ok(Applied::Written)
    }

    // ─── Named operations ─────────────────────────────────────────────

    pub async fn add_component(
        &self,
        room: &str,
        screen_id: ScreenId,
        component: Component,
    ) -> MutationOutcome {
        self.apply(room, Mutation::AddComponent { screen_id, component })
            .await
    }

    pub async fn move_component(
        &self,
        room: &str,
        screen_id: ScreenId,
        component_id: ComponentId,
        x_ratio: f64,
        y_ratio: f64,
    ) -> MutationOutcome {
        self.apply(
            room,
            Mutation::MoveComponent {
                screen_id,
                component_id,
                x_ratio,
                y_ratio,
            },
        )
        .await
    }

    pub async fn delete_component(
        &self,
        room: &str,
        screen_id: ScreenId,
        component_id: ComponentId,
    ) -> MutationOutcome {
        self.apply(room, Mutation::DeleteComponent { screen_id, component_id })
            .await
    }

    pub async fn add_screen(&self, room: &str, screen: NewScreen) -> MutationOutcome {
        self.apply(room, Mutation::AddScreen(screen)).await
    }

    pub async fn delete_screen(&self, room: &str, screen_id: ScreenId) -> MutationOutcome {
        self.apply(room, Mutation::DeleteScreen(screen_id)).await
    }

    pub async fn rename_screen(
        &self,
        room: &str,
        screen_id: ScreenId,
        new_name: impl Into<String>,
    ) -> MutationOutcome {
        self.apply(
            room,
            Mutation::RenameScreen {
                screen_id,
                new_name: new_name.into(),
            },
        )
        .await
    }

    pub async fn change_device(
        &self,
        room: &str,
        screen_id: ScreenId,
        device: Device,
    ) -> MutationOutcome {
        self.apply(room, Mutation::ChangeDevice { screen_id, device })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerEvent;
    use crate::storage::StoreConfig;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<RoomStore>,
        hub: Arc<BroadcastHub>,
        mutator: Arc<StateMutator>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store =
            Arc::new(RoomStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap());
        let locks = Arc::new(RoomLocks::new());
        let hub = Arc::new(BroadcastHub::new(store.clone(), locks.clone(), 64));
        let mutator = Arc::new(StateMutator::new(store.clone(), hub.clone(), locks));
        Fixture {
            store,
            hub,
            mutator,
            _dir: dir,
        }
    }

    fn first_screen(store: &RoomStore, room: &str) -> ScreenId {
        store.room_screens(room).unwrap()[0].id
    }

    #[tokio::test]
    async fn test_add_move_delete_component() {
        let f = fixture();
        f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");

        let outcome = f
            .mutator
            .add_component("demo", screen, Component::new("c1", 0.1, 0.1))
            .await;
        assert!(outcome.is_committed());

        f.mutator
            .move_component("demo", screen, "c1".into(), 0.5, 0.6)
            .await;
        let components = f.store.room_screens("demo").unwrap()[0].components.clone();
        assert_eq!(components.len(), 1);
        assert_eq!((components[0].x_ratio, components[0].y_ratio), (0.5, 0.6));

        f.mutator.delete_component("demo", screen, "c1".into()).await;
        assert!(f.store.room_screens("demo").unwrap()[0].components.is_empty());
    }

    #[tokio::test]
    async fn test_move_unknown_component_is_harmless_rewrite() {
        let f = fixture();
        f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");
        f.mutator
            .add_component("demo", screen, Component::new("c1", 0.1, 0.1).with_prop("type", "label"))
            .await;
        let before = f.store.room_screens("demo").unwrap();

        let outcome = f
            .mutator
            .move_component("demo", screen, "nope".into(), 0.9, 0.9)
            .await;
        assert!(outcome.is_committed());
        assert_eq!(f.store.room_screens("demo").unwrap(), before);
    }

    #[tokio::test]
    async fn test_numeric_and_string_ids_do_not_match() {
        let f = fixture();
        f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");
        f.mutator
            .add_component("demo", screen, Component::new(7u64, 0.1, 0.1))
            .await;

        f.mutator.delete_component("demo", screen, "7".into()).await;
        assert_eq!(f.store.room_screens("demo").unwrap()[0].components.len(), 1);

        f.mutator.delete_component("demo", screen, 7u64.into()).await;
        assert!(f.store.room_screens("demo").unwrap()[0].components.is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejects_before_storage() {
        let f = fixture();
        f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");

        let outcome = f
            .mutator
            .move_component("demo", screen, "c1".into(), 1.5, 0.0)
            .await;
        assert!(matches!(
            outcome,
            MutationOutcome::Rejected(RejectReason::Validation(_))
        ));

        let outcome = f
            .mutator
            .add_component("demo", screen, Component::new("c1", f64::NAN, 0.0))
            .await;
        assert!(matches!(
            outcome,
            MutationOutcome::Rejected(RejectReason::Validation(_))
        ));
        assert!(f.store.room_screens("demo").unwrap()[0].components.is_empty());
    }

    #[tokio::test]
    async fn test_rename_accepts_empty_name() {
        let f = fixture();
        f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");

        assert!(f.mutator.rename_screen("demo", screen, "").await.is_committed());
        assert_eq!(f.store.room_screens("demo").unwrap()[0].name, "");
    }

    #[tokio::test]
    async fn test_change_device_keeps_client_dimensions() {
        let f = fixture();
        f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");
        let device: Device = serde_json::from_value(
            serde_json::json!({ "name": "Custom", "width": 375.5, "height": "667" }),
        )
        .unwrap();

        assert!(f
            .mutator
            .change_device("demo", screen, device.clone())
            .await
            .is_committed());
        assert_eq!(f.store.room_screens("demo").unwrap()[0].device, device);
    }

    #[tokio::test]
    async fn test_screen_lifecycle() {
        let f = fixture();
        let room = f.store.create_room("demo", None).unwrap();
        let first = first_screen(&f.store, "demo");

        let outcome = f
            .mutator
            .add_screen("demo", NewScreen::new("Perfil", Device::new("iPad", 768, 1024)))
            .await;
        assert!(outcome.is_committed());
        let screens = f.store.list_screens(room.id).unwrap();
        assert_eq!(screens.len(), 2);
        let second = screens[1].id;

        f.mutator.rename_screen("demo", second, "Ajustes").await;
        f.mutator
            .change_device("demo", second, Device::new("Pixel 7", 412, 915))
            .await;
        let screens = f.store.list_screens(room.id).unwrap();
        assert_eq!(screens[1].name, "Ajustes");
        assert_eq!(screens[1].device, Device::new("Pixel 7", 412, 915));

        assert!(f.mutator.delete_screen("demo", first).await.is_committed());
        assert_eq!(f.store.count_screens(room.id).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_last_screen_is_kept() {
        let f = fixture();
        let room = f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");

        let mut member = f.hub.join("demo", Uuid::new_v4()).await.unwrap();
        let outcome = f.mutator.delete_screen("demo", screen).await;
        assert_eq!(outcome, MutationOutcome::Rejected(RejectReason::LastScreen));
        assert_eq!(f.store.count_screens(room.id).unwrap(), 1);
        assert!(member.receiver.try_recv().is_err(), "no broadcast on refusal");
    }

    #[tokio::test]
    async fn test_cross_room_screen_is_ignored() {
        let f = fixture();
        f.store.create_room("a", None).unwrap();
        let room_b = f.store.create_room("b", None).unwrap();
        let screen_b = first_screen(&f.store, "b");
        f.store
            .create_screen(room_b.id, NewScreen::new("Second", Device::default()))
            .unwrap();
        f.store
            .append_component(screen_b, room_b.id, Component::new("x", 0.2, 0.2))
            .unwrap();
        let b_before = f.store.room_screens("b").unwrap();

        let mut member_a = f.hub.join("a", Uuid::new_v4()).await.unwrap();
        let mut member_b = f.hub.join("b", Uuid::new_v4()).await.unwrap();

        let foreign = [
            Mutation::AddComponent {
                screen_id: screen_b,
                component: Component::new("intruder", 0.5, 0.5),
            },
            Mutation::MoveComponent {
                screen_id: screen_b,
                component_id: "x".into(),
                x_ratio: 0.9,
                y_ratio: 0.9,
            },
            Mutation::DeleteComponent {
                screen_id: screen_b,
                component_id: "x".into(),
            },
            Mutation::DeleteScreen(screen_b),
            Mutation::RenameScreen {
                screen_id: screen_b,
                new_name: "Hijacked".into(),
            },
            Mutation::ChangeDevice {
                screen_id: screen_b,
                device: Device::new("Pixel 7", 412, 915),
            },
        ];
        for mutation in foreign {
            let name = mutation.name();
            let outcome = f.mutator.apply("a", mutation).await;
            assert_eq!(
                outcome,
                MutationOutcome::Rejected(RejectReason::ScreenNotInRoom(screen_b)),
                "{name}"
            );
            assert_eq!(f.store.room_screens("b").unwrap(), b_before, "{name}");
            assert!(member_a.receiver.try_recv().is_err(), "{name} broadcast to a");
            assert!(member_b.receiver.try_recv().is_err(), "{name} broadcast to b");
        }
    }

    #[tokio::test]
    async fn test_unknown_room() {
        let f = fixture();
        let outcome = f.mutator.delete_screen("ghost", 1).await;
        assert_eq!(outcome, MutationOutcome::Rejected(RejectReason::RoomNotFound));
    }

    #[tokio::test]
    async fn test_commit_broadcasts_storage_state() {
        let f = fixture();
        f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");
        let mut one = f.hub.join("demo", Uuid::new_v4()).await.unwrap();
        let mut two = f.hub.join("demo", Uuid::new_v4()).await.unwrap();

        let outcome = f
            .mutator
            .add_component("demo", screen, Component::new("c1", 0.1, 0.1))
            .await;
        assert_eq!(outcome, MutationOutcome::Committed { delivered: 2 });

        let a = one.receiver.recv().await.unwrap();
        let b = two.receiver.recv().await.unwrap();
        assert_eq!(a, b);
        let ServerEvent::UpdateScreens(screens) = ServerEvent::decode(&a).unwrap() else {
            panic!("expected updateScreens");
        };
        assert_eq!(screens, f.store.room_screens("demo").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_moves_lose_nothing() {
        let f = fixture();
        f.store.create_room("demo", None).unwrap();
        let screen = first_screen(&f.store, "demo");
        for i in 0..32 {
            f.mutator
                .add_component("demo", screen, Component::new(format!("c{i}"), 0.0, 0.0))
                .await;
        }

        let mut tasks = Vec::new();
        for i in 0..32u32 {
            let mutator = f.mutator.clone();
            tasks.push(tokio::spawn(async move {
                let ratio = f64::from(i) / 32.0;
                mutator
                    .move_component("demo", screen, format!("c{i}").into(), ratio, ratio)
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_committed());
        }

        let components = f.store.room_screens("demo").unwrap()[0].components.clone();
        assert_eq!(components.len(), 32);
        for (i, component) in components.iter().enumerate() {
            let ratio = i as f64 / 32.0;
            assert_eq!(component.id, format!("c{i}").into());
            assert_eq!((component.x_ratio, component.y_ratio), (ratio, ratio));
        }
    }

    #[test]
    fn test_validate() {
        let ok = Mutation::AddScreen(NewScreen::new("S", Device::default()));
        assert!(ok.validate().is_ok());
        let unnamed = Mutation::AddScreen(NewScreen::new("", Device::default()));
        assert!(unnamed.validate().is_err());
        let null_id = Mutation::AddComponent {
            screen_id: 1,
            component: Component::new(ComponentId(serde_json::Value::Null), 0.0, 0.0),
        };
        assert!(null_id.validate().is_err());
    }
}
