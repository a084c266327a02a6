//! Presence sets of the reference backend.

use crate::provider::Shared;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use switchboard_core::{
    ListenerId, Presence, PresenceEvent, PresenceHandler, PresenceMember, PresenceStatus,
    Registry, Result,
};
use tracing::debug;

#[derive(Default)]
struct Members {
    /// Insertion order.
    list: Vec<PresenceMember>,
    /// Id of the local member, while entered.
    local: Option<String>,
}

impl Members {
    fn local_mut(&mut self) -> Option<&mut PresenceMember> {
        let id = self.local.as_deref()?;
        self.list.iter_mut().find(|m| m.id == id)
    }
}

/// In-memory presence set for one channel.
///
/// The local member is tracked separately from members injected with
/// [`MockPresence::add_remote_member`], so one channel can show several
/// members in tests.
pub struct MockPresence {
    channel: String,
    shared: Arc<Shared>,
    members: Mutex<Members>,
    /// `None` keys receive every event.
    handlers: Registry<Option<PresenceEvent>, PresenceHandler>,
}

impl MockPresence {
    pub(crate) fn new(channel: &str, shared: Arc<Shared>) -> Self {
        Self {
            channel: channel.to_string(),
            shared,
            members: Mutex::new(Members::default()),
            handlers: Registry::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Members> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: PresenceEvent, member: PresenceMember) {
        let handlers = self
            .handlers
            .select(|key| key.map_or(true, |wanted| wanted == event));
        let member = Arc::new(member);
        for handler in handlers {
            let member = Arc::clone(&member);
            self.shared
                .dispatcher
                .schedule(move || handler(event, member.as_ref()));
        }
    }

    /// Add a member that is not the local one and announce it with `enter`.
    pub fn add_remote_member(&self, member: PresenceMember) {
        self.lock().list.push(member.clone());
        debug!(channel = %self.channel, member = %member.id, "Remote member entered");
        self.notify(PresenceEvent::Enter, member);
    }

    /// Remove a remote member and announce it with `leave`.
    ///
    /// Returns `false` if no such member exists.
    pub fn remove_remote_member(&self, id: &str) -> bool {
        let removed = {
            let mut members = self.lock();
            members
                .list
                .iter()
                .position(|m| m.id == id)
                .map(|pos| members.list.remove(pos))
        };
        match removed {
            Some(mut member) => {
                member.status = PresenceStatus::Offline;
                member.touch();
                self.notify(PresenceEvent::Leave, member);
                true
            }
            None => false,
        }
    }

    /// Announce every current member with `sync`.
    pub fn resync(&self) {
        let members = self.lock().list.clone();
        for member in members {
            self.notify(PresenceEvent::Sync, member);
        }
    }

    /// Id of the local member, while entered.
    #[must_use]
    pub fn local_member_id(&self) -> Option<String> {
        self.lock().local.clone()
    }
}

#[async_trait]
impl Presence for MockPresence {
    fn subscribe(&self, handler: PresenceHandler) -> ListenerId {
        self.handlers.insert(None, handler)
    }

    fn subscribe_to(&self, event: PresenceEvent, handler: PresenceHandler) -> ListenerId {
        self.handlers.insert(Some(event), handler)
    }

    fn unsubscribe(&self, id: Option<ListenerId>) {
        match id {
            Some(id) => {
                self.handlers.remove(id);
            }
            None => self.handlers.clear(),
        }
    }

    async fn get(&self) -> Result<Vec<PresenceMember>> {
        Ok(self.lock().list.clone())
    }

    async fn enter(&self, data: Option<Map<String, Value>>) -> Result<()> {
        let data = data.unwrap_or_default();
        let (event, member) = {
            let mut members = self.lock();
            if let Some(local) = members.local_mut() {
                local.merge_data(data);
                (PresenceEvent::Update, local.clone())
            } else {
                let mut member = PresenceMember::new(self.shared.next_member_id(), data);
                member.connection_id = Some(self.shared.connection_id.clone());
                members.local = Some(member.id.clone());
                members.list.push(member.clone());
                (PresenceEvent::Enter, member)
            }
        };

        debug!(channel = %self.channel, member = %member.id, event = %event, "Presence entered");
        self.notify(event, member);
        Ok(())
    }

    async fn leave(&self) -> Result<()> {
        let removed = {
            let mut members = self.lock();
            match members.local.take() {
                Some(id) => members
                    .list
                    .iter()
                    .position(|m| m.id == id)
                    .map(|pos| members.list.remove(pos)),
                None => None,
            }
        };

        if let Some(mut member) = removed {
            member.status = PresenceStatus::Offline;
            member.touch();
            debug!(channel = %self.channel, member = %member.id, "Presence left");
            self.notify(PresenceEvent::Leave, member);
        }
        Ok(())
    }

    async fn update(&self, data: Map<String, Value>) -> Result<()> {
        let updated = {
            let mut members = self.lock();
            members.local_mut().map(|local| {
                local.merge_data(data);
                local.clone()
            })
        };

        match updated {
            Some(member) => self.notify(PresenceEvent::Update, member),
            None => debug!(channel = %self.channel, "Presence update before enter ignored"),
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.lock().list.len())
    }
}
