//! Group membership resolution

use std::collections::HashMap;

use async_trait::async_trait;
use courier_protocol::Identity;
use tokio::sync::RwLock;

use crate::{GroupMembership, StoreResult};

/// Membership table held in memory. Unknown groups have no members.
#[derive(Default)]
pub struct StaticGroupMembership {
    groups: RwLock<HashMap<String, Vec<Identity>>>,
}

impl StaticGroupMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_members<I, M>(&self, group_id: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = M>,
        M: Into<Identity>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.groups.write().await.insert(group_id.into(), members);
    }

    pub async fn remove_group(&self, group_id: &str) {
        self.groups.write().await.remove(group_id);
    }
}

#[async_trait]
impl GroupMembership for StaticGroupMembership {
    async fn members(&self, group_id: &str) -> StoreResult<Vec<Identity>> {
        Ok(self
            .groups
            .read()
            .await
            .get(group_id)
            .cloned()
            .unwrap_or_default())
    }
}
