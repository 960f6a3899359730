//! TTL cache in front of the role-requirement collaborator.
//!
//! Entries expire after a fixed time-to-live measured with the injected
//! [`Clock`]. Callers that change permission assignments must call
//! [`RequirementCache::invalidate`] (or `invalidate_resource`) afterwards.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use sitegate_core::{Clock, RoleId};

use crate::collections::normalize;
use crate::store::{RoleRequirements, StoreError};

#[derive(Debug, Clone)]
struct CachedRequirement {
    roles: Arc<HashSet<RoleId>>,
    loaded_at: DateTime<Utc>,
}

pub struct RequirementCache<R> {
    source: R,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), CachedRequirement>>,
}

impl<R> RequirementCache<R>
where
    R: RoleRequirements,
{
    pub fn new(source: R, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Roles granted `permission_name` on `resource_name`.
    ///
    /// Unregistered pairs (`Ok(None)`) are not cached.
    pub fn required_roles(
        &self,
        resource_name: &str,
        permission_name: &str,
    ) -> Result<Option<Arc<HashSet<RoleId>>>, StoreError> {
        let key = (normalize(resource_name), normalize(permission_name));
        let now = self.clock.now();

        if let Some(hit) = self.fresh(&key, now) {
            return Ok(Some(hit));
        }

        let Some(roles) = self.source.required_roles(&key.0, &key.1)? else {
            return Ok(None);
        };
        let roles = Arc::new(roles);
        debug!(
            resource = %key.0,
            permission = %key.1,
            roles = roles.len(),
            "role requirements loaded"
        );

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                CachedRequirement {
                    roles: Arc::clone(&roles),
                    loaded_at: now,
                },
            );
        Ok(Some(roles))
    }

    pub fn invalidate(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn invalidate_resource(&self, resource_name: &str) {
        let resource = normalize(resource_name);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(r, _), _| *r != resource);
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh(&self, key: &(String, String), now: DateTime<Utc>) -> Option<Arc<HashSet<RoleId>>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        let age = (now - entry.loaded_at).to_std().unwrap_or(Duration::ZERO);
        (age < self.ttl).then(|| Arc::clone(&entry.roles))
    }
}
