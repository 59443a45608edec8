use std::collections::BTreeMap;

use thiserror::Error;

use crate::entity::handle::Entity;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("entity does not exist in the map")]
pub struct EntityDoesNotExistError;

/// Bijection between the handles of two entity stores. "Remote" handles are
/// the ones issued by the store on the other end of a delta channel, "local"
/// handles belong to the store owning this map.
pub struct EntityMap {
    remote_to_local: BTreeMap<Entity, Entity>,
    local_to_remote: BTreeMap<Entity, Entity>,
}

impl EntityMap {
    pub fn new() -> Self {
        Self {
            remote_to_local: BTreeMap::new(),
            local_to_remote: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, remote: Entity, local: Entity) {
        if let Some(previous) = self.remote_to_local.insert(remote, local) {
            if previous != local {
                panic!(
                    "Remote entity {:?} already mapped to {:?}, cannot remap to {:?}",
                    remote, previous, local
                );
            }
        }
        self.local_to_remote.insert(local, remote);
    }

    pub fn has_remote(&self, remote: Entity) -> bool {
        self.remote_to_local.contains_key(&remote)
    }

    pub fn has_local(&self, local: Entity) -> bool {
        self.local_to_remote.contains_key(&local)
    }

    pub fn local(&self, remote: Entity) -> Result<Entity, EntityDoesNotExistError> {
        self.remote_to_local
            .get(&remote)
            .copied()
            .ok_or(EntityDoesNotExistError)
    }

    pub fn remote(&self, local: Entity) -> Result<Entity, EntityDoesNotExistError> {
        self.local_to_remote
            .get(&local)
            .copied()
            .ok_or(EntityDoesNotExistError)
    }

    pub fn erase_remote(&mut self, remote: Entity) -> Option<Entity> {
        let local = self.remote_to_local.remove(&remote);
        if let Some(local) = local {
            self.local_to_remote.remove(&local);
        }
        local
    }

    pub fn erase_local(&mut self, local: Entity) -> Option<Entity> {
        let remote = self.local_to_remote.remove(&local);
        if let Some(remote) = remote {
            self.remote_to_local.remove(&remote);
        }
        remote
    }

    pub fn iter(&self) -> impl Iterator<Item = (Entity, Entity)> + '_ {
        self.remote_to_local.iter().map(|(r, l)| (*r, *l))
    }

    pub fn len(&self) -> usize {
        self.remote_to_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.remote_to_local.is_empty()
    }
}

impl Default for EntityMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_both_directions() {
        let mut map = EntityMap::new();
        let remote = Entity::new(7, 0);
        let local = Entity::new(2, 1);
        map.insert(remote, local);

        assert_eq!(map.local(remote), Ok(local));
        assert_eq!(map.remote(local), Ok(remote));
        assert!(map.local(local).is_err());
    }

    #[test]
    fn erase_removes_both_directions() {
        let mut map = EntityMap::new();
        let remote = Entity::new(7, 0);
        let local = Entity::new(2, 1);
        map.insert(remote, local);
        map.erase_local(local);

        assert!(!map.has_remote(remote));
        assert!(!map.has_local(local));
    }
}
