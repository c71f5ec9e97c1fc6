use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SmcError;
use crate::model::link::{LgrId, Link, LinkGroup};

/// List of live link groups, locked independently of the connection tables.
///
/// The registry stays small, so every query walks the whole list under the
/// lock and there is no resume state.
#[derive(Default)]
pub struct LinkGroupRegistry {
    groups: Mutex<Vec<Arc<LinkGroup>>>,
}

impl LinkGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group. Identifiers are unique within the registry.
    pub fn add(&self, group: Arc<LinkGroup>) -> Result<(), SmcError> {
        let mut groups = self.groups.lock();
        if groups.iter().any(|g| g.id() == group.id()) {
            return Err(SmcError::LinkGroupExists(group.id()));
        }
        groups.push(group);
        Ok(())
    }

    /// Remove a group and mark it torn down. Connections still holding it
    /// stop showing link details from then on.
    pub fn remove(&self, id: LgrId) -> Option<Arc<LinkGroup>> {
        let mut groups = self.groups.lock();
        let i = groups.iter().position(|g| g.id() == id)?;
        let group = groups.remove(i);
        group.tear_down();
        Some(group)
    }

    pub fn get(&self, id: LgrId) -> Option<Arc<LinkGroup>> {
        self.groups.lock().iter().find(|g| g.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `visitor(group, index, link)` for every usable link of every group.
    pub fn for_each_group<V>(&self, mut visitor: V)
    where
        V: FnMut(&LinkGroup, usize, &Link),
    {
        let groups = self.groups.lock();
        for group in groups.iter() {
            for (i, link) in group.links().iter().enumerate() {
                if !link.usable() {
                    continue;
                }
                visitor(group, i, link);
            }
        }
    }
}
