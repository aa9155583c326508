use crate::entity::{EntitySink, EntityState};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    Added(EntityState),
    Updated(EntityState),
    Removed { entity_id: String, unique_id: String },
}

/// Tracks which entities have been handed to the host and works out the
/// difference each time a new desired set is computed from a snapshot.
#[derive(Debug, Default)]
pub struct EntityReconciler {
    // Keyed by unique id, which is stable across restarts
    published: HashMap<String, EntityState>,
}

impl EntityReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_published(&self, unique_id: &str) -> bool {
        self.published.contains_key(unique_id)
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }

    /// Removals come first, then additions and updates in the order of `desired`.
    /// Entities whose rendering did not change produce nothing.
    pub fn reconcile(&mut self, desired: Vec<EntityState>) -> Vec<EntityChange> {
        let wanted: HashSet<&str> = desired.iter().map(|e| e.unique_id.as_str()).collect();

        let mut stale: Vec<&String> = self
            .published
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .collect();
        stale.sort();
        let stale: Vec<String> = stale.into_iter().cloned().collect();

        let mut changes = Vec::new();
        for unique_id in stale {
            if let Some(entity) = self.published.remove(&unique_id) {
                changes.push(EntityChange::Removed {
                    entity_id: entity.entity_id,
                    unique_id,
                });
            }
        }

        for entity in desired {
            match self.published.get(&entity.unique_id) {
                Some(previous) if *previous == entity => {}
                Some(_) => {
                    self.published.insert(entity.unique_id.clone(), entity.clone());
                    changes.push(EntityChange::Updated(entity));
                }
                None => {
                    self.published.insert(entity.unique_id.clone(), entity.clone());
                    changes.push(EntityChange::Added(entity));
                }
            }
        }
        changes
    }
}

/// Hands every change to the sink. Failures are logged and counted, not propagated,
/// so one bad entity does not block the rest.
pub async fn apply_changes(sink: &dyn EntitySink, changes: &[EntityChange]) -> usize {
    let mut failures = 0;
    for change in changes {
        let result = match change {
            EntityChange::Added(entity) => {
                debug!(entity_id = %entity.entity_id, "Adding entity");
                sink.publish(entity).await
            }
            EntityChange::Updated(entity) => sink.publish(entity).await,
            EntityChange::Removed { entity_id, .. } => {
                debug!(entity_id = %entity_id, "Removing entity");
                sink.remove(entity_id).await
            }
        };
        if let Err(e) = result {
            failures += 1;
            warn!("Failed to apply entity change: {e:#}");
        }
    }
    failures
}
