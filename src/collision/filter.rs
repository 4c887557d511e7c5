//! Collision groups and the pairwise filter table.
//!
//! A collision table registers up to 32 groups and stores a filter per group
//! pair controlling whether the pair skips detection, skips resolution, or
//! resolves as normal. Filters also carry event blocks selecting which
//! collision phases produce events and to whom they are sent.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::collider::CollisionGroupId;

/// Groups are packed into a 32-bit mask, so a table holds at most 32.
pub const MAX_COLLISION_GROUPS: usize = 32;

/// What parts of detection/resolution run for a group pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMode {
    /// No detection at all; no events.
    SkipDetection,
    /// Detection (and events) without resolution.
    SkipResolution,
    #[default]
    Resolve,
}

/// Collision phase a filter block applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterBlockPhase {
    Start,
    Persist,
    End,
    PreSolve,
}

/// Recipients of a filter block's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterEventTargets {
    pub to_a: bool,
    pub to_b: bool,
    pub to_world: bool,
}

impl Default for FilterEventTargets {
    fn default() -> Self {
        Self {
            to_a: true,
            to_b: true,
            to_world: false,
        }
    }
}

/// Extra event behavior for one phase of one filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterBlock {
    pub phase: FilterBlockPhase,
    pub targets: FilterEventTargets,
    /// Replaces the built-in event name when set.
    pub event_name_override: Option<String>,
}

impl FilterBlock {
    pub fn new(phase: FilterBlockPhase) -> Self {
        Self {
            phase,
            targets: FilterEventTargets::default(),
            event_name_override: None,
        }
    }
}

/// A named collision group registered in a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollisionGroup {
    pub id: CollisionGroupId,
    pub name: String,
}

/// The relationship between one pair of groups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollisionFilter {
    pub mode: FilterMode,
    pub blocks: Vec<FilterBlock>,
}

impl CollisionFilter {
    pub fn new(mode: FilterMode) -> Self {
        Self {
            mode,
            blocks: Vec::new(),
        }
    }

    pub fn with_block(mut self, block: FilterBlock) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn block_for(&self, phase: FilterBlockPhase) -> Option<&FilterBlock> {
        self.blocks.iter().find(|b| b.phase == phase)
    }

    pub fn wants_pre_solve(&self) -> bool {
        self.block_for(FilterBlockPhase::PreSolve).is_some()
    }
}

fn pair_key(a: CollisionGroupId, b: CollisionGroupId) -> (CollisionGroupId, CollisionGroupId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    TableFull,
    DuplicateGroup(CollisionGroupId),
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::TableFull => {
                write!(f, "collision table already holds {MAX_COLLISION_GROUPS} groups")
            }
            TableError::DuplicateGroup(id) => write!(f, "collision group id {id} already registered"),
        }
    }
}

impl std::error::Error for TableError {}

/// Filter pairs between collision groups. Read-only during a step; mutations
/// mark the table dirty and take effect on the next step.
///
/// Filters are stored in a linear format keyed by the sorted group pair; the
/// table is capped at 32 groups so lookups stay cheap without an index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollisionTable {
    groups: Vec<CollisionGroup>,
    filters: Vec<((CollisionGroupId, CollisionGroupId), CollisionFilter)>,
}

impl CollisionTable {
    pub fn new() -> Self {
        let mut table = Self::default();
        // Group 0 is the default group every collider starts in.
        let _ = table.register_group(CollisionGroup {
            id: 0,
            name: "Default".into(),
        });
        table
    }

    pub fn register_group(&mut self, group: CollisionGroup) -> Result<(), TableError> {
        if self.groups.len() >= MAX_COLLISION_GROUPS {
            warn!("collision table full; group {:?} not registered", group.name);
            return Err(TableError::TableFull);
        }
        if self.groups.iter().any(|g| g.id == group.id) {
            warn!("collision group id {} already registered", group.id);
            return Err(TableError::DuplicateGroup(group.id));
        }
        self.groups.push(group);
        Ok(())
    }

    /// Unregisters a group and removes every filter touching it.
    pub fn unregister_group(&mut self, id: CollisionGroupId) {
        self.groups.retain(|g| g.id != id);
        self.filters.retain(|((a, b), _)| *a != id && *b != id);
    }

    pub fn groups(&self) -> &[CollisionGroup] {
        &self.groups
    }

    pub fn set_filter(
        &mut self,
        a: CollisionGroupId,
        b: CollisionGroupId,
        filter: CollisionFilter,
    ) {
        let key = pair_key(a, b);
        if let Some(entry) = self.filters.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = filter;
        } else {
            self.filters.push((key, filter));
        }
    }

    pub fn filter(&self, a: CollisionGroupId, b: CollisionGroupId) -> Option<&CollisionFilter> {
        let key = pair_key(a, b);
        self.filters.iter().find(|(k, _)| *k == key).map(|(_, f)| f)
    }

    /// The effective mode for a pair; unconfigured pairs resolve.
    pub fn mode(&self, a: CollisionGroupId, b: CollisionGroupId) -> FilterMode {
        self.filter(a, b).map(|f| f.mode).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rejects_more_than_32_groups() {
        let mut table = CollisionTable::new();
        for id in 1..MAX_COLLISION_GROUPS as u32 {
            table
                .register_group(CollisionGroup {
                    id,
                    name: format!("group-{id}"),
                })
                .unwrap();
        }
        let overflow = table.register_group(CollisionGroup {
            id: 99,
            name: "overflow".into(),
        });
        assert_eq!(overflow, Err(TableError::TableFull));
    }

    #[test]
    fn duplicate_group_ids_are_rejected() {
        let mut table = CollisionTable::new();
        let duplicate = table.register_group(CollisionGroup {
            id: 0,
            name: "also-default".into(),
        });
        assert_eq!(duplicate, Err(TableError::DuplicateGroup(0)));
    }

    #[test]
    fn filters_are_order_independent() {
        let mut table = CollisionTable::new();
        table
            .register_group(CollisionGroup { id: 1, name: "debris".into() })
            .unwrap();
        table.set_filter(1, 0, CollisionFilter::new(FilterMode::SkipResolution));
        assert_eq!(table.mode(0, 1), FilterMode::SkipResolution);
        assert_eq!(table.mode(1, 0), FilterMode::SkipResolution);
        assert_eq!(table.mode(0, 0), FilterMode::Resolve);
    }

    #[test]
    fn unregistering_a_group_drops_its_filters() {
        let mut table = CollisionTable::new();
        table
            .register_group(CollisionGroup { id: 1, name: "debris".into() })
            .unwrap();
        table.set_filter(0, 1, CollisionFilter::new(FilterMode::SkipDetection));
        table.unregister_group(1);
        assert_eq!(table.mode(0, 1), FilterMode::Resolve);
    }
}
