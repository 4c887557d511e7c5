//! Broadphase proxy storage.
//!
//! The kernel consumes the broadphase only through this insert/remove/update
//! and query interface; the committer is the single writer. Static scenery
//! and dynamic colliders live in separate uniform grids so resting worlds
//! pay nothing for their static geometry when generating pairs.

use std::collections::{HashMap, HashSet};

use glam::Vec3;

use crate::core::types::Aabb;
use crate::utils::allocator::ColliderId;

const DEFAULT_CELL_SIZE: f32 = 5.0;

/// Large AABBs (planes, terrain) fall out of grid cells and go on an
/// overflow list that every query checks.
const MAX_GRID_EXTENT: f32 = 1e4;

/// Uniform grid keyed by cell coordinates, holding proxy ids per cell.
struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<(i32, i32, i32), Vec<ColliderId>>,
    proxies: HashMap<ColliderId, Aabb>,
    overflow: Vec<ColliderId>,
}

impl SpatialGrid {
    fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            proxies: HashMap::new(),
            overflow: Vec::new(),
        }
    }

    fn cell_of(&self, pos: Vec3) -> (i32, i32, i32) {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
            (pos.z / self.cell_size).floor() as i32,
        )
    }

    fn cell_range(&self, aabb: &Aabb) -> ((i32, i32, i32), (i32, i32, i32)) {
        (self.cell_of(aabb.min), self.cell_of(aabb.max))
    }

    fn is_overflow(aabb: &Aabb) -> bool {
        let extents = aabb.half_extents();
        !extents.is_finite() || extents.max_element() > MAX_GRID_EXTENT
    }

    fn insert(&mut self, id: ColliderId, aabb: Aabb) {
        self.remove(id);
        if Self::is_overflow(&aabb) {
            self.overflow.push(id);
        } else {
            let (min, max) = self.cell_range(&aabb);
            for x in min.0..=max.0 {
                for y in min.1..=max.1 {
                    for z in min.2..=max.2 {
                        self.cells.entry((x, y, z)).or_default().push(id);
                    }
                }
            }
        }
        self.proxies.insert(id, aabb);
    }

    fn remove(&mut self, id: ColliderId) -> bool {
        let Some(aabb) = self.proxies.remove(&id) else {
            return false;
        };
        if Self::is_overflow(&aabb) {
            self.overflow.retain(|&other| other != id);
            return true;
        }
        let (min, max) = self.cell_range(&aabb);
        for x in min.0..=max.0 {
            for y in min.1..=max.1 {
                for z in min.2..=max.2 {
                    if let Some(cell) = self.cells.get_mut(&(x, y, z)) {
                        cell.retain(|&other| other != id);
                        if cell.is_empty() {
                            self.cells.remove(&(x, y, z));
                        }
                    }
                }
            }
        }
        true
    }

    fn contains(&self, id: ColliderId) -> bool {
        self.proxies.contains_key(&id)
    }

    fn query(&self, aabb: &Aabb, results: &mut Vec<ColliderId>) {
        for &id in &self.overflow {
            if self.proxies[&id].overlaps(aabb) {
                results.push(id);
            }
        }
        if Self::is_overflow(aabb) {
            // A boundless query AABB visits every proxy.
            for (&id, proxy_aabb) in &self.proxies {
                if !self.overflow.contains(&id) && proxy_aabb.overlaps(aabb) {
                    results.push(id);
                }
            }
            return;
        }
        let (min, max) = self.cell_range(aabb);
        for x in min.0..=max.0 {
            for y in min.1..=max.1 {
                for z in min.2..=max.2 {
                    if let Some(cell) = self.cells.get(&(x, y, z)) {
                        for &id in cell {
                            if self.proxies[&id].overlaps(aabb) {
                                results.push(id);
                            }
                        }
                    }
                }
            }
        }
        results.sort_unstable();
        results.dedup();
    }

    fn iter(&self) -> impl Iterator<Item = (ColliderId, &Aabb)> {
        self.proxies.iter().map(|(&id, aabb)| (id, aabb))
    }
}

/// Static and dynamic proxy sets with pair generation.
pub struct BroadPhase {
    static_grid: SpatialGrid,
    dynamic_grid: SpatialGrid,
}

impl Default for BroadPhase {
    fn default() -> Self {
        Self::new(DEFAULT_CELL_SIZE)
    }
}

impl BroadPhase {
    pub fn new(cell_size: f32) -> Self {
        Self {
            static_grid: SpatialGrid::new(cell_size),
            dynamic_grid: SpatialGrid::new(cell_size),
        }
    }

    pub fn insert_static(&mut self, id: ColliderId, aabb: Aabb) {
        self.dynamic_grid.remove(id);
        self.static_grid.insert(id, aabb);
    }

    pub fn insert_dynamic(&mut self, id: ColliderId, aabb: Aabb) {
        self.static_grid.remove(id);
        self.dynamic_grid.insert(id, aabb);
    }

    pub fn remove(&mut self, id: ColliderId) {
        let _ = self.static_grid.remove(id) || self.dynamic_grid.remove(id);
    }

    /// Re-inserts into whichever set currently holds the proxy.
    pub fn update(&mut self, id: ColliderId, aabb: Aabb) {
        if self.dynamic_grid.contains(id) {
            self.dynamic_grid.insert(id, aabb);
        } else if self.static_grid.contains(id) {
            self.static_grid.insert(id, aabb);
        }
    }

    pub fn contains(&self, id: ColliderId) -> bool {
        self.static_grid.contains(id) || self.dynamic_grid.contains(id)
    }

    /// All proxies overlapping an AABB, from both sets.
    pub fn query_aabb(&self, aabb: &Aabb) -> Vec<ColliderId> {
        let mut results = Vec::new();
        self.static_grid.query(aabb, &mut results);
        self.dynamic_grid.query(aabb, &mut results);
        results
    }

    /// Candidate pairs: dynamic-dynamic plus dynamic-static, each reported
    /// once with the ids ordered by index.
    pub fn potential_pairs(&self) -> Vec<(ColliderId, ColliderId)> {
        let mut pairs = Vec::new();
        let mut seen = HashSet::new();
        let mut scratch = Vec::new();

        for (id, aabb) in self.dynamic_grid.iter() {
            scratch.clear();
            self.dynamic_grid.query(aabb, &mut scratch);
            self.static_grid.query(aabb, &mut scratch);

            for &other in &scratch {
                if other == id {
                    continue;
                }
                let key = if id.index() < other.index() {
                    (id, other)
                } else {
                    (other, id)
                };
                if seen.insert(key) {
                    pairs.push(key);
                }
            }
        }
        pairs
    }
}
