//! Spatial structures of the client world
//!
//! Linked mobjs sit in the presence list of their sector and, when solid,
//! in a collision blockmap: a spatial hash grid of cells.

use hashbrown::HashMap;
use rustc_hash::FxHashMap;

use crate::game::constants::spatial::{BLOCKMAP_CELL_SIZE, CELL_INITIAL_CAPACITY};
use crate::net::protocol::ThingId;

/// Initial capacity for the cell map (number of expected non-empty cells)
const GRID_INITIAL_CAPACITY: usize = 256;

/// Grid cell key - (x, y) cell coordinates
pub type CellKey = (i32, i32);

/// Something that can be linked into the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialRef {
    /// Shadow mobj by thing id
    Mobj(ThingId),
    /// Real mobj of a local player
    Player(u8),
}

/// Entry stored in the blockmap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialEntity {
    pub id: SpatialRef,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
}

/// Spatial hash grid for collision queries
#[derive(Debug)]
pub struct SpatialGrid {
    inv_cell_size: f32,
    cells: HashMap<CellKey, Vec<SpatialEntity>>,
    /// Cell currently holding each entity
    index: FxHashMap<SpatialRef, CellKey>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::with_capacity(GRID_INITIAL_CAPACITY),
            index: FxHashMap::default(),
        }
    }

    #[inline]
    fn position_to_cell(&self, x: f32, y: f32) -> CellKey {
        (
            (x * self.inv_cell_size).floor() as i32,
            (y * self.inv_cell_size).floor() as i32,
        )
    }

    /// Insert an entity, moving it if already present
    pub fn insert(&mut self, entity: SpatialEntity) {
        self.remove(entity.id);
        let cell_key = self.position_to_cell(entity.x, entity.y);
        self.cells
            .entry(cell_key)
            .or_insert_with(|| Vec::with_capacity(CELL_INITIAL_CAPACITY))
            .push(entity);
        self.index.insert(entity.id, cell_key);
    }

    /// Returns true if the entity was found and removed
    pub fn remove(&mut self, id: SpatialRef) -> bool {
        let Some(cell_key) = self.index.remove(&id) else {
            return false;
        };
        if let Some(cell) = self.cells.get_mut(&cell_key) {
            if let Some(idx) = cell.iter().position(|entity| entity.id == id) {
                cell.swap_remove(idx);
                return true;
            }
        }
        false
    }

    #[inline]
    pub fn contains(&self, id: SpatialRef) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: SpatialRef) -> Option<&SpatialEntity> {
        let cell_key = self.index.get(&id)?;
        self.cells.get(cell_key)?.iter().find(|entity| entity.id == id)
    }

    pub fn clear(&mut self) {
        for cell in self.cells.values_mut() {
            cell.clear();
        }
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(BLOCKMAP_CELL_SIZE)
    }
}

/// Per-sector presence lists
#[derive(Debug, Default)]
pub struct SectorLists {
    members: FxHashMap<usize, Vec<SpatialRef>>,
    location: FxHashMap<SpatialRef, usize>,
}

impl SectorLists {
    pub fn insert(&mut self, id: SpatialRef, sector: usize) {
        self.remove(id);
        self.members.entry(sector).or_default().push(id);
        self.location.insert(id, sector);
    }

    pub fn remove(&mut self, id: SpatialRef) -> bool {
        let Some(sector) = self.location.remove(&id) else {
            return false;
        };
        if let Some(list) = self.members.get_mut(&sector) {
            list.retain(|member| *member != id);
        }
        true
    }

    pub fn sector_of(&self, id: SpatialRef) -> Option<usize> {
        self.location.get(&id).copied()
    }

    pub fn members(&self, sector: usize) -> &[SpatialRef] {
        self.members.get(&sector).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.members.clear();
        self.location.clear();
    }
}

/// Sector lists plus blockmap: the spatial side of the client world
#[derive(Debug, Default)]
pub struct SpatialWorld {
    pub blockmap: SpatialGrid,
    pub sectors: SectorLists,
}

impl SpatialWorld {
    pub fn new(cell_size: f32) -> Self {
        Self {
            blockmap: SpatialGrid::new(cell_size),
            sectors: SectorLists::default(),
        }
    }

    /// Link into the sector list, and into the blockmap when solid
    pub fn link(&mut self, entity: SpatialEntity, sector: Option<usize>, solid: bool) {
        self.unlink(entity.id);
        if let Some(sector) = sector {
            self.sectors.insert(entity.id, sector);
        }
        if solid {
            self.blockmap.insert(entity);
        }
    }

    /// Remove from every structure; returns true if anything was linked
    pub fn unlink(&mut self, id: SpatialRef) -> bool {
        let in_sector = self.sectors.remove(id);
        let in_blockmap = self.blockmap.remove(id);
        in_sector || in_blockmap
    }

    pub fn is_linked(&self, id: SpatialRef) -> bool {
        self.sectors.sector_of(id).is_some() || self.blockmap.contains(id)
    }

    pub fn in_blockmap(&self, id: SpatialRef) -> bool {
        self.blockmap.contains(id)
    }

    pub fn clear(&mut self) {
        self.blockmap.clear();
        self.sectors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: ThingId, x: f32, y: f32, radius: f32) -> SpatialEntity {
        SpatialEntity {
            id: SpatialRef::Mobj(id),
            x,
            y,
            radius,
        }
    }

    #[test]
    fn test_new_grid() {
        let grid = SpatialGrid::new(64.0);
        assert_eq!(grid.len(), 0);
        assert!(grid.is_empty());
    }

    #[test]
    fn test_insert_and_get() {
        let mut grid = SpatialGrid::new(64.0);
        grid.insert(entity(1, 100.0, 100.0, 10.0));

        assert!(grid.contains(SpatialRef::Mobj(1)));
        assert_eq!(grid.get(SpatialRef::Mobj(1)).map(|e| e.radius), Some(10.0));
        assert!(grid.get(SpatialRef::Mobj(2)).is_none());
    }

    #[test]
    fn test_entities_share_a_cell() {
        let mut grid = SpatialGrid::new(64.0);
        grid.insert(entity(1, 80.0, 80.0, 10.0));
        grid.insert(entity(2, 90.0, 80.0, 10.0));

        assert_eq!(grid.len(), 2);
        assert_eq!(grid.get(SpatialRef::Mobj(2)).map(|e| e.x), Some(90.0));
    }

    #[test]
    fn test_reinsert_moves_entity() {
        let mut grid = SpatialGrid::new(64.0);
        grid.insert(entity(1, 10.0, 10.0, 8.0));
        grid.insert(entity(1, 500.0, 500.0, 8.0));

        assert_eq!(grid.len(), 1);
        assert_eq!(grid.get(SpatialRef::Mobj(1)).map(|e| e.x), Some(500.0));
    }

    #[test]
    fn test_remove() {
        let mut grid = SpatialGrid::new(64.0);
        grid.insert(entity(1, 100.0, 100.0, 10.0));
        grid.insert(entity(2, 100.0, 100.0, 10.0));

        assert!(grid.remove(SpatialRef::Mobj(1)));
        assert!(!grid.remove(SpatialRef::Mobj(1)));
        assert!(!grid.contains(SpatialRef::Mobj(1)));
        assert!(grid.contains(SpatialRef::Mobj(2)));
    }

    #[test]
    fn test_clear() {
        let mut grid = SpatialGrid::new(64.0);
        grid.insert(entity(1, 100.0, 100.0, 10.0));
        grid.clear();
        assert!(grid.get(SpatialRef::Mobj(1)).is_none());
        assert!(grid.is_empty());
    }

    #[test]
    fn test_sector_lists() {
        let mut lists = SectorLists::default();
        lists.insert(SpatialRef::Mobj(1), 3);
        lists.insert(SpatialRef::Player(0), 3);
        assert_eq!(lists.members(3).len(), 2);

        lists.insert(SpatialRef::Mobj(1), 4);
        assert_eq!(lists.members(3), &[SpatialRef::Player(0)]);
        assert_eq!(lists.sector_of(SpatialRef::Mobj(1)), Some(4));

        assert!(lists.remove(SpatialRef::Player(0)));
        assert!(lists.members(3).is_empty());
        assert!(lists.members(99).is_empty());
    }

    #[test]
    fn test_world_links_solid_into_blockmap() {
        let mut world = SpatialWorld::default();
        world.link(entity(1, 0.0, 0.0, 16.0), Some(0), true);
        world.link(entity(2, 0.0, 0.0, 16.0), Some(0), false);

        assert!(world.in_blockmap(SpatialRef::Mobj(1)));
        assert!(!world.in_blockmap(SpatialRef::Mobj(2)));
        assert!(world.is_linked(SpatialRef::Mobj(2)));
        assert_eq!(world.sectors.members(0).len(), 2);

        assert!(world.unlink(SpatialRef::Mobj(1)));
        assert!(!world.is_linked(SpatialRef::Mobj(1)));
        assert!(!world.unlink(SpatialRef::Mobj(1)));
    }
}
