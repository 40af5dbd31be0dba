//! Berth state: the 4×4 dock where robots deposit goods and ships load.

use quayside_core::{
    BerthId, GoodsId, Orientation, Point, ShipPose, BERTH_SIDE, BERTH_STORAGE_SLOTS,
};

/// A 4×4 land zone goods flow through on their way to sea.
#[derive(Clone, Debug)]
pub struct Berth {
    id: BerthId,
    anchor: Point,
    docking_delay: u32,
    loading_velocity: u32,
    slots: [Option<GoodsId>; BERTH_STORAGE_SLOTS],
    reached: Vec<GoodsId>,
    unreached: Vec<GoodsId>,
}

impl Berth {
    /// Creates a berth from its judge-provided description line.
    #[must_use]
    pub fn new(id: BerthId, anchor: Point, docking_delay: u32, loading_velocity: u32) -> Self {
        Self {
            id,
            anchor,
            docking_delay,
            loading_velocity,
            slots: [None; BERTH_STORAGE_SLOTS],
            reached: Vec::new(),
            unreached: Vec::new(),
        }
    }

    /// Identifier of the berth.
    #[must_use]
    pub const fn id(&self) -> BerthId {
        self.id
    }

    /// Top-left cell of the 4×4 footprint.
    #[must_use]
    pub const fn anchor(&self) -> Point {
        self.anchor
    }

    /// Frames a ship spends docking before loading may begin.
    #[must_use]
    pub const fn docking_delay(&self) -> u32 {
        self.docking_delay
    }

    /// Goods transferred onto a docked ship per frame.
    #[must_use]
    pub const fn loading_velocity(&self) -> u32 {
        self.loading_velocity
    }

    /// Every cell of the 4×4 footprint, row-major.
    #[must_use]
    pub fn footprint(&self) -> Vec<Point> {
        let mut cells = Vec::with_capacity((BERTH_SIDE * BERTH_SIDE) as usize);
        for dr in 0..BERTH_SIDE {
            for dc in 0..BERTH_SIDE {
                cells.push(Point::new(self.anchor.row() + dr, self.anchor.col() + dc));
            }
        }
        cells
    }

    /// True when `p` lies on the footprint.
    #[must_use]
    pub const fn contains(&self, p: Point) -> bool {
        p.row() >= self.anchor.row()
            && p.row() < self.anchor.row() + BERTH_SIDE
            && p.col() >= self.anchor.col()
            && p.col() < self.anchor.col() + BERTH_SIDE
    }

    /// The pose a ship aims for when docking here.
    #[must_use]
    pub const fn dock_pose(&self) -> ShipPose {
        ShipPose::new(self.anchor, Orientation::East)
    }

    /// Number of goods currently stored.
    #[must_use]
    pub fn stored_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Number of free storage slots.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        BERTH_STORAGE_SLOTS - self.stored_count()
    }

    /// Stored goods in slot order.
    pub fn stored_goods(&self) -> impl Iterator<Item = GoodsId> + '_ {
        self.slots.iter().flatten().copied()
    }

    /// Places a good into the first free slot; `false` when full.
    pub fn store(&mut self, goods: GoodsId) -> bool {
        for slot in &mut self.slots {
            if slot.is_none() {
                *slot = Some(goods);
                return true;
            }
        }
        false
    }

    /// Removes up to `limit` goods in slot order, as a docked ship loads
    /// them.
    pub fn take_stored(&mut self, limit: usize) -> Vec<GoodsId> {
        let mut taken = Vec::new();
        for slot in &mut self.slots {
            if taken.len() == limit {
                break;
            }
            if let Some(goods) = slot.take() {
                taken.push(goods);
            }
        }
        taken
    }

    /// Replaces the per-frame routing lists: goods already stored here and
    /// goods still travelling here.
    pub fn set_routing(&mut self, reached: Vec<GoodsId>, unreached: Vec<GoodsId>) {
        self.reached = reached;
        self.unreached = unreached;
    }

    /// Goods stored here as of this frame's routing pass.
    #[must_use]
    pub fn reached(&self) -> &[GoodsId] {
        &self.reached
    }

    /// Goods assigned or carried toward this berth as of this frame.
    #[must_use]
    pub fn unreached(&self) -> &[GoodsId] {
        &self.unreached
    }
}
