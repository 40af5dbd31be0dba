//! Central goods store and the monotone goods lifecycle.

use std::collections::BTreeMap;

use quayside_core::{BerthId, GoodsId, Point, RobotId, GOODS_TTL};
use tracing::warn;

/// Lifecycle stage of a good.
///
/// Transitions run only along `Unassigned → Assigned → Carried → Stored`,
/// or from any pre-terminal stage to `Expired`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GoodsStatus {
    /// On the ground, not yet claimed by a robot.
    Unassigned,
    /// Claimed as the target of exactly one robot.
    Assigned,
    /// Picked up and travelling on a robot.
    Carried,
    /// Deposited into a berth storage slot.
    Stored,
    /// TTL ran out before pickup; terminal.
    Expired,
}

/// A single good dropped onto the map.
#[derive(Clone, Debug)]
pub struct Goods {
    id: GoodsId,
    pos: Point,
    value: u32,
    ttl: u32,
    status: GoodsStatus,
    birth_frame: u32,
    assigned_to: Option<RobotId>,
    stored_at: Option<BerthId>,
}

impl Goods {
    /// Identifier of the good.
    #[must_use]
    pub const fn id(&self) -> GoodsId {
        self.id
    }

    /// Ground position the good spawned at.
    #[must_use]
    pub const fn pos(&self) -> Point {
        self.pos
    }

    /// Judge currency earned when the good reaches a delivery point.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.value
    }

    /// Frames left before the good expires. Frozen once picked up.
    #[must_use]
    pub const fn ttl(&self) -> u32 {
        self.ttl
    }

    /// Current lifecycle stage.
    #[must_use]
    pub const fn status(&self) -> GoodsStatus {
        self.status
    }

    /// Frame the good appeared on.
    #[must_use]
    pub const fn birth_frame(&self) -> u32 {
        self.birth_frame
    }

    /// Robot currently tasked with collecting this good, if any.
    #[must_use]
    pub const fn assigned_to(&self) -> Option<RobotId> {
        self.assigned_to
    }

    /// Berth holding the good while it is `Stored`.
    #[must_use]
    pub const fn stored_at(&self) -> Option<BerthId> {
        self.stored_at
    }

    /// True when a robot may still be scheduled to collect this good: it is
    /// on the ground, alive, and no other robot holds the claim.
    #[must_use]
    pub const fn claimable(&self) -> bool {
        matches!(
            self.status,
            GoodsStatus::Unassigned | GoodsStatus::Assigned
        ) && self.assigned_to.is_none()
    }
}

/// Owner of every good spawned during the match; all other components hold
/// only [`GoodsId`] references into it.
#[derive(Clone, Debug, Default)]
pub struct GoodsStore {
    items: BTreeMap<GoodsId, Goods>,
    next_id: u32,
}

impl GoodsStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a good reported by the judge and returns its id.
    pub fn spawn(&mut self, pos: Point, value: u32, frame: u32) -> GoodsId {
        let id = GoodsId::new(self.next_id);
        self.next_id += 1;
        let _ = self.items.insert(
            id,
            Goods {
                id,
                pos,
                value,
                ttl: GOODS_TTL,
                status: GoodsStatus::Unassigned,
                birth_frame: frame,
                assigned_to: None,
                stored_at: None,
            },
        );
        id
    }

    /// Looks up a good by id.
    #[must_use]
    pub fn get(&self, id: GoodsId) -> Option<&Goods> {
        self.items.get(&id)
    }

    /// Iterates every good in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Goods> {
        self.items.values()
    }

    /// Claims a good for a robot; the scheduler is the only caller.
    pub fn assign(&mut self, id: GoodsId, robot: RobotId) {
        let Some(good) = self.items.get_mut(&id) else {
            warn!(%id, "assigning a good that was never spawned");
            return;
        };
        match good.status {
            GoodsStatus::Unassigned | GoodsStatus::Assigned => {
                good.status = GoodsStatus::Assigned;
                good.assigned_to = Some(robot);
            }
            _ => warn!(%id, status = ?good.status, "assigning a good past pickup"),
        }
    }

    /// Releases a robot's claim without rewinding the lifecycle; the good
    /// becomes claimable again unless it expired meanwhile.
    pub fn release(&mut self, id: GoodsId) {
        if let Some(good) = self.items.get_mut(&id) {
            good.assigned_to = None;
        }
    }

    /// Marks a good picked up; its TTL freezes at the pickup value.
    pub fn mark_carried(&mut self, id: GoodsId) {
        let Some(good) = self.items.get_mut(&id) else {
            warn!(%id, "picking up a good that was never spawned");
            return;
        };
        match good.status {
            GoodsStatus::Assigned => good.status = GoodsStatus::Carried,
            _ => warn!(%id, status = ?good.status, "pickup outside Assigned"),
        }
    }

    /// Marks a good deposited into a berth slot.
    pub fn mark_stored(&mut self, id: GoodsId, berth: BerthId) {
        let Some(good) = self.items.get_mut(&id) else {
            warn!(%id, "storing a good that was never spawned");
            return;
        };
        match good.status {
            GoodsStatus::Carried => {
                good.status = GoodsStatus::Stored;
                good.stored_at = Some(berth);
                good.assigned_to = None;
            }
            _ => warn!(%id, status = ?good.status, "store outside Carried"),
        }
    }

    /// Clears the berth back-reference once a ship loads the good.
    pub fn mark_shipped(&mut self, id: GoodsId) {
        if let Some(good) = self.items.get_mut(&id) {
            good.stored_at = None;
        }
    }

    /// Ticks every ground good's TTL down and expires the ones that ran
    /// out. Carried and stored goods are frozen. Returns the ids expired
    /// this frame.
    pub fn tick_expiry(&mut self) -> Vec<GoodsId> {
        let mut expired = Vec::new();
        for good in self.items.values_mut() {
            if !matches!(
                good.status,
                GoodsStatus::Unassigned | GoodsStatus::Assigned
            ) {
                continue;
            }
            if good.ttl > 0 {
                good.ttl -= 1;
            }
            if good.ttl == 0 {
                good.status = GoodsStatus::Expired;
                good.assigned_to = None;
                expired.push(good.id);
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_runs_forward_only() {
        let mut store = GoodsStore::new();
        let id = store.spawn(Point::new(1, 1), 50, 10);
        assert_eq!(store.get(id).unwrap().status(), GoodsStatus::Unassigned);

        store.assign(id, RobotId::new(0));
        assert_eq!(store.get(id).unwrap().status(), GoodsStatus::Assigned);
        assert!(!store.get(id).unwrap().claimable());

        store.mark_carried(id);
        store.mark_stored(id, BerthId::new(2));
        let good = store.get(id).unwrap();
        assert_eq!(good.status(), GoodsStatus::Stored);
        assert_eq!(good.stored_at(), Some(BerthId::new(2)));

        // Regressions are rejected and logged, never applied.
        store.assign(id, RobotId::new(1));
        assert_eq!(store.get(id).unwrap().status(), GoodsStatus::Stored);
    }

    #[test]
    fn release_keeps_lifecycle_but_reopens_the_claim() {
        let mut store = GoodsStore::new();
        let id = store.spawn(Point::new(0, 0), 10, 0);
        store.assign(id, RobotId::new(3));
        store.release(id);

        let good = store.get(id).unwrap();
        assert_eq!(good.status(), GoodsStatus::Assigned);
        assert!(good.claimable());
    }

    #[test]
    fn ttl_expires_ground_goods_only() {
        let mut store = GoodsStore::new();
        let ground = store.spawn(Point::new(0, 0), 10, 0);
        let carried = store.spawn(Point::new(0, 1), 10, 0);
        store.assign(carried, RobotId::new(0));
        store.mark_carried(carried);

        let mut expired = Vec::new();
        for _ in 0..GOODS_TTL {
            expired = store.tick_expiry();
        }
        assert_eq!(expired, vec![ground]);
        assert_eq!(store.get(ground).unwrap().status(), GoodsStatus::Expired);
        assert_eq!(store.get(carried).unwrap().status(), GoodsStatus::Carried);
        assert_eq!(store.get(carried).unwrap().ttl(), GOODS_TTL);

        // Expired goods never return to circulation.
        store.assign(ground, RobotId::new(1));
        assert_eq!(store.get(ground).unwrap().status(), GoodsStatus::Expired);
        assert!(!store.get(ground).unwrap().claimable());
    }
}
