#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Static single-lane analysis and runtime direction locks.
//!
//! A lane is a maximal 4-connected run of width-1 land cells: cells whose
//! east/west or north/south neighbor pair is blocked. Because every lane
//! cell has at most two open neighbors, lanes are chains with at most two
//! entry cells. At runtime each lane carries a lock recording the entry the
//! first occupant came through; a robot approaching the opposite entry
//! while the lane is occupied is travelling against the flow.

use std::collections::HashMap;

use quayside_core::{Orientation, Point, RobotId};
use quayside_world::Map;
use tracing::debug;

/// Lane id marking open ground.
pub const OPEN_GROUND: u32 = 0;

#[derive(Clone, Debug, Default)]
struct LaneLock {
    occupants: u32,
    entry: Option<Point>,
}

/// Corridor labelling plus per-lane runtime lock state.
#[derive(Clone, Debug)]
pub struct SingleLaneIndex {
    cols: i32,
    lane_ids: Vec<u32>,
    entries: Vec<Vec<Point>>,
    locks: Vec<LaneLock>,
    tracks: HashMap<RobotId, (u32, Point)>,
}

impl SingleLaneIndex {
    /// Runs the offline corridor analysis over the map's fixed terrain.
    #[must_use]
    pub fn build(map: &Map) -> Self {
        let cell_count = (map.rows() * map.cols()) as usize;
        let mut lane_ids = vec![OPEN_GROUND; cell_count];
        let mut entries = Vec::new();

        let narrow = |p: Point| -> bool {
            if !map.static_passable(p) {
                return false;
            }
            let open = |q: Point| map.in_bounds(q) && map.static_passable(q);
            let east_west_shut =
                !open(p.step(Orientation::East)) && !open(p.step(Orientation::West));
            let north_south_shut =
                !open(p.step(Orientation::North)) && !open(p.step(Orientation::South));
            east_west_shut || north_south_shut
        };

        let index = |p: Point| (p.row() * map.cols() + p.col()) as usize;
        let mut next_lane = OPEN_GROUND;
        for row in 0..map.rows() {
            for col in 0..map.cols() {
                let seed = Point::new(row, col);
                if lane_ids[index(seed)] != OPEN_GROUND || !narrow(seed) {
                    continue;
                }
                next_lane += 1;
                let mut cells = vec![seed];
                lane_ids[index(seed)] = next_lane;
                let mut cursor = 0;
                while cursor < cells.len() {
                    let current = cells[cursor];
                    cursor += 1;
                    for orientation in Orientation::ALL {
                        let neighbor = current.step(orientation);
                        if map.in_bounds(neighbor)
                            && lane_ids[index(neighbor)] == OPEN_GROUND
                            && narrow(neighbor)
                        {
                            lane_ids[index(neighbor)] = next_lane;
                            cells.push(neighbor);
                        }
                    }
                }

                let mut lane_entries: Vec<Point> = cells
                    .iter()
                    .copied()
                    .filter(|cell| {
                        Orientation::ALL.iter().any(|orientation| {
                            let neighbor = cell.step(*orientation);
                            map.in_bounds(neighbor)
                                && map.static_passable(neighbor)
                                && lane_ids[index(neighbor)] == OPEN_GROUND
                        })
                    })
                    .collect();
                lane_entries.sort();
                entries.push(lane_entries);
            }
        }

        debug!(lanes = next_lane, "single-lane analysis complete");
        let locks = vec![LaneLock::default(); next_lane as usize];
        Self {
            cols: map.cols(),
            lane_ids,
            entries,
            locks,
            tracks: HashMap::new(),
        }
    }

    /// Number of lanes found.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.entries.len()
    }

    /// Lane id covering `p`; [`OPEN_GROUND`] when `p` is not in a lane.
    #[must_use]
    pub fn lane_id(&self, p: Point) -> u32 {
        if p.row() < 0 || p.col() < 0 || p.col() >= self.cols {
            return OPEN_GROUND;
        }
        let index = (p.row() * self.cols + p.col()) as usize;
        self.lane_ids.get(index).copied().unwrap_or(OPEN_GROUND)
    }

    /// True when `p` is one of the lane's entry cells.
    #[must_use]
    pub fn is_entry(&self, lane: u32, p: Point) -> bool {
        self.lane_entries(lane).contains(&p)
    }

    /// Entry cells of a lane, in lexicographic order.
    #[must_use]
    pub fn lane_entries(&self, lane: u32) -> &[Point] {
        match lane.checked_sub(1) {
            Some(slot) => self.entries.get(slot as usize).map_or(&[], Vec::as_slice),
            None => &[],
        }
    }

    /// True when the lane is occupied through a different entry than the
    /// one at `entry`: entering there would run against the flow.
    #[must_use]
    pub fn is_locked(&self, lane: u32, entry: Point) -> bool {
        let Some(lock) = lane
            .checked_sub(1)
            .and_then(|slot| self.locks.get(slot as usize))
        else {
            return false;
        };
        lock.occupants > 0 && lock.entry != Some(entry)
    }

    /// Refreshes occupancy and lock directions from this frame's reported
    /// robot positions. The first robot observed inside a lane fixes the
    /// lock's entry; the lock releases once the lane empties.
    pub fn update_locks(&mut self, robots: &[(RobotId, Point)]) {
        for lock in &mut self.locks {
            lock.occupants = 0;
            lock.entry = None;
        }

        for &(robot, pos) in robots {
            let lane = self.lane_id(pos);
            if lane == OPEN_GROUND {
                let _ = self.tracks.remove(&robot);
                continue;
            }
            let entry = match self.tracks.get(&robot) {
                Some(&(tracked_lane, entry)) if tracked_lane == lane => entry,
                _ => {
                    if self.is_entry(lane, pos) {
                        pos
                    } else {
                        // Spawned mid-lane: bind the lock to the nearest end.
                        self.lane_entries(lane)
                            .iter()
                            .copied()
                            .min_by_key(|candidate| (candidate.manhattan(pos), *candidate))
                            .unwrap_or(pos)
                    }
                }
            };
            let _ = self.tracks.insert(robot, (lane, entry));

            let lock = &mut self.locks[(lane - 1) as usize];
            lock.occupants += 1;
            if lock.entry.is_none() {
                lock.entry = Some(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corridor_map() -> Map {
        Map::from_lines(&["..###..", ".......", "..###.."]).expect("map parses")
    }

    #[test]
    fn labels_the_narrow_passage_only() {
        let map = corridor_map();
        let index = SingleLaneIndex::build(&map);

        assert_eq!(index.lane_count(), 1);
        let lane = index.lane_id(Point::new(1, 3));
        assert_ne!(lane, OPEN_GROUND);
        assert_eq!(index.lane_id(Point::new(1, 2)), lane);
        assert_eq!(index.lane_id(Point::new(1, 4)), lane);
        assert_eq!(index.lane_id(Point::new(1, 1)), OPEN_GROUND);
        assert_eq!(index.lane_id(Point::new(0, 0)), OPEN_GROUND);
    }

    #[test]
    fn entries_are_the_lane_ends() {
        let map = corridor_map();
        let index = SingleLaneIndex::build(&map);
        let lane = index.lane_id(Point::new(1, 3));

        assert_eq!(
            index.lane_entries(lane),
            &[Point::new(1, 2), Point::new(1, 4)]
        );
        assert!(index.is_entry(lane, Point::new(1, 2)));
        assert!(!index.is_entry(lane, Point::new(1, 3)));
    }

    #[test]
    fn lock_follows_the_first_occupant() {
        let map = corridor_map();
        let mut index = SingleLaneIndex::build(&map);
        let lane = index.lane_id(Point::new(1, 3));
        let robot = RobotId::new(0);

        index.update_locks(&[(robot, Point::new(1, 2))]);
        assert!(index.is_locked(lane, Point::new(1, 4)));
        assert!(!index.is_locked(lane, Point::new(1, 2)));

        // Deeper in the lane the direction is remembered.
        index.update_locks(&[(robot, Point::new(1, 3))]);
        assert!(index.is_locked(lane, Point::new(1, 4)));
        assert!(!index.is_locked(lane, Point::new(1, 2)));

        // Leaving the lane releases the lock.
        index.update_locks(&[(robot, Point::new(1, 5))]);
        assert!(!index.is_locked(lane, Point::new(1, 4)));
        assert!(!index.is_locked(lane, Point::new(1, 2)));
    }

    #[test]
    fn followers_share_the_lock_direction() {
        let map = corridor_map();
        let mut index = SingleLaneIndex::build(&map);
        let lane = index.lane_id(Point::new(1, 3));

        index.update_locks(&[
            (RobotId::new(0), Point::new(1, 3)),
            (RobotId::new(1), Point::new(1, 2)),
        ]);
        // Robot 0 entered earlier through the west end (tracked across
        // updates); robot 1 follows through the same entry.
        assert!(!index.is_locked(lane, Point::new(1, 2)));
        assert!(index.is_locked(lane, Point::new(1, 4)));
    }

    #[test]
    fn a_door_cell_forms_a_single_cell_lane() {
        let map = Map::from_lines(&["...", "#.#", "..."]).expect("map parses");
        let index = SingleLaneIndex::build(&map);
        let lane = index.lane_id(Point::new(1, 1));
        assert_ne!(lane, OPEN_GROUND);
        assert_eq!(index.lane_entries(lane), &[Point::new(1, 1)]);
    }
}
