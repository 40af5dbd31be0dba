//! Grid storage, berth distance fields, and the transient-obstacle overlay.

use std::collections::{HashMap, VecDeque};

use quayside_core::{BerthId, Orientation, Point, ShipPose};
use thiserror::Error;
use tracing::warn;

/// Distance value marking a cell unreachable from a berth.
pub const UNREACHABLE: u16 = u16::MAX;

/// Neighbor probing order; reversed on even `(row + col)` parity so paths
/// come out visually straight without affecting correctness.
const DIRS: [Orientation; 4] = [
    Orientation::South,
    Orientation::North,
    Orientation::West,
    Orientation::East,
];

/// Static terrain of a single grid cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cell {
    /// Open ground robots may traverse.
    Space,
    /// Open water ships may traverse.
    Sea,
    /// Permanently impassable land.
    Obstacle,
    /// Berth footprint cell; passable to both robots and ships.
    Berth,
    /// Land cell robots spawn on when purchased.
    RobotShop,
    /// Water cell ships spawn on when purchased.
    ShipShop,
    /// Water cell where a loaded ship banks its cargo value.
    Delivery,
}

impl Cell {
    /// Parses one map glyph; both the distilled legend (`. * # A B`) and the
    /// extended one (`R S T`) are accepted.
    #[must_use]
    pub const fn from_glyph(glyph: char) -> Option<Self> {
        match glyph {
            '.' => Some(Cell::Space),
            '*' => Some(Cell::Sea),
            '#' => Some(Cell::Obstacle),
            'B' => Some(Cell::Berth),
            'A' | 'R' => Some(Cell::RobotShop),
            'S' => Some(Cell::ShipShop),
            'T' => Some(Cell::Delivery),
            _ => None,
        }
    }

    /// True when robots may stand on this terrain.
    #[must_use]
    pub const fn is_land(&self) -> bool {
        matches!(self, Cell::Space | Cell::Berth | Cell::RobotShop)
    }

    /// True when ship footprints may cover this terrain.
    #[must_use]
    pub const fn is_water(&self) -> bool {
        matches!(
            self,
            Cell::Sea | Cell::Berth | Cell::ShipShop | Cell::Delivery
        )
    }
}

/// Failures raised while parsing the textual map block.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapParseError {
    /// The map block contained no rows.
    #[error("map has no rows")]
    Empty,
    /// A row's length differed from the first row's.
    #[error("row {row} has {got} cells, expected {expected}")]
    RaggedRow {
        /// Offending row index.
        row: usize,
        /// Length of the first row.
        expected: usize,
        /// Length of the offending row.
        got: usize,
    },
    /// A glyph outside the map legend was encountered.
    #[error("unknown map glyph {glyph:?} at {at}")]
    UnknownGlyph {
        /// The unrecognized character.
        glyph: char,
        /// Cell position of the character.
        at: Point,
    },
}

/// The shared grid: fixed terrain, per-berth BFS distance fields, and the
/// reference-counted transient overlay controllers scribble into.
#[derive(Clone, Debug, PartialEq)]
pub struct Map {
    rows: i32,
    cols: i32,
    grid: Vec<Cell>,
    overlay: HashMap<Point, u32>,
    berth_fields: Vec<Vec<u16>>,
}

impl Map {
    /// Builds a map from parsed rows of glyphs.
    pub fn from_lines<S: AsRef<str>>(lines: &[S]) -> Result<Self, MapParseError> {
        let first = lines.first().ok_or(MapParseError::Empty)?;
        let cols = first.as_ref().chars().count();
        if cols == 0 {
            return Err(MapParseError::Empty);
        }

        let mut grid = Vec::with_capacity(lines.len() * cols);
        for (row, line) in lines.iter().enumerate() {
            let mut got = 0;
            for (col, glyph) in line.as_ref().chars().enumerate() {
                let cell = Cell::from_glyph(glyph).ok_or(MapParseError::UnknownGlyph {
                    glyph,
                    at: Point::new(row as i32, col as i32),
                })?;
                grid.push(cell);
                got += 1;
            }
            if got != cols {
                return Err(MapParseError::RaggedRow {
                    row,
                    expected: cols,
                    got,
                });
            }
        }

        Ok(Self {
            rows: lines.len() as i32,
            cols: cols as i32,
            grid,
            overlay: HashMap::new(),
            berth_fields: Vec::new(),
        })
    }

    /// Number of rows in the grid.
    #[must_use]
    pub const fn rows(&self) -> i32 {
        self.rows
    }

    /// Number of columns in the grid.
    #[must_use]
    pub const fn cols(&self) -> i32 {
        self.cols
    }

    /// True when the point lies inside the grid.
    #[must_use]
    pub const fn in_bounds(&self, p: Point) -> bool {
        p.row() >= 0 && p.row() < self.rows && p.col() >= 0 && p.col() < self.cols
    }

    /// Terrain of the cell at `p`; out-of-bounds reads as `Obstacle`.
    #[must_use]
    pub fn cell(&self, p: Point) -> Cell {
        match self.index(p) {
            Some(index) => self.grid[index],
            None => Cell::Obstacle,
        }
    }

    /// True when a robot may enter `p` this frame: land terrain with no
    /// transient block on it.
    #[must_use]
    pub fn passable(&self, p: Point) -> bool {
        self.cell(p).is_land() && !self.is_overlaid(p)
    }

    /// True when `p` is land terrain, ignoring the transient overlay.
    #[must_use]
    pub fn static_passable(&self, p: Point) -> bool {
        self.cell(p).is_land()
    }

    /// True when `p` is water terrain. Ships ignore the robot overlay.
    #[must_use]
    pub fn sea_passable(&self, p: Point) -> bool {
        self.cell(p).is_water()
    }

    /// True when every cell of the pose's footprint is water terrain.
    #[must_use]
    pub fn ship_passable(&self, pose: ShipPose) -> bool {
        pose.footprint().iter().all(|cell| self.sea_passable(*cell))
    }

    /// The up-to-four passable 4-adjacent cells of `p`, in the fixed probing
    /// order, reversed when `(row + col)` is even.
    #[must_use]
    pub fn neighbors(&self, p: Point) -> Neighbors {
        let mut neighbors = Neighbors::default();
        for dir in DIRS {
            let next = p.step(dir);
            if self.in_bounds(next) && self.passable(next) {
                neighbors.push(next);
            }
        }
        if (p.row() + p.col()) % 2 == 0 {
            neighbors.reverse();
        }
        neighbors
    }

    /// Precomputes the multi-source BFS distance field for a berth from its
    /// footprint cells. Re-running it for the same berth is idempotent.
    pub fn compute_berth_distances(&mut self, berth: BerthId, footprint: &[Point]) {
        let cell_count = (self.rows * self.cols) as usize;
        let mut field = vec![UNREACHABLE; cell_count];
        let mut queue = VecDeque::new();

        for &seed in footprint {
            if !self.in_bounds(seed) || !self.static_passable(seed) {
                continue;
            }
            let index = self.index(seed).expect("seed bounds checked above");
            if field[index] == 0 {
                continue;
            }
            field[index] = 0;
            queue.push_back(seed);
        }

        while let Some(current) = queue.pop_front() {
            let current_index = self.index(current).expect("queued cells are in bounds");
            let next_distance = field[current_index].saturating_add(1);
            if next_distance == UNREACHABLE {
                continue;
            }
            for dir in DIRS {
                let next = current.step(dir);
                if !self.in_bounds(next) || !self.static_passable(next) {
                    continue;
                }
                let next_index = self.index(next).expect("neighbor bounds checked above");
                if field[next_index] != UNREACHABLE {
                    continue;
                }
                field[next_index] = next_distance;
                queue.push_back(next);
            }
        }

        let slot = berth.index();
        if self.berth_fields.len() <= slot {
            self.berth_fields.resize(slot + 1, Vec::new());
        }
        self.berth_fields[slot] = field;
    }

    /// BFS distance from `p` to the berth footprint; `UNREACHABLE` when no
    /// land route exists, `None` when the field was never computed or `p`
    /// lies outside the grid.
    #[must_use]
    pub fn berth_distance(&self, berth: BerthId, p: Point) -> Option<u16> {
        let field = self.berth_fields.get(berth.index())?;
        if field.is_empty() {
            return None;
        }
        let index = self.index(p)?;
        field.get(index).copied()
    }

    /// True when a land route exists between `p` and the berth footprint.
    #[must_use]
    pub fn berth_reachable(&self, berth: BerthId, p: Point) -> bool {
        matches!(self.berth_distance(berth, p), Some(d) if d != UNREACHABLE)
    }

    /// Reserves `p` for this frame. Rejected (logged, no-op) on fixed
    /// obstacles, water, or out-of-bounds cells; repeated reservations on
    /// the same cell stack via a reference count.
    pub fn add_transient_block(&mut self, p: Point) -> bool {
        if !self.in_bounds(p) || !self.cell(p).is_land() {
            warn!(at = %p, "transient block rejected on fixed terrain");
            return false;
        }
        *self.overlay.entry(p).or_insert(0) += 1;
        true
    }

    /// Releases one reservation of `p`; the cell reopens when the count
    /// reaches zero.
    pub fn remove_transient_block(&mut self, p: Point) {
        if let Some(count) = self.overlay.get_mut(&p) {
            *count -= 1;
            if *count == 0 {
                let _ = self.overlay.remove(&p);
            }
        }
    }

    /// Drops every transient reservation at once.
    pub fn clear_transient_blocks(&mut self) {
        self.overlay.clear();
    }

    /// True when at least one reservation covers `p`.
    #[must_use]
    pub fn is_overlaid(&self, p: Point) -> bool {
        self.overlay.contains_key(&p)
    }

    /// True when every reservation has been released; must hold at the end
    /// of each frame.
    #[must_use]
    pub fn overlay_is_clear(&self) -> bool {
        self.overlay.is_empty()
    }

    /// Reserved cells within the square of the given radius around `center`,
    /// excluding `center` itself, in row-major order.
    #[must_use]
    pub fn nearby_transient_blocks(&self, center: Point, radius: i32) -> Vec<Point> {
        let mut nearby = Vec::new();
        for dr in -radius..=radius {
            for dc in -radius..=radius {
                let p = Point::new(center.row() + dr, center.col() + dc);
                if p != center && self.in_bounds(p) && self.is_overlaid(p) {
                    nearby.push(p);
                }
            }
        }
        nearby
    }

    /// Labels the connected components of land terrain.
    #[must_use]
    pub fn land_components(&self) -> ComponentLabels {
        self.label_components(|cell| cell.is_land())
    }

    /// Labels the connected components of water terrain.
    #[must_use]
    pub fn sea_components(&self) -> ComponentLabels {
        self.label_components(|cell| cell.is_water())
    }

    fn label_components<F>(&self, belongs: F) -> ComponentLabels
    where
        F: Fn(Cell) -> bool,
    {
        let cell_count = (self.rows * self.cols) as usize;
        let mut labels = vec![u32::MAX; cell_count];
        let mut count = 0;

        for row in 0..self.rows {
            for col in 0..self.cols {
                let seed = Point::new(row, col);
                let seed_index = self.index(seed).expect("scan stays in bounds");
                if labels[seed_index] != u32::MAX || !belongs(self.cell(seed)) {
                    continue;
                }
                let label = count;
                count += 1;
                labels[seed_index] = label;
                let mut queue = VecDeque::from([seed]);
                while let Some(current) = queue.pop_front() {
                    for dir in DIRS {
                        let next = current.step(dir);
                        let Some(next_index) = self.index(next) else {
                            continue;
                        };
                        if labels[next_index] != u32::MAX || !belongs(self.cell(next)) {
                            continue;
                        }
                        labels[next_index] = label;
                        queue.push_back(next);
                    }
                }
            }
        }

        ComponentLabels {
            cols: self.cols,
            labels,
            count,
        }
    }

    fn index(&self, p: Point) -> Option<usize> {
        if self.in_bounds(p) {
            Some((p.row() * self.cols + p.col()) as usize)
        } else {
            None
        }
    }
}

/// Scoped transient-block acquisition: every block added through the scope
/// is released when the scope drops, so early returns cannot leak overlay
/// entries into the next frame.
#[derive(Debug)]
pub struct OverlayScope<'a> {
    map: &'a mut Map,
    added: Vec<Point>,
}

impl<'a> OverlayScope<'a> {
    /// Opens a scope over the map.
    pub fn new(map: &'a mut Map) -> Self {
        Self {
            map,
            added: Vec::new(),
        }
    }

    /// Adds a transient block that lives until the scope closes.
    pub fn block(&mut self, p: Point) -> bool {
        if self.map.add_transient_block(p) {
            self.added.push(p);
            true
        } else {
            false
        }
    }

    /// Read access to the map with the scope's blocks applied.
    #[must_use]
    pub fn map(&self) -> &Map {
        self.map
    }
}

impl Drop for OverlayScope<'_> {
    fn drop(&mut self) {
        for p in self.added.drain(..) {
            self.map.remove_transient_block(p);
        }
    }
}

/// Dense connected-component labelling produced by the map.
#[derive(Clone, Debug)]
pub struct ComponentLabels {
    cols: i32,
    labels: Vec<u32>,
    count: u32,
}

impl ComponentLabels {
    /// Component label of `p`, or `None` when `p` is not part of any.
    #[must_use]
    pub fn label(&self, p: Point) -> Option<u32> {
        if p.row() < 0 || p.col() < 0 || p.col() >= self.cols {
            return None;
        }
        let index = (p.row() * self.cols + p.col()) as usize;
        match self.labels.get(index) {
            Some(&label) if label != u32::MAX => Some(label),
            _ => None,
        }
    }

    /// Number of components found.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// True when both points belong to the same component.
    #[must_use]
    pub fn connected(&self, a: Point, b: Point) -> bool {
        matches!((self.label(a), self.label(b)), (Some(x), Some(y)) if x == y)
    }
}

/// Fixed-capacity iterator over a cell's passable neighbors.
#[derive(Clone, Copy, Debug, Default)]
pub struct Neighbors {
    buffer: [Option<Point>; 4],
    len: usize,
    cursor: usize,
}

impl Neighbors {
    fn push(&mut self, p: Point) {
        if self.len < self.buffer.len() {
            self.buffer[self.len] = Some(p);
            self.len += 1;
        }
    }

    fn reverse(&mut self) {
        self.buffer[..self.len].reverse();
    }
}

impl Iterator for Neighbors {
    type Item = Point;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.len {
            return None;
        }
        let value = self.buffer[self.cursor];
        self.cursor += 1;
        value
    }
}
