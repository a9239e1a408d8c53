//! Uniform occupancy grid for decluttering map tokens.
//!
//! A grid covers a fixed plane; every point maps to exactly one cell via
//! `floor(coord / cell_size)`. Each cell holds the occupants placed on it.
//! The grid is built once per layout pass and thrown away afterwards.
//!
//! Placement is a cheap heuristic, not an optimal solver: when the requested
//! cell is taken, the search only walks *down* the same column, one row at a
//! time, while the candidate cell stays within `max_distance` of a reference
//! point. The sweep runs [`SWEEP_ATTEMPTS`] times from the carried-over
//! position. Placement results depend on this exact order.

use crate::math::{Size, Vec2};

/// Number of sequential downward sweeps before giving up.
pub const SWEEP_ATTEMPTS: usize = 4;

/// Upper bound on the number of cells a single grid may allocate.
pub const MAX_CELLS: usize = 1 << 22;

/// Row/column address of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellIndex {
    pub row: usize,
    pub col: usize,
}

impl CellIndex {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Grid construction errors.
#[derive(Debug, Clone, PartialEq)]
pub enum GridError {
    /// Cell size must be finite and positive.
    InvalidCellSize(f32),
    /// Plane dimensions must be finite and non-negative.
    InvalidPlane(Size),
    /// Plane divided by cell size needs more than [`MAX_CELLS`] cells.
    TooLarge { rows: f32, cols: f32 },
}

impl std::fmt::Display for GridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridError::InvalidCellSize(s) => write!(f, "invalid cell size {s}"),
            GridError::InvalidPlane(p) => write!(f, "invalid plane {}x{}", p.width, p.height),
            GridError::TooLarge { rows, cols } => {
                write!(f, "grid of {rows}x{cols} cells exceeds {MAX_CELLS}")
            }
        }
    }
}

impl std::error::Error for GridError {}

/// Fixed-extent occupancy grid.
#[derive(Debug, Clone)]
pub struct Grid<T> {
    cell_size: f32,
    rows: usize,
    cols: usize,
    /// Row-major, `rows * cols` entries.
    cells: Vec<Vec<T>>,
}

impl<T> Grid<T> {
    /// Creates an empty grid covering `plane`, ceiling-dividing its extent.
    pub fn new(plane: Size, cell_size: f32) -> Result<Self, GridError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(GridError::InvalidCellSize(cell_size));
        }
        let valid = |v: f32| v.is_finite() && v >= 0.0;
        if !valid(plane.width) || !valid(plane.height) {
            return Err(GridError::InvalidPlane(plane));
        }

        let (rows_f, cols_f) = ((plane.height / cell_size).ceil(), (plane.width / cell_size).ceil());
        let too_large = GridError::TooLarge {
            rows: rows_f,
            cols: cols_f,
        };
        let limit = MAX_CELLS as f32;
        if !(rows_f <= limit && cols_f <= limit) {
            return Err(too_large);
        }
        let (rows, cols) = (rows_f as usize, cols_f as usize);
        let count = rows
            .checked_mul(cols)
            .filter(|&n| n <= MAX_CELLS)
            .ok_or(too_large)?;
        let mut cells = Vec::with_capacity(count);
        cells.resize_with(count, Vec::new);

        Ok(Self {
            cell_size,
            rows,
            cols,
            cells,
        })
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Maps a point to its cell, or `None` if the point lies outside the grid.
    pub fn cell_index(&self, x: f32, y: f32) -> Option<CellIndex> {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let row = (y / self.cell_size).floor() as usize;
        let col = (x / self.cell_size).floor() as usize;
        (row < self.rows && col < self.cols).then_some(CellIndex::new(row, col))
    }

    /// Occupants of the cell containing `(x, y)`.
    pub fn cell_of(&self, x: f32, y: f32) -> Option<&[T]> {
        self.cell_index(x, y).and_then(|idx| self.occupants(idx))
    }

    /// Occupants of a cell by index.
    pub fn occupants(&self, idx: CellIndex) -> Option<&[T]> {
        self.slot(idx).map(|i| self.cells[i].as_slice())
    }

    /// Adds an occupant to the cell containing `(x, y)`. Returns false if the
    /// point is outside the grid.
    pub fn insert(&mut self, x: f32, y: f32, occupant: T) -> bool {
        match self.cell_index(x, y).and_then(|idx| self.slot(idx)) {
            Some(i) => {
                self.cells[i].push(occupant);
                true
            }
            None => false,
        }
    }

    /// Top-left corner of a cell in plane coordinates.
    pub fn cell_origin(&self, idx: CellIndex) -> Vec2 {
        Vec2::new(
            idx.col as f32 * self.cell_size,
            idx.row as f32 * self.cell_size,
        )
    }

    /// Number of cells an extent covers; never less than one.
    pub fn span(&self, extent: f32) -> usize {
        let cells = (extent.max(0.0) / self.cell_size).ceil() as usize;
        cells.max(1)
    }

    /// True if any cell under `footprint` placed at `start` is non-empty.
    ///
    /// A region that runs off the grid counts as occupied.
    pub fn is_occupied_region(&self, start: CellIndex, footprint: Size) -> bool {
        let end_row = start.row.saturating_add(self.span(footprint.height));
        let end_col = start.col.saturating_add(self.span(footprint.width));
        if end_row > self.rows || end_col > self.cols {
            return true;
        }
        (start.row..end_row).any(|row| {
            (start.col..end_col).any(|col| !self.cells[row * self.cols + col].is_empty())
        })
    }

    /// Finds a nearby spot for an occupant that wants to sit at `point`.
    ///
    /// Returns `point` unchanged when its cell is empty, a cell-aligned
    /// origin below it when the downward sweep finds a vacant region, and
    /// `point` again when nothing within `max_distance` of `reference` is
    /// free.
    pub fn find_nearby_vacant_cell(
        &self,
        point: Vec2,
        reference: Vec2,
        max_distance: f32,
        footprint: Size,
    ) -> Vec2 {
        let Some(start) = self.cell_index(point.x, point.y) else {
            return point;
        };
        if self.occupants(start).is_some_and(|o| o.is_empty()) {
            return point;
        }

        let in_reach = |idx: CellIndex| {
            idx.row < self.rows && reference.distance(self.cell_origin(idx)) < max_distance
        };

        let mut cell = start;
        for _ in 0..SWEEP_ATTEMPTS {
            while in_reach(cell) && self.is_occupied_region(cell, footprint) {
                cell.row += 1;
            }
            if in_reach(cell) && !self.is_occupied_region(cell, footprint) {
                return self.cell_origin(cell);
            }
        }
        point
    }

    fn slot(&self, idx: CellIndex) -> Option<usize> {
        (idx.row < self.rows && idx.col < self.cols).then_some(idx.row * self.cols + idx.col)
    }
}

impl<T: Clone> Grid<T> {
    /// Adds `occupant` to every cell its footprint covers, clipped to the
    /// grid. Returns the number of cells touched.
    pub fn occupy(&mut self, origin: Vec2, footprint: Size, occupant: T) -> usize {
        let Some(start) = self.cell_index(origin.x, origin.y) else {
            return 0;
        };
        let end_row = start.row.saturating_add(self.span(footprint.height)).min(self.rows);
        let end_col = start.col.saturating_add(self.span(footprint.width)).min(self.cols);
        let mut touched = 0;
        for row in start.row..end_row {
            for col in start.col..end_col {
                self.cells[row * self.cols + col].push(occupant.clone());
                touched += 1;
            }
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: Size = Size::new(10.0, 10.0);

    fn grid() -> Grid<u32> {
        Grid::new(Size::new(100.0, 100.0), 10.0).unwrap()
    }

    #[test]
    fn dimensions_are_ceiling_divided() {
        let g: Grid<u32> = Grid::new(Size::new(95.0, 41.0), 10.0).unwrap();
        assert_eq!(g.cols(), 10);
        assert_eq!(g.rows(), 5);
    }

    #[test]
    fn rejects_bad_cell_size() {
        assert_eq!(
            Grid::<u32>::new(Size::new(10.0, 10.0), 0.0).unwrap_err(),
            GridError::InvalidCellSize(0.0)
        );
        assert!(Grid::<u32>::new(Size::new(10.0, 10.0), f32::NAN).is_err());
        assert!(Grid::<u32>::new(Size::new(-1.0, 10.0), 1.0).is_err());
    }

    #[test]
    fn rejects_tiny_cell_size_on_an_ordinary_plane() {
        let err = Grid::<u32>::new(Size::new(1000.0, 1000.0), 1e-7).unwrap_err();
        assert!(matches!(err, GridError::TooLarge { .. }));
        // One column past 2048 x 2048 = MAX_CELLS.
        assert!(matches!(
            Grid::<u32>::new(Size::new(2049.0, 2048.0), 1.0),
            Err(GridError::TooLarge { .. })
        ));
    }

    #[test]
    fn cell_lookup_is_guarded_at_the_edges() {
        let mut g = grid();
        assert!(g.insert(99.9, 0.0, 1));
        assert_eq!(g.cell_index(99.9, 0.0), Some(CellIndex::new(0, 9)));
        assert_eq!(g.cell_of(95.0, 5.0), Some(&[1][..]));
        assert_eq!(g.cell_index(100.0, 0.0), None);
        assert_eq!(g.cell_index(-0.1, 0.0), None);
        assert!(g.cell_of(5.0, 250.0).is_none());
        assert!(!g.insert(-5.0, 5.0, 2));
    }

    #[test]
    fn empty_cell_keeps_requested_point() {
        let g = grid();
        let p = Vec2::new(37.5, 12.25);
        assert_eq!(g.find_nearby_vacant_cell(p, Vec2::ZERO, 100.0, TOKEN), p);
    }

    #[test]
    fn occupied_cell_moves_one_row_down() {
        let mut g = grid();
        g.occupy(Vec2::new(0.0, 0.0), TOKEN, 1);

        let placed = g.find_nearby_vacant_cell(Vec2::new(5.0, 5.0), Vec2::ZERO, 100.0, TOKEN);
        assert_eq!(placed, Vec2::new(0.0, 10.0));
    }

    #[test]
    fn sweep_skips_a_stack_of_occupied_cells() {
        let mut g = grid();
        for row in 0..3 {
            g.occupy(Vec2::new(20.0, row as f32 * 10.0), TOKEN, row);
        }
        let placed = g.find_nearby_vacant_cell(Vec2::new(25.0, 3.0), Vec2::new(20.0, 0.0), 100.0, TOKEN);
        assert_eq!(placed, Vec2::new(20.0, 30.0));
    }

    #[test]
    fn footprint_larger_than_a_cell_needs_a_taller_gap() {
        let mut g = grid();
        g.insert(5.0, 5.0, 1);
        g.insert(5.0, 25.0, 2);
        // A 10x20 token does not fit between the occupants at rows 0 and 2.
        let tall = Size::new(10.0, 20.0);
        let placed = g.find_nearby_vacant_cell(Vec2::new(5.0, 5.0), Vec2::ZERO, 100.0, tall);
        assert_eq!(placed, Vec2::new(0.0, 30.0));
    }

    #[test]
    fn region_off_the_grid_counts_as_occupied() {
        let g = grid();
        assert!(g.is_occupied_region(CellIndex::new(9, 0), Size::new(10.0, 20.0)));
        assert!(!g.is_occupied_region(CellIndex::new(9, 0), TOKEN));
        assert!(g.is_occupied_region(CellIndex::new(3, 3), Size::new(f32::MAX, 10.0)));
    }

    #[test]
    fn everything_in_reach_occupied_keeps_requested_point() {
        let mut g = grid();
        for row in 0..10 {
            g.insert(5.0, row as f32 * 10.0 + 5.0, row);
        }
        let p = Vec2::new(5.0, 5.0);
        assert_eq!(g.find_nearby_vacant_cell(p, Vec2::ZERO, 1000.0, TOKEN), p);
    }

    #[test]
    fn distance_bound_is_measured_from_the_reference_point() {
        let mut g = grid();
        g.insert(5.0, 5.0, 1);
        g.insert(5.0, 15.0, 2);
        let p = Vec2::new(5.0, 5.0);

        // Row 2 origin (0, 20) is 20 away from the reference: out of reach.
        assert_eq!(g.find_nearby_vacant_cell(p, Vec2::ZERO, 20.0, TOKEN), p);
        // Moving the reference down brings it in reach.
        assert_eq!(
            g.find_nearby_vacant_cell(p, Vec2::new(0.0, 15.0), 20.0, TOKEN),
            Vec2::new(0.0, 20.0)
        );
    }

    #[test]
    fn point_outside_grid_is_returned_unchanged() {
        let g = grid();
        let p = Vec2::new(150.0, -3.0);
        assert_eq!(g.find_nearby_vacant_cell(p, Vec2::ZERO, 100.0, TOKEN), p);
    }

    #[test]
    fn occupy_clips_to_the_grid() {
        let mut g = grid();
        assert_eq!(g.occupy(Vec2::new(95.0, 95.0), Size::new(30.0, 30.0), 1), 1);
        assert_eq!(g.occupy(Vec2::new(0.0, 0.0), Size::new(20.0, 15.0), 2), 4);
        assert_eq!(g.occupants(CellIndex::new(1, 1)), Some(&[2][..]));
    }
}
