//! Area sampling grid
//!
//! Regular grid of cells inside the circle of `radius_meters`, spaced at the
//! profile's effective spacing. The cell count never exceeds `max_samples`:
//! when the lattice is too dense for a tiny cap, the cells nearest the centre
//! are kept.

use crate::scale::ScaleProfile;
use crate::types::Coordinate;

/// Grid cell offset from the centre, in metres
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellOffset {
    pub east_m: f64,
    pub north_m: f64,
}

impl CellOffset {
    fn distance_sq(&self) -> f64 {
        self.east_m * self.east_m + self.north_m * self.north_m
    }
}

/// Cell offsets in row-major order (south to north, west to east)
pub fn grid_offsets(scale: &ScaleProfile) -> Vec<CellOffset> {
    let radius = scale.radius_meters.max(0.0);
    let spacing = scale.effective_spacing();
    let steps = (radius / spacing).floor() as i64;
    // Tolerance for cells sitting exactly on the circle
    let limit_sq = radius * radius * (1.0 + 1e-9);

    let mut offsets = Vec::new();
    for row in -steps..=steps {
        for col in -steps..=steps {
            let cell = CellOffset {
                east_m: col as f64 * spacing,
                north_m: row as f64 * spacing,
            };
            if cell.distance_sq() <= limit_sq {
                offsets.push(cell);
            }
        }
    }

    let cap = scale.max_samples.max(1);
    if offsets.len() > cap {
        let mut ranked: Vec<(usize, CellOffset)> = offsets.into_iter().enumerate().collect();
        // Stable: equal distances keep row-major order
        ranked.sort_by(|a, b| a.1.distance_sq().total_cmp(&b.1.distance_sq()));
        ranked.truncate(cap);
        ranked.sort_by_key(|(index, _)| *index);
        offsets = ranked.into_iter().map(|(_, cell)| cell).collect();
    }

    offsets
}

/// Cell coordinates around `center`
pub fn grid_cells(center: Coordinate, scale: &ScaleProfile) -> Vec<Coordinate> {
    grid_offsets(scale)
        .into_iter()
        .map(|cell| center.offset_meters(cell.east_m, cell.north_m))
        .collect()
}
