//! Token layout.
//!
//! Each pass builds a fresh [`Grid`], then places tokens in input order so
//! earlier tokens keep their spot and later ones are pushed down the column.

use tracing::debug;

use crate::{
    config::LayoutConfig,
    game::Player,
    grid::{Grid, GridError},
    map::SubwayMap,
    math::{Size, Vec2},
};

/// Resolved position for one token.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement<K> {
    pub key: K,
    pub desired: Vec2,
    pub position: Vec2,
}

impl<K> Placement<K> {
    pub fn moved(&self) -> bool {
        self.desired != self.position
    }
}

/// Places `tokens` (key, desired point) on a plane of the given size.
pub fn layout_tokens<K: Clone>(
    plane: Size,
    cfg: &LayoutConfig,
    tokens: impl IntoIterator<Item = (K, Vec2)>,
) -> Result<Vec<Placement<K>>, GridError> {
    let mut grid: Grid<K> = Grid::new(plane, cfg.cell_size)?;
    let footprint = Size::new(cfg.token_width, cfg.token_height);

    let placements: Vec<_> = tokens
        .into_iter()
        .map(|(key, desired)| {
            let position =
                grid.find_nearby_vacant_cell(desired, desired, cfg.max_distance, footprint);
            grid.occupy(position, footprint, key.clone());
            Placement {
                key,
                desired,
                position,
            }
        })
        .collect();

    debug!(
        tokens = placements.len(),
        moved = placements.iter().filter(|p| p.moved()).count(),
        "Token layout pass"
    );
    Ok(placements)
}

/// Lays out player tokens on the stations they occupy. Players without a
/// station, or on a station with no position, are skipped.
pub fn layout_players(
    plane: Size,
    cfg: &LayoutConfig,
    map: &SubwayMap,
    players: &[Player],
) -> Result<Vec<Placement<String>>, GridError> {
    let tokens = players.iter().filter_map(|p| {
        let station = map.station(p.station_id.as_deref()?)?;
        Some((p.id.clone(), station.position()?))
    });
    layout_tokens(plane, cfg, tokens)
}
