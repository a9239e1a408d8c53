//! Client store.
//!
//! Holds everything the presentation layer reads: the transit map
//! projection, the mirrored game state, the station selection mode, and the
//! navigator. It is the connection manager's [`SnapshotSink`].

use metro_shared::{
    config::LayoutConfig,
    game::{GameControl, GameSnapshot, Player},
    grid::GridError,
    layout::{layout_players, Placement},
    map::{MapData, SubwayMap, TransitMap},
    math::Size,
};
use tracing::{debug, warn};

use crate::{
    connection::SnapshotSink,
    route::{Navigator, Route, Router},
};

/// How station clicks are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StationMode {
    #[default]
    Normal,
    /// Picking a station not held by the current player.
    Select,
}

pub struct MapStore<M = SubwayMap, N = Router> {
    pub subway_map: M,
    pub game: GameControl,
    pub router: N,
    station_mode: StationMode,
}

impl Default for MapStore<SubwayMap, Router> {
    fn default() -> Self {
        Self::new(SubwayMap::new())
    }
}

impl<M: TransitMap> MapStore<M, Router> {
    pub fn new(subway_map: M) -> Self {
        Self::with_navigator(subway_map, Router::new())
    }
}

impl<M: TransitMap, N: Navigator> MapStore<M, N> {
    pub fn with_navigator(subway_map: M, router: N) -> Self {
        Self {
            subway_map,
            game: GameControl::new(),
            router,
            station_mode: StationMode::Normal,
        }
    }

    /// Merges the snapshot's player/turn data and replays its map.
    pub fn update_game_state(&mut self, snapshot: &GameSnapshot) {
        self.game.copy_from(snapshot);
        self.init_map(&snapshot.map);
    }

    pub fn init_map(&mut self, map: &MapData) {
        map.replay_into(&mut self.subway_map);
    }

    pub fn cur_player(&self) -> Option<&Player> {
        self.game.current_player()
    }

    pub fn station_mode(&self) -> StationMode {
        self.station_mode
    }

    pub fn set_station_mode(&mut self, mode: StationMode) {
        debug!(?mode, "Station mode");
        self.station_mode = mode;
    }
}

impl<N> MapStore<SubwayMap, N> {
    /// Declutters player tokens sharing a station.
    pub fn player_layout(&self, plane: Size, cfg: &LayoutConfig) -> Result<Vec<Placement<String>>, GridError> {
        layout_players(plane, cfg, &self.subway_map, &self.game.players)
    }
}

impl<M: TransitMap, N: Navigator> SnapshotSink for MapStore<M, N> {
    fn apply_snapshot(&mut self, snapshot: &GameSnapshot) {
        self.update_game_state(snapshot);
    }

    fn game_started(&mut self, game_id: Option<&str>) {
        match game_id {
            Some(id) => {
                self.router.navigate(Route::game(id));
            }
            None => warn!("Game started but no game id is set; staying on current view"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metro_shared::map::{Line, Station};
    use metro_shared::math::Vec2;

    fn snapshot() -> GameSnapshot {
        let mut p1 = Player::new("p1", "Ada");
        p1.station_id = Some("a".into());
        let mut p2 = Player::new("p2", "Lin");
        p2.station_id = Some("a".into());
        GameSnapshot {
            map: MapData {
                stations: vec![Station::new("a").at(20.0, 20.0), Station::new("b").at(60.0, 20.0)],
                lines: vec![Line::new("red", ["a", "b"])],
                connections: None,
            },
            players: vec![p1, p2],
            current_player_index: 0,
            ..Default::default()
        }
    }

    #[test]
    fn repeated_snapshots_do_not_duplicate_the_map() {
        let mut store: MapStore = MapStore::default();
        store.apply_snapshot(&snapshot());
        let first = store.subway_map.entity_keys();
        store.apply_snapshot(&snapshot());

        assert_eq!(store.subway_map.entity_keys(), first);
        assert_eq!(store.subway_map.connection_count(), 1);
        assert_eq!(store.cur_player().map(|p| p.id.as_str()), Some("p1"));
    }

    #[test]
    fn game_started_without_game_id_stays_put() {
        let mut store: MapStore = MapStore::default();
        store.game_started(None);
        assert!(store.router.current().is_metro());

        store.game_started(Some("g1"));
        store.game_started(Some("g1"));
        assert_eq!(store.router.history().len(), 2);
    }

    struct RecordingNavigator {
        current: Route,
        visits: Vec<Route>,
    }

    impl Navigator for RecordingNavigator {
        fn navigate(&mut self, route: Route) -> bool {
            self.visits.push(route.clone());
            self.current = route;
            true
        }

        fn current(&self) -> &Route {
            &self.current
        }
    }

    #[test]
    fn game_started_goes_through_the_navigator() {
        let mut store = MapStore::with_navigator(
            SubwayMap::new(),
            RecordingNavigator {
                current: Route::Metro,
                visits: Vec::new(),
            },
        );
        store.game_started(Some("g9"));
        assert_eq!(store.router.visits, vec![Route::game("g9")]);
        assert_eq!(store.router.current(), &Route::game("g9"));
    }

    #[test]
    fn players_on_one_station_are_spread_out() {
        let mut store: MapStore = MapStore::default();
        store.apply_snapshot(&snapshot());

        let layout = store
            .player_layout(Size::new(100.0, 100.0), &LayoutConfig::default())
            .unwrap();
        assert_eq!(layout[0].position, Vec2::new(20.0, 20.0));
        assert_eq!(layout[1].position, Vec2::new(20.0, 30.0));
    }

    #[test]
    fn station_mode_toggles() {
        let mut store: MapStore = MapStore::default();
        assert_eq!(store.station_mode(), StationMode::Normal);
        store.set_station_mode(StationMode::Select);
        assert_eq!(store.station_mode(), StationMode::Select);
    }
}
