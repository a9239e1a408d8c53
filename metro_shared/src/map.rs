//! Transit map model.
//!
//! `SubwayMap` is the client-side projection of the authority's map: stations,
//! lines, and undirected weighted connections. It is rebuilt from every
//! snapshot, so all inserts are keyed by identity and replaying the same
//! [`MapData`] any number of times yields the same entity set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::math::Vec2;

/// Distance used for consecutive stations along a line.
pub const DEFAULT_SEGMENT_DISTANCE: f32 = 1.0;

pub type StationId = String;
pub type LineId = String;

/// Station as sent by the authority. Unknown fields are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Station {
    pub fn new(id: impl Into<StationId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            x: None,
            y: None,
            extra: Map::new(),
        }
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    /// Map position if the authority sent one.
    pub fn position(&self) -> Option<Vec2> {
        Some(Vec2::new(self.x?, self.y?))
    }
}

/// Line as sent by the authority: an ordered chain of stations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub id: LineId,
    #[serde(default)]
    pub station_ids: Vec<StationId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Line {
    pub fn new<I, S>(id: impl Into<LineId>, stations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StationId>,
    {
        Self {
            id: id.into(),
            station_ids: stations.into_iter().map(Into::into).collect(),
            extra: Map::new(),
        }
    }
}

/// Extra connection outside the station chains of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSpec {
    pub station_ids: [StationId; 2],
    pub line_id: LineId,
    pub distance: f32,
}

/// Map substructure of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapData {
    #[serde(default)]
    pub stations: Vec<Station>,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<Vec<ConnectionSpec>>,
}

impl MapData {
    /// Replays this map into `map`: stations, then each line followed by its
    /// consecutive station pairs, then explicit connections.
    pub fn replay_into<M: TransitMap + ?Sized>(&self, map: &mut M) {
        for station in &self.stations {
            map.add_station(station);
        }
        for line in &self.lines {
            map.add_line(line);
            for pair in line.station_ids.windows(2) {
                map.connect_stations(&pair[1], &pair[0], &line.id, DEFAULT_SEGMENT_DISTANCE);
            }
        }
        for conn in self.connections.iter().flatten() {
            let [a, b] = &conn.station_ids;
            map.connect_stations(a, b, &conn.line_id, conn.distance);
        }
        debug!(
            stations = self.stations.len(),
            lines = self.lines.len(),
            "Map replayed"
        );
    }
}

/// Capability set the snapshot replay needs from a map projection.
pub trait TransitMap {
    /// Inserts or replaces a station by id.
    fn add_station(&mut self, station: &Station);
    /// Inserts or replaces a line by id.
    fn add_line(&mut self, line: &Line);
    /// Inserts or replaces the connection between two stations on a line.
    fn connect_stations(&mut self, a: &str, b: &str, line_id: &str, distance: f32);
}

/// Undirected edge key: station pair in sorted order plus the line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey {
    pub a: StationId,
    pub b: StationId,
    pub line: LineId,
}

impl EdgeKey {
    pub fn new(a: &str, b: &str, line: &str) -> Self {
        let (a, b) = if a <= b { (a, b) } else { (b, a) };
        Self {
            a: a.to_string(),
            b: b.to_string(),
            line: line.to_string(),
        }
    }
}

/// In-memory transit map projection.
#[derive(Debug, Clone, Default)]
pub struct SubwayMap {
    stations: BTreeMap<StationId, Station>,
    lines: BTreeMap<LineId, Line>,
    connections: BTreeMap<EdgeKey, f32>,
}

impl SubwayMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn station(&self, id: &str) -> Option<&Station> {
        self.stations.get(id)
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connections touching `id` as `(other station, line, distance)`,
    /// ordered by station then line.
    pub fn connections_of(&self, id: &str) -> Vec<(&str, &str, f32)> {
        self.connections
            .iter()
            .filter_map(|(k, &distance)| {
                let other = if k.a == id {
                    k.b.as_str()
                } else if k.b == id {
                    k.a.as_str()
                } else {
                    return None;
                };
                Some((other, k.line.as_str(), distance))
            })
            .collect()
    }

    /// Identity snapshot of everything in the map, for comparisons.
    pub fn entity_keys(&self) -> (Vec<StationId>, Vec<LineId>, Vec<EdgeKey>) {
        (
            self.stations.keys().cloned().collect(),
            self.lines.keys().cloned().collect(),
            self.connections.keys().cloned().collect(),
        )
    }
}

impl TransitMap for SubwayMap {
    fn add_station(&mut self, station: &Station) {
        self.stations.insert(station.id.clone(), station.clone());
    }

    fn add_line(&mut self, line: &Line) {
        self.lines.insert(line.id.clone(), line.clone());
    }

    fn connect_stations(&mut self, a: &str, b: &str, line_id: &str, distance: f32) {
        self.connections.insert(EdgeKey::new(a, b, line_id), distance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MapData {
        MapData {
            stations: vec![Station::new("a"), Station::new("b"), Station::new("c")],
            lines: vec![Line::new("red", ["a", "b", "c"]), Line::new("blue", ["c", "b", "a"])],
            connections: Some(vec![ConnectionSpec {
                station_ids: ["a".into(), "c".into()],
                line_id: "express".into(),
                distance: 3.5,
            }]),
        }
    }

    #[test]
    fn replay_builds_chains_and_extra_connections() {
        let mut map = SubwayMap::new();
        sample().replay_into(&mut map);

        assert_eq!(map.station_count(), 3);
        assert_eq!(map.line_count(), 2);
        // red a-b, b-c; blue c-b, b-a; express a-c
        assert_eq!(map.connection_count(), 5);
        assert_eq!(
            map.connections_of("a"),
            vec![
                ("b", "blue", DEFAULT_SEGMENT_DISTANCE),
                ("b", "red", DEFAULT_SEGMENT_DISTANCE),
                ("c", "express", 3.5),
            ]
        );
        assert!(map.connections_of("zz").is_empty());
    }

    #[test]
    fn replay_is_idempotent() {
        let data = sample();
        let mut once = SubwayMap::new();
        data.replay_into(&mut once);

        let mut twice = SubwayMap::new();
        data.replay_into(&mut twice);
        data.replay_into(&mut twice);

        assert_eq!(once.entity_keys(), twice.entity_keys());
    }

    #[test]
    fn map_data_parses_camel_case_wire_format() {
        let data: MapData = serde_json::from_str(
            r#"{
                "stations": [{ "id": "s1", "name": "Central", "x": 4, "y": 8, "zone": 2 }],
                "lines": [{ "id": "l1", "stationIds": ["s1"], "color": "red" }],
                "connections": [{ "stationIds": ["s1", "s2"], "lineId": "l1", "distance": 2 }]
            }"#,
        )
        .unwrap();

        assert_eq!(data.stations[0].position(), Some(Vec2::new(4.0, 8.0)));
        assert_eq!(data.stations[0].extra["zone"], 2);
        assert_eq!(data.lines[0].extra["color"], "red");
        assert_eq!(data.connections.unwrap()[0].distance, 2.0);
    }

    #[test]
    fn missing_connections_is_accepted() {
        let data: MapData = serde_json::from_str(r#"{ "stations": [], "lines": [] }"#).unwrap();
        assert!(data.connections.is_none());
        let mut map = SubwayMap::new();
        data.replay_into(&mut map);
        assert_eq!(map.connection_count(), 0);
    }
}
