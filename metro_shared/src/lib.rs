//! `metro_shared`
//!
//! Libraries shared by the metro client and anything that speaks its
//! protocol.
//!
//! Design goals:
//! - Deterministic and modular where practical.
//! - Clear separation of concerns (net, map, game, grid, layout).
//! - Traits at the seams callers replace (e.g. [`map::TransitMap`]).
//! - No `unsafe`.

pub mod config;
pub mod game;
pub mod grid;
pub mod layout;
pub mod map;
pub mod math;
pub mod net;
