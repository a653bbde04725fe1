//! Client-side sync for a remote tile board game.
//!
//! `sync` keeps an overlay view current with conditional polling and a local
//! countdown tick, `image_cache` holds decoded tile artwork, `standings`
//! refreshes the team table, and `session` ties them to a connected game
//! together with the action calls.

pub mod actions;
pub mod api;
pub mod config;
pub mod display;
pub mod fields;
pub mod game_state;
pub mod image_cache;
pub mod lru;
pub mod session;
pub mod snapshot;
pub mod standings;
pub mod sync;
