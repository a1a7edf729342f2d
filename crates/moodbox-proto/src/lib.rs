//! Types shared by the moodbox daemon and its control client.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod state;
pub mod stations;
