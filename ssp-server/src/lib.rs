//! Sound speed profile distribution server.
//!
//! Listens to the sonar acquisition system and a moving-vessel profiler,
//! builds a corrected synthetic cast for the vessel's position and keeps
//! every configured acquisition client supplied with it.

pub mod atlas;
pub mod clients;
pub mod config;
pub mod distribution;
pub mod http;
pub mod kongsberg;
pub mod listener;
pub mod mvp;
pub mod profile;
pub mod transport;
pub mod wire;
