//! Agent-based simulation of innovation diffusion in social networks.
//!
//! Agents hold social opinion intervals, receive information from the media,
//! discuss it with bounded-confidence opinion exchange over a directed
//! influence network, and move through an adoption funnel. Runs are managed
//! per simulation directory, seeded, checkpointable and analyzed offline from
//! their trajectory files.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod manager;
pub mod model;
pub mod stats;
