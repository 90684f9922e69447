//! Observation Mapping Library
//!
//! This library loads declarative mapping policies for instrument data
//! repositories: which dataset types exist, where their files live
//! (path templates), how they are stored, and how composites assemble
//! from other dataset types.

pub mod config;
pub mod error;
pub mod policy;
pub mod registry;
