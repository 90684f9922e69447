//! Policy Registry
//!
//! Loads policy files from disk and serves the resulting dataset type
//! descriptors. Loading is all-or-nothing: a policy either verifies
//! clean and becomes a registry, or is rejected with a full error log.

mod descriptor;
mod loader;

pub use descriptor::{DatasetDescriptor, PolicyRegistry};
pub use loader::{parse_policy, to_yaml_string, LoadedPolicy, PolicyLoader};
