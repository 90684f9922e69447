//! Dataset type registry
//!
//! Flattens the three policy sections into one read-only lookup table of
//! dataset descriptors keyed by name. Names must be unique across
//! sections. Level defaults and the substitution key set in force ride
//! along so query-side code has everything in one place.

use crate::error::{PolicyError, Result};
use crate::policy::{DatasetMapping, KeySet, LevelKeys, Policy, Section};
use serde::Serialize;
use std::collections::BTreeMap;

/// One dataset type with its section of origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetDescriptor {
    pub name: String,
    pub section: Section,
    pub mapping: DatasetMapping,
}

/// Read-only registry of every dataset type a policy defines.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    descriptors: BTreeMap<String, DatasetDescriptor>,
    levels: BTreeMap<String, LevelKeys>,
    default_level: Option<String>,
    default_sub_levels: BTreeMap<String, String>,
    known_keys: KeySet,
}

impl PolicyRegistry {
    /// Build a registry with the built-in substitution keys.
    pub fn from_policy(policy: &Policy) -> Result<Self> {
        Self::with_keys(policy, KeySet::builtin())
    }

    /// Build a registry, extending `base_keys` with the policy's own
    /// level definitions.
    pub fn with_keys(policy: &Policy, base_keys: KeySet) -> Result<Self> {
        let mut descriptors: BTreeMap<String, DatasetDescriptor> = BTreeMap::new();

        for (section, entries) in policy.sections() {
            for (name, mapping) in entries {
                if let Some(existing) = descriptors.get(name) {
                    return Err(PolicyError::DuplicateDatasetType {
                        name: name.clone(),
                        first_section: existing.section.to_string(),
                        second_section: section.to_string(),
                    });
                }
                descriptors.insert(
                    name.clone(),
                    DatasetDescriptor {
                        name: name.clone(),
                        section,
                        mapping: mapping.clone(),
                    },
                );
            }
        }

        Ok(Self {
            descriptors,
            levels: policy.levels.clone(),
            default_level: policy.default_level.clone(),
            default_sub_levels: policy.default_sub_levels.clone(),
            known_keys: base_keys.with_extra(policy.level_keys()),
        })
    }

    pub fn get(&self, name: &str) -> Option<&DatasetDescriptor> {
        self.descriptors.get(name)
    }

    pub fn get_required(&self, name: &str) -> Result<&DatasetDescriptor> {
        self.get(name).ok_or_else(|| PolicyError::UnknownDatasetType {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// All dataset type names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.keys().map(|name| name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.descriptors.values()
    }

    /// Descriptors belonging to one section, in name order.
    pub fn section(&self, section: Section) -> impl Iterator<Item = &DatasetDescriptor> {
        self.descriptors
            .values()
            .filter(move |descriptor| descriptor.section == section)
    }

    pub fn composites(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.descriptors
            .values()
            .filter(|descriptor| descriptor.mapping.is_composite())
    }

    /// Keys that partition the named level, if the policy defines it.
    pub fn level_keys(&self, level: &str) -> Option<&LevelKeys> {
        self.levels.get(level)
    }

    pub fn default_level(&self) -> Option<&str> {
        self.default_level.as_deref()
    }

    /// Default sub-level a level breaks down into.
    pub fn sub_level(&self, level: &str) -> Option<&str> {
        self.default_sub_levels.get(level).map(|sub| sub.as_str())
    }

    /// The substitution key set in force for this registry.
    pub fn known_keys(&self) -> &KeySet {
        &self.known_keys
    }

    /// Format the registry contents as a readable report.
    pub fn format_summary(&self) -> String {
        let mut output = String::new();

        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str("                   DATASET TYPE REGISTRY\n");
        output.push_str("═══════════════════════════════════════════════════════════════\n\n");

        for section in Section::all() {
            let members: Vec<&DatasetDescriptor> = self.section(section).collect();
            if members.is_empty() {
                continue;
            }

            output.push_str(&format!(
                "{}: ({})\n",
                section.as_str().to_uppercase(),
                members.len()
            ));
            output.push_str("───────────────────────────────────────────────────────────────\n");
            for descriptor in members {
                let python = descriptor.mapping.python.as_deref().unwrap_or("-");
                let form = if descriptor.mapping.is_composite() {
                    let slots = descriptor
                        .mapping
                        .composite
                        .as_ref()
                        .map(|components| components.len())
                        .unwrap_or(0);
                    format!("composite[{}]", slots)
                } else {
                    descriptor
                        .mapping
                        .storage
                        .as_ref()
                        .map(|storage| storage.tag().to_string())
                        .unwrap_or_else(|| "-".to_string())
                };
                output.push_str(&format!("  {:<24} {:<34} {}\n", descriptor.name, python, form));
            }
            output.push('\n');
        }

        if self.default_level.is_some()
            || !self.levels.is_empty()
            || !self.default_sub_levels.is_empty()
        {
            output.push_str("LEVELS:\n");
            output.push_str("───────────────────────────────────────────────────────────────\n");
            if let Some(level) = &self.default_level {
                output.push_str(&format!("  defaultLevel: {}\n", level));
            }
            for (name, keys) in &self.levels {
                let keys: Vec<&str> = keys.iter().collect();
                output.push_str(&format!("  {}: {}\n", name, keys.join(", ")));
            }
            for (level, sub) in &self.default_sub_levels {
                output.push_str(&format!("  {} breaks down by {}\n", level, sub));
            }
            output.push('\n');
        }

        output.push_str("═══════════════════════════════════════════════════════════════\n");

        output
    }
}
