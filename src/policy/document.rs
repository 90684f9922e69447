//! Policy document model
//!
//! Serde-backed representation of a mapping policy file. Parsing is
//! strictly structural here: unknown fields are rejected, values keep
//! their written form, and all cross-entry rules (name uniqueness,
//! composite references, template keys) are left to the verifier so a
//! single pass can report every problem at once.
//!
//! Sections and entries live in `BTreeMap`s, so serialization is
//! deterministic and a parse/serialize round trip preserves every key
//! and value.

use crate::policy::storage::Storage;
use crate::policy::template::Template;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The three dataset sections of a policy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Exposures,
    Calibrations,
    Datasets,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Exposures => "exposures",
            Section::Calibrations => "calibrations",
            Section::Datasets => "datasets",
        }
    }

    /// All sections in document order.
    pub fn all() -> [Section; 3] {
        [Section::Exposures, Section::Calibrations, Section::Datasets]
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A field that accepts either a single string or a list of strings.
///
/// Policy files write `tables: raw` and `tables: [raw, raw_visit]`
/// interchangeably; both forms survive a round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values = match self {
            OneOrMany::One(value) => std::slice::from_ref(value),
            OneOrMany::Many(values) => values.as_slice(),
        };
        values.iter().map(|s| s.as_str())
    }

    pub fn first(&self) -> Option<&str> {
        self.iter().next()
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::One(_) => 1,
            OneOrMany::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        OneOrMany::One(value.to_string())
    }
}

impl From<Vec<String>> for OneOrMany {
    fn from(values: Vec<String>) -> Self {
        OneOrMany::Many(values)
    }
}

/// Keys that address the sub-units of a level.
pub type LevelKeys = OneOrMany;

/// One component slot of a composite dataset type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompositeComponent {
    /// Name of the dataset type filling this slot.
    pub dataset_type: String,
    /// Component carries a subset of the named dataset rather than all of it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subset: Option<bool>,
    /// Component is consumed during assembly but not written back on disassembly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_only: Option<bool>,
}

/// One dataset type entry as written in a policy section.
///
/// Every field is optional at parse time. Which combinations are
/// required, forbidden, or suspicious is the verifier's business.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetMapping {
    /// Path template relative to the repository root, or the literal
    /// "ignored" for synthetic datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    /// Dotted import path of the in-memory type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<String>,
    /// Persistence framework type name, or "ignored".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,
    /// Level of the data hierarchy this dataset sits at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Registry tables consulted when completing data identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<OneOrMany>,
    /// Registry columns the template keys map onto.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<OneOrMany>,
    /// Dataset types consulted to resolve reference catalogs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<OneOrMany>,
    /// Dotted path of the callable that assembles this composite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembler: Option<String>,
    /// Dotted path of the callable that splits this composite back apart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disassembler: Option<String>,
    /// Component slots; presence marks the entry as a composite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composite: Option<BTreeMap<String, CompositeComponent>>,
}

impl DatasetMapping {
    pub fn is_composite(&self) -> bool {
        self.composite.is_some()
    }

    /// Dataset types referenced by this entry's component slots.
    pub fn component_types(&self) -> Vec<&str> {
        self.composite
            .iter()
            .flat_map(|components| components.values())
            .map(|component| component.dataset_type.as_str())
            .collect()
    }

    /// Template present and pointing at an actual file path.
    pub fn has_concrete_template(&self) -> bool {
        self.template
            .as_ref()
            .map(|t| !t.is_ignored())
            .unwrap_or(false)
    }
}

/// A complete mapping policy document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Policy {
    /// Path to the camera geometry description, relative to the policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    /// Whether resolving calibration datasets requires a calibration registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub need_calib_registry: Option<bool>,
    /// Level assumed when a lookup names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_level: Option<String>,
    /// Per-level default sub-level, e.g. visits default to breaking down by ccd.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_sub_levels: BTreeMap<String, String>,
    /// Named levels of the data hierarchy and the keys that partition them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub levels: BTreeMap<String, LevelKeys>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exposures: BTreeMap<String, DatasetMapping>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub calibrations: BTreeMap<String, DatasetMapping>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub datasets: BTreeMap<String, DatasetMapping>,
}

impl Policy {
    /// The three dataset sections in document order.
    pub fn sections(&self) -> [(Section, &BTreeMap<String, DatasetMapping>); 3] {
        [
            (Section::Exposures, &self.exposures),
            (Section::Calibrations, &self.calibrations),
            (Section::Datasets, &self.datasets),
        ]
    }

    /// Total number of dataset type entries across all sections.
    pub fn entry_count(&self) -> usize {
        self.exposures.len() + self.calibrations.len() + self.datasets.len()
    }

    /// Look up a dataset type by name, searching sections in document order.
    pub fn find(&self, name: &str) -> Option<(Section, &DatasetMapping)> {
        for (section, entries) in self.sections() {
            if let Some(mapping) = entries.get(name) {
                return Some((section, mapping));
            }
        }
        None
    }

    /// Substitution keys introduced by the levels section: the level
    /// names themselves plus every key that partitions them.
    pub fn level_keys(&self) -> Vec<&str> {
        let mut keys = Vec::new();
        for (name, partition) in &self.levels {
            keys.push(name.as_str());
            keys.extend(partition.iter());
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
camera: "camera/description.yaml"
needCalibRegistry: true
defaultLevel: visit
levels:
  skyTile:
    - visit
    - ccd
  tract: patch
defaultSubLevels:
  skyTile: ccd
exposures:
  raw:
    template: "raw/raw_v%(visit)d_f%(filter)s.fits.gz"
    python: obs.image.DecoratedImageU
    persistable: DecoratedImageU
    storage: FitsStorage
    level: Ccd
    tables: raw
    columns:
      - visit
calibrations:
  bias:
    template: "bias/bias.fits.gz"
    python: obs.image.ExposureF
    persistable: ExposureF
    storage: FitsStorage
    tables:
      - bias
datasets:
  ccdExposureId:
    template: ignored
    python: int
    persistable: ignored
    storage: ignored
  deepCoadd_calexp:
    composite:
      calexp:
        datasetType: raw
        inputOnly: true
      background:
        datasetType: bias
        subset: true
    assembler: obs.assemblers.exposure.assemble
    disassembler: obs.assemblers.exposure.disassemble
    python: obs.image.ExposureF
"#;

    #[test]
    fn test_parse_sample_policy() {
        let policy: Policy = serde_yaml::from_str(SAMPLE).unwrap();

        assert_eq!(policy.camera.as_deref(), Some("camera/description.yaml"));
        assert_eq!(policy.need_calib_registry, Some(true));
        assert_eq!(policy.default_level.as_deref(), Some("visit"));
        assert_eq!(policy.entry_count(), 4);

        let raw = &policy.exposures["raw"];
        assert_eq!(raw.storage, Some(Storage::Fits));
        assert_eq!(raw.level.as_deref(), Some("Ccd"));
        assert!(raw.has_concrete_template());
        assert!(!raw.is_composite());
    }

    #[test]
    fn test_one_or_many_forms() {
        let policy: Policy = serde_yaml::from_str(SAMPLE).unwrap();

        // Scalar form.
        let tables = policy.exposures["raw"].tables.as_ref().unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables.first(), Some("raw"));

        // List form.
        let tables = policy.calibrations["bias"].tables.as_ref().unwrap();
        assert_eq!(tables.iter().collect::<Vec<_>>(), vec!["bias"]);

        // Level partitions accept both.
        assert_eq!(policy.levels["tract"].first(), Some("patch"));
        assert_eq!(
            policy.levels["skyTile"].iter().collect::<Vec<_>>(),
            vec!["visit", "ccd"]
        );
    }

    #[test]
    fn test_composite_entry() {
        let policy: Policy = serde_yaml::from_str(SAMPLE).unwrap();
        let coadd = &policy.datasets["deepCoadd_calexp"];

        assert!(coadd.is_composite());
        let mut components = coadd.component_types();
        components.sort();
        assert_eq!(components, vec!["bias", "raw"]);

        let slots = coadd.composite.as_ref().unwrap();
        assert_eq!(slots["calexp"].input_only, Some(true));
        assert_eq!(slots["background"].subset, Some(true));
        assert!(coadd.assembler.is_some());
    }

    #[test]
    fn test_ignored_entry_has_no_concrete_template() {
        let policy: Policy = serde_yaml::from_str(SAMPLE).unwrap();
        let entry = &policy.datasets["ccdExposureId"];
        assert!(!entry.has_concrete_template());
        assert_eq!(entry.storage, Some(Storage::Ignored));
    }

    #[test]
    fn test_unknown_entry_field_rejected() {
        let source = r#"
datasets:
  calexp:
    template: "calexp/v%(visit)d.fits"
    compression: gzip
"#;
        let err = serde_yaml::from_str::<Policy>(source).unwrap_err();
        assert!(err.to_string().contains("compression"));
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let source = "cameraName: test\n";
        assert!(serde_yaml::from_str::<Policy>(source).is_err());
    }

    #[test]
    fn test_missing_sections_are_empty() {
        let policy: Policy = serde_yaml::from_str("defaultLevel: visit\n").unwrap();
        assert!(policy.exposures.is_empty());
        assert!(policy.calibrations.is_empty());
        assert!(policy.datasets.is_empty());
        assert_eq!(policy.entry_count(), 0);
    }

    #[test]
    fn test_round_trip_preserves_document() {
        let policy: Policy = serde_yaml::from_str(SAMPLE).unwrap();
        let serialized = serde_yaml::to_string(&policy).unwrap();
        let reparsed: Policy = serde_yaml::from_str(&serialized).unwrap();
        assert_eq!(policy, reparsed);
    }

    #[test]
    fn test_find_searches_sections_in_order() {
        let policy: Policy = serde_yaml::from_str(SAMPLE).unwrap();

        let (section, _) = policy.find("raw").unwrap();
        assert_eq!(section, Section::Exposures);
        let (section, _) = policy.find("bias").unwrap();
        assert_eq!(section, Section::Calibrations);
        let (section, _) = policy.find("ccdExposureId").unwrap();
        assert_eq!(section, Section::Datasets);
        assert!(policy.find("coaddTempExp").is_none());
    }

    #[test]
    fn test_level_keys() {
        let policy: Policy = serde_yaml::from_str(SAMPLE).unwrap();
        let mut keys = policy.level_keys();
        keys.sort();
        assert_eq!(keys, vec!["ccd", "patch", "skyTile", "tract", "visit"]);
    }
}
