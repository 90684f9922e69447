//! Policy verifier
//!
//! After parsing, verifies that a policy document is internally
//! consistent: dataset type names unique across sections, required
//! fields present, templates well formed and using known substitution
//! keys, composite references resolvable and acyclic, level names
//! defined.
//!
//! If verification fails, loading should reject the policy and return
//! a detailed error log explaining what does not hold. Warnings do not
//! fail a load unless strict mode promotes them.

use crate::error::PolicyError;
use crate::policy::composite::{ComponentReference, CompositeAnalyzer};
use crate::policy::document::{Policy, Section};
use crate::policy::template::KeySet;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Levels the camera hierarchy provides without the policy naming them.
const CAMERA_LEVELS: &[&str] = &["amp", "ccd", "visit"];

/// Result of policy validation
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub strict: bool,
    pub names: NameValidation,
    pub fields: FieldValidation,
    pub templates: TemplateValidation,
    pub storages: StorageValidation,
    pub composites: CompositeValidation,
    pub levels: LevelValidation,
}

impl ValidationReport {
    pub fn new(strict: bool) -> Self {
        Self {
            passed: true,
            strict,
            names: NameValidation::default(),
            fields: FieldValidation::default(),
            templates: TemplateValidation::default(),
            storages: StorageValidation::default(),
            composites: CompositeValidation::default(),
            levels: LevelValidation::default(),
        }
    }

    /// Findings that always reject the policy.
    pub fn error_count(&self) -> usize {
        self.names.duplicates.len()
            + self.fields.missing.len()
            + self.fields.empty_composites.len()
            + self.fields.misplaced.len()
            + self.templates.malformed.len()
            + self.composites.undefined.len()
            + self.composites.cycles.len()
    }

    /// Findings that reject the policy only in strict mode.
    pub fn warning_count(&self) -> usize {
        self.templates.unknown_keys.len()
            + self.storages.unknown.len()
            + self.fields.table_overlaps.len()
            + self.levels.unknown.len()
    }

    /// Generate a human-readable error log
    pub fn error_log(&self) -> String {
        let mut log = String::new();

        log.push_str("═══════════════════════════════════════════════════════════════\n");
        log.push_str("               POLICY VALIDATION FAILED\n");
        log.push_str("═══════════════════════════════════════════════════════════════\n\n");

        if !self.names.duplicates.is_empty() {
            log.push_str("DUPLICATE DATASET TYPES:\n");
            for duplicate in &self.names.duplicates {
                log.push_str(&format!(
                    "  - {}: defined in {} and {}\n",
                    duplicate.name, duplicate.first_section, duplicate.second_section
                ));
            }
            log.push('\n');
        }

        if !self.fields.missing.is_empty() {
            log.push_str("MISSING REQUIRED FIELDS:\n");
            for missing in &self.fields.missing {
                log.push_str(&format!(
                    "  - {}.{}: missing {}\n",
                    missing.section, missing.name, missing.field
                ));
            }
            log.push('\n');
        }

        if !self.fields.empty_composites.is_empty() {
            log.push_str("EMPTY COMPOSITES:\n");
            for empty in &self.fields.empty_composites {
                log.push_str(&format!(
                    "  - {}.{}: composite has no components\n",
                    empty.section, empty.name
                ));
            }
            log.push('\n');
        }

        if !self.fields.misplaced.is_empty() {
            log.push_str("MISPLACED FIELDS:\n");
            for misplaced in &self.fields.misplaced {
                log.push_str(&format!(
                    "  - {}.{}: {} on a non-composite entry\n",
                    misplaced.section, misplaced.name, misplaced.field
                ));
            }
            log.push('\n');
        }

        if !self.templates.malformed.is_empty() {
            log.push_str("MALFORMED TEMPLATES:\n");
            for malformed in &self.templates.malformed {
                log.push_str(&format!(
                    "  - {}.{}: {}\n",
                    malformed.section, malformed.name, malformed.issue
                ));
            }
            log.push('\n');
        }

        if !self.composites.undefined.is_empty() {
            log.push_str("UNDEFINED COMPONENT REFERENCES:\n");
            for reference in &self.composites.undefined {
                log.push_str(&format!(
                    "  - {}.{}: no dataset type named '{}'\n",
                    reference.composite, reference.component, reference.dataset_type
                ));
            }
            log.push('\n');
        }

        if !self.composites.cycles.is_empty() {
            log.push_str("CIRCULAR COMPOSITE REFERENCES:\n");
            for cycle in &self.composites.cycles {
                log.push_str(&format!("  - {}\n", cycle.join(" -> ")));
            }
            log.push('\n');
        }

        self.push_warnings(&mut log);

        log.push_str("═══════════════════════════════════════════════════════════════\n");
        log.push_str("ACTION REQUIRED: Fix the policy file and reload\n");
        log.push_str("═══════════════════════════════════════════════════════════════\n");

        log
    }

    /// Render only the warning findings, without header or footer.
    pub fn warning_log(&self) -> String {
        let mut log = String::new();
        self.push_warnings(&mut log);
        log
    }

    fn push_warnings(&self, log: &mut String) {
        if !self.templates.unknown_keys.is_empty() {
            log.push_str("UNKNOWN TEMPLATE KEYS (warning):\n");
            for unknown in &self.templates.unknown_keys {
                log.push_str(&format!(
                    "  - {}.{}: key '{}' is not a known substitution key\n",
                    unknown.section, unknown.name, unknown.key
                ));
            }
            log.push('\n');
        }

        if !self.storages.unknown.is_empty() {
            log.push_str("UNKNOWN STORAGE TAGS (warning):\n");
            for unknown in &self.storages.unknown {
                log.push_str(&format!(
                    "  - {}.{}: '{}' is not in the storage catalogue\n",
                    unknown.section, unknown.name, unknown.tag
                ));
            }
            log.push('\n');
        }

        if !self.fields.table_overlaps.is_empty() {
            log.push_str("TABLE FIELD OVERLAPS (warning):\n");
            for overlap in &self.fields.table_overlaps {
                log.push_str(&format!(
                    "  - {}.{}: both 'table' and 'tables' present\n",
                    overlap.section, overlap.name
                ));
            }
            log.push('\n');
        }

        if !self.levels.unknown.is_empty() {
            log.push_str("UNKNOWN LEVELS (warning):\n");
            for unknown in &self.levels.unknown {
                log.push_str(&format!(
                    "  - {}: no level named '{}'\n",
                    unknown.context, unknown.level
                ));
            }
            log.push('\n');
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NameValidation {
    pub duplicates: Vec<DuplicateName>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateName {
    pub name: String,
    pub first_section: Section,
    pub second_section: Section,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FieldValidation {
    pub missing: Vec<MissingField>,
    pub empty_composites: Vec<EmptyComposite>,
    pub misplaced: Vec<MisplacedField>,
    pub table_overlaps: Vec<TableOverlap>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingField {
    pub section: Section,
    pub name: String,
    pub field: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmptyComposite {
    pub section: Section,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MisplacedField {
    pub section: Section,
    pub name: String,
    pub field: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableOverlap {
    pub section: Section,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateValidation {
    pub malformed: Vec<MalformedTemplateUse>,
    pub unknown_keys: Vec<UnknownTemplateKey>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MalformedTemplateUse {
    pub section: Section,
    pub name: String,
    pub template: String,
    pub issue: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnknownTemplateKey {
    pub section: Section,
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageValidation {
    pub unknown: Vec<UnknownStorageTag>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnknownStorageTag {
    pub section: Section,
    pub name: String,
    pub tag: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompositeValidation {
    pub undefined: Vec<ComponentReference>,
    pub cycles: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LevelValidation {
    pub unknown: Vec<UnknownLevel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnknownLevel {
    pub context: String,
    pub level: String,
}

/// Policy verifier for post-parse checks
pub struct PolicyVerifier {
    key_set: KeySet,
    analyzer: CompositeAnalyzer,
    strict: bool,
}

impl PolicyVerifier {
    pub fn new() -> Self {
        Self::with_keys(KeySet::builtin())
    }

    /// Verify against a custom substitution key set.
    pub fn with_keys(key_set: KeySet) -> Self {
        Self {
            key_set,
            analyzer: CompositeAnalyzer::new(),
            strict: false,
        }
    }

    /// Promote warnings to rejection.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Verify all aspects of a parsed policy
    pub fn verify(&self, policy: &Policy) -> ValidationReport {
        let mut report = ValidationReport::new(self.strict);

        // 1. Name uniqueness across sections
        debug!("Checking dataset type name uniqueness");
        report.names = self.check_names(policy);

        // 2. Per-entry field rules
        debug!("Checking entry fields");
        report.fields = self.check_fields(policy);

        // 3. Template syntax and substitution keys
        debug!("Checking templates");
        report.templates = self.check_templates(policy);

        // 4. Storage tags
        debug!("Checking storage tags");
        report.storages = self.check_storages(policy);

        // 5. Composite references
        debug!("Checking composite references");
        report.composites = self.check_composites(policy);

        // 6. Level names
        debug!("Checking level names");
        report.levels = self.check_levels(policy);

        report.passed =
            report.error_count() == 0 && (!self.strict || report.warning_count() == 0);

        if report.passed {
            info!(
                "Policy validation PASSED ({} dataset types, {} warning(s))",
                policy.entry_count(),
                report.warning_count()
            );
        } else {
            warn!(
                "Policy validation FAILED: {} error(s), {} warning(s)",
                report.error_count(),
                report.warning_count()
            );
        }

        report
    }

    /// A dataset type name may appear in only one section.
    fn check_names(&self, policy: &Policy) -> NameValidation {
        let mut validation = NameValidation::default();
        let sections = policy.sections();

        for i in 1..sections.len() {
            let (second_section, entries) = sections[i];
            for name in entries.keys() {
                for (first_section, earlier) in sections.iter().take(i) {
                    if earlier.contains_key(name) {
                        validation.duplicates.push(DuplicateName {
                            name: name.clone(),
                            first_section: *first_section,
                            second_section,
                        });
                    }
                }
            }
        }

        validation
    }

    /// Concrete entries need template/python/persistable/storage;
    /// composites need python and at least one component, and only
    /// composites may carry assembler/disassembler.
    fn check_fields(&self, policy: &Policy) -> FieldValidation {
        let mut validation = FieldValidation::default();

        for (section, entries) in policy.sections() {
            for (name, mapping) in entries {
                if let Some(components) = &mapping.composite {
                    if components.is_empty() {
                        validation.empty_composites.push(EmptyComposite {
                            section,
                            name: name.clone(),
                        });
                    }
                    if mapping.python.is_none() {
                        validation.missing.push(MissingField {
                            section,
                            name: name.clone(),
                            field: "python".to_string(),
                        });
                    }
                } else {
                    for (field, present) in [
                        ("template", mapping.template.is_some()),
                        ("python", mapping.python.is_some()),
                        ("persistable", mapping.persistable.is_some()),
                        ("storage", mapping.storage.is_some()),
                    ] {
                        if !present {
                            validation.missing.push(MissingField {
                                section,
                                name: name.clone(),
                                field: field.to_string(),
                            });
                        }
                    }
                    if mapping.assembler.is_some() {
                        validation.misplaced.push(MisplacedField {
                            section,
                            name: name.clone(),
                            field: "assembler".to_string(),
                        });
                    }
                    if mapping.disassembler.is_some() {
                        validation.misplaced.push(MisplacedField {
                            section,
                            name: name.clone(),
                            field: "disassembler".to_string(),
                        });
                    }
                }

                if mapping.table.is_some() && mapping.tables.is_some() {
                    validation.table_overlaps.push(TableOverlap {
                        section,
                        name: name.clone(),
                    });
                }
            }
        }

        validation
    }

    /// Parse every concrete template and check its keys against the
    /// known set extended by the policy's own level definitions.
    fn check_templates(&self, policy: &Policy) -> TemplateValidation {
        let mut validation = TemplateValidation::default();
        let known = self.key_set.clone().with_extra(policy.level_keys());

        for (section, entries) in policy.sections() {
            for (name, mapping) in entries {
                let template = match &mapping.template {
                    Some(template) if !template.is_ignored() => template,
                    _ => continue,
                };

                match template.unknown_keys(&known) {
                    Ok(unknown) => {
                        for key in unknown {
                            validation.unknown_keys.push(UnknownTemplateKey {
                                section,
                                name: name.clone(),
                                key,
                            });
                        }
                    }
                    Err(PolicyError::MalformedTemplate { cause, .. }) => {
                        validation.malformed.push(MalformedTemplateUse {
                            section,
                            name: name.clone(),
                            template: template.as_str().to_string(),
                            issue: cause,
                        });
                    }
                    Err(other) => {
                        validation.malformed.push(MalformedTemplateUse {
                            section,
                            name: name.clone(),
                            template: template.as_str().to_string(),
                            issue: other.to_string(),
                        });
                    }
                }
            }
        }

        validation
    }

    fn check_storages(&self, policy: &Policy) -> StorageValidation {
        let mut validation = StorageValidation::default();

        for (section, entries) in policy.sections() {
            for (name, mapping) in entries {
                if let Some(storage) = &mapping.storage {
                    if !storage.is_known() {
                        validation.unknown.push(UnknownStorageTag {
                            section,
                            name: name.clone(),
                            tag: storage.tag().to_string(),
                        });
                    }
                }
            }
        }

        validation
    }

    fn check_composites(&self, policy: &Policy) -> CompositeValidation {
        let analysis = self.analyzer.analyze(policy);
        CompositeValidation {
            undefined: analysis.undefined_references,
            cycles: analysis.circular_references,
        }
    }

    /// Level names referenced by defaults must come from the levels
    /// section or from the camera hierarchy itself.
    fn check_levels(&self, policy: &Policy) -> LevelValidation {
        let mut validation = LevelValidation::default();
        let known =
            |level: &str| policy.levels.contains_key(level) || CAMERA_LEVELS.contains(&level);

        if let Some(level) = &policy.default_level {
            if !known(level) {
                validation.unknown.push(UnknownLevel {
                    context: "defaultLevel".to_string(),
                    level: level.clone(),
                });
            }
        }

        for (level, sub_level) in &policy.default_sub_levels {
            if !known(level) {
                validation.unknown.push(UnknownLevel {
                    context: format!("defaultSubLevels.{}", level),
                    level: level.clone(),
                });
            }
            if !known(sub_level) {
                validation.unknown.push(UnknownLevel {
                    context: format!("defaultSubLevels.{}", level),
                    level: sub_level.clone(),
                });
            }
        }

        validation
    }
}

impl Default for PolicyVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verify(source: &str) -> ValidationReport {
        PolicyVerifier::new().verify(&serde_yaml::from_str(source).unwrap())
    }

    fn verify_strict(source: &str) -> ValidationReport {
        PolicyVerifier::new()
            .with_strict(true)
            .verify(&serde_yaml::from_str(source).unwrap())
    }

    const VALID: &str = r#"
defaultLevel: visit
defaultSubLevels:
  visit: ccd
exposures:
  raw:
    template: "raw/raw_v%(visit)d_f%(filter)s.fits.gz"
    python: obs.image.DecoratedImageU
    persistable: DecoratedImageU
    storage: FitsStorage
datasets:
  srcMatch:
    template: "srcMatch/v%(visit)d.fits"
    python: obs.table.BaseCatalog
    persistable: BaseCatalog
    storage: FitsCatalogStorage
"#;

    #[test]
    fn test_valid_policy_passes() {
        let report = verify(VALID);
        assert!(report.passed);
        assert_eq!(report.error_count(), 0);
        assert_eq!(report.warning_count(), 0);
    }

    #[test]
    fn test_duplicate_name_across_sections() {
        let source = r#"
exposures:
  raw:
    template: "raw/v%(visit)d.fits"
    python: obs.image.DecoratedImageU
    persistable: DecoratedImageU
    storage: FitsStorage
datasets:
  raw:
    template: "other/v%(visit)d.fits"
    python: obs.image.ExposureF
    persistable: ExposureF
    storage: FitsStorage
"#;
        let report = verify(source);
        assert!(!report.passed);
        assert_eq!(report.names.duplicates.len(), 1);
        let duplicate = &report.names.duplicates[0];
        assert_eq!(duplicate.name, "raw");
        assert_eq!(duplicate.first_section, Section::Exposures);
        assert_eq!(duplicate.second_section, Section::Datasets);
    }

    #[test]
    fn test_missing_required_fields() {
        let source = r#"
datasets:
  calexpBackground:
    template: "calexp/v%(visit)d_bkgd.fits"
"#;
        let report = verify(source);
        assert!(!report.passed);
        let missing: Vec<&str> = report
            .fields
            .missing
            .iter()
            .map(|m| m.field.as_str())
            .collect();
        assert_eq!(missing, vec!["python", "persistable", "storage"]);
    }

    #[test]
    fn test_ignored_literals_satisfy_required_fields() {
        let source = r#"
datasets:
  ccdExposureId:
    template: ignored
    python: int
    persistable: ignored
    storage: ignored
"#;
        let report = verify(source);
        assert!(report.passed, "log:\n{}", report.error_log());
    }

    #[test]
    fn test_composite_field_rules() {
        let source = r#"
datasets:
  base:
    template: "base/v%(visit)d.fits"
    python: obs.image.ExposureF
    persistable: ExposureF
    storage: FitsStorage
  emptied:
    python: obs.image.ExposureF
    composite: {}
  unnamed:
    composite:
      image:
        datasetType: base
"#;
        let report = verify(source);
        assert!(!report.passed);
        assert_eq!(report.fields.empty_composites.len(), 1);
        assert_eq!(report.fields.empty_composites[0].name, "emptied");
        // Composites still require python.
        assert!(report
            .fields
            .missing
            .iter()
            .any(|m| m.name == "unnamed" && m.field == "python"));
    }

    #[test]
    fn test_assembler_without_composite_is_misplaced() {
        let source = r#"
datasets:
  calexp:
    template: "calexp/v%(visit)d.fits"
    python: obs.image.ExposureF
    persistable: ExposureF
    storage: FitsStorage
    assembler: obs.assemblers.exposure.assemble
"#;
        let report = verify(source);
        assert!(!report.passed);
        assert_eq!(report.fields.misplaced.len(), 1);
        assert_eq!(report.fields.misplaced[0].field, "assembler");
    }

    #[test]
    fn test_undefined_component_is_error() {
        let source = r#"
datasets:
  stack:
    python: obs.image.ExposureF
    composite:
      image:
        datasetType: coaddTempExp
"#;
        let report = verify(source);
        assert!(!report.passed);
        assert_eq!(report.composites.undefined.len(), 1);
        assert_eq!(report.composites.undefined[0].dataset_type, "coaddTempExp");
    }

    #[test]
    fn test_composite_cycle_is_error() {
        let source = r#"
datasets:
  alpha:
    python: obs.image.ExposureF
    composite:
      other:
        datasetType: beta
  beta:
    python: obs.image.ExposureF
    composite:
      other:
        datasetType: alpha
"#;
        let report = verify(source);
        assert!(!report.passed);
        assert_eq!(report.composites.cycles.len(), 1);
    }

    #[test]
    fn test_malformed_template_is_error() {
        let source = r#"
datasets:
  qa:
    template: "qa/complete_50%.txt"
    python: str
    persistable: ignored
    storage: TextStorage
"#;
        let report = verify(source);
        assert!(!report.passed);
        assert_eq!(report.templates.malformed.len(), 1);
        assert!(report.templates.malformed[0].issue.contains("stray '%'"));
    }

    #[test]
    fn test_unknown_template_key_is_warning() {
        let source = r#"
datasets:
  spectrum:
    template: "spectra/%(arm)s_v%(visit)d.fits"
    python: obs.image.ExposureF
    persistable: ExposureF
    storage: FitsStorage
"#;
        let report = verify(source);
        assert!(report.passed);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.templates.unknown_keys[0].key, "arm");

        // Strict mode promotes the warning to rejection.
        let report = verify_strict(source);
        assert!(!report.passed);
    }

    #[test]
    fn test_level_definitions_extend_key_set() {
        let source = r#"
levels:
  spectrograph: arm
datasets:
  spectrum:
    template: "spectra/%(arm)s_v%(visit)d.fits"
    python: obs.image.ExposureF
    persistable: ExposureF
    storage: FitsStorage
"#;
        let report = verify(source);
        assert!(report.passed);
        assert_eq!(report.warning_count(), 0);
    }

    #[test]
    fn test_unknown_storage_is_warning() {
        let source = r#"
datasets:
  catalog:
    template: "cat/v%(visit)d.hdf"
    python: obs.table.BaseCatalog
    persistable: BaseCatalog
    storage: HdfStorage
"#;
        let report = verify(source);
        assert!(report.passed);
        assert_eq!(report.storages.unknown.len(), 1);
        assert_eq!(report.storages.unknown[0].tag, "HdfStorage");
    }

    #[test]
    fn test_table_overlap_is_warning() {
        let source = r#"
datasets:
  refcat:
    template: "ref/%(tract)d.fits"
    python: obs.table.SimpleCatalog
    persistable: SimpleCatalog
    storage: FitsCatalogStorage
    table: refcat
    tables: refcat
"#;
        let report = verify(source);
        assert!(report.passed);
        assert_eq!(report.fields.table_overlaps.len(), 1);
    }

    #[test]
    fn test_unknown_level_is_warning() {
        let source = r#"
defaultLevel: pointing
"#;
        let report = verify(source);
        assert!(report.passed);
        assert_eq!(report.levels.unknown.len(), 1);
        assert_eq!(report.levels.unknown[0].level, "pointing");

        // Camera hierarchy levels need no declaration.
        let report = verify("defaultLevel: visit\n");
        assert_eq!(report.levels.unknown.len(), 0);

        // Levels declared by the policy count too.
        let report = verify("defaultLevel: skyTile\nlevels:\n  skyTile:\n    - visit\n    - ccd\n");
        assert_eq!(report.levels.unknown.len(), 0);
    }

    #[test]
    fn test_error_log_contents() {
        let source = r#"
datasets:
  broken:
    template: "50%_done.txt"
  stack:
    python: obs.image.ExposureF
    composite:
      image:
        datasetType: coaddTempExp
"#;
        let report = verify(source);
        assert!(!report.passed);

        let log = report.error_log();
        assert!(log.contains("POLICY VALIDATION FAILED"));
        assert!(log.contains("MISSING REQUIRED FIELDS:"));
        assert!(log.contains("MALFORMED TEMPLATES:"));
        assert!(log.contains("UNDEFINED COMPONENT REFERENCES:"));
        assert!(log.contains("ACTION REQUIRED"));
    }

    #[test]
    fn test_warning_log_lists_only_warnings() {
        let source = r#"
datasets:
  catalog:
    template: "cat/v%(visit)d.hdf"
    python: obs.table.BaseCatalog
    persistable: BaseCatalog
    storage: HdfStorage
"#;
        let report = verify(source);
        let log = report.warning_log();
        assert!(log.contains("UNKNOWN STORAGE TAGS"));
        assert!(!log.contains("POLICY VALIDATION FAILED"));
    }
}
