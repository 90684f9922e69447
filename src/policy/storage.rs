//! Storage format tags
//!
//! Every concrete dataset type names the on-disk format its files use.
//! The tag set is open: unrecognized tags parse into [`Storage::Other`]
//! and are flagged by validation as warnings rather than rejected, so a
//! policy written for a newer format catalogue still loads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// On-disk storage format of a dataset type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Storage {
    Boost,
    Config,
    Fits,
    FitsCatalog,
    Matplotlib,
    Paf,
    Parquet,
    Pickle,
    Text,
    Yaml,
    /// The literal "ignored": a synthetic dataset with no file behind it.
    Ignored,
    /// A tag outside the known catalogue, preserved verbatim.
    Other(String),
}

/// Known storage tags with a short description of the backing format.
pub const KNOWN_STORAGES: &[(&str, &str)] = &[
    ("BoostStorage", "Boost-serialized binary archive"),
    ("ConfigStorage", "task configuration file"),
    ("FitsCatalogStorage", "FITS binary table catalog"),
    ("FitsStorage", "FITS image file"),
    ("MatplotlibStorage", "rendered plot image"),
    ("PafStorage", "PAF policy file"),
    ("ParquetStorage", "Parquet column store"),
    ("PickleStorage", "Python pickle file"),
    ("TextStorage", "plain text file"),
    ("YamlStorage", "YAML document"),
    ("ignored", "no file; value synthesized at runtime"),
];

impl Storage {
    /// The tag as written in policy files.
    pub fn tag(&self) -> &str {
        match self {
            Storage::Boost => "BoostStorage",
            Storage::Config => "ConfigStorage",
            Storage::Fits => "FitsStorage",
            Storage::FitsCatalog => "FitsCatalogStorage",
            Storage::Matplotlib => "MatplotlibStorage",
            Storage::Paf => "PafStorage",
            Storage::Parquet => "ParquetStorage",
            Storage::Pickle => "PickleStorage",
            Storage::Text => "TextStorage",
            Storage::Yaml => "YamlStorage",
            Storage::Ignored => "ignored",
            Storage::Other(tag) => tag,
        }
    }

    /// Whether the tag belongs to the known catalogue.
    pub fn is_known(&self) -> bool {
        !matches!(self, Storage::Other(_))
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Storage::Ignored)
    }

    /// All known tags in catalogue order.
    pub fn known_tags() -> Vec<&'static str> {
        KNOWN_STORAGES.iter().map(|(tag, _)| *tag).collect()
    }

    /// Format the storage catalogue as a readable table.
    pub fn format_table() -> String {
        let mut output = String::new();

        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str("                   STORAGE FORMAT CATALOGUE\n");
        output.push_str("═══════════════════════════════════════════════════════════════\n\n");

        for (tag, description) in KNOWN_STORAGES {
            output.push_str(&format!("  {:<20} {}\n", tag, description));
        }

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");

        output
    }
}

impl From<String> for Storage {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "BoostStorage" => Storage::Boost,
            "ConfigStorage" => Storage::Config,
            "FitsStorage" => Storage::Fits,
            "FitsCatalogStorage" => Storage::FitsCatalog,
            "MatplotlibStorage" => Storage::Matplotlib,
            "PafStorage" => Storage::Paf,
            "ParquetStorage" => Storage::Parquet,
            "PickleStorage" => Storage::Pickle,
            "TextStorage" => Storage::Text,
            "YamlStorage" => Storage::Yaml,
            "ignored" => Storage::Ignored,
            _ => Storage::Other(tag),
        }
    }
}

impl From<Storage> for String {
    fn from(storage: Storage) -> Self {
        storage.tag().to_string()
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags_round_trip() {
        for tag in Storage::known_tags() {
            let storage = Storage::from(tag.to_string());
            assert!(storage.is_known(), "tag {} should be known", tag);
            assert_eq!(storage.tag(), tag);
        }
    }

    #[test]
    fn test_unknown_tag_preserved() {
        let storage = Storage::from("HdfStorage".to_string());
        assert!(!storage.is_known());
        assert_eq!(storage.tag(), "HdfStorage");
        assert_eq!(String::from(storage), "HdfStorage");
    }

    #[test]
    fn test_ignored_tag() {
        let storage = Storage::from("ignored".to_string());
        assert!(storage.is_ignored());
        assert!(storage.is_known());
    }

    #[test]
    fn test_serde_as_plain_string() {
        let storage: Storage = serde_yaml::from_str("FitsStorage").unwrap();
        assert_eq!(storage, Storage::Fits);

        let text = serde_yaml::to_string(&Storage::FitsCatalog).unwrap();
        assert_eq!(text.trim(), "FitsCatalogStorage");
    }

    #[test]
    fn test_format_table_lists_catalogue() {
        let table = Storage::format_table();
        assert!(table.contains("STORAGE FORMAT CATALOGUE"));
        assert!(table.contains("FitsStorage"));
        assert!(table.contains("Python pickle file"));
    }
}
