//! Path template parsing and substitution
//!
//! Dataset types locate their files through printf-style path templates
//! ("raw/raw_v%(visit)d_f%(filter)s.fits.gz") whose placeholders are filled
//! from a data identifier at query time. This module parses templates into
//! segments, checks placeholder syntax, and substitutes values.
//!
//! Recognized placeholders: `%(key)` followed by optional flags (`-+0 #`),
//! width, precision, and one conversion out of `d i o x X s`. `%%` is a
//! literal percent sign. Anything else containing `%` is malformed.

use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Substitution keys every policy may use, with a short description.
///
/// These are the addressing keys of the test camera (one CCD, four
/// amplifiers, visit-numbered exposures) plus the sky-partitioning keys
/// used by coadd templates. Policies extend this set through their own
/// `levels` section and through configuration.
pub const BUILTIN_KEYS: &[(&str, &str)] = &[
    ("amp", "amplifier name within a CCD"),
    ("ccd", "CCD (detector) identifier"),
    ("filter", "filter band name"),
    ("patch", "sky patch within a tract, written \"x,y\""),
    ("skyTile", "sky tile identifier"),
    ("tract", "sky tract number"),
    ("visit", "exposure (visit) number"),
];

/// One value of a data identifier: integer or string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataIdValue {
    Int(i64),
    Str(String),
}

impl From<i64> for DataIdValue {
    fn from(v: i64) -> Self {
        DataIdValue::Int(v)
    }
}

impl From<&str> for DataIdValue {
    fn from(v: &str) -> Self {
        DataIdValue::Str(v.to_string())
    }
}

impl From<String> for DataIdValue {
    fn from(v: String) -> Self {
        DataIdValue::Str(v)
    }
}

impl fmt::Display for DataIdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataIdValue::Int(v) => write!(f, "{}", v),
            DataIdValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// A data identifier: the key/value pairs that address one dataset instance.
pub type DataId = BTreeMap<String, DataIdValue>;

/// A parsed placeholder: `%(key)flags width . precision conversion`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateField {
    pub key: String,
    pub flags: String,
    pub width: Option<usize>,
    pub precision: Option<usize>,
    pub conversion: char,
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    /// Literal text copied through unchanged.
    Literal(String),
    /// A placeholder substituted from the data identifier.
    Field(TemplateField),
}

/// A path template as written in the policy file.
///
/// The raw string round-trips through serde untouched; segments are parsed
/// on demand so that a malformed template surfaces as a validation issue
/// rather than a document parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(String);

impl Template {
    pub fn new(raw: impl Into<String>) -> Self {
        Template(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Synthetic dataset types mark their template as the literal "ignored".
    pub fn is_ignored(&self) -> bool {
        self.0 == "ignored"
    }

    /// Parse the template into literal and placeholder segments.
    pub fn segments(&self) -> Result<Vec<TemplateSegment>> {
        let field_re = regex::Regex::new(
            r"^%\((?P<key>[A-Za-z_][A-Za-z0-9_]*)\)(?P<flags>[-+0 #]*)(?P<width>\d+)?(?:\.(?P<precision>\d+))?(?P<conv>[dioxXs])",
        )
        .unwrap();

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = self.0.as_str();
        let mut offset = 0usize;

        while let Some(pos) = rest.find('%') {
            literal.push_str(&rest[..pos]);
            offset += pos;
            rest = &rest[pos..];

            if rest.starts_with("%%") {
                literal.push('%');
                rest = &rest[2..];
                offset += 2;
                continue;
            }

            if let Some(caps) = field_re.captures(rest) {
                if !literal.is_empty() {
                    segments.push(TemplateSegment::Literal(std::mem::take(&mut literal)));
                }

                let width = caps.name("width").and_then(|m| m.as_str().parse().ok());
                let precision = caps.name("precision").and_then(|m| m.as_str().parse().ok());
                segments.push(TemplateSegment::Field(TemplateField {
                    key: caps["key"].to_string(),
                    flags: caps["flags"].to_string(),
                    width,
                    precision,
                    conversion: caps["conv"].chars().next().unwrap(),
                }));

                let consumed = caps.get(0).unwrap().end();
                rest = &rest[consumed..];
                offset += consumed;
            } else if rest.starts_with("%(") {
                return Err(PolicyError::MalformedTemplate {
                    template: self.0.clone(),
                    cause: format!(
                        "invalid placeholder at byte {}: expected %(key) followed by optional flags/width/precision and one of 'dioxXs'",
                        offset
                    ),
                });
            } else {
                return Err(PolicyError::MalformedTemplate {
                    template: self.0.clone(),
                    cause: format!(
                        "stray '%' at byte {} (use '%%' for a literal percent)",
                        offset
                    ),
                });
            }
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(TemplateSegment::Literal(literal));
        }

        Ok(segments)
    }

    /// Placeholder keys in first-appearance order, without duplicates.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut seen = BTreeSet::new();
        let mut keys = Vec::new();
        for segment in self.segments()? {
            if let TemplateSegment::Field(field) = segment {
                if seen.insert(field.key.clone()) {
                    keys.push(field.key);
                }
            }
        }
        Ok(keys)
    }

    /// Placeholder keys that are not in the known substitution set.
    pub fn unknown_keys(&self, known: &KeySet) -> Result<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| !known.contains(k))
            .collect())
    }

    /// Substitute a data identifier into the template.
    pub fn render(&self, data_id: &DataId) -> Result<String> {
        let mut out = String::new();
        for segment in self.segments()? {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(&text),
                TemplateSegment::Field(field) => {
                    let value =
                        data_id
                            .get(&field.key)
                            .ok_or_else(|| PolicyError::RenderFailed {
                                template: self.0.clone(),
                                cause: format!("no value for key '{}'", field.key),
                            })?;
                    out.push_str(&self.format_field(&field, value)?);
                }
            }
        }
        Ok(out)
    }

    fn format_field(&self, field: &TemplateField, value: &DataIdValue) -> Result<String> {
        match field.conversion {
            's' => {
                let mut text = value.to_string();
                if let Some(prec) = field.precision {
                    text = text.chars().take(prec).collect();
                }
                Ok(pad_text(text, field))
            }
            'd' | 'i' | 'o' | 'x' | 'X' => {
                let number = match value {
                    DataIdValue::Int(v) => *v,
                    DataIdValue::Str(_) => {
                        return Err(PolicyError::RenderFailed {
                            template: self.0.clone(),
                            cause: format!(
                                "placeholder '%({}){}' requires an integer value, got a string",
                                field.key, field.conversion
                            ),
                        });
                    }
                };
                Ok(format_int(number, field))
            }
            other => Err(PolicyError::RenderFailed {
                template: self.0.clone(),
                cause: format!("unsupported conversion '{}'", other),
            }),
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Template {
    fn from(raw: &str) -> Self {
        Template::new(raw)
    }
}

/// Pad a string value to the field width (spaces only).
fn pad_text(text: String, field: &TemplateField) -> String {
    let width = match field.width {
        Some(w) if w > text.chars().count() => w,
        _ => return text,
    };
    let fill = " ".repeat(width - text.chars().count());
    if field.flags.contains('-') {
        format!("{}{}", text, fill)
    } else {
        format!("{}{}", fill, text)
    }
}

/// Format an integer honoring sign, radix prefix, precision, and width.
fn format_int(value: i64, field: &TemplateField) -> String {
    let magnitude = value.unsigned_abs();
    let mut digits = match field.conversion {
        'x' => format!("{:x}", magnitude),
        'X' => format!("{:X}", magnitude),
        'o' => format!("{:o}", magnitude),
        _ => magnitude.to_string(),
    };

    // Precision zero-pads the digits independently of the field width.
    if let Some(prec) = field.precision {
        while digits.len() < prec {
            digits.insert(0, '0');
        }
    }

    let prefix = if field.flags.contains('#') {
        match field.conversion {
            'x' => "0x",
            'X' => "0X",
            'o' => "0o",
            _ => "",
        }
    } else {
        ""
    };

    let sign = if value < 0 {
        "-"
    } else if field.flags.contains('+') {
        "+"
    } else if field.flags.contains(' ') {
        " "
    } else {
        ""
    };

    let used = sign.len() + prefix.len() + digits.len();
    let fill = match field.width {
        Some(w) if w > used => w - used,
        _ => 0,
    };

    if fill == 0 {
        format!("{}{}{}", sign, prefix, digits)
    } else if field.flags.contains('-') {
        format!("{}{}{}{}", sign, prefix, digits, " ".repeat(fill))
    } else if field.flags.contains('0') {
        // Zero fill sits between the sign/prefix and the digits.
        format!("{}{}{}{}", sign, prefix, "0".repeat(fill), digits)
    } else {
        format!("{}{}{}{}", " ".repeat(fill), sign, prefix, digits)
    }
}

/// The set of substitution keys templates are checked against.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: BTreeSet<String>,
}

impl KeySet {
    /// The built-in documented keys.
    pub fn builtin() -> Self {
        let keys = BUILTIN_KEYS
            .iter()
            .map(|(name, _)| name.to_string())
            .collect();
        Self { keys }
    }

    pub fn empty() -> Self {
        Self {
            keys: BTreeSet::new(),
        }
    }

    pub fn extend<I, S>(&mut self, extra: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for key in extra {
            self.keys.insert(key.into());
        }
    }

    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend(extra);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|k| k.as_str())
    }

    /// Format the key set as a readable table.
    pub fn format_table(&self) -> String {
        let mut output = String::new();

        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str("                 TEMPLATE SUBSTITUTION KEYS\n");
        output.push_str("═══════════════════════════════════════════════════════════════\n\n");

        output.push_str("BUILT-IN KEYS:\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        for (name, description) in BUILTIN_KEYS {
            if self.contains(name) {
                output.push_str(&format!("  {:<10} {}\n", name, description));
            }
        }

        let extra: Vec<&str> = self
            .iter()
            .filter(|k| !BUILTIN_KEYS.iter().any(|(name, _)| name == k))
            .collect();

        if !extra.is_empty() {
            output.push_str("\nADDITIONAL KEYS (from level definitions or configuration):\n");
            output.push_str("───────────────────────────────────────────────────────────────\n");
            for key in extra {
                output.push_str(&format!("  {}\n", key));
            }
        }

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");

        output
    }
}

impl Default for KeySet {
    fn default() -> Self {
        Self::builtin()
    }
}
