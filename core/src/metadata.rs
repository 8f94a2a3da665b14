//! Canonical metadata records and the mapping-driven transformation.
//!
//! Raw per-exposure header metadata arrives as an ordered key-value record
//! in instrument-specific vocabulary. [`transform`] rewrites it into the
//! canonical vocabulary using a data-type mapping document, then applies the
//! configured post-processing rules. [`validate`] checks field presence
//! against the run's requirements document.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Ordered key-value metadata record.
pub type Metadata = serde_json::Map<String, Value>;

/// Canonical field names shared across the run.
pub mod fields {
    pub const VISIT_ID: &str = "visitId";
    pub const EXPOSURE_ID: &str = "exposureId";
    pub const DATASET_ID: &str = "datasetId";
    pub const FILTER: &str = "filter";
    pub const EXP_TIME: &str = "expTime";
    pub const RA: &str = "ra";
    pub const DECL: &str = "decl";
    pub const EQUINOX: &str = "equinox";
    pub const AIRMASS: &str = "airmass";
    pub const DATE_OBS: &str = "dateObs";
    pub const CCD_ID: &str = "ccdId";
    pub const AMP_ID: &str = "ampId";
    pub const FPA_EXPOSURE_ID: &str = "fpaExposureId";
    pub const CCD_EXPOSURE_ID: &str = "ccdExposureId";
    pub const AMP_EXPOSURE_ID: &str = "ampExposureId";
}

/// Default suffix for mapping lookups: `<canonical name>Keyword`.
pub const DEFAULT_MAPPING_SUFFIX: &str = "Keyword";

/// Suffix appended to a consumed source keyword when it is archived.
pub const ORIGINAL_SUFFIX: &str = "_original";

/// Errors raised by metadata validation.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A field required by the metadata requirements document is absent.
    #[error("Unable to find '{0}' in metadata")]
    MissingField(String),
}

/// Static mapping from canonical field name to source header keyword.
///
/// Entries are keyed by `<canonical name><suffix>` (e.g. `datasetIdKeyword`),
/// matching the data-type mapping document. Loaded once per run and shared
/// read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping {
    entries: BTreeMap<String, String>,
}

impl FieldMapping {
    /// Returns the source keyword mapped to `canonical` under `suffix`.
    ///
    /// Lookup keys match case-insensitively as a fallback; some
    /// configuration loaders normalize document keys to lowercase.
    pub fn source_keyword(&self, canonical: &str, suffix: &str) -> Option<&str> {
        let key = format!("{canonical}{suffix}");
        if let Some(keyword) = self.entries.get(&key) {
            return Some(keyword);
        }
        self.entries
            .iter()
            .find(|(entry, _)| entry.eq_ignore_ascii_case(&key))
            .map(|(_, keyword)| keyword.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        FieldMapping {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Transforms raw header metadata into canonical form, in place.
///
/// For each required canonical name not already present, the mapped source
/// keyword is read: string values are trimmed (and a `datasetId` with an
/// embedded space is truncated at the first space, tolerating multi-word
/// fields in legacy headers), other values are copied as-is. A missing
/// source keyword is skipped silently; completeness is [`validate`]'s job.
///
/// Every keyword consumed by the mapping pass is then archived under
/// `<keyword>_original` and removed, preserving provenance without leaving
/// duplicate raw/canonical fields for downstream consumers. The archive
/// applies per field to the exact keyword just consumed.
///
/// Finally the ordered `rules` run over the record.
pub fn transform(
    metadata: &mut Metadata,
    required_fields: &[String],
    mapping: &FieldMapping,
    rules: &crate::rules::RuleSet,
    suffix: &str,
) -> Result<(), crate::rules::Error> {
    let mut consumed: Vec<String> = Vec::new();

    for name in required_fields {
        // If it already exists don't try and update it.
        if metadata.contains_key(name) {
            continue;
        }
        let Some(keyword) = mapping.source_keyword(name, suffix) else {
            continue;
        };
        let Some(value) = metadata.get(keyword).cloned() else {
            continue;
        };

        let value = match value {
            Value::String(raw) => {
                let mut trimmed = raw.trim().to_string();
                if name == fields::DATASET_ID {
                    if let Some(space) = trimmed.find(' ') {
                        if space > 0 {
                            trimmed.truncate(space);
                        }
                    }
                }
                Value::String(trimmed)
            }
            other => other,
        };

        metadata.insert(name.clone(), value);
        consumed.push(keyword.to_string());
    }

    for keyword in &consumed {
        if let Some(value) = metadata.remove(keyword) {
            metadata.insert(format!("{keyword}{ORIGINAL_SUFFIX}"), value);
        }
    }

    rules.apply(metadata)
}

/// Checks that every required canonical field is present.
///
/// Presence-only: type checking is deferred to downstream consumers. The
/// error names the first missing field; callers treat the failure as fatal
/// for the file at hand and continue the run.
pub fn validate(metadata: &Metadata, required_fields: &[String]) -> Result<(), Error> {
    for name in required_fields {
        if !metadata.contains_key(name) {
            return Err(Error::MissingField(name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleSet;
    use serde_json::json;

    fn required(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn cfht_mapping() -> FieldMapping {
        [
            ("datasetIdKeyword", "OBJECT"),
            ("filterKeyword", "FILTER"),
            ("expTimeKeyword", "EXPTIME"),
            ("dateObsKeyword", "DATE-OBS"),
        ]
        .into_iter()
        .collect::<FieldMapping>()
    }

    #[test]
    fn test_maps_and_trims_string_values() {
        let mut metadata = Metadata::new();
        metadata.insert("FILTER".to_string(), json!("  r.MP9601  "));
        metadata.insert("EXPTIME".to_string(), json!(15.0));

        transform(
            &mut metadata,
            &required(&["filter", "expTime"]),
            &cfht_mapping(),
            &RuleSet::default(),
            DEFAULT_MAPPING_SUFFIX,
        )
        .unwrap();

        assert_eq!(metadata.get("filter"), Some(&json!("r.MP9601")));
        assert_eq!(metadata.get("expTime"), Some(&json!(15.0)));
    }

    #[test]
    fn test_dataset_id_truncated_at_embedded_space() {
        let mut metadata = Metadata::new();
        metadata.insert("OBJECT".to_string(), json!("ABC123 extra text"));

        transform(
            &mut metadata,
            &required(&["datasetId"]),
            &cfht_mapping(),
            &RuleSet::default(),
            DEFAULT_MAPPING_SUFFIX,
        )
        .unwrap();

        assert_eq!(metadata.get("datasetId"), Some(&json!("ABC123")));
    }

    #[test]
    fn test_archives_each_consumed_keyword() {
        let mut metadata = Metadata::new();
        metadata.insert("OBJECT".to_string(), json!("D3"));
        metadata.insert("FILTER".to_string(), json!("i"));

        transform(
            &mut metadata,
            &required(&["datasetId", "filter"]),
            &cfht_mapping(),
            &RuleSet::default(),
            DEFAULT_MAPPING_SUFFIX,
        )
        .unwrap();

        // Each consumed keyword moves aside under its own name, not under
        // whichever keyword a later loop iteration happened to hold.
        assert_eq!(metadata.get("OBJECT_original"), Some(&json!("D3")));
        assert_eq!(metadata.get("FILTER_original"), Some(&json!("i")));
        assert!(!metadata.contains_key("OBJECT"));
        assert!(!metadata.contains_key("FILTER"));
    }

    #[test]
    fn test_existing_canonical_field_left_alone() {
        let mut metadata = Metadata::new();
        metadata.insert("filter".to_string(), json!("g"));
        metadata.insert("FILTER".to_string(), json!("ignored"));

        transform(
            &mut metadata,
            &required(&["filter"]),
            &cfht_mapping(),
            &RuleSet::default(),
            DEFAULT_MAPPING_SUFFIX,
        )
        .unwrap();

        assert_eq!(metadata.get("filter"), Some(&json!("g")));
        // Nothing was mapped, so the raw keyword is not archived either.
        assert_eq!(metadata.get("FILTER"), Some(&json!("ignored")));
    }

    #[test]
    fn test_missing_source_keyword_skipped_silently() {
        let mut metadata = Metadata::new();
        metadata.insert("EXPTIME".to_string(), json!(30.0));

        transform(
            &mut metadata,
            &required(&["datasetId", "expTime"]),
            &cfht_mapping(),
            &RuleSet::default(),
            DEFAULT_MAPPING_SUFFIX,
        )
        .unwrap();

        assert!(!metadata.contains_key("datasetId"));
        assert_eq!(metadata.get("expTime"), Some(&json!(30.0)));
    }

    #[test]
    fn test_transform_idempotent_on_canonical_record() {
        let mut metadata = Metadata::new();
        metadata.insert("datasetId".to_string(), json!("D1"));
        metadata.insert("filter".to_string(), json!("r"));
        metadata.insert("expTime".to_string(), json!(15.0));
        metadata.insert("dateObs".to_string(), json!(53880.133));
        let before = metadata.clone();

        let required = required(&["datasetId", "filter", "expTime", "dateObs"]);
        transform(
            &mut metadata,
            &required,
            &cfht_mapping(),
            &RuleSet::default(),
            DEFAULT_MAPPING_SUFFIX,
        )
        .unwrap();
        transform(
            &mut metadata,
            &required,
            &cfht_mapping(),
            &RuleSet::default(),
            DEFAULT_MAPPING_SUFFIX,
        )
        .unwrap();

        assert_eq!(metadata, before);
    }

    #[test]
    fn test_validate_names_first_missing_field() {
        let mut metadata = Metadata::new();
        metadata.insert("visitId".to_string(), json!(871034));

        let result = validate(&metadata, &required(&["visitId", "ra", "decl"]));
        assert_eq!(result, Err(Error::MissingField("ra".to_string())));
    }

    #[test]
    fn test_validate_presence_only() {
        let mut metadata = Metadata::new();
        // Wrong type on purpose: validation does not type-check.
        metadata.insert("ra".to_string(), json!("not a number"));

        assert!(validate(&metadata, &required(&["ra"])).is_ok());
    }

    #[test]
    fn test_mapping_lookup_uses_suffix() {
        let mapping: FieldMapping = [("filterLabel", "FILTNAME")].into_iter().collect();
        assert_eq!(mapping.source_keyword("filter", "Label"), Some("FILTNAME"));
        assert_eq!(mapping.source_keyword("filter", "Keyword"), None);
    }

    #[test]
    fn test_mapping_lookup_tolerates_lowercased_keys() {
        let mapping: FieldMapping = [("datasetidkeyword", "OBJECT")].into_iter().collect();
        assert_eq!(
            mapping.source_keyword("datasetId", "Keyword"),
            Some("OBJECT")
        );
    }
}
