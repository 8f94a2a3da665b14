//! Registry of named post-processing rules for canonical metadata.
//!
//! Each rule is a small pure function over the metadata record. The set of
//! rules applied to a data type is declared in its mapping document as an
//! ordered list of names, resolved once per run through
//! [`RuleSet::from_names`]; an unknown name is a configuration error.
//!
//! Rules only act on fields still in their raw header form (usually
//! strings) and leave already-converted values untouched, so applying a
//! rule set to an already-canonical record is a no-op.

use crate::metadata::{fields, Metadata};
use serde_json::{json, Value};
use std::f64::consts::PI;

/// TAI-UTC offsets: (first MJD the offset applies to, seconds).
const LEAP_SECONDS: &[(f64, f64)] = &[
    (51179.0, 32.0), // 1999-01-01
    (53736.0, 33.0), // 2006-01-01
    (54832.0, 34.0), // 2009-01-01
    (56109.0, 35.0), // 2012-07-01
    (57204.0, 36.0), // 2015-07-01
    (57754.0, 37.0), // 2017-01-01
];

/// MJD of the Unix epoch.
const MJD_UNIX_EPOCH: f64 = 40587.0;

const SECONDS_PER_DAY: f64 = 86400.0;

/// Errors raised while resolving or applying rules.
#[derive(thiserror::Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// A rule name in the mapping document is not registered.
    #[error("Unknown transform rule '{0}'")]
    UnknownRule(String),
    /// A field value could not be parsed as an integer.
    #[error("Rule '{rule}' cannot parse '{value}' as an integer")]
    ParseInt { rule: &'static str, value: String },
    /// A coordinate string is not valid sexagesimal notation.
    #[error("Rule '{rule}' cannot parse sexagesimal value '{value}'")]
    ParseSexagesimal { rule: &'static str, value: String },
    /// An observation date string is neither an MJD number nor a civil date.
    #[error("Rule '{rule}' cannot parse date '{value}'")]
    ParseDate { rule: &'static str, value: String },
    /// A rule needs another field that is absent or non-numeric.
    #[error("Rule '{rule}' requires numeric field '{field}'")]
    MissingInput {
        rule: &'static str,
        field: &'static str,
    },
}

/// Mutable state threaded through one rule pass.
///
/// Records whether `dateObs` was converted from its header form during this
/// pass, so the mid-exposure shift applies exactly once per record.
#[derive(Debug, Default)]
struct PassState {
    date_converted: bool,
}

/// A named, deterministic post-processing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Convert `dateObs` from UTC to a TAI modified Julian date.
    ConvertDateobsToTai,
    /// Shift `dateObs` forward by half the exposure time.
    ConvertDateobsToMidExposure,
    /// Cut trailing free text from `filter` at the first space.
    TrimFilterName,
    /// Coerce a string `visitId` to an integer.
    ConvertVisitidToInt,
    /// Strip alphabetic characters from `exposureId` and coerce to an integer.
    TrimFilenameForExpid,
    /// Convert a sexagesimal `ra` string (hours) to radians.
    ConvertRaToRadians,
    /// Convert a sexagesimal `decl` string (degrees) to radians.
    ConvertDecToRadians,
    /// Force WCS projection keywords to a tangent-plane projection.
    ForceTanProjection,
}

impl Rule {
    pub fn from_name(name: &str) -> Option<Rule> {
        match name {
            "convert_dateobs_to_tai" => Some(Rule::ConvertDateobsToTai),
            "convert_dateobs_to_mid_exposure" => Some(Rule::ConvertDateobsToMidExposure),
            "trim_filter_name" => Some(Rule::TrimFilterName),
            "convert_visitid_to_int" => Some(Rule::ConvertVisitidToInt),
            "trim_filename_for_expid" => Some(Rule::TrimFilenameForExpid),
            "convert_ra_to_radians" => Some(Rule::ConvertRaToRadians),
            "convert_dec_to_radians" => Some(Rule::ConvertDecToRadians),
            "force_tan_projection" => Some(Rule::ForceTanProjection),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rule::ConvertDateobsToTai => "convert_dateobs_to_tai",
            Rule::ConvertDateobsToMidExposure => "convert_dateobs_to_mid_exposure",
            Rule::TrimFilterName => "trim_filter_name",
            Rule::ConvertVisitidToInt => "convert_visitid_to_int",
            Rule::TrimFilenameForExpid => "trim_filename_for_expid",
            Rule::ConvertRaToRadians => "convert_ra_to_radians",
            Rule::ConvertDecToRadians => "convert_dec_to_radians",
            Rule::ForceTanProjection => "force_tan_projection",
        }
    }

    fn apply(&self, metadata: &mut Metadata, pass: &mut PassState) -> Result<(), Error> {
        match self {
            Rule::ConvertDateobsToTai => {
                let Some(Value::String(raw)) = metadata.get(fields::DATE_OBS) else {
                    return Ok(());
                };
                let mjd_utc = parse_utc_mjd(self.name(), raw)?;
                let tai = mjd_utc + tai_offset_seconds(mjd_utc) / SECONDS_PER_DAY;
                metadata.insert(fields::DATE_OBS.to_string(), json!(tai));
                pass.date_converted = true;
                Ok(())
            }
            Rule::ConvertDateobsToMidExposure => {
                let mjd = match metadata.get(fields::DATE_OBS) {
                    Some(Value::String(raw)) => {
                        pass.date_converted = true;
                        parse_utc_mjd(self.name(), raw)?
                    }
                    // Already numeric: shift only a value converted this pass,
                    // so the rule set stays idempotent.
                    Some(Value::Number(n)) if pass.date_converted => {
                        n.as_f64().ok_or(Error::MissingInput {
                            rule: self.name(),
                            field: fields::DATE_OBS,
                        })?
                    }
                    _ => return Ok(()),
                };
                let exp_time = numeric_field(metadata, fields::EXP_TIME).ok_or(
                    Error::MissingInput {
                        rule: self.name(),
                        field: fields::EXP_TIME,
                    },
                )?;
                let mid = mjd + exp_time * 0.5 / SECONDS_PER_DAY;
                metadata.insert(fields::DATE_OBS.to_string(), json!(mid));
                Ok(())
            }
            Rule::TrimFilterName => {
                if let Some(Value::String(filter)) = metadata.get(fields::FILTER) {
                    if let Some(space) = filter.find(' ') {
                        let trimmed = filter[..space].to_string();
                        metadata.insert(fields::FILTER.to_string(), Value::String(trimmed));
                    }
                }
                Ok(())
            }
            Rule::ConvertVisitidToInt => {
                let Some(Value::String(raw)) = metadata.get(fields::VISIT_ID) else {
                    return Ok(());
                };
                let visit_id: i64 = raw.trim().parse().map_err(|_| Error::ParseInt {
                    rule: self.name(),
                    value: raw.clone(),
                })?;
                metadata.insert(fields::VISIT_ID.to_string(), json!(visit_id));
                Ok(())
            }
            Rule::TrimFilenameForExpid => {
                let Some(Value::String(raw)) = metadata.get(fields::EXPOSURE_ID) else {
                    return Ok(());
                };
                let digits: String = raw.chars().filter(|c| !c.is_ascii_alphabetic()).collect();
                let exposure_id: i64 = digits.trim().parse().map_err(|_| Error::ParseInt {
                    rule: self.name(),
                    value: raw.clone(),
                })?;
                metadata.insert(fields::EXPOSURE_ID.to_string(), json!(exposure_id));
                Ok(())
            }
            Rule::ConvertRaToRadians => {
                let Some(Value::String(raw)) = metadata.get(fields::RA) else {
                    return Ok(());
                };
                let hours = parse_sexagesimal(self.name(), raw)?;
                let radians = hours * 15.0 * PI / 180.0;
                metadata.insert(fields::RA.to_string(), json!(radians));
                Ok(())
            }
            Rule::ConvertDecToRadians => {
                let Some(Value::String(raw)) = metadata.get(fields::DECL) else {
                    return Ok(());
                };
                let degrees = parse_sexagesimal(self.name(), raw)?;
                let radians = degrees * PI / 180.0;
                metadata.insert(fields::DECL.to_string(), json!(radians));
                Ok(())
            }
            Rule::ForceTanProjection => {
                if metadata.contains_key("CTYPE1") {
                    metadata.insert("CTYPE1".to_string(), json!("RA---TAN"));
                }
                if metadata.contains_key("CTYPE2") {
                    metadata.insert("CTYPE2".to_string(), json!("DEC--TAN"));
                }
                Ok(())
            }
        }
    }
}

/// Ordered set of rules resolved from a mapping document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Resolves an ordered list of rule names.
    pub fn from_names<I, S>(names: I) -> Result<RuleSet, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = names
            .into_iter()
            .map(|name| {
                Rule::from_name(name.as_ref())
                    .ok_or_else(|| Error::UnknownRule(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RuleSet { rules })
    }

    /// Applies every rule, in declaration order.
    pub fn apply(&self, metadata: &mut Metadata) -> Result<(), Error> {
        let mut pass = PassState::default();
        for rule in &self.rules {
            rule.apply(metadata, &mut pass)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

fn numeric_field(metadata: &Metadata, name: &str) -> Option<f64> {
    match metadata.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parses an observation date as either an MJD number or an ISO civil date.
fn parse_utc_mjd(rule: &'static str, raw: &str) -> Result<f64, Error> {
    let raw = raw.trim();
    if let Ok(mjd) = raw.parse::<f64>() {
        return Ok(mjd);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(civil) = chrono::NaiveDateTime::parse_from_str(raw, format) {
            let seconds = civil.and_utc().timestamp_micros() as f64 / 1e6;
            return Ok(seconds / SECONDS_PER_DAY + MJD_UNIX_EPOCH);
        }
    }
    Err(Error::ParseDate {
        rule,
        value: raw.to_string(),
    })
}

fn tai_offset_seconds(mjd_utc: f64) -> f64 {
    LEAP_SECONDS
        .iter()
        .rev()
        .find(|(since, _)| mjd_utc >= *since)
        .map(|(_, offset)| *offset)
        .unwrap_or(LEAP_SECONDS[0].1)
}

/// Parses `[+-]A:B:C[.f]` into a signed value in units of the first field.
fn parse_sexagesimal(rule: &'static str, raw: &str) -> Result<f64, Error> {
    let err = || Error::ParseSexagesimal {
        rule,
        value: raw.to_string(),
    };

    let trimmed = raw.trim();
    let (sign, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let parts: Vec<&str> = body.split(':').collect();
    if parts.len() != 3 {
        return Err(err());
    }
    let whole: f64 = parts[0].parse().map_err(|_| err())?;
    let minutes: f64 = parts[1].parse().map_err(|_| err())?;
    let seconds: f64 = parts[2].parse().map_err(|_| err())?;
    if whole < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return Err(err());
    }

    Ok(sign * (whole + minutes / 60.0 + seconds / 3600.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::f64::consts::TAU;

    fn apply(rules: &[&str], metadata: &mut Metadata) -> Result<(), Error> {
        RuleSet::from_names(rules.iter().copied())?.apply(metadata)
    }

    #[test]
    fn test_unknown_rule_rejected() {
        let result = RuleSet::from_names(["convert_ra_to_radians", "frobnicate"]);
        assert_eq!(
            result.unwrap_err(),
            Error::UnknownRule("frobnicate".to_string())
        );
    }

    #[test]
    fn test_ra_conversion_lands_in_range() {
        let mut metadata = Metadata::new();
        metadata.insert("ra".to_string(), json!("12:34:56.7"));

        apply(&["convert_ra_to_radians"], &mut metadata).unwrap();

        let ra = metadata.get("ra").and_then(Value::as_f64).unwrap();
        assert!(ra.is_finite());
        assert!((0.0..TAU).contains(&ra));
        let expected = (12.0 + 34.0 / 60.0 + 56.7 / 3600.0) * 15.0 * PI / 180.0;
        assert!((ra - expected).abs() < 1e-12);
    }

    #[test]
    fn test_dec_conversion_keeps_sign() {
        let mut metadata = Metadata::new();
        metadata.insert("decl".to_string(), json!("-05:30:00"));

        apply(&["convert_dec_to_radians"], &mut metadata).unwrap();

        let decl = metadata.get("decl").and_then(Value::as_f64).unwrap();
        let expected = -5.5 * PI / 180.0;
        assert!((decl - expected).abs() < 1e-12);
    }

    #[test]
    fn test_bad_sexagesimal_rejected() {
        let mut metadata = Metadata::new();
        metadata.insert("ra".to_string(), json!("12h34m56s"));

        let result = apply(&["convert_ra_to_radians"], &mut metadata);
        assert!(matches!(
            result,
            Err(Error::ParseSexagesimal { rule: "convert_ra_to_radians", .. })
        ));
    }

    #[test]
    fn test_visit_id_coercion() {
        let mut metadata = Metadata::new();
        metadata.insert("visitId".to_string(), json!("871034"));

        apply(&["convert_visitid_to_int"], &mut metadata).unwrap();
        assert_eq!(metadata.get("visitId"), Some(&json!(871034)));
    }

    #[test]
    fn test_exposure_id_strips_alphabetics() {
        let mut metadata = Metadata::new();
        metadata.insert("exposureId".to_string(), json!("e001"));

        apply(&["trim_filename_for_expid"], &mut metadata).unwrap();
        assert_eq!(metadata.get("exposureId"), Some(&json!(1)));
    }

    #[test]
    fn test_filter_trimmed_at_first_space() {
        let mut metadata = Metadata::new();
        metadata.insert("filter".to_string(), json!("r.MP9601 spare words"));

        apply(&["trim_filter_name"], &mut metadata).unwrap();
        assert_eq!(metadata.get("filter"), Some(&json!("r.MP9601")));
    }

    #[test]
    fn test_tan_projection_forced_only_when_present() {
        let mut metadata = Metadata::new();
        metadata.insert("CTYPE1".to_string(), json!("RA---SIN"));

        apply(&["force_tan_projection"], &mut metadata).unwrap();
        assert_eq!(metadata.get("CTYPE1"), Some(&json!("RA---TAN")));
        assert!(!metadata.contains_key("CTYPE2"));
    }

    #[test]
    fn test_dateobs_tai_from_mjd_string() {
        let mut metadata = Metadata::new();
        metadata.insert("dateObs".to_string(), json!("53880.5"));

        apply(&["convert_dateobs_to_tai"], &mut metadata).unwrap();

        let tai = metadata.get("dateObs").and_then(Value::as_f64).unwrap();
        // 2006 sits in the 33-second leap era.
        assert!((tai - (53880.5 + 33.0 / 86400.0)).abs() < 1e-9);
    }

    #[test]
    fn test_dateobs_tai_from_civil_date() {
        let mut metadata = Metadata::new();
        metadata.insert("dateObs".to_string(), json!("2006-05-25T12:00:00"));

        apply(&["convert_dateobs_to_tai"], &mut metadata).unwrap();

        let tai = metadata.get("dateObs").and_then(Value::as_f64).unwrap();
        assert!((tai - (53880.5 + 33.0 / 86400.0)).abs() < 1e-6);
    }

    #[test]
    fn test_mid_exposure_shift_applied_once() {
        let mut metadata = Metadata::new();
        metadata.insert("dateObs".to_string(), json!("53880.0"));
        metadata.insert("expTime".to_string(), json!(30.0));

        let rules = ["convert_dateobs_to_tai", "convert_dateobs_to_mid_exposure"];
        apply(&rules, &mut metadata).unwrap();

        let expected = 53880.0 + 33.0 / 86400.0 + 15.0 / 86400.0;
        let first = metadata.get("dateObs").and_then(Value::as_f64).unwrap();
        assert!((first - expected).abs() < 1e-9);

        // Second pass sees a numeric dateObs and leaves it alone.
        apply(&rules, &mut metadata).unwrap();
        let second = metadata.get("dateObs").and_then(Value::as_f64).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_mid_exposure_requires_exp_time() {
        let mut metadata = Metadata::new();
        metadata.insert("dateObs".to_string(), json!("53880.0"));

        let result = apply(&["convert_dateobs_to_mid_exposure"], &mut metadata);
        assert!(matches!(
            result,
            Err(Error::MissingInput {
                field: "expTime",
                ..
            })
        ));
    }

    #[test]
    fn test_rules_noop_on_canonical_record() {
        let mut metadata = Metadata::new();
        metadata.insert("visitId".to_string(), json!(871034));
        metadata.insert("exposureId".to_string(), json!(0));
        metadata.insert("filter".to_string(), json!("r"));
        metadata.insert("ra".to_string(), json!(3.29));
        metadata.insert("decl".to_string(), json!(-0.096));
        metadata.insert("dateObs".to_string(), json!(53880.133));
        metadata.insert("expTime".to_string(), json!(15.0));
        let before = metadata.clone();

        apply(
            &[
                "convert_dateobs_to_tai",
                "convert_dateobs_to_mid_exposure",
                "trim_filter_name",
                "convert_visitid_to_int",
                "trim_filename_for_expid",
                "convert_ra_to_radians",
                "convert_dec_to_radians",
                "force_tan_projection",
            ],
            &mut metadata,
        )
        .unwrap();

        assert_eq!(metadata, before);
    }

    #[test]
    fn test_rule_name_round_trip() {
        for rule in [
            Rule::ConvertDateobsToTai,
            Rule::ConvertDateobsToMidExposure,
            Rule::TrimFilterName,
            Rule::ConvertVisitidToInt,
            Rule::TrimFilenameForExpid,
            Rule::ConvertRaToRadians,
            Rule::ConvertDecToRadians,
            Rule::ForceTanProjection,
        ] {
            assert_eq!(Rule::from_name(rule.name()), Some(rule));
        }
    }
}
