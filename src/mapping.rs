//! Typed field mappings: section → year → canonical field → source expression.
//!
//! A field is either mapped to an opaque expression, explicitly marked
//! [`SourceExpr::Absent`], or not mentioned at all. The last case is an error
//! at fragment-build time; it is never treated as absent.

use std::{collections::BTreeMap, fmt, str::FromStr, sync::OnceLock};

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_yaml::Value;

use crate::error::ConfigurationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Year(u16);

impl Year {
    pub const fn new(value: u16) -> Self {
        Year(value)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    /// Two-digit suffix used in per-year table names (2024 → "24").
    pub fn short(self) -> String {
        format!("{:02}", self.0 % 100)
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Year {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.len() != 4 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("'{value}' is not a four-digit year"));
        }
        match trimmed.parse::<u16>() {
            Ok(year) if (1000..=9999).contains(&year) => Ok(Year(year)),
            _ => Err(format!("'{value}' is not a four-digit year")),
        }
    }
}

impl<'de> Deserialize<'de> for Year {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct YearVisitor;

        impl de::Visitor<'_> for YearVisitor {
            type Value = Year;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a four-digit year as an integer or string")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Year, E> {
                if (1000..=9999).contains(&value) {
                    Ok(Year(value as u16))
                } else {
                    Err(E::custom(format!("{value} is not a four-digit year")))
                }
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Year, E> {
                if value < 0 {
                    return Err(E::custom(format!("{value} is not a four-digit year")));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Year, E> {
                Year::from_str(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(YearVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SourceExpr {
    /// Verbatim query syntax: a bare column or a computed expression.
    Expression(String),
    /// The field does not exist for this year and is emitted as NULL.
    Absent,
}

impl SourceExpr {
    pub fn expression(text: impl Into<String>) -> Self {
        SourceExpr::Expression(text.into())
    }

    pub fn as_expression(&self) -> Option<&str> {
        match self {
            SourceExpr::Expression(text) => Some(text.as_str()),
            SourceExpr::Absent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, SourceExpr::Absent)
    }

    /// Returns the column name when the expression is a single bare identifier.
    pub fn bare_column(&self) -> Option<&str> {
        static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
        let pattern = IDENTIFIER.get_or_init(|| {
            Regex::new(r"^`?([A-Za-z_][A-Za-z0-9_]*)`?$").expect("identifier pattern compiles")
        });
        let text = self.as_expression()?.trim();
        pattern
            .captures(text)
            .and_then(|captures| captures.get(1))
            .map(|m| m.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceExpr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Null => Ok(SourceExpr::Absent),
            Value::String(text) if text.trim().eq_ignore_ascii_case("null") => {
                Ok(SourceExpr::Absent)
            }
            Value::String(text) => Ok(SourceExpr::Expression(text.trim().to_string())),
            Value::Number(number) => Ok(SourceExpr::Expression(number.to_string())),
            other => Err(de::Error::custom(format!(
                "mapping values must be an expression string or null, found {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct YearMapping {
    entries: BTreeMap<String, SourceExpr>,
}

impl YearMapping {
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, SourceExpr)>,
        K: Into<String>,
    {
        YearMapping {
            entries: entries
                .into_iter()
                .map(|(field, expr)| (field.into(), expr))
                .collect(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&SourceExpr> {
        self.entries.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SourceExpr)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MappingStore {
    sections: BTreeMap<String, BTreeMap<Year, YearMapping>>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `section` so lookups of unmapped years report the year, not
    /// the section, as missing.
    pub fn insert_section(&mut self, section: &str) {
        self.sections.entry(section.to_string()).or_default();
    }

    pub fn insert(&mut self, section: &str, year: Year, mapping: YearMapping) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(year, mapping);
    }

    pub fn with_year<I, K>(mut self, section: &str, year: Year, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, SourceExpr)>,
        K: Into<String>,
    {
        self.insert(section, year, YearMapping::from_entries(entries));
        self
    }

    pub fn year(&self, section: &str, year: Year) -> Result<&YearMapping, ConfigurationError> {
        let years = self
            .sections
            .get(section)
            .ok_or_else(|| ConfigurationError::UnknownSection(section.to_string()))?;
        years.get(&year).ok_or_else(|| ConfigurationError::MissingYear {
            section: section.to_string(),
            year,
        })
    }

    pub fn entry(
        &self,
        section: &str,
        year: Year,
        field: &str,
    ) -> Result<&SourceExpr, ConfigurationError> {
        self.year(section, year)?
            .get(field)
            .ok_or_else(|| ConfigurationError::UnmappedField {
                section: section.to_string(),
                year,
                field: field.to_string(),
            })
    }

    pub fn years(&self, section: &str) -> Vec<Year> {
        self.sections
            .get(section)
            .map(|years| years.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_parses_from_integer_and_string_keys() {
        let parsed: BTreeMap<Year, String> =
            serde_yaml::from_str("2016: a\n\"2018\": b\n").expect("parse years");
        let years = parsed.keys().copied().collect::<Vec<_>>();
        assert_eq!(years, vec![Year::new(2016), Year::new(2018)]);
        assert_eq!(Year::new(2024).short(), "24");
        assert_eq!(Year::new(2004).short(), "04");
    }

    #[test]
    fn year_rejects_non_four_digit_values() {
        assert!(serde_yaml::from_str::<Year>("16").is_err());
        assert!("20x6".parse::<Year>().is_err());
        assert!("+201".parse::<Year>().is_err());
        assert!("-201".parse::<Year>().is_err());
        assert!("0999".parse::<Year>().is_err());
        assert!(serde_yaml::from_str::<Year>("\"+201\"").is_err());
        assert_eq!(" 2016 ".parse::<Year>(), Ok(Year::new(2016)));
    }

    #[test]
    fn registered_section_reports_the_missing_year() {
        let mut store = MappingStore::new();
        store.insert_section("reg");
        assert_eq!(
            store.year("reg", Year::new(2016)),
            Err(ConfigurationError::MissingYear {
                section: "reg".to_string(),
                year: Year::new(2016)
            })
        );
    }

    #[test]
    fn null_and_null_string_mean_absent() {
        let mapping: YearMapping =
            serde_yaml::from_str("a: ~\nb: null\nc: \"NULL\"\nd: raw_total\ne: 0\n")
                .expect("parse mapping");
        assert!(mapping.get("a").expect("a").is_absent());
        assert!(mapping.get("b").expect("b").is_absent());
        assert!(mapping.get("c").expect("c").is_absent());
        assert_eq!(mapping.get("d").and_then(|e| e.as_expression()), Some("raw_total"));
        assert_eq!(mapping.get("e").and_then(|e| e.as_expression()), Some("0"));
    }

    #[test]
    fn unmapped_and_absent_are_distinct() {
        let store = MappingStore::new().with_year(
            "reg",
            Year::new(2016),
            [("total_reg", SourceExpr::Absent)],
        );
        assert_eq!(
            store.entry("reg", Year::new(2016), "total_reg"),
            Ok(&SourceExpr::Absent)
        );
        assert!(matches!(
            store.entry("reg", Year::new(2016), "active_reg"),
            Err(ConfigurationError::UnmappedField { .. })
        ));
        assert!(matches!(
            store.entry("reg", Year::new(2018), "total_reg"),
            Err(ConfigurationError::MissingYear { .. })
        ));
        assert!(matches!(
            store.entry("mail", Year::new(2016), "total_reg"),
            Err(ConfigurationError::UnknownSection(_))
        ));
    }

    #[test]
    fn bare_column_detection_skips_computed_expressions() {
        assert_eq!(SourceExpr::expression("A1a").bare_column(), Some("A1a"));
        assert_eq!(SourceExpr::expression("`A1a`").bare_column(), Some("A1a"));
        assert_eq!(SourceExpr::expression("A1a + A1b").bare_column(), None);
        assert_eq!(SourceExpr::expression("CAST(x AS INT64)").bare_column(), None);
        assert_eq!(SourceExpr::Absent.bare_column(), None);
    }
}
