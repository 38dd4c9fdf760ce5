//! YAML configuration: global settings, retry policy, and per-section plans.
//!
//! The file is read once per run into an immutable [`Config`]. Problems that
//! belong to a single section (duplicate fields, bad year lists) are kept with
//! that section so the other sections still run.

use std::{
    collections::{BTreeMap, HashSet},
    fmt, fs,
    marker::PhantomData,
    path::Path,
};

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use serde::{Deserialize, Deserializer, de};
use sha2::{Digest, Sha256};

use crate::{
    error::ConfigurationError,
    mapping::{MappingStore, SourceExpr, Year, YearMapping},
    registry::{CanonicalSchema, SchemaRegistry},
    retry::RetryPolicy,
};

pub const DEFAULT_SOURCE_TABLE_TEMPLATE: &str =
    "{project}.eavs_{year}.eavs_county_{yy}_{section_code}";
const UNVERSIONED: &str = "unversioned";

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalSettings {
    pub project_id: String,
    pub analytics_dataset: String,
    #[serde(default = "GlobalSettings::default_template")]
    pub source_table_template: String,
}

impl GlobalSettings {
    fn default_template() -> String {
        DEFAULT_SOURCE_TABLE_TEMPLATE.to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    config_version: Option<String>,
    global: GlobalSettings,
    #[serde(default)]
    retry: RetryPolicy,
    sections: BTreeMap<String, RawSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSection {
    section_code: String,
    view: String,
    #[serde(default)]
    output_file: Option<String>,
    #[serde(default)]
    years: Vec<Year>,
    #[serde(default)]
    composite_key: Option<String>,
    standard_fields: Vec<String>,
    #[serde(default)]
    source_tables: YearEntries<String>,
    #[serde(default)]
    mappings: YearEntries<YearMapping>,
}

/// Year-keyed block in source order. `2016` and `"2016"` are distinct YAML
/// keys that name the same year, so repeats are kept here and rejected per
/// section instead of one silently replacing the other.
#[derive(Debug)]
struct YearEntries<T>(Vec<(Year, T)>);

impl<T> Default for YearEntries<T> {
    fn default() -> Self {
        YearEntries(Vec::new())
    }
}

impl<T> YearEntries<T> {
    fn into_unique(self, section: &str) -> Result<BTreeMap<Year, T>, ConfigurationError> {
        let mut unique = BTreeMap::new();
        for (year, value) in self.0 {
            if unique.insert(year, value).is_some() {
                return Err(ConfigurationError::DuplicateYear {
                    section: section.to_string(),
                    year,
                });
            }
        }
        Ok(unique)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for YearEntries<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> de::Visitor<'de> for EntriesVisitor<T> {
            type Value = YearEntries<T>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map keyed by four-digit years")
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(YearEntries::default())
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((year, value)) = map.next_entry::<Year, T>()? {
                    entries.push((year, value));
                }
                Ok(YearEntries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor(PhantomData))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPlan {
    pub name: String,
    pub section_code: String,
    /// Fully-qualified view name.
    pub view: String,
    pub output_file: String,
    /// Years in union order.
    pub years: Vec<Year>,
    pub composite_key: Option<String>,
    source_tables: BTreeMap<Year, String>,
}

impl SectionPlan {
    pub fn source_table(&self, global: &GlobalSettings, year: Year) -> String {
        if let Some(table) = self.source_tables.get(&year) {
            return table.clone();
        }
        global
            .source_table_template
            .replace("{project}", &global.project_id)
            .replace("{year}", &year.to_string())
            .replace("{yy}", &year.short())
            .replace("{section_code}", &self.section_code)
            .replace("{section}", &self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    version: String,
    fingerprint: String,
    global: GlobalSettings,
    retry: RetryPolicy,
    registry: SchemaRegistry,
    mappings: MappingStore,
    sections: BTreeMap<String, Result<SectionPlan, ConfigurationError>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Opening configuration file {path:?}"))?;
        Self::from_yaml_str(&raw).with_context(|| format!("Loading configuration from {path:?}"))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let fingerprint = format!("{:x}", Sha256::digest(raw.as_bytes()));
        let parsed: RawConfig = serde_yaml::from_str(raw).context("Parsing configuration YAML")?;

        if parsed.global.project_id.trim().is_empty() {
            bail!("global.project_id cannot be empty");
        }
        if parsed.global.analytics_dataset.trim().is_empty() {
            bail!("global.analytics_dataset cannot be empty");
        }
        if parsed.sections.is_empty() {
            bail!("Configuration does not define any sections");
        }
        parsed.retry.ensure_valid()?;

        let mut schemas = Vec::new();
        let mut mappings = MappingStore::new();
        let mut sections = BTreeMap::new();
        for (name, section) in parsed.sections {
            let plan = build_section(&name, section, &parsed.global, &mut mappings).map(
                |(schema, plan)| {
                    schemas.push(schema);
                    plan
                },
            );
            if let Err(err) = &plan {
                warn!("Section '{name}' is misconfigured: {err}");
            }
            sections.insert(name, plan);
        }

        let version = parsed
            .config_version
            .filter(|version| !version.trim().is_empty())
            .unwrap_or_else(|| UNVERSIONED.to_string());
        debug!(
            "Loaded configuration version {version} ({} section(s), sha256 {fingerprint})",
            sections.len()
        );

        Ok(Config {
            version,
            fingerprint,
            global: parsed.global,
            retry: parsed.retry,
            registry: SchemaRegistry::from_schemas(schemas),
            mappings,
            sections,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// SHA-256 of the configuration text, hex encoded.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn global(&self) -> &GlobalSettings {
        &self.global
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn mappings(&self) -> &MappingStore {
        &self.mappings
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(|name| name.as_str())
    }

    pub fn plan(&self, section: &str) -> Result<&SectionPlan, ConfigurationError> {
        match self.sections.get(section) {
            Some(Ok(plan)) => Ok(plan),
            Some(Err(err)) => Err(err.clone()),
            None => Err(ConfigurationError::UnknownSection(section.to_string())),
        }
    }

    /// Requested section names in request order, or every section when the
    /// request is empty.
    pub fn select_sections(&self, requested: &[String]) -> Vec<String> {
        if requested.is_empty() {
            return self.sections.keys().cloned().collect();
        }
        let mut seen = HashSet::new();
        requested
            .iter()
            .flat_map(|value| value.split(','))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty() && seen.insert(name.clone()))
            .collect()
    }
}

fn build_section(
    name: &str,
    section: RawSection,
    global: &GlobalSettings,
    mappings: &mut MappingStore,
) -> Result<(CanonicalSchema, SectionPlan), ConfigurationError> {
    let schema = CanonicalSchema::new(name, &section.standard_fields)?;

    if section.years.is_empty() {
        return Err(ConfigurationError::NoYears {
            section: name.to_string(),
        });
    }
    let mut seen = HashSet::new();
    for year in &section.years {
        if !seen.insert(*year) {
            return Err(ConfigurationError::DuplicateYear {
                section: name.to_string(),
                year: *year,
            });
        }
    }
    let source_tables = section.source_tables.into_unique(name)?;
    let section_mappings = section.mappings.into_unique(name)?;
    for (year, mapping) in &section_mappings {
        for (field, entry) in mapping.iter() {
            if matches!(entry, SourceExpr::Expression(text) if text.trim().is_empty()) {
                return Err(ConfigurationError::EmptyExpression {
                    section: name.to_string(),
                    year: *year,
                    field: field.to_string(),
                });
            }
        }
        if !seen.contains(year) {
            warn!("Section '{name}' has mappings for {year} but the year is not listed in `years`; it will not be unioned");
        }
    }

    let view = qualify_view(&section.view, global);
    let output_file = section
        .output_file
        .filter(|file| !file.trim().is_empty())
        .unwrap_or_else(|| format!("{name}.sql"));
    let composite_key = section
        .composite_key
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty());

    mappings.insert_section(name);
    for (year, mapping) in section_mappings {
        mappings.insert(name, year, mapping);
    }

    let plan = SectionPlan {
        name: name.to_string(),
        section_code: section.section_code,
        view,
        output_file,
        years: section.years,
        composite_key,
        source_tables,
    };
    Ok((schema, plan))
}

fn qualify_view(view: &str, global: &GlobalSettings) -> String {
    let trimmed = view.trim().trim_matches('`');
    match trimmed.matches('.').count() {
        0 => format!(
            "{}.{}.{}",
            global.project_id, global.analytics_dataset, trimmed
        ),
        1 => format!("{}.{}", global.project_id, trimmed),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::SourceExpr;

    const SAMPLE: &str = r#"
config_version: "2024.1"
global:
  project_id: eavs-392800
  analytics_dataset: eavs_analytics
retry:
  max_attempts: 2
sections:
  registration:
    section_code: a_reg
    view: eavs_county_reg_union
    years: [2016, 2024]
    composite_key: jurisdiction_key
    standard_fields: [fips, election_year, total_reg]
    source_tables:
      2024: eavs-392800.eavs_2024.native_reg
    mappings:
      2016: { total_reg: raw_total }
      2024: { total_reg: null }
  mail:
    section_code: c_mail
    view: other_dataset.mail_union
    years: [2016, 2016]
    standard_fields: [total_mail]
"#;

    #[test]
    fn sample_configuration_loads() {
        let config = Config::from_yaml_str(SAMPLE).expect("config");
        assert_eq!(config.version(), "2024.1");
        assert_eq!(config.fingerprint().len(), 64);
        assert_eq!(config.retry().max_attempts, 2);
        assert_eq!(config.retry().initial_backoff_ms, 250);

        let plan = config.plan("registration").expect("plan");
        assert_eq!(plan.view, "eavs-392800.eavs_analytics.eavs_county_reg_union");
        assert_eq!(plan.output_file, "registration.sql");
        assert_eq!(plan.years, vec![Year::new(2016), Year::new(2024)]);
        assert_eq!(plan.composite_key.as_deref(), Some("jurisdiction_key"));
        assert_eq!(
            plan.source_table(config.global(), Year::new(2016)),
            "eavs-392800.eavs_2016.eavs_county_16_a_reg"
        );
        assert_eq!(
            plan.source_table(config.global(), Year::new(2024)),
            "eavs-392800.eavs_2024.native_reg"
        );

        let schema = config.registry().schema_for("registration").expect("schema");
        assert_eq!(schema.specific_fields(), ["total_reg".to_string()]);
        assert_eq!(
            config.mappings().entry("registration", Year::new(2024), "total_reg"),
            Ok(&SourceExpr::Absent)
        );
    }

    #[test]
    fn broken_section_does_not_poison_the_others() {
        let config = Config::from_yaml_str(SAMPLE).expect("config");
        assert!(config.plan("registration").is_ok());
        assert_eq!(
            config.plan("mail").unwrap_err(),
            ConfigurationError::DuplicateYear {
                section: "mail".to_string(),
                year: Year::new(2016)
            }
        );
        assert!(config.registry().schema_for("mail").is_err());
        assert_eq!(config.section_names().count(), 2);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = Config::from_yaml_str(SAMPLE).expect("a");
        let b = Config::from_yaml_str(&SAMPLE.replace("raw_total", "raw_total_v2")).expect("b");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn section_selection_keeps_request_order() {
        let config = Config::from_yaml_str(SAMPLE).expect("config");
        assert_eq!(config.select_sections(&[]), vec!["mail", "registration"]);
        assert_eq!(
            config.select_sections(&["registration,mail".to_string(), "mail".to_string()]),
            vec!["registration", "mail"]
        );
    }

    #[test]
    fn views_are_qualified_with_project_and_dataset() {
        let global = GlobalSettings {
            project_id: "p".to_string(),
            analytics_dataset: "a".to_string(),
            source_table_template: DEFAULT_SOURCE_TABLE_TEMPLATE.to_string(),
        };
        assert_eq!(qualify_view("v", &global), "p.a.v");
        assert_eq!(qualify_view("d.v", &global), "p.d.v");
        assert_eq!(qualify_view("`x.d.v`", &global), "x.d.v");
    }

    #[test]
    fn invalid_retry_policy_fails_the_load() {
        let raw = SAMPLE.replace("max_attempts: 2", "max_attempts: 0");
        let err = Config::from_yaml_str(&raw).unwrap_err();
        assert!(err.to_string().contains("retry.max_attempts"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = SAMPLE.replace("composite_key:", "composit_key:");
        assert!(Config::from_yaml_str(&raw).is_err());
        let raw = SAMPLE.replace("max_attempts: 2", "max_attempt: 2");
        assert!(Config::from_yaml_str(&raw).is_err());
    }

    #[test]
    fn same_year_written_twice_is_rejected_for_that_section() {
        let raw = SAMPLE.replace(
            "      2016: { total_reg: raw_total }\n",
            "      2016: { total_reg: first_col }\n      \"2016\": { total_reg: second_col }\n",
        );
        let config = Config::from_yaml_str(&raw).expect("config");
        assert_eq!(
            config.plan("registration").unwrap_err(),
            ConfigurationError::DuplicateYear {
                section: "registration".to_string(),
                year: Year::new(2016)
            }
        );
        assert!(config.mappings().year("registration", Year::new(2016)).is_err());
    }

    #[test]
    fn same_year_source_table_written_twice_is_rejected() {
        let raw = SAMPLE.replace(
            "      2024: eavs-392800.eavs_2024.native_reg\n",
            "      2024: p.d.first\n      \"2024\": p.d.second\n",
        );
        let config = Config::from_yaml_str(&raw).expect("config");
        assert!(matches!(
            config.plan("registration"),
            Err(ConfigurationError::DuplicateYear { .. })
        ));
    }

    #[test]
    fn empty_expression_is_rejected_at_load() {
        let raw = SAMPLE.replace("{ total_reg: raw_total }", "{ total_reg: \"  \" }");
        let config = Config::from_yaml_str(&raw).expect("config");
        assert_eq!(
            config.plan("registration").unwrap_err(),
            ConfigurationError::EmptyExpression {
                section: "registration".to_string(),
                year: Year::new(2016),
                field: "total_reg".to_string()
            }
        );
    }

    #[test]
    fn section_without_mappings_reports_the_missing_year() {
        let raw = SAMPLE
            .replace("    mappings:\n", "")
            .replace("      2016: { total_reg: raw_total }\n", "")
            .replace("      2024: { total_reg: null }\n", "");
        let config = Config::from_yaml_str(&raw).expect("config");
        assert!(config.plan("registration").is_ok());
        assert_eq!(
            config.mappings().year("registration", Year::new(2016)),
            Err(ConfigurationError::MissingYear {
                section: "registration".to_string(),
                year: Year::new(2016)
            })
        );
    }
}
