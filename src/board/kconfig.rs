//! Kernel configuration snapshots and option experiments

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::common::{Error, Result};
use crate::scrape::{self, ConfigValue};

const CONFIG_PREFIX: &str = "CONFIG_";

/// Full option name, with the `CONFIG_` prefix added when missing
pub fn option_name(name: &str) -> String {
    if name.starts_with(CONFIG_PREFIX) {
        name.to_string()
    } else {
        format!("{CONFIG_PREFIX}{name}")
    }
}

/// Option name without the `CONFIG_` prefix
pub fn short_name(name: &str) -> &str {
    name.strip_prefix(CONFIG_PREFIX).unwrap_or(name)
}

/// Parsed `.config` file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, ConfigValue>,
}

/// Whether a requested setting took effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigCheck {
    Confirmed,
    Mismatch { found: String },
}

impl ConfigCheck {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ConfigCheck::Confirmed)
    }
}

/// One line of a configuration diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChange {
    pub option: String,
    pub before: Option<ConfigValue>,
    pub after: Option<ConfigValue>,
}

fn display_value(value: &ConfigValue) -> &str {
    match value {
        ConfigValue::Set(v) => v,
        ConfigValue::NotSet => "n",
    }
}

impl fmt::Display for ConfigChange {
    /// diffconfig style: `-NAME old`, `+NAME new`, or `NAME old -> new`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = short_name(&self.option);
        match (&self.before, &self.after) {
            (Some(before), None) => write!(f, "-{} {}", name, display_value(before)),
            (None, Some(after)) => write!(f, "+{} {}", name, display_value(after)),
            (Some(before), Some(after)) => write!(
                f,
                " {} {} -> {}",
                name,
                display_value(before),
                display_value(after)
            ),
            (None, None) => Ok(()),
        }
    }
}

impl ConfigSnapshot {
    pub fn parse(text: &str) -> Self {
        Self {
            values: text.lines().filter_map(scrape::config_assignment).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Ok(Self::parse(&text))
    }

    pub fn value(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(&option_name(name))
    }

    /// Check an option against a requested value
    ///
    /// `n` is only confirmed by the "is not set" marker; any other value
    /// must appear literally as `NAME=value`.
    pub fn verify(&self, name: &str, value: &str) -> ConfigCheck {
        let found = self.value(name);
        let confirmed = match (value, found) {
            ("n", Some(ConfigValue::NotSet)) => true,
            ("n", _) => false,
            (wanted, Some(ConfigValue::Set(actual))) => actual == wanted,
            _ => false,
        };
        if confirmed {
            ConfigCheck::Confirmed
        } else {
            ConfigCheck::Mismatch {
                found: match found {
                    Some(ConfigValue::Set(v)) => format!("{}={}", option_name(name), v),
                    Some(ConfigValue::NotSet) => format!("{} is not set", option_name(name)),
                    None => format!("{} not present", option_name(name)),
                },
            }
        }
    }

    /// Options whose value differs between `self` (before) and `other` (after)
    pub fn diff(&self, other: &ConfigSnapshot) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        for (option, before) in &self.values {
            match other.values.get(option) {
                Some(after) if after == before => {}
                after => changes.push(ConfigChange {
                    option: option.clone(),
                    before: Some(before.clone()),
                    after: after.cloned(),
                }),
            }
        }
        for (option, after) in &other.values {
            if !self.values.contains_key(option) {
                changes.push(ConfigChange {
                    option: option.clone(),
                    before: None,
                    after: Some(after.clone()),
                });
            }
        }
        changes.sort_by(|a, b| a.option.cmp(&b.option));
        changes
    }
}

/// `NAME=value` applied to a configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Assignment {
    pub option: String,
    pub value: String,
}

impl Assignment {
    pub fn new(option: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", option_name(&self.option), self.value)
    }
}

/// One value to try for an option, with the settings it drags along
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OptionSetting {
    pub value: String,
    #[serde(default)]
    pub dependents: Vec<Assignment>,
}

impl OptionSetting {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            dependents: Vec::new(),
        }
    }
}

/// An option and the settings to build it with
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OptionExperiment {
    pub option: String,
    pub settings: Vec<OptionSetting>,
}

impl OptionExperiment {
    /// A boolean option built with `y` and then `n`
    pub fn yes_no(option: impl Into<String>) -> Self {
        Self {
            option: option.into(),
            settings: vec![OptionSetting::plain("y"), OptionSetting::plain("n")],
        }
    }
}

/// The option tables measured by the size suite
#[derive(Debug, Clone, Deserialize)]
pub struct OptionTables {
    #[serde(default)]
    pub yes_no: Vec<String>,
    #[serde(default)]
    pub valued: Vec<OptionExperiment>,
    #[serde(default)]
    pub test: Vec<OptionExperiment>,
    #[serde(default)]
    pub smallest: Vec<Assignment>,
}

impl OptionTables {
    /// The tables shipped with the crate
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(include_str!("size_options.toml"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Boolean options first, then the valued ones
    pub fn default_experiments(&self) -> Vec<OptionExperiment> {
        self.yes_no
            .iter()
            .map(OptionExperiment::yes_no)
            .chain(self.valued.iter().cloned())
            .collect()
    }
}

/// Parse a one-shot expression: `AIO`, `AIO=y|n`, `LOG_BUF_SHIFT=9|11|14`
pub fn parse_one_shot(expr: &str) -> Result<OptionExperiment> {
    let (name, values) = match expr.split_once('=') {
        Some((name, values)) => (name.trim(), values.trim()),
        None => (expr.trim(), "y|n"),
    };
    let name = short_name(name);
    if name.is_empty() {
        return Err(Error::Config(format!(
            "Missing option name in config expression '{expr}'"
        )));
    }
    let settings: Vec<OptionSetting> = values
        .split('|')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(OptionSetting::plain)
        .collect();
    if settings.is_empty() {
        return Err(Error::Config(format!(
            "No values to try in config expression '{expr}'"
        )));
    }
    Ok(OptionExperiment {
        option: name.to_string(),
        settings,
    })
}
