//! `${name}` interpolation for descriptor strings.
//!
//! Values come from three layers, later layers winning:
//! 1. `vars:` in the manifest
//! 2. process environment `ENVBOOT_<NAME>` (name upper-cased, `-` → `_`)
//! 3. explicit `--set NAME=VALUE` overrides
//!
//! `${root}` is always defined as the project root. `$${name}` is left in
//! place as a literal `${name}`, for shell variables inside `run` scripts.

use crate::error::ConfigError;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

pub const ENV_PREFIX: &str = "ENVBOOT_";

static VAR_RE: OnceLock<Regex> = OnceLock::new();

fn var_re() -> &'static Regex {
    VAR_RE.get_or_init(|| Regex::new(r"\$(\$?)\{([A-Za-z_][A-Za-z0-9_\-]*)\}").expect("static regex"))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    /// Layer manifest vars, `ENVBOOT_*` environment and overrides on top of each other.
    pub fn resolve(
        manifest: &BTreeMap<String, String>,
        overrides: &[(String, String)],
        root: &Path,
    ) -> Self {
        Self::resolve_with(manifest, overrides, root, |key| std::env::var(key).ok())
    }

    /// Like [`Vars::resolve`] with an injectable environment lookup.
    pub fn resolve_with(
        manifest: &BTreeMap<String, String>,
        overrides: &[(String, String)],
        root: &Path,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut values = manifest.clone();
        for (name, value) in values.iter_mut() {
            if let Some(from_env) = lookup_env(&env_key(name)) {
                *value = from_env;
            }
        }
        for (name, value) in overrides {
            values.insert(name.clone(), value.clone());
        }
        values.insert("root".to_string(), root.display().to_string());
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitute every `${name}` in `input`. Values are not re-expanded.
    pub fn expand(&self, input: &str) -> Result<String, ConfigError> {
        let mut missing = None;
        let out = var_re().replace_all(input, |caps: &Captures| {
            let name = &caps[2];
            if !caps[1].is_empty() {
                return format!("${{{name}}}");
            }
            match self.values.get(name) {
                Some(v) => v.clone(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });
        match missing {
            Some(name) => Err(ConfigError::UnknownVariable(name)),
            None => Ok(out.into_owned()),
        }
    }

    /// Expand every string leaf of a YAML tree in place.
    pub fn expand_value(&self, value: &mut serde_yaml::Value) -> Result<(), ConfigError> {
        match value {
            serde_yaml::Value::String(s) => {
                *s = self.expand(s)?;
            }
            serde_yaml::Value::Sequence(items) => {
                for item in items {
                    self.expand_value(item)?;
                }
            }
            serde_yaml::Value::Mapping(map) => {
                for (_, v) in map.iter_mut() {
                    self.expand_value(v)?;
                }
            }
            serde_yaml::Value::Tagged(tagged) => self.expand_value(&mut tagged.value)?,
            _ => {}
        }
        Ok(())
    }
}

/// Parse a `KEY=VALUE` command-line assignment.
pub fn parse_assignment(raw: &str) -> Result<(String, String), ConfigError> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(ConfigError::InvalidAssignment(raw.to_string())),
    }
}

fn env_key(name: &str) -> String {
    format!("{ENV_PREFIX}{}", name.to_uppercase().replace('-', "_"))
}
