//! The environment descriptor: `envboot.yaml`.
//!
//! ```yaml
//! version: 1
//! vars:
//!   isaaclab_dir: ~/IsaacLab
//! environments:
//!   rl-lab:
//!     description: IsaacLab + Unitree RL Lab
//!     steps:
//!       - id: clone-isaaclab
//!         action: { kind: clone, repo: https://github.com/isaac-sim/IsaacLab.git, dest: "${isaaclab_dir}" }
//!       - id: install-isaaclab
//!         depends_on: [clone-isaaclab]
//!         requires: [bash]
//!         action: { kind: shell, cwd: "${isaaclab_dir}", run: ./isaaclab.sh --install all }
//!         check: { kind: command, run: "${isaaclab_dir}/isaaclab.sh -p -c 'import isaaclab'" }
//! ```
//!
//! Environments are kept in declaration order, and so are their steps.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::action::{ActionSpec, CheckSpec};
use crate::error::{ConfigError, Result};
use crate::paths;
use crate::vars::Vars;

pub const SUPPORTED_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// StepDef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Binaries that must be on PATH before the action may run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    pub action: ActionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<CheckSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<ActionSpec>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl StepDef {
    /// Copy of this step with `${var}` placeholders substituted in the
    /// action, check and rollback. Ids and dependency edges are left alone.
    pub fn interpolate(&self, vars: &Vars) -> Result<Self> {
        let mut out = self.clone();
        out.action = expand_spec(&self.action, vars)?;
        out.rollback = self
            .rollback
            .as_ref()
            .map(|r| expand_spec(r, vars))
            .transpose()?;
        out.check = self
            .check
            .as_ref()
            .map(|c| expand_spec(c, vars))
            .transpose()?;
        // Patterns are compiled from the expanded text.
        out.action.validate(&out.id)?;
        if let Some(rb) = &out.rollback {
            rb.validate(&out.id)?;
        }
        Ok(out)
    }
}

fn expand_spec<T>(spec: &T, vars: &Vars) -> Result<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let mut value = serde_yaml::to_value(spec)?;
    vars.expand_value(&mut value)?;
    Ok(serde_yaml::from_value(value)?)
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepDef>,
}

impl Environment {
    pub fn step(&self, id: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Check ids, uniqueness and that every dependency is declared earlier.
    pub fn validate(&self, name: &str) -> std::result::Result<(), ConfigError> {
        paths::validate_id(name)?;
        let all: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            paths::validate_id(&step.id)?;
            if seen.contains(step.id.as_str()) {
                return Err(ConfigError::DuplicateStep {
                    env: name.to_string(),
                    step: step.id.clone(),
                });
            }
            for dep in &step.depends_on {
                if !all.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        env: name.to_string(),
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if !seen.contains(dep.as_str()) {
                    return Err(ConfigError::ForwardDependency {
                        env: name.to_string(),
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            seen.insert(step.id.as_str());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default, with = "ordered_envs")]
    pub environments: Vec<(String, Environment)>,
}

fn default_version() -> u32 {
    SUPPORTED_VERSION
}

impl Descriptor {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::ManifestNotFound(path.to_path_buf()).into());
        }
        let data = std::fs::read_to_string(path)?;
        Self::parse(&data)
    }

    pub fn parse(data: &str) -> Result<Self> {
        let descriptor: Descriptor = serde_yaml::from_str(data)
            .map_err(|e| ConfigError::InvalidManifest(e.to_string()))?;
        if descriptor.version != SUPPORTED_VERSION {
            return Err(ConfigError::UnsupportedVersion(descriptor.version).into());
        }
        Ok(descriptor)
    }

    pub fn environment(&self, name: &str) -> std::result::Result<&Environment, ConfigError> {
        self.environments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
            .ok_or_else(|| ConfigError::UnknownEnvironment(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.environments.iter().map(|(n, _)| n.as_str())
    }

    /// Validate every environment, including that placeholders resolve.
    pub fn validate(&self, vars: &Vars) -> Result<()> {
        for (name, env) in &self.environments {
            env.validate(name)?;
            for step in &env.steps {
                step.interpolate(vars)?;
            }
        }
        Ok(())
    }
}

/// `environments:` is a YAML mapping, but declaration order matters for
/// listing, so it is held as an ordered list of pairs.
mod ordered_envs {
    use super::Environment;
    use serde::de::{Deserializer, MapAccess, Visitor};
    use serde::ser::{SerializeMap, Serializer};
    use std::fmt;

    pub fn serialize<S>(envs: &[(String, Environment)], s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = s.serialize_map(Some(envs.len()))?;
        for (name, env) in envs {
            map.serialize_entry(name, env)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Vec<(String, Environment)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EnvsVisitor;

        impl<'de> Visitor<'de> for EnvsVisitor {
            type Value = Vec<(String, Environment)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of environment name to environment")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut out: Vec<(String, Environment)> = Vec::new();
                while let Some((name, env)) = access.next_entry::<String, Environment>()? {
                    if out.iter().any(|(n, _)| *n == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate environment: {name}"
                        )));
                    }
                    out.push((name, env));
                }
                Ok(out)
            }
        }

        d.deserialize_map(EnvsVisitor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
