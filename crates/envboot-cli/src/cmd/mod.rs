pub mod list;
pub mod plan;
pub mod reset;
pub mod run;
pub mod status;
pub mod validate;

use anyhow::Context;
use envboot_core::{
    action::ExecContext,
    descriptor::Descriptor,
    orchestrator::Orchestrator,
    paths,
    record::FileRecordStore,
    vars::{parse_assignment, Vars},
};
use std::path::{Path, PathBuf};

/// Global options every subcommand needs to build an orchestrator.
pub struct Session<'a> {
    pub root: &'a Path,
    pub manifest: Option<&'a Path>,
    pub assignments: &'a [String],
    pub json: bool,
}

impl Session<'_> {
    pub fn manifest_path(&self) -> PathBuf {
        match self.manifest {
            Some(p) if p.is_absolute() => p.to_path_buf(),
            Some(p) => self.root.join(p),
            None => paths::manifest_path(self.root),
        }
    }

    pub fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let path = self.manifest_path();
        let descriptor = Descriptor::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?;

        let overrides = self
            .assignments
            .iter()
            .map(|raw| parse_assignment(raw).map_err(envboot_core::BootError::from))
            .collect::<Result<Vec<_>, _>>()?;
        let vars = Vars::resolve(&descriptor.vars, &overrides, self.root);

        Ok(Orchestrator::new(
            descriptor,
            Box::new(FileRecordStore::for_root(self.root)),
            ExecContext::new(self.root),
            vars,
        ))
    }
}

/// An empty `--steps` list means every step.
pub fn step_selection(steps: &[String]) -> Option<Vec<String>> {
    if steps.is_empty() {
        None
    } else {
        Some(steps.to_vec())
    }
}
