//! Bootstrap orchestrator.
//!
//! Runs one environment's steps in dependency order, one at a time, with the
//! run record saved after every step. A step is recorded only once its
//! outcome is known, so an interrupted action leaves the step `pending` and
//! the next run picks it up again.
//!
//! Configuration problems (unknown names, bad dependency edges, undefined
//! variables) are reported before the lock is taken or any step runs. A
//! failing action halts the run and comes back as a [`RunReport`], not an
//! `Err`; the caller decides whether that is fatal.

pub mod plan;
pub mod report;

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::action::ExecContext;
use crate::descriptor::{Descriptor, Environment, StepDef};
use crate::error::{BootError, ConfigError, Result};
use crate::lock::EnvLock;
use crate::paths;
use crate::process;
use crate::record::{RecordStore, RunRecord, StepStatus};
use crate::vars::Vars;

pub use report::{
    Disposition, EnvironmentSummary, PlannedStep, RunOutcome, RunReport, StepReport, StepView,
};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore recorded success and idempotency checks; run every action.
    pub force: bool,
    /// Report what would happen without executing or recording anything.
    pub dry_run: bool,
    /// Restrict the run to these step ids.
    pub only: Option<Vec<String>>,
}

/// A step resolved for execution: interpolated, with its plan position.
struct Scheduled {
    step: StepDef,
    position: usize,
}

/// Why a step did not succeed.
struct StepFailure {
    error: BootError,
    executed: bool,
}

enum Attempt {
    Satisfied,
    Executed,
}

pub struct Orchestrator {
    descriptor: Descriptor,
    store: Box<dyn RecordStore>,
    ctx: ExecContext,
    vars: Vars,
    locks_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(
        descriptor: Descriptor,
        store: Box<dyn RecordStore>,
        ctx: ExecContext,
        vars: Vars,
    ) -> Self {
        let locks_dir = Some(paths::locks_dir(&ctx.root));
        Self {
            descriptor,
            store,
            ctx,
            vars,
            locks_dir,
        }
    }

    /// Skip the per-environment lock file (single-process embedding, tests).
    pub fn without_locking(mut self) -> Self {
        self.locks_dir = None;
        self
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn environments(&self) -> Vec<EnvironmentSummary> {
        self.descriptor
            .environments
            .iter()
            .map(|(name, env)| EnvironmentSummary {
                name: name.clone(),
                description: env.description.clone(),
                steps: env.steps.len(),
            })
            .collect()
    }

    /// Validate the whole descriptor, including variable references.
    pub fn validate(&self) -> Result<()> {
        self.descriptor.validate(&self.vars)
    }

    pub fn plan(&self, env: &str, only: Option<&[String]>) -> Result<Vec<PlannedStep>> {
        let scheduled = self.schedule(env, only)?;
        Ok(scheduled
            .iter()
            .map(|s| PlannedStep {
                id: s.step.id.clone(),
                position: s.position,
                action: s.step.action.as_action().describe(),
                depends_on: s.step.depends_on.clone(),
                enabled: s.step.enabled,
            })
            .collect())
    }

    pub fn run(&self, env: &str, opts: &RunOptions) -> Result<RunReport> {
        let scheduled = self.schedule(env, opts.only.as_deref())?;

        let _lock = match (&self.locks_dir, opts.dry_run) {
            (Some(dir), false) => Some(EnvLock::acquire(dir, env)?),
            _ => None,
        };

        let mut record = self.store.load(env)?;
        if opts.only.is_some() {
            self.check_out_of_scope(env, &scheduled, &record)?;
        }

        info!(env, steps = scheduled.len(), force = opts.force, dry_run = opts.dry_run, "run started");

        let mut steps = Vec::with_capacity(scheduled.len());
        let mut outcome = RunOutcome::Completed;
        let mut remaining = scheduled.iter();

        for s in remaining.by_ref() {
            let id = s.step.id.as_str();
            let action = s.step.action.as_action().describe();
            let report = |disposition| StepReport {
                id: id.to_string(),
                position: s.position,
                action: action.clone(),
                disposition,
            };

            if !opts.force && record.status_of(id) == StepStatus::Succeeded {
                info!(env, step = id, "already succeeded, skipping");
                steps.push(report(Disposition::AlreadySucceeded));
                continue;
            }

            if !s.step.enabled {
                info!(env, step = id, "disabled");
                if !opts.dry_run {
                    record.mark(id, StepStatus::Skipped, None, false);
                    self.store.save(&record)?;
                }
                steps.push(report(Disposition::Disabled));
                continue;
            }

            if opts.dry_run {
                let satisfied = if opts.force {
                    Ok(false)
                } else {
                    self.is_satisfied(&s.step)
                };
                match satisfied {
                    Ok(true) => steps.push(report(Disposition::Satisfied)),
                    Ok(false) => steps.push(report(Disposition::WouldExecute)),
                    Err(e) => {
                        // The real run would fail here before executing anything.
                        let cause = e.to_string();
                        warn!(env, step = id, %cause, "check failed during dry run");
                        steps.push(report(Disposition::Failed {
                            error: cause.clone(),
                            rollback_error: None,
                        }));
                        outcome = RunOutcome::Failed {
                            step: id.to_string(),
                            position: s.position,
                            cause,
                        };
                        break;
                    }
                }
                continue;
            }

            match self.attempt(&s.step, opts.force) {
                Ok(Attempt::Satisfied) => {
                    info!(env, step = id, "effect already present");
                    record.mark(id, StepStatus::Succeeded, None, false);
                    self.store.save(&record)?;
                    steps.push(report(Disposition::Satisfied));
                }
                Ok(Attempt::Executed) => {
                    info!(env, step = id, "succeeded");
                    record.mark(id, StepStatus::Succeeded, None, true);
                    self.store.save(&record)?;
                    steps.push(report(Disposition::Executed));
                }
                Err(failure) => {
                    let cause = failure.error.to_string();
                    warn!(env, step = id, position = s.position, %cause, "step failed");
                    record.mark(id, StepStatus::Failed, Some(cause.clone()), failure.executed);
                    self.store.save(&record)?;

                    let rollback_error = if failure.executed {
                        self.rollback(&s.step)
                    } else {
                        None
                    };
                    steps.push(report(Disposition::Failed {
                        error: cause.clone(),
                        rollback_error,
                    }));
                    outcome = RunOutcome::Failed {
                        step: id.to_string(),
                        position: s.position,
                        cause,
                    };
                    break;
                }
            }
        }

        for s in remaining {
            steps.push(StepReport {
                id: s.step.id.clone(),
                position: s.position,
                action: s.step.action.as_action().describe(),
                disposition: Disposition::NotReached,
            });
        }

        info!(env, ok = matches!(outcome, RunOutcome::Completed), "run finished");
        Ok(RunReport {
            environment: env.to_string(),
            dry_run: opts.dry_run,
            steps,
            outcome,
        })
    }

    pub fn status(&self, env: &str) -> Result<Vec<StepView>> {
        let definition = self.environment(env)?;
        let order = plan::execution_order(env, &definition.steps)?;
        let record = self.store.load(env)?;
        Ok(order
            .iter()
            .enumerate()
            .map(|(pos, &i)| {
                let step = &definition.steps[i];
                let entry = record.entry(&step.id);
                StepView {
                    id: step.id.clone(),
                    position: pos + 1,
                    status: record.status_of(&step.id),
                    timestamp: entry.map(|e| e.timestamp),
                    last_error: entry.and_then(|e| e.last_error.clone()),
                    attempts: entry.map(|e| e.attempts).unwrap_or(0),
                    enabled: step.enabled,
                }
            })
            .collect())
    }

    /// Forget recorded outcomes. External effects are left as they are.
    pub fn reset(&self, env: &str, ids: Option<&[String]>) -> Result<Vec<String>> {
        let definition = self.environment(env)?;
        if let Some(ids) = ids {
            for id in ids {
                if definition.step(id).is_none() {
                    return Err(ConfigError::UnknownStep {
                        env: env.to_string(),
                        step: id.clone(),
                    }
                    .into());
                }
            }
        }

        let _lock = match &self.locks_dir {
            Some(dir) => Some(EnvLock::acquire(dir, env)?),
            None => None,
        };

        let mut record = self.store.load(env)?;
        let targets: Vec<String> = match ids {
            Some(ids) => ids.to_vec(),
            None => record.steps.keys().cloned().collect(),
        };
        let removed = record.clear(targets.iter().map(String::as_str));
        if !removed.is_empty() {
            self.store.save(&record)?;
        }
        info!(env, cleared = removed.len(), "reset");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn environment(&self, env: &str) -> Result<&Environment> {
        let definition = self.descriptor.environment(env)?;
        definition.validate(env)?;
        Ok(definition)
    }

    /// Validate, order, scope and interpolate. Touches nothing on disk.
    fn schedule(&self, env: &str, only: Option<&[String]>) -> Result<Vec<Scheduled>> {
        let definition = self.environment(env)?;
        let order = plan::execution_order(env, &definition.steps)?;

        let scope: Option<HashSet<&str>> = match only {
            Some(ids) => {
                for id in ids {
                    if definition.step(id).is_none() {
                        return Err(ConfigError::UnknownStep {
                            env: env.to_string(),
                            step: id.clone(),
                        }
                        .into());
                    }
                }
                Some(ids.iter().map(String::as_str).collect())
            }
            None => None,
        };

        let mut scheduled = Vec::new();
        for (pos, &i) in order.iter().enumerate() {
            let step = &definition.steps[i];
            if scope.as_ref().is_some_and(|s| !s.contains(step.id.as_str())) {
                continue;
            }
            scheduled.push(Scheduled {
                step: step.interpolate(&self.vars)?,
                position: pos + 1,
            });
        }
        Ok(scheduled)
    }

    /// With `--steps`, dependencies left out of the selection must already be done.
    fn check_out_of_scope(
        &self,
        env: &str,
        scheduled: &[Scheduled],
        record: &RunRecord,
    ) -> Result<()> {
        let definition = self.descriptor.environment(env)?;
        let in_scope: HashSet<&str> = scheduled.iter().map(|s| s.step.id.as_str()).collect();
        for s in scheduled {
            for dep in &s.step.depends_on {
                if in_scope.contains(dep.as_str()) {
                    continue;
                }
                let disabled = definition.step(dep).is_some_and(|d| !d.enabled);
                if !disabled && !record.status_of(dep).is_done() {
                    return Err(ConfigError::UnsatisfiedDependency {
                        step: s.step.id.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn is_satisfied(&self, step: &StepDef) -> Result<bool> {
        match &step.check {
            Some(check) => check.evaluate(&self.ctx),
            None => step.action.as_action().is_satisfied(&self.ctx),
        }
    }

    fn attempt(&self, step: &StepDef, force: bool) -> std::result::Result<Attempt, StepFailure> {
        let not_run = |error| StepFailure {
            error,
            executed: false,
        };

        if !force && self.is_satisfied(step).map_err(not_run)? {
            return Ok(Attempt::Satisfied);
        }
        for bin in &step.requires {
            process::require_binary(bin).map_err(not_run)?;
        }

        info!(step = %step.id, action = %step.action.as_action().describe(), "executing");
        step.action
            .as_action()
            .execute(&self.ctx)
            .map_err(|error| StepFailure {
                error,
                executed: true,
            })?;
        Ok(Attempt::Executed)
    }

    /// Best effort: a failing rollback is logged and returned, never raised.
    fn rollback(&self, step: &StepDef) -> Option<String> {
        let rollback = step.rollback.as_ref()?;
        info!(step = %step.id, action = %rollback.as_action().describe(), "rolling back");
        match rollback.as_action().execute(&self.ctx) {
            Ok(()) => None,
            Err(e) => {
                let err = BootError::Rollback {
                    step: step.id.clone(),
                    cause: e.to_string(),
                };
                warn!("{err}");
                Some(err.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
