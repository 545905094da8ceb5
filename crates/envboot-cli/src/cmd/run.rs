use crate::cmd::Session;
use crate::output::print_json;
use envboot_core::orchestrator::{Disposition, RunOptions, RunOutcome, RunReport};

pub fn run(session: &Session, env: &str, opts: RunOptions) -> anyhow::Result<()> {
    let orchestrator = session.orchestrator()?;
    let report = orchestrator.run(env, &opts)?;

    if session.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }

    match report.failure() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn print_report(report: &RunReport) {
    let total = report.steps.len();
    for step in &report.steps {
        println!(
            "[{}/{}] {:<24} {:<16} {}",
            step.position,
            total,
            step.id,
            step.disposition.label(),
            step.action
        );
        if let Disposition::Failed {
            rollback_error: Some(rb),
            ..
        } = &step.disposition
        {
            println!("        {rb}");
        }
    }

    match &report.outcome {
        RunOutcome::Completed if report.dry_run => {
            println!("\nDry run of '{}': nothing executed.", report.environment);
        }
        RunOutcome::Completed => {
            let ran = report.executed().len();
            println!(
                "\nEnvironment '{}' is ready ({ran} step(s) executed).",
                report.environment
            );
        }
        RunOutcome::Failed { step, .. } => {
            println!(
                "\nEnvironment '{}' halted at '{step}'. Fix the cause and re-run to resume.",
                report.environment
            );
        }
    }
}
