use crate::cmd::Session;
use crate::output::{print_json, print_table};

pub fn run(session: &Session) -> anyhow::Result<()> {
    let orchestrator = session.orchestrator()?;
    let envs = orchestrator.environments();

    if session.json {
        return print_json(&envs);
    }

    if envs.is_empty() {
        println!("No environments defined in {}.", session.manifest_path().display());
        return Ok(());
    }

    let rows = envs
        .into_iter()
        .map(|e| {
            vec![
                e.name,
                e.steps.to_string(),
                e.description.unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["ENVIRONMENT", "STEPS", "DESCRIPTION"], rows);
    Ok(())
}
