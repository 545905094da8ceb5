use crate::cmd::Session;
use crate::output::print_json;

pub fn run(session: &Session) -> anyhow::Result<()> {
    let orchestrator = session.orchestrator()?;
    orchestrator.validate()?;

    let envs = orchestrator.environments();
    if session.json {
        #[derive(serde::Serialize)]
        struct ValidateOutput {
            valid: bool,
            environments: usize,
            steps: usize,
        }
        return print_json(&ValidateOutput {
            valid: true,
            environments: envs.len(),
            steps: envs.iter().map(|e| e.steps).sum(),
        });
    }

    println!(
        "{} is valid ({} environment(s)).",
        session.manifest_path().display(),
        envs.len()
    );
    Ok(())
}
