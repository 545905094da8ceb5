use crate::cmd::Session;
use crate::output::print_json;

pub fn run(session: &Session, env: &str, only: Option<Vec<String>>) -> anyhow::Result<()> {
    let orchestrator = session.orchestrator()?;
    let cleared = orchestrator.reset(env, only.as_deref())?;

    if session.json {
        #[derive(serde::Serialize)]
        struct ResetOutput<'a> {
            environment: &'a str,
            cleared: &'a [String],
        }
        return print_json(&ResetOutput {
            environment: env,
            cleared: &cleared,
        });
    }

    if cleared.is_empty() {
        println!("Nothing recorded for '{env}'.");
    } else {
        println!("Cleared {} step(s) in '{env}': {}", cleared.len(), cleared.join(", "));
    }
    Ok(())
}
