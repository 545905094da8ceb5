use crate::cmd::Session;
use crate::output::{print_json, print_table};

pub fn run(session: &Session, env: &str, only: Option<Vec<String>>) -> anyhow::Result<()> {
    let orchestrator = session.orchestrator()?;
    let planned = orchestrator.plan(env, only.as_deref())?;

    if session.json {
        return print_json(&planned);
    }

    let rows = planned
        .into_iter()
        .map(|p| {
            let action = if p.enabled {
                p.action
            } else {
                format!("{} (disabled)", p.action)
            };
            vec![
                p.position.to_string(),
                p.id,
                p.depends_on.join(","),
                action,
            ]
        })
        .collect();
    print_table(&["#", "STEP", "DEPENDS ON", "ACTION"], rows);
    Ok(())
}
