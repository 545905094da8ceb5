use crate::cmd::Session;
use crate::output::{print_json, print_table, truncate};

pub fn run(session: &Session, env: &str) -> anyhow::Result<()> {
    let orchestrator = session.orchestrator()?;
    let views = orchestrator.status(env)?;

    if session.json {
        return print_json(&views);
    }

    if views.is_empty() {
        println!("Environment '{env}' has no steps.");
        return Ok(());
    }

    let rows = views
        .iter()
        .map(|v| {
            let status = if v.enabled {
                v.status.to_string()
            } else {
                format!("{} (disabled)", v.status)
            };
            vec![
                v.position.to_string(),
                v.id.clone(),
                status,
                v.attempts.to_string(),
                v.timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string()),
                v.last_error
                    .as_deref()
                    .map(|e| truncate(e, 60))
                    .unwrap_or_default(),
            ]
        })
        .collect();
    print_table(&["#", "STEP", "STATUS", "ATTEMPTS", "UPDATED", "ERROR"], rows);
    Ok(())
}
