use stable_core::App;
use time::{OffsetDateTime, UtcOffset};

use super::{CommandResult, Session, with_session};
use crate::output;

pub fn run() -> CommandResult {
    with_session(|session| {
        let apps = list_apps(session)?;
        if apps.is_empty() {
            output::muted("No apps registered.");
            return Ok(());
        }

        let rows: Vec<Vec<String>> = apps.iter().map(row).collect();
        output::table(&["APP", "DOMAIN", "PORT", "RUBY", "STATUS"], &rows);
        Ok(())
    })
}

/// Every registered app, after clearing process state the OS no longer backs.
pub fn list_apps(session: &Session<'_>) -> CommandResult<Vec<App>> {
    let healed = session.processes().validate_statuses()?;
    if !healed.is_empty() {
        tracing::info!(apps = ?healed, "cleared stale process state");
    }
    Ok(session.registry.all()?)
}

fn row(app: &App) -> Vec<String> {
    vec![
        app.name.clone(),
        app.domain.clone(),
        app.port.to_string(),
        app.runtime_version.clone().unwrap_or_else(|| "-".to_string()),
        status(app),
    ]
}

fn status(app: &App) -> String {
    let (Some(pid), Some(started_at)) = (app.pid(), app.started_at()) else {
        return output::brand_muted("stopped").to_string();
    };
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let label = match format_started(started_at, offset) {
        Some(since) => format!("running (pid {pid}, since {since})"),
        None => format!("running (pid {pid})"),
    };
    output::brand_success(label).to_string()
}

fn format_started(unix_secs: i64, offset: UtcOffset) -> Option<String> {
    let dt = OffsetDateTime::from_unix_timestamp(unix_secs)
        .ok()?
        .to_offset(offset);
    Some(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        dt.year(),
        dt.month() as u8,
        dt.day(),
        dt.hour(),
        dt.minute()
    ))
}
