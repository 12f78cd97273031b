use stable_core::{App, AppUpdate};

use super::{CommandResult, Session, with_session};
use crate::output;
use crate::runtime::{VersionManager, write_runtime_version};

pub fn run(name: &str, version: &str) -> CommandResult {
    with_session(|session| {
        session.registry.get(name)?;
        if session.runtime != VersionManager::None && !session.runtime.has_version(version) {
            output::warning(&format!(
                "Ruby {version} is not installed under {}",
                session.runtime.name()
            ));
        }
        let app = set_runtime(session, name, version)?;
        output::success(&format!("{} now runs on Ruby {version}", app.name));
        if app.is_running() {
            output::muted(&format!("Run `stable restart {}` to apply it", app.name));
        }
        Ok(())
    })
}

/// Record `version` for the app and pin its project with `.ruby-version`.
pub fn set_runtime(session: &Session<'_>, name: &str, version: &str) -> CommandResult<App> {
    let version = version.trim();
    if version.is_empty() {
        return Err("Ruby version cannot be empty".into());
    }
    let app = session.registry.get(name)?;
    write_runtime_version(&app.path, version)
        .map_err(|e| format!("Failed to write .ruby-version in {}: {e}", app.path.display()))?;
    session
        .registry
        .update(&app.name, AppUpdate::runtime_version(Some(version.to_string())))?;
    Ok(session.registry.get(&app.name)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::Harness;

    #[test]
    fn records_version_and_pins_project() {
        let h = Harness::new();
        let session = h.session();
        let path = h.project("blog");
        session.registry.add(&App::new("blog", &path, 3000)).unwrap();

        let app = set_runtime(&session, "blog", " 3.3.1 ").unwrap();
        assert_eq!(app.runtime_version.as_deref(), Some("3.3.1"));
        assert_eq!(
            std::fs::read_to_string(path.join(".ruby-version")).unwrap(),
            "3.3.1\n"
        );
    }

    #[test]
    fn rejects_blank_version() {
        let h = Harness::new();
        assert!(set_runtime(&h.session(), "blog", "  ").is_err());
    }
}
