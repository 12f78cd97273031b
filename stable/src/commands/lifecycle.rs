use stable_core::App;

use super::{CommandResult, Session, app_url, with_session};
use crate::output;
use crate::process::StopOutcome;
use crate::proxy::{ProxyManager, Scheme};

/// Result of [`start_app`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub pid: u32,
    pub already_running: bool,
    pub url: String,
}

pub fn start(name: &str) -> CommandResult {
    with_session(|session| {
        output::step(&format!("Starting {name}..."));
        report_started(name, &start_app(session, name)?);
        Ok(())
    })
}

pub fn stop(name: &str) -> CommandResult {
    with_session(|session| {
        let outcome = stop_app(session, name)?;
        if outcome.was_running() {
            output::success(&format!("Stopped {name}"));
        } else {
            output::muted(&format!("{name} was not running"));
        }
        Ok(())
    })
}

pub fn restart(name: &str) -> CommandResult {
    with_session(|session| {
        output::step(&format!("Restarting {name}..."));
        report_started(name, &restart_app(session, name)?);
        Ok(())
    })
}

fn report_started(name: &str, started: &Started) {
    if started.already_running {
        output::muted(&format!(
            "{name} is already running at {} (pid {})",
            started.url, started.pid
        ));
    } else {
        output::success(&format!(
            "{name} is running at {} (pid {})",
            started.url, started.pid
        ));
    }
}

/// Launch the app unless it is already being served, then route it through the
/// proxy. An app routed over plain HTTP stays that way.
pub fn start_app(session: &Session<'_>, name: &str) -> CommandResult<Started> {
    let app = session.registry.get(name)?;
    let processes = session.processes();
    let proxy = session.proxy();
    let tls = !serves_plain_http(&proxy, &app)?;

    if let Some(state) = processes.running_state(&app)? {
        return Ok(Started {
            pid: state.pid(),
            already_running: true,
            url: app_url(&app.domain, tls),
        });
    }

    let pid = processes.start(&app)?;
    proxy.add(&app.name, !tls)?;
    Ok(Started {
        pid,
        already_running: false,
        url: app_url(&app.domain, tls),
    })
}

pub fn stop_app(session: &Session<'_>, name: &str) -> CommandResult<StopOutcome> {
    let app = session.registry.get(name)?;
    Ok(session.processes().stop(&app)?)
}

/// Stop, wait for the port to be released, start again.
pub fn restart_app(session: &Session<'_>, name: &str) -> CommandResult<Started> {
    let app = session.registry.get(name)?;
    let processes = session.processes();
    processes.stop(&app)?;
    if !processes.wait_for_port_release(app.port, session.ctx.config.apps.start_timeout()) {
        return Err(format!(
            "Port {} is still in use after stopping {}",
            app.port, app.name
        )
        .into());
    }
    start_app(session, name)
}

fn serves_plain_http(proxy: &ProxyManager<'_>, app: &App) -> CommandResult<bool> {
    Ok(proxy
        .load()?
        .find(&app.domain)
        .is_some_and(|block| block.scheme == Scheme::Http))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::commands::add::{AddOptions, add_app};
    use crate::commands::testing::Harness;
    use crate::process::ProcessError;
    use stable_core::AppUpdate;

    fn added(h: &Harness, skip_tls: bool) -> Session<'_> {
        let session = h.session();
        let options = AddOptions {
            skip_tls,
            ..AddOptions::default()
        };
        add_app(&session, &h.project("blog"), &options).unwrap();
        session
    }

    #[test]
    fn already_running_app_is_reported_not_relaunched() {
        let h = Harness::new();
        let session = added(&h, false);
        h.probe.spawn(77);
        session
            .registry
            .update("blog", AppUpdate::running(77, 1))
            .unwrap();

        let started = start_app(&session, "blog").unwrap();
        assert_eq!(
            started,
            Started {
                pid: 77,
                already_running: true,
                url: "https://blog.test".to_string(),
            }
        );
        assert!(!h.work.path().join("blog/log/stable.log").exists());
    }

    #[test]
    fn start_keeps_plain_http_routing() {
        let h = Harness::new();
        let session = added(&h, true);
        h.probe.listen_after(3000, 500, 1);

        let started = start_app(&session, "blog").unwrap();
        assert_eq!(started.url, "http://blog.test");
        assert!(h.caddyfile().starts_with("http://blog.test {"));
        assert!(h.issuer.issued.borrow().is_empty());
    }

    #[test]
    fn failed_start_leaves_app_stopped() {
        let h = Harness::new();
        let session = added(&h, false);

        let err = start_app(&session, "blog").unwrap_err();
        assert!(err.downcast_ref::<ProcessError>().is_some(), "{err}");
        assert!(!session.registry.get("blog").unwrap().is_running());
    }

    #[test]
    fn restart_signals_then_relaunches() {
        let h = Harness::new();
        let session = added(&h, false);
        h.probe.listen(3000, 600);
        session
            .registry
            .update("blog", AppUpdate::running(600, 1))
            .unwrap();
        h.probe.listen_after(3000, 601, 2);

        let started = restart_app(&session, "blog").unwrap();
        assert_eq!(*h.probe.terminated.borrow(), vec![600]);
        assert_eq!(started.pid, 601);
        assert!(!started.already_running);
        assert_eq!(session.registry.get("blog").unwrap().pid(), Some(601));
    }
}
