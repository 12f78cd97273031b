use super::{CommandResult, Session, with_session};
use crate::output;
use crate::tools::{self, install_hint};

/// One line of the doctor report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub label: String,
    pub ok: bool,
    pub detail: String,
}

impl Check {
    fn new(label: impl Into<String>, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    pub checks: Vec<Check>,
    /// Apps whose stale process state was cleared
    pub healed: Vec<String>,
    /// Apps missing a hosts alias or a proxy route
    pub drift: Vec<Check>,
    pub app_count: usize,
}

pub fn run() -> CommandResult {
    with_session(|session| {
        let report = diagnose(session)?;

        output::section("Tools");
        for check in &report.checks {
            let line = format!("{}: {}", check.label, check.detail);
            if check.ok {
                output::success(&line);
            } else {
                output::warning(&line);
            }
        }

        output::section("Registry");
        output::muted(&format!("{} app(s) registered", report.app_count));
        for check in &report.drift {
            output::warning(&format!("{}: {}", check.label, check.detail));
        }
        if report.healed.is_empty() {
            output::success("No stale process state");
        } else {
            output::warning(&format!(
                "Cleared stale process state for {}",
                report.healed.join(", ")
            ));
        }
        Ok(())
    })
}

/// Inspect tools, daemon and directories, and heal stale registry entries.
pub fn diagnose(session: &Session<'_>) -> CommandResult<Report> {
    let config = &session.ctx.config;
    let paths = &session.ctx.paths;
    let mut checks = Vec::new();

    checks.push(tool_check(&config.proxy.binary, session.proxy_tool.available()));
    checks.push(tool_check(&config.certs.binary, session.issuer.available()));
    checks.push(tool_check(
        &config.hosts.elevate_with,
        tools::which(&config.hosts.elevate_with).is_some(),
    ));
    if !cfg!(target_os = "linux") {
        checks.push(tool_check(
            &config.system.lsof,
            tools::which(&config.system.lsof).is_some(),
        ));
    }
    checks.push(Check::new(
        "ruby version manager",
        true,
        session.runtime.name(),
    ));

    let proxy = session.proxy();
    checks.push(if proxy.is_running() {
        Check::new(
            "caddy daemon",
            true,
            format!("running (admin port {})", config.proxy.admin_port),
        )
    } else {
        Check::new("caddy daemon", false, "not running; run `stable setup`")
    });

    for (label, dir) in [("home", paths.root().to_path_buf()), ("certs", paths.certs_dir())] {
        checks.push(Check::new(
            label,
            dir.is_dir(),
            if dir.is_dir() {
                dir.display().to_string()
            } else {
                format!("{} is missing; run `stable setup`", dir.display())
            },
        ));
    }
    checks.push(Check::new(
        "hosts file",
        config.hosts.file.is_file(),
        config.hosts.file.display().to_string(),
    ));

    let healed = session.processes().validate_statuses()?;
    let apps = session.registry.all()?;
    let caddyfile = proxy.load()?;
    let hosts = session.hosts();
    let mut drift = Vec::new();
    for app in &apps {
        let mut missing = Vec::new();
        if !hosts.contains(&app.domain)? {
            missing.push("hosts alias");
        }
        if !caddyfile.contains(&app.domain) {
            missing.push("proxy route");
        }
        if !missing.is_empty() {
            drift.push(Check::new(
                app.name.clone(),
                false,
                format!(
                    "{} has no {}; run `stable add {}`",
                    app.domain,
                    missing.join(" or "),
                    app.path.display()
                ),
            ));
        }
    }

    Ok(Report {
        checks,
        healed,
        drift,
        app_count: apps.len(),
    })
}

fn tool_check(binary: &str, found: bool) -> Check {
    if found {
        let location = tools::which(binary)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "found".to_string());
        Check::new(binary, true, location)
    } else {
        Check::new(binary, false, format!("not found. {}", install_hint(binary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::add::{AddOptions, add_app};
    use crate::commands::testing::Harness;
    use stable_core::{App, AppUpdate};

    fn check<'r>(report: &'r Report, label: &str) -> &'r Check {
        report
            .checks
            .iter()
            .find(|c| c.label == label)
            .unwrap_or_else(|| panic!("no {label} check"))
    }

    #[test]
    fn reports_missing_tools_with_hints() {
        let h = Harness::new();
        h.proxy_tool.installed.set(false);
        h.issuer.installed.set(false);

        let report = diagnose(&h.session()).unwrap();
        let caddy = check(&report, "caddy");
        assert!(!caddy.ok);
        assert!(caddy.detail.contains("caddyserver.com"));
        assert!(!check(&report, "mkcert").ok);
        assert!(!check(&report, "caddy daemon").ok);
        assert!(check(&report, "home").ok);
        assert!(!check(&report, "certs").ok);
        assert!(check(&report, "hosts file").ok);
    }

    #[test]
    fn reports_running_daemon() {
        let h = Harness::new();
        h.probe.open_port(2019);
        let report = diagnose(&h.session()).unwrap();
        assert!(check(&report, "caddy daemon").ok);
    }

    #[test]
    fn heals_stale_entries() {
        let h = Harness::new();
        let session = h.session();
        session
            .registry
            .add(&App::new("blog", h.project("blog"), 3000))
            .unwrap();
        session.registry.update("blog", AppUpdate::running(5, 1)).unwrap();

        let report = diagnose(&session).unwrap();
        assert_eq!(report.healed, vec!["blog".to_string()]);
        assert_eq!(report.app_count, 1);
        assert!(!session.registry.get("blog").unwrap().is_running());
    }

    #[test]
    fn reports_apps_missing_routes() {
        let h = Harness::new();
        let session = h.session();
        add_app(&session, &h.project("blog"), &AddOptions::default()).unwrap();
        session
            .registry
            .add(&App::new("shop", h.project("shop"), 3001))
            .unwrap();

        let report = diagnose(&session).unwrap();
        assert_eq!(report.drift.len(), 1);
        assert_eq!(report.drift[0].label, "shop");
        assert!(
            report.drift[0]
                .detail
                .starts_with("shop.test has no hosts alias or proxy route")
        );
    }
}
