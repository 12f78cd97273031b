//! Load-boundary normalization of stored app records.
//!
//! Records written by older releases use Ruby symbol keys (`:name`), mixed case,
//! `ruby` for the runtime version, and stringly typed numbers. Everything is mapped
//! onto [`App`] here so nothing past the registry sees the raw shapes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;
use stable_core::{App, ProcessState, app_domain};

/// Canonical field name for a stored key.
pub(super) fn canonical_key(raw: &str) -> String {
    let key = raw.trim().trim_start_matches(':').to_ascii_lowercase();
    match key.as_str() {
        "ruby" | "ruby_version" => "runtime_version".to_string(),
        _ => key,
    }
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn integer<T: TryFrom<i64>>(value: Option<&Value>) -> Option<T> {
    let n = match value? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    T::try_from(n).ok()
}

/// Whether a stored name can key a record file.
///
/// Older releases accepted names the validator now rewrites (`my_app`, `Blog`), so
/// stored names are only rejected when they could escape the projects directory.
pub(super) fn is_storable_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\', '\0']) && !name.contains("..")
}

/// Build an [`App`] from a loosely shaped record.
///
/// `fallback_name` fills in a missing `name` (the project directory for per-app
/// files). Returns `None` with a warning when the record cannot identify an app.
pub(super) fn normalize_record(raw: &Value, fallback_name: Option<&str>, source: &str) -> Option<App> {
    let Value::Object(map) = raw else {
        tracing::warn!(source, "skipping registry entry that is not a mapping");
        return None;
    };

    let mut fields: BTreeMap<String, &Value> = BTreeMap::new();
    for (key, value) in map {
        let canonical = canonical_key(key);
        let is_alias = canonical != key.trim().trim_start_matches(':').to_ascii_lowercase();
        if is_alias && fields.contains_key(&canonical) {
            continue;
        }
        fields.insert(canonical, value);
    }

    let Some(name) = text(fields.get("name").copied()).or_else(|| fallback_name.map(str::to_string))
    else {
        tracing::warn!(source, "skipping registry entry without a name");
        return None;
    };
    if !is_storable_name(&name) {
        tracing::warn!(source, name = %name, "skipping registry entry with an unsafe name");
        return None;
    }

    let Some(port) = integer::<u16>(fields.get("port").copied()).filter(|p| *p != 0) else {
        tracing::warn!(source, name = %name, "skipping registry entry without a valid port");
        return None;
    };

    let Some(path) = text(fields.get("path").copied()).map(PathBuf::from) else {
        tracing::warn!(source, name = %name, "skipping registry entry without a path");
        return None;
    };

    let domain = text(fields.get("domain").copied()).unwrap_or_else(|| app_domain(&name));
    let runtime_version = text(fields.get("runtime_version").copied());

    let pid = integer::<u32>(fields.get("pid").copied()).filter(|p| *p != 0);
    let started_at = integer::<i64>(fields.get("started_at").copied());
    let process = match (pid, started_at) {
        (Some(pid), Some(started_at)) => Some(ProcessState { pid, started_at }),
        (None, None) => None,
        _ => {
            tracing::debug!(source, name = %name, "half-set process state, loading as stopped");
            None
        }
    };

    let mut app = App::new(name, path, port)
        .with_domain(domain)
        .with_runtime_version(runtime_version);
    app.process = process;
    Some(app)
}
