//! Durable store of registered apps.
//!
//! Each app lives in `projects/{name}/{name}.toml`. Records from older releases
//! (`apps.yml` and `projects/{name}/{name}.yml`) are still read, and are migrated
//! to the TOML layout the first time the app is written.

mod record;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use stable_core::{App, AppNameError, AppUpdate, validate_app_name};
use thiserror::Error;

use crate::fs_util::atomic_write;
use crate::paths::StablePaths;
use crate::ports::{PortError, next_free_port};
use crate::probe::SystemProbe;

use record::{canonical_key, is_storable_name, normalize_record};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No app found with name {0}")]
    NotFound(String),

    #[error("An app named {0} is already registered")]
    AlreadyExists(String),

    #[error(transparent)]
    InvalidName(#[from] AppNameError),

    #[error(transparent)]
    Port(#[from] PortError),

    #[error("Failed to read {0}: {1}")]
    Read(PathBuf, #[source] io::Error),

    #[error("Failed to write {0}: {1}")]
    Write(PathBuf, #[source] io::Error),

    #[error("Failed to serialize app {0}: {1}")]
    Serialize(String, #[source] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry rooted at a Stable home directory.
#[derive(Debug, Clone)]
pub struct AppRegistry {
    paths: StablePaths,
}

impl AppRegistry {
    pub fn new(paths: StablePaths) -> Self {
        Self { paths }
    }

    /// Every registered app, sorted by name.
    pub fn all(&self) -> Result<Vec<App>> {
        let mut apps: BTreeMap<String, App> = self
            .load_legacy_aggregate()?
            .into_iter()
            .map(|app| (app.name.clone(), app))
            .collect();

        let projects_dir = self.paths.projects_dir();
        let entries = match fs::read_dir(&projects_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(apps.into_values().collect());
            }
            Err(e) => return Err(RegistryError::Read(projects_dir, e)),
        };

        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let Some(dir_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if let Some(app) = self.load_project(&dir_name)? {
                apps.insert(app.name.clone(), app);
            }
        }

        Ok(apps.into_values().collect())
    }

    /// Look up an app by name. An unknown name is `Ok(None)`.
    pub fn find(&self, name: &str) -> Result<Option<App>> {
        if !is_storable_name(name) {
            return Ok(None);
        }
        if let Some(app) = self.load_project(name)? {
            return Ok(Some(app));
        }
        Ok(self
            .load_legacy_aggregate()?
            .into_iter()
            .find(|app| app.name == name))
    }

    /// Look up an app by name, treating an unknown name as an error.
    pub fn get(&self, name: &str) -> Result<App> {
        self.find(name)?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn find_by_domain(&self, domain: &str) -> Result<Option<App>> {
        Ok(self.all()?.into_iter().find(|app| app.domain == domain))
    }

    pub fn find_by_path(&self, path: &Path) -> Result<Option<App>> {
        Ok(self.all()?.into_iter().find(|app| app.path == path))
    }

    /// Insert or fully replace the record for `app.name`.
    pub fn add(&self, app: &App) -> Result<()> {
        let file = self.paths.app_config_file(&app.name);
        let content = toml::to_string_pretty(app)
            .map_err(|e| RegistryError::Serialize(app.name.clone(), e))?;
        atomic_write(&file, content.as_bytes()).map_err(|e| RegistryError::Write(file, e))?;

        remove_if_exists(&self.paths.legacy_app_config_file(&app.name))?;
        self.drop_legacy_entry(&app.name)?;
        tracing::debug!(app = %app.name, "saved app record");
        Ok(())
    }

    /// Merge `update` into the record for `name`. Returns `false` for an unknown name.
    pub fn update(&self, name: &str, update: AppUpdate) -> Result<bool> {
        let Some(mut app) = self.find(name)? else {
            return Ok(false);
        };
        app.apply(update);
        self.add(&app)?;
        Ok(true)
    }

    /// Delete the record for `name`. Unknown names are ignored.
    pub fn remove(&self, name: &str) -> Result<()> {
        if !is_storable_name(name) {
            return Ok(());
        }
        remove_if_exists(&self.paths.app_config_file(name))?;
        remove_if_exists(&self.paths.legacy_app_config_file(name))?;

        let dir = self.paths.projects_dir().join(name);
        if dir.is_dir()
            && fs::read_dir(&dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false)
            && let Err(e) = fs::remove_dir(&dir)
        {
            tracing::warn!(path = %dir.display(), error = %e, "failed to remove project directory");
        }

        self.drop_legacy_entry(name)?;
        tracing::debug!(app = %name, "removed app record");
        Ok(())
    }

    /// Register a new app: validate the name, derive its domain, allocate a port, persist.
    pub fn register(
        &self,
        name: &str,
        path: impl Into<PathBuf>,
        probe: &dyn SystemProbe,
        base_port: u16,
    ) -> Result<App> {
        let name = validate_app_name(name)?;
        if self.find(&name)?.is_some() {
            return Err(RegistryError::AlreadyExists(name));
        }

        let apps = self.all()?;
        let port = next_free_port(&apps, probe, base_port)?;
        let app = App::new(name, path, port);
        self.add(&app)?;
        tracing::info!(app = %app.name, domain = %app.domain, port, "registered app");
        Ok(app)
    }

    /// The record stored under `projects/{name}/`. A record naming a different app
    /// is skipped, since lookups go through the directory name.
    fn load_project(&self, name: &str) -> Result<Option<App>> {
        let app = self.load_project_file(name)?;
        Ok(app.filter(|app| {
            let matches = app.name == name;
            if !matches {
                tracing::warn!(dir = name, app = %app.name, "skipping app record stored under another name");
            }
            matches
        }))
    }

    fn load_project_file(&self, name: &str) -> Result<Option<App>> {
        let toml_file = self.paths.app_config_file(name);
        if let Some(content) = read_optional(&toml_file)? {
            return Ok(match toml::from_str::<serde_json::Value>(&content) {
                Ok(raw) => normalize_record(&raw, Some(name), &toml_file.display().to_string()),
                Err(e) => {
                    tracing::warn!(path = %toml_file.display(), error = %e, "skipping unreadable app record");
                    None
                }
            });
        }

        let yaml_file = self.paths.legacy_app_config_file(name);
        if let Some(content) = read_optional(&yaml_file)? {
            return Ok(match serde_yaml::from_str::<serde_json::Value>(&content) {
                Ok(raw) => normalize_record(&raw, Some(name), &yaml_file.display().to_string()),
                Err(e) => {
                    tracing::warn!(path = %yaml_file.display(), error = %e, "skipping unreadable app record");
                    None
                }
            });
        }

        Ok(None)
    }

    fn load_legacy_aggregate(&self) -> Result<Vec<App>> {
        let file = self.paths.legacy_apps_file();
        let Some(content) = read_optional(&file)? else {
            return Ok(Vec::new());
        };
        let source = file.display().to_string();

        let raw = match serde_yaml::from_str::<serde_json::Value>(&content) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %source, error = %e, "ignoring unreadable legacy registry");
                return Ok(Vec::new());
            }
        };

        Ok(match raw {
            serde_json::Value::Array(entries) => entries
                .iter()
                .filter_map(|entry| normalize_record(entry, None, &source))
                .collect(),
            serde_json::Value::Null => Vec::new(),
            _ => {
                tracing::warn!(path = %source, "legacy registry is not a list, ignoring it");
                Vec::new()
            }
        })
    }

    /// Drop `name` from `apps.yml`, leaving every other entry as written.
    fn drop_legacy_entry(&self, name: &str) -> Result<()> {
        let file = self.paths.legacy_apps_file();
        let Some(content) = read_optional(&file)? else {
            return Ok(());
        };
        let Ok(serde_yaml::Value::Sequence(entries)) = serde_yaml::from_str(&content) else {
            return Ok(());
        };

        let before = entries.len();
        let kept: Vec<serde_yaml::Value> = entries
            .into_iter()
            .filter(|entry| legacy_entry_name(entry).as_deref() != Some(name))
            .collect();
        if kept.len() == before {
            return Ok(());
        }

        let rendered = serde_yaml::to_string(&kept)
            .map_err(|e| RegistryError::Write(file.clone(), io::Error::other(e)))?;
        atomic_write(&file, rendered.as_bytes()).map_err(|e| RegistryError::Write(file, e))?;
        tracing::info!(app = %name, "migrated app out of legacy registry");
        Ok(())
    }
}

fn legacy_entry_name(entry: &serde_yaml::Value) -> Option<String> {
    let serde_yaml::Value::Mapping(map) = entry else {
        return None;
    };
    map.iter().find_map(|(key, value)| {
        let key = key.as_str()?;
        if canonical_key(key) != "name" {
            return None;
        }
        value.as_str().map(|s| s.trim().to_string())
    })
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RegistryError::Read(path.to_path_buf(), e)),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RegistryError::Write(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::fake::FakeProbe;
    use tempfile::TempDir;

    fn registry() -> (TempDir, AppRegistry) {
        let temp = TempDir::new().unwrap();
        let registry = AppRegistry::new(StablePaths::new(temp.path()));
        (temp, registry)
    }

    const LEGACY_APPS_YML: &str = "\
---
- :name: blog
  :path: /work/blog
  :domain: blog.test
  :port: 3000
  :ruby: 3.2.2
  :started_at:
  :pid:
- name: shop
  path: /work/shop
  port: '3001'
";

    #[test]
    fn empty_home_has_no_apps() {
        let (_temp, registry) = registry();
        assert!(registry.all().unwrap().is_empty());
        assert_eq!(registry.find("blog").unwrap(), None);
    }

    #[test]
    fn add_then_find_round_trips_through_toml() {
        let (temp, registry) = registry();
        let mut app = App::new("blog", "/work/blog", 3000)
            .with_runtime_version(Some("3.3.0".to_string()));
        app.apply(AppUpdate::running(4242, 1_700_000_000));
        registry.add(&app).unwrap();

        let file = temp.path().join("projects/blog/blog.toml");
        let raw = fs::read_to_string(file).unwrap();
        assert!(raw.contains("pid = 4242"), "unexpected record:\n{raw}");

        assert_eq!(registry.find("blog").unwrap(), Some(app));
    }

    #[test]
    fn stopped_records_omit_process_fields() {
        let (temp, registry) = registry();
        registry.add(&App::new("blog", "/work/blog", 3000)).unwrap();
        let raw = fs::read_to_string(temp.path().join("projects/blog/blog.toml")).unwrap();
        assert!(!raw.contains("pid"));
        assert!(!raw.contains("started_at"));
    }

    #[test]
    fn add_replaces_instead_of_merging() {
        let (_temp, registry) = registry();
        registry
            .add(&App::new("blog", "/a", 3000).with_runtime_version(Some("3.2.0".into())))
            .unwrap();
        registry.add(&App::new("blog", "/b", 3001)).unwrap();

        let app = registry.get("blog").unwrap();
        assert_eq!(app.path, PathBuf::from("/b"));
        assert_eq!(app.port, 3001);
        assert_eq!(app.runtime_version, None);
    }

    #[test]
    fn last_write_wins_across_operations() {
        let (_temp, registry) = registry();
        registry.add(&App::new("blog", "/a", 3000)).unwrap();
        assert!(registry.update("blog", AppUpdate::port(3010)).unwrap());
        assert!(registry.update("blog", AppUpdate::running(1, 2)).unwrap());
        assert!(registry.update("blog", AppUpdate::stopped()).unwrap());
        registry.add(&App::new("other", "/o", 3001)).unwrap();

        let app = registry.get("blog").unwrap();
        assert_eq!(app.port, 3010);
        assert!(!app.is_running());

        registry.remove("blog").unwrap();
        assert_eq!(registry.find("blog").unwrap(), None);
        registry.add(&App::new("blog", "/c", 3020)).unwrap();
        assert_eq!(registry.get("blog").unwrap().port, 3020);
    }

    #[test]
    fn update_unknown_name_is_a_noop() {
        let (temp, registry) = registry();
        assert!(!registry.update("ghost", AppUpdate::port(1)).unwrap());
        assert!(!temp.path().join("projects").exists());
    }

    #[test]
    fn remove_unknown_name_is_a_noop() {
        let (_temp, registry) = registry();
        registry.remove("ghost").unwrap();
    }

    #[test]
    fn remove_deletes_file_and_empty_directory() {
        let (temp, registry) = registry();
        registry.add(&App::new("blog", "/a", 3000)).unwrap();
        registry.remove("blog").unwrap();
        assert!(!temp.path().join("projects/blog").exists());
    }

    #[test]
    fn remove_keeps_directory_with_other_files() {
        let (temp, registry) = registry();
        registry.add(&App::new("blog", "/a", 3000)).unwrap();
        fs::write(temp.path().join("projects/blog/notes.txt"), "keep").unwrap();
        registry.remove("blog").unwrap();
        assert!(temp.path().join("projects/blog/notes.txt").exists());
        assert_eq!(registry.find("blog").unwrap(), None);
    }

    #[test]
    fn all_is_sorted_by_name() {
        let (_temp, registry) = registry();
        for (name, port) in [("zeta", 3000), ("alpha", 3001), ("mid", 3002)] {
            registry.add(&App::new(name, "/w", port)).unwrap();
        }
        let names: Vec<_> = registry.all().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn reads_legacy_aggregate_registry() {
        let (temp, registry) = registry();
        fs::write(temp.path().join("apps.yml"), LEGACY_APPS_YML).unwrap();

        let apps = registry.all().unwrap();
        assert_eq!(apps.len(), 2);
        let blog = registry.get("blog").unwrap();
        assert_eq!(blog.runtime_version.as_deref(), Some("3.2.2"));
        assert!(!blog.is_running());
        let shop = registry.get("shop").unwrap();
        assert_eq!(shop.port, 3001);
        assert_eq!(shop.domain, "shop.test");
    }

    #[test]
    fn per_app_records_shadow_legacy_entries() {
        let (temp, registry) = registry();
        fs::write(temp.path().join("apps.yml"), LEGACY_APPS_YML).unwrap();
        let dir = temp.path().join("projects/blog");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("blog.toml"),
            "name = \"blog\"\npath = \"/new/blog\"\ndomain = \"blog.test\"\nport = 3100\n",
        )
        .unwrap();

        let apps = registry.all().unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(registry.get("blog").unwrap().port, 3100);
    }

    #[test]
    fn update_migrates_legacy_entry() {
        let (temp, registry) = registry();
        fs::write(temp.path().join("apps.yml"), LEGACY_APPS_YML).unwrap();

        assert!(registry.update("blog", AppUpdate::running(9, 10)).unwrap());

        assert!(temp.path().join("projects/blog/blog.toml").exists());
        let legacy = fs::read_to_string(temp.path().join("apps.yml")).unwrap();
        assert!(!legacy.contains("blog"));
        assert!(legacy.contains("shop"));

        let blog = registry.get("blog").unwrap();
        assert_eq!(blog.pid(), Some(9));
        assert_eq!(blog.runtime_version.as_deref(), Some("3.2.2"));
        assert_eq!(registry.all().unwrap().len(), 2);
    }

    #[test]
    fn remove_drops_legacy_entry() {
        let (temp, registry) = registry();
        fs::write(temp.path().join("apps.yml"), LEGACY_APPS_YML).unwrap();
        registry.remove("shop").unwrap();
        assert_eq!(registry.find("shop").unwrap(), None);
        assert!(registry.find("blog").unwrap().is_some());
    }

    #[test]
    fn reads_and_migrates_legacy_per_app_yaml() {
        let (temp, registry) = registry();
        let dir = temp.path().join("projects/api");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("api.yml"),
            "---\n:name: api\n:path: /work/api\n:port: 3004\n:pid: 5\n:started_at: 6\n",
        )
        .unwrap();

        let api = registry.get("api").unwrap();
        assert_eq!(api.pid(), Some(5));

        registry.update("api", AppUpdate::stopped()).unwrap();
        assert!(!dir.join("api.yml").exists());
        assert!(dir.join("api.toml").exists());
        assert!(!registry.get("api").unwrap().is_running());
    }

    #[test]
    fn corrupt_records_are_skipped() {
        let (temp, registry) = registry();
        registry.add(&App::new("good", "/g", 3000)).unwrap();
        let dir = temp.path().join("projects/bad");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("bad.toml"), "name = \"bad\"\nport = ").unwrap();

        let names: Vec<_> = registry.all().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[test]
    fn legacy_names_stay_reachable() {
        let (temp, registry) = registry();
        fs::write(
            temp.path().join("apps.yml"),
            "- :name: my_app\n  :path: /work/my_app\n  :port: 3002\n",
        )
        .unwrap();

        let names: Vec<_> = registry.all().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["my_app"]);
        assert_eq!(registry.get("my_app").unwrap().port, 3002);

        assert!(registry.update("my_app", AppUpdate::port(3005)).unwrap());
        assert_eq!(registry.get("my_app").unwrap().port, 3005);
        registry.remove("my_app").unwrap();
        assert!(registry.all().unwrap().is_empty());
    }

    #[test]
    fn record_under_another_directory_name_is_skipped() {
        let (temp, registry) = registry();
        registry.add(&App::new("good", "/g", 3000)).unwrap();
        let dir = temp.path().join("projects/a");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("a.toml"), "name = \"b\"\npath = \"/b\"\nport = 3001\n").unwrap();

        let names: Vec<_> = registry.all().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["good"]);
        assert!(registry.find("a").unwrap().is_none());
        assert!(registry.find("b").unwrap().is_none());
    }

    #[test]
    fn unsafe_names_never_reach_the_filesystem() {
        let (_temp, registry) = registry();
        assert!(registry.find("../etc").unwrap().is_none());
        registry.remove("../etc").unwrap();
    }

    #[test]
    fn register_derives_domain_and_allocates_port() {
        let (_temp, registry) = registry();
        let probe = FakeProbe::new();
        let blog = registry.register("Blog", "/work/blog", &probe, 3000).unwrap();
        assert_eq!(blog.name, "blog");
        assert_eq!(blog.domain, "blog.test");
        assert_eq!(blog.port, 3000);

        probe.open_port(3001);
        let shop = registry.register("shop", "/work/shop", &probe, 3000).unwrap();
        assert_eq!(shop.port, 3002);
        assert_eq!(registry.get("shop").unwrap(), shop);
    }

    #[test]
    fn register_rejects_duplicates_and_invalid_names() {
        let (_temp, registry) = registry();
        let probe = FakeProbe::new();
        registry.register("blog", "/w", &probe, 3000).unwrap();
        assert!(matches!(
            registry.register("blog", "/w", &probe, 3000),
            Err(RegistryError::AlreadyExists(_))
        ));
        assert!(matches!(
            registry.register("!!!", "/w", &probe, 3000),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn lookups_by_domain_and_path() {
        let (_temp, registry) = registry();
        registry
            .add(&App::new("blog", "/work/blog", 3000).with_domain("journal.test"))
            .unwrap();
        assert_eq!(
            registry.find_by_domain("journal.test").unwrap().map(|a| a.name),
            Some("blog".to_string())
        );
        assert!(registry.find_by_domain("blog.test").unwrap().is_none());
        assert!(registry.find_by_path(Path::new("/work/blog")).unwrap().is_some());
    }

    #[test]
    fn get_unknown_name_is_not_found() {
        let (_temp, registry) = registry();
        let err = registry.get("ghost").unwrap_err();
        assert_eq!(err.to_string(), "No app found with name ghost");
    }
}
