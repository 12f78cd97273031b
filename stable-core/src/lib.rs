//! Stable Core - Shared app record types
//!
//! This crate contains the `App` record that the Stable CLI persists in its
//! registry, plus the naming and domain rules every collaborator (proxy,
//! hosts file, database provisioning, scaffolding) derives from it.
//!
//! Registry storage, process supervision and proxy management live in the
//! `stable` crate.

mod app;
mod domain;
mod name;

pub use app::{App, AppUpdate, ProcessState};
pub use domain::{LOCAL_DOMAIN_SUFFIX, app_domain};
pub use name::{AppNameError, MAX_APP_NAME_LEN, normalize_app_name, validate_app_name};
