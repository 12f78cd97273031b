use std::collections::HashSet;

use stable_core::App;
use thiserror::Error;

use crate::probe::SystemProbe;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("No free port available at or above {start}")]
    Exhausted { start: u16 },
}

/// First port at or above `start` that no registered app claims and nothing listens on.
///
/// Registry ports are checked before probing, so the result only depends on the
/// registry contents and the live listeners.
pub fn next_free_port(
    apps: &[App],
    probe: &dyn SystemProbe,
    start: u16,
) -> Result<u16, PortError> {
    let taken: HashSet<u16> = apps.iter().map(|app| app.port).collect();

    for port in start.max(1)..=u16::MAX {
        if taken.contains(&port) {
            continue;
        }
        if probe.is_port_open(port) {
            tracing::debug!(port, "skipping port with a live listener");
            continue;
        }
        return Ok(port);
    }

    Err(PortError::Exhausted { start })
}
