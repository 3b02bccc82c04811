//! Routing output sinks.
//!
//! A sink receives the complete route set of a license and makes its
//! stored copy match it: changed descriptors are written, descriptors of
//! instances that disappeared are pruned. Applying the same set twice is
//! a no-op.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use seatgrid_state::RouteState;

use crate::generator::RouteSet;

/// Errors raised by a routing sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// What a sink did for one `apply`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyStats {
    pub written: u32,
    pub unchanged: u32,
    pub removed: u32,
}

/// Declarative, idempotent destination for route sets.
pub trait RouteSink: Send + Sync {
    /// Replace the stored routes of `routes.license` with `routes`.
    fn apply(&self, routes: &RouteSet) -> Result<ApplyStats, SinkError>;

    /// Remove every stored route of a license. Returns the number removed.
    fn remove_license(&self, namespace: &str, license: &str) -> Result<u32, SinkError>;
}

/// Writes one JSON file per instance under
/// `{root}/{namespace}/{license}/route-{instance}.json`.
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn license_dir(&self, namespace: &str, license: &str) -> PathBuf {
        self.root.join(namespace).join(license)
    }
}

impl DirectorySink {
    /// Stage every changed descriptor, then swap them in. Demotions go live
    /// before the new active descriptor and stale files (possibly the old
    /// active one) are pruned in between, so the directory never holds two
    /// active routes.
    fn stage_and_swap(
        &self,
        routes: &RouteSet,
        staged: &mut Vec<(PathBuf, bool)>,
    ) -> Result<ApplyStats, SinkError> {
        let dir = self.license_dir(&routes.namespace, &routes.license);
        fs::create_dir_all(&dir)?;
        let mut stats = ApplyStats::default();

        let mut keep = Vec::with_capacity(routes.routes.len());
        for route in &routes.routes {
            let file_name = format!("{}.json", route.content_key());
            let path = dir.join(&file_name);
            keep.push(file_name);

            let mut body = serde_json::to_vec_pretty(route)
                .map_err(|e| SinkError::Serialize(e.to_string()))?;
            body.push(b'\n');
            if fs::read(&path).ok().as_deref() == Some(body.as_slice()) {
                stats.unchanged += 1;
                continue;
            }
            fs::write(staging_path(&path), &body)?;
            staged.push((path, route.state == RouteState::Active));
        }

        for (path, _) in staged.iter().filter(|(_, active)| !active) {
            fs::rename(staging_path(path), path)?;
            stats.written += 1;
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_route_file(&name) && !keep.contains(&name) {
                fs::remove_file(entry.path())?;
                stats.removed += 1;
            }
        }

        for (path, _) in staged.iter().filter(|(_, active)| *active) {
            fs::rename(staging_path(path), path)?;
            stats.written += 1;
        }
        Ok(stats)
    }
}

impl RouteSink for DirectorySink {
    fn apply(&self, routes: &RouteSet) -> Result<ApplyStats, SinkError> {
        let mut staged = Vec::new();
        let stats = match self.stage_and_swap(routes, &mut staged) {
            Ok(stats) => stats,
            Err(e) => {
                discard_staged(&staged);
                return Err(e);
            }
        };

        debug!(
            license = %routes.license_key(),
            written = stats.written,
            unchanged = stats.unchanged,
            removed = stats.removed,
            "route files applied"
        );
        Ok(stats)
    }

    fn remove_license(&self, namespace: &str, license: &str) -> Result<u32, SinkError> {
        let dir = self.license_dir(namespace, license);
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if is_route_file(&entry.file_name().to_string_lossy()) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        // Leave the directory if something else lives there.
        let _ = fs::remove_dir(&dir);
        info!(%namespace, %license, removed, "route files removed");
        Ok(removed)
    }
}

fn is_route_file(name: &str) -> bool {
    name.starts_with("route-") && name.ends_with(".json")
}

fn staging_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Drop staged files that were not renamed into place.
fn discard_staged(staged: &[(PathBuf, bool)]) {
    for (path, _) in staged {
        let tmp = staging_path(path);
        if tmp.is_file() {
            let _ = fs::remove_file(tmp);
        }
    }
}
