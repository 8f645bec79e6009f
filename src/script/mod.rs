//! Job script generation.
//!
//! A ready work item becomes a [`JobUnit`]; a [`UnitRenderer`] turns the
//! unit into text; [`write_unit`] stores it under
//! `<state_dir>/units/<subject>/<session>/<step>-<attempt>.sh`.

pub mod quote;
pub mod render;
pub mod unit;

pub use quote::{shell_join, shell_quote};
pub use render::{BashRenderer, SlurmRenderer, UnitRenderer};
pub use unit::{job_name, Invocation, JobUnit, SchedulerHeader};

use crate::config::SchedulerKind;
use crate::error::Result;
use crate::state::{write_atomic, StateLayout};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Renderer matching a scheduler backend.
pub fn renderer_for(kind: SchedulerKind) -> Box<dyn UnitRenderer> {
    match kind {
        SchedulerKind::Slurm => Box::new(SlurmRenderer),
        SchedulerKind::Local | SchedulerKind::DryRun => Box::new(BashRenderer),
    }
}

/// Short content digest of a rendered unit.
pub fn unit_digest(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    hex::encode(&hash[..8])
}

/// Where a unit for this work item is written.
pub fn unit_path(layout: &StateLayout, unit: &JobUnit) -> PathBuf {
    layout
        .units(&unit.pair())
        .join(format!("{}-{}.sh", unit.id.step, unit.id.attempt))
}

/// Render and atomically write a unit, returning its path.
pub fn write_unit(layout: &StateLayout, unit: &JobUnit, renderer: &dyn UnitRenderer) -> Result<PathBuf> {
    let text = renderer.render(unit);
    let path = unit_path(layout, unit);
    write_atomic(&path, text.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    }

    tracing::debug!(
        item = %unit.id,
        renderer = renderer.name(),
        digest = %unit_digest(&text),
        path = %path.display(),
        "Wrote job unit"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkItemId;
    use crate::steps::ResourceProfile;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn unit() -> JobUnit {
        JobUnit {
            id: WorkItemId {
                subject: "sub-02".into(),
                session: "ses-01".into(),
                step: "segment".into(),
                attempt: 1,
            },
            version: "7".into(),
            job_name: "segment_sub-02_ses-01".into(),
            payload: "true".into(),
            env: BTreeMap::new(),
            resources: ResourceProfile::default(),
            output_dir: PathBuf::from("/tmp/out"),
            stdout: PathBuf::from("/tmp/out.log"),
            stderr: PathBuf::from("/tmp/err.log"),
            prerequisites: Vec::new(),
            marker: PathBuf::from("/tmp/marker.json"),
            invocation: Invocation::new("bidsflow"),
            header: SchedulerHeader::default(),
        }
    }

    #[test]
    fn writes_under_units_dir() {
        let temp = TempDir::new().unwrap();
        let layout = StateLayout::new(temp.path());
        let path = write_unit(&layout, &unit(), &BashRenderer).unwrap();
        assert_eq!(path, temp.path().join("units/sub-02/ses-01/segment-1.sh"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, BashRenderer.render(&unit()));
    }

    #[test]
    fn digest_is_stable() {
        let text = SlurmRenderer.render(&unit());
        assert_eq!(unit_digest(&text), unit_digest(&text));
        assert_eq!(unit_digest(&text).len(), 16);
        assert_ne!(unit_digest(&text), unit_digest(&BashRenderer.render(&unit())));
    }

    #[test]
    fn renderer_follows_backend() {
        assert_eq!(renderer_for(SchedulerKind::Slurm).name(), "slurm");
        assert_eq!(renderer_for(SchedulerKind::Local).name(), "bash");
    }
}
