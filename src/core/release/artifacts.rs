//! Copy-forward of generated files that live outside version control.

use serde::Serialize;

use crate::command::RemoteCommand;
use crate::config::{ArtifactKind, ArtifactSpec, MissingSource};
use crate::error::Result;
use crate::executor::Host;
use crate::utils::remote_path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactReport {
    pub copied: Vec<String>,
    pub placeholders: Vec<String>,
    pub skipped: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// What to do with one artifact, given whether its source exists.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Copy,
    Placeholder,
    Skip,
}

fn decide(spec: &ArtifactSpec, source_exists: bool) -> Action {
    if source_exists {
        return Action::Copy;
    }
    match (spec.kind, spec.on_missing()) {
        (ArtifactKind::Directory, MissingSource::Placeholder) => Action::Placeholder,
        _ => Action::Skip,
    }
}

fn copy_commands(spec: &ArtifactSpec, source: &str, destination: &str) -> Vec<RemoteCommand> {
    match spec.kind {
        ArtifactKind::File => {
            let mut commands = Vec::new();
            if let Some(parent) = remote_path::parent(destination) {
                commands.push(RemoteCommand::new("mkdir").args(["-p", parent]));
            }
            commands.push(RemoteCommand::new("cp").args([source, destination]));
            commands
        }
        ArtifactKind::Directory => {
            // copy contents so an existing destination is merged, not nested
            let contents = format!("{}/.", source);
            vec![
                RemoteCommand::new("mkdir").args(["-p", destination]),
                RemoteCommand::new("cp").args(["-r", contents.as_str(), destination]),
            ]
        }
    }
}

/// Copy every artifact that applies to `host_groups` from `from_root` into `to_root`.
///
/// A missing source never fails the step: directories become empty placeholders
/// unless configured otherwise, files are skipped with a warning.
pub fn copy_forward(
    host: &Host,
    specs: &[ArtifactSpec],
    host_groups: &[String],
    from_root: &str,
    to_root: &str,
) -> Result<ArtifactReport> {
    let mut report = ArtifactReport::default();

    for spec in specs.iter().filter(|s| s.applies_to(host_groups)) {
        let source = remote_path::join(from_root, &spec.path);
        let destination = remote_path::join(to_root, &spec.path);

        match decide(spec, host.exists(&source)?) {
            Action::Copy => {
                for command in copy_commands(spec, &source, &destination) {
                    host.sudo(&command)?;
                }
                report.copied.push(spec.path.clone());
            }
            Action::Placeholder => {
                host.sudo(&RemoteCommand::new("mkdir").args(["-p", destination.as_str()]))?;
                report.placeholders.push(spec.path.clone());
            }
            Action::Skip => {
                let warning = format!("{} not found in {}; skipped", spec.path, from_root);
                log_status!("release", "Warning: {} on {}", warning, host.name());
                report.warnings.push(warning);
                report.skipped.push(spec.path.clone());
            }
        }
    }

    Ok(report)
}
