// Switchyard Scanner - Registry Extractor
//
// Reads a package's Rust source without compiling it and reports every queue
// and schedule registration whose arguments reduce to constants. Registrations
// with dynamic arguments are omitted with a warning; any structural failure,
// and two logical names the naming bridge cannot tell apart, abort the scan.

pub mod error;

mod consts;
mod module_graph;
mod registrations;

pub use error::{Result, ScanError};

use consts::ConstTable;
use module_graph::ModuleGraph;
use registrations::RegistrationCollector;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use switchyard_core::application::naming::colliding_names;
use switchyard_core::domain::{Layout, LogicalName, QueueDecl, ResourceKind, ScheduleDecl};
use tracing::{debug, error, info, warn};

/// A registration left out of the Layout because an argument was not constant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Omission {
    pub kind: ResourceKind,
    pub file: PathBuf,
    pub line: usize,
    pub reason: String,
}

/// Scan result with the registrations that could not be resolved
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub layout: Layout,
    pub omitted: Vec<Omission>,
}

/// Scan the package rooted at `root_dir` (the directory holding `src/`)
pub fn scan(root_dir: &Path) -> Result<Layout> {
    scan_report(root_dir).map(|report| report.layout)
}

pub fn scan_report(root_dir: &Path) -> Result<ScanReport> {
    let graph = ModuleGraph::load(root_dir)?;
    let table = ConstTable::build(&graph);

    let mut queues: Vec<QueueDecl> = Vec::new();
    let mut schedules: BTreeMap<LogicalName, Duration> = BTreeMap::new();
    let mut omitted = Vec::new();

    for module in &graph.modules {
        for site in RegistrationCollector::collect(&module.items) {
            let mut omit = |reason: &str| {
                warn!(
                    kind = %site.kind,
                    file = %module.file.display(),
                    line = site.line,
                    reason,
                    "Registration is not constant, omitted from layout"
                );
                omitted.push(Omission {
                    kind: site.kind,
                    file: module.file.clone(),
                    line: site.line,
                    reason: reason.to_string(),
                });
            };

            if site.uses_local {
                omit("argument refers to a local binding");
                continue;
            }

            let Some(name) = table
                .eval(&module.key, &site.name)
                .and_then(|value| value.into_str())
            else {
                omit("name is not a string constant");
                continue;
            };

            match site.kind {
                ResourceKind::Queue => {
                    debug!(queue = %name, file = %module.file.display(), "Queue registration found");
                    queues.push(QueueDecl::new(name));
                }
                ResourceKind::Schedule => {
                    let interval = site
                        .interval
                        .as_ref()
                        .and_then(|expr| table.eval(&module.key, expr))
                        .and_then(|value| value.into_duration())
                        .filter(|d| !d.is_zero());
                    let Some(interval) = interval else {
                        omit("interval is not a positive constant duration");
                        continue;
                    };

                    // Last registration wins, as in `RegistryBuilder::on_schedule`
                    match schedules.insert(name.clone(), interval) {
                        Some(previous) if previous != interval => {
                            warn!(
                                schedule = %name,
                                replaced_ms = previous.as_millis() as u64,
                                kept_ms = interval.as_millis() as u64,
                                "Schedule registered with conflicting intervals, keeping the last"
                            );
                        }
                        Some(_) => {}
                        None => {
                            debug!(schedule = %name, interval_ms = interval.as_millis() as u64, "Schedule registration found");
                        }
                    }
                }
            }
        }
    }

    let layout = Layout::new(
        queues,
        schedules
            .into_iter()
            .map(|(name, interval)| ScheduleDecl::new(name, interval)),
    );

    for kind in [ResourceKind::Queue, ResourceKind::Schedule] {
        if let Some((first, second)) = colliding_names(layout.names(kind)).into_iter().next() {
            error!(kind = %kind, first = %first, second = %second, "Logical names collide");
            return Err(ScanError::NameCollision {
                kind: kind.to_string(),
                first,
                second,
            });
        }
    }

    info!(
        root = %root_dir.display(),
        queues = layout.queues().len(),
        schedules = layout.schedules().len(),
        omitted = omitted.len(),
        "Scan complete"
    );

    Ok(ScanReport { layout, omitted })
}
