//! Pipeline: dump, autofill and build as background tasks
//!
//! SPDX-FileCopyrightText: 2025 `CyberDeco`
//!
//! SPDX-License-Identifier: MIT
//!
//! A [`Pipeline`] owns one workspace and runs at most one task on it at a
//! time; a second submission while one is running fails with
//! [`Error::Busy`]. Tasks run on their own thread and can be cancelled
//! through their [`TaskHandle`]; cancellation takes effect at the next
//! per-asset boundary.
//!
//! # Example
//!
//! ```no_run
//! use kotoba::config::Settings;
//! use kotoba::pipeline::{Pipeline, Task, TaskOutput};
//!
//! let settings = Settings::load_or_create("kotoba.toml")?;
//! let pipeline = Pipeline::open(settings)?;
//! if let TaskOutput::Build(summary) = pipeline.run(Task::Build { sync: true })? {
//!     println!("generation {}", summary.report.generation);
//! }
//! # Ok::<(), kotoba::Error>(())
//! ```

mod cancel;

pub use cancel::CancelToken;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use serde::Serialize;

use crate::autofill::{AutofillReport, Rule, autofill};
use crate::build::{BuildOptions, BuildProgress, BuildReport, build_with_progress};
use crate::config::Settings;
use crate::container::{Layout, read_container_file};
use crate::error::{AssetOutcome, Error, Result};
use crate::merge::{MergeMode, MergeOptions, MergeResult, merge};
use crate::sync::{SyncClient, SyncOutcome};
use crate::workspace::{ExtractOptions, Workspace, extract};

/// Options for [`dump`]
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Only merge these tables
    pub tables: Option<Vec<String>>,
    pub merge: MergeOptions,
}

/// Result of a dump
#[derive(Debug, Clone, Default, Serialize)]
pub struct DumpReport {
    pub tables: usize,
    pub assets: usize,
    pub merge: MergeResult,
    /// Tables and script blocks that could not be decoded
    pub outcomes: Vec<AssetOutcome>,
}

/// Read a container and merge it into the workspace
///
/// # Errors
/// Returns an error if the container cannot be read or split, or if the
/// merge cannot be written. Undecodable tables and blocks are listed in the
/// report instead.
pub fn dump(
    workspace: &Workspace,
    container_path: &Path,
    layout: &Layout,
    options: &DumpOptions,
    cancel: &CancelToken,
) -> Result<DumpReport> {
    tracing::info!("Dumping {}", container_path.display());
    let data = read_container_file(container_path)?;
    let file_name = container_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidPath(container_path.display().to_string()))?;

    let extract_options = ExtractOptions {
        tables: options.tables.clone(),
    };
    let extraction = extract(&file_name, &data, layout, &extract_options, cancel)?;
    cancel.check()?;

    let tables = extraction.skeleton.tables.len();
    let assets = extraction.assets.len();
    let outcomes = extraction.outcomes.clone();
    let merge = merge(workspace, extraction, &options.merge)?;
    tracing::info!(
        "Dump merged {assets} assets: {} added, {} changed, {} removed, {} restored",
        merge.added.len(),
        merge.changed.len(),
        merge.removed.len(),
        merge.restored.len()
    );
    Ok(DumpReport {
        tables,
        assets,
        merge,
        outcomes,
    })
}

/// A unit of background work
#[derive(Debug, Clone)]
pub enum Task {
    Dump(DumpOptions),
    /// Run the configured rules, or only the one with this name
    Autofill { only: Option<String> },
    /// Build, then notify the game if `sync` and sync is enabled
    Build { sync: bool },
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Self::Dump(_) => "dump",
            Self::Autofill { .. } => "autofill",
            Self::Build { .. } => "build",
        }
    }
}

/// A build together with what the game said about it
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub report: BuildReport,
    /// Absent when no notification was attempted
    pub sync: Option<SyncOutcome>,
}

/// What a finished task produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum TaskOutput {
    Dump(DumpReport),
    Autofill(AutofillReport),
    Build(BuildSummary),
}

/// A running task
pub struct TaskHandle {
    cancel: CancelToken,
    handle: JoinHandle<Result<TaskOutput>>,
}

impl TaskHandle {
    /// Ask the task to stop at its next check
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task
    ///
    /// # Errors
    /// Returns the task's error, or [`Error::TaskPanicked`].
    pub fn join(self) -> Result<TaskOutput> {
        self.handle.join().map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Error::TaskPanicked(message)
        })?
    }
}

/// Clears the busy flag when the task thread ends, however it ends
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One workspace with its settings
pub struct Pipeline {
    workspace: Arc<Workspace>,
    settings: Arc<Settings>,
    busy: Arc<AtomicBool>,
}

impl Pipeline {
    #[must_use]
    pub fn new(workspace: Workspace, settings: Settings) -> Self {
        Self {
            workspace: Arc::new(workspace),
            settings: Arc::new(settings),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open (or create) the configured workspace
    ///
    /// # Errors
    /// Returns an error if the workspace cannot be opened or created.
    pub fn open(settings: Settings) -> Result<Self> {
        let workspace = Workspace::open_or_create(settings.workspace_dir())?;
        Ok(Self::new(workspace, settings))
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a task in the background
    ///
    /// # Errors
    /// Returns [`Error::Busy`] while another task runs, or an I/O error if
    /// the thread cannot be spawned.
    pub fn submit(&self, task: Task) -> Result<TaskHandle> {
        self.submit_with_progress(task, |_| {})
    }

    /// Start a task, reporting build progress through `progress`
    ///
    /// # Errors
    /// See [`submit`](Self::submit).
    pub fn submit_with_progress<F>(&self, task: Task, progress: F) -> Result<TaskHandle>
    where
        F: Fn(&BuildProgress) + Send + Sync + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::Busy);
        }
        let guard = BusyGuard(Arc::clone(&self.busy));

        let cancel = CancelToken::new();
        let workspace = Arc::clone(&self.workspace);
        let settings = Arc::clone(&self.settings);
        let token = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(format!("kotoba-{}", task.name()))
            .spawn(move || {
                let _guard = guard;
                run_task(&workspace, &settings, task, &token, &progress)
            })?;
        Ok(TaskHandle { cancel, handle })
    }

    /// Run a task and wait for it
    ///
    /// # Errors
    /// See [`submit`](Self::submit) and [`TaskHandle::join`].
    pub fn run(&self, task: Task) -> Result<TaskOutput> {
        self.submit(task)?.join()
    }
}

fn run_task(
    workspace: &Workspace,
    settings: &Settings,
    task: Task,
    cancel: &CancelToken,
    progress: &(dyn Fn(&BuildProgress) + Send + Sync),
) -> Result<TaskOutput> {
    let name = task.name();
    tracing::debug!("Starting {name} task");
    let output = match task {
        Task::Dump(options) => {
            let layout = Layout::load(settings.layout_path())?;
            dump(workspace, &settings.container_path(), &layout, &options, cancel).map(TaskOutput::Dump)
        }
        Task::Autofill { only } => {
            let rules = select_rules(&settings.autofill, only.as_deref())?;
            autofill(workspace, &rules, cancel).map(TaskOutput::Autofill)
        }
        Task::Build { sync } => run_build(workspace, settings, sync, cancel, progress).map(TaskOutput::Build),
    };
    if let Err(e) = &output {
        tracing::warn!("{name} task failed: {e}");
    }
    output
}

fn select_rules(rules: &[Rule], only: Option<&str>) -> Result<Vec<Rule>> {
    let Some(only) = only else {
        return Ok(rules.to_vec());
    };
    let selected: Vec<Rule> = rules.iter().filter(|r| r.label() == only).cloned().collect();
    if selected.is_empty() {
        return Err(Error::InvalidRule {
            rule: only.to_string(),
            message: "no rule with this name in the settings".to_string(),
        });
    }
    Ok(selected)
}

fn run_build(
    workspace: &Workspace,
    settings: &Settings,
    sync: bool,
    cancel: &CancelToken,
    progress: &(dyn Fn(&BuildProgress) + Send + Sync),
) -> Result<BuildSummary> {
    let options = BuildOptions::new(settings.output_dir());
    let report = build_with_progress(workspace, &options, cancel, progress)?;

    let sync = (sync && settings.sync.enabled && report.committed)
        .then(|| notify(settings, &report));
    Ok(BuildSummary { report, sync })
}

/// Tell the game about a committed build; never fails the build
fn notify(settings: &Settings, report: &BuildReport) -> SyncOutcome {
    match SyncClient::new(settings.sync.clone()) {
        Ok(client) => client.notify(&report.changed_assets, report.generation),
        Err(e) => {
            tracing::warn!("{e}");
            SyncOutcome::Rejected {
                message: e.to_string(),
            }
        }
    }
}

/// Merge mode from the `--overwrite` flag
#[must_use]
pub fn merge_mode(overwrite: bool) -> MergeMode {
    if overwrite {
        MergeMode::Overwrite
    } else {
        MergeMode::Update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CONFIG_FILE;
    use crate::container::{
        CONTAINER_VERSION, ColumnLayout, ColumnType, Container, Row, Table, TableData, TableLayout,
        Value, encode,
    };
    use crate::workspace::AssetId;
    use pretty_assertions::assert_eq;

    fn layout() -> Layout {
        Layout::new(vec![TableLayout::new(
            "text",
            vec![ColumnLayout::key("id", ColumnType::U32), ColumnLayout::text("text")],
        )])
        .unwrap()
    }

    fn setup(dir: &Path, sync_url: &str) -> Pipeline {
        let mut settings = Settings::load_or_create(dir.join(CONFIG_FILE)).unwrap();
        settings.sync.url = sync_url.to_string();
        settings.sync.timeout_ms = 500;

        let layout = layout();
        let container = encode(&Container {
            version: CONTAINER_VERSION,
            tables: vec![Table {
                name: "text".into(),
                data: TableData::Rows {
                    layout: layout.tables[0].clone(),
                    rows: vec![
                        Row::new(vec![Value::U32(1), Value::Text("Hello".into())]),
                        Row::new(vec![Value::U32(2), Value::Text("World".into())]),
                    ],
                },
            }],
        })
        .unwrap();
        let container_path = settings.container_path();
        std::fs::create_dir_all(container_path.parent().unwrap()).unwrap();
        std::fs::write(&container_path, container).unwrap();
        std::fs::write(settings.layout_path(), serde_json::to_string(&layout).unwrap()).unwrap();

        Pipeline::open(settings).unwrap()
    }

    fn closed_port() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    }

    #[test]
    fn test_dump_then_build_without_game() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = setup(dir.path(), &closed_port());

        let TaskOutput::Dump(dump) = pipeline.run(Task::Dump(DumpOptions::default())).unwrap() else {
            panic!("expected a dump report");
        };
        assert_eq!(dump.merge.added.len(), 2);
        assert!(dump.outcomes.is_empty());

        pipeline
            .workspace()
            .edit(&AssetId::table("text"), "1/text", "Bonjour")
            .unwrap();
        let TaskOutput::Build(summary) = pipeline.run(Task::Build { sync: true }).unwrap() else {
            panic!("expected a build summary");
        };
        assert!(summary.report.committed);
        assert_eq!(summary.report.generation, 1);
        assert_eq!(summary.sync, Some(SyncOutcome::ConnectionRefused));
        assert!(dir.path().join("build/master/master.mdb").exists());
        assert!(!pipeline.is_busy());
    }

    #[test]
    fn test_build_without_sync() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = setup(dir.path(), &closed_port());
        pipeline.run(Task::Dump(DumpOptions::default())).unwrap();
        let TaskOutput::Build(summary) = pipeline.run(Task::Build { sync: false }).unwrap() else {
            panic!("expected a build summary");
        };
        assert_eq!(summary.sync, None);
    }

    #[test]
    fn test_second_task_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = setup(dir.path(), &closed_port());
        pipeline.busy.store(true, Ordering::SeqCst);
        assert!(matches!(
            pipeline.submit(Task::Autofill { only: None }),
            Err(Error::Busy)
        ));
        pipeline.busy.store(false, Ordering::SeqCst);
        assert!(pipeline.run(Task::Autofill { only: None }).is_ok());
    }

    #[test]
    fn test_unknown_rule_name() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = setup(dir.path(), &closed_port());
        let result = pipeline.run(Task::Autofill {
            only: Some("pieces".into()),
        });
        assert!(matches!(result, Err(Error::InvalidRule { .. })));
        assert!(!pipeline.is_busy());
    }
}
