mod apt;
mod dnf;
mod pacman;

pub use apt::Apt;
pub use dnf::Dnf;
pub use pacman::Pacman;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::cmd::Runner;
use crate::error::Error;
use crate::package::{CommandResult, InstallProgress, NO_DESCRIPTION, UNKNOWN};
use crate::privilege::{Escalator, Helper};
use crate::progress::{ProgressParser, ProgressTracker};

/// Progress callback, invoked synchronously once per output line
pub type ProgressFn<'a> = &'a mut (dyn FnMut(&InstallProgress) + Send);

/// Native package manager backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Apt,
    Dnf,
    Pacman,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Apt => "apt",
            BackendKind::Dnf => "dnf",
            BackendKind::Pacman => "pacman",
        }
    }

    pub fn create(self, runner: Arc<dyn Runner>, helper: Helper) -> Box<dyn Backend> {
        let session = Session::new(runner, Escalator::new(helper, self));
        match self {
            BackendKind::Apt => Box::new(Apt::new(session)),
            BackendKind::Dnf => Box::new(Dnf::new(session)),
            BackendKind::Pacman => Box::new(Pacman::new(session)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fields scraped from a backend's info command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Details {
    pub version: Option<String>,
    pub size: Option<String>,
    pub description: Option<String>,
}

impl Details {
    pub fn version(&self) -> String {
        self.version.clone().unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn size(&self) -> String {
        self.size.clone().unwrap_or_else(|| UNKNOWN.to_string())
    }

    pub fn description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| NO_DESCRIPTION.to_string())
    }
}

/// Privileged package mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install,
    Remove,
    Update,
    Refresh,
}

impl Operation {
    fn noun(&self) -> &'static str {
        match self {
            Operation::Install => "Installation",
            Operation::Remove => "Removal",
            Operation::Update => "Update",
            Operation::Refresh => "Refresh",
        }
    }

    fn needs_targets(&self) -> bool {
        matches!(self, Operation::Install | Operation::Remove)
    }
}

/// Runner, escalator and details cache shared by every backend
pub struct Session {
    runner: Arc<dyn Runner>,
    escalator: Escalator,
    cache: Mutex<HashMap<String, Details>>,
}

impl Session {
    pub fn new(runner: Arc<dyn Runner>, escalator: Escalator) -> Self {
        Self {
            runner,
            escalator,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn runner(&self) -> &dyn Runner {
        self.runner.as_ref()
    }

    pub fn escalator(&self) -> &Escalator {
        &self.escalator
    }

    fn cached(&self, name: &str) -> Option<Details> {
        self.cache.lock().ok()?.get(name).cloned()
    }

    fn remember(&self, name: &str, details: &Details) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(name.to_string(), details.clone());
        }
    }

    /// Escalate, stream and classify one privileged command.
    ///
    /// A missing helper fails before anything is spawned.
    pub async fn privileged(
        &self,
        operation: Operation,
        parser: ProgressParser,
        argv: Vec<String>,
        targets: &[String],
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CommandResult {
        if operation.needs_targets() && targets.is_empty() {
            return Error::NoPackages.into();
        }

        let argv = match self.escalator.wrap(self.runner(), argv) {
            Ok(argv) => argv,
            Err(e) => return e.into(),
        };

        tracing::info!("{} of [{}] started", operation.noun(), targets.join(", "));

        let mut tracker = ProgressTracker::new(parser, targets);
        let mut forward = |line: &str| {
            let event = tracker.observe(line);
            on_progress(&event);
        };
        let result = self.runner.run_streaming(&argv, &mut forward, cancel).await;

        let result = if result.success {
            CommandResult::ok(format!("{} completed successfully", operation.noun()))
        } else {
            tracing::warn!(
                "{} of [{}] failed ({}): {}",
                operation.noun(),
                targets.join(", "),
                result.exit_code,
                result.message
            );
            result
        };

        if let Some(event) = tracker.finish(&result) {
            on_progress(&event);
        }
        result
    }
}

/// A native package manager.
///
/// Backends provide the command lines and output scanners; querying,
/// caching and the privileged progress pipeline are shared.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn session(&self) -> &Session;

    /// Read-only command printing package details
    fn info_command(&self, name: &str) -> Vec<String>;

    /// Scan info output for version, size and description
    fn parse_details(&self, output: &str) -> Details;

    fn install_command(&self, names: &[String]) -> Vec<String>;

    fn remove_command(&self, names: &[String]) -> Vec<String>;

    /// Upgrade `names`, or the whole system when empty
    fn update_command(&self, names: &[String]) -> Vec<String>;

    /// Refresh the package database
    fn refresh_command(&self) -> Vec<String>;

    /// Check if a package is installed. Any failure reads as not installed.
    async fn is_installed(&self, name: &str) -> bool;

    /// Names of installed packages with a newer version available
    async fn upgradable(&self) -> Vec<String>;

    /// Package details, queried once per name and cached on success
    async fn details(&self, name: &str) -> Details {
        if let Some(details) = self.session().cached(name) {
            return details;
        }

        let output = self.session().runner().run(&self.info_command(name)).await;
        if !output.success() {
            tracing::debug!("No details for {}: {}", name, output.result.message);
            return Details::default();
        }

        let details = self.parse_details(&output.stdout);
        self.session().remember(name, &details);
        details
    }

    async fn size(&self, name: &str) -> String {
        self.details(name).await.size()
    }

    async fn description(&self, name: &str) -> String {
        self.details(name).await.description()
    }

    async fn version(&self, name: &str) -> String {
        self.details(name).await.version()
    }

    async fn install(
        &self,
        names: &[String],
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let argv = self.install_command(names);
        self.session()
            .privileged(Operation::Install, self.kind().into(), argv, names, on_progress, cancel)
            .await
    }

    async fn remove(
        &self,
        names: &[String],
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let argv = self.remove_command(names);
        self.session()
            .privileged(Operation::Remove, self.kind().into(), argv, names, on_progress, cancel)
            .await
    }

    async fn update(
        &self,
        names: &[String],
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let argv = self.update_command(names);
        self.session()
            .privileged(Operation::Update, self.kind().into(), argv, names, on_progress, cancel)
            .await
    }

    async fn refresh(
        &self,
        on_progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CommandResult {
        let argv = self.refresh_command();
        self.session()
            .privileged(Operation::Refresh, self.kind().into(), argv, &[], on_progress, cancel)
            .await
    }
}

/// Split a `Key: value` or `Key   : value` line
fn field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    Some((key.trim(), value.trim()))
}

/// Value of the first line whose key is one of `keys`
fn first_field(output: &str, keys: &[&str]) -> Option<String> {
    output
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .filter_map(field)
        .find(|(key, value)| keys.contains(key) && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Value of `key` joined with its indented continuation lines.
///
/// The block ends at a blank line or the next unindented field.
fn block_field(output: &str, key: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    let mut in_block = false;

    for line in output.lines() {
        if !in_block {
            if line.starts_with(char::is_whitespace) {
                continue;
            }
            if let Some((k, value)) = field(line) {
                if k == key {
                    in_block = true;
                    if !value.is_empty() {
                        parts.push(value);
                    }
                }
            }
            continue;
        }

        if line.trim().is_empty() || !line.starts_with(char::is_whitespace) {
            break;
        }
        let text = line.trim();
        let text = text.strip_prefix(':').map(str::trim).unwrap_or(text);
        if !text.is_empty() {
            parts.push(text);
        }
    }

    (!parts.is_empty()).then(|| parts.join(" "))
}
