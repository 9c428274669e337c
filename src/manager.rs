//! Uniform package API over the detected backend.
//!
//! Only one privileged operation may run at a time; a second request
//! while one is in flight is rejected instead of racing two credential
//! prompts.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::{self, Catalog, ALL};
use crate::cmd::SystemRunner;
use crate::config::Config;
use crate::distro::{self, native_names, packages::native_list};
use crate::error::Error;
use crate::package::{CommandResult, Package};
use crate::pkgmgr::{Backend, BackendKind, Operation, ProgressFn};
use crate::privilege::Helper;

pub struct PackageManager {
    backend: Box<dyn Backend>,
    catalog: Catalog,
    packages: RwLock<Vec<Package>>,
    busy: tokio::sync::Mutex<()>,
    current: Mutex<Option<CancellationToken>>,
}

impl PackageManager {
    pub fn new(backend: Box<dyn Backend>, catalog: Catalog) -> Self {
        let packages = catalog.packages();
        Self {
            backend,
            catalog,
            packages: RwLock::new(packages),
            busy: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    /// Build the manager for this host: configured backend or detected one
    pub fn detect(config: &Config) -> Result<Self> {
        let kind = config.backend.unwrap_or_else(distro::detect);
        tracing::info!("Using {} backend", kind);

        let runner = Arc::new(SystemRunner::with_timeout(config.timeout()));
        let backend = kind.create(runner, config.escalation);
        Ok(Self::new(backend, Catalog::builtin()?))
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Helper wrapping privileged commands
    pub fn escalation(&self) -> Helper {
        self.backend.session().escalator().helper()
    }

    /// Deadline for privileged commands
    pub fn timeout(&self) -> Option<Duration> {
        self.backend.session().runner().timeout()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The cached package list
    pub fn packages(&self) -> Vec<Package> {
        self.packages.read().map(|p| p.clone()).unwrap_or_default()
    }

    /// Cached packages of one category, or all for [`ALL`]
    pub fn category(&self, name: &str) -> Vec<Package> {
        let packages = self.packages();
        if name == ALL {
            return packages;
        }
        packages.into_iter().filter(|p| p.category == name).collect()
    }

    /// Filter the cached package list by a case-insensitive substring
    pub fn search(&self, query: &str) -> Vec<Package> {
        catalog::search(&self.packages(), query)
    }

    /// Query the backend for one package, in the catalog or not
    pub async fn info(&self, name: &str) -> Package {
        let base = match self.catalog.find(name) {
            Some((category, entry)) => Package::unqueried(
                &entry.name,
                &entry.display,
                &category.name,
                &category.description,
            ),
            None => Package::unqueried(name, name, "", ""),
        };
        let upgradable = self.upgradable().await;
        self.query(&base, &upgradable).await
    }

    /// Re-query installed state and details of every catalog package.
    /// Waits for a running privileged operation to finish first.
    pub async fn reload(&self) {
        let _guard = self.busy.lock().await;

        let upgradable = self.upgradable().await;
        let mut packages = Vec::new();
        for base in self.catalog.packages() {
            packages.push(self.query(&base, &upgradable).await);
        }
        tracing::debug!("Reloaded {} packages", packages.len());
        self.store(packages);
    }

    async fn upgradable(&self) -> HashSet<String> {
        self.backend.upgradable().await.into_iter().collect()
    }

    async fn query(&self, base: &Package, upgradable: &HashSet<String>) -> Package {
        let native = native_names(&base.name, self.kind());

        let mut installed = true;
        for name in &native {
            if !self.backend.is_installed(name).await {
                installed = false;
                break;
            }
        }
        let details = self.backend.details(&native[0]).await;

        Package {
            version: details.version(),
            size: details.size(),
            description: details
                .description
                .clone()
                .unwrap_or_else(|| base.description.clone()),
            installed,
            update_available: installed && native.iter().any(|n| upgradable.contains(n)),
            ..base.clone()
        }
    }

    fn store(&self, packages: Vec<Package>) {
        if let Ok(mut cached) = self.packages.write() {
            *cached = packages;
        }
    }

    /// Re-query the cached entries for `names` after a mutation
    async fn requery(&self, names: &[String]) {
        let stale: Vec<Package> = self
            .packages()
            .into_iter()
            .filter(|p| names.contains(&p.name))
            .collect();
        if stale.is_empty() {
            return;
        }

        let upgradable = self.upgradable().await;
        let mut fresh = Vec::new();
        for base in &stale {
            fresh.push(self.query(base, &upgradable).await);
        }

        let mut packages = self.packages();
        for package in fresh {
            if let Some(slot) = packages.iter_mut().find(|p| p.name == package.name) {
                *slot = package;
            }
        }
        self.store(packages);
    }

    /// Recompute `update_available` of the cached list
    async fn recheck_upgradable(&self) {
        let upgradable = self.upgradable().await;
        let kind = self.kind();

        let mut packages = self.packages();
        for package in &mut packages {
            package.update_available = package.installed
                && native_names(&package.name, kind)
                    .iter()
                    .any(|n| upgradable.contains(n));
        }
        self.store(packages);
    }

    pub async fn install(&self, names: &[String], on_progress: ProgressFn<'_>) -> CommandResult {
        self.mutate(Operation::Install, names, on_progress).await
    }

    pub async fn remove(&self, names: &[String], on_progress: ProgressFn<'_>) -> CommandResult {
        self.mutate(Operation::Remove, names, on_progress).await
    }

    /// Upgrade `names`, or the whole system when empty
    pub async fn update(&self, names: &[String], on_progress: ProgressFn<'_>) -> CommandResult {
        self.mutate(Operation::Update, names, on_progress).await
    }

    /// Refresh the native package database
    pub async fn refresh(&self, on_progress: ProgressFn<'_>) -> CommandResult {
        self.mutate(Operation::Refresh, &[], on_progress).await
    }

    /// Abort the privileged operation in flight. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        let token = self.current.lock().ok().and_then(|slot| slot.clone());
        match token {
            Some(token) => {
                tracing::info!("Cancelling package operation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn set_current(&self, token: Option<CancellationToken>) {
        if let Ok(mut slot) = self.current.lock() {
            *slot = token;
        }
    }

    async fn mutate(
        &self,
        operation: Operation,
        names: &[String],
        on_progress: ProgressFn<'_>,
    ) -> CommandResult {
        let Ok(_guard) = self.busy.try_lock() else {
            tracing::warn!("Rejected {:?}: another operation is running", operation);
            return Error::Busy.into();
        };

        let cancel = CancellationToken::new();
        self.set_current(Some(cancel.clone()));

        let native = native_list(names, self.kind());
        let result = match operation {
            Operation::Install => self.backend.install(&native, on_progress, &cancel).await,
            Operation::Remove => self.backend.remove(&native, on_progress, &cancel).await,
            Operation::Update => self.backend.update(&native, on_progress, &cancel).await,
            Operation::Refresh => self.backend.refresh(on_progress, &cancel).await,
        };

        self.set_current(None);

        if result.success {
            match operation {
                Operation::Refresh => self.recheck_upgradable().await,
                Operation::Update if names.is_empty() => self.recheck_upgradable().await,
                _ => self.requery(names).await,
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::InstallStatus;
    use crate::testing::ScriptedRunner;
    use tokio::sync::Notify;

    fn manager(
        runner: ScriptedRunner,
        kind: BackendKind,
    ) -> (Arc<PackageManager>, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let backend = kind.create(runner.clone(), Helper::Pkexec);
        let manager = PackageManager::new(backend, Catalog::builtin().unwrap());
        (Arc::new(manager), runner)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn starts_with_unqueried_catalog() {
        let (manager, runner) = manager(ScriptedRunner::new(), BackendKind::Apt);
        assert_eq!(manager.packages().len(), manager.catalog().packages().len());
        assert!(manager.packages().iter().all(|p| !p.installed));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn search_filters_cached_list() {
        let (manager, _) = manager(ScriptedRunner::new(), BackendKind::Apt);
        let results = manager.search("Git");
        assert!(results.iter().any(|p| p.name == "git"));
        assert!(manager.search("nonexistentxyz").is_empty());
        assert_eq!(manager.search("").len(), manager.packages().len());
    }

    #[test]
    fn category_filter() {
        let (manager, _) = manager(ScriptedRunner::new(), BackendKind::Apt);
        let servers = manager.category("Web Servers");
        assert_eq!(servers.len(), 3);
        assert_eq!(manager.category(ALL).len(), manager.packages().len());
        assert!(manager.category("Nope").is_empty());
    }

    #[tokio::test]
    async fn install_translates_catalog_names() {
        let (manager, runner) = manager(
            ScriptedRunner::new().with_program("pkexec").with_stream(
                &["pkexec", "dnf", "install", "-y", "gcc", "gcc-c++", "make"],
                &["Downloading Packages", "Running Transaction", "Complete!"],
                CommandResult::ok("completed successfully"),
            ),
            BackendKind::Dnf,
        );

        let mut events = Vec::new();
        let result = manager
            .install(&names(&["build-essential"]), &mut |p| events.push(p.clone()))
            .await;

        assert!(result.success, "{}", result.message);
        assert_eq!(
            events.iter().map(|e| e.percentage).collect::<Vec<_>>(),
            vec![25, 75, 100]
        );
        assert_eq!(runner.calls()[0][0], "pkexec");
    }

    #[tokio::test]
    async fn successful_install_refreshes_cached_entry() {
        let (manager, _) = manager(
            ScriptedRunner::new()
                .with_program("pkexec")
                .with_stream(
                    &["pkexec", "apt-get", "install", "-y", "docker.io"],
                    &["Progress: [100%]"],
                    CommandResult::ok("completed successfully"),
                )
                .with_output(
                    &["dpkg", "-l", "docker.io"],
                    0,
                    "ii  docker.io  24.0.7  amd64  Linux container runtime\n",
                    "",
                )
                .with_output(
                    &["apt", "show", "docker.io"],
                    0,
                    "Package: docker.io\n\
                     Version: 24.0.7-0ubuntu4\n\
                     Installed-Size: 120 MB\n\
                     Description: Linux container runtime\n",
                    "",
                ),
            BackendKind::Apt,
        );

        let result = manager.install(&names(&["docker"]), &mut |_| {}).await;
        assert!(result.success);

        let docker = manager.packages().into_iter().find(|p| p.name == "docker").unwrap();
        assert!(docker.installed);
        assert_eq!(docker.size, "120 MB");
        assert_eq!(docker.version, "24.0.7-0ubuntu4");
        assert_eq!(docker.description, "Linux container runtime");
        assert_eq!(docker.display_name, "Docker");
    }

    #[tokio::test]
    async fn reload_queries_every_package() {
        let (manager, _) = manager(
            ScriptedRunner::new()
                .with_output(&["pacman", "-Q", "vim"], 0, "vim 9.1.0785-1\n", "")
                .with_output(&["pacman", "-Qu"], 0, "vim 9.1.0785-1 -> 9.1.0866-1\n", "")
                .with_output(
                    &["pacman", "-Si", "vim"],
                    0,
                    "Name : vim\nVersion : 9.1.0866-1\nInstalled Size : 4.47 MiB\n",
                    "",
                ),
            BackendKind::Pacman,
        );

        manager.reload().await;

        let packages = manager.packages();
        let vim = packages.iter().find(|p| p.name == "vim").unwrap();
        assert!(vim.installed);
        assert!(vim.update_available);
        assert_eq!(vim.size, "4.47 MiB");

        let git = packages.iter().find(|p| p.name == "git").unwrap();
        assert!(!git.installed);
        assert!(!git.update_available);
        assert_eq!(git.size, "Unknown");
        // catalog description is kept when the backend has none
        assert_eq!(git.description, "Essential development tools and languages");
    }

    #[tokio::test]
    async fn info_for_unlisted_package() {
        let (manager, _) = manager(
            ScriptedRunner::new().with_output(&["rpm", "-q", "htop"], 1, "", ""),
            BackendKind::Dnf,
        );
        let info = manager.info("btop").await;
        assert_eq!(info.name, "btop");
        assert_eq!(info.category, "");
        assert_eq!(info.description, "");
        assert!(!info.installed);
    }

    #[tokio::test]
    async fn refresh_runs_privileged_index_update() {
        let (manager, runner) = manager(
            ScriptedRunner::new().with_program("pkexec").with_stream(
                &["pkexec", "apt-get", "update"],
                &["Hit:1 http://archive.ubuntu.com/ubuntu noble InRelease"],
                CommandResult::ok("completed successfully"),
            ),
            BackendKind::Apt,
        );
        let mut last = None;
        let result = manager.refresh(&mut |p| last = Some(p.status)).await;
        assert!(result.success);
        assert_eq!(result.message, "Refresh completed successfully");
        assert_eq!(last, Some(InstallStatus::Complete));
        assert_eq!(
            runner.calls(),
            vec![
                vec!["pkexec", "apt-get", "update"],
                vec!["apt", "list", "--upgradable"],
            ]
        );
    }

    #[tokio::test]
    async fn refresh_and_full_update_recheck_upgradable_flags() {
        let (manager, _) = manager(
            ScriptedRunner::new()
                .with_program("pkexec")
                .with_output(&["pacman", "-Q", "vim"], 0, "vim 9.1.0785-1\n", "")
                .with_output(&["pacman", "-Qu"], 1, "", "")
                .with_output(&["pacman", "-Qu"], 0, "vim 9.1.0785-1 -> 9.1.0866-1\n", "")
                .with_output(&["pacman", "-Qu"], 1, "", "")
                .with_stream(
                    &["pkexec", "pacman", "-Sy"],
                    &[],
                    CommandResult::ok("completed successfully"),
                )
                .with_stream(
                    &["pkexec", "pacman", "-Syu", "--noconfirm"],
                    &[],
                    CommandResult::ok("completed successfully"),
                ),
            BackendKind::Pacman,
        );
        let vim = || manager.packages().into_iter().find(|p| p.name == "vim").unwrap();

        manager.reload().await;
        assert!(vim().installed);
        assert!(!vim().update_available);

        assert!(manager.refresh(&mut |_| {}).await.success);
        assert!(vim().update_available);

        assert!(manager.update(&[], &mut |_| {}).await.success);
        assert!(!vim().update_available);
    }

    #[tokio::test]
    async fn reload_waits_for_running_operation() {
        let gate = Arc::new(Notify::new());
        let (manager, runner) = manager(
            ScriptedRunner::new()
                .with_program("pkexec")
                .with_stream(
                    &["pkexec", "apt-get", "install", "-y", "git"],
                    &[],
                    CommandResult::ok("completed successfully"),
                )
                .with_gate(gate),
            BackendKind::Apt,
        );

        let install = tokio::spawn({
            let manager = manager.clone();
            async move { manager.install(&names(&["git"]), &mut |_| {}).await }
        });
        runner.started().await;

        let reload = tokio::time::timeout(Duration::from_millis(50), manager.reload()).await;
        assert!(reload.is_err());
        assert_eq!(runner.calls().len(), 1);

        manager.cancel();
        assert_eq!(install.await.unwrap().message, "cancelled");
    }

    #[test]
    fn configured_backend_skips_detection() {
        let config = Config {
            backend: Some(BackendKind::Pacman),
            escalation: Helper::Doas,
            timeout_secs: Some(600),
            ..Config::default()
        };
        let manager = PackageManager::detect(&config).unwrap();
        assert_eq!(manager.kind(), BackendKind::Pacman);
        assert_eq!(manager.escalation(), Helper::Doas);
        assert_eq!(manager.timeout(), Some(Duration::from_secs(600)));

        let manager = PackageManager::detect(&Config {
            backend: Some(BackendKind::Dnf),
            ..Config::default()
        })
        .unwrap();
        assert_eq!(manager.kind(), BackendKind::Dnf);
        assert_eq!(manager.escalation(), Helper::Pkexec);
        assert_eq!(manager.timeout(), None);
    }

    #[tokio::test]
    async fn second_operation_is_rejected_and_first_can_be_cancelled() {
        let gate = Arc::new(Notify::new());
        let (manager, runner) = manager(
            ScriptedRunner::new()
                .with_program("pkexec")
                .with_stream(
                    &["pkexec", "apt-get", "install", "-y", "git"],
                    &["Progress: [10%]"],
                    CommandResult::ok("completed successfully"),
                )
                .with_gate(gate),
            BackendKind::Apt,
        );

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.install(&names(&["git"]), &mut |_| {}).await }
        });
        runner.started().await;

        let second = manager.install(&names(&["vim"]), &mut |_| {}).await;
        assert!(!second.success);
        assert_eq!(second.message, "another package operation is already in progress");

        assert!(manager.cancel());
        let first = first.await.unwrap();
        assert!(!first.success);
        assert_eq!(first.message, "cancelled");

        // nothing left to cancel, and the guard is released
        assert!(!manager.cancel());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn missing_helper_fails_without_spawning() {
        let (manager, runner) = manager(ScriptedRunner::new(), BackendKind::Pacman);
        let result = manager.install(&names(&["vim"]), &mut |_| {}).await;
        assert!(!result.success);
        assert_eq!(result.message, "pkexec not found. Please install polkit");
        assert!(runner.calls().is_empty());
    }
}
