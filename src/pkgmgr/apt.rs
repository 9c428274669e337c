use super::{first_field, Backend, BackendKind, Details, Session};
use async_trait::async_trait;

use crate::cmd::argv;

const SIZE_FIELDS: &[&str] = &["Size", "Installed-Size", "Download-Size"];

/// Apt package manager (Debian, Ubuntu, Mint, Pop!_OS)
pub struct Apt {
    session: Session,
}

impl Apt {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

/// `dpkg -l` marks installed packages with status `ii`
fn dpkg_lists_installed(output: &str, name: &str) -> bool {
    output.lines().any(|line| {
        let mut columns = line.split_whitespace();
        let status = columns.next();
        let package = columns.next().unwrap_or_default();
        // multiarch packages are listed as name:arch
        let package = package.split(':').next().unwrap_or_default();
        status == Some("ii") && package == name
    })
}

/// `apt list --upgradable` lines look like
/// `git/jammy-updates 1:2.34.1 amd64 [upgradable from: ...]`
fn parse_upgradable(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.contains("[upgradable from"))
        .filter_map(|line| line.split('/').next())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Backend for Apt {
    fn kind(&self) -> BackendKind {
        BackendKind::Apt
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn info_command(&self, name: &str) -> Vec<String> {
        argv(["apt", "show", name])
    }

    fn parse_details(&self, output: &str) -> Details {
        Details {
            version: first_field(output, &["Version"]),
            size: first_field(output, SIZE_FIELDS),
            // apt indents the long description; only the synopsis is kept
            description: first_field(output, &["Description"]),
        }
    }

    fn install_command(&self, names: &[String]) -> Vec<String> {
        let mut args = argv(["apt-get", "install", "-y"]);
        args.extend_from_slice(names);
        args
    }

    fn remove_command(&self, names: &[String]) -> Vec<String> {
        let mut args = argv(["apt-get", "remove", "-y"]);
        args.extend_from_slice(names);
        args
    }

    fn update_command(&self, names: &[String]) -> Vec<String> {
        if names.is_empty() {
            return argv(["apt-get", "upgrade", "-y"]);
        }
        let mut args = argv(["apt-get", "install", "--only-upgrade", "-y"]);
        args.extend_from_slice(names);
        args
    }

    fn refresh_command(&self) -> Vec<String> {
        argv(["apt-get", "update"])
    }

    async fn is_installed(&self, name: &str) -> bool {
        let output = self.session.runner().run(&argv(["dpkg", "-l", name])).await;
        output.success() && dpkg_lists_installed(&output.stdout, name)
    }

    async fn upgradable(&self) -> Vec<String> {
        let output = self
            .session
            .runner()
            .run(&argv(["apt", "list", "--upgradable"]))
            .await;
        if !output.success() {
            return Vec::new();
        }
        parse_upgradable(&output.stdout)
    }
}
