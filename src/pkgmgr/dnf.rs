use super::{block_field, first_field, Backend, BackendKind, Details, Session};
use async_trait::async_trait;

use crate::cmd::argv;

const SIZE_FIELDS: &[&str] = &["Size", "Download size", "Installed size", "Package size"];

/// `dnf check-update` exits with 100 when updates are available
const UPDATES_AVAILABLE: i32 = 100;

/// DNF package manager (Fedora, RHEL, CentOS, Rocky)
pub struct Dnf {
    session: Session,
}

impl Dnf {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

/// Package names from `dnf check-update` rows like `git.x86_64  2.43.5-1.fc39  updates`
fn parse_check_update(output: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in output.lines() {
        if line.starts_with("Obsoleting") {
            break;
        }
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() != 3 {
            continue;
        }
        if let Some((name, _arch)) = columns[0].rsplit_once('.') {
            names.push(name.to_string());
        }
    }
    names
}

#[async_trait]
impl Backend for Dnf {
    fn kind(&self) -> BackendKind {
        BackendKind::Dnf
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn info_command(&self, name: &str) -> Vec<String> {
        argv(["dnf", "info", name])
    }

    fn parse_details(&self, output: &str) -> Details {
        let version = first_field(output, &["Version"]).map(|version| {
            match first_field(output, &["Release"]) {
                Some(release) => format!("{}-{}", version, release),
                None => version,
            }
        });

        Details {
            version,
            size: first_field(output, SIZE_FIELDS),
            description: block_field(output, "Description"),
        }
    }

    fn install_command(&self, names: &[String]) -> Vec<String> {
        let mut args = argv(["dnf", "install", "-y"]);
        args.extend_from_slice(names);
        args
    }

    fn remove_command(&self, names: &[String]) -> Vec<String> {
        let mut args = argv(["dnf", "remove", "-y"]);
        args.extend_from_slice(names);
        args
    }

    fn update_command(&self, names: &[String]) -> Vec<String> {
        let mut args = argv(["dnf", "upgrade", "-y"]);
        args.extend_from_slice(names);
        args
    }

    fn refresh_command(&self) -> Vec<String> {
        argv(["dnf", "makecache"])
    }

    async fn is_installed(&self, name: &str) -> bool {
        self.session
            .runner()
            .run(&argv(["rpm", "-q", name]))
            .await
            .success()
    }

    async fn upgradable(&self) -> Vec<String> {
        let output = self
            .session
            .runner()
            .run(&argv(["dnf", "-q", "check-update"]))
            .await;
        if output.result.exit_code != UPDATES_AVAILABLE {
            return Vec::new();
        }
        parse_check_update(&output.stdout)
    }
}
