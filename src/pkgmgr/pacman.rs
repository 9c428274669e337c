use super::{block_field, first_field, Backend, BackendKind, Details, Session};
use async_trait::async_trait;

use crate::cmd::argv;

/// Pacman package manager (Arch Linux, Manjaro, EndeavourOS)
pub struct Pacman {
    session: Session,
}

impl Pacman {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl Backend for Pacman {
    fn kind(&self) -> BackendKind {
        BackendKind::Pacman
    }

    fn session(&self) -> &Session {
        &self.session
    }

    fn info_command(&self, name: &str) -> Vec<String> {
        argv(["pacman", "-Si", name])
    }

    fn parse_details(&self, output: &str) -> Details {
        Details {
            version: first_field(output, &["Version"]),
            size: first_field(output, &["Installed Size"])
                .or_else(|| first_field(output, &["Download Size"])),
            description: block_field(output, "Description"),
        }
    }

    fn install_command(&self, names: &[String]) -> Vec<String> {
        let mut args = argv(["pacman", "-S", "--noconfirm"]);
        args.extend_from_slice(names);
        args
    }

    fn remove_command(&self, names: &[String]) -> Vec<String> {
        let mut args = argv(["pacman", "-R", "--noconfirm"]);
        args.extend_from_slice(names);
        args
    }

    fn update_command(&self, names: &[String]) -> Vec<String> {
        if names.is_empty() {
            return argv(["pacman", "-Syu", "--noconfirm"]);
        }
        self.install_command(names)
    }

    fn refresh_command(&self) -> Vec<String> {
        argv(["pacman", "-Sy"])
    }

    async fn is_installed(&self, name: &str) -> bool {
        self.session
            .runner()
            .run(&argv(["pacman", "-Q", name]))
            .await
            .success()
    }

    async fn upgradable(&self) -> Vec<String> {
        // exits 1 when nothing is out of date
        let output = self.session.runner().run(&argv(["pacman", "-Qu"])).await;
        if !output.success() {
            return Vec::new();
        }
        output
            .stdout
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect()
    }
}
