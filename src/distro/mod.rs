//! Host distribution detection.
//!
//! The os-release file is read once per process; every unknown
//! distribution falls back to apt.

pub mod packages;

pub use packages::native_names;

use once_cell::sync::OnceCell;
use std::fs;

use crate::pkgmgr::BackendKind;

const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

static HOST: OnceCell<OsRelease> = OnceCell::new();

/// Identity fields of an os-release file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
    pub name: Option<String>,
    pub pretty_name: Option<String>,
    pub version_id: Option<String>,
}

impl OsRelease {
    pub fn parse(contents: &str) -> Self {
        let mut release = OsRelease::default();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');

            match key.trim() {
                "ID" => release.id = value.to_lowercase(),
                "ID_LIKE" => {
                    release.id_like = value.split_whitespace().map(str::to_lowercase).collect()
                }
                "NAME" => release.name = Some(value.to_string()),
                "PRETTY_NAME" => release.pretty_name = Some(value.to_string()),
                "VERSION_ID" => release.version_id = Some(value.to_string()),
                _ => {}
            }
        }

        release
    }

    /// Backend for this distribution: `ID` first, then each `ID_LIKE`
    /// entry, then apt
    pub fn backend(&self) -> BackendKind {
        std::iter::once(&self.id)
            .chain(&self.id_like)
            .find_map(|id| BackendKind::from_distro_id(id))
            .unwrap_or_default()
    }

    /// Best human-readable name
    pub fn display_name(&self) -> &str {
        self.pretty_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(if self.id.is_empty() { "Unknown Linux" } else { self.id.as_str() })
    }
}

impl BackendKind {
    /// Look a distribution id up in the fixed backend table
    pub fn from_distro_id(id: &str) -> Option<BackendKind> {
        match id {
            "ubuntu" | "debian" | "linuxmint" | "pop" => Some(BackendKind::Apt),
            "fedora" | "rhel" | "centos" | "rocky" => Some(BackendKind::Dnf),
            "arch" | "manjaro" | "endeavouros" => Some(BackendKind::Pacman),
            _ => None,
        }
    }
}

/// The host's os-release, read on first use
pub fn host() -> &'static OsRelease {
    HOST.get_or_init(|| {
        for path in OS_RELEASE_PATHS {
            match fs::read_to_string(path) {
                Ok(contents) => return OsRelease::parse(&contents),
                Err(e) => tracing::debug!("Failed to read {}: {}", path, e),
            }
        }
        tracing::warn!("No os-release file found, assuming a Debian-like system");
        OsRelease::default()
    })
}

/// Detect the backend for the running system. Never fails.
pub fn detect() -> BackendKind {
    let kind = host().backend();
    tracing::debug!("Detected {} ({})", host().display_name(), kind);
    kind
}
