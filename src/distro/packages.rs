//! Catalog package names mapped to distro-specific names.
//! The catalog uses Debian/Ubuntu names; other distros translate them here.
//! One catalog name may expand to several native packages.

use crate::pkgmgr::BackendKind;

type NameMap = &'static [(&'static str, &'static [&'static str])];

const APT_NAMES: NameMap = &[("docker", &["docker.io"]), ("vscode", &["code"])];

const DNF_NAMES: NameMap = &[
    ("docker", &["docker-ce"]),
    ("vscode", &["code"]),
    ("build-essential", &["gcc", "gcc-c++", "make"]),
    ("g++", &["gcc-c++"]),
    ("openjdk-17-jdk", &["java-17-openjdk-devel"]),
    ("rust-all", &["rust", "cargo"]),
    ("apache2", &["httpd"]),
    ("redis-server", &["redis"]),
    ("sqlite3", &["sqlite"]),
    ("postgresql-client", &["postgresql"]),
    ("chromium-browser", &["chromium"]),
];

const PACMAN_NAMES: NameMap = &[
    ("python3", &["python"]),
    ("vscode", &["code"]),
    ("build-essential", &["base-devel"]),
    ("g++", &["gcc"]),
    ("golang", &["go"]),
    ("openjdk-17-jdk", &["jdk17-openjdk"]),
    ("rust-all", &["rust"]),
    ("apache2", &["apache"]),
    ("redis-server", &["redis"]),
    ("sqlite3", &["sqlite"]),
    ("mysql-server", &["mariadb"]),
    ("postgresql-client", &["postgresql-libs"]),
    ("chromium-browser", &["chromium"]),
    ("openssh-server", &["openssh"]),
];

fn table(kind: BackendKind) -> NameMap {
    match kind {
        BackendKind::Apt => APT_NAMES,
        BackendKind::Dnf => DNF_NAMES,
        BackendKind::Pacman => PACMAN_NAMES,
    }
}

/// Native package names for a catalog name. Unmapped names pass through.
pub fn native_names(name: &str, kind: BackendKind) -> Vec<String> {
    match table(kind).iter().find(|(generic, _)| *generic == name) {
        Some((_, native)) => native.iter().map(|n| n.to_string()).collect(),
        None => vec![name.to_string()],
    }
}

/// Expand a list of catalog names, keeping order and dropping duplicates
pub fn native_list(names: &[String], kind: BackendKind) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for native in names.iter().flat_map(|n| native_names(n, kind)) {
        if !out.contains(&native) {
            out.push(native);
        }
    }
    out
}
