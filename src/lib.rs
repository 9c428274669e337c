pub mod catalog;
pub mod cmd;
pub mod config;
pub mod distro;
pub mod error;
pub mod manager;
pub mod package;
pub mod pkgmgr;
pub mod privilege;
pub mod progress;

#[cfg(test)]
mod testing;

pub use catalog::Catalog;
pub use config::Config;
pub use error::Error;
pub use manager::PackageManager;
pub use package::{CommandResult, InstallProgress, InstallStatus, Package};
pub use pkgmgr::BackendKind;
