use serde::Serialize;

/// Placeholder returned when a size or version cannot be determined
pub const UNKNOWN: &str = "Unknown";

/// Placeholder returned when a description cannot be determined
pub const NO_DESCRIPTION: &str = "No description available";

/// A package as shown to the user. Rebuilt on every query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub size: String,
    pub description: String,
    pub installed: bool,
    pub update_available: bool,
    pub category: String,
}

impl Package {
    /// A catalog entry that has not been queried against the system yet
    pub fn unqueried(name: &str, display_name: &str, category: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            version: UNKNOWN.to_string(),
            size: UNKNOWN.to_string(),
            description: description.to_string(),
            installed: false,
            update_available: false,
            category: category.to_string(),
        }
    }

    /// Case-insensitive substring match over name, display name,
    /// description and category. `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        [
            &self.name,
            &self.display_name,
            &self.description,
            &self.category,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallStatus {
    Pending,
    Downloading,
    Installing,
    Complete,
    Failed,
}

impl InstallStatus {
    pub fn label(&self) -> &'static str {
        match self {
            InstallStatus::Pending => "Pending",
            InstallStatus::Downloading => "Downloading",
            InstallStatus::Installing => "Installing",
            InstallStatus::Complete => "Complete",
            InstallStatus::Failed => "Failed",
        }
    }
}

/// One progress event of a package operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallProgress {
    pub targets: Vec<String>,
    pub percentage: u8,
    pub status: InstallStatus,
    /// Raw output line that produced this event
    pub detail: String,
}

/// Terminal value of every backend operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub success: bool,
    pub message: String,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            success: false,
            message: message.into(),
        }
    }

    /// Result of an exited process; zero is success
    pub fn from_exit(exit_code: i32, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            success: exit_code == 0,
            message: message.into(),
        }
    }
}
