//! Progress classification of native tool output.
//!
//! dnf and pacman never print a percentage, so their progress is inferred
//! from fixed milestone phrases. apt prints explicit `Progress: [N%]`
//! tokens. Either way the reported percentage never goes backwards within
//! one operation.

use crate::package::{CommandResult, InstallProgress, InstallStatus};
use crate::pkgmgr::BackendKind;

struct Milestone {
    trigger: &'static str,
    percentage: u8,
    status: InstallStatus,
}

const fn milestone(trigger: &'static str, percentage: u8, status: InstallStatus) -> Milestone {
    Milestone {
        trigger,
        percentage,
        status,
    }
}

// Evaluated top to bottom, first match wins
const DNF_MILESTONES: &[Milestone] = &[
    milestone("Downloading Packages", 25, InstallStatus::Downloading),
    milestone("Testing Transaction", 50, InstallStatus::Installing),
    milestone("Running Transaction", 75, InstallStatus::Installing),
    milestone("Complete!", 100, InstallStatus::Complete),
];

// Matched against the lowercased line
const PACMAN_MILESTONES: &[Milestone] = &[
    milestone("resolving dependencies", 25, InstallStatus::Installing),
    milestone("checking conflicts", 50, InstallStatus::Installing),
    milestone("downloading ", 75, InstallStatus::Downloading),
    milestone("installing ", 90, InstallStatus::Installing),
];

/// Per-backend line classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressParser {
    Apt,
    Dnf,
    Pacman,
}

impl From<BackendKind> for ProgressParser {
    fn from(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Apt => ProgressParser::Apt,
            BackendKind::Dnf => ProgressParser::Dnf,
            BackendKind::Pacman => ProgressParser::Pacman,
        }
    }
}

impl ProgressParser {
    /// Classify one output line given the percentage reported so far.
    ///
    /// Returns `None` when the line carries no progress information or
    /// would move progress backwards; the caller keeps its prior state.
    pub fn classify(&self, line: &str, prior: u8) -> Option<(u8, InstallStatus)> {
        let (percentage, status) = match self {
            ProgressParser::Apt => {
                let percentage = apt_percentage(line)?;
                let status = if percentage >= 100 {
                    InstallStatus::Complete
                } else {
                    InstallStatus::Installing
                };
                (percentage, status)
            }
            ProgressParser::Dnf => first_milestone(DNF_MILESTONES, line)?,
            ProgressParser::Pacman => first_milestone(PACMAN_MILESTONES, &line.to_lowercase())?,
        };

        if percentage < prior {
            tracing::debug!("Ignoring progress regression {}% -> {}%", prior, percentage);
            return None;
        }
        Some((percentage.min(100), status))
    }
}

fn first_milestone(table: &[Milestone], line: &str) -> Option<(u8, InstallStatus)> {
    table
        .iter()
        .find(|m| line.contains(m.trigger))
        .map(|m| (m.percentage, m.status))
}

/// Extract `N` from `Progress: [ N%]`
fn apt_percentage(line: &str) -> Option<u8> {
    let rest = &line[line.find("Progress:")? + "Progress:".len()..];
    let open = rest.find('[')?;
    let inner = &rest[open + 1..];
    let close = inner.find('%')?;
    let value: u32 = inner[..close].trim().parse().ok()?;
    Some(value.min(100) as u8)
}

/// Running progress state for one package operation
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    parser: ProgressParser,
    targets: Vec<String>,
    percentage: u8,
    status: InstallStatus,
}

impl ProgressTracker {
    pub fn new(parser: ProgressParser, targets: &[String]) -> Self {
        Self {
            parser,
            targets: targets.to_vec(),
            percentage: 0,
            status: InstallStatus::Pending,
        }
    }

    pub fn percentage(&self) -> u8 {
        self.percentage
    }

    pub fn status(&self) -> InstallStatus {
        self.status
    }

    /// Fold one output line into the state and return the resulting event
    pub fn observe(&mut self, line: &str) -> InstallProgress {
        if let Some((percentage, status)) = self.parser.classify(line, self.percentage) {
            self.percentage = percentage;
            self.status = status;
        }
        self.event(line)
    }

    /// Closing event once the process has exited, if one is needed.
    ///
    /// Success always ends at 100; failure is reported at the current
    /// percentage.
    pub fn finish(&mut self, result: &CommandResult) -> Option<InstallProgress> {
        if result.success {
            if self.percentage >= 100 && self.status == InstallStatus::Complete {
                return None;
            }
            self.percentage = 100;
            self.status = InstallStatus::Complete;
        } else {
            self.status = InstallStatus::Failed;
        }
        Some(self.event(&result.message))
    }

    fn event(&self, detail: &str) -> InstallProgress {
        InstallProgress {
            targets: self.targets.clone(),
            percentage: self.percentage,
            status: self.status,
            detail: detail.to_string(),
        }
    }
}
