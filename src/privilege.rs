//! Privilege escalation for package mutations.
//!
//! The helper is probed on PATH before anything is wrapped.

use serde::{Deserialize, Serialize};

use crate::cmd::Runner;
use crate::error::Error;
use crate::pkgmgr::BackendKind;

/// Supported elevation helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Helper {
    #[default]
    Pkexec,
    Sudo,
    Doas,
}

impl Helper {
    pub fn program(&self) -> &'static str {
        match self {
            Helper::Pkexec => "pkexec",
            Helper::Sudo => "sudo",
            Helper::Doas => "doas",
        }
    }

    /// Distro package that ships this helper
    pub fn provider(&self, kind: BackendKind) -> &'static str {
        match (self, kind) {
            (Helper::Pkexec, BackendKind::Apt) => "policykit-1",
            (Helper::Pkexec, _) => "polkit",
            (Helper::Sudo, _) => "sudo",
            (Helper::Doas, BackendKind::Pacman) => "opendoas",
            (Helper::Doas, _) => "doas",
        }
    }
}

/// Wraps privileged commands with the configured helper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalator {
    helper: Helper,
    kind: BackendKind,
}

impl Escalator {
    pub fn new(helper: Helper, kind: BackendKind) -> Self {
        Self { helper, kind }
    }

    pub fn helper(&self) -> Helper {
        self.helper
    }

    /// Check the helper exists, then prefix `argv` with it.
    ///
    /// Nothing is spawned when the helper is missing.
    pub fn wrap(&self, runner: &dyn Runner, argv: Vec<String>) -> Result<Vec<String>, Error> {
        let program = self.helper.program();
        if runner.locate(program).is_none() {
            tracing::warn!("Privilege helper {} is not on PATH", program);
            return Err(Error::ToolMissing {
                program: program.to_string(),
                package: self.helper.provider(self.kind).to_string(),
            });
        }

        let mut wrapped = vec![program.to_string()];
        if self.helper == Helper::Sudo {
            wrapped.push("--".to_string());
        }
        wrapped.extend(argv);
        Ok(wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::argv;
    use crate::testing::ScriptedRunner;

    #[test]
    fn missing_helper_names_the_provider() {
        let runner = ScriptedRunner::new();
        let escalator = Escalator::new(Helper::Pkexec, BackendKind::Apt);

        let err = escalator
            .wrap(&runner, argv(["apt-get", "install", "-y", "git"]))
            .unwrap_err();

        assert_eq!(err.to_string(), "pkexec not found. Please install policykit-1");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn providers_per_backend() {
        assert_eq!(Helper::Pkexec.provider(BackendKind::Dnf), "polkit");
        assert_eq!(Helper::Pkexec.provider(BackendKind::Pacman), "polkit");
        assert_eq!(Helper::Doas.provider(BackendKind::Pacman), "opendoas");
        assert_eq!(Helper::Doas.provider(BackendKind::Apt), "doas");
        assert_eq!(Helper::Sudo.provider(BackendKind::Apt), "sudo");
    }

    #[test]
    fn pkexec_prefixes_argv() {
        let runner = ScriptedRunner::new().with_program("pkexec");
        let wrapped = Escalator::new(Helper::Pkexec, BackendKind::Dnf)
            .wrap(&runner, argv(["dnf", "install", "-y", "git"]))
            .unwrap();
        assert_eq!(wrapped, argv(["pkexec", "dnf", "install", "-y", "git"]));
    }

    #[test]
    fn sudo_separates_its_options() {
        let runner = ScriptedRunner::new().with_program("sudo");
        let wrapped = Escalator::new(Helper::Sudo, BackendKind::Pacman)
            .wrap(&runner, argv(["pacman", "-S", "--noconfirm", "vim"]))
            .unwrap();
        assert_eq!(
            wrapped,
            argv(["sudo", "--", "pacman", "-S", "--noconfirm", "vim"])
        );
    }
}
