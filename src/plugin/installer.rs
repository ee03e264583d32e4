//! On-demand package installation.
//!
//! Triggered only when a compile fails on a missing dependency. The
//! installer shells out to the external package manager and reports plain
//! success or failure; the single compile retry afterwards is the
//! registrar's job.

use tokio::process::Command;

use super::{LoadError, LoadResult, Manifest};

/// Fixed installer flags: upgrade quietly, skip version-check and
/// script-location noise.
const INSTALL_ARGS: &[&str] = &[
    "install",
    "--upgrade",
    "-q",
    "--disable-pip-version-check",
    "--no-warn-script-location",
];

/// Requirement discovery: the manifest's declared list when non-empty,
/// otherwise the single package named by the failure itself.
pub fn discover_requirements(manifest: &Manifest, missing: Option<&str>) -> Vec<String> {
    if !manifest.requirements.is_empty() {
        return manifest.requirements.clone();
    }

    missing.map(|p| vec![p.to_string()]).unwrap_or_default()
}

/// True when packages go to the user site: neither a package-target nor a
/// virtual-environment marker is present.
fn user_install() -> bool {
    std::env::var_os("PIP_TARGET").is_none() && std::env::var_os("VIRTUAL_ENV").is_none()
}

/// Spawns the package-installer subprocess.
pub struct Installer {
    program: String,
}

impl Installer {
    /// Create an installer for the given executable.
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Install `requirements`, waiting for the subprocess to finish.
    /// Exit code zero is the only success.
    pub async fn install(&self, requirements: &[String]) -> LoadResult<()> {
        tracing::debug!(?requirements, "installing requirements");

        let mut command = Command::new(&self.program);
        command.args(INSTALL_ARGS);

        if user_install() {
            command.arg("--user");
        }

        command.args(requirements);

        let status = command
            .status()
            .await
            .map_err(|e| {
                tracing::error!(program = %self.program, error = %e, "installer failed to spawn");
                LoadError::RequirementsInstallFailed
            })?;

        if !status.success() {
            tracing::warn!(?status, "requirements installation failed");
            return Err(LoadError::RequirementsInstallFailed);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_discovery_prefers_manifest() {
        let manifest = Manifest {
            requirements: vec!["pillow".to_string(), "numpy".to_string()],
            ..Manifest::default()
        };

        let reqs = discover_requirements(&manifest, Some("missing_pkg"));
        assert_eq!(reqs, vec!["pillow", "numpy"]);
    }

    #[test]
    fn test_discovery_falls_back_to_reported_package() {
        let reqs = discover_requirements(&Manifest::default(), Some("missing_pkg"));
        assert_eq!(reqs, vec!["missing_pkg"]);
    }

    #[test]
    fn test_discovery_empty_when_nothing_known() {
        assert!(discover_requirements(&Manifest::default(), None).is_empty());
    }

    #[test]
    #[serial]
    fn test_user_install_without_markers() {
        std::env::remove_var("PIP_TARGET");
        std::env::remove_var("VIRTUAL_ENV");
        assert!(user_install());
    }

    #[test]
    #[serial]
    fn test_user_install_suppressed_in_virtualenv() {
        std::env::set_var("VIRTUAL_ENV", "/tmp/venv");
        assert!(!user_install());
        std::env::remove_var("VIRTUAL_ENV");
    }

    #[test]
    #[serial]
    fn test_user_install_suppressed_with_pip_target() {
        std::env::set_var("PIP_TARGET", "/tmp/target");
        assert!(!user_install());
        std::env::remove_var("PIP_TARGET");
    }

    #[tokio::test]
    async fn test_install_success_with_true_binary() {
        let installer = Installer::new("true");
        assert!(installer.install(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_install_failure_with_false_binary() {
        let installer = Installer::new("false");
        let err = installer.install(&[]).await.unwrap_err();
        assert!(matches!(err, LoadError::RequirementsInstallFailed));
    }

    #[tokio::test]
    async fn test_install_missing_program_is_install_failure() {
        let installer = Installer::new("definitely-not-a-real-installer");
        let err = installer.install(&["pkg".to_string()]).await.unwrap_err();
        assert!(matches!(err, LoadError::RequirementsInstallFailed));
    }
}
