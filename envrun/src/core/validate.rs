//! Request validation performed before any subprocess is spawned.

use thiserror::Error;

use crate::core::request::InstallRequest;

/// Bad client input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown environment `{env}`; valid environments: [{}]", .valid.join(", "))]
    UnknownEnv { env: String, valid: Vec<String> },

    #[error("install.pkgs must list at least one package")]
    NoPackages,

    #[error("install.pkgs contains an empty package specifier")]
    EmptyPackage,

    #[error("package specifier `{0}` must not start with `-`")]
    OptionLikePackage(String),
}

impl ValidationError {
    /// Valid environment names to report back, when the error is about one.
    pub fn valid_envs(&self) -> Option<&[String]> {
        match self {
            ValidationError::UnknownEnv { valid, .. } => Some(valid),
            _ => None,
        }
    }
}

/// Check the package list of an install request.
pub fn validate_packages(install: &InstallRequest) -> Result<(), ValidationError> {
    if install.pkgs.is_empty() {
        return Err(ValidationError::NoPackages);
    }
    for spec in &install.pkgs {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(ValidationError::EmptyPackage);
        }
        // The installer receives specifiers as argv; keep them from becoming flags.
        if spec.starts_with('-') {
            return Err(ValidationError::OptionLikePackage(spec.to_string()));
        }
    }
    Ok(())
}

/// Check that `env` is one of the `known` environment names.
pub fn validate_env(env: &str, known: &[String]) -> Result<(), ValidationError> {
    if known.iter().any(|name| name == env) {
        return Ok(());
    }
    Err(ValidationError::UnknownEnv {
        env: env.to_string(),
        valid: known.to_vec(),
    })
}
