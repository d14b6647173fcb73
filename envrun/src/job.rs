//! Orchestration for a single job: optional install, then the runner.

use anyhow::anyhow;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};

use crate::core::diff::diff_snapshots;
use crate::core::request::{InstallRequest, InstallResult, JobRequest, JobResponse};
use crate::core::types::PackageSnapshot;
use crate::core::validate::{ValidationError, validate_env, validate_packages};
use crate::exit_codes;
use crate::io::config::ServiceConfig;
use crate::io::envs::EnvManager;
use crate::io::process::CommandRunner;
use crate::io::runner::run_runner;

/// Why a job did not complete.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("package install failed: {diagnostics}")]
    Install {
        diagnostics: String,
        partial: JobResponse,
    },

    #[error("runner failed: {diagnostics}")]
    Runner {
        diagnostics: String,
        partial: JobResponse,
    },

    /// The front-end itself failed (spawn errors, unreadable listings, file I/O).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Serialized form of a [`JobError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_envs: Option<Vec<String>>,
    #[serde(flatten)]
    pub partial: JobResponse,
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "validation",
            JobError::Install { .. } => "install",
            JobError::Runner { .. } => "runner",
            JobError::Internal(_) => "internal",
        }
    }

    /// Progress made before the failure.
    pub fn partial(&self) -> Option<&JobResponse> {
        match self {
            JobError::Install { partial, .. } | JobError::Runner { partial, .. } => Some(partial),
            JobError::Validation(_) | JobError::Internal(_) => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            JobError::Validation(_) | JobError::Internal(_) => exit_codes::INVALID,
            JobError::Install { .. } => exit_codes::INSTALL_FAILED,
            JobError::Runner { .. } => exit_codes::RUNNER_FAILED,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let message = match self {
            JobError::Install { diagnostics, .. } | JobError::Runner { diagnostics, .. } => {
                diagnostics.clone()
            }
            JobError::Internal(err) => format!("{err:#}"),
            JobError::Validation(err) => err.to_string(),
        };
        let valid_envs = match self {
            JobError::Validation(err) => err.valid_envs().map(<[String]>::to_vec),
            _ => None,
        };
        ErrorBody {
            kind: self.kind(),
            message,
            valid_envs,
            partial: self.partial().cloned().unwrap_or_default(),
        }
    }
}

/// Execute one job.
///
/// With an install request: validate, snapshot, install, snapshot again and
/// diff. A failed install stops here. Then run the runner with the request's
/// config in a transient file and relay its stdout.
#[instrument(skip_all, fields(install = request.install.is_some()))]
pub fn run_job<R: CommandRunner + ?Sized>(
    runner: &R,
    cfg: &ServiceConfig,
    request: &JobRequest,
) -> Result<JobResponse, JobError> {
    let mut response = JobResponse::default();

    if let Some(install) = &request.install {
        let result = install_packages(runner, cfg, install)?;
        if let Some(error) = &result.error {
            let diagnostics = error.clone();
            response.install_result = Some(result);
            return Err(JobError::Install {
                diagnostics,
                partial: response,
            });
        }
        response.install_result = Some(result);
    }

    let output = run_runner(runner, cfg, &request.runner)?;
    if !output.success() {
        return Err(JobError::Runner {
            diagnostics: output.diagnostics("runner"),
            partial: response,
        });
    }

    if output.stdout_truncated > 0 {
        return Err(JobError::Internal(anyhow!(
            "runner stdout was cut short by {} bytes",
            output.stdout_truncated
        )));
    }

    response.runner_result = Some(output.stdout_text());
    info!("job completed");
    Ok(response)
}

/// Validate, install and diff. An installer failure comes back as an
/// [`InstallResult`] carrying its diagnostics.
fn install_packages<R: CommandRunner + ?Sized>(
    runner: &R,
    cfg: &ServiceConfig,
    install: &InstallRequest,
) -> Result<InstallResult, JobError> {
    let env = install.env_or(&cfg.default_env);
    let envs = EnvManager::new(runner, cfg);
    validate_env(env, &envs.known_envs()?)?;
    validate_packages(install)?;

    let before = envs.snapshot(env)?;
    let output = envs.install(env, &install.pkgs)?;
    if !output.success() {
        return Ok(InstallResult::failed(output.diagnostics("installer")));
    }
    let after = envs.snapshot(env)?;

    let diff = diff_snapshots(&before, &after);
    info!(
        env,
        added = diff.added.len(),
        changed = diff.changed.len(),
        "install applied"
    );
    Ok(InstallResult::succeeded(diff))
}

/// Environment names that jobs may target.
pub fn known_environments<R: CommandRunner + ?Sized>(
    runner: &R,
    cfg: &ServiceConfig,
) -> Result<Vec<String>, JobError> {
    Ok(EnvManager::new(runner, cfg).known_envs()?)
}

/// Current package snapshot of a known environment.
pub fn environment_snapshot<R: CommandRunner + ?Sized>(
    runner: &R,
    cfg: &ServiceConfig,
    env: &str,
) -> Result<PackageSnapshot, JobError> {
    let envs = EnvManager::new(runner, cfg);
    validate_env(env, &envs.known_envs()?)?;
    Ok(envs.snapshot(env)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::request::RunnerInvocation;
    use crate::io::process::CommandOutput;
    use crate::test_support::{
        ScriptedRunner, failed_output, ok_output, package_listing, test_config, timed_out_output,
    };
    use serde_json::json;

    fn runner_request() -> JobRequest {
        JobRequest {
            runner: RunnerInvocation {
                cmd: vec!["--help".to_string()],
                config: serde_json::Map::new(),
            },
            install: None,
        }
    }

    fn install_request(pkgs: &[&str], env: Option<&str>) -> JobRequest {
        JobRequest {
            install: Some(InstallRequest {
                pkgs: pkgs.iter().map(|p| p.to_string()).collect(),
                env: env.map(str::to_string),
            }),
            ..runner_request()
        }
    }

    #[test]
    fn runner_only_job_spawns_only_runner() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![ok_output("usage: runner\n")]);

        let response = run_job(&runner, &cfg, &runner_request()).expect("job");

        assert_eq!(response.install_result, None);
        assert_eq!(response.runner_result.as_deref(), Some("usage: runner\n"));
        assert_eq!(runner.programs(), vec!["pangeo-forge-runner"]);
    }

    #[test]
    fn upgrade_reports_changed_package() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![
            package_listing(&[("X", "1.0"), ("numpy", "1.26.4")]),
            ok_output("Successfully installed X-1.1\n"),
            package_listing(&[("X", "1.1"), ("numpy", "1.26.4")]),
            ok_output("ok\n"),
        ]);

        let response =
            run_job(&runner, &cfg, &install_request(&["X==1.1"], None)).expect("job");

        assert_eq!(
            serde_json::to_value(&response).expect("serialize"),
            json!({
                "install_result": {
                    "diff": {
                        "added": [],
                        "changed": [{"name": "X", "version": "1.1", "prior_version": "1.0"}]
                    },
                    "error": null
                },
                "runner_result": "ok\n"
            })
        );
        let calls = runner.calls();
        assert_eq!(calls[0].spec.args, vec!["list", "-n", "notebook", "--json"]);
        assert_eq!(calls[1].spec.args[..3], ["run", "-n", "notebook"]);
        assert_eq!(calls[2].spec.args, vec!["list", "-n", "notebook", "--json"]);
        assert_eq!(calls[3].spec.program, "pangeo-forge-runner");
    }

    #[test]
    fn new_package_reported_as_added_in_named_env() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![
            package_listing(&[("numpy", "1.26.4")]),
            ok_output(""),
            package_listing(&[("numpy", "1.26.4"), ("Y", "2.0")]),
            ok_output(""),
        ]);

        let response = run_job(
            &runner,
            &cfg,
            &install_request(&["Y==2.0"], Some("cloudrun")),
        )
        .expect("job");

        let diff = response
            .install_result
            .and_then(|r| r.diff)
            .expect("diff");
        assert_eq!(
            serde_json::to_value(&diff).expect("serialize"),
            json!({"added": [{"name": "Y", "version": "2.0"}], "changed": []})
        );
        assert!(
            runner
                .calls()
                .iter()
                .take(3)
                .all(|c| c.spec.args.contains(&"cloudrun".to_string()))
        );
    }

    #[test]
    fn failed_install_skips_runner() {
        let cfg = test_config();
        let stderr = "ERROR: No matching distribution found for X==99.0\n";
        let runner = ScriptedRunner::new(vec![
            package_listing(&[("X", "1.0")]),
            failed_output(1, stderr),
        ]);

        let err = run_job(&runner, &cfg, &install_request(&["X==99.0"], None)).unwrap_err();

        assert_eq!(err.kind(), "install");
        assert_eq!(err.exit_code(), exit_codes::INSTALL_FAILED);
        assert_eq!(
            serde_json::to_value(err.partial().expect("partial")).expect("serialize"),
            json!({"install_result": {"error": stderr}})
        );
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn failed_runner_keeps_install_diff() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![
            package_listing(&[]),
            ok_output(""),
            package_listing(&[("Y", "2.0")]),
            failed_output(2, "Traceback: recipe not found\n"),
        ]);

        let err = run_job(&runner, &cfg, &install_request(&["Y==2.0"], None)).unwrap_err();

        let JobError::Runner {
            diagnostics,
            partial,
        } = &err
        else {
            panic!("expected runner error, got {err:?}");
        };
        assert_eq!(diagnostics, "Traceback: recipe not found\n");
        assert_eq!(partial.runner_result, None);
        let diff = partial
            .install_result
            .as_ref()
            .and_then(|r| r.diff.as_ref())
            .expect("diff");
        assert_eq!(diff.added[0].name, "Y");

        let body = serde_json::to_value(err.body()).expect("serialize");
        assert_eq!(body["kind"], "runner");
        assert_eq!(body["message"], "Traceback: recipe not found\n");
        assert_eq!(body["install_result"]["diff"]["added"][0]["version"], "2.0");
        assert!(body.get("runner_result").is_none());
    }

    #[test]
    fn unknown_env_spawns_nothing() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![]);

        let err = run_job(&runner, &cfg, &install_request(&["X"], Some("gpu"))).unwrap_err();

        assert!(matches!(
            err,
            JobError::Validation(ValidationError::UnknownEnv { .. })
        ));
        let body = serde_json::to_value(err.body()).expect("serialize");
        assert_eq!(body["kind"], "validation");
        assert_eq!(body["valid_envs"], json!(["notebook", "cloudrun"]));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn empty_package_list_is_rejected() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![]);

        let err = run_job(&runner, &cfg, &install_request(&[], None)).unwrap_err();
        assert!(matches!(err, JobError::Validation(ValidationError::NoPackages)));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn unknown_env_reported_before_package_errors() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![]);

        let err = run_job(&runner, &cfg, &install_request(&[], Some("gpu"))).unwrap_err();

        assert!(matches!(
            err,
            JobError::Validation(ValidationError::UnknownEnv { .. })
        ));
        assert_eq!(
            serde_json::to_value(err.body()).expect("serialize")["valid_envs"],
            json!(["notebook", "cloudrun"])
        );
    }

    #[test]
    fn timed_out_install_skips_runner() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![
            package_listing(&[("X", "1.0")]),
            CommandOutput {
                stdout: b"Collecting X==1.1\n".to_vec(),
                ..timed_out_output()
            },
        ]);

        let err = run_job(&runner, &cfg, &install_request(&["X==1.1"], None)).unwrap_err();

        let JobError::Install { diagnostics, .. } = &err else {
            panic!("expected install error, got {err:?}");
        };
        assert!(diagnostics.starts_with("Collecting X==1.1\n"));
        assert!(diagnostics.contains("[installer timed out]"));
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn timed_out_runner_is_a_runner_error() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![timed_out_output()]);

        let err = run_job(&runner, &cfg, &runner_request()).unwrap_err();

        assert_eq!(err.kind(), "runner");
        assert!(err.body().message.contains("[runner timed out]"));
    }

    #[test]
    fn truncated_runner_stdout_is_not_a_success() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![CommandOutput {
            stdout_truncated: 4096,
            ..ok_output("partial log")
        }]);

        let err = run_job(&runner, &cfg, &runner_request()).unwrap_err();

        assert_eq!(err.kind(), "internal");
        assert!(err.body().message.contains("4096 bytes"));
    }

    #[test]
    fn listing_failure_is_internal() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![ok_output("not json")]);

        let err = run_job(&runner, &cfg, &install_request(&["X"], None)).unwrap_err();
        assert_eq!(err.kind(), "internal");
        assert!(err.to_string().contains("parse package listing"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn snapshot_of_unknown_env_is_rejected() {
        let cfg = test_config();
        let runner = ScriptedRunner::new(vec![]);

        let err = environment_snapshot(&runner, &cfg, "gpu").unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(runner.calls().is_empty());
    }
}
