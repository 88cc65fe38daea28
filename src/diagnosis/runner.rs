use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::DiagnosisConfig;
use crate::diagnosis::executor::CommandExecutor;
use crate::diagnosis::locator::BundleLocator;
use crate::diagnosis::DiagnosisBundle;
use crate::error::{AppError, Result};
use crate::workspace::WorkspaceManager;

/// Runs the diag script for one identifier and hands back the bundle it produced.
pub struct DiagnosticRunner {
    home_dir: PathBuf,
    script: PathBuf,
    timeout: Option<Duration>,
    executor: Arc<dyn CommandExecutor>,
    workspaces: WorkspaceManager,
    locator: BundleLocator,
}

impl DiagnosticRunner {
    pub fn new(
        config: &DiagnosisConfig,
        executor: Arc<dyn CommandExecutor>,
        workspaces: WorkspaceManager,
    ) -> Self {
        Self {
            home_dir: config.home_dir.clone(),
            script: config.script.clone(),
            timeout: config.timeout(),
            executor,
            workspaces,
            locator: BundleLocator::new(config.archive_suffix.clone()),
        }
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    pub fn script_path(&self) -> PathBuf {
        self.home_dir.join(&self.script)
    }

    /// Resolve the script to an absolute path, requiring an executable regular file.
    async fn resolve_script(&self) -> Result<PathBuf> {
        let path = self.script_path();
        let not_found = || AppError::ScriptNotFound { path: path.clone() };

        let metadata = tokio::fs::metadata(&path).await.map_err(|_| not_found())?;
        if !metadata.is_file() || !is_executable(&metadata) {
            return Err(not_found());
        }

        tokio::fs::canonicalize(&path).await.map_err(|_| not_found())
    }

    /// Run the script as `<script> <identifier> <workspace>` and locate its bundle.
    ///
    /// A failed or cancelled run leaves its workspace in place for inspection; the
    /// janitor removes it once it expires.
    pub async fn run(&self, identifier: &str, cancel: &CancellationToken) -> Result<DiagnosisBundle> {
        if cancel.is_cancelled() {
            return Err(AppError::DiagnosisCancelled);
        }

        let script = self.resolve_script().await?;
        let workspace = self.workspaces.allocate().await?;
        let workspace_arg = workspace.path.to_string_lossy();
        let command_line = build_command_line(&script, &[identifier, &workspace_arg]);

        tracing::info!(
            identifier = %identifier,
            workspace = %workspace.path.display(),
            "Running diagnosis script"
        );
        tracing::debug!(command = %command_line, "Diagnosis command line");

        let token = cancel.child_token();
        let timer = self.timeout.map(|limit| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                token.cancel();
            })
        });

        let result = self.executor.execute(&command_line, token).await;
        if let Some(timer) = timer {
            timer.abort();
        }
        let result = result?;

        if result.cancelled {
            let err = if cancel.is_cancelled() {
                AppError::DiagnosisCancelled
            } else {
                AppError::DiagnosisTimedOut
            };
            tracing::warn!(
                identifier = %identifier,
                workspace = %workspace.path.display(),
                output = %result.output,
                error = %err,
                "Diagnosis script terminated"
            );
            return Err(err);
        }

        if result.exit_code != Some(0) {
            // Script output stays in the logs; callers only get the generic message.
            tracing::warn!(
                identifier = %identifier,
                exit_code = ?result.exit_code,
                workspace = %workspace.path.display(),
                output = %result.output,
                "Diagnosis script failed"
            );
            return Err(AppError::DiagnosisExecution);
        }

        tracing::debug!(output = %result.output, "Diagnosis script finished");

        let path = self.locator.locate(&workspace.path).await?;
        Ok(DiagnosisBundle {
            path,
            workspace: workspace.path,
        })
    }
}

/// Join the script and its arguments into one shell command line, in order.
///
/// Plain words join with single spaces; anything the shell would reinterpret is quoted.
pub fn build_command_line(script: &Path, args: &[&str]) -> String {
    let script = script.to_string_lossy();
    shell_words::join(std::iter::once(script.as_ref()).chain(args.iter().copied()))
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::testing::{install_script, FakeScript, RecordingExecutor};
    use std::fs;

    fn config(home: &Path) -> DiagnosisConfig {
        DiagnosisConfig {
            home_dir: home.to_path_buf(),
            script: PathBuf::from("bin/diag.sh"),
            archive_suffix: ".zip".to_string(),
            timeout_secs: 0,
            max_output_bytes: 4096,
        }
    }

    fn runner(tmp: &tempfile::TempDir, executor: Arc<RecordingExecutor>) -> DiagnosticRunner {
        let home = tmp.path().join("home");
        DiagnosticRunner::new(
            &config(&home),
            executor,
            WorkspaceManager::with_base_dir(tmp.path().join("ws")),
        )
    }

    fn workspace_count(tmp: &tempfile::TempDir) -> usize {
        fs::read_dir(tmp.path().join("ws"))
            .map(|d| d.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_build_command_line_keeps_order() {
        let line = build_command_line(
            Path::new("/opt/cube/bin/diag.sh"),
            &["sales_cube", "/tmp/ws/diag-abc"],
        );
        assert_eq!(line, "/opt/cube/bin/diag.sh sales_cube /tmp/ws/diag-abc");
    }

    #[test]
    fn test_build_command_line_quotes_spaces() {
        let line = build_command_line(Path::new("/opt/my cube/bin/diag.sh"), &["p", "/tmp/a b"]);
        assert_eq!(line, "'/opt/my cube/bin/diag.sh' p '/tmp/a b'");
    }

    #[tokio::test]
    async fn test_missing_script_spawns_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::new(FakeScript::Bundle("pkg1", "diag.zip")));
        let runner = runner(&tmp, executor.clone());

        let err = runner
            .run("sales_cube", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            matches!(&err, AppError::ScriptNotFound { path } if path.ends_with("bin/diag.sh"))
        );
        assert_eq!(executor.spawn_count(), 0);
        assert_eq!(workspace_count(&tmp), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_executable_script_is_not_found() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let script = install_script(&tmp.path().join("home"), "exit 0");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o644)).unwrap();
        let executor = Arc::new(RecordingExecutor::new(FakeScript::Bundle("pkg1", "diag.zip")));

        let err = runner(&tmp, executor.clone())
            .run("sales_cube", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ScriptNotFound { .. }));
        assert_eq!(executor.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_success_returns_bundle_path() {
        let tmp = tempfile::tempdir().unwrap();
        install_script(&tmp.path().join("home"), "exit 0");
        let executor = Arc::new(RecordingExecutor::new(FakeScript::Bundle("pkg1", "diag_2024.zip")));

        let bundle = runner(&tmp, executor.clone())
            .run("sales_cube", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(bundle.path, bundle.workspace.join("pkg1/diag_2024.zip"));
        assert!(bundle.path.is_absolute());
        assert!(bundle.path.is_file());

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        let argv = shell_words::split(&calls[0]).unwrap();
        assert!(argv[0].ends_with("bin/diag.sh"));
        assert_eq!(argv[1], "sales_cube");
        assert_eq!(PathBuf::from(&argv[2]), bundle.workspace);
    }

    #[tokio::test]
    async fn test_nonzero_exit_hides_output() {
        let tmp = tempfile::tempdir().unwrap();
        install_script(&tmp.path().join("home"), "exit 0");
        // Leaves a bundle behind and still fails
        let executor = Arc::new(RecordingExecutor::new(FakeScript::FailWithBundle(1, "disk full")));

        let err = runner(&tmp, executor)
            .run("sales_cube", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::DiagnosisExecution));
        assert!(!err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn test_success_without_bundle_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        install_script(&tmp.path().join("home"), "exit 0");
        let executor = Arc::new(RecordingExecutor::new(FakeScript::Empty));

        let err = runner(&tmp, executor)
            .run("sales_cube", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PackageNotFound { .. }));
    }

    #[tokio::test]
    async fn test_each_run_gets_its_own_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        install_script(&tmp.path().join("home"), "exit 0");
        let executor = Arc::new(RecordingExecutor::new(FakeScript::Bundle("pkg1", "diag.zip")));
        let runner = runner(&tmp, executor);
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(runner.run("sales_cube", &cancel), runner.run("sales_cube", &cancel));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.workspace, b.workspace);
        assert_eq!(workspace_count(&tmp), 2);
    }

    #[tokio::test]
    async fn test_already_cancelled_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        install_script(&tmp.path().join("home"), "exit 0");
        let executor = Arc::new(RecordingExecutor::new(FakeScript::Bundle("pkg1", "diag.zip")));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = runner(&tmp, executor.clone())
            .run("sales_cube", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DiagnosisCancelled));
        assert_eq!(executor.spawn_count(), 0);
        assert_eq!(workspace_count(&tmp), 0);
    }

    #[tokio::test]
    async fn test_hang_is_cancelled_by_caller() {
        let tmp = tempfile::tempdir().unwrap();
        install_script(&tmp.path().join("home"), "exit 0");
        let executor = Arc::new(RecordingExecutor::new(FakeScript::Hang));
        let runner = runner(&tmp, executor);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = runner.run("sales_cube", &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::DiagnosisCancelled));
    }

    #[tokio::test]
    async fn test_hang_hits_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let home = tmp.path().join("home");
        install_script(&home, "exit 0");
        let mut config = config(&home);
        config.timeout_secs = 1;
        let runner = DiagnosticRunner::new(
            &config,
            Arc::new(RecordingExecutor::new(FakeScript::Hang)),
            WorkspaceManager::with_base_dir(tmp.path().join("ws")),
        );

        let err = runner
            .run("sales_cube", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DiagnosisTimedOut));
    }
}
