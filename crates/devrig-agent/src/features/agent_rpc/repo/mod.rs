use async_trait::async_trait;
use devrig_proto::ExecResponse;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

#[cfg(test)]
use mockall::automock;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceRepoError {
    #[error("cannot list {path}: {source}")]
    ListDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

/// What the agent can do to the filesystem and processes of its container.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkspaceRepo: Send + Sync {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>, WorkspaceRepoError>;

    async fn run(
        &self,
        dir: Option<PathBuf>,
        command: String,
        args: Vec<String>,
    ) -> Result<ExecResponse, WorkspaceRepoError>;
}

/// Works directly on the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalWorkspaceRepo;

impl LocalWorkspaceRepo {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkspaceRepo for LocalWorkspaceRepo {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<String>, WorkspaceRepoError> {
        let list_err = |source| WorkspaceRepoError::ListDir {
            path: dir.to_path_buf(),
            source,
        };

        let mut entries = tokio::fs::read_dir(dir).await.map_err(list_err)?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
        files.sort();
        Ok(files)
    }

    async fn run(
        &self,
        dir: Option<PathBuf>,
        command: String,
        args: Vec<String>,
    ) -> Result<ExecResponse, WorkspaceRepoError> {
        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .await
            .map_err(|source| WorkspaceRepoError::Spawn { command, source })?;

        Ok(ExecResponse {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal.
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_dir_returns_sorted_names() {
        let dir = std::env::temp_dir().join(format!("devrig-agent-list-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("b.txt"), b"b").await.unwrap();
        tokio::fs::write(dir.join("a.txt"), b"a").await.unwrap();

        let files = LocalWorkspaceRepo::new().list_dir(&dir).await.unwrap();
        assert_eq!(files, vec!["a.txt".to_string(), "b.txt".to_string()]);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_missing_dir_fails() {
        let err = LocalWorkspaceRepo::new()
            .list_dir(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceRepoError::ListDir { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_exit_code_and_output() {
        let output = LocalWorkspaceRepo::new()
            .run(
                Some(PathBuf::from("/")),
                "sh".to_string(),
                vec!["-c".to_string(), "pwd; echo oops >&2; exit 3".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(output.stdout.trim(), "/");
        assert_eq!(output.stderr.trim(), "oops");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_run_unknown_command_fails() {
        let err = LocalWorkspaceRepo::new()
            .run(None, "devrig-no-such-command".to_string(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkspaceRepoError::Spawn { .. }));
    }
}
