use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, error};
use uuid::Uuid;

use crate::{error::Error, Result};

/// Snippets made only of open/close delimiters, e.g. `<?php`, `<?php ?>`, `<?php\n?>`.
static BOILERPLATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\A(?:<\?php)?\s*(?:\?>)?\z").expect("boilerplate pattern is valid")
});

/// Rejects snippets without executable content.
pub fn validate_code(code: &str) -> Result<()> {
    let trimmed = code.trim();
    if trimmed.is_empty() || BOILERPLATE.is_match(trimmed) {
        return Err(Error::MissingCode);
    }
    Ok(())
}

/// A staged snippet on disk, owned by exactly one request.
///
/// Call [`ScratchArtifact::release`] once the interpreter is done with it. If the owner never
/// gets there (panic, cancelled request) the file is removed on drop.
#[derive(Debug)]
pub struct ScratchArtifact {
    path: PathBuf,
    request_id: Uuid,
    released: bool,
}

impl ScratchArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Deletes the artifact file.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Removed scratch artifact {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for ScratchArtifact {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed abandoned scratch artifact {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!("Failed to clean up scratch artifact {:?}: {}", self.path, e),
        }
    }
}

/// Writes validated snippets into uniquely named files under the scratch directory.
#[derive(Debug, Clone)]
pub struct SnippetStager {
    scratch_dir: PathBuf,
    extension: String,
}

impl SnippetStager {
    pub fn new(scratch_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            extension: extension.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Creates the scratch directory if it does not exist yet.
    pub async fn ensure_scratch_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.scratch_dir).await.map_err(|e| {
            Error::Stage(format!(
                "Failed to create scratch directory {:?}: {}",
                self.scratch_dir, e
            ))
        })
    }

    /// Persists `code` byte for byte. Never deletes what it creates.
    pub async fn stage(&self, code: &str, request_id: Uuid) -> Result<ScratchArtifact> {
        validate_code(code)?;

        let path = self.artifact_path(request_id);
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&path)
            .await
            .map_err(|e| Error::Stage(format!("Failed to create {:?}: {}", path, e)))?;

        // From here on the guard owns the file, so a failed write still cleans up.
        let artifact = ScratchArtifact {
            path,
            request_id,
            released: false,
        };

        file.write_all(code.as_bytes())
            .await
            .map_err(|e| Error::Stage(format!("Failed to write snippet: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| Error::Stage(format!("Failed to write snippet: {}", e)))?;

        debug!(
            "Staged {} bytes into {:?}",
            code.len(),
            artifact.path.file_name().unwrap_or_default()
        );
        Ok(artifact)
    }

    fn artifact_path(&self, request_id: Uuid) -> PathBuf {
        // The request id alone is unique; the extra suffix keeps names unique even if a
        // caller reuses an id.
        let name = format!(
            "snippet-{}-{}.{}",
            request_id.simple(),
            Uuid::new_v4().simple(),
            self.extension
        );
        self.scratch_dir.join(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_rejects_empty_and_boilerplate() {
        for code in [
            "",
            "   \n\t",
            "<?php",
            "<?php ?>",
            "<?php\n?>",
            "  <?php\r\n?>  ",
            "<?PHP",
            "?>",
        ] {
            assert!(
                matches!(validate_code(code), Err(Error::MissingCode)),
                "expected {:?} to be rejected",
                code
            );
        }
    }

    #[test]
    fn test_validate_accepts_real_code() {
        for code in [
            "<?php echo 1;",
            "<?php\necho \"hi\";\n?>",
            "echo hello",
            "printf '?>'",
        ] {
            assert!(validate_code(code).is_ok(), "expected {:?} to pass", code);
        }
    }

    #[tokio::test]
    async fn test_stage_writes_exact_bytes() -> Result<()> {
        let dir = tempdir()?;
        let stager = SnippetStager::new(dir.path(), "sh");
        let code = "  echo 'exact'\n\n";

        let artifact = stager.stage(code, Uuid::new_v4()).await?;
        assert!(artifact.path().starts_with(dir.path()));
        assert_eq!(artifact.path().extension().unwrap(), "sh");
        assert_eq!(std::fs::read_to_string(artifact.path())?, code);

        artifact.release().await?;
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_stage_rejects_missing_code_without_file() -> Result<()> {
        let dir = tempdir()?;
        let stager = SnippetStager::new(dir.path(), "php");

        let result = stager.stage("<?php ?>", Uuid::new_v4()).await;
        assert!(matches!(result, Err(Error::MissingCode)));
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_same_request_id_never_collides() -> Result<()> {
        let dir = tempdir()?;
        let stager = SnippetStager::new(dir.path(), "php");
        let id = Uuid::new_v4();

        let first = stager.stage("echo 1", id).await?;
        let second = stager.stage("echo 2", id).await?;
        assert_ne!(first.path(), second.path());
        assert_eq!(first.request_id(), second.request_id());
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_artifact() -> Result<()> {
        let dir = tempdir()?;
        let stager = SnippetStager::new(dir.path(), "php");

        let artifact = stager.stage("echo 1", Uuid::new_v4()).await?;
        let path = artifact.path().to_path_buf();
        assert!(path.exists());
        drop(artifact);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_scratch_dir_creates_nested() -> Result<()> {
        let dir = tempdir()?;
        let nested = dir.path().join("a").join("b");
        let stager = SnippetStager::new(&nested, "php");

        stager.ensure_scratch_dir().await?;
        assert!(nested.is_dir());
        Ok(())
    }
}
