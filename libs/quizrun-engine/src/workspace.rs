//! Workspace manager.
//!
//! Every job gets its own directory `{root}/job-{id}` holding its source
//! and whatever the compiler produces. The per-job directory is what keeps
//! Java's fixed `Main.java` from colliding across concurrent jobs; for the
//! other languages the id in the file name is a second layer of namespacing.
//!
//! Release is explicit and async, but a [`Workspace`] that is dropped
//! without being released (panic, cancelled future) removes its directory
//! synchronously in `Drop`.

use crate::error::WorkspaceError;
use crate::toolchain::Toolchain;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a private directory for a job and write its source into it
    pub async fn acquire(
        &self,
        toolchain: &Toolchain,
        source_code: &str,
    ) -> Result<Workspace, WorkspaceError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: self.root.display().to_string(),
                source,
            })?;

        let id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.root.join(format!("job-{}", id));

        // create_dir (not _all): an existing directory would mean an id clash
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: dir.display().to_string(),
                source,
            })?;

        let mut workspace = Workspace {
            source_path: dir.join(toolchain.source_file_name(&id)),
            artifact_path: toolchain.artifact_file_name(&id).map(|name| dir.join(name)),
            id,
            dir,
            released: false,
        };

        if let Err(source) = tokio::fs::write(&workspace.source_path, source_code).await {
            let err = WorkspaceError::Write {
                path: workspace.source_path.display().to_string(),
                source,
            };
            workspace.release().await;
            return Err(err);
        }

        debug!(
            workspace_id = %workspace.id,
            dir = %workspace.dir.display(),
            "Workspace acquired"
        );
        Ok(workspace)
    }
}

/// Exclusive, ephemeral scratch space for one job
#[derive(Debug)]
pub struct Workspace {
    id: String,
    dir: PathBuf,
    source_path: PathBuf,
    artifact_path: Option<PathBuf>,
    released: bool,
}

impl Workspace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    /// Delete the source, the compiled artifact, and anything else the
    /// toolchain left behind (e.g. nested `.class` files).
    ///
    /// Never fails; safe to call any number of times.
    pub async fn release(&mut self) {
        for path in [Some(&self.source_path), self.artifact_path.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove workspace file");
                }
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove workspace directory");
            }
        }

        if !self.released {
            debug!(workspace_id = %self.id, "Workspace released");
        }
        self.released = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to clean up abandoned workspace");
            }
        }
    }
}
