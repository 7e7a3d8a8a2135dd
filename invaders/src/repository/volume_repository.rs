use crate::domain::error::PipelineError;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{error, info, instrument};

/// The per-run staging directory shared by every download.
#[derive(Debug)]
pub struct VolumeRepository {
    root: PathBuf,
    created: OnceCell<()>,
}

impl VolumeRepository {
    pub fn new(root: PathBuf) -> VolumeRepository {
        VolumeRepository {
            root,
            created: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the directory if absent. Concurrent callers wait on the same
    /// attempt, later calls are free. A failed attempt may be retried.
    #[instrument(skip(self), fields(path = %self.root.display()))]
    pub async fn ensure_dir(&self) -> Result<&Path, PipelineError> {
        self.created
            .get_or_try_init(|| async {
                let timer = Instant::now();
                tokio::fs::create_dir_all(&self.root).await.map_err(|err| {
                    error!("Could not create staging directory {}", self.root.display());
                    PipelineError::filesystem(self.root.display(), &err)
                })?;
                info!(
                    "Staging directory ready in {} ms: {}",
                    timer.elapsed().as_millis(),
                    self.root.display()
                );
                Ok::<(), PipelineError>(())
            })
            .await?;
        Ok(&self.root)
    }
}
