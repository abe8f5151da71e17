use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{file_name, Delivery};
use crate::recording::is_path_component;

/// Copies segments into `{root}/{destination_id}/` with a caption sidecar
pub struct DirectoryDelivery {
    root: PathBuf,
}

impl DirectoryDelivery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn archive(&self, destination_id: &str, file: &Path, caption: &str) -> Result<()> {
        self.check_destination(destination_id)?;
        let dir = self.root.join(destination_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create archive directory {:?}", dir))?;

        let name = file_name(file);
        let target = dir.join(&name);
        tokio::fs::copy(file, &target)
            .await
            .with_context(|| format!("Failed to copy {:?} to {:?}", file, target))?;
        tokio::fs::write(dir.join(format!("{}.txt", name)), caption)
            .await
            .context("Failed to write caption")?;

        debug!("Archived {:?}", target);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Delivery for DirectoryDelivery {
    async fn send_composite(
        &self,
        destination_id: &str,
        file: &Path,
        caption: &str,
    ) -> Result<()> {
        self.archive(destination_id, file, caption).await
    }

    async fn send_per_speaker(
        &self,
        destination_id: &str,
        _speaker_id: &str,
        file: &Path,
        caption: &str,
    ) -> Result<()> {
        self.archive(destination_id, file, caption).await
    }

    fn check_destination(&self, destination_id: &str) -> Result<()> {
        if !is_path_component(destination_id) {
            bail!(
                "Archive folder {:?} must be a single directory name under {:?}",
                destination_id,
                self.root
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "directory"
    }
}
