use image::{DynamicImage, ImageFormat};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use uuid::Uuid;

const STAGED_PREFIX: &str = "temp_image";

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Failed to create staging directory: {0}")]
    CreateDir(io::Error),
    #[error("Failed to write staged image: {0}")]
    Write(#[from] image::ImageError),
    #[error("Failed to read staged image: {0}")]
    Read(io::Error),
}

/// Removes `path`, treating an already missing file as success.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct Staging {
    dir: PathBuf,
}

impl Staging {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes the image as JPEG under a name unique to this request.
    pub fn stage(&self, image: &DynamicImage) -> Result<TemporaryFile, StagingError> {
        fs::create_dir_all(&self.dir).map_err(StagingError::CreateDir)?;

        let file_name = format!("{}-{}.jpg", STAGED_PREFIX, Uuid::new_v4().simple());
        let staged = TemporaryFile {
            path: self.dir.join(&file_name),
            file_name,
        };

        // JPEG has no alpha channel
        image
            .to_rgb8()
            .save_with_format(&staged.path, ImageFormat::Jpeg)?;

        tracing::debug!("Staged upload at {:?}", staged.path);
        Ok(staged)
    }
}

/// Staged copy of an upload; the file is deleted when the guard drops.
#[derive(Debug)]
pub struct TemporaryFile {
    path: PathBuf,
    file_name: String,
}

impl TemporaryFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl Drop for TemporaryFile {
    fn drop(&mut self) {
        match remove_if_exists(&self.path) {
            Ok(true) => tracing::debug!("Removed staged upload {:?}", self.path),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to remove staged upload {:?}: {}", self.path, e),
        }
    }
}
