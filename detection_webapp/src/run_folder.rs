use std::{
    cmp::Reverse,
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};
use thiserror::Error;

const LABELS_DIR: &str = "labels";

#[derive(Error, Debug)]
pub enum RunFolderError {
    #[error("Prediction folder not found.")]
    NotFound,
    #[error("No free run folder name left")]
    Exhausted,
    #[error("Run folder I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Output directories named `predict`, `predict2`, `predict3`, ... under one root.
#[derive(Debug, Clone)]
pub struct RunFolders {
    root: PathBuf,
    prefix: String,
}

impl RunFolders {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Suffix index of a folder name: `predict` is 1, `predict7` is 7.
    fn index_of(&self, name: &str) -> Option<u64> {
        let suffix = name.strip_prefix(&self.prefix)?;
        if suffix.is_empty() {
            return Some(1);
        }
        suffix.parse().ok()
    }

    fn name_for(&self, index: u64) -> String {
        if index <= 1 {
            self.prefix.clone()
        } else {
            format!("{}{}", self.prefix, index)
        }
    }

    fn entries(&self) -> Result<Vec<(String, PathBuf, SystemTime)>, RunFolderError> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&self.prefix) {
                entries.push((name, entry.path(), metadata.modified()?));
            }
        }
        Ok(entries)
    }

    /// Allocates a fresh folder for one invocation.
    pub fn create(&self) -> Result<RunFolder, RunFolderError> {
        fs::create_dir_all(&self.root)?;

        let mut index = self
            .entries()?
            .iter()
            .filter_map(|(name, _, _)| self.index_of(name))
            .max()
            .and_then(|max| max.checked_add(1))
            .unwrap_or(1);

        loop {
            let name = self.name_for(index);
            let path = self.root.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => {
                    tracing::debug!("Created run folder {:?}", path);
                    return Ok(RunFolder { name, path });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    index = index.checked_add(1).ok_or(RunFolderError::Exhausted)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Most recently modified run folder; equal timestamps prefer the higher index.
    pub fn latest(&self) -> Result<RunFolder, RunFolderError> {
        let mut entries = self.entries()?;
        entries.sort_by_key(|(name, _, modified)| {
            Reverse((*modified, self.index_of(name).unwrap_or(0)))
        });

        entries
            .into_iter()
            .next()
            .map(|(name, path, _)| RunFolder { name, path })
            .ok_or(RunFolderError::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunFolder {
    name: String,
    path: PathBuf,
}

impl RunFolder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    pub fn label_path(&self, file_name: &str) -> PathBuf {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        self.path.join(LABELS_DIR).join(format!("{}.txt", stem))
    }

    /// Path of the annotated image inside this folder, if the folder still exists.
    pub fn locate_output(&self, file_name: &str) -> Result<PathBuf, RunFolderError> {
        if !self.path.is_dir() {
            return Err(RunFolderError::NotFound);
        }
        Ok(self.output_path(file_name))
    }

    /// Most recently written image in the folder.
    pub fn find_image(&self) -> Result<Option<String>, RunFolderError> {
        let mut images = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png"));
            if is_image && entry.file_type()?.is_file() {
                images.push((
                    entry.metadata()?.modified()?,
                    entry.file_name().to_string_lossy().into_owned(),
                ));
            }
        }
        images.sort();
        Ok(images.pop().map(|(_, name)| name))
    }
}
