//! Parameter files on the local disk.
//!
//! Besides the server side store (`store_params` / `load_params`) the
//! operator can keep named parameter sets locally, and import or export a
//! snapshot to an arbitrary file.
//!
//! Storage path: `~/.local/share/digdar-client/params/{name}.json`

use log::{debug, error, info, warn};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use digdar_core::protocol::parse_param_document;
use digdar_core::{ParameterSet, ProtocolError};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot encode parameters: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameter file: {0}")]
    Protocol(#[from] ProtocolError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `params` to `path` as pretty JSON.
pub fn export_to(path: &Path, params: &ParameterSet) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let file = fs::File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, params)?;
    writer.flush().map_err(io_error(path))?;
    debug!("Exported {} parameters to {}", params.len(), path.display());
    Ok(())
}

/// Read a parameter file. Accepts the same forms as the server's
/// `load_params` answer.
pub fn import_from(path: &Path) -> Result<ParameterSet, StorageError> {
    let text = fs::read_to_string(path).map_err(io_error(path))?;
    let params = parse_param_document(&text)?;
    debug!("Imported {} parameters from {}", params.len(), path.display());
    Ok(params)
}

/// Named parameter sets in one directory, by default the per-user data
/// directory from [`crate::config::default_params_dir`].
pub struct ParamFileStore {
    base_dir: PathBuf,
}

impl ParamFileStore {
    pub fn new(base_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&base_dir) {
            error!("Failed to create parameter directory: {}", e);
        } else {
            debug!("Parameter directory: {}", base_dir.display());
        }
        Self { base_dir }
    }

    fn file_path(&self, name: &str) -> PathBuf {
        // Keep names inside the base directory
        let safe_name = name.replace(['/', '\\'], "__");
        self.base_dir.join(format!("{}.json", safe_name))
    }

    pub fn save(&self, name: &str, params: &ParameterSet) -> Result<(), StorageError> {
        export_to(&self.file_path(name), params)?;
        info!("Saved parameter set '{}'", name);
        Ok(())
    }

    /// `Ok(None)` when no set of that name exists.
    pub fn load(&self, name: &str) -> Result<Option<ParameterSet>, StorageError> {
        let path = self.file_path(name);
        if !path.exists() {
            return Ok(None);
        }
        import_from(&path).map(Some)
    }

    /// Names of the stored sets, sorted.
    pub fn list(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot read {}: {}", self.base_dir.display(), e);
                return Vec::new();
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names
    }

    pub fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.file_path(name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(io_error(&path))?;
        info!("Deleted parameter set '{}'", name);
        Ok(true)
    }
}
