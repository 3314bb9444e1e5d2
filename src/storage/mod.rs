//! Upload persistence.
//!
//! Every upload is written under a fresh random token so concurrent uploads
//! of the same file name never collide. Content is streamed into a temporary
//! file inside the upload directory and only renamed into place once the
//! whole stream was read.

use crate::error::{WorkflowError, WorkflowResult};
use crate::models::UploadedFile;
use chrono::Utc;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Writes inbound files into the upload directory.
#[derive(Debug, Clone)]
pub struct UploadStore {
    upload_dir: PathBuf,
}

impl UploadStore {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Persist `content` under a unique name derived from `original_name`.
    ///
    /// Fails with `InvalidUpload` when the name is empty or unusable, or when
    /// the stream cannot be read; nothing is left behind in either case.
    pub fn store<R: Read>(&self, original_name: &str, mut content: R) -> WorkflowResult<UploadedFile> {
        if original_name.trim().is_empty() {
            return Err(WorkflowError::invalid_upload("File name is empty."));
        }

        let safe_name = sanitize_file_name(original_name).ok_or_else(|| {
            WorkflowError::invalid_upload(format!("Invalid file name: {}", original_name))
        })?;

        fs::create_dir_all(&self.upload_dir).map_err(|source| WorkflowError::Storage {
            path: self.upload_dir.clone(),
            source,
        })?;

        let mut temp = tempfile::Builder::new()
            .prefix(".upload-")
            .suffix(".part")
            .tempfile_in(&self.upload_dir)
            .map_err(|source| WorkflowError::Storage {
                path: self.upload_dir.clone(),
                source,
            })?;

        let bytes = copy_stream(&mut content, &mut temp)?;

        let final_path = self
            .upload_dir
            .join(format!("{}_{}", Uuid::new_v4().simple(), safe_name));

        temp.persist_noclobber(&final_path)
            .map_err(|e| WorkflowError::Storage {
                path: final_path.clone(),
                source: e.error,
            })?;

        let stored_path = fs::canonicalize(&final_path).map_err(|source| WorkflowError::Storage {
            path: final_path.clone(),
            source,
        })?;

        info!(
            "Stored upload '{}' ({} bytes) at {}",
            original_name,
            bytes,
            stored_path.display()
        );

        Ok(UploadedFile {
            original_name: original_name.to_string(),
            stored_path,
            created_at: Utc::now(),
        })
    }
}

/// Reduce a client-supplied name to a bare file name.
///
/// Directory components (either separator style) are dropped; `.`/`..` and
/// names that end up empty are rejected.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.trim().rsplit(['/', '\\']).next()?.trim();

    match last {
        "" | "." | ".." => None,
        other => Some(other.to_string()),
    }
}

/// Copy the reader into the temp file, telling read and write errors apart.
fn copy_stream<R: Read>(reader: &mut R, temp: &mut NamedTempFile) -> WorkflowResult<u64> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Upload stream failed after {} bytes: {}", total, e);
                return Err(WorkflowError::invalid_upload(format!(
                    "Failed to read uploaded file: {}",
                    e
                )));
            }
        };

        temp.write_all(&buffer[..read])
            .map_err(|source| WorkflowError::Storage {
                path: temp.path().to_path_buf(),
                source,
            })?;
        total += read as u64;
    }

    temp.as_file()
        .sync_all()
        .map_err(|source| WorkflowError::Storage {
            path: temp.path().to_path_buf(),
            source,
        })?;

    Ok(total)
}
