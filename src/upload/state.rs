use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::DataCollectiveError;

/// Suffix of the state file written next to an uploaded archive.
pub const STATE_FILE_SUFFIX: &str = ".mdc-upload.json";

/// One uploaded part, as acknowledged by the storage backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UploadPart {
    /// 1-based.
    pub part_number: u32,
    pub etag: String,
}

/// Progress of a multipart upload, persisted after every part.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadState {
    #[serde(default)]
    pub submission_id: String,
    #[serde(default)]
    pub file_upload_id: String,
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub part_size: u64,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parts: Vec<UploadPart>,
    /// SHA-256 of the whole file; `None` until every part is uploaded.
    #[serde(default)]
    pub checksum: Option<String>,
}

impl UploadState {
    fn is_usable(&self) -> bool {
        !self.file_upload_id.trim().is_empty()
            && !self.upload_id.trim().is_empty()
            && self.file_size > 0
            && self.part_size > 0
            && self.parts.iter().all(|part| part.part_number >= 1)
    }
}

/// `<file name>.mdc-upload.json` in the same directory as `file_path`.
pub fn default_state_path(file_path: &Path) -> PathBuf {
    let mut name = file_path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(STATE_FILE_SUFFIX);
    file_path.with_file_name(name)
}

/// Number of parts a file of `file_size` bytes is split into.
pub fn expected_parts(file_size: u64, part_size: u64) -> Result<u64, DataCollectiveError> {
    if part_size == 0 {
        return Err(DataCollectiveError::InvalidArgument(
            "`part_size` must be a positive integer".to_string(),
        ));
    }
    Ok(file_size.div_ceil(part_size))
}

/// Read a saved upload state.
///
/// A missing file, or one that parses as JSON but does not describe a usable
/// upload, yields `Ok(None)`. Malformed JSON is an error.
pub fn load_upload_state(path: &Path) -> Result<Option<UploadState>, DataCollectiveError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    parse_upload_state(&text).map_err(|source| DataCollectiveError::UploadStateParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse the contents of a state file; see [`load_upload_state`].
pub fn parse_upload_state(text: &str) -> Result<Option<UploadState>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let state = match serde_json::from_value::<UploadState>(value) {
        Ok(state) => state,
        Err(err) => {
            tracing::debug!(error = %err, "ignoring upload state with unexpected shape");
            return Ok(None);
        }
    };
    Ok(state.is_usable().then_some(state))
}

/// Atomically replace the state file with `state`, pretty-printed.
pub fn save_upload_state(path: &Path, state: &UploadState) -> Result<(), DataCollectiveError> {
    let write_error = |source: io::Error| DataCollectiveError::UploadStateWrite {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".mdc-upload")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(write_error)?;
    serde_json::to_writer_pretty(&mut tmp, state)
        .map_err(io::Error::from)
        .map_err(write_error)?;
    tmp.write_all(b"\n").map_err(write_error)?;
    tmp.as_file().sync_all().map_err(write_error)?;
    tmp.persist(path).map_err(|err| write_error(err.error))?;
    Ok(())
}
