//! Resumable multipart uploads of dataset archives.
//!
//! The upload is driven by a small state file next to the archive. Each part
//! is sent straight to object storage through a presigned URL and recorded in
//! the state file before the next one starts, so an interrupted upload can be
//! continued by calling [`upload_dataset_file`] again.

mod state;

pub use state::{
    default_state_path, expected_parts, load_upload_state, parse_upload_state,
    save_upload_state, UploadPart, UploadState, STATE_FILE_SUFFIX,
};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::api::{require_non_empty, ApiClient, HttpRequest};
use crate::error::DataCollectiveError;

/// Multipart session returned by `POST /upload/initiate`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    #[serde(default)]
    pub file_upload_id: String,
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub part_size: u64,
    /// Part the bundled `presigned_url` is valid for.
    #[serde(default = "first_part")]
    pub part_number: u32,
    #[serde(default)]
    pub presigned_url: String,
    #[serde(default)]
    pub expires_at: String,
}

fn first_part() -> u32 {
    1
}

/// Presigned URL for a single part.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPartUrl {
    #[serde(default)]
    pub part_number: Option<u32>,
    #[serde(default)]
    pub presigned_url: String,
    #[serde(default)]
    pub expires_at: String,
}

/// Knobs for [`upload_dataset_file`].
#[derive(Clone, Debug)]
pub struct UploadOptions {
    /// Name announced to the platform; defaults to the file's own name.
    pub filename: Option<String>,
    /// Where progress is recorded; defaults to [`default_state_path`].
    pub state_path: Option<PathBuf>,
    /// Pick up a matching state file instead of starting over.
    pub resume: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            filename: None,
            state_path: None,
            resume: true,
        }
    }
}

/// Start a multipart upload for a submission.
pub fn initiate_upload(
    client: &ApiClient,
    submission_id: &str,
    filename: &str,
    file_size: u64,
    mime_type: &str,
) -> Result<UploadSession, DataCollectiveError> {
    require_non_empty(submission_id, "submission_id")?;
    require_non_empty(filename, "filename")?;
    require_non_empty(mime_type, "mime_type")?;
    if file_size == 0 {
        return Err(DataCollectiveError::InvalidArgument(
            "`file_size` must be a positive integer".to_string(),
        ));
    }

    client.post_json(
        &["upload", "initiate"],
        json!({
            "submissionId": submission_id,
            "filename": filename,
            "fileSize": file_size,
            "mimeType": mime_type,
        }),
    )
}

/// Ask for a presigned URL for the zero-based `chunk_index`.
pub fn get_presigned_part_url(
    client: &ApiClient,
    file_upload_id: &str,
    chunk_index: u32,
) -> Result<PresignedPartUrl, DataCollectiveError> {
    require_non_empty(file_upload_id, "file_upload_id")?;

    let path = "upload/presigned-url";
    let request = HttpRequest::get(client.endpoint(&["upload", "presigned-url"])?)
        .query("fileUploadId", file_upload_id)
        .query("chunkIndex", chunk_index.to_string());
    let mut presigned: PresignedPartUrl = client.send(request)?.json(path)?;
    presigned
        .part_number
        .get_or_insert(chunk_index.saturating_add(1));
    Ok(presigned)
}

/// Close the multipart upload and register the file checksum.
pub fn complete_upload(
    client: &ApiClient,
    file_upload_id: &str,
    upload_id: &str,
    parts: &[UploadPart],
    checksum: &str,
) -> Result<serde_json::Value, DataCollectiveError> {
    require_non_empty(file_upload_id, "file_upload_id")?;
    require_non_empty(upload_id, "upload_id")?;
    require_non_empty(checksum, "checksum")?;
    if parts.is_empty() {
        return Err(DataCollectiveError::InvalidArgument(
            "`parts` must contain at least one uploaded part".to_string(),
        ));
    }

    client.post_json(
        &["upload", "complete"],
        json!({
            "fileUploadId": file_upload_id,
            "uploadId": upload_id,
            "parts": parts,
            "checksum": checksum,
        }),
    )
}

/// Upload a file in parts, resuming from its state file when possible.
///
/// Returns the final state, including the SHA-256 of the whole file.
pub fn upload_dataset_file(
    client: &ApiClient,
    file_path: &Path,
    submission_id: &str,
    mime_type: &str,
    options: &UploadOptions,
) -> Result<UploadState, DataCollectiveError> {
    if file_path.as_os_str().is_empty() {
        return Err(DataCollectiveError::InvalidArgument(
            "`file_path` must be a non-empty string".to_string(),
        ));
    }
    require_non_empty(submission_id, "submission_id")?;
    require_non_empty(mime_type, "mime_type")?;

    if !file_path.is_file() {
        return Err(DataCollectiveError::NotFound(format!(
            "File not found: `{}`",
            file_path.display()
        )));
    }
    let file_size = file_path.metadata()?.len();
    if file_size == 0 {
        return Err(DataCollectiveError::InvalidArgument(
            "`file_path` must point to a non-empty file".to_string(),
        ));
    }

    let filename = match options.filename.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let state_path = options
        .state_path
        .clone()
        .unwrap_or_else(|| default_state_path(file_path));

    let mut state = if options.resume {
        load_upload_state(&state_path)?
    } else {
        None
    };
    if let Some(existing) = &state {
        if existing.file_size != file_size
            || existing.filename != filename
            || existing.submission_id != submission_id
        {
            tracing::warn!(
                state = %state_path.display(),
                "Upload state does not match file or submission, restarting upload"
            );
            state = None;
        } else {
            tracing::info!(state = %state_path.display(), "Resuming upload");
        }
    }

    let mut session = None;
    let mut state = match state {
        Some(state) => state,
        None => {
            let started = initiate_upload(client, submission_id, &filename, file_size, mime_type)?;
            if started.file_upload_id.trim().is_empty()
                || started.upload_id.trim().is_empty()
                || started.part_size == 0
            {
                return Err(DataCollectiveError::protocol(
                    "upload/initiate",
                    "Upload initiation did not return expected fields",
                ));
            }
            let state = UploadState {
                submission_id: submission_id.to_string(),
                file_upload_id: started.file_upload_id.clone(),
                upload_id: started.upload_id.clone(),
                file_size,
                part_size: started.part_size,
                filename: filename.clone(),
                mime_type: mime_type.to_string(),
                parts: Vec::new(),
                checksum: None,
            };
            save_upload_state(&state_path, &state)?;
            session = Some(started);
            state
        }
    };

    let total_parts = expected_parts(state.file_size, state.part_size)?;
    let mut parts_by_number: BTreeMap<u32, String> = state
        .parts
        .iter()
        .map(|part| (part.part_number, part.etag.clone()))
        .collect();

    let mut hasher = Sha256::new();
    let mut bytes_read: u64 = 0;
    let mut reader = BufReader::new(File::open(file_path)?);

    for part_index in 0..total_parts {
        let part_number = u32::try_from(part_index + 1).map_err(|_| {
            DataCollectiveError::InvalidArgument(format!(
                "file needs {total_parts} parts, more than the upload protocol allows"
            ))
        })?;

        let mut chunk = Vec::new();
        (&mut reader).take(state.part_size).read_to_end(&mut chunk)?;
        if chunk.is_empty() {
            break;
        }
        bytes_read += chunk.len() as u64;
        hasher.update(&chunk);

        if parts_by_number.contains_key(&part_number) {
            continue;
        }

        let url = part_url(client, session.as_ref(), &state.file_upload_id, part_number)?;
        let etag = upload_part(client, &url, chunk)?;
        tracing::info!(part = part_number, of = total_parts, "Uploaded part");

        parts_by_number.insert(part_number, etag.clone());
        state.parts.push(UploadPart { part_number, etag });
        save_upload_state(&state_path, &state)?;
    }

    if bytes_read != state.file_size {
        return Err(DataCollectiveError::UploadAborted(format!(
            "file size changed during upload (expected {} bytes, read {bytes_read})",
            state.file_size
        )));
    }
    if parts_by_number.len() as u64 != total_parts {
        return Err(DataCollectiveError::UploadAborted(format!(
            "expected {total_parts} parts but have {}",
            parts_by_number.len()
        )));
    }

    let checksum = hex::encode(hasher.finalize());
    if let Some(stored) = state.checksum.as_deref() {
        if !stored.eq_ignore_ascii_case(&checksum) {
            return Err(DataCollectiveError::UploadAborted(format!(
                "file content changed since the parts were uploaded (checksum {stored} recorded, {checksum} now)"
            )));
        }
    }

    state.checksum = Some(checksum.clone());
    state.parts = parts_by_number
        .into_iter()
        .map(|(part_number, etag)| UploadPart { part_number, etag })
        .collect();
    save_upload_state(&state_path, &state)?;

    complete_upload(
        client,
        &state.file_upload_id,
        &state.upload_id,
        &state.parts,
        &checksum,
    )?;
    tracing::info!(file = %state.filename, %checksum, "Upload complete");
    Ok(state)
}

/// Presigned URL for `part_number`, reusing the one that came with initiation
/// while it is still valid.
fn part_url(
    client: &ApiClient,
    session: Option<&UploadSession>,
    file_upload_id: &str,
    part_number: u32,
) -> Result<String, DataCollectiveError> {
    if let Some(session) = session {
        if session.part_number == part_number
            && !session.presigned_url.trim().is_empty()
            && !is_expired(&session.expires_at)
        {
            return Ok(session.presigned_url.clone());
        }
    }
    let presigned = get_presigned_part_url(client, file_upload_id, part_number - 1)?;
    if presigned.presigned_url.trim().is_empty() {
        return Err(DataCollectiveError::protocol(
            "upload/presigned-url",
            "Missing presigned URL for upload part",
        ));
    }
    Ok(presigned.presigned_url)
}

/// RFC 3339 timestamps in the past are expired; unparseable ones are not.
fn is_expired(expires_at: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(expires_at.trim())
        .map(|at| at <= chrono::Utc::now())
        .unwrap_or(false)
}

fn upload_part(client: &ApiClient, url: &str, chunk: Vec<u8>) -> Result<String, DataCollectiveError> {
    let response = client.send_presigned(HttpRequest::put(url).bytes(chunk))?;
    response
        .header("ETag")
        .map(|etag| etag.trim().trim_matches('"').to_string())
        .filter(|etag| !etag.is_empty())
        .ok_or_else(|| DataCollectiveError::protocol(url, "Missing ETag header in upload response"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_uses_rfc3339_timestamps() {
        assert!(is_expired("2000-01-01T00:00:00Z"));
        assert!(!is_expired("2999-01-01T00:00:00+00:00"));
        assert!(!is_expired(""));
        assert!(!is_expired("tomorrow"));
    }

    #[test]
    fn upload_options_resume_by_default() {
        let options = UploadOptions::default();
        assert!(options.resume);
        assert!(options.filename.is_none());
        assert!(options.state_path.is_none());
    }

    #[test]
    fn session_defaults_to_first_part() {
        let session: UploadSession = serde_json::from_str(
            r#"{"fileUploadId": "f", "uploadId": "u", "partSize": 256}"#,
        )
        .unwrap();
        assert_eq!(session.part_number, 1);
        assert_eq!(session.part_size, 256);
        assert!(session.presigned_url.is_empty());
    }
}
