use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::api::{ApiClient, HttpRequest};
use crate::config::expand_home;
use crate::error::DataCollectiveError;

/// Everything needed to transfer one dataset archive.
///
/// Built fresh for every attempt from a one-time download session; only the
/// `.part` and `.checksum` files derived from it outlive the call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadPlan {
    /// Single-use, time-limited URL for the archive.
    pub download_url: String,
    pub filename: String,
    /// Final archive location.
    pub target_path: PathBuf,
    /// `target_path` + `.part`; receives bytes during the transfer.
    pub tmp_path: PathBuf,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    /// `target_path` + `.checksum`; the resume marker.
    pub checksum_path: PathBuf,
}

impl DownloadPlan {
    pub fn new(
        download_url: impl Into<String>,
        filename: impl Into<String>,
        base_dir: &Path,
        size_bytes: u64,
        checksum: Option<String>,
    ) -> Self {
        let filename = filename.into();
        let target_path = base_dir.join(&filename);
        Self {
            download_url: download_url.into(),
            tmp_path: tmp_path_for(&target_path),
            checksum_path: checksum_path_for(&target_path),
            target_path,
            filename,
            size_bytes,
            checksum: checksum.filter(|value| !value.trim().is_empty()),
        }
    }
}

/// Partial-download path for a target archive.
pub fn tmp_path_for(target: &Path) -> PathBuf {
    with_appended_suffix(target, ".part")
}

/// Checksum-marker path for a target archive.
pub fn checksum_path_for(target: &Path) -> PathBuf {
    with_appended_suffix(target, ".checksum")
}

fn with_appended_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadSession {
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    size_bytes: Option<Value>,
    #[serde(default)]
    checksum: Option<String>,
}

/// Ask the API for a download session and lay out the local paths.
///
/// Creates the download directory if needed; does not start the transfer.
pub fn get_download_plan(
    client: &ApiClient,
    dataset_id: &str,
    download_directory: Option<&Path>,
) -> Result<DownloadPlan, DataCollectiveError> {
    if dataset_id.trim().is_empty() {
        return Err(DataCollectiveError::InvalidArgument(
            "`dataset_id` must be a non-empty string".to_string(),
        ));
    }

    let base_dir = resolve_download_dir(download_directory, &client.config().download_dir)?;

    let dataset_id = dataset_id.trim();
    let path = format!("datasets/{dataset_id}/download");
    let url = client.endpoint(&["datasets", dataset_id, "download"])?;
    let session: DownloadSession = client.send(HttpRequest::post(url))?.json(&path)?;

    let download_url = session
        .download_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| DataCollectiveError::protocol(&path, "missing `downloadUrl`"))?;
    let filename = session
        .filename
        .as_deref()
        .and_then(|name| Path::new(name.trim()).file_name())
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| DataCollectiveError::protocol(&path, "missing or unusable `filename`"))?;
    let size_bytes = session
        .size_bytes
        .as_ref()
        .and_then(parse_size)
        .filter(|size| *size > 0)
        .ok_or_else(|| DataCollectiveError::protocol(&path, "missing or non-positive `sizeBytes`"))?;

    Ok(DownloadPlan::new(
        download_url,
        filename,
        &base_dir,
        size_bytes,
        session.checksum,
    ))
}

/// The API sends sizes as numbers or as numeric strings.
fn parse_size(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Resolve, create, and probe the directory downloads are written to.
///
/// An explicit, non-blank `requested` directory wins over `fallback`.
pub fn resolve_download_dir(
    requested: Option<&Path>,
    fallback: &Path,
) -> Result<PathBuf, DataCollectiveError> {
    let base = requested
        .filter(|path| !path.as_os_str().to_string_lossy().trim().is_empty())
        .unwrap_or(fallback);
    let dir = expand_home(base);

    std::fs::create_dir_all(&dir).map_err(|source| {
        DataCollectiveError::PermissionDenied(format!(
            "cannot create directory `{}`: {source}",
            dir.display()
        ))
    })?;

    tempfile::Builder::new()
        .prefix(".mdc-write-probe")
        .tempfile_in(&dir)
        .map_err(|_| {
            DataCollectiveError::PermissionDenied(format!(
                "Directory `{}` is not writable",
                dir.display()
            ))
        })?;

    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_paths_derive_from_target() {
        let plan = DownloadPlan::new(
            "https://example.com/download",
            "dataset.tar.gz",
            Path::new("/data"),
            1000,
            Some("abc".to_string()),
        );
        assert_eq!(plan.target_path, PathBuf::from("/data/dataset.tar.gz"));
        assert_eq!(plan.tmp_path, PathBuf::from("/data/dataset.tar.gz.part"));
        assert_eq!(plan.checksum_path, PathBuf::from("/data/dataset.tar.gz.checksum"));
    }

    #[test]
    fn blank_checksum_is_treated_as_absent() {
        let plan = DownloadPlan::new("u", "a.zip", Path::new("/d"), 1, Some("  ".to_string()));
        assert_eq!(plan.checksum, None);
    }

    #[test]
    fn sizes_parse_from_numbers_and_strings() {
        assert_eq!(parse_size(&serde_json::json!(1024)), Some(1024));
        assert_eq!(parse_size(&serde_json::json!("2048")), Some(2048));
        assert_eq!(parse_size(&serde_json::json!(-1)), None);
        assert_eq!(parse_size(&serde_json::json!("big")), None);
        assert_eq!(parse_size(&serde_json::json!(null)), None);
    }

    #[test]
    fn resolve_download_dir_prefers_argument() {
        let temp = tempfile::tempdir().expect("tempdir");
        let custom = temp.path().join("custom");
        let fallback = temp.path().join("fallback");

        let resolved = resolve_download_dir(Some(&custom), &fallback).expect("resolve");
        assert_eq!(resolved, custom);
        assert!(custom.exists());
        assert!(!fallback.exists());
    }

    #[test]
    fn resolve_download_dir_uses_fallback_for_blank_argument() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fallback = temp.path().join("env");

        let resolved = resolve_download_dir(Some(Path::new("  ")), &fallback).expect("resolve");
        assert_eq!(resolved, fallback);
        assert!(fallback.exists());

        let resolved = resolve_download_dir(None, &fallback).expect("resolve");
        assert_eq!(resolved, fallback);
    }

    #[test]
    fn resolve_download_dir_leaves_no_probe_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        resolve_download_dir(Some(temp.path()), temp.path()).expect("resolve");
        let leftovers: Vec<_> = std::fs::read_dir(temp.path()).expect("read_dir").collect();
        assert!(leftovers.is_empty());
    }
}
