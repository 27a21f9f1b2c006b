//! Resumable dataset downloads.
//!
//! A download is split into three steps that each work on their own:
//! [`get_download_plan`] asks the API for a one-time session,
//! [`determine_resume_state`] decides what the files left on disk are worth,
//! and [`execute_download_plan`] streams the archive into the `.part` file.
//! [`save_dataset_to_disk`] strings them together.

mod executor;
mod plan;
mod resume;

pub use executor::{
    execute_download_plan, execute_download_plan_cancellable, parse_repr_digest,
    prepare_resume_offset, CHUNK_SIZE,
};
pub use plan::{
    checksum_path_for, get_download_plan, resolve_download_dir, tmp_path_for, DownloadPlan,
};
pub use resume::{determine_resume_state, write_checksum_marker};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use crate::error::{DataCollectiveError, DownloadError};
use resume::remove_if_exists;

/// Download a dataset archive and return the path it was saved to.
///
/// An archive already at the target path is returned as-is unless
/// `overwrite_existing` is set. Interrupted downloads leave the partial file
/// and checksum marker behind, so calling this again resumes them.
pub fn save_dataset_to_disk(
    client: &crate::api::ApiClient,
    dataset_id: &str,
    download_directory: Option<&Path>,
    show_progress: bool,
    overwrite_existing: bool,
) -> Result<PathBuf, DataCollectiveError> {
    let never = AtomicBool::new(false);
    save_dataset_to_disk_cancellable(
        client,
        dataset_id,
        download_directory,
        show_progress,
        overwrite_existing,
        &never,
    )
}

/// Like [`save_dataset_to_disk`], stopping with a resumable
/// [`DownloadError`] once `cancel` is set.
pub fn save_dataset_to_disk_cancellable(
    client: &crate::api::ApiClient,
    dataset_id: &str,
    download_directory: Option<&Path>,
    show_progress: bool,
    overwrite_existing: bool,
    cancel: &AtomicBool,
) -> Result<PathBuf, DataCollectiveError> {
    let plan = get_download_plan(client, dataset_id, download_directory)?;

    if plan.target_path.exists() {
        if !overwrite_existing {
            tracing::info!(path = %plan.target_path.display(), "File already exists, skipping download");
            return Ok(plan.target_path);
        }
        tracing::info!(path = %plan.target_path.display(), "Overwriting existing file");
        fs::remove_file(&plan.target_path)?;
    }

    let resume_checksum = determine_resume_state(&plan)?;
    if resume_checksum.is_none() {
        write_checksum_marker(&plan)?;
    }

    let session_bytes = execute_download_plan_cancellable(
        client,
        &plan,
        resume_checksum.as_deref(),
        show_progress,
        cancel,
    )?;
    finalize(&plan, session_bytes)?;

    tracing::info!(path = %plan.target_path.display(), "Saved dataset");
    Ok(plan.target_path)
}

/// Check the partial file against the declared size and move it into place.
fn finalize(plan: &DownloadPlan, session_bytes: u64) -> Result<(), DataCollectiveError> {
    let written = fs::metadata(&plan.tmp_path)?.len();

    if written < plan.size_bytes {
        return Err(DownloadError {
            session_bytes,
            total_bytes: written,
            expected_bytes: plan.size_bytes,
            checksum: plan.checksum.clone(),
            source: Some(Box::new(DataCollectiveError::protocol(
                &plan.download_url,
                "connection closed before the whole archive was received",
            ))),
        }
        .into());
    }

    if written > plan.size_bytes {
        remove_if_exists(&plan.tmp_path)?;
        remove_if_exists(&plan.checksum_path)?;
        return Err(DataCollectiveError::protocol(
            &plan.download_url,
            format!(
                "received {written} bytes but the archive is declared as {} bytes",
                plan.size_bytes
            ),
        ));
    }

    fs::rename(&plan.tmp_path, &plan.target_path)?;
    remove_if_exists(&plan.checksum_path)?;
    Ok(())
}
