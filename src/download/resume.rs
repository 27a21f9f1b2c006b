use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use super::plan::DownloadPlan;
use crate::error::DataCollectiveError;

/// Decide whether the partial file on disk can be resumed.
///
/// Returns the stored checksum when the partial file and its marker both
/// exist and the marker matches the plan. Every other combination clears the
/// stale files before returning `None`:
///
/// | partial | marker | marker matches | outcome                       |
/// |---------|--------|----------------|-------------------------------|
/// | yes     | yes    | yes            | resume                        |
/// | yes     | yes    | no             | delete both (dataset changed) |
/// | yes     | no     |                | delete partial                |
/// | no      | yes    |                | delete orphaned marker        |
/// | no      | no     |                | start fresh                   |
///
/// A blank marker counts as no marker.
pub fn determine_resume_state(plan: &DownloadPlan) -> Result<Option<String>, DataCollectiveError> {
    let partial_exists = plan.tmp_path.exists();
    let marker_exists = plan.checksum_path.exists();
    let stored = if marker_exists {
        read_marker(&plan.checksum_path)?
    } else {
        None
    };

    match (partial_exists, stored) {
        (true, Some(stored)) => {
            if plan.checksum.as_deref() == Some(stored.as_str()) {
                tracing::info!(
                    file = %plan.filename,
                    "Resuming previously interrupted download"
                );
                Ok(Some(stored))
            } else {
                tracing::info!(
                    file = %plan.filename,
                    "Dataset has been updated since the last attempt, starting fresh"
                );
                remove_if_exists(&plan.tmp_path)?;
                remove_if_exists(&plan.checksum_path)?;
                Ok(None)
            }
        }
        (true, None) => {
            tracing::warn!(
                file = %plan.filename,
                "Partial download found without checksum file, starting fresh"
            );
            remove_if_exists(&plan.tmp_path)?;
            remove_if_exists(&plan.checksum_path)?;
            Ok(None)
        }
        (false, _) if marker_exists => {
            tracing::debug!(marker = %plan.checksum_path.display(), "removing orphaned checksum marker");
            remove_if_exists(&plan.checksum_path)?;
            Ok(None)
        }
        (false, _) => Ok(None),
    }
}

/// Record the plan's checksum next to the partial file.
///
/// Does nothing when the dataset has no checksum; such downloads cannot be
/// resumed.
pub fn write_checksum_marker(plan: &DownloadPlan) -> Result<(), DataCollectiveError> {
    if let Some(checksum) = &plan.checksum {
        fs::write(&plan.checksum_path, checksum)?;
    }
    Ok(())
}

fn read_marker(path: &Path) -> Result<Option<String>, DataCollectiveError> {
    let contents = fs::read_to_string(path)?;
    let trimmed = contents.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<(), DataCollectiveError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
