use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use indicatif::{ProgressBar, ProgressStyle};

use super::plan::DownloadPlan;
use crate::api::{ApiClient, HttpRequest};
use crate::error::{DataCollectiveError, DownloadError};

/// Size of each read from the response body.
pub const CHUNK_SIZE: usize = 1 << 16;

const PB_STYLE: &str =
    "{prefix:>12.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

const PB_CHARS: &str = "█▓▒░  ";

/// Stream the plan's archive into its partial file.
///
/// With `resume_checksum` set and a partial file present, the request asks
/// for the remaining bytes only; otherwise any stray partial file is removed
/// first. The partial file is left in place on success: moving it to the
/// target is the caller's job. Returns the number of bytes appended by this
/// call.
pub fn execute_download_plan(
    client: &ApiClient,
    plan: &DownloadPlan,
    resume_checksum: Option<&str>,
    show_progress: bool,
) -> Result<u64, DownloadError> {
    let never = AtomicBool::new(false);
    execute_download_plan_cancellable(client, plan, resume_checksum, show_progress, &never)
}

/// Like [`execute_download_plan`], stopping between chunks once `cancel` is set.
pub fn execute_download_plan_cancellable(
    client: &ApiClient,
    plan: &DownloadPlan,
    resume_checksum: Option<&str>,
    show_progress: bool,
    cancel: &AtomicBool,
) -> Result<u64, DownloadError> {
    let mut transfer = Transfer {
        plan,
        offset: 0,
        written: 0,
    };

    match prepare_resume_offset(&plan.tmp_path, resume_checksum) {
        Ok(offset) => transfer.offset = offset,
        Err(source) => return Err(transfer.failure(source.into())),
    }

    if transfer.offset > plan.size_bytes {
        tracing::warn!(
            partial = transfer.offset,
            declared = plan.size_bytes,
            "partial file is larger than the archive, starting over"
        );
        fs::remove_file(&plan.tmp_path).map_err(|source| transfer.failure(source.into()))?;
        transfer.offset = 0;
    }

    let progress = progress_bar(plan, show_progress);
    progress.set_position(transfer.offset);

    if transfer.offset > 0 && transfer.offset == plan.size_bytes {
        tracing::info!(file = %plan.filename, "partial file already holds the whole archive");
        progress.finish();
        return Ok(0);
    }

    match transfer.run(client, &progress, cancel) {
        Ok(()) => {
            progress.finish();
            Ok(transfer.written)
        }
        Err(source) => {
            progress.abandon();
            Err(transfer.failure(source))
        }
    }
}

struct Transfer<'a> {
    plan: &'a DownloadPlan,
    /// Bytes already in the partial file before this attempt.
    offset: u64,
    /// Bytes appended during this attempt.
    written: u64,
}

impl Transfer<'_> {
    fn run(
        &mut self,
        client: &ApiClient,
        progress: &ProgressBar,
        cancel: &AtomicBool,
    ) -> Result<(), DataCollectiveError> {
        let plan = self.plan;
        let mut request = HttpRequest::get(plan.download_url.as_str());
        if self.offset > 0 {
            request = request.header("Range", format!("bytes={}-", self.offset));
        }
        let response = client.send(request)?;

        if self.offset > 0 && response.status != 206 {
            tracing::warn!(
                status = response.status,
                "server ignored the range request, restarting from byte 0"
            );
            File::create(&plan.tmp_path)?;
            self.offset = 0;
            progress.set_position(0);
        }

        if let Some(expected) = plan.checksum.as_deref() {
            match response.header("Repr-Digest") {
                Some(header) => verify_repr_digest(header, expected, &plan.download_url)?,
                None => tracing::warn!(
                    url = %plan.download_url,
                    "server sent no Repr-Digest header, the archive checksum cannot be verified"
                ),
            }
        }

        tracing::info!(file = %plan.filename, offset = self.offset, "Downloading dataset");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&plan.tmp_path)?;
        let mut reader = response.into_reader();
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(io::Error::new(ErrorKind::Interrupted, "download cancelled").into());
            }
            let read = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            file.write_all(&buf[..read])?;
            self.written += read as u64;
            progress.inc(read as u64);
        }

        file.sync_all()?;
        Ok(())
    }

    fn failure(&self, source: DataCollectiveError) -> DownloadError {
        DownloadError {
            session_bytes: self.written,
            total_bytes: self.offset + self.written,
            expected_bytes: self.plan.size_bytes,
            checksum: self.plan.checksum.clone(),
            source: Some(Box::new(source)),
        }
    }
}

/// Bytes to skip on this attempt.
///
/// Without a resume checksum the partial file cannot be trusted and is removed.
pub fn prepare_resume_offset(tmp_path: &Path, resume_checksum: Option<&str>) -> io::Result<u64> {
    let metadata = match fs::metadata(tmp_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };

    if resume_checksum.is_some_and(|checksum| !checksum.trim().is_empty()) {
        return Ok(metadata.len());
    }

    fs::remove_file(tmp_path)?;
    Ok(0)
}

/// Hex digest carried by a `Repr-Digest` header (`sha-256=:<base64>:`).
pub fn parse_repr_digest(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (_algorithm, rest) = entry.trim().split_once("=:")?;
        let encoded = rest.strip_suffix(':')?;
        let engine = base64::engine::general_purpose::STANDARD;
        let bytes = engine
            .decode(encoded)
            .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(encoded.trim_end_matches('=')))
            .ok()?;
        Some(hex::encode(bytes))
    })
}

fn verify_repr_digest(header: &str, expected: &str, url: &str) -> Result<(), DataCollectiveError> {
    let actual = parse_repr_digest(header);
    if actual
        .as_deref()
        .is_some_and(|actual| actual.eq_ignore_ascii_case(expected.trim()))
    {
        return Ok(());
    }
    Err(DataCollectiveError::protocol(
        url,
        format!(
            "checksum from server ({}) does not match expected checksum for dataset ({expected})",
            actual.unwrap_or_else(|| header.to_string())
        ),
    ))
}

fn progress_bar(plan: &DownloadPlan, show_progress: bool) -> ProgressBar {
    if !show_progress {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(plan.size_bytes);
    let bar = match ProgressStyle::with_template(PB_STYLE) {
        Ok(style) => bar.with_style(style.progress_chars(PB_CHARS)),
        Err(_) => bar,
    };
    bar.with_prefix("Downloading")
}
