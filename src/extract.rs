//! Unpacking of downloaded dataset archives.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::DataCollectiveError;

/// Archive formats the platform serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Tar,
    Zip,
}

impl ArchiveKind {
    /// Guess the format from the file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }

    fn suffix_len(self, name: &str) -> usize {
        let lower = name.to_ascii_lowercase();
        match self {
            Self::TarGz if lower.ends_with(".tar.gz") => ".tar.gz".len(),
            Self::TarGz => ".tgz".len(),
            Self::Tar => ".tar".len(),
            Self::Zip => ".zip".len(),
        }
    }
}

/// `mcv-scripted-en.tar.gz` -> `mcv-scripted-en`. Unknown suffixes are kept.
pub fn strip_archive_suffix(name: &str) -> &str {
    match ArchiveKind::from_path(Path::new(name)) {
        Some(kind) => &name[..name.len() - kind.suffix_len(name)],
        None => name,
    }
}

/// Directory an archive extracts into when no destination is given: a
/// sibling named after the archive without its suffix.
pub fn default_extract_dir(archive: &Path) -> PathBuf {
    let name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    archive.with_file_name(strip_archive_suffix(&name))
}

/// Extract `archive` into `destination` (or [`default_extract_dir`]).
///
/// Entries whose paths would land outside the destination abort the
/// extraction.
pub fn extract_archive(
    archive: &Path,
    destination: Option<&Path>,
) -> Result<PathBuf, DataCollectiveError> {
    let kind = ArchiveKind::from_path(archive).ok_or_else(|| DataCollectiveError::Archive {
        path: archive.to_path_buf(),
        message: "unsupported archive type (expected .tar.gz, .tgz, .tar or .zip)".to_string(),
    })?;
    let destination = destination
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_extract_dir(archive));

    fs::create_dir_all(&destination)?;
    tracing::info!(
        archive = %archive.display(),
        destination = %destination.display(),
        "Extracting archive"
    );

    let file = BufReader::new(File::open(archive)?);
    match kind {
        ArchiveKind::TarGz => unpack_tar(archive, tar::Archive::new(GzDecoder::new(file)), &destination)?,
        ArchiveKind::Tar => unpack_tar(archive, tar::Archive::new(file), &destination)?,
        ArchiveKind::Zip => unpack_zip(archive, file, &destination)?,
    }

    Ok(destination)
}

fn unpack_tar<R: std::io::Read>(
    path: &Path,
    mut archive: tar::Archive<R>,
    destination: &Path,
) -> Result<(), DataCollectiveError> {
    let archive_error = |message: String| DataCollectiveError::Archive {
        path: path.to_path_buf(),
        message,
    };

    let entries = archive
        .entries()
        .map_err(|err| archive_error(err.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|err| archive_error(err.to_string()))?;
        let entry_path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let inside = entry
            .unpack_in(destination)
            .map_err(|err| archive_error(format!("{entry_path}: {err}")))?;
        if !inside {
            return Err(archive_error(format!(
                "entry `{entry_path}` escapes the destination directory"
            )));
        }
    }
    Ok(())
}

fn unpack_zip(
    path: &Path,
    file: BufReader<File>,
    destination: &Path,
) -> Result<(), DataCollectiveError> {
    let archive_error = |message: String| DataCollectiveError::Archive {
        path: path.to_path_buf(),
        message,
    };

    let mut archive = zip::ZipArchive::new(file).map_err(|err| archive_error(err.to_string()))?;
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|err| archive_error(err.to_string()))?;
        if entry.enclosed_name().is_none() {
            return Err(archive_error(format!(
                "entry `{}` escapes the destination directory",
                entry.name()
            )));
        }
    }
    archive
        .extract(destination)
        .map_err(|err| archive_error(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    #[test]
    fn suffixes_are_stripped() {
        assert_eq!(strip_archive_suffix("mcv-scripted-en.tar.gz"), "mcv-scripted-en");
        assert_eq!(strip_archive_suffix("corpus.TGZ"), "corpus");
        assert_eq!(strip_archive_suffix("corpus.zip"), "corpus");
        assert_eq!(strip_archive_suffix("corpus.tar"), "corpus");
        assert_eq!(strip_archive_suffix("corpus.7z"), "corpus.7z");
    }

    #[test]
    fn default_dir_is_a_sibling() {
        assert_eq!(
            default_extract_dir(Path::new("/data/mcv-spontaneous-de.tar.gz")),
            PathBuf::from("/data/mcv-spontaneous-de")
        );
    }

    #[test]
    fn tar_gz_archives_extract() {
        let temp = tempfile::tempdir().expect("tempdir");
        let archive_path = temp.path().join("mcv-scripted-xx.tar.gz");

        let encoder = GzEncoder::new(File::create(&archive_path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let body = b"client_id\tpath\n1\ta.mp3\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "xx/train.tsv", &body[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let out = extract_archive(&archive_path, None).expect("extract");

        assert_eq!(out, temp.path().join("mcv-scripted-xx"));
        assert_eq!(fs::read(out.join("xx/train.tsv")).unwrap(), body);
    }

    #[test]
    fn zip_archives_extract() {
        let temp = tempfile::tempdir().expect("tempdir");
        let archive_path = temp.path().join("corpus.zip");

        let mut writer = zip::ZipWriter::new(File::create(&archive_path).unwrap());
        writer
            .start_file("data/ss-corpus-xx.tsv", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"audio_id\n1\n").unwrap();
        writer.finish().unwrap();

        let dest = temp.path().join("out");
        let out = extract_archive(&archive_path, Some(&dest)).expect("extract");

        assert_eq!(out, dest);
        assert!(dest.join("data/ss-corpus-xx.tsv").is_file());
    }

    #[test]
    fn unknown_archive_types_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("corpus.rar");
        fs::write(&path, b"x").unwrap();
        assert!(matches!(
            extract_archive(&path, None),
            Err(DataCollectiveError::Archive { .. })
        ));
    }
}
