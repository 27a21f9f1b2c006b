//! Reading extracted Common Voice style corpora from disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use walkdir::WalkDir;

use crate::api::ApiClient;
use crate::download::save_dataset_to_disk_cancellable;
use crate::error::DataCollectiveError;
use crate::extract::{default_extract_dir, extract_archive};

/// Split files of a scripted-speech corpus, in load order.
pub const SCRIPTED_SPEECH_SPLITS: [&str; 7] = [
    "dev",
    "train",
    "test",
    "validated",
    "invalidated",
    "reported",
    "other",
];

/// Column added to scripted-speech rows naming the split they came from.
pub const SPLIT_COLUMN: &str = "split";

const SCRIPTED_PREFIX: &str = "mcv-scripted-";
const SPONTANEOUS_PREFIX: &str = "mcv-spontaneous-";
const SPONTANEOUS_FILE_PREFIX: &str = "ss-corpus-";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatasetKind {
    ScriptedSpeech,
    SpontaneousSpeech,
}

impl DatasetKind {
    /// Identify the corpus type from the directory name.
    pub fn detect(dir: &Path) -> Option<Self> {
        let name = dir.file_name()?.to_str()?;
        if name.starts_with(SCRIPTED_PREFIX) {
            Some(Self::ScriptedSpeech)
        } else if name.starts_with(SPONTANEOUS_PREFIX) {
            Some(Self::SpontaneousSpeech)
        } else {
            None
        }
    }
}

/// A tab-separated table held in memory as strings.
///
/// Rows always have one cell per column; cells missing from a source file
/// are empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpeechTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SpeechTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Every value of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &str> + '_> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| row[index].as_str()))
    }

    /// Append `other`, widening the column set when it has new columns.
    fn append(&mut self, other: SpeechTable) {
        let mapping: Vec<usize> = other
            .columns
            .iter()
            .map(|name| match self.column_index(name) {
                Some(index) => index,
                None => {
                    self.columns.push(name.clone());
                    for row in &mut self.rows {
                        row.push(String::new());
                    }
                    self.columns.len() - 1
                }
            })
            .collect();

        let width = self.columns.len();
        for source in other.rows {
            let mut row = vec![String::new(); width];
            for (value, &index) in source.into_iter().zip(&mapping) {
                row[index] = value;
            }
            self.rows.push(row);
        }
    }
}

/// Read a headed TSV file.
pub fn read_tsv(path: &Path) -> Result<SpeechTable, DataCollectiveError> {
    let table_error = |source: csv::Error| DataCollectiveError::TableRead {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_path(path)
        .map_err(table_error)?;

    let columns: Vec<String> = reader
        .headers()
        .map_err(table_error)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(table_error)?;
        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(columns.len(), String::new());
        rows.push(row);
    }

    Ok(SpeechTable { columns, rows })
}

/// An extracted corpus and its table.
#[derive(Clone, Debug)]
pub struct LocalDataset {
    root: PathBuf,
    kind: DatasetKind,
    table: SpeechTable,
}

impl LocalDataset {
    /// Load the corpus stored under `dir`.
    pub fn open(dir: &Path) -> Result<Self, DataCollectiveError> {
        let kind = DatasetKind::detect(dir).ok_or_else(|| DataCollectiveError::DatasetLayout {
            path: dir.to_path_buf(),
            message: "Dataset cannot be identified as MCV scripted or spontaneous".to_string(),
        })?;

        let table = match kind {
            DatasetKind::ScriptedSpeech => load_scripted(dir)?,
            DatasetKind::SpontaneousSpeech => load_spontaneous(dir)?,
        };
        tracing::debug!(dir = %dir.display(), rows = table.len(), "loaded dataset table");

        Ok(Self {
            root: dir.to_path_buf(),
            kind,
            table,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn table(&self) -> &SpeechTable {
        &self.table
    }

    pub fn into_table(self) -> SpeechTable {
        self.table
    }

    /// Distinct split names in order of first appearance.
    ///
    /// Empty for corpora without a split column.
    pub fn splits(&self) -> Vec<String> {
        let mut seen = Vec::<String>::new();
        if let Some(values) = self.table.column(SPLIT_COLUMN) {
            for value in values {
                if !value.is_empty() && !seen.iter().any(|known| known == value) {
                    seen.push(value.to_string());
                }
            }
        }
        seen
    }
}

fn tsv_files(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tsv"))
}

fn load_scripted(dir: &Path) -> Result<SpeechTable, DataCollectiveError> {
    let mut split_files: BTreeMap<usize, PathBuf> = BTreeMap::new();
    for entry in tsv_files(dir) {
        let name = entry.file_name().to_string_lossy();
        let stem = name.trim_end_matches(".tsv");
        if let Some(order) = SCRIPTED_SPEECH_SPLITS.iter().position(|split| *split == stem) {
            split_files.insert(order, entry.path().to_path_buf());
        }
    }

    if split_files.is_empty() {
        return Err(DataCollectiveError::DatasetLayout {
            path: dir.to_path_buf(),
            message: "no split files found".to_string(),
        });
    }

    let mut combined = SpeechTable::default();
    for (order, path) in split_files {
        let mut table = read_tsv(&path)?;
        table.columns.push(SPLIT_COLUMN.to_string());
        for row in &mut table.rows {
            row.push(SCRIPTED_SPEECH_SPLITS[order].to_string());
        }
        combined.append(table);
    }
    Ok(combined)
}

fn load_spontaneous(dir: &Path) -> Result<SpeechTable, DataCollectiveError> {
    let corpus = tsv_files(dir)
        .find(|entry| {
            entry
                .file_name()
                .to_string_lossy()
                .starts_with(SPONTANEOUS_FILE_PREFIX)
        })
        .ok_or_else(|| DataCollectiveError::DatasetLayout {
            path: dir.to_path_buf(),
            message: "Could not find dataset file in directory".to_string(),
        })?;
    read_tsv(corpus.path())
}

/// Download, extract, and open a dataset.
///
/// An extraction directory left by an earlier call is reused unless
/// `overwrite_existing` is set.
pub fn load_dataset(
    client: &ApiClient,
    dataset_id: &str,
    download_directory: Option<&Path>,
    show_progress: bool,
    overwrite_existing: bool,
) -> Result<LocalDataset, DataCollectiveError> {
    let never = AtomicBool::new(false);
    load_dataset_cancellable(
        client,
        dataset_id,
        download_directory,
        show_progress,
        overwrite_existing,
        &never,
    )
}

/// Like [`load_dataset`], with a flag that interrupts the download.
pub fn load_dataset_cancellable(
    client: &ApiClient,
    dataset_id: &str,
    download_directory: Option<&Path>,
    show_progress: bool,
    overwrite_existing: bool,
    cancel: &AtomicBool,
) -> Result<LocalDataset, DataCollectiveError> {
    let archive = save_dataset_to_disk_cancellable(
        client,
        dataset_id,
        download_directory,
        show_progress,
        overwrite_existing,
        cancel,
    )?;

    let extract_dir = default_extract_dir(&archive);
    if overwrite_existing || !extract_dir.is_dir() {
        extract_archive(&archive, Some(&extract_dir))?;
    } else {
        tracing::info!(dir = %extract_dir.display(), "Using previously extracted dataset");
    }

    LocalDataset::open(&extract_dir)
}
