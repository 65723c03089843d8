//! Per-directory batch run: discover input files, enrich every row, write
//! the export and skip log, relocate the input and report it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use csv::{StringRecord, Terminator, WriterBuilder};
use postdata_parser::{parse_input, InputRow};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Directories;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::gateway::Lookup;
use crate::notify::{Notifier, RunSummary};
use crate::transform::{transform, OutputRow};

pub const OUTPUT_PREFIX: &str = "PT_POST_POSTAL_DATA_";
pub const OUTPUT_EXTENSION: &str = "CSV";
pub const SKIP_LOG_PREFIX: &str = "SKIPPED_ROWS_";
pub const SKIP_LOG_EXTENSION: &str = "csv";

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MissingTrackingNumber,
    NotFound,
    InvalidArrivalDate,
}

impl SkipReason {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::RowSkip
    }
}

#[derive(Debug, Clone)]
pub struct SkippedRow {
    pub row: InputRow,
    pub reason: SkipReason,
}

/// Rows produced from one input file, in input order.
#[derive(Debug, Default)]
pub struct BatchRun {
    pub transformed: Vec<OutputRow>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub input_name: String,
    pub processed_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub transformed: usize,
    pub skipped: usize,
    /// `None` when no notifier is configured.
    pub notified: Option<bool>,
}

/// An input file that was abandoned without stopping the batch.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub input: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub files: Vec<FileOutcome>,
    pub failures: Vec<FileFailure>,
}

impl BatchReport {
    /// True when every file went through and every attempted notification
    /// was delivered.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.files.iter().all(|file| file.notified != Some(false))
    }

    pub fn transformed(&self) -> usize {
        self.files.iter().map(|file| file.transformed).sum()
    }

    pub fn skipped(&self) -> usize {
        self.files.iter().map(|file| file.skipped).sum()
    }
}

pub struct BatchDriver {
    directories: Directories,
    lookup: Arc<dyn Lookup>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl BatchDriver {
    pub fn new(directories: Directories, lookup: Arc<dyn Lookup>) -> Self {
        Self {
            directories,
            lookup,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    /// Processes every input file once. An `Err` means the batch stopped
    /// early; files already handled stay relocated.
    pub async fn run(&self) -> Result<BatchReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("batch", %run_id);
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<BatchReport> {
        self.prepare_directories()?;
        let inputs = discover_inputs(&self.directories.input)?;
        info!(
            files = inputs.len(),
            input_dir = %self.directories.input.display(),
            "batch started"
        );

        let mut report = BatchReport {
            run_id,
            files: Vec::new(),
            failures: Vec::new(),
        };

        for path in inputs {
            match self.process_file(&path).await {
                Ok(outcome) => report.files.push(outcome),
                Err(err) if !err.is_fatal() => {
                    warn!(
                        input = %path.display(),
                        kind = %err.kind(),
                        error = %err,
                        "input file skipped"
                    );
                    report.failures.push(FileFailure {
                        input: path,
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
                Err(err) => {
                    error!(
                        input = %path.display(),
                        kind = %err.kind(),
                        error = %err,
                        "batch aborted"
                    );
                    return Err(err);
                }
            }
        }

        info!(
            files = report.files.len(),
            failed = report.failures.len(),
            transformed = report.transformed(),
            skipped = report.skipped(),
            "batch finished"
        );
        Ok(report)
    }

    fn prepare_directories(&self) -> Result<()> {
        let dirs = &self.directories;
        for dir in [&dirs.output, &dirs.processed, &dirs.log] {
            fs::create_dir_all(dir).map_err(|source| PipelineError::PrepareDirectory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    async fn process_file(&self, path: &Path) -> Result<FileOutcome> {
        let input_name = file_name(path);
        let bytes = fs::read(path).map_err(|source| PipelineError::ReadInput {
            path: path.to_path_buf(),
            source,
        })?;
        let input = parse_input(bytes.as_slice())
            .map_err(|source| PipelineError::from_parser(path.to_path_buf(), source))?;

        for column in &input.missing_optional {
            warn!(input = %input_name, column = %column, "optional column missing, using empty values");
        }
        info!(input = %input_name, rows = input.len(), "processing input file");

        let headers = input.headers;
        let run = self.process_rows(input.rows).await;

        let output_path = if run.transformed.is_empty() {
            None
        } else {
            Some(write_output(&self.directories.output, &run.transformed)?)
        };
        let log_path = if run.skipped.is_empty() {
            None
        } else {
            Some(write_skip_log(&self.directories.log, &headers, &run.skipped)?)
        };

        let processed_path = relocate(path, &self.directories.processed)?;
        info!(
            input = %input_name,
            transformed = run.transformed.len(),
            skipped = run.skipped.len(),
            processed = %processed_path.display(),
            "input file processed"
        );

        let mut outcome = FileOutcome {
            input_name,
            processed_path,
            output_path,
            log_path,
            transformed: run.transformed.len(),
            skipped: run.skipped.len(),
            notified: None,
        };

        if let Some(notifier) = &self.notifier {
            let summary = RunSummary {
                input_name: outcome.input_name.clone(),
                output_path: outcome.output_path.clone(),
                log_path: outcome.log_path.clone(),
                processed_count: outcome.transformed,
                skipped_count: outcome.skipped,
            };
            outcome.notified = Some(notifier.notify(&summary).await);
        }

        Ok(outcome)
    }

    async fn process_rows(&self, rows: Vec<InputRow>) -> BatchRun {
        let mut run = BatchRun::default();

        for row in rows {
            let tracking_number = row.tracking_number.trim();
            let outcome = if tracking_number.is_empty() {
                Err(SkipReason::MissingTrackingNumber)
            } else {
                match self.lookup.lookup(tracking_number).await {
                    None => Err(SkipReason::NotFound),
                    Some(enrichment) => transform(&row, &enrichment).map_err(|err| {
                        warn!(line = row.line, tracking_number, error = %err, "arrival date rejected");
                        SkipReason::InvalidArrivalDate
                    }),
                }
            };

            match outcome {
                Ok(output) => run.transformed.push(output),
                Err(reason) => {
                    debug!(
                        line = row.line,
                        tracking_number = %row.tracking_number,
                        reason = ?reason,
                        "row skipped"
                    );
                    run.skipped.push(SkippedRow { row, reason });
                }
            }
        }

        run
    }
}

/// Regular files directly inside `dir`, sorted by file name.
pub fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>> {
    let list_error = |source| PipelineError::ListInput {
        path: dir.to_path_buf(),
        source,
    };

    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_error)? {
        let entry = entry.map_err(list_error)?;
        let file_type = entry.file_type().map_err(list_error)?;
        let path = entry.path();
        if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            inputs.push(path);
        }
    }
    inputs.sort_by_key(|path| path.file_name().map(|name| name.to_os_string()));
    Ok(inputs)
}

/// Current local time as used in artifact names. Each artifact reads the
/// clock itself.
fn artifact_timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn write_output(dir: &Path, rows: &[OutputRow]) -> Result<PathBuf> {
    let stem = format!("{OUTPUT_PREFIX}{}", artifact_timestamp());
    let (path, file) = create_artifact(dir, &stem, OUTPUT_EXTENSION)?;
    let mut writer = WriterBuilder::new()
        .delimiter(b';')
        .terminator(Terminator::CRLF)
        .from_writer(file);

    for row in rows {
        writer
            .serialize(row)
            .map_err(|source| PipelineError::EncodeArtifact {
                path: path.clone(),
                source,
            })?;
    }
    finish(writer, &path)?;

    info!(path = %path.display(), rows = rows.len(), "output written");
    Ok(path)
}

fn write_skip_log(dir: &Path, headers: &StringRecord, skipped: &[SkippedRow]) -> Result<PathBuf> {
    let stem = format!("{SKIP_LOG_PREFIX}{}", artifact_timestamp());
    let (path, file) = create_artifact(dir, &stem, SKIP_LOG_EXTENSION)?;
    let mut writer = WriterBuilder::new()
        .delimiter(b',')
        .terminator(Terminator::CRLF)
        .flexible(true)
        .from_writer(file);

    let encode_error = |source| PipelineError::EncodeArtifact {
        path: path.clone(),
        source,
    };
    writer.write_record(headers).map_err(encode_error)?;
    for skipped_row in skipped {
        writer
            .write_record(skipped_row.row.raw())
            .map_err(encode_error)?;
    }
    finish(writer, &path)?;

    info!(path = %path.display(), rows = skipped.len(), "skip log written");
    Ok(path)
}

fn finish<W: Write>(mut writer: csv::Writer<W>, path: &Path) -> Result<()> {
    writer.flush().map_err(|source| PipelineError::WriteArtifact {
        path: path.to_path_buf(),
        source,
    })
}

/// Creates `<stem>.<ext>` in `dir`, or `<stem>_<n>.<ext>` if that name is
/// already taken.
fn create_artifact(dir: &Path, stem: &str, extension: &str) -> Result<(PathBuf, File)> {
    let mut suffix = 0u32;
    loop {
        let name = if suffix == 0 {
            format!("{stem}.{extension}")
        } else {
            format!("{stem}_{suffix}.{extension}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
            Err(source) => return Err(PipelineError::WriteArtifact { path, source }),
        }
    }
}

/// Moves `path` into `processed_dir`, copying across filesystems.
fn relocate(path: &Path, processed_dir: &Path) -> Result<PathBuf> {
    let destination = processed_dir.join(path.file_name().unwrap_or(path.as_os_str()));
    move_file(path, &destination, |from, to| fs::rename(from, to)).map_err(|source| {
        PipelineError::Relocate {
            from: path.to_path_buf(),
            to: destination.clone(),
            source,
        }
    })?;
    Ok(destination)
}

/// Renames `from` to `to`. Only a cross-device rename falls back to copy and
/// remove; if the remove fails the copy is deleted again, so the file never
/// ends up in both places.
fn move_file<F>(from: &Path, to: &Path, rename: F) -> io::Result<()>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    match rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if is_cross_device(&err) => {
            debug!(error = %err, "rename crosses filesystems, copying instead");
            fs::copy(from, to)?;
            if let Err(err) = fs::remove_file(from) {
                if let Err(cleanup) = fs::remove_file(to) {
                    warn!(path = %to.display(), error = %cleanup, "failed to remove copied file");
                }
                return Err(err);
            }
            Ok(())
        }
        Err(err) => Err(err),
    }
}

fn is_cross_device(err: &io::Error) -> bool {
    const EXDEV: i32 = 18;
    err.kind() == io::ErrorKind::CrossesDevices || (cfg!(unix) && err.raw_os_error() == Some(EXDEV))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
