//! Many-file conversion on top of [`Converter`].
//!
//! The batch layer owns input validation: directories, missing files and
//! unreadable files are skipped with a warning instead of failing the whole
//! batch, as are outputs that already exist (unless overwriting) or are
//! directories. Everything that survives validation is submitted to the pool
//! concurrently, up to the pool size.
//!
//! ```text
//! inputs ─▶ expand wildcards ─▶ validate input ─▶ name output ─▶ validate output
//!                                    │ skip                          │ skip
//!                                    ▼                               ▼
//!                               BatchReport.skipped         BatchReport.skipped
//!
//! valid pairs ─▶ buffer_unordered(pool size) ─▶ converted / failed
//! ```

use crate::convert::Converter;
use crate::error::OfficeError;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A file converted successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedFile {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// An input left out of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub input: PathBuf,
    pub reason: String,
}

/// A conversion that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub input: PathBuf,
    pub output: PathBuf,
    pub error: String,
}

/// Outcome of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub converted: Vec<ConvertedFile>,
    pub skipped: Vec<SkippedFile>,
    pub failed: Vec<FailedFile>,
}

impl BatchReport {
    /// Whether no conversion failed. Skipped files do not count as failures.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn skip(&mut self, progress: &ProgressCallback, input: &Path, reason: String) {
        warn!("{}", reason);
        progress.on_file_skipped(input, &reason);
        self.skipped.push(SkippedFile {
            input: input.to_path_buf(),
            reason,
        });
    }
}

/// Converts many files through one [`Converter`].
pub struct BatchConverter {
    converter: Arc<Converter>,
    output_dir: Option<PathBuf>,
    overwrite: bool,
    concurrency: usize,
    progress: ProgressCallback,
}

impl BatchConverter {
    pub fn new(converter: Arc<Converter>) -> Self {
        let concurrency = converter.manager().pool_size().max(1);
        Self {
            converter,
            output_dir: None,
            overwrite: false,
            concurrency,
            progress: Arc::new(NoopProgressCallback),
        }
    }

    /// Directory receiving relative outputs. Created when missing.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Replace existing outputs instead of skipping them.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Conversions in flight at once. Default: the pool size.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = callback;
        self
    }

    /// Converts `inputs[i]` into `outputs[i]`.
    ///
    /// Fails with [`OfficeError::Configuration`] before dispatching anything
    /// when the two lists differ in length.
    pub async fn convert_to_files(
        &self,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
    ) -> Result<BatchReport, OfficeError> {
        if inputs.len() != outputs.len() {
            return Err(OfficeError::Configuration(format!(
                "Got {} input files but {} output files; the counts must match",
                inputs.len(),
                outputs.len()
            )));
        }
        self.prepare_output_dir().await?;

        let mut report = BatchReport::default();
        let mut jobs = Vec::new();
        for (input, output) in inputs.iter().zip(outputs) {
            if !self.validate_input(input, &mut report).await {
                continue;
            }
            let output = self.place_output(input, output);
            if self.validate_output(input, &output, &mut report).await {
                jobs.push((input.clone(), output));
            }
        }
        Ok(self.run(jobs, report).await)
    }

    /// Converts every input into `<stem>.<extension>`.
    ///
    /// Inputs may use `*` and `?` wildcards in their file name.
    pub async fn convert_to_format(
        &self,
        inputs: &[PathBuf],
        extension: &str,
    ) -> Result<BatchReport, OfficeError> {
        let extension = extension.trim_start_matches('.');
        let format = self
            .converter
            .registry()
            .by_extension(extension)
            .ok_or_else(|| {
                OfficeError::Configuration(format!("Unknown output format '{extension}'"))
            })?;
        let extension = format.extension().to_string();
        self.prepare_output_dir().await?;

        let mut report = BatchReport::default();
        let mut jobs = Vec::new();
        for input in self.expand_inputs(inputs, &mut report).await {
            if !self.validate_input(&input, &mut report).await {
                continue;
            }
            let name = match output_name(&input, &extension) {
                Some(name) => name,
                None => {
                    report.skip(
                        &self.progress,
                        &input,
                        format!(
                            "Skipping file '{}' that has no file name to derive an output from",
                            input.display()
                        ),
                    );
                    continue;
                }
            };
            let output = self.place_output(&input, &name);
            if self.validate_output(&input, &output, &mut report).await {
                jobs.push((input, output));
            }
        }
        Ok(self.run(jobs, report).await)
    }

    async fn run(&self, jobs: Vec<(PathBuf, PathBuf)>, mut report: BatchReport) -> BatchReport {
        info!(
            "Converting {} files ({} skipped)",
            jobs.len(),
            report.skipped.len()
        );
        self.progress.on_batch_start(jobs.len());

        let results: Vec<_> = stream::iter(jobs)
            .map(|(input, output)| async move {
                self.progress.on_file_start(&input);
                let result = self
                    .converter
                    .convert(input.clone())
                    .to(output.clone())
                    .execute()
                    .await;
                (input, output, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (input, output, result) in results {
            match result {
                Ok(()) => {
                    info!("Converted {} -> {}", input.display(), output.display());
                    self.progress.on_file_complete(&input, &output);
                    report.converted.push(ConvertedFile { input, output });
                }
                Err(e) => {
                    error!("Could not convert {}: {}", input.display(), e);
                    self.progress.on_file_error(&input, &e.to_string());
                    report.failed.push(FailedFile {
                        input,
                        output,
                        error: e.to_string(),
                    });
                }
            }
        }
        self.progress
            .on_batch_complete(report.converted.len(), report.failed.len());
        report
    }

    async fn prepare_output_dir(&self) -> Result<(), OfficeError> {
        let Some(dir) = &self.output_dir else {
            return Ok(());
        };
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => {
                if meta.permissions().readonly() {
                    return Err(OfficeError::Configuration(format!(
                        "Output directory '{}' cannot be written to",
                        dir.display()
                    )));
                }
                Ok(())
            }
            Ok(_) => Err(OfficeError::Configuration(format!(
                "Output directory '{}' already exists as a file",
                dir.display()
            ))),
            Err(_) => tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| OfficeError::SpecsIo {
                    path: dir.clone(),
                    source: e,
                }),
        }
    }

    /// Relative outputs go to the output directory, else next to the input.
    fn place_output(&self, input: &Path, output: &Path) -> PathBuf {
        if output.is_absolute() {
            return output.to_path_buf();
        }
        match &self.output_dir {
            Some(dir) => dir.join(output),
            None if output.parent().is_some_and(|p| !p.as_os_str().is_empty()) => {
                output.to_path_buf()
            }
            None => input
                .parent()
                .map(|p| p.join(output))
                .unwrap_or_else(|| output.to_path_buf()),
        }
    }

    async fn expand_inputs(&self, inputs: &[PathBuf], report: &mut BatchReport) -> Vec<PathBuf> {
        let mut expanded = Vec::new();
        for input in inputs {
            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !name.contains(['*', '?']) {
                expanded.push(input.clone());
                continue;
            }

            let dir = match input.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let matches = match list_matching(&dir, &name).await {
                Ok(matches) => matches,
                Err(_) => Vec::new(),
            };
            if matches.is_empty() {
                report.skip(
                    &self.progress,
                    input,
                    format!(
                        "Skipping filename '{}' since it doesn't match an existing file",
                        input.display()
                    ),
                );
            }
            expanded.extend(matches);
        }
        expanded
    }

    async fn validate_input(&self, input: &Path, report: &mut BatchReport) -> bool {
        let reason = match tokio::fs::metadata(input).await {
            Err(_) => Some(format!(
                "Skipping file '{}' that does not exist",
                input.display()
            )),
            Ok(meta) if meta.is_dir() => Some(format!(
                "Skipping file '{}' that exists but is a directory",
                input.display()
            )),
            Ok(_) => match tokio::fs::File::open(input).await {
                Ok(_) => None,
                Err(e) => Some(format!(
                    "Skipping file '{}' that cannot be read: {e}",
                    input.display()
                )),
            },
        };
        match reason {
            Some(reason) => {
                report.skip(&self.progress, input, reason);
                false
            }
            None => true,
        }
    }

    async fn validate_output(&self, input: &Path, output: &Path, report: &mut BatchReport) -> bool {
        let meta = match tokio::fs::metadata(output).await {
            Ok(meta) => meta,
            Err(_) => return true,
        };
        let reason = if meta.is_dir() {
            format!(
                "Skipping file '{}' because the output file '{}' already exists and is a directory",
                input.display(),
                output.display()
            )
        } else if !self.overwrite {
            format!(
                "Skipping file '{}' because the output file '{}' already exists and the overwrite switch is off",
                input.display(),
                output.display()
            )
        } else {
            match tokio::fs::remove_file(output).await {
                Ok(()) => return true,
                Err(e) => format!(
                    "Skipping file '{}' because the output file '{}' already exists and cannot be deleted: {e}",
                    input.display(),
                    output.display()
                ),
            }
        };
        report.skip(&self.progress, input, reason);
        false
    }
}

/// Files of `dir` whose name matches the `*`/`?` pattern, sorted.
async fn list_matching(dir: &Path, pattern: &str) -> std::io::Result<Vec<PathBuf>> {
    let regex = wildcard_regex(pattern)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if regex.is_match(&name.to_string_lossy()) && entry.file_type().await?.is_file() {
            matches.push(entry.path());
        }
    }
    matches.sort();
    Ok(matches)
}

fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re)
}

/// `<stem>.<extension>`, or `None` for a path without a file name.
fn output_name(input: &Path, extension: &str) -> Option<PathBuf> {
    let mut name = input.file_stem()?.to_os_string();
    name.push(".");
    name.push(extension);
    Some(PathBuf::from(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_match_file_names() {
        let re = wildcard_regex("report-??.d*x").unwrap();
        assert!(re.is_match("report-01.docx"));
        assert!(!re.is_match("report-1.docx"));
        assert!(!re.is_match("xreport-01.docx"));
        assert!(wildcard_regex("a+b(1).*").unwrap().is_match("a+b(1).odt"));
    }

    #[test]
    fn output_name_replaces_the_extension() {
        assert_eq!(
            output_name(Path::new("docs/q3.report.docx"), "pdf"),
            Some(PathBuf::from("q3.report.pdf"))
        );
        assert_eq!(output_name(Path::new("docs/.."), "pdf"), None);
        assert_eq!(output_name(Path::new("/"), "pdf"), None);
    }

    #[test]
    fn report_success_ignores_skips() {
        let mut report = BatchReport::default();
        report.skipped.push(SkippedFile {
            input: "dir".into(),
            reason: "directory".into(),
        });
        assert!(report.is_success());
        report.failed.push(FailedFile {
            input: "a".into(),
            output: "b".into(),
            error: "boom".into(),
        });
        assert!(!report.is_success());
    }
}
