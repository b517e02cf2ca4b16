//! Source and target sides of a conversion.
//!
//! The office engine only reads and writes files. A [`SourceSpec`] turns
//! whatever the caller holds into a file the engine can load, and a
//! [`TargetSpec`] provides the file the engine stores into, then delivers it.
//!
//! ## Lifecycle
//!
//! ```text
//! source.resolve() ─┐                           ┌─ target.on_complete(file)
//!                   ├─▶ load ─▶ filters ─▶ store ┤        or
//! target.resolve() ─┘                           └─ target.on_failure(file, err)
//!                                 always ──▶ source.release()
//! ```
//!
//! The conversion task guarantees `release` and exactly one of
//! `on_complete` / `on_failure` per job, on every path, including when the
//! pool entry's watchdog abandons a hung worker.
//!
//! ## Streams
//!
//! A stream source is copied into a temp file on the first `resolve()`; later
//! calls return the same file. The reader is owned by the spec and dropped on
//! `release()`. Callers that need to keep using their stream hand over a
//! second handle to it (e.g. `File::try_clone`).
//!
//! A stream target stores into a temp file. On success the bytes are copied
//! into the writer; on failure nothing is copied. The temp file is deleted in
//! both cases, even when the copy itself fails.

use crate::error::OfficeError;
use crate::format::DocumentFormat;
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Boxed reader accepted by [`SourceDocument::from_reader`].
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed writer accepted by [`TargetDocument::to_writer`].
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Input side of a conversion.
#[async_trait]
pub trait SourceSpec: Send {
    fn format(&self) -> Option<&DocumentFormat>;

    fn set_format(&mut self, format: DocumentFormat);

    /// Path whose extension identifies the format, when there is one.
    fn path_hint(&self) -> Option<&Path> {
        None
    }

    /// Returns a file the engine can load; creates it at most once.
    /// Temp files go into `working_dir`.
    async fn resolve(&mut self, working_dir: &Path) -> Result<PathBuf, OfficeError>;

    /// Called exactly once after the job, whatever its outcome, including
    /// when `resolve` failed or was never reached.
    async fn release(&mut self) -> Result<(), OfficeError>;
}

/// Output side of a conversion.
#[async_trait]
pub trait TargetSpec: Send {
    fn format(&self) -> Option<&DocumentFormat>;

    fn set_format(&mut self, format: DocumentFormat);

    fn path_hint(&self) -> Option<&Path> {
        None
    }

    /// Returns the file the engine stores into. Temp files go into
    /// `working_dir`.
    async fn resolve(&mut self, working_dir: &Path) -> Result<PathBuf, OfficeError>;

    /// Called after a successful store.
    async fn on_complete(&mut self, file: &Path) -> Result<(), OfficeError>;

    /// Called instead of [`TargetSpec::on_complete`] when the job failed
    /// after this target was resolved.
    async fn on_failure(&mut self, file: &Path, error: &OfficeError);
}

fn specs_io(path: &Path, source: std::io::Error) -> OfficeError {
    OfficeError::SpecsIo {
        path: path.to_path_buf(),
        source,
    }
}

fn temp_path_in(working_dir: &Path, format: Option<&DocumentFormat>) -> Result<TempPath, OfficeError> {
    let suffix = format.map(|f| format!(".{}", f.extension())).unwrap_or_default();
    tempfile::Builder::new()
        .prefix("officeconv_")
        .suffix(&suffix)
        .tempfile_in(working_dir)
        .map(|f| f.into_temp_path())
        .map_err(|e| specs_io(working_dir, e))
}

// ── Source ───────────────────────────────────────────────────────────────

enum SourceInput {
    File(PathBuf),
    Stream {
        reader: Option<BoxReader>,
        temp: Option<TempPath>,
    },
}

/// Built-in [`SourceSpec`]: an existing file (never deleted) or a reader.
pub struct SourceDocument {
    input: SourceInput,
    format: Option<DocumentFormat>,
}

impl SourceDocument {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            input: SourceInput::File(path.into()),
            format: None,
        }
    }

    /// A reader; its format cannot be inferred, so set one with
    /// [`SourceDocument::with_format`] for format-specific load options.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            input: SourceInput::Stream {
                reader: Some(Box::new(reader)),
                temp: None,
            },
            format: None,
        }
    }

    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = Some(format);
        self
    }

    async fn materialize(
        reader: &mut BoxReader,
        working_dir: &Path,
        format: Option<&DocumentFormat>,
    ) -> Result<TempPath, OfficeError> {
        let temp = temp_path_in(working_dir, format)?;
        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| specs_io(&temp, e))?;
        // On error `temp` is dropped here, deleting the partial file.
        tokio::io::copy(reader, &mut file)
            .await
            .map_err(|e| specs_io(&temp, e))?;
        file.flush().await.map_err(|e| specs_io(&temp, e))?;
        debug!("Materialised source stream into {}", temp.display());
        Ok(temp)
    }
}

impl From<PathBuf> for SourceDocument {
    fn from(path: PathBuf) -> Self {
        Self::from_file(path)
    }
}

impl From<&Path> for SourceDocument {
    fn from(path: &Path) -> Self {
        Self::from_file(path)
    }
}

impl From<&str> for SourceDocument {
    fn from(path: &str) -> Self {
        Self::from_file(path)
    }
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let input = match &self.input {
            SourceInput::File(p) => format!("file {}", p.display()),
            SourceInput::Stream { temp: Some(t), .. } => format!("stream via {}", t.display()),
            SourceInput::Stream { .. } => "stream".to_string(),
        };
        f.debug_struct("SourceDocument")
            .field("input", &input)
            .field("format", &self.format.as_ref().map(|x| x.extension()))
            .finish()
    }
}

#[async_trait]
impl SourceSpec for SourceDocument {
    fn format(&self) -> Option<&DocumentFormat> {
        self.format.as_ref()
    }

    fn set_format(&mut self, format: DocumentFormat) {
        self.format = Some(format);
    }

    fn path_hint(&self) -> Option<&Path> {
        match &self.input {
            SourceInput::File(p) => Some(p),
            SourceInput::Stream { .. } => None,
        }
    }

    async fn resolve(&mut self, working_dir: &Path) -> Result<PathBuf, OfficeError> {
        match &mut self.input {
            SourceInput::File(p) => Ok(p.clone()),
            SourceInput::Stream {
                temp: Some(temp), ..
            } => Ok(temp.to_path_buf()),
            SourceInput::Stream { reader, temp } => {
                let mut r = reader.take().ok_or_else(|| {
                    specs_io(
                        working_dir,
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "source stream was already consumed",
                        ),
                    )
                })?;
                let path = Self::materialize(&mut r, working_dir, self.format.as_ref()).await?;
                let resolved = path.to_path_buf();
                *temp = Some(path);
                *reader = Some(r);
                Ok(resolved)
            }
        }
    }

    async fn release(&mut self) -> Result<(), OfficeError> {
        match &mut self.input {
            SourceInput::File(_) => Ok(()),
            SourceInput::Stream { reader, temp } => {
                reader.take();
                match temp.take() {
                    Some(t) => {
                        let path = t.to_path_buf();
                        t.close().map_err(|e| specs_io(&path, e))
                    }
                    None => Ok(()),
                }
            }
        }
    }
}

// ── Target ───────────────────────────────────────────────────────────────

enum TargetOutput {
    File(PathBuf),
    Stream {
        writer: BoxWriter,
        temp: Option<TempPath>,
    },
}

/// Built-in [`TargetSpec`]: a destination file or a writer.
pub struct TargetDocument {
    output: TargetOutput,
    format: Option<DocumentFormat>,
}

impl TargetDocument {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            output: TargetOutput::File(path.into()),
            format: None,
        }
    }

    /// A writer; the target format must be set with
    /// [`TargetDocument::with_format`] or the job's `as_format`.
    pub fn to_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            output: TargetOutput::Stream {
                writer: Box::new(writer),
                temp: None,
            },
            format: None,
        }
    }

    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = Some(format);
        self
    }
}

impl From<PathBuf> for TargetDocument {
    fn from(path: PathBuf) -> Self {
        Self::to_file(path)
    }
}

impl From<&Path> for TargetDocument {
    fn from(path: &Path) -> Self {
        Self::to_file(path)
    }
}

impl From<&str> for TargetDocument {
    fn from(path: &str) -> Self {
        Self::to_file(path)
    }
}

impl fmt::Debug for TargetDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let output = match &self.output {
            TargetOutput::File(p) => format!("file {}", p.display()),
            TargetOutput::Stream { temp: Some(t), .. } => format!("stream via {}", t.display()),
            TargetOutput::Stream { .. } => "stream".to_string(),
        };
        f.debug_struct("TargetDocument")
            .field("output", &output)
            .field("format", &self.format.as_ref().map(|x| x.extension()))
            .finish()
    }
}

#[async_trait]
impl TargetSpec for TargetDocument {
    fn format(&self) -> Option<&DocumentFormat> {
        self.format.as_ref()
    }

    fn set_format(&mut self, format: DocumentFormat) {
        self.format = Some(format);
    }

    fn path_hint(&self) -> Option<&Path> {
        match &self.output {
            TargetOutput::File(p) => Some(p),
            TargetOutput::Stream { .. } => None,
        }
    }

    async fn resolve(&mut self, working_dir: &Path) -> Result<PathBuf, OfficeError> {
        match &mut self.output {
            TargetOutput::File(p) => {
                if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| specs_io(parent, e))?;
                }
                Ok(p.clone())
            }
            TargetOutput::Stream {
                temp: Some(temp), ..
            } => Ok(temp.to_path_buf()),
            TargetOutput::Stream { temp, .. } => {
                let path = temp_path_in(working_dir, self.format.as_ref())?;
                let resolved = path.to_path_buf();
                *temp = Some(path);
                Ok(resolved)
            }
        }
    }

    async fn on_complete(&mut self, file: &Path) -> Result<(), OfficeError> {
        match &mut self.output {
            TargetOutput::File(_) => {
                debug!("Converted document written to {}", file.display());
                Ok(())
            }
            TargetOutput::Stream { writer, temp } => {
                let copied = async {
                    let mut f = tokio::fs::File::open(file).await?;
                    tokio::io::copy(&mut f, writer).await?;
                    writer.flush().await
                }
                .await
                .map_err(|e| specs_io(file, e));
                let deleted = match temp.take() {
                    Some(t) => t.close().map_err(|e| specs_io(file, e)),
                    None => Ok(()),
                };
                copied?;
                deleted
            }
        }
    }

    async fn on_failure(&mut self, file: &Path, error: &OfficeError) {
        debug!("Conversion into {} failed: {}", file.display(), error);
        match &mut self.output {
            TargetOutput::File(p) => match tokio::fs::remove_file(p.as_path()).await {
                Ok(()) => debug!("Removed partial output {}", p.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove partial output {}: {}", p.display(), e),
            },
            TargetOutput::Stream { temp, .. } => {
                if let Some(t) = temp.take() {
                    let path = t.to_path_buf();
                    if let Err(e) = t.close() {
                        warn!("Could not delete temp file {}: {}", path.display(), e);
                    }
                }
            }
        }
    }
}
