//! Progress-callback trait for batch conversion events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::batch::BatchConverter::progress_callback`] to receive events as
//! the batch dispatches each file.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a log, or a terminal progress bar without
//! the library knowing how the host application communicates. The trait is
//! `Send + Sync` because files of one batch convert concurrently.
//!
//! # Example
//!
//! ```rust
//! use officeconv::BatchProgressCallback;
//! use std::path::Path;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingCallback {
//!     converted: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, input: &Path, output: &Path) {
//!         self.converted.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} -> {}", input.display(), output.display());
//!     }
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

/// Called by the batch layer as it processes each file.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// `on_file_start`, `on_file_complete` and `on_file_error` may be called
/// concurrently for different files. Implementations must protect shared
/// mutable state (e.g. `Mutex`, `AtomicUsize`).
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after validation, with the number of files to convert.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called for every input left out of the batch.
    fn on_file_skipped(&self, input: &Path, reason: &str) {
        let _ = (input, reason);
    }

    /// Called just before a file is handed to the pool.
    fn on_file_start(&self, input: &Path) {
        let _ = input;
    }

    fn on_file_complete(&self, input: &Path, output: &Path) {
        let _ = (input, output);
    }

    /// Called when a conversion fails.
    fn on_file_error(&self, input: &Path, error: &str) {
        let _ = (input, error);
    }

    /// Called once after every file has been attempted.
    fn on_batch_complete(&self, converted: usize, failed: usize) {
        let _ = (converted, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias for the type stored by the batch converter.
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
