//! Batch conversion: input validation, output naming and skip rules.

mod common;

use common::{pool_config, FakeWorker, Script};
use officeconv::{
    BatchConverter, BatchProgressCallback, Converter, OfficeError, OfficeManager, OfficePool,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Setup {
    dir: tempfile::TempDir,
    script: Arc<Script>,
    pool: Arc<OfficePool>,
}

impl Setup {
    async fn new(workers: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let script = Script::new();
        let pool = Arc::new(
            OfficePool::new(
                (0..workers)
                    .map(|i| FakeWorker::boxed(&format!("fake-{i}"), script.clone(), &work))
                    .collect(),
                &pool_config(&work),
            )
            .unwrap(),
        );
        pool.start().await.unwrap();
        Self { dir, script, pool }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn file(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"PK fake").unwrap();
        path
    }

    fn batch(&self) -> BatchConverter {
        BatchConverter::new(Arc::new(Converter::new(self.pool.clone())))
    }

    fn loads(&self) -> u32 {
        Script::count(&self.script.loads)
    }
}

#[derive(Default)]
struct Events {
    total: AtomicUsize,
    skipped: AtomicUsize,
    completed: AtomicUsize,
}

impl BatchProgressCallback for Events {
    fn on_batch_start(&self, total_files: usize) {
        self.total.store(total_files, Ordering::SeqCst);
    }

    fn on_file_skipped(&self, _input: &Path, _reason: &str) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn on_file_complete(&self, _input: &Path, _output: &Path) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn directory_input_is_skipped_and_the_rest_converts() {
    let s = Setup::new(2).await;
    let a = s.file("a.docx");
    let b = s.file("b.odt");
    let folder = s.path("folder.docx");
    std::fs::create_dir_all(&folder).unwrap();
    let events = Arc::new(Events::default());

    let report = s
        .batch()
        .progress_callback(events.clone())
        .convert_to_format(&[a.clone(), folder.clone(), b.clone()], "pdf")
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.converted.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].input, folder);
    assert!(report.skipped[0].reason.contains("is a directory"));
    assert!(s.path("a.pdf").is_file());
    assert!(s.path("b.pdf").is_file());
    assert_eq!(s.loads(), 2);

    assert_eq!(events.total.load(Ordering::SeqCst), 2);
    assert_eq!(events.skipped.load(Ordering::SeqCst), 1);
    assert_eq!(events.completed.load(Ordering::SeqCst), 2);
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn existing_target_is_not_dispatched_without_overwrite() {
    let s = Setup::new(1).await;
    let input = s.file("report.docx");
    let existing = s.path("report.pdf");
    std::fs::write(&existing, b"keep me").unwrap();

    let report = s
        .batch()
        .convert_to_format(&[input.clone()], "pdf")
        .await
        .unwrap();

    assert!(report.converted.is_empty());
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("overwrite switch is off"));
    assert_eq!(s.loads(), 0);
    assert_eq!(std::fs::read(&existing).unwrap(), b"keep me");

    let report = s
        .batch()
        .overwrite(true)
        .convert_to_format(&[input], "pdf")
        .await
        .unwrap();
    assert_eq!(report.converted.len(), 1);
    assert_eq!(s.loads(), 1);
    assert_ne!(std::fs::read(&existing).unwrap(), b"keep me");
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn output_that_is_a_directory_is_skipped_even_with_overwrite() {
    let s = Setup::new(1).await;
    let input = s.file("slides.odp");
    std::fs::create_dir_all(s.path("slides.pdf")).unwrap();

    let report = s
        .batch()
        .overwrite(true)
        .convert_to_format(&[input], "pdf")
        .await
        .unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].reason.contains("is a directory"));
    assert_eq!(s.loads(), 0);
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn mismatched_input_and_output_counts_fail_before_dispatch() {
    let s = Setup::new(1).await;
    let inputs = vec![s.file("a.docx"), s.file("b.docx")];
    let outputs = vec![s.path("a.pdf"), s.path("b.pdf"), s.path("c.pdf")];

    let err = s
        .batch()
        .convert_to_files(&inputs, &outputs)
        .await
        .unwrap_err();

    assert!(matches!(err, OfficeError::Configuration(_)));
    assert_eq!(s.loads(), 0);
    assert!(!s.path("a.pdf").exists());
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn explicit_outputs_land_in_the_output_dir() {
    let s = Setup::new(2).await;
    let inputs = vec![s.file("a.docx"), s.file("b.docx")];
    let outputs = vec![PathBuf::from("first.pdf"), PathBuf::from("second.odt")];
    let out_dir = s.path("converted/nested");

    let report = s
        .batch()
        .output_dir(&out_dir)
        .convert_to_files(&inputs, &outputs)
        .await
        .unwrap();

    assert_eq!(report.converted.len(), 2);
    assert!(out_dir.join("first.pdf").is_file());
    assert!(out_dir.join("second.odt").is_file());
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn missing_inputs_are_skipped() {
    let s = Setup::new(1).await;
    let present = s.file("present.docx");
    let missing = s.path("missing.docx");

    let report = s
        .batch()
        .convert_to_format(&[missing.clone(), present], "pdf")
        .await
        .unwrap();

    assert_eq!(report.converted.len(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].input, missing);
    assert!(report.skipped[0].reason.contains("does not exist"));
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn wildcards_expand_to_matching_files() {
    let s = Setup::new(2).await;
    s.file("docs/one.docx");
    s.file("docs/two.docx");
    s.file("docs/notes.txt");
    std::fs::create_dir_all(s.path("docs/sub.docx")).unwrap();
    let out_dir = s.path("out");

    let report = s
        .batch()
        .output_dir(&out_dir)
        .convert_to_format(&[s.path("docs/*.docx"), s.path("nowhere/*.doc")], "odt")
        .await
        .unwrap();

    let mut converted: Vec<_> = report
        .converted
        .iter()
        .map(|c| c.output.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    converted.sort();
    assert_eq!(converted, vec!["one.odt", "two.odt"]);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0]
        .reason
        .contains("doesn't match an existing file"));
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn output_dir_that_is_a_file_is_rejected() {
    let s = Setup::new(1).await;
    let input = s.file("a.docx");
    let not_a_dir = s.file("out");

    let err = s
        .batch()
        .output_dir(not_a_dir)
        .convert_to_format(&[input], "pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, OfficeError::Configuration(_)));
    assert_eq!(s.loads(), 0);
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_output_format_is_rejected() {
    let s = Setup::new(1).await;
    let err = s
        .batch()
        .convert_to_format(&[s.file("a.docx")], "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, OfficeError::Configuration(_)));
    s.pool.stop().await.unwrap();
}

#[tokio::test]
async fn failed_conversions_are_reported_not_raised() {
    let s = Setup::new(1).await;
    let input = s.file("letter.docx");

    // The fake engine only produces text documents; xlsx needs a spreadsheet.
    let report = s
        .batch()
        .convert_to_format(&[input], "xlsx")
        .await
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].error.contains("Unsupported conversion"));
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["failed"][0]["input"], input_str(&s.path("letter.docx")));
    s.pool.stop().await.unwrap();
}

fn input_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
