pub mod comparator;
pub mod engine;
pub mod fingerprint;
pub mod report;
pub mod scanner;
pub mod uploader;

#[cfg(test)]
pub(crate) mod testing;

pub use comparator::{decide, SyncDecision};
pub use engine::{FileError, FileOutcome, FileStage, SyncConfig, SyncEngine, SyncError, SyncEvent};
pub use fingerprint::{fingerprint, fingerprint_file, Fingerprinted};
pub use report::{format_bytes, FailureRecord, SyncRunSummary};
pub use scanner::{FileScanner, LocalFileRecord, ScanConfig, ScanError, ScanIssue};
pub use uploader::{content_type_for, remote_key, ObjectUploader};
