pub mod comparator;
pub mod engine;
pub mod fingerprint;
pub mod manifest;
pub mod mime;
pub mod scanner;
pub mod transfer;

pub use comparator::{download_delta, upload_delta, DeltaSummary, LocalState};
pub use engine::{AssetStatus, RunPhase, SyncContext, SyncEngine, SyncMode, SyncPlan, SyncReport};
pub use fingerprint::{checksum, checksum_file, fingerprint_all, ChecksumAlgorithm};
pub use manifest::SyncManifest;
pub use scanner::{FileScanner, ScanConfig};
pub use transfer::{TransferDirection, TransferExecutor, TransferOutcome, TransferTask};
