pub mod deleter;
pub mod limiter;
pub mod scanner;
pub mod worker;

pub use deleter::{BatchDeleter, DeleteSummary, WriteBatch};
pub use limiter::{RateLimiter, WaitHook};
pub use scanner::{DeletionCandidate, RecordScanner, ScanOutcome};
pub use worker::{SweepStatistics, SweepWorker, WorkerSettings};
