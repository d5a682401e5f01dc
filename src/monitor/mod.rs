// Certificate Directory Monitoring
//
// This module keeps the exported certificate facts in step with the filesystem:
// - Watches every configured directory tree for changes
// - Coalesces change bursts into single rescan requests
// - Scans directories with a bounded worker pool, skipping unchanged files
// - Backs off directories that keep failing
// - Supports graceful shutdown and hot-reload of the configuration

pub mod backoff;
pub mod daemon;
pub mod reload;
pub mod scanner;
pub mod watcher;

// Re-export commonly used types
pub use backoff::BackoffTracker;
pub use daemon::MonitorDaemon;
pub use reload::{ReloadCoordinator, ReloadReceiver, reload_channel};
pub use scanner::{CertScanner, DirectoryReport, PassOutcome};
pub use watcher::DirectoryWatcher;
