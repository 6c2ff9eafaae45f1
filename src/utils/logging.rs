//! Tracing setup shared by every meshpub role.

use crate::config::LogSettings;

/// Installs the global tracing subscriber for this process, honoring the
/// `log.level` setting.
///
/// Repeated calls keep the first subscriber, so test binaries that stand up
/// several nodes in one process do not panic on re-initialization.
pub fn init(log: &LogSettings) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(log.max_level())
        .with_target(false)
        .try_init();
}
