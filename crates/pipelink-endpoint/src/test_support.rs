use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pipelink_transport::PipeNamespace;

use crate::config::EndpointConfig;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique, short namespace root under /tmp. Socket paths have tight length
/// limits, so the system temp dir is avoided.
fn unique_root(tag: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    PathBuf::from(format!("/tmp/pl-{tag}-{}-{n}", std::process::id()))
}

pub(crate) fn unique_name(tag: &str) -> String {
    format!("{tag}-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Config with a private namespace and near-zero delays.
pub(crate) fn quick_config(tag: &str) -> EndpointConfig {
    EndpointConfig::default()
        .with_namespace(PipeNamespace::with_root(unique_root(tag)))
        .with_settle_delays(Duration::from_millis(1))
        .with_accept_poll_interval(Duration::from_millis(2))
}
