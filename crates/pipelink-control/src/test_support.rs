use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pipelink_endpoint::EndpointConfig;
use pipelink_transport::PipeNamespace;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Config with a private namespace under /tmp and near-zero delays.
pub(crate) fn quick_config(tag: &str) -> EndpointConfig {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = PathBuf::from(format!("/tmp/plc-{tag}-{}-{n}", std::process::id()));
    EndpointConfig::default()
        .with_namespace(PipeNamespace::with_root(root))
        .with_settle_delays(Duration::from_millis(1))
        .with_accept_poll_interval(Duration::from_millis(2))
}
