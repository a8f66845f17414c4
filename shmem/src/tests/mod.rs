use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

mod race_tests;

/// Segment name unique to this process and call.
pub(crate) fn unique_name(prefix: &str) -> String {
    static SHMEM_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!(
        "/oracle_test_{}_{}_{}",
        prefix,
        process::id(),
        SHMEM_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}
