//! Pinning of distributor worker threads.
//!
//! Each distributor drains its dispatch queue on one thread and fans every
//! symbol out to the delivery channels of all subscribers. That loop is the
//! only engine stage every update passes through, so it is the one worth
//! pinning. `distributor_cpu_affinity` in the config lists the cores;
//! distributor `i` gets `cores[i % cores.len()]` via [`core_for_worker`], and
//! its thread calls [`maybe_bind`] before entering the loop. Delivery
//! workers are never pinned: there are `subscribers * D * N` of them.

use tracing::{info, warn};

/// Bind the current thread to the specified CPU core.
///
/// Returns `true` if the binding succeeded, `false` if the core ID is invalid
/// or the OS rejected the request.
pub fn bind_to_core(core_id: usize) -> bool {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    if let Some(core) = core_ids.get(core_id) {
        let ok = core_affinity::set_for_current(*core);
        if ok {
            info!("bound thread to CPU core {core_id}");
        } else {
            warn!("failed to bind thread to CPU core {core_id}");
        }
        ok
    } else {
        warn!(
            "CPU core {core_id} not available (system has {} cores)",
            core_ids.len()
        );
        false
    }
}

/// Bind the current thread to the specified core, if `core_id` is `Some`.
///
/// Does nothing for `None` or a negative core (no affinity configured).
pub fn maybe_bind(core_id: Option<i32>) {
    if let Some(id) = core_id
        && id >= 0 {
            bind_to_core(id as usize);
        }
}

/// Pick the core for worker `worker_idx` from a configured core list.
///
/// Workers are assigned round-robin when there are more workers than cores.
pub fn core_for_worker(cores: Option<&[i32]>, worker_idx: usize) -> Option<i32> {
    match cores {
        Some(list) if !list.is_empty() => Some(list[worker_idx % list.len()]),
        _ => None,
    }
}
