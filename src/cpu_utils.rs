use crate::{log_info_fmt, log_success_fmt, log_warn_fmt};

/// Logs the logical/physical CPU counts and returns the logical one.
pub fn log_cpu_info() -> usize {
    let logical = num_cpus::get();
    let physical = num_cpus::get_physical();
    log_info_fmt!("CPU cores: {} logical, {} physical", logical, physical);
    logical
}

// ================================================================================================
// Thread Affinity
// ================================================================================================

/// Binds the current thread to a specific logical core.
///
/// # Returns
/// `true` on success, `false` on failure.
pub fn bind_thread_to_core(core_id: usize) -> bool {
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(core) = core_ids.into_iter().find(|c| c.id == core_id) {
            return core_affinity::set_for_current(core);
        }
    }
    false
}

/// Pins the test thread so bandwidth numbers do not move with the scheduler.
/// Failure is logged and otherwise ignored.
pub fn pin_test_thread(core_id: usize) -> bool {
    let total = num_cpus::get();
    if core_id >= total {
        log_warn_fmt!("Requested core {} does not exist ({} logical cores), running unpinned", core_id, total);
        return false;
    }
    if bind_thread_to_core(core_id) {
        log_success_fmt!("Test thread bound to CPU core {}", core_id);
        true
    } else {
        log_warn_fmt!("Warning: Failed to bind test thread to CPU core {}, running unpinned", core_id);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_count_is_positive() {
        assert!(log_cpu_info() >= 1);
    }

    #[test]
    fn test_missing_core_is_not_bound() {
        assert!(!pin_test_thread(usize::MAX));
        assert!(!bind_thread_to_core(usize::MAX));
    }
}
