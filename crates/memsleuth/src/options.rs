//! Runtime options. Field names are the user-facing option names.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Options {
    /// Bound on captured frames; suppression callstacks are truncated to it.
    pub callstack_max_frames: usize,
    /// Non-leak errors rendered before throttling; negative means unlimited.
    pub report_max: i32,
    /// Leaks rendered before throttling; negative means unlimited.
    pub report_leak_max: i32,

    pub count_leaks: bool,
    pub check_leaks: bool,
    pub possible_leaks: bool,
    pub show_reachable: bool,
    /// Skip leaks in allocations made before the application entry point.
    pub ignore_early_leaks: bool,

    pub check_invalid_frees: bool,
    /// Report a warning on `free(NULL)`.
    pub warn_null_ptr: bool,

    pub use_default_suppress: bool,
    pub suppress_file: Option<PathBuf>,

    pub pause_at_unaddressable: bool,
    pub pause_at_uninitialized: bool,

    /// Mirror the exit summary to stderr.
    pub summary: bool,
    /// Per-thread log files instead of a single stream.
    pub thread_logs: bool,

    /// Byte budget of the delayed-free queue.
    pub delay_free_max_bytes: u64,
    /// Frame-pointer jump beyond which the walker assumes a stack switch.
    pub stack_swap_threshold: u32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            callstack_max_frames: 20,
            report_max: 20_000,
            report_leak_max: 10_000,
            count_leaks: true,
            check_leaks: true,
            possible_leaks: true,
            show_reachable: false,
            ignore_early_leaks: true,
            check_invalid_frees: true,
            warn_null_ptr: false,
            use_default_suppress: true,
            suppress_file: None,
            pause_at_unaddressable: false,
            pause_at_uninitialized: false,
            summary: true,
            thread_logs: false,
            delay_free_max_bytes: 2_000_000,
            stack_swap_threshold: 0x9000,
        }
    }
}

impl Options {
    pub fn report_limit(&self) -> Option<u32> {
        u32::try_from(self.report_max).ok()
    }

    pub fn report_leak_limit(&self) -> Option<u32> {
        u32::try_from(self.report_leak_max).ok()
    }
}
