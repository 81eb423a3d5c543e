//! Process-wide tool state.
//!
//! One [`Tool`] value owns every subsystem: options, shadow map, module
//! table, callstack pool, heap map, syscall registry and the reporter. There
//! are no hidden statics; the embedder creates the value at init, hands out
//! per-thread contexts, and drives the instrumentation callbacks below.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::callstack::{CallstackPool, Location, ModuleTable, StackWalker, SymbolSource};
use crate::heap::{ChunkFlags, FreeOutcome, HeapMap};
use crate::options::Options;
use crate::report::suppress::{SuppressError, SuppressionSet};
use crate::report::{ErrorKind, Output, Reporter};
use crate::shadow::{ShadowMap, ShadowState};
use crate::syscall::SyscallRegistry;
use crate::syscall::args::SyscallDesc;
use crate::target::{Addr, Register, RegisterFile, TargetMemory};
use crate::thread::ThreadCtx;

/// Suppressions shipped with the tool for known-benign loader and runtime
/// startup noise.
pub const DEFAULT_SUPPRESSIONS: &str = "\
# defaults shipped with the tool
UNINITIALIZED READ
ntdll.dll!Ldr*

UNINITIALIZED READ
ntdll.dll!Rtl*CriticalSection*

LEAK
ntdll.dll!Csr*
";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Suppress(#[from] SuppressError),
}

/// How a load's value is consumed, for uninitialized-read policy: a `Value`
/// read uses the bytes and must find them defined; a `Move` only copies them
/// toward a write-only downstream and propagates their shadow instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Value,
    Move,
}

/// Source of a store, for definedness propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSource {
    Immediate,
    Reg(Register),
}

pub struct Tool {
    pub options: Options,
    pub shadow: ShadowMap,
    pub modules: ModuleTable,
    pub stacks: CallstackPool,
    pub heap: HeapMap,
    pub(crate) syscalls: SyscallRegistry,
    pub(crate) walker: StackWalker,
    pub(crate) reporter: Reporter,
    symbols: Option<Box<dyn SymbolSource + Send + Sync>>,
    pause_hook: Option<Box<dyn Fn(ErrorKind) + Send + Sync>>,
    start: Mutex<Instant>,
    next_thread_id: AtomicU32,
    app_started: AtomicBool,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("options", &self.options)
            .field("shadow", &self.shadow)
            .finish_non_exhaustive()
    }
}

impl Tool {
    pub fn new(options: Options, output: Output) -> Result<Self, ToolError> {
        let mut suppressions = SuppressionSet::new();
        if options.use_default_suppress {
            suppressions.load_str(DEFAULT_SUPPRESSIONS, options.callstack_max_frames)?;
        }
        if let Some(path) = &options.suppress_file {
            let count = suppressions.load_file(path, options.callstack_max_frames)?;
            info!(count, file = %path.display(), "recorded suppressions");
        }
        let walker = StackWalker {
            max_frames: options.callstack_max_frames,
            swap_threshold: options.stack_swap_threshold,
            scan_limit: 4096,
        };
        Ok(Tool {
            shadow: ShadowMap::new(),
            modules: ModuleTable::new(),
            stacks: CallstackPool::new(),
            heap: HeapMap::new(options.delay_free_max_bytes),
            syscalls: SyscallRegistry::standard(),
            walker,
            reporter: Reporter::new(output, suppressions),
            symbols: None,
            pause_hook: None,
            start: Mutex::new(Instant::now()),
            next_thread_id: AtomicU32::new(0),
            app_started: AtomicBool::new(false),
            options,
        })
    }

    /// Replaces the descriptor tables (tests and embedders with their own
    /// kernel interface).
    pub fn with_syscalls(mut self, descs: &'static [SyscallDesc]) -> Self {
        self.syscalls = SyscallRegistry::new(descs);
        self
    }

    pub fn with_symbols(mut self, symbols: Box<dyn SymbolSource + Send + Sync>) -> Self {
        self.symbols = Some(symbols);
        self
    }

    /// Hook invoked when a `pause_at_*` option fires on a reported error.
    pub fn with_pause_hook(mut self, hook: Box<dyn Fn(ErrorKind) + Send + Sync>) -> Self {
        self.pause_hook = Some(hook);
        self
    }

    pub fn syscall_number(&self, name: &str) -> Option<u32> {
        self.syscalls.number_of(name)
    }

    pub(crate) fn symbols(&self) -> Option<&dyn SymbolSource> {
        self.symbols.as_ref().map(|s| s.as_ref() as &dyn SymbolSource)
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.lock().unwrap().elapsed()
    }

    pub(crate) fn reset_start_time(&self) {
        *self.start.lock().unwrap() = Instant::now();
    }

    pub(crate) fn maybe_pause(&self, kind: ErrorKind) {
        let wanted = match kind {
            ErrorKind::UnaddressableAccess => self.options.pause_at_unaddressable,
            ErrorKind::UninitializedRead => self.options.pause_at_uninitialized,
            _ => false,
        };
        if wanted {
            if let Some(hook) = &self.pause_hook {
                hook(kind);
            }
        }
    }

    pub fn thread_init(&self) -> ThreadCtx {
        ThreadCtx::new(self.next_thread_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// The instrumentation engine reached the application entry point;
    /// allocations before this are flagged as pre-existing.
    pub fn on_app_start(&self) {
        self.app_started.store(true, Ordering::Release);
    }

    pub fn on_module_load(&self, base: Addr, size: u64, name: &str) {
        debug!(name, base = format_args!("{base:#x}"), size, "module loaded");
        self.modules.register(base, size, name);
    }

    /// Instrumented load of `sz` bytes at `addr`.
    pub fn on_load(
        &self,
        tcx: &mut ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        addr: Addr,
        sz: u64,
        dest: Option<Register>,
        mode: LoadMode,
    ) {
        let loc = Location::Pc(regs.eip);
        // Per-byte states before any restamping, for propagation.
        let states: [ShadowState; 4] =
            std::array::from_fn(|i| self.shadow.get(addr + i as u64));
        let status = self.shadow.range_status(addr, sz);
        match status {
            ShadowState::Unaddressable => {
                self.report_unaddressable(tcx, mem, regs, loc, addr, sz, false, None);
            }
            ShadowState::Undefined if mode == LoadMode::Value => {
                self.report_uninit(tcx, mem, regs, loc, addr, sz, None);
                for (start, len, state) in self.shadow.get_range(addr, sz) {
                    if state == ShadowState::Undefined {
                        self.shadow.set_range(start, len, ShadowState::UninitRead);
                    }
                }
            }
            _ => {}
        }
        if let Some(reg) = dest {
            tcx.regs_shadow.load_into(reg, &states[..sz.min(4) as usize]);
        }
    }

    /// Instrumented store of `sz` bytes at `addr`.
    pub fn on_store(
        &self,
        tcx: &mut ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        addr: Addr,
        sz: u64,
        src: StoreSource,
    ) {
        let loc = Location::Pc(regs.eip);
        if self
            .shadow
            .get_range(addr, sz)
            .any(|(_, _, s)| s == ShadowState::Unaddressable)
        {
            self.report_unaddressable(tcx, mem, regs, loc, addr, sz, true, None);
        }
        match src {
            StoreSource::Immediate => self.shadow.set_range(addr, sz, ShadowState::Defined),
            StoreSource::Reg(reg) => {
                // A tainted register taints the destination bytes.
                let states = tcx.regs_shadow.store_states(reg, sz.min(4) as usize);
                for i in 0..sz {
                    let state = states.get(i as usize).copied().unwrap_or(ShadowState::Defined);
                    self.shadow.set(addr + i, state);
                }
            }
        }
    }

    /// Register-to-register arithmetic: destination and condition flags take
    /// the sources' shadow.
    pub fn on_binop(&self, tcx: &mut ThreadCtx, dst: Register, a: Register, b: Register) {
        tcx.regs_shadow.propagate_binop(dst, a, b);
    }

    /// An immediate or other fully-defined value materialized into `reg`.
    pub fn on_reg_set(&self, tcx: &mut ThreadCtx, reg: Register) {
        tcx.regs_shadow.set_all(reg, ShadowState::Defined);
    }

    /// A register's value is consumed where it must be defined (indirect
    /// branch, address computation).
    pub fn on_reg_use(
        &self,
        tcx: &mut ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        reg: Register,
    ) {
        if tcx.regs_shadow.status(reg, 4) == ShadowState::Undefined {
            self.report_uninit_register(tcx, mem, regs, Location::Pc(regs.eip), reg.name());
            tcx.regs_shadow.set_all(reg, ShadowState::UninitRead);
        }
    }

    /// A conditional consumes the flags.
    pub fn on_flags_use(&self, tcx: &mut ThreadCtx, mem: &dyn TargetMemory, regs: &RegisterFile) {
        if tcx.regs_shadow.flags_status() == ShadowState::Undefined {
            self.report_uninit_register(tcx, mem, regs, Location::Pc(regs.eip), "eflags");
            tcx.regs_shadow.set_flags(ShadowState::UninitRead);
        }
    }

    /// Heap wrapper callback: a fresh allocation is addressable but holds
    /// leftover allocator bytes.
    pub fn on_alloc(
        &self,
        _tcx: &mut ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        base: Addr,
        size: u64,
    ) {
        let stack = self
            .walker
            .capture(mem, &self.modules, &self.stacks, regs, Location::Pc(regs.eip));
        self.shadow.set_range(base, size, ShadowState::Undefined);
        let flags = if self.app_started.load(Ordering::Acquire) {
            ChunkFlags::empty()
        } else {
            ChunkFlags::PRE_US
        };
        self.heap.insert_live(base, size, flags, Some(stack));
    }

    /// Heap wrapper callback for `free`.
    pub fn on_free(
        &self,
        tcx: &mut ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        base: Addr,
    ) {
        let loc = Location::Pc(regs.eip);
        if base == 0 {
            if self.options.warn_null_ptr {
                self.report_warning(tcx, mem, regs, loc, "freeing NULL pointer");
            }
            return;
        }
        match self.heap.begin_free(base) {
            FreeOutcome::NotLive => {
                if self.options.check_invalid_frees {
                    self.report_invalid_heap_arg(tcx, mem, regs, loc, "free", base);
                }
            }
            FreeOutcome::Freed { start, end, evicted } => {
                // Stays unaddressable while on the delay queue, catching
                // use-after-free over a bounded window.
                self.shadow
                    .set_range(start, end - start, ShadowState::Unaddressable);
                for chunk in evicted {
                    if let Some(stack) = chunk.alloc_stack {
                        self.stacks.release(stack);
                    }
                }
            }
        }
    }

    /// Heap wrapper callback for `realloc`.
    pub fn on_realloc(
        &self,
        tcx: &mut ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        old_base: Addr,
        new_base: Addr,
        new_size: u64,
    ) {
        if old_base == 0 {
            self.on_alloc(tcx, mem, regs, new_base, new_size);
            return;
        }
        if new_base == 0 {
            self.on_free(tcx, mem, regs, old_base);
            return;
        }
        let Some(old) = self.heap.remove_live(old_base) else {
            if self.options.check_invalid_frees {
                self.report_invalid_heap_arg(
                    tcx,
                    mem,
                    regs,
                    Location::Pc(regs.eip),
                    "realloc",
                    old_base,
                );
            }
            return;
        };
        let old_size = old.size();
        if new_base == old_base {
            if new_size > old_size {
                self.shadow
                    .set_range(old_base + old_size, new_size - old_size, ShadowState::Undefined);
            } else {
                self.shadow
                    .set_range(old_base + new_size, old_size - new_size, ShadowState::Unaddressable);
            }
        } else {
            // Defined prefixes survive the move.
            self.shadow.set_range(new_base, new_size, ShadowState::Undefined);
            self.shadow.copy(old_base, new_base, old_size.min(new_size));
            self.shadow
                .set_range(old_base, old_size, ShadowState::Unaddressable);
        }
        if let Some(stack) = old.alloc_stack {
            self.stacks.release(stack);
        }
        let stack = self
            .walker
            .capture(mem, &self.modules, &self.stacks, regs, Location::Pc(regs.eip));
        self.heap
            .insert_live(new_base, new_size, old.flags, Some(stack));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SharedBuf;
    use crate::target::PagedMemory;

    pub(crate) struct Fixture {
        pub tool: Tool,
        pub tcx: ThreadCtx,
        pub mem: PagedMemory,
        pub results: SharedBuf,
        pub log: SharedBuf,
        pub suggested: SharedBuf,
    }

    pub(crate) fn fixture(options: Options) -> Fixture {
        let (output, results, log, suggested) = Output::buffered();
        let tool = Tool::new(options, output).unwrap();
        tool.on_module_load(0x0040_0000, 0x1_0000, "app.exe");
        let tcx = tool.thread_init();
        Fixture {
            tcx,
            mem: PagedMemory::new(),
            results,
            log,
            suggested,
            tool,
        }
    }

    fn regs_at(pc: u32) -> RegisterFile {
        RegisterFile::at_pc(pc)
    }

    #[test]
    fn unaddressable_write_names_the_neighbor_chunk() {
        let mut fx = fixture(Options::default());
        let regs = regs_at(0x0040_0100);
        fx.tool.on_alloc(&mut fx.tcx, &fx.mem, &regs, 0x1000, 16);
        fx.tool
            .on_store(&mut fx.tcx, &fx.mem, &regs, 0x1010, 1, StoreSource::Immediate);
        let results = fx.results.contents();
        assert!(
            results.contains(
                "Error #1: UNADDRESSABLE ACCESS: writing 0x00001010-0x00001011 1 byte(s)"
            ),
            "results were: {results}"
        );
        assert!(
            results.contains("Note: prev lower malloc:  0x00001000-0x00001010"),
            "results were: {results}"
        );
        assert!(results.contains("# 0 <app.exe+0x100>"));
    }

    #[test]
    fn defined_roundtrip_then_partial_undefined() {
        let mut fx = fixture(Options::default());
        let regs = regs_at(0x0040_0200);
        fx.tool.on_alloc(&mut fx.tcx, &fx.mem, &regs, 0x2000, 16);
        fx.tool
            .on_store(&mut fx.tcx, &fx.mem, &regs, 0x2000, 16, StoreSource::Immediate);
        fx.tool
            .on_load(&mut fx.tcx, &fx.mem, &regs, 0x2000, 16, None, LoadMode::Value);
        assert_eq!("", fx.results.contents());
        // byte 7 loses its value
        fx.tool.shadow.set(0x2007, ShadowState::Undefined);
        fx.tool
            .on_load(&mut fx.tcx, &fx.mem, &regs, 0x2006, 4, None, LoadMode::Value);
        let results = fx.results.contents();
        assert!(
            results.contains(
                "Error #1: UNINITIALIZED READ: reading 0x00002006-0x0000200a 4 byte(s)"
            ),
            "results were: {results}"
        );
        // the reported bytes do not cascade
        fx.tool
            .on_load(&mut fx.tcx, &fx.mem, &regs, 0x2006, 4, None, LoadMode::Value);
        assert_eq!(1, fx.results.contents().matches("UNINITIALIZED READ").count());
    }

    #[test]
    fn duplicate_errors_count_once() {
        let mut fx = fixture(Options::default());
        let regs = regs_at(0x0040_0300);
        for _ in 0..1000 {
            fx.tool
                .on_load(&mut fx.tcx, &fx.mem, &regs, 0x9000, 4, None, LoadMode::Value);
        }
        let results = fx.results.contents();
        assert_eq!(1, results.matches("UNADDRESSABLE ACCESS").count());
        let mut count = 0;
        fx.tool.for_each_in_id_order(|rec| {
            assert_eq!(1, rec.id);
            assert_eq!(1000, rec.count);
            count += 1;
        });
        assert_eq!(1, count);
        let summary = fx.tool.summary_text();
        assert!(summary.contains("Error #1:   1000"), "summary was: {summary}");
        assert!(
            summary.contains("1 unique,  1000 total UNADDRESSABLE ACCESS"),
            "summary was: {summary}"
        );
    }

    #[test]
    fn throttling_counts_beyond_report_max() {
        let mut fx = fixture(Options {
            report_max: 5,
            ..Options::default()
        });
        for i in 0..7u32 {
            let regs = regs_at(0x0040_0000 + i * 0x10);
            fx.tool
                .on_load(&mut fx.tcx, &fx.mem, &regs, 0x9000, 4, None, LoadMode::Value);
        }
        let results = fx.results.contents();
        assert_eq!(5, results.matches("Error #").count(), "results were: {results}");
        let summary = fx.tool.summary_text();
        assert!(
            summary.contains("2 error(s) beyond -report_max"),
            "summary was: {summary}"
        );
    }

    #[test]
    fn fork_child_starts_clean() {
        let mut fx = fixture(Options::default());
        let regs = regs_at(0x0040_0400);
        fx.tool
            .on_load(&mut fx.tcx, &fx.mem, &regs, 0x9000, 4, None, LoadMode::Value);
        fx.tool.fork_child_reinit();
        let mut seen = 0;
        fx.tool.for_each_in_id_order(|_| seen += 1);
        assert_eq!(0, seen);
        // ids restart
        fx.tool
            .on_load(&mut fx.tcx, &fx.mem, &regs, 0x9000, 4, None, LoadMode::Value);
        fx.tool.for_each_in_id_order(|rec| assert_eq!(1, rec.id));
    }

    #[test]
    fn use_after_free_names_the_freed_chunk() {
        let mut fx = fixture(Options::default());
        let regs = regs_at(0x0040_0500);
        fx.tool.on_alloc(&mut fx.tcx, &fx.mem, &regs, 0x3000, 32);
        fx.tool.on_free(&mut fx.tcx, &fx.mem, &regs, 0x3000);
        fx.tool
            .on_load(&mut fx.tcx, &fx.mem, &regs, 0x3008, 4, None, LoadMode::Value);
        let results = fx.results.contents();
        assert!(
            results.contains("overlaps freed memory 0x00003000-0x00003020"),
            "results were: {results}"
        );
    }

    #[test]
    fn invalid_and_null_frees() {
        let mut fx = fixture(Options {
            warn_null_ptr: true,
            ..Options::default()
        });
        let regs = regs_at(0x0040_0600);
        fx.tool.on_free(&mut fx.tcx, &fx.mem, &regs, 0x5000);
        fx.tool.on_free(&mut fx.tcx, &fx.mem, &regs, 0);
        let results = fx.results.contents();
        assert!(
            results.contains("INVALID HEAP ARGUMENT: free 0x00005000"),
            "results were: {results}"
        );
        assert!(results.contains("WARNING: freeing NULL pointer"));
    }

    #[test]
    fn realloc_preserves_defined_prefix() {
        let mut fx = fixture(Options::default());
        let regs = regs_at(0x0040_0700);
        fx.tool.on_alloc(&mut fx.tcx, &fx.mem, &regs, 0x6000, 8);
        fx.tool
            .on_store(&mut fx.tcx, &fx.mem, &regs, 0x6000, 8, StoreSource::Immediate);
        fx.tool
            .on_realloc(&mut fx.tcx, &fx.mem, &regs, 0x6000, 0x7000, 16);
        assert_eq!(ShadowState::Defined, fx.tool.shadow.range_status(0x7000, 8));
        assert_eq!(
            ShadowState::Undefined,
            fx.tool.shadow.range_status(0x7008, 8)
        );
        assert_eq!(
            ShadowState::Unaddressable,
            fx.tool.shadow.range_status(0x6000, 8)
        );
    }

    #[test]
    fn register_taint_propagates_to_stores() {
        let mut fx = fixture(Options::default());
        let regs = regs_at(0x0040_0800);
        fx.tool.on_alloc(&mut fx.tcx, &fx.mem, &regs, 0x8000, 8);
        // load undefined heap bytes into eax as a move: no report
        fx.tool.on_load(
            &mut fx.tcx,
            &fx.mem,
            &regs,
            0x8000,
            4,
            Some(Register::Eax),
            LoadMode::Move,
        );
        assert_eq!("", fx.results.contents());
        // storing eax taints the destination
        fx.tool.on_store(
            &mut fx.tcx,
            &fx.mem,
            &regs,
            0x8004,
            4,
            StoreSource::Reg(Register::Eax),
        );
        assert_eq!(
            ShadowState::Undefined,
            fx.tool.shadow.range_status(0x8004, 4)
        );
        // a conditional on flags computed from eax reports once
        fx.tool
            .on_binop(&mut fx.tcx, Register::Ebx, Register::Eax, Register::Ebx);
        fx.tool.on_flags_use(&mut fx.tcx, &fx.mem, &regs);
        let results = fx.results.contents();
        assert!(
            results.contains("UNINITIALIZED READ: reading register eflags"),
            "results were: {results}"
        );
        fx.tool.on_flags_use(&mut fx.tcx, &fx.mem, &regs);
        assert_eq!(1, fx.results.contents().matches("eflags").count());
    }

    #[test]
    fn leak_checkpoint_and_revert() {
        let mut fx = fixture(Options::default());
        let regs = regs_at(0x0040_0900);
        fx.tool.on_app_start();
        fx.tool.on_alloc(&mut fx.tcx, &fx.mem, &regs, 0xa000, 48);
        let stack = fx.tool.heap.enclosing(0xa000).unwrap().alloc_stack;
        fx.tool.leak_stats_checkpoint();
        fx.tool.report_leak(
            &fx.tcx,
            &crate::report::LeakReport {
                bytes: 48,
                indirect_bytes: 8,
                stack,
                possible: false,
                reachable: false,
                early: false,
            },
        );
        assert!(fx.tool.summary_text().contains("48 byte(s)"));
        fx.tool.leak_stats_revert();
        let summary = fx.tool.summary_text();
        assert!(
            summary.contains("0 unique,     0 total,      0 byte(s) of LEAK"),
            "summary was: {summary}"
        );
        // scan again without double counting
        fx.tool.report_leak(
            &fx.tcx,
            &crate::report::LeakReport {
                bytes: 48,
                indirect_bytes: 8,
                stack,
                possible: false,
                reachable: false,
                early: false,
            },
        );
        let summary = fx.tool.summary_text();
        assert!(
            summary.contains("1 unique,     1 total,     48 byte(s)"),
            "summary was: {summary}"
        );
    }

    #[test]
    fn suppressed_error_stays_off_the_results_stream() {
        use crate::callstack::{SymbolInfo, SymbolSource};

        struct Sym;
        impl SymbolSource for Sym {
            fn lookup(&self, module: &str, offset: u64) -> Option<SymbolInfo> {
                (module == "mymod" && offset == 0x40).then(|| SymbolInfo {
                    symbol: "foo".into(),
                    offset: 0x12,
                    file: Some("x.c".into()),
                    line: 3,
                })
            }
        }

        let supp_file = {
            use std::io::Write as _;
            let mut f = tempfile::NamedTempFile::new().unwrap();
            writeln!(f, "UNINITIALIZED READ").unwrap();
            writeln!(f, "mymod!foo").unwrap();
            f
        };
        let (output, results, log, suggested) = Output::buffered();
        let options = Options {
            use_default_suppress: false,
            suppress_file: Some(supp_file.path().to_path_buf()),
            ..Options::default()
        };
        let tool = Tool::new(options, output).unwrap().with_symbols(Box::new(Sym));
        tool.on_module_load(0x0050_0000, 0x1000, "mymod");
        let mut tcx = tool.thread_init();
        let mem = PagedMemory::new();
        let regs = RegisterFile::at_pc(0x0050_0040);
        tool.on_load(&mut tcx, &mem, &regs, 0x9000, 4, None, LoadMode::Value);
        // the unaddressable report is not suppressed, but flip one byte to
        // undefined to trigger the suppressible uninit path
        tool.shadow.set_range(0x9100, 4, ShadowState::Undefined);
        tool.on_load(&mut tcx, &mem, &regs, 0x9100, 4, None, LoadMode::Value);
        let results = results.contents();
        assert!(!results.contains("UNINITIALIZED READ"), "results were: {results}");
        let log = log.contents();
        assert!(
            log.contains("SUPPRESSED UNINITIALIZED READ"),
            "log was: {log}"
        );
        // no suggestion for an error that matched
        assert!(!suggested.contents().contains("UNINITIALIZED READ\nmymod!foo"));
        let mut suppressed_seen = false;
        tool.for_each_in_id_order(|rec| {
            if rec.kind == ErrorKind::UninitializedRead {
                assert!(rec.suppressed);
                assert_eq!(0, rec.id);
                suppressed_seen = true;
            }
        });
        assert!(suppressed_seen);
    }
}
