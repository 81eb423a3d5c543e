//! Error accumulator and reporter.
//!
//! Every detected bug funnels through here: the callsite fingerprint is
//! captured, de-duplicated against the `(kind, stack)`-keyed table, matched
//! against the suppression list, throttled, and rendered. One mutex guards
//! the table, the insertion order and the per-kind counters; the suggested-
//! suppressions sidecar has its own.

pub mod suppress;

use std::fmt;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::callstack::{Location, StackId};
use crate::heap::{CHUNK_ALIGN, ChunkStatus};
use crate::shadow::ShadowState;
use crate::target::{Addr, RegisterFile, TargetMemory};
use crate::thread::ThreadCtx;
use crate::tool::Tool;
use crate::utils::{fmt_addr, fmt_elapsed};

/// Kinds of detected bugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ErrorKind {
    #[display("UNADDRESSABLE ACCESS")]
    UnaddressableAccess,
    #[display("UNINITIALIZED READ")]
    UninitializedRead,
    #[display("INVALID HEAP ARGUMENT")]
    InvalidHeapArg,
    #[display("WARNING")]
    Warning,
    #[display("LEAK")]
    Leak,
    #[display("POSSIBLE LEAK")]
    PossibleLeak,
}

impl ErrorKind {
    pub const COUNT: usize = 6;
    pub const ALL: [ErrorKind; Self::COUNT] = [
        ErrorKind::UnaddressableAccess,
        ErrorKind::UninitializedRead,
        ErrorKind::InvalidHeapArg,
        ErrorKind::Warning,
        ErrorKind::Leak,
        ErrorKind::PossibleLeak,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn header(self) -> &'static str {
        match self {
            ErrorKind::UnaddressableAccess => "UNADDRESSABLE ACCESS",
            ErrorKind::UninitializedRead => "UNINITIALIZED READ",
            ErrorKind::InvalidHeapArg => "INVALID HEAP ARGUMENT",
            ErrorKind::Warning => "WARNING",
            ErrorKind::Leak => "LEAK",
            ErrorKind::PossibleLeak => "POSSIBLE LEAK",
        }
    }

    /// Suppression-file headers are matched as prefixes of the line.
    pub fn from_header(line: &str) -> Option<ErrorKind> {
        Self::ALL.into_iter().find(|k| line.starts_with(k.header()))
    }

    pub const fn is_leak(self) -> bool {
        matches!(self, ErrorKind::Leak | ErrorKind::PossibleLeak)
    }
}

/// One de-duplicated error.
#[derive(Debug)]
pub struct ErrorRecord {
    /// Monotonic, assigned on the first non-suppressed, non-throttled
    /// occurrence; zero otherwise.
    pub id: u32,
    pub kind: ErrorKind,
    pub count: u64,
    /// Sticky: the record stays in the table but leaves the found tallies.
    pub suppressed: bool,
    pub stack: StackId,
    saved_count: u64,
}

#[derive(Debug, Default, Clone)]
struct Counters {
    num_unique: [u32; ErrorKind::COUNT],
    num_total: [u32; ErrorKind::COUNT],
    num_reported: u32,
    num_reported_leaks: u32,
    num_throttled: u32,
    num_throttled_leaks: u32,
    num_suppressions_matched: u32,
    num_suppressed_leaks: u32,
    num_leaks_ignored: u32,
    num_reachable_leaks: u32,
    bytes_leaked: u64,
    bytes_indirect_leaked: u64,
    bytes_possible_leaked: u64,
}

#[derive(Default)]
struct ErrorTable {
    records: IndexMap<(ErrorKind, StackId), ErrorRecord, ahash::RandomState>,
    next_id: u32,
    counters: Counters,
    saved: Option<Counters>,
}

/// Output sinks. `results` is the primary per-process stream; `log` carries
/// the verbose trace and the suppressed reports; `suggested` is the
/// suppression sidecar.
pub struct Output {
    pub results: Box<dyn Write + Send>,
    pub log: Box<dyn Write + Send>,
    pub suggested: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output").finish_non_exhaustive()
    }
}

impl Output {
    /// Discards everything; useful for embedders that only consume counters.
    pub fn null() -> Self {
        Output {
            results: Box::new(io::sink()),
            log: Box::new(io::sink()),
            suggested: None,
        }
    }

    /// In-memory sinks; returns readers for the three streams.
    pub fn buffered() -> (Self, SharedBuf, SharedBuf, SharedBuf) {
        let (results, log, suggested) = (SharedBuf::new(), SharedBuf::new(), SharedBuf::new());
        let output = Output {
            results: Box::new(results.clone()),
            log: Box::new(log.clone()),
            suggested: Some(Box::new(suggested.clone())),
        };
        (output, results, log, suggested)
    }
}

/// Clonable in-memory sink.
#[derive(Debug, Clone, Default)]
pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The concurrency-safe error store plus its sinks.
pub struct Reporter {
    table: Mutex<ErrorTable>,
    pub(crate) suppressions: suppress::SuppressionSet,
    results: Mutex<Box<dyn Write + Send>>,
    log: Mutex<Box<dyn Write + Send>>,
    sidecar: Mutex<Option<Box<dyn Write + Send>>>,
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("suppressions", &self.suppressions.count())
            .finish_non_exhaustive()
    }
}

impl Reporter {
    pub(crate) fn new(output: Output, suppressions: suppress::SuppressionSet) -> Self {
        Reporter {
            table: Mutex::new(ErrorTable::default()),
            suppressions,
            results: Mutex::new(output.results),
            log: Mutex::new(output.log),
            sidecar: Mutex::new(output.suggested),
        }
    }
}

/// Kind-specific first line of a report.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Detail<'a> {
    Access {
        addr: Addr,
        sz: u64,
        write: bool,
        container: Option<(Addr, Addr)>,
    },
    RegisterRead {
        reg: &'static str,
    },
    HeapArg {
        msg: &'a str,
        addr: Addr,
    },
    Warning {
        msg: &'a str,
    },
    Leak {
        bytes: u64,
        indirect: u64,
    },
}

/// What the de-dup pass decided about one occurrence.
struct Admission {
    first: bool,
    suppressed: bool,
    /// Render and emit the body (first occurrence, not throttled).
    render: bool,
    id: u32,
    rendered_stack: String,
}

/// One leak (or possible leak) from the reachability scanner.
#[derive(Debug, Clone, Copy)]
pub struct LeakReport {
    pub bytes: u64,
    pub indirect_bytes: u64,
    /// Allocation stack; the reporter clones its own reference.
    pub stack: Option<StackId>,
    pub possible: bool,
    pub reachable: bool,
    /// Allocated before the application entry point.
    pub early: bool,
}

impl Tool {
    pub(crate) fn report_unaddressable(
        &self,
        tcx: &ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        loc: Location,
        addr: Addr,
        sz: u64,
        write: bool,
        container: Option<(Addr, Addr)>,
    ) {
        self.report_error(
            tcx,
            mem,
            regs,
            loc,
            ErrorKind::UnaddressableAccess,
            Detail::Access { addr, sz, write, container },
        );
    }

    pub(crate) fn report_uninit(
        &self,
        tcx: &ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        loc: Location,
        addr: Addr,
        sz: u64,
        container: Option<(Addr, Addr)>,
    ) {
        self.report_error(
            tcx,
            mem,
            regs,
            loc,
            ErrorKind::UninitializedRead,
            Detail::Access { addr, sz, write: false, container },
        );
    }

    pub(crate) fn report_uninit_register(
        &self,
        tcx: &ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        loc: Location,
        reg: &'static str,
    ) {
        self.report_error(
            tcx,
            mem,
            regs,
            loc,
            ErrorKind::UninitializedRead,
            Detail::RegisterRead { reg },
        );
    }

    pub(crate) fn report_invalid_heap_arg(
        &self,
        tcx: &ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        loc: Location,
        msg: &str,
        addr: Addr,
    ) {
        self.report_error(
            tcx,
            mem,
            regs,
            loc,
            ErrorKind::InvalidHeapArg,
            Detail::HeapArg { msg, addr },
        );
    }

    pub(crate) fn report_warning(
        &self,
        tcx: &ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        loc: Location,
        msg: &str,
    ) {
        self.report_error(tcx, mem, regs, loc, ErrorKind::Warning, Detail::Warning { msg });
    }

    fn report_error(
        &self,
        tcx: &ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        loc: Location,
        kind: ErrorKind,
        detail: Detail<'_>,
    ) {
        let stack = self
            .walker
            .capture(mem, &self.modules, &self.stacks, regs, loc);
        let admission = self.admit(kind, stack);
        if admission.render {
            let mut body = String::new();
            // With one shared stream the report may land mid-line.
            if !self.options.thread_logs {
                body.push('\n');
            }
            if admission.suppressed {
                let _ = write!(body, "SUPPRESSED ");
            } else {
                let _ = write!(body, "Error #{}: ", admission.id);
            }
            let _ = write!(body, "{kind}: ");
            self.push_detail_line(&mut body, loc, detail);
            let _ = writeln!(
                body,
                "@{} in thread {}",
                fmt_elapsed(self.elapsed()),
                tcx.thread_id()
            );
            if let Detail::Access { addr, sz, write: _, container: _ } = detail {
                if kind == ErrorKind::UnaddressableAccess {
                    self.heap_neighborhood(tcx, addr, sz, &mut body);
                }
            }
            body.push_str(&admission.rendered_stack);
            body.push('\n');
            if admission.suppressed {
                emit(&self.reporter.log, &body);
            } else {
                emit(&self.reporter.results, &body);
            }
        }
        if admission.first && !admission.suppressed {
            let mut sidecar = self.reporter.sidecar.lock().unwrap();
            if let Some(out) = sidecar.as_mut() {
                let _ = suppress::write_suggested(out.as_mut(), kind, &admission.rendered_stack);
            }
        }
        if !admission.suppressed {
            self.maybe_pause(kind);
        }
    }

    /// De-dups one occurrence, deciding suppression, id and throttling.
    /// The `stack` reference is consumed (kept by a fresh record, released
    /// on duplicates).
    fn admit(&self, kind: ErrorKind, stack: StackId) -> Admission {
        let mut table = self.reporter.table.lock().unwrap();
        let key = (kind, stack);
        if let Some(record) = table.records.get_mut(&key) {
            record.count += 1;
            let suppressed = record.suppressed;
            let id = record.id;
            if suppressed {
                table.counters.num_suppressions_matched += 1;
                if kind.is_leak() {
                    table.counters.num_suppressed_leaks += 1;
                }
            } else {
                table.counters.num_total[kind.index()] += 1;
            }
            drop(table);
            self.stacks.release(stack);
            return Admission {
                first: false,
                suppressed,
                render: false,
                id,
                rendered_stack: String::new(),
            };
        }
        let rendered = self.stacks.render(stack, &self.modules, self.symbols());
        let suppressed = self.reporter.suppressions.matches(kind, &rendered);
        let throttled = !suppressed && self.over_report_limit(&table.counters, kind);
        let mut id = 0;
        if suppressed {
            table.counters.num_suppressions_matched += 1;
            if kind.is_leak() {
                table.counters.num_suppressed_leaks += 1;
            }
        } else {
            table.counters.num_total[kind.index()] += 1;
            if throttled {
                if kind.is_leak() {
                    table.counters.num_throttled_leaks += 1;
                } else {
                    table.counters.num_throttled += 1;
                }
            } else {
                table.next_id += 1;
                id = table.next_id;
                table.counters.num_unique[kind.index()] += 1;
                if kind.is_leak() {
                    table.counters.num_reported_leaks += 1;
                } else {
                    table.counters.num_reported += 1;
                }
            }
        }
        table.records.insert(
            key,
            ErrorRecord {
                id,
                kind,
                count: 1,
                suppressed,
                stack,
                saved_count: 0,
            },
        );
        Admission {
            first: true,
            suppressed,
            render: suppressed || !throttled,
            id,
            rendered_stack: rendered,
        }
    }

    fn over_report_limit(&self, counters: &Counters, kind: ErrorKind) -> bool {
        if kind.is_leak() {
            self.options
                .report_leak_limit()
                .is_some_and(|max| counters.num_reported_leaks >= max)
        } else {
            self.options
                .report_limit()
                .is_some_and(|max| counters.num_reported >= max)
        }
    }

    fn push_detail_line(&self, body: &mut String, loc: Location, detail: Detail<'_>) {
        match detail {
            Detail::Access { addr, sz, write, container } => {
                let verb = if write { "writing" } else { "reading" };
                let _ = write!(
                    body,
                    "{} {}-{} {} byte(s)",
                    verb,
                    fmt_addr(addr),
                    fmt_addr(addr + sz),
                    sz
                );
                // Containers only add signal for large ops or subsets.
                if let Some((lo, hi)) = container {
                    if hi - lo > 8 || addr > lo || addr + sz < hi || matches!(loc, Location::Syscall(_)) {
                        let _ = write!(body, " within {}-{}", fmt_addr(lo), fmt_addr(hi));
                    }
                }
                body.push('\n');
            }
            Detail::RegisterRead { reg } => {
                let _ = writeln!(body, "reading register {reg}");
            }
            Detail::HeapArg { msg, addr } => {
                let _ = writeln!(body, "{msg} {}", fmt_addr(addr));
            }
            Detail::Warning { msg } => {
                let _ = writeln!(body, "{msg}");
            }
            Detail::Leak { bytes, indirect } => {
                let _ = writeln!(body, "{bytes} direct byte(s) + {indirect} indirect byte(s)");
            }
        }
    }

    /// Scans the shadow around an unaddressable access for the nearest live
    /// allocations and overlapping freed chunks.
    fn heap_neighborhood(&self, tcx: &ThreadCtx, addr: Addr, sz: u64, body: &mut String) {
        const PAGE: u64 = 4096;
        let access_end = addr + sz;
        // Forward: the next addressable run that probes as a live chunk.
        let mut next_start = None;
        let mut cursor = access_end;
        let scan_end = access_end + PAGE;
        while cursor < scan_end {
            let Some(run_start) =
                self.shadow
                    .check_range(cursor, scan_end - cursor, ShadowState::Unaddressable)
            else {
                break;
            };
            if let Some((lo, hi)) = self.probe_live(run_start) {
                next_start = Some(lo);
                let _ = writeln!(
                    body,
                    "Note: next higher malloc: {}-{}",
                    fmt_addr(lo),
                    fmt_addr(hi)
                );
                break;
            }
            // Probably an earlier error marked stray bytes addressable; skip
            // past this run.
            match self
                .shadow
                .next_state_change(run_start & !3, scan_end, ShadowState::Unaddressable)
            {
                Some(next) => cursor = next.max(cursor + 1),
                None => break,
            }
        }
        // Backward: the addressable run just below the access.
        let mut prev_end = None;
        if addr > 0 {
            if let Some(high) =
                self.shadow
                    .check_range_backward(addr - 1, PAGE.min(addr), ShadowState::Unaddressable)
            {
                let run_start = match self.shadow.prev_state_change(
                    high,
                    high.saturating_sub(PAGE),
                    ShadowState::Unaddressable,
                ) {
                    Some(dword) => dword + 4,
                    None => high & !(CHUNK_ALIGN - 1),
                };
                if let Some((lo, hi)) = self.probe_live(run_start) {
                    prev_end = Some(hi);
                    let _ = writeln!(
                        body,
                        "Note: prev lower malloc:  {}-{}",
                        fmt_addr(lo),
                        fmt_addr(hi)
                    );
                }
            }
        }
        // Freed chunks: the delay queue first, then aligned probes toward
        // the neighbors found above.
        let mut freed = self.heap.overlaps_delayed_free(addr, access_end);
        if freed.is_none() {
            if let Some(limit) = next_start {
                let mut p = access_end.next_multiple_of(CHUNK_ALIGN);
                while p < limit && freed.is_none() {
                    if let Some((size, ChunkStatus::PendingFree)) = self.heap.size_including_invalid(p)
                    {
                        freed = Some((p, p + size));
                    }
                    p += CHUNK_ALIGN;
                }
            }
        }
        if freed.is_none() {
            if let Some(limit) = prev_end {
                let mut p = addr & !(CHUNK_ALIGN - 1);
                while p > limit && freed.is_none() {
                    if let Some((size, ChunkStatus::PendingFree)) = self.heap.size_including_invalid(p)
                    {
                        freed = Some((p, p + size));
                    }
                    p -= CHUNK_ALIGN;
                }
            }
        }
        if let Some((lo, hi)) = freed {
            let _ = writeln!(
                body,
                "Note: {}-{} overlaps freed memory {}-{}",
                fmt_addr(addr),
                fmt_addr(access_end),
                fmt_addr(lo),
                fmt_addr(hi)
            );
        }
        if tcx.in_heap_routine() {
            let _ = writeln!(body, "Note: <inside heap routine: may be false positive>");
        }
    }

    /// Live-chunk probe at the allocator's alignment, tolerating a stray
    /// addressable byte before the chunk.
    fn probe_live(&self, run_start: Addr) -> Option<(Addr, Addr)> {
        for candidate in [
            run_start.next_multiple_of(CHUNK_ALIGN),
            (run_start + 1).next_multiple_of(CHUNK_ALIGN),
        ] {
            if let Some(size) = self.heap.live_size(candidate) {
                return Some((candidate, candidate + size));
            }
        }
        None
    }

    /// Entry point for the external leak scanner.
    pub fn report_leak(&self, tcx: &ThreadCtx, leak: &LeakReport) {
        let kind = if leak.possible {
            ErrorKind::PossibleLeak
        } else {
            ErrorKind::Leak
        };
        {
            let mut table = self.reporter.table.lock().unwrap();
            if leak.reachable {
                table.counters.num_reachable_leaks += 1;
                if !self.options.show_reachable {
                    return;
                }
            } else if leak.early && self.options.ignore_early_leaks {
                table.counters.num_leaks_ignored += 1;
                return;
            } else if self.options.count_leaks {
                if leak.possible {
                    table.counters.bytes_possible_leaked += leak.bytes;
                } else {
                    table.counters.bytes_leaked += leak.bytes;
                    table.counters.bytes_indirect_leaked += leak.indirect_bytes;
                }
            }
            if !self.options.check_leaks {
                // Tallies only; no de-dup without stacks.
                table.counters.num_total[kind.index()] += 1;
                return;
            }
        }
        let stack = match leak.stack {
            Some(stack) => self.stacks.clone_ref(stack),
            None => self.stacks.intern(&[]),
        };
        let admission = self.admit(kind, stack);
        let render = admission.render && (!leak.possible || self.options.possible_leaks);
        if render {
            let mut body = String::new();
            if admission.suppressed {
                let _ = write!(body, "SUPPRESSED ");
            } else {
                let _ = write!(body, "Error #{}: ", admission.id);
            }
            let _ = write!(body, "{}: ", kind.header());
            self.push_detail_line(
                &mut body,
                Location::Pc(0),
                Detail::Leak { bytes: leak.bytes, indirect: leak.indirect_bytes },
            );
            body.push_str(&admission.rendered_stack);
            body.push('\n');
            if admission.suppressed {
                emit(&self.reporter.log, &body);
            } else {
                emit(&self.reporter.results, &body);
            }
        }
        if admission.first && !admission.suppressed {
            let mut sidecar = self.reporter.sidecar.lock().unwrap();
            if let Some(out) = sidecar.as_mut() {
                let _ = suppress::write_suggested(out.as_mut(), kind, &admission.rendered_stack);
            }
        }
    }

    /// Saves the leak-related counters and per-record counts so a later
    /// [`Tool::leak_stats_revert`] can undo a scan.
    pub fn leak_stats_checkpoint(&self) {
        let mut table = self.reporter.table.lock().unwrap();
        table.saved = Some(table.counters.clone());
        for record in table.records.values_mut() {
            if record.kind.is_leak() {
                record.saved_count = record.count;
            }
        }
    }

    /// Restores the state captured by the last checkpoint, dropping leak
    /// records first seen after it.
    pub fn leak_stats_revert(&self) {
        let mut table = self.reporter.table.lock().unwrap();
        let Some(saved) = table.saved.clone() else {
            return;
        };
        for kind in [ErrorKind::Leak, ErrorKind::PossibleLeak] {
            table.counters.num_unique[kind.index()] = saved.num_unique[kind.index()];
            table.counters.num_total[kind.index()] = saved.num_total[kind.index()];
        }
        table.counters.num_reported_leaks = saved.num_reported_leaks;
        table.counters.num_throttled_leaks = saved.num_throttled_leaks;
        table.counters.num_suppressed_leaks = saved.num_suppressed_leaks;
        table.counters.num_leaks_ignored = saved.num_leaks_ignored;
        table.counters.num_reachable_leaks = saved.num_reachable_leaks;
        table.counters.bytes_leaked = saved.bytes_leaked;
        table.counters.bytes_indirect_leaked = saved.bytes_indirect_leaked;
        table.counters.bytes_possible_leaked = saved.bytes_possible_leaked;
        let mut dropped = Vec::new();
        for (key, record) in table.records.iter_mut() {
            if record.kind.is_leak() {
                record.count = record.saved_count;
                if record.count == 0 {
                    dropped.push((*key, record.stack));
                }
            }
        }
        for (key, stack) in dropped {
            table.records.shift_remove(&key);
            self.stacks.release(stack);
        }
    }

    /// Iterates records in id-assignment order.
    pub fn for_each_in_id_order(&self, mut f: impl FnMut(&ErrorRecord)) {
        let table = self.reporter.table.lock().unwrap();
        for record in table.records.values() {
            f(record);
        }
    }

    /// Children do not inherit the parent's errors: the table and counters
    /// reset, while stacks, modules and suppressions are retained.
    pub fn fork_child_reinit(&self) {
        let mut table = self.reporter.table.lock().unwrap();
        let stale: Vec<StackId> = table.records.values().map(|r| r.stack).collect();
        table.records.clear();
        table.next_id = 0;
        table.counters = Counters::default();
        table.saved = None;
        drop(table);
        for stack in stale {
            self.stacks.release(stack);
        }
        self.reset_start_time();
    }

    /// Builds the exit summary.
    pub fn summary_text(&self) -> String {
        let table = self.reporter.table.lock().unwrap();
        let c = &table.counters;
        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "DUPLICATE ERROR COUNTS:");
        for record in table.records.values() {
            if record.count > 1
                && !record.suppressed
                && record.id != 0
                && (record.kind != ErrorKind::PossibleLeak || self.options.possible_leaks)
            {
                let _ = writeln!(out, "\tError #{}: {:6}", record.id, record.count);
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "ERRORS FOUND:");
        for kind in ErrorKind::ALL {
            let (unique, total) = (c.num_unique[kind.index()], c.num_total[kind.index()]);
            match kind {
                ErrorKind::Leak | ErrorKind::PossibleLeak => {
                    if self.options.count_leaks {
                        let bytes = if kind == ErrorKind::Leak {
                            c.bytes_leaked
                        } else {
                            c.bytes_possible_leaked
                        };
                        let _ = write!(
                            out,
                            "  {unique:5} unique, {total:5} total, {bytes:6} byte(s)"
                        );
                        if kind == ErrorKind::Leak && c.bytes_indirect_leaked > 0 {
                            let _ = write!(out, " (+{} indirect)", c.bytes_indirect_leaked);
                        }
                        let _ = writeln!(out, " of {kind}");
                    }
                }
                ErrorKind::InvalidHeapArg if !self.options.check_invalid_frees => {}
                _ => {
                    let _ = writeln!(out, "  {unique:5} unique, {total:5} total {kind}");
                }
            }
        }
        let _ = writeln!(out, "ERRORS IGNORED:");
        let _ = writeln!(out, "  {:5} suppressed error(s)", c.num_suppressions_matched);
        let _ = writeln!(out, "  {:5} suppressed leak(s)", c.num_suppressed_leaks);
        let _ = writeln!(out, "  {:5} ignored early leak(s)", c.num_leaks_ignored);
        let _ = writeln!(
            out,
            "  {:5} still-reachable allocation(s)",
            c.num_reachable_leaks
        );
        let _ = writeln!(out, "  {:5} error(s) beyond -report_max", c.num_throttled);
        let _ = writeln!(
            out,
            "  {:5} leak(s) beyond -report_leak_max",
            c.num_throttled_leaks
        );
        out
    }

    /// Emits the summary to the results stream and log, and to stderr when
    /// the `summary` option is set.
    pub fn exit_summary(&self) {
        let text = format!("\nFINAL SUMMARY:\n{}", self.summary_text());
        emit(&self.reporter.results, &text);
        emit(&self.reporter.log, &text);
        if self.options.summary {
            eprint!("{text}");
        }
    }
}

/// Atomic emission: the whole payload in one write, retried once on failure.
fn emit(sink: &Mutex<Box<dyn Write + Send>>, body: &str) {
    let mut w = sink.lock().unwrap();
    if w.write_all(body.as_bytes()).is_err() {
        let _ = w.write_all(body.as_bytes());
    }
    let _ = w.flush();
}
