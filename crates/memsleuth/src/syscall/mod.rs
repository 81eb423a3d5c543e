//! System-call argument inspector.
//!
//! Pre-call, every described argument region is checked through the shadow
//! (inputs defined, outputs addressable) per its [`args::ArgDesc`]; post-call
//! the actually-written bytes are marked defined. Calls without a descriptor
//! fall back to snapshotting argument pointees and diffing them afterwards.

pub mod args;
pub mod handlers;
pub mod ioctl;
pub mod table;

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::debug;

use crate::callstack::Location;
use crate::shadow::ShadowState;
use crate::syscall::args::{ArgDesc, ArgFlags, SizeSpec, SyscallDesc, SyscallFlags};
use crate::target::{Addr, PTR_SIZE, RegisterFile, TargetMemory};
use crate::thread::ThreadCtx;
use crate::tool::Tool;

/// Cap on bytes captured per argument when falling back to memory compare.
const ARG_SNAPSHOT_MAX: usize = 2048;

/// Cap on scanned bytes when sizing a NUL-terminated argument.
const CSTRING_SCAN_MAX: u64 = 4096;

const STATUS_BUFFER_OVERFLOW: u32 = 0x8000_0005;
const STATUS_INFO_LENGTH_MISMATCH: u32 = 0xc000_0004;
const STATUS_BUFFER_TOO_SMALL: u32 = 0xc000_0023;

/// Descriptor lookup by syscall number.
#[derive(Debug)]
pub struct SyscallRegistry {
    by_number: HashMap<u32, &'static SyscallDesc, ahash::RandomState>,
}

impl SyscallRegistry {
    pub fn new(descs: &'static [SyscallDesc]) -> Self {
        let by_number = descs.iter().map(|d| (d.number, d)).collect();
        SyscallRegistry { by_number }
    }

    /// The shipped NT descriptor tables.
    pub fn standard() -> Self {
        Self::new(table::SYSCALLS)
    }

    pub fn lookup(&self, number: u32) -> Option<&'static SyscallDesc> {
        self.by_number.get(&number).copied()
    }

    pub fn number_of(&self, name: &str) -> Option<u32> {
        self.by_number
            .values()
            .find(|d| d.name == name)
            .map(|d| d.number)
    }
}

/// Argument snapshot the instrumentation engine hands over at the gate.
#[derive(Debug, Clone)]
pub struct SyscallRecord<'a> {
    pub number: u32,
    pub args: &'a [u64],
    /// Address of the inline argument slots on the stack, zero if unknown.
    pub param_base: Addr,
    pub regs: RegisterFile,
}

/// Saved pre-call state, consumed by the post phase.
#[derive(Debug)]
pub struct SyscallState {
    pub number: u32,
    pub(crate) desc: Option<&'static SyscallDesc>,
    pub(crate) args: SmallVec<[u64; 16]>,
    pub(crate) param_base: Addr,
    pub(crate) regs: RegisterFile,
    /// Size read from an in-struct field pre-call (`SizeSpec::InField`).
    pub(crate) size_from_field: Option<u64>,
    /// Pre-call values of in/out length cells, by parameter ordinal.
    pub(crate) inout_pre: SmallVec<[(u8, u64); 4]>,
    /// Unknown-syscall fallback: pointee bytes captured pre-call.
    pub(crate) unknown_snaps: Vec<(Addr, Vec<u8>)>,
}

impl SyscallState {
    pub(crate) fn arg(&self, param: u8) -> u64 {
        self.args.get(param as usize).copied().unwrap_or(0)
    }

    fn inout_pre_value(&self, param: u8) -> Option<u64> {
        self.inout_pre
            .iter()
            .find(|(p, _)| *p == param)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Pre,
    Post,
}

/// What a region check does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Check {
    /// Input: every byte must be defined.
    Defined,
    /// Output capacity: every byte must be addressable.
    Addressable,
    /// Post-call: stamp the written bytes defined.
    MarkWritten,
}

impl Check {
    /// The check a handler performs for an argument in a given phase, in the
    /// table engine's order: writes win pre-call, only writes matter
    /// post-call.
    pub(crate) fn for_phase(phase: Phase, flags: ArgFlags) -> Option<Check> {
        match phase {
            Phase::Pre if flags.contains(ArgFlags::WRITE) => Some(Check::Addressable),
            Phase::Pre => Some(Check::Defined),
            Phase::Post if flags.contains(ArgFlags::WRITE) => Some(Check::MarkWritten),
            Phase::Post => None,
        }
    }
}

fn syscall_succeeded(flags: SyscallFlags, result: i64) -> bool {
    if flags.contains(SyscallFlags::RET_ZERO_FAIL) {
        result != 0
    } else if flags.contains(SyscallFlags::RET_MINUS1_FAIL) {
        result != -1
    } else {
        result >= 0
    }
}

fn is_small_write_status(result: i64) -> bool {
    matches!(
        result as u32,
        STATUS_BUFFER_OVERFLOW | STATUS_INFO_LENGTH_MISMATCH | STATUS_BUFFER_TOO_SMALL
    )
}

/// Byte length of a NUL-terminated argument, terminator included. An
/// unreadable pointee degrades to one byte so the region check still reports
/// it as presumed-unaddressable.
fn cstring_size(mem: &dyn TargetMemory, ptr: Addr) -> u64 {
    match mem.cstring_len(ptr, CSTRING_SCAN_MAX) {
        Some(len) => len + 1,
        None => 1,
    }
}

impl Tool {
    /// Pre-call gate: verifies the inline slots and every described argument
    /// region, saving what the post phase needs into the thread context.
    pub fn pre_syscall(&self, tcx: &mut ThreadCtx, mem: &dyn TargetMemory, rec: &SyscallRecord<'_>) {
        let desc = self.syscalls.lookup(rec.number);
        let mut state = SyscallState {
            number: rec.number,
            desc,
            args: rec.args.into(),
            param_base: rec.param_base,
            regs: rec.regs,
            size_from_field: None,
            inout_pre: SmallVec::new(),
            unknown_snaps: Vec::new(),
        };
        self.check_inline_slots(tcx, mem, &state);
        match desc {
            None => {
                debug!(number = rec.number, "no descriptor; using memory-compare fallback");
                self.snapshot_unknown_args(mem, &mut state);
            }
            Some(desc) => {
                for (index, arg) in desc.args.iter().enumerate() {
                    self.pre_arg(tcx, mem, &mut state, desc, index, arg);
                }
                if desc.flags.contains(SyscallFlags::IOCTL) {
                    ioctl::pre(self, tcx, mem, &state);
                }
            }
        }
        tcx.sys = Some(state);
    }

    /// Post-call: marks written regions defined per the success predicate.
    pub fn post_syscall(&self, tcx: &mut ThreadCtx, mem: &dyn TargetMemory, result: i64) {
        let Some(state) = tcx.sys.take() else {
            return;
        };
        let Some(desc) = state.desc else {
            self.diff_unknown_args(mem, &state);
            return;
        };
        let success = syscall_succeeded(desc.flags, result);
        let small_write = !success
            && desc.flags.contains(SyscallFlags::RET_SMALL_WRITE_LAST)
            && is_small_write_status(result);
        if !success && !small_write {
            return;
        }
        let last_write = desc.last_write_param();
        for (index, arg) in desc.args.iter().enumerate() {
            if !arg.is_write() {
                continue;
            }
            // A later duplicate carries this parameter's post-call size.
            if desc.has_later_duplicate(index) {
                continue;
            }
            if small_write && Some(arg.param) != last_write {
                continue;
            }
            let ptr = state.arg(arg.param);
            if ptr == 0 {
                continue;
            }
            if arg.flags.contains(ArgFlags::NO_WRITE_IF_COUNT_0)
                && self.write_count_is_zero(&state, desc, index)
            {
                continue;
            }
            if arg.complex.is_some()
                && handlers::dispatch(self, tcx, mem, &state, Phase::Post, arg, ptr, 0)
            {
                continue;
            }
            let len = self.resolve_post_len(mem, &state, arg, result);
            self.sys_check(tcx, mem, &state.regs, state.number, Check::MarkWritten, ptr, len);
        }
        if desc.flags.contains(SyscallFlags::IOCTL) {
            ioctl::post(self, tcx, mem, &state, result);
        }
    }

    /// The inline argument slots themselves must hold defined values.
    fn check_inline_slots(&self, tcx: &ThreadCtx, mem: &dyn TargetMemory, state: &SyscallState) {
        if state.param_base == 0 {
            return;
        }
        let arg_count = state
            .desc
            .map(|d| d.arg_count as usize)
            .unwrap_or(state.args.len());
        for ordinal in 0..arg_count {
            let slot = state.param_base + ordinal as u64 * PTR_SIZE;
            // Inlined booleans only promise a defined low byte.
            let width = match state.desc {
                Some(desc)
                    if desc
                        .args
                        .iter()
                        .any(|a| a.param as usize == ordinal && a.flags.contains(ArgFlags::INLINED_BOOL)) =>
                {
                    1
                }
                _ => PTR_SIZE,
            };
            if self.shadow.range_status(slot, width) == ShadowState::Undefined {
                self.report_uninit(
                    tcx,
                    mem,
                    &state.regs,
                    Location::Syscall(state.number),
                    slot,
                    width,
                    None,
                );
                self.shadow.set_range(slot, width, ShadowState::UninitRead);
            }
        }
    }

    fn pre_arg(
        &self,
        tcx: &ThreadCtx,
        mem: &dyn TargetMemory,
        state: &mut SyscallState,
        desc: &'static SyscallDesc,
        index: usize,
        arg: &ArgDesc,
    ) {
        if arg.flags.contains(ArgFlags::INLINED_BOOL) {
            return;
        }
        // Duplicate entries only carry the post-call size.
        if desc.earlier_duplicate(index).is_some() {
            return;
        }
        let ptr = state.arg(arg.param);
        if ptr == 0 {
            return;
        }
        let len = self.resolve_pre_len(mem, state, arg);
        if arg.complex.is_some()
            && handlers::dispatch(self, tcx, mem, state, Phase::Pre, arg, ptr, len)
        {
            return;
        }
        let check = if arg.is_read() {
            Check::Defined
        } else {
            Check::Addressable
        };
        self.sys_check(tcx, mem, &state.regs, state.number, check, ptr, len);
    }

    fn resolve_pre_len(&self, mem: &dyn TargetMemory, state: &mut SyscallState, arg: &ArgDesc) -> u64 {
        let base = match arg.size {
            SizeSpec::Bytes(n) => u64::from(n),
            SizeSpec::Param(k) => {
                let value = state.arg(k);
                if arg.flags.contains(ArgFlags::LENGTH_INOUT) {
                    // The parameter points at the size cell.
                    let cell = if arg.flags.contains(ArgFlags::POST_SIZE_8BYTES) {
                        mem.read_u64(value)
                    } else {
                        mem.read_u32(value).map(u64::from)
                    };
                    match cell {
                        Some(v) => {
                            state.inout_pre.push((arg.param, v));
                            v
                        }
                        None => 0,
                    }
                } else {
                    value
                }
            }
            SizeSpec::CString => cstring_size(mem, state.arg(arg.param)),
            SizeSpec::Retval => 0,
            SizeSpec::InField(offset) => {
                match mem.read_u32(state.arg(arg.param) + u64::from(offset)) {
                    Some(v) => {
                        state.size_from_field = Some(u64::from(v));
                        u64::from(v)
                    }
                    None => 0,
                }
            }
        };
        base * self.elem_size(state, arg)
    }

    fn resolve_post_len(
        &self,
        mem: &dyn TargetMemory,
        state: &SyscallState,
        arg: &ArgDesc,
        result: i64,
    ) -> u64 {
        let base = if arg.flags.contains(ArgFlags::POST_SIZE_IO_STATUS) {
            // The size parameter names the status block; its `information`
            // field holds the written length.
            let SizeSpec::Param(iosb) = arg.size else {
                return 0;
            };
            mem.read_u32(state.arg(iosb) + 4).map(u64::from).unwrap_or(0)
        } else {
            match arg.size {
                SizeSpec::Bytes(n) => u64::from(n),
                // Post-call the terminator is in place, so the scan sees the
                // string the kernel actually produced.
                SizeSpec::CString => cstring_size(mem, state.arg(arg.param)),
                SizeSpec::Retval => result.max(0) as u64,
                SizeSpec::Param(k) => {
                    let value = state.arg(k);
                    if arg.flags.contains(ArgFlags::LENGTH_INOUT) {
                        let cell = if arg.flags.contains(ArgFlags::POST_SIZE_8BYTES) {
                            mem.read_u64(value)
                        } else {
                            mem.read_u32(value).map(u64::from)
                        };
                        // Unreadable post-call: fall back to the pre snapshot.
                        cell.or_else(|| state.inout_pre_value(arg.param)).unwrap_or(0)
                    } else {
                        value
                    }
                }
                SizeSpec::InField(_) => state.size_from_field.unwrap_or(0),
            }
        };
        base * self.elem_size(state, arg)
    }

    fn elem_size(&self, state: &SyscallState, arg: &ArgDesc) -> u64 {
        if !arg.flags.contains(ArgFlags::SIZE_IN_ELEMENTS) {
            return 1;
        }
        match arg.elem {
            Some(SizeSpec::Bytes(n)) => u64::from(n),
            Some(SizeSpec::Param(k)) => state.arg(k),
            _ => 1,
        }
    }

    /// `NO_WRITE_IF_COUNT_0`: the count rides in the primary entry's size
    /// parameter.
    fn write_count_is_zero(
        &self,
        state: &SyscallState,
        desc: &'static SyscallDesc,
        index: usize,
    ) -> bool {
        match desc.earlier_duplicate(index).map(|a| a.size) {
            Some(SizeSpec::Param(k)) => state.arg(k) == 0,
            _ => false,
        }
    }

    /// Central region check; reports through the error accumulator.
    pub(crate) fn sys_check(
        &self,
        tcx: &ThreadCtx,
        mem: &dyn TargetMemory,
        regs: &RegisterFile,
        number: u32,
        check: Check,
        addr: Addr,
        len: u64,
    ) {
        if addr == 0 || len == 0 {
            return;
        }
        let loc = Location::Syscall(number);
        let container = Some((addr, addr + len));
        match check {
            Check::MarkWritten => {
                // Invariant: the pre phase vetted this region's
                // addressability, so marking cannot invent memory.
                self.shadow.set_range(addr, len, ShadowState::Defined);
            }
            Check::Addressable => {
                for (start, run, state) in self.shadow.get_range(addr, len) {
                    if state == ShadowState::Unaddressable {
                        self.report_unaddressable(tcx, mem, regs, loc, start, run, true, container);
                    }
                }
            }
            Check::Defined => {
                for (start, run, state) in self.shadow.get_range(addr, len) {
                    match state {
                        ShadowState::Unaddressable => {
                            self.report_unaddressable(tcx, mem, regs, loc, start, run, false, container);
                        }
                        ShadowState::Undefined => {
                            self.report_uninit(tcx, mem, regs, loc, start, run, container);
                            self.shadow.set_range(start, run, ShadowState::UninitRead);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn snapshot_unknown_args(&self, mem: &dyn TargetMemory, state: &mut SyscallState) {
        for index in 0..state.args.len() {
            let ptr = state.args[index];
            if ptr == 0 || ptr >= self.shadow.limit() {
                continue;
            }
            let mut snap = Vec::new();
            let mut chunk = [0u8; 64];
            while snap.len() < ARG_SNAPSHOT_MAX {
                if !mem.safe_read(ptr + snap.len() as u64, &mut chunk) {
                    break;
                }
                snap.extend_from_slice(&chunk);
            }
            if !snap.is_empty() {
                state.unknown_snaps.push((ptr, snap));
            }
        }
    }

    /// Memory-compare fallback: bytes that changed across the call were
    /// written by the kernel.
    fn diff_unknown_args(&self, mem: &dyn TargetMemory, state: &SyscallState) {
        for (addr, before) in &state.unknown_snaps {
            let mut after = vec![0u8; before.len()];
            if !mem.safe_read(*addr, &mut after) {
                continue;
            }
            let mut i = 0;
            while i < before.len() {
                if before[i] == after[i] {
                    i += 1;
                    continue;
                }
                let start = i;
                while i < before.len() && before[i] != after[i] {
                    i += 1;
                }
                // Only mark what the application could already touch.
                let run_start = *addr + start as u64;
                for (s, l, st) in self.shadow.get_range(run_start, (i - start) as u64) {
                    if st != ShadowState::Unaddressable {
                        self.shadow.set_range(s, l, ShadowState::Defined);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::args::ArgDesc;
    use super::*;
    use crate::options::Options;
    use crate::report::{ErrorKind, Output, SharedBuf};
    use crate::target::PagedMemory;

    static FOO: &[SyscallDesc] = &[
        SyscallDesc::new(0x100, "Foo", 2, &[
            ArgDesc::write_inout(0, 1),
            ArgDesc::read(1, SizeSpec::Bytes(4)),
        ]),
        SyscallDesc::new(0x101, "Bar", 3, &[
            // out array of 8-byte elements, capacity in param 1; entries
            // actually written = return value, none when the count is zero
            ArgDesc::write(0, SizeSpec::Param(1)).in_elements(SizeSpec::Bytes(8)),
            ArgDesc::post_retval(0)
                .in_elements(SizeSpec::Bytes(8))
                .with_flags(ArgFlags::NO_WRITE_IF_COUNT_0),
            // struct carrying its own 4-byte total size at offset 4
            ArgDesc::read(2, SizeSpec::InField(4)),
        ]),
    ];

    fn tool_with(descs: &'static [SyscallDesc]) -> (Tool, ThreadCtx, SharedBuf) {
        let (output, results, _log, _suggested) = Output::buffered();
        let options = Options {
            use_default_suppress: false,
            ..Options::default()
        };
        let tool = Tool::new(options, output).unwrap().with_syscalls(descs);
        let tcx = tool.thread_init();
        (tool, tcx, results)
    }

    fn count_kinds(tool: &Tool) -> (usize, usize) {
        let (mut unaddr, mut uninit) = (0, 0);
        tool.for_each_in_id_order(|rec| match rec.kind {
            ErrorKind::UnaddressableAccess => unaddr += rec.count as usize,
            ErrorKind::UninitializedRead => uninit += rec.count as usize,
            _ => {}
        });
        (unaddr, uninit)
    }

    /// `Foo(buf_out, len)`: the 4-byte length cell must be defined, the
    /// output buffer addressable for `*len` bytes, and on success `*len`
    /// bytes become defined.
    #[test]
    fn schema_driven_check_happy_path() {
        let (tool, mut tcx, results) = tool_with(FOO);
        let mut mem = PagedMemory::new();
        mem.poke_u32(0x4000, 8); // *len == 8
        tool.shadow.set_range(0x4000, 4, crate::shadow::ShadowState::Defined);
        tool.shadow.set_range(0x5000, 8, crate::shadow::ShadowState::Undefined);
        let record = SyscallRecord {
            number: 0x100,
            args: &[0x5000, 0x4000],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        tool.post_syscall(&mut tcx, &mem, 0);
        assert_eq!((0, 0), count_kinds(&tool), "results: {}", results.contents());
        assert_eq!(
            crate::shadow::ShadowState::Defined,
            tool.shadow.range_status(0x5000, 8)
        );
        // beyond the written length stays untouched
        assert_eq!(
            crate::shadow::ShadowState::Unaddressable,
            tool.shadow.get(0x5008)
        );
    }

    #[test]
    fn partly_undefined_length_cell_reports_one_uninit() {
        let (tool, mut tcx, _results) = tool_with(FOO);
        let mut mem = PagedMemory::new();
        mem.poke_u32(0x4000, 8);
        tool.shadow.set_range(0x4000, 2, crate::shadow::ShadowState::Defined);
        tool.shadow.set_range(0x4002, 2, crate::shadow::ShadowState::Undefined);
        tool.shadow.set_range(0x5000, 8, crate::shadow::ShadowState::Undefined);
        let record = SyscallRecord {
            number: 0x100,
            args: &[0x5000, 0x4000],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((0, 1), count_kinds(&tool));
    }

    #[test]
    fn unaddressable_output_buffer_reports_one_unaddr() {
        let (tool, mut tcx, _results) = tool_with(FOO);
        let mut mem = PagedMemory::new();
        mem.poke_u32(0x4000, 8);
        tool.shadow.set_range(0x4000, 4, crate::shadow::ShadowState::Defined);
        // 0x9000 never allocated: unaddressable
        let record = SyscallRecord {
            number: 0x100,
            args: &[0x9000, 0x4000],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((1, 0), count_kinds(&tool));
        // failure skips the write marking
        tool.post_syscall(&mut tcx, &mem, -1073741823); // 0xc0000001
        assert_eq!(
            crate::shadow::ShadowState::Unaddressable,
            tool.shadow.range_status(0x9000, 8)
        );
    }

    #[test]
    fn undefined_inline_slot_is_reported() {
        let (tool, mut tcx, _results) = tool_with(FOO);
        let mut mem = PagedMemory::new();
        mem.poke_u32(0x4000, 0);
        tool.shadow.set_range(0x4000, 4, crate::shadow::ShadowState::Defined);
        // two argument slots at 0x3000; the second is uninitialized
        tool.shadow.set_range(0x3000, 4, crate::shadow::ShadowState::Defined);
        tool.shadow.set_range(0x3004, 4, crate::shadow::ShadowState::Undefined);
        let record = SyscallRecord {
            number: 0x100,
            args: &[0, 0x4000],
            param_base: 0x3000,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((0, 1), count_kinds(&tool));
    }

    #[test]
    fn unknown_syscall_diffs_pointee_snapshots() {
        let (tool, mut tcx, _results) = tool_with(FOO);
        let mut mem = PagedMemory::new();
        mem.poke(0x5000, &[0u8; 16]);
        tool.shadow.set_range(0x5000, 16, crate::shadow::ShadowState::Undefined);
        let record = SyscallRecord {
            number: 0x999,
            args: &[0x5000],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        // the kernel wrote bytes 4..8
        mem.poke_u32(0x5004, 0xdead_beef);
        tool.post_syscall(&mut tcx, &mem, 0);
        assert_eq!(crate::shadow::ShadowState::Undefined, tool.shadow.range_status(0x5000, 4));
        assert_eq!(crate::shadow::ShadowState::Defined, tool.shadow.range_status(0x5004, 4));
        assert_eq!(crate::shadow::ShadowState::Undefined, tool.shadow.range_status(0x5008, 8));
    }

    #[test]
    fn small_write_status_still_writes_the_final_arg() {
        let (tool, mut tcx, _results) = tool_with(table::SYSCALLS);
        let mut mem = PagedMemory::new();
        let number = tool.syscall_number("NtQueryKey").unwrap();
        // KeyInformation buffer (param 2) capacity 16 at 0x5000, length cell
        // (param 3 by value), ResultLength (param 4) at 0x4000
        tool.shadow.set_range(0x5000, 16, crate::shadow::ShadowState::Undefined);
        tool.shadow.set_range(0x4000, 4, crate::shadow::ShadowState::Undefined);
        mem.poke_u32(0x4000, 64); // kernel reports the needed size
        let record = SyscallRecord {
            number,
            args: &[1, 0, 0x5000, 16, 0x4000],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((0, 0), count_kinds(&tool));
        // STATUS_BUFFER_TOO_SMALL: only ResultLength is written
        tool.post_syscall(&mut tcx, &mem, 0xc0000023u32 as i32 as i64);
        assert_eq!(
            crate::shadow::ShadowState::Defined,
            tool.shadow.range_status(0x4000, 4)
        );
        assert_eq!(
            crate::shadow::ShadowState::Undefined,
            tool.shadow.range_status(0x5000, 16)
        );
    }

    #[test]
    fn cstring_args_are_sized_by_nul_scan() {
        let (tool, mut tcx, _results) = tool_with(table::SYSCALLS);
        let number = tool.syscall_number("NtVdmControl").unwrap();
        let mut mem = PagedMemory::new();
        mem.poke(0x7000, b"command line\0");
        tool.shadow.set_range(0x7000, 13, crate::shadow::ShadowState::Defined);
        let record = SyscallRecord {
            number,
            args: &[5, 0x7000],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((0, 0), count_kinds(&tool));
        // the terminator byte was never written
        mem.poke(0x7100, b"abc\0");
        tool.shadow.set_range(0x7100, 8, crate::shadow::ShadowState::Undefined);
        tool.shadow.set_range(0x7100, 3, crate::shadow::ShadowState::Defined);
        let record = SyscallRecord {
            number,
            args: &[5, 0x7100],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((0, 1), count_kinds(&tool));
    }

    #[test]
    fn element_counts_and_retval_sizes() {
        let (tool, mut tcx, _results) = tool_with(FOO);
        let mut mem = PagedMemory::new();
        // self-sized input struct: total size 12 at offset 4
        mem.poke_u32(0x6004, 12);
        tool.shadow.set_range(0x6000, 12, crate::shadow::ShadowState::Defined);
        // out array: capacity 3 elements of 8 bytes
        tool.shadow.set_range(0x5000, 24, crate::shadow::ShadowState::Undefined);
        let record = SyscallRecord {
            number: 0x101,
            args: &[0x5000, 3, 0x6000],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((0, 0), count_kinds(&tool));
        // two entries came back
        tool.post_syscall(&mut tcx, &mem, 2);
        assert_eq!(
            crate::shadow::ShadowState::Defined,
            tool.shadow.range_status(0x5000, 16)
        );
        assert_eq!(
            crate::shadow::ShadowState::Undefined,
            tool.shadow.range_status(0x5010, 8)
        );
        // a zero count means nothing was written, whatever the retval says
        tool.shadow.set_range(0x5000, 24, crate::shadow::ShadowState::Undefined);
        let record = SyscallRecord {
            number: 0x101,
            args: &[0x5000, 0, 0x6000],
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        tool.post_syscall(&mut tcx, &mem, 2);
        assert_eq!(
            crate::shadow::ShadowState::Undefined,
            tool.shadow.range_status(0x5000, 24)
        );
    }

    #[test]
    fn registry_resolves_names_and_numbers() {
        let registry = SyscallRegistry::standard();
        let number = registry.number_of("NtReadFile").unwrap();
        assert_eq!("NtReadFile", registry.lookup(number).unwrap().name);
        assert!(registry.lookup(0xfff).is_none());
    }
}
