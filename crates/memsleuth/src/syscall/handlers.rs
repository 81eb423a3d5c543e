//! Per-type handlers for structurally complex syscall arguments.
//!
//! Each handler consumes the raw pointer, the declared upper-bound length and
//! the phase, and performs the exact shadow checks or marks for the bytes the
//! kernel really touches. Returning `true` tells the engine the argument is
//! fully handled; the generic path then skips it. Sub-probe failures degrade
//! the check (unreadable size fields fall back to the declared struct size)
//! rather than faulting.

use bitflags::bitflags;
use tracing::warn;

use super::args::{ArgDesc, ArgFlags, ComplexType};
use super::table::sizes;
use super::{Check, Phase, SyscallState};
use crate::target::{Addr, TargetMemory};
use crate::thread::ThreadCtx;
use crate::tool::Tool;

/// Layout of the variable-length LPC message header (x86-32).
mod port_message {
    /// `u1.s1.DataLength`
    pub const DATA_LENGTH: u64 = 0;
    /// `u1.s1.TotalLength`
    pub const TOTAL_LENGTH: u64 = 2;
    /// `u1.Length`, overlaying both.
    pub const LENGTH: u64 = 0;
}

bitflags! {
    /// `ContextFlags` control bitmap of the x86 machine context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ContextFlags: u32 {
        const I386      = 0x0001_0000;
        const CONTROL   = Self::I386.bits() | 0x01;
        const INTEGER   = Self::I386.bits() | 0x02;
        const SEGMENTS  = Self::I386.bits() | 0x04;
        const FLOAT     = Self::I386.bits() | 0x08;
        const DEBUG     = Self::I386.bits() | 0x10;
        const EXTENDED  = Self::I386.bits() | 0x20;
    }
}

/// Field offsets of the x86 machine context.
mod context {
    pub const FLAGS: u64 = 0;
    pub const DR0: u64 = 4;
    pub const DEBUG_BYTES: u64 = 24; // Dr0..Dr3, Dr6, Dr7
    pub const FLOAT_SAVE: u64 = 28;
    pub const FLOAT_BYTES: u64 = 112;
    pub const SEG_GS: u64 = 140;
    pub const SEG_FS: u64 = 144;
    pub const SEG_ES: u64 = 148;
    pub const SEG_DS: u64 = 152;
    pub const EDI: u64 = 156;
    pub const INTEGER_BYTES: u64 = 24; // Edi, Esi, Ebx, Edx, Ecx, Eax
    pub const EBP: u64 = 180;
    pub const EIP: u64 = 184;
    pub const SEG_CS: u64 = 188;
    pub const EFLAGS: u64 = 192;
    pub const ESP: u64 = 196;
    pub const SEG_SS: u64 = 200;
    pub const EXTENDED: u64 = 204;
    pub const EXTENDED_BYTES: u64 = 512;
    /// Segment registers are 16-bit values stored with 16-bit gaps.
    pub const SEG_REG_BYTES: u64 = 2;
}

mod exception_record {
    /// Code, flags, chained-record pointer, address, parameter count.
    pub const FIXED_PREFIX: u64 = 20;
    pub const NUMBER_PARAMETERS: u64 = 16;
    pub const PARAMS: u64 = 20;
    pub const PARAM_BYTES: u64 = 4;
    pub const MAX_PARAMETERS: u32 = 15;
}

mod security_descriptor {
    pub const CONTROL: u64 = 2;
    /// Revision through Group: always required.
    pub const HEADER_BYTES: u64 = 12;
    pub const SACL: u64 = 12;
    pub const DACL: u64 = 16;
    pub const ACL_SLOT_BYTES: u64 = 4;
    pub const SE_DACL_PRESENT: u16 = 0x0004;
    pub const SE_SACL_PRESENT: u16 = 0x0010;
}

mod counted_string {
    pub const LENGTH: u64 = 0;
    pub const MAXIMUM_LENGTH: u64 = 2;
    pub const BUFFER: u64 = 4;
}

/// Dispatches to the handler for the argument's complex-type tag.
pub(crate) fn dispatch(
    tool: &Tool,
    tcx: &ThreadCtx,
    mem: &dyn TargetMemory,
    state: &SyscallState,
    phase: Phase,
    arg: &ArgDesc,
    base: Addr,
    declared_len: u64,
) -> bool {
    let cx = HandlerCtx {
        tool,
        tcx,
        mem,
        state,
        phase,
        flags: arg.flags,
    };
    match arg.complex {
        Some(ComplexType::PortMessage) => cx.port_message(base, declared_len),
        Some(ComplexType::CpuContext) => cx.cpu_context(base),
        Some(ComplexType::ExceptionRecord) => cx.exception_record(base),
        Some(ComplexType::SecurityQos) => cx.security_qos(base),
        Some(ComplexType::SecurityDescriptor) => cx.security_descriptor(base),
        Some(ComplexType::CountedString) => cx.counted_string(base),
        None => false,
    }
}

struct HandlerCtx<'a> {
    tool: &'a Tool,
    tcx: &'a ThreadCtx,
    mem: &'a dyn TargetMemory,
    state: &'a SyscallState,
    phase: Phase,
    flags: ArgFlags,
}

impl HandlerCtx<'_> {
    /// Region check with this argument's phase/direction semantics.
    fn check(&self, addr: Addr, len: u64) {
        if let Some(check) = Check::for_phase(self.phase, self.flags) {
            self.check_as(check, addr, len);
        }
    }

    fn check_as(&self, check: Check, addr: Addr, len: u64) {
        self.tool.sys_check(
            self.tcx,
            self.mem,
            &self.state.regs,
            self.state.number,
            check,
            addr,
            len,
        );
    }

    fn is_write(&self) -> bool {
        self.flags.contains(ArgFlags::WRITE)
    }

    fn port_message(&self, base: Addr, declared_len: u64) -> bool {
        let header = u64::from(sizes::PORT_MESSAGE);
        let max = header + u64::from(sizes::PORT_MAXIMUM_MESSAGE_LENGTH);
        let size = if self.is_write() && self.phase == Phase::Pre {
            // Passed in uninitialized with a maximum-length buffer after the
            // header; only addressability can be required.
            max
        } else if let Some(data_len) = self.mem.read_u16(base + port_message::DATA_LENGTH) {
            let mut size = if data_len > 0 {
                self.mem
                    .read_u16(base + port_message::TOTAL_LENGTH)
                    .map(u64::from)
                    .unwrap_or(declared_len)
            } else {
                self.mem
                    .read_u32(base + port_message::LENGTH)
                    .map(u64::from)
                    .unwrap_or(declared_len)
            };
            if size > 2 * max {
                warn!(size, "port message larger than any known maximum");
                size = 2 * max;
            }
            // Optional messages arrive as fully zeroed structs; a zero size
            // means nothing beyond the header to check.
            size
        } else {
            // Unreadable prefix: presumed unaddressable at the declared size.
            declared_len
        };
        self.check(base, size.max(if size == 0 { 0 } else { header }));
        true
    }

    fn cpu_context(&self, base: Addr) -> bool {
        self.check(base + context::FLAGS, 4);
        let Some(bits) = self.mem.read_u32(base + context::FLAGS) else {
            // The flags check above already reported whatever is reportable.
            return true;
        };
        let flags = ContextFlags::from_bits_truncate(bits);
        // Integer and frame-pointer state is documented-uninitialized when a
        // thread is created, despite the control bits being set.
        let creating_thread = self
            .state
            .desc
            .is_some_and(|d| d.name == "NtCreateThread");
        if flags.contains(ContextFlags::DEBUG) {
            self.check(base + context::DR0, context::DEBUG_BYTES);
        }
        if flags.contains(ContextFlags::FLOAT) {
            self.check(base + context::FLOAT_SAVE, context::FLOAT_BYTES);
        }
        if flags.contains(ContextFlags::SEGMENTS) {
            for seg in [context::SEG_GS, context::SEG_FS, context::SEG_ES, context::SEG_DS] {
                self.check(base + seg, context::SEG_REG_BYTES);
            }
        }
        if flags.contains(ContextFlags::INTEGER) && !creating_thread {
            self.check(base + context::EDI, context::INTEGER_BYTES);
        }
        if flags.contains(ContextFlags::CONTROL) {
            if !creating_thread {
                self.check(base + context::EBP, 4);
            }
            self.check(base + context::EIP, 4);
            self.check(base + context::ESP, 4);
            self.check(base + context::EFLAGS, 4);
            self.check(base + context::SEG_CS, context::SEG_REG_BYTES);
            self.check(base + context::SEG_SS, context::SEG_REG_BYTES);
        }
        if flags.contains(ContextFlags::EXTENDED) {
            self.check(base + context::EXTENDED, context::EXTENDED_BYTES);
        }
        true
    }

    fn exception_record(&self, base: Addr) -> bool {
        self.check(base, exception_record::FIXED_PREFIX);
        if let Some(count) = self.mem.read_u32(base + exception_record::NUMBER_PARAMETERS) {
            let count = count.min(exception_record::MAX_PARAMETERS);
            self.check(
                base + exception_record::PARAMS,
                u64::from(count) * exception_record::PARAM_BYTES,
            );
        }
        true
    }

    fn security_qos(&self, base: Addr) -> bool {
        // 12 bytes on 32-bit, but the trailing padding after the two
        // booleans need not be initialized: 10 bytes matter.
        self.check(base, 10);
        true
    }

    fn security_descriptor(&self, base: Addr) -> bool {
        self.check(base, security_descriptor::HEADER_BYTES);
        if let Some(control) = self.mem.read_u16(base + security_descriptor::CONTROL) {
            if control & security_descriptor::SE_SACL_PRESENT != 0 {
                self.check(
                    base + security_descriptor::SACL,
                    security_descriptor::ACL_SLOT_BYTES,
                );
            }
            if control & security_descriptor::SE_DACL_PRESENT != 0 {
                self.check(
                    base + security_descriptor::DACL,
                    security_descriptor::ACL_SLOT_BYTES,
                );
            }
        }
        true
    }

    fn counted_string(&self, base: Addr) -> bool {
        let header = u64::from(sizes::UNICODE_STRING);
        // The header itself is an input even for out-parameters; only the
        // buffer is written.
        if self.phase == Phase::Pre {
            self.check_as(Check::Defined, base, header);
        }
        let (Some(length), Some(max_length), Some(buffer)) = (
            self.mem.read_u16(base + counted_string::LENGTH),
            self.mem.read_u16(base + counted_string::MAXIMUM_LENGTH),
            self.mem.read_ptr(base + counted_string::BUFFER),
        ) else {
            return true;
        };
        match self.phase {
            Phase::Pre => {
                self.check_as(Check::Addressable, buffer, u64::from(max_length));
                if !self.is_write() {
                    self.check_as(Check::Defined, buffer, u64::from(length));
                }
            }
            Phase::Post if self.is_write() => {
                // Re-read: the kernel updated the length.
                self.check_as(Check::MarkWritten, buffer, u64::from(length));
            }
            Phase::Post => {}
        }
        true
    }
}
