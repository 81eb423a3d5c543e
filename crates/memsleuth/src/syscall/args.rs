//! System-call argument descriptors.
//!
//! A [`SyscallDesc`] is a static schema: one [`ArgDesc`] per non-inlined
//! parameter, giving its direction, how to compute its length, and whether a
//! specialised handler must traverse the pointee. The actual size of a write
//! that can differ from the requested size is encoded as a second entry for
//! the same parameter whose [`SizeSpec`] names the post-call source.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArgFlags: u32 {
        const READ                = 1 << 0;
        const WRITE               = 1 << 1;
        /// Pointee has unions, optional substructures or padding; dispatch
        /// to the per-type handler.
        const COMPLEX_TYPE        = 1 << 2;
        /// The size parameter points at a status block; the written length
        /// is its `information` field.
        const POST_SIZE_IO_STATUS = 1 << 3;
        /// The size parameter is a pointer to an in/out length cell.
        const LENGTH_INOUT        = 1 << 5;
        /// The size is in elements; the element size rides in [`ArgDesc::elem`].
        const SIZE_IN_ELEMENTS    = 1 << 6;
        /// Entire value lives in the parameter slot as a boolean; only its
        /// low byte must be defined.
        const INLINED_BOOL        = 1 << 7;
        /// For a return-value-sized duplicate entry: nothing is written when
        /// the count parameter of the first entry is zero.
        const NO_WRITE_IF_COUNT_0 = 1 << 8;
        /// Dereferenced length cells are 8 bytes wide, not 4.
        const POST_SIZE_8BYTES    = 1 << 9;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyscallFlags: u32 {
        /// Every parameter is described; no memory-compare fallback needed.
        const ALL_PARAMS_KNOWN     = 1 << 0;
        /// The call failed only when the result is zero.
        const RET_ZERO_FAIL        = 1 << 1;
        /// The call failed only when the result is -1.
        const RET_MINUS1_FAIL      = 1 << 2;
        /// Buffer-too-small/overflow/length-mismatch statuses still write
        /// the final argument.
        const RET_SMALL_WRITE_LAST = 1 << 3;
        /// Route through the device-I/O-control payload dispatcher.
        const IOCTL                = 1 << 4;
    }
}

/// How to compute an argument's byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    /// Literal byte count.
    Bytes(u32),
    /// The value of parameter `k` (or, with `LENGTH_INOUT`, the 4- or 8-byte
    /// cell parameter `k` points at).
    Param(u8),
    /// NUL-terminated: the pointee's byte length up to and including the
    /// terminator, found by scanning.
    CString,
    /// The syscall's numeric return value (post-call only).
    Retval,
    /// A 4-byte size field at this offset inside the pointee.
    InField(u16),
}

/// Structurally complex pointee types with dedicated handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexType {
    /// Variable-length LPC message: header plus a payload whose real length
    /// sits in the header.
    PortMessage,
    /// Machine context whose control bitmap selects register blocks.
    CpuContext,
    /// Fixed prefix plus a counted trailing parameter array.
    ExceptionRecord,
    /// 12-byte struct of which only the first 10 bytes must be defined.
    SecurityQos,
    /// Header plus SACL/DACL slots gated on the control word.
    SecurityDescriptor,
    /// Counted string header with a separately-sized buffer pointer.
    CountedString,
}

#[derive(Debug, Clone, Copy)]
pub struct ArgDesc {
    /// Ordinal of the parameter this entry describes.
    pub param: u8,
    pub size: SizeSpec,
    pub flags: ArgFlags,
    pub complex: Option<ComplexType>,
    /// Element size when `SIZE_IN_ELEMENTS` is set.
    pub elem: Option<SizeSpec>,
}

impl ArgDesc {
    const fn new(param: u8, size: SizeSpec, flags: ArgFlags) -> Self {
        ArgDesc {
            param,
            size,
            flags,
            complex: None,
            elem: None,
        }
    }

    pub const fn read(param: u8, size: SizeSpec) -> Self {
        Self::new(param, size, ArgFlags::READ)
    }

    pub const fn write(param: u8, size: SizeSpec) -> Self {
        Self::new(param, size, ArgFlags::WRITE)
    }

    pub const fn read_write(param: u8, size: SizeSpec) -> Self {
        Self::new(param, size, ArgFlags::READ.union(ArgFlags::WRITE))
    }

    /// "WI" in the tables: a write whose capacity lives in the in/out length
    /// cell that parameter `k` points at.
    pub const fn write_inout(param: u8, len_param: u8) -> Self {
        Self::new(
            param,
            SizeSpec::Param(len_param),
            ArgFlags::WRITE.union(ArgFlags::LENGTH_INOUT),
        )
    }

    /// "IB" in the tables: an inlined boolean parameter.
    pub const fn inlined_bool(param: u8) -> Self {
        Self::new(param, SizeSpec::Bytes(0), ArgFlags::INLINED_BOOL)
    }

    /// Duplicate entry giving the post-call written size as the return value.
    pub const fn post_retval(param: u8) -> Self {
        Self::new(param, SizeSpec::Retval, ArgFlags::WRITE)
    }

    pub const fn with_complex(mut self, ty: ComplexType) -> Self {
        self.complex = Some(ty);
        self.flags = self.flags.union(ArgFlags::COMPLEX_TYPE);
        self
    }

    pub const fn with_flags(mut self, extra: ArgFlags) -> Self {
        self.flags = self.flags.union(extra);
        self
    }

    pub const fn in_elements(mut self, elem: SizeSpec) -> Self {
        self.elem = Some(elem);
        self.flags = self.flags.union(ArgFlags::SIZE_IN_ELEMENTS);
        self
    }

    pub fn is_read(&self) -> bool {
        self.flags.contains(ArgFlags::READ)
    }

    pub fn is_write(&self) -> bool {
        self.flags.contains(ArgFlags::WRITE)
    }
}

/// Static schema of one system call.
#[derive(Debug, Clone, Copy)]
pub struct SyscallDesc {
    pub number: u32,
    pub name: &'static str,
    pub flags: SyscallFlags,
    /// Total parameter count, inlined parameters included.
    pub arg_count: u8,
    /// Non-inlined (and inlined-boolean) parameters.
    pub args: &'static [ArgDesc],
}

impl SyscallDesc {
    pub const fn new(
        number: u32,
        name: &'static str,
        arg_count: u8,
        args: &'static [ArgDesc],
    ) -> Self {
        SyscallDesc {
            number,
            name,
            flags: SyscallFlags::empty(),
            arg_count,
            args,
        }
    }

    pub const fn with_flags(mut self, flags: SyscallFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether a later entry describes the same parameter (the earlier entry
    /// then only provides the pre-call capacity).
    pub fn has_later_duplicate(&self, index: usize) -> bool {
        let param = self.args[index].param;
        self.args[index + 1..].iter().any(|a| a.param == param)
    }

    /// The earlier sibling entry for the same parameter, if any.
    pub fn earlier_duplicate(&self, index: usize) -> Option<&ArgDesc> {
        let param = self.args[index].param;
        self.args[..index].iter().find(|a| a.param == param)
    }

    /// Ordinal of the syscall's final written parameter.
    pub fn last_write_param(&self) -> Option<u8> {
        self.args
            .iter()
            .filter(|a| a.is_write())
            .map(|a| a.param)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_entries_resolve() {
        static ARGS: &[ArgDesc] = &[
            ArgDesc::read(1, SizeSpec::Bytes(4)),
            ArgDesc::write(0, SizeSpec::Param(1)),
            ArgDesc::post_retval(0).with_flags(ArgFlags::NO_WRITE_IF_COUNT_0),
        ];
        let desc = SyscallDesc::new(7, "NtExample", 2, ARGS);
        assert!(desc.has_later_duplicate(1));
        assert!(!desc.has_later_duplicate(2));
        assert_eq!(0, desc.earlier_duplicate(2).unwrap().param);
        assert_eq!(Some(0), desc.last_write_param());
    }
}
