//! Static descriptor tables for the NT system-call interface (32-bit).
//!
//! Numbers are the tool's stable ordinals; the instrumentation engine maps
//! the target's raw service numbers onto them when it resolves the wrappers.
//! Sizes are the x86-32 structure sizes. A duplicate entry for a parameter
//! carries the post-call written size, per [`super::args`].

use super::args::{ArgDesc, ComplexType, SizeSpec, SyscallDesc, SyscallFlags};

/// x86-32 sizes of the kernel structures referenced by the tables.
pub mod sizes {
    pub const HANDLE: u32 = 4;
    pub const PVOID: u32 = 4;
    pub const ULONG: u32 = 4;
    pub const USHORT: u32 = 2;
    pub const BOOLEAN: u32 = 1;
    pub const ACCESS_MASK: u32 = 4;
    pub const LARGE_INTEGER: u32 = 8;
    pub const LUID: u32 = 8;
    pub const CLIENT_ID: u32 = 8;
    pub const UNICODE_STRING: u32 = 8;
    pub const OBJECT_ATTRIBUTES: u32 = 24;
    pub const IO_STATUS_BLOCK: u32 = 8;
    pub const SECURITY_QOS: u32 = 12;
    pub const SECURITY_DESCRIPTOR: u32 = 20;
    pub const GENERIC_MAPPING: u32 = 16;
    pub const PRIVILEGE_SET: u32 = 20;
    pub const PORT_MESSAGE: u32 = 24;
    /// Largest LPC payload after the header.
    pub const PORT_MAXIMUM_MESSAGE_LENGTH: u32 = 256;
    pub const PORT_VIEW: u32 = 24;
    pub const REMOTE_PORT_VIEW: u32 = 12;
    pub const USER_STACK: u32 = 20;
    pub const CONTEXT: u32 = 716;
    pub const EXCEPTION_RECORD: u32 = 80;
    pub const FILE_BASIC_INFORMATION: u32 = 40;
}

use sizes::*;

const fn b(n: u32) -> SizeSpec {
    SizeSpec::Bytes(n)
}

const fn p(k: u8) -> SizeSpec {
    SizeSpec::Param(k)
}

const fn r(param: u8, size: SizeSpec) -> ArgDesc {
    ArgDesc::read(param, size)
}

const fn w(param: u8, size: SizeSpec) -> ArgDesc {
    ArgDesc::write(param, size)
}

const fn rw(param: u8, size: SizeSpec) -> ArgDesc {
    ArgDesc::read_write(param, size)
}

const fn wi(param: u8, len_param: u8) -> ArgDesc {
    ArgDesc::write_inout(param, len_param)
}

const fn ib(param: u8) -> ArgDesc {
    ArgDesc::inlined_bool(param)
}

const fn rc(param: u8, size: SizeSpec, ty: ComplexType) -> ArgDesc {
    ArgDesc::read(param, size).with_complex(ty)
}

const fn wc(param: u8, size: SizeSpec, ty: ComplexType) -> ArgDesc {
    ArgDesc::write(param, size).with_complex(ty)
}

/// Written size comes from the `information` field of the status block in
/// parameter `iosb`.
const fn w_iostatus(param: u8, iosb: u8) -> ArgDesc {
    ArgDesc::write(param, SizeSpec::Param(iosb))
        .with_flags(super::args::ArgFlags::POST_SIZE_IO_STATUS)
}

const SMALL_WRITE_LAST: SyscallFlags = SyscallFlags::RET_SMALL_WRITE_LAST;

const fn desc(number: u32, name: &'static str, arg_count: u8, args: &'static [ArgDesc]) -> SyscallDesc {
    SyscallDesc::new(number, name, arg_count, args)
}

#[rustfmt::skip]
pub static SYSCALLS: &[SyscallDesc] = &[
    desc(0x00, "NtAcceptConnectPort", 6, &[
        w(0, b(HANDLE)),
        rc(2, b(PORT_MESSAGE), ComplexType::PortMessage),
        ib(3),
        w(4, b(PORT_VIEW)),
        w(5, b(REMOTE_PORT_VIEW)),
    ]),
    desc(0x01, "NtAccessCheck", 8, &[
        rc(0, b(SECURITY_DESCRIPTOR), ComplexType::SecurityDescriptor),
        r(3, b(GENERIC_MAPPING)),
        w(4, b(PRIVILEGE_SET)),
        r(5, b(ULONG)),
        w(6, b(ACCESS_MASK)),
        w(7, b(BOOLEAN)),
    ]),
    desc(0x02, "NtAddAtom", 3, &[
        r(0, p(1)),
        w(2, b(USHORT)),
    ]),
    desc(0x03, "NtAlertResumeThread", 2, &[w(1, b(ULONG))]),
    desc(0x04, "NtAllocateLocallyUniqueId", 1, &[w(0, b(LUID))]),
    desc(0x05, "NtAllocateVirtualMemory", 6, &[
        rw(1, b(PVOID)),
        rw(3, b(ULONG)),
    ]),
    desc(0x06, "NtApphelpCacheControl", 2, &[
        rc(1, b(UNICODE_STRING), ComplexType::CountedString),
    ]),
    desc(0x07, "NtCancelIoFile", 2, &[w(1, b(IO_STATUS_BLOCK))]),
    desc(0x08, "NtCancelTimer", 2, &[w(1, b(BOOLEAN))]),
    desc(0x09, "NtClose", 1, &[]),
    desc(0x0a, "NtConnectPort", 8, &[
        w(0, b(HANDLE)),
        rc(1, b(UNICODE_STRING), ComplexType::CountedString),
        rc(2, b(SECURITY_QOS), ComplexType::SecurityQos),
        w(3, b(PORT_VIEW)),
        w(4, b(REMOTE_PORT_VIEW)),
        w(5, b(ULONG)),
        wi(6, 7),
        rw(7, b(ULONG)),
    ]),
    desc(0x0b, "NtContinue", 2, &[
        rc(0, b(CONTEXT), ComplexType::CpuContext),
        ib(1),
    ]),
    desc(0x0c, "NtCreateEvent", 5, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        ib(4),
    ]),
    desc(0x0d, "NtCreateFile", 11, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        w(3, b(IO_STATUS_BLOCK)),
        r(4, b(LARGE_INTEGER)),
    ]),
    desc(0x0e, "NtCreateKey", 7, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        rc(4, b(UNICODE_STRING), ComplexType::CountedString),
        w(6, b(ULONG)),
    ]),
    desc(0x0f, "NtCreateMutant", 4, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        ib(3),
    ]),
    desc(0x10, "NtCreateNamedPipeFile", 14, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        w(3, b(IO_STATUS_BLOCK)),
        ib(7),
        ib(8),
        ib(9),
        r(13, b(LARGE_INTEGER)),
    ]),
    desc(0x11, "NtCreateProcess", 8, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        ib(4),
    ]),
    desc(0x12, "NtCreateSection", 7, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        r(3, b(LARGE_INTEGER)),
    ]),
    desc(0x13, "NtCreateThread", 8, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        w(4, b(CLIENT_ID)),
        rc(5, b(CONTEXT), ComplexType::CpuContext),
        r(6, b(USER_STACK)),
        ib(7),
    ]),
    desc(0x14, "NtDelayExecution", 2, &[
        ib(0),
        r(1, b(LARGE_INTEGER)),
    ]),
    desc(0x15, "NtDeviceIoControlFile", 10, &[
        w(4, b(IO_STATUS_BLOCK)),
        w(8, p(9)),
        w_iostatus(8, 4),
    ]).with_flags(SyscallFlags::IOCTL),
    desc(0x16, "NtDuplicateObject", 7, &[w(3, b(HANDLE))]),
    desc(0x17, "NtEnumerateKey", 6, &[
        w(3, p(4)),
        wi(3, 5),
        w(5, b(ULONG)),
    ]).with_flags(SMALL_WRITE_LAST),
    desc(0x18, "NtFlushBuffersFile", 2, &[w(1, b(IO_STATUS_BLOCK))]),
    desc(0x19, "NtFreeVirtualMemory", 4, &[
        rw(1, b(PVOID)),
        rw(2, b(ULONG)),
    ]),
    desc(0x1a, "NtFsControlFile", 10, &[
        w(4, b(IO_STATUS_BLOCK)),
        r(6, p(7)),
        w(8, p(9)),
        w_iostatus(8, 4),
    ]),
    desc(0x1b, "NtGetContextThread", 2, &[
        wc(1, b(CONTEXT), ComplexType::CpuContext),
    ]),
    desc(0x1c, "NtMapViewOfSection", 10, &[
        rw(2, b(PVOID)),
        w(5, b(LARGE_INTEGER)),
        rw(6, b(ULONG)),
    ]),
    desc(0x1d, "NtOpenFile", 6, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        w(3, b(IO_STATUS_BLOCK)),
    ]),
    desc(0x1e, "NtOpenKey", 3, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
    ]),
    desc(0x1f, "NtOpenProcess", 4, &[
        w(0, b(HANDLE)),
        r(2, b(OBJECT_ATTRIBUTES)),
        r(3, b(CLIENT_ID)),
    ]),
    desc(0x20, "NtOpenThreadToken", 4, &[w(3, b(HANDLE))]),
    desc(0x21, "NtProtectVirtualMemory", 5, &[
        rw(1, b(PVOID)),
        rw(2, b(ULONG)),
        w(4, b(ULONG)),
    ]),
    desc(0x22, "NtQueryAttributesFile", 2, &[
        r(0, b(OBJECT_ATTRIBUTES)),
        w(1, b(FILE_BASIC_INFORMATION)),
    ]),
    desc(0x23, "NtQueryInformationFile", 5, &[
        w(1, b(IO_STATUS_BLOCK)),
        w(2, p(3)),
        w_iostatus(2, 1),
    ]).with_flags(SMALL_WRITE_LAST),
    desc(0x24, "NtQueryInformationProcess", 5, &[
        w(2, p(3)),
        wi(2, 4),
        w(4, b(ULONG)),
    ]).with_flags(SMALL_WRITE_LAST),
    desc(0x25, "NtQueryKey", 5, &[
        w(2, p(3)),
        wi(2, 4),
        w(4, b(ULONG)),
    ]).with_flags(SMALL_WRITE_LAST),
    desc(0x26, "NtQueryObject", 5, &[
        w(2, p(3)),
        wi(2, 4),
        w(4, b(ULONG)),
    ]).with_flags(SMALL_WRITE_LAST),
    desc(0x27, "NtQueryPerformanceCounter", 2, &[
        w(0, b(LARGE_INTEGER)),
        w(1, b(LARGE_INTEGER)),
    ]),
    desc(0x28, "NtQuerySystemInformation", 4, &[
        w(1, p(2)),
        wi(1, 3),
        w(3, b(ULONG)),
    ]).with_flags(SMALL_WRITE_LAST),
    desc(0x29, "NtQueryValueKey", 6, &[
        rc(1, b(UNICODE_STRING), ComplexType::CountedString),
        w(3, p(4)),
        wi(3, 5),
        w(5, b(ULONG)),
    ]).with_flags(SMALL_WRITE_LAST),
    desc(0x2a, "NtQueryVirtualMemory", 6, &[
        w(3, p(4)),
        wi(3, 5),
        w(5, b(ULONG)),
    ]),
    desc(0x2b, "NtRaiseException", 3, &[
        rc(0, b(EXCEPTION_RECORD), ComplexType::ExceptionRecord),
        rc(1, b(CONTEXT), ComplexType::CpuContext),
        ib(2),
    ]),
    desc(0x2c, "NtReadFile", 9, &[
        w(4, b(IO_STATUS_BLOCK)),
        w(5, p(6)),
        w_iostatus(5, 4),
        r(7, b(LARGE_INTEGER)),
    ]),
    desc(0x2d, "NtReadVirtualMemory", 5, &[
        w(2, p(3)),
        wi(2, 4),
        w(4, b(ULONG)),
    ]),
    desc(0x2e, "NtRemoveIoCompletion", 5, &[
        w(1, b(PVOID)),
        w(2, b(PVOID)),
        w(3, b(IO_STATUS_BLOCK)),
        r(4, b(LARGE_INTEGER)),
    ]),
    desc(0x2f, "NtReplyWaitReceivePort", 4, &[
        w(1, b(PVOID)),
        rc(2, b(PORT_MESSAGE), ComplexType::PortMessage),
        wc(3, b(PORT_MESSAGE), ComplexType::PortMessage),
    ]),
    desc(0x30, "NtRequestWaitReplyPort", 3, &[
        rc(1, b(PORT_MESSAGE), ComplexType::PortMessage),
        wc(2, b(PORT_MESSAGE), ComplexType::PortMessage),
    ]),
    desc(0x31, "NtSetContextThread", 2, &[
        rc(1, b(CONTEXT), ComplexType::CpuContext),
    ]),
    desc(0x32, "NtSetEvent", 2, &[w(1, b(ULONG))]),
    desc(0x33, "NtSetInformationFile", 5, &[
        w(1, b(IO_STATUS_BLOCK)),
        r(2, p(3)),
    ]),
    desc(0x34, "NtSetInformationProcess", 4, &[r(2, p(3))]),
    desc(0x35, "NtSetSystemTime", 2, &[
        r(0, b(LARGE_INTEGER)),
        w(1, b(LARGE_INTEGER)),
    ]),
    desc(0x36, "NtSetValueKey", 6, &[
        rc(1, b(UNICODE_STRING), ComplexType::CountedString),
        r(4, p(5)),
    ]),
    desc(0x37, "NtTerminateProcess", 2, &[]),
    desc(0x38, "NtUnmapViewOfSection", 2, &[]),
    desc(0x39, "NtVdmControl", 2, &[
        // the VDM init service passes a NUL-terminated command line
        r(1, SizeSpec::CString),
    ]),
    desc(0x3a, "NtWaitForSingleObject", 3, &[
        ib(1),
        r(2, b(LARGE_INTEGER)),
    ]),
    desc(0x3b, "NtWriteFile", 9, &[
        w(4, b(IO_STATUS_BLOCK)),
        r(5, p(6)),
        r(7, b(LARGE_INTEGER)),
    ]),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_unique_and_dense() {
        for (i, desc) in SYSCALLS.iter().enumerate() {
            assert_eq!(i as u32, desc.number, "{} out of order", desc.name);
        }
    }

    #[test]
    fn args_stay_within_arg_count() {
        for desc in SYSCALLS {
            for arg in desc.args {
                assert!(
                    arg.param < desc.arg_count,
                    "{}: arg {} beyond count {}",
                    desc.name,
                    arg.param,
                    desc.arg_count
                );
                if let SizeSpec::Param(k) = arg.size {
                    assert!(k < desc.arg_count, "{}: size param {k} out of range", desc.name);
                }
            }
        }
    }

    #[test]
    fn duplicate_entries_follow_their_primary() {
        for desc in SYSCALLS {
            for (i, arg) in desc.args.iter().enumerate() {
                if desc.earlier_duplicate(i).is_some() {
                    assert!(
                        arg.is_write(),
                        "{}: duplicate entry for param {} must be a write",
                        desc.name,
                        arg.param
                    );
                }
            }
        }
    }
}
