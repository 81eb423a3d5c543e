//! Device-I/O-control payload inspection.
//!
//! The control code packs device, function and transfer method; the function
//! bits select a per-operation handler that knows which pieces of the input
//! buffer the driver really reads. The socket (AFD) family dominates here:
//! scatter-gather buffer arrays, variable-length socket addresses keyed on
//! address family, and info structures with partially-meaningful unions.
//! Unknown operations degrade to whole-buffer definedness.

use tracing::warn;

use super::{Check, SyscallState};
use crate::target::{Addr, TargetMemory};
use crate::thread::ThreadCtx;
use crate::tool::Tool;

/// `NtDeviceIoControlFile` parameter ordinals.
mod param {
    pub const IO_STATUS_BLOCK: u8 = 4;
    pub const CODE: u8 = 5;
    pub const INPUT_BUFFER: u8 = 6;
    pub const INPUT_LENGTH: u8 = 7;
}

/// AFD operations, decoded from the function bits of the control code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfdOp {
    Bind,
    Connect,
    StartListen,
    Accept,
    Recv,
    RecvDatagram,
    Send,
    SendDatagram,
    Select,
    Disconnect,
    GetTdiHandles,
    SetInfo,
    SetContext,
    GetInfo,
    EventSelect,
    EnumNetworkEvents,
    DeferAccept,
    Unknown(u32),
}

impl AfdOp {
    /// Operation number: function bits of the device/function/method word.
    fn from_code(code: u32) -> Self {
        match (code & 0xfff) >> 2 {
            0 => AfdOp::Bind,
            1 => AfdOp::Connect,
            2 => AfdOp::StartListen,
            4 => AfdOp::Accept,
            5 => AfdOp::Recv,
            6 => AfdOp::RecvDatagram,
            7 => AfdOp::Send,
            8 => AfdOp::SendDatagram,
            9 => AfdOp::Select,
            10 => AfdOp::Disconnect,
            13 => AfdOp::GetTdiHandles,
            14 => AfdOp::SetInfo,
            17 => AfdOp::SetContext,
            30 => AfdOp::GetInfo,
            33 => AfdOp::EventSelect,
            34 => AfdOp::EnumNetworkEvents,
            35 => AfdOp::DeferAccept,
            op => AfdOp::Unknown(op),
        }
    }
}

/// Windows address families.
mod af {
    pub const UNSPEC: u16 = 0;
    pub const INET: u16 = 2;
    pub const INET6: u16 = 23;
}

/// AFD structure layouts (x86-32).
mod layout {
    /// `AFD_INFO`: information class plus an 8-byte union.
    pub const INFO_CLASS: u64 = 0;
    pub const INFO_UNION: u64 = 4;
    pub const INFO_BLOCKING_MODE: u32 = 2;
    pub const INFO_BYTES: u64 = 12;

    /// `AFD_BIND_DATA`: share access word, then the address.
    pub const BIND_ADDRESS: u64 = 4;

    /// `AFD_CONNECT_INFO`.
    pub const CONNECT_USE_SAN: u64 = 0;
    pub const CONNECT_ROOT: u64 = 4;
    pub const CONNECT_REMOTE_ADDRESS: u64 = 12;

    /// `AFD_DISCONNECT_INFO`.
    pub const DISCONNECT_TYPE: u64 = 0;
    pub const DISCONNECT_TIMEOUT: u64 = 8;

    /// `AFD_DEFER_ACCEPT_DATA`.
    pub const DEFER_SEQUENCE: u64 = 0;
    pub const DEFER_REJECT: u64 = 4;

    /// `AFD_RECV_INFO` / `AFD_SEND_INFO` common prefix.
    pub const SG_BUFFER_ARRAY: u64 = 0;
    pub const SG_BUFFER_COUNT: u64 = 4;
    /// `AFD_RECV_INFO_UDP` address fields.
    pub const UDP_ADDRESS: u64 = 16;
    pub const UDP_ADDRESS_LENGTH: u64 = 20;

    /// `AFD_WSABUF`.
    pub const WSABUF_LEN: u64 = 0;
    pub const WSABUF_BUF: u64 = 4;
    pub const WSABUF_BYTES: u64 = 8;

    /// `AFD_POLL_INFO` and its handle array.
    pub const POLL_FIXED: u64 = 16;
    pub const POLL_HANDLE_COUNT: u64 = 8;
    pub const POLL_HANDLES: u64 = 16;
    pub const POLL_HANDLE_BYTES: u64 = 12;
    /// Events are input; the trailing status word is output.
    pub const POLL_HANDLE_IN_BYTES: u64 = 8;

    /// `AFD_LISTEN_DATA`.
    pub const LISTEN_USE_SAN: u64 = 0;
    pub const LISTEN_BACKLOG: u64 = 4;
    pub const LISTEN_DELAYED_ACCEPT: u64 = 8;

    /// `SOCKET_CONTEXT`: shared data block, then two variable-length socket
    /// addresses and the winsock helper data.
    pub const CTX_LOCAL_SIZE: u64 = 0x9c;
    pub const CTX_REMOTE_SIZE: u64 = 0xa0;
    pub const CTX_PADDING: u64 = 0xa4;
    pub const CTX_HELPER_SIZE: u64 = 0xa8;
    pub const CTX_ADDRESSES: u64 = 0xac;
}

struct IoctlCtx<'a> {
    tool: &'a Tool,
    tcx: &'a ThreadCtx,
    mem: &'a dyn TargetMemory,
    state: &'a SyscallState,
}

impl IoctlCtx<'_> {
    fn check(&self, check: Check, addr: Addr, len: u64) {
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

    fn def(&self, addr: Addr, len: u64) {
        self.check(Check::Defined, addr, len);
    }

    fn addr_ok(&self, addr: Addr, len: u64) {
        self.check(Check::Addressable, addr, len);
    }

    fn mark(&self, addr: Addr, len: u64) {
        self.check(Check::MarkWritten, addr, len);
    }

    /// Socket address: the family selects which bytes matter.
    fn sockaddr(&self, check: Check, base: Addr, len: u64) {
        if len == 0 {
            return;
        }
        self.check(check, base, 2);
        let Some(family) = self.mem.read_u16(base) else {
            return;
        };
        match family {
            // Fully zeroed sockaddrs with the family filled in later are
            // common; nothing beyond the family is required.
            af::UNSPEC => {}
            af::INET => {
                self.check(check, base + 2, 2); // port
                self.check(check, base + 4, 4); // address
            }
            af::INET6 => {
                self.check(check, base + 2, 2); // port
                self.check(check, base + 4, 4); // flow info
                self.check(check, base + 8, 16); // address
                self.check(check, base + 24, 4); // scope id
            }
            other => warn!(family = other, "unknown sockaddr family"),
        }
    }

    /// Scatter-gather array walk shared by send and recv: `count` descriptors
    /// at `array`, each naming a data buffer.
    fn wsabuf_array(&self, array: Addr, count: u32, data_check: Check) {
        self.def(array, u64::from(count) * layout::WSABUF_BYTES);
        for i in 0..u64::from(count) {
            let entry = array + i * layout::WSABUF_BYTES;
            let (Some(len), Some(buf)) = (
                self.mem.read_u32(entry + layout::WSABUF_LEN),
                self.mem.read_ptr(entry + layout::WSABUF_BUF),
            ) else {
                warn!("unreadable scatter-gather descriptor");
                break;
            };
            self.check(data_check, buf, u64::from(len));
        }
    }

    fn sg_header(&self, inbuf: Addr, insz: u64) -> Option<(Addr, u32)> {
        self.def(inbuf, insz);
        let array = self.mem.read_ptr(inbuf + layout::SG_BUFFER_ARRAY)?;
        let count = self.mem.read_u32(inbuf + layout::SG_BUFFER_COUNT)?;
        Some((array, count))
    }
}

/// Pre-call input-buffer inspection for `NtDeviceIoControlFile`.
pub(crate) fn pre(tool: &Tool, tcx: &ThreadCtx, mem: &dyn TargetMemory, state: &SyscallState) {
    let cx = IoctlCtx { tool, tcx, mem, state };
    let code = state.arg(param::CODE) as u32;
    let inbuf = state.arg(param::INPUT_BUFFER);
    let insz = state.arg(param::INPUT_LENGTH);
    if inbuf == 0 {
        return;
    }
    // Most operations need only a subset defined, but the whole declared
    // buffer must be addressable.
    cx.addr_ok(inbuf, insz);
    match AfdOp::from_code(code) {
        AfdOp::GetInfo => {
            // Only the information class is an input.
            cx.def(inbuf + layout::INFO_CLASS, 4);
        }
        AfdOp::SetInfo => {
            cx.def(inbuf + layout::INFO_CLASS, 4);
            match mem.read_u32(inbuf + layout::INFO_CLASS) {
                Some(layout::INFO_BLOCKING_MODE) => {
                    // Boolean member of the union; padding stays undefined.
                    cx.def(inbuf + layout::INFO_UNION, 1);
                }
                Some(other) => warn!(class = other, "unexpected set-info class"),
                None => warn!("unreadable set-info class"),
            }
        }
        AfdOp::Bind => {
            cx.def(inbuf, layout::BIND_ADDRESS);
            cx.sockaddr(
                Check::Defined,
                inbuf + layout::BIND_ADDRESS,
                insz.saturating_sub(layout::BIND_ADDRESS),
            );
        }
        AfdOp::Connect => {
            // Booleans are padded; check them separately.
            cx.def(inbuf + layout::CONNECT_USE_SAN, 1);
            cx.def(
                inbuf + layout::CONNECT_ROOT,
                layout::CONNECT_REMOTE_ADDRESS - layout::CONNECT_ROOT,
            );
            cx.sockaddr(
                Check::Defined,
                inbuf + layout::CONNECT_REMOTE_ADDRESS,
                insz.saturating_sub(layout::CONNECT_REMOTE_ADDRESS),
            );
        }
        AfdOp::Disconnect => {
            cx.def(inbuf + layout::DISCONNECT_TYPE, 4);
            cx.def(inbuf + layout::DISCONNECT_TIMEOUT, 8);
        }
        AfdOp::DeferAccept => {
            cx.def(inbuf + layout::DEFER_SEQUENCE, 4);
            cx.def(inbuf + layout::DEFER_REJECT, 1);
        }
        AfdOp::Recv => {
            if let Some((array, count)) = cx.sg_header(inbuf, insz) {
                cx.wsabuf_array(array, count, Check::Addressable);
            }
        }
        AfdOp::RecvDatagram => {
            if let Some((array, count)) = cx.sg_header(inbuf, insz) {
                cx.wsabuf_array(array, count, Check::Addressable);
            }
            if let (Some(address), Some(len_cell)) = (
                mem.read_ptr(inbuf + layout::UDP_ADDRESS),
                mem.read_ptr(inbuf + layout::UDP_ADDRESS_LENGTH),
            ) {
                match mem.read_u32(len_cell) {
                    Some(len) => cx.addr_ok(address, u64::from(len)),
                    None => warn!("unreadable datagram address length"),
                }
            }
        }
        AfdOp::Send | AfdOp::SendDatagram => {
            if let Some((array, count)) = cx.sg_header(inbuf, insz) {
                cx.wsabuf_array(array, count, Check::Defined);
            }
        }
        AfdOp::Select => {
            cx.def(inbuf, layout::POLL_FIXED);
            match mem.read_u32(inbuf + layout::POLL_HANDLE_COUNT) {
                Some(count)
                    if insz
                        == layout::POLL_HANDLES
                            + u64::from(count) * layout::POLL_HANDLE_BYTES =>
                {
                    for i in 0..u64::from(count) {
                        // The trailing status word of each entry is output.
                        cx.def(
                            inbuf + layout::POLL_HANDLES + i * layout::POLL_HANDLE_BYTES,
                            layout::POLL_HANDLE_IN_BYTES,
                        );
                    }
                }
                _ => warn!("unreadable or inconsistent poll info"),
            }
        }
        AfdOp::StartListen => {
            cx.def(inbuf + layout::LISTEN_USE_SAN, 1);
            cx.def(inbuf + layout::LISTEN_BACKLOG, 4);
            cx.def(inbuf + layout::LISTEN_DELAYED_ACCEPT, 1);
        }
        AfdOp::SetContext => {
            cx.def(inbuf, layout::CTX_PADDING);
            let (Some(local), Some(remote), Some(helper)) = (
                mem.read_u32(inbuf + layout::CTX_LOCAL_SIZE),
                mem.read_u32(inbuf + layout::CTX_REMOTE_SIZE),
                mem.read_u32(inbuf + layout::CTX_HELPER_SIZE),
            ) else {
                warn!("unreadable socket context sizes");
                return;
            };
            let local_at = inbuf + layout::CTX_ADDRESSES;
            cx.sockaddr(Check::Defined, local_at, u64::from(local));
            cx.sockaddr(Check::Defined, local_at + u64::from(local), u64::from(remote));
            let helper_at = local_at + u64::from(local) + u64::from(remote);
            if helper_at + u64::from(helper) > inbuf + insz {
                warn!("socket context sizes exceed the input buffer");
            } else {
                cx.def(helper_at, u64::from(helper));
            }
        }
        AfdOp::Accept | AfdOp::EventSelect | AfdOp::EnumNetworkEvents | AfdOp::GetTdiHandles => {
            cx.def(inbuf, insz);
        }
        AfdOp::Unknown(op) => {
            warn!(code, op, "unknown ioctl operation; requiring a defined buffer");
            cx.def(inbuf, insz);
        }
    }
}

/// Post-call marking for the pieces the generic output path cannot see:
/// AFD writes through pointers buried in the input buffer.
pub(crate) fn post(
    tool: &Tool,
    tcx: &ThreadCtx,
    mem: &dyn TargetMemory,
    state: &SyscallState,
    _result: i64,
) {
    let cx = IoctlCtx { tool, tcx, mem, state };
    let code = state.arg(param::CODE) as u32;
    let inbuf = state.arg(param::INPUT_BUFFER);
    if inbuf == 0 {
        return;
    }
    match AfdOp::from_code(code) {
        AfdOp::GetInfo => cx.mark(inbuf, layout::INFO_BYTES),
        AfdOp::Recv | AfdOp::RecvDatagram => {
            // Transferred byte count from the status block, spread across
            // the scatter-gather buffers in order.
            let iosb = state.arg(param::IO_STATUS_BLOCK);
            let mut remaining = u64::from(mem.read_u32(iosb + 4).unwrap_or(0));
            let (Some(array), Some(count)) = (
                mem.read_ptr(inbuf + layout::SG_BUFFER_ARRAY),
                mem.read_u32(inbuf + layout::SG_BUFFER_COUNT),
            ) else {
                return;
            };
            for i in 0..u64::from(count) {
                if remaining == 0 {
                    break;
                }
                let entry = array + i * layout::WSABUF_BYTES;
                let (Some(len), Some(buf)) = (
                    mem.read_u32(entry + layout::WSABUF_LEN),
                    mem.read_ptr(entry + layout::WSABUF_BUF),
                ) else {
                    break;
                };
                let written = remaining.min(u64::from(len));
                cx.mark(buf, written);
                remaining -= written;
            }
            if AfdOp::from_code(code) == AfdOp::RecvDatagram {
                if let (Some(address), Some(len_cell)) = (
                    mem.read_ptr(inbuf + layout::UDP_ADDRESS),
                    mem.read_ptr(inbuf + layout::UDP_ADDRESS_LENGTH),
                ) {
                    cx.mark(len_cell, 4);
                    if let Some(len) = mem.read_u32(len_cell) {
                        cx.mark(address, u64::from(len));
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::report::{ErrorKind, Output};
    use crate::shadow::ShadowState;
    use crate::syscall::SyscallRecord;
    use crate::target::{PagedMemory, RegisterFile};

    const AFD_RECV_CODE: u64 = 0x12017; // operation 5
    const AFD_BIND_CODE: u64 = 0x12003; // operation 0

    fn tool() -> (Tool, ThreadCtx) {
        let options = Options {
            use_default_suppress: false,
            ..Options::default()
        };
        let tool = Tool::new(options, Output::null()).unwrap();
        let tcx = tool.thread_init();
        (tool, tcx)
    }

    fn error_counts(tool: &Tool) -> (usize, usize) {
        let (mut unaddr, mut uninit) = (0, 0);
        tool.for_each_in_id_order(|rec| match rec.kind {
            ErrorKind::UnaddressableAccess => unaddr += rec.count as usize,
            ErrorKind::UninitializedRead => uninit += rec.count as usize,
            _ => {}
        });
        (unaddr, uninit)
    }

    fn ioctl_args(code: u64, inbuf: u64, insz: u64) -> Vec<u64> {
        // handle, event, apc, apc context, iosb, code, inbuf, inlen,
        // outbuf, outlen
        vec![3, 0, 0, 0, 0x4000, code, inbuf, insz, 0, 0]
    }

    #[test]
    fn recv_checks_descriptors_and_marks_filled_buffers() {
        let (tool, mut tcx) = tool();
        let number = tool.syscall_number("NtDeviceIoControlFile").unwrap();
        let mut mem = PagedMemory::new();
        // iosb
        tool.shadow.set_range(0x4000, 8, ShadowState::Undefined);
        // AFD_RECV_INFO: BufferArray -> 0x6100, BufferCount 2
        mem.poke_u32(0x6000, 0x6100);
        mem.poke_u32(0x6004, 2);
        tool.shadow.set_range(0x6000, 16, ShadowState::Defined);
        // two AFD_WSABUFs
        mem.poke_u32(0x6100, 4); // len
        mem.poke_u32(0x6104, 0x7000); // buf
        mem.poke_u32(0x6108, 4);
        mem.poke_u32(0x610c, 0x7100);
        tool.shadow.set_range(0x6100, 16, ShadowState::Defined);
        tool.shadow.set_range(0x7000, 4, ShadowState::Undefined);
        tool.shadow.set_range(0x7100, 4, ShadowState::Undefined);
        let args = ioctl_args(AFD_RECV_CODE, 0x6000, 16);
        let record = SyscallRecord {
            number,
            args: &args,
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((0, 0), error_counts(&tool));
        // six bytes arrive, spread across the scatter-gather list
        mem.poke_u32(0x4004, 6);
        tool.post_syscall(&mut tcx, &mem, 0);
        assert_eq!(ShadowState::Defined, tool.shadow.range_status(0x7000, 4));
        assert_eq!(ShadowState::Defined, tool.shadow.range_status(0x7100, 2));
        assert_eq!(ShadowState::Undefined, tool.shadow.get(0x7102));
        assert_eq!(ShadowState::Defined, tool.shadow.range_status(0x4000, 8));
    }

    #[test]
    fn recv_with_unaddressable_data_buffer_reports() {
        let (tool, mut tcx) = tool();
        let number = tool.syscall_number("NtDeviceIoControlFile").unwrap();
        let mut mem = PagedMemory::new();
        tool.shadow.set_range(0x4000, 8, ShadowState::Undefined);
        mem.poke_u32(0x6000, 0x6100);
        mem.poke_u32(0x6004, 1);
        tool.shadow.set_range(0x6000, 16, ShadowState::Defined);
        mem.poke_u32(0x6100, 8);
        mem.poke_u32(0x6104, 0x9000); // never allocated
        tool.shadow.set_range(0x6100, 8, ShadowState::Defined);
        let args = ioctl_args(AFD_RECV_CODE, 0x6000, 16);
        let record = SyscallRecord {
            number,
            args: &args,
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((1, 0), error_counts(&tool));
    }

    #[test]
    fn bind_checks_the_sockaddr_by_family() {
        let (tool, mut tcx) = tool();
        let number = tool.syscall_number("NtDeviceIoControlFile").unwrap();
        let mut mem = PagedMemory::new();
        tool.shadow.set_range(0x4000, 8, ShadowState::Undefined);
        // AFD_BIND_DATA: share word, then sockaddr_in
        mem.poke_u16(0x6004, 2); // AF_INET
        tool.shadow.set_range(0x6000, 16, ShadowState::Undefined);
        tool.shadow.set_range(0x6000, 4, ShadowState::Defined); // share
        tool.shadow.set_range(0x6004, 2, ShadowState::Defined); // family
        tool.shadow.set_range(0x6006, 2, ShadowState::Defined); // port
        tool.shadow.set_range(0x6008, 4, ShadowState::Defined); // address
        let args = ioctl_args(AFD_BIND_CODE, 0x6000, 16);
        let record = SyscallRecord {
            number,
            args: &args,
            param_base: 0,
            regs: RegisterFile::default(),
        };
        tool.pre_syscall(&mut tcx, &mem, &record);
        // trailing sockaddr padding may stay undefined
        assert_eq!((0, 0), error_counts(&tool));
        // an undefined port is caught
        tool.shadow.set_range(0x6006, 2, ShadowState::Undefined);
        tool.pre_syscall(&mut tcx, &mem, &record);
        assert_eq!((0, 1), error_counts(&tool));
    }
}
