//! Recorded instrumentation-event traces.
//!
//! A trace is JSON lines, one event per line, in the order the
//! instrumentation engine observed them. Replaying a trace through a
//! [`Tool`] exercises the full detection pipeline without the engine; the
//! CLI harness and the integration tests are built on this.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::options::Options;
use crate::report::{LeakReport, Output};
use crate::target::{Addr, PagedMemory, Register, RegisterFile};
use crate::thread::ThreadCtx;
use crate::tool::{LoadMode, StoreSource, Tool, ToolError};
use crate::syscall::SyscallRecord;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("trace line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },
    #[error("reading trace")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// One recorded instrumentation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "ev", rename_all = "snake_case")]
pub enum TraceEvent {
    /// Module load.
    Module { base: Addr, size: u64, name: String },
    /// The engine reached the application entry point.
    AppStart,
    /// Raw bytes materialized in the target image (no shadow effect).
    Poke {
        addr: Addr,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    Alloc { base: Addr, size: u64, #[serde(default)] regs: RegisterFile },
    Free { base: Addr, #[serde(default)] regs: RegisterFile },
    Realloc {
        old: Addr,
        new: Addr,
        size: u64,
        #[serde(default)]
        regs: RegisterFile,
    },
    Load {
        addr: Addr,
        size: u64,
        #[serde(default)]
        reg: Option<Register>,
        /// Copy toward a write-only destination (no definedness check).
        #[serde(default)]
        copy: bool,
        #[serde(default)]
        regs: RegisterFile,
    },
    Store {
        addr: Addr,
        size: u64,
        #[serde(default)]
        reg: Option<Register>,
        #[serde(default)]
        regs: RegisterFile,
    },
    Syscall {
        number: u32,
        #[serde(default)]
        args: Vec<u64>,
        result: i64,
        #[serde(default)]
        param_base: Addr,
        #[serde(default)]
        regs: RegisterFile,
        /// Bytes the kernel deposited, applied between the pre and post
        /// phases.
        #[serde(default)]
        writes: Vec<KernelWrite>,
    },
    /// Report every live heap chunk as leaked, the way the reachability
    /// scanner would at exit.
    LeakScan,
    Fork,
}

/// One region the kernel wrote during a recorded syscall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelWrite {
    pub addr: Addr,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        let mut text = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            text.push_str(&format!("{b:02x}"));
        }
        ser.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(de)?;
        if text.len() % 2 != 0 {
            return Err(D::Error::custom("odd hex length"));
        }
        (0..text.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&text[i..i + 2], 16).map_err(D::Error::custom))
            .collect()
    }
}

/// Replay statistics for the harness.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ReplayStats {
    pub events: u64,
    pub syscalls: u64,
    pub unique_errors: u32,
}

/// Drives a [`Tool`] from a trace.
#[derive(Debug)]
pub struct Replayer {
    tool: Tool,
    mem: PagedMemory,
    tcx: ThreadCtx,
    stats: ReplayStats,
}

impl Replayer {
    pub fn new(options: Options, output: Output) -> Result<Self, ToolError> {
        Ok(Self::with_tool(Tool::new(options, output)?))
    }

    pub fn with_tool(tool: Tool) -> Self {
        let tcx = tool.thread_init();
        Replayer {
            tool,
            mem: PagedMemory::new(),
            tcx,
            stats: ReplayStats::default(),
        }
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn apply(&mut self, event: TraceEvent) {
        self.stats.events += 1;
        match event {
            TraceEvent::Module { base, size, name } => {
                self.tool.on_module_load(base, size, &name);
            }
            TraceEvent::AppStart => self.tool.on_app_start(),
            TraceEvent::Poke { addr, data } => self.mem.poke(addr, &data),
            TraceEvent::Alloc { base, size, regs } => {
                self.mem.map(base, size);
                self.tool.on_alloc(&mut self.tcx, &self.mem, &regs, base, size);
            }
            TraceEvent::Free { base, regs } => {
                self.tool.on_free(&mut self.tcx, &self.mem, &regs, base);
            }
            TraceEvent::Realloc { old, new, size, regs } => {
                self.mem.map(new, size);
                self.tool
                    .on_realloc(&mut self.tcx, &self.mem, &regs, old, new, size);
            }
            TraceEvent::Load { addr, size, reg, copy, regs } => {
                let mode = if copy { LoadMode::Move } else { LoadMode::Value };
                self.tool
                    .on_load(&mut self.tcx, &self.mem, &regs, addr, size, reg, mode);
            }
            TraceEvent::Store { addr, size, reg, regs } => {
                let src = match reg {
                    Some(reg) => StoreSource::Reg(reg),
                    None => StoreSource::Immediate,
                };
                self.tool
                    .on_store(&mut self.tcx, &self.mem, &regs, addr, size, src);
            }
            TraceEvent::Syscall { number, args, result, param_base, regs, writes } => {
                self.stats.syscalls += 1;
                let record = SyscallRecord {
                    number,
                    args: &args,
                    param_base,
                    regs,
                };
                self.tool.pre_syscall(&mut self.tcx, &self.mem, &record);
                for write in &writes {
                    self.mem.poke(write.addr, &write.data);
                }
                self.tool.post_syscall(&mut self.tcx, &self.mem, result);
            }
            TraceEvent::LeakScan => {
                debug!("leak scan over live chunks");
                let mut leaks = Vec::new();
                self.tool.heap.for_each_live(|chunk| {
                    leaks.push(LeakReport {
                        bytes: chunk.size(),
                        indirect_bytes: 0,
                        stack: chunk.alloc_stack,
                        possible: false,
                        reachable: false,
                        early: chunk.flags.contains(crate::heap::ChunkFlags::PRE_US),
                    });
                });
                for leak in leaks {
                    self.tool.report_leak(&self.tcx, &leak);
                }
            }
            TraceEvent::Fork => self.tool.fork_child_reinit(),
        }
    }

    /// Replays a whole JSON-lines trace and emits the exit summary.
    pub fn run(&mut self, reader: impl BufRead) -> Result<ReplayStats, ReplayError> {
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: TraceEvent = serde_json::from_str(&line)
                .map_err(|source| ReplayError::Malformed { line: index + 1, source })?;
            self.apply(event);
        }
        let mut max_id = 0;
        self.tool.for_each_in_id_order(|rec| max_id = max_id.max(rec.id));
        self.stats.unique_errors = max_id;
        self.tool.exit_summary();
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SharedBuf;

    fn buffered_replayer() -> (Replayer, SharedBuf, SharedBuf) {
        let (output, results, log, _suggested) = Output::buffered();
        let options = Options {
            use_default_suppress: false,
            ..Options::default()
        };
        (Replayer::new(options, output).unwrap(), results, log)
    }

    #[test]
    fn trace_roundtrips_through_serde() {
        let event = TraceEvent::Poke {
            addr: 0x1000,
            data: vec![0xde, 0xad],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"dead\""), "json was: {json}");
        let back: TraceEvent = serde_json::from_str(&json).unwrap();
        match back {
            TraceEvent::Poke { addr, data } => {
                assert_eq!(0x1000, addr);
                assert_eq!(vec![0xde, 0xad], data);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn heap_overflow_trace_reports_and_summarizes() {
        let (mut replayer, results, _log) = buffered_replayer();
        let trace = r#"
{"ev":"module","base":4194304,"size":65536,"name":"app.exe"}
{"ev":"app_start"}
{"ev":"alloc","base":4096,"size":16,"regs":{"eip":4194560}}
{"ev":"store","addr":4112,"size":1,"regs":{"eip":4194564}}
{"ev":"leak_scan"}
"#;
        let stats = replayer.run(trace.as_bytes()).unwrap();
        assert_eq!(5, stats.events);
        let text = results.contents();
        assert!(
            text.contains("UNADDRESSABLE ACCESS: writing 0x00001010-0x00001011 1 byte(s)"),
            "results were: {text}"
        );
        // the still-live chunk turns up as a leak
        assert!(text.contains("LEAK: 16 direct byte(s)"), "results were: {text}");
        assert!(text.contains("FINAL SUMMARY:"), "results were: {text}");
    }

    #[test]
    fn malformed_line_is_located() {
        let (mut replayer, _results, _log) = buffered_replayer();
        let err = replayer
            .run("{\"ev\":\"app_start\"}\nnot json\n".as_bytes())
            .unwrap_err();
        match err {
            ReplayError::Malformed { line, .. } => assert_eq!(2, line),
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn syscall_event_runs_both_phases() {
        let (mut replayer, results, _log) = buffered_replayer();
        let number = replayer.tool().syscall_number("NtReadFile").unwrap();
        // buffer of 8 bytes at 0x5000, length 8, iosb at 0x4000
        let trace = vec![
            TraceEvent::Module { base: 0x0040_0000, size: 0x1_0000, name: "app.exe".into() },
            TraceEvent::Alloc { base: 0x5000, size: 8, regs: RegisterFile::at_pc(0x0040_1000) },
            TraceEvent::Alloc { base: 0x4000, size: 8, regs: RegisterFile::at_pc(0x0040_1004) },
            TraceEvent::Syscall {
                number,
                args: vec![3, 0, 0, 0, 0x4000, 0x5000, 8, 0, 0],
                result: 0,
                param_base: 0,
                regs: RegisterFile::at_pc(0x0040_1008),
                // the kernel fills the iosb: status 0, information 8
                writes: vec![KernelWrite { addr: 0x4000, data: vec![0, 0, 0, 0, 8, 0, 0, 0] }],
            },
        ];
        for event in trace {
            replayer.apply(event);
        }
        assert_eq!(
            crate::shadow::ShadowState::Defined,
            replayer.tool().shadow.range_status(0x5000, 8)
        );
        assert_eq!("", results.contents());
    }
}
