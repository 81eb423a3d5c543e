//! Packed callstacks: capture, intern, hash, compare, render.
//!
//! Stacks live out-of-line in a refcounted intern pool and are addressed by
//! integer handles, so hashing and equality never chase pointers. The walker
//! follows frame pointers through [`TargetMemory`], falling back to a bounded
//! forward scan of the stack when a frame chain breaks.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Mutex, RwLock};

use derive_new::new as New;
use smallvec::SmallVec;

use crate::target::{Addr, RegisterFile, TargetMemory};

/// A loaded module of the target.
#[derive(Debug, Clone, New)]
pub struct Module {
    pub base: Addr,
    pub end: Addr,
    pub name: String,
}

/// Registry of loaded modules, fed by the instrumentation engine's
/// module-load events.
#[derive(Debug, Default)]
pub struct ModuleTable {
    modules: RwLock<Vec<Module>>,
}

impl ModuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, base: Addr, size: u64, name: &str) {
        let mut modules = self.modules.write().unwrap();
        modules.push(Module::new(base, base + size, name.to_owned()));
    }

    /// Module index and offset for a code address.
    pub fn find(&self, pc: Addr) -> Option<(u16, u64)> {
        let modules = self.modules.read().unwrap();
        modules
            .iter()
            .position(|m| (m.base..m.end).contains(&pc))
            .map(|idx| (idx as u16, pc - modules[idx].base))
    }

    pub fn name(&self, idx: u16) -> Option<String> {
        let modules = self.modules.read().unwrap();
        modules.get(idx as usize).map(|m| m.name.clone())
    }
}

/// Symbolization capability. The core only consumes it; a real provider sits
/// outside this crate.
pub trait SymbolSource {
    fn lookup(&self, module: &str, offset: u64) -> Option<SymbolInfo>;
}

#[derive(Debug, Clone)]
pub struct SymbolInfo {
    pub symbol: String,
    /// Offset of the address within the symbol.
    pub offset: u64,
    pub file: Option<String>,
    pub line: u32,
}

/// One packed frame. Module-relative where possible so renders are stable
/// across runs with identical module layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frame {
    Module { module: u16, offset: u32 },
    Absolute { pc: u32 },
    Syscall { number: u32 },
}

/// Handle into the intern pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackId(u32);

type FrameVec = SmallVec<[Frame; 8]>;

#[derive(Debug)]
struct Entry {
    frames: Box<[Frame]>,
    hash: u64,
    refs: u32,
}

#[derive(Debug, Default)]
struct PoolInner {
    entries: Vec<Option<Entry>>,
    free: Vec<u32>,
    index: HashMap<u64, SmallVec<[u32; 2]>, ahash::RandomState>,
}

/// Growable intern pool of packed callstacks.
#[derive(Debug, Default)]
pub struct CallstackPool {
    inner: Mutex<PoolInner>,
}

fn hash_frames(frames: &[Frame]) -> u64 {
    // FNV-1a over the frame words.
    let mut h = 0xcbf2_9ce4_8422_2325u64;
    let mut mix = |v: u64| {
        for byte in v.to_le_bytes() {
            h ^= u64::from(byte);
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
    };
    for frame in frames {
        match *frame {
            Frame::Module { module, offset } => mix(1 << 48 | u64::from(module) << 32 | u64::from(offset)),
            Frame::Absolute { pc } => mix(2 << 48 | u64::from(pc)),
            Frame::Syscall { number } => mix(3 << 48 | u64::from(number)),
        }
    }
    h
}

impl CallstackPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `frames`, returning a handle holding one reference. Identical
    /// stacks always intern to the same handle.
    pub fn intern(&self, frames: &[Frame]) -> StackId {
        let hash = hash_frames(frames);
        let mut inner = self.inner.lock().unwrap();
        let existing = inner.index.get(&hash).and_then(|candidates| {
            candidates.iter().copied().find(|&slot| {
                inner.entries[slot as usize]
                    .as_ref()
                    .is_some_and(|entry| *entry.frames == *frames)
            })
        });
        if let Some(slot) = existing {
            inner.entries[slot as usize]
                .as_mut()
                .expect("indexed slot is live")
                .refs += 1;
            return StackId(slot);
        }
        let entry = Entry {
            frames: frames.into(),
            hash,
            refs: 1,
        };
        let slot = match inner.free.pop() {
            Some(slot) => {
                inner.entries[slot as usize] = Some(entry);
                slot
            }
            None => {
                inner.entries.push(Some(entry));
                (inner.entries.len() - 1) as u32
            }
        };
        inner.index.entry(hash).or_default().push(slot);
        StackId(slot)
    }

    pub fn clone_ref(&self, id: StackId) -> StackId {
        let mut inner = self.inner.lock().unwrap();
        inner.entries[id.0 as usize]
            .as_mut()
            .expect("live handle")
            .refs += 1;
        id
    }

    /// Drops one reference; the slot is recycled when the count hits zero.
    pub fn release(&self, id: StackId) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entries[id.0 as usize].as_mut().expect("live handle");
        entry.refs -= 1;
        if entry.refs == 0 {
            let hash = entry.hash;
            inner.entries[id.0 as usize] = None;
            if let Some(candidates) = inner.index.get_mut(&hash) {
                candidates.retain(|slot| *slot != id.0);
                if candidates.is_empty() {
                    inner.index.remove(&hash);
                }
            }
            inner.free.push(id.0);
        }
    }

    pub fn hash(&self, id: StackId) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.entries[id.0 as usize].as_ref().expect("live handle").hash
    }

    /// Structural, frame-by-frame equality. Interning makes this equivalent
    /// to handle equality for handles from the same pool.
    pub fn eq(&self, a: StackId, b: StackId) -> bool {
        if a == b {
            return true;
        }
        let inner = self.inner.lock().unwrap();
        let ea = inner.entries[a.0 as usize].as_ref().expect("live handle");
        let eb = inner.entries[b.0 as usize].as_ref().expect("live handle");
        ea.frames == eb.frames
    }

    pub fn frames(&self, id: StackId) -> FrameVec {
        let inner = self.inner.lock().unwrap();
        inner.entries[id.0 as usize]
            .as_ref()
            .expect("live handle")
            .frames
            .iter()
            .copied()
            .collect()
    }

    /// Renders the stack, one frame per line:
    /// `# 0 <mod+0xHEX> mod!symbol+0xOFF (file:line)` with symbols,
    /// `# 0 <mod+0xHEX>` without, `# 0 system call #N` for syscall frames.
    pub fn render(
        &self,
        id: StackId,
        modules: &ModuleTable,
        symbols: Option<&dyn SymbolSource>,
    ) -> String {
        let frames = self.frames(id);
        let mut out = String::new();
        for (i, frame) in frames.iter().enumerate() {
            match *frame {
                Frame::Syscall { number } => {
                    let _ = writeln!(out, "#{i:2} system call #{number}");
                }
                Frame::Absolute { .. } => {
                    let _ = writeln!(out, "#{i:2} <not in a module>");
                }
                Frame::Module { module, offset } => {
                    let name = modules.name(module).unwrap_or_default();
                    let _ = write!(out, "#{i:2} <{name}+0x{offset:x}>");
                    if let Some(info) =
                        symbols.and_then(|s| s.lookup(&name, u64::from(offset)))
                    {
                        let _ = write!(out, " {name}!{}+0x{:x}", info.symbol, info.offset);
                        if let Some(file) = &info.file {
                            let _ = write!(out, " ({file}:{})", info.line);
                        }
                    }
                    out.push('\n');
                }
            }
        }
        out
    }
}

/// Frame-pointer walker with a bounded scan fallback.
#[derive(Debug, Clone)]
pub struct StackWalker {
    pub max_frames: usize,
    /// A frame-pointer jump larger than this is treated as a switch to a
    /// different stack segment, terminating the walk.
    pub swap_threshold: u32,
    /// Forward-scan budget in bytes when the frame chain breaks.
    pub scan_limit: u32,
}

impl Default for StackWalker {
    fn default() -> Self {
        StackWalker {
            max_frames: 20,
            swap_threshold: 0x9000,
            scan_limit: 4096,
        }
    }
}

/// Where a capture originates.
#[derive(Debug, Clone, Copy)]
pub enum Location {
    Pc(u32),
    Syscall(u32),
}

impl StackWalker {
    /// Records the current callstack and interns it, returning a handle with
    /// one reference. Walk failures truncate the stack; the first frame is
    /// always present.
    pub fn capture(
        &self,
        mem: &dyn TargetMemory,
        modules: &ModuleTable,
        pool: &CallstackPool,
        regs: &RegisterFile,
        loc: Location,
    ) -> StackId {
        let mut frames = FrameVec::new();
        match loc {
            Location::Syscall(number) => frames.push(Frame::Syscall { number }),
            Location::Pc(pc) => frames.push(frame_for_pc(modules, pc)),
        }
        let mut fp = u64::from(regs.ebp);
        while frames.len() < self.max_frames {
            if fp == 0 {
                break;
            }
            let (next_fp, ret) = match (mem.read_u32(fp), mem.read_u32(fp + 4)) {
                (Some(next_fp), Some(ret)) => (next_fp, ret),
                _ => {
                    self.scan_for_frames(mem, modules, fp, &mut frames);
                    break;
                }
            };
            if ret == 0 {
                self.scan_for_frames(mem, modules, fp, &mut frames);
                break;
            }
            frames.push(frame_for_pc(modules, ret));
            let Some(delta) = u64::from(next_fp).checked_sub(fp) else {
                break; // walked off the top, or no progress
            };
            if delta == 0 || delta > u64::from(self.swap_threshold) {
                break; // stack swap: treat as the terminal frame
            }
            fp = u64::from(next_fp);
        }
        pool.intern(&frames)
    }

    /// Frameless-code fallback: scan pointer-sized slots forward from `start`
    /// for values inside a loaded module, up to the scan budget.
    fn scan_for_frames(
        &self,
        mem: &dyn TargetMemory,
        modules: &ModuleTable,
        start: Addr,
        frames: &mut FrameVec,
    ) {
        let mut offset = 0u64;
        while offset < u64::from(self.scan_limit) && frames.len() < self.max_frames {
            match mem.read_u32(start + offset) {
                Some(word) if modules.find(u64::from(word)).is_some() => {
                    frames.push(frame_for_pc(modules, word));
                }
                Some(_) => {}
                None => break,
            }
            offset += 4;
        }
    }
}

fn frame_for_pc(modules: &ModuleTable, pc: u32) -> Frame {
    match modules.find(u64::from(pc)) {
        Some((module, offset)) => Frame::Module {
            module,
            offset: offset as u32,
        },
        None => Frame::Absolute { pc },
    }
}
