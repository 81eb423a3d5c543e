//! Live-chunk map and delayed-free queue.
//!
//! The map answers two kinds of query: exact lookup by allocation base (the
//! common case, hashed) and enclosing-chunk search by interior address (an
//! ordered interval index). Freed chunks linger on a FIFO with a byte budget,
//! staying unaddressable over a bounded window so use-after-free still finds
//! the chunk it hit.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::RwLock;

use bitflags::bitflags;

use crate::callstack::StackId;
use crate::target::Addr;

/// Heap allocator chunk alignment used when probing candidate bases.
pub const CHUNK_ALIGN: u64 = 8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChunkFlags: u8 {
        /// Allocated before instrumentation reached the application entry
        /// point (candidate for `ignore_early_leaks`).
        const PRE_US = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    Live,
    /// On the delayed-free queue; still unaddressable and still findable.
    PendingFree,
}

#[derive(Debug, Clone)]
pub struct HeapChunk {
    pub start: Addr,
    pub end: Addr,
    pub flags: ChunkFlags,
    pub status: ChunkStatus,
    pub alloc_stack: Option<StackId>,
    pub user_data: u64,
}

impl HeapChunk {
    pub fn size(&self) -> u64 {
        self.end - self.start
    }
}

#[derive(Debug, Default)]
struct HeapInner {
    by_base: HashMap<Addr, HeapChunk, ahash::RandomState>,
    /// start -> end for every tracked chunk, live or pending free.
    intervals: BTreeMap<Addr, Addr>,
    delay: VecDeque<Addr>,
    delay_bytes: u64,
}

/// Reader-writer chunk map: many concurrent lookups, serialized updates.
#[derive(Debug)]
pub struct HeapMap {
    inner: RwLock<HeapInner>,
    delay_budget: u64,
}

/// Outcome of [`HeapMap::begin_free`].
#[derive(Debug)]
pub enum FreeOutcome {
    /// The base named a live chunk; it is now pending free. Evicted chunks
    /// fell off the delay queue and their stack references are the caller's
    /// to release.
    Freed {
        start: Addr,
        end: Addr,
        evicted: Vec<HeapChunk>,
    },
    /// Not the base of any live chunk.
    NotLive,
}

impl HeapMap {
    pub fn new(delay_budget: u64) -> Self {
        HeapMap {
            inner: RwLock::new(HeapInner::default()),
            delay_budget,
        }
    }

    pub fn insert_live(
        &self,
        start: Addr,
        size: u64,
        flags: ChunkFlags,
        alloc_stack: Option<StackId>,
    ) {
        let mut inner = self.inner.write().unwrap();
        inner.intervals.insert(start, start + size);
        inner.by_base.insert(
            start,
            HeapChunk {
                start,
                end: start + size,
                flags,
                status: ChunkStatus::Live,
                alloc_stack,
                user_data: 0,
            },
        );
    }

    /// Size of the live chunk based exactly at `base`.
    pub fn live_size(&self, base: Addr) -> Option<u64> {
        let inner = self.inner.read().unwrap();
        inner
            .by_base
            .get(&base)
            .filter(|c| c.status == ChunkStatus::Live)
            .map(HeapChunk::size)
    }

    /// Size and status of the chunk based at `base`, pending-free included.
    pub fn size_including_invalid(&self, base: Addr) -> Option<(u64, ChunkStatus)> {
        let inner = self.inner.read().unwrap();
        inner.by_base.get(&base).map(|c| (c.size(), c.status))
    }

    /// The chunk whose extent contains `addr`, if any.
    pub fn enclosing(&self, addr: Addr) -> Option<HeapChunk> {
        let inner = self.inner.read().unwrap();
        let (&start, &end) = inner.intervals.range(..=addr).next_back()?;
        if addr >= end {
            return None;
        }
        inner.by_base.get(&start).cloned()
    }

    /// Any tracked delayed-free chunk overlapping `[lo, hi)`.
    pub fn overlaps_delayed_free(&self, lo: Addr, hi: Addr) -> Option<(Addr, Addr)> {
        let inner = self.inner.read().unwrap();
        for &base in &inner.delay {
            if let Some(chunk) = inner.by_base.get(&base) {
                if chunk.start < hi && lo < chunk.end {
                    return Some((chunk.start, chunk.end));
                }
            }
        }
        None
    }

    /// Moves the chunk at `base` onto the delayed-free queue and evicts past
    /// the byte budget.
    pub fn begin_free(&self, base: Addr) -> FreeOutcome {
        let mut inner = self.inner.write().unwrap();
        let size = match inner.by_base.get_mut(&base) {
            Some(chunk) if chunk.status == ChunkStatus::Live => {
                chunk.status = ChunkStatus::PendingFree;
                chunk.size()
            }
            _ => return FreeOutcome::NotLive,
        };
        inner.delay.push_back(base);
        inner.delay_bytes += size;
        let mut evicted = Vec::new();
        while inner.delay_bytes > self.delay_budget {
            let Some(victim) = inner.delay.pop_front() else {
                break;
            };
            if let Some(chunk) = inner.by_base.remove(&victim) {
                inner.intervals.remove(&chunk.start);
                inner.delay_bytes -= chunk.size();
                evicted.push(chunk);
            }
        }
        FreeOutcome::Freed {
            start: base,
            end: base + size,
            evicted,
        }
    }

    /// Removes a live chunk outright (realloc path). The caller owns the
    /// returned stack reference.
    pub fn remove_live(&self, base: Addr) -> Option<HeapChunk> {
        let mut inner = self.inner.write().unwrap();
        match inner.by_base.get(&base) {
            Some(c) if c.status == ChunkStatus::Live => {}
            _ => return None,
        }
        inner.intervals.remove(&base);
        inner.by_base.remove(&base)
    }

    /// Visits every live chunk in address order.
    pub fn for_each_live(&self, mut f: impl FnMut(&HeapChunk)) {
        let inner = self.inner.read().unwrap();
        for (&start, _) in inner.intervals.iter() {
            if let Some(chunk) = inner.by_base.get(&start) {
                if chunk.status == ChunkStatus::Live {
                    f(chunk);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> HeapMap {
        HeapMap::new(64)
    }

    #[test]
    fn base_and_interior_lookup() {
        let heap = map();
        heap.insert_live(0x1000, 16, ChunkFlags::empty(), None);
        assert_eq!(Some(16), heap.live_size(0x1000));
        assert_eq!(None, heap.live_size(0x1008));
        let chunk = heap.enclosing(0x100f).unwrap();
        assert_eq!((0x1000, 0x1010), (chunk.start, chunk.end));
        assert!(heap.enclosing(0x1010).is_none());
    }

    #[test]
    fn free_moves_to_delay_queue() {
        let heap = map();
        heap.insert_live(0x1000, 16, ChunkFlags::empty(), None);
        match heap.begin_free(0x1000) {
            FreeOutcome::Freed { start, end, evicted } => {
                assert_eq!((0x1000, 0x1010), (start, end));
                assert!(evicted.is_empty());
            }
            FreeOutcome::NotLive => panic!("chunk was live"),
        }
        // no longer live, still findable
        assert_eq!(None, heap.live_size(0x1000));
        assert_eq!(
            Some((16, ChunkStatus::PendingFree)),
            heap.size_including_invalid(0x1000)
        );
        assert_eq!(Some((0x1000, 0x1010)), heap.overlaps_delayed_free(0x1004, 0x1005));
        // double free is NotLive
        assert!(matches!(heap.begin_free(0x1000), FreeOutcome::NotLive));
    }

    #[test]
    fn delay_queue_evicts_past_budget() {
        let heap = map(); // 64-byte budget
        for i in 0..3u64 {
            heap.insert_live(0x1000 + i * 0x100, 32, ChunkFlags::empty(), None);
        }
        for i in 0..2u64 {
            assert!(matches!(
                heap.begin_free(0x1000 + i * 0x100),
                FreeOutcome::Freed { ref evicted, .. } if evicted.is_empty()
            ));
        }
        // third free exceeds the budget: the oldest pending chunk goes
        match heap.begin_free(0x1200) {
            FreeOutcome::Freed { evicted, .. } => {
                assert_eq!(1, evicted.len());
                assert_eq!(0x1000, evicted[0].start);
            }
            FreeOutcome::NotLive => panic!("chunk was live"),
        }
        assert_eq!(None, heap.size_including_invalid(0x1000));
        assert_eq!(
            Some((32, ChunkStatus::PendingFree)),
            heap.size_including_invalid(0x1100)
        );
    }

    #[test]
    fn live_iteration_in_address_order() {
        let heap = map();
        heap.insert_live(0x3000, 8, ChunkFlags::empty(), None);
        heap.insert_live(0x1000, 8, ChunkFlags::empty(), None);
        heap.insert_live(0x2000, 8, ChunkFlags::PRE_US, None);
        heap.begin_free(0x2000);
        let mut seen = Vec::new();
        heap.for_each_live(|c| seen.push(c.start));
        assert_eq!(vec![0x1000, 0x3000], seen);
    }
}
