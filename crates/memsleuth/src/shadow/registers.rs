//! Per-thread shadow state for the general-purpose registers and the
//! condition flags: four two-bit lanes per 32-bit register, one packed byte
//! each, plus one byte for the flags.
//!
//! Register uninitializedness is tracked here explicitly rather than through
//! fake low addresses in the main shadow map, so it can never collide with
//! real application memory.

use crate::shadow::ShadowState;
use crate::target::Register;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRegisters {
    gprs: [u8; Register::COUNT],
    eflags: u8,
}

impl Default for ShadowRegisters {
    /// Threads start with every register defined; the instrumentation engine
    /// marks freshly materialized values as it sees them.
    fn default() -> Self {
        let fill = ShadowState::Defined.fill_byte();
        ShadowRegisters {
            gprs: [fill; Register::COUNT],
            eflags: fill,
        }
    }
}

impl ShadowRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, reg: Register, byte: usize) -> ShadowState {
        debug_assert!(byte < 4);
        ShadowState::from_bits(self.gprs[reg.index()] >> (byte * 2))
    }

    pub fn set(&mut self, reg: Register, byte: usize, state: ShadowState) {
        debug_assert!(byte < 4);
        let shift = byte * 2;
        let slot = &mut self.gprs[reg.index()];
        *slot = (*slot & !(0b11 << shift)) | ((state as u8) << shift);
    }

    /// Stamps all four bytes of `reg`.
    pub fn set_all(&mut self, reg: Register, state: ShadowState) {
        self.gprs[reg.index()] = state.fill_byte();
    }

    /// OR-reduction across the low `len` bytes of `reg`.
    pub fn status(&self, reg: Register, len: usize) -> ShadowState {
        (0..len.min(4)).fold(ShadowState::Defined, |acc, i| acc.merge(self.get(reg, i)))
    }

    pub fn flags_status(&self) -> ShadowState {
        ShadowState::from_bits(self.eflags)
    }

    pub fn set_flags(&mut self, state: ShadowState) {
        self.eflags = state.fill_byte();
    }

    /// Result of a binary operation: the destination and the condition flags
    /// both take the OR-reduction of the source shadows.
    pub fn propagate_binop(&mut self, dst: Register, a: Register, b: Register) {
        let merged = self.status(a, 4).merge(self.status(b, 4));
        self.set_all(dst, merged);
        self.set_flags(merged);
    }

    /// A load of `len` bytes whose per-byte source states are `states[..len]`:
    /// the low destination bytes take the source states, the rest of the
    /// register becomes defined (zero-extension).
    pub fn load_into(&mut self, dst: Register, states: &[ShadowState]) {
        for byte in 0..4 {
            let state = states.get(byte).copied().unwrap_or(ShadowState::Defined);
            self.set(dst, byte, state);
        }
    }

    /// Per-byte states a store of the low `len` bytes of `src` writes.
    pub fn store_states(&self, src: Register, len: usize) -> [ShadowState; 4] {
        std::array::from_fn(|i| {
            if i < len.min(4) {
                self.get(src, i)
            } else {
                ShadowState::Defined
            }
        })
    }
}
