/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    biu::mod.rs

    Implements the bus interface unit for a single logical core.

    A LogicalCore owns its prefetch queue, request and response channels,
    cycle state and read cache. It is driven once per system tick through
    tick(), and is always passed explicitly to the operations that use it.
    Shared state (bus ownership, the physical bus and the address translator)
    is lent to the core for the duration of a tick through a BusContext.
*/

pub mod arbiter;
pub mod cache;
pub mod cycle;
pub mod fetch;
pub mod queue;
pub mod request;
pub mod timing;

use crate::{
    bus::PhysicalBus,
    config::{BiuConfig, TimingOverrides},
    cpu_common::CpuGeneration,
    error::AccessFault,
    tracelogger::TraceLogger,
    translate::AddressTranslator,
};

use arbiter::{BusArbiter, Participant};
use cache::ReadCache;
use cycle::CycleState;
use fetch::FetchState;
use queue::PrefetchQueue;
use request::{Request, RequestChannel, ResponseChannel};
use timing::TimingTable;

/// A physical write performed by a core, used to invalidate other cores' queues and caches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhysicalWrite {
    pub address: u32,
    pub len: u32,
}

/// Shared resources lent to a core for one tick.
pub struct BusContext<'a> {
    pub arbiter: &'a mut BusArbiter,
    pub bus: &'a mut dyn PhysicalBus,
    pub translator: &'a mut dyn AddressTranslator,
    pub snoops: &'a mut Vec<PhysicalWrite>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct BiuStats {
    pub ticks: u64,
    pub bus_cycles: u64,
    pub code_fetch_cycles: u64,
    pub idle_ticks: u64,
    pub waitstate_ticks: u64,
    pub stall_ticks: u64,
    pub video_wait_ticks: u64,
    pub dma_ticks: u64,
    pub contention_ticks: u64,
    pub cache_hits: u64,
    pub physical_reads: u64,
    pub flushes: u64,
}

pub struct LogicalCore {
    id: usize,
    generation: CpuGeneration,
    queue_size: Option<usize>,
    overrides: TimingOverrides,
    pub(crate) timing: TimingTable,
    pub(crate) enable_wait_states: bool,
    legacy_chipset: bool,
    a20_enabled: bool,
    pub(crate) cpl: u8,
    pub(crate) halted: bool,

    pub(crate) queue: PrefetchQueue,
    pub(crate) fetch: FetchState,
    pub(crate) requests: RequestChannel,
    pub(crate) responses: ResponseChannel,
    pub(crate) bus_fault: Option<AccessFault>,
    pub(crate) cycle: CycleState,
    pub(crate) cache: ReadCache,
    pub(crate) stats: BiuStats,

    pub(crate) trace_logger: TraceLogger,
    pub(crate) trace_comments: Vec<&'static str>,
}

impl LogicalCore {
    pub fn new(id: usize, config: &BiuConfig) -> Self {
        let timing = config.timing_table();
        let mut core = Self {
            id,
            generation: config.generation,
            queue_size: config.queue_size,
            overrides: config.timing.clone(),
            timing,
            enable_wait_states: config.enable_wait_states,
            legacy_chipset: config.legacy_chipset,
            a20_enabled: true,
            cpl: 0,
            halted: false,
            queue: PrefetchQueue::new(timing.queue_size),
            fetch: FetchState::default(),
            requests: RequestChannel::default(),
            responses: ResponseChannel::default(),
            bus_fault: None,
            cycle: CycleState::default(),
            cache: ReadCache::default(),
            stats: BiuStats::default(),
            trace_logger: TraceLogger::from_config(&config.trace, id, config.cores),
            trace_comments: Vec::new(),
        };
        core.reset();
        core
    }

    /// Return the core to its power-on state at the generation's reset vector.
    pub fn reset(&mut self) {
        self.queue.flush();
        self.fetch = FetchState::new(self.generation.reset_vector());
        self.requests.clear();
        self.responses.clear();
        self.bus_fault = None;
        self.cycle = CycleState::default();
        self.cache.invalidate();
        self.halted = false;
        self.cpl = 0;
        self.stats = BiuStats::default();
        self.trace_comments.clear();
    }

    /// Switch CPU model. This selects a new timing table and active-cycle handler, resizes the
    /// queue and abandons any bus cycle in progress. Bus ownership is left to the caller.
    /// Prefetching restarts at the execution unit's position under the new bus width.
    pub fn set_generation(&mut self, generation: CpuGeneration) {
        log::debug!("core {}: switching generation {} -> {}", self.id, self.generation, generation);
        let eu = self.eu_address();
        self.generation = generation;
        self.timing = TimingTable::for_generation(generation).with_overrides(self.queue_size, &self.overrides);
        self.queue.set_size(self.timing.queue_size);
        self.cache.invalidate();
        self.cycle = CycleState::default();
        self.requests.clear();
        self.responses.clear();
        self.bus_fault = None;
        self.flush(Some(eu));
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn generation(&self) -> CpuGeneration {
        self.generation
    }

    #[inline]
    pub fn timing(&self) -> &TimingTable {
        &self.timing
    }

    #[inline]
    pub fn stats(&self) -> &BiuStats {
        &self.stats
    }

    #[inline]
    pub fn queue(&self) -> &PrefetchQueue {
        &self.queue
    }

    #[inline]
    pub fn cycle_state(&self) -> &CycleState {
        &self.cycle
    }

    pub fn set_cpl(&mut self, cpl: u8) {
        self.cpl = cpl & 0x03;
    }

    pub fn set_wait_states_enabled(&mut self, state: bool) {
        self.enable_wait_states = state;
    }

    /// Set the A20 gate. Ignored on a legacy chipset, which always wraps at 1MiB.
    pub fn set_a20(&mut self, enabled: bool) {
        if self.a20_enabled != enabled {
            log::debug!("core {}: A20 gate {}", self.id, if enabled { "enabled" } else { "disabled" });
            self.a20_enabled = enabled;
            self.cache.invalidate();
        }
    }

    /// Mask applied to every physical address driven onto the bus.
    pub fn physical_mask(&self) -> u32 {
        let mut mask = self.timing.address_mask;
        if self.legacy_chipset {
            mask &= 0x000F_FFFF;
        }
        else if !self.a20_enabled {
            mask &= !0x0010_0000;
        }
        mask
    }

    /// Submit a request. Fails without side effect if a request is already outstanding, a response
    /// is waiting to be collected, DMA owns the bus, or another core holds the bus lock.
    pub fn submit(&mut self, arbiter: &BusArbiter, request: Request) -> bool {
        if !self.requests.is_empty() || self.responses.is_ready() {
            return false;
        }
        if arbiter.is_dma_owned() {
            self.trace_comment("DMA_BACKOFF");
            return false;
        }
        if matches!(arbiter.lock_holder(), Some(holder) if holder != self.id) {
            return false;
        }
        self.bus_fault = None;
        log::trace!(
            "core {}: {} {}-bit @ {:08X}",
            self.id,
            request.kind,
            request.width.bits(),
            request.address
        );
        self.requests.push(request)
    }

    /// Collect the value of a completed request.
    pub fn poll_response(&mut self) -> Option<u64> {
        self.responses.take().map(|r| r.value)
    }

    /// True exactly when the request slot is free and a response waits to be collected.
    #[inline]
    pub fn has_completed_transaction(&self) -> bool {
        self.requests.is_empty() && self.responses.is_ready()
    }

    #[inline]
    pub fn has_pending_request(&self) -> bool {
        !self.requests.is_empty()
    }

    /// A fault raised while mapping a request lane onto the bus.
    pub fn take_bus_fault(&mut self) -> Option<AccessFault> {
        self.bus_fault.take()
    }

    #[inline]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Halt the core. A halted core stops prefetching but continues to service requests.
    pub fn halt(&mut self) {
        self.halted = true;
        self.trace_comment("HALT");
    }

    pub fn resume(&mut self) {
        if self.halted {
            self.halted = false;
            // Owed video wait becomes an ordinary stall once the core is running.
            self.cycle.stall += std::mem::take(&mut self.cycle.video_wait);
        }
    }

    /// Post a periodic external wait. A halted core burns it as video wait cycles, a running core
    /// as a bus stall.
    pub fn post_external_wait(&mut self, cycles: u32) {
        if self.halted {
            self.cycle.video_wait += cycles;
        }
        else {
            self.cycle.stall += cycles;
        }
    }

    pub fn stall_bus(&mut self, cycles: u32) {
        self.cycle.stall += cycles;
    }

    /// Discard all in-flight state for the current instruction after a fault. A lane already on
    /// the bus finishes its bus cycle, but produces no response.
    pub fn abort_instruction(&mut self, arbiter: &mut BusArbiter) {
        if !self.requests.is_empty() || self.responses.is_ready() {
            log::debug!("core {}: discarding in-flight request", self.id);
        }
        self.requests.clear();
        self.responses.clear();
        self.bus_fault = None;
        arbiter.release_lock(self.id);
        self.trace_comment("ABORT");
    }

    /// Apply a physical write performed by another core or device.
    pub fn snoop_write(&mut self, write: PhysicalWrite) {
        self.cache.invalidate_range(write.address, write.len);
        if self.queue.overlaps(write.address, write.len) {
            log::debug!("core {}: write to {:08X} hit queued code", self.id, write.address);
            self.trace_comment("SNOOP_FLUSH");
            self.flush(None);
        }
    }

    /// Request the bus lock token for an uninterruptible access sequence.
    pub fn lock_bus(&mut self, arbiter: &mut BusArbiter) -> bool {
        arbiter.request_lock(self.id)
    }

    pub fn unlock_bus(&mut self, arbiter: &mut BusArbiter) {
        arbiter.release_lock(self.id);
    }

    #[inline]
    pub fn participant(&self) -> Participant {
        Participant::Core(self.id)
    }

    #[inline]
    pub fn trace_comment(&mut self, comment: &'static str) {
        if self.trace_logger.is_some() {
            self.trace_comments.push(comment);
        }
    }

    pub fn trace_flush(&mut self) {
        self.trace_logger.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_common::AccessWidth;

    #[test]
    fn test_a20_masking() {
        let mut config = BiuConfig::new(CpuGeneration::Intel80286);
        let mut core = LogicalCore::new(0, &config);
        assert_eq!(core.physical_mask(), 0x00FF_FFFF);
        core.set_a20(false);
        assert_eq!(core.physical_mask(), 0x00EF_FFFF);

        config.legacy_chipset = true;
        let mut core = LogicalCore::new(0, &config);
        core.set_a20(true);
        assert_eq!(core.physical_mask(), 0x000F_FFFF);
    }

    #[test]
    fn test_submit_backpressure() {
        let config = BiuConfig::new(CpuGeneration::Intel8088);
        let mut core = LogicalCore::new(0, &config);
        let mut arbiter = BusArbiter::new();

        assert!(core.submit(&arbiter, Request::io_read(AccessWidth::Byte, 0x60)));
        assert!(!core.submit(&arbiter, Request::io_read(AccessWidth::Byte, 0x61)));
        core.abort_instruction(&mut arbiter);
        assert!(!core.has_pending_request());

        assert!(arbiter.request_lock(1));
        assert!(!core.submit(&arbiter, Request::io_read(AccessWidth::Byte, 0x60)));
    }

    #[test]
    fn test_set_generation_keeps_execution_position() {
        use crate::{bus::MemoryBus, cpu_common::CodeAddress, translate::RealModeTranslator};

        let config = BiuConfig::new(CpuGeneration::Intel8086);
        let mut core = LogicalCore::new(0, &config);
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel8086);
        let mut bus = MemoryBus::new(0x10000);
        bus.load(0x200, &[0x10, 0x11, 0x12, 0x13, 0x14, 0x15]);

        core.flush(Some(CodeAddress::new(0x20, 0)));
        for _ in 0..4 {
            assert!(core.fill(&mut translator, &mut bus));
        }
        assert_eq!(core.fetch_u8(&mut translator, &mut bus), Ok(Some(0x10)));
        assert!(core.submit(&BusArbiter::new(), Request::io_read(AccessWidth::Byte, 0x60)));

        core.set_generation(CpuGeneration::Intel8088);
        assert_eq!(core.queue().size(), 4);
        assert!(core.queue().is_empty());
        assert!(!core.has_pending_request());
        assert_eq!(core.eu_address(), CodeAddress::new(0x20, 1));
        assert_eq!(core.fetch_cursor(), CodeAddress::new(0x20, 1));

        assert!(core.fill(&mut translator, &mut bus));
        assert_eq!(core.fetch_u8(&mut translator, &mut bus), Ok(Some(0x11)));
    }

    #[test]
    fn test_reset_clears_state() {
        let config = BiuConfig::new(CpuGeneration::Intel80286);
        let mut core = LogicalCore::new(0, &config);
        let arbiter = BusArbiter::new();
        core.halt();
        core.stall_bus(3);
        assert!(core.submit(&arbiter, Request::io_read(AccessWidth::Byte, 0x60)));

        core.reset();
        assert!(!core.is_halted());
        assert!(!core.has_pending_request());
        assert_eq!(core.cycle_state().stall, 0);
        assert_eq!(core.stats().ticks, 0);
        assert_eq!(core.fetch_cursor(), CpuGeneration::Intel80286.reset_vector());
        assert!(core.submit(&arbiter, Request::io_read(AccessWidth::Byte, 0x60)));
    }

    #[test]
    fn test_external_wait_routing() {
        let config = BiuConfig::new(CpuGeneration::Intel8088);
        let mut core = LogicalCore::new(0, &config);
        core.post_external_wait(3);
        assert_eq!(core.cycle.stall, 3);
        core.halt();
        core.post_external_wait(2);
        assert_eq!(core.cycle.video_wait, 2);
        core.resume();
        assert_eq!(core.cycle.stall, 5);
        assert_eq!(core.cycle.video_wait, 0);
    }
}
