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

    system.rs

    Implements the system tick loop.

    BusSystem owns every core, the bus arbiter, the DRAM refresh DMA channel,
    the physical bus and the address translator. Each tick runs DMA first,
    then the periodic external wait, then every core in round-robin order.
    For each core the execution unit steps before the bus interface, and any
    writes a core performed are snooped by all of the other cores.
*/

use crate::{
    biu::{
        arbiter::BusArbiter,
        cycle::CycleKind,
        request::Request,
        BusContext,
        LogicalCore,
        PhysicalWrite,
    },
    bus::PhysicalBus,
    config::{BiuConfig, ExternalWaitConfig},
    cpu_common::CpuGeneration,
    dma::DramRefresh,
    error::{AccessFault, ConfigError},
    step::{StepContext, StepCursor, StepStatus},
    translate::AddressTranslator,
};

/// An instruction dispatcher. `step` is invoked once per tick (unless an EU delay is owed) and
/// returns `Complete` at the end of each instruction.
pub trait ExecutionUnit {
    fn step(&mut self, cx: &mut StepContext<'_>) -> Result<StepStatus, AccessFault>;

    /// Deliver a fault raised by the instruction that was just aborted.
    fn fault(&mut self, fault: AccessFault, core: &mut LogicalCore) {
        log::debug!("core {}: unhandled fault {}", core.id(), fault);
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct DispatchStats {
    pub instructions: u64,
    pub faults: u64,
    pub delay_ticks: u64,
}

/// A core paired with its dispatch state.
pub struct Processor {
    pub core: LogicalCore,
    cursor: StepCursor,
    delay: u32,
    eu: Option<Box<dyn ExecutionUnit>>,
    stats: DispatchStats,
}

impl Processor {
    pub fn new(core: LogicalCore) -> Self {
        Self {
            core,
            cursor: StepCursor::default(),
            delay: 0,
            eu: None,
            stats: DispatchStats::default(),
        }
    }

    pub fn set_execution_unit(&mut self, eu: Box<dyn ExecutionUnit>) {
        self.eu = Some(eu);
        self.cursor.reset();
        self.delay = 0;
    }

    #[inline]
    pub fn cursor(&self) -> &StepCursor {
        &self.cursor
    }

    #[inline]
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    fn tick(&mut self, ctx: &mut BusContext<'_>) -> CycleKind {
        self.run_eu(ctx);
        self.core.tick(ctx)
    }

    fn run_eu(&mut self, ctx: &mut BusContext<'_>) {
        if self.delay > 0 {
            self.delay -= 1;
            self.stats.delay_ticks += 1;
            return;
        }
        if self.core.is_halted() {
            return;
        }
        let Some(eu) = self.eu.as_mut()
        else {
            return;
        };

        let mut cx = StepContext {
            core: &mut self.core,
            arbiter: &mut *ctx.arbiter,
            translator: &mut *ctx.translator,
            bus: &mut *ctx.bus,
            cursor: &mut self.cursor,
            delay: &mut self.delay,
        };

        match eu.step(&mut cx) {
            Ok(StepStatus::Pending) => {}
            Ok(StepStatus::Complete) => {
                self.cursor.reset();
                self.stats.instructions += 1;
            }
            Err(fault) => {
                log::debug!("core {}: instruction aborted: {}", self.core.id(), fault);
                self.core.abort_instruction(ctx.arbiter);
                self.cursor.reset();
                self.delay = 0;
                self.stats.faults += 1;
                eu.fault(fault, &mut self.core);
            }
        }
    }
}

/// Posts a periodic external wait to every core.
#[derive(Copy, Clone, Debug, Default)]
struct ExternalWait {
    config: Option<ExternalWaitConfig>,
    counter: u32,
}

impl ExternalWait {
    fn new(config: Option<ExternalWaitConfig>) -> Self {
        Self {
            config,
            counter: config.map(|c| c.period).unwrap_or(0),
        }
    }

    /// Returns the cycles to post this tick, if the period elapsed.
    fn tick(&mut self) -> Option<u32> {
        let config = self.config?;
        self.counter = self.counter.saturating_sub(1);
        if self.counter == 0 {
            self.counter = config.period;
            Some(config.cycles)
        }
        else {
            None
        }
    }
}

pub struct BusSystem<B: PhysicalBus, T: AddressTranslator> {
    processors: Vec<Processor>,
    arbiter: BusArbiter,
    dram_refresh: DramRefresh,
    external_wait: ExternalWait,
    snoops: Vec<PhysicalWrite>,
    bus: B,
    translator: T,
    ticks: u64,
    rr_start: usize,
}

impl<B: PhysicalBus, T: AddressTranslator> BusSystem<B, T> {
    pub fn new(config: &BiuConfig, bus: B, translator: T) -> Result<Self, ConfigError> {
        config.validate()?;
        log::debug!(
            "Creating bus system: {} x {} ({} bus, queue {})",
            config.cores,
            config.generation,
            config.timing_table().bus_width,
            config.timing_table().queue_size
        );
        let processors = (0..config.cores)
            .map(|id| Processor::new(LogicalCore::new(id, config)))
            .collect();
        Ok(Self {
            processors,
            arbiter: BusArbiter::new(),
            dram_refresh: DramRefresh::new(config.dram_refresh.as_ref()),
            external_wait: ExternalWait::new(config.external_wait),
            snoops: Vec::new(),
            bus,
            translator,
            ticks: 0,
            rr_start: 0,
        })
    }

    /// Run one system clock.
    pub fn tick(&mut self) {
        self.dram_refresh.tick(&mut self.arbiter);

        if let Some(cycles) = self.external_wait.tick() {
            for processor in self.processors.iter_mut() {
                processor.core.post_external_wait(cycles);
            }
        }

        let count = self.processors.len();
        for i in 0..count {
            let idx = (self.rr_start + i) % count;
            let mut ctx = BusContext {
                arbiter: &mut self.arbiter,
                bus: &mut self.bus,
                translator: &mut self.translator,
                snoops: &mut self.snoops,
            };
            self.processors[idx].tick(&mut ctx);

            for write in self.snoops.drain(..) {
                for (other, processor) in self.processors.iter_mut().enumerate() {
                    if other != idx {
                        processor.core.snoop_write(write);
                    }
                }
            }
        }

        self.rr_start = (self.rr_start + 1) % count.max(1);
        self.ticks += 1;
    }

    pub fn run(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Tick until `predicate` holds or `limit` ticks have run. Returns whether the predicate held.
    pub fn run_until<F>(&mut self, limit: u64, mut predicate: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        for _ in 0..limit {
            if predicate(&*self) {
                return true;
            }
            self.tick();
        }
        predicate(&*self)
    }

    /// Reset every core and drop all bus ownership.
    pub fn reset(&mut self) {
        self.arbiter.reset();
        self.dram_refresh.reset();
        for processor in self.processors.iter_mut() {
            processor.core.reset();
            processor.cursor.reset();
            processor.delay = 0;
        }
        self.ticks = 0;
    }

    /// Switch every core to `generation`. Bus cycles in flight are abandoned, so bus ownership is
    /// dropped and a DRAM refresh holding the bus restarts from idle.
    pub fn set_generation(&mut self, generation: CpuGeneration) {
        self.arbiter.reset();
        self.dram_refresh.reset();
        for processor in self.processors.iter_mut() {
            processor.core.set_generation(generation);
            processor.cursor.reset();
            processor.delay = 0;
        }
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[inline]
    pub fn core_count(&self) -> usize {
        self.processors.len()
    }

    pub fn core(&self, id: usize) -> &LogicalCore {
        &self.processors[id].core
    }

    pub fn core_mut(&mut self, id: usize) -> &mut LogicalCore {
        &mut self.processors[id].core
    }

    pub fn processor(&self, id: usize) -> &Processor {
        &self.processors[id]
    }

    pub fn processor_mut(&mut self, id: usize) -> &mut Processor {
        &mut self.processors[id]
    }

    pub fn set_execution_unit(&mut self, id: usize, eu: Box<dyn ExecutionUnit>) {
        self.processors[id].set_execution_unit(eu);
    }

    pub fn arbiter(&self) -> &BusArbiter {
        &self.arbiter
    }

    pub fn arbiter_mut(&mut self) -> &mut BusArbiter {
        &mut self.arbiter
    }

    pub fn dram_refresh(&self) -> &DramRefresh {
        &self.dram_refresh
    }

    pub fn dram_refresh_mut(&mut self) -> &mut DramRefresh {
        &mut self.dram_refresh
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn translator_mut(&mut self) -> &mut T {
        &mut self.translator
    }

    /// Submit a request on behalf of core `id`, outside of any execution unit.
    pub fn submit(&mut self, id: usize, request: Request) -> bool {
        self.processors[id].core.submit(&self.arbiter, request)
    }

    pub fn flush_traces(&mut self) {
        for processor in self.processors.iter_mut() {
            processor.core.trace_flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::MemoryBus,
        cpu_common::{AccessWidth, CodeAddress, Segment},
        step::{MemOperand, StepId},
        translate::RealModeTranslator,
    };

    /// Copies a word from DS:0x10 to DS:0x20, spending 2 cycles in between.
    struct MoveWord {
        value: u16,
    }

    impl ExecutionUnit for MoveWord {
        fn step(&mut self, cx: &mut StepContext<'_>) -> Result<StepStatus, AccessFault> {
            let src = MemOperand::new(Segment::DS, 0, 0x10, AccessWidth::Word);
            let dst = MemOperand::new(Segment::DS, 0, 0x20, AccessWidth::Word);
            crate::step!(cx.read_operand(StepId::ModRm(0), &src, |v| self.value = v as u16));
            crate::step!(cx.delay(StepId::Direct(0), 2));
            crate::step!(cx.write_operand(StepId::ModRm(2), &dst, self.value as u32));
            cx.core.halt();
            Ok(StepStatus::Complete)
        }
    }

    fn system(generation: CpuGeneration) -> BusSystem<MemoryBus, RealModeTranslator> {
        let config = BiuConfig::new(generation);
        BusSystem::new(&config, MemoryBus::new(0x10000), RealModeTranslator::new(generation)).unwrap()
    }

    #[test]
    fn test_execution_unit_drives_requests() {
        let mut system = system(CpuGeneration::Intel8086);
        system.bus_mut().load(0x10, &[0xEF, 0xBE]);
        system.core_mut(0).flush(Some(CodeAddress::new(0, 0x100)));
        system.set_execution_unit(0, Box::new(MoveWord { value: 0 }));

        assert!(system.run_until(200, |s| s.core(0).is_halted()));
        assert_eq!(system.bus().peek_range(0x20, 2), &[0xEF, 0xBE]);
        assert_eq!(system.processor(0).stats().instructions, 1);
        assert_eq!(system.processor(0).stats().delay_ticks, 1);
    }

    #[test]
    fn test_external_wait_posts_to_cores() {
        let mut config = BiuConfig::new(CpuGeneration::Intel8088);
        config.cores = 2;
        config.external_wait = Some(ExternalWaitConfig { period: 4, cycles: 3 });
        let mut system =
            BusSystem::new(&config, MemoryBus::new(0x10000), RealModeTranslator::new(CpuGeneration::Intel8088)).unwrap();
        system.core_mut(0).halt();
        system.core_mut(1).halt();
        system.run(4);
        assert_eq!(system.core(0).stats().video_wait_ticks, 1);
        system.run(2);
        assert_eq!(system.core(1).stats().video_wait_ticks, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = BiuConfig::default();
        config.cores = 0;
        assert!(BusSystem::new(&config, MemoryBus::new(0), RealModeTranslator::new(CpuGeneration::Intel8088)).is_err());
    }
}
