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

    biu::cycle.rs

    Per-tick cycle scheduler.

    Each tick, detect_cycle() decides whether the core burns a stall, video
    wait or wait state cycle, or runs the active-cycle handler selected by
    the generation's timing table. The active handlers start a bus cycle at
    the bus-free phase (one request lane, or else a prefetch burst), insert
    wait states at the generation's insertion point and release the bus at
    the final phase, posting the response once the last lane completes.
*/

use std::fmt;

use crate::biu::{
    arbiter::Participant,
    cache::AccessClass,
    request::{RequestKind, LANE_SHIFT},
    timing::BusHandler,
    BusContext,
    LogicalCore,
    PhysicalWrite,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TState {
    #[default]
    Ti,
    T1,
    T2,
    T3,
    T4,
    Ts,
    Tc,
    T,
}

impl fmt::Display for TState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TState::Ti => "Ti",
            TState::T1 => "T1",
            TState::T2 => "T2",
            TState::T3 => "T3",
            TState::T4 => "T4",
            TState::Ts => "Ts",
            TState::Tc => "Tc",
            TState::T => "T",
        };
        write!(f, "{}", s)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CycleKind {
    #[default]
    Idle,
    Active(TState),
    StallingBus,
    WaitstateBus,
    VideoWait,
    DmaRefresh,
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CycleKind::Idle => write!(f, "Ti"),
            CycleKind::Active(t) => write!(f, "{}", t),
            CycleKind::StallingBus => write!(f, "Stall"),
            CycleKind::WaitstateBus => write!(f, "Tw"),
            CycleKind::VideoWait => write!(f, "Vw"),
            CycleKind::DmaRefresh => write!(f, "DMA"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusStatus {
    CodeFetch,
    MemRead,
    MemWrite,
    IoRead,
    IoWrite,
}

impl From<RequestKind> for BusStatus {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::MemRead => BusStatus::MemRead,
            RequestKind::MemWrite => BusStatus::MemWrite,
            RequestKind::IoRead => BusStatus::IoRead,
            RequestKind::IoWrite => BusStatus::IoWrite,
        }
    }
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BusStatus::CodeFetch => "CODE",
            BusStatus::MemRead => "MEMR",
            BusStatus::MemWrite => "MEMW",
            BusStatus::IoRead => "IOR",
            BusStatus::IoWrite => "IOW",
        };
        write!(f, "{}", s)
    }
}

/// A bus cycle in progress.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusTransfer {
    pub status: BusStatus,
    pub address: u32,
    pub bytes: u32,
    pub waitstates: u32,
    /// Tag of the request this lane belongs to. None for code fetches.
    tag: Option<u64>,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct CycleState {
    /// T-state of the next active tick.
    pub t_state: TState,
    /// What the last tick did.
    pub last: CycleKind,
    pub transfer: Option<BusTransfer>,
    /// Owed wait state cycles, set at the generation's insertion point.
    pub waitstates: u32,
    pub stall: u32,
    pub video_wait: u32,
    /// Incremented whenever a transfer is charged wait states. Read cache lines filled in an
    /// earlier epoch miss.
    pub(crate) waitstate_epoch: u64,
}

impl CycleState {
    #[inline]
    pub fn mid_transfer(&self) -> bool {
        self.transfer.is_some()
    }
}

enum BusStart {
    Started,
    DmaOwned,
    Contended,
    Idle,
}

impl LogicalCore {
    /// Decide what this core's next tick will be. Anything other than StallingBus, VideoWait or
    /// WaitstateBus means the active-cycle handler runs; the handler reports the final kind.
    pub fn detect_cycle(&self) -> CycleKind {
        let mid = self.cycle.mid_transfer();
        if self.cycle.stall > 0 && !mid {
            CycleKind::StallingBus
        }
        else if self.halted && self.cycle.video_wait > 0 && !mid {
            CycleKind::VideoWait
        }
        else if self.cycle.waitstates > 0 {
            CycleKind::WaitstateBus
        }
        else {
            CycleKind::Active(self.cycle.t_state)
        }
    }

    /// Advance the core's bus interface by one clock.
    pub fn tick(&mut self, ctx: &mut BusContext<'_>) -> CycleKind {
        let kind = match self.detect_cycle() {
            CycleKind::StallingBus => {
                self.cycle.stall -= 1;
                self.stats.stall_ticks += 1;
                CycleKind::StallingBus
            }
            CycleKind::VideoWait => {
                self.cycle.video_wait -= 1;
                self.stats.video_wait_ticks += 1;
                CycleKind::VideoWait
            }
            CycleKind::WaitstateBus => {
                self.cycle.waitstates -= 1;
                self.stats.waitstate_ticks += 1;
                ctx.arbiter.record_waitstate(self.participant());
                if self.cycle.waitstates == 0 && self.timing.handler == BusHandler::SinglePhase {
                    // Trailing wait states over, the bus can go.
                    self.end_bus_cycle(ctx);
                }
                CycleKind::WaitstateBus
            }
            _ => match self.timing.handler {
                BusHandler::FourPhase => self.cycle_four_phase(ctx),
                BusHandler::TwoPhase => self.cycle_two_phase(ctx),
                BusHandler::SinglePhase => self.cycle_single_phase(ctx),
            },
        };

        self.cycle.last = kind;
        self.stats.ticks += 1;
        if self.trace_logger.is_some() {
            self.trace_print(kind);
        }
        kind
    }

    fn cycle_four_phase(&mut self, ctx: &mut BusContext<'_>) -> CycleKind {
        match self.cycle.t_state {
            TState::T2 => {
                self.cycle.t_state = TState::T3;
                CycleKind::Active(TState::T2)
            }
            TState::T3 => {
                self.insert_waitstates();
                self.cycle.t_state = TState::T4;
                CycleKind::Active(TState::T3)
            }
            TState::T4 => {
                self.end_bus_cycle(ctx);
                self.cycle.t_state = TState::Ti;
                CycleKind::Active(TState::T4)
            }
            _ => self.bus_free_phase(ctx, TState::T1, TState::T2),
        }
    }

    fn cycle_two_phase(&mut self, ctx: &mut BusContext<'_>) -> CycleKind {
        match self.cycle.t_state {
            TState::Tc => {
                self.end_bus_cycle(ctx);
                self.cycle.t_state = TState::Ti;
                CycleKind::Active(TState::Tc)
            }
            _ => {
                let kind = self.bus_free_phase(ctx, TState::Ts, TState::Tc);
                if kind == CycleKind::Active(TState::Ts) {
                    self.insert_waitstates();
                }
                kind
            }
        }
    }

    fn cycle_single_phase(&mut self, ctx: &mut BusContext<'_>) -> CycleKind {
        let kind = self.bus_free_phase(ctx, TState::T, TState::Ti);
        if kind == CycleKind::Active(TState::T) {
            // Wait states trail the transfer. The response is ready at T, but the bus stays owned
            // until the wait states have elapsed.
            self.insert_waitstates();
            if self.cycle.waitstates == 0 {
                self.end_bus_cycle(ctx);
            }
            else {
                let tag = self.cycle.transfer.and_then(|t| t.tag);
                self.post_response(tag);
            }
        }
        kind
    }

    fn bus_free_phase(&mut self, ctx: &mut BusContext<'_>, start: TState, next: TState) -> CycleKind {
        match self.begin_bus_cycle(ctx) {
            BusStart::Started => {
                self.cycle.t_state = next;
                CycleKind::Active(start)
            }
            BusStart::DmaOwned => {
                self.cycle.t_state = TState::Ti;
                self.stats.dma_ticks += 1;
                CycleKind::DmaRefresh
            }
            BusStart::Contended => {
                self.cycle.t_state = TState::Ti;
                self.stats.contention_ticks += 1;
                ctx.arbiter.record_contention(self.participant());
                CycleKind::Idle
            }
            BusStart::Idle => {
                self.cycle.t_state = TState::Ti;
                self.stats.idle_ticks += 1;
                CycleKind::Idle
            }
        }
    }

    #[inline]
    fn insert_waitstates(&mut self) {
        if let Some(transfer) = &self.cycle.transfer {
            self.cycle.waitstates = transfer.waitstates;
        }
    }

    fn begin_bus_cycle(&mut self, ctx: &mut BusContext<'_>) -> BusStart {
        if ctx.arbiter.is_dma_owned() {
            return BusStart::DmaOwned;
        }

        let have_request = self.requests.pending().is_some();
        if !have_request && !self.fetch_eligible() {
            return BusStart::Idle;
        }
        if !ctx.arbiter.try_acquire(self.participant()) {
            return BusStart::Contended;
        }

        let transfer = if have_request {
            self.begin_request_transfer(ctx)
        }
        else {
            self.begin_fetch_transfer(ctx)
        };

        match transfer {
            Some(transfer) => {
                self.cycle.transfer = Some(transfer);
                self.stats.bus_cycles += 1;
                BusStart::Started
            }
            None => {
                // Faulted before anything reached the bus.
                ctx.arbiter.set_inactive(self.participant());
                ctx.arbiter.check_release();
                BusStart::Idle
            }
        }
    }

    fn begin_fetch_transfer(&mut self, ctx: &mut BusContext<'_>) -> Option<BusTransfer> {
        let (address, bytes) = self.fetch_burst(ctx.translator, ctx.bus)?;
        let waitstates = self.transfer_waitstates(BusStatus::CodeFetch, address, bytes, ctx);
        self.stats.code_fetch_cycles += 1;
        self.trace_comment("FETCH");
        Some(BusTransfer {
            status: BusStatus::CodeFetch,
            address,
            bytes,
            waitstates,
            tag: None,
        })
    }

    /// Drive the next lane of the pending request onto the bus.
    fn begin_request_transfer(&mut self, ctx: &mut BusContext<'_>) -> Option<BusTransfer> {
        let request = *self.requests.pending()?;
        let mask = self.physical_mask();
        let lane = request.lane;
        let start = request.address.wrapping_add(lane);
        let bytes = self.timing.transfer_size(start, request.lanes_remaining());

        let physical = if request.kind.is_io() {
            start & 0xFFFF
        }
        else if request.uses_linear_translation {
            match ctx
                .translator
                .map_page(start, request.kind == RequestKind::MemWrite, self.cpl)
            {
                Ok(physical) => physical & mask,
                Err(fault) => {
                    log::debug!("core {}: {} lane {} faulted: {}", self.id(), request.kind, lane, fault);
                    self.trace_comment("BUS_FAULT");
                    self.bus_fault = Some(fault);
                    self.requests.clear();
                    return None;
                }
            }
        }
        else {
            start & mask
        };

        let mut data: u32 = 0;
        match request.kind {
            RequestKind::MemRead => {
                for i in 0..bytes {
                    let byte = self.cached_read(AccessClass::Normal, physical.wrapping_add(i) & mask, ctx.bus);
                    data |= (byte as u32) << LANE_SHIFT[i as usize];
                }
            }
            RequestKind::MemWrite => {
                for i in 0..bytes {
                    ctx.bus
                        .write_u8(physical.wrapping_add(i) & mask, request.lane_byte(lane + i));
                }
                let write = PhysicalWrite {
                    address: physical,
                    len: bytes,
                };
                // Our own queue may hold the bytes just overwritten.
                self.snoop_write(write);
                ctx.snoops.push(write);
            }
            RequestKind::IoRead => {
                let port = physical as u16;
                data = match bytes {
                    1 => ctx.bus.io_read_u8(port) as u32,
                    2 => ctx.bus.io_read_u16(port) as u32,
                    _ => ctx.bus.io_read_u32(port),
                };
            }
            RequestKind::IoWrite => {
                let port = physical as u16;
                let value = request.value >> LANE_SHIFT[lane as usize];
                match bytes {
                    1 => ctx.bus.io_write_u8(port, value as u8),
                    2 => ctx.bus.io_write_u16(port, value as u16),
                    _ => ctx.bus.io_write_u32(port, value),
                }
            }
        }

        let status = BusStatus::from(request.kind);
        let waitstates = self.transfer_waitstates(status, physical, bytes, ctx);

        if let Some(current) = self.requests.current_mut() {
            if request.kind.is_read() {
                current.accumulate(lane, data, bytes);
            }
            current.lane += bytes;
        }
        self.trace_comment("LANE");

        Some(BusTransfer {
            status,
            address: physical,
            bytes,
            waitstates,
            tag: Some(request.tag),
        })
    }

    /// Wait states for a transfer: the generation's constants, the narrow-transfer extra and
    /// whatever the device reports.
    fn transfer_waitstates(&mut self, status: BusStatus, address: u32, bytes: u32, ctx: &mut BusContext<'_>) -> u32 {
        if !self.enable_wait_states {
            return 0;
        }
        let mut waitstates = match status {
            BusStatus::CodeFetch | BusStatus::MemRead => self.timing.mem_waitstates + ctx.bus.read_wait(address),
            BusStatus::MemWrite => self.timing.mem_waitstates + ctx.bus.write_wait(address),
            BusStatus::IoRead | BusStatus::IoWrite => self.timing.io_waitstates + ctx.bus.io_wait(address as u16),
        };
        if bytes == 1 && self.timing.bus_width.bytes() > 1 {
            waitstates += self.timing.narrow_waitstates;
        }
        if waitstates > 0 {
            self.cycle.waitstate_epoch += 1;
        }
        waitstates
    }

    /// Final phase: release the bus and post the response if this was the request's last lane.
    fn end_bus_cycle(&mut self, ctx: &mut BusContext<'_>) {
        let Some(transfer) = self.cycle.transfer.take()
        else {
            return;
        };
        ctx.arbiter.set_inactive(self.participant());
        ctx.arbiter.check_release();
        self.post_response(transfer.tag);
    }

    /// Post the response if `tag` names the pending request and its last lane has transferred.
    fn post_response(&mut self, tag: Option<u64>) {
        if let Some(tag) = tag {
            if let Some(response) = self.requests.retire(tag) {
                self.responses.post(response);
                self.trace_comment("RESPONSE");
            }
        }
    }

    fn trace_print(&mut self, kind: CycleKind) {
        let (status, address) = match &self.cycle.transfer {
            Some(transfer) => (transfer.status.to_string(), transfer.address),
            None => ("PASV".to_string(), 0),
        };
        let line = format!(
            "{:08} [{:<5}] {:<4} {:08X} q:{:<2} [{:<8}] {}",
            self.stats.ticks,
            kind.to_string(),
            status,
            address,
            self.queue.len(),
            self.queue.to_string(),
            self.trace_comments.join(", ")
        );
        self.trace_logger.println(line);
        self.trace_comments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        biu::{arbiter::BusArbiter, request::Request},
        bus::{MemoryBus, PhysicalBus, PortLatch},
        config::BiuConfig,
        cpu_common::{AccessWidth, CodeAddress, CpuGeneration},
        translate::RealModeTranslator,
    };

    struct Rig {
        core: LogicalCore,
        arbiter: BusArbiter,
        bus: MemoryBus,
        translator: RealModeTranslator,
        snoops: Vec<PhysicalWrite>,
    }

    impl Rig {
        fn new(generation: CpuGeneration) -> Self {
            let mut bus = MemoryBus::new(0x10000);
            bus.install_device(Box::new(PortLatch::new([0x40, 0x41, 0x42, 0x43], 0)));
            let mut core = LogicalCore::new(0, &BiuConfig::new(generation));
            core.halt();
            Self {
                core,
                arbiter: BusArbiter::new(),
                bus,
                translator: RealModeTranslator::new(generation),
                snoops: Vec::new(),
            }
        }

        fn tick(&mut self) -> CycleKind {
            let mut ctx = BusContext {
                arbiter: &mut self.arbiter,
                bus: &mut self.bus,
                translator: &mut self.translator,
                snoops: &mut self.snoops,
            };
            self.core.tick(&mut ctx)
        }

        /// Tick until the response is collectible, returning the ticks taken.
        fn run_request(&mut self, request: Request) -> (u32, u64) {
            assert!(self.core.submit(&self.arbiter, request));
            let mut ticks = 0;
            while !self.core.has_completed_transaction() {
                self.tick();
                ticks += 1;
                assert!(ticks < 100, "request never completed");
            }
            (ticks, self.core.poll_response().unwrap())
        }
    }

    #[test]
    fn test_four_phase_timing() {
        let mut rig = Rig::new(CpuGeneration::Intel8088);
        rig.bus.load(0x500, &[0xCD]);
        let (ticks, value) = rig.run_request(Request::mem_read(AccessWidth::Byte, 0x500));
        assert_eq!(ticks, 4);
        assert_eq!(value, 0xCD);

        // I/O carries one wait state on an 8088, inserted between T3 and T4.
        assert_eq!(rig.core.cycle_state().t_state, TState::Ti);
        let (ticks, _) = rig.run_request(Request::io_write(AccessWidth::Byte, 0x40, 0x5A));
        assert_eq!(ticks, 5);
        assert_eq!(rig.core.stats().waitstate_ticks, 1);
    }

    #[test]
    fn test_four_phase_sequence() {
        let mut rig = Rig::new(CpuGeneration::Intel8088);
        assert!(rig
            .core
            .submit(&rig.arbiter, Request::io_read(AccessWidth::Byte, 0x40)));
        let kinds: Vec<CycleKind> = (0..5).map(|_| rig.tick()).collect();
        assert_eq!(
            kinds,
            vec![
                CycleKind::Active(TState::T1),
                CycleKind::Active(TState::T2),
                CycleKind::Active(TState::T3),
                CycleKind::WaitstateBus,
                CycleKind::Active(TState::T4),
            ]
        );
        assert_eq!(rig.arbiter.owner(), crate::biu::arbiter::BusOwner::Free);
    }

    #[test]
    fn test_two_phase_word_split() {
        let mut rig = Rig::new(CpuGeneration::Intel80286);
        rig.bus.load(0x601, &[0x34, 0x12]);
        // Unaligned word on a 16-bit bus: two byte lanes, each Ts + 1 mem ws + 1 narrow ws + Tc.
        let (ticks, value) = rig.run_request(Request::mem_read(AccessWidth::Word, 0x601));
        assert_eq!(value, 0x1234);
        assert_eq!(ticks, 8);
        assert_eq!(rig.core.stats().bus_cycles, 2);

        // The aligned case is a single bus cycle.
        let (ticks, _) = rig.run_request(Request::mem_read(AccessWidth::Word, 0x600));
        assert_eq!(ticks, 3);
    }

    #[test]
    fn test_single_phase_trailing_waitstates() {
        let mut rig = Rig::new(CpuGeneration::Intel80486);
        let (ticks, _) = rig.run_request(Request::io_write(AccessWidth::Dword, 0x40, 0x1122_3344));
        assert_eq!(ticks, 1);
        // The bus is held through the trailing wait state.
        assert_eq!(rig.arbiter.owner(), crate::biu::arbiter::BusOwner::Core(0));
        assert!(rig.arbiter.is_active(Participant::Core(0)));
        assert!(!rig.arbiter.is_available_to(Participant::Core(1)));
        assert_eq!(rig.tick(), CycleKind::WaitstateBus);
        assert_eq!(rig.arbiter.owner(), crate::biu::arbiter::BusOwner::Free);
        assert!(!rig.arbiter.is_active(Participant::Core(0)));
        assert_eq!(rig.arbiter.total_waitstates(), 1);
        assert_eq!(rig.tick(), CycleKind::Idle);
        assert_eq!(rig.bus.io_read_u32(0x40), 0x1122_3344);
    }

    #[test]
    fn test_single_phase_without_waitstates_releases_at_t() {
        let mut rig = Rig::new(CpuGeneration::Intel80486);
        let (ticks, value) = rig.run_request(Request::mem_read(AccessWidth::Dword, 0x100));
        assert_eq!(ticks, 1);
        assert_eq!(value, 0);
        assert_eq!(rig.arbiter.owner(), crate::biu::arbiter::BusOwner::Free);
        assert!(!rig.core.cycle_state().mid_transfer());
    }

    #[test]
    fn test_wait_states_disabled() {
        let mut rig = Rig::new(CpuGeneration::Intel80286);
        rig.core.set_wait_states_enabled(false);
        let (ticks, _) = rig.run_request(Request::io_read(AccessWidth::Byte, 0x41));
        assert_eq!(ticks, 2);
    }

    #[test]
    fn test_device_waitstates() {
        let mut rig = Rig::new(CpuGeneration::Intel8088);
        rig.bus.add_wait_range(0xB000, 0xC000, 3);
        let (ticks, _) = rig.run_request(Request::mem_write(AccessWidth::Byte, 0xB000, 0xAA));
        assert_eq!(ticks, 7);
    }

    #[test]
    fn test_stall_waits_for_transfer() {
        let mut rig = Rig::new(CpuGeneration::Intel8088);
        assert!(rig
            .core
            .submit(&rig.arbiter, Request::mem_read(AccessWidth::Byte, 0x10)));
        assert_eq!(rig.tick(), CycleKind::Active(TState::T1));
        rig.core.stall_bus(2);
        // The stall is deferred until the bus cycle ends.
        assert_eq!(rig.tick(), CycleKind::Active(TState::T2));
        assert_eq!(rig.tick(), CycleKind::Active(TState::T3));
        assert_eq!(rig.tick(), CycleKind::Active(TState::T4));
        assert_eq!(rig.tick(), CycleKind::StallingBus);
        assert_eq!(rig.tick(), CycleKind::StallingBus);
        assert_eq!(rig.tick(), CycleKind::Idle);
    }

    #[test]
    fn test_video_wait_when_halted() {
        let mut rig = Rig::new(CpuGeneration::Intel8088);
        rig.core.post_external_wait(2);
        assert_eq!(rig.tick(), CycleKind::VideoWait);
        assert_eq!(rig.tick(), CycleKind::VideoWait);
        assert_eq!(rig.tick(), CycleKind::Idle);
        assert_eq!(rig.core.stats().video_wait_ticks, 2);
    }

    #[test]
    fn test_write_flushes_queued_code() {
        let mut rig = Rig::new(CpuGeneration::Intel8088);
        rig.core.resume();
        rig.core.flush(Some(CodeAddress::new(0, 0x100)));
        for _ in 0..8 {
            rig.tick();
        }
        assert_eq!(rig.core.queue().len(), 2);

        rig.run_request(Request::mem_write(AccessWidth::Byte, 0x101, 0x90));
        assert_eq!(rig.snoops, vec![PhysicalWrite { address: 0x101, len: 1 }]);
        assert_eq!(rig.core.stats().flushes, 2);
    }

    #[test]
    fn test_paging_fault_discards_request() {
        let mut rig = Rig::new(CpuGeneration::Intel80386Dx);
        rig.translator.mark_not_present(0x3000..0x4000);
        assert!(rig
            .core
            .submit(&rig.arbiter, Request::mem_read(AccessWidth::Dword, 0x2FFE)));
        // First lane (2 bytes below the page boundary) completes, the second faults.
        for _ in 0..6 {
            rig.tick();
        }
        assert!(!rig.core.has_pending_request());
        assert!(!rig.core.has_completed_transaction());
        assert!(matches!(
            rig.core.take_bus_fault(),
            Some(crate::error::AccessFault::PageFault { linear: 0x3000, .. })
        ));
        assert_eq!(rig.arbiter.owner(), crate::biu::arbiter::BusOwner::Free);
    }
}
