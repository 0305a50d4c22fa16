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

    step.rs

    Resumable instruction steps.

    An instruction handler is re-invoked once per tick until it completes. It
    drives its bus accesses through the helpers here, each keyed by a StepId.
    A helper acts only when the cursor for its family is at its step, and
    advances the cursor once its effect has happened, so re-entering a step
    that already ran is always a no-op. Register state should only be
    mutated from collect consumers, after the data has fully arrived.
*/

use std::cmp::Ordering;

use crate::{
    biu::{
        arbiter::BusArbiter,
        request::{Request, RequestKind},
        LogicalCore,
    },
    bus::PhysicalBus,
    cpu_common::{AccessWidth, CodeAddress, Segment},
    error::AccessFault,
    translate::{AccessKind, AddressTranslator, LogicalAccess},
};

/// Propagate a fault, or return `Pending` from the enclosing handler if the step is not done.
#[macro_export]
macro_rules! step {
    ($e:expr) => {
        if let $crate::step::StepStatus::Pending = $e? {
            return Ok($crate::step::StepStatus::Pending);
        }
    };
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Complete,
}

/// A step position, tagged by operation family. Each family has its own counter so helpers of
/// different families never collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepId {
    ModRm(u8),
    Direct(u8),
    Stack(u8),
    Interrupt(u8),
}

impl StepId {
    #[inline]
    fn family(&self) -> usize {
        match self {
            StepId::ModRm(_) => 0,
            StepId::Direct(_) => 1,
            StepId::Stack(_) => 2,
            StepId::Interrupt(_) => 3,
        }
    }

    #[inline]
    pub fn index(&self) -> u8 {
        match *self {
            StepId::ModRm(i) | StepId::Direct(i) | StepId::Stack(i) | StepId::Interrupt(i) => i,
        }
    }

    /// The following step in the same family.
    pub fn next(&self) -> StepId {
        match *self {
            StepId::ModRm(i) => StepId::ModRm(i + 1),
            StepId::Direct(i) => StepId::Direct(i + 1),
            StepId::Stack(i) => StepId::Stack(i + 1),
            StepId::Interrupt(i) => StepId::Interrupt(i + 1),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StepCursor {
    counters: [u8; 4],
}

impl StepCursor {
    /// Called at every instruction boundary.
    pub fn reset(&mut self) {
        self.counters = [0; 4];
    }

    #[inline]
    pub fn position(&self, step: StepId) -> u8 {
        self.counters[step.family()]
    }

    /// Where the cursor stands relative to `step`.
    #[inline]
    pub fn compare(&self, step: StepId) -> Ordering {
        self.position(step).cmp(&step.index())
    }

    #[inline]
    fn advance(&mut self, step: StepId) {
        self.counters[step.family()] = step.index() + 1;
    }
}

/// A segmented memory operand.
#[derive(Copy, Clone, Debug)]
pub struct MemOperand {
    pub segment: Segment,
    pub selector: u16,
    pub offset: u32,
    pub width: AccessWidth,
}

impl MemOperand {
    pub fn new(segment: Segment, selector: u16, offset: u32, width: AccessWidth) -> Self {
        Self {
            segment,
            selector,
            offset,
            width,
        }
    }

    fn access(&self, kind: AccessKind, cpl: u8) -> LogicalAccess {
        LogicalAccess::new(self.segment, self.selector, self.offset, kind, self.width).with_cpl(cpl)
    }
}

/// Register state saved and loaded by interrupt entry.
#[derive(Copy, Clone, Debug, Default)]
pub struct InterruptFrame {
    pub vector: u8,
    pub flags: u16,
    pub cs: u16,
    pub ip: u16,
    pub ss: u16,
    pub sp: u16,
    handler: u32,
}

impl InterruptFrame {
    pub fn new(vector: u8, flags: u16, cs: u16, ip: u16, ss: u16, sp: u16) -> Self {
        Self {
            vector,
            flags,
            cs,
            ip,
            ss,
            sp,
            handler: 0,
        }
    }
}

/// Everything an instruction handler may touch during one tick.
pub struct StepContext<'a> {
    pub core: &'a mut LogicalCore,
    pub arbiter: &'a mut BusArbiter,
    pub translator: &'a mut dyn AddressTranslator,
    pub bus: &'a mut dyn PhysicalBus,
    pub cursor: &'a mut StepCursor,
    pub(crate) delay: &'a mut u32,
}

impl StepContext<'_> {
    /// At `step`, build a request with `factory` and submit it. A rejected submission leaves the
    /// cursor alone so the next tick retries. A translation fault from the factory is returned.
    pub fn issue_once<F>(&mut self, step: StepId, factory: F) -> Result<StepStatus, AccessFault>
    where
        F: FnOnce(&mut dyn AddressTranslator) -> Result<Request, AccessFault>,
    {
        match self.cursor.compare(step) {
            Ordering::Greater => return Ok(StepStatus::Complete),
            Ordering::Less => return Ok(StepStatus::Pending),
            Ordering::Equal => {}
        }
        let request = factory(&mut *self.translator)?;
        if self.core.submit(self.arbiter, request) {
            self.cursor.advance(step);
        }
        // Even when accepted, the response can't be ready until the bus has run.
        Ok(StepStatus::Pending)
    }

    /// At `step`, collect the response and pass it to `consumer`. A fault raised while the request
    /// was on the bus is returned here.
    pub fn collect_once<F>(&mut self, step: StepId, consumer: F) -> Result<StepStatus, AccessFault>
    where
        F: FnOnce(u64),
    {
        match self.cursor.compare(step) {
            Ordering::Greater => return Ok(StepStatus::Complete),
            Ordering::Less => return Ok(StepStatus::Pending),
            Ordering::Equal => {}
        }
        if let Some(fault) = self.core.take_bus_fault() {
            return Err(fault);
        }
        match self.core.poll_response() {
            Some(value) => {
                consumer(value);
                self.cursor.advance(step);
                Ok(StepStatus::Complete)
            }
            None => Ok(StepStatus::Pending),
        }
    }

    /// At `step`, charge `cycles` ticks with no bus access. The step completes once they elapse.
    pub fn delay(&mut self, step: StepId, cycles: u32) -> Result<StepStatus, AccessFault> {
        match self.cursor.compare(step) {
            Ordering::Greater => return Ok(StepStatus::Complete),
            Ordering::Less => return Ok(StepStatus::Pending),
            Ordering::Equal => {}
        }
        self.cursor.advance(step);
        if cycles == 0 {
            return Ok(StepStatus::Complete);
        }
        // The current tick pays for the first cycle.
        *self.delay = cycles - 1;
        Ok(StepStatus::Pending)
    }

    /// At `step`, run `f` exactly once.
    pub fn commit_once<F>(&mut self, step: StepId, f: F) -> Result<StepStatus, AccessFault>
    where
        F: FnOnce(&mut LogicalCore),
    {
        if self.cursor.compare(step) == Ordering::Equal {
            f(&mut *self.core);
            self.cursor.advance(step);
        }
        Ok(StepStatus::Complete)
    }

    /// At `step`, take the bus lock token. Stays pending while the bus belongs to someone else.
    pub fn lock_bus(&mut self, step: StepId) -> Result<StepStatus, AccessFault> {
        match self.cursor.compare(step) {
            Ordering::Greater => Ok(StepStatus::Complete),
            Ordering::Less => Ok(StepStatus::Pending),
            Ordering::Equal => {
                if self.core.lock_bus(self.arbiter) {
                    self.cursor.advance(step);
                    Ok(StepStatus::Complete)
                }
                else {
                    Ok(StepStatus::Pending)
                }
            }
        }
    }

    pub fn unlock_bus(&mut self) {
        self.core.unlock_bus(self.arbiter);
    }

    pub fn fetch_u8(&mut self) -> Result<Option<u8>, AccessFault> {
        self.core.fetch_u8(&mut *self.translator, &mut *self.bus)
    }

    pub fn fetch_u16(&mut self) -> Result<Option<u16>, AccessFault> {
        self.core.fetch_u16(&mut *self.translator, &mut *self.bus)
    }

    pub fn fetch_u32(&mut self) -> Result<Option<u32>, AccessFault> {
        self.core.fetch_u32(&mut *self.translator, &mut *self.bus)
    }

    /// Read a memory operand. Occupies `step` and the step after it.
    pub fn read_operand<F>(&mut self, step: StepId, operand: &MemOperand, consumer: F) -> Result<StepStatus, AccessFault>
    where
        F: FnOnce(u32),
    {
        let access = operand.access(AccessKind::Read, self.core.cpl);
        let width = operand.width;
        step!(self.issue_once(step, |translator| {
            Ok(Request::mem_read(width, translator.translate(&access)?))
        }));
        self.collect_once(step.next(), |value| consumer(value as u32))
    }

    /// Write a memory operand. Occupies `step` and the step after it.
    pub fn write_operand(&mut self, step: StepId, operand: &MemOperand, value: u32) -> Result<StepStatus, AccessFault> {
        let access = operand.access(AccessKind::Write, self.core.cpl);
        let width = operand.width;
        step!(self.issue_once(step, |translator| {
            Ok(Request::mem_write(width, translator.translate(&access)?, value))
        }));
        self.collect_once(step.next(), |_| {})
    }

    pub fn port_in<F>(&mut self, step: StepId, port: u16, width: AccessWidth, consumer: F) -> Result<StepStatus, AccessFault>
    where
        F: FnOnce(u32),
    {
        step!(self.issue_once(step, |_| Ok(Request::io_read(width, port))));
        self.collect_once(step.next(), |value| consumer(value as u32))
    }

    pub fn port_out(&mut self, step: StepId, port: u16, width: AccessWidth, value: u32) -> Result<StepStatus, AccessFault> {
        step!(self.issue_once(step, |_| Ok(Request::io_write(width, port, value))));
        self.collect_once(step.next(), |_| {})
    }

    /// Push `value` onto SS:SP. SP is only updated once the write has completed.
    pub fn push(
        &mut self,
        step: StepId,
        ss: u16,
        sp: &mut u16,
        width: AccessWidth,
        value: u32,
    ) -> Result<StepStatus, AccessFault> {
        let new_sp = sp.wrapping_sub(width.bytes() as u16);
        let access = LogicalAccess::new(Segment::SS, ss, new_sp as u32, AccessKind::Write, width).with_cpl(self.core.cpl);
        step!(self.issue_once(step, |translator| {
            Ok(Request::mem_write(width, translator.translate(&access)?, value))
        }));
        self.collect_once(step.next(), |_| *sp = new_sp)
    }

    /// Pop a value from SS:SP. SP is only updated once the value has been delivered.
    pub fn pop<F>(
        &mut self,
        step: StepId,
        ss: u16,
        sp: &mut u16,
        width: AccessWidth,
        consumer: F,
    ) -> Result<StepStatus, AccessFault>
    where
        F: FnOnce(u32),
    {
        let access = LogicalAccess::new(Segment::SS, ss, *sp as u32, AccessKind::Read, width).with_cpl(self.core.cpl);
        step!(self.issue_once(step, |translator| {
            Ok(Request::mem_read(width, translator.translate(&access)?))
        }));
        self.collect_once(step.next(), |value| {
            consumer(value as u32);
            *sp = sp.wrapping_add(width.bytes() as u16);
        })
    }

    /// Real-mode interrupt entry: fetch the vector from the interrupt table, push FLAGS, CS and IP,
    /// then load CS:IP from the vector and flush the queue. Uses interrupt steps 0 through 8.
    pub fn interrupt_entry(&mut self, frame: &mut InterruptFrame) -> Result<StepStatus, AccessFault> {
        let table_entry = frame.vector as u32 * 4;
        step!(self.issue_once(StepId::Interrupt(0), |_| {
            Ok(Request::new(RequestKind::MemRead, AccessWidth::Dword, table_entry, 0))
        }));
        step!(self.collect_once(StepId::Interrupt(1), |value| frame.handler = value as u32));

        let ss = frame.ss;
        step!(self.push(StepId::Interrupt(2), ss, &mut frame.sp, AccessWidth::Word, frame.flags as u32));
        step!(self.push(StepId::Interrupt(4), ss, &mut frame.sp, AccessWidth::Word, frame.cs as u32));
        step!(self.push(StepId::Interrupt(6), ss, &mut frame.sp, AccessWidth::Word, frame.ip as u32));

        self.commit_once(StepId::Interrupt(8), |core| {
            frame.cs = (frame.handler >> 16) as u16;
            frame.ip = frame.handler as u16;
            core.flush(Some(CodeAddress::new(frame.cs, frame.ip as u32)));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bus::MemoryBus, config::BiuConfig, cpu_common::CpuGeneration, translate::RealModeTranslator};

    #[test]
    fn test_cursor_families() {
        let mut cursor = StepCursor::default();
        cursor.advance(StepId::ModRm(0));
        cursor.advance(StepId::ModRm(1));
        assert_eq!(cursor.compare(StepId::ModRm(1)), Ordering::Greater);
        assert_eq!(cursor.compare(StepId::ModRm(2)), Ordering::Equal);
        // Other families are untouched.
        assert_eq!(cursor.compare(StepId::Stack(0)), Ordering::Equal);
        cursor.reset();
        assert_eq!(cursor.position(StepId::ModRm(0)), 0);
    }

    #[test]
    fn test_issue_once_is_idempotent() {
        let mut core = LogicalCore::new(0, &BiuConfig::new(CpuGeneration::Intel8088));
        let mut arbiter = BusArbiter::new();
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel8088);
        let mut bus = MemoryBus::new(0x1000);
        let mut cursor = StepCursor::default();
        let mut delay = 0;

        let mut cx = StepContext {
            core: &mut core,
            arbiter: &mut arbiter,
            translator: &mut translator,
            bus: &mut bus,
            cursor: &mut cursor,
            delay: &mut delay,
        };
        let mut built = 0;
        for _ in 0..3 {
            let status = cx.issue_once(StepId::Direct(0), |_| {
                built += 1;
                Ok(Request::io_read(AccessWidth::Byte, 0x60))
            });
            assert!(matches!(status, Ok(_)));
        }
        assert_eq!(built, 1);
        assert_eq!(cx.cursor.position(StepId::Direct(0)), 1);

        // Nothing to collect yet: pending, no mutation.
        let mut collected = None;
        assert_eq!(
            cx.collect_once(StepId::Direct(1), |v| collected = Some(v)),
            Ok(StepStatus::Pending)
        );
        assert_eq!(collected, None);
        assert_eq!(cx.cursor.position(StepId::Direct(0)), 1);
    }

    #[test]
    fn test_translation_fault_propagates() {
        let mut core = LogicalCore::new(0, &BiuConfig::new(CpuGeneration::Intel80286));
        let mut arbiter = BusArbiter::new();
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel80286);
        let mut bus = MemoryBus::new(0x1000);
        let mut cursor = StepCursor::default();
        let mut delay = 0;
        let mut cx = StepContext {
            core: &mut core,
            arbiter: &mut arbiter,
            translator: &mut translator,
            bus: &mut bus,
            cursor: &mut cursor,
            delay: &mut delay,
        };

        let operand = MemOperand::new(Segment::DS, 0, 0xFFFF, AccessWidth::Word);
        let result = cx.read_operand(StepId::ModRm(0), &operand, |_| {});
        assert_eq!(result, Err(AccessFault::GeneralProtection(0)));
        assert!(!cx.core.has_pending_request());
        assert_eq!(cx.cursor.position(StepId::ModRm(0)), 0);
    }

    #[test]
    fn test_delay() {
        let mut core = LogicalCore::new(0, &BiuConfig::default());
        let mut arbiter = BusArbiter::new();
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel8088);
        let mut bus = MemoryBus::new(0x1000);
        let mut cursor = StepCursor::default();
        let mut delay = 0;
        let mut cx = StepContext {
            core: &mut core,
            arbiter: &mut arbiter,
            translator: &mut translator,
            bus: &mut bus,
            cursor: &mut cursor,
            delay: &mut delay,
        };
        assert_eq!(cx.delay(StepId::Direct(0), 0), Ok(StepStatus::Complete));
        assert_eq!(cx.delay(StepId::Direct(1), 3), Ok(StepStatus::Pending));
        assert_eq!(cx.delay(StepId::Direct(1), 3), Ok(StepStatus::Complete));
        assert_eq!(*cx.delay, 2);
    }
}
