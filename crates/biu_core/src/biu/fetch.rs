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

    biu::fetch.rs

    Prefetch engine and opcode fetch primitives.

    The fetch cursor points at the next byte the queue will be filled from.
    The execution unit's position is the cursor minus the queue length. A
    fault raised while fetching is latched and reported only once the
    execution unit has drained the queue up to it.
*/

use crate::{
    biu::{cache::AccessClass, LogicalCore},
    bus::PhysicalBus,
    cpu_common::CodeAddress,
    error::AccessFault,
    translate::{AddressTranslator, LogicalAccess},
};

#[derive(Copy, Clone, Debug, Default)]
pub struct FetchState {
    /// Address of the next byte to fetch.
    pub cursor: CodeAddress,
    /// A fault raised by the prefetcher, reported once the queue runs dry.
    pub fault: Option<AccessFault>,
    /// One-shot burst limit after a flush to an address not aligned to the bus width.
    pub throttle: Option<u32>,
}

impl FetchState {
    pub fn new(cursor: CodeAddress) -> Self {
        Self {
            cursor,
            fault: None,
            throttle: None,
        }
    }
}

impl LogicalCore {
    #[inline]
    fn offset_mask(&self) -> u32 {
        if self.generation().wraps_offsets() {
            0xFFFF
        }
        else {
            0xFFFF_FFFF
        }
    }

    /// The address of the next byte the execution unit will consume.
    pub fn eu_address(&self) -> CodeAddress {
        let cursor = self.fetch.cursor;
        CodeAddress::new(
            cursor.selector,
            cursor.offset.wrapping_sub(self.queue.len() as u32) & self.offset_mask(),
        )
    }

    #[inline]
    pub fn fetch_cursor(&self) -> CodeAddress {
        self.fetch.cursor
    }

    #[inline]
    pub fn fetch_fault(&self) -> Option<AccessFault> {
        self.fetch.fault
    }

    /// Clear the queue and reset the fetch cursor to `target`, or if None, to the execution unit's
    /// current position. Required on every control transfer. Clears any latched fetch fault.
    pub fn flush(&mut self, target: Option<CodeAddress>) {
        let target = target.unwrap_or_else(|| self.eu_address());
        self.queue.flush();
        self.fetch.cursor = target;
        self.fetch.fault = None;

        let bus_bytes = self.timing.bus_width.bytes();
        let misalign = target.offset & (bus_bytes - 1);
        self.fetch.throttle = if misalign != 0 { Some(bus_bytes - misalign) } else { None };

        self.stats.flushes += 1;
        self.trace_comment("FLUSH");
    }

    /// A prefetch burst may start: the queue exists, the core is running, no fetch fault is
    /// latched and at least a minimum burst's worth of space is free.
    pub fn fetch_eligible(&self) -> bool {
        self.queue.is_present()
            && !self.halted
            && self.fetch.fault.is_none()
            && self.queue.free() >= self.timing.min_fetch_burst()
    }

    /// Read one more byte at the fetch cursor into the queue. Returns false if the queue is full or
    /// absent, a fetch fault is latched, or this fetch raised one.
    pub fn fill(&mut self, translator: &mut dyn AddressTranslator, bus: &mut dyn PhysicalBus) -> bool {
        self.fill_one(translator, bus).is_some()
    }

    fn fill_one(&mut self, translator: &mut dyn AddressTranslator, bus: &mut dyn PhysicalBus) -> Option<u32> {
        if !self.queue.is_present() || self.queue.is_full() || self.fetch.fault.is_some() {
            return None;
        }
        match self.fetch_physical(translator) {
            Ok(physical) => {
                let byte = self.cached_read(AccessClass::Prefetch, physical, bus);
                self.queue.push8(byte, physical);
                self.advance_cursor();
                Some(physical)
            }
            Err(fault) => {
                log::debug!("core {}: fetch fault at {}: {}", self.id(), self.fetch.cursor, fault);
                self.trace_comment("FETCH_FAULT");
                self.fetch.fault = Some(fault);
                None
            }
        }
    }

    /// Fill a burst of up to one bus width, or the throttled count after an unaligned flush.
    /// A burst never runs past the next bus alignment boundary.
    /// Returns the physical address of the first byte and the number of bytes fetched.
    pub(crate) fn fetch_burst(
        &mut self,
        translator: &mut dyn AddressTranslator,
        bus: &mut dyn PhysicalBus,
    ) -> Option<(u32, u32)> {
        let bus_bytes = self.timing.bus_width.bytes();
        let to_boundary = bus_bytes - (self.fetch.cursor.offset & (bus_bytes - 1));
        let limit = match self.fetch.throttle.take() {
            Some(n) => {
                self.trace_comment("THROTTLE");
                n
            }
            None => bus_bytes,
        }
        .min(to_boundary);

        let mut first = None;
        let mut count = 0;
        while count < limit {
            match self.fill_one(translator, bus) {
                Some(physical) => {
                    first.get_or_insert(physical);
                    count += 1;
                }
                None => break,
            }
        }
        first.map(|physical| (physical, count))
    }

    fn fetch_physical(&mut self, translator: &mut dyn AddressTranslator) -> Result<u32, AccessFault> {
        let access = LogicalAccess::fetch(self.fetch.cursor.selector, self.fetch.cursor.offset, self.cpl);
        let linear = translator.translate(&access)?;
        let physical = translator.map_page(linear, false, self.cpl)?;
        Ok(physical & self.physical_mask())
    }

    #[inline]
    fn advance_cursor(&mut self) {
        let mask = self.offset_mask();
        self.fetch.cursor.offset = self.fetch.cursor.offset.wrapping_add(1) & mask;
    }

    /// Read a byte through the single-line read cache. On a miss the whole bus-width block
    /// containing `physical` is read.
    pub(crate) fn cached_read(&mut self, class: AccessClass, physical: u32, bus: &mut dyn PhysicalBus) -> u8 {
        let size = self.timing.bus_width.bytes();
        if let Some(byte) = self.cache.lookup(class, physical, size, self.cycle.waitstate_epoch) {
            self.stats.cache_hits += 1;
            return byte;
        }
        let mask = self.physical_mask();
        let base = physical & !(size - 1);
        let mut data = [0u8; 4];
        for (i, byte) in data.iter_mut().take(size as usize).enumerate() {
            *byte = bus.read_u8(base.wrapping_add(i as u32) & mask);
        }
        self.stats.physical_reads += size as u64;
        self.cache.fill(class, base, size, data, self.cycle.waitstate_epoch);
        data[(physical - base) as usize]
    }

    /// Fetch a byte synchronously, bypassing the queue. Used by generations without a queue.
    fn fetch_direct(
        &mut self,
        translator: &mut dyn AddressTranslator,
        bus: &mut dyn PhysicalBus,
    ) -> Result<u8, AccessFault> {
        let physical = self.fetch_physical(translator)?;
        let byte = self.cached_read(AccessClass::Prefetch, physical, bus);
        self.advance_cursor();
        Ok(byte)
    }

    /// Consume `N` opcode bytes. Returns Ok(None) without consuming anything if fewer than `N`
    /// bytes are queued, or the latched fetch fault once the queue can no longer satisfy the read.
    fn fetch_bytes<const N: usize>(
        &mut self,
        translator: &mut dyn AddressTranslator,
        bus: &mut dyn PhysicalBus,
    ) -> Result<Option<[u8; N]>, AccessFault> {
        let mut bytes = [0u8; N];
        if !self.queue.is_present() {
            for byte in bytes.iter_mut() {
                *byte = self.fetch_direct(translator, bus)?;
            }
            return Ok(Some(bytes));
        }

        if self.queue.len() < N {
            return match self.fetch.fault {
                Some(fault) => Err(fault),
                None => Ok(None),
            };
        }
        for byte in bytes.iter_mut() {
            *byte = self.queue.pop().unwrap_or_default();
        }
        Ok(Some(bytes))
    }

    pub fn fetch_u8(
        &mut self,
        translator: &mut dyn AddressTranslator,
        bus: &mut dyn PhysicalBus,
    ) -> Result<Option<u8>, AccessFault> {
        Ok(self.fetch_bytes::<1>(translator, bus)?.map(|b| b[0]))
    }

    pub fn fetch_u16(
        &mut self,
        translator: &mut dyn AddressTranslator,
        bus: &mut dyn PhysicalBus,
    ) -> Result<Option<u16>, AccessFault> {
        Ok(self.fetch_bytes::<2>(translator, bus)?.map(u16::from_le_bytes))
    }

    pub fn fetch_u32(
        &mut self,
        translator: &mut dyn AddressTranslator,
        bus: &mut dyn PhysicalBus,
    ) -> Result<Option<u32>, AccessFault> {
        Ok(self.fetch_bytes::<4>(translator, bus)?.map(u32::from_le_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bus::MemoryBus,
        config::BiuConfig,
        cpu_common::CpuGeneration,
        translate::RealModeTranslator,
    };

    fn setup(generation: CpuGeneration) -> (LogicalCore, RealModeTranslator, MemoryBus) {
        let core = LogicalCore::new(0, &BiuConfig::new(generation));
        let translator = RealModeTranslator::new(generation);
        let mut bus = MemoryBus::new(0x10000);
        let code: Vec<u8> = (0..0x40).collect();
        bus.load(0x100, &code);
        (core, translator, bus)
    }

    #[test]
    fn test_flush_resets_cursor() {
        let (mut core, mut translator, mut bus) = setup(CpuGeneration::Intel8088);
        core.flush(Some(CodeAddress::new(0, 0x100)));
        assert!(core.fill(&mut translator, &mut bus));
        assert!(core.fill(&mut translator, &mut bus));
        assert_eq!(core.eu_address(), CodeAddress::new(0, 0x100));
        assert_eq!(core.fetch_u8(&mut translator, &mut bus), Ok(Some(0x00)));

        // A flush with no target lands on the execution unit's position.
        core.flush(None);
        assert!(core.queue().is_empty());
        assert_eq!(core.fetch_cursor(), CodeAddress::new(0, 0x101));
    }

    #[test]
    fn test_fetch_pending_consumes_nothing() {
        let (mut core, mut translator, mut bus) = setup(CpuGeneration::Intel8086);
        core.flush(Some(CodeAddress::new(0, 0x100)));
        core.fill(&mut translator, &mut bus);
        assert_eq!(core.fetch_u16(&mut translator, &mut bus), Ok(None));
        assert_eq!(core.queue().len(), 1);
        core.fill(&mut translator, &mut bus);
        assert_eq!(core.fetch_u16(&mut translator, &mut bus), Ok(Some(0x0100)));
    }

    #[test]
    fn test_unaligned_flush_throttles_one_burst() {
        let (mut core, mut translator, mut bus) = setup(CpuGeneration::Intel8086);
        core.flush(Some(CodeAddress::new(0, 0x101)));
        assert_eq!(core.fetch_burst(&mut translator, &mut bus), Some((0x101, 1)));
        assert_eq!(core.fetch_burst(&mut translator, &mut bus), Some((0x102, 2)));
        assert_eq!(core.fetch_burst(&mut translator, &mut bus), Some((0x104, 2)));
        assert_eq!(core.queue().len(), 5);
    }

    #[test]
    fn test_burst_stops_at_bus_boundary() {
        let (mut core, mut translator, mut bus) = setup(CpuGeneration::Intel80486);
        core.flush(Some(CodeAddress::new(0, 0x101)));
        // Consume the one-shot throttle, then knock the cursor off alignment again.
        assert_eq!(core.fetch_burst(&mut translator, &mut bus), Some((0x101, 3)));
        assert_eq!(core.fetch_u8(&mut translator, &mut bus), Ok(Some(0x01)));
        core.flush(None);
        assert_eq!(core.fetch_cursor(), CodeAddress::new(0, 0x102));
        core.fetch.throttle = None;

        assert_eq!(core.fetch_burst(&mut translator, &mut bus), Some((0x102, 2)));
        assert_eq!(core.fetch_cursor(), CodeAddress::new(0, 0x104));
        assert_eq!(core.fetch_burst(&mut translator, &mut bus), Some((0x104, 4)));
    }

    #[test]
    fn test_small_queue_still_fetches() {
        let mut config = BiuConfig::new(CpuGeneration::Intel80386Dx);
        config.queue_size = Some(2);
        let mut core = LogicalCore::new(0, &config);
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel80386Dx);
        let mut bus = MemoryBus::new(0x10000);
        bus.load(0x100, &[0x34, 0x12]);

        core.flush(Some(CodeAddress::new(0, 0x100)));
        assert!(core.fetch_eligible());
        assert_eq!(core.fetch_burst(&mut translator, &mut bus), Some((0x100, 2)));
        assert!(!core.fetch_eligible());
        assert_eq!(core.fetch_u16(&mut translator, &mut bus), Ok(Some(0x1234)));
        assert!(core.fetch_eligible());
    }

    #[test]
    fn test_fetch_fault_latched() {
        let (mut core, mut translator, mut bus) = setup(CpuGeneration::Intel80386Dx);
        translator.mark_not_present(0x1000..0x2000);
        core.flush(Some(CodeAddress::new(0, 0xFFE)));
        assert!(core.fill(&mut translator, &mut bus));
        assert!(core.fill(&mut translator, &mut bus));
        assert!(!core.fill(&mut translator, &mut bus));
        assert!(core.fetch_fault().is_some());
        assert!(!core.fetch_eligible());

        // Queued bytes ahead of the fault are still delivered.
        assert_eq!(core.fetch_u8(&mut translator, &mut bus), Ok(Some(0)));
        assert_eq!(core.fetch_u8(&mut translator, &mut bus), Ok(Some(0)));
        assert!(matches!(
            core.fetch_u8(&mut translator, &mut bus),
            Err(AccessFault::PageFault { linear: 0x1000, .. })
        ));

        core.flush(Some(CodeAddress::new(0, 0x100)));
        assert!(core.fetch_fault().is_none());
    }

    #[test]
    fn test_direct_fetch_without_queue() {
        let mut config = BiuConfig::new(CpuGeneration::Intel80286);
        config.queue_size = Some(0);
        let mut core = LogicalCore::new(0, &config);
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel80286);
        let mut bus = MemoryBus::new(0x10000);
        bus.load(0x200, &[0x78, 0x56, 0x34, 0x12]);

        core.flush(Some(CodeAddress::new(0x20, 0)));
        assert!(!core.fetch_eligible());
        assert_eq!(core.fetch_u32(&mut translator, &mut bus), Ok(Some(0x1234_5678)));
        assert_eq!(core.fetch_cursor(), CodeAddress::new(0x20, 4));
    }

    #[test]
    fn test_cache_saves_physical_reads() {
        let (mut core, mut translator, mut bus) = setup(CpuGeneration::Intel80486);
        core.flush(Some(CodeAddress::new(0, 0x100)));
        assert_eq!(core.fetch_burst(&mut translator, &mut bus), Some((0x100, 4)));
        assert_eq!(bus.stats().mem_reads, 4);
        assert_eq!(core.stats().cache_hits, 3);
    }
}
