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

    bus::mod.rs

    Implements the physical side of the bus: the PhysicalBus trait the bus
    interface drives, and MemoryBus, a flat memory space with a port map of
    I/O devices and configurable wait states.

    The bus interface never interprets device semantics; it only moves bytes
    and asks how many wait states an address or port costs.
*/

use fxhash::FxHashMap;

pub const NO_IO_BYTE: u8 = 0xFF; // This is the byte read from an unconnected IO address.
pub const OPEN_BUS_BYTE: u8 = 0xFF; // This is the byte read from an unmapped memory address.

/// Byte-level access to physical memory and I/O ports.
///
/// Multi-byte I/O defaults to consecutive byte accesses in little-endian order. Implementors
/// with real 16 or 32-bit ports should override them.
pub trait PhysicalBus {
    fn read_u8(&mut self, address: u32) -> u8;
    fn write_u8(&mut self, address: u32, data: u8);

    fn io_read_u8(&mut self, port: u16) -> u8;
    fn io_write_u8(&mut self, port: u16, data: u8);

    fn io_read_u16(&mut self, port: u16) -> u16 {
        let lo = self.io_read_u8(port);
        let hi = self.io_read_u8(port.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    fn io_read_u32(&mut self, port: u16) -> u32 {
        let lo = self.io_read_u16(port);
        let hi = self.io_read_u16(port.wrapping_add(2));
        (hi as u32) << 16 | lo as u32
    }

    fn io_write_u16(&mut self, port: u16, data: u16) {
        let [lo, hi] = data.to_le_bytes();
        self.io_write_u8(port, lo);
        self.io_write_u8(port.wrapping_add(1), hi);
    }

    fn io_write_u32(&mut self, port: u16, data: u32) {
        self.io_write_u16(port, data as u16);
        self.io_write_u16(port.wrapping_add(2), (data >> 16) as u16);
    }

    /// Wait states incurred by a read of `address`, in addition to the generation's constants.
    fn read_wait(&mut self, _address: u32) -> u32 {
        0
    }

    fn write_wait(&mut self, _address: u32) -> u32 {
        0
    }

    fn io_wait(&mut self, _port: u16) -> u32 {
        0
    }
}

pub trait IoDevice {
    /// Read a byte from the specified port. The default implementation returns NO_IO_BYTE (0xFF).
    fn read_u8(&mut self, _port: u16) -> u8 {
        NO_IO_BYTE
    }

    /// Write a byte to the specified port. The default implementation does nothing.
    fn write_u8(&mut self, _port: u16, _data: u8) {}

    /// Return the number of wait states incurred by an access to the specified port.
    fn io_wait(&mut self, _port: u16) -> u32 {
        0
    }

    /// Return a list of ports the device should service.
    fn port_list(&self) -> Vec<u16>;
}

/// A device that latches the last byte written to each of its ports.
#[derive(Default)]
pub struct PortLatch {
    ports: FxHashMap<u16, u8>,
    wait: u32,
}

impl PortLatch {
    pub fn new(ports: impl IntoIterator<Item = u16>, wait: u32) -> Self {
        Self {
            ports: ports.into_iter().map(|p| (p, NO_IO_BYTE)).collect(),
            wait,
        }
    }
}

impl IoDevice for PortLatch {
    fn read_u8(&mut self, port: u16) -> u8 {
        self.ports.get(&port).copied().unwrap_or(NO_IO_BYTE)
    }

    fn write_u8(&mut self, port: u16, data: u8) {
        if let Some(latch) = self.ports.get_mut(&port) {
            *latch = data;
        }
    }

    fn io_wait(&mut self, _port: u16) -> u32 {
        self.wait
    }

    fn port_list(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.ports.keys().copied().collect();
        ports.sort_unstable();
        ports
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusEvent {
    MemRead { address: u32, data: u8 },
    MemWrite { address: u32, data: u8 },
    IoRead { port: u16, data: u8 },
    IoWrite { port: u16, data: u8 },
}

#[derive(Copy, Clone, Debug, Default)]
pub struct BusStats {
    pub mem_reads: u64,
    pub mem_writes: u64,
    pub io_reads: u64,
    pub io_writes: u64,
}

#[derive(Copy, Clone, Debug)]
struct WaitRange {
    start: u32,
    end: u32,
    waits: u32,
}

/// A flat physical memory space with a port map of I/O devices.
pub struct MemoryBus {
    memory: Vec<u8>,
    wait_ranges: Vec<WaitRange>,
    io_map: FxHashMap<u16, usize>,
    io_devices: Vec<Box<dyn IoDevice>>,
    log: Option<Vec<BusEvent>>,
    stats: BusStats,
}

impl MemoryBus {
    pub fn new(size: usize) -> Self {
        Self {
            memory: vec![0; size],
            wait_ranges: Vec::new(),
            io_map: FxHashMap::default(),
            io_devices: Vec::new(),
            log: None,
            stats: BusStats::default(),
        }
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }

    /// Copy `data` into memory at `address` without going through the bus.
    pub fn load(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        if start >= self.memory.len() {
            log::warn!("load(): address {:08X} outside of memory", address);
            return;
        }
        let end = (start + data.len()).min(self.memory.len());
        self.memory[start..end].copy_from_slice(&data[..end - start]);
    }

    pub fn peek(&self, address: u32) -> u8 {
        self.memory.get(address as usize).copied().unwrap_or(OPEN_BUS_BYTE)
    }

    pub fn peek_range(&self, address: u32, len: usize) -> &[u8] {
        let start = (address as usize).min(self.memory.len());
        let end = (start + len).min(self.memory.len());
        &self.memory[start..end]
    }

    /// Charge `waits` extra wait states to every memory access in `start..end`.
    pub fn add_wait_range(&mut self, start: u32, end: u32, waits: u32) {
        self.wait_ranges.push(WaitRange { start, end, waits });
    }

    pub fn install_device(&mut self, device: Box<dyn IoDevice>) {
        let idx = self.io_devices.len();
        for port in device.port_list() {
            if let Some(prev) = self.io_map.insert(port, idx) {
                log::warn!("Port {:04X} remapped from device {} to device {}", port, prev, idx);
            }
        }
        self.io_devices.push(device);
    }

    /// Start recording bus events. Any previous log is discarded.
    pub fn enable_log(&mut self) {
        self.log = Some(Vec::new());
    }

    pub fn take_log(&mut self) -> Vec<BusEvent> {
        self.log.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    #[inline]
    fn record(&mut self, event: BusEvent) {
        if let Some(log) = &mut self.log {
            log.push(event);
        }
    }

    fn range_wait(&self, address: u32) -> u32 {
        self.wait_ranges
            .iter()
            .filter(|r| address >= r.start && address < r.end)
            .map(|r| r.waits)
            .max()
            .unwrap_or(0)
    }
}

impl PhysicalBus for MemoryBus {
    fn read_u8(&mut self, address: u32) -> u8 {
        let data = self.peek(address);
        self.stats.mem_reads += 1;
        self.record(BusEvent::MemRead { address, data });
        data
    }

    fn write_u8(&mut self, address: u32, data: u8) {
        if let Some(byte) = self.memory.get_mut(address as usize) {
            *byte = data;
        }
        self.stats.mem_writes += 1;
        self.record(BusEvent::MemWrite { address, data });
    }

    fn io_read_u8(&mut self, port: u16) -> u8 {
        let data = match self.io_map.get(&port) {
            Some(&idx) => self.io_devices[idx].read_u8(port),
            None => NO_IO_BYTE,
        };
        self.stats.io_reads += 1;
        self.record(BusEvent::IoRead { port, data });
        data
    }

    fn io_write_u8(&mut self, port: u16, data: u8) {
        if let Some(&idx) = self.io_map.get(&port) {
            self.io_devices[idx].write_u8(port, data);
        }
        self.stats.io_writes += 1;
        self.record(BusEvent::IoWrite { port, data });
    }

    fn read_wait(&mut self, address: u32) -> u32 {
        self.range_wait(address)
    }

    fn write_wait(&mut self, address: u32) -> u32 {
        self.range_wait(address)
    }

    fn io_wait(&mut self, port: u16) -> u32 {
        match self.io_map.get(&port) {
            Some(&idx) => self.io_devices[idx].io_wait(port),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_and_log() {
        let mut bus = MemoryBus::new(0x1000);
        bus.load(0x10, &[0xAA, 0xBB]);
        bus.enable_log();
        assert_eq!(bus.read_u8(0x11), 0xBB);
        bus.write_u8(0x12, 0xCC);
        // Out of range reads float; writes are dropped.
        assert_eq!(bus.read_u8(0x2000), OPEN_BUS_BYTE);
        bus.write_u8(0x2000, 0x00);

        assert_eq!(
            bus.take_log(),
            vec![
                BusEvent::MemRead {
                    address: 0x11,
                    data: 0xBB
                },
                BusEvent::MemWrite {
                    address: 0x12,
                    data: 0xCC
                },
                BusEvent::MemRead {
                    address: 0x2000,
                    data: 0xFF
                },
                BusEvent::MemWrite {
                    address: 0x2000,
                    data: 0x00
                },
            ]
        );
        assert_eq!(bus.peek_range(0x10, 3), &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_io_map() {
        let mut bus = MemoryBus::new(0);
        bus.install_device(Box::new(PortLatch::new([0x60, 0x61], 2)));

        bus.io_write_u16(0x60, 0x1234);
        assert_eq!(bus.io_read_u8(0x60), 0x34);
        assert_eq!(bus.io_read_u16(0x60), 0x1234);
        assert_eq!(bus.io_read_u8(0x62), NO_IO_BYTE);
        assert_eq!(bus.io_wait(0x61), 2);
        assert_eq!(bus.io_wait(0x62), 0);
    }

    #[test]
    fn test_wait_ranges() {
        let mut bus = MemoryBus::new(0x10000);
        bus.add_wait_range(0xB800, 0xC000, 4);
        assert_eq!(bus.read_wait(0xB800), 4);
        assert_eq!(bus.write_wait(0xBFFF), 4);
        assert_eq!(bus.read_wait(0xC000), 0);
    }
}
