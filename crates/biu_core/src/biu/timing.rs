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

    biu::timing.rs

    Per-generation bus timing tables.

    A TimingTable is selected once per CPU model change and determines the
    bus cycle handler, bus width, queue capacity and wait state constants.
*/

use std::fmt;

use crate::{config::TimingOverrides, cpu_common::CpuGeneration};

/// Which active-cycle handler drives the bus.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BusHandler {
    /// 8086/NEC class: T1 T2 T3 [Tw..] T4
    #[default]
    FourPhase,
    /// 286/386 class: Ts [Tw..] Tc
    TwoPhase,
    /// 486 class: a single T state with trailing wait states
    SinglePhase,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DataBusWidth {
    #[default]
    Eight,
    Sixteen,
    ThirtyTwo,
}

impl DataBusWidth {
    #[inline(always)]
    pub fn bytes(&self) -> u32 {
        match self {
            DataBusWidth::Eight => 1,
            DataBusWidth::Sixteen => 2,
            DataBusWidth::ThirtyTwo => 4,
        }
    }
}

impl fmt::Display for DataBusWidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-bit", self.bytes() * 8)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TimingTable {
    pub handler: BusHandler,
    pub bus_width: DataBusWidth,
    /// Mask applied to every physical address the core drives onto the bus.
    pub address_mask: u32,
    /// Prefetch queue capacity in bytes. Zero means the generation has no queue.
    pub queue_size: usize,
    pub mem_waitstates: u32,
    pub io_waitstates: u32,
    /// Extra wait states charged to byte transfers on a bus wider than 8 bits.
    pub narrow_waitstates: u32,
}

impl TimingTable {
    pub const fn for_generation(generation: CpuGeneration) -> Self {
        match generation {
            CpuGeneration::Intel8088 | CpuGeneration::NecV20 => TimingTable {
                handler: BusHandler::FourPhase,
                bus_width: DataBusWidth::Eight,
                address_mask: 0x000F_FFFF,
                queue_size: 4,
                mem_waitstates: 0,
                io_waitstates: 1,
                narrow_waitstates: 0,
            },
            CpuGeneration::Intel8086 | CpuGeneration::NecV30 => TimingTable {
                handler: BusHandler::FourPhase,
                bus_width: DataBusWidth::Sixteen,
                address_mask: 0x000F_FFFF,
                queue_size: 6,
                mem_waitstates: 0,
                io_waitstates: 1,
                narrow_waitstates: 0,
            },
            CpuGeneration::Intel80286 => TimingTable {
                handler: BusHandler::TwoPhase,
                bus_width: DataBusWidth::Sixteen,
                address_mask: 0x00FF_FFFF,
                queue_size: 6,
                mem_waitstates: 1,
                io_waitstates: 1,
                narrow_waitstates: 1,
            },
            CpuGeneration::Intel80386Sx => TimingTable {
                handler: BusHandler::TwoPhase,
                bus_width: DataBusWidth::Sixteen,
                address_mask: 0x00FF_FFFF,
                queue_size: 16,
                mem_waitstates: 1,
                io_waitstates: 1,
                narrow_waitstates: 1,
            },
            CpuGeneration::Intel80386Dx => TimingTable {
                handler: BusHandler::TwoPhase,
                bus_width: DataBusWidth::ThirtyTwo,
                address_mask: 0xFFFF_FFFF,
                queue_size: 16,
                mem_waitstates: 1,
                io_waitstates: 1,
                narrow_waitstates: 0,
            },
            CpuGeneration::Intel80486 => TimingTable {
                handler: BusHandler::SinglePhase,
                bus_width: DataBusWidth::ThirtyTwo,
                address_mask: 0xFFFF_FFFF,
                queue_size: 32,
                mem_waitstates: 0,
                io_waitstates: 1,
                narrow_waitstates: 0,
            },
        }
    }

    pub fn with_overrides(mut self, queue_size: Option<usize>, overrides: &TimingOverrides) -> Self {
        if let Some(size) = queue_size {
            self.queue_size = size;
        }
        if let Some(ws) = overrides.mem_waitstates {
            self.mem_waitstates = ws;
        }
        if let Some(ws) = overrides.io_waitstates {
            self.io_waitstates = ws;
        }
        if let Some(ws) = overrides.narrow_waitstates {
            self.narrow_waitstates = ws;
        }
        self
    }

    /// A prefetch burst is only started once this many bytes are free in the queue. A queue
    /// narrower than the bus starts a burst whenever it is empty.
    #[inline]
    pub fn min_fetch_burst(&self) -> usize {
        (self.bus_width.bytes() as usize).min(self.queue_size)
    }

    #[inline]
    pub fn has_queue(&self) -> bool {
        self.queue_size > 0
    }

    /// The largest naturally aligned transfer (1, 2 or 4 bytes) starting at `address` that fits
    /// both the data bus and `remaining`. A transfer never crosses a bus alignment boundary.
    pub fn transfer_size(&self, address: u32, remaining: u32) -> u32 {
        let bus_bytes = self.bus_width.bytes();
        let to_boundary = bus_bytes - (address & (bus_bytes - 1));
        let mut size = 4;
        while size > 1 && (size > to_boundary || size > remaining || address & (size - 1) != 0) {
            size >>= 1;
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_size() {
        let t8 = TimingTable::for_generation(CpuGeneration::Intel8088);
        assert_eq!(t8.transfer_size(0x101, 2), 1);

        let t16 = TimingTable::for_generation(CpuGeneration::Intel8086);
        assert_eq!(t16.transfer_size(0x100, 2), 2);
        assert_eq!(t16.transfer_size(0x101, 2), 1);
        assert_eq!(t16.transfer_size(0x100, 4), 2);

        let t32 = TimingTable::for_generation(CpuGeneration::Intel80386Dx);
        assert_eq!(t32.transfer_size(0x100, 4), 4);
        assert_eq!(t32.transfer_size(0x102, 4), 2);
        assert_eq!(t32.transfer_size(0x103, 4), 1);
        assert_eq!(t32.transfer_size(0x101, 2), 1);
        assert_eq!(t32.transfer_size(0x101, 1), 1);
    }

    #[test]
    fn test_overrides() {
        let overrides = TimingOverrides {
            mem_waitstates: Some(3),
            ..Default::default()
        };
        let table = TimingTable::for_generation(CpuGeneration::Intel80286).with_overrides(Some(0), &overrides);
        assert_eq!(table.mem_waitstates, 3);
        assert_eq!(table.io_waitstates, 1);
        assert!(!table.has_queue());
    }

    #[test]
    fn test_min_fetch_burst() {
        let table = TimingTable::for_generation(CpuGeneration::Intel80386Dx);
        assert_eq!(table.min_fetch_burst(), 4);
        let small = table.with_overrides(Some(2), &TimingOverrides::default());
        assert_eq!(small.min_fetch_burst(), 2);
        let t8 = TimingTable::for_generation(CpuGeneration::Intel8088);
        assert_eq!(t8.min_fetch_burst(), 1);
    }
}
