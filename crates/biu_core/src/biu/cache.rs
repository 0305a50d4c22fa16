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

    biu::cache.rs

    Single-line read cache.

    Each access class keeps the most recent bus-width block it read. A hit
    only saves the PhysicalBus call; bus cycle timing is charged regardless.
*/

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessClass {
    Prefetch,
    Normal,
}

#[derive(Copy, Clone, Debug)]
struct CacheLine {
    base: u32,
    size: u32,
    data: [u8; 4],
    epoch: u64,
}

impl CacheLine {
    #[inline]
    fn contains(&self, address: u32) -> bool {
        address.wrapping_sub(self.base) < self.size
    }

    #[inline]
    fn overlaps(&self, address: u32, len: u32) -> bool {
        self.base < address.wrapping_add(len) && address < self.base.wrapping_add(self.size)
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct ReadCache {
    prefetch: Option<CacheLine>,
    normal: Option<CacheLine>,
    pub hits: u64,
    pub misses: u64,
}

impl ReadCache {
    #[inline]
    fn line(&self, class: AccessClass) -> &Option<CacheLine> {
        match class {
            AccessClass::Prefetch => &self.prefetch,
            AccessClass::Normal => &self.normal,
        }
    }

    /// Look up `address`. A line only hits if it was filled with the same block size and no wait
    /// state has been charged since (`epoch` unchanged).
    pub fn lookup(&mut self, class: AccessClass, address: u32, size: u32, epoch: u64) -> Option<u8> {
        let hit = match self.line(class) {
            Some(line) if line.size == size && line.epoch == epoch && line.contains(address) => {
                Some(line.data[(address - line.base) as usize])
            }
            _ => None,
        };
        if hit.is_some() {
            self.hits += 1;
        }
        else {
            self.misses += 1;
        }
        hit
    }

    pub fn fill(&mut self, class: AccessClass, base: u32, size: u32, data: [u8; 4], epoch: u64) {
        let line = Some(CacheLine { base, size, data, epoch });
        match class {
            AccessClass::Prefetch => self.prefetch = line,
            AccessClass::Normal => self.normal = line,
        }
    }

    /// Drop any line overlapping `address..address + len`.
    pub fn invalidate_range(&mut self, address: u32, len: u32) {
        for line in [&mut self.prefetch, &mut self.normal] {
            if matches!(line, Some(l) if l.overlaps(address, len)) {
                *line = None;
            }
        }
    }

    pub fn invalidate(&mut self) {
        self.prefetch = None;
        self.normal = None;
    }
}
