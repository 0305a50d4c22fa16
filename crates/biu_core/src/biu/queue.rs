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

    biu::queue.rs

    Implements the prefetch queue. Each queued byte remembers the physical
    address it was fetched from so that writes into already-fetched code can
    be detected.
*/

use std::fmt::Display;

pub const QUEUE_MAX: usize = 32;

#[derive(Copy, Clone, Debug, Default)]
struct QueueEntry {
    byte: u8,
    physical: u32,
}

pub struct PrefetchQueue {
    size: usize,
    len: usize,
    back: usize,
    front: usize,
    q: [QueueEntry; QUEUE_MAX],
}

impl Default for PrefetchQueue {
    fn default() -> Self {
        Self {
            size: 0,
            len: 0,
            back: 0,
            front: 0,
            q: [QueueEntry::default(); QUEUE_MAX],
        }
    }
}

impl Display for PrefetchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.len {
            write!(f, "{:02X}", self.q[(self.back + i) % self.size].byte)?;
        }
        Ok(())
    }
}

impl PrefetchQueue {
    pub fn new(size: usize) -> Self {
        let mut queue = Self::default();
        queue.set_size(size);
        queue
    }

    /// Resize the queue. Resizing always empties it.
    pub fn set_size(&mut self, size: usize) {
        assert!(size <= QUEUE_MAX);
        self.size = size;
        self.flush();
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// A zero-capacity queue models a generation without a prefetch queue.
    #[inline]
    pub fn is_present(&self) -> bool {
        self.size > 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.size
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.size - self.len
    }

    #[inline]
    pub fn push8(&mut self, byte: u8, physical: u32) {
        if self.len < self.size {
            self.q[self.front] = QueueEntry { byte, physical };
            self.front = (self.front + 1) % self.size;
            self.len += 1;
        }
        else {
            panic!("Queue overrun!");
        }
    }

    #[inline]
    pub fn pop(&mut self) -> Option<u8> {
        if self.len > 0 {
            let byte = self.q[self.back].byte;
            self.back = (self.back + 1) % self.size;
            self.len -= 1;
            return Some(byte);
        }
        None
    }

    /// Look at the byte `n` positions from the head without consuming anything.
    #[inline]
    pub fn peek(&self, n: usize) -> Option<u8> {
        if n < self.len {
            Some(self.q[(self.back + n) % self.size].byte)
        }
        else {
            None
        }
    }

    /// Returns true if any queued byte was fetched from a physical address in
    /// `address..address + len`.
    pub fn overlaps(&self, address: u32, len: u32) -> bool {
        (0..self.len).any(|i| {
            let physical = self.q[(self.back + i) % self.size].physical;
            physical.wrapping_sub(address) < len
        })
    }

    /// Flush the queue. This resets the queue to an empty state.
    pub fn flush(&mut self) {
        log::trace!("flushing queue!");
        self.len = 0;
        self.back = 0;
        self.front = 0;
    }

    /// Write the contents of the queue in order to the provided slice.
    pub fn to_slice(&self, slice: &mut [u8]) {
        for (i, byte) in slice.iter_mut().take(self.len).enumerate() {
            *byte = self.q[(self.back + i) % self.size].byte;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fifo() {
        let mut queue = PrefetchQueue::new(4);
        for i in 0..4u8 {
            queue.push8(0x10 + i, 0x100 + i as u32);
        }
        assert!(queue.is_full());
        assert_eq!(queue.to_string(), "10111213");
        assert_eq!(queue.pop(), Some(0x10));
        queue.push8(0x14, 0x104);
        assert_eq!(queue.peek(3), Some(0x14));

        let mut bytes = [0u8; 4];
        queue.to_slice(&mut bytes);
        assert_eq!(bytes, [0x11, 0x12, 0x13, 0x14]);

        assert!(queue.overlaps(0x104, 1));
        assert!(!queue.overlaps(0x100, 1));

        queue.flush();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_absent_queue() {
        let queue = PrefetchQueue::new(0);
        assert!(!queue.is_present());
        assert_eq!(queue.free(), 0);
        assert!(!queue.overlaps(0, 0xFFFF_FFFF));
    }
}
