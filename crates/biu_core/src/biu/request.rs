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

    biu::request.rs

    Request and response channels between the execution unit and the bus
    interface. Each channel holds a single slot, so a core never has more
    than one outstanding transaction.
*/

use std::fmt;

use crate::cpu_common::AccessWidth;

/// Bit shift for each byte lane of a multi-byte transfer.
pub const LANE_SHIFT: [u32; 4] = [0, 8, 16, 24];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    MemRead,
    MemWrite,
    IoRead,
    IoWrite,
}

impl RequestKind {
    #[inline]
    pub fn is_read(&self) -> bool {
        matches!(self, RequestKind::MemRead | RequestKind::IoRead)
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, RequestKind::IoRead | RequestKind::IoWrite)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            RequestKind::MemRead => "MEMR",
            RequestKind::MemWrite => "MEMW",
            RequestKind::IoRead => "IOR",
            RequestKind::IoWrite => "IOW",
        };
        write!(f, "{}", s)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub kind: RequestKind,
    pub width: AccessWidth,
    /// If set, `address` is linear and each lane is mapped through the pager before it is driven
    /// onto the bus. Otherwise `address` is physical (or a port number for I/O).
    pub uses_linear_translation: bool,
    pub address: u32,
    /// The value to write. Ignored for reads.
    pub value: u32,
    pub(crate) lane: u32,
    pub(crate) acc: u64,
    pub(crate) tag: u64,
}

impl Request {
    pub fn new(kind: RequestKind, width: AccessWidth, address: u32, value: u32) -> Self {
        Self {
            kind,
            width,
            uses_linear_translation: false,
            address,
            value,
            lane: 0,
            acc: 0,
            tag: 0,
        }
    }

    pub fn mem_read(width: AccessWidth, linear: u32) -> Self {
        Self::new(RequestKind::MemRead, width, linear, 0).linear()
    }

    pub fn mem_write(width: AccessWidth, linear: u32, value: u32) -> Self {
        Self::new(RequestKind::MemWrite, width, linear, value).linear()
    }

    pub fn io_read(width: AccessWidth, port: u16) -> Self {
        Self::new(RequestKind::IoRead, width, port as u32, 0)
    }

    pub fn io_write(width: AccessWidth, port: u16, value: u32) -> Self {
        Self::new(RequestKind::IoWrite, width, port as u32, value)
    }

    /// Mark the address as linear.
    pub fn linear(mut self) -> Self {
        self.uses_linear_translation = true;
        self
    }

    #[inline]
    pub fn lanes_remaining(&self) -> u32 {
        self.width.bytes() - self.lane
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.lane >= self.width.bytes()
    }

    /// The byte for lane `lane` of the write value.
    #[inline]
    pub(crate) fn lane_byte(&self, lane: u32) -> u8 {
        (self.value >> LANE_SHIFT[lane as usize]) as u8
    }

    /// Merge `bytes` bytes read at the current lane into the accumulator.
    #[inline]
    pub(crate) fn accumulate(&mut self, lane: u32, data: u32, bytes: u32) {
        let mask = if bytes >= 4 { 0xFFFF_FFFF } else { (1u64 << (bytes * 8)) - 1 };
        self.acc |= ((data as u64) & mask) << LANE_SHIFT[lane as usize];
    }

    fn response(&self) -> Response {
        let value = if self.kind.is_read() {
            self.acc
        }
        else {
            self.value as u64
        };
        Response {
            value: value & self.width.mask(),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub value: u64,
}

#[derive(Default)]
pub struct RequestChannel {
    slot: Option<Request>,
    next_tag: u64,
}

impl RequestChannel {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// Place a request in the slot. Returns false if the slot is occupied.
    pub fn push(&mut self, mut request: Request) -> bool {
        if self.slot.is_some() {
            return false;
        }
        self.next_tag = self.next_tag.wrapping_add(1);
        request.lane = 0;
        request.acc = 0;
        request.tag = self.next_tag;
        self.slot = Some(request);
        true
    }

    #[inline]
    pub fn current(&self) -> Option<&Request> {
        self.slot.as_ref()
    }

    #[inline]
    pub(crate) fn current_mut(&mut self) -> Option<&mut Request> {
        self.slot.as_mut()
    }

    /// A request with lanes still to be transferred.
    #[inline]
    pub fn pending(&self) -> Option<&Request> {
        self.slot.as_ref().filter(|r| !r.is_complete())
    }

    /// Retire the request with `tag`, producing its response. A request that was discarded (or
    /// replaced) while its last lane was on the bus produces nothing.
    pub(crate) fn retire(&mut self, tag: u64) -> Option<Response> {
        match self.slot {
            Some(request) if request.tag == tag && request.is_complete() => {
                self.slot = None;
                Some(request.response())
            }
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

#[derive(Default)]
pub struct ResponseChannel {
    slot: Option<Response>,
}

impl ResponseChannel {
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.slot.is_some()
    }

    pub(crate) fn post(&mut self, response: Response) {
        if self.slot.is_some() {
            log::warn!("Response overwritten before collection");
        }
        self.slot = Some(response);
    }

    pub fn take(&mut self) -> Option<Response> {
        self.slot.take()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_slot() {
        let mut channel = RequestChannel::default();
        assert!(channel.push(Request::io_read(AccessWidth::Byte, 0x60)));
        assert!(!channel.push(Request::io_read(AccessWidth::Byte, 0x61)));
        assert_eq!(channel.current().map(|r| r.address), Some(0x60));
    }

    #[test]
    fn test_lane_assembly() {
        let mut channel = RequestChannel::default();
        channel.push(Request::mem_read(AccessWidth::Dword, 0x1000));
        let tag = {
            let request = channel.current_mut().unwrap();
            request.accumulate(0, 0x78, 1);
            request.accumulate(1, 0x3456, 2);
            request.accumulate(3, 0xFF12, 1);
            request.lane = 4;
            request.tag
        };
        // A stale tag doesn't retire the request.
        assert_eq!(channel.retire(tag + 1), None);
        assert_eq!(channel.retire(tag), Some(Response { value: 0x1234_5678 }));
        assert!(channel.is_empty());
    }

    #[test]
    fn test_write_response_echoes_value() {
        let mut request = Request::mem_write(AccessWidth::Word, 0x101, 0xAB1234);
        assert_eq!(request.lane_byte(0), 0x34);
        assert_eq!(request.lane_byte(1), 0x12);
        request.lane = 2;
        assert_eq!(request.response().value, 0x1234);
    }
}
