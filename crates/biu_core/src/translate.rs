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

    translate.rs

    Address translation service consumed by the bus interface.

    Translation from a logical address to a linear one, and from a linear
    address to a physical one, belongs to the segmentation and paging layer.
    The bus interface only calls through the AddressTranslator trait.
    RealModeTranslator is a reference implementation of real-mode segment
    arithmetic with an optional set of not-present pages.
*/

use std::ops::Range;

use crate::{
    cpu_common::{AccessWidth, CpuGeneration, Segment},
    error::AccessFault,
};

/// Page fault error code bits.
pub const PF_WRITE: u16 = 0b0010;
pub const PF_USER: u16 = 0b0100;

const PAGE_SHIFT: u32 = 12;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Fetch,
}

#[derive(Copy, Clone, Debug)]
pub struct LogicalAccess {
    pub segment: Segment,
    pub selector: u16,
    pub offset: u32,
    pub kind: AccessKind,
    pub cpl: u8,
    pub width: AccessWidth,
}

impl LogicalAccess {
    pub fn new(segment: Segment, selector: u16, offset: u32, kind: AccessKind, width: AccessWidth) -> Self {
        Self {
            segment,
            selector,
            offset,
            kind,
            cpl: 0,
            width,
        }
    }

    pub fn fetch(selector: u16, offset: u32, cpl: u8) -> Self {
        Self {
            cpl,
            ..Self::new(Segment::CS, selector, offset, AccessKind::Fetch, AccessWidth::Byte)
        }
    }

    pub fn with_cpl(mut self, cpl: u8) -> Self {
        self.cpl = cpl;
        self
    }
}

pub trait AddressTranslator {
    /// Resolve a segmented access to a linear address, applying limit checks.
    fn translate(&mut self, access: &LogicalAccess) -> Result<u32, AccessFault>;

    /// Resolve a linear address to a physical one.
    fn map_page(&mut self, linear: u32, is_write: bool, cpl: u8) -> Result<u32, AccessFault>;
}

/// Real-mode segment arithmetic: `linear = selector * 16 + offset`.
///
/// 8086-class parts wrap offsets at 64K. Later parts raise a general protection fault (or a stack
/// fault for SS) when an access extends past the 64K limit. Paging is identity mapped except for
/// pages explicitly marked not present.
#[derive(Clone, Debug)]
pub struct RealModeTranslator {
    wrap_offsets: bool,
    limit: u32,
    not_present: Vec<Range<u32>>,
}

impl RealModeTranslator {
    pub fn new(generation: CpuGeneration) -> Self {
        Self {
            wrap_offsets: generation.wraps_offsets(),
            limit: 0xFFFF,
            not_present: Vec::new(),
        }
    }

    /// Mark the pages spanning `linear` as not present. Any access to them raises a page fault.
    pub fn mark_not_present(&mut self, linear: Range<u32>) {
        let first = linear.start >> PAGE_SHIFT;
        let last = linear.end.saturating_sub(1) >> PAGE_SHIFT;
        self.not_present.push(first..last + 1);
    }

    pub fn clear_not_present(&mut self) {
        self.not_present.clear();
    }
}

impl AddressTranslator for RealModeTranslator {
    fn translate(&mut self, access: &LogicalAccess) -> Result<u32, AccessFault> {
        let offset = if self.wrap_offsets {
            access.offset & 0xFFFF
        }
        else {
            let last = access.offset.saturating_add(access.width.bytes() - 1);
            if last > self.limit {
                log::trace!(
                    "limit fault: {:?}:{:04X} width {}",
                    access.segment,
                    access.offset,
                    access.width
                );
                return Err(match access.segment {
                    Segment::SS => AccessFault::StackFault(0),
                    _ => AccessFault::GeneralProtection(0),
                });
            }
            access.offset
        };
        Ok(((access.selector as u32) << 4).wrapping_add(offset))
    }

    fn map_page(&mut self, linear: u32, is_write: bool, cpl: u8) -> Result<u32, AccessFault> {
        let page = linear >> PAGE_SHIFT;
        if self.not_present.iter().any(|r| r.contains(&page)) {
            let mut code = 0;
            if is_write {
                code |= PF_WRITE;
            }
            if cpl == 3 {
                code |= PF_USER;
            }
            return Err(AccessFault::PageFault { linear, code });
        }
        Ok(linear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_mode_wrap() {
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel8088);
        let access = LogicalAccess::new(Segment::DS, 0x1000, 0x1_0005, AccessKind::Read, AccessWidth::Byte);
        assert_eq!(translator.translate(&access), Ok(0x10005));

        let access = LogicalAccess::new(Segment::DS, 0xFFFF, 0xFFFF, AccessKind::Read, AccessWidth::Word);
        assert_eq!(translator.translate(&access), Ok(0x10FFEF));
    }

    #[test]
    fn test_limit_fault() {
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel80286);
        let access = LogicalAccess::new(Segment::DS, 0, 0xFFFF, AccessKind::Read, AccessWidth::Word);
        assert_eq!(translator.translate(&access), Err(AccessFault::GeneralProtection(0)));
        let access = LogicalAccess::new(Segment::SS, 0, 0xFFFF, AccessKind::Write, AccessWidth::Word);
        assert_eq!(translator.translate(&access), Err(AccessFault::StackFault(0)));
        let access = LogicalAccess::new(Segment::SS, 0, 0xFFFE, AccessKind::Write, AccessWidth::Word);
        assert_eq!(translator.translate(&access), Ok(0xFFFE));
    }

    #[test]
    fn test_not_present() {
        let mut translator = RealModeTranslator::new(CpuGeneration::Intel80386Dx);
        translator.mark_not_present(0x2000..0x3000);
        assert_eq!(translator.map_page(0x1FFF, false, 0), Ok(0x1FFF));
        assert_eq!(
            translator.map_page(0x2004, true, 3),
            Err(AccessFault::PageFault {
                linear: 0x2004,
                code: PF_WRITE | PF_USER
            })
        );
        assert_eq!(translator.map_page(0x3000, false, 0), Ok(0x3000));
    }
}
