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

    error.rs

    Error types for the bus interface.
*/

use thiserror::Error;

/// A translation or protection fault raised while resolving an access. Faults abort the current
/// instruction step and are delivered to the execution unit at the dispatch boundary.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum AccessFault {
    #[error("general protection fault (error code {0:#06X})")]
    GeneralProtection(u16),
    #[error("stack fault (error code {0:#06X})")]
    StackFault(u16),
    #[error("segment not present (selector {0:#06X})")]
    SegmentNotPresent(u16),
    #[error("page fault at {linear:#010X} (error code {code:#X})")]
    PageFault { linear: u32, code: u16 },
}

impl AccessFault {
    /// The exception vector the fault is delivered through.
    pub fn vector(&self) -> u8 {
        match self {
            AccessFault::SegmentNotPresent(_) => 11,
            AccessFault::StackFault(_) => 12,
            AccessFault::GeneralProtection(_) => 13,
            AccessFault::PageFault { .. } => 14,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("couldn't parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("core count must be between 1 and {max}, got {count}")]
    CoreCount { count: usize, max: usize },
    #[error("queue size {0} exceeds the maximum of {max}", max = crate::biu::queue::QUEUE_MAX)]
    QueueSize(usize),
    #[error("{0} period must be non-zero")]
    ZeroPeriod(&'static str),
}
