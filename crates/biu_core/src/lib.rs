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

    lib.rs

    Cycle-accurate bus interface unit for 8086 through 486 class cores.
*/

pub mod biu;
pub mod bus;
pub mod config;
pub mod cpu_common;
pub mod dma;
pub mod error;
pub mod step;
pub mod system;
pub mod tracelogger;
pub mod translate;

pub use biu::{
    arbiter::{BusArbiter, BusOwner, Participant},
    cycle::{CycleKind, TState},
    request::{Request, RequestKind, Response},
    timing::TimingTable,
    BiuStats,
    LogicalCore,
};
pub use config::BiuConfig;
pub use cpu_common::{AccessWidth, CodeAddress, CpuGeneration, Segment};
pub use error::{AccessFault, ConfigError};
pub use step::{StepContext, StepCursor, StepId, StepStatus};
pub use system::{BusSystem, ExecutionUnit};
