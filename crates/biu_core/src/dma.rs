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

    dma.rs

    DMA channel 0 DRAM refresh.

    Every refresh period the DMA controller raises DREQ0 and takes the bus
    away from the CPU for a transfer. The hold request is only acknowledged
    once the bus is released and not locked, so refresh lands between bus
    cycles and shows up as DmaRefresh ticks on every core.
*/

use crate::{
    biu::arbiter::{BusArbiter, Participant},
    config::DramRefreshConfig,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DmaState {
    #[default]
    Idle,
    Dreq,
    Hrq,
    HoldA,
    Operating(u32),
    End,
}

#[derive(Clone, Debug, Default)]
pub struct DramRefresh {
    enabled: bool,
    period: u32,
    transfer_ticks: u32,
    cycle_num: u32,
    dma_req: bool,
    state: DmaState,
    refreshes: u64,
    hold_ticks: u64,
}

impl DramRefresh {
    pub fn new(config: Option<&DramRefreshConfig>) -> Self {
        match config {
            Some(config) => Self {
                enabled: true,
                period: config.period,
                transfer_ticks: config.transfer_ticks.max(1),
                cycle_num: config.period,
                ..Default::default()
            },
            None => Self::default(),
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn state(&self) -> DmaState {
        self.state
    }

    #[inline]
    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    /// Ticks spent waiting in HRQ for the bus.
    #[inline]
    pub fn hold_ticks(&self) -> u64 {
        self.hold_ticks
    }

    /// Raise DREQ0 now, without waiting for the period to elapse.
    pub fn trigger(&mut self) {
        self.dma_req = true;
    }

    pub fn reset(&mut self) {
        self.cycle_num = self.period;
        self.dma_req = false;
        self.state = DmaState::Idle;
    }

    pub fn tick(&mut self, arbiter: &mut BusArbiter) {
        if self.enabled {
            self.cycle_num = self.cycle_num.saturating_sub(1);
            if self.cycle_num == 0 {
                // The refresh counter retriggers at terminal count.
                self.dma_req = true;
                self.cycle_num = self.period;
            }
        }

        match &mut self.state {
            DmaState::Idle => {
                if self.dma_req {
                    self.state = DmaState::Dreq;
                }
            }
            DmaState::Dreq => {
                // Next cycle, the DMA controller asserts HRQ.
                self.state = DmaState::Hrq;
            }
            DmaState::Hrq => {
                // HOLDA is only issued once the bus is released and not locked.
                if arbiter.try_acquire(Participant::Dma) {
                    log::trace!("DMA refresh: HOLDA");
                    self.state = DmaState::HoldA;
                }
                else {
                    self.hold_ticks += 1;
                }
            }
            DmaState::HoldA => {
                self.state = DmaState::Operating(0);
            }
            DmaState::Operating(cycles) => {
                *cycles += 1;
                if *cycles >= self.transfer_ticks {
                    self.dma_req = false;
                    self.state = DmaState::End;
                }
            }
            DmaState::End => {
                arbiter.set_inactive(Participant::Dma);
                arbiter.check_release();
                self.refreshes += 1;
                self.state = DmaState::Idle;
            }
        }
    }
}
