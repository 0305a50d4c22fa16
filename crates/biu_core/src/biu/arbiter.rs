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

    biu::arbiter.rs

    Bus ownership shared between cores and the DMA controller.

    Ownership is tri-state: Free, owned by a core, or owned by DMA. A core
    wanting an uninterruptible sequence of accesses additionally takes the
    lock token, which keeps the bus owned between its bus cycles.
*/

use std::fmt;

use fxhash::{FxHashMap, FxHashSet};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Participant {
    Core(usize),
    Dma,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BusOwner {
    #[default]
    Free,
    Core(usize),
    Dma,
}

impl From<Participant> for BusOwner {
    fn from(p: Participant) -> Self {
        match p {
            Participant::Core(id) => BusOwner::Core(id),
            Participant::Dma => BusOwner::Dma,
        }
    }
}

impl fmt::Display for BusOwner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BusOwner::Free => write!(f, "free"),
            BusOwner::Core(id) => write!(f, "core{}", id),
            BusOwner::Dma => write!(f, "dma"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct ArbiterStats {
    pub acquisitions: u64,
    pub contention_ticks: u64,
    pub waitstates: u64,
}

#[derive(Default)]
pub struct BusArbiter {
    owner: BusOwner,
    lock_holder: Option<usize>,
    active: FxHashSet<Participant>,
    stats: FxHashMap<Participant, ArbiterStats>,
}

impl BusArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn owner(&self) -> BusOwner {
        self.owner
    }

    #[inline]
    pub fn is_dma_owned(&self) -> bool {
        self.owner == BusOwner::Dma
    }

    #[inline]
    pub fn lock_holder(&self) -> Option<usize> {
        self.lock_holder
    }

    /// True if the bus is free or already owned by `p`, and no other core holds the lock token.
    pub fn is_available_to(&self, p: Participant) -> bool {
        let owner_ok = self.owner == BusOwner::Free || self.owner == BusOwner::from(p);
        let lock_ok = match self.lock_holder {
            Some(holder) => p == Participant::Core(holder),
            None => true,
        };
        owner_ok && lock_ok
    }

    /// Take ownership of the bus for a bus cycle. The participant is marked active until it calls
    /// `set_inactive`.
    pub fn try_acquire(&mut self, p: Participant) -> bool {
        if !self.is_available_to(p) {
            return false;
        }
        if self.owner != BusOwner::from(p) {
            log::trace!("bus acquired by {:?}", p);
            self.owner = BusOwner::from(p);
        }
        self.active.insert(p);
        self.stats.entry(p).or_default().acquisitions += 1;
        true
    }

    pub fn set_inactive(&mut self, p: Participant) {
        self.active.remove(&p);
    }

    #[inline]
    pub fn is_active(&self, p: Participant) -> bool {
        self.active.contains(&p)
    }

    /// Demote an owned bus to Free once no participant is active and the lock token is not held.
    pub fn check_release(&mut self) {
        if self.owner != BusOwner::Free && self.active.is_empty() && self.lock_holder.is_none() {
            log::trace!("bus released by {}", self.owner);
            self.owner = BusOwner::Free;
        }
    }

    /// Request the lock token for core `id`. The bus must be free or already owned by the core.
    pub fn request_lock(&mut self, id: usize) -> bool {
        if !self.is_available_to(Participant::Core(id)) {
            return false;
        }
        self.lock_holder = Some(id);
        self.owner = BusOwner::Core(id);
        true
    }

    pub fn release_lock(&mut self, id: usize) {
        if self.lock_holder == Some(id) {
            self.lock_holder = None;
            self.check_release();
        }
    }

    pub fn record_contention(&mut self, p: Participant) {
        self.stats.entry(p).or_default().contention_ticks += 1;
    }

    pub fn record_waitstate(&mut self, p: Participant) {
        self.stats.entry(p).or_default().waitstates += 1;
    }

    pub fn stats(&self, p: Participant) -> ArbiterStats {
        self.stats.get(&p).copied().unwrap_or_default()
    }

    pub fn total_waitstates(&self) -> u64 {
        self.stats.values().map(|s| s.waitstates).sum()
    }

    /// Drop all ownership and lock state. Accumulated statistics are kept.
    pub fn reset(&mut self) {
        self.owner = BusOwner::Free;
        self.lock_holder = None;
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_owner() {
        let mut arbiter = BusArbiter::new();
        assert!(arbiter.try_acquire(Participant::Core(0)));
        assert!(!arbiter.try_acquire(Participant::Core(1)));
        assert!(!arbiter.try_acquire(Participant::Dma));
        // Re-acquiring by the owner is fine.
        assert!(arbiter.try_acquire(Participant::Core(0)));

        arbiter.check_release();
        assert_eq!(arbiter.owner(), BusOwner::Core(0));

        arbiter.set_inactive(Participant::Core(0));
        arbiter.check_release();
        assert_eq!(arbiter.owner(), BusOwner::Free);

        assert!(arbiter.try_acquire(Participant::Dma));
        assert!(arbiter.is_dma_owned());
        assert_eq!(arbiter.stats(Participant::Core(0)).acquisitions, 2);
    }

    #[test]
    fn test_lock_token() {
        let mut arbiter = BusArbiter::new();
        assert!(arbiter.request_lock(1));
        assert!(!arbiter.request_lock(0));

        // The locked bus survives check_release between bus cycles.
        assert!(arbiter.try_acquire(Participant::Core(1)));
        arbiter.set_inactive(Participant::Core(1));
        arbiter.check_release();
        assert_eq!(arbiter.owner(), BusOwner::Core(1));
        assert!(!arbiter.try_acquire(Participant::Dma));

        arbiter.release_lock(1);
        assert_eq!(arbiter.owner(), BusOwner::Free);
        assert!(arbiter.try_acquire(Participant::Dma));
        assert!(!arbiter.request_lock(0));
    }
}
