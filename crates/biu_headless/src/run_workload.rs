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

    run_workload.rs

    Runs a workload against a BusSystem built for one CPU generation and collects
    the resulting cycle accounting.
*/

use anyhow::{anyhow, Context, Error};

use biu_core::{
    bus::{MemoryBus, PortLatch},
    translate::RealModeTranslator,
    BiuConfig,
    BiuStats,
    BusSystem,
    CodeAddress,
    CpuGeneration,
};

use crate::workload::Workload;

const DEFAULT_MEMORY_SIZE: usize = 0x10_0000;

pub struct RequestResult {
    pub core: usize,
    pub description: String,
    pub value: Option<u64>,
    pub expected: Option<u64>,
    pub issued_at: u64,
    pub completed_at: Option<u64>,
}

impl RequestResult {
    pub fn latency(&self) -> Option<u64> {
        self.completed_at.map(|t| t - self.issued_at)
    }

    pub fn mismatch(&self) -> bool {
        matches!((self.value, self.expected), (Some(v), Some(e)) if v != e)
    }
}

pub struct RunReport {
    pub generation: CpuGeneration,
    pub ticks: u64,
    pub cores: Vec<BiuStats>,
    pub dma_waitstates: u64,
    pub refreshes: u64,
    pub mem_reads: u64,
    pub mem_writes: u64,
    pub io_reads: u64,
    pub io_writes: u64,
    pub requests: Vec<RequestResult>,
}

fn build_bus(workload: &Workload) -> MemoryBus {
    let mut bus = MemoryBus::new(workload.memory_size.unwrap_or(DEFAULT_MEMORY_SIZE));

    for block in &workload.memory {
        bus.load(block.address, &block.data);
        if let Some(fill) = block.fill {
            let start = block.address.wrapping_add(block.data.len() as u32);
            bus.load(start, &vec![fill; block.len]);
        }
    }
    for region in &workload.wait_regions {
        bus.add_wait_range(region.start, region.end, region.waits);
    }
    for group in &workload.ports {
        bus.install_device(Box::new(PortLatch::new(group.ports.iter().copied(), group.wait)));
    }
    bus
}

pub fn run_workload(config: &BiuConfig, workload: &Workload, tick_limit: u64) -> Result<RunReport, Error> {
    let bus = build_bus(workload);
    let translator = RealModeTranslator::new(config.generation);
    let mut system =
        BusSystem::new(config, bus, translator).with_context(|| format!("Couldn't build {}", config.generation))?;

    let entry = CodeAddress::new(workload.code_selector, workload.code_offset);
    for id in 0..system.core_count() {
        let core = system.core_mut(id);
        core.flush(Some(entry));
        if workload.halted {
            core.halt();
        }
    }

    let mut results = Vec::with_capacity(workload.requests.len());

    for req in &workload.requests {
        if req.core >= system.core_count() {
            return Err(anyhow!(
                "Request targets core {} but only {} are configured",
                req.core,
                system.core_count()
            ));
        }
        let request = req.to_request()?;
        let description = format!("{} {} @ {:08X}", request.kind, request.width, request.address);

        // The channel may still be busy or the bus owned by DMA; keep offering the request.
        let issued_at = system.ticks();
        let mut accepted = system.submit(req.core, request);
        while !accepted && system.ticks() < tick_limit {
            system.tick();
            accepted = system.submit(req.core, request);
        }
        if !accepted {
            log::warn!("{}: request '{}' was never accepted", config.generation, description);
            break;
        }

        // The slot empties when the last lane retires, or when a lane faults.
        let remaining = tick_limit.saturating_sub(system.ticks());
        system.run_until(remaining, |s| !s.core(req.core).has_pending_request());

        if let Some(fault) = system.core_mut(req.core).take_bus_fault() {
            log::warn!("{}: request '{}' faulted: {}", config.generation, description, fault);
        }
        let value = system.core_mut(req.core).poll_response();

        log::debug!(
            "{}: core {} {} -> {:?} at tick {}",
            config.generation,
            req.core,
            description,
            value,
            system.ticks()
        );

        results.push(RequestResult {
            core: req.core,
            description,
            value,
            expected: req.expect,
            issued_at,
            completed_at: value.map(|_| system.ticks()),
        });
    }

    // Let the prefetcher and DMA run out the rest of the workload's budget.
    let budget = workload.ticks.min(tick_limit);
    if system.ticks() < budget {
        system.run(budget - system.ticks());
    }
    system.flush_traces();

    let bus_stats = *system.bus().stats();
    Ok(RunReport {
        generation: config.generation,
        ticks: system.ticks(),
        cores: (0..system.core_count()).map(|id| *system.core(id).stats()).collect(),
        dma_waitstates: system.dram_refresh().hold_ticks(),
        refreshes: system.dram_refresh().refreshes(),
        mem_reads: bus_stats.mem_reads,
        mem_writes: bus_stats.mem_writes,
        io_reads: bus_stats.io_reads,
        io_writes: bus_stats.io_writes,
        requests: results,
    })
}

pub fn print_report(report: &RunReport) {
    println!("== {} ({} ticks) ==", report.generation, report.ticks);
    println!(
        "bus: {} mem reads, {} mem writes, {} io reads, {} io writes, {} dram refreshes",
        report.mem_reads, report.mem_writes, report.io_reads, report.io_writes, report.refreshes
    );
    if report.dma_waitstates > 0 {
        println!("dma waited {} ticks for the bus", report.dma_waitstates);
    }

    for (id, stats) in report.cores.iter().enumerate() {
        println!(
            "core {}: {} bus cycles ({} code fetch), {} idle, {} wait, {} stall, {} video wait, {} dma, {} contended",
            id,
            stats.bus_cycles,
            stats.code_fetch_cycles,
            stats.idle_ticks,
            stats.waitstate_ticks,
            stats.stall_ticks,
            stats.video_wait_ticks,
            stats.dma_ticks,
            stats.contention_ticks
        );
        println!(
            "        {} physical reads, {} cache hits, {} queue flushes",
            stats.physical_reads, stats.cache_hits, stats.flushes
        );
    }

    for result in &report.requests {
        let value = match result.value {
            Some(v) => format!("{:08X}", v),
            None => "--------".to_string(),
        };
        let latency = match result.latency() {
            Some(l) => format!("{} ticks", l),
            None => "incomplete".to_string(),
        };
        let flag = if result.mismatch() { " MISMATCH" } else { "" };
        println!("  [{}] {:<28} {} {}{}", result.core, result.description, value, latency, flag);
    }
}

/// Print one line per generation so the timing differences line up.
pub fn print_comparison(reports: &[RunReport]) {
    println!(
        "{:<14} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "generation", "ticks", "cycles", "fetches", "wait", "idle", "latency"
    );
    for report in reports {
        let (cycles, fetches, wait, idle) = report.cores.iter().fold((0, 0, 0, 0), |acc, s| {
            (
                acc.0 + s.bus_cycles,
                acc.1 + s.code_fetch_cycles,
                acc.2 + s.waitstate_ticks,
                acc.3 + s.idle_ticks,
            )
        });
        let latency: u64 = report.requests.iter().filter_map(|r| r.latency()).sum();
        println!(
            "{:<14} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
            report.generation.to_string(),
            report.ticks,
            cycles,
            fetches,
            wait,
            idle,
            latency
        );
    }
}
