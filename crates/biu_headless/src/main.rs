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

    main.rs

    Headless front end for biu_core. Reads a BIU configuration and a workload,
    runs the workload and prints cycle accounting for one or all CPU generations.
*/

#![forbid(unsafe_code)]

mod run_workload;
mod workload;

use std::path::PathBuf;

use anyhow::{Context, Error};
use bpaf::Bpaf;
use strum::IntoEnumIterator;

use biu_core::{BiuConfig, CpuGeneration};

use crate::{
    run_workload::{print_comparison, print_report, run_workload},
    workload::Workload,
};

#[derive(Debug, Bpaf)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    #[bpaf(long("config_file"), long("configfile"))]
    pub config_file: Option<PathBuf>,

    #[bpaf(long("workload"), long("workload_file"))]
    pub workload: PathBuf,

    #[bpaf(long("cpu"), long("generation"))]
    pub generation: Option<CpuGeneration>,

    #[bpaf(long("tick_limit"), long("ticks"))]
    pub tick_limit: Option<u64>,

    #[bpaf(long("compare_all"), long("compare"), switch)]
    pub compare_all: bool,
}

fn main() {
    env_logger::init();

    let args = cli_args().run();

    if let Err(e) = run(args) {
        eprintln!("biu_headless: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: CmdLineArgs) -> Result<(), Error> {
    let mut config = match &args.config_file {
        Some(path) => BiuConfig::from_file(path)
            .with_context(|| format!("Failed to load BIU configuration from {}", path.display()))?,
        None => BiuConfig::default(),
    };
    if let Some(generation) = args.generation {
        config.generation = generation;
    }

    let workload = Workload::from_file(&args.workload)?;
    let tick_limit = args.tick_limit.unwrap_or(workload.ticks.max(1) * 16);

    log::debug!(
        "Running workload '{}' ({} requests, tick limit {})",
        workload.name,
        workload.requests.len(),
        tick_limit
    );

    if args.compare_all {
        let mut reports = Vec::new();
        for generation in CpuGeneration::iter() {
            let mut gen_config = config.clone();
            gen_config.generation = generation;
            let report = run_workload(&gen_config, &workload, tick_limit)?;
            print_report(&report);
            reports.push(report);
        }
        println!();
        print_comparison(&reports);
    }
    else {
        let report = run_workload(&config, &workload, tick_limit)?;
        print_report(&report);

        if report.requests.iter().any(|r| r.mismatch()) {
            anyhow::bail!("One or more requests returned an unexpected value");
        }
    }
    Ok(())
}
