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

    tracelogger.rs

    Destination for per-cycle bus trace lines. A TraceLogger is owned by each
    core so that traces from several cores can be written to separate files.
*/

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use crate::config::TraceConfig;

#[derive(Debug, Default)]
pub enum TraceLogger {
    FileWriter(BufWriter<File>),
    Console,
    #[default]
    None,
}

impl TraceLogger {
    pub fn from_filename<S: AsRef<Path>>(filename: S) -> Self {
        match File::create(filename.as_ref()) {
            Ok(file) => TraceLogger::FileWriter(BufWriter::new(file)),
            Err(e) => {
                log::warn!("Couldn't create trace file {}: {}", filename.as_ref().display(), e);
                TraceLogger::None
            }
        }
    }

    /// Build the logger for core `core_id`. With more than one core, the core id is appended to
    /// the configured file stem.
    pub fn from_config(config: &TraceConfig, core_id: usize, cores: usize) -> Self {
        if !config.enabled {
            return TraceLogger::None;
        }
        match &config.file {
            Some(path) if cores > 1 => TraceLogger::from_filename(per_core_path(path, core_id)),
            Some(path) => TraceLogger::from_filename(path),
            None => TraceLogger::Console,
        }
    }

    #[inline(always)]
    pub fn println<S: AsRef<str> + std::fmt::Display>(&mut self, msg: S) {
        match self {
            TraceLogger::FileWriter(buf) => {
                _ = buf.write_all(msg.as_ref().as_bytes());
                _ = buf.write_all("\n".as_bytes());
            }
            TraceLogger::Console => println!("{}", msg),
            TraceLogger::None => (),
        }
    }

    pub fn flush(&mut self) {
        if let TraceLogger::FileWriter(file) = self {
            if let Err(e) = file.flush() {
                log::error!("Failed to flush trace log: {}", e);
            }
        }
    }

    #[inline(always)]
    pub fn is_some(&self) -> bool {
        matches!(*self, TraceLogger::FileWriter(_) | TraceLogger::Console)
    }
}

fn per_core_path(path: &Path, core_id: usize) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, core_id, ext.to_string_lossy()),
        None => format!("{}_{}", stem, core_id),
    };
    path.with_file_name(file_name)
}
