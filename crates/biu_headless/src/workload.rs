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

    workload.rs

    Workload description for the headless runner. A workload is a TOML file naming
    a memory image, wait state regions, latched ports and a list of bus requests to issue.
*/

use std::path::Path;

use anyhow::{anyhow, Context, Error};
use serde_derive::Deserialize;

use biu_core::{AccessWidth, Request, RequestKind};

const fn _default_ticks() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
pub struct MemoryBlock {
    pub address: u32,
    #[serde(default)]
    pub data: Vec<u8>,
    /// Fill `len` bytes with `fill` instead of (or after) `data`.
    pub fill: Option<u8>,
    #[serde(default)]
    pub len: usize,
}

#[derive(Debug, Deserialize)]
pub struct WaitRegion {
    pub start: u32,
    pub end:   u32,
    pub waits: u32,
}

#[derive(Debug, Deserialize)]
pub struct PortGroup {
    pub ports: Vec<u16>,
    #[serde(default)]
    pub wait:  u32,
}

#[derive(Debug, Deserialize)]
pub struct RequestEntry {
    #[serde(default)]
    pub core: usize,
    pub kind: String,
    #[serde(default = "_default_width")]
    pub width: u32,
    pub address: u32,
    #[serde(default)]
    pub value: u32,
    /// Expected response value. A mismatch is reported but does not stop the run.
    pub expect: Option<u64>,
}

const fn _default_width() -> u32 {
    8
}

#[derive(Debug, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub name: String,
    #[serde(default = "_default_ticks")]
    pub ticks: u64,
    #[serde(default)]
    pub memory_size: Option<usize>,
    /// Initial code selector and offset for every core.
    #[serde(default)]
    pub code_selector: u16,
    #[serde(default)]
    pub code_offset: u32,
    /// Halted cores do not prefetch.
    #[serde(default)]
    pub halted: bool,
    #[serde(default)]
    pub memory: Vec<MemoryBlock>,
    #[serde(default)]
    pub wait_regions: Vec<WaitRegion>,
    #[serde(default)]
    pub ports: Vec<PortGroup>,
    #[serde(default)]
    pub requests: Vec<RequestEntry>,
}

impl Workload {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let toml_str = std::fs::read_to_string(path)
            .with_context(|| format!("Couldn't read workload file {}", path.display()))?;
        let workload: Workload =
            toml::from_str(&toml_str).with_context(|| format!("Failed to parse workload file {}", path.display()))?;
        Ok(workload)
    }
}

impl RequestEntry {
    pub fn to_request(&self) -> Result<Request, Error> {
        let kind = match self.kind.to_lowercase().as_str() {
            "memread" | "memr" | "read" => RequestKind::MemRead,
            "memwrite" | "memw" | "write" => RequestKind::MemWrite,
            "ioread" | "iorc" | "in" => RequestKind::IoRead,
            "iowrite" | "iowc" | "out" => RequestKind::IoWrite,
            _ => return Err(anyhow!("Bad value for request kind: {}", self.kind)),
        };
        let width = AccessWidth::try_from(self.width).map_err(|e| anyhow!(e))?;

        Ok(match kind {
            RequestKind::MemRead | RequestKind::MemWrite => {
                Request::new(kind, width, self.address, self.value).linear()
            }
            RequestKind::IoRead | RequestKind::IoWrite => Request::new(kind, width, self.address, self.value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKLOAD: &str = r#"
        name = "string copy"
        ticks = 500
        code_offset = 0x100

        [[memory]]
        address = 0x100
        data = [0x90, 0x90, 0xF4]

        [[memory]]
        address = 0x2000
        fill = 0xAA
        len = 16

        [[ports]]
        ports = [0x60, 0x61]
        wait = 2

        [[requests]]
        kind = "MemWrite"
        width = 16
        address = 0x2001
        value = 0x1234

        [[requests]]
        kind = "in"
        address = 0x60
    "#;

    #[test]
    fn parses_workload() {
        let workload: Workload = toml::from_str(WORKLOAD).unwrap();
        assert_eq!(workload.name, "string copy");
        assert_eq!(workload.ticks, 500);
        assert_eq!(workload.memory.len(), 2);
        assert_eq!(workload.memory[1].fill, Some(0xAA));
        assert_eq!(workload.ports[0].wait, 2);
        assert_eq!(workload.requests.len(), 2);
        assert!(!workload.halted);
    }

    #[test]
    fn converts_requests() {
        let workload: Workload = toml::from_str(WORKLOAD).unwrap();
        let write = workload.requests[0].to_request().unwrap();
        assert_eq!(write.kind, RequestKind::MemWrite);
        assert_eq!(write.width, AccessWidth::Word);
        assert!(write.uses_linear_translation);

        let read = workload.requests[1].to_request().unwrap();
        assert_eq!(read.kind, RequestKind::IoRead);
        assert_eq!(read.width, AccessWidth::Byte);
        assert!(!read.uses_linear_translation);
    }

    #[test]
    fn rejects_bad_kind() {
        let entry = RequestEntry {
            core: 0,
            kind: "fetch".to_string(),
            width: 8,
            address: 0,
            value: 0,
            expect: None,
        };
        assert!(entry.to_request().is_err());
    }
}
