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

    cpu_common.rs

    Types shared across the bus interface: CPU generation selector, segment
    register identifiers and access widths.
*/

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer};
use strum_macros::{Display, EnumIter};

/// The CPU generations the bus interface knows how to time. The generation selects the bus
/// cycle handler, data bus width, prefetch queue capacity and wait state constants.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum CpuGeneration {
    #[default]
    Intel8088,
    Intel8086,
    NecV20,
    NecV30,
    Intel80286,
    Intel80386Sx,
    Intel80386Dx,
    Intel80486,
}

impl CpuGeneration {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "intel8088" | "8088" => Some(CpuGeneration::Intel8088),
            "intel8086" | "8086" => Some(CpuGeneration::Intel8086),
            "necv20" | "v20" => Some(CpuGeneration::NecV20),
            "necv30" | "v30" => Some(CpuGeneration::NecV30),
            "intel80286" | "80286" | "286" => Some(CpuGeneration::Intel80286),
            "intel80386sx" | "80386sx" | "386sx" => Some(CpuGeneration::Intel80386Sx),
            "intel80386dx" | "80386dx" | "386dx" | "386" => Some(CpuGeneration::Intel80386Dx),
            "intel80486" | "80486" | "486" => Some(CpuGeneration::Intel80486),
            _ => None,
        }
    }

    /// 8086-class parts wrap 16-bit offsets silently instead of raising a limit fault.
    #[inline]
    pub fn wraps_offsets(&self) -> bool {
        matches!(
            self,
            CpuGeneration::Intel8088 | CpuGeneration::Intel8086 | CpuGeneration::NecV20 | CpuGeneration::NecV30
        )
    }

    /// Reset vector as a (selector, offset) pair.
    pub fn reset_vector(&self) -> CodeAddress {
        if self.wraps_offsets() {
            CodeAddress::new(0xFFFF, 0x0000)
        }
        else {
            CodeAddress::new(0xF000, 0xFFF0)
        }
    }
}

impl<'de> Deserialize<'de> for CpuGeneration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct CpuGenerationVisitor;

        impl<'de> serde::de::Visitor<'de> for CpuGenerationVisitor {
            type Value = CpuGeneration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a CPU generation string like 'Intel8088', 'Intel80386Sx'")
            }

            fn visit_str<E>(self, value: &str) -> Result<CpuGeneration, E>
            where
                E: serde::de::Error,
            {
                CpuGeneration::from_name(value).ok_or_else(|| E::custom(format!("unknown CpuGeneration '{}'", value)))
            }
        }

        deserializer.deserialize_any(CpuGenerationVisitor)
    }
}

impl FromStr for CpuGeneration {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, String>
    where
        Self: Sized,
    {
        CpuGeneration::from_name(s).ok_or_else(|| "Bad value for cpu generation".to_string())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Display)]
pub enum Segment {
    ES,
    CS,
    SS,
    #[default]
    DS,
    FS,
    GS,
    /// Not segmented: the address is already linear or physical.
    None,
}

/// Width of a single request. Encoded on the wire as 8, 16 or 32 bits.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum AccessWidth {
    #[default]
    Byte,
    Word,
    Dword,
}

impl AccessWidth {
    #[inline(always)]
    pub fn bytes(&self) -> u32 {
        match self {
            AccessWidth::Byte => 1,
            AccessWidth::Word => 2,
            AccessWidth::Dword => 4,
        }
    }

    #[inline(always)]
    pub fn bits(&self) -> u32 {
        self.bytes() * 8
    }

    #[inline(always)]
    pub fn mask(&self) -> u64 {
        match self {
            AccessWidth::Byte => 0xFF,
            AccessWidth::Word => 0xFFFF,
            AccessWidth::Dword => 0xFFFF_FFFF,
        }
    }
}

impl TryFrom<u32> for AccessWidth {
    type Error = String;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(AccessWidth::Byte),
            16 => Ok(AccessWidth::Word),
            32 => Ok(AccessWidth::Dword),
            _ => Err(format!("invalid access width: {} bits", bits)),
        }
    }
}

impl fmt::Display for AccessWidth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// A selector:offset code location, used for the fetch cursor and flush targets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeAddress {
    pub selector: u16,
    pub offset: u32,
}

impl CodeAddress {
    pub const fn new(selector: u16, offset: u32) -> Self {
        Self { selector, offset }
    }
}

impl fmt::Display for CodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.selector, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_generation_parse() {
        assert_eq!("intel80386sx".parse::<CpuGeneration>(), Ok(CpuGeneration::Intel80386Sx));
        assert_eq!("NecV20".parse::<CpuGeneration>(), Ok(CpuGeneration::NecV20));
        assert_eq!("486".parse::<CpuGeneration>(), Ok(CpuGeneration::Intel80486));
        assert!("z80".parse::<CpuGeneration>().is_err());

        // Display must round-trip through FromStr for every generation.
        for generation in CpuGeneration::iter() {
            assert_eq!(generation.to_string().parse::<CpuGeneration>(), Ok(generation));
        }
    }

    #[test]
    fn test_access_width() {
        assert_eq!(AccessWidth::try_from(16), Ok(AccessWidth::Word));
        assert!(AccessWidth::try_from(24).is_err());
        assert_eq!(AccessWidth::Dword.bytes(), 4);
    }
}
