//! Power-on configuration of the PPU.
use anyhow::Context;
use bitcode::Decode;
use bitcode::Encode;
use serde::Deserialize;
use serde::Serialize;

use super::policy::ProvisionalPolicy;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode, strum::Display,
)]
pub enum Region {
    #[default]
    Ntsc,
    Pal,
}

impl Region {
    /// Frequency of the master clock driving the PPU in Hz.
    pub fn master_clock_frequency(self) -> u64 {
        match self {
            Region::Ntsc => 21_477_272,
            Region::Pal => 21_281_370,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum VramSize {
    /// 32K words, the size of retail consoles.
    #[default]
    Kb64,
    /// 64K words, as supported by the address lines of the PPU.
    Kb128,
}

impl VramSize {
    pub fn mask(self) -> u16 {
        match self {
            VramSize::Kb64 => 0x7FFF,
            VramSize::Kb128 => 0xFFFF,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpuConfig {
    pub region: Region,
    /// Chip revision reported in STAT77.
    pub ppu1_version: u8,
    /// Chip revision reported in STAT78.
    pub ppu2_version: u8,
    pub vram_size: VramSize,
    pub policy: ProvisionalPolicy,
}

impl Default for PpuConfig {
    fn default() -> Self {
        Self {
            region: Region::Ntsc,
            ppu1_version: 1,
            ppu2_version: 3,
            vram_size: VramSize::Kb64,
            policy: ProvisionalPolicy::default(),
        }
    }
}

impl PpuConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let deserializer = &mut serde_json::Deserializer::from_str(json);
        serde_path_to_error::deserialize(deserializer).context("invalid PPU configuration")
    }
}
