//! Dot, scanline and frame counters of the PPU.
//!
//! The horizontal counter runs in master clocks. A regular scanline is 1364 clocks long and
//! contains 340 dots, two of which (323 and 327) take 6 clocks instead of 4.
//!
//! NTSC frames have 262 scanlines. Every other non-interlaced frame, scanline 240 is 4 clocks
//! short. Interlaced frames add a 263rd scanline in the first field.
//!
//! PAL frames have 312 scanlines, or 313 in the first field of an interlaced frame. Scanline 311
//! of the second field is 4 clocks longer.
use bitcode::Decode;
use bitcode::Encode;

use super::config::Region;

const LINE_CLOCKS: u16 = 1364;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum CounterEvent {
    HorizontalReset,
    VerticalReset,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct PpuCounter {
    region: Region,
    hcounter: u16,
    vcounter: u16,
    field: bool,
    frame: u64,
    /// Settings latched from SETINI at the vertical reset.
    interlace: bool,
    overscan: bool,
}

impl PpuCounter {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            ..Default::default()
        }
    }

    pub fn hcounter(&self) -> u16 {
        self.hcounter
    }

    pub fn vcounter(&self) -> u16 {
        self.vcounter
    }

    pub fn field(&self) -> bool {
        self.field
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn interlace(&self) -> bool {
        self.interlace
    }

    pub fn overscan(&self) -> bool {
        self.overscan
    }

    /// First scanline of the vertical blank.
    pub fn vdisp(&self) -> u16 {
        if self.overscan {
            240
        } else {
            225
        }
    }

    pub fn vblank(&self) -> bool {
        self.vcounter >= self.vdisp()
    }

    pub fn hblank(&self) -> bool {
        let hdot = self.hdot();
        !(1..274).contains(&hdot)
    }

    fn short_line(&self) -> bool {
        self.region == Region::Ntsc
            && !self.interlace
            && self.frame % 2 == 1
            && self.vcounter == 240
    }

    fn long_line(&self) -> bool {
        self.region == Region::Pal && self.interlace && self.field && self.vcounter == 311
    }

    /// Length of the current scanline in master clocks.
    pub fn line_clocks(&self) -> u16 {
        if self.short_line() {
            LINE_CLOCKS - 4
        } else if self.long_line() {
            LINE_CLOCKS + 4
        } else {
            LINE_CLOCKS
        }
    }

    /// Number of scanlines in the current frame.
    pub fn lines(&self) -> u16 {
        let base = match self.region {
            Region::Ntsc => 262,
            Region::Pal => 312,
        };
        if self.interlace && !self.field {
            base + 1
        } else {
            base
        }
    }

    /// Converts the horizontal counter into a dot index.
    pub fn hdot(&self) -> u16 {
        if self.short_line() {
            return self.hcounter >> 2;
        }
        let mut counter = self.hcounter;
        // Dot 323 and 327 take 6 cycles on regular scanlines.
        if self.hcounter > 1292 {
            counter -= 2;
        }
        if self.hcounter > 1310 {
            counter -= 2;
        }
        counter >> 2
    }

    /// Latches frame settings. Only called at the vertical reset, changes to SETINI take effect
    /// on the next frame.
    pub fn latch_frame_settings(&mut self, interlace: bool, overscan: bool) {
        self.interlace = interlace;
        self.overscan = overscan;
    }

    /// Advances the counters by `clocks` master clocks, which must not exceed one scanline.
    pub fn tick(&mut self, clocks: u16) -> Option<CounterEvent> {
        let line_clocks = self.line_clocks();
        self.hcounter += clocks;
        if self.hcounter < line_clocks {
            return None;
        }
        self.hcounter -= line_clocks;
        self.vcounter += 1;
        if self.vcounter < self.lines() {
            return Some(CounterEvent::HorizontalReset);
        }
        self.vcounter = 0;
        self.frame += 1;
        if self.interlace {
            self.field = !self.field;
        }
        Some(CounterEvent::VerticalReset)
    }
}
