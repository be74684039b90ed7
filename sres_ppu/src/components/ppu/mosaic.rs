//! Mosaic block counters.
//!
//! Mosaic replicates the top-left pixel of each `size` x `size` block. The vertical counter is
//! shared between all layers and restarts at the first visible scanline, so changes to the size
//! take effect at the next block boundary.
use bitcode::Decode;
use bitcode::Encode;

use super::background::LayerPixel;

#[derive(Clone, Copy, Debug, Encode, Decode)]
pub struct Mosaic {
    /// Block size in pixels, 1 to 16.
    size: u8,
    vcounter: u8,
    /// Scanline whose data is repeated by the current block.
    line: u16,
}

impl Default for Mosaic {
    fn default() -> Self {
        Self {
            size: 1,
            vcounter: 0,
            line: 0,
        }
    }
}

impl Mosaic {
    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn set_size(&mut self, size: u8) {
        self.size = size.clamp(1, 16);
    }

    /// Scanline used for fetching by mosaic-enabled layers.
    pub fn line(&self) -> u16 {
        self.line
    }

    pub fn scanline(&mut self, vcounter: u16) {
        if vcounter == 1 {
            self.vcounter = 0;
        }
        if self.vcounter == 0 {
            self.vcounter = self.size;
            self.line = vcounter;
        }
        self.vcounter -= 1;
    }
}

/// Horizontal mosaic state of one layer.
#[derive(Clone, Copy, Debug, Default, Encode, Decode)]
pub struct MosaicHold {
    counter: u8,
    pixel: LayerPixel,
}

impl MosaicHold {
    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Returns the pixel held for the current block, latching `pixel` at the start of a block.
    pub fn apply(&mut self, pixel: LayerPixel, size: u8) -> LayerPixel {
        if self.counter == 0 {
            self.counter = size;
            self.pixel = pixel;
        }
        self.counter -= 1;
        self.pixel
    }
}
