//! Compositing of layers into the final pixel color, including color math and brightness.
use bitcode::Decode;
use bitcode::Encode;
use intbits::Bits;

use super::background::LayerOutput;
use super::background::LayerPixel;
use super::cgram::CgRam;
use super::window::WindowMasks;
use crate::common::image::Rgb15;

const OBJ: usize = 4;
const BACKDROP: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ScreenIo {
    /// BG1 in modes 3, 4 and 7 uses its raw 8-bit color instead of CGRAM.
    pub direct_color: bool,
    /// Color math adds the sub screen instead of the fixed color.
    pub blend_mode: bool,
    /// Color math enable for BG1-BG4, OBJ and the backdrop.
    pub color_enable: [bool; 6],
    pub color_halve: bool,
    pub color_subtract: bool,
    pub fixed_color: u16,
}

impl ScreenIo {
    /// Register 2130: CGWSEL - Color addition select. Bits 4-7 are handled by the window.
    pub fn write_cgwsel(&mut self, value: u8) {
        self.direct_color = value.bit(0);
        self.blend_mode = value.bit(1);
    }

    /// Register 2131: CGADSUB - Color math designation
    /// 7  bit  0
    /// ---- ----
    /// MHBO 4321
    /// |||| ||||
    /// |||| ++++- Enable color math on BG1-BG4
    /// |||+------ Enable color math on OBJ (palettes 4-7 only)
    /// ||+------- Enable color math on the backdrop
    /// |+-------- Halve the result
    /// +--------- Subtract instead of add
    pub fn write_cgadsub(&mut self, value: u8) {
        for (index, enable) in self.color_enable.iter_mut().enumerate() {
            *enable = value.bit(index);
        }
        self.color_halve = value.bit(6);
        self.color_subtract = value.bit(7);
    }

    /// Register 2132: COLDATA - Fixed color data
    /// 7  bit  0
    /// ---- ----
    /// BGRC CCCC
    /// |||+-++++- Color intensity
    /// ||+------- Write to red channel
    /// |+-------- Write to green channel
    /// +--------- Write to blue channel
    pub fn write_coldata(&mut self, value: u8) {
        let intensity = value.bits(0..=4) as u16;
        let mut color = self.fixed_color;
        if value.bit(5) {
            color = (color & !0x001F) | intensity;
        }
        if value.bit(6) {
            color = (color & !0x03E0) | intensity << 5;
        }
        if value.bit(7) {
            color = (color & !0x7C00) | intensity << 10;
        }
        self.fixed_color = color;
    }
}

/// Color math operands of the last composited pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Math {
    pub above: Rgb15,
    pub above_color_enable: bool,
    pub below: Rgb15,
    pub below_transparent: bool,
}

/// Per-pixel inputs to the compositor.
pub struct ScreenInput<'a> {
    /// BG1-BG4 followed by OBJ.
    pub layers: [LayerOutput; 5],
    pub masks: WindowMasks,
    pub cgram: &'a CgRam,
    pub mode: u8,
    pub hires: bool,
    pub brightness: u8,
    pub forced_blank: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Screen {
    pub io: ScreenIo,
    pub math: Math,
    /// CGRAM entry read by the last composited pixel.
    cgram_address: u8,
}

/// Converts an 8-bit BG color and its palette number into a 15-bit color.
pub fn direct_color(palette: u8, palette_group: u8) -> Rgb15 {
    let p = palette as u16;
    let g = palette_group as u16;
    Rgb15(
        ((p << 7) & 0x6000)
            + ((g << 10) & 0x1000)
            + ((p << 4) & 0x0380)
            + ((g << 5) & 0x0040)
            + ((p << 2) & 0x001C)
            + ((g << 1) & 0x0002),
    )
}

/// Adds or subtracts `y` from `x` per channel, clamped to the valid range.
pub fn blend(x: Rgb15, y: Rgb15, subtract: bool, halve: bool) -> Rgb15 {
    let channel = |a: u8, b: u8| {
        if subtract {
            let value = a.saturating_sub(b);
            if halve {
                value >> 1
            } else {
                value
            }
        } else {
            let value = a + b;
            if halve {
                value >> 1
            } else {
                value.min(31)
            }
        }
    };
    Rgb15::new(
        channel(x.r(), y.r()),
        channel(x.g(), y.g()),
        channel(x.b(), y.b()),
    )
}

/// Scales a color by the master brightness, 0 to 15.
pub fn apply_brightness(color: Rgb15, brightness: u8) -> Rgb15 {
    let scale = |channel: u8| (channel as u16 * brightness as u16 / 15) as u8;
    Rgb15::new(scale(color.r()), scale(color.g()), scale(color.b()))
}

impl Screen {
    pub fn cgram_address(&self) -> u8 {
        self.cgram_address
    }

    /// Returns the index and pixel of the frontmost unmasked layer. Ties are won by the layer
    /// listed first.
    fn select(
        input: &ScreenInput,
        pixel: impl Fn(&LayerOutput) -> LayerPixel,
        masked: &[bool; 5],
    ) -> Option<(usize, LayerPixel)> {
        let mut selected = None;
        let mut priority = 0;
        for (index, layer) in input.layers.iter().enumerate() {
            let candidate = pixel(layer);
            if !masked[index] && candidate.priority > priority {
                priority = candidate.priority;
                selected = Some((index, candidate));
            }
        }
        selected
    }

    fn color(&mut self, input: &ScreenInput, layer: usize, pixel: LayerPixel) -> Rgb15 {
        if layer == 0 && self.io.direct_color && matches!(input.mode, 3 | 4 | 7) {
            direct_color(pixel.palette, pixel.palette_group)
        } else {
            self.cgram_address = pixel.palette;
            input.cgram.color(pixel.palette)
        }
    }

    fn color_enable(&self, layer: usize, pixel: LayerPixel) -> bool {
        if layer == OBJ {
            // Only sprite palettes 4-7 participate in color math.
            self.io.color_enable[OBJ] && pixel.palette >= 192
        } else {
            self.io.color_enable[layer]
        }
    }

    /// Composites one dot. Returns the colors of its two halves, which differ only in hires.
    pub fn run(&mut self, input: &ScreenInput) -> [Rgb15; 2] {
        let above = Self::select(input, |layer| layer.above, &input.masks.above);
        let below = Self::select(input, |layer| layer.below, &input.masks.below);

        let above_color = match above {
            Some((layer, pixel)) => {
                self.math.above_color_enable = self.color_enable(layer, pixel);
                self.color(input, layer, pixel)
            }
            None => {
                self.math.above_color_enable = self.io.color_enable[BACKDROP];
                self.cgram_address = 0;
                input.cgram.color(0)
            }
        };
        self.math.above = above_color;
        let below_color = match below {
            Some((layer, pixel)) => {
                self.math.below_transparent = false;
                self.color(input, layer, pixel)
            }
            None => {
                self.math.below_transparent = true;
                Rgb15(self.io.fixed_color)
            }
        };
        self.math.below = below_color;

        let (addend, halve) = if self.io.blend_mode && !self.math.below_transparent {
            (self.math.below, self.io.color_halve)
        } else if self.io.blend_mode {
            // A transparent sub screen is replaced by the fixed color without halving.
            (Rgb15(self.io.fixed_color), false)
        } else {
            (Rgb15(self.io.fixed_color), self.io.color_halve)
        };

        let mut color = if input.masks.clip_to_black {
            Rgb15(0)
        } else {
            self.math.above
        };
        if self.math.above_color_enable && !input.masks.prevent_math {
            color = blend(color, addend, self.io.color_subtract, halve);
        }

        if input.forced_blank {
            return [Rgb15(0); 2];
        }
        let main = apply_brightness(color, input.brightness);
        if input.hires {
            [apply_brightness(self.math.below, input.brightness), main]
        } else {
            [main, main]
        }
    }
}
