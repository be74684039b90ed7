//! Mode 7 affine transformation.
//!
//! The mode 7 plane is a 128x128 tile map interleaved with 8bpp characters in the first 32K words
//! of VRAM: the low byte of each word holds the tile map, the high byte the character pixels.
use bitcode::Decode;
use bitcode::Encode;
use intbits::Bits;

use super::vram::Vram;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Mode7 {
    pub a: u16,
    pub b: u16,
    pub c: u16,
    pub d: u16,
    /// Center of rotation, 13-bit signed.
    pub x: u16,
    pub y: u16,
    /// Scroll offsets, 13-bit signed. Written through BG1HOFS/BG1VOFS.
    pub hoffset: u16,
    pub voffset: u16,
    pub hflip: bool,
    pub vflip: bool,
    /// Behavior outside of the 1024x1024 plane.
    ///  0/1: wrap around
    ///  2: transparent
    ///  3: fill with tile 0
    pub repeat: u8,
}

fn sign_extend_13(value: u16) -> i32 {
    ((value as i32) << 19) >> 19
}

/// Clamps a 13-bit signed offset to 10 bits, keeping the sign.
fn clip(value: i32) -> i32 {
    if value & 0x2000 != 0 {
        value | !0x3FF
    } else {
        value & 0x3FF
    }
}

impl Mode7 {
    /// Register 211A: M7SEL - Mode 7 settings
    /// 7  bit  0
    /// ---- ----
    /// RF.. ..YX
    /// ||     ||
    /// ||     |+- Flip screen horizontally
    /// ||     +-- Flip screen vertically
    /// ++-------- Screen over
    pub fn write_m7sel(&mut self, value: u8) {
        self.hflip = value.bit(0);
        self.vflip = value.bit(1);
        self.repeat = value.bits(6..=7);
    }

    /// Signed product of M7A and the high byte of M7B, readable via MPYL/MPYM/MPYH.
    pub fn multiply(&self) -> i32 {
        (self.a as i16 as i32) * ((self.b >> 8) as u8 as i8 as i32)
    }

    /// Returns the color of the pixel at screen position (`x`, `y`), or None if it falls outside
    /// of the plane with repeat mode 2.
    pub fn sample(&self, x: u16, y: u16, vram: &Vram) -> Option<u8> {
        let a = self.a as i16 as i32;
        let b = self.b as i16 as i32;
        let c = self.c as i16 as i32;
        let d = self.d as i16 as i32;
        let hcenter = sign_extend_13(self.x);
        let vcenter = sign_extend_13(self.y);
        let hdelta = clip(sign_extend_13(self.hoffset) - hcenter);
        let vdelta = clip(sign_extend_13(self.voffset) - vcenter);

        let y = y as u8;
        let y = (if self.vflip { 255 - y } else { y }) as i32;
        let x = x as u8;
        let x = (if self.hflip { 255 - x } else { x }) as i32;

        let origin_x =
            ((a * hdelta) & !63) + ((b * vdelta) & !63) + ((b * y) & !63) + (hcenter << 8);
        let origin_y =
            ((c * hdelta) & !63) + ((d * vdelta) & !63) + ((d * y) & !63) + (vcenter << 8);
        let px = (origin_x + a * x) >> 8;
        let py = (origin_y + c * x) >> 8;

        let outside = (px | py) & !0x3FF != 0;
        let tile = match self.repeat {
            2 if outside => return None,
            3 if outside => 0,
            _ => vram.read((((py >> 3) & 127) * 128 + ((px >> 3) & 127)) as u16) & 0xFF,
        };
        let pixel = (tile << 6) | (((py & 7) << 3) | (px & 7)) as u16;
        Some((vram.read(pixel) >> 8) as u8)
    }
}
