use bitcode::Decode;
use bitcode::Encode;
use intbits::Bits;

/// Conversion factor from u5 to u8
const U5_TO_U8_CONVERSION: f32 = 8.225806;

/// RGB format used by the PPU, 5 bits per channel
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Rgb15(pub u16);

impl Rgb15 {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self(
            0_u16
                .with_bits(0..=4, r as u16)
                .with_bits(5..=9, g as u16)
                .with_bits(10..=14, b as u16),
        )
    }

    pub fn r(self) -> u8 {
        self.0.bits(0..=4) as u8
    }

    pub fn g(self) -> u8 {
        self.0.bits(5..=9) as u8
    }

    pub fn b(self) -> u8 {
        self.0.bits(10..=14) as u8
    }
}

/// 32-bit RGBA format used on modern machines for interop with image-rs
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub struct Rgba32(pub [u8; 4]);

impl From<Rgb15> for Rgba32 {
    fn from(value: Rgb15) -> Self {
        let r = (value.r() as f32 * U5_TO_U8_CONVERSION) as u8;
        let g = (value.g() as f32 * U5_TO_U8_CONVERSION) as u8;
        let b = (value.b() as f32 * U5_TO_U8_CONVERSION) as u8;
        Self([r, g, b, 255])
    }
}

impl From<Rgba32> for Rgb15 {
    fn from(value: Rgba32) -> Self {
        Self::new(
            (value.0[0] as f32 / U5_TO_U8_CONVERSION) as u8,
            (value.0[1] as f32 / U5_TO_U8_CONVERSION) as u8,
            (value.0[2] as f32 / U5_TO_U8_CONVERSION) as u8,
        )
    }
}

/// Abstract interface for image::RgbaImage (used in tests) or any other host image type.
pub trait Image {
    fn new(width: u32, height: u32) -> Self;
    fn set_pixel(&mut self, index: (u32, u32), value: Rgba32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        let color = Rgb15::new(1, 2, 3);
        assert_eq!(color, Rgb15(1 | 2 << 5 | 3 << 10));
        assert_eq!((color.r(), color.g(), color.b()), (1, 2, 3));
    }

    #[test]
    fn test_rgba_conversion() {
        assert_eq!(Rgba32::from(Rgb15(0)), Rgba32([0, 0, 0, 255]));
        assert_eq!(Rgb15::from(Rgba32([255, 0, 255, 255])), Rgb15::new(31, 0, 31));
    }
}
