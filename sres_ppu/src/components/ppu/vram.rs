//! Implementation of the VRAM containing tile and tilemap data.
use bitcode::Decode;
use bitcode::Encode;
use intbits::Bits;

use super::config::VramSize;
use crate::common::uint::U16Ext;

#[derive(Clone, Encode, Decode)]
pub struct Vram {
    memory: Vec<u16>,
    mask: u16,
    /// Word address set via VMADDL/VMADDH.
    address: u16,
    increment_size: u16,
    /// Address translation selected by VMAIN.
    mapping: u8,
    /// Increment after accessing the high byte (true) or low byte (false).
    increment_on_high: bool,
    /// Prefetched word returned by VMDATALREAD/VMDATAHREAD.
    read_latch: u16,
}

impl Vram {
    pub fn new(size: VramSize) -> Self {
        Self {
            memory: vec![0; size.mask() as usize + 1],
            mask: size.mask(),
            address: 0,
            increment_size: 1,
            mapping: 0,
            increment_on_high: false,
            read_latch: 0,
        }
    }

    pub fn words(&self) -> usize {
        self.memory.len()
    }

    pub fn mask(&self) -> u16 {
        self.mask
    }

    #[inline]
    pub fn read(&self, addr: u16) -> u16 {
        self.memory[(addr & self.mask) as usize]
    }

    #[inline]
    pub fn write(&mut self, addr: u16, value: u16) {
        self.memory[(addr & self.mask) as usize] = value;
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Register 2115: VMAIN - Video port control
    /// 7  bit  0
    /// ---- ----
    /// M... RRII
    /// |    ||||
    /// |    ||++- Address increment amount (0 = 1, 1 = 32, 2/3 = 128)
    /// |    ++--- Address remapping
    /// |           0: None
    /// |           1: Remap rrrrrrrr YYYccccc -> rrrrrrrr cccccYYY (2bpp)
    /// |           2: Remap rrrrrrrY YYcccccc -> rrrrrrrc ccccccYYY (4bpp)
    /// |           3: Remap rrrrrrYY Yccccccc -> rrrrrrcc cccccYYY (8bpp)
    /// +--------- Address increment mode (0 = after low byte, 1 = after high byte)
    pub fn write_vmain(&mut self, value: u8) {
        self.increment_size = match value.bits(0..=1) {
            0 => 1,
            1 => 32,
            _ => 128,
        };
        self.mapping = value.bits(2..=3);
        self.increment_on_high = value.bit(7);
    }

    /// Register 2116/2117: VMADDL/VMADDH - VRAM word address
    ///
    /// On write: Update VMADD, prefetch [VMADD] into the read latch.
    pub fn write_vmaddl(&mut self, value: u8, accessible: bool) {
        self.address = self.address.with_low_byte(value);
        self.prefetch(accessible);
    }

    pub fn write_vmaddh(&mut self, value: u8, accessible: bool) {
        self.address = self.address.with_high_byte(value);
        self.prefetch(accessible);
    }

    /// Register 2118/2119: VMDATAL/VMDATAH - VRAM data write
    ///
    /// On write: Update the low/high byte of [translated VMADD]
    ///           Increment VMADD if the increment mode matches
    pub fn write_vmdatal(&mut self, value: u8, accessible: bool) {
        if accessible {
            let addr = self.translated_address();
            self.write(addr, self.read(addr).with_low_byte(value));
        }
        if !self.increment_on_high {
            self.increment();
        }
    }

    pub fn write_vmdatah(&mut self, value: u8, accessible: bool) {
        if accessible {
            let addr = self.translated_address();
            self.write(addr, self.read(addr).with_high_byte(value));
        }
        if self.increment_on_high {
            self.increment();
        }
    }

    /// Register 2139/213A: VMDATALREAD/VMDATAHREAD - VRAM data read
    ///
    /// On read: Return the low/high byte of the read latch.
    ///          If the increment mode matches, reload the latch from [translated VMADD], then
    ///          increment VMADD.
    pub fn read_vmdatalread(&mut self, accessible: bool) -> u8 {
        let value = self.read_latch.low_byte();
        if !self.increment_on_high {
            self.prefetch(accessible);
            self.increment();
        }
        value
    }

    pub fn read_vmdatahread(&mut self, accessible: bool) -> u8 {
        let value = self.read_latch.high_byte();
        if self.increment_on_high {
            self.prefetch(accessible);
            self.increment();
        }
        value
    }

    pub fn peek_vmdatalread(&self) -> u8 {
        self.read_latch.low_byte()
    }

    pub fn peek_vmdatahread(&self) -> u8 {
        self.read_latch.high_byte()
    }

    fn prefetch(&mut self, accessible: bool) {
        self.read_latch = if accessible {
            self.read(self.translated_address())
        } else {
            0
        };
    }

    fn increment(&mut self) {
        self.address = self.address.wrapping_add(self.increment_size);
    }

    fn translated_address(&self) -> u16 {
        let addr = self.address;
        match self.mapping {
            1 => (addr & 0xFF00) | ((addr << 3) & 0x00F8) | ((addr >> 5) & 7),
            2 => (addr & 0xFE00) | ((addr << 3) & 0x01F8) | ((addr >> 6) & 7),
            3 => (addr & 0xFC00) | ((addr << 3) & 0x03F8) | ((addr >> 7) & 7),
            _ => addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_word(vram: &mut Vram, addr: u16, value: u16) {
        vram.write_vmaddl(addr.low_byte(), true);
        vram.write_vmaddh(addr.high_byte(), true);
        vram.write_vmdatal(value.low_byte(), true);
        vram.write_vmdatah(value.high_byte(), true);
    }

    #[test]
    fn test_address_wraps_at_mask() {
        let mut vram = Vram::new(VramSize::Kb64);
        vram.write_vmain(0x80);
        write_word(&mut vram, 0x7FFF, 0x1234);
        assert_eq!(vram.read(0x7FFF), 0x1234);
        write_word(&mut vram, 0x8000, 0x5678);
        assert_eq!(vram.read(0x0000), 0x5678);
        write_word(&mut vram, 0xC123, 0x9ABC);
        assert_eq!(vram.read(0x4123), 0x9ABC);
    }

    #[test]
    fn test_increment_modes() {
        let mut vram = Vram::new(VramSize::Kb64);
        // Increment by 32 after the high byte
        vram.write_vmain(0x81);
        write_word(&mut vram, 0x0100, 0x1111);
        assert_eq!(vram.address(), 0x0120);
        // Increment by 128 after the low byte
        vram.write_vmain(0x02);
        vram.write_vmdatal(0x22, true);
        assert_eq!(vram.address(), 0x01A0);
        vram.write_vmdatah(0x33, true);
        assert_eq!(vram.address(), 0x01A0);
        assert_eq!(vram.read(0x0120), 0x0022);
        assert_eq!(vram.read(0x01A0), 0x3300);
    }

    #[test]
    fn test_address_translation() {
        let mut vram = Vram::new(VramSize::Kb64);
        vram.write_vmain(0x80 | 0x04);
        write_word(&mut vram, 0x0001, 0xAAAA);
        assert_eq!(vram.read(0x0008), 0xAAAA);
        vram.write_vmain(0x80 | 0x04);
        write_word(&mut vram, 0x0020, 0xBBBB);
        assert_eq!(vram.read(0x0001), 0xBBBB);
        vram.write_vmain(0x80 | 0x08);
        write_word(&mut vram, 0x0040, 0xCCCC);
        assert_eq!(vram.read(0x0001), 0xCCCC);
        vram.write_vmain(0x80 | 0x0C);
        write_word(&mut vram, 0x0081, 0xDDDD);
        assert_eq!(vram.read(0x0009), 0xDDDD);
    }

    #[test]
    fn test_read_prefetch() {
        let mut vram = Vram::new(VramSize::Kb64);
        vram.write(0x1000, 0x1122);
        vram.write(0x1001, 0x3344);
        vram.write_vmain(0x80);
        vram.write_vmaddl(0x00, true);
        vram.write_vmaddh(0x10, true);
        assert_eq!(vram.read_vmdatalread(true), 0x22);
        assert_eq!(vram.read_vmdatahread(true), 0x11);
        // The latch is reloaded before the increment, the first word is returned twice.
        assert_eq!(vram.read_vmdatalread(true), 0x22);
        assert_eq!(vram.read_vmdatahread(true), 0x11);
        assert_eq!(vram.read_vmdatalread(true), 0x44);
        assert_eq!(vram.read_vmdatahread(true), 0x33);
    }

    #[test]
    fn test_blocked_access() {
        let mut vram = Vram::new(VramSize::Kb64);
        vram.write(0x0000, 0xFFFF);
        vram.write_vmain(0x80);
        vram.write_vmaddl(0x00, false);
        vram.write_vmaddh(0x00, false);
        vram.write_vmdatal(0x12, false);
        vram.write_vmdatah(0x34, false);
        assert_eq!(vram.read(0x0000), 0xFFFF);
        // The address still increments.
        assert_eq!(vram.address(), 0x0001);
        vram.write_vmaddl(0x00, false);
        assert_eq!(vram.read_vmdatalread(false), 0x00);
    }
}
