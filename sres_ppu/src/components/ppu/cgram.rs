//! Implementation of the CGRAM containing color palette data.
use bitcode::Decode;
use bitcode::Encode;

use crate::common::image::Rgb15;
use crate::common::uint::U16Ext;

#[derive(Clone, Encode, Decode)]
pub struct CgRam {
    memory: Vec<u16>,
    /// Contains the currently selected CGRAM address set via the CGADD register.
    address: u8,
    /// Byte phase shared by CGDATA writes and CGDATAREAD reads. False selects the low byte.
    high_byte: bool,
    /// Low byte buffered by the first CGDATA write.
    write_buffer: u8,
}

impl CgRam {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x100],
            address: 0,
            high_byte: false,
            write_buffer: 0,
        }
    }

    pub fn entries(&self) -> usize {
        self.memory.len()
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    #[inline]
    pub fn color(&self, index: u8) -> Rgb15 {
        Rgb15(self.memory[index as usize])
    }

    pub fn set_color(&mut self, index: u8, color: Rgb15) {
        self.memory[index as usize] = color.0 & 0x7FFF;
    }

    /// Register 2121: CGADD - CGRAM address
    /// 7  bit  0
    /// ---- ----
    /// AAAA AAAA
    /// |||| ||||
    /// ++++-++++- CGRAM word address
    ///
    /// On write: cgram_byte = 0
    pub fn write_cgadd(&mut self, value: u8) {
        self.address = value;
        self.high_byte = false;
    }

    /// Register 2122: CGDATA - CGRAM data write
    /// 15  bit  8   7  bit  0
    ///  ---- ----   ---- ----
    ///  .BBB BBGG   GGGR RRRR
    ///   ||| ||||   |||| ||||
    ///   ||| ||||   |||+-++++- Red component
    ///   ||| ||++---+++------- Green component
    ///   +++-++--------------- Blue component
    ///
    /// On write: If cgram_byte == 0, cgram_latch = value
    ///           If cgram_byte == 1, [target] = (value << 8) | cgram_latch, CGADD += 1
    ///           cgram_byte = ~cgram_byte
    ///
    /// `target` is the entry written, which differs from CGADD only while the PPU is rendering.
    pub fn write_cgdata(&mut self, value: u8, target: u8) {
        if self.high_byte {
            self.memory[target as usize] = u16::from_le_bytes([self.write_buffer, value & 0x7F]);
            self.address = self.address.wrapping_add(1);
        } else {
            self.write_buffer = value;
        }
        self.high_byte = !self.high_byte;
    }

    /// Register 213B - CGDATAREAD - CGRAM data read
    /// 15  bit  8   7  bit  0
    ///  ---- ----   ---- ----
    ///  xBBB BBGG   GGGR RRRR
    ///  |||| ||||   |||| ||||
    ///  |||| ||||   |||+-++++- Red component
    ///  |||| ||++---+++------- Green component
    ///  |+++-++-------------- Blue component
    ///  +-------------------- PPU2 open bus
    ///
    /// On read: If cgram_byte == 0, value = [target].low
    ///          If cgram_byte == 1, value = [target].high, CGADD += 1
    ///          cgram_byte = ~cgram_byte
    pub fn read_cgdataread(&mut self, target: u8, open_bus: u8) -> u8 {
        let value = self.peek_cgdataread(target, open_bus);
        if self.high_byte {
            self.address = self.address.wrapping_add(1);
        }
        self.high_byte = !self.high_byte;
        value
    }

    pub fn peek_cgdataread(&self, target: u8, open_bus: u8) -> u8 {
        let color = self.memory[target as usize];
        if self.high_byte {
            (open_bus & 0x80) | (color.high_byte() & 0x7F)
        } else {
            color.low_byte()
        }
    }
}
