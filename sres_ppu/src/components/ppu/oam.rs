//! Implementation of the OAM containing sprite data.
use std::fmt::Display;
use std::fmt::Formatter;

use bilge::prelude::*;
use bitcode::Decode;
use bitcode::Encode;
use intbits::Bits;

const OAM_SIZE: usize = 544;
const HIGH_TABLE: usize = 0x200;

#[derive(Clone, Encode, Decode)]
pub struct Oam {
    memory: Vec<u8>,
    /// Word address set via OAMADD, stored as a 10-bit byte address.
    base_address: u16,
    /// Current 10-bit byte address.
    address: u16,
    priority_rotation: bool,
    first_sprite: u8,
    /// Low byte buffered by an even OAMDATA write.
    write_latch: u8,
}

impl Oam {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            memory: vec![0; OAM_SIZE],
            base_address: 0,
            address: 0,
            priority_rotation: false,
            first_sprite: 0,
            write_latch: 0,
        }
    }

    pub fn bytes(&self) -> usize {
        self.memory.len()
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Sprite evaluation starts with this sprite when priority rotation is enabled.
    pub fn first_sprite(&self) -> u8 {
        self.first_sprite
    }

    /// Register 2102/2103: OAMADD - OAM address
    ///  OAMADDH     OAMADDL
    ///   $2103       $2102
    /// 7  bit  0   7  bit  0
    /// ---- ----   ---- ----
    /// P... ...B   AAAA AAAA
    /// |       |   |||| ||||
    /// |       |   ++++-++++- OAM word address
    /// |       |   ++++-+++0- OAM priority rotation index
    /// |       +------------- OAM table select (0 = 256 word table, 1 = 16 word table)
    /// +--------------------- OAM priority rotation (1 = enable)
    ///
    /// On write: Update OAMADD
    ///           internal_oamadd = (OAMADD & $1FF) << 1
    pub fn write_oamaddl(&mut self, value: u8) {
        self.base_address = (self.base_address & 0x200) | (value as u16) << 1;
        self.address_reset();
    }

    pub fn write_oamaddh(&mut self, value: u8) {
        self.base_address = (value.bit(0) as u16) << 9 | (self.base_address & 0x1FE);
        self.priority_rotation = value.bit(7);
        self.address_reset();
    }

    /// Reloads the internal address from OAMADD. Happens on OAMADD writes and at the start of
    /// vblank.
    pub fn address_reset(&mut self) {
        self.address = self.base_address;
        self.update_first_sprite();
    }

    fn update_first_sprite(&mut self) {
        self.first_sprite = if self.priority_rotation {
            (self.address >> 2) as u8 & 0x7F
        } else {
            0
        };
    }

    fn increment(&mut self) {
        self.address = (self.address + 1) & 0x3FF;
        self.update_first_sprite();
    }

    fn index(addr: u16) -> usize {
        if addr.bit(9) {
            HIGH_TABLE + (addr as usize & 0x1F)
        } else {
            addr as usize & 0x1FF
        }
    }

    /// Register 2104: OAMDATA - OAM data write
    /// 7  bit  0
    /// ---- ----
    /// DDDD DDDD
    /// |||| ||||
    /// ++++-++++- OAM data
    ///
    /// On write: If (internal_oamadd & 1) == 0, oam_latch = value
    ///           If internal_oamadd < $200 and (internal_oamadd & 1) == 1:
    ///             [internal_oamadd-1] = oam_latch
    ///             [internal_oamadd] = value
    ///           If internal_oamadd >= $200, [internal_oamadd] = value
    ///           internal_oamadd = internal_oamadd + 1
    ///
    /// `target` is the address written, which differs from internal_oamadd only while the PPU is
    /// rendering. The latch phase always follows internal_oamadd.
    pub fn write_oamdata(&mut self, value: u8, target: u16) {
        let odd = self.address.bit(0);
        if !odd {
            self.write_latch = value;
        }
        if target.bit(9) {
            self.memory[Self::index(target)] = value;
        } else if odd {
            self.memory[Self::index(target & !1)] = self.write_latch;
            self.memory[Self::index(target | 1)] = value;
        }
        self.increment();
    }

    /// Register 2138 - OAMDATAREAD - OAM data read
    /// 7  bit  0
    /// ---- ----
    /// DDDD DDDD
    /// |||| ||||
    /// ++++-++++- OAM data
    ///
    /// On read: value = [target]
    ///          internal_oamadd = internal_oamadd + 1
    pub fn read_oamdataread(&mut self, target: u16) -> u8 {
        let value = self.peek(target);
        self.increment();
        value
    }

    pub fn peek(&self, addr: u16) -> u8 {
        self.memory[Self::index(addr)]
    }

    pub fn sprite(&self, id: u8) -> Sprite {
        let id = id & 0x7F;
        let addr = id as usize * 4;
        let high_bits = self.memory[HIGH_TABLE + id as usize / 4] >> (id % 4 * 2);
        let attributes = SpriteAttributes::from(self.memory[addr + 3]);
        Sprite {
            id,
            x: (high_bits.bit(0) as u16) << 8 | self.memory[addr] as u16,
            y: self.memory[addr + 1],
            character: self.memory[addr + 2],
            nameselect: attributes.nameselect(),
            palette: attributes.palette().value(),
            priority: attributes.priority().value(),
            hflip: attributes.hflip(),
            vflip: attributes.vflip(),
            large: high_bits.bit(1),
        }
    }
}

#[bitsize(8)]
#[derive(Clone, Copy, DebugBits, Default, FromBits, PartialEq)]
struct SpriteAttributes {
    nameselect: bool,
    palette: u3,
    priority: u2,
    hflip: bool,
    vflip: bool,
}

/// Decoded OAM entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sprite {
    pub id: u8,
    /// 9-bit horizontal position. Values of 256 and above are partially offscreen to the left.
    pub x: u16,
    pub y: u8,
    pub character: u8,
    pub nameselect: bool,
    pub palette: u8,
    pub priority: u8,
    pub hflip: bool,
    pub vflip: bool,
    pub large: bool,
}

impl Display for Sprite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} ({}, {}) tile:{:02X}{} pal:{} prio:{}",
            self.id,
            self.x,
            self.y,
            self.character,
            if self.nameselect { "+" } else { "" },
            self.palette,
            self.priority
        )?;
        if self.large {
            write!(f, " large")?;
        }
        if self.hflip {
            write!(f, " hflip")?;
        }
        if self.vflip {
            write!(f, " vflip")?;
        }
        Ok(())
    }
}
