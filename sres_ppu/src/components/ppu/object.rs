//! Sprite evaluation, fetching and rendering.
//!
//! During each visible scanline the engine scans all 128 sprites to collect up to 32 that
//! intersect the next line. At the end of the line, up to 34 8-pixel tiles of the collected
//! sprites are fetched into a double buffer, which is rendered on the following line.
use bitcode::Decode;
use bitcode::Encode;
use intbits::Bits;

use super::background::LayerOutput;
use super::background::LayerPixel;
use super::oam::Oam;
use super::oam::Sprite;
use super::vram::Vram;

pub const MAX_ITEMS: usize = 32;
pub const MAX_TILES: usize = 34;

/// (width, height) of small and large sprites for each OBJSEL size selection.
const SIZES: [[(u16, u16); 2]; 8] = [
    [(8, 8), (16, 16)],
    [(8, 8), (32, 32)],
    [(8, 8), (64, 64)],
    [(16, 16), (32, 32)],
    [(16, 16), (64, 64)],
    [(32, 32), (64, 64)],
    [(16, 32), (32, 64)],
    [(16, 32), (32, 32)],
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct ObjectIo {
    pub above_enable: bool,
    pub below_enable: bool,
    /// Halves sprite height and renders alternating rows on each field.
    pub interlace: bool,
    pub tiledata_address: u16,
    pub nameselect: u8,
    pub base_size: u8,
    /// Output priority for each of the 4 sprite priorities.
    pub priority: [u8; 4],
    /// More than 32 sprites on a scanline.
    pub range_over: bool,
    /// More than 34 sprite tiles on a scanline.
    pub time_over: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
struct ObjectTile {
    /// 9-bit horizontal position.
    x: u16,
    priority: u8,
    palette: u8,
    hflip: bool,
    /// Four bitplanes of one row, plane n in bits 8n..8n+7.
    data: u32,
}

#[derive(Clone, Encode, Decode)]
pub struct ObjectEngine {
    pub io: ObjectIo,
    items: [u8; MAX_ITEMS],
    item_count: u8,
    /// Two banks of MAX_TILES tiles. One is filled while the other is rendered.
    tiles: Vec<ObjectTile>,
    tile_counts: [u8; 2],
    active: u8,
    vcounter: u16,
    evaluating: bool,
    pub output: LayerOutput,
}

impl Default for ObjectEngine {
    fn default() -> Self {
        Self {
            io: ObjectIo::default(),
            items: [0; MAX_ITEMS],
            item_count: 0,
            tiles: vec![ObjectTile::default(); MAX_TILES * 2],
            tile_counts: [0; 2],
            active: 0,
            vcounter: 0,
            evaluating: false,
            output: LayerOutput::default(),
        }
    }
}

impl ObjectEngine {
    /// Checks the invariants of restored state.
    pub fn is_consistent(&self) -> bool {
        self.tiles.len() == MAX_TILES * 2
            && self.item_count as usize <= MAX_ITEMS
            && self.active <= 1
            && self.tile_counts.iter().all(|&count| count as usize <= MAX_TILES)
    }

    /// Register 2101: OBJSEL - Sprite size and character address
    /// 7  bit  0
    /// ---- ----
    /// SSSN NbBB
    /// |||| ||||
    /// |||| |+++- Name base address (word address = bBB << 13)
    /// |||+-+---- Name select (word offset = (NN+1) << 12)
    /// +++------- Object size
    pub fn write_objsel(&mut self, value: u8) {
        self.io.tiledata_address = (value.bits(0..=2) as u16) << 13;
        self.io.nameselect = value.bits(3..=4);
        self.io.base_size = value.bits(5..=7);
    }

    pub fn size(&self, sprite: &Sprite) -> (u16, u16) {
        SIZES[self.io.base_size as usize & 7][sprite.large as usize]
    }

    /// Sprites collected for the next scanline, in OAM order.
    pub fn items(&self) -> &[u8] {
        &self.items[..self.item_count as usize]
    }

    pub fn scanline(&mut self, vcounter: u16, vdisp: u16, forced_blank: bool, oam: &mut Oam) {
        self.active ^= 1;
        self.item_count = 0;
        self.tile_counts[self.active as usize] = 0;
        self.vcounter = vcounter;
        if vcounter == 0 {
            self.io.range_over = false;
            self.io.time_over = false;
        }
        if vcounter == vdisp && !forced_blank {
            oam.address_reset();
        }
        self.evaluating = vcounter + 1 < vdisp && !forced_blank;
    }

    /// Evaluates the `index`th sprite of the scan. Returns the OAM byte address read by the
    /// PPU, or None if no evaluation takes place on this line.
    pub fn evaluate(&mut self, index: u8, oam: &Oam) -> Option<u16> {
        if !self.evaluating {
            return None;
        }
        let id = oam.first_sprite().wrapping_add(index) & 0x7F;
        let sprite = oam.sprite(id);
        if self.on_scanline(&sprite) {
            if (self.item_count as usize) < MAX_ITEMS {
                self.items[self.item_count as usize] = id;
                self.item_count += 1;
            } else {
                self.io.range_over = true;
            }
        }
        Some((id as u16) << 2)
    }

    fn on_scanline(&self, sprite: &Sprite) -> bool {
        let (width, height) = self.size(sprite);
        // Entirely offscreen to the left.
        if sprite.x > 256 && sprite.x + width - 1 < 512 {
            return false;
        }
        let height = height >> self.io.interlace as u16;
        let y = sprite.y as u16;
        (self.vcounter >= y && self.vcounter < y + height)
            || (y + height >= 256 && self.vcounter < (y + height) & 255)
    }

    /// Fetches the tiles of all collected sprites for rendering on the next scanline.
    pub fn fetch(&mut self, oam: &Oam, vram: &Vram, field: bool) {
        let bank = self.active as usize * MAX_TILES;
        let mut count = 0;

        // Sprites are fetched in reverse, so the lowest sprite index wins when rendering.
        'items: for &id in self.items[..self.item_count as usize].iter().rev() {
            let sprite = oam.sprite(id);
            let (width, height) = self.size(&sprite);
            let tile_width = width >> 3;

            let mut y = self.vcounter.wrapping_sub(sprite.y as u16) & 0xFF;
            if self.io.interlace {
                y = y << 1 | field as u16;
            }
            if sprite.vflip {
                // Rectangular sprites flip each square half separately.
                y = if width == height {
                    height - 1 - y
                } else if y < width {
                    width - 1 - y
                } else {
                    width + (width - 1) - (y - width)
                };
            }
            y &= 0xFF;

            let mut tiledata = self.io.tiledata_address;
            if sprite.nameselect {
                tiledata = tiledata.wrapping_add((1 + self.io.nameselect as u16) << 12);
            }
            let character_x = sprite.character as u16 & 15;
            let character_y = ((sprite.character as u16 >> 4) + (y >> 3)) & 15;

            for tx in 0..tile_width {
                let sx = (sprite.x + tx * 8) & 511;
                if sprite.x != 256 && sx >= 256 && sx + 7 < 512 {
                    continue;
                }
                if count >= MAX_TILES {
                    self.io.time_over = true;
                    break 'items;
                }
                let mx = if sprite.hflip {
                    tile_width - 1 - tx
                } else {
                    tx
                };
                let character = character_y << 4 | ((character_x + mx) & 15);
                let address = tiledata.wrapping_add(character << 4).wrapping_add(y & 7);
                self.tiles[bank + count] = ObjectTile {
                    x: sx,
                    priority: sprite.priority,
                    palette: 128 + (sprite.palette << 4),
                    hflip: sprite.hflip,
                    data: vram.read(address) as u32
                        | (vram.read(address.wrapping_add(8)) as u32) << 16,
                };
                count += 1;
            }
        }
        self.tile_counts[self.active as usize] = count as u8;
    }

    /// Renders the sprite pixel at `x` from the tiles fetched on the previous scanline.
    pub fn run(&mut self, x: u16) {
        let inactive = (self.active ^ 1) as usize;
        let bank = inactive * MAX_TILES;
        let tiles = &self.tiles[bank..bank + self.tile_counts[inactive] as usize];

        let mut pixel = LayerPixel::default();
        for tile in tiles {
            let tile_x = if tile.x.bit(8) {
                tile.x as i16 - 512
            } else {
                tile.x as i16
            };
            let px = x as i16 - tile_x;
            if !(0..8).contains(&px) {
                continue;
            }
            let bit = (if tile.hflip { px } else { 7 - px }) as u32;
            let color = ((tile.data >> bit) & 1)
                | ((tile.data >> (bit + 8)) & 1) << 1
                | ((tile.data >> (bit + 16)) & 1) << 2
                | ((tile.data >> (bit + 24)) & 1) << 3;
            if color != 0 {
                pixel = LayerPixel {
                    priority: self.io.priority[tile.priority as usize & 3],
                    palette: tile.palette + color as u8,
                    palette_group: 0,
                };
            }
        }
        self.output.above = if self.io.above_enable {
            pixel
        } else {
            LayerPixel::default()
        };
        self.output.below = if self.io.below_enable {
            pixel
        } else {
            LayerPixel::default()
        };
    }
}
