//! Background layers.
//!
//! Each scanline, tiles are fetched ahead of rendering into a small cache: one tile map entry and
//! the bitplanes of one 8 pixel character per column, with two characters per column in the
//! hires modes 5 and 6. The order of fetches within a column depends on the BG mode and is
//! described by [fetch_schedule].
//!
//! Rendering then shifts pixels out of the cache one at a time, starting at the fine scroll
//! offset of the first tile.
use bilge::prelude::*;
use bitcode::Decode;
use bitcode::Encode;

use super::mosaic::MosaicHold;
use super::vram::Vram;

/// 33 columns of up to two tiles each.
pub const TILE_CACHE_SIZE: usize = 66;

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Encode, Decode, strum::Display)]
pub enum BackgroundId {
    #[default]
    BG1 = 0,
    BG2 = 1,
    BG3 = 2,
    BG4 = 3,
}

impl BackgroundId {
    pub const ALL: [BackgroundId; 4] = [
        BackgroundId::BG1,
        BackgroundId::BG2,
        BackgroundId::BG3,
        BackgroundId::BG4,
    ];
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Encode, Decode, strum::Display)]
pub enum BgDepth {
    #[default]
    Inactive,
    Bpp2,
    Bpp4,
    Bpp8,
    Mode7,
}

impl BgDepth {
    /// Number of bitplane pairs per character.
    fn plane_pairs(self) -> u16 {
        match self {
            BgDepth::Bpp2 => 1,
            BgDepth::Bpp4 => 2,
            BgDepth::Bpp8 => 4,
            _ => 0,
        }
    }
}

/// Pixel produced by a layer. A priority of 0 marks a transparent pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct LayerPixel {
    pub priority: u8,
    /// CGRAM index, or the raw 8-bit color for direct color.
    pub palette: u8,
    /// Palette number of the tile map entry, used by direct color.
    pub palette_group: u8,
}

/// Pixels of a layer for the main ("above") and sub ("below") screen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct LayerOutput {
    pub above: LayerPixel,
    pub below: LayerPixel,
}

/// Which screen a rendered pixel is destined for. Hires modes render the sub screen on the first
/// half of each dot and the main screen on the second half.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plane {
    Both,
    Below,
    Above,
}

/// Scroll values read from the BG3 tile map in offset-per-tile modes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct OffsetPerTile {
    pub hoffset: u16,
    pub voffset: u16,
}

/// Parameters shared by all layers for the current scanline.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineContext {
    pub mode: u8,
    pub hires: bool,
    pub interlace: bool,
    pub field: bool,
    pub vcounter: u16,
    pub mosaic_line: u16,
    pub mosaic_size: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchSlot {
    Idle,
    NameTable(BackgroundId),
    /// Offset-per-tile entry from BG3, at the given row offset in pixels.
    Offset(u16),
    /// Bitplane pair `index` of tile `half` within the column.
    Character(BackgroundId, u16, usize),
}

/// Returns the VRAM accesses made by each of the 8 fetch slots of a 32 clock column.
pub fn fetch_schedule(mode: u8) -> &'static [FetchSlot; 8] {
    use BackgroundId::*;
    use FetchSlot::*;
    const MODE0: [FetchSlot; 8] = [
        NameTable(BG4),
        NameTable(BG3),
        NameTable(BG2),
        NameTable(BG1),
        Character(BG4, 0, 0),
        Character(BG3, 0, 0),
        Character(BG2, 0, 0),
        Character(BG1, 0, 0),
    ];
    const MODE1: [FetchSlot; 8] = [
        NameTable(BG3),
        NameTable(BG2),
        NameTable(BG1),
        Character(BG3, 0, 0),
        Character(BG2, 0, 0),
        Character(BG2, 1, 0),
        Character(BG1, 0, 0),
        Character(BG1, 1, 0),
    ];
    const MODE2: [FetchSlot; 8] = [
        NameTable(BG2),
        NameTable(BG1),
        Offset(0),
        Offset(8),
        Character(BG2, 0, 0),
        Character(BG2, 1, 0),
        Character(BG1, 0, 0),
        Character(BG1, 1, 0),
    ];
    const MODE3: [FetchSlot; 8] = [
        NameTable(BG2),
        NameTable(BG1),
        Character(BG2, 0, 0),
        Character(BG2, 1, 0),
        Character(BG1, 0, 0),
        Character(BG1, 1, 0),
        Character(BG1, 2, 0),
        Character(BG1, 3, 0),
    ];
    const MODE4: [FetchSlot; 8] = [
        NameTable(BG2),
        NameTable(BG1),
        Offset(0),
        Character(BG2, 0, 0),
        Character(BG1, 0, 0),
        Character(BG1, 1, 0),
        Character(BG1, 2, 0),
        Character(BG1, 3, 0),
    ];
    const MODE5: [FetchSlot; 8] = [
        NameTable(BG2),
        NameTable(BG1),
        Character(BG2, 0, 0),
        Character(BG2, 0, 1),
        Character(BG1, 0, 0),
        Character(BG1, 1, 0),
        Character(BG1, 0, 1),
        Character(BG1, 1, 1),
    ];
    const MODE6: [FetchSlot; 8] = [
        Idle,
        NameTable(BG1),
        Offset(0),
        Offset(8),
        Character(BG1, 0, 0),
        Character(BG1, 1, 0),
        Character(BG1, 0, 1),
        Character(BG1, 1, 1),
    ];
    const MODE7: [FetchSlot; 8] = [Idle; 8];
    match mode & 7 {
        0 => &MODE0,
        1 => &MODE1,
        2 => &MODE2,
        3 => &MODE3,
        4 => &MODE4,
        5 => &MODE5,
        6 => &MODE6,
        _ => &MODE7,
    }
}

/// True for the modes in which BG3 supplies per-column scroll values to BG1 and BG2.
pub fn has_offset_per_tile(mode: u8) -> bool {
    matches!(mode, 2 | 4 | 6)
}

#[bitsize(16)]
#[derive(Clone, Copy, DebugBits, Default, FromBits, PartialEq)]
struct TilemapEntry {
    character: u10,
    palette: u3,
    priority: bool,
    hflip: bool,
    vflip: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
struct Tile {
    /// Word address of the character row.
    address: u16,
    /// Bitplane pairs, low byte holds the even plane.
    planes: [u16; 4],
    palette_base: u8,
    palette_group: u8,
    priority: bool,
    hmirror: bool,
}

impl Tile {
    fn color(&self, pixel: u8) -> u8 {
        let bit = if self.hmirror { pixel } else { 7 - pixel };
        self.planes
            .iter()
            .enumerate()
            .fold(0, |color, (pair, planes)| {
                let low = (planes >> bit) & 1;
                let high = (planes >> (bit + 8)) & 1;
                color | ((low | high << 1) << (pair * 2)) as u8
            })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct BackgroundIo {
    /// Word address of character data, set by BG12NBA/BG34NBA.
    pub tiledata_address: u16,
    /// Word address of the tile map, set by BGnSC.
    pub screen_address: u16,
    /// Bit 0: two screens wide, bit 1: two screens high.
    pub screen_size: u8,
    /// 16x16 pixel tiles.
    pub tile_size: bool,
    pub mosaic_enable: bool,
    pub above_enable: bool,
    pub below_enable: bool,
    pub hoffset: u16,
    pub voffset: u16,
    pub depth: BgDepth,
    /// Output priority of tiles with the priority bit clear and set.
    pub priority: [u8; 2],
}

#[derive(Clone, Encode, Decode)]
pub struct Background {
    id: BackgroundId,
    pub io: BackgroundIo,
    tiles: Vec<Tile>,
    rendering_index: usize,
    pixel_counter: u8,
    mosaic: MosaicHold,
    pub output: LayerOutput,
}

impl Background {
    pub fn new(id: BackgroundId) -> Self {
        Self {
            id,
            io: BackgroundIo::default(),
            tiles: vec![Tile::default(); TILE_CACHE_SIZE],
            rendering_index: 0,
            pixel_counter: 0,
            mosaic: MosaicHold::default(),
            output: LayerOutput::default(),
        }
    }

    pub fn id(&self) -> BackgroundId {
        self.id
    }

    /// Checks the invariants of restored state.
    pub fn is_consistent(&self) -> bool {
        self.tiles.len() == TILE_CACHE_SIZE && self.pixel_counter < 8
    }

    /// Scanline used for fetching, held for the height of a mosaic block.
    pub fn line(&self, ctx: &LineContext) -> u16 {
        if self.io.mosaic_enable {
            ctx.mosaic_line
        } else {
            ctx.vcounter
        }
    }

    fn horizontal_scroll(ctx: &LineContext, hoffset: u16) -> u16 {
        // Hires layers scroll in units of half-dots.
        if ctx.hires {
            hoffset << 1
        } else {
            hoffset
        }
    }

    fn vertical_position(&self, ctx: &LineContext, voffset: u16) -> u16 {
        let line = self.line(ctx);
        let line = if ctx.hires && ctx.interlace {
            line << 1 | ctx.field as u16
        } else {
            line
        };
        line.wrapping_add(voffset)
    }

    fn tilemap_address(&self, hpos: u16, vpos: u16, width_shift: u16, height_shift: u16) -> u16 {
        let x_mask = if self.io.screen_size & 1 != 0 { 63 } else { 31 };
        let y_mask = if self.io.screen_size & 2 != 0 { 63 } else { 31 };
        let tx = (hpos >> width_shift) & x_mask;
        let ty = (vpos >> height_shift) & y_mask;
        let mut offset = (ty & 31) << 5 | (tx & 31);
        if tx & 32 != 0 {
            offset += 0x400;
        }
        if ty & 32 != 0 {
            offset += if self.io.screen_size & 1 != 0 {
                0x800
            } else {
                0x400
            };
        }
        self.io.screen_address.wrapping_add(offset)
    }

    fn palette_base(&self, mode: u8, palette: u8) -> u8 {
        match self.io.depth {
            BgDepth::Bpp2 if mode == 0 => (self.id as u8) << 5 | palette << 2,
            BgDepth::Bpp2 => palette << 2,
            BgDepth::Bpp4 => palette << 4,
            _ => 0,
        }
    }

    fn apply_offset_per_tile(
        &self,
        mode: u8,
        opt: OffsetPerTile,
        hoffset: &mut u16,
        voffset: &mut u16,
    ) {
        let valid_bit = 1 << (13 + self.id as u16);
        if mode == 4 {
            // A single entry applies either horizontally or vertically, selected by bit 15.
            if opt.hoffset & valid_bit != 0 {
                if opt.hoffset & 0x8000 != 0 {
                    *voffset = opt.hoffset & 0x3FF;
                } else {
                    *hoffset = (opt.hoffset & 0x3F8) | (*hoffset & 7);
                }
            }
        } else {
            if opt.hoffset & valid_bit != 0 {
                *hoffset = (opt.hoffset & 0x3F8) | (*hoffset & 7);
            }
            if opt.voffset & valid_bit != 0 {
                *voffset = opt.voffset & 0x3FF;
            }
        }
    }

    /// Reads the tile map entries of a column and prepares the cache for its characters.
    pub fn fetch_name_table(
        &mut self,
        column: usize,
        ctx: &LineContext,
        opt: Option<OffsetPerTile>,
        vram: &Vram,
    ) {
        let mut hoffset = self.io.hoffset;
        let mut voffset = self.io.voffset;
        if let Some(opt) = opt {
            self.apply_offset_per_tile(ctx.mode, opt, &mut hoffset, &mut voffset);
        }
        let width_shift = if self.io.tile_size || ctx.hires { 4 } else { 3 };
        let height_shift = if self.io.tile_size { 4 } else { 3 };
        let hscroll = Self::horizontal_scroll(ctx, hoffset) & !7;
        let vpos = self.vertical_position(ctx, voffset);
        let tiles_per_column = if ctx.hires { 2 } else { 1 };

        for half in 0..tiles_per_column {
            let index = column * tiles_per_column + half;
            let hpos = hscroll.wrapping_add(index as u16 * 8);
            let entry = TilemapEntry::from(vram.read(self.tilemap_address(
                hpos,
                vpos,
                width_shift,
                height_shift,
            )));

            // Select the 8x8 character within a 16 pixel wide or high tile.
            let mut character_x = (hpos >> 3) & ((1 << (width_shift - 3)) - 1);
            let mut character_y = (vpos >> 3) & ((1 << (height_shift - 3)) - 1);
            if entry.hflip() {
                character_x ^= (1 << (width_shift - 3)) - 1;
            }
            if entry.vflip() {
                character_y ^= (1 << (height_shift - 3)) - 1;
            }
            let character = (entry.character().value() + character_x + (character_y << 4)) & 0x3FF;
            let row = if entry.vflip() { vpos & 7 ^ 7 } else { vpos & 7 };
            let words_per_character = 8 * self.io.depth.plane_pairs();

            let palette = entry.palette().value();
            self.tiles[index] = Tile {
                address: self
                    .io
                    .tiledata_address
                    .wrapping_add(character.wrapping_mul(words_per_character))
                    .wrapping_add(row),
                planes: [0; 4],
                palette_base: self.palette_base(ctx.mode, palette),
                palette_group: palette,
                priority: entry.priority(),
                hmirror: entry.hflip(),
            };
        }
    }

    /// Reads bitplane pair `index` of tile `half` within a column.
    pub fn fetch_character(
        &mut self,
        column: usize,
        index: u16,
        half: usize,
        ctx: &LineContext,
        vram: &Vram,
    ) {
        let tiles_per_column = if ctx.hires { 2 } else { 1 };
        let tile = &mut self.tiles[(column * tiles_per_column + half).min(TILE_CACHE_SIZE - 1)];
        tile.planes[index as usize & 3] = vram.read(tile.address.wrapping_add(index * 8));
    }

    /// Reads an offset-per-tile entry from this layer's tile map. Row 0 supplies horizontal
    /// offsets, row 8 vertical offsets.
    pub fn fetch_offset(&self, column: usize, row: u16, vram: &Vram) -> u16 {
        let width_shift = if self.io.tile_size { 4 } else { 3 };
        let height_shift = if self.io.tile_size { 4 } else { 3 };
        let hpos = (self.io.hoffset & !7).wrapping_add(column as u16 * 8);
        let vpos = self.io.voffset.wrapping_add(row);
        vram.read(self.tilemap_address(hpos, vpos, width_shift, height_shift))
    }

    /// Starts rendering of a scanline at the fine scroll offset.
    pub fn begin(&mut self, ctx: &LineContext) {
        self.rendering_index = 0;
        self.pixel_counter = (Self::horizontal_scroll(ctx, self.io.hoffset) & 7) as u8;
        self.mosaic.reset();
        self.output = LayerOutput::default();
    }

    /// Renders the next pixel from the tile cache.
    pub fn run_tiles(&mut self, ctx: &LineContext, plane: Plane) {
        let tile = self.tiles[self.rendering_index.min(TILE_CACHE_SIZE - 1)];
        let color = tile.color(self.pixel_counter);
        self.pixel_counter += 1;
        if self.pixel_counter == 8 {
            self.pixel_counter = 0;
            self.rendering_index += 1;
        }
        let pixel = if color == 0 {
            LayerPixel::default()
        } else {
            LayerPixel {
                priority: self.io.priority[tile.priority as usize],
                palette: tile.palette_base.wrapping_add(color),
                palette_group: tile.palette_group,
            }
        };
        self.emit(pixel, ctx, plane);
    }

    /// Renders a pixel sampled from the mode 7 plane. `sample` is None outside of the plane.
    ///
    /// BG1 uses all 8 bits as color. With EXTBG, BG2 uses the low 7 bits as color and bit 7 as
    /// priority.
    pub fn run_mode7(&mut self, ctx: &LineContext, sample: Option<u8>) {
        let pixel = match (self.id, sample) {
            (_, None) => LayerPixel::default(),
            (BackgroundId::BG2, Some(sample)) if sample & 0x7F != 0 => LayerPixel {
                priority: self.io.priority[(sample >> 7) as usize],
                palette: sample & 0x7F,
                palette_group: 0,
            },
            (BackgroundId::BG2, Some(_)) => LayerPixel::default(),
            (_, Some(0)) => LayerPixel::default(),
            (_, Some(sample)) => LayerPixel {
                priority: self.io.priority[0],
                palette: sample,
                palette_group: 0,
            },
        };
        self.emit(pixel, ctx, Plane::Both);
    }

    fn emit(&mut self, pixel: LayerPixel, ctx: &LineContext, plane: Plane) {
        let pixel = if self.io.mosaic_enable {
            let size = if ctx.hires {
                ctx.mosaic_size << 1
            } else {
                ctx.mosaic_size
            };
            self.mosaic.apply(pixel, size)
        } else {
            pixel
        };
        let gate = |enable: bool| if enable { pixel } else { LayerPixel::default() };
        match plane {
            Plane::Both => {
                self.output.above = gate(self.io.above_enable);
                self.output.below = gate(self.io.below_enable);
            }
            Plane::Below => self.output.below = gate(self.io.below_enable),
            Plane::Above => self.output.above = gate(self.io.above_enable),
        }
    }
}
