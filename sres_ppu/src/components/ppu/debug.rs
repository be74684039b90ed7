use intbits::Bits;

use super::BackgroundId;
use super::Ppu;
use super::Sprite;
use crate::common::image::Image;
use crate::common::uint::U16Ext;

pub struct PpuDebug<'a>(pub &'a Ppu);

impl PpuDebug<'_> {
    pub fn background_info(&self, background_id: BackgroundId) -> String {
        let io = &self.0.state.backgrounds[background_id as usize].io;
        format!(
            "{} {}: Scroll ({}, {}) Tilemap ${:04X} Tiles ${:04X} Priority {:?}",
            background_id,
            io.depth,
            io.hoffset,
            io.voffset,
            io.screen_address,
            io.tiledata_address,
            io.priority
        )
    }

    pub fn sprite_info(&self, sprite_id: u8) -> String {
        self.0.state.oam.sprite(sprite_id).to_string()
    }

    pub fn sprites(&self) -> Vec<Sprite> {
        (0..128).map(|id| self.0.state.oam.sprite(id)).collect()
    }

    pub fn counters(&self) -> String {
        let counter = &self.0.state.counter;
        format!(
            "V:{:3} H:{:4} F:{} ({})",
            counter.vcounter(),
            counter.hcounter(),
            counter.field() as u8,
            counter.frame()
        )
    }

    /// Renders all tiles of a sprite with its palette, ignoring flips.
    pub fn render_sprite<ImageT: Image>(&self, sprite_id: u8) -> ImageT {
        let state = &self.0.state;
        let sprite = state.oam.sprite(sprite_id);
        let (width, height) = state.objects.size(&sprite);
        let mut image = ImageT::new(width as u32, height as u32);

        let mut tiledata = state.objects.io.tiledata_address;
        if sprite.nameselect {
            tiledata = tiledata.wrapping_add((1 + state.objects.io.nameselect as u16) << 12);
        }
        for coarse_y in 0..height / 8 {
            for coarse_x in 0..width / 8 {
                let character = ((sprite.character as u16 >> 4) + coarse_y) << 4
                    | ((sprite.character as u16 + coarse_x) & 15);
                let base = tiledata.wrapping_add(character << 4);
                for fine_y in 0..8 {
                    let low = state.vram.read(base.wrapping_add(fine_y));
                    let high = state.vram.read(base.wrapping_add(fine_y + 8));
                    for fine_x in 0..8 {
                        let bit = 7 - fine_x as usize;
                        let pixel = low.low_byte().bit(bit) as u8
                            | (low.high_byte().bit(bit) as u8) << 1
                            | (high.low_byte().bit(bit) as u8) << 2
                            | (high.high_byte().bit(bit) as u8) << 3;
                        let color = state.cgram.color(128 + (sprite.palette << 4) + pixel);
                        image.set_pixel(
                            ((coarse_x * 8 + fine_x) as u32, (coarse_y * 8 + fine_y) as u32),
                            color.into(),
                        );
                    }
                }
            }
        }
        image
    }

    /// Renders CGRAM as a 16x16 grid of colors.
    pub fn render_palette<ImageT: Image>(&self) -> ImageT {
        let mut image = ImageT::new(16, 16);
        for index in 0..=255_u8 {
            image.set_pixel(
                ((index & 15) as u32, (index >> 4) as u32),
                self.0.state.cgram.color(index).into(),
            );
        }
        image
    }
}
