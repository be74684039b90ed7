use bitcode::Decode;
use bitcode::Encode;

use crate::common::image::Image;
use crate::common::image::Rgb15;

/// Output resolution covering hires and interlaced frames. Lower resolution frames are written
/// with doubled pixels.
pub const FRAME_WIDTH: u32 = 512;
pub const FRAME_HEIGHT: u32 = 480;

#[derive(Clone, PartialEq, Eq, Encode, Decode)]
pub struct Framebuffer(Vec<Rgb15>);

impl Framebuffer {
    fn iter(&self) -> impl Iterator<Item = (u32, u32, &Rgb15)> {
        self.0.iter().enumerate().map(|(idx, pixel)| {
            (
                idx as u32 % FRAME_WIDTH,
                idx as u32 / FRAME_WIDTH,
                pixel,
            )
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.0.len()
    }

    pub fn row(&self, y: u32) -> &[Rgb15] {
        let start = (y * FRAME_WIDTH) as usize;
        &self.0[start..start + FRAME_WIDTH as usize]
    }

    pub fn to_rgba<ImageT: Image>(&self) -> ImageT {
        let mut image = ImageT::new(FRAME_WIDTH, FRAME_HEIGHT);
        for (x, y, pixel) in self.iter() {
            image.set_pixel((x, y), (*pixel).into());
        }
        image
    }
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self(vec![Rgb15(0); (FRAME_WIDTH * FRAME_HEIGHT) as usize])
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Framebuffer({}x{})", FRAME_WIDTH, FRAME_HEIGHT)
    }
}

impl std::ops::Index<(u32, u32)> for Framebuffer {
    type Output = Rgb15;

    fn index(&self, index: (u32, u32)) -> &Self::Output {
        &self.0[index.0 as usize + index.1 as usize * FRAME_WIDTH as usize]
    }
}

impl std::ops::IndexMut<(u32, u32)> for Framebuffer {
    fn index_mut(&mut self, index: (u32, u32)) -> &mut Self::Output {
        &mut self.0[index.0 as usize + index.1 as usize * FRAME_WIDTH as usize]
    }
}
