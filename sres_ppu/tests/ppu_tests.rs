//! High level testing focused on the PPU
//!
//! All tests program the PPU directly through its registers, run it for whole frames and
//! inspect the completed frame buffer.
use image::RgbaImage;
use pretty_assertions::assert_eq;
use sres_ppu::common::address::AddressU24;
use sres_ppu::common::clock::Chip;
use sres_ppu::common::image::Image;
use sres_ppu::common::image::Rgb15;
use sres_ppu::common::image::Rgba32;
use sres_ppu::common::logging;
use sres_ppu::components::ppu::BackgroundId;
use sres_ppu::components::ppu::Framebuffer;
use sres_ppu::components::ppu::Ppu;
use sres_ppu::components::ppu::PpuConfig;
use sres_ppu::components::ppu::Region;
use sres_ppu::components::ppu::ScanlineObserver;
use sres_ppu::components::ppu::FRAME_HEIGHT;
use sres_ppu::components::ppu::FRAME_WIDTH;

const RED: Rgb15 = Rgb15(0x001F);
const GREEN: Rgb15 = Rgb15(0x03E0);
const BLUE: Rgb15 = Rgb15(0x7C00);
const MAGENTA: Rgb15 = Rgb15(0x7C1F);

/// Renders a scene of one BG1 tile, one sprite and a backdrop blended with the fixed color.
///
/// BG1 (mode 0, 2bpp): character 1 is solid color 1 (red), placed at tile (0, 0). The first
/// visible line shows line 1 of the layer, so the tile covers screen rows 0-6.
/// OBJ: sprite 0 at (16, 20), 8x8, character 2 solid color 1 of palette 0 (green).
/// Backdrop: blue, with the fixed color red added by color math.
#[test]
pub fn test_scene() {
    logging::test_init(false);
    let mut ppu = Ppu::new(PpuConfig::default());
    setup_scene(&mut ppu);
    let frame = run_frame(&mut ppu);

    // Each dot covers 2x2 frame buffer pixels.
    assert_eq!(frame[(0, 0)], RED);
    assert_eq!(frame[(1, 1)], RED);
    assert_eq!(frame[(15, 13)], RED);
    assert_eq!(frame[(0, 14)], MAGENTA);
    assert_eq!(frame[(16, 0)], MAGENTA);

    assert_eq!(frame[(32, 40)], GREEN);
    assert_eq!(frame[(47, 55)], GREEN);
    assert_eq!(frame[(32, 38)], MAGENTA);
    assert_eq!(frame[(48, 40)], MAGENTA);
    assert_eq!(frame[(32, 56)], MAGENTA);

    // Lines below the visible area are not rendered.
    assert_eq!(frame[(0, 448)], Rgb15(0));

    let image = frame.to_rgba::<TestImageImpl>();
    assert_eq!(image.inner.dimensions(), (FRAME_WIDTH, FRAME_HEIGHT));
    assert_eq!(image.inner[(0, 0)], image::Rgba([255, 0, 0, 255]));
}

/// A character with only its leftmost column set lands on the first dot of its tile.
#[test]
pub fn test_bg_pixel_alignment() {
    let mut ppu = Ppu::new(PpuConfig::default());
    ppu_write(&mut ppu, 0x2105, 0x00);
    ppu_write(&mut ppu, 0x2107, 0x04);
    ppu_write(&mut ppu, 0x210B, 0x00);
    ppu_write(&mut ppu, 0x212C, 0x01);
    ppu_write(&mut ppu, 0x2115, 0x80);
    // Character 3, plane 0: leftmost pixel of each row.
    write_vram(&mut ppu, 0x0018, &[0x0080; 8]);
    // Tilemap entries (0, 0) and (31, 0).
    write_vram(&mut ppu, 0x0400, &[0x0003]);
    write_vram(&mut ppu, 0x041F, &[0x0003]);
    write_cgram(&mut ppu, 1, RED);
    ppu_write(&mut ppu, 0x2100, 0x0F);
    let frame = run_frame(&mut ppu);

    let dots: Vec<Rgb15> = (0..4).map(|dot| frame[(dot * 2, 0)]).collect();
    assert_eq!(dots, vec![RED, Rgb15(0), Rgb15(0), Rgb15(0)]);
    assert_eq!(frame[(1, 13)], RED);
    assert_eq!(frame[(247 * 2, 0)], Rgb15(0));
    assert_eq!(frame[(248 * 2, 0)], RED);
    assert_eq!(frame[(249 * 2, 0)], Rgb15(0));
    assert_eq!(frame[(255 * 2, 0)], Rgb15(0));
}

#[test]
pub fn test_forced_blank_renders_black() {
    let mut ppu = Ppu::new(PpuConfig::default());
    setup_scene(&mut ppu);
    ppu_write(&mut ppu, 0x2100, 0x8F);
    let frame = run_frame(&mut ppu);
    assert_eq!(frame[(0, 0)], Rgb15(0));
    assert_eq!(frame[(100, 100)], Rgb15(0));
}

#[test]
pub fn test_brightness() {
    let mut ppu = Ppu::new(PpuConfig::default());
    setup_scene(&mut ppu);
    // Disable color math and halve the brightness.
    ppu_write(&mut ppu, 0x2131, 0x00);
    ppu_write(&mut ppu, 0x2100, 0x07);
    let frame = run_frame(&mut ppu);
    assert_eq!(frame[(0, 0)], Rgb15::new(14, 0, 0));
    assert_eq!(frame[(16, 0)], Rgb15::new(0, 0, 14));
}

#[test]
pub fn test_window_masks_bg1() {
    let mut ppu = Ppu::new(PpuConfig::default());
    setup_scene(&mut ppu);
    // Window 1 covering dots 4-10 masks BG1 on the main screen.
    ppu_write(&mut ppu, 0x2126, 4);
    ppu_write(&mut ppu, 0x2127, 10);
    ppu_write(&mut ppu, 0x2123, 0x02);
    ppu_write(&mut ppu, 0x212E, 0x01);
    let frame = run_frame(&mut ppu);
    assert_eq!(frame[(6, 0)], RED);
    assert_eq!(frame[(8, 0)], MAGENTA);
}

#[test]
pub fn test_swap_video_frame() {
    let mut ppu = Ppu::new(PpuConfig::default());
    let mut frame = Framebuffer::default();
    assert!(!ppu.swap_video_frame(&mut frame));
    run_frame(&mut ppu);
    assert!(!ppu.swap_video_frame(&mut frame));
}

#[test]
pub fn test_interlace_toggles_field() {
    let mut ppu = Ppu::new(PpuConfig::default());
    ppu_write(&mut ppu, 0x2133, 0x01);
    run_frame(&mut ppu);
    run_until_vblank_end(&mut ppu);
    assert!(ppu.counter().interlace());
    let field = ppu.counter().field();
    run_frame(&mut ppu);
    run_until_vblank_end(&mut ppu);
    assert_eq!(ppu.counter().field(), !field);
}

#[test]
pub fn test_save_state_round_trip() {
    let mut ppu = Ppu::new(PpuConfig::default());
    setup_scene(&mut ppu);
    for _ in 0..100_000 {
        ppu.main();
    }
    let mut restored = Ppu::new(PpuConfig::default());
    restored.load_state(&ppu.save_state()).unwrap();
    assert_eq!(restored.debug().counters(), ppu.debug().counters());
    assert_eq!(
        restored.debug().background_info(BackgroundId::BG1),
        ppu.debug().background_info(BackgroundId::BG1)
    );

    let frame = run_frame(&mut ppu);
    let restored_frame = run_frame(&mut restored);
    assert!(frame == restored_frame);
    assert!(ppu.save_state() == restored.save_state());
}

#[test]
pub fn test_load_state_rejects_other_region() {
    let ntsc = Ppu::new(PpuConfig::default());
    let mut pal = Ppu::new(PpuConfig {
        region: Region::Pal,
        ..Default::default()
    });
    let error = pal.load_state(&ntsc.save_state()).unwrap_err();
    assert!(error.to_string().starts_with("corrupt PPU state"));
}

#[derive(Default)]
struct LineRecorder {
    lines: std::rc::Rc<std::cell::RefCell<Vec<u16>>>,
}

impl ScanlineObserver for LineRecorder {
    fn horizontal_reset(&mut self, vcounter: u16) {
        self.lines.borrow_mut().push(vcounter);
    }
}

#[test]
pub fn test_scanline_observer() {
    let recorder = LineRecorder::default();
    let lines = recorder.lines.clone();
    let mut ppu = Ppu::new(PpuConfig::default());
    ppu.set_observer(Box::new(recorder));
    for _ in 0..(1364 * 3 / 2) {
        ppu.main();
    }
    assert_eq!(*lines.borrow(), vec![1, 2, 3]);
}

#[test]
pub fn test_debug_render_sprite() {
    let mut ppu = Ppu::new(PpuConfig::default());
    setup_scene(&mut ppu);
    let sprite = ppu.debug().render_sprite::<TestImageImpl>(0);
    assert_eq!(sprite.inner.dimensions(), (8, 8));
    assert_eq!(sprite.inner[(3, 3)], image::Rgba([0, 255, 0, 255]));
    assert!(ppu.debug().sprite_info(0).contains("(16, 20)"));
    let palette = ppu.debug().render_palette::<TestImageImpl>();
    assert_eq!(palette.inner[(1, 0)], image::Rgba([255, 0, 0, 255]));
}

/// Programs the scene of `test_scene`. The PPU is in forced blank at power-on, so all memory
/// is accessible.
fn setup_scene(ppu: &mut Ppu) {
    // Mode 0, BG1 tilemap at $0400, BG1 characters at $0000, sprite characters at $2000.
    ppu_write(ppu, 0x2105, 0x00);
    ppu_write(ppu, 0x2107, 0x04);
    ppu_write(ppu, 0x210B, 0x00);
    ppu_write(ppu, 0x2101, 0x01);
    // BG1 and OBJ on the main screen.
    ppu_write(ppu, 0x212C, 0x11);

    // VMAIN: increment after the high byte.
    ppu_write(ppu, 0x2115, 0x80);
    // BG character 1 (2bpp): plane 0 set.
    write_vram(ppu, 0x0008, &[0x00FF; 8]);
    // BG1 tilemap entry (0, 0) = character 1.
    write_vram(ppu, 0x0400, &[0x0001]);
    // Sprite character 2 (4bpp): plane 0 set.
    write_vram(ppu, 0x2020, &[0x00FF; 8]);

    // Backdrop blue, BG palette 0 color 1 red, OBJ palette 0 color 1 green.
    write_cgram(ppu, 0, BLUE);
    write_cgram(ppu, 1, RED);
    write_cgram(ppu, 129, GREEN);

    // Sprite 0 at (16, 20), character 2, priority 3.
    ppu_write(ppu, 0x2102, 0x00);
    ppu_write(ppu, 0x2103, 0x00);
    for value in [16, 20, 2, 0x30] {
        ppu_write(ppu, 0x2104, value);
    }

    // Add the fixed color red to the backdrop.
    ppu_write(ppu, 0x2130, 0x00);
    ppu_write(ppu, 0x2131, 0x20);
    ppu_write(ppu, 0x2132, 0x3F);

    // Full brightness, leave forced blank.
    ppu_write(ppu, 0x2100, 0x0F);
}

fn ppu_write(ppu: &mut Ppu, reg: u16, value: u8) {
    ppu.write_io(AddressU24::new(0, reg), value);
}

fn write_vram(ppu: &mut Ppu, word_addr: u16, words: &[u16]) {
    ppu_write(ppu, 0x2116, (word_addr & 0xFF) as u8);
    ppu_write(ppu, 0x2117, (word_addr >> 8) as u8);
    for word in words {
        ppu_write(ppu, 0x2118, (word & 0xFF) as u8);
        ppu_write(ppu, 0x2119, (word >> 8) as u8);
    }
}

fn write_cgram(ppu: &mut Ppu, index: u8, color: Rgb15) {
    ppu_write(ppu, 0x2121, index);
    ppu_write(ppu, 0x2122, (color.0 & 0xFF) as u8);
    ppu_write(ppu, 0x2122, (color.0 >> 8) as u8);
}

/// Runs the PPU until the next frame is completed and returns it.
fn run_frame(ppu: &mut Ppu) -> Framebuffer {
    let mut frame = Framebuffer::default();
    while !ppu.swap_video_frame(&mut frame) {
        ppu.main();
    }
    frame
}

fn run_until_vblank_end(ppu: &mut Ppu) {
    while ppu.counter().vcounter() != 0 {
        ppu.main();
    }
}

struct TestImageImpl {
    inner: RgbaImage,
}

impl Image for TestImageImpl {
    fn new(width: u32, height: u32) -> Self {
        TestImageImpl {
            inner: RgbaImage::new(width, height),
        }
    }

    fn set_pixel(&mut self, index: (u32, u32), value: Rgba32) {
        self.inner[(index.0, index.1)] = image::Rgba::from(value.0);
    }
}
