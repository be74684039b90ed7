//! Implementation of the Picture Processing Unit
//!
//! The PPU runs as a [Chip] in steps of 2 master clocks. Rendering of a visible scanline is a
//! fixed schedule relative to the start of the line: sprite evaluation every 8 clocks, background
//! fetches every 4 clocks and one output dot every 4 clocks, delayed behind the fetches. At the
//! end of the line the sprite tiles for the next line are fetched.
mod background;
mod cgram;
mod config;
mod counter;
mod debug;
mod framebuffer;
mod mode7;
mod mosaic;
mod oam;
mod object;
mod policy;
mod screen;
mod vram;
mod window;

use anyhow::ensure;
use anyhow::Context;
use bitcode::Decode;
use bitcode::Encode;
use intbits::Bits;

use self::background::fetch_schedule;
use self::background::has_offset_per_tile;
use self::background::Background;
pub use self::background::BackgroundId;
pub use self::background::BgDepth;
use self::background::FetchSlot;
use self::background::LayerOutput;
use self::background::LineContext;
use self::background::OffsetPerTile;
use self::background::Plane;
use self::cgram::CgRam;
pub use self::config::PpuConfig;
pub use self::config::Region;
pub use self::config::VramSize;
pub use self::counter::CounterEvent;
pub use self::counter::PpuCounter;
pub use self::debug::PpuDebug;
pub use self::framebuffer::Framebuffer;
pub use self::framebuffer::FRAME_HEIGHT;
pub use self::framebuffer::FRAME_WIDTH;
use self::mode7::Mode7;
use self::mosaic::Mosaic;
use self::oam::Oam;
pub use self::oam::Sprite;
use self::object::ObjectEngine;
pub use self::policy::ProvisionalPolicy;
pub use self::policy::RenderTimeCgramAccess;
pub use self::policy::RenderTimeOamAccess;
pub use self::policy::RenderTimeVramAccess;
use self::screen::Screen;
use self::screen::ScreenInput;
use self::vram::Vram;
use self::window::Window;
use crate::common::address::AddressU24;
use crate::common::clock::Chip;
use crate::common::clock::ChipClock;
use crate::common::uint::U16Ext;
use crate::common::uint::U32Ext;
use crate::common::uint::U8Ext;

/// Master clock at which the rendering pipeline of a scanline starts.
const RENDER_START: u16 = 22;
/// Pipeline cycle of the sprite tile fetch, the last step of the pipeline.
const RENDER_END: u16 = 1088;
/// Pipeline cycle at which the first pixel leaves the background tile caches.
const BG_RUN_START: u16 = 56;
/// Pipeline cycle of the first output dot, after both halves of pixel 0 left the backgrounds.
const OUTPUT_START: u16 = 58;

/// Depth and the two tile priorities of each background, and the four sprite priorities.
type LayerSetup = ([BgDepth; 4], [[u8; 2]; 4], [u8; 4]);

/// Receives the counter events of the PPU. Coprocessors keyed on the video timing attach here.
pub trait ScanlineObserver {
    fn horizontal_reset(&mut self, _vcounter: u16) {}
    fn vertical_reset(&mut self, _field: bool) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
struct PpuIo {
    forced_blank: bool,
    brightness: u8,
    bg_mode: u8,
    bg3_priority: bool,
    extbg: bool,
    pseudo_hires: bool,
    interlace: bool,
    overscan: bool,
}

/// Write-twice and read-twice latches, and addresses latched by the renderer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
struct Latch {
    mode7: u8,
    bgofs_ppu1: u8,
    bgofs_ppu2: u8,
    hcounter: u16,
    vcounter: u16,
    hcounter_high: bool,
    vcounter_high: bool,
    /// Set when the counters have been latched, reported and cleared by STAT78.
    counters: bool,
    /// OAM address of the last sprite evaluated.
    oam_address: u16,
    /// CGRAM entry of the last composited pixel.
    cgram_address: u8,
}

#[derive(Clone, Encode, Decode)]
pub struct PpuState {
    clock: ChipClock,
    counter: PpuCounter,
    io: PpuIo,
    latch: Latch,
    ppu1_mdr: u8,
    ppu2_mdr: u8,
    /// Programmable IO port of the CPU. Bit 7 is wired to the counter latch.
    pio: u8,
    vram: Vram,
    oam: Oam,
    cgram: CgRam,
    backgrounds: [Background; 4],
    opt: OffsetPerTile,
    mode7: Mode7,
    mosaic: Mosaic,
    objects: ObjectEngine,
    window: Window,
    screen: Screen,
    /// Frame currently being rendered.
    frame: Framebuffer,
}

impl PpuState {
    fn new(config: &PpuConfig) -> Self {
        let frequency = config.region.master_clock_frequency();
        Self {
            clock: ChipClock::new(frequency, frequency),
            counter: PpuCounter::new(config.region),
            io: PpuIo {
                forced_blank: true,
                ..Default::default()
            },
            latch: Latch::default(),
            ppu1_mdr: 0,
            ppu2_mdr: 0,
            pio: 0xFF,
            vram: Vram::new(config.vram_size),
            oam: Oam::new(),
            cgram: CgRam::new(),
            backgrounds: BackgroundId::ALL.map(Background::new),
            opt: OffsetPerTile::default(),
            mode7: Mode7::default(),
            mosaic: Mosaic::default(),
            objects: ObjectEngine::default(),
            window: Window::default(),
            screen: Screen::default(),
            frame: Framebuffer::default(),
        }
    }

    fn validate(&self, config: &PpuConfig) -> anyhow::Result<()> {
        ensure!(
            self.vram.words() == config.vram_size.mask() as usize + 1
                && self.vram.mask() == config.vram_size.mask(),
            "corrupt PPU state: VRAM size does not match {}",
            config.vram_size
        );
        ensure!(self.oam.bytes() == 544, "corrupt PPU state: invalid OAM size");
        ensure!(
            self.cgram.entries() == 256,
            "corrupt PPU state: invalid CGRAM size"
        );
        ensure!(
            self.backgrounds.iter().all(Background::is_consistent),
            "corrupt PPU state: invalid background tile cache"
        );
        ensure!(
            self.objects.is_consistent(),
            "corrupt PPU state: invalid sprite buffers"
        );
        ensure!(
            (1..=16).contains(&self.mosaic.size()),
            "corrupt PPU state: invalid mosaic size"
        );
        ensure!(
            self.frame.pixel_count() == (FRAME_WIDTH * FRAME_HEIGHT) as usize,
            "corrupt PPU state: invalid frame buffer"
        );
        ensure!(
            self.counter.region() == config.region,
            "corrupt PPU state: saved for {} but configured for {}",
            self.counter.region(),
            config.region
        );
        Ok(())
    }
}

pub struct Ppu {
    config: PpuConfig,
    headless: bool,
    state: PpuState,
    /// Last completed frame, handed out by [Ppu::swap_video_frame].
    completed: Framebuffer,
    frame_ready: bool,
    observer: Option<Box<dyn ScanlineObserver>>,
}

impl Ppu {
    pub fn new(config: PpuConfig) -> Self {
        let mut ppu = Self {
            state: PpuState::new(&config),
            config,
            headless: false,
            completed: Framebuffer::default(),
            frame_ready: false,
            observer: None,
        };
        ppu.update_video_mode();
        ppu
    }

    pub fn config(&self) -> &PpuConfig {
        &self.config
    }

    /// Only used for benchmarks, runs full PPU emulation but does not render
    pub fn force_headless(&mut self) {
        self.headless = true;
    }

    pub fn set_observer(&mut self, observer: Box<dyn ScanlineObserver>) {
        self.observer = Some(observer);
    }

    /// Restores power-on defaults. The clock balance is kept.
    pub fn reset(&mut self) {
        let clock = self.state.clock;
        self.state = PpuState::new(&self.config);
        self.state.clock = clock;
        self.frame_ready = false;
        self.update_video_mode();
    }

    pub fn counter(&self) -> &PpuCounter {
        &self.state.counter
    }

    /// The last completed frame.
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.completed
    }

    /// Hands the last completed frame to the caller in exchange for `target`. Returns false if no
    /// frame has been completed since the last swap.
    pub fn swap_video_frame(&mut self, target: &mut Framebuffer) -> bool {
        if !self.frame_ready {
            return false;
        }
        std::mem::swap(target, &mut self.completed);
        self.frame_ready = false;
        true
    }

    pub fn save_state(&self) -> Vec<u8> {
        bitcode::encode(&self.state)
    }

    /// Restores a state created by [Ppu::save_state]. On error the current state is kept.
    pub fn load_state(&mut self, encoded: &[u8]) -> anyhow::Result<()> {
        let state: PpuState = bitcode::decode(encoded).context("corrupt PPU state")?;
        state.validate(&self.config)?;
        self.state = state;
        Ok(())
    }

    pub fn debug(&self) -> PpuDebug<'_> {
        PpuDebug(self)
    }

    pub fn read_io(&mut self, addr: AddressU24, fallback: u8) -> u8 {
        match addr.offset {
            0x2104..=0x2106
            | 0x2108..=0x210A
            | 0x2114..=0x2116
            | 0x2118..=0x211A
            | 0x2124..=0x2126
            | 0x2128..=0x212A => self.state.ppu1_mdr,
            0x2134..=0x2136 => {
                self.state.ppu1_mdr = self.read_mpy(addr);
                self.state.ppu1_mdr
            }
            0x2137 => self.read_slhv(fallback),
            0x2138 => {
                let target = self.oam_target();
                self.state.ppu1_mdr = self.state.oam.read_oamdataread(target);
                self.state.ppu1_mdr
            }
            0x2139 => {
                let accessible = self.vram_accessible();
                self.state.ppu1_mdr = self.state.vram.read_vmdatalread(accessible);
                self.state.ppu1_mdr
            }
            0x213A => {
                let accessible = self.vram_accessible();
                self.state.ppu1_mdr = self.state.vram.read_vmdatahread(accessible);
                self.state.ppu1_mdr
            }
            0x213B => {
                let target = self.cgram_target();
                self.state.ppu2_mdr = self
                    .state
                    .cgram
                    .read_cgdataread(target, self.state.ppu2_mdr);
                self.state.ppu2_mdr
            }
            0x213C => self.read_ophct(),
            0x213D => self.read_opvct(),
            0x213E => {
                self.state.ppu1_mdr = self.peek_stat77();
                self.state.ppu1_mdr
            }
            0x213F => self.read_stat78(),
            0x2100..=0x213F => fallback,
            _ => {
                log::warn!("PPU: Unhandled read from {}", addr);
                fallback
            }
        }
    }

    /// Returns the value a read of `addr` would return, without side effects. None for reads
    /// that return CPU open bus.
    pub fn peek_io(&self, addr: AddressU24) -> Option<u8> {
        match addr.offset {
            0x2104..=0x2106
            | 0x2108..=0x210A
            | 0x2114..=0x2116
            | 0x2118..=0x211A
            | 0x2124..=0x2126
            | 0x2128..=0x212A => Some(self.state.ppu1_mdr),
            0x2134..=0x2136 => Some(self.read_mpy(addr)),
            0x2138 => Some(self.state.oam.peek(self.oam_target())),
            0x2139 => Some(self.state.vram.peek_vmdatalread()),
            0x213A => Some(self.state.vram.peek_vmdatahread()),
            0x213B => Some(
                self.state
                    .cgram
                    .peek_cgdataread(self.cgram_target(), self.state.ppu2_mdr),
            ),
            0x213C => Some(self.peek_ophct()),
            0x213D => Some(self.peek_opvct()),
            0x213E => Some(self.peek_stat77()),
            0x213F => Some(self.peek_stat78()),
            _ => None,
        }
    }

    pub fn write_io(&mut self, addr: AddressU24, value: u8) {
        match addr.offset {
            0x2100 => self.write_inidisp(value),
            0x2101 => self.state.objects.write_objsel(value),
            0x2102 => self.state.oam.write_oamaddl(value),
            0x2103 => self.state.oam.write_oamaddh(value),
            0x2104 => {
                let target = self.oam_target();
                self.state.oam.write_oamdata(value, target);
            }
            0x2105 => self.write_bgmode(value),
            0x2106 => self.write_mosaic(value),
            0x2107..=0x210A => self.write_bgnsc(addr, value),
            0x210B => self.write_bgnba(BackgroundId::BG1, value),
            0x210C => self.write_bgnba(BackgroundId::BG3, value),
            0x210D => self.write_bg1hofs(value),
            0x210E => self.write_bg1vofs(value),
            0x210F | 0x2111 | 0x2113 => self.write_bgnhofs(addr, value),
            0x2110 | 0x2112 | 0x2114 => self.write_bgnvofs(addr, value),
            0x2115 => self.state.vram.write_vmain(value),
            0x2116 => {
                let accessible = self.vram_accessible();
                self.state.vram.write_vmaddl(value, accessible);
            }
            0x2117 => {
                let accessible = self.vram_accessible();
                self.state.vram.write_vmaddh(value, accessible);
            }
            0x2118 => {
                let accessible = self.vram_accessible();
                self.state.vram.write_vmdatal(value, accessible);
            }
            0x2119 => {
                let accessible = self.vram_accessible();
                self.state.vram.write_vmdatah(value, accessible);
            }
            0x211A => self.state.mode7.write_m7sel(value),
            0x211B..=0x2120 => self.write_mode7_matrix(addr, value),
            0x2121 => self.state.cgram.write_cgadd(value),
            0x2122 => {
                let target = self.cgram_target();
                self.state.cgram.write_cgdata(value, target);
            }
            0x2123 => self.state.window.write_select(0, value),
            0x2124 => self.state.window.write_select(2, value),
            0x2125 => self.state.window.write_select(4, value),
            0x2126 => self.state.window.one_left = value,
            0x2127 => self.state.window.one_right = value,
            0x2128 => self.state.window.two_left = value,
            0x2129 => self.state.window.two_right = value,
            0x212A => self.state.window.write_wbglog(value),
            0x212B => self.state.window.write_wobjlog(value),
            0x212C => self.write_tm(value),
            0x212D => self.write_ts(value),
            0x212E => self.state.window.write_tmw(value),
            0x212F => self.state.window.write_tsw(value),
            0x2130 => self.write_cgwsel(value),
            0x2131 => self.state.screen.io.write_cgadsub(value),
            0x2132 => self.state.screen.io.write_coldata(value),
            0x2133 => self.write_setini(value),
            // Read-only registers
            0x2134..=0x213F => (),
            _ => log::warn!("PPU: Unhandled write to {} = {:02X}", addr, value),
        }
    }

    /// Updates the programmable IO port. A falling edge on bit 7 latches the counters.
    pub fn set_pio_latch(&mut self, pio: u8) {
        if self.state.pio.bit(7) && !pio.bit(7) {
            self.latch_counters();
        }
        self.state.pio = pio;
    }

    /// Captures the current dot and scanline into OPHCT/OPVCT.
    pub fn latch_counters(&mut self) {
        self.state.latch.hcounter = self.state.counter.hdot();
        self.state.latch.vcounter = self.state.counter.vcounter();
        self.state.latch.counters = true;
    }

    fn rendering(&self) -> bool {
        !self.state.io.forced_blank && self.state.counter.vcounter() < self.state.counter.vdisp()
    }

    fn vram_accessible(&self) -> bool {
        self.config.policy.vram_accessible(self.rendering())
    }

    fn oam_target(&self) -> u16 {
        self.config.policy.oam_address(
            self.state.oam.address(),
            self.state.latch.oam_address,
            self.rendering(),
        )
    }

    fn cgram_target(&self) -> u8 {
        let hcounter = self.state.counter.hcounter();
        let compositing = self.rendering()
            && self.state.counter.vcounter() > 0
            && (88..1096).contains(&hcounter);
        self.config.policy.cgram_address(
            self.state.cgram.address(),
            self.state.latch.cgram_address,
            compositing,
        )
    }

    fn hires(&self) -> bool {
        matches!(self.state.io.bg_mode, 5 | 6)
    }

    fn line_context(&self) -> LineContext {
        LineContext {
            mode: self.state.io.bg_mode,
            hires: self.hires(),
            interlace: self.state.counter.interlace(),
            field: self.state.counter.field(),
            vcounter: self.state.counter.vcounter(),
            mosaic_line: self.state.mosaic.line(),
            mosaic_size: self.state.mosaic.size(),
        }
    }

    fn cycle(&mut self) {
        let hcounter = self.state.counter.hcounter();
        if hcounter == 0 {
            self.scanline();
        }
        if self.state.counter.vcounter() < self.state.counter.vdisp()
            && (RENDER_START..=RENDER_START + RENDER_END).contains(&hcounter)
        {
            self.render_cycle(hcounter - RENDER_START);
        }
    }

    fn scanline(&mut self) {
        let vcounter = self.state.counter.vcounter();
        let vdisp = self.state.counter.vdisp();
        self.state.mosaic.scanline(vcounter);
        self.state.opt = OffsetPerTile::default();
        self.state.objects.scanline(
            vcounter,
            vdisp,
            self.state.io.forced_blank,
            &mut self.state.oam,
        );
        if vcounter == vdisp {
            self.complete_frame();
        }
    }

    fn complete_frame(&mut self) {
        std::mem::swap(&mut self.state.frame, &mut self.completed);
        if self.state.counter.interlace() {
            // Each field only renders every other row.
            self.state.frame.clone_from(&self.completed);
        }
        self.frame_ready = true;
        log::trace!("PPU: frame {} complete", self.state.counter.frame());
    }

    fn render_cycle(&mut self, cycle: u16) {
        if cycle % 8 == 0 && cycle < 1024 {
            if let Some(address) = self
                .state
                .objects
                .evaluate((cycle >> 3) as u8, &self.state.oam)
            {
                self.state.latch.oam_address = address;
            }
        }
        if self.state.counter.vcounter() > 0 {
            if cycle % 4 == 0 && cycle < 33 * 32 {
                self.fetch_backgrounds((cycle >> 5) as usize, ((cycle >> 2) & 7) as usize);
            }
            if cycle == BG_RUN_START {
                let ctx = self.line_context();
                for background in self.state.backgrounds.iter_mut() {
                    background.begin(&ctx);
                }
            }
            let hires = self.hires();
            if (BG_RUN_START..BG_RUN_START + 1024).contains(&cycle)
                && (cycle - BG_RUN_START) % 4 == 0
            {
                let plane = if hires { Plane::Below } else { Plane::Both };
                self.run_backgrounds((cycle - BG_RUN_START) / 4, plane);
            }
            if hires
                && (BG_RUN_START + 2..BG_RUN_START + 1026).contains(&cycle)
                && (cycle - BG_RUN_START - 2) % 4 == 0
            {
                self.run_backgrounds((cycle - BG_RUN_START - 2) / 4, Plane::Above);
            }
            if (OUTPUT_START..OUTPUT_START + 1024).contains(&cycle)
                && (cycle - OUTPUT_START) % 4 == 0
            {
                self.output_pixel((cycle - OUTPUT_START) / 4);
            }
        }
        if cycle == RENDER_END {
            let field = self.state.counter.field();
            self.state
                .objects
                .fetch(&self.state.oam, &self.state.vram, field);
        }
    }

    fn fetch_backgrounds(&mut self, column: usize, slot: usize) {
        let ctx = self.line_context();
        let state = &mut self.state;
        match fetch_schedule(ctx.mode)[slot] {
            FetchSlot::Idle => (),
            FetchSlot::NameTable(id) => {
                let opt = (has_offset_per_tile(ctx.mode) && id != BackgroundId::BG3)
                    .then_some(state.opt);
                state.backgrounds[id as usize].fetch_name_table(column, &ctx, opt, &state.vram);
            }
            FetchSlot::Offset(row) => {
                let value = state.backgrounds[BackgroundId::BG3 as usize].fetch_offset(
                    column,
                    row,
                    &state.vram,
                );
                if row == 0 {
                    state.opt.hoffset = value;
                } else {
                    state.opt.voffset = value;
                }
            }
            FetchSlot::Character(id, index, half) => {
                state.backgrounds[id as usize].fetch_character(
                    column,
                    index,
                    half,
                    &ctx,
                    &state.vram,
                );
            }
        }
    }

    fn run_backgrounds(&mut self, x: u16, plane: Plane) {
        let ctx = self.line_context();
        let state = &mut self.state;
        for background in state.backgrounds.iter_mut() {
            match background.io.depth {
                BgDepth::Inactive => background.output = LayerOutput::default(),
                BgDepth::Mode7 => {
                    let y = background.line(&ctx);
                    let sample = state.mode7.sample(x, y, &state.vram);
                    background.run_mode7(&ctx, sample);
                }
                _ => background.run_tiles(&ctx, plane),
            }
        }
    }

    fn output_pixel(&mut self, x: u16) {
        self.state.objects.run(x);
        if self.headless {
            return;
        }
        let masks = self.state.window.run(x as u8);
        let hires = self.state.io.pseudo_hires || self.hires();
        let interlace = self.state.counter.interlace();
        let field = self.state.counter.field() as u32;
        let line = self.state.counter.vcounter() as u32 - 1;

        let state = &mut self.state;
        let input = ScreenInput {
            layers: [
                state.backgrounds[0].output,
                state.backgrounds[1].output,
                state.backgrounds[2].output,
                state.backgrounds[3].output,
                state.objects.output,
            ],
            masks,
            cgram: &state.cgram,
            mode: state.io.bg_mode,
            hires,
            brightness: state.io.brightness,
            forced_blank: state.io.forced_blank,
        };
        let [first, second] = state.screen.run(&input);
        state.latch.cgram_address = state.screen.cgram_address();

        let x = x as u32 * 2;
        let rows = if interlace {
            line * 2 + field..line * 2 + field + 1
        } else {
            line * 2..line * 2 + 2
        };
        for y in rows {
            state.frame[(x, y)] = first;
            state.frame[(x + 1, y)] = second;
        }
    }

    fn update_video_mode(&mut self) {
        use BgDepth::Bpp2;
        use BgDepth::Bpp4;
        use BgDepth::Bpp8;
        use BgDepth::Inactive;
        const NONE: [u8; 2] = [0, 0];
        let io = self.state.io;
        let (depths, priorities, objects): LayerSetup = match io.bg_mode {
            0 => (
                [Bpp2, Bpp2, Bpp2, Bpp2],
                [[8, 11], [7, 10], [2, 5], [1, 4]],
                [3, 6, 9, 12],
            ),
            1 if io.bg3_priority => (
                [Bpp4, Bpp4, Bpp2, Inactive],
                [[5, 8], [4, 7], [1, 10], NONE],
                [2, 3, 6, 9],
            ),
            1 => (
                [Bpp4, Bpp4, Bpp2, Inactive],
                [[6, 9], [5, 8], [1, 3], NONE],
                [2, 4, 7, 10],
            ),
            2 => (
                [Bpp4, Bpp4, Inactive, Inactive],
                [[3, 7], [1, 5], NONE, NONE],
                [2, 4, 6, 8],
            ),
            3 => (
                [Bpp8, Bpp4, Inactive, Inactive],
                [[3, 7], [1, 5], NONE, NONE],
                [2, 4, 6, 8],
            ),
            4 => (
                [Bpp8, Bpp2, Inactive, Inactive],
                [[3, 7], [1, 5], NONE, NONE],
                [2, 4, 6, 8],
            ),
            5 => (
                [Bpp4, Bpp2, Inactive, Inactive],
                [[3, 7], [1, 5], NONE, NONE],
                [2, 4, 6, 8],
            ),
            6 => (
                [Bpp4, Inactive, Inactive, Inactive],
                [[2, 5], NONE, NONE, NONE],
                [1, 3, 4, 6],
            ),
            _ if io.extbg => (
                [BgDepth::Mode7, BgDepth::Mode7, Inactive, Inactive],
                [[3, 3], [1, 5], NONE, NONE],
                [2, 4, 6, 7],
            ),
            _ => (
                [BgDepth::Mode7, Inactive, Inactive, Inactive],
                [[2, 2], NONE, NONE, NONE],
                [1, 3, 4, 5],
            ),
        };
        for (background, (depth, priority)) in self
            .state
            .backgrounds
            .iter_mut()
            .zip(depths.into_iter().zip(priorities))
        {
            background.io.depth = depth;
            background.io.priority = priority;
        }
        self.state.objects.io.priority = objects;
        log::debug!(
            "PPU: BG mode {} (bg3 priority: {}, extbg: {}) depths: {:?}",
            io.bg_mode,
            io.bg3_priority,
            io.extbg,
            depths
        );
    }

    /// Register 2100: INIDISP
    /// 7  bit  0
    /// ---- ----
    /// F... BBBB
    /// |    ||||
    /// |    ++++- Screen brightness (linear steps from 0 = none to $F = full)
    /// +--------- Force blanking
    fn write_inidisp(&mut self, value: u8) {
        // Leaving forced blank on the first line of vblank reloads the OAM address, as the
        // reload at the start of vblank was skipped.
        if self.state.io.forced_blank
            && !value.bit(7)
            && self.state.counter.vcounter() == self.state.counter.vdisp()
        {
            self.state.oam.address_reset();
        }
        self.state.io.brightness = value.bits(0..=3);
        self.state.io.forced_blank = value.bit(7);
    }

    /// Register 2105: BGMODE
    /// 7  bit  0
    /// ---- ----
    /// 4321 PMMM
    /// |||| ||||
    /// |||| |+++- BG mode
    /// |||| +---- Mode 1 BG3 priority (0 = normal, 1 = high)
    /// |||+------ BG1 character size (0 = 8x8, 1 = 16x16)
    /// ||+------- BG2 character size (0 = 8x8, 1 = 16x16)
    /// |+-------- BG3 character size (0 = 8x8, 1 = 16x16)
    /// +--------- BG4 character size (0 = 8x8, 1 = 16x16)
    fn write_bgmode(&mut self, value: u8) {
        self.state.io.bg_mode = value.bits(0..=2);
        self.state.io.bg3_priority = value.bit(3);
        for (index, background) in self.state.backgrounds.iter_mut().enumerate() {
            background.io.tile_size = value.bit(4 + index);
        }
        self.update_video_mode();
    }

    /// Register 2106: MOSAIC
    /// 7  bit  0
    /// ---- ----
    /// SSSS 4321
    /// |||| ||||
    /// |||| ++++- Enable mosaic for BG1-BG4
    /// ++++------ Mosaic size minus one
    fn write_mosaic(&mut self, value: u8) {
        for (index, background) in self.state.backgrounds.iter_mut().enumerate() {
            background.io.mosaic_enable = value.bit(index);
        }
        self.state.mosaic.set_size(value.bits(4..=7) + 1);
    }

    /// Register 2107..210A: BGnSC
    /// 7  bit  0
    /// ---- ----
    /// AAAA AAYX
    /// |||| ||||
    /// |||| |||+- Horizontal tilemap count (0 = 1 tilemap, 1 = 2 tilemaps)
    /// |||| ||+-- Vertical tilemap count (0 = 1 tilemap, 1 = 2 tilemaps)
    /// ++++-++--- Tilemap VRAM address (word address = AAAAAA << 10)
    fn write_bgnsc(&mut self, addr: AddressU24, value: u8) {
        let background = &mut self.state.backgrounds[(addr.offset - 0x2107) as usize];
        background.io.screen_size = value.bits(0..=1);
        background.io.screen_address = (value.bits(2..=7) as u16) << 10;
    }

    /// Register 210B/210C: BG12NBA/BG34NBA
    /// 7  bit  0
    /// ---- ----
    /// BBBB AAAA
    /// |||| ||||
    /// |||| ++++- BG1/BG3 CHR word base address (word address = AAAA << 12)
    /// ++++------ BG2/BG4 CHR word base address (word address = BBBB << 12)
    fn write_bgnba(&mut self, first: BackgroundId, value: u8) {
        let first = first as usize;
        self.state.backgrounds[first].io.tiledata_address = (value.low_nibble() as u16) << 12;
        self.state.backgrounds[first + 1].io.tiledata_address =
            (value.high_nibble() as u16) << 12;
    }

    /// Register 210D: BG1HOFS, doubles as M7HOFS
    fn write_bg1hofs(&mut self, value: u8) {
        self.state.mode7.hoffset = u16::from_le_bytes([self.state.latch.mode7, value]) & 0x1FFF;
        self.state.latch.mode7 = value;
        self.write_bgnhofs(AddressU24::new(0, 0x210D), value);
    }

    /// Register 210E: BG1VOFS, doubles as M7VOFS
    fn write_bg1vofs(&mut self, value: u8) {
        self.state.mode7.voffset = u16::from_le_bytes([self.state.latch.mode7, value]) & 0x1FFF;
        self.state.latch.mode7 = value;
        self.write_bgnvofs(AddressU24::new(0, 0x210E), value);
    }

    /// Register 210D/210F/2111/2113: BGnHOFS
    /// 15  bit  8   7  bit  0
    ///  ---- ----   ---- ----
    ///  .... ..XX   XXXX XXXX
    ///         ||   |||| ||||
    ///         ++---++++-++++- BGn horizontal scroll
    ///
    /// On write: BGnHOFS = (value << 8) | (bgofs_latch & ~7) | (bghofs_latch & 7)
    ///           bgofs_latch = value
    ///           bghofs_latch = value
    fn write_bgnhofs(&mut self, addr: AddressU24, value: u8) {
        let latch = &mut self.state.latch;
        let background = &mut self.state.backgrounds[(addr.offset - 0x210D) as usize / 2];
        background.io.hoffset = ((value as u16) << 8
            | (latch.bgofs_ppu1 & !7) as u16
            | (latch.bgofs_ppu2 & 7) as u16)
            & 0x3FF;
        latch.bgofs_ppu1 = value;
        latch.bgofs_ppu2 = value;
    }

    /// Register 210E/2110/2112/2114: BGnVOFS
    ///
    /// On write: BGnVOFS = (value << 8) | bgofs_latch
    ///           bgofs_latch = value
    fn write_bgnvofs(&mut self, addr: AddressU24, value: u8) {
        let latch = &mut self.state.latch;
        let background = &mut self.state.backgrounds[(addr.offset - 0x210E) as usize / 2];
        background.io.voffset = u16::from_le_bytes([latch.bgofs_ppu1, value]) & 0x3FF;
        latch.bgofs_ppu1 = value;
    }

    /// Register 211B..2120: M7A, M7B, M7C, M7D, M7X, M7Y
    ///
    /// On write: M7n = (value << 8) | mode7_latch
    ///           mode7_latch = value
    fn write_mode7_matrix(&mut self, addr: AddressU24, value: u8) {
        let word = u16::from_le_bytes([self.state.latch.mode7, value]);
        self.state.latch.mode7 = value;
        let mode7 = &mut self.state.mode7;
        match addr.offset {
            0x211B => mode7.a = word,
            0x211C => mode7.b = word,
            0x211D => mode7.c = word,
            0x211E => mode7.d = word,
            0x211F => mode7.x = word & 0x1FFF,
            _ => mode7.y = word & 0x1FFF,
        }
    }

    /// Register 212C/212D: TM/TS - Main/sub screen layer enable
    /// 7  bit  0
    /// ---- ----
    /// ...O 4321
    ///    | ||||
    ///    | ++++- Enable BG1-BG4
    ///    +------ Enable OBJ
    fn write_tm(&mut self, value: u8) {
        for (index, background) in self.state.backgrounds.iter_mut().enumerate() {
            background.io.above_enable = value.bit(index);
        }
        self.state.objects.io.above_enable = value.bit(4);
    }

    fn write_ts(&mut self, value: u8) {
        for (index, background) in self.state.backgrounds.iter_mut().enumerate() {
            background.io.below_enable = value.bit(index);
        }
        self.state.objects.io.below_enable = value.bit(4);
    }

    /// Register 2130: CGWSEL - Color math settings
    /// 7  bit  0
    /// ---- ----
    /// MMSS ..AD
    /// |||| ||||
    /// |||| |||+- Direct color mode
    /// |||| ||+-- Addend (0 = fixed color, 1 = sub screen)
    /// ||++------ Prevent color math (0 = never, 1 = outside window, 2 = inside, 3 = always)
    /// ++-------- Clip main screen to black (same encoding)
    fn write_cgwsel(&mut self, value: u8) {
        self.state.screen.io.write_cgwsel(value);
        self.state.window.prevent_mode = value.bits(4..=5);
        self.state.window.clip_mode = value.bits(6..=7);
    }

    /// Register 2133: SETINI - Display settings
    /// 7  bit  0
    /// ---- ----
    /// EX.. HOiI
    /// ||   ||||
    /// ||   |||+- Screen interlace
    /// ||   ||+-- OBJ interlace
    /// ||   |+--- Overscan mode (239 visible lines)
    /// ||   +---- Pseudo-hires
    /// |+-------- Mode 7 EXTBG
    /// +--------- External sync
    fn write_setini(&mut self, value: u8) {
        self.state.io.interlace = value.bit(0);
        self.state.objects.io.interlace = value.bit(1);
        self.state.io.overscan = value.bit(2);
        self.state.io.pseudo_hires = value.bit(3);
        self.state.io.extbg = value.bit(6);
        self.update_video_mode();
    }

    /// Register 2134/2135/2136: MPYL/MPYM/MPYH - Multiplication result
    /// 7  bit  0   7  bit  0   7  bit  0
    /// ---- ----   ---- ----   ---- ----
    /// HHHH HHHH   MMMM MMMM   LLLL LLLL
    /// |||| ||||   |||| ||||   |||| ||||
    /// ++++-++++---++++-++++---++++-++++- 24-bit multiplication result (signed)
    fn read_mpy(&self, addr: AddressU24) -> u8 {
        let mpy = self.state.mode7.multiply() as u32;
        match addr.offset {
            0x2134 => mpy.low_word().low_byte(),
            0x2135 => mpy.low_word().high_byte(),
            _ => mpy.high_word().low_byte(),
        }
    }

    /// Register 2137: SLHV - Software latch for H/V counters
    ///
    /// On read: Latch counters if PIO bit 7 is set. Returns CPU open bus.
    fn read_slhv(&mut self, fallback: u8) -> u8 {
        if self.state.pio.bit(7) {
            self.latch_counters();
        }
        fallback
    }

    /// Register 213C: OPHCT - Output horizontal counter
    /// 15  bit  8   7  bit  0
    ///  ---- ----   ---- ----
    ///  xxxx xxxH   HHHH HHHH
    ///  |||| ||||   |||| ||||
    ///  |||| |||+---++++-++++- Horizontal counter value
    ///  ++++-+++-------------- PPU2 open bus
    ///
    /// On read: If ophct_byte == 0, value = OPHCT.low
    ///          If ophct_byte == 1, value = OPHCT.high
    ///          ophct_byte = ~ophct_byte
    fn read_ophct(&mut self) -> u8 {
        let value = self.peek_ophct();
        self.state.latch.hcounter_high = !self.state.latch.hcounter_high;
        self.state.ppu2_mdr = value;
        value
    }

    fn peek_ophct(&self) -> u8 {
        let counter = self.state.latch.hcounter;
        if self.state.latch.hcounter_high {
            (self.state.ppu2_mdr & 0xFE) | (counter.high_byte() & 1)
        } else {
            counter.low_byte()
        }
    }

    /// Register 213D: OPVCT - Output vertical counter, same layout as OPHCT.
    fn read_opvct(&mut self) -> u8 {
        let value = self.peek_opvct();
        self.state.latch.vcounter_high = !self.state.latch.vcounter_high;
        self.state.ppu2_mdr = value;
        value
    }

    fn peek_opvct(&self) -> u8 {
        let counter = self.state.latch.vcounter;
        if self.state.latch.vcounter_high {
            (self.state.ppu2_mdr & 0xFE) | (counter.high_byte() & 1)
        } else {
            counter.low_byte()
        }
    }

    /// Register 213E: STAT77 - PPU1 status and version number
    /// 7  bit  0
    /// ---- ----
    /// TRMx VVVV
    /// |||| ||||
    /// |||| ++++- PPU1 version
    /// |||+------ PPU1 open bus
    /// ||+------- Master/slave mode (PPU1 pin 25)
    /// |+-------- Range over flag (sprite overflow)
    /// +--------- Time over flag (sprite tile overflow)
    fn peek_stat77(&self) -> u8 {
        (self.state.ppu1_mdr & 0x10)
            | (self.state.objects.io.time_over as u8) << 7
            | (self.state.objects.io.range_over as u8) << 6
            | (self.config.ppu1_version & 0x0F)
    }

    /// Register 213F: STAT78 - PPU2 status and version number
    /// 7  bit  0
    /// ---- ----
    /// FLxM VVVV
    /// |||| ||||
    /// |||| ++++- PPU2 version
    /// |||+------ 0: 262 or 525i lines = 60Hz, 1: 312 or 625i lines = 50Hz (PPU2 pin 30)
    /// ||+------- PPU2 open bus
    /// |+-------- Counter latch value
    /// +--------- Interlace field
    ///
    /// On read: counter_latch = 0 (if PIO bit 7 is set)
    ///          ophct_byte = 0
    ///          opvct_byte = 0
    fn read_stat78(&mut self) -> u8 {
        let value = self.peek_stat78();
        self.state.latch.hcounter_high = false;
        self.state.latch.vcounter_high = false;
        if self.state.pio.bit(7) {
            self.state.latch.counters = false;
        }
        self.state.ppu2_mdr = value;
        value
    }

    fn peek_stat78(&self) -> u8 {
        let latched = if self.state.pio.bit(7) {
            self.state.latch.counters
        } else {
            true
        };
        (self.state.ppu2_mdr & 0x20)
            | (self.state.counter.field() as u8) << 7
            | (latched as u8) << 6
            | ((self.config.region == Region::Pal) as u8) << 4
            | (self.config.ppu2_version & 0x0F)
    }
}

impl Chip for Ppu {
    fn name(&self) -> &'static str {
        "ppu"
    }

    fn clock(&self) -> &ChipClock {
        &self.state.clock
    }

    fn clock_mut(&mut self) -> &mut ChipClock {
        &mut self.state.clock
    }

    /// Runs 2 master clocks.
    fn main(&mut self) {
        self.cycle();
        self.state.clock.step(2);
        match self.state.counter.tick(2) {
            Some(CounterEvent::HorizontalReset) => {
                let vcounter = self.state.counter.vcounter();
                if let Some(observer) = self.observer.as_mut() {
                    observer.horizontal_reset(vcounter);
                }
            }
            Some(CounterEvent::VerticalReset) => {
                self.state
                    .counter
                    .latch_frame_settings(self.state.io.interlace, self.state.io.overscan);
                let field = self.state.counter.field();
                log::trace!(
                    "PPU: frame {} (field {}, vdisp {})",
                    self.state.counter.frame(),
                    field as u8,
                    self.state.counter.vdisp()
                );
                if let Some(observer) = self.observer.as_mut() {
                    observer.horizontal_reset(0);
                    observer.vertical_reset(field);
                }
            }
            None => (),
        }
    }

    fn save_state(&self) -> Vec<u8> {
        Ppu::save_state(self)
    }

    fn load_state(&mut self, data: &[u8]) -> anyhow::Result<()> {
        Ppu::load_state(self, data)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn write(ppu: &mut Ppu, offset: u16, value: u8) {
        ppu.write_io(AddressU24::new(0, offset), value);
    }

    fn read(ppu: &mut Ppu, offset: u16) -> u8 {
        ppu.read_io(AddressU24::new(0, offset), 0xEE)
    }

    fn run_clocks(ppu: &mut Ppu, clocks: u64) {
        for _ in 0..clocks / 2 {
            ppu.main();
        }
    }

    #[test]
    fn test_multiply() {
        let mut ppu = Ppu::new(PpuConfig::default());
        write(&mut ppu, 0x211B, 0x34);
        write(&mut ppu, 0x211B, 0x12);
        write(&mut ppu, 0x211C, 0x00);
        write(&mut ppu, 0x211C, 0xFE);
        // 0x1234 * -2
        assert_eq!(read(&mut ppu, 0x2134), 0x98);
        assert_eq!(read(&mut ppu, 0x2135), 0xDB);
        assert_eq!(read(&mut ppu, 0x2136), 0xFF);
        // Write-only registers return the PPU1 open bus value.
        assert_eq!(read(&mut ppu, 0x2105), 0xFF);
        // Unconnected addresses return the CPU open bus value.
        assert_eq!(read(&mut ppu, 0x2100), 0xEE);
    }

    #[test]
    fn test_scroll_latches() {
        let mut ppu = Ppu::new(PpuConfig::default());
        write(&mut ppu, 0x210F, 0x45);
        write(&mut ppu, 0x210F, 0x03);
        assert_eq!(ppu.state.backgrounds[1].io.hoffset, 0x345);
        write(&mut ppu, 0x2110, 0x21);
        write(&mut ppu, 0x2110, 0x01);
        assert_eq!(ppu.state.backgrounds[1].io.voffset, 0x121);
        // BG1 scroll doubles as mode 7 scroll with a separate latch.
        write(&mut ppu, 0x210D, 0xFF);
        write(&mut ppu, 0x210D, 0x1F);
        assert_eq!(ppu.state.mode7.hoffset, 0x1FFF);
        assert_eq!(ppu.state.backgrounds[0].io.hoffset, 0x3FF);
    }

    #[test]
    fn test_counter_latch() {
        let mut ppu = Ppu::new(PpuConfig::default());
        run_clocks(&mut ppu, 1364 * 3 + 400);
        read(&mut ppu, 0x2137);
        assert_eq!(read(&mut ppu, 0x213F) & 0x40, 0x40);
        assert_eq!(read(&mut ppu, 0x213C), 100);
        assert_eq!(read(&mut ppu, 0x213C) & 1, 0);
        assert_eq!(read(&mut ppu, 0x213D), 3);
        // STAT78 cleared the latch flag.
        assert_eq!(read(&mut ppu, 0x213F) & 0x40, 0);

        // Latch through the programmable IO port.
        run_clocks(&mut ppu, 1364);
        ppu.set_pio_latch(0x7F);
        ppu.set_pio_latch(0xFF);
        assert_eq!(read(&mut ppu, 0x213D), 4);
    }

    #[test]
    fn test_stat_versions() {
        let config = PpuConfig {
            region: Region::Pal,
            ppu1_version: 1,
            ppu2_version: 2,
            ..Default::default()
        };
        let mut ppu = Ppu::new(config);
        assert_eq!(read(&mut ppu, 0x213E) & 0x0F, 1);
        assert_eq!(read(&mut ppu, 0x213F) & 0x1F, 0x12);
    }

    #[test]
    fn test_peek_has_no_side_effects() {
        let mut ppu = Ppu::new(PpuConfig::default());
        write(&mut ppu, 0x2121, 0x00);
        write(&mut ppu, 0x2122, 0x34);
        write(&mut ppu, 0x2122, 0x12);
        write(&mut ppu, 0x2121, 0x00);
        let addr = AddressU24::new(0, 0x213B);
        assert_eq!(ppu.peek_io(addr), Some(0x34));
        assert_eq!(ppu.peek_io(addr), Some(0x34));
        assert_eq!(read(&mut ppu, 0x213B), 0x34);
        assert_eq!(ppu.peek_io(addr), Some(0x12));
        assert_eq!(ppu.peek_io(AddressU24::new(0, 0x2137)), None);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut ppu = Ppu::new(PpuConfig::default());
        write(&mut ppu, 0x2105, 0x07);
        write(&mut ppu, 0x2100, 0x0F);
        run_clocks(&mut ppu, 100);
        ppu.reset();
        assert_eq!(ppu.state.io.bg_mode, 0);
        assert!(ppu.state.io.forced_blank);
        assert_eq!(ppu.state.backgrounds[3].io.depth, BgDepth::Bpp2);
        assert_eq!(ppu.clock().balance(), 100 * ppu.clock().frequency() as i64);
    }

    #[test]
    fn test_load_rejects_corrupt_state() {
        let mut ppu = Ppu::new(PpuConfig::default());
        write(&mut ppu, 0x2105, 0x01);
        let saved = ppu.save_state();
        let error = ppu.load_state(&saved[..saved.len() / 2]).unwrap_err();
        assert!(error.to_string().starts_with("corrupt PPU state"));
        assert_eq!(ppu.state.io.bg_mode, 1);

        // States of a differently sized VRAM are rejected.
        let mut large = Ppu::new(PpuConfig {
            vram_size: VramSize::Kb128,
            ..Default::default()
        });
        let error = large.load_state(&saved).unwrap_err();
        assert!(error.to_string().starts_with("corrupt PPU state"));
    }
}
