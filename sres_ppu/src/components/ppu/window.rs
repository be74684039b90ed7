//! Window masking.
//!
//! Two windows, each a horizontal span [left, right], can be combined per layer to mask it on the
//! main and sub screen. A fifth combination, the color window, controls clipping to black and
//! color math.
use bitcode::Decode;
use bitcode::Encode;
use intbits::Bits;

/// Window configuration of one layer, or the color window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct WindowLayer {
    pub one_enable: bool,
    pub one_invert: bool,
    pub two_enable: bool,
    pub two_invert: bool,
    /// Combination of both windows: 0 = OR, 1 = AND, 2 = XOR, 3 = XNOR.
    pub mask: u8,
    pub above_enable: bool,
    pub below_enable: bool,
}

impl WindowLayer {
    /// Updates the layer from its nibble in W12SEL, W34SEL or WOBJSEL.
    pub fn write_select(&mut self, nibble: u8) {
        self.one_invert = nibble.bit(0);
        self.one_enable = nibble.bit(1);
        self.two_invert = nibble.bit(2);
        self.two_enable = nibble.bit(3);
    }

    pub fn test(&self, one: bool, two: bool) -> bool {
        let one = one ^ self.one_invert;
        let two = two ^ self.two_invert;
        match (self.one_enable, self.two_enable) {
            (false, false) => false,
            (true, false) => one,
            (false, true) => two,
            (true, true) => match self.mask & 3 {
                0 => one | two,
                1 => one & two,
                2 => one ^ two,
                _ => one == two,
            },
        }
    }
}

/// Result of window evaluation for one pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WindowMasks {
    /// Masked layers on the main screen: BG1-BG4, OBJ.
    pub above: [bool; 5],
    /// Masked layers on the sub screen.
    pub below: [bool; 5],
    pub clip_to_black: bool,
    pub prevent_math: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Encode, Decode)]
pub struct Window {
    pub one_left: u8,
    pub one_right: u8,
    pub two_left: u8,
    pub two_right: u8,
    /// BG1-BG4 followed by OBJ.
    pub layers: [WindowLayer; 5],
    pub color: WindowLayer,
    /// CGWSEL bits 6-7: 0 = never, 1 = outside color window, 2 = inside, 3 = always.
    pub clip_mode: u8,
    /// CGWSEL bits 4-5, same encoding as `clip_mode`.
    pub prevent_mode: u8,
}

impl Window {
    /// Register 2123/2124/2125: W12SEL, W34SEL, WOBJSEL - Window mask settings
    /// 7  bit  0
    /// ---- ----
    /// DdCc BbAa
    /// |||| ||||
    /// |||| |||+- Invert window 1 for BG1/BG3/OBJ
    /// |||| ||+-- Enable window 1 for BG1/BG3/OBJ
    /// |||| |+--- Invert window 2 for BG1/BG3/OBJ
    /// |||| +---- Enable window 2 for BG1/BG3/OBJ
    /// ++++------ Same for BG2/BG4/color window
    pub fn write_select(&mut self, first: usize, value: u8) {
        let (low, high) = (value & 0x0F, value >> 4);
        self.layers[first].write_select(low);
        match first {
            4 => self.color.write_select(high),
            _ => self.layers[first + 1].write_select(high),
        }
    }

    /// Register 212A: WBGLOG - Window mask logic for BG1-BG4
    pub fn write_wbglog(&mut self, value: u8) {
        for (index, layer) in self.layers[..4].iter_mut().enumerate() {
            layer.mask = value.bits(index * 2..=index * 2 + 1);
        }
    }

    /// Register 212B: WOBJLOG - Window mask logic for OBJ and the color window
    pub fn write_wobjlog(&mut self, value: u8) {
        self.layers[4].mask = value.bits(0..=1);
        self.color.mask = value.bits(2..=3);
    }

    /// Register 212E/212F: TMW/TSW - Window masking on the main/sub screen
    pub fn write_tmw(&mut self, value: u8) {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.above_enable = value.bit(index);
        }
    }

    pub fn write_tsw(&mut self, value: u8) {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            layer.below_enable = value.bit(index);
        }
    }

    pub fn run(&self, x: u8) -> WindowMasks {
        let one = x >= self.one_left && x <= self.one_right;
        let two = x >= self.two_left && x <= self.two_right;
        let mut masks = WindowMasks::default();
        for (index, layer) in self.layers.iter().enumerate() {
            let inside = layer.test(one, two);
            masks.above[index] = layer.above_enable && inside;
            masks.below[index] = layer.below_enable && inside;
        }
        let inside = self.color.test(one, two);
        let apply = |mode: u8| match mode & 3 {
            0 => false,
            1 => !inside,
            2 => inside,
            _ => true,
        };
        masks.clip_to_black = apply(self.clip_mode);
        masks.prevent_math = apply(self.prevent_mode);
        masks
    }
}
