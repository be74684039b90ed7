//! Traits and types shared by all components of the emulator.

pub mod address;
pub mod bus;
pub mod clock;
pub mod image;
pub mod logging;
pub mod uint;
