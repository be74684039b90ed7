//! Cycle-driven SNES PPU with a cooperative, clock-synchronized chip scheduler.
pub mod common;
pub mod components;
pub mod system;

pub use system::MainCpu;
pub use system::System;
pub use system::SystemBus;
