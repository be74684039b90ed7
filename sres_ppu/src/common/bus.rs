//! Devices attached to the main bus.
use crate::common::address::AddressU24;

/// Generic trait for devices mapped onto the 24-bit main bus.
///
/// `read` receives the current open bus value, which is returned for addresses the device does
/// not drive.
pub trait BusDeviceU24 {
    fn peek(&self, addr: AddressU24) -> Option<u8>;
    fn read(&mut self, addr: AddressU24, open_bus: u8) -> u8;
    fn write(&mut self, addr: AddressU24, value: u8);
    fn reset(&mut self);
}
