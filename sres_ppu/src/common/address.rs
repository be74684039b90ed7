//! Address type used on the main bus.
use std::fmt::Display;
use std::fmt::Formatter;

use crate::common::uint::U16Ext;
use crate::common::uint::U32Ext;

/// Address type used by the main bus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct AddressU24 {
    pub bank: u8,
    pub offset: u16,
}

impl AddressU24 {
    pub fn new(bank: u8, offset: u16) -> Self {
        AddressU24 { bank, offset }
    }

    /// True if the address falls into the system area of a bank ($00-$3F and $80-$BF, offsets
    /// below $8000) where the B-bus registers are mirrored.
    pub fn is_system_area(&self) -> bool {
        (self.bank & 0x40) == 0 && self.offset < 0x8000
    }
}

impl From<AddressU24> for u32 {
    #[inline]
    fn from(addr: AddressU24) -> Self {
        (addr.bank as u32) << 16 | (addr.offset as u32)
    }
}

impl From<u32> for AddressU24 {
    #[inline]
    fn from(addr: u32) -> Self {
        AddressU24 {
            bank: addr.high_word().low_byte(),
            offset: addr.low_word(),
        }
    }
}

impl Display for AddressU24 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:02X}{:04X}", self.bank, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_conversion() {
        let addr = AddressU24::from(0x7E2118);
        assert_eq!(addr, AddressU24::new(0x7E, 0x2118));
        assert_eq!(u32::from(addr), 0x7E2118);
        assert_eq!(addr.to_string(), "$7E2118");
    }

    #[test]
    fn test_system_area() {
        assert!(AddressU24::new(0x00, 0x2100).is_system_area());
        assert!(AddressU24::new(0x80, 0x213F).is_system_area());
        assert!(!AddressU24::new(0x40, 0x2100).is_system_area());
        assert!(!AddressU24::new(0x00, 0x8000).is_system_area());
    }
}
