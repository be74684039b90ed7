//! Provisional policies for PPU behavior that is not verified against hardware.
//!
//! Each policy defaults to the best known approximation. All PPU code paths affected by one of
//! these behaviors consult [ProvisionalPolicy] instead of hardcoding an answer, so the choice can
//! be revisited in a single place once verified.
use serde::Deserialize;
use serde::Serialize;

/// Provisional: Which address OAMDATA accesses use while the PPU is rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderTimeOamAccess {
    /// Accesses hit the OAM address last used by sprite evaluation.
    #[default]
    RenderAddress,
    /// Accesses use the address programmed via OAMADD.
    ProgrammedAddress,
}

/// Provisional: Which address CGDATA accesses use while the PPU is rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderTimeCgramAccess {
    /// Accesses hit the CGRAM address last used by the screen compositor.
    #[default]
    RenderAddress,
    /// Accesses use the address programmed via CGADD.
    ProgrammedAddress,
}

/// Provisional: Whether VMDATA accesses reach VRAM while the PPU is rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderTimeVramAccess {
    /// Writes are dropped and reads return 0.
    #[default]
    Blocked,
    Open,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionalPolicy {
    pub oam_access: RenderTimeOamAccess,
    pub cgram_access: RenderTimeCgramAccess,
    pub vram_access: RenderTimeVramAccess,
}

impl ProvisionalPolicy {
    pub fn oam_address(&self, programmed: u16, render: u16, rendering: bool) -> u16 {
        match self.oam_access {
            RenderTimeOamAccess::RenderAddress if rendering => render,
            _ => programmed,
        }
    }

    pub fn cgram_address(&self, programmed: u8, render: u8, rendering: bool) -> u8 {
        match self.cgram_access {
            RenderTimeCgramAccess::RenderAddress if rendering => render,
            _ => programmed,
        }
    }

    pub fn vram_accessible(&self, rendering: bool) -> bool {
        match self.vram_access {
            RenderTimeVramAccess::Blocked => !rendering,
            RenderTimeVramAccess::Open => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ProvisionalPolicy::default();
        assert_eq!(policy.oam_address(0x10, 0x80, true), 0x80);
        assert_eq!(policy.oam_address(0x10, 0x80, false), 0x10);
        assert_eq!(policy.cgram_address(0x10, 0x80, true), 0x80);
        assert!(!policy.vram_accessible(true));
        assert!(policy.vram_accessible(false));
    }

    #[test]
    fn test_programmed_address_policy() {
        let policy = ProvisionalPolicy {
            oam_access: RenderTimeOamAccess::ProgrammedAddress,
            cgram_access: RenderTimeCgramAccess::ProgrammedAddress,
            vram_access: RenderTimeVramAccess::Open,
        };
        assert_eq!(policy.oam_address(0x10, 0x80, true), 0x10);
        assert_eq!(policy.cgram_address(0x10, 0x80, true), 0x10);
        assert!(policy.vram_accessible(true));
    }
}
