//! PXE-specific domain models.

use std::fmt;

/// PXE client system architecture types as defined in RFC 4578.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PxeClientArch {
    IntelX86Bios,
    NecPc98,
    EfiItanium,
    EfiIa32,
    EfiBC,
    EfiXscale,
    EfiX64,
    EfiArm32,
    EfiArm64,
    Unknown(u16),
}

impl PxeClientArch {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::IntelX86Bios,
            1 => Self::NecPc98,
            2 => Self::EfiItanium,
            6 => Self::EfiIa32,
            7 => Self::EfiBC,
            8 => Self::EfiXscale,
            9 => Self::EfiX64,
            10 => Self::EfiArm32,
            11 => Self::EfiArm64,
            other => Self::Unknown(other),
        }
    }

    pub fn is_efi(&self) -> bool {
        matches!(
            self,
            Self::EfiItanium
                | Self::EfiIa32
                | Self::EfiBC
                | Self::EfiXscale
                | Self::EfiX64
                | Self::EfiArm32
                | Self::EfiArm64
        )
    }
}

impl fmt::Display for PxeClientArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntelX86Bios => write!(f, "x86 BIOS"),
            Self::NecPc98 => write!(f, "NEC/PC98"),
            Self::EfiItanium => write!(f, "EFI Itanium"),
            Self::EfiIa32 => write!(f, "EFI IA32"),
            Self::EfiBC => write!(f, "EFI BC"),
            Self::EfiXscale => write!(f, "EFI Xscale"),
            Self::EfiX64 => write!(f, "EFI x64"),
            Self::EfiArm32 => write!(f, "EFI ARM32"),
            Self::EfiArm64 => write!(f, "EFI ARM64"),
            Self::Unknown(code) => write!(f, "Unknown({code})"),
        }
    }
}
