use crate::cartridge::SuperChipMode;
use vcsplus_proc_macros::NamedVariants;

/// Every supported cartridge format. The names are what save states and config files store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, NamedVariants)]
pub enum FormatKind {
    #[name = "4K"]
    Fixed4K,
    F8,
    #[name = "F8SC"]
    F8SuperChip,
    F6,
    #[name = "F6SC"]
    F6SuperChip,
    F4,
    #[name = "F4SC"]
    F4SuperChip,
    #[name = "FA"]
    CbsRamPlus,
    #[name = "3E"]
    Tigervision3E,
    #[name = "PLS"]
    PlusRom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskedRangeLayout {
    pub image_size: usize,
    pub bank_switch_base: u16,
    pub extra_ram_size: usize,
    pub super_chip: SuperChipMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatLayout {
    FixedMirror,
    MaskedRange(MaskedRangeLayout),
    WriteMonitored,
    CombinedBankBridge,
}

const SUPER_CHIP_RAM_SIZE: usize = 128;
const CBS_RAM_PLUS_RAM_SIZE: usize = 256;

impl FormatKind {
    #[must_use]
    pub fn layout(self) -> FormatLayout {
        let masked = |image_size, bank_switch_base, extra_ram_size, super_chip| {
            FormatLayout::MaskedRange(MaskedRangeLayout {
                image_size,
                bank_switch_base,
                extra_ram_size,
                super_chip,
            })
        };

        match self {
            Self::Fixed4K => FormatLayout::FixedMirror,
            Self::F8 => masked(0x2000, 0x0FF8, SUPER_CHIP_RAM_SIZE, SuperChipMode::AutoDetect),
            Self::F8SuperChip => masked(0x2000, 0x0FF8, SUPER_CHIP_RAM_SIZE, SuperChipMode::On),
            Self::F6 => masked(0x4000, 0x0FF6, SUPER_CHIP_RAM_SIZE, SuperChipMode::AutoDetect),
            Self::F6SuperChip => masked(0x4000, 0x0FF6, SUPER_CHIP_RAM_SIZE, SuperChipMode::On),
            Self::F4 => masked(0x8000, 0x0FF4, SUPER_CHIP_RAM_SIZE, SuperChipMode::AutoDetect),
            Self::F4SuperChip => masked(0x8000, 0x0FF4, SUPER_CHIP_RAM_SIZE, SuperChipMode::On),
            Self::CbsRamPlus => masked(0x3000, 0x0FF8, CBS_RAM_PLUS_RAM_SIZE, SuperChipMode::On),
            Self::Tigervision3E => FormatLayout::WriteMonitored,
            Self::PlusRom => FormatLayout::CombinedBankBridge,
        }
    }
}
