//
// Cartridge window
//

pub const CARTRIDGE_WINDOW_SIZE: usize = 0x1000;
pub const ADDRESS_MASK: u16 = 0x0FFF;

//
// PlusROM ports (masked addresses, shared by every format that hosts a bridge)
//

pub const PLUS_WRITE_TO_BUFFER: u16 = 0x0FF0;
pub const PLUS_WRITE_AND_SEND: u16 = 0x0FF1;
pub const PLUS_RECEIVE_BUFFER: u16 = 0x0FF2;
pub const PLUS_RECEIVE_LENGTH: u16 = 0x0FF3;

//
// Monitored bus addresses (full, unmasked) used by write-monitored banking
//

pub const MONITORED_RAM_BANK_SELECT: u16 = 0x003E;
pub const MONITORED_ROM_BANK_SELECT: u16 = 0x003F;

//
// Endpoint discovery
//

// Distance from the end of the image to the high byte of the NMI vector; the low byte is one
// byte earlier
pub const NMI_VECTOR_HIGH_FROM_END: usize = 5;
pub const NMI_VECTOR_PAGE_BIAS: i32 = 0x10;

#[must_use]
pub fn mask(address: u16) -> u16 {
    address & ADDRESS_MASK
}
