pub mod address;
pub mod bridge;
pub mod cartridge;
mod config;
pub mod scanner;
mod serialize;

#[cfg(test)]
mod testutil;

pub use bridge::{
    BridgeRuntime, HttpTransport, IdentityProvider, MemoryIdentityStore, PlusBridge, PortFlavor,
    Transport, TransportError,
};
pub use cartridge::{Cartridge, CartridgeBus, CartridgeEnv, CartridgeError, FormatKind};
pub use config::{BridgeConfig, CartridgeConfig, SuperChipSetting};
pub use serialize::{
    determine_save_state_path, load_state_from_file, save_state_to_file, SaveStateError,
};
