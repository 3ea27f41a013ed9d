use crate::address;
use crate::bridge::{BridgeRuntime, PlusBridge, PortFlavor};
use crate::cartridge::{CartridgeBus, CartridgeEnv, CartridgeError, FormatKind};
use crate::scanner::EndpointLocation;
use serde::{Deserialize, Serialize};

/// A single 4K bank. Smaller images are repeated end to end to fill the window.
#[derive(Debug, Serialize, Deserialize)]
pub struct FixedMirror {
    bytes: Vec<u8>,
    bridge: Option<PlusBridge>,
    #[serde(skip)]
    runtime: BridgeRuntime,
}

impl FixedMirror {
    pub(crate) fn new(image: &[u8], env: &mut CartridgeEnv<'_>) -> Result<Self, CartridgeError> {
        if image.is_empty() {
            return Err(CartridgeError::EmptyImage);
        }

        if image.len() > address::CARTRIDGE_WINDOW_SIZE {
            return Err(CartridgeError::ImageTooLarge {
                format: FormatKind::Fixed4K,
                len: image.len(),
                max: address::CARTRIDGE_WINDOW_SIZE,
            });
        }

        let bytes: Vec<_> =
            image.iter().copied().cycle().take(address::CARTRIDGE_WINDOW_SIZE).collect();
        if image.len() < bytes.len() {
            log::debug!("Mirroring {}-byte image across the 4K window", image.len());
        }

        // Scan the mirrored window; the NMI vector sits at its end regardless of image size
        let runtime = env.runtime();
        let bridge =
            env.detect_bridge(&bytes, EndpointLocation::VectorDerived, PortFlavor::Standard);

        Ok(Self { bytes, bridge, runtime })
    }

    pub(crate) fn bridge(&self) -> Option<&PlusBridge> {
        self.bridge.as_ref()
    }

    pub(crate) fn bridge_mut(&mut self) -> Option<&mut PlusBridge> {
        self.bridge.as_mut()
    }

    pub(crate) fn runtime(&self) -> &BridgeRuntime {
        &self.runtime
    }

    pub(crate) fn attach(&mut self, runtime: BridgeRuntime) {
        if let Some(bridge) = &mut self.bridge {
            bridge.attach(runtime.clone());
        }
        self.runtime = runtime;
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.bytes.len() != address::CARTRIDGE_WINDOW_SIZE {
            return Err(format!("mirrored image is {} bytes", self.bytes.len()));
        }
        Ok(())
    }
}

impl CartridgeBus for FixedMirror {
    fn read(&mut self, address: u16) -> u8 {
        let masked = address::mask(address);
        if let Some(value) = self.bridge.as_mut().and_then(|bridge| bridge.read(masked)) {
            return value;
        }
        self.bytes[usize::from(masked)]
    }

    fn write(&mut self, address: u16, value: u8) {
        let masked = address::mask(address);
        if let Some(bridge) = &mut self.bridge {
            bridge.write(masked, value);
        }
    }

    fn peek(&self, address: u16) -> u8 {
        let masked = address::mask(address);
        self.bridge
            .as_ref()
            .and_then(|bridge| bridge.peek(masked))
            .unwrap_or_else(|| self.bytes[usize::from(masked)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CartridgeConfig;
    use crate::testutil::{with_vector_endpoint, TestEnv};

    #[test]
    fn small_image_is_mirrored() {
        let mut env = TestEnv::new(CartridgeConfig::default());
        let image: Vec<u8> = (0..=255).collect();
        let mut cartridge = FixedMirror::new(&image, &mut env.env()).unwrap();

        assert_eq!(0x00, cartridge.read(0x1000));
        assert_eq!(0x34, cartridge.read(0x1134));
        assert_eq!(0x34, cartridge.read(0x1F34));
        // Mirrors of the cartridge window
        assert_eq!(0x34, cartridge.read(0xF234));
        assert!(cartridge.bridge().is_none());
    }

    #[test]
    fn writes_without_bridge_are_ignored() {
        let mut env = TestEnv::new(CartridgeConfig::default());
        let mut cartridge = FixedMirror::new(&[0xEA; 4096], &mut env.env()).unwrap();

        cartridge.write(0x1000, 0x12);
        cartridge.write(0x1FF1, 0x12);
        assert_eq!(0xEA, cartridge.read(0x1000));
        assert!(env.transport().take_requests().is_empty());
    }

    #[test]
    fn oversized_and_empty_images_are_rejected() {
        let mut env = TestEnv::new(CartridgeConfig::default());
        assert!(matches!(
            FixedMirror::new(&[], &mut env.env()),
            Err(CartridgeError::EmptyImage)
        ));
        assert!(matches!(
            FixedMirror::new(&[0; 4097], &mut env.env()),
            Err(CartridgeError::ImageTooLarge { len: 4097, .. })
        ));
    }

    #[test]
    fn bridge_ports_shadow_rom() {
        let mut env = TestEnv::new(CartridgeConfig::default());
        let image = with_vector_endpoint(vec![0xEA; 4096], "hi", "plus.example.com");
        let mut cartridge = FixedMirror::new(&image, &mut env.env()).unwrap();

        let bridge = cartridge.bridge().unwrap();
        assert_eq!("https://plus.example.com/hi", bridge.endpoint().url());

        assert_eq!(0, cartridge.read(0x1FF3));
        assert_eq!(0xEA, cartridge.read(0x1FF4));

        cartridge.write(0x1FF0, 0x07);
        cartridge.write(0x1FF1, 0x08);
        let requests = env.transport().take_requests();
        assert_eq!(vec![0x07, 0x08], requests[0].0.payload);
    }
}
