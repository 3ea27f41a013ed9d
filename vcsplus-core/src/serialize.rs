use crate::bridge::BridgeRuntime;
use crate::cartridge::{
    Cartridge, CombinedBankBridge, FixedMirror, FormatKind, FormatLayout, MaskedRangeBank,
    WriteMonitoredBank,
};
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Formatter;
use std::path::{Path, PathBuf};
use std::{fs, io};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("error serializing/deserializing state: {source}")]
    Serialization {
        #[from]
        source: bincode::Error,
    },
    #[error("error reading/writing state: {source}")]
    FileSystem {
        #[from]
        source: io::Error,
    },
    #[error("save state references unknown cartridge format '{name}'")]
    UnknownFormat { name: String },
    #[error("save state for format {format} is inconsistent: {reason}")]
    InvalidState { format: FormatKind, reason: String },
}

/// Serde has no derive support for arrays longer than 32; used for the fixed 256-byte buffers.
pub fn serialize_array<S, const N: usize>(
    array: &[u8; N],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut state = serializer.serialize_tuple(N)?;
    for value in array {
        state.serialize_element(value)?;
    }
    state.end()
}

struct ByteArrayVisitor<const N: usize>;

impl<'de, const N: usize> Visitor<'de> for ByteArrayVisitor<N> {
    type Value = [u8; N];

    fn expecting(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{N} bytes")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut array = [0; N];
        for (i, value) in array.iter_mut().enumerate() {
            *value = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }

        if seq.next_element::<u8>()?.is_some() {
            return Err(de::Error::invalid_length(N + 1, &self));
        }

        Ok(array)
    }
}

pub fn deserialize_array<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_tuple(N, ByteArrayVisitor)
}

// Written ahead of the format-specific body. Kept as a plain string rather than a FormatKind so
// that an unknown name surfaces as UnknownFormat instead of a generic decoding error
#[derive(Debug, Serialize, Deserialize)]
struct StateHeader {
    format: String,
}

pub(crate) fn encode(cartridge: &Cartridge) -> Result<Vec<u8>, SaveStateError> {
    let mut buffer = Vec::new();

    let header = StateHeader { format: cartridge.format().name().into() };
    bincode::serialize_into(&mut buffer, &header)?;

    match cartridge {
        Cartridge::FixedMirror(cartridge) => bincode::serialize_into(&mut buffer, cartridge)?,
        Cartridge::MaskedRangeBank(cartridge) => bincode::serialize_into(&mut buffer, cartridge)?,
        Cartridge::WriteMonitoredBank(cartridge) => {
            bincode::serialize_into(&mut buffer, cartridge)?;
        }
        Cartridge::CombinedBankBridge(cartridge) => {
            bincode::serialize_into(&mut buffer, cartridge)?;
        }
    }

    Ok(buffer)
}

pub(crate) fn decode(bytes: &[u8], runtime: BridgeRuntime) -> Result<Cartridge, SaveStateError> {
    let mut reader = bytes;

    let header: StateHeader = bincode::deserialize_from(&mut reader)?;
    let format: FormatKind = header
        .format
        .parse()
        .map_err(|_| SaveStateError::UnknownFormat { name: header.format.clone() })?;

    let mut cartridge = match format.layout() {
        FormatLayout::FixedMirror => {
            Cartridge::FixedMirror(bincode::deserialize_from::<_, FixedMirror>(&mut reader)?)
        }
        FormatLayout::MaskedRange(_) => Cartridge::MaskedRangeBank(bincode::deserialize_from::<
            _,
            MaskedRangeBank,
        >(&mut reader)?),
        FormatLayout::WriteMonitored => Cartridge::WriteMonitoredBank(
            bincode::deserialize_from::<_, WriteMonitoredBank>(&mut reader)?,
        ),
        FormatLayout::CombinedBankBridge => Cartridge::CombinedBankBridge(
            bincode::deserialize_from::<_, CombinedBankBridge>(&mut reader)?,
        ),
    };

    if cartridge.format() != format {
        return Err(SaveStateError::InvalidState {
            format,
            reason: format!("body describes a {} cartridge", cartridge.format()),
        });
    }

    cartridge
        .validate()
        .map_err(|reason| SaveStateError::InvalidState { format, reason })?;

    cartridge.attach_runtime(runtime);

    Ok(cartridge)
}

pub fn determine_save_state_path(rom_file_path: &str) -> PathBuf {
    Path::new(rom_file_path).with_extension("ss0")
}

pub fn save_state_to_file<P>(cartridge: &Cartridge, path: P) -> Result<(), SaveStateError>
where
    P: AsRef<Path>,
{
    let serialized_state = cartridge.save_state()?;
    fs::write(path.as_ref(), serialized_state)?;

    log::info!("Successfully wrote save state to '{}'", path.as_ref().display());

    Ok(())
}

/// Restore a cartridge from a save state file. On failure the existing cartridge is handed back
/// untouched alongside the error.
pub fn load_state_from_file<P>(
    path: P,
    existing_cartridge: Cartridge,
) -> Result<Cartridge, (SaveStateError, Box<Cartridge>)>
where
    P: AsRef<Path>,
{
    let serialized_state = match fs::read(path.as_ref()) {
        Ok(serialized_state) => serialized_state,
        Err(err) => return Err((err.into(), Box::new(existing_cartridge))),
    };

    let state = match decode(&serialized_state, existing_cartridge.bridge_runtime()) {
        Ok(state) => state,
        Err(err) => return Err((err, Box::new(existing_cartridge))),
    };

    log::info!("Successfully loaded save state from '{}'", path.as_ref().display());

    Ok(state)
}
