mod config;
mod identity;

use crate::config::CliConfig;
use crate::identity::PromptingIdentityStore;
use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use vcsplus_core::address;
use vcsplus_core::{Cartridge, CartridgeBus, CartridgeEnv, FormatKind, HttpTransport, Transport};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Raw bytes given on the command line as hex, e.g. "01a0ff" or "01 a0 ff".
#[derive(Debug, Clone, PartialEq, Eq)]
struct HexBytes(Vec<u8>);

impl FromStr for HexBytes {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if digits.is_empty() {
            return Err("no bytes given".into());
        }
        // from_str_radix accepts a leading sign
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid hex digit in '{s}'"));
        }
        if digits.len() % 2 != 0 {
            return Err(format!("odd number of hex digits in '{s}'"));
        }

        let bytes = (0..digits.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
            .collect::<Result<_, _>>()
            .map_err(|err| format!("invalid hex in '{s}': {err}"))?;
        Ok(Self(bytes))
    }
}

#[derive(Parser)]
struct Cli {
    #[arg(short = 'f', long = "rom-file-path")]
    rom_file_path: String,

    #[arg(short = 't', long = "format")]
    format: FormatKind,

    /// TOML config file, also used to persist the generated PlusROM identity
    #[arg(short = 'c', long = "config")]
    config_path: Option<PathBuf>,

    /// PlusROM identity to use instead of the configured one
    #[arg(long)]
    identity: Option<String>,

    /// Print a hex dump of the cartridge window
    #[arg(long)]
    dump: bool,

    /// Write a save state on exit, next to the ROM unless a path is given
    #[arg(long = "save-state")]
    save_state: Option<Option<PathBuf>>,

    #[arg(long = "load-state")]
    load_state: Option<PathBuf>,

    /// Bytes to push through the PlusROM ports, the last one via the send port
    #[arg(long)]
    send: Option<HexBytes>,

    /// How long to wait for a response to --send
    #[arg(long = "wait-ms", default_value_t = 5000)]
    wait_ms: u64,
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Cli::parse();

    let mut config = match &args.config_path {
        Some(config_path) => CliConfig::load_or_default(config_path)?,
        None => CliConfig::default(),
    };
    log::debug!("Cartridge config:\n{}", config.cartridge);

    let image = fs::read(&args.rom_file_path)
        .with_context(|| format!("error reading ROM file from '{}'", args.rom_file_path))?;

    let transport = config.cartridge.bridge.enabled.then(|| {
        Arc::new(HttpTransport::new(config.cartridge.bridge.timeout())) as Arc<dyn Transport>
    });

    let identity = args.identity.clone().or_else(|| config.identity.clone());
    let mut identity_store = PromptingIdentityStore::new(identity, io::stdin().lock());

    let mut env = CartridgeEnv::new(&config.cartridge, &mut identity_store, transport);
    let mut cartridge = Cartridge::new(args.format, image, &mut env)
        .with_context(|| format!("error loading {} cartridge", args.format))?;

    if let Some(identity) = identity_store.updated_identity() {
        config.identity = Some(identity.into());
        if let Some(config_path) = &args.config_path {
            config.save_to_file(config_path)?;
            log::info!("Saved PlusROM identity to {config_path:?}");
        }
    }

    if let Some(load_state_path) = &args.load_state {
        cartridge = match vcsplus_core::load_state_from_file(load_state_path, cartridge) {
            Ok(cartridge) => cartridge,
            Err((err, existing)) => {
                log::error!("Error loading save state from {load_state_path:?}: {err}");
                *existing
            }
        };
    }

    log_summary(&cartridge);

    if args.dump {
        dump_window(&cartridge);
    }

    if let Some(HexBytes(payload)) = &args.send {
        let response = exchange(&mut cartridge, payload, Duration::from_millis(args.wait_ms))?;
        println!("{}", format_hex(&response));
    }

    if let Some(save_state_path) = args.save_state {
        let save_state_path = save_state_path
            .unwrap_or_else(|| vcsplus_core::determine_save_state_path(&args.rom_file_path));
        vcsplus_core::save_state_to_file(&cartridge, &save_state_path)
            .with_context(|| format!("error writing save state to {save_state_path:?}"))?;
    }

    Ok(())
}

fn log_summary(cartridge: &Cartridge) {
    log::info!(
        "{} cartridge, {} bytes, current bank {}",
        cartridge.format(),
        cartridge.rom_len(),
        cartridge.current_bank()
    );

    match cartridge.bridge() {
        Some(bridge) => log::info!(
            "PlusROM endpoint {} ({} ports), identity '{}'",
            bridge.endpoint(),
            bridge.flavor(),
            bridge.identity()
        ),
        None => log::info!("No PlusROM endpoint"),
    }
}

fn dump_window(cartridge: &Cartridge) {
    let window_start = 0x1000_u16;
    for row_start in (0..address::CARTRIDGE_WINDOW_SIZE as u16).step_by(16) {
        let row: Vec<u8> =
            (row_start..row_start + 16).map(|offset| cartridge.peek(window_start + offset)).collect();
        println!("{:04X}: {}", window_start + row_start, format_hex(&row));
    }
}

/// Push `payload` through the send ports and collect whatever arrives in the receive buffer
/// before the request completes or `wait` elapses.
fn exchange(
    cartridge: &mut Cartridge,
    payload: &[u8],
    wait: Duration,
) -> Result<Vec<u8>, anyhow::Error> {
    if cartridge.bridge().is_none() {
        bail!("{} cartridge has no PlusROM endpoint", cartridge.format());
    }

    let Some((&last, rest)) = payload.split_last() else {
        bail!("nothing to send");
    };

    for &value in rest {
        cartridge.write(0x1000 | address::PLUS_WRITE_TO_BUFFER, value);
    }
    cartridge.write(0x1000 | address::PLUS_WRITE_AND_SEND, last);

    let start = Instant::now();
    loop {
        cartridge.poll_bridge();

        let in_flight = cartridge.bridge().map_or(0, |bridge| bridge.in_flight());
        if in_flight == 0 {
            break;
        }
        if start.elapsed() >= wait {
            log::warn!("No response after {wait:?}");
            break;
        }

        thread::sleep(POLL_INTERVAL);
    }

    let available = cartridge.read(0x1000 | address::PLUS_RECEIVE_LENGTH);
    Ok((0..available).map(|_| cartridge.read(0x1000 | address::PLUS_RECEIVE_BUFFER)).collect())
}

fn format_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_bytes_accept_spaces_and_case() {
        assert_eq!(Ok(HexBytes(vec![0x01, 0xA0, 0xFF])), "01a0FF".parse());
        assert_eq!(Ok(HexBytes(vec![0x01, 0xA0, 0xFF])), "01 a0 ff".parse());
    }

    #[test]
    fn hex_bytes_reject_malformed_input() {
        assert!("".parse::<HexBytes>().is_err());
        assert!("abc".parse::<HexBytes>().is_err());
        assert!("zz".parse::<HexBytes>().is_err());
        assert!("+1".parse::<HexBytes>().is_err());
    }

    #[test]
    fn cli_parses_optional_save_state_path() {
        let cli = Cli::parse_from(["vcsplus", "-f", "game.bin", "-t", "f8sc", "--save-state"]);
        assert_eq!(FormatKind::F8SuperChip, cli.format);
        assert_eq!(Some(None), cli.save_state);

        let cli = Cli::parse_from([
            "vcsplus",
            "-f",
            "game.bin",
            "-t",
            "3E",
            "--save-state",
            "out.ss0",
            "--send",
            "0102",
        ]);
        assert_eq!(Some(Some(PathBuf::from("out.ss0"))), cli.save_state);
        assert_eq!(Some(HexBytes(vec![1, 2])), cli.send);
        assert_eq!(5000, cli.wait_ms);
    }

    #[test]
    fn format_hex_is_space_separated() {
        assert_eq!("00 7F FF", format_hex(&[0x00, 0x7F, 0xFF]));
    }
}
