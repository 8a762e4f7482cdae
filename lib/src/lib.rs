//! # mtkflash
//!
//! A Rust library for dumping and flashing the internal eMMC of MediaTek
//! MT8590-based devices (certain Sony Walkman models) over USB.
//!
//! The library speaks the MediaTek BootROM/Preloader wire protocol to
//! bootstrap a vendor Download Agent (DA) into device RAM in two stages,
//! then drives the DA's block-level storage commands to stream data
//! between host files and the eMMC USER partition.
//!
//! ## Main Features
//!
//! - Device detection over USB (MediaTek CDC device, vendor `0x0E8D`)
//! - Download Agent container parsing and per-chip entry selection
//! - Preloader handshake, watchdog disable, staged DA upload and jump
//! - Block-level eMMC read and write with per-chunk checksums and acks
//! - Progress reporting and event callbacks
//!
//! ## Usage Example
//!
//! ```no_run
//! use mtkflash::{DaInfo, DeviceState, Flasher, Operation, OperationKind};
//! use std::fs::File;
//!
//! let mut da_file = File::open("download_agent.bin").unwrap();
//! let da = DaInfo::load(&mut da_file).unwrap();
//!
//! let out = File::create("dump.bin").unwrap();
//! let operations = vec![Operation {
//!     kind: OperationKind::Dump,
//!     address: 0,
//!     length: 0x10_0000,
//!     file: out,
//! }];
//!
//! let mut flasher = Flasher::detect(DeviceState::None, Some(da), operations, false, None).unwrap();
//! flasher.run().unwrap();
//! ```
//!
//! ## Device Connection
//!
//! The device must be powered off, then plugged in while holding Play and
//! Volume Down so the BootROM (or Preloader) enumerates its CDC download
//! port instead of booting the firmware.

mod agent;
mod container;
mod device;
mod flash;
mod preloader;
mod setup;

use std::sync::Arc;

pub use container::{DaEntry, DaInfo, LoadRegion};
pub use device::{BulkPipe, MtkDevice, UsbPipe};
pub use flash::{DeviceState, Flasher, IoHandler, Operation, OperationKind, TransferProgress};
pub use setup::host_setup;

/// Callback type for receiving flash events
///
/// This is used to observe the flashing process: device discovery, phase
/// transitions, and per-chunk transfer progress.
pub type Callback = Arc<dyn Fn(Event) + Send + Sync>;

/// Events emitted while driving the device
#[derive(Debug)]
pub enum Event {
  /// The tool is waiting for a MediaTek device to enumerate
  FindingDevice,
  /// The USB interface was claimed and the endpoints resolved
  Connected,
  /// Byte-level sync with the BootROM/Preloader is in progress
  PreloaderSync,
  /// DA Stage 1 is being uploaded through the Preloader
  SendingStage1,
  /// The device was told to jump into DA Stage 1
  JumpingToStage1,
  /// DA Stage 2 is being uploaded through Stage 1
  SendingStage2,
  /// Stage 2 reported ready; storage commands can be issued
  Stage2Ready,
  /// A dump/flash operation started
  ///
  /// Parameters: (operation_index, kind)
  Operation(usize, OperationKind),
  /// Per-chunk progress for the current transfer
  TransferProgress(TransferProgress),
  /// The watchdog was armed to reboot the device
  Rebooting,
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while driving the device
#[derive(thiserror::Error, Debug)]
pub enum Error {
  /// Error from the USB subsystem
  #[error("USB error: {0}")]
  Usb(#[from] rusb::Error),

  /// I/O related error (host side)
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// Error when no MediaTek device is connected
  #[error("device not found!")]
  NotFound,

  /// Error when the Preloader never answers the sync pattern
  #[error("unable to sync with the Preloader")]
  Handshake,

  /// Error when the device echoes back a different value than was sent
  #[error("device echoed {actual:#x}, expected {expected:#x}")]
  EchoMismatch { expected: u64, actual: u64 },

  /// Error when a Preloader command returns a non-zero status
  #[error("{command} failed: {status:#06x}")]
  Status { command: &'static str, status: u16 },

  /// Error when the DA answers something other than ACK
  #[error("{command}: DA did not ACK: {value:#04x}")]
  Nack { command: &'static str, value: u8 },

  /// Error when a write chunk is not answered with the continuation byte
  #[error("DA did not return continuation character: {0:#04x}")]
  NoContinue(u8),

  /// Error when DA Stage 1 does not announce itself after the jump
  #[error("DA did not send sync byte: {0:#04x}")]
  NoSync(u8),

  /// Error when a received chunk does not match the device's checksum
  #[error("chunk checksum mismatch: computed {computed:#06x}, device sent {device:#06x}")]
  ChecksumMismatch { computed: u16, device: u16 },

  /// Error when the NAND probe result is unexpected (eMMC targets only)
  #[error("NAND controller did not return NAND_NOT_FOUND: {0:#x}")]
  NandProbe(u32),

  /// Error when the eMMC controller probe fails
  #[error("EMMC controller returned error: {0:#x}")]
  EmmcProbe(u32),

  /// Error when Stage 2 reports a bad USB state
  #[error("DA did not return valid USB status: {0:#04x}")]
  UsbStatus(u8),

  /// Error when the SOC check after the Stage 2 hand-off fails
  #[error("SOC DA did not return OK: {0:#04x}")]
  SocNotOk(u8),

  /// Error when the DA container magic is wrong
  #[error("DA info has invalid magic")]
  InvalidMagic,

  /// Error when the DA container version is unsupported
  #[error("unsupported DA info version: {0:#x}")]
  UnsupportedVersion(u32),

  /// Error when the DA binary is shorter than its entry table claims
  #[error("DA binary is truncated")]
  Truncated,

  /// Error when no DA entry matches the device's chip
  #[error("unable to find DA entry for HW code {0:#06x}")]
  NoMatchingEntry(u16),

  /// Error when a DA entry violates a structural invariant
  #[error("invalid DA entry: {0}")]
  InvalidEntry(&'static str),

  /// Error when an operation needs a DA container that was never loaded
  #[error("no Download Agent loaded")]
  NoAgent,
}

impl Error {
  /// Whether this is a host-input problem (bad file, bad container) rather
  /// than a device or protocol failure. Input problems exit with 1, device
  /// problems with 2.
  pub fn is_input_error(&self) -> bool {
    matches!(
      self,
      Error::Io(_)
        | Error::InvalidMagic
        | Error::UnsupportedVersion(_)
        | Error::Truncated
        | Error::NoMatchingEntry(_)
        | Error::InvalidEntry(_)
        | Error::NoAgent
    )
  }
}

pub(crate) const VENDOR_ID: u16 = 0x0e8d;

// Preloader/BootROM opcodes
pub(crate) const CMD_GET_HW_CODE: u8 = 0xfd;
pub(crate) const CMD_GET_HW_SW_VER: u8 = 0xfc;
pub(crate) const CMD_GET_TARGET_CONFIG: u8 = 0xd8;
pub(crate) const CMD_WRITE32: u8 = 0xd4;
pub(crate) const CMD_SEND_DA: u8 = 0xd7;
pub(crate) const CMD_JUMP_DA: u8 = 0xd5;
pub(crate) const CMD_GET_BL_VER: u8 = 0xfe;
pub(crate) const CMD_GET_VERSION: u8 = 0xff;

// MT8590 watchdog register and its disable pattern
pub(crate) const WDT_REGISTER: u32 = 0x1000_7000;
pub(crate) const WDT_DISABLE: u32 = 0x2200_0064;

// DA Stage 2 opcodes
pub(crate) const DA_USB_CHECK_STATUS_CMD: u8 = 0x72;
pub(crate) const DA_SWITCH_PART_CMD: u8 = 0x60;
pub(crate) const DA_READ_CMD: u8 = 0xd6;
pub(crate) const DA_SDMMC_WRITE_DATA_CMD: u8 = 0x61;
pub(crate) const DA_ENABLE_WATCHDOG_CMD: u8 = 0xdb;

// In-band bytes of the DA protocol
pub(crate) const DA_SYNC_CHAR: u8 = 0xc0;
pub(crate) const DA_ACK: u8 = 0x5a;
pub(crate) const DA_CONT_CHAR: u8 = 0x69;
pub(crate) const DA_SOC_OK: u8 = 0xc1;
pub(crate) const DA_NAND_NOT_FOUND: u32 = 0xbc3;

pub(crate) const DA_HOST_OS_LINUX: u8 = 0x01;
pub(crate) const DA_STORAGE_SDMMC: u8 = 0x02;
pub(crate) const DA_EMMC_PART_USER: u8 = 0x08;

// DA container layout magics
pub(crate) const DA_INFO_MAGIC: u32 = 0x2266_8899;
pub(crate) const DA_INFO_VERSION: u32 = 0x4;
pub(crate) const DA_ENTRY_MAGIC: u32 = 0xdada_dada;
pub(crate) const DA_ENTRY_LOAD_REGIONS: usize = 10;

// Transfer chunking: 4 KiB for DA uploads, 1 MiB for storage I/O
pub(crate) const UPLOAD_CHUNK_SIZE: usize = 0x1000;
pub(crate) const STORAGE_CHUNK_SIZE: usize = 0x10_0000;
