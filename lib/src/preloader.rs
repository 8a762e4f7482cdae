use std::{thread::sleep, time::Duration};

use crate::{
  device::{BulkPipe, MtkDevice},
  flash::IoHandler,
  Error, Result, CMD_GET_BL_VER, CMD_GET_HW_CODE, CMD_GET_HW_SW_VER, CMD_GET_TARGET_CONFIG, CMD_GET_VERSION,
  CMD_JUMP_DA, CMD_SEND_DA, CMD_WRITE32, UPLOAD_CHUNK_SIZE, WDT_DISABLE, WDT_REGISTER,
};

/// Start pattern of the BootROM/Preloader handshake; the device answers
/// each byte with its bitwise complement.
const SYNC_PATTERN: [u8; 4] = [0xa0, 0x0a, 0x50, 0x05];
const SYNC_ATTEMPTS: usize = 100;

/// BootROM/Preloader command client.
///
/// Commands echo their opcode and arguments and finish with a 16-bit
/// status from the device. The status is returned to the caller, who
/// must check it against zero on top of the transport result.
pub(crate) struct Preloader<'d, P> {
  dev: &'d mut MtkDevice<P>,
}

impl<'d, P: BulkPipe> Preloader<'d, P> {
  pub fn new(dev: &'d mut MtkDevice<P>) -> Self {
    Self { dev }
  }

  /// Byte-level sync dance. A wrong reply to the first byte restarts
  /// the pattern; a wrong reply later is retried from the top.
  pub fn sync(&mut self) -> Result<()> {
    'attempt: for _ in 0..SYNC_ATTEMPTS {
      self.dev.write_u8(SYNC_PATTERN[0])?;
      if self.dev.read_u8()? != !SYNC_PATTERN[0] {
        continue;
      }

      for &byte in &SYNC_PATTERN[1..] {
        self.dev.write_u8(byte)?;
        if self.dev.read_u8()? != !byte {
          continue 'attempt;
        }
      }

      tracing::debug!("preloader sync complete");
      return Ok(());
    }

    Err(Error::Handshake)
  }

  pub fn get_hw_code(&mut self) -> Result<(u16, u16)> {
    self.dev.echo_u8(CMD_GET_HW_CODE)?;
    let hw_code = self.dev.read_u16()?;
    let status = self.dev.read_u16()?;
    Ok((hw_code, status))
  }

  /// Returns (hw_subcode, hw_version, sw_version, status).
  pub fn get_hw_sw_ver(&mut self) -> Result<(u16, u16, u16, u16)> {
    self.dev.echo_u8(CMD_GET_HW_SW_VER)?;
    let hw_subcode = self.dev.read_u16()?;
    let hw_version = self.dev.read_u16()?;
    let sw_version = self.dev.read_u16()?;
    let status = self.dev.read_u16()?;
    Ok((hw_subcode, hw_version, sw_version, status))
  }

  pub fn get_target_config(&mut self) -> Result<(u32, u16)> {
    self.dev.echo_u8(CMD_GET_TARGET_CONFIG)?;
    let config = self.dev.read_u32()?;
    let status = self.dev.read_u16()?;
    Ok((config, status))
  }

  /// WRITE32 of the watchdog disable pattern. Both the count status and
  /// the value status come from the device; the first must already be
  /// clean for the value write to mean anything.
  pub fn disable_watchdog(&mut self) -> Result<u16> {
    self.dev.echo_u8(CMD_WRITE32)?;
    self.dev.echo_u32(WDT_REGISTER)?;
    self.dev.echo_u32(1)?;

    let status = self.dev.read_u16()?;
    if status != 0 {
      return Ok(status);
    }

    self.dev.echo_u32(WDT_DISABLE)?;
    self.dev.read_u16()
  }

  /// Identifier queries the BootROM expects before a DA upload. The
  /// answers are read and dropped; the sequence itself is what the
  /// device cares about, duplicate BL-version reads included.
  pub fn brom_queries(&mut self) -> Result<()> {
    self.dev.echo_u8(CMD_GET_TARGET_CONFIG)?;
    self.dev.discard(6)?;

    tracing::trace!("querying BL version");
    self.dev.write_u8(CMD_GET_BL_VER)?;
    self.dev.discard(1)?;

    tracing::trace!("querying BROM version");
    self.dev.write_u8(CMD_GET_VERSION)?;
    self.dev.discard(1)?;

    tracing::trace!("querying HW/SW versions");
    self.dev.write_u8(CMD_GET_HW_SW_VER)?;
    self.dev.discard(1)?;
    sleep(Duration::from_millis(50));
    self.dev.discard(8)?;

    self.dev.write_u8(CMD_GET_BL_VER)?;
    self.dev.discard(1)?;

    Ok(())
  }

  /// Upload DA Stage 1. The device acknowledges the parameters with a
  /// pre-status, takes the raw payload stream, and closes with a
  /// post-status; a dirty pre-status skips the stream entirely.
  pub fn send_da(&mut self, addr: u32, len: u32, sig_len: u32, handler: &mut dyn IoHandler) -> Result<u16> {
    tracing::debug!("sending DA to {addr:#x}, {len:#x} bytes, sig {sig_len:#x}");

    self.dev.echo_u8(CMD_SEND_DA)?;
    self.dev.echo_u32(addr)?;
    self.dev.echo_u32(len)?;
    self.dev.echo_u32(sig_len)?;

    let status = self.dev.read_u16()?;
    if status != 0 {
      return Ok(status);
    }

    let total = len as u64;
    let mut buffer = [0u8; UPLOAD_CHUNK_SIZE];
    let mut offset = 0u64;
    while offset < total {
      let count = UPLOAD_CHUNK_SIZE.min((total - offset) as usize);
      handler.fill(offset, total, &mut buffer[..count])?;
      self.dev.write(&buffer[..count])?;
      offset += count as u64;
    }

    self.dev.read_u16()
  }

  pub fn jump_da(&mut self, addr: u32) -> Result<u16> {
    self.dev.echo_u8(CMD_JUMP_DA)?;
    self.dev.echo_u32(addr)?;
    self.dev.read_u16()
  }
}

/// Map a non-zero Preloader status to a protocol error.
pub(crate) fn check_status(command: &'static str, status: u16) -> Result<()> {
  if status != 0 {
    return Err(Error::Status { command, status });
  }
  Ok(())
}
