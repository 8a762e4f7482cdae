use std::{thread::sleep, time::Duration};

use crate::{
  device::{BulkPipe, MtkDevice},
  flash::IoHandler,
  Error, Result, DA_ACK, DA_CONT_CHAR, DA_ENABLE_WATCHDOG_CMD, DA_HOST_OS_LINUX, DA_NAND_NOT_FOUND, DA_READ_CMD,
  DA_SDMMC_WRITE_DATA_CMD, DA_SOC_OK, DA_SWITCH_PART_CMD, DA_SYNC_CHAR, DA_USB_CHECK_STATUS_CMD, STORAGE_CHUNK_SIZE,
  UPLOAD_CHUNK_SIZE,
};

/// The device pauses at these points of the Stage 2 hand-off; shorter
/// waits make it drop the session.
const CONFIG_SETTLE: Duration = Duration::from_millis(350);
const UPLOAD_SETTLE: Duration = Duration::from_millis(500);

/// Stage 2 emits seven status reports of these exact lengths before the
/// pass info; the contents are not interpreted.
const REPORT_LENGTHS: [usize; 7] = [28, 17, 14, 9, 92, 28, 38];

/// What DA Stage 1 announces about the storage it probed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SyncInfo {
  pub emmc_id: [u32; 4],
  pub da_major: u8,
  pub da_minor: u8,
}

/// Hand-off structure closing the Stage 2 upload.
#[derive(Debug, Clone, Copy)]
struct PassInfo {
  ack: u8,
  download_status: u32,
  boot_style: u32,
}

impl PassInfo {
  fn parse(buf: &[u8; 10]) -> Self {
    Self {
      ack: buf[0],
      download_status: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
      boot_style: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
    }
  }
}

/// Download Agent client: Stage 1 hand-off and Stage 2 storage commands.
pub(crate) struct DaClient<'d, P> {
  dev: &'d mut MtkDevice<P>,
}

impl<'d, P: BulkPipe> DaClient<'d, P> {
  pub fn new(dev: &'d mut MtkDevice<P>) -> Self {
    Self { dev }
  }

  /// Synchronize with Stage 1 after the jump.
  ///
  /// Stage 1 leads with a sync byte, reports its NAND probe (which must
  /// come back empty on these eMMC-only devices), the eMMC probe and
  /// chip id, and finally its own version once the host acknowledges.
  pub fn sync(&mut self) -> Result<SyncInfo> {
    let sync = self.dev.read_u8()?;
    if sync != DA_SYNC_CHAR {
      return Err(Error::NoSync(sync));
    }

    let nand_ret = self.dev.read_u32()?;
    if nand_ret != DA_NAND_NOT_FOUND {
      return Err(Error::NandProbe(nand_ret));
    }
    let nand_count = self.dev.read_u16()?;
    for _ in 0..nand_count {
      self.dev.discard(2)?;
    }

    let emmc_ret = self.dev.read_u32()?;
    if emmc_ret != 0 {
      return Err(Error::EmmcProbe(emmc_ret));
    }
    let mut emmc_id = [0u32; 4];
    for word in &mut emmc_id {
      *word = self.dev.read_u32()?;
    }

    self.dev.write_u8(DA_ACK)?;

    let da_major = self.dev.read_u8()?;
    let da_minor = self.dev.read_u8()?;
    self.dev.discard(1)?; // patch level

    Ok(SyncInfo {
      emmc_id,
      da_major,
      da_minor,
    })
  }

  /// Upload DA Stage 2 through Stage 1.
  ///
  /// Stage 1 first takes a device configuration block, then the target
  /// address, length and chunk size, and acknowledges every chunk of
  /// the payload. The closing ack exchange follows a mandatory wait.
  pub fn send_stage2(&mut self, addr: u32, len: u32, handler: &mut dyn IoHandler) -> Result<()> {
    tracing::debug!("sending DA stage 2 to {addr:#x}, {len:#x} bytes");
    self.send_device_config()?;

    sleep(CONFIG_SETTLE);
    let config = self.dev.read_u32()?;
    tracing::trace!("config echo: {config:#x}");

    self.dev.write_u32(addr)?;
    self.dev.write_u32(len)?;
    self.dev.write_u32(UPLOAD_CHUNK_SIZE as u32)?;

    let ack = self.dev.read_u8()?;
    if ack != DA_ACK {
      return Err(Error::Nack {
        command: "SEND_DA",
        value: ack,
      });
    }

    let total = len as u64;
    let mut buffer = [0u8; UPLOAD_CHUNK_SIZE];
    let mut offset = 0u64;
    while offset < total {
      let count = UPLOAD_CHUNK_SIZE.min((total - offset) as usize);
      handler.fill(offset, total, &mut buffer[..count])?;
      self.dev.write(&buffer[..count])?;
      offset += count as u64;

      let ack = self.dev.read_u8()?;
      if ack != DA_ACK {
        return Err(Error::Nack {
          command: "SEND_DA",
          value: ack,
        });
      }
    }

    sleep(UPLOAD_SETTLE);
    self.dev.write_u8(DA_ACK)?;
    let ack = self.dev.read_u8()?;
    if ack != DA_ACK {
      return Err(Error::Nack {
        command: "SEND_DA",
        value: ack,
      });
    }

    Ok(())
  }

  /// The fixed device description Stage 1 expects before the Stage 2
  /// parameters: BROM/BL versions, NOR and NAND controller settings,
  /// BMT, charge, reset-keys, external clock and boot channel fields.
  fn send_device_config(&mut self) -> Result<()> {
    self.dev.write_u8(0xff)?; // bromver
    self.dev.write_u8(0x01)?; // blver
    self.dev.write_u16(0x0008)?; // nor chip id
    self.dev.write_u8(0x00)?; // nor chip select
    self.dev.write_u32(0x7007_ffff)?; // nand acccon
    self.dev.write_u8(0x01)?; // bmt flag
    self.dev.write_u32(0x0000_0000)?; // bmt partition size
    self.dev.write_u8(0x02)?; // force charge
    self.dev.write_u8(0x01)?; // reset keys
    self.dev.write_u8(0x02)?; // external clock
    self.dev.write_u8(0x00)?; // msdc boot channel
    Ok(())
  }

  /// Drain the seven fixed-length flash-info reports Stage 2 emits.
  pub fn read_reports(&mut self) -> Result<()> {
    for length in REPORT_LENGTHS {
      tracing::trace!("reading {length}-byte DA report");
      self.dev.discard(length)?;
    }
    Ok(())
  }

  /// Read the pass info closing the hand-off. A straight ACK means
  /// Stage 2 is ready; otherwise the download status decides whether a
  /// SOC verdict follows.
  pub fn read_pass_info(&mut self) -> Result<()> {
    let mut buf = [0u8; 10];
    self.dev.read(&mut buf)?;
    let info = PassInfo::parse(&buf);

    if info.ack == DA_ACK {
      tracing::trace!("pass info ack ok");
      return Ok(());
    }
    tracing::trace!(
      "pass info: ack {:#04x}, download status {:#x}, boot style {:#x}",
      info.ack,
      info.download_status,
      info.boot_style
    );

    if info.download_status == DA_ACK as u32 {
      self.dev.discard(3)?;
      let soc = self.dev.read_u8()?;
      if soc != DA_SOC_OK {
        return Err(Error::SocNotOk(soc));
      }
    }

    Ok(())
  }

  /// Ask Stage 2 for its USB state. Returns the raw status byte; `1`
  /// is the only healthy answer.
  pub fn usb_check_status(&mut self) -> Result<u8> {
    self.dev.write_u8(DA_USB_CHECK_STATUS_CMD)?;
    let ack = self.dev.read_u8()?;
    if ack != DA_ACK {
      return Err(Error::Nack {
        command: "USB_CHECK_STATUS",
        value: ack,
      });
    }
    self.dev.read_u8()
  }

  pub fn switch_part(&mut self, part: u8) -> Result<()> {
    self.dev.write_u8(DA_SWITCH_PART_CMD)?;
    let ack = self.dev.read_u8()?;
    if ack != DA_ACK {
      return Err(Error::Nack {
        command: "SWITCH_PART",
        value: ack,
      });
    }

    self.dev.write_u8(part)?;
    let ack = self.dev.read_u8()?;
    if ack != DA_ACK {
      return Err(Error::Nack {
        command: "SWITCH_PART",
        value: ack,
      });
    }

    Ok(())
  }

  /// Stream `len` bytes of storage starting at `addr` into the handler.
  ///
  /// The device sends 1 MiB chunks, each trailed by a 16-bit byte-sum
  /// checksum the host must verify and acknowledge before the chunk is
  /// handed on.
  pub fn read(&mut self, storage: u8, addr: u64, len: u64, handler: &mut dyn IoHandler) -> Result<()> {
    self.dev.write_u8(DA_READ_CMD)?;
    self.dev.write_u8(DA_HOST_OS_LINUX)?;
    self.dev.write_u8(storage)?;
    self.dev.write_u64(addr)?;
    self.dev.write_u64(len)?;

    let ack = self.dev.read_u8()?;
    if ack != DA_ACK {
      return Err(Error::Nack {
        command: "READ",
        value: ack,
      });
    }

    self.dev.write_u32(STORAGE_CHUNK_SIZE as u32)?;

    let mut buffer = vec![0u8; STORAGE_CHUNK_SIZE];
    let mut offset = 0u64;
    while offset < len {
      let count = STORAGE_CHUNK_SIZE.min((len - offset) as usize);
      self.dev.read(&mut buffer[..count])?;

      let computed = checksum(&buffer[..count]);
      let device = self.dev.read_u16()?;
      if computed != device {
        return Err(Error::ChecksumMismatch { computed, device });
      }

      self.dev.write_u8(DA_ACK)?;
      handler.store(offset, len, &buffer[..count])?;
      offset += count as u64;
    }

    Ok(())
  }

  /// Stream `len` bytes from the handler into storage at `addr`.
  ///
  /// Every chunk is preceded by a host ACK and trailed by the host's
  /// checksum; the device answers each with the continuation byte.
  pub fn write(&mut self, storage: u8, part: u8, addr: u64, len: u64, handler: &mut dyn IoHandler) -> Result<()> {
    self.dev.write_u8(DA_SDMMC_WRITE_DATA_CMD)?;
    tracing::trace!("storage: {storage:#04x}, part: {part:#04x}");
    self.dev.write_u8(storage)?;
    self.dev.write_u8(part)?;
    self.dev.write_u64(addr)?;
    self.dev.write_u64(len)?;
    self.dev.write_u32(STORAGE_CHUNK_SIZE as u32)?;

    let ack = self.dev.read_u8()?;
    if ack != DA_ACK {
      return Err(Error::Nack {
        command: "SDMMC_WRITE_DATA",
        value: ack,
      });
    }

    let mut buffer = vec![0u8; STORAGE_CHUNK_SIZE];
    let mut offset = 0u64;
    while offset < len {
      self.dev.write_u8(DA_ACK)?;

      let count = STORAGE_CHUNK_SIZE.min((len - offset) as usize);
      handler.fill(offset, len, &mut buffer[..count])?;
      self.dev.write(&buffer[..count])?;
      self.dev.write_u16(checksum(&buffer[..count]))?;

      let reply = self.dev.read_u8()?;
      if reply != DA_CONT_CHAR {
        return Err(Error::NoContinue(reply));
      }

      offset += count as u64;
    }

    Ok(())
  }

  /// Arm the watchdog. With a zero timeout this reboots the device.
  pub fn enable_watchdog(
    &mut self,
    timeout_ms: u32,
    run_async: bool,
    bootup: bool,
    dlbit: bool,
    not_reset_rtc: bool,
  ) -> Result<()> {
    self.dev.write_u8(DA_ENABLE_WATCHDOG_CMD)?;
    self.dev.write_u32(timeout_ms)?;
    self.dev.write_u8(run_async as u8)?;
    self.dev.write_u8(bootup as u8)?;
    self.dev.write_u8(dlbit as u8)?;
    self.dev.write_u8(not_reset_rtc as u8)?;

    let ack = self.dev.read_u8()?;
    if ack != DA_ACK {
      return Err(Error::Nack {
        command: "ENABLE_WATCHDOG",
        value: ack,
      });
    }

    Ok(())
  }
}

/// Byte-sum checksum of the storage transfer chunks, mod 2^16.
fn checksum(data: &[u8]) -> u16 {
  data.iter().fold(0u16, |sum, byte| sum.wrapping_add(*byte as u16))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::mock::MockPipe;

  /// Handler backed by plain vectors: `fill` reads from `source`,
  /// `store` appends to `stored`.
  struct VecIo {
    source: Vec<u8>,
    stored: Vec<u8>,
  }

  impl VecIo {
    fn empty() -> Self {
      Self {
        source: Vec::new(),
        stored: Vec::new(),
      }
    }

    fn source(data: Vec<u8>) -> Self {
      Self {
        source: data,
        stored: Vec::new(),
      }
    }
  }

  impl IoHandler for VecIo {
    fn fill(&mut self, offset: u64, _total: u64, buf: &mut [u8]) -> crate::Result<()> {
      let start = offset as usize;
      buf.copy_from_slice(&self.source[start..start + buf.len()]);
      Ok(())
    }

    fn store(&mut self, offset: u64, _total: u64, buf: &[u8]) -> crate::Result<()> {
      assert_eq!(offset as usize, self.stored.len());
      self.stored.extend_from_slice(buf);
      Ok(())
    }
  }

  fn device(pipe: MockPipe) -> MtkDevice<MockPipe> {
    MtkDevice::new(pipe)
  }

  fn queue_sync_preamble(pipe: &mut MockPipe) {
    pipe.queue(&[0xc0]); // sync char
    pipe.queue(&[0x00, 0x00, 0x0b, 0xc3]); // nand ret: NAND_NOT_FOUND
    pipe.queue(&[0x00, 0x02]); // two nand entries
    pipe.queue(&[0x11, 0x11, 0x22, 0x22]);
    pipe.queue(&[0x00, 0x00, 0x00, 0x00]); // emmc ret
    pipe.queue(&[0x00, 0x00, 0x00, 0x01]); // emmc id
    pipe.queue(&[0x00, 0x00, 0x00, 0x02]);
    pipe.queue(&[0x00, 0x00, 0x00, 0x03]);
    pipe.queue(&[0x00, 0x00, 0x00, 0x04]);
    pipe.queue(&[0x03, 0x01, 0x07]); // DA version 3.1.7
  }

  #[test]
  fn sync_reads_probe_results() {
    let mut pipe = MockPipe::new();
    queue_sync_preamble(&mut pipe);
    let mut dev = device(pipe);

    let info = DaClient::new(&mut dev).sync().unwrap();
    assert_eq!(info.emmc_id, [1, 2, 3, 4]);
    assert_eq!((info.da_major, info.da_minor), (3, 1));
    // host acknowledged the probe results
    assert_eq!(dev.pipe().tx, [0x5a]);
  }

  #[test]
  fn sync_rejects_unexpected_nand_probe() {
    let mut pipe = MockPipe::new();
    pipe.queue(&[0xc0]);
    pipe.queue(&[0x00, 0x00, 0x00, 0x00]); // nand ret: a controller answered
    let mut dev = device(pipe);

    match DaClient::new(&mut dev).sync() {
      Err(err @ Error::NandProbe(0)) => {
        assert!(err.to_string().contains("NAND controller did not return NAND_NOT_FOUND"));
      }
      other => panic!("expected NAND probe error, got {other:?}"),
    }
  }

  #[test]
  fn sync_rejects_missing_sync_char() {
    let mut pipe = MockPipe::new();
    pipe.queue(&[0x00]);
    let mut dev = device(pipe);

    assert!(matches!(DaClient::new(&mut dev).sync(), Err(Error::NoSync(0))));
  }

  #[test]
  fn read_verifies_checksum_and_acks() {
    let seed: Vec<u8> = (0..0x1000u32).map(|i| (i * 7) as u8).collect();
    let sum = checksum(&seed);

    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a]); // command ack
    pipe.queue(&seed);
    pipe.queue(&sum.to_be_bytes());
    let mut dev = device(pipe);

    let mut io = VecIo::empty();
    DaClient::new(&mut dev).read(0x02, 0, seed.len() as u64, &mut io).unwrap();

    assert_eq!(io.stored, seed);
    // READ, host os, storage, addr, len, chunk size, then one chunk ack
    let mut expected = vec![0xd6, 0x01, 0x02];
    expected.extend_from_slice(&0u64.to_be_bytes());
    expected.extend_from_slice(&(seed.len() as u64).to_be_bytes());
    expected.extend_from_slice(&(STORAGE_CHUNK_SIZE as u32).to_be_bytes());
    expected.push(0x5a);
    assert_eq!(dev.pipe().tx, expected);
  }

  #[test]
  fn read_streams_full_chunks() {
    let seed: Vec<u8> = (0..STORAGE_CHUNK_SIZE + 0x800).map(|i| (i % 251) as u8).collect();

    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a]);
    pipe.queue(&seed[..STORAGE_CHUNK_SIZE]);
    pipe.queue(&checksum(&seed[..STORAGE_CHUNK_SIZE]).to_be_bytes());
    pipe.queue(&seed[STORAGE_CHUNK_SIZE..]);
    pipe.queue(&checksum(&seed[STORAGE_CHUNK_SIZE..]).to_be_bytes());
    let mut dev = device(pipe);

    let mut io = VecIo::empty();
    DaClient::new(&mut dev).read(0x02, 0, seed.len() as u64, &mut io).unwrap();

    assert_eq!(io.stored, seed);
    // one ack per chunk
    assert_eq!(dev.pipe().tx.iter().rev().take(2).filter(|b| **b == 0x5a).count(), 2);
  }

  #[test]
  fn read_checksum_mismatch_is_fatal() {
    let mut seed: Vec<u8> = (0..0x100u32).map(|i| i as u8).collect();
    let sum = checksum(&seed);
    seed[17] ^= 0x20; // corrupt one byte, keep the original checksum

    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a]);
    pipe.queue(&seed);
    pipe.queue(&sum.to_be_bytes());
    let mut dev = device(pipe);

    let mut io = VecIo::empty();
    match DaClient::new(&mut dev).read(0x02, 0, seed.len() as u64, &mut io) {
      Err(Error::ChecksumMismatch { computed, device }) => {
        assert_ne!(computed, device);
        assert_eq!(device, sum);
      }
      other => panic!("expected checksum mismatch, got {other:?}"),
    }
    // nothing corrupt reaches the handler
    assert!(io.stored.is_empty());
  }

  #[test]
  fn read_surfaces_nack() {
    let mut pipe = MockPipe::new();
    pipe.queue(&[0x1f]);
    let mut dev = device(pipe);

    let mut io = VecIo::empty();
    match DaClient::new(&mut dev).read(0x02, 0, 0x1000, &mut io) {
      Err(Error::Nack { command: "READ", value }) => assert_eq!(value, 0x1f),
      other => panic!("expected nack, got {other:?}"),
    }
  }

  #[test]
  fn write_frames_chunk_with_ack_and_checksum() {
    let payload: Vec<u8> = (0..0x1000u32).map(|i| (i * 3) as u8).collect();

    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a]); // command ack
    pipe.queue(&[0x69]); // continuation after the chunk
    let mut dev = device(pipe);

    let mut io = VecIo::source(payload.clone());
    DaClient::new(&mut dev)
      .write(0x02, 0x08, 0x1000, payload.len() as u64, &mut io)
      .unwrap();

    let mut expected = vec![0x61, 0x02, 0x08];
    expected.extend_from_slice(&0x1000u64.to_be_bytes());
    expected.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    expected.extend_from_slice(&(STORAGE_CHUNK_SIZE as u32).to_be_bytes());
    expected.push(0x5a); // host ack opening the chunk
    expected.extend_from_slice(&payload);
    expected.extend_from_slice(&checksum(&payload).to_be_bytes());
    assert_eq!(dev.pipe().tx, expected);
  }

  #[test]
  fn write_stops_without_continuation() {
    let payload = vec![0xab; 0x200];

    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a]);
    pipe.queue(&[0x5a]); // ACK where CONT_CHAR belongs
    let mut dev = device(pipe);

    let mut io = VecIo::source(payload.clone());
    match DaClient::new(&mut dev).write(0x02, 0x08, 0, payload.len() as u64, &mut io) {
      Err(Error::NoContinue(0x5a)) => {}
      other => panic!("expected missing continuation, got {other:?}"),
    }
  }

  #[test]
  fn stage2_upload_wire_trace() {
    let payload: Vec<u8> = (0..UPLOAD_CHUNK_SIZE + 0x100).map(|i| (i % 253) as u8).collect();

    let mut pipe = MockPipe::new();
    pipe.queue(&[0x00, 0x00, 0x00, 0x01]); // config echo
    pipe.queue(&[0x5a]); // parameter ack
    pipe.queue(&[0x5a]); // chunk 1 ack
    pipe.queue(&[0x5a]); // chunk 2 ack
    pipe.queue(&[0x5a]); // closing ack
    let mut dev = device(pipe);

    let mut io = VecIo::source(payload.clone());
    DaClient::new(&mut dev)
      .send_stage2(0x4000_0000, payload.len() as u32, &mut io)
      .unwrap();

    // device config block, byte for byte
    let mut expected = vec![0xff, 0x01, 0x00, 0x08, 0x00];
    expected.extend_from_slice(&[0x70, 0x07, 0xff, 0xff]);
    expected.push(0x01);
    expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    expected.extend_from_slice(&[0x02, 0x01, 0x02, 0x00]);
    // address, length, chunk size
    expected.extend_from_slice(&0x4000_0000u32.to_be_bytes());
    expected.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    expected.extend_from_slice(&(UPLOAD_CHUNK_SIZE as u32).to_be_bytes());
    // payload, then the closing host ack
    expected.extend_from_slice(&payload);
    expected.push(0x5a);
    assert_eq!(dev.pipe().tx, expected);
  }

  #[test]
  fn stage2_upload_surfaces_chunk_nack() {
    let payload = vec![0x11; UPLOAD_CHUNK_SIZE * 2];

    let mut pipe = MockPipe::new();
    pipe.queue(&[0x00, 0x00, 0x00, 0x00]);
    pipe.queue(&[0x5a]);
    pipe.queue(&[0x33]); // first chunk rejected
    let mut dev = device(pipe);

    let mut io = VecIo::source(payload.clone());
    match DaClient::new(&mut dev).send_stage2(0x4000_0000, payload.len() as u32, &mut io) {
      Err(Error::Nack {
        command: "SEND_DA",
        value,
      }) => assert_eq!(value, 0x33),
      other => panic!("expected nack, got {other:?}"),
    }
  }

  #[test]
  fn reports_are_fully_drained() {
    let mut pipe = MockPipe::new();
    let total: usize = REPORT_LENGTHS.iter().sum();
    pipe.queue(&vec![0xee; total]);
    pipe.queue(&[0x42]); // sentinel
    let mut dev = device(pipe);

    DaClient::new(&mut dev).read_reports().unwrap();
    assert_eq!(dev.read_u8().unwrap(), 0x42);
  }

  #[test]
  fn pass_info_plain_ack() {
    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    let mut dev = device(pipe);

    DaClient::new(&mut dev).read_pass_info().unwrap();
  }

  #[test]
  fn pass_info_soc_verdict() {
    let mut pipe = MockPipe::new();
    // no direct ack, download status carries the ack instead
    pipe.queue(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x5a, 0x00, 0x00, 0x00, 0x01]);
    pipe.queue(&[0x00, 0x00, 0x00, 0xc1]); // trailing bytes, SOC ok
    let mut dev = device(pipe);

    DaClient::new(&mut dev).read_pass_info().unwrap();
  }

  #[test]
  fn pass_info_bad_soc_is_fatal() {
    let mut pipe = MockPipe::new();
    pipe.queue(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x5a, 0x00, 0x00, 0x00, 0x01]);
    pipe.queue(&[0x00, 0x00, 0x00, 0x07]);
    let mut dev = device(pipe);

    match DaClient::new(&mut dev).read_pass_info() {
      Err(Error::SocNotOk(0x07)) => {}
      other => panic!("expected SOC error, got {other:?}"),
    }
  }

  #[test]
  fn usb_status_round_trip() {
    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a, 0x01]);
    let mut dev = device(pipe);

    assert_eq!(DaClient::new(&mut dev).usb_check_status().unwrap(), 1);
    assert_eq!(dev.pipe().tx, [0x72]);
  }

  #[test]
  fn switch_part_wire_trace() {
    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a, 0x5a]);
    let mut dev = device(pipe);

    DaClient::new(&mut dev).switch_part(0x08).unwrap();
    assert_eq!(dev.pipe().tx, [0x60, 0x08]);
  }

  #[test]
  fn enable_watchdog_wire_trace() {
    let mut pipe = MockPipe::new();
    pipe.queue(&[0x5a]);
    let mut dev = device(pipe);

    DaClient::new(&mut dev).enable_watchdog(0, false, false, false, true).unwrap();
    assert_eq!(dev.pipe().tx, [0xdb, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]);
  }

  #[test]
  fn checksum_is_mod_2_16_byte_sum() {
    assert_eq!(checksum(&[]), 0);
    assert_eq!(checksum(&[1, 2, 3]), 6);
    assert_eq!(checksum(&vec![0xff; 0x101]), (0xffu16.wrapping_mul(0x101)));
    // wraps rather than saturates
    assert_eq!(checksum(&vec![0xff; 258]), 0xff_u16.wrapping_mul(258));
  }
}
