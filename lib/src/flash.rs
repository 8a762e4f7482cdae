use std::{
  fs::File,
  io::{Read, Write},
  time::Instant,
};

use crate::{
  agent::DaClient,
  container::DaInfo,
  device::{BulkPipe, MtkDevice, UsbPipe},
  preloader::{check_status, Preloader},
  Callback, Error, Event, Result, DA_EMMC_PART_USER, DA_STORAGE_SDMMC,
};

/// How far along the boot chain the device is.
///
/// The state only ever advances; declaring a later initial state skips
/// the phases before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
  /// Just detected, nothing spoken yet
  None = 0,
  /// BootROM/Preloader is answering commands
  Preloader = 1,
  /// The full Download Agent is running
  Stage2 = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
  Dump,
  Flash,
}

/// One block-level I/O request against the eMMC USER partition.
#[derive(Debug)]
pub struct Operation {
  pub kind: OperationKind,
  pub address: u64,
  pub length: u64,
  pub file: File,
}

/// Source/sink for the byte streams of a transfer.
///
/// `fill` produces bytes for the device (flash, DA upload), `store`
/// persists bytes coming from it (dump). Offsets start at zero and
/// advance monotonically by whole chunks.
pub trait IoHandler {
  fn fill(&mut self, offset: u64, total: u64, buf: &mut [u8]) -> Result<()>;
  fn store(&mut self, offset: u64, total: u64, buf: &[u8]) -> Result<()>;
}

/// Per-chunk progress of the current transfer
#[derive(Debug, Clone)]
pub struct TransferProgress {
  pub percent: f64,
  pub elapsed: f64, // in ms
  pub eta: f64,     // in ms
  pub rate: f64,    // in kib/s
}

fn progress(started: Instant, done: u64, total: u64) -> TransferProgress {
  let elapsed_secs = started.elapsed().as_secs_f64();
  let bytes_per_sec = if elapsed_secs > 0.0 {
    done as f64 / elapsed_secs
  } else {
    done as f64
  };
  let eta_secs = if bytes_per_sec > 0.0 {
    total.saturating_sub(done) as f64 / bytes_per_sec
  } else {
    0.0
  };
  let percent = if total > 0 {
    done as f64 / total as f64 * 100.0
  } else {
    100.0
  };

  TransferProgress {
    percent,
    elapsed: elapsed_secs * 1000.0,
    eta: eta_secs * 1000.0,
    rate: bytes_per_sec / 1024.0,
  }
}

fn emit(callback: &Option<Callback>, event: Event) {
  if let Some(callback) = callback {
    callback(event);
  }
}

/// Host-file adapter: sequential reads for flashing, sequential writes
/// for dumping, with progress reported per chunk.
pub(crate) struct FileIo<'f> {
  file: &'f mut File,
  callback: Option<Callback>,
  started: Instant,
}

impl<'f> FileIo<'f> {
  pub fn new(file: &'f mut File, callback: Option<Callback>) -> Self {
    Self {
      file,
      callback,
      started: Instant::now(),
    }
  }

  fn report(&self, done: u64, total: u64) {
    let progress = progress(self.started, done, total);
    tracing::info!(
      "progress: {:.1}% | elapsed: {:.1}s | eta: {:.1}s | rate: {:.2} KB/s",
      progress.percent,
      progress.elapsed / 1000.0,
      progress.eta / 1000.0,
      progress.rate
    );
    emit(&self.callback, Event::TransferProgress(progress));
  }
}

impl IoHandler for FileIo<'_> {
  fn fill(&mut self, offset: u64, total: u64, buf: &mut [u8]) -> Result<()> {
    self.file.read_exact(buf)?;
    self.report(offset + buf.len() as u64, total);
    Ok(())
  }

  fn store(&mut self, offset: u64, total: u64, buf: &[u8]) -> Result<()> {
    self.file.write_all(buf)?;
    self.report(offset + buf.len() as u64, total);
    Ok(())
  }
}

/// Read-only adapter over an in-memory image (the DA load regions).
pub(crate) struct SliceIo<'a> {
  data: &'a [u8],
  callback: Option<Callback>,
  started: Instant,
}

impl<'a> SliceIo<'a> {
  pub fn new(data: &'a [u8], callback: Option<Callback>) -> Self {
    Self {
      data,
      callback,
      started: Instant::now(),
    }
  }
}

impl IoHandler for SliceIo<'_> {
  fn fill(&mut self, offset: u64, total: u64, buf: &mut [u8]) -> Result<()> {
    let start = offset as usize;
    buf.copy_from_slice(&self.data[start..start + buf.len()]);

    let progress = progress(self.started, offset + buf.len() as u64, total);
    tracing::debug!("upload: {:.1}%", progress.percent);
    emit(&self.callback, Event::TransferProgress(progress));
    Ok(())
  }

  fn store(&mut self, _offset: u64, _total: u64, _buf: &[u8]) -> Result<()> {
    Err(Error::Io(std::io::Error::other("upload source cannot store")))
  }
}

/// Drives the device from its declared state through the boot chain and
/// the requested operations.
///
/// Phases run in order from the initial state's position: Preloader
/// sync, Stage 1/Stage 2 boot, then the block-level operations and the
/// optional watchdog reboot. The transport is owned here and borrowed
/// by each protocol client for the duration of a phase.
pub struct Flasher<P: BulkPipe = UsbPipe> {
  device: MtkDevice<P>,
  state: DeviceState,
  da: Option<DaInfo>,
  operations: Vec<Operation>,
  reboot: bool,
  callback: Option<Callback>,
}

impl Flasher<UsbPipe> {
  /// Wait for a MediaTek device and wrap it in a flasher.
  ///
  /// `da` may only be `None` when `state` already is
  /// [`DeviceState::Stage2`].
  pub fn detect(
    state: DeviceState,
    da: Option<DaInfo>,
    operations: Vec<Operation>,
    reboot: bool,
    callback: Option<Callback>,
  ) -> Result<Self> {
    let pipe = UsbPipe::detect(callback.clone())?;
    Ok(Self::new(MtkDevice::new(pipe), state, da, operations, reboot, callback))
  }
}

impl<P: BulkPipe> Flasher<P> {
  pub fn new(
    device: MtkDevice<P>,
    state: DeviceState,
    da: Option<DaInfo>,
    operations: Vec<Operation>,
    reboot: bool,
    callback: Option<Callback>,
  ) -> Self {
    Self {
      device,
      state,
      da,
      operations,
      reboot,
      callback,
    }
  }

  /// Run every remaining phase, then the operations and the optional
  /// reboot.
  pub fn run(&mut self) -> Result<()> {
    let phases: [fn(&mut Self) -> Result<()>; 3] = [Self::sync_preloader, Self::boot_stage2, Self::run_operations];

    for phase in &phases[self.state as usize..] {
      phase(self)?;
    }

    if self.reboot {
      self.reboot_device()?;
    }

    Ok(())
  }

  fn sync_preloader(&mut self) -> Result<()> {
    emit(&self.callback.clone(), Event::PreloaderSync);
    tracing::info!("Syncing with MediaTek Preloader...");

    Preloader::new(&mut self.device).sync()?;
    self.state = DeviceState::Preloader;
    Ok(())
  }

  /// Identify the chip, pick and upload the matching DA, and walk the
  /// Stage 1 hand-off until Stage 2 is ready.
  fn boot_stage2(&mut self) -> Result<()> {
    let callback = self.callback.clone();
    let da = self.da.as_ref().ok_or(Error::NoAgent)?;
    let mut preloader = Preloader::new(&mut self.device);

    let (hw_code, status) = preloader.get_hw_code()?;
    check_status("GET_HW_CODE", status)?;
    tracing::info!("HW code:     {hw_code:#06x}");

    let (hw_subcode, hw_version, sw_version, status) = preloader.get_hw_sw_ver()?;
    check_status("GET_HW_SW_VER", status)?;
    tracing::info!("HW subcode:  {hw_subcode:#06x}");
    tracing::info!("HW version:  {hw_version:#06x}");
    tracing::info!("SW version:  {sw_version:#06x}");

    let (target_config, status) = preloader.get_target_config()?;
    check_status("GET_TARGET_CONFIG", status)?;
    tracing::info!("Target config: {target_config:#010x}");

    let entry = da.select(hw_code, hw_version, sw_version)?;
    let (stage1, stage2) = entry.stages()?;

    tracing::info!("Disabling watchdog timer...");
    let status = preloader.disable_watchdog()?;
    check_status("WRITE32", status)?;

    preloader.brom_queries()?;

    emit(&callback, Event::SendingStage1);
    tracing::info!("Sending DA Stage 1...");
    let mut upload = SliceIo::new(da.region_data(&stage1)?, callback.clone());
    let status = preloader.send_da(stage1.start_addr, stage1.len, stage1.sig_len, &mut upload)?;
    check_status("SEND_DA", status)?;

    emit(&callback, Event::JumpingToStage1);
    tracing::info!("Jumping to DA Stage 1... ({:#x})", stage1.start_addr);
    let status = preloader.jump_da(stage1.start_addr)?;
    check_status("JUMP_DA", status)?;

    let mut client = DaClient::new(&mut self.device);
    let info = client.sync()?;
    tracing::info!(
      "EMMC ID:     {:08X} {:08X} {:08X} {:08X}",
      info.emmc_id[0],
      info.emmc_id[1],
      info.emmc_id[2],
      info.emmc_id[3]
    );
    tracing::info!("DA version:  DA_v{}.{}", info.da_major, info.da_minor);

    emit(&callback, Event::SendingStage2);
    tracing::info!("Sending DA Stage 2...");
    let mut upload = SliceIo::new(da.region_data(&stage2)?, callback.clone());
    client.send_stage2(stage2.start_addr, stage2.len, &mut upload)?;
    tracing::info!("Successfully uploaded stage 2");

    client.read_reports()?;
    client.read_pass_info()?;
    emit(&callback, Event::Stage2Ready);

    self.state = DeviceState::Stage2;
    Ok(())
  }

  /// Run every queued dump/flash operation against the USER partition.
  fn run_operations(&mut self) -> Result<()> {
    let callback = self.callback.clone();
    let mut client = DaClient::new(&mut self.device);

    let usb_status = client.usb_check_status()?;
    if usb_status != 1 {
      return Err(Error::UsbStatus(usb_status));
    }

    for (index, operation) in self.operations.iter_mut().enumerate() {
      tracing::info!("Address:  {:#018x}", operation.address);
      tracing::info!("Length:   {:#018x}", operation.length);
      emit(&callback, Event::Operation(index, operation.kind));

      client.switch_part(DA_EMMC_PART_USER)?;

      let mut io = FileIo::new(&mut operation.file, callback.clone());
      match operation.kind {
        OperationKind::Dump => client.read(DA_STORAGE_SDMMC, operation.address, operation.length, &mut io)?,
        OperationKind::Flash => client.write(
          DA_STORAGE_SDMMC,
          DA_EMMC_PART_USER,
          operation.address,
          operation.length,
          &mut io,
        )?,
      }
    }

    Ok(())
  }

  fn reboot_device(&mut self) -> Result<()> {
    emit(&self.callback.clone(), Event::Rebooting);
    tracing::info!("Enabling WDT to reboot device...");
    DaClient::new(&mut self.device).enable_watchdog(0, false, false, false, true)
  }

  /// State the flasher believes the device is in.
  pub fn state(&self) -> DeviceState {
    self.state
  }
}
