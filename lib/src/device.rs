use rusb::{constants::LIBUSB_CLASS_COMM, Context, DeviceHandle, Direction, TransferType, UsbContext};
use std::{thread::sleep, time::Duration};

use crate::{Callback, Error, Event, Result, VENDOR_ID};

/// wMaxPacketSize of the BootROM's bulk endpoints
const PKT_SIZE: usize = 512;
/// Long enough to cover a full 1 MiB storage chunk at BootROM speeds
const BULK_TIMEOUT: Duration = Duration::from_secs(10);
const INTERFACE_NUMBER: u8 = 0;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A raw bulk endpoint pair.
///
/// The protocol engine is generic over this so it can be exercised against
/// a scripted pipe in tests; [`UsbPipe`] is the real implementation.
pub trait BulkPipe {
  /// One bulk IN transfer. Returns how many bytes the device produced.
  fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize>;
  /// One bulk OUT transfer. Returns how many bytes were accepted.
  fn bulk_out(&mut self, buf: &[u8]) -> Result<usize>;
}

/// Bulk endpoint pair of a claimed MediaTek USB device.
#[derive(Debug)]
pub struct UsbPipe {
  handle: DeviceHandle<Context>,
  interface_number: u8,
  endpoint_in: u8,
  endpoint_out: u8,
}

impl UsbPipe {
  /// Wait for a MediaTek device to enumerate and claim its interface.
  ///
  /// Matches on vendor `0x0E8D` with the CDC communications device class;
  /// BootROM and Preloader enumerate with different product ids, so the
  /// product id is not filtered. Blocks until a device shows up.
  pub fn detect(callback: Option<Callback>) -> Result<Self> {
    if let Some(callback) = &callback {
      callback(Event::FindingDevice);
    }

    let context = Context::new()?;
    let device = loop {
      let found = context.devices()?.iter().find(|device| {
        if let Ok(desc) = device.device_descriptor() {
          desc.vendor_id() == VENDOR_ID && desc.class_code() == LIBUSB_CLASS_COMM
        } else {
          false
        }
      });

      match found {
        Some(device) => break device,
        None => sleep(POLL_INTERVAL),
      }
    };

    let desc = device.device_descriptor()?;
    tracing::info!(
      "found MediaTek device {:04x}:{:04x}",
      desc.vendor_id(),
      desc.product_id()
    );

    let handle = device.open()?;

    #[cfg(not(target_os = "windows"))]
    handle.set_auto_detach_kernel_driver(true)?;

    handle.claim_interface(INTERFACE_NUMBER)?;

    let config_desc = device.active_config_descriptor()?;
    let mut endpoint_in = None;
    let mut endpoint_out = None;
    for interface in config_desc.interfaces() {
      for descriptor in interface.descriptors() {
        for ep in descriptor.endpoint_descriptors() {
          if ep.transfer_type() != TransferType::Bulk {
            continue;
          }
          match ep.direction() {
            Direction::In => endpoint_in.get_or_insert(ep.address()),
            Direction::Out => endpoint_out.get_or_insert(ep.address()),
          };
        }
      }
    }
    let endpoint_in = endpoint_in.ok_or(Error::NotFound)?;
    let endpoint_out = endpoint_out.ok_or(Error::NotFound)?;

    tracing::debug!(
      "claimed interface {}, endpoints in {:#04x} / out {:#04x}",
      INTERFACE_NUMBER,
      endpoint_in,
      endpoint_out
    );
    if let Some(callback) = &callback {
      callback(Event::Connected);
    }

    Ok(Self {
      handle,
      interface_number: INTERFACE_NUMBER,
      endpoint_in,
      endpoint_out,
    })
  }
}

impl BulkPipe for UsbPipe {
  fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize> {
    Ok(self.handle.read_bulk(self.endpoint_in, buf, BULK_TIMEOUT)?)
  }

  fn bulk_out(&mut self, buf: &[u8]) -> Result<usize> {
    Ok(self.handle.write_bulk(self.endpoint_out, buf, BULK_TIMEOUT)?)
  }
}

impl Drop for UsbPipe {
  fn drop(&mut self) {
    match self.handle.release_interface(self.interface_number) {
      Ok(()) => tracing::trace!("released usb interface"),
      Err(err) => tracing::warn!("failed to release usb interface: {:?}", err),
    }
  }
}

/// Framed byte channel over a bulk endpoint pair.
///
/// Buffers surplus bytes of each bulk IN transfer, and converts every
/// multi-byte scalar to and from the big-endian order the MediaTek
/// protocols use on the wire.
pub struct MtkDevice<P> {
  pipe: P,
  buffer: [u8; PKT_SIZE],
  offset: usize,
  available: usize,
}

impl<P: BulkPipe> MtkDevice<P> {
  #[cfg(test)]
  pub(crate) fn pipe(&self) -> &P {
    &self.pipe
  }

  pub fn new(pipe: P) -> Self {
    Self {
      pipe,
      buffer: [0u8; PKT_SIZE],
      offset: 0,
      available: 0,
    }
  }

  /// Fill `buf` completely from the device, issuing as many bulk IN
  /// transfers as needed and caching the surplus of each packet.
  pub fn read(&mut self, buf: &mut [u8]) -> Result<()> {
    let size = buf.len();
    self.fill(Some(buf), size)?;
    Ok(())
  }

  /// Consume and throw away `size` bytes from the device.
  pub fn discard(&mut self, size: usize) -> Result<()> {
    self.fill(None, size)
  }

  fn fill(&mut self, mut dest: Option<&mut [u8]>, size: usize) -> Result<()> {
    let mut offset = 0;

    while offset < size {
      if self.available == 0 {
        let transferred = self.pipe.bulk_in(&mut self.buffer)?;
        self.offset = 0;
        self.available = transferred;
      }

      let n = (size - offset).min(self.available);
      if let Some(dest) = dest.as_deref_mut() {
        dest[offset..offset + n].copy_from_slice(&self.buffer[self.offset..self.offset + n]);
      }

      offset += n;
      self.offset += n;
      self.available -= n;
    }

    if let Some(dest) = dest {
      trace_bytes("rx", dest);
    }
    Ok(())
  }

  /// Send all of `buf`, looping on the count each bulk OUT reports.
  pub fn write(&mut self, buf: &[u8]) -> Result<()> {
    trace_bytes("tx", buf);

    let mut offset = 0;
    while offset < buf.len() {
      let transferred = self.pipe.bulk_out(&buf[offset..])?;
      offset += transferred;
    }

    Ok(())
  }

  pub fn read_u8(&mut self) -> Result<u8> {
    let mut buf = [0u8; 1];
    self.read(&mut buf)?;
    Ok(buf[0])
  }

  pub fn read_u16(&mut self) -> Result<u16> {
    let mut buf = [0u8; 2];
    self.read(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
  }

  pub fn read_u32(&mut self) -> Result<u32> {
    let mut buf = [0u8; 4];
    self.read(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
  }

  pub fn read_u64(&mut self) -> Result<u64> {
    let mut buf = [0u8; 8];
    self.read(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
  }

  pub fn write_u8(&mut self, data: u8) -> Result<()> {
    self.write(&[data])
  }

  pub fn write_u16(&mut self, data: u16) -> Result<()> {
    self.write(&data.to_be_bytes())
  }

  pub fn write_u32(&mut self, data: u32) -> Result<()> {
    self.write(&data.to_be_bytes())
  }

  pub fn write_u64(&mut self, data: u64) -> Result<()> {
    self.write(&data.to_be_bytes())
  }

  pub fn echo_u8(&mut self, data: u8) -> Result<()> {
    self.write_u8(data)?;
    let reply = self.read_u8()?;
    if reply != data {
      return Err(Error::EchoMismatch {
        expected: data as u64,
        actual: reply as u64,
      });
    }
    Ok(())
  }

  pub fn echo_u16(&mut self, data: u16) -> Result<()> {
    self.write_u16(data)?;
    let reply = self.read_u16()?;
    if reply != data {
      return Err(Error::EchoMismatch {
        expected: data as u64,
        actual: reply as u64,
      });
    }
    Ok(())
  }

  pub fn echo_u32(&mut self, data: u32) -> Result<()> {
    self.write_u32(data)?;
    let reply = self.read_u32()?;
    if reply != data {
      return Err(Error::EchoMismatch {
        expected: data as u64,
        actual: reply as u64,
      });
    }
    Ok(())
  }

  pub fn echo_u64(&mut self, data: u64) -> Result<()> {
    self.write_u64(data)?;
    let reply = self.read_u64()?;
    if reply != data {
      return Err(Error::EchoMismatch {
        expected: data,
        actual: reply,
      });
    }
    Ok(())
  }
}

/// Hex-dump short exchanges at trace level, lengths only for long ones.
fn trace_bytes(direction: &str, data: &[u8]) {
  if !tracing::enabled!(tracing::Level::TRACE) {
    return;
  }

  if data.len() < 63 {
    let hex: String = data.iter().map(|b| format!("{b:02x}")).collect();
    tracing::trace!("{direction}: {hex}");
  } else {
    tracing::trace!("{direction}: {} bytes", data.len());
  }
}
