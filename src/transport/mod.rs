//! Transport seam (§4.A/§4.B): the retry classifier and the VCP facade
//! only ever talk to a [`Transport`], never to `i2cdev`/`hidapi` directly.
//! This keeps the DDC/CI codec and retry logic identical for I²C and
//! USB-HID backed displays.

pub mod i2c;
#[cfg(all(target_os = "linux", feature = "usb"))]
pub mod usb;

use crate::error::DdcOpError;

/// One physical path a [`DdcCiMessage`](crate::ddc::ci::DdcCiMessage) can
/// travel over. `transmit`/`receive` operate on raw DDC/CI addresses
/// (7-bit, as returned by `DdcCiMessage::addr()`) and raw buffers; framing
/// and checksums are the codec's job, not the transport's.
pub trait Transport: Send {
    /// Write `data` to `addr`. `data` is already a complete, checksummed
    /// DDC/CI packet.
    fn transmit(&mut self, addr: u8, data: &[u8]) -> Result<(), DdcOpError>;

    /// Read up to `len` bytes from `addr`.
    fn receive(&mut self, addr: u8, len: usize) -> Result<Vec<u8>, DdcOpError>;

    /// Sleep for the given duration, scaled by the caller with the DSA
    /// multiplier before calling in. Transports rarely need to override
    /// this, but USB-HID backends occasionally poll instead of sleeping.
    fn delay(&self, d: std::time::Duration) {
        std::thread::sleep(d);
    }

    /// A stable identifier for logging and for the phantom-device filter
    /// in [`crate::discovery`] (e.g. `/dev/i2c-3`).
    fn path(&self) -> &str;
}
