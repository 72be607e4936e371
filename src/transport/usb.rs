//! USB-HID transport (§4.B), gated behind the `usb` feature. Monitors
//! that expose MCCS over USB wrap each DDC/CI packet in a HID "get/set
//! report" pair instead of an I²C transaction; the packet bytes
//! themselves are unchanged, so [`crate::ddc::ci`] needs no USB-specific
//! branch.

use hidapi::{HidApi, HidDevice};

use crate::error::DdcOpError;
use crate::transport::Transport;

/// USB HID Monitor Control Class report id for "VCP request/reply",
/// per the USB Monitor Control Class specification.
const VCP_REPORT_ID: u8 = 0x02;

pub struct UsbTransport {
    path: String,
    device: HidDevice,
}

impl UsbTransport {
    pub fn open(api: &HidApi, vendor_id: u16, product_id: u16, path: &str) -> Result<Self, DdcOpError> {
        let device = api
            .open_path(&std::ffi::CString::new(path).unwrap_or_default())
            .map_err(|err| DdcOpError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())))?;
        let _ = (vendor_id, product_id);
        Ok(Self {
            path: path.to_string(),
            device,
        })
    }
}

impl Transport for UsbTransport {
    fn transmit(&mut self, _addr: u8, data: &[u8]) -> Result<(), DdcOpError> {
        let mut report = vec![VCP_REPORT_ID];
        report.extend_from_slice(data);
        self.device
            .write(&report)
            .map(|_| ())
            .map_err(|err| DdcOpError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())))
    }

    fn receive(&mut self, _addr: u8, len: usize) -> Result<Vec<u8>, DdcOpError> {
        let mut buf = vec![0u8; len + 1];
        buf[0] = VCP_REPORT_ID;
        let read = self
            .device
            .get_feature_report(&mut buf)
            .map_err(|err| DdcOpError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())))?;
        Ok(buf[1..read].to_vec())
    }

    fn path(&self) -> &str {
        &self.path
    }
}
