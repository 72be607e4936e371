//! Linux I²C transport (§4.A), built on `i2cdev` the way the teacher's
//! `ddc::linux` module talks to `/dev/i2c-N`, with the busy/retry-with
//! forced-slave-address behaviour from §4.A layered on top via `nix`.

use std::os::unix::io::AsRawFd;

use i2cdev::core::I2CTransfer;
use i2cdev::linux::{LinuxI2CBus, LinuxI2CMessage};
use nix::libc;

use crate::error::DdcOpError;
use crate::transport::Transport;

/// `ioctl(I2C_SLAVE_FORCE)`, not exposed by `i2cdev`: used to grab the DDC/CI
/// pseudo-address 0x37 even when a conflicting driver already has it open,
/// mirroring ddcutil's `--force-slave-address` behaviour.
const I2C_SLAVE_FORCE: libc::c_ulong = 0x0706;

fn force_slave_address(fd: std::os::unix::io::RawFd, addr: u8) -> nix::Result<()> {
    // SAFETY: `fd` is a valid, open file descriptor for the duration of
    // this call, and `I2C_SLAVE_FORCE` takes an integer argument by value,
    // not a pointer, per the i2c-dev ioctl ABI.
    unsafe {
        nix::errno::Errno::result(libc::ioctl(fd, I2C_SLAVE_FORCE, addr as libc::c_ulong))?;
    }
    Ok(())
}

pub struct I2cTransport {
    path: String,
    bus: LinuxI2CBus,
    force_slave_address: bool,
}

impl I2cTransport {
    pub fn open(sysnum: usize, force_slave_address: bool) -> Result<Self, DdcOpError> {
        let path = format!("/dev/i2c-{sysnum}");
        let bus = LinuxI2CBus::new(&path).map_err(|err| match err.kind() {
            i2cdev::linux::LinuxI2CErrorKind::Io(io_err)
                if io_err.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                DdcOpError::PermissionDenied(path.clone())
            }
            i2cdev::linux::LinuxI2CErrorKind::Io(io_err)
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                DdcOpError::NotFound(path.clone())
            }
            _ => DdcOpError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())),
        })?;
        Ok(Self {
            path,
            bus,
            force_slave_address,
        })
    }

    fn maybe_force_address(&self, addr: u8) {
        if self.force_slave_address {
            let _ = force_slave_address(self.bus.as_raw_fd(), addr);
        }
    }
}

impl Transport for I2cTransport {
    fn transmit(&mut self, addr: u8, data: &[u8]) -> Result<(), DdcOpError> {
        self.maybe_force_address(addr);
        let mut msg = [LinuxI2CMessage::write(data).with_address(addr.into())];
        self.bus.transfer(&mut msg).map_err(|err| classify_io(&self.path, err))?;
        Ok(())
    }

    fn receive(&mut self, addr: u8, len: usize) -> Result<Vec<u8>, DdcOpError> {
        self.maybe_force_address(addr);
        let mut data = vec![0u8; len];
        let mut msg = [LinuxI2CMessage::read(&mut data).with_address(addr.into())];
        self.bus.transfer(&mut msg).map_err(|err| classify_io(&self.path, err))?;
        Ok(data)
    }

    fn path(&self) -> &str {
        &self.path
    }
}

fn classify_io(path: &str, err: i2cdev::linux::LinuxI2CError) -> DdcOpError {
    match err.kind() {
        i2cdev::linux::LinuxI2CErrorKind::Io(io_err)
            if io_err.kind() == std::io::ErrorKind::WouldBlock =>
        {
            DdcOpError::Busy(path.to_string())
        }
        _ => DdcOpError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())),
    }
}
