//! Display discovery (§4.F): enumerate I²C buses that carry a DRM-backed
//! display, read their EDID, and filter the phantom buses some docking
//! stations expose alongside the real one. Adapted from the teacher's
//! `ddc::linux` module, generalized to populate [`crate::registry::Registry`]
//! instead of handing back a `Ddc` device directly.

use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use i2cdev::core::I2CTransfer;
use i2cdev::linux::LinuxI2CBus;
use log::{debug, warn};
use udev::Device;

use crate::ddc::eddc::{EDDC_SEGMENT_POINTER_ADDR, EDID_ADDRESS};
use crate::ddc::edid::parse_edid;
use crate::registry::{BusOpenError, DisplayFlags, DisplayRef, EdidId, IoPath, Registry, TransportDetail};

const RECEIVE_EDID_RETRIES: u8 = 3;

/// Read `read_size` bytes of EDID over a raw I²C bus (§4.F, `--edid-read-size`),
/// retrying a few times since a freshly woken display sometimes NAKs the
/// first attempt.
pub fn receive_edid(i2c_bus: &mut LinuxI2CBus, read_size: usize) -> Result<crate::ddc::edid::Edid, BusOpenError> {
    let _ = i2c_bus.transfer(&mut [i2cdev::linux::LinuxI2CMessage::write(&[0x0])
        .with_address(EDDC_SEGMENT_POINTER_ADDR.into())]);

    let mut receive_try = RECEIVE_EDID_RETRIES;
    loop {
        i2c_bus
            .transfer(&mut [
                i2cdev::linux::LinuxI2CMessage::write(&[0x0]).with_address(EDID_ADDRESS.into())
            ])
            .map_err(|err| io_err(err))?;
        let mut data: Vec<u8> = vec![0; read_size];
        i2c_bus
            .transfer(&mut [
                i2cdev::linux::LinuxI2CMessage::read(&mut data).with_address(EDID_ADDRESS.into())
            ])
            .map_err(|err| io_err(err))?;
        match parse_edid(&data) {
            Ok(edid) => return Ok(edid),
            Err(_) if receive_try > 0 => receive_try -= 1,
            Err(_) => {
                return Err(BusOpenError::Io {
                    path: "edid".into(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, "bad edid checksum"),
                })
            }
        }
    }
}

fn io_err(err: i2cdev::linux::LinuxI2CError) -> BusOpenError {
    BusOpenError::Io {
        path: "i2c".into(),
        source: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
    }
}

/// True when `sysnum` has no corresponding device in the sysfs i2c tree at
/// all — not a candidate phantom, just not a device worth opening.
fn device_missing_from_sysfs(sysnum: usize) -> bool {
    !Path::new("/sys/bus/i2c/devices")
        .join(format!("i2c-{sysnum}"))
        .exists()
}

/// True when the kernel reports this bus's sink as disconnected and
/// disabled. One of the conditions [`pair_phantoms`] requires before
/// marking a ref PHANTOM (§4.G) — on its own this only means "nothing is
/// plugged in here right now", not "this is a duplicate of another bus".
pub(crate) fn kernel_reports_disconnected(sysnum: usize) -> bool {
    let device_path = Path::new("/sys/bus/i2c/devices").join(format!("i2c-{sysnum}"));
    let enabled_path = device_path.join("device").join("enabled");
    let status_path = device_path.join("device").join("status");
    read_trimmed(&enabled_path).as_deref() == Some("disabled")
        && read_trimmed(&status_path).as_deref() == Some("disconnected")
}

fn read_trimmed(path: &Path) -> Option<String> {
    let mut content = String::new();
    File::open(path).ok()?.read_to_string(&mut content).ok()?;
    Some(content.trim().to_string())
}

/// Buses that are almost never a monitor's DDC/CI channel, listed by
/// ddcutil's `ignorable_i2c_device_sysfs_name`.
fn ignore_device_by_name(name: &OsStr) -> bool {
    const SKIP_PREFIX: [&str; 5] = ["SMBus", "soc:i2cdsi", "smu", "mac-io", "u4"];
    name.to_str()
        .is_some_and(|name| SKIP_PREFIX.iter().any(|prefix| name.starts_with(prefix)))
}

fn device_is_display(dev: &udev::Device) -> bool {
    dev.parent().is_some_and(|i2c_parent| {
        i2c_parent.parent().is_some_and(|maybe_graphics_device| {
            maybe_graphics_device
                .subsystem()
                .is_some_and(|subsystem| subsystem == "drm")
                || maybe_graphics_device
                    .property_value("ID_PCI_CLASS_FROM_DATABASE")
                    .is_some_and(|class| class == "Display controller")
        })
    })
}

fn find_parent_drm_device(i2c_dev: &udev::Device, edid_read_size: usize) -> Option<Device> {
    let i2c_parent = i2c_dev.parent()?;
    let graphics_device = i2c_parent.parent()?;
    if graphics_device.subsystem().is_some_and(|s| s == "drm") {
        return Some(graphics_device);
    }
    if graphics_device
        .property_value("ID_PCI_CLASS_FROM_DATABASE")
        .is_some_and(|class| class == "Display controller")
    {
        let mut i2c = LinuxI2CBus::new(format!("/dev/i2c-{}", i2c_dev.sysnum()?)).ok()?;
        let i2c_edid = receive_edid(&mut i2c, edid_read_size).ok()?;
        let mut drm_enum = udev::Enumerator::new().ok()?;
        drm_enum.match_subsystem("drm").ok();
        let devices = drm_enum.scan_devices().ok()?;
        for (drm_device, edid_data) in devices.filter_map(|dev| {
            let edid_path = dev.syspath().join("edid");
            let mut edid_data = vec![0u8; edid_read_size];
            if edid_path.exists()
                && File::open(&edid_path)
                    .ok()?
                    .read(&mut edid_data)
                    .is_ok_and(|size| size > 0)
            {
                Some((dev, edid_data))
            } else {
                None
            }
        }) {
            if parse_edid(&edid_data).is_ok_and(|drm_edid| drm_edid == i2c_edid) {
                return Some(drm_device);
            }
        }
    }
    None
}

/// True when the DRM connector behind `sysnum` exposes no EDID at all —
/// the other half of [`pair_phantoms`]'s condition, distinct from
/// [`kernel_reports_disconnected`] which only looks at the i2c device's
/// own attributes.
fn kernel_edid_is_empty(sysnum: usize, edid_read_size: usize) -> bool {
    let Ok(mut i2c_enum) = udev::Enumerator::new() else {
        return false;
    };
    i2c_enum.match_subsystem("i2c-dev").ok();
    let Ok(devices) = i2c_enum.scan_devices() else {
        return false;
    };
    let Some(dev) = devices.into_iter().find(|d| d.sysnum() == Some(sysnum)) else {
        return false;
    };
    let Some(drm_device) = find_parent_drm_device(&dev, edid_read_size) else {
        return false;
    };
    std::fs::metadata(drm_device.syspath().join("edid"))
        .map(|meta| meta.len() == 0)
        .unwrap_or(true)
}

/// Phantom filtering (§4.G, end of): pair each ref that failed initial
/// checks against a working ref with a matching EDID. If the invalid
/// ref's bus also reports disconnected/disabled and exposes no kernel
/// EDID, it is a docking-station duplicate of the working ref rather
/// than a distinct, broken display — mark it PHANTOM with a back-pointer.
pub fn pair_phantoms(registry: &Registry, edid_read_size: usize) {
    let mut working = Vec::new();
    let mut invalid = Vec::new();
    for handle in registry.handles() {
        let Some(display) = registry.resolve(handle) else {
            continue;
        };
        let flags = display.flags();
        if flags.contains(DisplayFlags::COMMUNICATION_WORKING) {
            working.push((handle, display));
        } else if !flags.intersects(DisplayFlags::DDC_BUSY | DisplayFlags::REMOVED) {
            invalid.push((handle, display));
        }
    }

    for (invalid_handle, invalid_display) in &invalid {
        let Some(invalid_edid) = invalid_display.edid_id() else {
            continue;
        };
        let IoPath::I2c { sysnum } = invalid_display.io_path() else {
            continue;
        };
        if !kernel_reports_disconnected(*sysnum) || !kernel_edid_is_empty(*sysnum, edid_read_size) {
            continue;
        }
        let Some((working_handle, _)) = working.iter().find(|(_, w)| w.edid_id() == Some(invalid_edid)) else {
            continue;
        };
        debug!("discovery: i2c-{sysnum} is a phantom of handle {working_handle:?}");
        invalid_display.set_real_display(*working_handle);
        invalid_display.insert_flags(DisplayFlags::PHANTOM);
        let _ = invalid_handle;
    }
}

/// A discovered candidate before it has been filtered for phantom status
/// and probed for MCCS support (§4.F/§4.G).
pub struct Candidate {
    pub sysnum: usize,
    pub name: Option<String>,
}

/// Enumerate I²C buses that a DRM display sits behind, applying the name
/// and phantom-device filters before the caller spends an I²C transaction
/// on them.
pub fn enumerate_i2c_candidates(edid_read_size: usize) -> Vec<Candidate> {
    let Ok(mut i2c_enum) = udev::Enumerator::new() else {
        warn!("discovery: failed to create udev enumerator");
        return Vec::new();
    };
    i2c_enum.match_subsystem("i2c-dev").ok();
    let Ok(devices) = i2c_enum.scan_devices() else {
        return Vec::new();
    };

    devices
        .into_iter()
        .filter(|dev| {
            dev.attribute_value("name")
                .is_some_and(|name| !ignore_device_by_name(name))
        })
        .filter(device_is_display)
        .filter_map(|dev| {
            let sysnum = dev.sysnum()?;
            if device_missing_from_sysfs(sysnum) {
                debug!("discovery: skipping missing i2c-{sysnum}");
                return None;
            }
            if find_parent_drm_device(&dev, edid_read_size).is_none() {
                return None;
            }
            Some(Candidate {
                sysnum,
                name: dev
                    .attribute_value("name")
                    .and_then(|s| s.to_str())
                    .map(str::to_owned),
            })
        })
        .collect()
}

/// Open each candidate bus, read its EDID, and insert it into `registry`.
/// Non-fatal per-bus errors are logged and the candidate is skipped so one
/// bad bus does not abort the whole scan.
pub fn discover_into(registry: &Registry, force_slave_address: bool, edid_read_size: usize) {
    for candidate in enumerate_i2c_candidates(edid_read_size) {
        let mut bus = match LinuxI2CBus::new(format!("/dev/i2c-{}", candidate.sysnum)) {
            Ok(bus) => bus,
            Err(err) => {
                warn!(
                    "discovery: failed to open i2c-{}: {err}",
                    candidate.sysnum
                );
                continue;
            }
        };
        let edid_id = match receive_edid(&mut bus, edid_read_size) {
            Ok(edid) => Some(EdidId {
                mfg_id: edid.header.vendor,
                model: edid.header.product,
                serial: edid.header.serial,
            }),
            Err(err) => {
                debug!(
                    "discovery: no edid on i2c-{} ({}): {err}",
                    candidate.sysnum,
                    candidate.name.as_deref().unwrap_or("?")
                );
                None
            }
        };
        registry.insert(DisplayRef::new(
            IoPath::I2c {
                sysnum: candidate.sysnum,
            },
            TransportDetail::I2c {
                sysnum: candidate.sysnum,
                force_slave_address,
            },
            edid_id,
        ));
    }
}
