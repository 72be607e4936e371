//! Control displays using the DDC/CI protocol.
//!
//! `ci`/`edid`/`eddc` are the wire-level building blocks (packet codec,
//! EDID parser, E-DDC addressing). [`VcpService`] is the retry- and
//! DSA-wrapped façade on top of them: given a locked [`DisplayHandle`],
//! it opens whatever [`Transport`] that display's [`TransportDetail`]
//! names and runs one logical VCP operation through
//! [`crate::retry::retry_loop`].

pub mod ci;
pub mod edid;
pub mod eddc;

use self::ci::{parse_feature_reply, DdcCiMessage, DdcOpcode, ResultCode};
use crate::config::{Config, OpClass};
use crate::error::{DdcOpError, DdcStatus, ErrorInfo};
use crate::mccs::capabilities::{parse_capabilities, Capabilities};
use crate::mccs::features::VcpFeatureCode;
use crate::registry::{DisplayRef, TransportDetail};
use crate::retry::retry_loop;
use crate::sleep::SleepClass;
use crate::transport::i2c::I2cTransport;
#[cfg(feature = "usb")]
use crate::transport::usb::UsbTransport;
use crate::transport::Transport;
use crate::DisplayHandle;

use std::sync::Arc;
use std::time::Duration;

/// Matches the teacher's fixed receive buffer: double the largest DDC/CI
/// data fragment, enough slack for opcode/vcp/offset plus a checksum byte.
pub const I2C_DDC_RECV_BUFFER_SIZE: usize = 64;

pub(crate) fn open_transport(detail: &TransportDetail) -> Result<Box<dyn Transport>, DdcOpError> {
    match detail {
        TransportDetail::I2c {
            sysnum,
            force_slave_address,
        } => Ok(Box::new(I2cTransport::open(*sysnum, *force_slave_address)?)),
        #[cfg(feature = "usb")]
        TransportDetail::Usb {
            vendor_id,
            product_id,
            path,
        } => {
            let api = hidapi::HidApi::new().map_err(|err| {
                DdcOpError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
            })?;
            Ok(Box::new(UsbTransport::open(&api, *vendor_id, *product_id, path)?))
        }
    }
}

/// Transmit `request`, wait out the DSA-scaled inter-packet delays, and
/// parse whatever comes back. One exchange, no retries — [`VcpService`]
/// is the only caller allowed to decide whether to try again.
///
/// `after_write`/`before_read` are sampled from the display's DSA state
/// once per [`crate::retry::retry_loop`] call rather than threaded
/// through live, since the multiplier they're derived from cannot
/// change mid-attempt (only `retry_loop` itself calls `record_outcome`,
/// between attempts, and it already holds the only `&mut` borrow of the
/// sleep state for the duration of the call).
pub(crate) fn exchange(
    transport: &mut dyn Transport,
    request: &DdcCiMessage,
    after_write: Duration,
    before_read: Duration,
    reply_len: usize,
) -> Result<DdcCiMessage, DdcOpError> {
    transport.transmit(request.addr(), &request.transmit_buffer())?;
    transport.delay(after_write);
    transport.delay(before_read);
    let data = transport.receive(request.addr(), reply_len)?;
    let mut full = Vec::with_capacity(data.len() + 1);
    full.push(request.addr() << 1 | 0x01);
    full.extend_from_slice(&data);
    Ok(DdcCiMessage::parse_buffer(&full)?)
}

/// The VCP service façade (§4.J): `get_nontable`/`get_table`/`set_nontable`/
/// `get_capabilities`, each one logical operation wrapped in the retry
/// classifier and paced by the display's [`PerDisplaySleepData`].
///
/// Every operation takes a [`DisplayHandle`] rather than a bare
/// [`DisplayRefHandle`](crate::registry::DisplayRefHandle): the exclusive
/// lock a `DisplayHandle` holds for its whole lifetime is what keeps two
/// threads from interleaving packets on the same display (§3 ordering
/// guarantee), so there is no handle to fail resolving here — only
/// whether the exchange itself succeeds.
pub struct VcpService<'a> {
    config: &'a Config,
}

impl<'a> VcpService<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    fn resolve<'h>(&self, handle: &'h DisplayHandle) -> &'h Arc<DisplayRef> {
        handle.display_ref()
    }

    /// Get the current value of a non-table VCP feature (§4.J).
    pub fn get_nontable(
        &self,
        handle: &DisplayHandle,
        feature: VcpFeatureCode,
    ) -> Result<u32, ErrorInfo> {
        const CALL_SITE: &str = "ddc::get_nontable";
        let display = self.resolve(handle);
        let max_tries = self.config.max_tries.for_class(OpClass::WriteRead);
        let (after_write, before_read) = display
            .with_sleep_data(|sd| (sd.sleep_duration(SleepClass::AfterWrite), sd.sleep_duration(SleepClass::BeforeRead)));

        display.with_try_stats(OpClass::WriteRead, |stats| {
            display.with_sleep_data(|sleep_data| {
                retry_loop(
                    OpClass::WriteRead,
                    max_tries,
                    CALL_SITE,
                    sleep_data,
                    SleepClass::AfterRead,
                    stats,
                    |_try_number| {
                        let mut transport = open_transport(display.transport_detail())?;
                        let request = DdcCiMessage::from_opcode(DdcOpcode::VcpRequest)
                            .set_vcp_feature(feature);
                        let reply = exchange(
                            transport.as_mut(),
                            &request,
                            after_write,
                            before_read,
                            I2C_DDC_RECV_BUFFER_SIZE,
                        )?;
                        if reply == DdcCiMessage::NullResponse() {
                            return Err(DdcOpError::NullResponse);
                        }
                        if reply.get_opcode() != Some(&DdcOpcode::VcpReply) {
                            return Err(DdcOpError::InvalidOperation(
                                "expected a VcpReply opcode".into(),
                            ));
                        }
                        let (_, parsed) = parse_feature_reply(reply.get_data())
                            .map_err(|err| DdcOpError::Protocol(err.into()))?;
                        if *parsed.result_code() == ResultCode::UnsupportedCode {
                            return Err(DdcOpError::ReportedUnsupported);
                        }
                        Ok(parsed.vcp_data())
                    },
                )
            })
        })
    }

    /// Set a non-table VCP feature to `value` (§4.J). When `verify` is
    /// set, follows the write with a `get_nontable` and compares the
    /// read-back value, failing with [`DdcStatus::VerificationFailed`] on
    /// a mismatch instead of trusting a silently-ignored write.
    pub fn set_nontable(
        &self,
        handle: &DisplayHandle,
        feature: VcpFeatureCode,
        value: u16,
        verify: bool,
    ) -> Result<(), ErrorInfo> {
        const CALL_SITE: &str = "ddc::set_nontable";
        let display = self.resolve(handle);
        let max_tries = self.config.max_tries.for_class(OpClass::WriteOnly);
        let after_write = display.with_sleep_data(|sd| sd.sleep_duration(SleepClass::AfterWrite));

        display.with_try_stats(OpClass::WriteOnly, |stats| {
            display.with_sleep_data(|sleep_data| {
                retry_loop(
                    OpClass::WriteOnly,
                    max_tries,
                    CALL_SITE,
                    sleep_data,
                    SleepClass::AfterWrite,
                    stats,
                    |_try_number| {
                        let mut transport = open_transport(display.transport_detail())?;
                        let request = DdcCiMessage::from_opcode(DdcOpcode::SetVcp)
                            .set_vcp_feature(feature)
                            .set_data(&value.to_be_bytes())
                            .map_err(DdcOpError::Protocol)?;
                        transport.transmit(request.addr(), &request.transmit_buffer())?;
                        transport.delay(after_write);
                        Ok(())
                    },
                )
            })
        })?;

        if verify {
            let actual = self.get_nontable(handle, feature)?;
            if actual != value as u32 {
                return Err(ErrorInfo::new(
                    DdcStatus::VerificationFailed,
                    CALL_SITE,
                    format!("wrote {value} to feature {feature:?} but read back {actual}"),
                ));
            }
        }
        Ok(())
    }

    /// Read a table-type VCP feature's raw bytes, following the
    /// fragmented offset protocol until a zero-length reply ends it
    /// (§4.J). Each fragment is independently retried under
    /// [`OpClass::MultiPart`].
    pub fn get_table(
        &self,
        handle: &DisplayHandle,
        feature: VcpFeatureCode,
    ) -> Result<Vec<u8>, ErrorInfo> {
        const CALL_SITE: &str = "ddc::get_table";
        let display = self.resolve(handle);
        let max_tries = self.config.max_tries.for_class(OpClass::MultiPart);
        let mut buffer = Vec::new();
        let mut offset: u16 = 0;

        loop {
            let (after_write, before_read) = display.with_sleep_data(|sd| {
                (
                    sd.sleep_duration(SleepClass::AfterWrite),
                    sd.sleep_duration(SleepClass::BeforeRead),
                )
            });
            let fragment = display.with_try_stats(OpClass::MultiPart, |stats| {
                display.with_sleep_data(|sleep_data| {
                    retry_loop(
                        OpClass::MultiPart,
                        max_tries,
                        CALL_SITE,
                        sleep_data,
                        SleepClass::AfterRead,
                        stats,
                        |_try_number| {
                            let mut transport = open_transport(display.transport_detail())?;
                            let request = DdcCiMessage::from_opcode(DdcOpcode::TableReadRequest)
                                .set_vcp_feature(feature)
                                .set_offset(offset);
                            let reply = exchange(
                                transport.as_mut(),
                                &request,
                                after_write,
                                before_read,
                                I2C_DDC_RECV_BUFFER_SIZE,
                            )?;
                            if reply.get_opcode() != Some(&DdcOpcode::TableReadReply) {
                                return Err(DdcOpError::InvalidOperation(
                                    "expected a TableReadReply opcode".into(),
                                ));
                            }
                            Ok(reply.get_data().to_vec())
                        },
                    )
                })
            })?;
            if fragment.is_empty() {
                break;
            }
            offset += fragment.len() as u16;
            buffer.extend_from_slice(&fragment);
        }
        Ok(buffer)
    }

    /// Read and parse a display's capabilities string, fetched in
    /// fragments the same way as [`VcpService::get_table`] (§4.J).
    pub fn get_capabilities(&self, handle: &DisplayHandle) -> Result<Capabilities, ErrorInfo> {
        const CALL_SITE: &str = "ddc::get_capabilities";
        let display = self.resolve(handle);
        let max_tries = self.config.max_tries.for_class(OpClass::MultiPart);
        let mut buffer = Vec::new();
        let mut offset: u16 = 0;

        loop {
            let (after_write, before_read) = display.with_sleep_data(|sd| {
                (
                    sd.sleep_duration(SleepClass::AfterWrite),
                    sd.sleep_duration(SleepClass::BeforeRead),
                )
            });
            let fragment = display.with_try_stats(OpClass::MultiPart, |stats| {
                display.with_sleep_data(|sleep_data| {
                    retry_loop(
                        OpClass::MultiPart,
                        max_tries,
                        CALL_SITE,
                        sleep_data,
                        SleepClass::AfterRead,
                        stats,
                        |_try_number| {
                            let mut transport = open_transport(display.transport_detail())?;
                            let request =
                                DdcCiMessage::from_opcode(DdcOpcode::CapabilitiesRequest)
                                    .set_offset(offset);
                            let reply = exchange(
                                transport.as_mut(),
                                &request,
                                after_write,
                                before_read,
                                I2C_DDC_RECV_BUFFER_SIZE,
                            )?;
                            if reply.get_opcode() != Some(&DdcOpcode::CapabilitiesReply) {
                                return Err(DdcOpError::InvalidOperation(
                                    "expected a CapabilitiesReply opcode".into(),
                                ));
                            }
                            Ok(reply.get_data().to_vec())
                        },
                    )
                })
            })?;
            if fragment.is_empty() {
                break;
            }
            offset += fragment.len() as u16;
            buffer.extend_from_slice(&fragment);
        }

        let text = String::from_utf8(buffer).map_err(|err| {
            ErrorInfo::new(DdcStatus::BadLength, CALL_SITE, format!("non-utf8 capabilities string: {err}"))
        })?;
        parse_capabilities(&text)
            .map_err(|err| ErrorInfo::new(DdcStatus::BadLength, CALL_SITE, err.to_string()))
    }
}
