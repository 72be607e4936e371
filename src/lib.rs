//! Core DDC/CI monitor control library.
//!
//! [`MonitorRegistry`] is the crate-root facade: discover displays,
//! open an exclusive [`DisplayHandle`] on one, and drive VCP operations
//! through [`ddc::VcpService`]. Everything else — the packet codec,
//! transports, the retry classifier, the dynamic sleep algorithm, the
//! registry, dump/load — is reachable directly for callers that want
//! finer control than the facade offers.

pub mod config;
pub mod ddc;
pub mod discovery;
pub mod dumpload;
pub mod error;
pub mod initial_checks;
pub mod mccs;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod sleep;
pub mod state_dir;
pub mod transport;

use std::cell::RefCell;
use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, warn};

use crate::config::{Config, OpClass};
use crate::ddc::ci::{parse_feature_reply, DdcCiMessage, DdcOpcode, ResultCode};
use crate::ddc::VcpService;
use crate::discovery::{discover_into, pair_phantoms};
use crate::error::{DdcOpError, DdcStatus, ErrorInfo};
use crate::initial_checks::{
    advance, classify_probe, InitialCheckEvidence, InitialCheckState,
    MCCS_VERSION_FEATURE, PROBE_EXPECTED_FEATURE, PROBE_INITIAL_FEATURE, PROBE_UNSUPPORTED_FEATURE,
};
use crate::mccs::Version;
use crate::registry::{
    DisplayFlags, DisplayRef, DisplayRefHandle, DisplayRefSnapshot, LockGuard, Registry,
    DISPNO_BUSY, DISPNO_INVALID, DISPNO_PHANTOM,
};
use crate::scan::scan_all;
use crate::sleep::{PerDisplaySleepData, SleepClass};
use crate::state_dir::{StateCache, StateDir};

thread_local! {
    static LAST_ERROR: RefCell<Option<ErrorInfo>> = RefCell::new(None);
}

/// Remember `err` as this thread's most recently observed failure (§6
/// library embedding contract). Only the facade calls this — callers
/// going straight to `retry`/`ddc` get the `ErrorInfo` back directly and
/// have no need for a side channel.
fn set_last_error(err: ErrorInfo) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(err));
}

/// Take this thread's last recorded [`ErrorInfo`], if any, clearing it.
pub fn take_last_error() -> Option<ErrorInfo> {
    LAST_ERROR.with(|cell| cell.borrow_mut().take())
}

/// Syslog verbosity passed to [`LibraryState::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogLevel {
    Never,
    Error,
    Info,
    Debug,
}

/// Process-wide state established once via [`LibraryState::init`] (§6).
/// A second call is silently ignored — there is nothing left to
/// (re)configure, matching "subsequent calls produce results without
/// writing to stdout/stderr unless explicitly redirected".
pub struct LibraryState {
    pub options: String,
    pub syslog_level: SyslogLevel,
}

static LIBRARY_STATE: OnceLock<LibraryState> = OnceLock::new();

impl LibraryState {
    pub fn init(options: impl Into<String>, syslog_level: SyslogLevel) -> &'static LibraryState {
        LIBRARY_STATE.get_or_init(|| {
            let options = options.into();
            debug!("libinit: options={options:?} syslog_level={syslog_level:?}");
            LibraryState {
                options,
                syslog_level,
            }
        })
    }

    pub fn get() -> Option<&'static LibraryState> {
        LIBRARY_STATE.get()
    }
}

/// An open session on a [`registry::DisplayRef`] (§3). Holds the
/// exclusive per-display lock for its whole lifetime, which is what
/// serialises every DDC request issued through it with any other
/// request on the same display (§5 ordering guarantee). Dropping it
/// releases the lock; Rust's ownership already rules out the
/// double-close the spec warns is a programmer error elsewhere.
pub struct DisplayHandle {
    handle: DisplayRefHandle,
    guard: LockGuard,
}

impl DisplayHandle {
    /// The registry handle this session was opened from.
    pub fn handle(&self) -> DisplayRefHandle {
        self.handle
    }

    pub(crate) fn display_ref(&self) -> &Arc<DisplayRef> {
        self.guard.display_ref()
    }
}

/// The crate-root facade (§2): owns the [`Registry`] and [`Config`],
/// and walks discovery → initial checks → dispno assignment (§4.F–§4.I)
/// before handing out [`DisplayHandle`]s for [`ddc::VcpService`] to use.
pub struct MonitorRegistry {
    registry: Registry,
    config: Config,
    state_dir: Option<StateDir>,
    state_cache: Mutex<StateCache>,
}

impl MonitorRegistry {
    pub fn new(config: Config) -> Self {
        let state_dir = StateDir::discover()
            .map_err(|err| warn!("state_dir: no persisted state available: {err}"))
            .ok();
        Self {
            registry: Registry::new(),
            config,
            state_dir,
            state_cache: Mutex::new(StateCache::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Discover displays (§4.F), seed each one's DSA multiplier from
    /// persisted state (§4.E/§6), run initial checks (§4.G, fanned out
    /// per §4.H), pair off phantom duplicates (§4.G "phantom filtering"),
    /// then assign dispnos (§4.I).
    pub fn discover(&self) {
        discover_into(&self.registry, self.config.force_slave_address, self.config.edid_read_size.len());
        self.seed_persisted_sleep_state();
        self.run_initial_checks();
        pair_phantoms(&self.registry, self.config.edid_read_size.len());
        self.assign_dispnos();
    }

    /// Seed every newly discovered display's DSA multiplier from its
    /// persisted per-EDID state (§4.E), or pin it to the explicit
    /// `--sleep-multiplier` override when one is configured.
    fn seed_persisted_sleep_state(&self) {
        if let Some(multiplier) = self.config.sleep_multiplier_override {
            for handle in self.registry.handles() {
                if let Some(display) = self.registry.resolve(handle) {
                    display.with_sleep_data(|sd| sd.set_override(multiplier));
                }
            }
            return;
        }
        let Some(state_dir) = &self.state_dir else {
            return;
        };
        let mut cache = self.state_cache.lock().expect("state cache lock poisoned");
        for handle in self.registry.handles() {
            let Some(display) = self.registry.resolve(handle) else {
                continue;
            };
            let Some(edid_id) = display.edid_id().cloned() else {
                continue;
            };
            let persisted = cache.get_or_load(state_dir, &edid_id);
            display.with_sleep_data(|sd| *sd = PerDisplaySleepData::with_initial_multiplier(persisted.sleep_multiplier));
        }
    }

    /// Write every known display's current DSA multiplier back to
    /// persisted state (§5 "written at process shutdown"). Called from
    /// `Drop`; harmless to call more than once.
    fn persist_sleep_state(&self) {
        let Some(state_dir) = &self.state_dir else {
            return;
        };
        let mut cache = self.state_cache.lock().expect("state cache lock poisoned");
        for handle in self.registry.handles() {
            let Some(display) = self.registry.resolve(handle) else {
                continue;
            };
            let Some(edid_id) = display.edid_id().cloned() else {
                continue;
            };
            let multiplier = display.with_sleep_data(|sd| sd.multiplier());
            let mut state = cache.get_or_load(state_dir, &edid_id);
            state.sleep_multiplier = multiplier;
            cache.set(edid_id.clone(), state.clone());
            if let Err(err) = state_dir.store(&edid_id, &state) {
                warn!("persist_sleep_state: failed to write state for {edid_id:?}: {err}");
            }
        }
    }

    /// §4.I "rediscover": coarse-grained — discard everything currently
    /// known and run discovery again from scratch. Any [`DisplayHandle`]
    /// still open on a discarded ref keeps its lock (the `Arc` it holds
    /// stays alive) but the handle that produced it no longer resolves.
    pub fn rediscover(&self) {
        for handle in self.registry.handles() {
            self.registry.remove(handle);
        }
        self.discover();
    }

    pub fn handles(&self) -> Vec<DisplayRefHandle> {
        self.registry.handles()
    }

    pub fn snapshot(&self, handle: DisplayRefHandle) -> Option<DisplayRefSnapshot> {
        self.registry.snapshot(handle)
    }

    /// Open an exclusive session on `handle` (§3 `DisplayHandle`): fails
    /// if the handle no longer resolves (display was removed by a
    /// rediscover) or if another session already holds the lock.
    pub fn open(&self, handle: DisplayRefHandle) -> Result<DisplayHandle, ErrorInfo> {
        const CALL_SITE: &str = "MonitorRegistry::open";
        let display = self.registry.resolve(handle).ok_or_else(|| {
            let err = ErrorInfo::new(
                DdcStatus::InvalidArgument,
                CALL_SITE,
                "display handle no longer resolves",
            );
            set_last_error(err.clone());
            err
        })?;
        let guard = display.try_lock().ok_or_else(|| {
            let err = ErrorInfo::new(
                DdcStatus::Busy,
                CALL_SITE,
                "display already has an open handle",
            );
            set_last_error(err.clone());
            err
        })?;
        Ok(DisplayHandle { handle, guard })
    }

    /// The VCP operations facade (§4.J), scoped to this registry's config.
    pub fn vcp(&self) -> VcpService<'_> {
        VcpService::new(&self.config)
    }

    /// Positive dispnos in iteration order for refs whose
    /// `COMMUNICATION_WORKING` bit is set; sentinels for BUSY/INVALID
    /// otherwise (§4.I). Phantom assignment happens during filtering,
    /// not here.
    fn assign_dispnos(&self) {
        let mut next = 1;
        for handle in self.registry.handles() {
            let Some(display) = self.registry.resolve(handle) else {
                continue;
            };
            let flags = display.flags();
            if flags.contains(DisplayFlags::PHANTOM) {
                display.set_dispno(DISPNO_PHANTOM);
            } else if flags.contains(DisplayFlags::COMMUNICATION_WORKING) {
                display.set_dispno(next);
                next += 1;
            } else if flags.contains(DisplayFlags::DDC_BUSY) {
                display.set_dispno(DISPNO_BUSY);
            } else {
                display.set_dispno(DISPNO_INVALID);
            }
        }
    }

    /// §4.G driver: runs the probe → classify → set-flags state machine
    /// against every display not yet checked, fanned out per §4.H.
    fn run_initial_checks(&self) {
        scan_all(&self.registry, &self.config, |handle| {
            let Some(display) = self.registry.resolve(handle) else {
                return;
            };
            if display.flags().contains(DisplayFlags::DDC_COMMUNICATION_CHECKED) {
                return;
            }
            run_initial_checks_one(&display, &self.config);
        });
    }
}

impl Drop for MonitorRegistry {
    /// §5 "DSA persistent state file — written at process shutdown".
    fn drop(&mut self) {
        self.persist_sleep_state();
    }
}

/// Probe one VCP feature through the same retry/DSA machinery
/// [`ddc::VcpService::get_nontable`] uses, returning the raw VCP value
/// (or whatever [`DdcStatus`] the retry classifier settled on). Initial
/// checks runs before a display has a [`DisplayHandle`] to serialise
/// against, so it talks to the registry's [`DisplayRef`] directly rather
/// than through the façade — but it still needs retries to distinguish
/// DDC-busy and heterogeneous-failure from a clean one-shot outcome,
/// which is why this does not simply call `ddc::exchange` once.
///
/// `open` is the transport factory; production callers always pass
/// [`crate::ddc::open_transport`] (see [`probe_feature`]), tests
/// substitute a mock so the whole retry/classify pipeline runs against
/// canned replies instead of a real bus.
fn probe_feature_with(
    display: &DisplayRef,
    config: &Config,
    feature_code: u8,
    open: &dyn Fn() -> Result<Box<dyn crate::transport::Transport>, DdcOpError>,
) -> Result<u32, ErrorInfo> {
    const CALL_SITE: &str = "initial_checks::probe_feature";
    let max_tries = config.max_tries.for_class(OpClass::WriteRead);
    let (after_write, before_read) = display
        .with_sleep_data(|sd| (sd.sleep_duration(SleepClass::AfterWrite), sd.sleep_duration(SleepClass::BeforeRead)));

    display.with_try_stats(OpClass::WriteRead, |stats| {
        display.with_sleep_data(|sleep_data| {
            crate::retry::retry_loop(
                OpClass::WriteRead,
                max_tries,
                CALL_SITE,
                sleep_data,
                SleepClass::AfterRead,
                stats,
                |_try_number| {
                    let mut transport = open()?;
                    let request = DdcCiMessage::from_opcode(DdcOpcode::VcpRequest)
                        .set_vcp_feature(feature_code.into());
                    let reply = crate::ddc::exchange(
                        transport.as_mut(),
                        &request,
                        after_write,
                        before_read,
                        crate::ddc::I2C_DDC_RECV_BUFFER_SIZE,
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

fn probe_feature(display: &DisplayRef, config: &Config, feature_code: u8) -> Result<u32, ErrorInfo> {
    probe_feature_with(display, config, feature_code, &|| {
        crate::ddc::open_transport(display.transport_detail())
    })
}

/// Drive [`initial_checks`]'s state machine to completion for one
/// display and write the resulting flags (and MCCS version, if learned)
/// back onto it (§4.G). See [`run_initial_checks_one_with`] for the
/// transport-injectable version this delegates to.
fn run_initial_checks_one(display: &Arc<DisplayRef>, config: &Config) {
    run_initial_checks_one_with(display, config, &|| {
        crate::ddc::open_transport(display.transport_detail())
    })
}

fn run_initial_checks_one_with(
    display: &Arc<DisplayRef>,
    config: &Config,
    open: &dyn Fn() -> Result<Box<dyn crate::transport::Transport>, DdcOpError>,
) {
    let mut state = InitialCheckState::Start;
    let mut evidence = InitialCheckEvidence::default();

    loop {
        state = match state {
            InitialCheckState::Start => {
                let result = probe_feature_with(display, config, PROBE_INITIAL_FEATURE, open);
                advance(state, classify_probe(&result), &mut evidence)
            }
            InitialCheckState::ProbeKnownFeature => {
                let result = probe_feature_with(display, config, PROBE_EXPECTED_FEATURE, open);
                advance(state, classify_probe(&result), &mut evidence)
            }
            InitialCheckState::ProbeZeroPattern => {
                let result = probe_feature_with(display, config, PROBE_UNSUPPORTED_FEATURE, open);
                advance(state, classify_probe(&result), &mut evidence)
            }
            InitialCheckState::QueryMccsVersion => {
                if evidence.communication_working {
                    if let Ok(raw) = probe_feature_with(display, config, MCCS_VERSION_FEATURE, open) {
                        display.set_mccs_version(Version::new((raw >> 8) as u8, raw as u8));
                    }
                }
                InitialCheckState::Done
            }
            InitialCheckState::Done => break,
        };
    }

    display.set_flags(evidence.into_flags());
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{EdidId, IoPath, TransportDetail};
    use crate::transport::Transport;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Clone)]
    enum MockReply {
        Message(Vec<u8>),
        Busy,
    }

    /// Canned per-feature replies, keyed by VCP feature code, consumed by
    /// [`run_initial_checks_one_with`] through a fresh [`MockTransport`]
    /// per retry attempt — enough to drive the real state machine end to
    /// end without a real I²C bus.
    struct MockTransport {
        replies: Rc<RefCell<HashMap<u8, MockReply>>>,
        last_feature: Option<u8>,
    }

    impl Transport for MockTransport {
        fn transmit(&mut self, _addr: u8, data: &[u8]) -> Result<(), DdcOpError> {
            // request layout: [sender, length|prefix, opcode, vcp_feature, checksum]
            self.last_feature = data.get(3).copied();
            Ok(())
        }

        fn receive(&mut self, _addr: u8, _len: usize) -> Result<Vec<u8>, DdcOpError> {
            let feature = self.last_feature.expect("transmit must precede receive");
            match self.replies.borrow().get(&feature) {
                Some(MockReply::Message(bytes)) => Ok(bytes.clone()),
                Some(MockReply::Busy) => Err(DdcOpError::Busy("mock bus busy".into())),
                None => Err(DdcOpError::NullResponse),
            }
        }

        fn delay(&self, _d: Duration) {}

        fn path(&self) -> &str {
            "mock"
        }
    }

    fn vcp_reply_bytes(result_code: u8, feature: u8, value: u32) -> Vec<u8> {
        let bytes = [
            result_code,
            feature,
            0x00,
            (value >> 24) as u8,
            (value >> 16) as u8,
            (value >> 8) as u8,
            value as u8,
        ];
        // `exchange` prepends the target byte itself (derived from the
        // request address) before parsing, so the mock hands back exactly
        // what transmit_buffer() produces: sender, length, payload, checksum.
        DdcCiMessage::from_opcode(DdcOpcode::VcpReply)
            .set_data(&bytes)
            .unwrap()
            .transmit_buffer()
    }

    fn new_display() -> Arc<DisplayRef> {
        Arc::new(DisplayRef::new(
            IoPath::I2c { sysnum: 9 },
            TransportDetail::I2c {
                sysnum: 9,
                force_slave_address: false,
            },
            Some(EdidId {
                mfg_id: ['A', 'C', 'I'],
                model: 1,
                serial: 1,
            }),
        ))
    }

    fn run_with_replies(display: &Arc<DisplayRef>, replies: HashMap<u8, MockReply>) {
        let config = Config::default();
        let replies = Rc::new(RefCell::new(replies));
        run_initial_checks_one_with(display, &config, &move || {
            Ok(Box::new(MockTransport {
                replies: Rc::clone(&replies),
                last_feature: None,
            }) as Box<dyn Transport>)
        });
    }

    #[test]
    fn feature_0x00_answering_unsupported_sets_ddc_flag_immediately() {
        let display = new_display();
        let mut replies = HashMap::new();
        replies.insert(0x00, MockReply::Message(vcp_reply_bytes(0x01, 0x00, 0)));
        replies.insert(0xdf, MockReply::Message(vcp_reply_bytes(0x00, 0xdf, 0x0201)));
        run_with_replies(&display, replies);

        let flags = display.flags();
        assert!(flags.contains(DisplayFlags::COMMUNICATION_WORKING));
        assert!(flags.contains(DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED));
        assert_eq!(display.mccs_version(), Some(Version::new(2, 1)));
    }

    #[test]
    fn feature_0x00_busy_marks_ddc_busy_and_not_working() {
        let display = new_display();
        let mut replies = HashMap::new();
        replies.insert(0x00, MockReply::Busy);
        run_with_replies(&display, replies);

        let flags = display.flags();
        assert!(flags.contains(DisplayFlags::DDC_BUSY));
        assert!(!flags.contains(DisplayFlags::COMMUNICATION_WORKING));
    }

    #[test]
    fn feature_0x00_null_falls_through_to_brightness_then_marks_null_response_flavor() {
        let display = new_display();
        let mut replies = HashMap::new();
        // 0x00 absent from the map => every attempt gets NullResponse,
        // which retry_loop aggregates into AllResponsesNull.
        replies.insert(0x10, MockReply::Message(vcp_reply_bytes(0x00, 0x10, 50)));
        replies.insert(0xdf, MockReply::Message(vcp_reply_bytes(0x00, 0xdf, 0x0201)));
        run_with_replies(&display, replies);

        let flags = display.flags();
        assert!(flags.contains(DisplayFlags::COMMUNICATION_WORKING));
        assert!(flags.contains(DisplayFlags::USES_NULL_RESPONSE_FOR_UNSUPPORTED));
    }
}
