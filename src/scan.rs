//! Async scan coordinator (§4.H). Discovery and initial checks touch one
//! display at a time, so scanning many displays sequentially is mostly
//! idle wall-clock time; this fans the work out over a small thread pool
//! instead, matching the teacher's synchronous-I/O model rather than
//! reaching for an async runtime it otherwise never uses.

use std::sync::Arc;

use log::{debug, info};

use crate::config::Config;
use crate::registry::{DisplayRefHandle, Registry};

/// Run `check` once per handle, fanning out across threads only when the
/// candidate count meets `async_threshold` (§4.H); below that, sequential
/// scanning avoids paying thread-spawn overhead for one or two displays.
pub fn scan_all<F>(registry: &Registry, config: &Config, check: F)
where
    F: Fn(DisplayRefHandle) + Sync,
{
    let handles = registry.handles();
    if handles.len() < config.async_threshold {
        debug!("scan: {} candidates, below async threshold, scanning sequentially", handles.len());
        for handle in handles {
            check(handle);
        }
        return;
    }

    info!("scan: fanning {} candidates out across a thread pool", handles.len());
    let pool_size = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(handles.len());
    let check = Arc::new(check);

    // §4.H: several workers tracing probes at once is unreadable, so drop
    // to 'normal' for the duration of the fan-out and restore whatever the
    // caller had on the way out.
    let _verbosity = VerbosityGuard::engage();

    std::thread::scope(|scope| {
        let chunks: Vec<&[DisplayRefHandle]> = handles.chunks(handles.len().div_ceil(pool_size)).collect();
        for chunk in chunks {
            let check = Arc::clone(&check);
            scope.spawn(move || {
                for &handle in chunk {
                    check(handle);
                }
            });
        }
    });
}

/// Temporarily caps the global `log` verbosity at `Info` for the
/// duration of a multi-worker fan-out, restoring the previous level on
/// drop so the reduction never leaks past one `scan_all` call (§9).
struct VerbosityGuard {
    previous: log::LevelFilter,
}

impl VerbosityGuard {
    fn engage() -> Self {
        let previous = log::max_level();
        if previous > log::LevelFilter::Info {
            log::set_max_level(log::LevelFilter::Info);
        }
        Self { previous }
    }
}

impl Drop for VerbosityGuard {
    fn drop(&mut self) {
        log::set_max_level(self.previous);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::registry::{DisplayRef, IoPath, TransportDetail};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn scan_all_visits_every_handle() {
        let registry = Registry::new();
        for sysnum in 0..8 {
            registry.insert(DisplayRef::new(
                IoPath::I2c { sysnum },
                TransportDetail::I2c {
                    sysnum,
                    force_slave_address: false,
                },
                None,
            ));
        }
        let mut config = Config::default();
        config.async_threshold = 2;
        let visited = AtomicUsize::new(0);
        scan_all(&registry, &config, |_handle| {
            visited.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(visited.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn scan_all_sequential_below_threshold() {
        let registry = Registry::new();
        registry.insert(DisplayRef::new(
            IoPath::I2c { sysnum: 0 },
            TransportDetail::I2c {
                sysnum: 0,
                force_slave_address: false,
            },
            None,
        ));
        let config = Config::default();
        let visited = AtomicUsize::new(0);
        scan_all(&registry, &config, |_handle| {
            visited.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(visited.load(Ordering::Relaxed), 1);
    }
}
