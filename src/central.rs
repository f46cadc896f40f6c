//! Peripheral registry and radio callback entry point.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::scan::{Queued, ScanSession};
use crate::stream::Subscribers;
use crate::*;

/// Stream of radio state changes.
pub type AdapterStates = EventStream<AdapterState>;

/// Central role engine. Owns one [`Session`] per known peripheral and
/// dispatches radio callbacks to them.
#[derive(Debug)]
pub struct Central<R: Radio>(Arc<Inner<R>>);

impl<R: Radio> Clone for Central<R> {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

#[derive(Debug)]
struct Inner<R: Radio> {
    radio: Arc<R>,
    cfg: Arc<Config>,
    adapter: SyncMutex<Adapter>,
    sessions: SyncMutex<BTreeMap<DeviceId, Session<R>>>,
}

/// Radio state and the scan session.
#[derive(Debug)]
struct Adapter {
    state: AdapterState,
    subs: Subscribers<AdapterState>,
    scan: ScanSession,
}

impl<R: Radio> Central<R> {
    /// Creates a new engine using the specified radio adapter.
    #[must_use]
    pub fn new(radio: R, cfg: Config) -> Self {
        let state = radio.state();
        debug!("Radio state: {state:?}");
        Self(Arc::new(Inner {
            radio: Arc::new(radio),
            cfg: Arc::new(cfg),
            adapter: SyncMutex::new(Adapter {
                state,
                subs: Subscribers::default(),
                scan: ScanSession::default(),
            }),
            sessions: SyncMutex::new(BTreeMap::new()),
        }))
    }

    /// Returns the radio adapter.
    #[inline(always)]
    #[must_use]
    pub fn radio(&self) -> &R {
        &self.0.radio
    }

    /// Returns the engine configuration.
    #[inline(always)]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.0.cfg
    }

    /// Returns the current radio state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> AdapterState {
        self.0.radio.state()
    }

    /// Returns a stream of radio state changes. If `emit_current` is set, the
    /// current state is delivered first.
    pub fn adapter_states(&self, emit_current: bool) -> AdapterStates {
        let mut a = self.0.adapter.lock();
        let cur = emit_current.then_some(a.state);
        a.subs.subscribe(cur)
    }

    /// Returns the session for the specified peripheral, creating it if
    /// necessary. The platform handle is resolved when connecting.
    pub fn peripheral(&self, id: &DeviceId) -> Session<R> {
        (self.0.sessions.lock().entry(id.clone()))
            .or_insert_with(|| self.new_session(id.clone(), None))
            .clone()
    }

    /// Returns an existing session.
    #[inline]
    #[must_use]
    pub fn get(&self, id: &DeviceId) -> Option<Session<R>> {
        self.0.sessions.lock().get(id).cloned()
    }

    /// Returns sessions for the listed peripherals that are either already
    /// known or can be resolved by the radio adapter without scanning.
    pub fn known_peripherals(&self, ids: &[DeviceId]) -> Vec<Session<R>> {
        let mut v = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(s) = self.get(id) {
                v.push(s);
                continue;
            }
            let Some(p) = self.0.radio.resolve(id) else {
                debug!("{id}: not known to the radio");
                continue;
            };
            let s = (self.0.sessions.lock().entry(id.clone()))
                .or_insert_with(|| self.new_session(id.clone(), Some(p)))
                .clone();
            v.push(s);
        }
        v
    }

    /// Returns the connected peripherals that expose at least one of the
    /// listed services. An empty list matches every connected peripheral.
    pub fn connected_peripherals(&self, services: &[Uuid]) -> Vec<Session<R>> {
        let all: Vec<Session<R>> = self.0.sessions.lock().values().cloned().collect();
        (all.into_iter())
            .filter(|s| s.is_connected() && s.has_any_service(services))
            .collect()
    }

    /// Evicts a peripheral from the registry. Its pending operations fail
    /// with [`Error::OperationCancelled`], its streams end, and a connected
    /// peripheral is disconnected. Returns whether the peripheral was known.
    pub fn remove(&self, id: &DeviceId) -> bool {
        let s = self.0.sessions.lock().remove(id);
        s.map_or(false, |s| {
            s.evict();
            true
        })
    }

    /// Stops scanning and evicts all peripherals.
    pub fn shutdown(&self) {
        if let Err(e) = self.stop_scan() {
            warn!("Failed to stop scan on shutdown: {e}");
        }
        let all = std::mem::take(&mut *self.0.sessions.lock());
        debug!("Shutting down ({} peripherals)", all.len());
        for s in all.into_values() {
            s.evict();
        }
        self.0.adapter.lock().subs.close();
    }

    /// Starts scanning for peripherals. If the radio is not powered on yet,
    /// the request is queued and issued once it is. Returns a stream of
    /// sightings that ends when the scan is stopped.
    pub fn start_scan(&self, opts: ScanOptions) -> Result<ScanResults> {
        let state = self.0.radio.state();
        let (issue, results) = {
            let mut a = self.0.adapter.lock();
            let issue = a.scan.request_start(state, opts)?;
            (issue, a.scan.subscribe())
        };
        if let Some(opts) = issue {
            self.issue_start(opts)?;
        }
        Ok(results)
    }

    /// Stops scanning. Succeeds without radio I/O if no scan is active, and
    /// cancels a queued start.
    pub fn stop_scan(&self) -> Result<()> {
        let state = self.0.radio.state();
        let issue = self.0.adapter.lock().scan.request_stop(state);
        if issue {
            self.issue_stop()?;
        }
        Ok(())
    }

    /// Returns an additional stream of sightings for the current scan.
    #[inline]
    pub fn scan_results(&self) -> ScanResults {
        self.0.adapter.lock().scan.subscribe()
    }

    /// Returns whether the radio is scanning.
    #[inline]
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.0.adapter.lock().scan.is_scanning()
    }

    /// Handles a radio callback. This is the only entry point for platform
    /// events and may be called from any thread, including from within a
    /// [`Radio`] method.
    pub fn handle(&self, ev: RadioEvent<R::Peripheral>) {
        match ev {
            RadioEvent::AdapterStateChanged(s) => self.on_adapter_state(s),
            RadioEvent::ScanFailed(status) => {
                warn!("Scan failed with status {status}");
                self.0.adapter.lock().scan.stopped();
            }
            RadioEvent::Discovered {
                id,
                peripheral,
                name,
                rssi,
                adv,
            } => {
                trace!("Sighted {id} ({rssi} dBm)");
                let s = self.get(&id).unwrap_or_else(|| {
                    (self.0.sessions.lock().entry(id.clone()))
                        .or_insert_with(|| self.new_session(id.clone(), None))
                        .clone()
                });
                s.on_sighting(peripheral, name.clone(), rssi);
                let r = ScanResult {
                    id,
                    name,
                    rssi,
                    adv,
                };
                self.0.adapter.lock().scan.sighting(&r);
            }
            ev => {
                let Some(id) = ev.device().cloned() else { return };
                match self.get(&id) {
                    Some(s) => s.handle(ev),
                    None => warn!("Dropping event for unknown peripheral {id}"),
                }
            }
        }
    }

    fn on_adapter_state(&self, s: AdapterState) {
        let (prev, replay) = {
            let mut a = self.0.adapter.lock();
            let prev = std::mem::replace(&mut a.state, s);
            if prev == s {
                return;
            }
            a.subs.send(&s);
            let replay = if s == AdapterState::PoweredOn {
                a.scan.on_powered_on()
            } else {
                if prev == AdapterState::PoweredOn {
                    a.scan.on_powered_off();
                }
                None
            };
            (prev, replay)
        };
        debug!("Radio state: {prev:?} -> {s:?}");
        if prev == AdapterState::PoweredOn {
            let all: Vec<Session<R>> = self.0.sessions.lock().values().cloned().collect();
            for s in all {
                s.on_radio_off();
            }
        }
        let r = match replay {
            Some(Queued::Start(opts)) => self.issue_start(opts),
            Some(Queued::Stop) => self.issue_stop(),
            None => Ok(()),
        };
        if let Err(e) = r {
            warn!("Failed to replay queued scan request: {e}");
        }
    }

    fn issue_start(&self, opts: ScanOptions) -> Result<()> {
        // Recorded first so that a failure reported from within the radio
        // call is not overwritten
        self.0.adapter.lock().scan.started(opts.clone());
        if let Err(e) = self.0.radio.start_scan(&opts) {
            warn!("Scan start rejected: {e}");
            self.0.adapter.lock().scan.stopped();
            return Err(e);
        }
        debug!("Scan started");
        Ok(())
    }

    fn issue_stop(&self) -> Result<()> {
        let r = self.0.radio.stop_scan();
        self.0.adapter.lock().scan.stopped();
        match r {
            Ok(()) => debug!("Scan stopped"),
            Err(ref e) => warn!("Scan stop rejected: {e}"),
        }
        r
    }

    #[inline]
    fn new_session(&self, id: DeviceId, p: Option<R::Peripheral>) -> Session<R> {
        trace!("New session for {id}");
        Session::new(id, Arc::clone(&self.0.radio), Arc::clone(&self.0.cfg), p)
    }
}
