//! Scan session.
//!
//! Scan requests made while the radio is not powered on are queued and
//! replayed once it is. At most one start and one stop are queued; a stop
//! cancels a queued start.

use tracing::debug;

use crate::stream::Subscribers;
use crate::*;

/// Peripheral sighting.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct ScanResult {
    pub id: DeviceId,
    pub name: Option<String>,
    pub rssi: i16,
    pub adv: AdvertisementData,
}

/// Stream of peripheral sightings. The stream ends when the scan is stopped.
pub type ScanResults = EventStream<ScanResult>;

/// Scan request waiting for the radio to power on.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum Queued {
    Start(ScanOptions),
    Stop,
}

#[derive(Debug, Default)]
pub(crate) struct ScanSession {
    active: Option<ScanOptions>,
    queued: Option<Queued>,
    subs: Subscribers<ScanResult>,
}

impl ScanSession {
    /// Handles a start request. Returns the options to issue to the radio
    /// now, or `None` if the request was queued.
    pub fn request_start(
        &mut self,
        state: AdapterState,
        opts: ScanOptions,
    ) -> Result<Option<ScanOptions>> {
        if state == AdapterState::PoweredOn {
            self.queued = None;
            return Ok(Some(opts));
        }
        if !state.is_transient() {
            state.check()?;
        }
        debug!("Scan start queued until the radio is powered on ({state:?})");
        self.queued = Some(Queued::Start(opts));
        Ok(None)
    }

    /// Handles a stop request and ends all result streams. Returns whether a
    /// stop must be issued to the radio now.
    pub fn request_stop(&mut self, state: AdapterState) -> bool {
        self.subs.close();
        if state == AdapterState::PoweredOn {
            self.queued = None;
            return self.active.is_some();
        }
        match self.queued.take() {
            Some(Queued::Start(_)) => debug!("Queued scan start cancelled"),
            _ if self.active.is_some() => {
                debug!("Scan stop queued until the radio is powered on ({state:?})");
                self.queued = Some(Queued::Stop);
            }
            _ => {}
        }
        false
    }

    /// Returns the request to replay after the radio powers on. A queued stop
    /// is only replayed if a scan is active.
    pub fn on_powered_on(&mut self) -> Option<Queued> {
        match self.queued.take() {
            Some(Queued::Stop) if self.active.is_none() => None,
            q => q,
        }
    }

    /// Records that the radio stopped scanning because it was powered off. An
    /// active scan is queued to resume unless a stop was requested.
    pub fn on_powered_off(&mut self) {
        let Some(opts) = self.active.take() else { return };
        if self.queued.is_none() {
            debug!("Scan will resume when the radio is powered on");
            self.queued = Some(Queued::Start(opts));
        } else if self.queued == Some(Queued::Stop) {
            self.queued = None;
        }
    }

    /// Records that the radio accepted a start request.
    #[inline]
    pub fn started(&mut self, opts: ScanOptions) {
        self.active = Some(opts);
    }

    /// Records that scanning stopped and ends all result streams.
    #[inline]
    pub fn stopped(&mut self) {
        self.active = None;
        self.subs.close();
    }

    #[inline]
    #[must_use]
    pub const fn is_scanning(&self) -> bool {
        self.active.is_some()
    }

    /// Returns a new result stream.
    #[inline]
    pub fn subscribe(&mut self) -> ScanResults {
        self.subs.subscribe(None)
    }

    /// Delivers a sighting to all result streams.
    #[inline]
    pub fn sighting(&mut self, r: &ScanResult) {
        self.subs.send(r);
    }
}

#[cfg(test)]
mod tests {
    use matches::assert_matches;

    use super::*;
    use AdapterState::*;

    fn opts(allow_duplicates: bool) -> ScanOptions {
        ScanOptions {
            allow_duplicates,
            ..ScanOptions::default()
        }
    }

    #[test]
    fn immediate() {
        let mut s = ScanSession::default();
        assert_eq!(s.request_start(PoweredOn, opts(false)), Ok(Some(opts(false))));
        s.started(opts(false));
        assert!(s.is_scanning());
        assert!(s.request_stop(PoweredOn));
        s.stopped();
        assert!(!s.request_stop(PoweredOn));
    }

    #[test]
    fn unusable() {
        let mut s = ScanSession::default();
        assert_matches!(s.request_start(Unauthorized, opts(false)), Err(Error::BluetoothUnauthorized));
        assert_matches!(s.request_start(Unsupported, opts(false)), Err(Error::BluetoothUnsupported));
        assert_eq!(s.on_powered_on(), None);
    }

    #[test]
    fn queued_start_replaced() {
        let mut s = ScanSession::default();
        assert_eq!(s.request_start(PoweredOff, opts(false)), Ok(None));
        assert_eq!(s.request_start(Resetting, opts(true)), Ok(None));
        assert_eq!(s.on_powered_on(), Some(Queued::Start(opts(true))));
        assert_eq!(s.on_powered_on(), None);
    }

    #[test]
    fn queued_stop_cancels_start() {
        let mut s = ScanSession::default();
        s.request_start(Unknown, opts(false)).unwrap();
        assert!(!s.request_stop(Unknown));
        assert_eq!(s.on_powered_on(), None);
    }

    #[test]
    fn resume_after_power_cycle() {
        let mut s = ScanSession::default();
        let mut results = s.subscribe();
        s.started(opts(false));
        s.on_powered_off();
        assert!(!s.is_scanning());
        assert_eq!(s.on_powered_on(), Some(Queued::Start(opts(false))));

        s.started(opts(false));
        assert!(!s.request_stop(PoweredOff));
        s.on_powered_off();
        assert_eq!(s.on_powered_on(), None);
        assert_eq!(results.try_next(), None);
    }
}
