//! Peripheral session: connection lifecycle and GATT operations.
//!
//! A [`Session`] exists for each peripheral referenced through
//! [`Central`](crate::Central). Its state is protected by a dedicated mutex
//! that is never held across an `.await` or a call into the radio adapter.
//! Every request that expects a callback opens a broker slot first and then
//! issues the platform primitive, so a synchronous callback always finds its
//! slot.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::broker::{Broker, Handle, Key};
use crate::gatt::{Cache, CharKey, CharNode, DescKey, Removed, ServiceKey};
use crate::radio::{CharacteristicInfo, ServiceInfo};
use crate::stream::Subscribers;
use crate::*;

mod attr;
mod discover;
mod event;

#[cfg(test)]
mod tests;

/// Peripheral connection state. Transitions are driven by radio callbacks;
/// the engine only moves to `Connecting` or `Disconnecting` once the platform
/// has accepted the corresponding request.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, serde::Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Stream of connection state transitions.
pub type ConnectionStates = EventStream<ConnectionState>;

/// Stream of characteristic values received via notifications or
/// indications.
pub type Notifications = EventStream<Vec<u8>>;

/// Session with one remote peripheral.
#[derive(Debug)]
pub struct Session<R: Radio>(Arc<Shared<R>>);

impl<R: Radio> Clone for Session<R> {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

#[derive(Debug)]
struct Shared<R: Radio> {
    id: DeviceId,
    radio: Arc<R>,
    cfg: Arc<Config>,
    st: SyncMutex<State<R::Peripheral>>,
    ops: Ops,
}

#[derive(Debug)]
struct State<P> {
    peripheral: Option<P>,
    conn: ConnectionState,
    cache: Cache,
    mtu: u16,
    rssi: Option<i16>,
    name: Option<String>,
    conn_subs: Subscribers<ConnectionState>,
    monitors: HashMap<CharKey, Subscribers<Vec<u8>>>,
    evicted: bool,
}

impl<P> State<P> {
    /// Updates the connection state, notifying subscribers of a change.
    fn set_conn(&mut self, id: &DeviceId, s: ConnectionState) {
        if self.conn != s {
            debug!("{id}: {:?} -> {s:?}", self.conn);
            self.conn = s;
            self.conn_subs.send(&s);
        }
    }

    /// Ends notification streams for characteristics that were removed.
    fn drop_monitors(&mut self, r: &Removed) {
        for k in &r.chars {
            self.monitors.remove(k);
        }
    }
}

/// Target of a pending operation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) enum Target {
    Device,
    Service(ServiceKey),
    Char(CharKey),
    Desc(DescKey),
}

impl Target {
    /// Returns whether the target was removed from the cache.
    fn is_in(self, r: &Removed) -> bool {
        match self {
            Self::Device => false,
            Self::Service(k) => r.services.contains(&k),
            Self::Char(k) => r.chars.contains(&k),
            Self::Desc(k) => r.descs.contains(&k),
        }
    }
}

/// Broker key identifying an (operation kind, target) pair.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct OpKey {
    kind: OpKind,
    target: Target,
}

impl OpKey {
    #[inline(always)]
    const fn new(kind: OpKind, target: Target) -> Self {
        Self { kind, target }
    }

    #[inline(always)]
    const fn device(kind: OpKind) -> Self {
        Self::new(kind, Target::Device)
    }
}

impl Key for OpKey {
    #[inline(always)]
    fn kind(&self) -> OpKind {
        self.kind
    }
}

/// Pending operations grouped by result type.
#[derive(Debug, Default)]
struct Ops {
    unit: Broker<OpKey, ()>,
    value: Broker<OpKey, Vec<u8>>,
    notify: Broker<OpKey, bool>,
    services: Broker<OpKey, Vec<ServiceInfo>>,
    chars: Broker<OpKey, Vec<CharacteristicInfo>>,
    descs: Broker<OpKey, Vec<Uuid>>,
    rssi: Broker<OpKey, i16>,
    mtu: Broker<OpKey, u16>,
}

impl Ops {
    fn len(&self) -> usize {
        self.unit.len()
            + self.value.len()
            + self.notify.len()
            + self.services.len()
            + self.chars.len()
            + self.descs.len()
            + self.rssi.len()
            + self.mtu.len()
    }

    fn fail_all(&self, err: impl Fn(&OpKey) -> Error) -> usize {
        let e = &err;
        self.unit.fail_all(e)
            + self.value.fail_all(e)
            + self.notify.fail_all(e)
            + self.services.fail_all(e)
            + self.chars.fail_all(e)
            + self.descs.fail_all(e)
            + self.rssi.fail_all(e)
            + self.mtu.fail_all(e)
    }

    fn fail_where(&self, pred: impl Fn(&OpKey) -> bool, err: impl Fn(&OpKey) -> Error) -> usize {
        let (p, e) = (&pred, &err);
        self.unit.fail_where(p, e)
            + self.value.fail_where(p, e)
            + self.notify.fail_where(p, e)
            + self.services.fail_where(p, e)
            + self.chars.fail_where(p, e)
            + self.descs.fail_where(p, e)
            + self.rssi.fail_where(p, e)
            + self.mtu.fail_where(p, e)
    }
}

impl<R: Radio> Session<R> {
    pub(crate) fn new(
        id: DeviceId,
        radio: Arc<R>,
        cfg: Arc<Config>,
        peripheral: Option<R::Peripheral>,
    ) -> Self {
        let mtu = cfg.default_mtu;
        Self(Arc::new(Shared {
            st: SyncMutex::new(State {
                peripheral,
                conn: ConnectionState::Disconnected,
                cache: Cache::new(id.clone()),
                mtu,
                rssi: None,
                name: None,
                conn_subs: Subscribers::default(),
                monitors: HashMap::new(),
                evicted: false,
            }),
            id,
            radio,
            cfg,
            ops: Ops::default(),
        }))
    }

    /// Returns the peripheral identifier.
    #[inline(always)]
    #[must_use]
    pub fn id(&self) -> &DeviceId {
        &self.0.id
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.0.st.lock().conn
    }

    /// Returns whether the peripheral is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the negotiated ATT MTU.
    #[inline]
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.0.st.lock().mtu
    }

    /// Returns the last RSSI reported by a scan or an RSSI read.
    #[inline]
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.0.st.lock().rssi
    }

    /// Returns the last advertised or reported name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.0.st.lock().name.clone()
    }

    /// Returns the number of operations awaiting a radio callback.
    #[inline]
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.0.ops.len()
    }

    /// Connects to the peripheral. A concurrent `connect()` supersedes this
    /// one, which then fails with [`Error::OperationCancelled`].
    pub async fn connect(&self, opts: ConnectOptions) -> Result<()> {
        self.0.radio.state().check()?;
        let (known, stale) = {
            let mut st = self.0.st.lock();
            if st.evicted {
                return Err(Error::DeviceNotFound(self.0.id.clone()));
            }
            if st.conn == ConnectionState::Connected {
                return Err(Error::DeviceAlreadyConnected(self.0.id.clone()));
            }
            let stale = opts.refresh_cache.then(|| {
                let r = st.cache.clear();
                st.drop_monitors(&r);
                r
            });
            (st.peripheral.clone(), stale)
        };
        if let Some(r) = stale {
            self.sweep(&r, |_| Error::OperationCancelled);
        }
        let p = match known {
            Some(p) => p,
            None => {
                let p = (self.0.radio.resolve(&self.0.id))
                    .ok_or_else(|| Error::DeviceNotFound(self.0.id.clone()))?;
                self.0.st.lock().peripheral = Some(p.clone());
                p
            }
        };
        let key = OpKey::device(OpKind::Connect);
        let t = (opts.timeout).unwrap_or(self.0.cfg.connect_timeout);
        let h = self.start_with(&self.0.ops.unit, key, t, |r| r.connect(&p, &opts))?;
        {
            let mut st = self.0.st.lock();
            if st.conn == ConnectionState::Disconnected {
                st.set_conn(&self.0.id, ConnectionState::Connecting);
            }
        }
        h.wait().await?;
        if let Some(mtu) = opts.mtu {
            if let Err(e) = self.request_mtu(mtu).await {
                warn!("{}: MTU request after connect failed: {e}", self.0.id);
            }
        }
        Ok(())
    }

    /// Disconnects from the peripheral. Succeeds immediately if already
    /// disconnected. A call made while a disconnect is in progress waits for
    /// that disconnect instead of issuing another one.
    pub async fn disconnect(&self) -> Result<()> {
        let (p, in_progress) = {
            let mut st = self.0.st.lock();
            match (st.conn, st.peripheral.clone()) {
                (ConnectionState::Disconnected, _) | (_, None) => return Ok(()),
                (ConnectionState::Disconnecting, _) => (None, Some(st.conn_subs.subscribe(None))),
                (_, p) => (p, None),
            }
        };
        if let Some(states) = in_progress {
            return self.disconnected(states).await;
        }
        let Some(p) = p else { return Ok(()) };
        let key = OpKey::device(OpKind::Disconnect);
        let h = self.start(&self.0.ops.unit, key, |r| r.disconnect(&p))?;
        {
            let mut st = self.0.st.lock();
            if matches!(
                st.conn,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                st.set_conn(&self.0.id, ConnectionState::Disconnecting);
            }
        }
        h.wait().await
    }

    /// Waits for the in-progress disconnect to complete.
    async fn disconnected(&self, mut states: ConnectionStates) -> Result<()> {
        let t = self.0.cfg.timeout(OpKind::Disconnect);
        let done = tokio::time::timeout(t, async {
            while let Some(s) = states.next().await {
                if s == ConnectionState::Disconnected {
                    return true;
                }
            }
            false
        });
        match done.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::OperationCancelled),
            Err(_) => Err(Error::OperationTimedOut(OpKind::Disconnect)),
        }
    }

    /// Returns a stream of connection state transitions. If `emit_current` is
    /// set, the current state is delivered first. The stream only ends when
    /// the session is evicted from the registry.
    pub fn connection_states(&self, emit_current: bool) -> ConnectionStates {
        let mut st = self.0.st.lock();
        let cur = emit_current.then_some(st.conn);
        st.conn_subs.subscribe(cur)
    }

    /// Reads the RSSI of the connected peripheral.
    pub async fn read_rssi(&self) -> Result<i16> {
        let p = self.ready()?;
        let key = OpKey::device(OpKind::ReadRssi);
        (self.start(&self.0.ops.rssi, key, |r| r.read_rssi(&p))?)
            .wait()
            .await
    }

    /// Requests a larger ATT MTU. Returns the negotiated MTU.
    pub async fn request_mtu(&self, mtu: u16) -> Result<u16> {
        let p = self.ready()?;
        let key = OpKey::device(OpKind::RequestMtu);
        (self.start(&self.0.ops.mtu, key, |r| r.request_mtu(&p, mtu))?)
            .wait()
            .await
    }

    /// Discards the GATT cache. Pending operations on cached attributes fail
    /// with [`Error::OperationCancelled`] and notification streams end.
    pub fn invalidate_cache(&self) {
        let r = {
            let mut st = self.0.st.lock();
            let r = st.cache.clear();
            st.drop_monitors(&r);
            r
        };
        debug!("{}: GATT cache cleared", self.0.id);
        self.sweep(&r, |_| Error::OperationCancelled);
    }

    /// Removes the session from service. Pending operations fail with
    /// [`Error::OperationCancelled`], all streams end, and a connected
    /// peripheral is disconnected without waiting for confirmation.
    pub(crate) fn evict(&self) {
        let p = {
            let mut st = self.0.st.lock();
            st.evicted = true;
            st.conn_subs.close();
            st.monitors.clear();
            (st.conn != ConnectionState::Disconnected)
                .then(|| st.peripheral.clone())
                .flatten()
        };
        let n = self.0.ops.fail_all(|_| Error::OperationCancelled);
        debug!("{}: evicted ({n} pending operations cancelled)", self.0.id);
        if let Some(p) = p {
            if let Err(e) = self.0.radio.disconnect(&p) {
                warn!("{}: disconnect on eviction failed: {e}", self.0.id);
            }
        }
    }

    /// Updates the platform handle and advertised details after a sighting.
    /// Connection state and the GATT cache are left untouched.
    pub(crate) fn on_sighting(&self, p: R::Peripheral, name: Option<String>, rssi: i16) {
        let mut st = self.0.st.lock();
        st.peripheral = Some(p);
        if name.is_some() {
            st.name = name;
        }
        st.rssi = Some(rssi);
    }

    /// Returns whether the peripheral exposes any of the listed services.
    pub(crate) fn has_any_service(&self, uuids: &[Uuid]) -> bool {
        let st = self.0.st.lock();
        uuids.is_empty() || uuids.iter().any(|&u| st.cache.service(u).is_ok())
    }

    /// Returns the platform handle if the session is connected.
    fn ready(&self) -> Result<R::Peripheral> {
        let st = self.0.st.lock();
        self.ready_locked(&st)
    }

    fn ready_locked(&self, st: &State<R::Peripheral>) -> Result<R::Peripheral> {
        if st.evicted {
            return Err(Error::DeviceNotFound(self.0.id.clone()));
        }
        match (st.conn, st.peripheral.as_ref()) {
            (ConnectionState::Connected, Some(p)) => Ok(p.clone()),
            _ => Err(Error::DeviceNotConnected(self.0.id.clone())),
        }
    }

    /// Opens a broker slot for `key` and issues the platform request.
    #[inline]
    fn start<T>(
        &self,
        b: &Broker<OpKey, T>,
        key: OpKey,
        f: impl FnOnce(&R) -> Result<()>,
    ) -> Result<Handle<OpKey, T>> {
        self.start_with(b, key, self.0.cfg.timeout(key.kind), f)
    }

    fn start_with<T>(
        &self,
        b: &Broker<OpKey, T>,
        key: OpKey,
        timeout: Duration,
        f: impl FnOnce(&R) -> Result<()>,
    ) -> Result<Handle<OpKey, T>> {
        let h = b.begin(key, timeout);
        match f(&self.0.radio) {
            Ok(()) => Ok(h),
            Err(e) => {
                warn!("{}: {} rejected: {e}", self.0.id, key.kind);
                Err(e)
            }
        }
    }

    /// Fails pending operations on attributes that were removed from the
    /// cache.
    fn sweep(&self, r: &Removed, err: impl Fn(&OpKey) -> Error) -> usize {
        if r.is_empty() {
            return 0;
        }
        self.0.ops.fail_where(|k| k.target.is_in(r), err)
    }
}
