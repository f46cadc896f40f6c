use tracing::trace;

use super::*;

impl<R: Radio> Session<R> {
    /// Applies a radio callback addressed to this peripheral. Callbacks that
    /// refer to attributes no longer in the cache, or that match no pending
    /// operation, are dropped.
    pub(crate) fn handle(&self, ev: RadioEvent<R::Peripheral>) {
        use RadioEvent::*;
        let ops = &self.0.ops;
        match ev {
            AdapterStateChanged(_) | ScanFailed(_) => {}
            Discovered {
                peripheral,
                name,
                rssi,
                ..
            } => self.on_sighting(peripheral, name, rssi),
            Connected(_) => {
                {
                    let mut st = self.0.st.lock();
                    if st.evicted {
                        return;
                    }
                    st.mtu = self.0.cfg.default_mtu;
                    st.set_conn(&self.0.id, ConnectionState::Connected);
                }
                ops.unit.complete(&OpKey::device(OpKind::Connect), Ok(()));
            }
            ConnectionFailed { status, .. } => {
                debug!("{}: connection failed with status {status}", self.0.id);
                let op = OpKind::Connect;
                let key = OpKey::device(op);
                ops.unit.complete(&key, Err(Error::OperationFailed { op, status }));
                self.on_disconnected();
            }
            Disconnected { status, .. } => {
                if let Some(status) = status {
                    let op = OpKind::Connect;
                    let key = OpKey::device(op);
                    ops.unit.complete(&key, Err(Error::OperationFailed { op, status }));
                }
                self.on_disconnected();
            }
            ServicesDiscovered { result, .. } => {
                let op = OpKind::DiscoverServices;
                ops.services.complete(&OpKey::device(op), failed(op, result));
            }
            IncludedServicesDiscovered {
                service, result, ..
            } => {
                let op = OpKind::DiscoverIncludedServices;
                if let Some(s) = self.lookup(|c| c.service(service)) {
                    let key = OpKey::new(op, Target::Service(s));
                    ops.services.complete(&key, failed(op, result));
                }
            }
            CharacteristicsDiscovered {
                service, result, ..
            } => {
                let op = OpKind::DiscoverCharacteristics;
                if let Some(s) = self.lookup(|c| c.service(service)) {
                    let key = OpKey::new(op, Target::Service(s));
                    ops.chars.complete(&key, failed(op, result));
                }
            }
            DescriptorsDiscovered { chr, result, .. } => {
                let op = OpKind::DiscoverDescriptors;
                if let Some(c) = self.lookup(|c| c.resolve_char(chr)) {
                    ops.descs.complete(&OpKey::new(op, Target::Char(c)), failed(op, result));
                }
            }
            CharacteristicRead { chr, result, .. } => {
                let op = OpKind::ReadCharacteristic;
                let c = {
                    let mut st = self.0.st.lock();
                    let Some(c) = found(st.cache.resolve_char(chr)) else {
                        return;
                    };
                    if let (Ok(v), Some(n)) = (&result, st.cache.char_node_mut(c)) {
                        n.value = Some(v.clone());
                    }
                    c
                };
                ops.value.complete(&OpKey::new(op, Target::Char(c)), failed(op, result));
            }
            CharacteristicChanged { chr, value, .. } => {
                let mut st = self.0.st.lock();
                let Some(c) = found(st.cache.resolve_char(chr)) else {
                    return;
                };
                if let Some(subs) = st.monitors.get_mut(&c) {
                    subs.send(&value);
                }
                if let Some(n) = st.cache.char_node_mut(c) {
                    n.value = Some(value);
                }
            }
            CharacteristicWritten { chr, result, .. } => {
                let op = OpKind::WriteCharacteristic;
                if let Some(c) = self.lookup(|c| c.resolve_char(chr)) {
                    ops.unit.complete(&OpKey::new(op, Target::Char(c)), failed(op, result));
                }
            }
            NotifyStateChanged { chr, result, .. } => {
                let op = OpKind::SetNotify;
                let c = {
                    let mut st = self.0.st.lock();
                    let Some(c) = found(st.cache.resolve_char(chr)) else {
                        return;
                    };
                    if let Ok(enabled) = result {
                        if let Some(n) = st.cache.char_node_mut(c) {
                            n.notifying = enabled;
                        }
                        if !enabled {
                            st.monitors.remove(&c);
                        }
                    }
                    c
                };
                ops.notify.complete(&OpKey::new(op, Target::Char(c)), failed(op, result));
            }
            DescriptorRead { desc, result, .. } => {
                let op = OpKind::ReadDescriptor;
                let d = {
                    let mut st = self.0.st.lock();
                    let Some(d) = found(st.cache.resolve_desc(desc)) else {
                        return;
                    };
                    if let (Ok(v), Some(n)) = (&result, st.cache.desc_node_mut(d)) {
                        n.value = Some(v.clone());
                    }
                    d
                };
                ops.value.complete(&OpKey::new(op, Target::Desc(d)), failed(op, result));
            }
            DescriptorWritten { desc, result, .. } => {
                let op = OpKind::WriteDescriptor;
                if let Some(d) = self.lookup(|c| c.resolve_desc(desc)) {
                    ops.unit.complete(&OpKey::new(op, Target::Desc(d)), failed(op, result));
                }
            }
            ServicesInvalidated { services, .. } => {
                for uuid in services {
                    let r = {
                        let mut st = self.0.st.lock();
                        let r = st.cache.remove_service(uuid);
                        st.drop_monitors(&r);
                        r
                    };
                    let n = self.sweep(&r, |_| Error::ServiceInvalidated(uuid));
                    debug!("{}: service {uuid} invalidated ({n} operations failed)", self.0.id);
                }
            }
            RssiRead { result, .. } => {
                let op = OpKind::ReadRssi;
                if let Ok(v) = result {
                    self.0.st.lock().rssi = Some(v);
                }
                ops.rssi.complete(&OpKey::device(op), failed(op, result));
            }
            MtuChanged { result, .. } => {
                let op = OpKind::RequestMtu;
                if let Ok(v) = result {
                    self.0.st.lock().mtu = v;
                }
                ops.mtu.complete(&OpKey::device(op), failed(op, result));
            }
        }
    }

    /// Moves the session to `Disconnected` after the radio was powered off.
    pub(crate) fn on_radio_off(&self) {
        self.on_disconnected();
    }

    /// Completes a pending disconnect and fails every other pending operation
    /// with [`Error::DeviceDisconnected`]. Notification streams end and a new
    /// connection starts with notifications disabled.
    fn on_disconnected(&self) {
        {
            let mut st = self.0.st.lock();
            st.set_conn(&self.0.id, ConnectionState::Disconnected);
            st.monitors.clear();
            st.cache.clear_notifying();
        }
        let ops = &self.0.ops;
        ops.unit.complete(&OpKey::device(OpKind::Disconnect), Ok(()));
        let id = &self.0.id;
        let n = ops.fail_all(|_| Error::DeviceDisconnected(id.clone()));
        if n > 0 {
            debug!("{id}: {n} pending operations failed on disconnect");
        }
    }

    /// Resolves a callback target against the cache.
    fn lookup<T>(&self, f: impl FnOnce(&Cache) -> Result<T>) -> Option<T> {
        found(f(&self.0.st.lock().cache))
    }
}

/// Converts a callback lookup result, logging attributes that are gone.
#[inline]
fn found<T>(r: Result<T>) -> Option<T> {
    r.map_err(|e| trace!("Dropping callback: {e}")).ok()
}

/// Converts a platform result into an operation result.
#[inline]
fn failed<T>(op: OpKind, r: std::result::Result<T, GattStatus>) -> Result<T> {
    r.map_err(|status| Error::OperationFailed { op, status })
}
