//! Simulated radio adapter.
//!
//! [`SimRadio`] accepts every request and records it as a [`Call`] without
//! producing any callbacks. Tests and demos play the peripheral by feeding
//! [`RadioEvent`]s to [`Central::handle`](crate::Central::handle) in
//! response to the recorded calls.

use std::collections::BTreeSet;

use crate::stream::Subscribers;
use crate::*;

/// Platform handle of a simulated peripheral.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct SimPeripheral(DeviceId);

impl SimPeripheral {
    #[inline(always)]
    #[must_use]
    pub const fn id(&self) -> &DeviceId {
        &self.0
    }
}

/// Request accepted by the simulated radio.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Call {
    StartScan(ScanOptions),
    StopScan,
    Connect(DeviceId),
    Disconnect(DeviceId),
    DiscoverServices(DeviceId, Vec<Uuid>),
    DiscoverIncludedServices(DeviceId, Uuid),
    DiscoverCharacteristics(DeviceId, Uuid, Vec<Uuid>),
    DiscoverDescriptors(DeviceId, CharPath),
    ReadCharacteristic(DeviceId, CharPath),
    WriteCharacteristic(DeviceId, CharPath, Vec<u8>, WriteKind),
    SetNotify(DeviceId, CharPath, bool),
    ReadDescriptor(DeviceId, DescPath),
    WriteDescriptor(DeviceId, DescPath, Vec<u8>),
    ReadRssi(DeviceId),
    RequestMtu(DeviceId, u16),
}

impl Call {
    /// Returns the operation kind of the request.
    #[must_use]
    pub const fn kind(&self) -> OpKind {
        use Call::*;
        match *self {
            StartScan(_) => OpKind::StartScan,
            StopScan => OpKind::StopScan,
            Connect(_) => OpKind::Connect,
            Disconnect(_) => OpKind::Disconnect,
            DiscoverServices(..) => OpKind::DiscoverServices,
            DiscoverIncludedServices(..) => OpKind::DiscoverIncludedServices,
            DiscoverCharacteristics(..) => OpKind::DiscoverCharacteristics,
            DiscoverDescriptors(..) => OpKind::DiscoverDescriptors,
            ReadCharacteristic(..) => OpKind::ReadCharacteristic,
            WriteCharacteristic(..) => OpKind::WriteCharacteristic,
            SetNotify(..) => OpKind::SetNotify,
            ReadDescriptor(..) => OpKind::ReadDescriptor,
            WriteDescriptor(..) => OpKind::WriteDescriptor,
            ReadRssi(_) => OpKind::ReadRssi,
            RequestMtu(..) => OpKind::RequestMtu,
        }
    }
}

/// Simulated radio adapter.
#[derive(Debug)]
pub struct SimRadio(SyncMutex<SimState>);

#[derive(Debug)]
struct SimState {
    state: AdapterState,
    known: BTreeSet<DeviceId>,
    calls: Vec<Call>,
    reject: bool,
    subs: Subscribers<Call>,
}

impl SimRadio {
    /// Creates a simulated radio in the specified state.
    #[must_use]
    pub fn new(state: AdapterState) -> Self {
        Self(SyncMutex::new(SimState {
            state,
            known: BTreeSet::new(),
            calls: Vec::new(),
            reject: false,
            subs: Subscribers::default(),
        }))
    }

    /// Changes the reported radio state. The corresponding
    /// [`RadioEvent::AdapterStateChanged`] must be delivered separately.
    #[inline]
    pub fn set_state(&self, state: AdapterState) {
        self.0.lock().state = state;
    }

    /// Makes a peripheral resolvable without a sighting.
    #[inline]
    pub fn add_peripheral(&self, id: &DeviceId) {
        self.0.lock().known.insert(id.clone());
    }

    /// Returns a sighting event for a peripheral, making it resolvable.
    #[must_use]
    pub fn sighting(
        &self,
        id: &DeviceId,
        name: Option<&str>,
        rssi: i16,
    ) -> RadioEvent<SimPeripheral> {
        self.add_peripheral(id);
        RadioEvent::Discovered {
            id: id.clone(),
            peripheral: SimPeripheral(id.clone()),
            name: name.map(str::to_owned),
            rssi,
            adv: AdvertisementData {
                local_name: name.map(str::to_owned),
                connectable: Some(true),
                ..AdvertisementData::default()
            },
        }
    }

    /// Returns all accepted requests.
    #[inline]
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().calls.clone()
    }

    /// Returns and clears all accepted requests.
    #[inline]
    #[must_use]
    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.0.lock().calls)
    }

    /// Causes the next request to be rejected.
    #[inline]
    pub fn reject_next(&self) {
        self.0.lock().reject = true;
    }

    /// Returns a stream of accepted requests.
    #[inline]
    pub fn subscribe(&self) -> EventStream<Call> {
        self.0.lock().subs.subscribe(None)
    }

    fn call(&self, c: Call) -> Result<()> {
        let mut st = self.0.lock();
        if st.reject {
            st.reject = false;
            return Err(Error::OperationStartFailed {
                op: c.kind(),
                reason: "rejected by simulator".to_owned(),
            });
        }
        st.subs.send(&c);
        st.calls.push(c);
        Ok(())
    }
}

impl Radio for SimRadio {
    type Peripheral = SimPeripheral;

    #[inline]
    fn state(&self) -> AdapterState {
        self.0.lock().state
    }

    fn resolve(&self, id: &DeviceId) -> Option<SimPeripheral> {
        (self.0.lock().known.contains(id)).then(|| SimPeripheral(id.clone()))
    }

    fn start_scan(&self, opts: &ScanOptions) -> Result<()> {
        self.call(Call::StartScan(opts.clone()))
    }

    fn stop_scan(&self) -> Result<()> {
        self.call(Call::StopScan)
    }

    fn connect(&self, p: &SimPeripheral, _: &ConnectOptions) -> Result<()> {
        self.call(Call::Connect(p.0.clone()))
    }

    fn disconnect(&self, p: &SimPeripheral) -> Result<()> {
        self.call(Call::Disconnect(p.0.clone()))
    }

    fn discover_services(&self, p: &SimPeripheral, filter: &[Uuid]) -> Result<()> {
        self.call(Call::DiscoverServices(p.0.clone(), filter.to_vec()))
    }

    fn discover_included_services(&self, p: &SimPeripheral, service: Uuid) -> Result<()> {
        self.call(Call::DiscoverIncludedServices(p.0.clone(), service))
    }

    fn discover_characteristics(
        &self,
        p: &SimPeripheral,
        service: Uuid,
        filter: &[Uuid],
    ) -> Result<()> {
        self.call(Call::DiscoverCharacteristics(p.0.clone(), service, filter.to_vec()))
    }

    fn discover_descriptors(&self, p: &SimPeripheral, chr: CharPath) -> Result<()> {
        self.call(Call::DiscoverDescriptors(p.0.clone(), chr))
    }

    fn read_characteristic(&self, p: &SimPeripheral, chr: CharPath) -> Result<()> {
        self.call(Call::ReadCharacteristic(p.0.clone(), chr))
    }

    fn write_characteristic(
        &self,
        p: &SimPeripheral,
        chr: CharPath,
        value: &[u8],
        kind: WriteKind,
    ) -> Result<()> {
        self.call(Call::WriteCharacteristic(p.0.clone(), chr, value.to_vec(), kind))
    }

    fn set_notify(&self, p: &SimPeripheral, chr: CharPath, enable: bool) -> Result<()> {
        self.call(Call::SetNotify(p.0.clone(), chr, enable))
    }

    fn read_descriptor(&self, p: &SimPeripheral, desc: DescPath) -> Result<()> {
        self.call(Call::ReadDescriptor(p.0.clone(), desc))
    }

    fn write_descriptor(&self, p: &SimPeripheral, desc: DescPath, value: &[u8]) -> Result<()> {
        self.call(Call::WriteDescriptor(p.0.clone(), desc, value.to_vec()))
    }

    fn read_rssi(&self, p: &SimPeripheral) -> Result<()> {
        self.call(Call::ReadRssi(p.0.clone()))
    }

    fn request_mtu(&self, p: &SimPeripheral, mtu: u16) -> Result<()> {
        self.call(Call::RequestMtu(p.0.clone(), mtu))
    }
}
