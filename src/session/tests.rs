use gattlink_const::{Characteristic as Chr, Descriptor as Desc, Service as Svc};
use matches::assert_matches;
use tokio::time::timeout;

use super::*;
use crate::sim::{Call, SimPeripheral, SimRadio};

struct Harness {
    c: Central<SimRadio>,
    s: Session<SimRadio>,
    id: DeviceId,
    calls: EventStream<Call>,
}

impl Harness {
    fn new() -> Self {
        let c = Central::new(SimRadio::new(AdapterState::PoweredOn), Config::default());
        let id = DeviceId::new("C0:FF:EE:00:00:01").unwrap();
        c.radio().add_peripheral(&id);
        let calls = c.radio().subscribe();
        let s = c.peripheral(&id);
        Self { c, s, id, calls }
    }

    async fn call(&mut self) -> Call {
        self.calls.next().await.unwrap()
    }

    fn handle(&self, ev: RadioEvent<SimPeripheral>) {
        self.c.handle(ev);
    }

    async fn connect(&mut self) {
        let s = self.s.clone();
        let t = tokio::spawn(async move { s.connect(ConnectOptions::new()).await });
        assert_matches!(self.call().await, Call::Connect(_));
        self.handle(RadioEvent::Connected(self.id.clone()));
        assert_matches!(t.await.unwrap(), Ok(()));
    }

    /// Connects and discovers the Heart Rate service characteristics.
    async fn ready(&mut self) {
        self.connect().await;
        let s = self.s.clone();
        let t = tokio::spawn(async move { s.discover_services(&[]).await });
        assert_matches!(self.call().await, Call::DiscoverServices(..));
        self.handle(RadioEvent::ServicesDiscovered {
            id: self.id.clone(),
            result: Ok(vec![
                ServiceInfo::primary(Svc::HeartRate),
                ServiceInfo::primary(Svc::Battery),
            ]),
        });
        assert_eq!(t.await.unwrap().unwrap().len(), 2);

        let s = self.s.clone();
        let t = tokio::spawn(async move { s.discover_characteristics(Svc::HeartRate, &[]).await });
        assert_matches!(self.call().await, Call::DiscoverCharacteristics(..));
        self.handle(RadioEvent::CharacteristicsDiscovered {
            id: self.id.clone(),
            service: Svc::HeartRate.uuid(),
            result: Ok(vec![
                CharacteristicInfo::new(Chr::HeartRateMeasurement, Props::NOTIFY),
                CharacteristicInfo::new(Chr::BodySensorLocation, Props::READ),
                CharacteristicInfo::new(
                    Chr::HeartRateControlPoint,
                    Props::WRITE | Props::WRITE_WITHOUT_RESPONSE,
                ),
            ]),
        });
        assert_eq!(t.await.unwrap().unwrap().len(), 3);
    }

    fn bsl() -> CharPath {
        CharPath::new(Svc::HeartRate, Chr::BodySensorLocation)
    }

    fn hrm() -> CharPath {
        CharPath::new(Svc::HeartRate, Chr::HeartRateMeasurement)
    }

    fn read_result(&self, v: &[u8]) -> RadioEvent<SimPeripheral> {
        RadioEvent::CharacteristicRead {
            id: self.id.clone(),
            chr: Self::bsl(),
            result: Ok(v.to_vec()),
        }
    }

    fn spawn_read(&self) -> tokio::task::JoinHandle<Result<Characteristic>> {
        let s = self.s.clone();
        tokio::spawn(async move { s.read(Svc::HeartRate, Chr::BodySensorLocation).await })
    }

    fn notify_result(&self, enabled: bool) -> RadioEvent<SimPeripheral> {
        RadioEvent::NotifyStateChanged {
            id: self.id.clone(),
            chr: Self::hrm(),
            result: Ok(enabled),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn connect_disconnect() {
    use ConnectionState::*;
    let mut h = Harness::new();
    let mut states = h.s.connection_states(true);
    h.connect().await;
    assert!(h.s.is_connected());
    assert_matches!(
        h.s.connect(ConnectOptions::new()).await,
        Err(Error::DeviceAlreadyConnected(_))
    );

    let s = h.s.clone();
    let t = tokio::spawn(async move { s.disconnect().await });
    assert_matches!(h.call().await, Call::Disconnect(_));
    assert_eq!(h.s.state(), Disconnecting);
    h.handle(RadioEvent::Disconnected {
        id: h.id.clone(),
        status: None,
    });
    assert_matches!(t.await.unwrap(), Ok(()));

    // Disconnecting again succeeds without radio I/O
    assert_matches!(h.s.disconnect().await, Ok(()));
    assert_eq!(h.calls.try_next(), None);

    for want in [Disconnected, Connecting, Connected, Disconnecting, Disconnected] {
        assert_eq!(states.next().await, Some(want));
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_disconnect() {
    let mut h = Harness::new();
    h.connect().await;
    let s = h.s.clone();
    let first = tokio::spawn(async move { s.disconnect().await });
    assert_matches!(h.call().await, Call::Disconnect(_));
    let s = h.s.clone();
    let second = tokio::spawn(async move { s.disconnect().await });
    tokio::task::yield_now().await;
    assert_eq!(h.s.pending_operations(), 1);

    h.handle(RadioEvent::Disconnected {
        id: h.id.clone(),
        status: None,
    });
    assert_matches!(first.await.unwrap(), Ok(()));
    assert_matches!(second.await.unwrap(), Ok(()));
    assert_eq!(h.calls.try_next(), None);
}

#[tokio::test(start_paused = true)]
async fn connect_errors() {
    let mut h = Harness::new();
    let unknown = h.c.peripheral(&DeviceId::new("C0:FF:EE:00:00:02").unwrap());
    assert_matches!(
        unknown.connect(ConnectOptions::new()).await,
        Err(Error::DeviceNotFound(_))
    );

    h.c.radio().reject_next();
    assert_matches!(
        h.s.connect(ConnectOptions::new()).await,
        Err(Error::OperationStartFailed { op: OpKind::Connect, .. })
    );
    assert_eq!(h.s.state(), ConnectionState::Disconnected);

    let s = h.s.clone();
    let t = tokio::spawn(async move { s.connect(ConnectOptions::new()).await });
    assert_matches!(h.call().await, Call::Connect(_));
    let status = GattStatus(0x3E);
    h.handle(RadioEvent::ConnectionFailed {
        id: h.id.clone(),
        status,
    });
    assert_eq!(
        t.await.unwrap(),
        Err(Error::OperationFailed {
            op: OpKind::Connect,
            status
        })
    );
    assert_eq!(h.s.state(), ConnectionState::Disconnected);

    h.c.radio().set_state(AdapterState::PoweredOff);
    assert_matches!(
        h.s.connect(ConnectOptions::new()).await,
        Err(Error::BluetoothPoweredOff)
    );
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_and_supersede() {
    let mut h = Harness::new();
    let s = h.s.clone();
    let opts = ConnectOptions::new().timeout(Duration::from_secs(5));
    let t = tokio::spawn(async move { s.connect(opts).await });
    assert_matches!(h.call().await, Call::Connect(_));
    assert_matches!(
        t.await.unwrap(),
        Err(Error::OperationTimedOut(OpKind::Connect))
    );

    let s = h.s.clone();
    let first = tokio::spawn(async move { s.connect(ConnectOptions::new()).await });
    assert_matches!(h.call().await, Call::Connect(_));
    let s = h.s.clone();
    let second = tokio::spawn(async move { s.connect(ConnectOptions::new()).await });
    assert_matches!(h.call().await, Call::Connect(_));
    assert_matches!(first.await.unwrap(), Err(Error::OperationCancelled));
    h.handle(RadioEvent::Connected(h.id.clone()));
    assert_matches!(second.await.unwrap(), Ok(()));
}

#[tokio::test(start_paused = true)]
async fn connect_options() {
    let mut h = Harness::new();
    let s = h.s.clone();
    let t = tokio::spawn(async move { s.connect(ConnectOptions::new().mtu(185)).await });
    assert_matches!(h.call().await, Call::Connect(_));
    h.handle(RadioEvent::Connected(h.id.clone()));
    assert_matches!(h.call().await, Call::RequestMtu(_, 185));
    h.handle(RadioEvent::MtuChanged {
        id: h.id.clone(),
        result: Ok(185),
    });
    assert_matches!(t.await.unwrap(), Ok(()));
    assert_eq!(h.s.mtu(), 185);

    let s = h.s.clone();
    let t = tokio::spawn(async move { s.read_rssi().await });
    assert_matches!(h.call().await, Call::ReadRssi(_));
    h.handle(RadioEvent::RssiRead {
        id: h.id.clone(),
        result: Ok(-42),
    });
    assert_eq!(t.await.unwrap(), Ok(-42));
    assert_eq!(h.s.rssi(), Some(-42));
}

#[tokio::test(start_paused = true)]
async fn not_connected() {
    let mut h = Harness::new();
    assert_matches!(
        h.s.read(Svc::HeartRate, Chr::BodySensorLocation).await,
        Err(Error::DeviceNotConnected(_))
    );
    assert_matches!(
        h.s.discover_services(&[]).await,
        Err(Error::DeviceNotConnected(_))
    );
    assert_matches!(h.s.read_rssi().await, Err(Error::DeviceNotConnected(_)));
    assert_eq!(h.calls.try_next(), None);
}

#[tokio::test(start_paused = true)]
async fn discovery_gating() {
    let mut h = Harness::new();
    h.connect().await;
    assert_matches!(
        h.s.read(Svc::HeartRate, Chr::BodySensorLocation).await,
        Err(Error::ServicesNotDiscovered(_))
    );
    assert_matches!(h.s.services(), Err(Error::ServicesNotDiscovered(_)));

    let s = h.s.clone();
    let t = tokio::spawn(async move { s.discover_services(&[]).await });
    assert_matches!(h.call().await, Call::DiscoverServices(..));
    h.handle(RadioEvent::ServicesDiscovered {
        id: h.id.clone(),
        result: Ok(vec![ServiceInfo::primary(Svc::HeartRate)]),
    });
    t.await.unwrap().unwrap();
    assert_matches!(
        h.s.read(Svc::HeartRate, Chr::BodySensorLocation).await,
        Err(Error::CharacteristicsNotDiscovered(_))
    );
    assert_matches!(
        h.s.read(Svc::Battery, Chr::BatteryLevel).await,
        Err(Error::ServiceNotFound(u)) if u == Svc::Battery
    );

    // Served from the cache
    let v = h.s.discover_services(&[Svc::HeartRate.uuid()]).await.unwrap();
    assert_eq!(v[0].uuid, Svc::HeartRate);
    assert_eq!(h.calls.try_next(), None);

    let s = h.s.clone();
    let t = tokio::spawn(async move { s.discover_characteristics(Svc::HeartRate, &[]).await });
    assert_matches!(h.call().await, Call::DiscoverCharacteristics(..));
    h.handle(RadioEvent::CharacteristicsDiscovered {
        id: h.id.clone(),
        service: Svc::HeartRate.uuid(),
        result: Err(GattStatus::FAILURE),
    });
    assert_matches!(
        t.await.unwrap(),
        Err(Error::OperationFailed {
            op: OpKind::DiscoverCharacteristics,
            ..
        })
    );
    assert_matches!(
        h.s.characteristics(Svc::HeartRate),
        Err(Error::CharacteristicsNotDiscovered(_))
    );
}

#[tokio::test(start_paused = true)]
async fn filtered_then_full_discovery() {
    let mut h = Harness::new();
    h.connect().await;
    let s = h.s.clone();
    let t = tokio::spawn(async move { s.discover_services(&[Svc::HeartRate.uuid()]).await });
    assert_matches!(
        h.call().await,
        Call::DiscoverServices(_, f) if f == vec![Svc::HeartRate.uuid()]
    );
    h.handle(RadioEvent::ServicesDiscovered {
        id: h.id.clone(),
        result: Ok(vec![ServiceInfo::primary(Svc::HeartRate)]),
    });
    assert_eq!(t.await.unwrap().unwrap().len(), 1);

    // A filtered result does not stand in for a full discovery
    let s = h.s.clone();
    let t = tokio::spawn(async move { s.discover_services(&[]).await });
    assert_matches!(h.call().await, Call::DiscoverServices(_, f) if f.is_empty());
    h.handle(RadioEvent::ServicesDiscovered {
        id: h.id.clone(),
        result: Ok(vec![
            ServiceInfo::primary(Svc::HeartRate),
            ServiceInfo::primary(Svc::Battery),
        ]),
    });
    assert_eq!(t.await.unwrap().unwrap().len(), 2);
    assert_eq!(h.s.discover_services(&[]).await.unwrap().len(), 2);
    assert_eq!(h.calls.try_next(), None);

    let hrm = Chr::HeartRateMeasurement.uuid();
    let s = h.s.clone();
    let t = tokio::spawn(async move { s.discover_characteristics(Svc::HeartRate, &[hrm]).await });
    assert_matches!(h.call().await, Call::DiscoverCharacteristics(_, _, f) if f == vec![hrm]);
    h.handle(RadioEvent::CharacteristicsDiscovered {
        id: h.id.clone(),
        service: Svc::HeartRate.uuid(),
        result: Ok(vec![CharacteristicInfo::new(hrm, Props::NOTIFY)]),
    });
    assert_eq!(t.await.unwrap().unwrap().len(), 1);

    let s = h.s.clone();
    let t = tokio::spawn(async move { s.discover_characteristics(Svc::HeartRate, &[]).await });
    assert_matches!(h.call().await, Call::DiscoverCharacteristics(_, _, f) if f.is_empty());
    h.handle(RadioEvent::CharacteristicsDiscovered {
        id: h.id.clone(),
        service: Svc::HeartRate.uuid(),
        result: Ok(vec![
            CharacteristicInfo::new(hrm, Props::NOTIFY),
            CharacteristicInfo::new(Chr::BodySensorLocation, Props::READ),
        ]),
    });
    assert_eq!(t.await.unwrap().unwrap().len(), 2);
    let v = h.s.discover_characteristics(Svc::HeartRate, &[]).await.unwrap();
    assert_eq!(v.len(), 2);
    assert_eq!(h.calls.try_next(), None);
}

#[tokio::test(start_paused = true)]
async fn short_uuids_resolve() {
    let mut h = Harness::new();
    h.ready().await;
    let svc: Uuid = "180D".parse().unwrap();
    let chr: Uuid = "00002a38-0000-1000-8000-00805F9B34FB".parse().unwrap();
    let c = h.s.characteristic(svc, chr).unwrap();
    assert_eq!(c.uuid, Chr::BodySensorLocation);
    assert_eq!(c.service.to_string(), "0000180d-0000-1000-8000-00805f9b34fb");
}

#[tokio::test(start_paused = true)]
async fn read_supersede() {
    let mut h = Harness::new();
    h.ready().await;
    let first = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    let second = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    assert_matches!(first.await.unwrap(), Err(Error::OperationCancelled));

    h.handle(h.read_result(&[1]));
    let c = second.await.unwrap().unwrap();
    assert_eq!(c.value, Some(vec![1]));
    assert_eq!(h.s.pending_operations(), 0);

    // Duplicate callback is dropped
    h.handle(h.read_result(&[1]));
    assert_eq!(h.s.pending_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_callback_dropped() {
    let mut h = Harness::new();
    h.ready().await;
    let t = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    assert_matches!(
        t.await.unwrap(),
        Err(Error::OperationTimedOut(OpKind::ReadCharacteristic))
    );
    assert_eq!(h.s.pending_operations(), 0);
    h.handle(h.read_result(&[7]));
    assert_eq!(h.s.pending_operations(), 0);

    let t = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    h.handle(h.read_result(&[8]));
    assert_eq!(t.await.unwrap().unwrap().value, Some(vec![8]));
}

#[tokio::test(start_paused = true)]
async fn read_failure() {
    let mut h = Harness::new();
    h.ready().await;
    let t = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    h.handle(RadioEvent::CharacteristicRead {
        id: h.id.clone(),
        chr: Harness::bsl(),
        result: Err(GattStatus(0x02)),
    });
    let e = t.await.unwrap().unwrap_err();
    assert_eq!(e.status().and_then(GattStatus::att), Some(ErrorCode::ReadNotPermitted));
    assert_eq!(e.code(), OpKind::ReadCharacteristic.failure_code());
}

#[tokio::test(start_paused = true)]
async fn write_asymmetry() {
    let mut h = Harness::new();
    h.ready().await;

    // Returns without any callback
    let c = (h.s)
        .write(
            Svc::HeartRate,
            Chr::HeartRateControlPoint,
            &[1],
            WriteKind::WithoutResponse,
        )
        .await
        .unwrap();
    assert_eq!(c.value, Some(vec![1]));
    assert_matches!(
        h.call().await,
        Call::WriteCharacteristic(_, _, _, WriteKind::WithoutResponse)
    );
    assert_eq!(h.s.pending_operations(), 0);

    let s = h.s.clone();
    let mut t = tokio::spawn(async move {
        (s.write(Svc::HeartRate, Chr::HeartRateControlPoint, &[2], WriteKind::WithResponse)).await
    });
    assert_matches!(
        h.call().await,
        Call::WriteCharacteristic(_, _, _, WriteKind::WithResponse)
    );
    assert!(timeout(Duration::from_secs(5), &mut t).await.is_err());
    h.handle(RadioEvent::CharacteristicWritten {
        id: h.id.clone(),
        chr: CharPath::new(Svc::HeartRate, Chr::HeartRateControlPoint),
        result: Ok(()),
    });
    assert_eq!(t.await.unwrap().unwrap().value, Some(vec![2]));
}

#[tokio::test(start_paused = true)]
async fn not_permitted() {
    let mut h = Harness::new();
    h.ready().await;
    assert_matches!(
        (h.s)
            .write(Svc::HeartRate, Chr::BodySensorLocation, &[0], WriteKind::WithResponse)
            .await,
        Err(Error::NotPermitted {
            op: OpKind::WriteCharacteristic,
            ..
        })
    );
    assert_matches!(
        h.s.set_notify(Svc::HeartRate, Chr::BodySensorLocation, true).await,
        Err(Error::NotPermitted {
            op: OpKind::SetNotify,
            ..
        })
    );
    assert_matches!(
        h.s.read(Svc::HeartRate, Chr::HeartRateMeasurement).await,
        Err(Error::NotPermitted { .. })
    );
    assert_matches!(
        h.s.read(Svc::HeartRate, Chr::BatteryLevel).await,
        Err(Error::CharacteristicNotFound(_))
    );
    assert_eq!(h.calls.try_next(), None);
}

#[tokio::test(start_paused = true)]
async fn notifications() {
    let mut h = Harness::new();
    h.ready().await;
    let s = h.s.clone();
    let t = tokio::spawn(async move {
        s.monitor(Svc::HeartRate, Chr::HeartRateMeasurement).await
    });
    assert_matches!(h.call().await, Call::SetNotify(_, _, true));
    h.handle(h.notify_result(true));
    let mut values = t.await.unwrap().unwrap();
    assert!(h.s.characteristic(Svc::HeartRate, Chr::HeartRateMeasurement).unwrap().notifying);

    for v in [[0x00, 60], [0x00, 61]] {
        h.handle(RadioEvent::CharacteristicChanged {
            id: h.id.clone(),
            chr: Harness::hrm(),
            value: v.to_vec(),
        });
    }
    assert_eq!(values.next().await, Some(vec![0x00, 60]));
    assert_eq!(values.next().await, Some(vec![0x00, 61]));

    // A second monitor does not toggle notifications again
    let mut other = (h.s.monitor(Svc::HeartRate, Chr::HeartRateMeasurement).await).unwrap();
    assert_eq!(h.calls.try_next(), None);

    let s = h.s.clone();
    let t = tokio::spawn(async move {
        s.set_notify(Svc::HeartRate, Chr::HeartRateMeasurement, false).await
    });
    assert_matches!(h.call().await, Call::SetNotify(_, _, false));
    h.handle(h.notify_result(false));
    assert_eq!(t.await.unwrap(), Ok(false));
    assert_eq!(values.next().await, None);
    assert_eq!(other.next().await, None);
}

#[tokio::test(start_paused = true)]
async fn disconnect_sweep() {
    let mut h = Harness::new();
    h.ready().await;
    let s = h.s.clone();
    let t = tokio::spawn(async move {
        s.monitor(Svc::HeartRate, Chr::HeartRateMeasurement).await
    });
    assert_matches!(h.call().await, Call::SetNotify(..));
    h.handle(h.notify_result(true));
    let mut values = t.await.unwrap().unwrap();

    let read = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    let s = h.s.clone();
    let disc = tokio::spawn(async move {
        s.discover_characteristics(Svc::Battery, &[]).await
    });
    assert_matches!(h.call().await, Call::DiscoverCharacteristics(..));
    assert_eq!(h.s.pending_operations(), 2);

    h.handle(RadioEvent::Disconnected {
        id: h.id.clone(),
        status: Some(GattStatus(0x08)),
    });
    assert_matches!(read.await.unwrap(), Err(Error::DeviceDisconnected(_)));
    assert_matches!(disc.await.unwrap(), Err(Error::DeviceDisconnected(_)));
    assert_eq!(values.next().await, None);
    assert_eq!(h.s.pending_operations(), 0);
    assert_eq!(h.s.state(), ConnectionState::Disconnected);

    // The cache survives reconnection, notifications do not
    h.connect().await;
    let c = h.s.characteristic(Svc::HeartRate, Chr::HeartRateMeasurement).unwrap();
    assert!(!c.notifying);
    let t = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    h.handle(h.read_result(&[2]));
    assert_eq!(t.await.unwrap().unwrap().value, Some(vec![2]));
}

#[tokio::test(start_paused = true)]
async fn radio_power_off() {
    let mut h = Harness::new();
    h.ready().await;
    let read = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    h.c.radio().set_state(AdapterState::PoweredOff);
    h.handle(RadioEvent::AdapterStateChanged(AdapterState::PoweredOff));
    assert_matches!(read.await.unwrap(), Err(Error::DeviceDisconnected(_)));
    assert_eq!(h.s.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn service_invalidation() {
    let mut h = Harness::new();
    h.ready().await;
    let s = h.s.clone();
    let t = tokio::spawn(async move {
        s.monitor(Svc::HeartRate, Chr::HeartRateMeasurement).await
    });
    assert_matches!(h.call().await, Call::SetNotify(_, _, true));
    h.handle(h.notify_result(true));
    let mut values = t.await.unwrap().unwrap();

    let read = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    h.handle(RadioEvent::ServicesInvalidated {
        id: h.id.clone(),
        services: vec![Svc::HeartRate.uuid()],
    });
    assert_matches!(
        read.await.unwrap(),
        Err(Error::ServiceInvalidated(u)) if u == Svc::HeartRate
    );
    assert_eq!(values.next().await, None);
    assert_matches!(
        h.s.read(Svc::HeartRate, Chr::BodySensorLocation).await,
        Err(Error::ServiceNotFound(_))
    );
    assert_eq!(h.s.services().unwrap().len(), 1);

    // Late callback for the removed characteristic
    h.handle(h.read_result(&[3]));
    assert_eq!(h.s.pending_operations(), 0);

    // The next full discovery goes back to the peripheral
    let s = h.s.clone();
    let t = tokio::spawn(async move { s.discover_services(&[]).await });
    assert_matches!(h.call().await, Call::DiscoverServices(..));
    h.handle(RadioEvent::ServicesDiscovered {
        id: h.id.clone(),
        result: Ok(vec![
            ServiceInfo::primary(Svc::HeartRate),
            ServiceInfo::primary(Svc::Battery),
        ]),
    });
    assert_eq!(t.await.unwrap().unwrap().len(), 2);
    assert_matches!(
        h.s.characteristics(Svc::HeartRate),
        Err(Error::CharacteristicsNotDiscovered(_))
    );
}

#[tokio::test(start_paused = true)]
async fn invalidate_cache() {
    let mut h = Harness::new();
    h.ready().await;
    let read = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    h.s.invalidate_cache();
    assert_matches!(read.await.unwrap(), Err(Error::OperationCancelled));
    assert_matches!(h.s.services(), Err(Error::ServicesNotDiscovered(_)));
}

#[tokio::test(start_paused = true)]
async fn descriptors() {
    let mut h = Harness::new();
    h.ready().await;
    let s = h.s.clone();
    let t = tokio::spawn(async move {
        s.discover_descriptors(Svc::HeartRate, Chr::HeartRateMeasurement).await
    });
    assert_matches!(h.call().await, Call::DiscoverDescriptors(..));
    h.handle(RadioEvent::DescriptorsDiscovered {
        id: h.id.clone(),
        chr: Harness::hrm(),
        result: Ok(vec![
            Desc::ClientCharacteristicConfiguration.uuid(),
            Desc::CharacteristicUserDescription.uuid(),
        ]),
    });
    assert_eq!(t.await.unwrap().unwrap().len(), 2);

    assert_matches!(
        (h.s)
            .write_descriptor(
                Svc::HeartRate,
                Chr::HeartRateMeasurement,
                Desc::ClientCharacteristicConfiguration,
                &[1, 0],
            )
            .await,
        Err(Error::DescriptorWriteNotAllowed(_))
    );
    assert_eq!(h.calls.try_next(), None);

    let path = Harness::hrm().descriptor(Desc::CharacteristicUserDescription);
    let s = h.s.clone();
    let t = tokio::spawn(async move {
        (s.read_descriptor(
            Svc::HeartRate,
            Chr::HeartRateMeasurement,
            Desc::CharacteristicUserDescription,
        ))
        .await
    });
    assert_matches!(h.call().await, Call::ReadDescriptor(_, p) if p == path);
    h.handle(RadioEvent::DescriptorRead {
        id: h.id.clone(),
        desc: path,
        result: Ok(b"pulse".to_vec()),
    });
    let d = t.await.unwrap().unwrap();
    assert_eq!(d.value.as_deref(), Some(&b"pulse"[..]));
    assert_eq!(d.characteristic, Chr::HeartRateMeasurement);

    let s = h.s.clone();
    let t = tokio::spawn(async move {
        (s.write_descriptor(
            Svc::HeartRate,
            Chr::HeartRateMeasurement,
            Desc::CharacteristicUserDescription,
            b"bpm",
        ))
        .await
    });
    assert_matches!(h.call().await, Call::WriteDescriptor(..));
    h.handle(RadioEvent::DescriptorWritten {
        id: h.id.clone(),
        desc: path,
        result: Ok(()),
    });
    assert_eq!(t.await.unwrap().unwrap().value.as_deref(), Some(&b"bpm"[..]));
}

#[tokio::test(start_paused = true)]
async fn included_services() {
    let mut h = Harness::new();
    h.ready().await;
    let s = h.s.clone();
    let t = tokio::spawn(async move { s.discover_included_services(Svc::HeartRate).await });
    assert_matches!(h.call().await, Call::DiscoverIncludedServices(..));
    h.handle(RadioEvent::IncludedServicesDiscovered {
        id: h.id.clone(),
        service: Svc::HeartRate.uuid(),
        result: Ok(vec![ServiceInfo {
            uuid: Svc::DeviceInformation.uuid(),
            primary: false,
        }]),
    });
    let v = t.await.unwrap().unwrap();
    assert_eq!(v.len(), 1);
    assert_eq!(v[0].included_by, Some(Svc::HeartRate.uuid()));
    assert_eq!(h.s.services().unwrap().len(), 3);

    // Cached
    assert_eq!(h.s.discover_included_services(Svc::HeartRate).await.unwrap(), v);
    assert_eq!(h.calls.try_next(), None);
}

#[tokio::test(start_paused = true)]
async fn eviction() {
    let mut h = Harness::new();
    h.ready().await;
    let read = h.spawn_read();
    assert_matches!(h.call().await, Call::ReadCharacteristic(..));
    assert!(h.c.remove(&h.id));
    assert_matches!(read.await.unwrap(), Err(Error::OperationCancelled));
    assert_matches!(h.call().await, Call::Disconnect(_));
    assert_matches!(
        h.s.read(Svc::HeartRate, Chr::BodySensorLocation).await,
        Err(Error::DeviceNotFound(_))
    );
}
