#![allow(unused_crate_dependencies)]
#![allow(clippy::print_stdout)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use gattlink::consts::{Characteristic as Chr, Descriptor as Desc, Service as Svc};
use gattlink::sim::{Call, SimRadio};
use gattlink::*;

#[derive(Clone, Debug, clap::Parser)]
struct Args {
    /// Number of heart rate measurements to receive.
    #[arg(short, long, default_value_t = 5)]
    readings: u8,

    /// ATT MTU to request after connecting.
    #[arg(short, long)]
    mtu: Option<u16>,

    /// JSON engine configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

const ADDR: &str = "C0:FF:EE:00:00:01";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let cfg = match args.config {
        Some(ref path) => Config::from_json(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    let central = Central::new(SimRadio::new(AdapterState::PoweredOff), cfg);
    let calls = central.radio().subscribe();
    let id = DeviceId::new(ADDR)?;
    let responder = tokio::task::spawn(respond(central.clone(), calls, id, args.readings));

    // Queued until the radio powers on
    let mut results = central.start_scan(ScanOptions {
        services: vec![Svc::HeartRate.uuid()],
        ..ScanOptions::default()
    })?;
    central.radio().set_state(AdapterState::PoweredOn);
    central.handle(RadioEvent::AdapterStateChanged(AdapterState::PoweredOn));

    let Some(found) = results.next().await else {
        anyhow::bail!("scan ended without results");
    };
    info!("Found {} ({:?}, {} dBm)", found.id, found.name, found.rssi);
    central.stop_scan()?;

    let hrm = central.peripheral(&found.id);
    let mut opts = ConnectOptions::new();
    if let Some(mtu) = args.mtu {
        opts = opts.mtu(mtu);
    }
    hrm.connect(opts).await?;
    info!("Connected (MTU {})", hrm.mtu());

    for c in hrm.discover_all().await? {
        info!("{} / {} {:?}", c.service, c.uuid, c.props);
    }
    let loc = hrm.read(Svc::HeartRate, Chr::BodySensorLocation).await?;
    info!("Sensor location: {:?}", loc.value);
    for d in (hrm.discover_descriptors(Svc::HeartRate, Chr::HeartRateMeasurement)).await? {
        info!("Descriptor {}", d.uuid);
    }
    if let Err(e) = (hrm.write_descriptor(
        Svc::HeartRate,
        Chr::HeartRateMeasurement,
        Desc::ClientCharacteristicConfiguration,
        &[0x01, 0x00],
    ))
    .await
    {
        info!("Expected error: {e} (code {})", e.code());
    }

    let mut values = hrm.monitor(Svc::HeartRate, Chr::HeartRateMeasurement).await?;
    for _ in 0..args.readings {
        let Some(v) = values.next().await else { break };
        let bpm = v.get(1).copied().unwrap_or_default();
        println!("{bpm} bpm");
    }
    hrm.set_notify(Svc::HeartRate, Chr::HeartRateMeasurement, false)
        .await?;
    hrm.write(
        Svc::HeartRate,
        Chr::HeartRateControlPoint,
        &[0x01],
        WriteKind::WithResponse,
    )
    .await?;
    info!("Energy expended reset");

    hrm.disconnect().await?;
    central.shutdown();
    responder.abort();
    Ok(())
}

/// Plays a heart rate sensor by answering every request accepted by the
/// simulated radio.
async fn respond(
    c: Central<SimRadio>,
    mut calls: EventStream<Call>,
    id: DeviceId,
    readings: u8,
) {
    while let Some(call) = calls.next().await {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = id.clone();
        let ev = match call {
            Call::StartScan(_) => c.radio().sighting(&id, Some("Pulse"), -52),
            Call::Connect(_) => RadioEvent::Connected(id),
            Call::Disconnect(_) => RadioEvent::Disconnected { id, status: None },
            Call::RequestMtu(_, mtu) => RadioEvent::MtuChanged {
                id,
                result: Ok(mtu.min(247)),
            },
            Call::DiscoverServices(..) => RadioEvent::ServicesDiscovered {
                id,
                result: Ok(vec![
                    ServiceInfo::primary(Svc::HeartRate),
                    ServiceInfo::primary(Svc::Battery),
                ]),
            },
            Call::DiscoverCharacteristics(_, service, _) => RadioEvent::CharacteristicsDiscovered {
                id,
                service,
                result: Ok(if service == Svc::HeartRate {
                    vec![
                        CharacteristicInfo::new(Chr::HeartRateMeasurement, Props::NOTIFY),
                        CharacteristicInfo::new(Chr::BodySensorLocation, Props::READ),
                        CharacteristicInfo::new(Chr::HeartRateControlPoint, Props::WRITE),
                    ]
                } else {
                    vec![CharacteristicInfo::new(
                        Chr::BatteryLevel,
                        Props::READ | Props::NOTIFY,
                    )]
                }),
            },
            Call::DiscoverDescriptors(_, chr) => RadioEvent::DescriptorsDiscovered {
                id,
                chr,
                result: Ok(vec![Desc::ClientCharacteristicConfiguration.uuid()]),
            },
            Call::ReadCharacteristic(_, chr) => RadioEvent::CharacteristicRead {
                id,
                chr,
                // Wrist
                result: Ok(vec![0x02]),
            },
            Call::WriteCharacteristic(_, chr, ..) => RadioEvent::CharacteristicWritten {
                id,
                chr,
                result: Ok(()),
            },
            Call::SetNotify(_, chr, enable) => {
                c.handle(RadioEvent::NotifyStateChanged {
                    id: id.clone(),
                    chr,
                    result: Ok(enable),
                });
                if enable {
                    for i in 0..readings {
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        c.handle(RadioEvent::CharacteristicChanged {
                            id: id.clone(),
                            chr,
                            value: vec![0x00, 60_u8.saturating_add(i)],
                        });
                    }
                }
                continue;
            }
            _ => continue,
        };
        c.handle(ev);
    }
}
