//! Monitor device events and stream statistics.
//!
//! Drives a session against the in-memory fake transport: selects an
//! RSPduo in master mode, attaches a slave, and prints every event the
//! master receives along with per-channel block counts.
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=debug cargo run -p rsplib --example monitor_events
//! ```

use std::sync::Arc;

use rsplib::{
    ApiBuilder, CallbackRegistration, DeviceEvent, DeviceInfo, DuoMode, EventKind,
    PowerOverload, Sequence, StreamBlock, Tuner, TunerSelect,
};
use rsplib_test_harness::FakeTransport;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let fake = Arc::new(FakeTransport::new().with_device(FakeTransport::rspduo("1234567890")));
    let api = ApiBuilder::new().build(fake.clone());
    api.open().await?;

    let found = api.devices().await?;
    let device = found
        .first()
        .ok_or_else(|| anyhow::anyhow!("no devices found"))?;
    println!("Found {} ({})", device.serial, device.hw_ver);

    let master = api
        .select(&DeviceInfo {
            duo_mode: DuoMode::Master,
            tuners: TunerSelect::Both,
            duo_sample_freq: 6_000_000.0,
            ..device.clone()
        })
        .await?;

    master
        .init(
            CallbackRegistration::new()
                .stream_a(|block: &StreamBlock<'_>, seq: Sequence| {
                    if !seq.contiguous {
                        println!("A: discontinuity at sample {}", block.first_sample_num);
                    }
                })
                .event(|event: &DeviceEvent| match &event.kind {
                    EventKind::PowerOverload(state) => {
                        println!("{:?}: power overload {:?}", event.tuner, state);
                    }
                    EventKind::DuoModeChange(change) => {
                        println!("{:?}: duo mode change {:?}", event.tuner, change);
                    }
                    other => println!("{:?}: {:?}", event.tuner, other),
                }),
        )
        .await?;

    let slave = api
        .select(&DeviceInfo {
            duo_mode: DuoMode::Slave,
            tuners: TunerSelect::B,
            duo_sample_freq: 6_000_000.0,
            ..device.clone()
        })
        .await?;
    println!("Slave attached: {}", master.slave_attached());

    let handle = master.handle();
    let samples = [0i16; 256];
    for n in 0..8u32 {
        let first = if n == 5 { 10_000 } else { n * 256 };
        fake.emit_stream(handle, Tuner::A, &StreamBlock::new(first, &samples, &samples));
        fake.emit_stream(handle, Tuner::B, &StreamBlock::new(first, &samples, &samples));
    }
    fake.emit_event(
        handle,
        DeviceEvent::new(
            TunerSelect::A,
            EventKind::PowerOverload(PowerOverload::Detected),
        ),
    );
    master.acknowledge_overload(Tuner::A).await?;

    slave.release().await?;

    for tuner in [Tuner::A, Tuner::B] {
        let stats = master.stream_stats(tuner);
        println!(
            "{tuner}: {} delivered, {} dropped",
            stats.delivered, stats.dropped
        );
    }

    master.uninit().await?;
    master.release().await?;
    api.close().await?;
    Ok(())
}
