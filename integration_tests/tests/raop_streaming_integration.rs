//! End-to-end RAOP streaming through a real pipeline
//!
//! A mock sender streams over loopback UDP into `ProtocolRaop`, which feeds
//! the default pipeline; a driver task pulls the pipeline's output.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use raop_renderer::pipeline::{
    IdProvider, MsgBody, PipelineBuilder, PipelineConfig, PipelineControl,
};
use raop_renderer::receiver::{
    ProtocolRaop, ProtocolStreamResult, RaopConfig, RaopStreamHandle, SessionDiscovery,
};
use raop_renderer::testing::{MockRaopSender, MockSenderConfig, NetworkSimulator, plain_payload};
use tokio::task::JoinHandle;

mod common;
use common::{Driver, init_logging};

const FMTP: &str = "96 352 0 16 40 10 14 2 255 0 0 44100";
const KEY: [u8; 16] = [0x11; 16];
const IV: [u8; 16] = [0x22; 16];
const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    driver: Driver,
    control: PipelineControl,
    handle: RaopStreamHandle,
    sender: MockRaopSender,
    task: JoinHandle<raop_renderer::Result<ProtocolStreamResult>>,
}

async fn start(network: NetworkSimulator) -> Harness {
    init_logging();

    // No starvation while the test is between bursts
    let pipeline = PipelineBuilder::new(
        PipelineConfig::default().starvation_timeout(Duration::from_secs(30)),
    )
    .build();
    let supply = pipeline.supply();
    let control = pipeline.control();
    let driver = Driver::start(pipeline);

    let discovery = Arc::new(SessionDiscovery::new());
    discovery.begin(FMTP, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    discovery.set_keys(KEY, IV);

    let config = RaopConfig::loopback()
        .repair_timing(Duration::from_millis(2), Duration::from_millis(20));
    let mut protocol = ProtocolRaop::new(config, discovery, supply, Arc::new(IdProvider::new()))
        .await
        .expect("bind raop servers");
    let handle = protocol.handle();

    let sender = MockRaopSender::bind(
        MockSenderConfig::new(handle.audio_addr().unwrap(), handle.control_addr().unwrap())
            .encrypted(KEY, IV)
            .network(network),
    )
    .await
    .expect("bind mock sender");

    let uri = sender.uri().unwrap();
    let task = tokio::spawn(async move { protocol.stream(&uri).await });

    tokio::time::timeout(WAIT, async {
        while !handle.is_active() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("stream did not start");

    Harness {
        driver,
        control,
        handle,
        sender,
        task,
    }
}

#[tokio::test]
async fn test_encrypted_stream_reaches_driver() {
    let mut harness = start(NetworkSimulator::perfect()).await;

    for _ in 0..20 {
        harness.sender.send_audio().await.unwrap();
    }

    let audio = harness.driver.audio(20, WAIT).await;
    let expected: Vec<_> = (100..120).map(plain_payload).collect();
    assert_eq!(audio, expected);

    harness.handle.interrupt(true);
    let result = harness.task.await.unwrap().unwrap();
    assert_eq!(result, ProtocolStreamResult::Stopped);
}

#[tokio::test]
async fn test_lossy_stream_is_repaired() {
    let network = NetworkSimulator::lossy(0.05, 0.05).with_seed(11);
    let mut harness = start(network).await;

    // Direct first and last packets bound every gap
    harness.sender.send_audio().await.unwrap();
    harness.sender.send_batch(100).await.unwrap();
    harness.sender.send_audio().await.unwrap();

    let audio = harness.driver.audio(102, WAIT).await;
    let expected: Vec<_> = (100..202).map(plain_payload).collect();
    assert_eq!(audio, expected);

    harness.handle.interrupt(true);
    let result = harness.task.await.unwrap().unwrap();
    assert_eq!(result, ProtocolStreamResult::Stopped);
}

#[tokio::test]
async fn test_try_stop_flushes_pipeline() {
    let mut harness = start(NetworkSimulator::perfect()).await;

    for _ in 0..5 {
        harness.sender.send_audio().await.unwrap();
    }
    harness.driver.audio(5, WAIT).await;

    let flush_id = harness
        .control
        .stop_stream(&harness.handle, harness.handle.stream_id())
        .expect("stream is current");
    assert!(
        harness
            .driver
            .until(WAIT, |body| matches!(body, MsgBody::Flush { id } if *id == flush_id))
            .await
    );

    let result = harness.task.await.unwrap().unwrap();
    assert_eq!(result, ProtocolStreamResult::Stopped);
}
