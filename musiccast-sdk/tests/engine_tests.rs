//! End-to-end engine tests against a mock device: HTTP discovery/polling
//! served by mockito, push notifications sent over real UDP.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use musiccast_sdk::state::{
    ChangeFilter, ChangeNotification, DeviceId, Resource, Subscription, ZoneId,
};
use musiccast_sdk::{EngineConfig, EngineError, MusicCastEngine};

const DEVICE_ID: &str = "00A0DETESTDEV1";

async fn mock_device(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
    let mut mocks = Vec::new();
    mocks.push(
        server
            .mock("GET", "/YamahaExtendedControl/v1/system/getDeviceInfo")
            .with_body(format!(
                r#"{{"response_code":0,"device_id":"{DEVICE_ID}","model_name":"WX-030","system_version":2.11,"api_version":2.05}}"#
            ))
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("GET", "/YamahaExtendedControl/v1/system/getFeatures")
            .with_body(
                r#"{
                    "response_code": 0,
                    "system": {
                        "func_list": ["wired_lan", "wireless_lan"],
                        "input_list": [{"id": "net_radio", "distribution_enable": true}]
                    },
                    "zone": [{
                        "id": "main",
                        "func_list": ["power", "volume", "mute"],
                        "input_list": ["net_radio", "aux", "mc_link"],
                        "range_step": [{"id": "volume", "min": 0, "max": 80, "step": 1}]
                    }],
                    "netusb": {"func_list": ["play_queue"]}
                }"#,
            )
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("GET", "/YamahaExtendedControl/v1/system/getNameText")
            .with_body(
                r#"{
                    "response_code": 0,
                    "zone_list": [{"id": "main", "text": "Kitchen"}],
                    "input_list": [{"id": "net_radio", "text": "Net Radio"}]
                }"#,
            )
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("GET", "/YamahaExtendedControl/v1/system/getNetworkStatus")
            .with_body(r#"{"response_code":0,"network_name":"Kitchen"}"#)
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("GET", "/YamahaExtendedControl/v1/main/getStatus")
            .with_body(
                r#"{"response_code":0,"power":"on","volume":20,"mute":false,"input":"net_radio"}"#,
            )
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("GET", "/YamahaExtendedControl/v1/netusb/getPlayInfo")
            .with_body(r#"{"response_code":0,"playback":"stop"}"#)
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("GET", "/YamahaExtendedControl/v1/dist/getDistributionInfo")
            .with_body(
                r#"{"response_code":0,"group_id":"00000000000000000000000000000000","role":"none","client_list":[]}"#,
            )
            .create_async()
            .await,
    );
    mocks
}

fn host_of(server: &mockito::ServerGuard) -> String {
    server.url().trim_start_matches("http://").to_string()
}

fn config_for(server: &mockito::ServerGuard) -> EngineConfig {
    let mut config = EngineConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        ..EngineConfig::default()
    };
    config.devices.push(host_of(server).into());
    config
}

async fn recv(sub: &mut Subscription) -> ChangeNotification {
    timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("dispatcher closed")
}

#[tokio::test]
async fn test_discovery_poll_and_push() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_device(&mut server).await;

    let mut engine = MusicCastEngine::new(config_for(&server));
    let mut changes = engine.subscribe(ChangeFilter::all());
    engine.start().await.unwrap();

    // initial poll: the main zone surfaces first
    let note = recv(&mut changes).await;
    let device = DeviceId::new(DEVICE_ID);
    assert_eq!(note.device_id, device);
    assert_eq!(note.resource, Resource::Zone(ZoneId::Main));
    assert!(note.changed_fields.contains("power"));
    assert!(note.changed_fields.contains("volume"));
    let zone = &note.snapshot.device(&device).unwrap().zones[&ZoneId::Main];
    assert_eq!(zone.volume, Some(20));
    assert_eq!(zone.input.as_deref(), Some("net_radio"));

    // then playback info
    let note = recv(&mut changes).await;
    assert_eq!(note.resource, Resource::Playback);
    assert!(note.changed_fields.contains("playback_state"));

    // the device is established with validated capabilities
    assert_eq!(engine.devices(), vec![device.clone()]);
    let snapshot = engine.snapshot();
    let caps = &snapshot.device(&device).unwrap().capabilities;
    assert_eq!(
        caps.zone(ZoneId::Main).unwrap().name.as_deref(),
        Some("Kitchen")
    );

    // a push notification over real UDP updates the same zone
    let port = engine.notification_port().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(
            format!(r#"{{"device_id":"{DEVICE_ID}","main":{{"volume":25}}}}"#).as_bytes(),
            ("127.0.0.1", port),
        )
        .await
        .unwrap();

    let note = recv(&mut changes).await;
    assert_eq!(note.resource, Resource::Zone(ZoneId::Main));
    assert_eq!(
        note.changed_fields.iter().copied().collect::<Vec<_>>(),
        vec!["volume"]
    );
    assert_eq!(
        note.snapshot.device(&device).unwrap().zones[&ZoneId::Main].volume,
        Some(25)
    );

    engine.stop().await.unwrap();
    assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
}

#[tokio::test]
async fn test_commands_validated_against_capabilities() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_device(&mut server).await;
    let volume_mock = server
        .mock("GET", "/YamahaExtendedControl/v1/main/setVolume")
        .match_query(mockito::Matcher::UrlEncoded("volume".into(), "30".into()))
        .with_body(r#"{"response_code":0}"#)
        .create_async()
        .await;

    let mut engine = MusicCastEngine::new(config_for(&server));
    let mut changes = engine.subscribe(ChangeFilter::all());
    engine.start().await.unwrap();

    // wait until discovery completed
    recv(&mut changes).await;
    let device = DeviceId::new(DEVICE_ID);
    let handle = engine.device(&device).unwrap();

    // within range: goes to the device
    handle.set_volume(ZoneId::Main, 30).await.unwrap();
    volume_mock.assert_async().await;

    // outside the advertised range: rejected locally
    let err = handle.set_volume(ZoneId::Main, 200).await.unwrap_err();
    assert!(matches!(err, EngineError::VolumeOutOfRange { max: 80, .. }));

    // input not in the capability list: rejected locally
    let err = handle.select_input(ZoneId::Main, "tuner").await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownInput { .. }));

    // zone the device does not advertise: rejected locally
    let err = handle.set_volume(ZoneId::Zone2, 10).await.unwrap_err();
    assert!(matches!(err, EngineError::State(_)));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_udp_source_counted_not_dispatched() {
    // no devices tracked at all
    let config = EngineConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        ..EngineConfig::default()
    };
    let mut engine = MusicCastEngine::new(config);
    let mut changes = engine.subscribe(ChangeFilter::all());
    engine.start().await.unwrap();

    let port = engine.notification_port().unwrap();
    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    sender
        .send_to(br#"{"main":{"volume":25}}"#, ("127.0.0.1", port))
        .await
        .unwrap();

    // the datagram is counted as unknown-source, and nothing reaches
    // subscribers or the store
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if engine.listener_stats().unwrap().unknown_source >= 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "datagram never counted"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(timeout(Duration::from_millis(200), changes.recv())
        .await
        .is_err());
    assert!(engine.snapshot().devices.is_empty());

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn test_untrack_device_removes_state() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = mock_device(&mut server).await;

    let mut engine = MusicCastEngine::new(config_for(&server));
    let mut changes = engine.subscribe(ChangeFilter::all());
    engine.start().await.unwrap();
    recv(&mut changes).await;

    let device = DeviceId::new(DEVICE_ID);
    assert!(engine.snapshot().device(&device).is_some());

    engine.untrack_device(&device).await.unwrap();
    assert!(engine.snapshot().device(&device).is_none());
    assert!(engine.device(&device).is_err());

    engine.stop().await.unwrap();
}
