//! End-to-end tests over a real WebSocket connection using the stub detector.

use std::io::Cursor;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgb, RgbImage};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use hazard_relay::detect::{StubBackend, StubObject};
use hazard_relay::{
    ApiConfig, DetectorBackend, FramePipeline, FrameResponse, PipelineSettings, StreamHandle,
    StreamServer,
};

type Client = WebSocket<MaybeTlsStream<TcpStream>>;

fn jpeg_data_url(width: u32, height: u32) -> String {
    let img = RgbImage::from_pixel(width, height, Rgb([90, 120, 150]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).expect("encode jpeg");
    format!("data:image/jpeg;base64,{}", STANDARD.encode(out.into_inner()))
}

fn start(
    detector: Arc<dyn DetectorBackend>,
    settings: PipelineSettings,
    cfg: ApiConfig,
) -> StreamHandle {
    let pipeline = Arc::new(FramePipeline::new(detector, settings));
    let cfg = ApiConfig {
        addr: "127.0.0.1:0".to_string(),
        ..cfg
    };
    StreamServer::new(cfg, pipeline).spawn().expect("spawn server")
}

fn connect(handle: &StreamHandle, path: &str) -> Client {
    let url = format!("ws://{}{}", handle.addr, path);
    let (client, _) = tungstenite::connect(url).expect("connect");
    if let MaybeTlsStream::Plain(stream) = client.get_ref() {
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("set timeout");
    }
    client
}

fn next_response(client: &mut Client) -> FrameResponse {
    loop {
        match client.read().expect("read response") {
            Message::Text(text) => return serde_json::from_str(&text).expect("parse response"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

#[test]
fn relays_mapped_boxes_and_alerts() {
    let stub = Arc::new(StubBackend::with_objects(vec![
        StubObject::new("person", 0.91, 0.15625, 0.25, 0.3125, 0.5),
        StubObject::new("cup", 0.40, 0.0, 0.0, 0.5, 0.5),
    ]));
    let handle = start(stub, PipelineSettings::default(), ApiConfig::default());
    let mut client = connect(&handle, "/ws");

    client
        .send(Message::Text(jpeg_data_url(640, 480)))
        .expect("send frame");
    let response = next_response(&mut client);

    // The low-confidence cup never reaches the client.
    assert_eq!(response.boxes.len(), 1);
    let b = &response.boxes[0];
    assert_eq!(b.class_name, "person");
    assert_eq!(b.conf, 0.91);
    assert_eq!((b.x1, b.y1, b.x2, b.y2), (220, 60, 270, 120));
    assert_eq!(response.alerts, vec!["Hazard: person detected!"]);

    // Same class on the next frame: boxes again, no repeated alert.
    client
        .send(Message::Text(jpeg_data_url(640, 480)))
        .expect("send frame");
    let response = next_response(&mut client);
    assert_eq!(response.boxes.len(), 1);
    assert!(response.alerts.is_empty());

    client.close(None).expect("close");
    handle.stop().expect("stop");
}

#[test]
fn hazard_alerts_follow_class_transitions() {
    let obj = |class: &str| vec![StubObject::new(class, 0.9, 0.1, 0.1, 0.2, 0.2)];
    let stub = Arc::new(StubBackend::scripted(vec![
        obj("person"),
        obj("person"),
        obj("car"),
        obj("car"),
        obj("person"),
    ]));
    let handle = start(stub, PipelineSettings::default(), ApiConfig::default());
    let mut client = connect(&handle, "/ws");

    let mut alerts = Vec::new();
    for _ in 0..5 {
        client
            .send(Message::Text(jpeg_data_url(64, 48)))
            .expect("send frame");
        alerts.push(next_response(&mut client).alerts);
    }
    assert_eq!(alerts[0], vec!["Hazard: person detected!"]);
    assert!(alerts[1].is_empty());
    assert_eq!(alerts[2], vec!["Hazard: car detected!"]);
    assert!(alerts[3].is_empty());
    assert_eq!(alerts[4], vec!["Hazard: person detected!"]);

    handle.stop().expect("stop");
}

#[test]
fn malformed_frames_are_skipped_and_connection_stays_open() {
    let stub = Arc::new(StubBackend::with_objects(vec![StubObject::new(
        "car", 0.8, 0.0, 0.0, 0.5, 0.5,
    )]));
    let handle = start(stub.clone(), PipelineSettings::default(), ApiConfig::default());
    let mut client = connect(&handle, "/ws");

    for bad in [
        "no comma at all",
        "data:image/jpeg;base64,!!!!",
        "data:image/png;base64,aGVsbG8gd29ybGQ=",
    ] {
        client.send(Message::Text(bad.to_string())).expect("send bad frame");
    }
    client
        .send(Message::Text(jpeg_data_url(32, 32)))
        .expect("send frame");

    let response = next_response(&mut client);
    assert_eq!(response.boxes.len(), 1);
    assert_eq!(response.boxes[0].class_name, "car");
    assert_eq!(stub.calls(), 1);

    handle.stop().expect("stop");
}

#[test]
fn binary_messages_carry_raw_image_bytes() {
    let stub = Arc::new(StubBackend::with_objects(vec![StubObject::new(
        "bus", 0.99, 0.0, 0.0, 1.0, 1.0,
    )]));
    let handle = start(stub, PipelineSettings::default(), ApiConfig::default());
    let mut client = connect(&handle, "/ws");

    let img = RgbImage::from_pixel(16, 16, Rgb([0, 0, 0]));
    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, ImageFormat::Png).expect("encode png");
    client
        .send(Message::Binary(png.into_inner()))
        .expect("send frame");

    let response = next_response(&mut client);
    let b = &response.boxes[0];
    assert_eq!((b.x1, b.y1, b.x2, b.y2), (0, 0, 320, 240));
    assert_eq!(response.alerts, vec!["Hazard: bus detected!"]);

    handle.stop().expect("stop");
}

#[test]
fn unknown_path_is_rejected() {
    let handle = start(
        Arc::new(StubBackend::new()),
        PipelineSettings::default(),
        ApiConfig::default(),
    );
    let url = format!("ws://{}/other", handle.addr);
    match tungstenite::connect(url) {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("handshake on unknown path succeeded"),
    }
    handle.stop().expect("stop");
}

#[test]
fn connections_beyond_cap_are_refused() {
    let cfg = ApiConfig {
        max_connections: Some(1),
        ..ApiConfig::default()
    };
    let handle = start(Arc::new(StubBackend::new()), PipelineSettings::default(), cfg);
    let _first = connect(&handle, "/ws");

    let url = format!("ws://{}/ws", handle.addr);
    match tungstenite::connect(url) {
        Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 503),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("connection over the cap was accepted"),
    }
    handle.stop().expect("stop");
}

#[test]
fn empty_responses_suppressed_when_configured() {
    let stub = Arc::new(StubBackend::scripted(vec![
        vec![],
        vec![StubObject::new("dog", 0.9, 0.0, 0.0, 0.5, 0.5)],
    ]));
    let settings = PipelineSettings {
        send_empty: false,
        ..PipelineSettings::default()
    };
    let handle = start(stub, settings, ApiConfig::default());
    let mut client = connect(&handle, "/ws");

    client
        .send(Message::Text(jpeg_data_url(32, 32)))
        .expect("send frame");
    client
        .send(Message::Text(jpeg_data_url(32, 32)))
        .expect("send frame");

    // Only the second frame produces a message.
    let response = next_response(&mut client);
    assert_eq!(response.boxes[0].class_name, "dog");
    assert!(response.alerts.is_empty());

    handle.stop().expect("stop");
}
