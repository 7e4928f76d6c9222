//! End-to-end protocol scenarios driven over a real loopback TCP connection,
//! exercising the same byte sequences a real VNC viewer would send.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use surfacevnc::server::{ServerOptions, VncServer};
use surfacevnc::surface::{LockedSurface, MemorySurface, SurfaceFormat};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn connect(port: u16) -> TcpStream {
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    stream.read_exact(&mut buf).await.unwrap();
    buf
}

fn spawn_server(options: ServerOptions, width: u16, height: u16) -> Arc<VncServer> {
    let surface = Arc::new(Mutex::new(MemorySurface::new(width, height, SurfaceFormat::Argb32)));
    let server = Arc::new(VncServer::new(LockedSurface::new(surface), options));
    let server_for_task = server.clone();
    tokio::spawn(async move {
        let _ = server_for_task.serve().await;
    });
    server
}

#[tokio::test]
async fn no_auth_handshake_reaches_server_init() {
    let port = free_port().await;
    let options = ServerOptions::new(port).with_display_name("no-auth demo");
    let _server = spawn_server(options, 64, 48);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut client = connect(port).await;

    let version = read_n(&mut client, 12).await;
    assert_eq!(&version, b"RFB 003.008\n");
    client.write_all(b"RFB 003.008\n").await.unwrap();

    // 3.8+ security: count + types.
    let count = read_n(&mut client, 1).await[0];
    assert!(count >= 1);
    let types = read_n(&mut client, count as usize).await;
    assert!(types.contains(&1u8)); // SECURITY_TYPE_NONE

    client.write_all(&[1u8]).await.unwrap(); // choose None

    let result = read_n(&mut client, 4).await;
    assert_eq!(u32::from_be_bytes(result.try_into().unwrap()), 0); // OK

    client.write_all(&[1u8]).await.unwrap(); // ClientInit: shared

    let mut header = read_n(&mut client, 4).await; // width, height
    let width = u16::from_be_bytes([header[0], header[1]]);
    let height = u16::from_be_bytes([header[2], header[3]]);
    assert_eq!((width, height), (64, 48));

    let _pixel_format = read_n(&mut client, 16).await;
    header = read_n(&mut client, 4).await;
    let name_len = u32::from_be_bytes(header.clone().try_into().unwrap()) as usize;
    let name = read_n(&mut client, name_len).await;
    assert_eq!(String::from_utf8(name).unwrap(), "no-auth demo");
}

#[tokio::test]
async fn vnc_auth_with_wrong_password_fails() {
    let port = free_port().await;
    let options = ServerOptions::new(port).with_password("correct-horse");
    let _server = spawn_server(options, 16, 16);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut client = connect(port).await;
    let _version = read_n(&mut client, 12).await;
    client.write_all(b"RFB 003.008\n").await.unwrap();

    let count = read_n(&mut client, 1).await[0];
    let types = read_n(&mut client, count as usize).await;
    assert!(types.contains(&2u8)); // SECURITY_TYPE_VNC_AUTH

    client.write_all(&[2u8]).await.unwrap(); // choose VncAuth

    let _challenge = read_n(&mut client, 16).await;
    // Any 16-byte response that isn't the correctly encrypted challenge
    // must be rejected.
    client.write_all(&[0u8; 16]).await.unwrap();

    let result = read_n(&mut client, 4).await;
    assert_eq!(u32::from_be_bytes(result.try_into().unwrap()), 1); // Failed

    let reason_len = read_n(&mut client, 4).await;
    let reason_len = u32::from_be_bytes(reason_len.try_into().unwrap()) as usize;
    let reason = read_n(&mut client, reason_len).await;
    assert!(!reason.is_empty());
    assert_eq!(String::from_utf8(reason).unwrap(), "Authentication by VNC Authentication failed");

    // The connection must be closed after a failed handshake.
    let mut probe = [0u8; 1];
    let n = client.read(&mut probe).await.unwrap();
    assert_eq!(n, 0);
}

async fn drive_no_auth_handshake(client: &mut TcpStream) -> (u16, u16) {
    let _version = read_n(client, 12).await;
    client.write_all(b"RFB 003.008\n").await.unwrap();
    let count = read_n(client, 1).await[0];
    let _types = read_n(client, count as usize).await;
    client.write_all(&[1u8]).await.unwrap();
    let _result = read_n(client, 4).await;
    client.write_all(&[1u8]).await.unwrap();
    let header = read_n(client, 4).await;
    let width = u16::from_be_bytes([header[0], header[1]]);
    let height = u16::from_be_bytes([header[2], header[3]]);
    let _pixel_format = read_n(client, 16).await;
    let name_len = u32::from_be_bytes(read_n(client, 4).await.try_into().unwrap()) as usize;
    let _name = read_n(client, name_len).await;
    (width, height)
}

#[tokio::test]
async fn first_full_frame_request_returns_one_raw_rectangle() {
    let port = free_port().await;
    let options = ServerOptions::new(port).with_max_framerate(1000);
    let _server = spawn_server(options, 2, 2);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut client = connect(port).await;
    let (width, height) = drive_no_auth_handshake(&mut client).await;
    assert_eq!((width, height), (2, 2));

    // FramebufferUpdateRequest: incremental=0, x=0, y=0, w=2, h=2
    let mut req = vec![3u8, 0];
    req.extend_from_slice(&0u16.to_be_bytes());
    req.extend_from_slice(&0u16.to_be_bytes());
    req.extend_from_slice(&2u16.to_be_bytes());
    req.extend_from_slice(&2u16.to_be_bytes());
    client.write_all(&req).await.unwrap();

    let header = read_n(&mut client, 4).await;
    assert_eq!(header[0], 0); // FramebufferUpdate
    let rect_count = u16::from_be_bytes([header[2], header[3]]);
    assert_eq!(rect_count, 1);

    let rect_header = read_n(&mut client, 12).await;
    let rect_width = u16::from_be_bytes([rect_header[4], rect_header[5]]);
    let rect_height = u16::from_be_bytes([rect_header[6], rect_header[7]]);
    let encoding = i32::from_be_bytes(rect_header[8..12].try_into().unwrap());
    assert_eq!((rect_width, rect_height, encoding), (2, 2, 0));

    let pixels = read_n(&mut client, 2 * 2 * 4).await;
    assert!(pixels.iter().all(|&b| b == 0)); // zeroed surface
}

#[tokio::test]
async fn pointer_event_fans_out_move_and_click() {
    let port = free_port().await;
    let options = ServerOptions::new(port).with_read_only(false);
    let server = spawn_server(options, 32, 32);
    tokio::time::sleep(Duration::from_millis(30)).await;

    let mut client = connect(port).await;
    drive_no_auth_handshake(&mut client).await;

    // PointerEvent: button-mask=1 (button 0 down), x=10, y=20
    let msg = [5u8, 1, 0, 10, 0, 20];
    client.write_all(&msg).await.unwrap();

    let first = server
        .get_event(Some(Duration::from_millis(500)))
        .await
        .expect("pointer move event");
    assert!(matches!(
        first.kind,
        surfacevnc::EventKind::PointerMove { x: 10, y: 20, .. }
    ));

    let second = server
        .get_event(Some(Duration::from_millis(500)))
        .await
        .expect("pointer click event");
    assert!(matches!(
        second.kind,
        surfacevnc::EventKind::PointerClick { button: 0, down: true, .. }
    ));
}
