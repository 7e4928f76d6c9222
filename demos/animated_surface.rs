//! Animated surface driven by a background task, with VNC pointer/key input
//! steering the animation — the Rust analogue of `example_push.py` in the
//! original reference implementation's demo suite.
//!
//! Usage:
//!   cargo run --example animated_surface
//!
//! Then connect with a VNC viewer to localhost:5901.

use parking_lot::Mutex;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use surfacevnc::events::EventKind;
use surfacevnc::server::{ServerOptions, VncServer};
use surfacevnc::surface::{LockedSurface, MemorySurface, Surface, SurfaceFormat};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let (width, height) = (200u16, 200u16);
    let surface = Arc::new(Mutex::new(MemorySurface::new(width, height, SurfaceFormat::Argb32)));
    let options = ServerOptions::new(5901)
        .with_display_name("animated surface")
        .with_read_only(false);
    let server = Arc::new(VncServer::new(LockedSurface::new(surface.clone()), options));

    let server_for_animation = server.clone();
    tokio::spawn(async move {
        let mut ctrl_x: u16 = width / 2;
        let mut ctrl_y: u16 = height / 2;
        let mut tick: u32 = 0;
        loop {
            while let Some(event) = server_for_animation.get_event(Some(Duration::from_millis(10))).await {
                match event.kind {
                    EventKind::PointerMove { x, y, .. } => {
                        ctrl_x = x;
                        ctrl_y = y;
                    }
                    EventKind::PointerClick { down: true, .. } => {
                        tick = tick.wrapping_add(37);
                    }
                    EventKind::KeyEvent { .. } => {}
                    _ => {}
                }
            }

            {
                let mut surface = surface.lock();
                let stride = surface.get_stride();
                tick = tick.wrapping_add(1);
                let data = surface.data_mut();
                for y in 0..height as usize {
                    for x in 0..width as usize {
                        let dx = x as i32 - ctrl_x as i32;
                        let dy = y as i32 - ctrl_y as i32;
                        let near_cursor = dx * dx + dy * dy < 400;
                        let offset = y * stride + x * 4;
                        data[offset] = ((x + tick as usize) % 256) as u8; // B
                        data[offset + 1] = ((y + tick as usize / 2) % 256) as u8; // G
                        data[offset + 2] = if near_cursor { 255 } else { 64 }; // R
                        data[offset + 3] = 0;
                    }
                }
            }
            server_for_animation.notify_frame_ready();
            tokio::time::sleep(Duration::from_millis(33)).await;
        }
    });

    println!("Connect with: vncviewer localhost:5901");
    server.serve().await?;
    Ok(())
}
