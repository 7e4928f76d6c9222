//! A static gradient surface served over VNC.
//!
//! Usage:
//!   cargo run --example static_pattern
//!
//! Then connect with a VNC viewer to localhost:5900, password "test123".

use parking_lot::Mutex;
use std::error::Error;
use std::sync::Arc;
use surfacevnc::server::{ServerOptions, VncServer};
use surfacevnc::surface::{LockedSurface, MemorySurface, Surface, SurfaceFormat};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let (width, height) = (800u16, 600u16);
    let mut surface = MemorySurface::new(width, height, SurfaceFormat::Argb32);
    {
        let stride = surface.get_stride();
        let data = surface.data_mut();
        for y in 0..height as usize {
            for x in 0..width as usize {
                let offset = y * stride + x * 4;
                data[offset] = 128; // B
                data[offset + 1] = (y * 255 / height as usize) as u8; // G
                data[offset + 2] = (x * 255 / width as usize) as u8; // R
                data[offset + 3] = 0;
            }
        }
    }

    let locked = LockedSurface::new(Arc::new(Mutex::new(surface)));
    let options = ServerOptions::new(5900)
        .with_password("test123")
        .with_display_name("static pattern");
    let server = VncServer::new(locked, options);

    println!("Connect with: vncviewer localhost:5900 (password: test123)");
    server.serve().await?;
    Ok(())
}
