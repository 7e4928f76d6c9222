// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-connection protocol state machine: handshake, ServerInit, and the
//! active loop that turns surface snapshots into `FramebufferUpdate`
//! messages and client input into host-side events.

use crate::auth::{self, SecurityType};
use crate::converter::PixelConverter;
use crate::dispatcher::{self, ClientMessage};
use crate::error::{Result, VncError};
use crate::events::Event;
use crate::protocol::*;
use crate::region::{RegionQueue, RegionRequest};
use crate::server::{ClientFlags, ClientShared};
use crate::snapshot::Snapshot;
use crate::stream::ByteStream;
use bytes::{BufMut, BytesMut};
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

/// Time budget for the handshake's individual reads.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on a single active-loop tick's message read.
const CLIENT_TIMEOUT: Duration = Duration::from_millis(250);

struct ClientState {
    pixel_format: PixelFormat,
    converter: PixelConverter,
    capabilities: HashSet<i32>,
    region_queue: RegionQueue,
    last_rows: HashMap<u16, Arc<[u8]>>,
    width: u16,
    height: u16,
    pointer_x: i32,
    pointer_y: i32,
    buttons: u8,
    push_frames: bool,
    last_update: Instant,
    min_frame_period: Duration,
    last_name: String,
}

/// Drives one accepted TCP connection through the full RFB lifecycle.
pub(crate) async fn handle_connection(
    socket: tokio::net::TcpStream,
    client_id: usize,
    shared: Arc<ClientShared>,
    flags: Arc<ClientFlags>,
) -> Result<()> {
    let mut stream = ByteStream::new(socket);

    let minor = protocol_version_handshake(&mut stream).await?;
    let read_only_connection = shared.options.effective_read_only();
    let security_type = security_handshake(&mut stream, minor, &shared, read_only_connection).await?;
    let auth_result = auth::authenticate(
        security_type,
        &mut stream,
        &shared.options,
        read_only_connection,
        HANDSHAKE_TIMEOUT,
    )
    .await;
    match &auth_result {
        Ok(()) => send_security_result(&mut stream, minor, security_type, Ok(())).await?,
        Err(VncError::SecurityFailed(reason)) => {
            send_security_result(&mut stream, minor, security_type, Err(reason.clone())).await?;
        }
        Err(_) => {}
    }
    auth_result?;

    client_init(&mut stream).await?;
    let (width, height, name) = {
        let cache = shared.snapshot.lock().await;
        let (w, h) = cache.get_size();
        (w, h, shared.display_name.read().clone())
    };
    let init_format = PixelFormat::canonical();
    let server_init = ServerInit {
        framebuffer_width: width,
        framebuffer_height: height,
        pixel_format: init_format,
        name: name.clone(),
    };
    let mut buf = BytesMut::new();
    server_init.write_to(&mut buf);
    stream.write(&buf).await?;

    let mut state = ClientState {
        pixel_format: init_format,
        converter: PixelConverter::build(&init_format)?,
        capabilities: HashSet::new(),
        region_queue: RegionQueue::new(),
        last_rows: HashMap::new(),
        width,
        height,
        pointer_x: -1,
        pointer_y: -1,
        buttons: 0,
        push_frames: shared.options.push_requests,
        last_update: Instant::now() - Duration::from_secs(1),
        min_frame_period: Duration::from_secs_f64(1.0 / shared.options.max_framerate.max(1) as f64),
        last_name: name,
    };

    info!("client {client_id} active ({width}x{height})");
    active_loop(&mut stream, client_id, &shared, &flags, &mut state, read_only_connection).await
}

async fn protocol_version_handshake<S>(stream: &mut ByteStream<S>) -> Result<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write(PROTOCOL_VERSION.as_bytes()).await?;
    let line = stream.read_until(b'\n', HANDSHAKE_TIMEOUT).await?;
    let text = String::from_utf8_lossy(&line);
    if !text.starts_with("RFB 003") {
        return Err(VncError::ProtocolVersionUnsupported(text.to_string()));
    }
    let minor: u8 = text
        .rsplit('.')
        .next()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| VncError::ProtocolVersionUnsupported(text.to_string()))?;
    Ok(minor)
}

async fn security_handshake<S>(
    stream: &mut ByteStream<S>,
    minor: u8,
    shared: &ClientShared,
    read_only_connection: bool,
) -> Result<SecurityType>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if minor >= 7 {
        let types = auth::available_types(&shared.options, read_only_connection);
        if types.is_empty() {
            stream.write(&[0u8]).await?;
            return Err(VncError::SecurityUnavailable);
        }
        let mut buf = BytesMut::new();
        buf.put_u8(types.len() as u8);
        for t in &types {
            buf.put_u8(t.code());
        }
        stream.write(&buf).await?;

        let chosen = stream.read_exact(1, HANDSHAKE_TIMEOUT).await?[0];
        types
            .into_iter()
            .find(|t| t.code() == chosen)
            .ok_or(VncError::SecurityUnavailable)
    } else {
        let choice = auth::legacy_choice(&shared.options, read_only_connection)
            .ok_or(VncError::SecurityUnavailable)?;
        let mut buf = BytesMut::new();
        buf.put_u32(choice.code() as u32);
        stream.write(&buf).await?;
        Ok(choice)
    }
}

async fn send_security_result<S>(
    stream: &mut ByteStream<S>,
    minor: u8,
    security_type: SecurityType,
    result: std::result::Result<(), String>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let has_result = minor >= 8 || security_type != SecurityType::None;
    if !has_result {
        return Ok(());
    }
    let mut buf = BytesMut::new();
    match &result {
        Ok(()) => buf.put_u32(SECURITY_RESULT_OK),
        Err(_) => buf.put_u32(SECURITY_RESULT_FAILED),
    }
    if let Err(reason) = &result {
        if minor >= 8 {
            buf.put_u32(reason.len() as u32);
            buf.put_slice(reason.as_bytes());
        }
    }
    stream.write(&buf).await?;
    Ok(())
}

async fn client_init<S>(stream: &mut ByteStream<S>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let shared_flag = stream.read_exact(1, HANDSHAKE_TIMEOUT).await?[0];
    if shared_flag == 0 {
        // Exclusive access is logged and denied; the connection continues
        // in shared mode rather than closing any other client.
        warn!("client requested exclusive access; continuing in shared mode");
    }
    Ok(())
}

async fn active_loop<S>(
    stream: &mut ByteStream<S>,
    client_id: usize,
    shared: &ClientShared,
    flags: &ClientFlags,
    state: &mut ClientState,
    read_only_connection: bool,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        if flags.closed.load(Ordering::SeqCst) || stream.is_closed() {
            return Ok(());
        }

        let time_until_frame = state
            .min_frame_period
            .saturating_sub(state.last_update.elapsed());
        let tick_budget = CLIENT_TIMEOUT.min(time_until_frame.max(Duration::from_millis(1)));

        match dispatcher::read_message(stream, tick_budget).await {
            Ok(message) => {
                dispatch_one(message, shared, state, read_only_connection, client_id).await?;
            }
            Err(VncError::TransportTimeout) => {}
            Err(e) => return Err(e),
        }

        if flags.frame_pushed.load(Ordering::SeqCst)
            && state.push_frames
            && state.region_queue.is_empty()
            && state.last_update.elapsed() >= state.min_frame_period
        {
            state
                .region_queue
                .add(RegionRequest::full_frame(state.width, state.height));
        }

        if flags.display_changed.swap(false, Ordering::SeqCst) {
            handle_display_changed(stream, shared, state).await?;
        }

        if flags.name_changed.swap(false, Ordering::SeqCst) {
            handle_name_changed(stream, shared, state).await?;
        }

        if state.last_update.elapsed() >= state.min_frame_period {
            while let Some(request) = state.region_queue.pop() {
                update_framebuffer(stream, shared, state, request).await?;
            }
            state.last_update = Instant::now();
            flags.frame_pushed.store(false, Ordering::SeqCst);
        }
    }
}

async fn dispatch_one(
    message: ClientMessage,
    shared: &ClientShared,
    state: &mut ClientState,
    read_only_connection: bool,
    client_id: usize,
) -> Result<()> {
    match message {
        ClientMessage::SetPixelFormat(format) => {
            state.converter = PixelConverter::build(&format)?;
            state.pixel_format = format;
        }
        ClientMessage::SetEncodings(codes) => {
            state.capabilities = codes.into_iter().collect();
            if state.capabilities.contains(&ENCODING_PUSH_FRAMES) {
                state.push_frames = true;
            }
        }
        ClientMessage::FramebufferUpdateRequest {
            incremental,
            x,
            y,
            width,
            height,
        } => {
            state.region_queue.add(RegionRequest {
                incremental,
                x,
                y,
                width,
                height,
            });
        }
        ClientMessage::KeyEvent { key, down } => {
            if !read_only_connection {
                shared.event_tx.publish(Event::key(key, down)).await;
            }
        }
        ClientMessage::PointerEvent { x, y, button_mask } => {
            if !read_only_connection {
                publish_pointer_event(shared, state, x, y, button_mask).await;
            }
        }
        ClientMessage::ClientCutText(text) => {
            if !read_only_connection {
                info!("client {client_id} clipboard: {text}");
            }
        }
    }
    Ok(())
}

async fn publish_pointer_event(
    shared: &ClientShared,
    state: &mut ClientState,
    x: u16,
    y: u16,
    button_mask: u8,
) {
    if state.pointer_x != x as i32 || state.pointer_y != y as i32 {
        shared
            .event_tx
            .publish(Event::pointer_move(x, y, button_mask))
            .await;
        state.pointer_x = x as i32;
        state.pointer_y = y as i32;
    }
    let diff = state.buttons ^ button_mask;
    for bit in 0..8u8 {
        let mask = 1u8 << bit;
        if diff & mask != 0 {
            let down = button_mask & mask != 0;
            shared
                .event_tx
                .publish(Event::pointer_click(x, y, bit, down))
                .await;
        }
    }
    state.buttons = button_mask;
}

async fn handle_display_changed<S>(
    stream: &mut ByteStream<S>,
    shared: &ClientShared,
    state: &mut ClientState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (new_w, new_h) = shared.snapshot.lock().await.get_size();
    if new_w == state.width && new_h == state.height {
        return Ok(());
    }
    if state.capabilities.contains(&ENCODING_DESKTOP_SIZE) {
        let mut buf = BytesMut::new();
        buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        buf.put_u8(0);
        buf.put_u16(1);
        Rectangle {
            x: 0,
            y: 0,
            width: new_w,
            height: new_h,
            encoding: ENCODING_DESKTOP_SIZE,
        }
        .write_header(&mut buf);
        stream.write(&buf).await?;
        state.last_rows.clear();
        state.region_queue.clear();
        state.region_queue.add(RegionRequest::full_frame(new_w, new_h));
    } else {
        warn!("surface resized but client lacks DesktopSize capability; skipping notification");
    }
    state.width = new_w;
    state.height = new_h;
    Ok(())
}

async fn handle_name_changed<S>(
    stream: &mut ByteStream<S>,
    shared: &ClientShared,
    state: &mut ClientState,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = shared.display_name.read().clone();
    if name == state.last_name {
        return Ok(());
    }
    if state.capabilities.contains(&ENCODING_DESKTOP_NAME) {
        let mut buf = BytesMut::new();
        buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
        buf.put_u8(0);
        buf.put_u16(1);
        Rectangle {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            encoding: ENCODING_DESKTOP_NAME,
        }
        .write_header(&mut buf);
        buf.put_u32(name.len() as u32);
        buf.put_slice(name.as_bytes());
        stream.write(&buf).await?;
    }
    state.last_name = name;
    Ok(())
}

/// Computes the maximal runs of rows that differ from `state.last_rows`
/// (or, for a non-incremental request, the single run covering the whole
/// requested height) and writes them as one `FramebufferUpdate` message.
async fn update_framebuffer<S>(
    stream: &mut ByteStream<S>,
    shared: &ClientShared,
    state: &mut ClientState,
    request: RegionRequest,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let snapshot = shared.snapshot.lock().await.get_data()?;
    let end = (request.y as u32 + request.height as u32).min(snapshot.height as u32) as u16;
    let start = request.y.min(end);

    let runs = if !request.incremental {
        if end > start {
            vec![(start, end - start)]
        } else {
            vec![]
        }
    } else {
        diff_runs(&snapshot, &state.last_rows, start, end)
    };

    write_update(stream, &snapshot, &state.converter, &runs, &mut state.last_rows).await
}

/// Row-run diff using an explicit `Option` check for the run start — never a
/// truthiness test — so that row 0 is a valid run start.
fn diff_runs(
    snapshot: &Snapshot,
    last_rows: &HashMap<u16, Arc<[u8]>>,
    start: u16,
    end: u16,
) -> Vec<(u16, u16)> {
    let mut runs = Vec::new();
    let mut diff_start: Option<u16> = None;
    for y in start..end {
        let current = &snapshot.rows[y as usize];
        let changed = match last_rows.get(&y) {
            None => true,
            Some(prev) => prev.as_ref() != current.as_ref(),
        };
        if changed {
            if diff_start.is_none() {
                diff_start = Some(y);
            }
        } else if let Some(run_start) = diff_start {
            runs.push((run_start, y - run_start));
            diff_start = None;
        }
    }
    if let Some(run_start) = diff_start {
        runs.push((run_start, end - run_start));
    }
    runs
}

async fn write_update<S>(
    stream: &mut ByteStream<S>,
    snapshot: &Snapshot,
    converter: &PixelConverter,
    runs: &[(u16, u16)],
    last_rows: &mut HashMap<u16, Arc<[u8]>>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    buf.put_u8(SERVER_MSG_FRAMEBUFFER_UPDATE);
    buf.put_u8(0);
    buf.put_u16(runs.len() as u16);

    for &(start, count) in runs {
        Rectangle {
            x: 0,
            y: start,
            width: snapshot.width,
            height: count,
            encoding: ENCODING_RAW,
        }
        .write_header(&mut buf);
        for row in start..start + count {
            let row_bytes = &snapshot.rows[row as usize];
            buf.put_slice(&converter.convert_row(row_bytes));
            last_rows.insert(row, row_bytes.clone());
        }
    }

    stream.write(&buf).await?;
    Ok(())
}
