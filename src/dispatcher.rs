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

//! Parses one inbound client message per call and returns a decoded
//! [`ClientMessage`], reading any variable-length tail the message type
//! requires.
//!
//! The dispatch table is the fixed payload size (beyond the type byte) each
//! message carries; `SetEncodings` and `ClientCutText` read additional bytes
//! once their fixed header reveals a length.

use crate::error::{Result, VncError};
use crate::protocol::*;
use crate::stream::ByteStream;
use bytes::Buf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// A fully decoded client-to-server message.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest {
        incremental: bool,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    KeyEvent { key: u32, down: bool },
    PointerEvent { x: u16, y: u16, button_mask: u8 },
    ClientCutText(String),
}

/// The fixed payload length (in bytes, after the type byte and any
/// type-specific padding already consumed) for each known message type.
fn fixed_payload_len(msg_type: u8) -> Option<usize> {
    match msg_type {
        CLIENT_MSG_SET_PIXEL_FORMAT => Some(3 + 16), // padding + PixelFormat
        CLIENT_MSG_SET_ENCODINGS => Some(3),          // padding + u16 count
        CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => Some(9),
        CLIENT_MSG_KEY_EVENT => Some(7),
        CLIENT_MSG_POINTER_EVENT => Some(5),
        CLIENT_MSG_CLIENT_CUT_TEXT => Some(7), // padding + u32 length
        _ => None,
    }
}

/// Reads one message type byte and the message it introduces, closing the
/// connection on an unknown type per the protocol's dispatcher contract.
pub async fn read_message<S>(
    stream: &mut ByteStream<S>,
    timeout: Duration,
) -> Result<ClientMessage>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let type_byte = stream.read_exact(1, timeout).await?[0];
    let len = fixed_payload_len(type_byte).ok_or(VncError::UnknownMessageType(type_byte))?;
    let payload = stream.read_exact(len, timeout).await?;
    let mut buf = bytes::BytesMut::from(&payload[..]);

    match type_byte {
        CLIENT_MSG_SET_PIXEL_FORMAT => {
            buf.advance(3);
            let format = PixelFormat::from_bytes(&mut buf)?;
            Ok(ClientMessage::SetPixelFormat(format))
        }
        CLIENT_MSG_SET_ENCODINGS => {
            buf.advance(1);
            let count = buf.get_u16() as usize;
            let tail = stream.read_exact(count * 4, timeout).await?;
            let mut tail = bytes::BytesMut::from(&tail[..]);
            let mut encodings = Vec::with_capacity(count);
            for _ in 0..count {
                encodings.push(tail.get_i32());
            }
            Ok(ClientMessage::SetEncodings(encodings))
        }
        CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST => {
            let incremental = buf.get_u8() != 0;
            let x = buf.get_u16();
            let y = buf.get_u16();
            let width = buf.get_u16();
            let height = buf.get_u16();
            Ok(ClientMessage::FramebufferUpdateRequest {
                incremental,
                x,
                y,
                width,
                height,
            })
        }
        CLIENT_MSG_KEY_EVENT => {
            let down = buf.get_u8() != 0;
            buf.advance(2);
            let key = buf.get_u32();
            Ok(ClientMessage::KeyEvent { key, down })
        }
        CLIENT_MSG_POINTER_EVENT => {
            let button_mask = buf.get_u8();
            let x = buf.get_u16();
            let y = buf.get_u16();
            Ok(ClientMessage::PointerEvent { x, y, button_mask })
        }
        CLIENT_MSG_CLIENT_CUT_TEXT => {
            buf.advance(3);
            let len = buf.get_u32() as usize;
            let text_bytes = stream.read_exact(len, timeout).await?;
            let text = text_bytes.iter().map(|&b| b as char).collect();
            Ok(ClientMessage::ClientCutText(text))
        }
        other => Err(VncError::UnknownMessageType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;
    use tokio::io::{duplex, AsyncWriteExt};

    async fn send_and_read(bytes_to_send: &[u8]) -> Result<ClientMessage> {
        let (mut client, server) = duplex(256);
        let mut stream = ByteStream::new(server);
        client.write_all(bytes_to_send).await.unwrap();
        read_message(&mut stream, Duration::from_millis(200)).await
    }

    #[tokio::test]
    async fn decodes_framebuffer_update_request() {
        let bytes = [
            CLIENT_MSG_FRAMEBUFFER_UPDATE_REQUEST,
            0x00,
            0x00, 0x00,
            0x00, 0x00,
            0x00, 0x02,
            0x00, 0x02,
        ];
        let msg = send_and_read(&bytes).await.unwrap();
        match msg {
            ClientMessage::FramebufferUpdateRequest { incremental, x, y, width, height } => {
                assert!(!incremental);
                assert_eq!((x, y, width, height), (0, 0, 2, 2));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn decodes_pointer_event() {
        let bytes = [CLIENT_MSG_POINTER_EVENT, 0x01, 0x00, 0x10, 0x00, 0x20];
        let msg = send_and_read(&bytes).await.unwrap();
        match msg {
            ClientMessage::PointerEvent { x, y, button_mask } => {
                assert_eq!((x, y, button_mask), (16, 32, 1));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn decodes_set_encodings_variable_tail() {
        let mut bytes = vec![CLIENT_MSG_SET_ENCODINGS, 0x00];
        bytes.put_u16(2);
        bytes.put_i32(ENCODING_RAW);
        bytes.put_i32(ENCODING_DESKTOP_SIZE);
        let msg = send_and_read(&bytes).await.unwrap();
        match msg {
            ClientMessage::SetEncodings(codes) => {
                assert_eq!(codes, vec![ENCODING_RAW, ENCODING_DESKTOP_SIZE]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn unknown_message_type_errors() {
        let bytes = [0xFFu8];
        let result = send_and_read(&bytes).await;
        assert!(matches!(result, Err(VncError::UnknownMessageType(0xFF))));
    }
}
