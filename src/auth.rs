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

//! Pluggable security (authentication) modules: "None" and "VNC
//! Authentication" (DES challenge-response).

use crate::error::{Result, VncError};
use crate::protocol::{SECURITY_TYPE_NONE, SECURITY_TYPE_VNC_AUTH};
use crate::server::ServerOptions;
use crate::stream::ByteStream;
use cipher::{BlockEncrypt, KeyInit};
use des::Des;
use rand::RngCore;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// One of the two security types this server offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityType {
    /// No authentication.
    None,
    /// DES challenge-response authentication.
    VncAuth,
}

impl SecurityType {
    /// The wire code for this security type.
    pub fn code(self) -> u8 {
        match self {
            SecurityType::None => SECURITY_TYPE_NONE,
            SecurityType::VncAuth => SECURITY_TYPE_VNC_AUTH,
        }
    }

    /// Whether this module is available given the server's configured
    /// options. `None` requires no password be set for the access level in
    /// question; `VncAuth` requires one.
    fn enabled(self, options: &ServerOptions, read_only_connection: bool) -> bool {
        let password = effective_password(options, read_only_connection);
        match self {
            SecurityType::None => password.is_none(),
            SecurityType::VncAuth => password.is_some(),
        }
    }
}

fn effective_password(options: &ServerOptions, read_only_connection: bool) -> Option<&str> {
    if read_only_connection {
        options
            .read_only_password
            .as_deref()
            .or(options.password.as_deref())
    } else {
        options.password.as_deref()
    }
}

/// Returns the security types enabled by `options`, in ascending wire-code
/// order (the order `≥ 3.7` handshakes advertise them in).
pub fn available_types(options: &ServerOptions, read_only_connection: bool) -> Vec<SecurityType> {
    let mut types = Vec::new();
    for candidate in [SecurityType::None, SecurityType::VncAuth] {
        if candidate.enabled(options, read_only_connection) {
            types.push(candidate);
        }
    }
    types.sort_by_key(|t| t.code());
    types
}

/// Picks the security type a pre-3.7 client gets, with no negotiation:
/// VNC Authentication if available, otherwise None.
pub fn legacy_choice(options: &ServerOptions, read_only_connection: bool) -> Option<SecurityType> {
    let types = available_types(options, read_only_connection);
    if types.contains(&SecurityType::VncAuth) {
        Some(SecurityType::VncAuth)
    } else if types.contains(&SecurityType::None) {
        Some(SecurityType::None)
    } else {
        None
    }
}

/// Runs the chosen security type's authentication exchange over `stream`.
pub async fn authenticate<S>(
    security_type: SecurityType,
    stream: &mut ByteStream<S>,
    options: &ServerOptions,
    read_only_connection: bool,
    timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match security_type {
        SecurityType::None => Ok(()),
        SecurityType::VncAuth => {
            let password = effective_password(options, read_only_connection)
                .unwrap_or("")
                .to_string();
            vnc_authenticate(stream, &password, timeout).await
        }
    }
}

async fn vnc_authenticate<S>(
    stream: &mut ByteStream<S>,
    password: &str,
    timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut challenge = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut challenge);
    stream.write(&challenge).await?;

    let response = stream.read_exact(16, timeout).await?;
    let expected = encrypt_challenge(&challenge, password);
    if response == expected {
        Ok(())
    } else {
        Err(VncError::SecurityFailed(
            "Authentication by VNC Authentication failed".to_string(),
        ))
    }
}

/// Encrypts a 16-byte challenge with the password-derived DES key, one
/// 8-byte ECB block at a time — the VNC Authentication scheme from RFC 6143
/// §7.2.2.
fn encrypt_challenge(challenge: &[u8; 16], password: &str) -> [u8; 16] {
    let key = des_key_from_password(password);
    let cipher = Des::new_from_slice(&key).expect("DES key is always 8 bytes");

    let mut result = *challenge;
    let (block0, block1) = result.split_at_mut(8);
    cipher.encrypt_block(block0.into());
    cipher.encrypt_block(block1.into());
    result
}

/// The password is truncated or zero-padded to 8 bytes, then each byte has
/// its bit order reversed before use as the DES key — the canonical VNC
/// key-scheduling quirk (VNC treats the password as a big-endian bit string
/// but DES expects little-endian-per-byte key material).
fn des_key_from_password(password: &str) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (i, byte) in password.as_bytes().iter().take(8).enumerate() {
        key[i] = *byte;
    }
    for byte in key.iter_mut() {
        *byte = byte.reverse_bits();
    }
    key
}
