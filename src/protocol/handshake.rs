//! RTMP simple handshake
//!
//! ```text
//! Client                                   Server
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |------- C2 (1536 bytes: echo S1) ----->|
//! ```
//!
//! The simple handshake carries no cryptographic binding; the packets are
//! timestamps plus filler. Both roles are driven as a state machine so the
//! session loop can feed partial reads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{HandshakeError, Result};
use crate::protocol::constants::{HANDSHAKE_SIZE, RTMP_VERSION};

/// Which side of the handshake we are driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeState {
    Initial,
    WaitingForPeerPacket,
    WaitingForPeerEcho,
    Done,
}

/// Handshake state machine.
#[derive(Debug)]
pub struct Handshake {
    role: HandshakeRole,
    state: HandshakeState,
}

impl Handshake {
    pub fn new(role: HandshakeRole) -> Self {
        Self {
            role,
            state: HandshakeState::Initial,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Done
    }

    /// Bytes the next `process` call needs before it can make progress.
    pub fn bytes_needed(&self) -> usize {
        match (self.state, self.role) {
            (HandshakeState::Initial, _) => 0,
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Server) => 1 + HANDSHAKE_SIZE,
            (HandshakeState::WaitingForPeerPacket, HandshakeRole::Client) => 1 + HANDSHAKE_SIZE * 2,
            (HandshakeState::WaitingForPeerEcho, _) => HANDSHAKE_SIZE,
            (HandshakeState::Done, _) => 0,
        }
    }

    /// Kick off the exchange. The client emits C0+C1; the server emits
    /// nothing and waits for the client.
    pub fn generate_initial(&mut self) -> Option<Bytes> {
        if self.state != HandshakeState::Initial {
            return None;
        }
        self.state = HandshakeState::WaitingForPeerPacket;

        match self.role {
            HandshakeRole::Client => {
                let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
                buf.put_u8(RTMP_VERSION);
                buf.put_slice(&fresh_packet());
                Some(buf.freeze())
            }
            HandshakeRole::Server => None,
        }
    }

    /// Feed received bytes; returns a response to send, if any.
    ///
    /// Server: C0+C1 in, S0+S1+S2 out, then C2 in, nothing out.
    /// Client: S0+S1+S2 in, C2 out.
    pub fn process(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        match self.state {
            HandshakeState::WaitingForPeerPacket => self.process_peer_packet(data),
            HandshakeState::WaitingForPeerEcho => self.process_peer_echo(data),
            _ => Ok(None),
        }
    }

    fn process_peer_packet(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        match self.role {
            HandshakeRole::Server => {
                if data.remaining() < 1 + HANDSHAKE_SIZE {
                    return Ok(None);
                }

                let version = data.get_u8();
                if version != RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }

                let mut c1 = [0u8; HANDSHAKE_SIZE];
                data.copy_to_slice(&mut c1);

                let mut response = BytesMut::with_capacity(1 + HANDSHAKE_SIZE * 2);
                response.put_u8(RTMP_VERSION);
                response.put_slice(&fresh_packet());
                response.put_slice(&echo_packet(&c1));

                self.state = HandshakeState::WaitingForPeerEcho;
                Ok(Some(response.freeze()))
            }
            HandshakeRole::Client => {
                if data.remaining() < 1 + HANDSHAKE_SIZE * 2 {
                    return Ok(None);
                }

                let version = data.get_u8();
                if version != RTMP_VERSION {
                    return Err(HandshakeError::InvalidVersion(version).into());
                }

                let mut s1 = [0u8; HANDSHAKE_SIZE];
                data.copy_to_slice(&mut s1);
                // S2 is not verified against C1; consume it.
                data.advance(HANDSHAKE_SIZE);

                self.state = HandshakeState::Done;
                Ok(Some(Bytes::copy_from_slice(&echo_packet(&s1))))
            }
        }
    }

    fn process_peer_echo(&mut self, data: &mut Bytes) -> Result<Option<Bytes>> {
        // Server waiting for C2. The echo is not verified.
        if data.remaining() < HANDSHAKE_SIZE {
            return Ok(None);
        }
        data.advance(HANDSHAKE_SIZE);
        self.state = HandshakeState::Done;
        Ok(None)
    }
}

fn now_millis() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u32)
        .unwrap_or(0)
}

/// Build a C1/S1 packet: epoch, four zero bytes, 1528 filler bytes.
/// The filler comes from a multiplicative PRNG; the simple handshake has no
/// randomness requirement.
fn fresh_packet() -> [u8; HANDSHAKE_SIZE] {
    let mut packet = [0u8; HANDSHAKE_SIZE];
    let timestamp = now_millis();
    packet[0..4].copy_from_slice(&timestamp.to_be_bytes());

    let mut seed = u64::from(timestamp) | 1;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = seed.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
    packet
}

/// Build a C2/S2 echo: the peer's packet with our receive time at bytes 4..8.
fn echo_packet(peer: &[u8; HANDSHAKE_SIZE]) -> [u8; HANDSHAKE_SIZE] {
    let mut echo = *peer;
    echo[4..8].copy_from_slice(&now_millis().to_be_bytes());
    echo
}
