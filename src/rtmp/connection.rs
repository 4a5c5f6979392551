//! Per-connection RTMP publisher handler
//!
//! Drives one publisher connection end to end:
//! 1. Handshake (bounded by a deadline)
//! 2. `connect` and the stream setup commands
//! 3. `publish` and the media loop into the bus
//! 4. Detach and cleanup on any exit path
//!
//! Non-transient errors terminate only this session; the bus releases the
//! publisher slot on unwind and cannot be poisoned by a bad peer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::amf::{self, Amf0Decoder, AmfValue};
use crate::amf_object;
use crate::bus::{Registry, StreamKey, DEFAULT_APP};
use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::{ChunkDecoder, ChunkEncoder, Handshake, HandshakeRole, RawMessage};

use super::publisher::Publisher;
use super::session::{
    acknowledgement_body, set_chunk_size_body, set_peer_bandwidth_body, stream_begin_body,
    window_ack_size_body, AckTracker, SessionState,
};

/// A hostile peer must not be able to pin a task in the handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishers push continuously; a silent socket is a dead one.
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

const READ_BUF_SIZE: usize = 64 * 1024;

/// One RTMP publisher connection.
pub struct Connection {
    session_id: u64,
    peer_addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    read_buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    write_buf: BytesMut,
    state: SessionState,
    connected: bool,
    app: String,
    stream_name: Option<String>,
    next_stream_id: u32,
    ack: AckTracker,
    registry: Arc<Registry>,
    publisher: Option<Publisher>,
}

impl Connection {
    pub fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        registry: Arc<Registry>,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();
        Self {
            session_id,
            peer_addr,
            reader: BufReader::with_capacity(READ_BUF_SIZE, read_half),
            writer: BufWriter::with_capacity(READ_BUF_SIZE, write_half),
            read_buf: BytesMut::with_capacity(READ_BUF_SIZE),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            write_buf: BytesMut::new(),
            state: SessionState::Handshaking,
            connected: false,
            app: DEFAULT_APP.to_string(),
            stream_name: None,
            next_stream_id: 1,
            ack: AckTracker::new(),
            registry,
            publisher: None,
        }
    }

    /// Run the connection to completion, always releasing the bus role.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.serve().await;

        if let Some(publisher) = self.publisher.take() {
            publisher.detach(&self.registry);
            tracing::info!(
                session_id = self.session_id,
                app = %self.app,
                stream = self.stream_name.as_deref().unwrap_or(""),
                "publisher detached"
            );
        }
        self.state = SessionState::Closed;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        timeout(HANDSHAKE_TIMEOUT, self.do_handshake())
            .await
            .map_err(|_| Error::Timeout)??;
        self.state = SessionState::Connected;
        tracing::debug!(session_id = self.session_id, peer = %self.peer_addr, "handshake complete");

        loop {
            match timeout(READ_IDLE_TIMEOUT, self.read_and_process()).await {
                Ok(Ok(true)) => {
                    if self.state == SessionState::Closed {
                        return Ok(());
                    }
                }
                Ok(Ok(false)) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::debug!(session_id = self.session_id, "idle timeout");
                    return Ok(());
                }
            }
        }
    }

    /// Server side of the simple handshake, fed from partial reads.
    async fn do_handshake(&mut self) -> Result<()> {
        let mut handshake = Handshake::new(HandshakeRole::Server);
        handshake.generate_initial();

        while !handshake.is_done() {
            let needed = handshake.bytes_needed();
            while self.read_buf.len() < needed {
                let n = self.reader.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
            }

            let mut view = Bytes::copy_from_slice(&self.read_buf);
            let response = handshake.process(&mut view)?;
            let consumed = self.read_buf.len() - view.len();
            self.read_buf.advance(consumed);

            if let Some(response) = response {
                self.writer.write_all(&response).await?;
                self.writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Decode whatever is buffered; otherwise read more from the socket.
    /// Returns false when the peer closed the connection.
    async fn read_and_process(&mut self) -> Result<bool> {
        // Data that arrived alongside the handshake (the connect command,
        // typically) is decoded before the next socket read.
        if self.drain_buffer().await? {
            return Ok(true);
        }

        let n = self.reader.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Ok(false);
        }
        if let Some(sequence) = self.ack.record(n as u32) {
            self.send_message(
                CSID_PROTOCOL_CONTROL,
                MSG_ACKNOWLEDGEMENT,
                0,
                0,
                &acknowledgement_body(sequence),
            )
            .await?;
        }

        self.drain_buffer().await?;
        Ok(true)
    }

    /// Decode complete chunks until the buffer stops yielding progress.
    async fn drain_buffer(&mut self) -> Result<bool> {
        let mut processed = false;
        while self.state != SessionState::Closed {
            let before = self.read_buf.len();
            match self.decoder.decode(&mut self.read_buf)? {
                Some(message) => {
                    self.handle_message(message).await?;
                    processed = true;
                }
                None => {
                    if self.read_buf.len() == before {
                        break;
                    }
                }
            }
        }
        Ok(processed)
    }

    async fn handle_message(&mut self, msg: RawMessage) -> Result<()> {
        match msg.message_type {
            MSG_SET_CHUNK_SIZE => {
                if msg.payload.len() >= 4 {
                    let size = u32::from_be_bytes([
                        msg.payload[0],
                        msg.payload[1],
                        msg.payload[2],
                        msg.payload[3],
                    ]) & 0x7FFF_FFFF;
                    tracing::debug!(session_id = self.session_id, size, "peer set chunk size");
                    self.decoder.set_chunk_size(size);
                }
            }

            MSG_ABORT => {
                if msg.payload.len() >= 4 {
                    let csid = u32::from_be_bytes([
                        msg.payload[0],
                        msg.payload[1],
                        msg.payload[2],
                        msg.payload[3],
                    ]);
                    self.decoder.abort(csid);
                }
            }

            MSG_COMMAND_AMF0 => self.handle_command(&msg).await?,

            MSG_AUDIO => {
                if let Some(publisher) = &self.publisher {
                    publisher.publish_audio(msg.timestamp, &msg.payload);
                }
            }

            MSG_VIDEO => {
                if let Some(publisher) = &self.publisher {
                    publisher.publish_video(msg.timestamp, &msg.payload);
                }
            }

            MSG_DATA_AMF0 => {
                if let Some(publisher) = &self.publisher {
                    publisher.publish_metadata(msg.timestamp, &msg.payload);
                }
            }

            MSG_ACKNOWLEDGEMENT | MSG_WINDOW_ACK_SIZE | MSG_SET_PEER_BANDWIDTH
            | MSG_USER_CONTROL => {
                tracing::trace!(
                    session_id = self.session_id,
                    message_type = msg.message_type,
                    "control message ignored"
                );
            }

            other => {
                tracing::trace!(
                    session_id = self.session_id,
                    message_type = other,
                    "unhandled message type"
                );
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, msg: &RawMessage) -> Result<()> {
        let mut body = msg.payload.clone();
        let mut dec = Amf0Decoder::new();

        let name = match dec.decode(&mut body)? {
            AmfValue::String(s) => s,
            _ => {
                return Err(
                    ProtocolError::InvalidCommand("command name is not a string".into()).into(),
                )
            }
        };
        let transaction_id = dec
            .decode(&mut body)
            .ok()
            .and_then(|v| v.as_number())
            .unwrap_or(0.0);

        tracing::debug!(session_id = self.session_id, command = %name, "command received");

        match name.as_str() {
            CMD_CONNECT => {
                let command_object = if body.has_remaining() {
                    dec.decode(&mut body)?
                } else {
                    AmfValue::Null
                };
                // Trailing optional arguments are not consumed.
                while body.has_remaining() {
                    dec.skip_any(&mut body)?;
                }
                self.handle_connect(transaction_id, &command_object).await
            }

            CMD_RELEASE_STREAM | CMD_FC_PUBLISH => {
                drain_args(&mut dec, &mut body);
                self.send_result(transaction_id, vec![AmfValue::Null]).await
            }

            CMD_CREATE_STREAM => {
                drain_args(&mut dec, &mut body);
                let stream_id = self.next_stream_id;
                self.next_stream_id += 1;
                tracing::debug!(session_id = self.session_id, stream_id, "stream created");
                self.send_result(
                    transaction_id,
                    vec![AmfValue::Null, AmfValue::Number(f64::from(stream_id))],
                )
                .await
            }

            CMD_PUBLISH => {
                let mut args = Vec::new();
                while body.has_remaining() {
                    args.push(dec.decode(&mut body)?);
                }
                self.handle_publish(&args, msg.stream_id).await
            }

            CMD_DELETE_STREAM | CMD_CLOSE_STREAM => {
                drain_args(&mut dec, &mut body);
                tracing::debug!(session_id = self.session_id, command = %name, "session ending");
                self.state = SessionState::Closed;
                Ok(())
            }

            CMD_FC_UNPUBLISH => {
                drain_args(&mut dec, &mut body);
                Ok(())
            }

            other => {
                drain_args(&mut dec, &mut body);
                tracing::trace!(session_id = self.session_id, command = %other, "command ignored");
                Ok(())
            }
        }
    }

    async fn handle_connect(
        &mut self,
        transaction_id: f64,
        command_object: &AmfValue,
    ) -> Result<()> {
        if self.connected {
            return Err(ProtocolError::InvalidCommand("duplicate connect".into()).into());
        }

        self.app = command_object
            .field("app")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_APP)
            .to_string();
        let object_encoding = command_object
            .field("objectEncoding")
            .and_then(|v| v.as_number())
            .unwrap_or(0.0);

        // Window ack size, peer bandwidth, and chunk size go out before the
        // _result, in this order.
        self.send_message(
            CSID_PROTOCOL_CONTROL,
            MSG_WINDOW_ACK_SIZE,
            0,
            0,
            &window_ack_size_body(WINDOW_ACK_SIZE),
        )
        .await?;
        self.ack.set_window(WINDOW_ACK_SIZE);

        self.send_message(
            CSID_PROTOCOL_CONTROL,
            MSG_SET_PEER_BANDWIDTH,
            0,
            0,
            &set_peer_bandwidth_body(PEER_BANDWIDTH, BANDWIDTH_LIMIT_DYNAMIC),
        )
        .await?;

        self.send_message(
            CSID_PROTOCOL_CONTROL,
            MSG_SET_CHUNK_SIZE,
            0,
            0,
            &set_chunk_size_body(OUT_CHUNK_SIZE),
        )
        .await?;
        self.encoder.set_chunk_size(OUT_CHUNK_SIZE);

        let body = amf::encode_command(&[
            AmfValue::String(CMD_RESULT.into()),
            AmfValue::Number(transaction_id),
            amf_object! {
                "fmsVer" => FMS_VERSION,
                "capabilities" => FMS_CAPABILITIES,
            },
            amf_object! {
                "level" => "status",
                "code" => NC_CONNECT_SUCCESS,
                "description" => "Connection succeeded.",
                "objectEncoding" => object_encoding,
            },
        ]);
        self.send_message(CSID_COMMAND, MSG_COMMAND_AMF0, 0, 0, &body)
            .await?;

        self.connected = true;
        tracing::info!(session_id = self.session_id, app = %self.app, "connected");
        Ok(())
    }

    async fn handle_publish(&mut self, args: &[AmfValue], msg_stream_id: u32) -> Result<()> {
        // Command form is [null, streamName, publishType]; some clients omit
        // the null, so the name is searched at the later position first.
        let stream_name = args
            .get(1)
            .and_then(|v| v.as_str())
            .or_else(|| args.first().and_then(|v| v.as_str()))
            .ok_or(ProtocolError::MissingStreamName)?
            .to_string();

        let key = StreamKey::new(self.app.clone(), stream_name.clone());
        let (stream, _created) = self.registry.get_or_create(key.clone());

        if !stream.attach_publisher(self.session_id) {
            return Err(Error::PublisherBusy {
                app: key.app,
                name: key.name,
            });
        }
        self.publisher = Some(Publisher::new(stream, self.session_id));
        self.stream_name = Some(stream_name.clone());
        self.state = SessionState::Publishing;

        // Stream-Begin is advisory; clients only wait for onStatus.
        if let Err(e) = self
            .send_message(
                CSID_PROTOCOL_CONTROL,
                MSG_USER_CONTROL,
                0,
                0,
                &stream_begin_body(msg_stream_id),
            )
            .await
        {
            tracing::warn!(session_id = self.session_id, error = %e, "failed to send StreamBegin");
        }

        let status = amf::encode_command(&[
            AmfValue::String(CMD_ON_STATUS.into()),
            AmfValue::Number(0.0),
            AmfValue::Null,
            amf_object! {
                "level" => "status",
                "code" => NS_PUBLISH_START,
                "description" => "Start publishing",
            },
        ]);
        self.send_message(CSID_STATUS, MSG_COMMAND_AMF0, 0, msg_stream_id, &status)
            .await?;

        tracing::info!(
            session_id = self.session_id,
            app = %self.app,
            stream = %stream_name,
            "publishing started"
        );
        Ok(())
    }

    async fn send_result(&mut self, transaction_id: f64, rest: Vec<AmfValue>) -> Result<()> {
        let mut values = vec![
            AmfValue::String(CMD_RESULT.into()),
            AmfValue::Number(transaction_id),
        ];
        values.extend(rest);
        let body = amf::encode_command(&values);
        self.send_message(CSID_COMMAND, MSG_COMMAND_AMF0, 0, 0, &body)
            .await
    }

    async fn send_message(
        &mut self,
        csid: u32,
        message_type: u8,
        timestamp: u32,
        stream_id: u32,
        body: &[u8],
    ) -> Result<()> {
        self.write_buf.clear();
        self.encoder
            .encode(csid, message_type, timestamp, stream_id, body, &mut self.write_buf);
        self.writer.write_all(&self.write_buf).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Skip trailing arguments of a command we do not consume. Best-effort:
/// unparseable trailers are ignored rather than fatal.
fn drain_args(dec: &mut Amf0Decoder, body: &mut Bytes) {
    while body.has_remaining() {
        if dec.skip_any(body).is_err() {
            break;
        }
    }
}

