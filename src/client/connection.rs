//! Connection: transport ownership, the session handshake, and frame I/O.
//!
//! A [`Connection`] exclusively owns its transport and stream-id counter.
//! Cursors hold weak references to it and are invalidated the moment it
//! closes. All I/O is serialized through one async mutex: there is never
//! more than one outstanding request, and the stream-id field exists only
//! because the wire format demands it.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::error::{CqlError, CqlResult};
use crate::proto::wire::{self, WireReader};
use crate::proto::{Consistency, Frame, FrameCodec, Opcode};

use super::config::ConnectConfig;
use super::cursor::Cursor;
use super::query::{build_query_body, parse_result, ResultPage};

/// Stream ids live in `0..32768` and wrap back to 0.
const STREAM_ID_MODULUS: i16 = i16::MAX; // 32767, so ids wrap 32767 -> 0

/// Handshake and lifecycle states of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, nothing sent yet.
    Disconnected,
    /// OPTIONS sent, waiting for SUPPORTED.
    OptionsSent,
    /// SUPPORTED received and parsed.
    SupportedReceived,
    /// STARTUP sent, waiting for READY or AUTHENTICATE.
    StartupSent,
    /// AUTH_RESPONSE sent, waiting for AUTH_SUCCESS.
    AuthChallengeSent,
    /// Query-ready.
    Ready,
    /// A protocol violation or transport failure made the connection
    /// unusable; there is no degraded mode.
    Failed,
    /// Closed by the caller.
    Closed,
}

/// The byte stream under a connection: plain TCP or TLS-wrapped TCP.
pub(crate) enum Transport {
    /// Plain TCP.
    Tcp(TcpStream),
    /// TLS over TCP.
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
    /// In-memory stream for tests.
    #[cfg(test)]
    Mem(tokio::io::DuplexStream),
}

impl Transport {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.write_all(buf).await,
            Self::Tls(s) => s.write_all(buf).await,
            #[cfg(test)]
            Self::Mem(s) => s.write_all(buf).await,
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush().await,
            Self::Tls(s) => s.flush().await,
            #[cfg(test)]
            Self::Mem(s) => s.flush().await,
        }
    }

    async fn read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read_buf(buf).await,
            Self::Tls(s) => s.read_buf(buf).await,
            #[cfg(test)]
            Self::Mem(s) => s.read_buf(buf).await,
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.shutdown().await,
            Self::Tls(s) => s.shutdown().await,
            #[cfg(test)]
            Self::Mem(s) => s.shutdown().await,
        }
    }
}

/// State guarded by the connection mutex: the transport, framing buffers,
/// and the stream-id counter.
pub(crate) struct ConnectionInner {
    transport: Transport,
    codec: FrameCodec,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    stream_id: i16,
    state: ConnectionState,
    cql_version: Option<String>,
    address: String,
}

impl ConnectionInner {
    fn new(transport: Transport, address: String) -> Self {
        Self {
            transport,
            codec: FrameCodec::new(),
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(8192),
            stream_id: 0,
            state: ConnectionState::Disconnected,
            cql_version: None,
            address,
        }
    }

    fn next_stream_id(&mut self) -> i16 {
        let id = self.stream_id;
        self.stream_id = if self.stream_id == STREAM_ID_MODULUS {
            0
        } else {
            self.stream_id + 1
        };
        id
    }

    /// Send one request frame. The transport write loops until every byte
    /// is flushed; once a send begins, a failure leaves the connection
    /// broken rather than retried.
    pub(crate) async fn send_frame(&mut self, opcode: Opcode, body: Bytes) -> CqlResult<i16> {
        let stream = self.next_stream_id();
        trace!(opcode = ?opcode, stream, len = body.len(), "sending frame");

        let frame = Frame::request(stream, opcode, body);
        self.write_buffer.clear();
        self.codec.encode(frame, &mut self.write_buffer)?;

        if let Err(e) = async {
            self.transport.write_all(&self.write_buffer).await?;
            self.transport.flush().await
        }
        .await
        {
            self.state = ConnectionState::Failed;
            return Err(e.into());
        }
        Ok(stream)
    }

    /// Receive one complete frame, retrying short reads until the header
    /// and body are whole. ERROR frames never reach the caller: they are
    /// decoded here and raised as [`CqlError::Operational`].
    pub(crate) async fn recv_frame(&mut self) -> CqlResult<Frame> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buffer)? {
                trace!(opcode = ?frame.opcode, stream = frame.stream, len = frame.body.len(), "received frame");
                if frame.opcode == Opcode::Error {
                    return Err(error_from_body(&frame.body));
                }
                return Ok(frame);
            }

            let n = self.transport.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                self.state = ConnectionState::Failed;
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server before a complete frame",
                )
                .into());
            }
        }
    }

    fn fail(&mut self, msg: String) -> CqlError {
        self.state = ConnectionState::Failed;
        CqlError::internal(msg)
    }

    /// Drive the session handshake to the query-ready state:
    /// OPTIONS -> SUPPORTED -> STARTUP -> READY, with the AUTHENTICATE /
    /// AUTH_RESPONSE / AUTH_SUCCESS detour when the server demands it.
    /// Any unexpected opcode is a fatal protocol violation.
    async fn handshake(&mut self, config: &ConnectConfig) -> CqlResult<()> {
        self.send_frame(Opcode::Options, Bytes::new()).await?;
        self.state = ConnectionState::OptionsSent;

        let frame = self.recv_frame().await?;
        if frame.opcode != Opcode::Supported {
            return Err(self.fail(format!(
                "protocol violation: expected SUPPORTED, got {:?}",
                frame.opcode
            )));
        }
        let mut reader = WireReader::new(&frame.body);
        let supported = reader.read_string_multimap()?;
        let version = supported
            .get("CQL_VERSION")
            .and_then(|versions| versions.first())
            .cloned()
            .ok_or_else(|| self.fail("SUPPORTED frame advertises no CQL_VERSION".to_string()))?;
        self.state = ConnectionState::SupportedReceived;
        debug!(version = %version, address = %self.address, "negotiated CQL version");

        let mut body = BytesMut::new();
        wire::write_string_map(&mut body, &[("CQL_VERSION", &version)])?;
        self.send_frame(Opcode::Startup, body.freeze()).await?;
        self.state = ConnectionState::StartupSent;

        let frame = self.recv_frame().await?;
        match frame.opcode {
            Opcode::Ready => {}
            Opcode::Authenticate => {
                let credentials = config.credentials.as_ref().ok_or_else(|| {
                    CqlError::interface(
                        "server requires authentication but no credentials were configured",
                    )
                })?;

                let mut token = BytesMut::with_capacity(
                    credentials.username.len() + credentials.password.len() + 2,
                );
                token.extend_from_slice(b"\0");
                token.extend_from_slice(credentials.username.as_bytes());
                token.extend_from_slice(b"\0");
                token.extend_from_slice(credentials.password.as_bytes());

                let mut body = BytesMut::new();
                wire::write_long_bytes(&mut body, &token)?;
                self.send_frame(Opcode::AuthResponse, body.freeze()).await?;
                self.state = ConnectionState::AuthChallengeSent;

                let frame = self.recv_frame().await?;
                if frame.opcode != Opcode::AuthSuccess {
                    return Err(self.fail(format!(
                        "protocol violation: expected AUTH_SUCCESS, got {:?}",
                        frame.opcode
                    )));
                }
            }
            other => {
                return Err(self.fail(format!(
                    "protocol violation: expected READY or AUTHENTICATE, got {other:?}"
                )));
            }
        }

        self.cql_version = Some(version);
        self.state = ConnectionState::Ready;
        debug!(address = %self.address, "connection ready");
        Ok(())
    }

    /// Send one QUERY and parse its RESULT. No retries: every failure
    /// propagates to the caller unchanged.
    pub(crate) async fn execute(
        &mut self,
        text: &str,
        consistency: Consistency,
    ) -> CqlResult<ResultPage> {
        if self.state != ConnectionState::Ready {
            return Err(CqlError::lost_connection());
        }
        debug!(query = text, "executing query");

        let body = build_query_body(text, consistency)?;
        self.send_frame(Opcode::Query, body).await?;
        let frame = self.recv_frame().await?;
        if frame.opcode != Opcode::Result {
            return Err(self.fail(format!(
                "protocol violation: expected RESULT, got {:?}",
                frame.opcode
            )));
        }
        parse_result(&frame.body)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state
    }

    async fn close(&mut self) {
        let _ = self.transport.shutdown().await;
        self.state = ConnectionState::Closed;
    }
}

/// Decode an ERROR body: a 4-byte code and a short string message.
///
/// Some servers prepend an extra copy of the 4-byte code before the real
/// body; when the code value appears twice in a row the duplicate is
/// skipped. The shim applies to ERROR bodies only.
fn error_from_body(body: &[u8]) -> CqlError {
    let mut reader = WireReader::new(body);
    let code = match reader.read_i32() {
        Ok(code) => code,
        Err(e) => return e,
    };
    if reader.peek_i32() == Some(code) {
        let _ = reader.skip(4);
    }
    match reader.read_short_string() {
        Ok(message) => CqlError::operational(code, message),
        Err(e) => e,
    }
}

/// A session with one server.
///
/// Exclusively owns the transport and the stream-id counter. Queries run
/// through [`Cursor`]s obtained from [`Connection::cursor`]; closing the
/// connection permanently invalidates every cursor.
pub struct Connection {
    inner: Arc<Mutex<ConnectionInner>>,
    consistency: Consistency,
}

impl Connection {
    /// Open a transport, run the handshake, and select the configured
    /// keyspace if one was given. A failed handshake leaves nothing usable
    /// behind.
    pub async fn connect(config: ConnectConfig) -> CqlResult<Self> {
        debug!(address = %config.address(), tls = config.tls, "connecting");
        let transport = open_transport(&config).await?;
        Self::establish(transport, config).await
    }

    /// Handshake over an already-open transport.
    pub(crate) async fn establish(transport: Transport, config: ConnectConfig) -> CqlResult<Self> {
        let mut inner = ConnectionInner::new(transport, config.address());
        inner.handshake(&config).await?;
        if let Some(keyspace) = &config.keyspace {
            inner.execute(&format!("USE {keyspace}"), config.consistency).await?;
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            consistency: config.consistency,
        })
    }

    /// Create a cursor over this connection. The cursor holds a weak
    /// reference and never keeps the connection alive.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(Arc::downgrade(&self.inner), self.consistency)
    }

    /// Shut the transport down. Every cursor on this connection fails from
    /// here on.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.close().await;
    }

    /// True once the connection was closed or broke.
    pub async fn is_closed(&self) -> bool {
        let inner = self.inner.lock().await;
        !matches!(inner.state(), ConnectionState::Ready)
    }

    /// The CQL version selected during the handshake.
    pub async fn cql_version(&self) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.cql_version.clone()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("consistency", &self.consistency)
            .finish()
    }
}

async fn open_transport(config: &ConnectConfig) -> CqlResult<Transport> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
    tcp.set_nodelay(true).ok();

    if config.tls {
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| CqlError::interface(format!("TLS initialization failed: {e}")))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let stream = connector
            .connect(&config.host, tcp)
            .await
            .map_err(|e| CqlError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        Ok(Transport::Tls(Box::new(stream)))
    } else {
        Ok(Transport::Tcp(tcp))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::proto::{HEADER_SIZE, RESPONSE_VERSION};
    use bytes::BufMut;
    use tokio::io::DuplexStream;

    /// Read one request frame from the scripted server side.
    pub(crate) async fn read_request(server: &mut DuplexStream) -> Frame {
        let mut header = [0u8; HEADER_SIZE];
        server.read_exact(&mut header).await.unwrap();
        let body_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
        let mut body = vec![0u8; body_len];
        server.read_exact(&mut body).await.unwrap();
        Frame {
            version: header[0],
            flags: header[1],
            stream: i16::from_be_bytes([header[2], header[3]]),
            opcode: Opcode::from_u8(header[4]).unwrap(),
            body: Bytes::from(body),
        }
    }

    /// Write one response frame from the scripted server side.
    pub(crate) async fn send_response(server: &mut DuplexStream, opcode: Opcode, body: &[u8]) {
        let mut buf = BytesMut::new();
        buf.put_u8(RESPONSE_VERSION);
        buf.put_u8(0);
        buf.put_i16(0);
        buf.put_u8(opcode as u8);
        buf.put_u32(body.len() as u32);
        buf.put_slice(body);
        server.write_all(&buf).await.unwrap();
    }

    /// SUPPORTED body advertising the given CQL versions.
    pub(crate) fn supported_body(versions: &[&str]) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_u16(1);
        wire::write_short_string(&mut body, "CQL_VERSION").unwrap();
        body.put_u16(versions.len() as u16);
        for version in versions {
            wire::write_short_string(&mut body, version).unwrap();
        }
        body.to_vec()
    }

    /// ERROR body with the given code and message.
    pub(crate) fn error_body(code: i32, message: &str) -> Vec<u8> {
        let mut body = BytesMut::new();
        body.put_i32(code);
        wire::write_short_string(&mut body, message).unwrap();
        body.to_vec()
    }

    /// Run the OPTIONS/SUPPORTED/STARTUP steps of the server script, then
    /// answer STARTUP with `startup_reply`.
    pub(crate) async fn serve_handshake(
        server: &mut DuplexStream,
        versions: &[&str],
        startup_reply: Opcode,
    ) -> Frame {
        let options = read_request(server).await;
        assert_eq!(options.opcode, Opcode::Options);
        assert!(options.body.is_empty());

        send_response(server, Opcode::Supported, &supported_body(versions)).await;

        let startup = read_request(server).await;
        assert_eq!(startup.opcode, Opcode::Startup);
        send_response(server, startup_reply, &[]).await;
        startup
    }

    fn config() -> ConnectConfig {
        ConnectConfig::new("test")
    }

    #[tokio::test]
    async fn test_handshake_unauthenticated() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            let startup = serve_handshake(&mut server, &["3.0.0"], Opcode::Ready).await;
            // STARTUP must select the advertised version
            let mut reader = WireReader::new(&startup.body);
            assert_eq!(reader.read_u16().unwrap(), 1);
            assert_eq!(reader.read_short_string().unwrap(), "CQL_VERSION");
            assert_eq!(reader.read_short_string().unwrap(), "3.0.0");
            server
        });

        let conn = Connection::establish(Transport::Mem(client), config())
            .await
            .unwrap();
        assert_eq!(conn.cql_version().await.as_deref(), Some("3.0.0"));
        assert!(!conn.is_closed().await);

        // No AUTH_RESPONSE (or anything else) was sent: the server side
        // sees end-of-stream right after STARTUP once we close.
        conn.close().await;
        let mut server = server_task.await.unwrap();
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_handshake_authenticated() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            serve_handshake(&mut server, &["3.4.4"], Opcode::Authenticate).await;

            let auth = read_request(&mut server).await;
            assert_eq!(auth.opcode, Opcode::AuthResponse);
            let mut reader = WireReader::new(&auth.body);
            let token = reader.read_bytes().unwrap().unwrap();
            assert_eq!(token, &b"\0user\0pass"[..]);
            assert!(reader.is_empty());

            send_response(&mut server, Opcode::AuthSuccess, &[]).await;
            server
        });

        let config = ConnectConfig::builder("test")
            .with_credentials("user", "pass")
            .build();
        let conn = Connection::establish(Transport::Mem(client), config)
            .await
            .unwrap();
        assert!(!conn.is_closed().await);
        drop(server_task.await.unwrap());
        drop(conn);
    }

    #[tokio::test]
    async fn test_authenticate_without_credentials_is_interface_error() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            serve_handshake(&mut server, &["3.0.0"], Opcode::Authenticate).await;
            // hold the stream open so the client fails on its own
            let mut sink = Vec::new();
            let _ = server.read_to_end(&mut sink).await;
        });

        let err = Connection::establish(Transport::Mem(client), config())
            .await
            .unwrap_err();
        assert!(matches!(err, CqlError::Interface(_)));
    }

    #[tokio::test]
    async fn test_auth_reply_other_than_success_is_fatal() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            serve_handshake(&mut server, &["3.0.0"], Opcode::Authenticate).await;
            let auth = read_request(&mut server).await;
            assert_eq!(auth.opcode, Opcode::AuthResponse);
            // Anything but AUTH_SUCCESS fails the handshake
            send_response(&mut server, Opcode::Supported, &[]).await;
            let mut sink = Vec::new();
            let _ = server.read_to_end(&mut sink).await;
        });

        let config = ConnectConfig::builder("test")
            .with_credentials("user", "pass")
            .build();
        let err = Connection::establish(Transport::Mem(client), config)
            .await
            .unwrap_err();
        assert!(matches!(err, CqlError::Internal(_)));
    }

    #[tokio::test]
    async fn test_unexpected_options_reply_is_fatal() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let options = read_request(&mut server).await;
            assert_eq!(options.opcode, Opcode::Options);
            send_response(&mut server, Opcode::Ready, &[]).await;
            let mut sink = Vec::new();
            let _ = server.read_to_end(&mut sink).await;
        });

        let err = Connection::establish(Transport::Mem(client), config())
            .await
            .unwrap_err();
        assert!(matches!(err, CqlError::Internal(_)));
    }

    #[tokio::test]
    async fn test_supported_without_cql_version_is_fatal() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let options = read_request(&mut server).await;
            assert_eq!(options.opcode, Opcode::Options);
            // empty multimap
            send_response(&mut server, Opcode::Supported, &[0, 0]).await;
            let mut sink = Vec::new();
            let _ = server.read_to_end(&mut sink).await;
        });

        let err = Connection::establish(Transport::Mem(client), config())
            .await
            .unwrap_err();
        assert!(matches!(err, CqlError::Internal(_)));
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_io_error() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let _ = read_request(&mut server).await;
            // Header promising a body that never arrives
            let mut buf = BytesMut::new();
            buf.put_u8(RESPONSE_VERSION);
            buf.put_u8(0);
            buf.put_i16(0);
            buf.put_u8(Opcode::Supported as u8);
            buf.put_u32(100);
            server.write_all(&buf).await.unwrap();
            drop(server);
        });

        let err = Connection::establish(Transport::Mem(client), config())
            .await
            .unwrap_err();
        assert!(err.is_io_error());
    }

    #[tokio::test]
    async fn test_handshake_keyspace_issues_use_query() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            serve_handshake(&mut server, &["3.0.0"], Opcode::Ready).await;

            let query = read_request(&mut server).await;
            assert_eq!(query.opcode, Opcode::Query);
            let mut reader = WireReader::new(&query.body);
            assert_eq!(reader.read_long_string().unwrap(), "USE app");

            // RESULT kind 3 (SetKeyspace) + keyspace name
            let mut body = BytesMut::new();
            body.put_i32(3);
            wire::write_short_string(&mut body, "app").unwrap();
            send_response(&mut server, Opcode::Result, &body).await;
        });

        let config = ConnectConfig::builder("test").with_keyspace("app").build();
        let conn = Connection::establish(Transport::Mem(client), config)
            .await
            .unwrap();
        assert!(!conn.is_closed().await);
        server_task.await.unwrap();
    }

    #[test]
    fn test_error_body_decoding() {
        let err = error_from_body(&error_body(0x2200, "bad syntax"));
        assert!(matches!(
            err,
            CqlError::Operational { code: 0x2200, ref message } if message == "bad syntax"
        ));
    }

    #[test]
    fn test_error_body_duplicate_code_shim() {
        // Some servers repeat the 4-byte code before the message
        let mut body = BytesMut::new();
        body.put_i32(0x1001);
        body.put_i32(0x1001);
        wire::write_short_string(&mut body, "overloaded").unwrap();

        let err = error_from_body(&body);
        assert!(matches!(
            err,
            CqlError::Operational { code: 0x1001, ref message } if message == "overloaded"
        ));
    }

    #[test]
    fn test_stream_id_wraps_to_zero() {
        let (client, _server) = tokio::io::duplex(64);
        let mut inner = ConnectionInner::new(Transport::Mem(client), "test".to_string());
        inner.stream_id = STREAM_ID_MODULUS;
        assert_eq!(inner.next_stream_id(), 32767);
        assert_eq!(inner.next_stream_id(), 0);
        assert_eq!(inner.next_stream_id(), 1);
    }

    #[tokio::test]
    async fn test_stream_ids_increment_per_request() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            let mut streams = Vec::new();
            streams.push(read_request(&mut server).await.stream);
            send_response(&mut server, Opcode::Supported, &supported_body(&["3.0.0"])).await;
            streams.push(read_request(&mut server).await.stream);
            send_response(&mut server, Opcode::Ready, &[]).await;
            streams
        });

        let _conn = Connection::establish(Transport::Mem(client), config())
            .await
            .unwrap();
        assert_eq!(server_task.await.unwrap(), vec![0, 1]);
    }
}
