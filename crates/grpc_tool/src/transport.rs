//! gRPC transport built on tonic's `Channel`.
//!
//! tonic does not expose connectivity state, so the dialer supplies its own connector.
//! The connector publishes `Connecting`/`Ready`/`TransientFailure` as it dials, and the
//! stream it hands to hyper flips the state back to `Idle` on EOF or to
//! `TransientFailure` on an IO error. Every connect attempt gets a generation number so a
//! stale stream from a previous attempt cannot overwrite the state of the current one.
//!
//! A channel only reconnects when a request passes through it, so each transport runs a
//! keeper task that sends an empty request, with backoff, whenever the connection drops.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use hyper_util::rt::TokioIo;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::CancellationToken;
use tonic::body::Body;
use tonic::codegen::http::header::{CONTENT_TYPE, TE};
use tonic::codegen::http::{HeaderValue, Method, Request, Response, Uri};
use tonic::codegen::{BoxFuture, Service};
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::connection::{ConnectionConfig, ConnectivityState, Dialer, Transport};
use crate::error::{DialError, DialErrorKind};
use crate::reconnect::{Backoff, BackoffConfig};
use crate::target::Target;

/// Path of the request the keeper sends to reconnect a channel. Any reply will do.
const HEALTH_CHECK_PATH: &str = "/grpc.health.v1.Health/Check";

/// Bound on one keeper reconnect when the dial itself is unbounded.
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Dials targets with tonic over TCP, optionally wrapped in relaxed-trust TLS.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcDialer;

impl Dialer for GrpcDialer {
    type Transport = GrpcTransport;

    async fn dial(
        &self,
        target: &Target,
        config: &ConnectionConfig,
    ) -> Result<GrpcTransport, DialError> {
        let state = Arc::new(StateCell::new());

        let tls = if target.is_secure() {
            let connector = relaxed_tls_connector()
                .map_err(|e| DialError::new(target, DialErrorKind::Tls(e.to_string())))?;
            let host = target.host().trim_start_matches('[').trim_end_matches(']');
            let server_name = ServerName::try_from(host.to_owned())
                .map_err(|e| DialError::new(target, DialErrorKind::Tls(e.to_string())))?;
            Some((connector, server_name))
        } else {
            None
        };

        let connector = MonitoredConnector {
            state: Arc::clone(&state),
            tls,
            nodelay: config.tcp_nodelay,
        };

        let keepalive = &config.keepalive;
        let mut endpoint = Endpoint::from_shared(format!("http://{}", target.authority()))
            .map_err(|e| DialError::new(target, DialErrorKind::Transport(e)))?
            .http2_keep_alive_interval(keepalive.interval)
            .keep_alive_timeout(keepalive.timeout)
            .keep_alive_while_idle(keepalive.permit_without_stream);

        if let Some(limit) = config.effective_dial_timeout() {
            endpoint = endpoint.connect_timeout(limit);
        }

        if target.is_secure() {
            let origin = target.origin().map_err(|e| {
                DialError::new(
                    target,
                    DialErrorKind::Io(io::Error::new(io::ErrorKind::InvalidInput, e)),
                )
            })?;
            endpoint = endpoint.origin(origin);
        }

        debug!(
            address = %target,
            secure = target.is_secure(),
            "Dialing gRPC endpoint"
        );

        let channel = endpoint
            .connect_with_connector(connector)
            .await
            .map_err(|e| {
                state.set_current(ConnectivityState::TransientFailure);
                DialError::new(target, DialErrorKind::Transport(e))
            })?;

        state.set_current(ConnectivityState::Ready);

        let keeper = CancellationToken::new();
        tokio::spawn(keep_connected(
            channel.clone(),
            Arc::clone(&state),
            keeper.clone(),
            target.clone(),
            config.effective_dial_timeout().unwrap_or(RECONNECT_TIMEOUT),
        ));

        Ok(GrpcTransport {
            channel: Mutex::new(Some(channel)),
            state,
            keeper,
        })
    }
}

/// A tonic channel plus the connectivity state its connector publishes.
pub struct GrpcTransport {
    channel: Mutex<Option<Channel>>,
    state: Arc<StateCell>,
    keeper: CancellationToken,
}

impl GrpcTransport {
    pub(crate) fn channel(&self) -> Option<Channel> {
        self.channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for GrpcTransport {
    fn state(&self) -> ConnectivityState {
        *self.state.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.tx.subscribe()
    }

    fn close(&self) {
        self.keeper.cancel();
        self.state.shutdown();
        let channel = self
            .channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(channel);
    }
}

impl Drop for GrpcTransport {
    fn drop(&mut self) {
        self.keeper.cancel();
    }
}

/// Reconnect `channel` with backoff each time its connection drops, until `closed`.
async fn keep_connected(
    channel: Channel,
    state: Arc<StateCell>,
    closed: CancellationToken,
    target: Target,
    limit: Duration,
) {
    let mut states = state.tx.subscribe();
    let mut backoff = Backoff::new(BackoffConfig::default());

    loop {
        let broken = tokio::select! {
            biased;
            _ = closed.cancelled() => return,
            changed = states.wait_for(|state| {
                !matches!(state, ConnectivityState::Ready | ConnectivityState::Connecting)
            }) => changed.map(|state| *state).ok(),
        };
        let Some(broken) = broken.filter(|state| *state != ConnectivityState::Shutdown) else {
            return;
        };

        let delay = backoff.next_delay();
        debug!(
            address = %target,
            state = %broken,
            delay = ?delay,
            "Transport disconnected, reconnecting"
        );
        tokio::select! {
            biased;
            _ = closed.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = closed.cancelled() => return,
            outcome = tokio::time::timeout(limit, empty_call(channel.clone())) => outcome,
        };
        match outcome {
            Ok(Ok(_)) => {
                debug!(address = %target, "Transport reconnected");
                backoff = Backoff::new(BackoffConfig::default());
            }
            Ok(Err(e)) => debug!(address = %target, error = %e, "Transport reconnect failed"),
            Err(_) => debug!(address = %target, limit = ?limit, "Transport reconnect timed out"),
        }
    }
}

/// Send one empty gRPC request through `channel`, connecting it first if needed.
pub(crate) async fn empty_call(
    mut channel: Channel,
) -> Result<Response<Body>, tonic::transport::Error> {
    std::future::poll_fn(|cx| channel.poll_ready(cx)).await?;

    let mut request = Request::new(Body::empty());
    *request.method_mut() = Method::POST;
    *request.uri_mut() = Uri::from_static(HEALTH_CHECK_PATH);
    let headers = request.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/grpc"));
    headers.insert(TE, HeaderValue::from_static("trailers"));

    channel.call(request).await
}

/// Connectivity state shared between the transport, its connector and its streams.
struct StateCell {
    tx: watch::Sender<ConnectivityState>,
    generation: AtomicU64,
}

impl StateCell {
    fn new() -> Self {
        let (tx, _) = watch::channel(ConnectivityState::Idle);
        Self {
            tx,
            generation: AtomicU64::new(0),
        }
    }

    fn begin_attempt(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.set(generation, ConnectivityState::Connecting);
        generation
    }

    fn set_current(&self, next: ConnectivityState) {
        self.set(self.generation.load(Ordering::Acquire), next);
    }

    /// Apply `next` if `generation` is still the latest attempt. `Shutdown` is terminal.
    fn set(&self, generation: u64, next: ConnectivityState) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.tx.send_if_modified(|state| {
            if *state == ConnectivityState::Shutdown || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn shutdown(&self) {
        self.tx.send_replace(ConnectivityState::Shutdown);
    }
}

#[derive(Clone)]
struct MonitoredConnector {
    state: Arc<StateCell>,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    nodelay: bool,
}

impl Service<Uri> for MonitoredConnector {
    type Response = TokioIo<MonitoredStream>;
    type Error = io::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move { connector.connect(uri).await })
    }
}

impl MonitoredConnector {
    async fn connect(self, uri: Uri) -> io::Result<TokioIo<MonitoredStream>> {
        let generation = self.state.begin_attempt();
        match self.open(&uri).await {
            Ok(io) => {
                self.state.set(generation, ConnectivityState::Ready);
                Ok(TokioIo::new(MonitoredStream {
                    io,
                    state: self.state,
                    generation,
                }))
            }
            Err(e) => {
                debug!(uri = %uri, error = %e, "Transport connect failed");
                self.state.set(generation, ConnectivityState::TransientFailure);
                Err(e)
            }
        }
    }

    async fn open(&self, uri: &Uri) -> io::Result<Io> {
        let host = uri
            .host()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "uri has no host"))?
            .trim_start_matches('[')
            .trim_end_matches(']');
        let port = uri
            .port_u16()
            .unwrap_or(if self.tls.is_some() { 443 } else { 80 });

        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(self.nodelay)?;

        match &self.tls {
            None => Ok(Io::Plain(tcp)),
            Some((connector, server_name)) => {
                let tls = connector.connect(server_name.clone(), tcp).await?;
                Ok(Io::Tls(Box::new(tls)))
            }
        }
    }
}

enum Io {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// The byte stream handed to hyper. Reports EOF and IO errors into the state cell.
struct MonitoredStream {
    io: Io,
    state: Arc<StateCell>,
    generation: u64,
}

impl MonitoredStream {
    fn observe<T>(&self, poll: &Poll<io::Result<T>>) {
        if let Poll::Ready(Err(_)) = poll {
            self.state.set(self.generation, ConnectivityState::TransientFailure);
        }
    }
}

impl AsyncRead for MonitoredStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let had_room = buf.remaining() > 0;

        let poll = match &mut this.io {
            Io::Plain(tcp) => Pin::new(tcp).poll_read(cx, buf),
            Io::Tls(tls) => Pin::new(&mut **tls).poll_read(cx, buf),
        };

        if let Poll::Ready(Ok(())) = poll {
            if had_room && buf.filled().len() == before {
                // Peer closed the connection.
                this.state.set(this.generation, ConnectivityState::Idle);
            }
        }
        this.observe(&poll);
        poll
    }
}

impl AsyncWrite for MonitoredStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = match &mut this.io {
            Io::Plain(tcp) => Pin::new(tcp).poll_write(cx, buf),
            Io::Tls(tls) => Pin::new(&mut **tls).poll_write(cx, buf),
        };
        this.observe(&poll);
        poll
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = match &mut this.io {
            Io::Plain(tcp) => Pin::new(tcp).poll_write_vectored(cx, bufs),
            Io::Tls(tls) => Pin::new(&mut **tls).poll_write_vectored(cx, bufs),
        };
        this.observe(&poll);
        poll
    }

    fn is_write_vectored(&self) -> bool {
        match &self.io {
            Io::Plain(tcp) => tcp.is_write_vectored(),
            Io::Tls(tls) => tls.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = match &mut this.io {
            Io::Plain(tcp) => Pin::new(tcp).poll_flush(cx),
            Io::Tls(tls) => Pin::new(&mut **tls).poll_flush(cx),
        };
        this.observe(&poll);
        poll
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let poll = match &mut this.io {
            Io::Plain(tcp) => Pin::new(tcp).poll_shutdown(cx),
            Io::Tls(tls) => Pin::new(&mut **tls).poll_shutdown(cx),
        };
        if poll.is_ready() {
            this.state.set(this.generation, ConnectivityState::Idle);
        }
        poll
    }
}

impl Drop for MonitoredStream {
    fn drop(&mut self) {
        self.state.set(self.generation, ConnectivityState::Idle);
    }
}

/// TLS that accepts whatever identity the peer presents.
///
/// Intended for internal service meshes only. Handshake signatures are still checked,
/// the certificate chain and name are not.
fn relaxed_tls_connector() -> Result<TlsConnector, rustls::Error> {
    let provider = CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    let mut config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert(provider)))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

#[derive(Debug)]
struct AcceptAnyServerCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
