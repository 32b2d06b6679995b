use std::future::Future;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context as _};
use aws_config::{BehaviorVersion, Region};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use pat_proxy::{
    CredentialValidator, DynamoTokenStore, KmsDecryptor, ProxyConfig, RequestInterceptor,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_rustls::TlsAcceptor;

use crate::config::{Settings, TlsFiles};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Build the AWS clients and the proxy, then serve until interrupted.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let aws = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .load()
        .await;
    let credentials = aws
        .credentials_provider()
        .ok_or(anyhow!("No AWS credentials provider available"))?;

    let store = DynamoTokenStore::new(aws_sdk_dynamodb::Client::new(&aws), &settings.table_name)
        .with_index(&settings.index_name);
    let decryptor = KmsDecryptor::new(aws_sdk_kms::Client::new(&aws));
    let interceptor = RequestInterceptor::new(
        CredentialValidator::new(Arc::new(store), Arc::new(decryptor)),
        Arc::new(credentials),
        ProxyConfig::new(&settings.region, settings.git_url.clone()),
    );

    // No overall timeout: clones of large repositories take as long as they take.
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to build upstream HTTP client")?;
    let app = pat_proxy::router(interceptor, client);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    log::info!("Server started on {}", addr);
    log::info!("tablename: {}", settings.table_name);
    log::info!("index: {}", settings.index_name);
    log::info!("giturl: {}", settings.git_url);
    log::info!("region: {}", settings.region);

    match settings.tls {
        Some(tls) => {
            log::info!("sslcert: {}", tls.cert.display());
            log::info!("sslkey: {}", tls.key.display());
            serve_tls(listener, app, &tls).await
        }
        None => {
            log::warn!("No TLS certificate configured, serving plain HTTP");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("Server error")
        }
    }
}

async fn serve_tls(listener: TcpListener, app: Router, tls: &TlsFiles) -> anyhow::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let certs = load_certs(tls).await?;
    let key = load_private_key(tls).await?;
    let mut server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to configure TLS server")?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    accept_loop(&listener, shutdown_signal(), |stream, remote_addr| {
        log::debug!("Accepted connection from {}", remote_addr);

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let tls_stream = match timeout(HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
                Ok(Ok(s)) => s,
                Ok(Err(err)) => {
                    log::debug!("TLS handshake with {} failed: {}", remote_addr, err);
                    return;
                }
                Err(_) => {
                    log::debug!("TLS handshake with {} timed out", remote_addr);
                    return;
                }
            };
            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(tls_stream), service)
                .await
            {
                log::debug!("Error serving connection from {}: {}", remote_addr, err);
            }
        });
    })
    .await;

    Ok(())
}

/// Source of inbound connections for [`accept_loop`].
trait Accept {
    type Io;

    async fn accept_connection(&self) -> io::Result<(Self::Io, SocketAddr)>;
}

impl Accept for TcpListener {
    type Io = TcpStream;

    async fn accept_connection(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept().await
    }
}

/// Hand every accepted connection to `handle` until `shutdown` resolves.
///
/// Accept errors such as running out of file descriptors are logged and retried after
/// [`ACCEPT_BACKOFF`]. They never stop the loop.
async fn accept_loop<L, F>(listener: &L, shutdown: impl Future<Output = ()>, mut handle: F)
where
    L: Accept,
    F: FnMut(L::Io, SocketAddr),
{
    tokio::pin!(shutdown);

    loop {
        let accepted = tokio::select! {
            accepted = listener.accept_connection() => accepted,
            _ = &mut shutdown => return,
        };
        match accepted {
            Ok((stream, remote_addr)) => handle(stream, remote_addr),
            Err(err) => {
                log::error!("Failed to accept connection: {}", err);
                tokio::select! {
                    _ = sleep(ACCEPT_BACKOFF) => {}
                    _ = &mut shutdown => return,
                }
            }
        }
    }
}

async fn load_certs(tls: &TlsFiles) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = tokio::fs::File::open(&tls.cert)
        .await
        .with_context(|| format!("Failed to open {}", tls.cert.display()))?;
    let mut reader = BufReader::new(file.into_std().await);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to load certificates from {}", tls.cert.display()))
}

async fn load_private_key(tls: &TlsFiles) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = tokio::fs::File::open(&tls.key)
        .await
        .with_context(|| format!("Failed to open {}", tls.key.display()))?;
    let mut reader = BufReader::new(file.into_std().await);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("Failed to load private key from {}", tls.key.display()))?
        .ok_or(anyhow!("No private key found in {}", tls.key.display()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    log::info!("Shutting down");
}
