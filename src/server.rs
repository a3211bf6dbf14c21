use crate::config::TlsFiles;
use crate::error::ProxyError;
use crate::router::Router;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1::Builder as ServerBuilder;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::{debug, error, info, warn};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::convert::Infallible;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Accept loop serving a [`Router`] over plain HTTP or TLS.
pub struct Server {
    router: Arc<Router>,
    tls: Option<TlsAcceptor>,
}

impl Server {
    pub fn new(router: Arc<Router>, tls: Option<TlsAcceptor>) -> Self {
        Self { router, tls }
    }

    pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ProxyError> {
        info!("Binding TCP listener to: {}:{}", host, port);
        TcpListener::bind((host, port)).await.map_err(|e| {
            ProxyError::Config(format!("Failed to bind {}:{}: {}", host, port, e))
        })
    }

    /// Accepts connections until the task is dropped. Accept failures and
    /// errors on individual connections are logged and do not stop the loop.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyError> {
        let local_addr = listener.local_addr()?;
        match self.tls {
            Some(_) => info!("HTTPS server listening on: https://{}", local_addr),
            None => info!("HTTP server listening on: http://{}", local_addr),
        }

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually transient (EMFILE and friends)
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            let router = self.router.clone();

            match self.tls.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => serve_connection(tls_stream, router, remote_addr).await,
                            Err(e) => warn!("Error establishing TLS connection from {}: {}", remote_addr, e),
                        }
                    });
                }
                None => {
                    tokio::spawn(serve_connection(stream, router, remote_addr));
                }
            }
        }
    }
}

/// Builds the acceptor for `--tls-cert`/`--tls-key`. Any unreadable or
/// empty file is a startup error naming that file.
pub fn tls_acceptor(files: &TlsFiles) -> Result<TlsAcceptor, ProxyError> {
    let certs = read_certificates(&files.certificate)?;
    let key = read_private_key(&files.private_key)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ProxyError::Config(format!("TLS certificate and key do not match: {}", e)))?;

    info!("TLS enabled with certificate {}", files.certificate.display());
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open_pem(path: &Path) -> Result<BufReader<File>, ProxyError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ProxyError::Config(format!("Cannot open {}: {}", path.display(), e)))
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let certs = rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Config(format!("Invalid certificate in {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(ProxyError::Config(format!("No certificate found in {}", path.display())));
    }
    Ok(certs)
}

// PKCS#8, PKCS#1 and SEC1 keys are all accepted
fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ProxyError> {
    rustls_pemfile::private_key(&mut open_pem(path)?)
        .map_err(|e| ProxyError::Config(format!("Invalid private key in {}: {}", path.display(), e)))?
        .ok_or_else(|| ProxyError::Config(format!("No private key found in {}", path.display())))
}

async fn serve_connection<S>(stream: S, router: Arc<Router>, remote_addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!("Accepted connection from {}", remote_addr);

    let service = service_fn(move |req: Request<Incoming>| {
        let router = router.clone();
        async move { Ok::<_, Infallible>(router.handle(req).await) }
    });

    if let Err(e) = ServerBuilder::new()
        .keep_alive(true)
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        error!("Error serving connection from {}: {}", remote_addr, e);
    }
}
