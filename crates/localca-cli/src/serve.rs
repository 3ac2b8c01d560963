use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use localca::{CertificateAuthority, Materialized};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info};

pub(crate) const DEFAULT_LISTEN: &str = "localhost:9000";

const GREETING: &str = "Well, hello there!\n";
const MAX_REQUEST_HEAD: usize = 16 * 1024;

pub(crate) fn run(
    authority: CertificateAuthority,
    listen: &str,
    cert_file: Option<&Path>,
) -> Result<()> {
    let config = match cert_file {
        Some(path) => config_from_file(path)?,
        None => config_from_authority(authority)?,
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    runtime.block_on(serve(listen, Arc::new(config)))
}

/// Certificates signed per SNI name by the root, creating the root on first use.
fn config_from_authority(authority: CertificateAuthority) -> Result<ServerConfig> {
    if authority.materialize().context("load or create root")? == Materialized::Created {
        let paths = authority.paths()?;
        let banner = "=".repeat(40);
        println!("{banner}");
        println!("Created new root certificate in {:?}", paths.dir.display().to_string());
        println!("Use 'localca root install' to install it in the system trust stores");
        println!("{banner}");
    }
    Ok(Arc::new(authority).certificate_selector().into_server_config())
}

/// A fixed key pair read from one PEM file holding both key and certificates.
fn config_from_file(path: &Path) -> Result<ServerConfig> {
    let chain = CertificateDer::pem_file_iter(path)
        .map_err(|error| anyhow!("read {}: {error:?}", path.display()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| anyhow!("parse certificates in {}: {error:?}", path.display()))?;
    if chain.is_empty() {
        bail!("no certificates in {}", path.display());
    }
    let key = PrivateKeyDer::from_pem_file(path)
        .map_err(|error| anyhow!("read private key from {}: {error:?}", path.display()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .with_context(|| format!("load key pair from {}", path.display()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

async fn serve(listen: &str, config: Arc<ServerConfig>) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("listen on {listen}"))?;
    info!(listen, "serving");
    eprintln!("listening on https://{listen}");

    let acceptor = TlsAcceptor::from(config);
    loop {
        let (stream, peer) = listener.accept().await.context("accept connection")?;
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            if let Err(error) = handle_connection(acceptor, stream).await {
                debug!(%peer, %error, "connection failed");
            }
        });
    }
}

/// Complete the handshake, read one request head and greet.
pub(crate) async fn handle_connection<S>(acceptor: TlsAcceptor, stream: S) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut tls = acceptor.accept(stream).await?;
    read_request_head(&mut tls).await?;
    tls.write_all(response().as_bytes()).await?;
    tls.shutdown().await
}

async fn read_request_head<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<()> {
    let mut head = Vec::new();
    let mut buffer = [0_u8; 1024];
    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            return Ok(());
        }
        head.extend_from_slice(&buffer[..read]);
        if head.windows(4).any(|window| window == b"\r\n\r\n") {
            return Ok(());
        }
        if head.len() > MAX_REQUEST_HEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
    }
}

fn response() -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{GREETING}",
        GREETING.len()
    )
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use localca::{AuthorityConfig, CertificateAuthority, LeafKind};
    use rustls::pki_types::ServerName;
    use rustls::{ClientConfig, RootCertStore};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_rustls::{TlsAcceptor, TlsConnector};

    use super::{config_from_file, handle_connection, response, GREETING};

    fn authority_in(dir: &TempDir) -> Arc<CertificateAuthority> {
        let authority = CertificateAuthority::new(
            AuthorityConfig::default().with_root_dir(dir.path().join("root")),
        )
        .expect("authority");
        authority.materialize().expect("root");
        Arc::new(authority)
    }

    fn client_trusting(authority: &CertificateAuthority) -> TlsConnector {
        let mut roots = RootCertStore::empty();
        roots
            .add(authority.root().expect("root").certificate_der().clone())
            .expect("trust root");
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    }

    async fn fetch(acceptor: TlsAcceptor, connector: TlsConnector, host: &'static str) -> String {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(handle_connection(acceptor, server_io));

        let name = ServerName::try_from(host).expect("server name");
        let mut tls = connector.connect(name, client_io).await.expect("handshake");
        tls.write_all(format!("GET / HTTP/1.1\r\nHost: {host}\r\n\r\n").as_bytes())
            .await
            .expect("request");
        let mut body = String::new();
        tls.read_to_string(&mut body).await.expect("response");
        server.await.expect("join").expect("server");
        body
    }

    #[test]
    fn response_declares_greeting_length() {
        let response = response();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains(&format!("Content-Length: {}\r\n", GREETING.len())));
        assert!(response.ends_with("\r\n\r\nWell, hello there!\n"));
    }

    #[tokio::test]
    async fn greets_with_certificates_from_the_selector() {
        let dir = TempDir::new().expect("tempdir");
        let authority = authority_in(&dir);
        let acceptor = TlsAcceptor::from(Arc::new(
            authority.certificate_selector().into_server_config(),
        ));

        let body = fetch(acceptor, client_trusting(&authority), "app.localhost").await;
        assert!(body.ends_with(GREETING));
    }

    #[tokio::test]
    async fn greets_with_certificate_from_file() {
        let dir = TempDir::new().expect("tempdir");
        let authority = authority_in(&dir);
        let file = dir.path().join("app.localhost.pem");
        let mut pem = Vec::new();
        authority
            .write_leaf(&mut pem, &["app.localhost"], LeafKind::Server)
            .expect("leaf");
        fs::write(&file, pem).expect("write leaf");

        let config = config_from_file(&file).expect("config");
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let body = fetch(acceptor, client_trusting(&authority), "app.localhost").await;
        assert!(body.ends_with(GREETING));
    }

    #[test]
    fn file_without_certificate_is_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let file = dir.path().join("empty.pem");
        fs::write(&file, "").expect("write");
        let error = config_from_file(&file).expect_err("no certificate");
        assert!(error.to_string().contains("no certificates"));
    }
}
