//! Byte transport against per-transfer URLs.
//!
//! The management API only brokers transfers; the payload moves over a plain
//! HTTP(S) exchange with the URL it hands out: GET to pull a file out of the
//! guest, PUT with a mandatory Content-Length to push one in.

use crate::error::{ApiError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio_util::io::{ReaderStream, StreamReader};

/// Streaming body of a download.
pub type DownloadReader = Box<dyn AsyncRead + Send + Unpin>;

/// Streaming body of an upload.
pub type UploadReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Default connect timeout for transfer endpoints.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Moves bytes against a resolved transfer URL.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download from a transfer URL.
    ///
    /// # Returns
    /// The body reader and the length announced by the endpoint (0 when the
    /// endpoint announces none).
    async fn download(&self, url: &str) -> Result<(DownloadReader, u64)>;

    /// Upload exactly `content_length` bytes from `body` to a transfer URL.
    async fn upload(&self, url: &str, body: UploadReader, content_length: u64) -> Result<()>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Accept self-signed or otherwise invalid TLS certificates (default: false).
    pub accept_invalid_certs: bool,
    /// TCP/TLS connect timeout (default: 30 seconds).
    pub connect_timeout: Duration,
    /// Route requests through the proxy named by `HTTP(S)_PROXY` (default: true).
    pub use_env_proxy: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            use_env_proxy: true,
        }
    }
}

impl TransportConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `GUESTBOX_INSECURE` | `false` |
    /// | `GUESTBOX_CONNECT_TIMEOUT_SECS` | `30` |
    /// | `GUESTBOX_NO_PROXY` | `false` |
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            accept_invalid_certs: std::env::var("GUESTBOX_INSECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(default.accept_invalid_certs),
            connect_timeout: std::env::var("GUESTBOX_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.connect_timeout),
            use_env_proxy: std::env::var("GUESTBOX_NO_PROXY")
                .map(|v| !(v == "true" || v == "1"))
                .unwrap_or(default.use_env_proxy),
        }
    }
}

/// HTTP(S) transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport from configuration.
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new(config: TransportConfig) -> Result<Self> {
        if config.accept_invalid_certs {
            tracing::warn!("TLS certificate verification disabled for transfer endpoints");
        }

        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .connect_timeout(config.connect_timeout);
        if !config.use_env_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, url: &str) -> Result<(DownloadReader, u64)> {
        let start = Instant::now();
        tracing::debug!(url = %url, "Starting download");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %message, "Download rejected");
            return Err(ApiError::Transfer {
                status: status.as_u16(),
                message,
            });
        }

        let length = response.content_length().unwrap_or(0);
        tracing::debug!(
            length,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Download headers received"
        );

        let stream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok((Box::new(StreamReader::new(stream)), length))
    }

    async fn upload(&self, url: &str, body: UploadReader, content_length: u64) -> Result<()> {
        let start = Instant::now();
        tracing::debug!(url = %url, content_length, "Starting upload");

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, content_length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(body)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %message, "Upload rejected");
            return Err(ApiError::Transfer {
                status: status.as_u16(),
                message,
            });
        }

        tracing::debug!(
            content_length,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Upload complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_config_defaults() {
        let config = TransportConfig::default();
        assert!(!config.accept_invalid_certs);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert!(config.use_env_proxy);
    }

    #[test]
    fn test_config_from_env() {
        std::env::set_var("GUESTBOX_INSECURE", "1");
        std::env::set_var("GUESTBOX_CONNECT_TIMEOUT_SECS", "5");

        let config = TransportConfig::from_env();
        assert!(config.accept_invalid_certs);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));

        std::env::remove_var("GUESTBOX_INSECURE");
        std::env::remove_var("GUESTBOX_CONNECT_TIMEOUT_SECS");
    }

    #[test]
    fn test_transport_builds() {
        let transport = HttpTransport::new(TransportConfig {
            accept_invalid_certs: true,
            ..Default::default()
        });
        assert!(transport.is_ok());
    }

    #[tokio::test]
    async fn test_download_unreachable_endpoint_fails() {
        let transport = HttpTransport::new(TransportConfig {
            connect_timeout: Duration::from_millis(200),
            use_env_proxy: false,
            ..Default::default()
        })
        .expect("transport should build");

        // Port 9 (discard) is closed on any sane test host.
        let result = transport.download("http://127.0.0.1:9/guestFile").await;
        assert!(matches!(result, Err(ApiError::Http(_))));
    }

    /// Serve one canned response on a loopback port.
    ///
    /// The task yields the raw request once the response is written.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&request) {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}/guestFile?id=42"), server)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                line.to_ascii_lowercase()
                    .strip_prefix("content-length:")
                    .and_then(|v| v.trim().parse::<usize>().ok())
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(TransportConfig {
            use_env_proxy: false,
            ..Default::default()
        })
        .expect("transport should build")
    }

    #[tokio::test]
    async fn test_upload_sends_put_with_content_length() {
        let (url, server) =
            serve_once("HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n").await;

        let body: UploadReader = Box::new(Cursor::new(b"hello-body".to_vec()));
        transport().upload(&url, body, 10).await.unwrap();

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(request.starts_with("PUT /guestFile?id=42 HTTP/1.1\r\n"), "{request}");
        assert!(lower.contains("\r\ncontent-length: 10\r\n"), "{request}");
        assert!(!lower.contains("transfer-encoding"), "{request}");
        assert!(request.ends_with("\r\n\r\nhello-body"), "{request}");
    }

    #[tokio::test]
    async fn test_upload_rejection_maps_to_transfer_error() {
        let (url, server) = serve_once(
            "HTTP/1.1 403 Forbidden\r\ncontent-length: 6\r\nconnection: close\r\n\r\ndenied",
        )
        .await;

        let body: UploadReader = Box::new(Cursor::new(b"abc".to_vec()));
        let err = transport().upload(&url, body, 3).await.unwrap_err();
        server.await.unwrap();

        match err {
            ApiError::Transfer { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "denied");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_download_streams_body() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-length: 11\r\nconnection: close\r\n\r\nhello world",
        )
        .await;

        let (mut reader, length) = transport().download(&url).await.unwrap();
        let mut body = String::new();
        reader.read_to_string(&mut body).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /guestFile?id=42 HTTP/1.1\r\n"), "{request}");
        assert_eq!(length, 11);
        assert_eq!(body, "hello world");
    }

    #[tokio::test]
    async fn test_download_error_status_maps_to_transfer_error() {
        let (url, server) = serve_once(
            "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 4\r\nconnection: close\r\n\r\nbody",
        )
        .await;

        let result = transport().download(&url).await;
        server.await.unwrap();

        match result {
            Err(ApiError::Transfer { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "body");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("download of a 500 response succeeded"),
        }
    }
}
