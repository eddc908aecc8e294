use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{redirect, Client, ClientBuilder, Proxy};

use super::{ResponseSnapshot, Transport, TransportError};
use crate::error::{ReconError, Result};
use crate::ReconConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client settings shared by both adapters.
#[derive(Debug, Clone)]
struct ClientSettings {
    timeout: Duration,
    verify_ssl: bool,
    follow_redirects: bool,
    max_redirects: usize,
    proxy: Option<String>,
}

impl ClientSettings {
    fn from_config(config: &ReconConfig) -> Result<Self> {
        let proxy = config.proxy_ref().map(str::to_string);
        if let Some(ref p) = proxy {
            Proxy::all(p.as_str())
                .map_err(|e| ReconError::Validation(format!("proxy '{}': {}", p, e)))?;
        }
        Ok(Self {
            timeout: Duration::from_secs(config.timeout),
            verify_ssl: config.security.verify_ssl,
            follow_redirects: config.security.follow_redirects,
            max_redirects: config.security.max_redirects,
            proxy,
        })
    }

    fn redirect_policy(&self) -> redirect::Policy {
        if self.follow_redirects {
            redirect::Policy::limited(self.max_redirects)
        } else {
            redirect::Policy::none()
        }
    }

    fn proxy(&self) -> std::result::Result<Option<Proxy>, reqwest::Error> {
        self.proxy.as_deref().map(Proxy::all).transpose()
    }
}

fn classify_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_builder() {
        TransportError::Other(err.to_string())
    } else {
        TransportError::Connection(err.to_string())
    }
}

/// Cooperative adapter: async reqwest plus tokio sleeps.
pub struct HttpTransport {
    inner: Client,
}

impl HttpTransport {
    pub fn from_config(config: &ReconConfig) -> Result<Self> {
        let settings = ClientSettings::from_config(config)?;

        let mut builder = ClientBuilder::new()
            .timeout(settings.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .redirect(settings.redirect_policy());

        if let Some(proxy) = settings.proxy().map_err(|e| ReconError::Internal(e.to_string()))? {
            builder = builder.proxy(proxy);
        }

        let inner = builder
            .build()
            .map_err(|e| ReconError::Internal(format!("building HTTP client: {}", e)))?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> std::result::Result<ResponseSnapshot, TransportError> {
        let response = self
            .inner
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status().as_u16();
        let headers = ResponseSnapshot::collect_headers(response.headers());
        let body = response.text().await.map_err(classify_error)?;

        Ok(ResponseSnapshot { status, headers, body })
    }

    async fn pause(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Blocking adapter: `reqwest::blocking` plus thread sleeps.
///
/// Its futures never yield, so they must be driven with
/// `futures::executor::block_on` on a worker thread, never on an async runtime.
/// The client is built on first use so the transport itself can be
/// constructed from async code.
pub struct BlockingTransport {
    settings: ClientSettings,
    client: Mutex<Option<reqwest::blocking::Client>>,
}

impl BlockingTransport {
    pub fn from_config(config: &ReconConfig) -> Result<Self> {
        Ok(Self {
            settings: ClientSettings::from_config(config)?,
            client: Mutex::new(None),
        })
    }

    fn client(&self) -> std::result::Result<reqwest::blocking::Client, TransportError> {
        let mut slot = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let mut builder = reqwest::blocking::ClientBuilder::new()
            .timeout(self.settings.timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(!self.settings.verify_ssl)
            .redirect(self.settings.redirect_policy());
        if let Some(proxy) = self.settings.proxy().map_err(classify_error)? {
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(classify_error)?;
        *slot = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for BlockingTransport {
    async fn fetch(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> std::result::Result<ResponseSnapshot, TransportError> {
        let response = self
            .client()?
            .get(url)
            .headers(headers.clone())
            .send()
            .map_err(classify_error)?;

        let status = response.status().as_u16();
        let headers = ResponseSnapshot::collect_headers(response.headers());
        let body = response.text().map_err(classify_error)?;

        Ok(ResponseSnapshot { status, headers, body })
    }

    async fn pause(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned response and returns the raw request it received.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{}/", addr), handle)
    }

    #[tokio::test]
    async fn test_http_transport_sends_headers_and_reads_response() {
        let (url, server) = serve_once(
            "HTTP/1.1 403 Forbidden\r\nContent-Type: text/plain\r\nContent-Length: 13\r\nConnection: close\r\n\r\naccess denied",
        )
        .await;
        let transport = HttpTransport::from_config(&ReconConfig::default()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-probe", "1".parse().unwrap());
        let snapshot = transport.fetch(&url, &headers).await.unwrap();

        assert_eq!(snapshot.status, 403);
        assert_eq!(snapshot.body, "access denied");
        assert_eq!(snapshot.headers["content-type"], "text/plain");

        let raw_request = server.await.unwrap().to_lowercase();
        assert!(raw_request.starts_with("get / http/1.1"));
        assert!(raw_request.contains("x-probe: 1"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::from_config(&ReconConfig::default()).unwrap();
        let err = transport
            .fetch(&format!("http://{}/", addr), &HeaderMap::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Connection(_)), "{:?}", err);
    }

    #[test]
    fn test_invalid_proxy_is_rejected_up_front() {
        let mut config = ReconConfig::default();
        config.proxy = Some("not a proxy url".to_string());

        assert!(matches!(
            HttpTransport::from_config(&config),
            Err(ReconError::Validation(_))
        ));
        assert!(matches!(
            BlockingTransport::from_config(&config),
            Err(ReconError::Validation(_))
        ));
    }
}
