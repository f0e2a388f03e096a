use crate::common::interface::Reliability;
use crate::common::model::config::DownloaderConfig;
use crate::common::model::{Headers, Request, Response};
use crate::downloader::{DownloadOptions, Downloader};
use crate::errors::{DownloadError, RequestError, ResponseError, Result};
use futures::StreamExt;
use log::{debug, warn};
use metrics::{counter, histogram};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Proxy};
use semver::Version;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// reqwest-backed [`Downloader`].
///
/// Holds one pooled client per route: direct, through `proxy_url`, and
/// through `reliable_proxy_url` for crawlers that ask for high reliability.
/// Headless rendering is not available in this backend.
#[derive(Clone)]
pub struct RequestDownloader {
    default_client: Client,
    proxy_client: Option<Client>,
    reliable_client: Option<Client>,
    max_response_size: usize,
}

impl RequestDownloader {
    pub fn new(config: &DownloaderConfig) -> Result<Self> {
        let default_client = Self::build_client(config, None)?;
        let proxy_client = config
            .proxy_url
            .as_deref()
            .map(|url| Self::build_client(config, Some(url)))
            .transpose()?;
        let reliable_client = config
            .reliable_proxy_url
            .as_deref()
            .map(|url| Self::build_client(config, Some(url)))
            .transpose()?;

        Ok(RequestDownloader {
            default_client,
            proxy_client,
            reliable_client,
            max_response_size: config.max_response_size,
        })
    }

    fn build_client(config: &DownloaderConfig, proxy: Option<&str>) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(config.pool_size)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs));
        if let Some(proxy_url) = proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| DownloadError::InvalidProxy(e.into()))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| DownloadError::ClientError(e.into()).into())
    }

    fn select_client(&self, options: &DownloadOptions) -> (&Client, &'static str) {
        if !options.enable_proxy {
            return (&self.default_client, "direct");
        }
        if options.reliability == Reliability::High {
            if let Some(client) = &self.reliable_client {
                return (client, "reliable");
            }
        }
        match &self.proxy_client {
            Some(client) => (client, "proxy"),
            None => {
                debug!("proxy requested but none configured, downloading directly");
                (&self.default_client, "direct")
            }
        }
    }

    async fn read_body(&self, request: &Request, response: reqwest::Response) -> Result<Vec<u8>> {
        if let Some(len) = response.content_length() {
            if len > self.max_response_size as u64 {
                warn!(
                    "Response size {} exceeds limit {}, aborting download for {}",
                    len, self.max_response_size, request.url
                );
                return Err(ResponseError::BodyTooLarge(len as usize).into());
            }
        }

        let mut content = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| DownloadError::DownloadFailed(e.into()))?;
            if content.len() + chunk.len() > self.max_response_size {
                warn!(
                    "Response size exceeds limit {}, aborting download for {}",
                    self.max_response_size, request.url
                );
                return Err(ResponseError::BodyTooLarge(content.len() + chunk.len()).into());
            }
            content.extend_from_slice(&chunk);
        }
        Ok(content)
    }
}

#[async_trait::async_trait]
impl Downloader for RequestDownloader {
    fn name(&self) -> String {
        "request_downloader".to_string()
    }

    fn version(&self) -> Version {
        Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 1, 0))
    }

    async fn do_with_options(&self, request: Request, options: DownloadOptions) -> Result<Response> {
        if options.enable_headless {
            return Err(DownloadError::Unsupported("headless rendering".to_string()).into());
        }
        if options.enable_session_init {
            debug!("session init requested for {}, cookie sessions are managed upstream", request.url);
        }

        let (client, route) = self.select_client(&options);
        let method = Method::from_str(&request.method)
            .map_err(|_| RequestError::InvalidMethod(request.method.clone()))?;

        let mut builder = client
            .request(method, request.url.clone())
            .headers(HeaderMap::from(&request.headers));
        if !request.cookies.is_empty() {
            builder = builder.header(reqwest::header::COOKIE, request.cookies.header_value());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let start = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::TimeoutError(e.into())
            } else if e.is_connect() {
                DownloadError::NetworkError(e.into())
            } else {
                DownloadError::DownloadFailed(e.into())
            }
        })?;

        let status_code = response.status().as_u16();
        histogram!("crawlet_download_duration_seconds", "route" => route)
            .record(start.elapsed().as_secs_f64());
        counter!("crawlet_downloads_total", "status_code" => status_code.to_string(), "route" => route)
            .increment(1);

        let url = response.url().clone();
        let headers = Headers::from(response.headers());
        let content = self.read_body(&request, response).await?;

        Ok(Response {
            url,
            status_code,
            headers,
            content,
            request,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::model::CookieItem;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn downloader() -> RequestDownloader {
        RequestDownloader::new(&DownloaderConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_downloader_creation() {
        let downloader = downloader();
        assert_eq!(downloader.name(), "request_downloader");
        assert!(downloader.health_check().await.is_ok());
        assert!(downloader.proxy_client.is_none());

        let config = DownloaderConfig {
            proxy_url: Some("http://127.0.0.1:3128".to_string()),
            ..Default::default()
        };
        let downloader = RequestDownloader::new(&config).unwrap();
        let options = DownloadOptions {
            enable_proxy: true,
            ..Default::default()
        };
        assert_eq!(downloader.select_client(&options).1, "proxy");
    }

    #[tokio::test]
    async fn test_get_sends_headers_and_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/us/women"))
            .and(header("x-region", "us"))
            .and(header("cookie", "geo=US; cart=1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>ok</html>"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::get(format!("{}/us/women", server.uri()))
            .unwrap()
            .with_header("X-Region", "us")
            .with_cookie(CookieItem::new("geo", "US"))
            .with_cookie(CookieItem::new("cart", "1"));

        let response = downloader()
            .do_with_options(request, DownloadOptions::default())
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.text(), "<html>ok</html>");
        assert_eq!(response.headers.get("content-type"), Some("text/html"));
        assert_eq!(response.request.url.path(), "/us/women");
    }

    #[tokio::test]
    async fn test_post_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/search"))
            .and(body_string("q=dress"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::post(format!("{}/api/search", server.uri()), "q=dress").unwrap();
        let response = downloader()
            .do_with_options(request, DownloadOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status_code, 201);
    }

    #[tokio::test]
    async fn test_headless_is_unsupported() {
        let request = Request::get("http://127.0.0.1:9/").unwrap();
        let options = DownloadOptions {
            enable_headless: true,
            ..Default::default()
        };
        let err = downloader().do_with_options(request, options).await.unwrap_err();
        assert!(err.is_download());
        assert!(err.to_string().contains("headless"));
    }

    #[tokio::test]
    async fn test_response_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2048]))
            .mount(&server)
            .await;

        let config = DownloaderConfig {
            max_response_size: 1024,
            ..Default::default()
        };
        let downloader = RequestDownloader::new(&config).unwrap();
        let request = Request::get(server.uri()).unwrap();
        let err = downloader
            .do_with_options(request, DownloadOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_response());
    }

    #[tokio::test]
    async fn test_proxy_falls_back_to_direct_when_unconfigured() {
        let downloader = downloader();
        let options = DownloadOptions {
            enable_proxy: true,
            reliability: Reliability::High,
            ..Default::default()
        };
        let (_, route) = downloader.select_client(&options);
        assert_eq!(route, "direct");
    }
}
