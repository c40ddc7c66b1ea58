//! HTTP client shared by the extraction pipeline and the archiver.
//!
//! [`HttpClient`] wraps a [`reqwest::Client`] with a mutable set of default
//! headers (site rules may add their own) and an optional list of denied
//! network blocks checked against every resolved destination, redirect
//! targets included.

use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderName, HeaderValue, LOCATION, PROXY_AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode, redirect};
use tracing::debug;
use url::Url;

use crate::{Result, ScrapbookError};

/// Default browser-like User-Agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:75.0) Gecko/20100101 Firefox/75.0";

/// Redirects followed before a request fails.
pub const MAX_REDIRECTS: usize = 10;

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout: u64,
    /// User-Agent string.
    pub user_agent: String,
    /// Destinations inside these blocks are refused. Empty disables the check.
    pub denied_ips: Vec<IpNetwork>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout: 10, user_agent: DEFAULT_USER_AGENT.to_string(), denied_ips: Vec::new() }
    }
}

/// An IPv4 or IPv6 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    /// Create a network, rejecting prefixes longer than the address.
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(ScrapbookError::ConfigError(format!("invalid prefix length /{prefix} for {addr}")));
        }
        Ok(Self { addr, prefix })
    }

    /// Check whether `ip` belongs to this network.
    ///
    /// IPv4-mapped IPv6 addresses are compared as IPv4.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(self.prefix)) };
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(self.prefix)) };
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for IpNetwork {
    type Err = ScrapbookError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr
            .parse()
            .map_err(|e| ScrapbookError::ConfigError(format!("invalid network '{s}': {e}")))?;
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .map_err(|e| ScrapbookError::ConfigError(format!("invalid network '{s}': {e}")))?,
            None if addr.is_ipv4() => 32,
            None => 128,
        };
        Self::new(addr, prefix)
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// HTTP client with per-extraction default headers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    headers: HeaderMap,
    config: FetchConfig,
}

impl HttpClient {
    /// Build a client from a configuration.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let inner = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .redirect(redirect::Policy::none())
            .build()
            .map_err(ScrapbookError::HttpError)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| ScrapbookError::ConfigError(format!("invalid user agent: {e}")))?,
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(reqwest::header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));
        headers.insert(reqwest::header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
        headers.insert(reqwest::header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        Ok(Self { inner, headers, config })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Current default headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Set (or replace) a default header sent with every later request.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ScrapbookError::ConfigError(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ScrapbookError::ConfigError(format!("invalid header value for '{name}': {e}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Prepare a GET request carrying the default headers.
    pub fn get(&self, url: &Url) -> RequestBuilder {
        self.inner.get(url.clone()).headers(self.headers.clone())
    }

    /// Send a request after checking its destination.
    ///
    /// Redirects are followed here, up to [`MAX_REDIRECTS`], and every hop
    /// goes through the same destination check as the first request.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let mut request = request.build().map_err(ScrapbookError::HttpError)?;
        for _ in 0..=MAX_REDIRECTS {
            self.check_destination(request.url()).await?;
            debug!(url = %request.url(), "http request");

            let retry = request.try_clone();
            let response = self.inner.execute(request).await.map_err(|e| self.map_error(e))?;
            let next = match (retry, redirect_target(&response)) {
                (Some(next), Some(target)) => redirect_request(next, target, response.status()),
                _ => return Ok(response),
            };
            debug!(from = %response.url(), to = %next.url(), status = response.status().as_u16(), "redirect");
            request = next;
        }
        Err(ScrapbookError::TooManyRedirects { max: MAX_REDIRECTS })
    }

    fn map_error(&self, err: reqwest::Error) -> ScrapbookError {
        if err.is_timeout() {
            ScrapbookError::Timeout { timeout: self.config.timeout }
        } else {
            ScrapbookError::HttpError(err)
        }
    }

    /// GET a URL and fail on any non 2xx status.
    pub async fn fetch(&self, url: &Url) -> Result<Response> {
        let response = self.send(self.get(url)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapbookError::InvalidStatus { status: status.as_u16() });
        }
        Ok(response)
    }

    /// Resolve the URL host and refuse it when any address is denied.
    pub async fn check_destination(&self, url: &Url) -> Result<()> {
        if self.config.denied_ips.is_empty() {
            return Ok(());
        }
        let host = url.host_str().ok_or_else(|| ScrapbookError::InvalidUrl(url.to_string()))?;
        let addrs: Vec<IpAddr> = match url.host() {
            Some(url::Host::Ipv4(ip)) => vec![IpAddr::V4(ip)],
            Some(url::Host::Ipv6(ip)) => vec![IpAddr::V6(ip)],
            _ => tokio::net::lookup_host((host, url.port_or_known_default().unwrap_or(80)))
                .await?
                .map(|a| a.ip())
                .collect(),
        };

        for ip in addrs {
            if let Some(net) = self.config.denied_ips.iter().find(|n| n.contains(ip)) {
                return Err(ScrapbookError::DestinationDenied(format!("{host} resolves to {ip} ({net})")));
            }
        }
        Ok(())
    }
}

/// Absolute target of a redirect response, if it is one.
fn redirect_target(response: &Response) -> Option<Url> {
    let status = response.status();
    if !matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    response.url().join(location).ok()
}

/// Turn `request` into the request for `target`.
///
/// Credentials are dropped when the origin changes; 303 and non-GET 301/302
/// become a GET without a body.
fn redirect_request(mut request: Request, target: Url, status: StatusCode) -> Request {
    if request.url().origin() != target.origin() {
        for name in [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION] {
            request.headers_mut().remove(name);
        }
    }
    let to_get = status == StatusCode::SEE_OTHER
        || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND) && request.method() != Method::HEAD);
    if to_get && request.method() != Method::GET {
        *request.method_mut() = Method::GET;
        *request.body_mut() = None;
    }
    *request.url_mut() = target;
    request
}

/// Reads HTML content from a local file.
///
/// Callers should validate and sanitize the path when accepting user input.
pub fn fetch_file(path: &str) -> Result<String> {
    let path_buf = PathBuf::from(path);

    if !path_buf.exists() {
        Err(ScrapbookError::FileNotFound(path_buf))
    } else {
        fs::read_to_string(&path_buf).map_err(ScrapbookError::from)
    }
}

/// Reads HTML content from standard input.
pub fn fetch_stdin() -> Result<String> {
    use std::io::{self, Read};

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer).map_err(ScrapbookError::from)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.timeout, 10);
        assert!(config.user_agent.contains("Firefox"));
        assert!(config.denied_ips.is_empty());
    }

    #[rstest]
    #[case("127.0.0.0/8", "127.0.0.1", true)]
    #[case("127.0.0.0/8", "128.0.0.1", false)]
    #[case("10.0.0.0/8", "10.200.3.4", true)]
    #[case("192.168.1.10", "192.168.1.10", true)]
    #[case("192.168.1.10", "192.168.1.11", false)]
    #[case("0.0.0.0/0", "8.8.8.8", true)]
    #[case("fd00::/8", "fd12::1", true)]
    #[case("::1/128", "::1", true)]
    #[case("127.0.0.0/8", "::ffff:127.0.0.1", true)]
    #[case("127.0.0.0/8", "::1", false)]
    fn test_ip_network_contains(#[case] net: &str, #[case] ip: &str, #[case] expected: bool) {
        let net: IpNetwork = net.parse().unwrap();
        assert_eq!(net.contains(ip.parse().unwrap()), expected);
    }

    #[test]
    fn test_ip_network_invalid() {
        assert!("10.0.0.0/33".parse::<IpNetwork>().is_err());
        assert!("not-an-ip/8".parse::<IpNetwork>().is_err());
        assert!("10.0.0.0/x".parse::<IpNetwork>().is_err());
    }

    #[test]
    fn test_ip_network_display() {
        let net: IpNetwork = "10.1.0.0/16".parse().unwrap();
        assert_eq!(net.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_set_header() {
        let mut client = HttpClient::new(FetchConfig::default()).unwrap();
        client.set_header("X-Test", "1").unwrap();
        assert_eq!(client.headers().get("x-test").unwrap(), "1");
        assert!(client.set_header("bad header", "1").is_err());
    }

    #[tokio::test]
    async fn test_check_destination_denied() {
        let config = FetchConfig { denied_ips: vec!["127.0.0.0/8".parse().unwrap()], ..Default::default() };
        let client = HttpClient::new(config).unwrap();

        let url = Url::parse("http://127.0.0.1:8080/").unwrap();
        let result = client.check_destination(&url).await;
        assert!(matches!(result, Err(ScrapbookError::DestinationDenied(_))));

        let url = Url::parse("http://10.0.0.1/").unwrap();
        assert!(client.check_destination(&url).await.is_ok());
    }

    async fn redirect_to(server: &MockServer, from: &str, location: &str) {
        Mock::given(method("GET"))
            .and(path(from))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", location))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_send_follows_redirects() {
        let server = MockServer::start().await;
        redirect_to(&server, "/old", "/new").await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
            .mount(&server)
            .await;

        let config = FetchConfig { denied_ips: vec!["10.0.0.0/8".parse().unwrap()], ..Default::default() };
        let client = HttpClient::new(config).unwrap();
        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        let response = client.fetch(&url).await.unwrap();

        assert_eq!(response.url().path(), "/new");
        assert_eq!(response.text().await.unwrap(), "moved");
    }

    #[tokio::test]
    async fn test_send_redirect_to_denied_destination() {
        let server = MockServer::start().await;
        let port = server.address().port();
        redirect_to(&server, "/away", &format!("http://127.0.0.2:{port}/private")).await;

        let config = FetchConfig { denied_ips: vec!["127.0.0.2/32".parse().unwrap()], ..Default::default() };
        let client = HttpClient::new(config).unwrap();
        let url = Url::parse(&format!("{}/away", server.uri())).unwrap();
        let result = client.fetch(&url).await;

        assert!(matches!(result, Err(ScrapbookError::DestinationDenied(_))), "{result:?}");
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_too_many_redirects() {
        let server = MockServer::start().await;
        redirect_to(&server, "/loop", "/loop").await;

        let client = HttpClient::new(FetchConfig::default()).unwrap();
        let url = Url::parse(&format!("{}/loop", server.uri())).unwrap();
        let result = client.fetch(&url).await;

        assert!(matches!(result, Err(ScrapbookError::TooManyRedirects { max: MAX_REDIRECTS })));
        assert_eq!(server.received_requests().await.unwrap().len(), MAX_REDIRECTS + 1);
    }

    #[test]
    fn test_fetch_file_not_found() {
        let result = fetch_file("/nonexistent/path/file.html");
        assert!(matches!(result, Err(ScrapbookError::FileNotFound(_))));
    }
}
