//! HTTP endpoint probe.
//!
//! Any response passes unless its status code is listed in
//! `unacceptable_status_codes`; transport errors always fail.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Proxy, Url};
use serde::{Deserialize, Serialize};

use super::{Probe, ProbeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    pub endpoint: String,
    pub method: String,
    pub body: String,
    pub proxy_url: String,
    pub headers: BTreeMap<String, String>,
    pub unacceptable_status_codes: Vec<u16>,
    pub timeout: Duration,
    pub skip_tls_verify: bool,
    pub region: String,
}

pub struct HttpProbe {
    settings: HttpSettings,
    client: Client,
    method: Method,
    url: Url,
    headers: HeaderMap,
}

impl HttpProbe {
    pub fn new(settings: HttpSettings) -> Result<Self, ProbeError> {
        let url = Url::parse(&settings.endpoint)
            .map_err(|e| ProbeError::invalid(format!("endpoint {:?}: {e}", settings.endpoint)))?;

        let method = if settings.method.trim().is_empty() {
            Method::GET
        } else {
            Method::from_bytes(settings.method.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| ProbeError::invalid(format!("method {:?}", settings.method)))?
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ProbeError::invalid(format!("header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ProbeError::invalid(format!("header value for {name}")))?;
            headers.insert(name, value);
        }

        // Environment proxies are ignored; only an explicit proxy_url is used
        let mut builder = Client::builder()
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(settings.skip_tls_verify);
        builder = if settings.proxy_url.is_empty() {
            builder.no_proxy()
        } else {
            let proxy = Proxy::all(&settings.proxy_url)
                .map_err(|e| ProbeError::invalid(format!("proxy_url {:?}: {e}", settings.proxy_url)))?;
            builder.proxy(proxy)
        };
        let client = builder
            .build()
            .map_err(|e| ProbeError::invalid(format!("http client: {e}")))?;

        Ok(Self {
            settings,
            client,
            method,
            url,
            headers,
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let mut request = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());
        if !self.settings.body.is_empty() {
            request = request.body(self.settings.body.clone());
        }

        let response = request.send().await.map_err(ProbeError::request)?;
        let status = response.status();
        if self.settings.unacceptable_status_codes.contains(&status.as_u16()) {
            return Err(ProbeError::UnacceptableStatus(status.to_string()));
        }
        Ok(())
    }

    fn metadata(&self) -> String {
        format!(
            "Endpoint: {} | Method: {} | Proxy: {} | Region: {}",
            self.settings.endpoint, self.method, self.settings.proxy_url, self.settings.region
        )
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;

    async fn serve() -> String {
        let app = Router::new()
            .route("/up", get(|| async { "ok" }))
            .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .route("/echo", post(|body: String| async move { body }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn settings(endpoint: String, unacceptable: Vec<u16>) -> HttpSettings {
        HttpSettings {
            endpoint,
            method: String::new(),
            body: String::new(),
            proxy_url: String::new(),
            headers: BTreeMap::new(),
            unacceptable_status_codes: unacceptable,
            timeout: Duration::from_secs(2),
            skip_tls_verify: false,
            region: "us-east".into(),
        }
    }

    #[tokio::test]
    async fn healthy_endpoint_passes() {
        let base = serve().await;
        let probe = HttpProbe::new(settings(format!("{base}/up"), vec![503])).unwrap();
        probe.check().await.unwrap();
    }

    #[tokio::test]
    async fn unacceptable_status_fails() {
        let base = serve().await;
        let probe = HttpProbe::new(settings(format!("{base}/down"), vec![500, 503])).unwrap();
        let err = probe.check().await.unwrap_err();
        assert!(matches!(err, ProbeError::UnacceptableStatus(_)));
        assert!(err.to_string().contains("503"), "{err}");
    }

    #[tokio::test]
    async fn unlisted_error_status_still_passes() {
        let base = serve().await;
        let probe = HttpProbe::new(settings(format!("{base}/down"), vec![])).unwrap();
        probe.check().await.unwrap();
    }

    #[tokio::test]
    async fn sends_method_and_body() {
        let base = serve().await;
        let mut s = settings(format!("{base}/echo"), vec![404, 405]);
        s.method = "post".into();
        s.body = "hello".into();
        s.headers.insert("X-Probe".into(), "1".into());
        let probe = HttpProbe::new(s).unwrap();
        probe.check().await.unwrap();
        assert!(probe.metadata().contains("Method: POST"));
    }

    #[tokio::test]
    async fn connection_refused_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(settings(format!("http://{addr}/"), vec![])).unwrap();
        assert!(matches!(probe.check().await, Err(ProbeError::Request(_))));
    }

    #[test]
    fn rejects_invalid_settings() {
        assert!(HttpProbe::new(settings("not a url".into(), vec![])).is_err());

        let mut bad_method = settings("http://localhost/".into(), vec![]);
        bad_method.method = "GE T".into();
        assert!(HttpProbe::new(bad_method).is_err());

        let mut bad_header = settings("http://localhost/".into(), vec![]);
        bad_header.headers.insert("bad header".into(), "x".into());
        assert!(HttpProbe::new(bad_header).is_err());

        let mut bad_proxy = settings("http://localhost/".into(), vec![]);
        bad_proxy.proxy_url = "http://[::1".into();
        assert!(HttpProbe::new(bad_proxy).is_err());
    }

    #[test]
    fn metadata_defaults_method_to_get() {
        let probe = HttpProbe::new(settings("http://localhost/health".into(), vec![])).unwrap();
        assert_eq!(
            probe.metadata(),
            "Endpoint: http://localhost/health | Method: GET | Proxy:  | Region: us-east"
        );
    }
}
