//! S3 object store probe.
//!
//! Write checks upload a small random payload to a fixed object key; read
//! checks download that same object. Both use path-style addressing and
//! static credentials so they work against MinIO and Ceph gateways.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{CachedClient, Probe, ProbeError, Task};
use crate::config::defaults::S3_PAYLOAD_BYTES;

/// Signing region used when a cluster leaves `region` empty.
const FALLBACK_SIGNING_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub object_key: String,
    pub use_ssl: bool,
    pub timeout: Duration,
    pub task: Task,
}

impl S3Settings {
    /// Endpoint with a scheme; bare `host:port` gets one from `use_ssl`.
    fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{scheme}://{}", self.endpoint)
        }
    }
}

pub struct S3Probe {
    settings: S3Settings,
    client: CachedClient<Client>,
}

impl S3Probe {
    pub fn new(settings: S3Settings) -> Result<Self, ProbeError> {
        if settings.endpoint.trim().is_empty() {
            return Err(ProbeError::invalid("s3 endpoint is empty"));
        }
        if settings.bucket.trim().is_empty() {
            return Err(ProbeError::invalid("s3 bucket is empty"));
        }
        if settings.access_key.is_empty() || settings.secret_key.is_empty() {
            return Err(ProbeError::invalid("s3 accessKey and secretKey are required"));
        }
        if !matches!(settings.task, Task::Read | Task::Write) {
            return Err(ProbeError::invalid(format!("s3 does not support task {}", settings.task)));
        }
        reqwest::Url::parse(&settings.endpoint_url())
            .map_err(|e| ProbeError::invalid(format!("s3 endpoint {:?}: {e}", settings.endpoint)))?;

        Ok(Self {
            settings,
            client: CachedClient::new(),
        })
    }

    fn build_client(settings: &S3Settings) -> Client {
        let region = if settings.region.is_empty() {
            FALLBACK_SIGNING_REGION.to_string()
        } else {
            settings.region.clone()
        };
        let credentials = Credentials::new(
            settings.access_key.clone(),
            settings.secret_key.clone(),
            None,
            None,
            "fleet-prober",
        );

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials)
            .endpoint_url(settings.endpoint_url())
            .force_path_style(true)
            .build();
        Client::from_conf(config)
    }

    async fn put_payload(
        client: Arc<Client>,
        settings: &S3Settings,
        payload: Vec<u8>,
    ) -> Result<(), ProbeError> {
        client
            .put_object()
            .bucket(&settings.bucket)
            .key(&settings.object_key)
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|e| ProbeError::request(DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn fetch_payload(client: Arc<Client>, settings: &S3Settings) -> Result<(), ProbeError> {
        let object = client
            .get_object()
            .bucket(&settings.bucket)
            .key(&settings.object_key)
            .send()
            .await
            .map_err(|e| ProbeError::request(DisplayErrorContext(&e)))?;
        object
            .body
            .collect()
            .await
            .map_err(|e| ProbeError::request(format!("reading object body: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Probe for S3Probe {
    async fn check(&self) -> Result<(), ProbeError> {
        let settings = &self.settings;
        let connect = || async move { Ok::<_, ProbeError>(Self::build_client(settings)) };

        match settings.task {
            Task::Write => {
                let mut payload = vec![0u8; S3_PAYLOAD_BYTES];
                rand::thread_rng().fill_bytes(&mut payload);
                self.client
                    .run(connect, |client| Self::put_payload(client, settings, payload.clone()))
                    .await
            }
            _ => {
                self.client
                    .run(connect, |client| Self::fetch_payload(client, settings))
                    .await
            }
        }
    }

    fn metadata(&self) -> String {
        format!(
            "Endpoint: {} | Bucket: {} | Key: {} | Region: {}",
            self.settings.endpoint, self.settings.bucket, self.settings.object_key, self.settings.region
        )
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    async fn close(&self) {
        self.client.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(task: Task) -> S3Settings {
        S3Settings {
            endpoint: "minio.local:9000".into(),
            region: "eu-central".into(),
            access_key: "AK".into(),
            secret_key: "SK".into(),
            bucket: "health".into(),
            object_key: "probe-test-file".into(),
            use_ssl: false,
            timeout: Duration::from_secs(5),
            task,
        }
    }

    #[test]
    fn endpoint_scheme_follows_use_ssl() {
        let mut s = settings(Task::Read);
        assert_eq!(s.endpoint_url(), "http://minio.local:9000");
        s.use_ssl = true;
        assert_eq!(s.endpoint_url(), "https://minio.local:9000");
        s.endpoint = "http://explicit:9000".into();
        assert_eq!(s.endpoint_url(), "http://explicit:9000");
    }

    #[test]
    fn rejects_incomplete_settings() {
        let mut no_bucket = settings(Task::Write);
        no_bucket.bucket.clear();
        assert!(S3Probe::new(no_bucket).is_err());

        let mut no_creds = settings(Task::Write);
        no_creds.secret_key.clear();
        assert!(S3Probe::new(no_creds).is_err());

        let mut no_endpoint = settings(Task::Read);
        no_endpoint.endpoint = " ".into();
        assert!(S3Probe::new(no_endpoint).is_err());

        assert!(S3Probe::new(settings(Task::ReadWrite)).is_err());
    }

    #[test]
    fn metadata_names_the_object() {
        let probe = S3Probe::new(settings(Task::Read)).unwrap();
        assert_eq!(
            probe.metadata(),
            "Endpoint: minio.local:9000 | Bucket: health | Key: probe-test-file | Region: eu-central"
        );
    }

    #[tokio::test]
    async fn close_drops_the_cached_client() {
        let probe = S3Probe::new(settings(Task::Read)).unwrap();
        let s = &probe.settings;
        probe
            .client
            .run(
                || async move { Ok::<_, ProbeError>(S3Probe::build_client(s)) },
                |_| async { Ok::<_, ProbeError>(()) },
            )
            .await
            .unwrap();
        assert!(probe.client.is_connected());

        probe.close().await;
        assert!(!probe.client.is_connected());
    }
}
