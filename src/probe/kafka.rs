//! Kafka topic probe speaking the broker wire protocol directly.
//!
//! Each check connects to the first reachable bootstrap broker, performs an
//! `ApiVersions` handshake and then asks for `Metadata` (v4) of the
//! configured topic. A read check passes when at least one partition has a
//! leader; a write check requires every partition to have one.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{split_host_port, Probe, ProbeError, Task};
use crate::config::defaults::KAFKA_CLIENT_ID;

const API_METADATA: i16 = 3;
const API_VERSIONS: i16 = 18;
const METADATA_VERSION: i16 = 4;

/// Longest topic name a broker accepts.
const MAX_TOPIC_LEN: usize = 249;
/// Responses larger than this are treated as garbage.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaSettings {
    pub brokers: Vec<String>,
    pub topic: String,
    pub timeout: Duration,
    pub task: Task,
    pub region: String,
}

pub struct KafkaProbe {
    settings: KafkaSettings,
    correlation: AtomicI32,
}

impl KafkaProbe {
    pub fn new(settings: KafkaSettings) -> Result<Self, ProbeError> {
        if settings.brokers.is_empty() {
            return Err(ProbeError::invalid("kafka probe needs at least one broker"));
        }
        for broker in &settings.brokers {
            split_host_port(broker, None)?;
        }
        if settings.topic.is_empty() || settings.topic.len() > MAX_TOPIC_LEN {
            return Err(ProbeError::invalid(format!(
                "kafka topic must be 1..={MAX_TOPIC_LEN} bytes"
            )));
        }
        if !matches!(settings.task, Task::Read | Task::Write) {
            return Err(ProbeError::invalid(format!(
                "kafka does not support task {}",
                settings.task
            )));
        }
        Ok(Self {
            settings,
            correlation: AtomicI32::new(0),
        })
    }

    async fn bootstrap(&self) -> Result<TcpStream, ProbeError> {
        let mut last_error = String::from("no brokers configured");
        for broker in &self.settings.brokers {
            match tokio::time::timeout(self.settings.timeout, TcpStream::connect(broker)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => last_error = format!("{broker}: {e}"),
                Err(_) => last_error = format!("{broker}: connect timeout"),
            }
        }
        Err(ProbeError::Connect {
            target: self.settings.brokers.join(","),
            message: last_error,
        })
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        api_key: i16,
        api_version: i16,
        body: &[u8],
    ) -> Result<Vec<u8>, ProbeError> {
        let correlation_id = self.correlation.fetch_add(1, Ordering::Relaxed);
        let request = encode_request(api_key, api_version, correlation_id, body)?;
        stream.write_all(&request).await.map_err(ProbeError::request)?;

        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.map_err(ProbeError::request)?;
        let len = usize::try_from(i32::from_be_bytes(len))
            .ok()
            .filter(|n| (4..=MAX_RESPONSE_BYTES).contains(n))
            .ok_or_else(|| ProbeError::Protocol("invalid response length".into()))?;

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await.map_err(ProbeError::request)?;

        let mut decoder = Decoder::new(&payload);
        let echoed = decoder.i32()?;
        if echoed != correlation_id {
            return Err(ProbeError::Protocol(format!(
                "correlation id mismatch: sent {correlation_id}, got {echoed}"
            )));
        }
        Ok(payload[4..].to_vec())
    }

    async fn topic_metadata(&self) -> Result<TopicMetadata, ProbeError> {
        let mut stream = self.bootstrap().await?;

        let versions = self.exchange(&mut stream, API_VERSIONS, 0, &[]).await?;
        let (min, max) = metadata_version_range(&versions)?;
        if !(min..=max).contains(&METADATA_VERSION) {
            return Err(ProbeError::Protocol(format!(
                "broker supports Metadata v{min}..=v{max}, need v{METADATA_VERSION}"
            )));
        }

        let mut body = Encoder::default();
        body.i32(1);
        body.string(&self.settings.topic)?;
        body.i8(0); // allow_auto_topic_creation = false
        let response = self
            .exchange(&mut stream, API_METADATA, METADATA_VERSION, &body.into_bytes())
            .await?;

        decode_metadata_v4(&response)?
            .into_iter()
            .find(|t| t.name == self.settings.topic)
            .ok_or_else(|| ProbeError::Protocol(format!("topic {} missing from metadata", self.settings.topic)))
    }
}

#[async_trait]
impl Probe for KafkaProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let topic = self.topic_metadata().await?;
        if topic.error_code != 0 {
            return Err(ProbeError::Request(format!(
                "topic {}: {}",
                topic.name,
                error_name(topic.error_code)
            )));
        }

        let leaderless: Vec<i32> = topic
            .partitions
            .iter()
            .filter(|p| p.leader < 0)
            .map(|p| p.index)
            .collect();

        match self.settings.task {
            Task::Write if topic.partitions.is_empty() || !leaderless.is_empty() => {
                Err(ProbeError::Request(format!(
                    "topic {} has partitions without a leader: {leaderless:?}",
                    topic.name
                )))
            }
            Task::Read if leaderless.len() == topic.partitions.len() => Err(ProbeError::Request(
                format!("no partition of topic {} has a leader", topic.name),
            )),
            _ => Ok(()),
        }
    }

    fn metadata(&self) -> String {
        format!(
            "Brokers: [{}] | Topic: {} | Region: {}",
            self.settings.brokers.join(", "),
            self.settings.topic,
            self.settings.region
        )
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout
    }
}

// ============================================================================
// Wire encoding
// ============================================================================

#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn i8(&mut self, v: i8) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn string(&mut self, s: &str) -> Result<(), ProbeError> {
        let len = i16::try_from(s.len())
            .map_err(|_| ProbeError::Protocol("string too long for the wire".into()))?;
        self.i16(len);
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Size-prefixed request with a v1 header (api key, version, correlation, client id).
fn encode_request(
    api_key: i16,
    api_version: i16,
    correlation_id: i32,
    body: &[u8],
) -> Result<Vec<u8>, ProbeError> {
    let mut msg = Encoder::default();
    msg.i16(api_key);
    msg.i16(api_version);
    msg.i32(correlation_id);
    msg.string(KAFKA_CLIENT_ID)?;
    msg.buf.extend_from_slice(body);

    let len = i32::try_from(msg.buf.len())
        .map_err(|_| ProbeError::Protocol("request too large".into()))?;
    let mut framed = Vec::with_capacity(msg.buf.len() + 4);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&msg.buf);
    Ok(framed)
}

// ============================================================================
// Wire decoding
// ============================================================================

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProbeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| ProbeError::Protocol("truncated response".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn i8(&mut self) -> Result<i8, ProbeError> {
        Ok(i8::from_be_bytes([self.take(1)?[0]]))
    }

    fn i16(&mut self) -> Result<i16, ProbeError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, ProbeError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn nullable_string(&mut self) -> Result<Option<String>, ProbeError> {
        let len = self.i16()?;
        if len < 0 {
            return Ok(None);
        }
        let bytes = self.take(usize::try_from(len).unwrap_or_default())?;
        Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn string(&mut self) -> Result<String, ProbeError> {
        self.nullable_string()?
            .ok_or_else(|| ProbeError::Protocol("unexpected null string".into()))
    }

    /// Array length; null arrays decode as empty.
    fn array_len(&mut self) -> Result<usize, ProbeError> {
        let len = self.i32()?;
        let len = usize::try_from(len).unwrap_or(0);
        // Every element is at least one byte, so a longer claim is corrupt
        if len > self.buf.len() - self.pos {
            return Err(ProbeError::Protocol("array length exceeds response".into()));
        }
        Ok(len)
    }

    fn skip_i32_array(&mut self) -> Result<(), ProbeError> {
        let n = self.array_len()?;
        self.take(n * 4)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PartitionMetadata {
    index: i32,
    leader: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TopicMetadata {
    error_code: i16,
    name: String,
    partitions: Vec<PartitionMetadata>,
}

/// Supported (min, max) Metadata versions from an ApiVersions v0 response.
fn metadata_version_range(response: &[u8]) -> Result<(i16, i16), ProbeError> {
    let mut d = Decoder::new(response);
    let error_code = d.i16()?;
    if error_code != 0 {
        return Err(ProbeError::Request(format!(
            "ApiVersions failed: {}",
            error_name(error_code)
        )));
    }
    for _ in 0..d.array_len()? {
        let (key, min, max) = (d.i16()?, d.i16()?, d.i16()?);
        if key == API_METADATA {
            return Ok((min, max));
        }
    }
    Err(ProbeError::Protocol("broker does not advertise the Metadata API".into()))
}

fn decode_metadata_v4(response: &[u8]) -> Result<Vec<TopicMetadata>, ProbeError> {
    let mut d = Decoder::new(response);
    let _throttle_ms = d.i32()?;

    for _ in 0..d.array_len()? {
        let _node_id = d.i32()?;
        let _host = d.string()?;
        let _port = d.i32()?;
        let _rack = d.nullable_string()?;
    }
    let _cluster_id = d.nullable_string()?;
    let _controller_id = d.i32()?;

    let topic_count = d.array_len()?;
    let mut topics = Vec::with_capacity(topic_count);
    for _ in 0..topic_count {
        let error_code = d.i16()?;
        let name = d.string()?;
        let _is_internal = d.i8()?;

        let partition_count = d.array_len()?;
        let mut partitions = Vec::with_capacity(partition_count);
        for _ in 0..partition_count {
            let _error_code = d.i16()?;
            let index = d.i32()?;
            let leader = d.i32()?;
            d.skip_i32_array()?; // replicas
            d.skip_i32_array()?; // isr
            partitions.push(PartitionMetadata { index, leader });
        }
        topics.push(TopicMetadata {
            error_code,
            name,
            partitions,
        });
    }
    Ok(topics)
}

fn error_name(code: i16) -> String {
    match code {
        3 => "UNKNOWN_TOPIC_OR_PARTITION".to_string(),
        5 => "LEADER_NOT_AVAILABLE".to_string(),
        29 => "TOPIC_AUTHORIZATION_FAILED".to_string(),
        35 => "UNSUPPORTED_VERSION".to_string(),
        other => format!("error code {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal broker answering ApiVersions and Metadata for one topic.
    async fn fake_broker(topic: &'static str, topic_error: i16, leaders: Vec<i32>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let leaders = leaders.clone();
                tokio::spawn(async move {
                    loop {
                        let mut len = [0u8; 4];
                        if socket.read_exact(&mut len).await.is_err() {
                            return;
                        }
                        let mut req = vec![0u8; i32::from_be_bytes(len) as usize];
                        socket.read_exact(&mut req).await.unwrap();
                        let api_key = i16::from_be_bytes([req[0], req[1]]);
                        let correlation = i32::from_be_bytes([req[4], req[5], req[6], req[7]]);

                        let mut out = Encoder::default();
                        out.i32(correlation);
                        if api_key == API_VERSIONS {
                            out.i16(0);
                            out.i32(2);
                            for (key, min, max) in [(API_VERSIONS, 0, 3), (API_METADATA, 0, 12)] {
                                out.i16(key);
                                out.i16(min);
                                out.i16(max);
                            }
                        } else {
                            out.i32(0); // throttle
                            out.i32(1);
                            out.i32(1);
                            out.string("127.0.0.1").unwrap();
                            out.i32(9092);
                            out.i16(-1); // rack
                            out.i16(-1); // cluster id
                            out.i32(1);
                            out.i32(1);
                            out.i16(topic_error);
                            out.string(topic).unwrap();
                            out.i8(0);
                            out.i32(leaders.len() as i32);
                            for (i, leader) in leaders.iter().enumerate() {
                                out.i16(0);
                                out.i32(i as i32);
                                out.i32(*leader);
                                out.i32(1);
                                out.i32(*leader);
                                out.i32(0);
                            }
                        }
                        let body = out.into_bytes();
                        socket.write_all(&(body.len() as i32).to_be_bytes()).await.unwrap();
                        socket.write_all(&body).await.unwrap();
                    }
                });
            }
        });
        addr.to_string()
    }

    fn settings(brokers: Vec<String>, task: Task) -> KafkaSettings {
        KafkaSettings {
            brokers,
            topic: "health".into(),
            timeout: Duration::from_secs(2),
            task,
            region: "eu-west".into(),
        }
    }

    #[tokio::test]
    async fn read_needs_one_leader_write_needs_all() {
        let broker = fake_broker("health", 0, vec![1, -1]).await;

        let read = KafkaProbe::new(settings(vec![broker.clone()], Task::Read)).unwrap();
        read.check().await.unwrap();

        let write = KafkaProbe::new(settings(vec![broker], Task::Write)).unwrap();
        let err = write.check().await.unwrap_err();
        assert!(err.to_string().contains("without a leader: [1]"), "{err}");
    }

    #[tokio::test]
    async fn fully_led_topic_passes_both_tasks() {
        let broker = fake_broker("health", 0, vec![1, 2, 3]).await;
        for task in [Task::Read, Task::Write] {
            let probe = KafkaProbe::new(settings(vec![broker.clone()], task)).unwrap();
            probe.check().await.unwrap();
            // Connections are per check, so a second check works too
            probe.check().await.unwrap();
        }
    }

    #[tokio::test]
    async fn topic_error_fails() {
        let broker = fake_broker("health", 3, vec![]).await;
        let probe = KafkaProbe::new(settings(vec![broker], Task::Read)).unwrap();
        let err = probe.check().await.unwrap_err();
        assert!(err.to_string().contains("UNKNOWN_TOPIC_OR_PARTITION"), "{err}");
    }

    #[tokio::test]
    async fn falls_back_to_next_bootstrap_broker() {
        let dead = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };
        let live = fake_broker("health", 0, vec![1]).await;

        let probe = KafkaProbe::new(settings(vec![dead.clone(), live], Task::Read)).unwrap();
        probe.check().await.unwrap();

        let probe = KafkaProbe::new(settings(vec![dead], Task::Read)).unwrap();
        assert!(matches!(probe.check().await, Err(ProbeError::Connect { .. })));
    }

    #[test]
    fn request_framing() {
        let framed = encode_request(API_VERSIONS, 0, 7, &[]).unwrap();
        let len = i32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        assert_eq!(len, framed.len() - 4);
        assert_eq!(&framed[4..6], &API_VERSIONS.to_be_bytes());
        assert_eq!(&framed[8..12], &7i32.to_be_bytes());
        assert_eq!(&framed[14..], KAFKA_CLIENT_ID.as_bytes());
    }

    #[test]
    fn truncated_responses_are_protocol_errors() {
        assert!(matches!(decode_metadata_v4(&[0, 0]), Err(ProbeError::Protocol(_))));
        // claims a huge broker array
        assert!(matches!(
            decode_metadata_v4(&[0, 0, 0, 0, 0x7f, 0, 0, 0]),
            Err(ProbeError::Protocol(_))
        ));
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(KafkaProbe::new(settings(vec![], Task::Read)).is_err());
        assert!(KafkaProbe::new(settings(vec!["nohost".into()], Task::Read)).is_err());
        let mut no_topic = settings(vec!["k:9092".into()], Task::Read);
        no_topic.topic.clear();
        assert!(KafkaProbe::new(no_topic).is_err());
        assert!(KafkaProbe::new(settings(vec!["k:9092".into()], Task::Probe)).is_err());
    }

    #[test]
    fn metadata_lists_brokers_and_topic() {
        let probe = KafkaProbe::new(settings(vec!["k1:9092".into(), "k2:9092".into()], Task::Read)).unwrap();
        assert_eq!(
            probe.metadata(),
            "Brokers: [k1:9092, k2:9092] | Topic: health | Region: eu-west"
        );
    }
}
