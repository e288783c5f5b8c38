//! External time references.
//!
//! Two transports are provided:
//! - [`SntpReference`]: a minimal SNTP (RFC 4330) client over UDP
//! - [`HttpDateReference`]: the `Date` header of any HTTP endpoint
//!
//! Errors from a single reference never leave the clock module; the
//! [`AuthoritativeClock`](super::AuthoritativeClock) logs them and fails over.

use async_trait::async_trait;
use chrono::DateTime;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::{lookup_host, UdpSocket};

use crate::config::ReferenceConfig;

/// Seconds between the NTP era origin (1900-01-01) and the Unix epoch.
const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;
const NTP_PACKET_LEN: usize = 48;
/// LI = 0, VN = 3, Mode = 3 (client).
const SNTP_CLIENT_HEADER: u8 = 0x1B;

/// Failure of a single reference query.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("server refused service ({0})")]
    KissOfDeath(String),

    #[error("server clock is unsynchronized")]
    Unsynchronized,
}

/// A source of true UTC time.
#[async_trait]
pub trait TimeReference: Send + Sync {
    /// Name used in logs, metrics and clock status.
    fn name(&self) -> &str;

    /// Upper bound for one query; the clock moves to the next reference after it.
    fn timeout(&self) -> Duration;

    /// Current time, Unix epoch milliseconds.
    async fn query(&self) -> Result<i64, ReferenceError>;
}

/// Build a reference from its configuration entry.
pub fn from_config(config: &ReferenceConfig) -> Result<Arc<dyn TimeReference>, ReferenceError> {
    match config {
        ReferenceConfig::Sntp { host, port, timeout } => {
            Ok(Arc::new(SntpReference::new(host.clone(), *port, *timeout)))
        }
        ReferenceConfig::HttpDate { url, timeout } => {
            Ok(Arc::new(HttpDateReference::new(url.clone(), *timeout)?))
        }
    }
}

fn half_round_trip(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis() / 2).unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// SNTP
// ═══════════════════════════════════════════════════════════════════════════════

/// SNTP client for one server.
#[derive(Debug, Clone)]
pub struct SntpReference {
    name: String,
    host: String,
    port: u16,
    timeout: Duration,
}

impl SntpReference {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        let host = host.into();
        Self {
            name: format!("sntp://{}:{}", host, port),
            host,
            port,
            timeout,
        }
    }
}

#[async_trait]
impl TimeReference for SntpReference {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn query(&self) -> Result<i64, ReferenceError> {
        let server = lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| ReferenceError::Resolve(self.host.clone()))?;

        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;

        let request = sntp_request(chrono::Utc::now().timestamp_millis());

        let started = Instant::now();
        socket.send(&request).await?;

        // Replies that do not echo our transmit timestamp are stale or forged;
        // keep listening until a matching one arrives or the caller's timeout fires.
        let mut response = [0u8; 512];
        loop {
            let len = socket.recv(&mut response).await?;
            if !echoes_request(&response[..len], &request) {
                tracing::debug!(
                    reference = %self.name,
                    "Ignoring SNTP reply with foreign origin timestamp"
                );
                continue;
            }
            let transmit = parse_sntp_response(&response[..len])?;
            return Ok(transmit + half_round_trip(started));
        }
    }
}

/// Client request carrying `epoch_millis` as its transmit timestamp.
fn sntp_request(epoch_millis: i64) -> [u8; NTP_PACKET_LEN] {
    let mut request = [0u8; NTP_PACKET_LEN];
    request[0] = SNTP_CLIENT_HEADER;

    let ntp_seconds = epoch_millis.div_euclid(1_000) + NTP_UNIX_OFFSET_SECS;
    let fraction = ((epoch_millis.rem_euclid(1_000) as u64) << 32) / 1_000;
    // Era wrap is intended: only the 32 low bits go on the wire.
    request[40..44].copy_from_slice(&(ntp_seconds as u32).to_be_bytes());
    request[44..48].copy_from_slice(&(fraction as u32).to_be_bytes());
    request
}

/// Whether `reply`'s origin timestamp is `request`'s transmit timestamp.
fn echoes_request(reply: &[u8], request: &[u8; NTP_PACKET_LEN]) -> bool {
    reply.len() >= NTP_PACKET_LEN && reply[24..32] == request[40..48]
}

/// Extract the server transmit timestamp (Unix millis) from an SNTP reply.
pub fn parse_sntp_response(packet: &[u8]) -> Result<i64, ReferenceError> {
    if packet.len() < NTP_PACKET_LEN {
        return Err(ReferenceError::Malformed(format!(
            "packet is {} bytes, expected at least {}",
            packet.len(),
            NTP_PACKET_LEN
        )));
    }

    let leap = packet[0] >> 6;
    let mode = packet[0] & 0x07;
    let stratum = packet[1];

    if mode != 4 && mode != 5 {
        return Err(ReferenceError::Malformed(format!("unexpected mode {}", mode)));
    }
    if stratum == 0 {
        let code = String::from_utf8_lossy(&packet[12..16]).into_owned();
        return Err(ReferenceError::KissOfDeath(code));
    }
    if leap == 3 || stratum > 15 {
        return Err(ReferenceError::Unsynchronized);
    }

    let seconds = u32::from_be_bytes([packet[40], packet[41], packet[42], packet[43]]);
    let fraction = u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]);
    if seconds == 0 {
        return Err(ReferenceError::Malformed("zero transmit timestamp".to_string()));
    }

    // Timestamps with the high bit clear belong to era 1 (from 2036-02-07).
    let ntp_seconds = if seconds & 0x8000_0000 == 0 {
        i64::from(seconds) + (1i64 << 32)
    } else {
        i64::from(seconds)
    };
    let fraction_millis = ((u64::from(fraction) * 1_000) >> 32) as i64;

    Ok((ntp_seconds - NTP_UNIX_OFFSET_SECS) * 1_000 + fraction_millis)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP Date
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads time from the `Date` header of an HTTP endpoint (second precision).
#[derive(Debug, Clone)]
pub struct HttpDateReference {
    name: String,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpDateReference {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ReferenceError> {
        let url = url.into();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: url.clone(),
            url,
            timeout,
            client,
        })
    }
}

#[async_trait]
impl TimeReference for HttpDateReference {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn query(&self) -> Result<i64, ReferenceError> {
        let started = Instant::now();
        // Any status carries a usable Date header.
        let response = self.client.head(&self.url).send().await?;

        let header = response
            .headers()
            .get(reqwest::header::DATE)
            .ok_or_else(|| ReferenceError::Malformed("missing Date header".to_string()))?;
        let value = header
            .to_str()
            .map_err(|e| ReferenceError::Malformed(e.to_string()))?;
        let date = DateTime::parse_from_rfc2822(value)
            .map_err(|e| ReferenceError::Malformed(format!("Date header {:?}: {}", value, e)))?;

        Ok(date.timestamp_millis() + half_round_trip(started))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// 2024-01-01T00:00:00.500Z as an SNTP server reply.
    fn reply(leap_mode: u8, stratum: u8) -> [u8; NTP_PACKET_LEN] {
        let mut packet = [0u8; NTP_PACKET_LEN];
        packet[0] = leap_mode;
        packet[1] = stratum;
        let seconds = (1_704_067_200i64 + NTP_UNIX_OFFSET_SECS) as u32;
        packet[40..44].copy_from_slice(&seconds.to_be_bytes());
        packet[44..48].copy_from_slice(&(1u32 << 31).to_be_bytes());
        packet
    }

    /// Server reply echoing `request`'s transmit timestamp as its origin.
    fn answer(request: &[u8], stratum: u8) -> [u8; NTP_PACKET_LEN] {
        let mut packet = reply(0x24, stratum);
        packet[24..32].copy_from_slice(&request[40..48]);
        packet
    }

    #[test]
    fn test_request_carries_transmit_timestamp() {
        let request = sntp_request(1_704_067_200_500);
        assert_eq!(request[0], SNTP_CLIENT_HEADER);

        let seconds = u32::from_be_bytes([request[40], request[41], request[42], request[43]]);
        assert_eq!(i64::from(seconds), 1_704_067_200 + NTP_UNIX_OFFSET_SECS);
        let fraction = u32::from_be_bytes([request[44], request[45], request[46], request[47]]);
        assert_eq!(fraction, 1u32 << 31);
    }

    #[test]
    fn test_reply_must_echo_request() {
        let request = sntp_request(1_704_067_200_000);
        assert!(echoes_request(&answer(&request, 2), &request));
        assert!(!echoes_request(&reply(0x24, 2), &request));
        assert!(!echoes_request(&request[..20], &request));
    }

    #[test]
    fn test_parse_server_reply() {
        let millis = parse_sntp_response(&reply(0x24, 2)).unwrap();
        assert_eq!(millis, 1_704_067_200_500);
    }

    #[test]
    fn test_parse_rejects_short_packet() {
        let err = parse_sntp_response(&[0x24; 20]).unwrap_err();
        assert!(matches!(err, ReferenceError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_client_mode() {
        let err = parse_sntp_response(&reply(0x23, 2)).unwrap_err();
        assert!(matches!(err, ReferenceError::Malformed(_)));
    }

    #[test]
    fn test_parse_kiss_of_death() {
        let mut packet = reply(0x24, 0);
        packet[12..16].copy_from_slice(b"RATE");
        match parse_sntp_response(&packet).unwrap_err() {
            ReferenceError::KissOfDeath(code) => assert_eq!(code, "RATE"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_unsynchronized_alarm() {
        let err = parse_sntp_response(&reply(0xE4, 2)).unwrap_err();
        assert!(matches!(err, ReferenceError::Unsynchronized));
    }

    #[test]
    fn test_parse_era_one_timestamp() {
        let mut packet = reply(0x24, 1);
        // 2036-02-07T06:28:16Z + 10s lands in era 1 as seconds = 10.
        packet[40..44].copy_from_slice(&10u32.to_be_bytes());
        packet[44..48].copy_from_slice(&0u32.to_be_bytes());
        assert_eq!(parse_sntp_response(&packet).unwrap(), 2_085_978_506_000);
    }

    #[tokio::test]
    async fn test_sntp_query_against_loopback_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (len, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, NTP_PACKET_LEN);
            assert_eq!(buf[0], SNTP_CLIENT_HEADER);
            server.send_to(&answer(&buf, 2), peer).await.unwrap();
        });

        let reference = SntpReference::new("127.0.0.1", port, Duration::from_secs(1));
        assert_eq!(reference.name(), format!("sntp://127.0.0.1:{}", port));

        let millis = reference.query().await.unwrap();
        assert!((1_704_067_200_500..1_704_067_201_500).contains(&millis));
    }

    #[tokio::test]
    async fn test_sntp_query_skips_reply_with_foreign_origin() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut forged = reply(0x24, 1);
            forged[40..44].copy_from_slice(&1u32.to_be_bytes());
            server.send_to(&forged, peer).await.unwrap();
            server.send_to(&answer(&buf, 2), peer).await.unwrap();
        });

        let reference = SntpReference::new("127.0.0.1", port, Duration::from_secs(1));
        let millis = reference.query().await.unwrap();
        assert!((1_704_067_200_500..1_704_067_201_500).contains(&millis));
    }

    #[tokio::test]
    async fn test_sntp_query_never_accepts_unmatched_reply() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&reply(0x24, 2), peer).await.unwrap();
        });

        let reference = SntpReference::new("127.0.0.1", port, Duration::from_millis(200));
        let outcome = tokio::time::timeout(reference.timeout(), reference.query()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn test_http_date_reference_reads_header() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("Date", "Sun, 06 Nov 1994 08:49:37 GMT"),
            )
            .mount(&server)
            .await;

        let reference = HttpDateReference::new(server.uri(), Duration::from_secs(1)).unwrap();
        let millis = reference.query().await.unwrap();

        assert!((784_111_777_000..784_111_778_000).contains(&millis));
    }

    #[tokio::test]
    async fn test_http_date_reference_rejects_garbage_header() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(405).insert_header("Date", "yesterday-ish"))
            .mount(&server)
            .await;

        let reference = HttpDateReference::new(server.uri(), Duration::from_secs(1)).unwrap();
        let err = reference.query().await.unwrap_err();

        assert!(matches!(err, ReferenceError::Malformed(_)));
    }

    #[test]
    fn test_from_config_names_references() {
        let sntp = from_config(&ReferenceConfig::Sntp {
            host: "time.example.org".to_string(),
            port: 123,
            timeout: Duration::from_millis(750),
        })
        .unwrap();
        assert_eq!(sntp.name(), "sntp://time.example.org:123");
        assert_eq!(sntp.timeout(), Duration::from_millis(750));

        let http = from_config(&ReferenceConfig::HttpDate {
            url: "https://example.org/".to_string(),
            timeout: Duration::from_secs(2),
        })
        .unwrap();
        assert_eq!(http.name(), "https://example.org/");
    }
}
