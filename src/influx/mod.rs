pub mod line;

use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

pub use line::{FieldValue, LineCodec, Point, Precision};

/// Request authentication for the InfluxDB HTTP API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    /// No authentication.
    #[default]
    None,
    /// HTTP basic auth header.
    Basic { username: String, password: String },
    /// Legacy `u`/`p` query parameters.
    Query { username: String, password: String },
}

impl Auth {
    fn apply(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Self::None => req,
            Self::Basic { username, password } => req.basic_auth(username, Some(password)),
            Self::Query { username, password } => {
                req.query(&[("u", username.as_str()), ("p", password.as_str())])
            }
        }
    }
}

/// Write failure taxonomy.
///
/// Every variant is fatal to the current run: batches are not retried
/// and no partial-success checkpoint exists, so the caller restarts the
/// export from the beginning if recovery is wanted.
#[derive(Debug, Error)]
pub enum InfluxError {
    #[error("permission denied ({status}): {reason}")]
    Permission { status: u16, reason: String },

    #[error("malformed write payload ({status}): {reason}")]
    Data { status: u16, reason: String },

    #[error("database not found ({status}): {reason}")]
    NotFound { status: u16, reason: String },

    #[error("unexpected write status ({status}): {reason}")]
    Status { status: u16, reason: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("encoding error: {0}")]
    Encode(String),
}

/// Maps a write response status to the error taxonomy. 204 is the only
/// success status.
pub fn classify_write_status(status: u16, reason: &str) -> Result<(), InfluxError> {
    let reason = reason.to_string();
    match status {
        204 => Ok(()),
        401 | 403 => Err(InfluxError::Permission { status, reason }),
        400 | 413 => Err(InfluxError::Data { status, reason }),
        404 => Err(InfluxError::NotFound { status, reason }),
        _ => Err(InfluxError::Status { status, reason }),
    }
}

/// Lazily encodes a batch into fixed-size body chunks.
///
/// Bounds peak memory to one chunk of rendered lines rather than the
/// whole batch payload.
struct ChunkEncoder {
    points: std::vec::IntoIter<Point>,
    codec: LineCodec,
    chunk_size: usize,
}

impl Iterator for ChunkEncoder {
    type Item = Result<Bytes, std::io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        for _ in 0..self.chunk_size {
            let Some(point) = self.points.next() else {
                break;
            };
            if let Err(e) = self.codec.encode(&point, &mut buf) {
                return Some(Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    e.to_string(),
                )));
            }
        }

        if buf.is_empty() {
            None
        } else {
            Some(Ok(Bytes::from(buf)))
        }
    }
}

/// InfluxDB write client.
///
/// Holds one HTTP connection pool for the lifetime of a pipeline run;
/// batches within the run reuse it.
pub struct Client {
    http: reqwest::Client,
    write_url: String,
    auth: Auth,
}

impl Client {
    /// Creates a client for an API base URL (e.g. `http://localhost:8086`).
    pub fn new(api_url: &str, auth: Auth, timeout: Duration) -> Result<Self, InfluxError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            write_url: format!("{}/write", api_url.trim_end_matches('/')),
            auth,
        })
    }

    /// Writes one batch of points as a single streamed POST.
    ///
    /// The body is produced in `chunk_size`-point chunks as the request
    /// streams; the batch either lands atomically (204) or the whole
    /// run is expected to abort with the returned error.
    pub async fn write(
        &self,
        database: &str,
        retention_policy: Option<&str>,
        precision: Precision,
        points: Vec<Point>,
        chunk_size: usize,
    ) -> Result<(), InfluxError> {
        let codec = LineCodec::new(precision).map_err(|e| InfluxError::Encode(e.to_string()))?;

        // Surface point preconditions before the request starts instead
        // of as a mid-stream body error.
        if let Some(point) = points.iter().find(|p| p.ns_part > 999) {
            return Err(InfluxError::Encode(format!(
                "nanosecond part must be in 0..999, got {}",
                point.ns_part
            )));
        }

        let mut req = self
            .http
            .post(&self.write_url)
            .query(&[("db", database), ("precision", precision.query_value())]);
        if let Some(policy) = retention_policy {
            req = req.query(&[("rp", policy)]);
        }
        req = self.auth.apply(req);

        let chunks = ChunkEncoder {
            points: points.into_iter(),
            codec,
            chunk_size: chunk_size.max(1),
        };
        let body = reqwest::Body::wrap_stream(futures_util::stream::iter(chunks));

        let resp = req.body(body).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            // Drain for connection reuse.
            let _ = resp.bytes().await;
            return Ok(());
        }

        let canonical = status.canonical_reason().unwrap_or("").to_string();
        let body_text = resp.text().await.unwrap_or_default();
        let reason = if body_text.trim().is_empty() {
            canonical
        } else {
            body_text.trim().to_string()
        };

        classify_write_status(status.as_u16(), &reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_success() {
        assert!(classify_write_status(204, "").is_ok());
    }

    #[test]
    fn test_classify_permission() {
        for status in [401, 403] {
            match classify_write_status(status, "nope") {
                Err(InfluxError::Permission { status: s, reason }) => {
                    assert_eq!(s, status);
                    assert_eq!(reason, "nope");
                }
                other => panic!("expected permission error, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_classify_data() {
        for status in [400, 413] {
            assert!(matches!(
                classify_write_status(status, ""),
                Err(InfluxError::Data { .. })
            ));
        }
    }

    #[test]
    fn test_classify_not_found() {
        assert!(matches!(
            classify_write_status(404, "database not found"),
            Err(InfluxError::NotFound { .. })
        ));
    }

    #[test]
    fn test_classify_other_statuses_are_generic() {
        // Unexpected success statuses are errors too: the server did
        // not acknowledge the write the way the protocol promises.
        for status in [200, 500, 503] {
            assert!(matches!(
                classify_write_status(status, ""),
                Err(InfluxError::Status { .. })
            ));
        }
    }

    #[test]
    fn test_chunk_encoder_splits_batches() {
        use chrono::{NaiveDate, NaiveTime};

        let point = Point {
            measurement: "m".to_string(),
            tags: vec![],
            fields: vec![("v".to_string(), FieldValue::Integer(1))],
            timestamp: "2021-01-15"
                .parse::<NaiveDate>()
                .unwrap()
                .and_time(NaiveTime::MIN),
            ns_part: 0,
        };

        let encoder = ChunkEncoder {
            points: vec![point.clone(); 5].into_iter(),
            codec: LineCodec::new(Precision::Seconds).unwrap(),
            chunk_size: 2,
        };
        let chunks: Vec<Bytes> = encoder.map(|c| c.expect("encodable")).collect();

        // 5 points in chunks of 2: 2 + 2 + 1.
        assert_eq!(chunks.len(), 3);
        let expected_line = "m v=1i 1610668800\n";
        assert_eq!(chunks[0], Bytes::from(expected_line.repeat(2)));
        assert_eq!(chunks[2], Bytes::from(expected_line));
    }
}
