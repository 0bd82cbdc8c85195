//! FPM status sampling
//!
//! One sample is one FastCGI request against the pool's status page with
//! `?json&full`. The connection lives only for the duration of the call.

use crate::fastcgi::{self, Endpoint, FastCgiError, FastCgiRequest};
use crate::models::StatusSnapshot;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Query string sent to the status page
pub const STATUS_QUERY: &str = "json&full";

/// Bound on connect + request + response
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a sample did not produce a snapshot
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SampleError {
    /// The pool answered but the body is not a usable status document
    #[error("error decoding status response: {detail}")]
    Decode { detail: String, body: String },

    /// The exchange itself failed (connect, timeout, reset, framing)
    #[error("error retrieving status: {0}")]
    Transport(String),
}

impl SampleError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SampleError::Decode { .. } => "decode",
            SampleError::Transport(_) => "transport",
        }
    }
}

impl From<FastCgiError> for SampleError {
    fn from(err: FastCgiError) -> Self {
        SampleError::Transport(err.to_string())
    }
}

/// Result of one sample; never partially filled
pub type SampleOutcome = Result<StatusSnapshot, SampleError>;

/// Source of worker pool status snapshots
#[async_trait]
pub trait StatusSampler: Send + Sync {
    async fn sample(&self) -> SampleOutcome;
}

/// Decode a status page body into a snapshot
pub fn decode_status(body: &str) -> SampleOutcome {
    serde_json::from_str(body).map_err(|e| SampleError::Decode {
        detail: e.to_string(),
        body: body.to_string(),
    })
}

/// Samples a PHP-FPM pool over FastCGI
pub struct FpmStatusSampler {
    endpoint: Endpoint,
    request: FastCgiRequest,
    timeout: Duration,
}

impl FpmStatusSampler {
    /// Create a sampler for the status page at `status_path`
    pub fn new(endpoint: Endpoint, status_path: &str) -> Self {
        Self {
            endpoint,
            request: FastCgiRequest::get(status_path, STATUS_QUERY),
            timeout: RESPONSE_TIMEOUT,
        }
    }

    /// Override the response timeout (for testing)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl StatusSampler for FpmStatusSampler {
    async fn sample(&self) -> SampleOutcome {
        let response = match tokio::time::timeout(
            self.timeout,
            fastcgi::send(&self.endpoint, &self.request),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(SampleError::Transport(format!(
                    "no response from {} within {}ms",
                    self.endpoint,
                    self.timeout.as_millis()
                )))
            }
        };

        let status = response.status_code();
        if status != 200 {
            return Err(SampleError::Decode {
                detail: format!("status page returned HTTP {}", status),
                body: response.body,
            });
        }

        decode_status(&response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastcgi::{
        decode_params, write_stream, EndRequest, RecordHeader, RecordType, HEADER_LEN,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    const STATUS_BODY: &str = r#"{"pool":"www","process manager":"dynamic","start time":1700000000,
        "accepted conn":12,"listen queue":1,"max listen queue":2,"listen queue len":128,
        "idle processes":3,"active processes":2,"total processes":5,"max active processes":4,
        "max children reached":0,"slow requests":0,"processes":[]}"#;

    /// Serve one FastCGI request with the given STDOUT payload.
    /// Returns the address and a handle yielding the received params.
    async fn fake_fpm(stdout: String) -> (String, JoinHandle<Vec<(String, String)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut params = Vec::new();

            loop {
                let mut header = [0u8; HEADER_LEN];
                socket.read_exact(&mut header).await.unwrap();
                let header = RecordHeader::from_bytes(&header).unwrap();
                let mut body = vec![0u8; header.body_len()];
                socket.read_exact(&mut body).await.unwrap();
                let content = &body[..header.content_len as usize];

                match header.record_type {
                    RecordType::Params => params.extend_from_slice(content),
                    RecordType::Stdin if content.is_empty() => break,
                    _ => {}
                }
            }

            let mut reply = Vec::new();
            write_stream(&mut reply, RecordType::Stdout, 1, stdout.as_bytes());
            let end = EndRequest {
                app_status: 0,
                protocol_status: EndRequest::REQUEST_COMPLETE,
            };
            write_stream(&mut reply, RecordType::EndRequest, 1, &end.to_bytes());
            socket.write_all(&reply).await.unwrap();

            decode_params(&params).unwrap()
        });

        (addr, handle)
    }

    fn sampler_for(addr: &str) -> FpmStatusSampler {
        FpmStatusSampler::new(Endpoint::parse(addr).unwrap(), "/status")
    }

    #[tokio::test]
    async fn test_sample_success() {
        let stdout = format!("Content-type: application/json\r\n\r\n{}", STATUS_BODY);
        let (addr, server) = fake_fpm(stdout).await;

        let snapshot = sampler_for(&addr).sample().await.unwrap();
        let params = server.await.unwrap();

        assert_eq!(
            snapshot,
            StatusSnapshot {
                listen_queue: 1,
                listen_queue_len: 128,
                idle_processes: 3,
                active_processes: 2,
            }
        );
        assert!(params.contains(&("SCRIPT_NAME".to_string(), "/status".to_string())));
        assert!(params.contains(&("QUERY_STRING".to_string(), STATUS_QUERY.to_string())));
    }

    #[tokio::test]
    async fn test_sample_non_json_is_decode_error() {
        let (addr, server) = fake_fpm("Content-type: text/html\r\n\r\n<html>pool</html>".to_string()).await;

        let err = sampler_for(&addr).sample().await.unwrap_err();
        server.await.unwrap();

        match err {
            SampleError::Decode { body, .. } => assert_eq!(body, "<html>pool</html>"),
            other => panic!("expected decode error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sample_non_200_is_decode_error() {
        let stdout = "Status: 404 Not Found\r\nContent-type: text/plain\r\n\r\nFile not found.\n";
        let (addr, server) = fake_fpm(stdout.to_string()).await;

        let err = sampler_for(&addr).sample().await.unwrap_err();
        server.await.unwrap();

        assert_eq!(err.kind(), "decode");
    }

    #[tokio::test]
    async fn test_sample_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = sampler_for(&addr).sample().await.unwrap_err();
        assert!(matches!(err, SampleError::Transport(_)));
    }

    #[tokio::test]
    async fn test_sample_timeout_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Accept but never answer
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let err = sampler_for(&addr)
            .with_timeout(Duration::from_millis(100))
            .sample()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_decode_status_schema_violation() {
        let err = decode_status(r#"{"listen queue":"many"}"#).unwrap_err();
        assert_eq!(err.kind(), "decode");
    }
}
