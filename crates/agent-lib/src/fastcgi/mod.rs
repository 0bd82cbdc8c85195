//! Minimal FastCGI client for the FPM status page
//!
//! Each exchange opens its own connection (TCP or Unix socket), sends one
//! request and reads until END_REQUEST. Connections are never reused.

mod protocol;

pub use protocol::{
    decode_params, encode_params, write_stream, EndRequest, RecordHeader, RecordType,
    HEADER_LEN, ROLE_RESPONDER,
};

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

/// Port used when the socket address does not specify one
pub const DEFAULT_PORT: u16 = 9000;

const REQUEST_ID: u16 = 1;

/// Upper bound on a response body; the status page is a few KB
const MAX_RESPONSE_LEN: usize = 8 * 1024 * 1024;

/// Errors in the FastCGI layer
#[derive(Debug, Error)]
pub enum FastCgiError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown record type {0}")]
    UnknownRecordType(u8),

    #[error("truncated record")]
    Truncated,

    #[error("connection closed before end of request")]
    UnexpectedEof,

    #[error("response exceeds {0} bytes")]
    ResponseTooLarge(usize),

    #[error("request rejected with protocol status {0}")]
    Rejected(u8),

    #[error("invalid socket address '{0}'")]
    InvalidAddress(String),
}

/// Where the FPM pool listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse a socket address.
    ///
    /// Accepts `unix:///path/to.sock`, `tcp://host:port` and bare
    /// `host[:port]`; the port defaults to 9000.
    pub fn parse(address: &str) -> Result<Self, FastCgiError> {
        let invalid = || FastCgiError::InvalidAddress(address.to_string());

        let with_scheme = if address.contains("://") {
            address.to_string()
        } else {
            format!("tcp://{}", address)
        };
        let url = Url::parse(&with_scheme).map_err(|_| invalid())?;

        match url.scheme() {
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(invalid());
                }
                Ok(Endpoint::Unix(PathBuf::from(path)))
            }
            "tcp" => {
                let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
                Ok(Endpoint::Tcp {
                    host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
                    port: url.port().unwrap_or(DEFAULT_PORT),
                })
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{}:{}", host, port),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

/// A GET request for a script behind the FastCGI responder
#[derive(Debug, Clone)]
pub struct FastCgiRequest {
    params: Vec<(String, String)>,
}

impl FastCgiRequest {
    /// Build a GET request for `script_path` with `query`
    pub fn get(script_path: &str, query: &str) -> Self {
        let request_uri = if query.is_empty() {
            script_path.to_string()
        } else {
            format!("{}?{}", script_path, query)
        };

        let params = [
            ("GATEWAY_INTERFACE", "FastCGI/1.0"),
            ("REQUEST_METHOD", "GET"),
            ("SCRIPT_FILENAME", script_path),
            ("SCRIPT_NAME", script_path),
            ("DOCUMENT_URI", script_path),
            ("QUERY_STRING", query),
            ("REQUEST_URI", request_uri.as_str()),
            ("SERVER_SOFTWARE", concat!("status-agent/", env!("CARGO_PKG_VERSION"))),
            ("SERVER_PROTOCOL", "HTTP/1.1"),
            ("SERVER_NAME", "localhost"),
            ("SERVER_ADDR", "127.0.0.1"),
            ("SERVER_PORT", "80"),
            ("REMOTE_ADDR", "127.0.0.1"),
            ("REMOTE_PORT", "9985"),
            ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
            ("CONTENT_LENGTH", "0"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self { params }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Encode the full request: BEGIN_REQUEST, PARAMS, empty STDIN
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        write_stream(
            &mut buf,
            RecordType::BeginRequest,
            REQUEST_ID,
            &protocol::begin_request_body(ROLE_RESPONDER),
        );

        let params = encode_params(self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        write_stream(&mut buf, RecordType::Params, REQUEST_ID, &params);
        write_stream(&mut buf, RecordType::Params, REQUEST_ID, &[]);
        write_stream(&mut buf, RecordType::Stdin, REQUEST_ID, &[]);
        buf
    }
}

/// CGI response from the responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastCgiResponse {
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub stderr: String,
    pub app_status: u32,
}

impl FastCgiResponse {
    /// Split raw STDOUT into CGI headers and body
    pub fn from_parts(stdout: &[u8], stderr: &[u8], app_status: u32) -> Self {
        let text = String::from_utf8_lossy(stdout);
        let (head, body) = match text.find("\r\n\r\n") {
            Some(idx) => (&text[..idx], &text[idx + 4..]),
            None => match text.find("\n\n") {
                Some(idx) => (&text[..idx], &text[idx + 2..]),
                None => ("", &text[..]),
            },
        };

        let headers = head
            .lines()
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Self {
            headers,
            body: body.to_string(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
            app_status,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// HTTP status from the `Status:` header; 200 when absent
    pub fn status_code(&self) -> u16 {
        self.header("Status")
            .and_then(|s| s.split_whitespace().next())
            .and_then(|code| code.parse().ok())
            .unwrap_or(200)
    }
}

/// Run one request over an already connected stream
pub async fn exchange<S>(
    stream: &mut S,
    request: &FastCgiRequest,
) -> Result<FastCgiResponse, FastCgiError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&request.encode()).await?;
    stream.flush().await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        read_exact_or_eof(stream, &mut header_buf).await?;
        let header = RecordHeader::from_bytes(&header_buf)?;

        let mut body = vec![0u8; header.body_len()];
        read_exact_or_eof(stream, &mut body).await?;
        let content = &body[..header.content_len as usize];

        if header.request_id != REQUEST_ID {
            continue;
        }

        match header.record_type {
            RecordType::Stdout => stdout.extend_from_slice(content),
            RecordType::Stderr => stderr.extend_from_slice(content),
            RecordType::EndRequest => {
                let end = EndRequest::from_bytes(content)?;
                if end.protocol_status != EndRequest::REQUEST_COMPLETE {
                    return Err(FastCgiError::Rejected(end.protocol_status));
                }
                return Ok(FastCgiResponse::from_parts(&stdout, &stderr, end.app_status));
            }
            _ => {}
        }

        if stdout.len() + stderr.len() > MAX_RESPONSE_LEN {
            return Err(FastCgiError::ResponseTooLarge(MAX_RESPONSE_LEN));
        }
    }
}

async fn read_exact_or_eof<S>(stream: &mut S, buf: &mut [u8]) -> Result<(), FastCgiError>
where
    S: AsyncRead + Unpin,
{
    match stream.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(FastCgiError::UnexpectedEof)
        }
        Err(e) => Err(e.into()),
    }
}

/// Connect to `endpoint`, run one request and close the connection
pub async fn send(
    endpoint: &Endpoint,
    request: &FastCgiRequest,
) -> Result<FastCgiResponse, FastCgiError> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let mut stream = tokio::net::TcpStream::connect((host.as_str(), *port)).await?;
            let response = exchange(&mut stream, request).await;
            drop(stream);
            response
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let mut stream = tokio::net::UnixStream::connect(path).await?;
            let response = exchange(&mut stream, request).await;
            drop(stream);
            response
        }
        #[cfg(not(unix))]
        Endpoint::Unix(path) => Err(FastCgiError::InvalidAddress(format!(
            "unix://{}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parse_unix() {
        assert_eq!(
            Endpoint::parse("unix:///run/php/php-fpm.sock").unwrap(),
            Endpoint::Unix(PathBuf::from("/run/php/php-fpm.sock"))
        );
    }

    #[test]
    fn test_endpoint_parse_tcp() {
        assert_eq!(
            Endpoint::parse("tcp://10.0.0.5:9001").unwrap(),
            Endpoint::Tcp {
                host: "10.0.0.5".to_string(),
                port: 9001
            }
        );
        assert_eq!(
            Endpoint::parse("127.0.0.1:9000").unwrap(),
            Endpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port: 9000
            }
        );
        assert_eq!(
            Endpoint::parse("php-fpm").unwrap(),
            Endpoint::Tcp {
                host: "php-fpm".to_string(),
                port: DEFAULT_PORT
            }
        );
    }

    #[test]
    fn test_endpoint_parse_invalid() {
        assert!(Endpoint::parse("unix://").is_err());
        assert!(Endpoint::parse("http://localhost:9000").is_err());
        assert!(Endpoint::parse("").is_err());
    }

    #[test]
    fn test_endpoint_display() {
        let endpoint = Endpoint::parse("localhost:9000").unwrap();
        assert_eq!(endpoint.to_string(), "tcp://localhost:9000");
    }

    #[test]
    fn test_request_params() {
        let request = FastCgiRequest::get("/status", "json&full");
        assert_eq!(request.param("SCRIPT_NAME"), Some("/status"));
        assert_eq!(request.param("SCRIPT_FILENAME"), Some("/status"));
        assert_eq!(request.param("QUERY_STRING"), Some("json&full"));
        assert_eq!(request.param("REQUEST_URI"), Some("/status?json&full"));
        assert_eq!(request.param("REQUEST_METHOD"), Some("GET"));
    }

    #[test]
    fn test_request_encoding_starts_with_begin_request() {
        let encoded = FastCgiRequest::get("/status", "json").encode();
        let header = RecordHeader::from_bytes(encoded[..HEADER_LEN].try_into().unwrap()).unwrap();
        assert_eq!(header.record_type, RecordType::BeginRequest);
        assert_eq!(header.content_len, 8);
        // role RESPONDER, no keep-alive
        assert_eq!(&encoded[HEADER_LEN..HEADER_LEN + 3], &[0, 1, 0]);
        // ends with an empty STDIN record
        assert_eq!(&encoded[encoded.len() - HEADER_LEN..], &[1, 5, 0, 1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_response_split_headers() {
        let response = FastCgiResponse::from_parts(
            b"Content-type: application/json\r\nStatus: 404 Not Found\r\n\r\nFile not found.",
            b"",
            0,
        );
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.body, "File not found.");
    }

    #[test]
    fn test_response_without_status_is_ok() {
        let response = FastCgiResponse::from_parts(b"Content-type: text/plain\n\n{}", b"", 0);
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.body, "{}");
    }

    #[tokio::test]
    async fn test_exchange_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);

        let server_task = tokio::spawn(async move {
            // Drain the request until the empty STDIN record
            loop {
                let mut header = [0u8; HEADER_LEN];
                server.read_exact(&mut header).await.unwrap();
                let header = RecordHeader::from_bytes(&header).unwrap();
                let mut body = vec![0u8; header.body_len()];
                server.read_exact(&mut body).await.unwrap();
                if header.record_type == RecordType::Stdin && header.content_len == 0 {
                    break;
                }
            }

            let mut reply = Vec::new();
            write_stream(
                &mut reply,
                RecordType::Stdout,
                1,
                b"Content-type: application/json\r\n\r\n{\"ok\":1}",
            );
            write_stream(&mut reply, RecordType::Stderr, 1, b"warn");
            let end = EndRequest {
                app_status: 0,
                protocol_status: 0,
            };
            write_stream(&mut reply, RecordType::EndRequest, 1, &end.to_bytes());
            server.write_all(&reply).await.unwrap();
        });

        let response = exchange(&mut client, &FastCgiRequest::get("/status", "json"))
            .await
            .unwrap();
        server_task.await.unwrap();

        assert_eq!(response.body, "{\"ok\":1}");
        assert_eq!(response.stderr, "warn");
        assert_eq!(response.app_status, 0);
    }

    #[tokio::test]
    async fn test_exchange_eof_before_end() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        drop(server);

        let result = exchange(&mut client, &FastCgiRequest::get("/status", "json")).await;
        assert!(result.is_err());
    }
}
