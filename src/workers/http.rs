//! The HTTP worker.
//!
//! Wraps a single blocking [`reqwest::blocking::Client`] behind the
//! request/response loop. Conditional `GET`s use whatever ETag/
//! Last-Modified the orchestrator already has on file for the URI, so
//! an unchanged resource never crosses the wire as a full body.

use std::io::{self, Read, Write};
use std::time::Duration;
use log::warn;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use crate::ipc::framed::{read_buf, read_u8, write_buf, write_u32, write_u8};

/// One fetch outcome: whether the body changed, and if so, its bytes
/// plus whatever validators the server returned.
pub struct FetchResult {
    pub not_modified: bool,
    pub body: Vec<u8>,
    pub etag: Option<String>,
}

pub fn build_client(user_agent: &str, timeout: Option<Duration>) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().user_agent(user_agent).gzip(true);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

/// Runs the HTTP worker's request/response loop until its ingress
/// stream returns EOF. Each request is `uri || has_etag || [etag]`; the
/// response is `status(1) || not_modified(1) || etag-opt || body`.
pub fn run<S: Read + Write>(mut stream: S, client: &Client) -> io::Result<()> {
    loop {
        let uri = match read_buf(&mut stream) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(uri) => uri,
                Err(_) => { write_u8(&mut stream, 0)?; continue; }
            },
            Err(err) => {
                let err: io::Error = err.into();
                if err.kind() == io::ErrorKind::UnexpectedEof {
                    return Ok(());
                }
                return Err(err);
            }
        };
        let has_etag = read_u8(&mut stream)? != 0;
        let etag = if has_etag { Some(String::from_utf8(read_buf(&mut stream)?).unwrap_or_default()) } else { None };

        match fetch(client, &uri, etag.as_deref()) {
            Ok(result) => {
                write_u8(&mut stream, 1)?;
                write_u8(&mut stream, result.not_modified as u8)?;
                match &result.etag {
                    Some(tag) => { write_u8(&mut stream, 1)?; write_buf(&mut stream, tag.as_bytes()).map_err(io::Error::from)?; }
                    None => write_u8(&mut stream, 0)?,
                }
                write_u32(&mut stream, result.body.len() as u32).map_err(io::Error::from)?;
                stream.write_all(&result.body)?;
            }
            Err(()) => write_u8(&mut stream, 0)?,
        }
    }
}

fn fetch(client: &Client, uri: &str, etag: Option<&str>) -> Result<FetchResult, ()> {
    let mut req = client.get(uri);
    if let Some(etag) = etag {
        req = req.header(reqwest::header::IF_NONE_MATCH, etag);
    }
    let response = req.send().map_err(|err| {
        warn!("http: {}: {}", uri, err);
    })?;

    if response.status() == StatusCode::NOT_MODIFIED {
        return Ok(FetchResult { not_modified: true, body: Vec::new(), etag: etag.map(String::from) });
    }
    if response.status() != StatusCode::OK {
        warn!("http: {}: unexpected status {}", uri, response.status());
        return Err(());
    }

    let etag = response.headers().get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = response.bytes().map_err(|err| warn!("http: {}: {}", uri, err))?;
    Ok(FetchResult { not_modified: false, body: body.to_vec(), etag })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    /// Accepts exactly one connection, discards its request, and writes
    /// back a canned raw HTTP response.
    fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            loop {
                line.clear();
                if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                    break;
                }
            }
            let mut stream = stream;
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn fetch_reads_body_and_etag() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nETag: \"abc\"\r\nContent-Length: 5\r\n\r\nhello",
        );
        let client = build_client("test-agent", None).unwrap();
        let result = fetch(&client, &url, None).unwrap();
        assert!(!result.not_modified);
        assert_eq!(result.body, b"hello");
        assert_eq!(result.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn fetch_treats_304_as_not_modified() {
        let url = serve_once("HTTP/1.1 304 Not Modified\r\nContent-Length: 0\r\n\r\n");
        let client = build_client("test-agent", None).unwrap();
        let result = fetch(&client, &url, Some("\"abc\"")).unwrap();
        assert!(result.not_modified);
        assert_eq!(result.etag.as_deref(), Some("\"abc\""));
    }

    #[test]
    fn fetch_treats_server_error_as_failure() {
        let url = serve_once("HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\n\r\n");
        let client = build_client("test-agent", None).unwrap();
        assert!(fetch(&client, &url, None).is_err());
    }
}
