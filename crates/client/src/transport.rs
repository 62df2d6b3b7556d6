//! `reqwest`-backed [`ChunkedTransport`].

use std::time::Duration;

use driveport_protocol::{Headers, HttpRequest, HttpResponse, Method};
use driveport_transfer::{ChunkedTransport, TransportError, TransportFuture};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::error::ClientError;

/// Sends requests with a Bearer token attached.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a transport that authenticates every request with `access_token`.
    ///
    /// A zero `timeout` disables the per-request timeout.
    pub fn new(access_token: &str, timeout: Duration) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|_| ClientError::InvalidToken)?,
        );

        // 308 is "resume incomplete" on upload URIs, not a redirect.
        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none());
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
        })
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(connection_error)?;
        let status = resp.status().as_u16();
        let headers: Headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await.map_err(connection_error)?.to_vec();

        tracing::trace!(status, len = body.len(), "response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl ChunkedTransport for ReqwestTransport {
    fn request(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(self.send(request))
    }
}

fn connection_error(err: reqwest::Error) -> TransportError {
    TransportError::Connection(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use driveport_protocol::constants::header;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Starts a one-shot HTTP server that answers with `response` and hands
    /// back the raw request it received.
    async fn mock_server(
        response: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");

        let handle = tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return String::new();
            };
            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).await.unwrap_or(0);
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn resume_incomplete_is_not_followed() {
        let (url, handle) = mock_server(
            "HTTP/1.1 308 Resume Incomplete\r\nRange: bytes=0-262143\r\nX-Range-MD5: abc\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
        )
        .await;

        let transport = ReqwestTransport::new("token-1", Duration::from_secs(5)).unwrap();
        let resp = transport
            .request(
                HttpRequest::put(format!("{url}/upload?upload_id=x"))
                    .header(header::CONTENT_RANGE, "bytes */1000")
                    .header(header::CONTENT_LENGTH, "0")
                    .body(Vec::new()),
            )
            .await
            .unwrap();

        assert_eq!(resp.status, 308);
        assert_eq!(resp.header("range"), Some("bytes=0-262143"));
        assert_eq!(resp.header(header::X_RANGE_MD5), Some("abc"));

        let raw = handle.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("put /upload?upload_id=x"));
        assert!(raw.contains("authorization: bearer token-1"));
        assert!(raw.contains("content-range: bytes */1000"));
    }

    #[tokio::test]
    async fn returns_body_and_status() {
        let body = r#"{"id":"f1","name":"a.txt"}"#;
        let (url, handle) = mock_server(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await;

        let transport = ReqwestTransport::new("t", Duration::ZERO).unwrap();
        let resp = transport
            .request(HttpRequest::get(format!("{url}/files/f1")))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body_text(), body);
        assert_eq!(resp.content_length(), Some(body.len() as u64));

        handle.abort();
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ReqwestTransport::new("t", Duration::from_secs(5)).unwrap();
        let err = transport
            .request(HttpRequest::get(format!("http://127.0.0.1:{port}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[test]
    fn rejects_unprintable_token() {
        assert!(matches!(
            ReqwestTransport::new("bad\ntoken", Duration::ZERO),
            Err(ClientError::InvalidToken)
        ));
    }
}
