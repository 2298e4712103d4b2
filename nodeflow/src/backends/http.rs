//! HTTP model backend speaking a small JSON protocol.
//!
//! Requests are `POST {endpoint}` with `{model_id, messages, stream}`. A
//! synchronous reply is `{"content": "..."}`; a streamed reply is
//! newline-delimited JSON objects, each carrying a `content` chunk or an
//! `error` message.

use super::{ChatMessage, ModelBackend, TextStream};
use crate::errors::BackendError;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    model_id: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ReplyLine {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Model backend reached over HTTP.
///
/// `timeout` bounds a whole synchronous call. Streams are bounded by the
/// connect timeout and by the gap between two reads, so a long reply that
/// keeps producing chunks is not cut off.
#[derive(Debug, Clone)]
pub struct HttpModelBackend {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpModelBackend {
    /// Creates a backend posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(|e| BackendError::model(&endpoint, e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    async fn post(
        &self,
        model_id: &str,
        prompt: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let body = InvokeRequest {
            model_id,
            messages: prompt,
            stream,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if !stream {
            request = request.timeout(self.timeout);
        }
        request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| BackendError::model(model_id, e.to_string()))
    }
}

fn parse_line(model_id: &str, line: &str) -> Result<Option<String>, BackendError> {
    let reply: ReplyLine = serde_json::from_str(line)
        .map_err(|e| BackendError::model(model_id, format!("malformed reply line: {e}")))?;
    match reply.error {
        Some(message) => Err(BackendError::model(model_id, message)),
        None => Ok(reply.content),
    }
}

struct LineReader {
    model_id: String,
    body: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    buffer: Vec<u8>,
    finished: bool,
}

impl LineReader {
    async fn next_chunk(mut self) -> Result<Option<(String, Self)>, BackendError> {
        loop {
            let line = if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                Some(self.buffer.drain(..=pos).collect::<Vec<u8>>())
            } else if self.finished {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                Some(std::mem::take(&mut self.buffer))
            } else {
                None
            };

            if let Some(line) = line {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                if let Some(content) = parse_line(&self.model_id, text)? {
                    return Ok(Some((content, self)));
                }
                continue;
            }

            match self.body.next().await {
                Some(Ok(bytes)) => self.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => return Err(BackendError::model(&self.model_id, e.to_string())),
                None => self.finished = true,
            }
        }
    }
}

#[async_trait]
impl ModelBackend for HttpModelBackend {
    async fn invoke(&self, model_id: &str, prompt: &[ChatMessage]) -> Result<String, BackendError> {
        let response = self.post(model_id, prompt, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::model(model_id, e.to_string()))?;
        parse_line(model_id, text.trim())?
            .ok_or_else(|| BackendError::model(model_id, "reply has no content"))
    }

    async fn stream(&self, model_id: &str, prompt: &[ChatMessage]) -> Result<TextStream, BackendError> {
        let response = self.post(model_id, prompt, true).await?;
        let reader = LineReader {
            model_id: model_id.to_string(),
            body: response.bytes_stream().map_ok(|b| b.to_vec()).boxed(),
            buffer: Vec::new(),
            finished: false,
        };
        Ok(stream::try_unfold(reader, LineReader::next_chunk).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_line_content() {
        assert_eq!(
            parse_line("m", r#"{"content": "hi"}"#).unwrap(),
            Some("hi".to_string())
        );
        assert_eq!(parse_line("m", r#"{"done": true}"#).unwrap(), None);
    }

    #[test]
    fn test_parse_line_error() {
        let err = parse_line("m", r#"{"error": "overloaded"}"#).unwrap_err();
        assert!(err.to_string().contains("overloaded"));
        assert!(parse_line("m", "not json").is_err());
    }

    /// Serves one HTTP response: `lines` sent as chunks, `gap` apart.
    async fn serve_lines(lines: Vec<&'static str>, gap: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            for line in lines {
                tokio::time::sleep(gap).await;
                let chunk = format!("{:x}\r\n{line}\n\r\n", line.len() + 1);
                if socket.write_all(chunk.as_bytes()).await.is_err() {
                    return;
                }
            }
            let _ = socket.write_all(b"0\r\n\r\n").await;
        });
        format!("http://{addr}/v1/chat")
    }

    #[tokio::test]
    async fn test_stream_outlives_timeout_while_chunks_arrive() {
        let lines = vec![
            r#"{"content": "a"}"#,
            r#"{"content": "b"}"#,
            r#"{"content": "c"}"#,
            r#"{"content": "d"}"#,
        ];
        let endpoint = serve_lines(lines, Duration::from_millis(150)).await;
        let backend = HttpModelBackend::new(endpoint, Duration::from_millis(400)).unwrap();

        let prompt = [ChatMessage::new("user", "hi")];
        let chunks: Vec<String> = backend
            .stream("m", &prompt)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), "abcd");
    }

    #[tokio::test]
    async fn test_invoke_is_bounded_by_timeout() {
        let endpoint = serve_lines(vec![r#"{"content": "late"}"#], Duration::from_millis(500)).await;
        let backend = HttpModelBackend::new(endpoint, Duration::from_millis(100)).unwrap();

        let err = backend
            .invoke("m", &[ChatMessage::new("user", "hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Model { .. }));
    }

    #[tokio::test]
    async fn test_line_reader_splits_across_packets() {
        let packets: Vec<Result<Vec<u8>, reqwest::Error>> = vec![
            Ok(b"{\"content\": \"a\"}\n{\"cont".to_vec()),
            Ok(b"ent\": \"b\"}\n\n{\"content\": \"c\"}".to_vec()),
        ];
        let reader = LineReader {
            model_id: "m".into(),
            body: stream::iter(packets).boxed(),
            buffer: Vec::new(),
            finished: false,
        };

        let chunks: Vec<String> = stream::try_unfold(reader, LineReader::next_chunk)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }
}
