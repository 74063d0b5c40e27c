//! HTTP push transport
//!
//! Opens the server's event stream with a long-lived GET and frames the body
//! with [`LineDecoder`].

use crate::config::SyncConfig;
use crate::sync::{LineDecoder, MessageStream, PushTransport};
use crate::{PinSyncError, Result};
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use std::time::Duration;

/// Connect timeout for the stream; the body itself is unbounded
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Push transport over a streaming HTTP response
#[derive(Debug, Clone)]
pub struct StreamTransport {
    url: String,
    client: reqwest::Client,
}

impl StreamTransport {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        // No overall timeout: it would cut the stream off
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            url: config.stream_url(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushTransport for StreamTransport {
    fn endpoint(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<MessageStream> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PinSyncError::HttpStatus {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        Ok(frame_messages(response.bytes_stream().boxed()))
    }
}

/// Frame a body stream into messages, flushing the decoder when it ends
fn frame_messages<S, B, E>(body: S) -> MessageStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<PinSyncError> + Send + 'static,
{
    stream::unfold(Some((body, LineDecoder::new())), |state| async move {
        let (mut body, mut decoder) = state?;
        match body.next().await {
            Some(Ok(chunk)) => {
                let framed: Vec<Result<String>> =
                    decoder.push(chunk.as_ref()).into_iter().map(Ok).collect();
                Some((framed, Some((body, decoder))))
            }
            Some(Err(e)) => Some((vec![Err(e.into())], Some((body, decoder)))),
            None => Some((decoder.finish().into_iter().map(Ok).collect(), None)),
        }
    })
    .flat_map(stream::iter)
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trailing_message_without_newline_is_kept() {
        let chunks: Vec<std::result::Result<Vec<u8>, PinSyncError>> = vec![
            Ok(b"data: {\"type\":\"activity_update\",\"message\":\"one\"}\n\n".to_vec()),
            Ok(b"data: {\"type\":\"activity_update\",".to_vec()),
            Ok(b"\"message\":\"two\"}".to_vec()),
        ];
        let messages: Vec<String> = frame_messages(stream::iter(chunks))
            .map(|m| m.unwrap())
            .collect()
            .await;
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("two"));
    }

    #[tokio::test]
    async fn test_body_error_is_forwarded() {
        let chunks: Vec<std::result::Result<Vec<u8>, PinSyncError>> = vec![
            Ok(b"data: a\n\n".to_vec()),
            Err(PinSyncError::Network("reset".to_string())),
        ];
        let items: Vec<Result<String>> = frame_messages(stream::iter(chunks)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "a");
        assert!(matches!(items[1], Err(PinSyncError::Network(_))));
    }

    #[test]
    fn test_stream_url_from_config() {
        let transport = StreamTransport::new(&SyncConfig::new("http://maps.local:5002/")).unwrap();
        assert_eq!(transport.url(), "http://maps.local:5002/stream");
    }
}
