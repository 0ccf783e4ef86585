use crate::error::SignalingError;
use crate::transport::SignalingTransport;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use peercall_protocol::SignalingMessage;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Meaning of a single inbound WebSocket frame.
#[derive(Debug, PartialEq)]
enum Frame {
    Message(SignalingMessage),
    /// Ping/Pong and other frames without signaling payload. tungstenite answers pings itself.
    Control,
    Closed(Option<CloseFrame>),
}

fn decode_frame(frame: tungstenite::Message) -> Result<Frame, SignalingError> {
    let text = match frame {
        tungstenite::Message::Text(text) => text,
        tungstenite::Message::Binary(data) => {
            // Some relays forward text payloads as binary frames.
            tungstenite::Utf8Bytes::try_from(data).map_err(|err| {
                SignalingError::Transport(
                    anyhow::anyhow!(err).context("Binary frame is not valid UTF-8"),
                )
            })?
        }
        tungstenite::Message::Close(close_frame) => return Ok(Frame::Closed(close_frame)),
        tungstenite::Message::Ping(_)
        | tungstenite::Message::Pong(_)
        | tungstenite::Message::Frame(_) => return Ok(Frame::Control),
    };

    SignalingMessage::deserialize(&text)
        .map(Frame::Message)
        .map_err(SignalingError::SerializationError)
}

fn encode_message(msg: &SignalingMessage) -> Result<tungstenite::Message, SignalingError> {
    let serialized = SignalingMessage::serialize(msg)?;
    Ok(tungstenite::Message::text(serialized))
}

/// WebSocket transport carrying one JSON encoded [`SignalingMessage`] per text frame.
///
/// Sending and receiving both borrow the transport mutably, so the socket is used unsplit.
#[derive(Debug)]
pub struct TokioTransport {
    websocket: WebSocket,
}

impl TokioTransport {
    /// Connects to `url`, giving up after [`CONNECT_TIMEOUT`].
    #[tracing::instrument(level = "info")]
    pub async fn connect(url: &str) -> Result<Self, SignalingError> {
        Self::connect_with_timeout(url, CONNECT_TIMEOUT).await
    }

    #[tracing::instrument(level = "info")]
    pub async fn connect_with_timeout(
        url: &str,
        timeout: Duration,
    ) -> Result<Self, SignalingError> {
        tracing::info!("Connecting to signaling server");
        let (websocket, response) =
            match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(err)) => {
                    tracing::error!(?err, "Failed to connect to signaling server");
                    return Err(SignalingError::ConnectionError(Box::new(err)));
                }
                Err(_) => {
                    tracing::error!("Timed out connecting to signaling server");
                    return Err(SignalingError::ConnectTimeout(timeout));
                }
            };
        tracing::debug!(status = %response.status(), "WebSocket handshake completed");

        Ok(Self { websocket })
    }
}

#[async_trait]
impl SignalingTransport for TokioTransport {
    #[tracing::instrument(level = "debug", skip(self, msg), fields(event = msg.event()))]
    async fn send(&mut self, msg: SignalingMessage) -> Result<(), SignalingError> {
        let frame = encode_message(&msg).inspect_err(|err| {
            tracing::warn!(?err, "Failed to serialize message");
        })?;

        tracing::debug!("Sending message");
        self.websocket.send(frame).await.map_err(|err| {
            tracing::warn!(?err, "Failed to send message");
            SignalingError::Transport(anyhow::anyhow!(err).context("Failed to send message"))
        })
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn recv(&mut self) -> Result<SignalingMessage, SignalingError> {
        loop {
            let Some(frame) = self.websocket.next().await else {
                tracing::warn!("WebSocket stream closed");
                return Err(SignalingError::Disconnected);
            };
            let frame = frame.map_err(|err| {
                tracing::warn!(?err, "Failed to receive frame");
                SignalingError::Transport(anyhow::anyhow!(err).context("Failed to receive frame"))
            })?;

            match decode_frame(frame) {
                Ok(Frame::Message(msg)) => {
                    tracing::debug!(event = msg.event(), "Received message");
                    return Ok(msg);
                }
                Ok(Frame::Control) => tracing::trace!("Skipping control frame"),
                Ok(Frame::Closed(close_frame)) => {
                    tracing::warn!(?close_frame, "Signaling server closed the connection");
                    return Err(SignalingError::Disconnected);
                }
                Err(err) => {
                    tracing::warn!(?err, "Failed to decode frame");
                    return Err(err);
                }
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn close(&mut self) -> Result<(), SignalingError> {
        let close_frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "call ended".into(),
        };
        match self.websocket.close(Some(close_frame)).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(err) => {
                tracing::warn!(?err, "Failed to close WebSocket connection");
                Err(SignalingError::Transport(
                    anyhow::anyhow!(err).context("Failed to close WebSocket connection"),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peercall_protocol::{IceCandidate, SessionDescription};
    use pretty_assertions::{assert_eq, assert_matches};

    #[test]
    fn text_frame_is_decoded() {
        let frame = encode_message(&SignalingMessage::Offer(SessionDescription::offer("v=0")))
            .unwrap();
        assert_matches!(&frame, tungstenite::Message::Text(_));

        assert_eq!(
            decode_frame(frame).unwrap(),
            Frame::Message(SignalingMessage::Offer(SessionDescription::offer("v=0")))
        );
    }

    #[test]
    fn binary_frame_with_json_is_decoded() {
        let json = r#"{"event":"ice-candidate","data":{"candidate":"candidate:1"}}"#;
        let frame = tungstenite::Message::binary(json.as_bytes().to_vec());

        assert_eq!(
            decode_frame(frame).unwrap(),
            Frame::Message(SignalingMessage::IceCandidate(IceCandidate::new(
                "candidate:1"
            )))
        );
    }

    #[test]
    fn binary_frame_with_invalid_utf8_is_rejected() {
        let frame = tungstenite::Message::binary(vec![0xff, 0xfe]);
        assert_matches!(decode_frame(frame), Err(SignalingError::Transport(_)));
    }

    #[test]
    fn control_frames_are_skipped() {
        for frame in [
            tungstenite::Message::Ping(tungstenite::Bytes::from_static(b"ping")),
            tungstenite::Message::Pong(tungstenite::Bytes::from_static(b"pong")),
        ] {
            assert_eq!(decode_frame(frame).unwrap(), Frame::Control);
        }
    }

    #[test]
    fn close_frame_ends_the_stream() {
        let close_frame = CloseFrame {
            code: CloseCode::Away,
            reason: "restart".into(),
        };
        assert_eq!(
            decode_frame(tungstenite::Message::Close(Some(close_frame.clone()))).unwrap(),
            Frame::Closed(Some(close_frame))
        );
    }

    #[test]
    fn unknown_event_is_a_serialization_error() {
        let frame = tungstenite::Message::text(r#"{"event":"hangup","data":null}"#);
        assert_matches!(
            decode_frame(frame),
            Err(SignalingError::SerializationError(_))
        );
    }
}
