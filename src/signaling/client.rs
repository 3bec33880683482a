//! Websocket signaling client.
//!
//! Flow:
//! 1. Connect to the signaling server
//! 2. Spawn a writer task fed by an unbounded channel of [`OutboundMessage`]s
//! 3. Read frames one at a time, decode them and hand them to the negotiator
//! 4. Stop on a transport error or when the server closes the connection

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::SignalingError;
use crate::peer::Negotiator;

use super::message::{InboundMessage, OutboundMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connected signaling channel.
pub struct SignalingChannel {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    inbound: SplitStream<WsStream>,
    writer: JoinHandle<()>,
}

impl SignalingChannel {
    /// Connect to the signaling server at `url`.
    pub async fn connect(url: &Url) -> Result<Self, SignalingError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::Connect(e.to_string()))?;

        info!("Connected to signaling server: {}", url);

        let (mut ws_sender, inbound) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let text = match msg.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("{}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    error!("Error writing websocket message: {}", e);
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        Ok(Self {
            outbound: tx,
            inbound,
            writer,
        })
    }

    /// Sender for frames going to the remote peer.
    pub fn outbound(&self) -> mpsc::UnboundedSender<OutboundMessage> {
        self.outbound.clone()
    }

    /// Runs the receive loop until the channel closes or fails, then shuts
    /// the writer down.
    /// A write failure ends the loop as well.
    pub async fn run(self, negotiator: &Negotiator) -> Result<(), SignalingError> {
        let Self {
            outbound: _outbound,
            inbound,
            mut writer,
        } = self;
        let result = tokio::select! {
            result = run_receive_loop(inbound, negotiator) => result,
            _ = &mut writer => Err(SignalingError::Transport("websocket writer stopped".to_string())),
        };
        writer.abort();
        result
    }
}

/// Reads frames strictly in order and dispatches each one before reading the
/// next. Malformed frames are logged and dropped.
pub async fn run_receive_loop<S>(mut inbound: S, negotiator: &Negotiator) -> Result<(), SignalingError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = inbound.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Dropping non UTF-8 binary signaling frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("Signaling connection closed: {:?}", frame);
                return Ok(());
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Websocket read error: {}", e);
                return Err(SignalingError::Transport(e.to_string()));
            }
        };

        debug!("Received signaling message: {}", text);
        match InboundMessage::decode(&text) {
            Ok(message) => negotiator.dispatch(message).await,
            Err(e) => warn!("{}", e),
        }
    }

    info!("Signaling stream ended");
    Ok(())
}
