use crate::api::OctoPrintApi;
use crate::error::ClientError;
use bb_core::plugin_api::{
    decode_socket_frame, encode_frame, AuthFrame, PluginMessage, SocketFrame,
    DEFAULT_MAX_FRAME_BYTES,
};
use bb_core::ActivationReason;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

pub const SOCKET_PATH: &str = "sockjs/websocket";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Connected,
    Disconnected,
    Plugin(PluginMessage),
    Activation(ActivationReason),
    ReauthRequired,
}

pub fn socket_url(base: &Url) -> Result<Url, ClientError> {
    let mut url = base.join(SOCKET_PATH)?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(url),
        other => return Err(ClientError::Scheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Scheme(scheme.to_string()))?;
    Ok(url)
}

fn frame_event(frame: SocketFrame) -> Option<PushEvent> {
    match frame {
        SocketFrame::Connected(_) => Some(PushEvent::Connected),
        SocketFrame::Plugin(message) => Some(PushEvent::Plugin(message)),
        SocketFrame::Event(event) => event.activation_reason().map(PushEvent::Activation),
        SocketFrame::ReauthRequired(_) => Some(PushEvent::ReauthRequired),
        SocketFrame::Other(_) => None,
    }
}

async fn authenticate(api: &OctoPrintApi, ws: &mut Socket) -> Result<(), ClientError> {
    if api.config().api_key.is_none() {
        return Ok(());
    }
    let login = api.passive_login().await?;
    let session = login
        .session
        .as_deref()
        .ok_or_else(|| ClientError::Login("missing session".to_string()))?;
    let frame = encode_frame(&AuthFrame::new(&login.name, session), DEFAULT_MAX_FRAME_BYTES)?;
    ws.send(Message::Text(frame)).await?;
    debug!("push_auth_sent: user={}", login.name);
    Ok(())
}

/// Keeps the push socket open for as long as `tx` has a receiver, forwarding
/// frames in delivery order and reconnecting with backoff.
pub async fn push_loop(api: OctoPrintApi, tx: mpsc::Sender<PushEvent>) {
    let url = match socket_url(&api.config().base_url) {
        Ok(url) => url,
        Err(err) => {
            warn!("push_socket_url_error: {err}");
            return;
        }
    };
    let mut backoff = Duration::from_secs(1);

    loop {
        if tx.is_closed() {
            return;
        }
        let (mut ws, _) = match connect_async(url.as_str()).await {
            Ok(value) => value,
            Err(err) => {
                warn!("push_connect_error: {err}");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        info!("push_connected: {url}");

        if let Err(err) = authenticate(&api, &mut ws).await {
            warn!("push_auth_error: {err}");
            let _ = ws.close(None).await;
            tokio::time::sleep(backoff).await;
            backoff = next_backoff(backoff);
            continue;
        }

        while let Some(msg) = ws.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(err) => {
                    warn!("push_read_error: {err}");
                    break;
                }
            };
            let frame = match decode_socket_frame(&text, DEFAULT_MAX_FRAME_BYTES) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("push_decode_error: {err}");
                    continue;
                }
            };
            let Some(event) = frame_event(frame) else {
                continue;
            };
            let reauth = event == PushEvent::ReauthRequired;
            if tx.send(event).await.is_err() {
                let _ = ws.close(None).await;
                return;
            }
            if reauth {
                info!("push_reauth_required");
                break;
            }
        }

        let _ = ws.close(None).await;
        if tx.send(PushEvent::Disconnected).await.is_err() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff);
    }
}

fn next_backoff(current: Duration) -> Duration {
    let next = current + current;
    if next > Duration::from_secs(10) {
        Duration::from_secs(10)
    } else {
        next
    }
}
