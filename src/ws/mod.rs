//! Realtime endpoint. Clients connect to `/v1/ws`, authenticate with an
//! access token, and get pushed a warning before that token expires so they
//! can rotate their refresh token without dropping the connection.

pub mod session;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::WebSocketUpgrade;
use axum::response::IntoResponse;
use axum::Extension;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, info, warn};
use ulid::Ulid;
use uuid::Uuid;

use crate::auth::service::AuthService;
use crate::auth::tokens::TokenDecodeError;
use session::{SessionEvent, SessionTracker};

pub struct WsState {
    pub auth: AuthService,
    pub tracker: Arc<SessionTracker>,
}

/// Inbound client frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Inbound {
    Authenticate { token: String },
    RefreshToken { refresh_token: String },
    Ping,
}

/// Outbound server frames.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Outbound {
    Authenticated {
        user_id: Uuid,
        expires_in_secs: i64,
    },
    Unauthorized {
        message: String,
    },
    TokensRefreshed {
        access_token: String,
        refresh_token: String,
        expires_in: u64,
    },
    TokenExpiring {
        expires_in_secs: i64,
    },
    SessionExpired,
    Pong,
}

impl From<SessionEvent> for Outbound {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::TokenExpiring { expires_in_secs } => {
                Self::TokenExpiring { expires_in_secs }
            }
            SessionEvent::SessionExpired => Self::SessionExpired,
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(state): Extension<Arc<WsState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<WsState>) {
    let connection_id = Ulid::new().to_string();
    info!(connection_id, "websocket client connected");

    let (events_tx, mut events_rx) = unbounded_channel::<SessionEvent>();

    loop {
        tokio::select! {
            frame = socket.recv() => {
                let Some(Ok(frame)) = frame else { break };
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    // Binary, ping and pong are handled by the transport.
                    _ => continue,
                };
                let inbound: Inbound = match serde_json::from_str(&text) {
                    Ok(inbound) => inbound,
                    Err(err) => {
                        let reply = Outbound::Unauthorized {
                            message: format!("unrecognized frame: {err}"),
                        };
                        if send(&mut socket, &reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                state.tracker.touch(&connection_id).await;
                let was_authenticate = matches!(inbound, Inbound::Authenticate { .. });
                let reply = handle_frame(&state, &connection_id, &events_tx, inbound).await;
                let rejected = matches!(reply, Outbound::Unauthorized { .. });
                if send(&mut socket, &reply).await.is_err() {
                    break;
                }
                // A failed authentication on a never-authenticated connection
                // closes the socket instead of leaving it to retry forever.
                if was_authenticate
                    && rejected
                    && !state.tracker.is_authenticated(&connection_id).await
                {
                    break;
                }
            }
            event = events_rx.recv() => {
                // Sender lives in the tracker entry; it drops on disconnect,
                // after which this arm stays quiet.
                let Some(event) = event else { continue };
                if send(&mut socket, &Outbound::from(event)).await.is_err() {
                    break;
                }
            }
        }
    }

    state.tracker.disconnect(&connection_id).await;
    info!(connection_id, "websocket client disconnected");
}

async fn handle_frame(
    state: &WsState,
    connection_id: &str,
    events_tx: &tokio::sync::mpsc::UnboundedSender<SessionEvent>,
    inbound: Inbound,
) -> Outbound {
    match inbound {
        Inbound::Authenticate { token } => {
            match state.auth.token_issuer().decode(&token) {
                Ok(claims) => {
                    let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0)
                        .unwrap_or_else(chrono::Utc::now);
                    state
                        .tracker
                        .authenticate(
                            connection_id,
                            claims.sub,
                            claims.roles.clone(),
                            claims.profile_id,
                            expires_at,
                            events_tx.clone(),
                        )
                        .await;
                    let expires_in_secs = claims.exp - chrono::Utc::now().timestamp();
                    Outbound::Authenticated {
                        user_id: claims.sub,
                        expires_in_secs,
                    }
                }
                Err(TokenDecodeError::Expired) => Outbound::Unauthorized {
                    message: "Token has expired".to_string(),
                },
                Err(TokenDecodeError::Invalid) => Outbound::Unauthorized {
                    message: "Invalid token".to_string(),
                },
            }
        }
        Inbound::RefreshToken { refresh_token } => {
            // The subject check runs before the token is consumed; rotation
            // revokes the presented token, so a mismatched one must be left
            // untouched for its real owner.
            let bound = state.tracker.user(connection_id).await;
            let owner = match state.auth.refresh_token_owner(&refresh_token).await {
                Ok(owner) => owner,
                Err(err) => {
                    return Outbound::Unauthorized {
                        message: err.public_message(),
                    }
                }
            };
            if !refresh_subject_allowed(bound, owner) {
                warn!(connection_id, "refresh attempted with another user's token");
                return Outbound::Unauthorized {
                    message: "Invalid refresh token".to_string(),
                };
            }
            let session = match state.auth.refresh_token(&refresh_token, None).await {
                Ok(session) => session,
                Err(err) => {
                    return Outbound::Unauthorized {
                        message: err.public_message(),
                    }
                }
            };
            let claims = match state.auth.token_issuer().decode(&session.access_token) {
                Ok(claims) => claims,
                Err(_) => {
                    return Outbound::Unauthorized {
                        message: "Invalid token".to_string(),
                    }
                }
            };
            let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0)
                .unwrap_or_else(chrono::Utc::now);
            match state
                .tracker
                .refresh(
                    connection_id,
                    claims.sub,
                    session.roles.clone(),
                    Some(session.profile_id),
                    expires_at,
                )
                .await
            {
                Ok(()) => Outbound::TokensRefreshed {
                    access_token: session.access_token,
                    refresh_token: session.refresh_token,
                    expires_in: session.expires_in,
                },
                Err(err) => Outbound::Unauthorized {
                    message: err.to_string(),
                },
            }
        }
        Inbound::Ping => {
            debug!(connection_id, "ping");
            Outbound::Pong
        }
    }
}

/// A refresh over the socket may only consume a token held by the user this
/// connection authenticated as. Unbound connections and unknown tokens both
/// fail the check.
fn refresh_subject_allowed(bound: Option<Uuid>, owner: Option<Uuid>) -> bool {
    matches!((bound, owner), (Some(bound), Some(owner)) if bound == owner)
}

async fn send(socket: &mut WebSocket, outbound: &Outbound) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(outbound).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(payload)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frames_parse() {
        let auth: Inbound = serde_json::from_str(r#"{"event":"authenticate","token":"t"}"#).unwrap();
        assert!(matches!(auth, Inbound::Authenticate { .. }));
        let ping: Inbound = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert!(matches!(ping, Inbound::Ping));
        assert!(serde_json::from_str::<Inbound>(r#"{"event":"subscribe"}"#).is_err());
    }

    #[test]
    fn outbound_frames_are_tagged() {
        let json = serde_json::to_value(Outbound::Pong).unwrap();
        assert_eq!(json["event"], "pong");
        let json = serde_json::to_value(Outbound::TokenExpiring { expires_in_secs: 90 }).unwrap();
        assert_eq!(json["event"], "token_expiring");
        assert_eq!(json["expires_in_secs"], 90);
    }

    #[test]
    fn session_events_map_to_outbound() {
        let out = Outbound::from(SessionEvent::SessionExpired);
        assert!(matches!(out, Outbound::SessionExpired));
    }

    #[test]
    fn refresh_requires_a_bound_matching_subject() {
        let user = Uuid::new_v4();
        assert!(refresh_subject_allowed(Some(user), Some(user)));
        // Another user's token must never be consumed over this connection.
        assert!(!refresh_subject_allowed(Some(user), Some(Uuid::new_v4())));
        assert!(!refresh_subject_allowed(None, Some(user)));
        assert!(!refresh_subject_allowed(Some(user), None));
        assert!(!refresh_subject_allowed(None, None));
    }
}
