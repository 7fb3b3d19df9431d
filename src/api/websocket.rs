use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use crate::auth::TokenVerifier;
use crate::error::{ExamError, Result};
use crate::exam::protocol::{ClientEvent, ServerEvent};
use crate::exam::SessionManager;

/// Drives one realtime exam connection.
///
/// The credential arrives as a `token` query parameter on the upgrade and is
/// verified exactly once, before any room operation is possible; a bad
/// credential gets a single `error` event and the socket closes. Failed
/// operations after that surface as `error` events on the same connection
/// without closing it.
pub async fn handle_exam_websocket(
    websocket: WebSocket,
    token: Option<String>,
    manager: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
) {
    let conn_id = Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "New exam websocket connection");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Forwarder task: drains the channel into the socket sink. Room
    // broadcasts and direct replies both go through the channel.
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send websocket message");
                break;
            }
        }
    });

    let user_id = match authenticate(token.as_deref(), verifier.as_ref()) {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "Websocket connection rejected");
            send_event(&tx, &ServerEvent::Error {
                message: e.to_string(),
            });
            // Closing the channel lets the forwarder flush the error and end.
            drop(tx);
            let _ = sender_task.await;
            return;
        }
    };

    tracing::info!(conn_id = %conn_id, user_id = %user_id, "Websocket connection authenticated");

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                handle_client_message(&manager, &user_id, &conn_id, &tx, message).await;
            }
            Err(e) => {
                tracing::error!(conn_id = %conn_id, error = %e, "Websocket transport error");
                break;
            }
        }
    }

    // Tickers are exam-keyed and deliberately survive this cleanup.
    manager.disconnect(&conn_id).await;
    sender_task.abort();
    tracing::info!(conn_id = %conn_id, user_id = %user_id, "Websocket connection closed");
}

fn authenticate(token: Option<&str>, verifier: &dyn TokenVerifier) -> Result<String> {
    let token = token.ok_or_else(|| {
        ExamError::AuthenticationFailed("Missing authentication token".to_string())
    })?;
    verifier.verify(token)
}

async fn handle_client_message(
    manager: &Arc<SessionManager>,
    user_id: &str,
    conn_id: &str,
    tx: &mpsc::UnboundedSender<Message>,
    message: Message,
) {
    // Ping/pong and close frames are handled by warp itself.
    let text = match message.to_str() {
        Ok(text) => text,
        Err(_) => return,
    };

    tracing::debug!(conn_id = %conn_id, "Received client event: {}", text);

    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(conn_id = %conn_id, error = %e, "Unparseable client event");
            let error = ExamError::validation(e.to_string());
            send_event(tx, &ServerEvent::Error {
                message: error.to_string(),
            });
            return;
        }
    };

    if let Err(e) = dispatch(manager, user_id, conn_id, tx, event).await {
        tracing::warn!(
            conn_id = %conn_id,
            user_id = %user_id,
            error = %e,
            "Client operation failed"
        );
        send_event(tx, &ServerEvent::Error {
            message: e.to_string(),
        });
    }
}

async fn dispatch(
    manager: &Arc<SessionManager>,
    user_id: &str,
    conn_id: &str,
    tx: &mpsc::UnboundedSender<Message>,
    event: ClientEvent,
) -> Result<()> {
    match event {
        ClientEvent::JoinExam { exam_id } => {
            let joined = manager
                .join_exam(&exam_id, user_id, conn_id, tx.clone())
                .await?;
            send_event(tx, &ServerEvent::ExamJoined {
                test: joined.test,
                remaining_time: joined.remaining_time,
            });
        }

        ClientEvent::SubmitAnswer {
            exam_id,
            question_index,
            answer,
        } => {
            let evaluation = manager
                .submit_answer(&exam_id, user_id, question_index, &answer)
                .await?;
            // Feedback goes to the submitter only, never to the room.
            send_event(tx, &ServerEvent::AnswerFeedback {
                question_index,
                is_correct: evaluation.is_correct,
                feedback: evaluation.feedback,
            });
        }

        ClientEvent::FinishExam { exam_id } => {
            // The terminal record reaches this connection through the
            // room broadcast issued by the finalizer.
            manager.finalize(&exam_id, Some(user_id)).await?;
        }
    }

    Ok(())
}

fn send_event(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(payload) => {
            let _ = tx.send(Message::text(payload));
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
        }
    }
}
