use std::convert::Infallible;
use std::sync::Arc;
use serde::Deserialize;
use warp::http::StatusCode;
use warp::Filter;

use crate::auth::{bearer_token, TokenVerifier};
use crate::config::Config;
use crate::error::{ExamError, Result};
use crate::exam::SessionManager;
use super::websocket;

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartExamRequest {
    test_id: String,
    #[serde(default)]
    force_new: bool,
}

/// Websocket upgrade for the realtime exam channel. The credential rides in
/// as a `token` query parameter and is verified inside the connection
/// handler.
pub fn exam_websocket_route(
    manager: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("exam")
        .and(warp::ws())
        .and(warp::query::<WsQuery>())
        .and(with_manager(manager))
        .and(with_verifier(verifier))
        .map(
            |ws: warp::ws::Ws,
             query: WsQuery,
             manager: Arc<SessionManager>,
             verifier: Arc<dyn TokenVerifier>| {
                ws.on_upgrade(move |websocket| {
                    websocket::handle_exam_websocket(websocket, query.token, manager, verifier)
                })
            },
        )
}

pub fn exam_health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone
{
    warp::path("exam")
        .and(warp::path("health"))
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Exam Session Server",
                "version": env!("CARGO_PKG_VERSION")
            }))
        })
}

/// Non-secret runtime configuration. Secrets and keys never appear here.
pub fn exam_config_endpoint(
    config: Config,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("exam")
        .and(warp::path("config"))
        .and(warp::get())
        .map(move || {
            warp::reply::json(&serde_json::json!({
                "service": "Exam Session Server",
                "version": env!("CARGO_PKG_VERSION"),
                "evaluator": {
                    "provider": config.evaluator.provider(),
                    "model": config.evaluator.model,
                }
            }))
        })
}

/// POST /exam/start: create a session for a test the caller owns, optionally
/// force-expiring a session that is already running.
pub fn start_exam_route(
    manager: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("exam")
        .and(warp::path("start"))
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json())
        .and(with_manager(manager))
        .and(with_verifier(verifier))
        .and_then(handle_start_exam)
}

/// POST /exam/force-finish/{exam_id}: expire a running session without
/// grading it.
pub fn force_finish_route(
    manager: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("exam")
        .and(warp::path("force-finish"))
        .and(warp::path::param::<String>())
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_manager(manager))
        .and(with_verifier(verifier))
        .and_then(handle_force_finish)
}

async fn handle_start_exam(
    authorization: Option<String>,
    request: StartExamRequest,
    manager: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
) -> std::result::Result<impl warp::Reply, Infallible> {
    let reply = match authorize(authorization.as_deref(), verifier.as_ref()) {
        Ok(user_id) => {
            match manager
                .start_exam(&user_id, &request.test_id, request.force_new)
                .await
            {
                Ok(started) => warp::reply::with_status(
                    warp::reply::json(&started),
                    StatusCode::CREATED,
                ),
                Err(e) => error_reply(e),
            }
        }
        Err(e) => error_reply(e),
    };
    Ok(reply)
}

async fn handle_force_finish(
    exam_id: String,
    authorization: Option<String>,
    manager: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
) -> std::result::Result<impl warp::Reply, Infallible> {
    let reply = match authorize(authorization.as_deref(), verifier.as_ref()) {
        Ok(user_id) => match manager.force_finish(&exam_id, &user_id).await {
            Ok(exam) => warp::reply::with_status(
                warp::reply::json(&serde_json::json!({
                    "examId": exam.id,
                    "status": exam.status,
                })),
                StatusCode::OK,
            ),
            Err(e) => error_reply(e),
        },
        Err(e) => error_reply(e),
    };
    Ok(reply)
}

fn authorize(header: Option<&str>, verifier: &dyn TokenVerifier) -> Result<String> {
    let token = bearer_token(header).ok_or_else(|| {
        ExamError::AuthenticationFailed("Missing bearer token".to_string())
    })?;
    verifier.verify(token)
}

fn error_reply(error: ExamError) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = error.status_code();
    let body = match &error {
        // The blocking exam id rides along so clients can offer a forced
        // restart.
        ExamError::AlreadyActive(exam_id) => serde_json::json!({
            "error": error.to_string(),
            "examId": exam_id,
        }),
        _ => serde_json::json!({ "error": error.to_string() }),
    };
    warp::reply::with_status(warp::reply::json(&body), status)
}

fn with_manager(
    manager: Arc<SessionManager>,
) -> impl Filter<Extract = (Arc<SessionManager>,), Error = Infallible> + Clone {
    warp::any().map(move || manager.clone())
}

fn with_verifier(
    verifier: Arc<dyn TokenVerifier>,
) -> impl Filter<Extract = (Arc<dyn TokenVerifier>,), Error = Infallible> + Clone {
    warp::any().map(move || verifier.clone())
}
