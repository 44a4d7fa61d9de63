//! API request handlers

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::clients::{ClientFactory, SourceCredentials, TargetCredentials};
use crate::config::Config;
use crate::error::BridgeError;
use crate::migration::{BatchExecutor, DependencyMappings, EntityKind, PhaseRunner, RunRequest};
use crate::progress::{encode, ChannelSink, LogSink, Tee};
use crate::throttle::TargetThrottle;
use crate::wizard::{Phase, PhaseData, SessionRegistry, TransitionOutcome, WizardAction, WizardState};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub registry: SessionRegistry,
    pub throttle: Arc<TargetThrottle>,
    pub clients: Arc<dyn ClientFactory>,
}

/// Response envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }
    }
}

/// State after an action, and whether the action was accepted
#[derive(Debug, Serialize)]
pub struct WizardResponse {
    pub state: WizardState,
    pub outcome: TransitionOutcome,
}

/// Body of `POST /api/migrate/:entity`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateRequest {
    pub source_key: String,
    pub target_key: String,
    pub source: SourceCredentials,
    pub target: TargetCredentials,
    #[serde(default)]
    pub resume_ids: Vec<u64>,
    #[serde(default)]
    pub mappings: DependencyMappings,
    /// Category scope for products
    #[serde(default)]
    pub category: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

fn status_for(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        BridgeError::PhaseUnavailable(_)
        | BridgeError::DependencyNotSatisfied { .. }
        | BridgeError::RunInProgress(_) => StatusCode::CONFLICT,
        BridgeError::Fetch { .. } | BridgeError::Client(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: BridgeError) -> Response {
    warn!("Request failed: {}", error);
    (
        status_for(&error),
        Json(ApiResponse::<()>::error(&error.to_string())),
    )
        .into_response()
}

/// GET /api/health
pub async fn health() -> impl IntoResponse {
    Json(ApiResponse::success("ok"))
}

/// GET /api/wizard/:source/:target - Load (or create) the wizard state
pub async fn get_wizard(
    State(state): State<Arc<AppState>>,
    Path((source, target)): Path<(String, String)>,
) -> Response {
    match state.registry.session(&source, &target).await {
        Ok(session) => {
            let session = session.lock().await;
            Json(ApiResponse::success(session.state().clone())).into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn apply(state: &AppState, source: &str, target: &str, action: WizardAction) -> Response {
    let session = match state.registry.session(source, target).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };

    let mut session = session.lock().await;
    match session.apply(action).await {
        Ok(outcome) => Json(ApiResponse::success(WizardResponse {
            state: session.state().clone(),
            outcome,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

fn parse_phase(phase: u8) -> Result<Phase, Response> {
    Phase::try_from(phase).map_err(error_response)
}

/// POST /api/wizard/:source/:target/goto/:phase
pub async fn go_to_phase(
    State(state): State<Arc<AppState>>,
    Path((source, target, phase)): Path<(String, String, u8)>,
) -> Response {
    match parse_phase(phase) {
        Ok(phase) => apply(&state, &source, &target, WizardAction::GoToPhase { phase }).await,
        Err(response) => response,
    }
}

/// POST /api/wizard/:source/:target/phases/:phase/start
pub async fn start_phase(
    State(state): State<Arc<AppState>>,
    Path((source, target, phase)): Path<(String, String, u8)>,
) -> Response {
    match parse_phase(phase) {
        Ok(phase) => apply(&state, &source, &target, WizardAction::StartPhase { phase }).await,
        Err(response) => response,
    }
}

/// POST /api/wizard/:source/:target/phases/:phase/complete
pub async fn complete_phase(
    State(state): State<Arc<AppState>>,
    Path((source, target, phase)): Path<(String, String, u8)>,
    body: Bytes,
) -> Response {
    let phase = match parse_phase(phase) {
        Ok(phase) => phase,
        Err(response) => return response,
    };
    let data = match completion_data(&body) {
        Ok(data) => data,
        Err(e) => return error_response(e),
    };
    apply(&state, &source, &target, WizardAction::CompletePhase { phase, data }).await
}

/// Optional result payload of a completion; an empty body means none
fn completion_data(body: &[u8]) -> Result<Option<PhaseData>, BridgeError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice::<Option<PhaseData>>(body)
        .map_err(|e| BridgeError::InvalidInput(format!("invalid phase data: {}", e)))
}

/// POST /api/wizard/:source/:target/phases/:phase/skip
pub async fn skip_phase(
    State(state): State<Arc<AppState>>,
    Path((source, target, phase)): Path<(String, String, u8)>,
) -> Response {
    match parse_phase(phase) {
        Ok(phase) => apply(&state, &source, &target, WizardAction::SkipPhase { phase }).await,
        Err(response) => response,
    }
}

/// PATCH /api/wizard/:source/:target/phases/:phase/data
pub async fn update_phase_data(
    State(state): State<Arc<AppState>>,
    Path((source, target, phase)): Path<(String, String, u8)>,
    Json(data): Json<PhaseData>,
) -> Response {
    match parse_phase(phase) {
        Ok(phase) => {
            apply(&state, &source, &target, WizardAction::UpdatePhaseData { phase, data }).await
        }
        Err(response) => response,
    }
}

/// DELETE /api/wizard/:source/:target - Reset the wizard
pub async fn reset_wizard(
    State(state): State<Arc<AppState>>,
    Path((source, target)): Path<(String, String)>,
) -> Response {
    apply(&state, &source, &target, WizardAction::Reset).await
}

/// POST /api/migrate/:entity - Run one entity migration, streaming progress
pub async fn migrate(
    State(state): State<Arc<AppState>>,
    Path(entity): Path<String>,
    Json(req): Json<MigrateRequest>,
) -> Response {
    let kind = match entity.parse::<EntityKind>() {
        Ok(kind) => kind,
        Err(e) => return error_response(e),
    };
    let session = match state.registry.session(&req.source_key, &req.target_key).await {
        Ok(session) => session,
        Err(e) => return error_response(e),
    };
    // Claimed before the stream opens so a duplicate run gets a 409
    let claim = match session.lock().await.claim_run(kind) {
        Ok(claim) => claim,
        Err(e) => return error_response(e),
    };

    let source = state.clients.source(&req.source);
    let target = state.clients.target(&req.target);
    let request = RunRequest {
        scope: req.category,
        resume: req.resume_ids,
        mappings: req.mappings,
        batch_size: req.batch_size,
    };

    let (sink, receiver) = ChannelSink::channel();
    let cancel = CancellationToken::new();
    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("migrate", %run_id, entity = %kind);

    let task_state = state.clone();
    let task_cancel = cancel.clone();
    tokio::spawn(
        async move {
            let executor = BatchExecutor::new(source.as_ref(), target.as_ref(), &task_state.throttle)
                .with_page_size(task_state.config.migration.page_size);
            let runner = PhaseRunner::new(executor, task_state.config.migration.batch_size);
            let sink = Tee(&sink, &LogSink);

            match runner
                .run_claimed(&session, claim, &request, &sink, &task_cancel)
                .await
            {
                Ok(report) if report.cancelled => info!("Run cancelled"),
                Ok(report) => info!(
                    "Run finished: {}/{} settled",
                    report.stats.settled(),
                    report.stats.total
                ),
                Err(e) => warn!("Run failed: {}", e),
            }
        }
        .instrument(span),
    );

    // The guard cancels the run when the response body is dropped
    let guard = state
        .config
        .migration
        .cancel_on_disconnect
        .then(|| cancel.drop_guard());

    let stream = futures::stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
        let event = receiver.recv().await?;
        let frame = Bytes::from(encode(&event));
        Some((Ok::<_, Infallible>(frame), (receiver, guard)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|e| {
            error_response(BridgeError::InvalidInput(format!("invalid response: {}", e)))
        })
}
