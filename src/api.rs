use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    config::SchedulerConfig,
    database::Database,
    errors::{ApiError, ErrorContext, SchedulerError},
    jobs::{JobOutcome, JobRunner, JobType},
    models::*,
    queue::QueueService,
    review_service::ReviewService,
};

// Import logging macros
use crate::{log_api_error, log_api_start, log_api_success};

type ApiResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, Json<ApiResponse<()>>)>;

#[derive(Clone)]
pub struct AppState {
    pub reviews: ReviewService,
    pub queues: QueueService,
    pub jobs: JobRunner,
    pub config: SchedulerConfig,
}

impl AppState {
    pub fn new(db: Database, config: SchedulerConfig) -> Self {
        Self {
            reviews: ReviewService::new(db.clone(), config.clone()),
            queues: QueueService::new(db.clone()),
            jobs: JobRunner::new(db, config.clone()),
            config,
        }
    }
}

#[derive(Serialize, Deserialize)]
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

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecordReviewRequest {
    pub card_id: Uuid,
    pub rating: i32,
    pub context: Context,
    pub session_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct QueueParams {
    pub context: Option<Context>,
    pub new_cards: Option<usize>,
    pub max_due: Option<usize>,
    pub min_due: Option<usize>,
}

impl QueueParams {
    fn resolve(&self, defaults: QueueConfig) -> QueueConfig {
        QueueConfig {
            new_cards: self.new_cards.unwrap_or(defaults.new_cards),
            max_due: self.max_due.unwrap_or(defaults.max_due),
            min_due: self.min_due.unwrap_or(defaults.min_due),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CandidateParams {
    pub count: Option<usize>,
    pub vocabulary_confidence_threshold: Option<f64>,
    pub listening_candidate_threshold: Option<f64>,
}

impl CandidateParams {
    fn resolve(&self, defaults: CandidateConfig) -> CandidateConfig {
        CandidateConfig {
            count: self.count.unwrap_or(defaults.count),
            vocabulary_confidence_threshold: self
                .vocabulary_confidence_threshold
                .unwrap_or(defaults.vocabulary_confidence_threshold),
            listening_candidate_threshold: self
                .listening_candidate_threshold
                .unwrap_or(defaults.listening_candidate_threshold),
        }
    }
}

fn error_response(
    error: SchedulerError,
    operation: &str,
    resource_type: &str,
    resource_id: &str,
) -> (StatusCode, Json<ApiResponse<()>>) {
    let context = ErrorContext::new(operation, resource_type).with_id(resource_id);
    ApiError::from(error).to_response_with_context(context)
}

pub async fn health() -> Json<ApiResponse<Value>> {
    log_api_start!("health");
    Json(ApiResponse::success(json!({ "status": "ok" })))
}

pub async fn record_review(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
    Json(request): Json<RecordReviewRequest>,
) -> ApiResult<CardState> {
    log_api_start!("record_review", student_id = student_id);

    match state
        .reviews
        .record_review(
            student_id,
            request.card_id,
            request.rating,
            request.context,
            request.session_id,
        )
        .await
    {
        Ok(card_state) => {
            log_api_success!("record_review", student_id = student_id, "review recorded");
            Ok(Json(ApiResponse::success(card_state)))
        }
        Err(e) => {
            log_api_error!("record_review", student_id = student_id, error = e, "review not recorded");
            Err(error_response(
                e,
                "record_review",
                "card_state",
                &request.card_id.to_string(),
            ))
        }
    }
}

pub async fn get_review_queue(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
    Query(params): Query<QueueParams>,
) -> ApiResult<ReviewQueue> {
    log_api_start!("get_review_queue", student_id = student_id);
    let context = params.context.unwrap_or(Context::Vocabulary);
    let config = params.resolve(state.config.queue);

    match state
        .queues
        .get_initial_review_queue(student_id, context, config, Utc::now())
        .await
    {
        Ok(queue) => {
            log_api_success!(
                "get_review_queue",
                student_id = student_id,
                count = queue.len(),
                "queue assembled"
            );
            Ok(Json(ApiResponse::success(queue)))
        }
        Err(e) => Err(error_response(
            e,
            "get_review_queue",
            "student",
            &student_id.to_string(),
        )),
    }
}

pub async fn get_listening_candidates(
    State(state): State<AppState>,
    Path((student_id, deck_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<CandidateParams>,
) -> ApiResult<CandidateSelection> {
    log_api_start!("get_listening_candidates", student_id = student_id);
    let config = params.resolve(state.config.candidates);

    match state
        .queues
        .get_listening_candidates_from_vocabulary(student_id, deck_id, config, Utc::now())
        .await
    {
        Ok(selection) => {
            log_api_success!(
                "get_listening_candidates",
                student_id = student_id,
                count = selection.candidates.len(),
                "candidates selected"
            );
            Ok(Json(ApiResponse::success(selection)))
        }
        Err(e) => Err(error_response(
            e,
            "get_listening_candidates",
            "deck",
            &deck_id.to_string(),
        )),
    }
}

pub async fn get_fill_in_blank_candidates(
    State(state): State<AppState>,
    Path((student_id, deck_id)): Path<(Uuid, Uuid)>,
    Query(params): Query<CandidateParams>,
) -> ApiResult<CandidateSelection> {
    log_api_start!("get_fill_in_blank_candidates", student_id = student_id);
    let config = params.resolve(state.config.candidates);

    match state
        .queues
        .get_fill_in_blank_candidates(student_id, deck_id, config, Utc::now())
        .await
    {
        Ok(selection) => {
            log_api_success!(
                "get_fill_in_blank_candidates",
                student_id = student_id,
                count = selection.candidates.len(),
                "candidates selected"
            );
            Ok(Json(ApiResponse::success(selection)))
        }
        Err(e) => Err(error_response(
            e,
            "get_fill_in_blank_candidates",
            "deck",
            &deck_id.to_string(),
        )),
    }
}

/// Run a job inline. Failed and skipped jobs are still a successful call; the outcome
/// says what happened.
pub async fn run_job(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<JobOutcome> {
    log_api_start!("run_job");

    if let Err(e) = JobType::from_str(&job_type) {
        return Err(error_response(e, "run_job", "job_type", &job_type));
    }

    Ok(Json(ApiResponse::success(
        state.jobs.run(&job_type, payload).await,
    )))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        // Scheduling routes
        .route("/api/students/:id/reviews", post(record_review))
        .route("/api/students/:id/queue", get(get_review_queue))
        .route(
            "/api/students/:id/decks/:deck_id/listening-candidates",
            get(get_listening_candidates),
        )
        .route(
            "/api/students/:id/decks/:deck_id/fill-in-blank-candidates",
            get(get_fill_in_blank_candidates),
        )
        // Job routes
        .route("/api/jobs/:job_type", post(run_job))
        .with_state(state)
}
