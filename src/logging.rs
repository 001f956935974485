//! Structured logging macros shared across the crate.
//!
//! Field names stay fixed (`student_id`, `card_id`, `context`, `job_type`, `duration_ms`)
//! so log queries work the same for every component.

// ============================================================================
// HTTP handlers
// ============================================================================

#[macro_export]
macro_rules! log_api_start {
    ($operation:expr, student_id = $student_id:expr) => {
        tracing::debug!(
            operation = $operation,
            student_id = %$student_id,
            "API operation started"
        );
    };
    ($operation:expr) => {
        tracing::debug!(operation = $operation, "API operation started");
    };
}

#[macro_export]
macro_rules! log_api_success {
    ($operation:expr, student_id = $student_id:expr, count = $count:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            student_id = %$student_id,
            count = $count,
            "API operation completed: {}", $msg
        );
    };
    ($operation:expr, student_id = $student_id:expr, $msg:expr) => {
        tracing::info!(
            operation = $operation,
            student_id = %$student_id,
            "API operation completed: {}", $msg
        );
    };
}

/// Handler failures always log at error, whatever status the client gets.
#[macro_export]
macro_rules! log_api_error {
    ($operation:expr, student_id = $student_id:expr, error = $error:expr, $msg:expr) => {
        tracing::error!(
            operation = $operation,
            student_id = %$student_id,
            error = %$error,
            "API operation failed: {}", $msg
        );
    };
}

// ============================================================================
// Review recording
// ============================================================================

/// Log the outcome of one recorded rating
#[macro_export]
macro_rules! log_review {
    (learning_step, $student_id:expr, $card_id:expr, $context:expr, rating = $rating:expr, step = $step:expr) => {
        tracing::debug!(
            component = "review_recorder",
            student_id = %$student_id,
            card_id = %$card_id,
            context = %$context,
            rating = $rating,
            prior_learning_steps = $step,
            "Review recorded as learning step"
        );
    };
    (memory_model, $student_id:expr, $card_id:expr, $context:expr, rating = $rating:expr, interval_days = $interval:expr) => {
        tracing::debug!(
            component = "review_recorder",
            student_id = %$student_id,
            card_id = %$card_id,
            context = %$context,
            rating = $rating,
            interval_days = $interval,
            "Review recorded through memory model"
        );
    };
    (rejected, $student_id:expr, $card_id:expr, $context:expr, error = $error:expr) => {
        tracing::error!(
            component = "review_recorder",
            student_id = %$student_id,
            card_id = %$card_id,
            context = %$context,
            error = %$error,
            "Review rejected"
        );
    };
}

// ============================================================================
// Jobs
// ============================================================================

/// Log background job lifecycle events
#[macro_export]
macro_rules! log_job {
    (start, $job_type:expr, student_id = $student_id:expr) => {
        tracing::info!(
            component = "jobs",
            job_type = %$job_type,
            student_id = %$student_id,
            "Job started"
        );
    };
    (completed, $job_type:expr, student_id = $student_id:expr, duration_ms = $duration:expr) => {
        tracing::info!(
            component = "jobs",
            job_type = %$job_type,
            student_id = %$student_id,
            duration_ms = $duration,
            "Job completed"
        );
    };
    (skipped, $job_type:expr, student_id = $student_id:expr, $reason:expr) => {
        tracing::info!(
            component = "jobs",
            job_type = %$job_type,
            student_id = %$student_id,
            "Job skipped: {}", $reason
        );
    };
    (failed, $job_type:expr, error = $error:expr) => {
        tracing::error!(
            component = "jobs",
            job_type = %$job_type,
            error = %$error,
            "Job failed"
        );
    };
}

// ============================================================================
// Database
// ============================================================================

#[macro_export]
macro_rules! log_db_operation {
    (debug, $operation:expr, count = $count:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            component = "database",
            operation = $operation,
            result_count = $count,
            duration_ms = $duration,
            "Database operation completed"
        );
    };
    (info, $operation:expr, $msg:expr) => {
        tracing::info!(
            component = "database",
            operation = $operation,
            "Database operation: {}", $msg
        );
    };
}

// ============================================================================
// Process lifecycle
// ============================================================================

#[macro_export]
macro_rules! log_system_event {
    (startup, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "startup",
            component = $component,
            "Lifecycle: {}",
            $msg
        );
    };
    (shutdown, component = $component:expr, $msg:expr) => {
        tracing::info!(
            event_type = "shutdown",
            component = $component,
            "Lifecycle: {}",
            $msg
        );
    };
    (config, $msg:expr) => {
        tracing::info!(event_type = "configuration", "Lifecycle: {}", $msg);
    };
}

// ============================================================================
// Timing
// ============================================================================

/// Elapsed time of a slow path, optionally with the number of items it handled.
#[macro_export]
macro_rules! log_performance {
    ($operation:expr, duration_ms = $duration:expr, count = $count:expr) => {
        tracing::debug!(
            event_type = "performance",
            operation = $operation,
            duration_ms = $duration,
            item_count = $count,
            "Timing"
        );
    };
    ($operation:expr, duration_ms = $duration:expr) => {
        tracing::debug!(
            event_type = "performance",
            operation = $operation,
            duration_ms = $duration,
            "Timing"
        );
    };
}

// ============================================================================
// Validation
// ============================================================================

#[macro_export]
macro_rules! log_validation {
    (success, $component:expr, $msg:expr) => {
        tracing::debug!(
            event_type = "validation",
            component = $component,
            result = "success",
            "Validation completed: {}", $msg
        );
    };
}
