pub mod api;
pub mod config;
pub mod context;
pub mod database;
pub mod errors;
pub mod fsrs_scheduler;
pub mod jobs;
pub mod learning_steps;
pub mod logging;
pub mod models;
pub mod optimizer;
pub mod queue;
pub mod rebuild;
pub mod review_service;
pub mod session;

pub use config::{Config, SchedulerConfig};
pub use context::ContextStore;
pub use database::Database;
pub use errors::*;
pub use fsrs_scheduler::FSRSScheduler;
pub use jobs::{JobOutcome, JobRunner};
pub use learning_steps::LearningSteps;
pub use models::*;
pub use optimizer::ParameterOptimizer;
pub use queue::QueueService;
pub use rebuild::CacheRebuilder;
pub use review_service::ReviewService;
pub use session::SessionProgress;
