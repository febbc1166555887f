pub mod abuse;
pub mod analysis;
pub mod cascade;
pub mod config;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod handlers;
pub mod language;
pub mod metrics;
pub mod middleware;
pub mod prompt;
pub mod providers;
pub mod quota;
pub mod rate_limit;
pub mod response;
pub mod server;
pub mod store;

pub use analysis::{AnalysisResult, AnalyzeRequest};
pub use config::Config;
pub use error::ApiError;
pub use server::create_app;
