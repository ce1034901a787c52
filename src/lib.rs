pub mod attachment_analyzer;
pub mod config;
pub mod content;
pub mod context;
pub mod corpus;
pub mod domain_reputation;
pub mod domain_utils;
pub mod error;
pub mod events;
pub mod message;
pub mod orchestrator;
pub mod sandbox;
pub mod scoring;
pub mod server;
pub mod url_resolver;
pub mod url_reputation;
pub mod writer;

pub use config::Config;
pub use error::{AnalysisError, AnalysisResult};
pub use events::AnalysisEvent;
pub use orchestrator::{AnalysisRequest, Orchestrator, PreparedRequest, Services};
pub use scoring::{EnabledChecks, FinalScores};
