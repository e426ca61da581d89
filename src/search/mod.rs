//! Search orchestration: request routing, per-mode dispatch and fusion, and
//! temporal grouping of multi-slot requests.

pub mod orchestrator;
pub mod request;
pub mod response;

use crate::fusion::GroupError;

pub use orchestrator::{Orchestrator, TopK};
pub use request::{
    Grouping, ImageModel, ImageSearchRequest, MethodFlags, QuerySlot, SearchRequest,
};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error("search service is shutting down")]
    ShuttingDown,
}
