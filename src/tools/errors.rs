use rmcp::ErrorData as McpError;

use crate::search::SearchError;

pub(super) fn retriable_error(e: &impl std::fmt::Display) -> McpError {
    McpError::internal_error(format!("{e} (retriable)"), None)
}

pub(super) fn search_to_mcp_error(e: SearchError) -> McpError {
    match &e {
        SearchError::InvalidRequest(_) | SearchError::Group(_) => {
            McpError::invalid_params(e.to_string(), None)
        }
        SearchError::ShuttingDown => retriable_error(&e),
    }
}

pub(super) fn serialize_error(e: serde_json::Error) -> McpError {
    McpError::internal_error(format!("failed to encode response: {e}"), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::GroupError;

    #[test]
    fn invalid_request_is_invalid_params() {
        let err = search_to_mcp_error(SearchError::InvalidRequest("no query".into()));
        assert!(err.message.contains("no query"), "got: {}", err.message);
        assert_eq!(err.code, rmcp::model::ErrorCode(-32602));
    }

    #[test]
    fn group_error_is_invalid_params() {
        let err = search_to_mcp_error(SearchError::Group(GroupError::InvalidSlotCount(4)));
        assert_eq!(err.code, rmcp::model::ErrorCode(-32602));
    }

    #[test]
    fn shutdown_is_retriable_internal_error() {
        let err = search_to_mcp_error(SearchError::ShuttingDown);
        assert!(err.message.contains("retriable"));
        assert_eq!(err.code, rmcp::model::ErrorCode(-32603));
    }
}
