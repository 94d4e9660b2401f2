use crate::github::error::ApiRetryableError;

/// Classifies an error reported inside a GraphQL response body.
///
/// The GraphQL endpoint answers 200 even when the query fails, so retry
/// classification has to work from the error message text.
pub fn classify_graphql_error(error_msg: &str) -> ApiRetryableError {
    if error_msg.contains("rate limit") || error_msg.contains("API rate limit") {
        tracing::warn!("GraphQL rate limit reported, will retry: {}", error_msg);
        ApiRetryableError::RateLimit
    } else if error_msg.contains("exceeds maximum")
        || error_msg.contains("node limit")
        || error_msg.contains("MAX_NODE_LIMIT_EXCEEDED")
    {
        tracing::error!(
            "GraphQL query rejected as too large, consider reducing the page size: {}",
            error_msg
        );
        ApiRetryableError::NonRetryable(format!(
            "query too large, consider reducing the page size: {}",
            error_msg
        ))
    } else if error_msg.contains("Could not resolve to an Organization")
        || error_msg.contains("Could not resolve to a Repository")
    {
        ApiRetryableError::NonRetryable(format!("resource not found: {}", error_msg))
    } else if error_msg.contains("timeout")
        || error_msg.contains("timed out")
        || error_msg.contains("Something went wrong while executing your query")
    {
        tracing::warn!("Transient GraphQL failure, will retry: {}", error_msg);
        ApiRetryableError::Retryable(format!("GraphQL server error: {}", error_msg))
    } else if error_msg.contains("validation") || error_msg.contains("syntax") {
        ApiRetryableError::NonRetryable(format!("GraphQL validation error: {}", error_msg))
    } else {
        tracing::warn!("Unclassified GraphQL error, treating as retryable: {}", error_msg);
        ApiRetryableError::Retryable(format!("GraphQL error: {}", error_msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_messages_classify_as_rate_limit() {
        assert_eq!(
            classify_graphql_error("API rate limit exceeded for installation"),
            ApiRetryableError::RateLimit
        );
    }

    #[test]
    fn node_limit_messages_are_non_retryable_with_a_page_size_hint() {
        match classify_graphql_error("requesting up to 600000 possible nodes exceeds maximum") {
            ApiRetryableError::NonRetryable(msg) => {
                assert!(msg.contains("consider reducing the page size"))
            }
            other => panic!("unexpected classification: {:?}", other),
        }
    }

    #[test]
    fn missing_organization_is_non_retryable() {
        assert!(matches!(
            classify_graphql_error("Could not resolve to an Organization with the login of 'x'"),
            ApiRetryableError::NonRetryable(_)
        ));
    }

    #[test]
    fn unknown_errors_default_to_retryable() {
        assert!(matches!(
            classify_graphql_error("mysterious hiccup"),
            ApiRetryableError::Retryable(_)
        ));
    }
}
