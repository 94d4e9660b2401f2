pub mod issue;
pub mod pager;
pub mod pull_request;
pub mod repository;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct GraphQLQuery(pub String);

#[derive(Debug, Clone, Serialize)]
pub struct GraphQLPayload<T: serde::Serialize> {
    pub query: GraphQLQuery,
    pub variables: Option<T>,
}

/// Envelope every GraphQL response arrives in: either data, errors, or both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLResponse<T> {
    pub data: Option<T>,
    pub errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default)]
    pub locations: Vec<serde_json::Value>,
    #[serde(default)]
    pub path: Vec<serde_json::Value>,
}

/// A connection queried only for its aggregate size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountConnection {
    #[serde(rename = "totalCount")]
    pub total_count: u64,
}
