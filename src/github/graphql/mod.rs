pub mod error;
pub mod graphql_types;
pub mod issue;
pub mod org;
pub mod pull_request;
