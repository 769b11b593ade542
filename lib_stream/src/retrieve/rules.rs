//! # Filter Rules Client
//!
//! Control plane for the filtered stream: add, list and delete the server-side rules
//! that decide which events are delivered. Each call is a single request, no retries
//! and no local state.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::retrieve::ky_http::{ApiClient, ApiResponse};

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("invalid rule request: {0}")]
    InvalidRequest(&'static str),

    #[error(transparent)]
    Http(#[from] anyhow::Error),
}

/// One filter rule as the server reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Body shared by every rules endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RulesResponse {
    #[serde(default)]
    pub data: Option<Vec<Rule>>,
    #[serde(default)]
    pub errors: Option<Vec<Value>>,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl RulesResponse {
    pub fn rules(&self) -> &[Rule] {
        self.data.as_deref().unwrap_or_default()
    }
}

#[derive(Serialize)]
struct AddRequest<'a> {
    add: [NewRule<'a>; 1],
}

#[derive(Serialize)]
struct NewRule<'a> {
    value: &'a str,
    tag: &'a str,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    delete: DeleteIds<'a>,
}

#[derive(Serialize)]
struct DeleteIds<'a> {
    ids: &'a [String],
}

/// # Rules Client
pub struct RulesClient {
    api: ApiClient,
}

impl RulesClient {
    pub fn new(rules_url: &str, bearer: &str) -> Result<Self, RulesError> {
        Ok(Self {
            api: ApiClient::new(rules_url, Some(bearer.to_string()))?,
        })
    }

    /// Adds one rule matching `query`, labelled `tag`.
    pub async fn add_rule(
        &self,
        query: &str,
        tag: &str,
    ) -> Result<ApiResponse<RulesResponse>, RulesError> {
        if query.trim().is_empty() {
            return Err(RulesError::InvalidRequest("query is empty"));
        }
        if tag.trim().is_empty() {
            return Err(RulesError::InvalidRequest("tag is empty"));
        }

        let body = AddRequest {
            add: [NewRule { value: query, tag }],
        };
        let response = self.api.request(Method::POST, "", None, Some(body)).await?;
        log::info!("Add rule '{}' answered with status {}", tag, response.status);
        Ok(response)
    }

    /// Lists the rules currently installed.
    pub async fn get_rules(&self) -> Result<ApiResponse<RulesResponse>, RulesError> {
        Ok(self
            .api
            .request(Method::GET, "", None, None::<()>)
            .await?)
    }

    /// Deletes the rules with the given ids.
    pub async fn delete_rules(
        &self,
        ids: &[String],
    ) -> Result<ApiResponse<RulesResponse>, RulesError> {
        if ids.is_empty() {
            return Err(RulesError::InvalidRequest("no rule ids given"));
        }

        let body = DeleteRequest {
            delete: DeleteIds { ids },
        };
        let response = self.api.request(Method::POST, "", None, Some(body)).await?;
        log::info!("Delete of {} rule(s) answered with status {}", ids.len(), response.status);
        Ok(response)
    }
}
