//! GraphQL backend over HTTP
//!
//! Queries and mutations are POSTed as `{query, variables}` with a bearer
//! token. Status subscriptions are delegated to
//! [`GraphqlSubscriber`](super::subscription::GraphqlSubscriber).

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use supportchat_shared::{Chat, ChatId, ContractRecord, NewChat, NewMessage};
use tracing::{debug, error};

use super::protocol::{
    ContractsData, CreateChatData, GraphQlRequest, GraphQlResponse, CONTRACTS_QUERY,
    CREATE_CHAT_MUTATION, CREATE_MESSAGE_MUTATION, MARK_CHAT_MISSED_MUTATION,
};
use super::subscription::GraphqlSubscriber;
use super::{ChatBackend, StatusStream};
use crate::config::DispatchConfig;
use crate::error::{BackendError, BackendResult};

/// Client for the support backend's GraphQL API
#[derive(Clone)]
pub struct GraphqlBackend {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
    subscriber: GraphqlSubscriber,
}

impl GraphqlBackend {
    /// Create a backend client from config
    pub fn new(config: &DispatchConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.graphql_url.to_string(),
            api_token: config.api_token.clone(),
            // A connect that stalls is reported before the grace period runs out
            subscriber: GraphqlSubscriber::new(
                config.graphql_ws_url.to_string(),
                config.api_token.clone(),
            )
            .with_connect_timeout(config.connection_grace),
        })
    }

    /// Execute one GraphQL operation and decode its `data`
    async fn execute<V, T>(&self, query: &'static str, variables: V) -> BackendResult<T>
    where
        V: Serialize,
        T: DeserializeOwned,
    {
        let request = GraphQlRequest { query, variables };

        let mut req_builder = self.client.post(&self.endpoint);
        if let Some(token) = &self.api_token {
            req_builder = req_builder.bearer_auth(token);
        }

        let response = req_builder
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "GraphQL endpoint returned error status");
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(BackendError::Unauthorized(format!("HTTP {}", status)));
            }
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let result: GraphQlResponse<T> = response.json().await?;
        result.into_data()
    }
}

#[async_trait]
impl ChatBackend for GraphqlBackend {
    async fn fetch_contracts(&self) -> BackendResult<Vec<ContractRecord>> {
        let data: ContractsData = self.execute(CONTRACTS_QUERY, json!({})).await?;
        debug!(count = data.contracts.len(), "Fetched contracts");
        Ok(data.contracts)
    }

    async fn create_chat(&self, new_chat: &NewChat) -> BackendResult<Chat> {
        let data: CreateChatData = self.execute(CREATE_CHAT_MUTATION, new_chat).await?;
        Ok(data.create_chat)
    }

    async fn subscribe_chat_status(&self, chat_id: &ChatId) -> BackendResult<StatusStream> {
        self.subscriber.subscribe(chat_id).await
    }

    async fn mark_chat_missed(&self, chat_id: &ChatId) -> BackendResult<()> {
        let _: serde_json::Value = self
            .execute(MARK_CHAT_MISSED_MUTATION, json!({ "chatId": chat_id }))
            .await?;
        Ok(())
    }

    async fn create_message(&self, message: &NewMessage) -> BackendResult<()> {
        let _: serde_json::Value = self.execute(CREATE_MESSAGE_MUTATION, message).await?;
        Ok(())
    }
}
