//! UpCloud implementation of [`CloudClient`] over the JSON REST API.

mod error;
mod poll;
mod wire;

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::cloud::{
    Account, CloudClient, CloudFuture, CreateServerRequest, ServerDetails, ServerState,
    StorageDetails, StorageState, TemplatizeRequest, WaitTarget,
};
use crate::config::UpCloudConfig;

pub use error::UpCloudError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const STOP_TIMEOUT_SECS: u32 = 60;

/// Client for the UpCloud API authenticated with HTTP basic auth.
#[derive(Clone, Debug)]
pub struct UpCloudClient {
    http: Client,
    api_base: String,
    username: String,
    password: String,
    poll_interval: Duration,
}

impl UpCloudClient {
    /// Constructs a client from validated credentials.
    ///
    /// # Errors
    ///
    /// Returns [`UpCloudError::Config`] when the credentials are incomplete or
    /// the HTTP client cannot be initialised.
    pub fn new(config: &UpCloudConfig) -> Result<Self, UpCloudError> {
        config.validate()?;
        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| UpCloudError::Config(err.to_string()))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim().trim_end_matches('/').to_owned(),
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
            poll_interval: POLL_INTERVAL,
        })
    }

    /// Overrides the interval between state polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn authorised(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
    }

    async fn execute(&self, builder: RequestBuilder, endpoint: &str) -> Result<Vec<u8>, UpCloudError> {
        let response = self
            .authorised(builder)
            .send()
            .await
            .map_err(|err| UpCloudError::Http {
                endpoint: endpoint.to_owned(),
                message: err.to_string(),
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|err| UpCloudError::Http {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
        })?;

        if status.is_success() {
            return Ok(body.to_vec());
        }

        let (code, message) = match serde_json::from_slice::<wire::ErrorEnvelope>(&body) {
            Ok(envelope) => (envelope.error.error_code, envelope.error.error_message),
            Err(_) => (String::new(), String::from_utf8_lossy(&body).into_owned()),
        };
        Err(UpCloudError::Api {
            endpoint: endpoint.to_owned(),
            status: status.as_u16(),
            code,
            message,
        })
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        endpoint: &str,
    ) -> Result<T, UpCloudError> {
        let body = self.execute(builder, endpoint).await?;
        serde_json::from_slice(&body).map_err(|err| UpCloudError::Decode {
            endpoint: endpoint.to_owned(),
            message: err.to_string(),
        })
    }

    async fn fetch_server(&self, uuid: &str) -> Result<ServerDetails, UpCloudError> {
        let path = format!("/server/{uuid}");
        let envelope: wire::ServerEnvelope = self
            .execute_json(self.http.get(self.url(&path)), &format!("GET {path}"))
            .await?;
        Ok(envelope.server.into())
    }

    async fn fetch_storage(&self, uuid: &str) -> Result<StorageDetails, UpCloudError> {
        let path = format!("/storage/{uuid}");
        let envelope: wire::StorageEnvelope = self
            .execute_json(self.http.get(self.url(&path)), &format!("GET {path}"))
            .await?;
        Ok(envelope.storage.into())
    }

    async fn delete(&self, path: &str) -> Result<(), UpCloudError> {
        self.execute(self.http.delete(self.url(path)), &format!("DELETE {path}"))
            .await
            .map(drop)
    }
}

impl CloudClient for UpCloudClient {
    type Error = UpCloudError;

    fn get_account(&self) -> CloudFuture<'_, Account, Self::Error> {
        Box::pin(async move {
            let envelope: wire::AccountEnvelope = self
                .execute_json(self.http.get(self.url("/account")), "GET /account")
                .await?;
            Ok(envelope.account.into())
        })
    }

    fn create_server<'a>(
        &'a self,
        request: &'a CreateServerRequest,
    ) -> CloudFuture<'a, ServerDetails, Self::Error> {
        Box::pin(async move {
            request
                .validate()
                .map_err(|err| UpCloudError::Config(err.to_string()))?;
            let body = wire::CreateServerBody::from(request);
            let envelope: wire::ServerEnvelope = self
                .execute_json(self.http.post(self.url("/server")).json(&body), "POST /server")
                .await?;
            let details = ServerDetails::from(envelope.server);
            tracing::debug!(zone = %request.zone, server = %details.uuid, "server created");
            Ok(details)
        })
    }

    fn get_server_details<'a>(
        &'a self,
        uuid: &'a str,
    ) -> CloudFuture<'a, ServerDetails, Self::Error> {
        Box::pin(self.fetch_server(uuid))
    }

    fn wait_for_server_state<'a>(
        &'a self,
        uuid: &'a str,
        target: WaitTarget<ServerState>,
        timeout: Duration,
    ) -> CloudFuture<'a, ServerDetails, Self::Error> {
        Box::pin(async move {
            poll::poll_until(
                || self.fetch_server(uuid),
                |details| &details.state,
                &target,
                timeout,
                self.poll_interval,
                |state| UpCloudError::Timeout {
                    resource: "server",
                    uuid: uuid.to_owned(),
                    target: target.to_string(),
                    last_state: state.to_string(),
                },
            )
            .await
        })
    }

    fn stop_server<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, ServerDetails, Self::Error> {
        Box::pin(async move {
            let path = format!("/server/{uuid}/stop");
            let body = wire::StopServerBody {
                stop_server: wire::StopServer {
                    stop_type: "soft",
                    timeout: STOP_TIMEOUT_SECS.to_string(),
                },
            };
            let envelope: wire::ServerEnvelope = self
                .execute_json(
                    self.http.post(self.url(&path)).json(&body),
                    &format!("POST {path}"),
                )
                .await?;
            Ok(envelope.server.into())
        })
    }

    fn delete_server<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move { self.delete(&format!("/server/{uuid}")).await })
    }

    fn get_storage_details<'a>(
        &'a self,
        uuid: &'a str,
    ) -> CloudFuture<'a, StorageDetails, Self::Error> {
        Box::pin(self.fetch_storage(uuid))
    }

    fn delete_storage<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move { self.delete(&format!("/storage/{uuid}")).await })
    }

    fn templatize_storage<'a>(
        &'a self,
        request: &'a TemplatizeRequest,
    ) -> CloudFuture<'a, StorageDetails, Self::Error> {
        Box::pin(async move {
            let path = format!("/storage/{}/templatize", request.storage_uuid);
            let body = wire::TemplatizeBody {
                storage: wire::TemplatizeStorage {
                    title: &request.title,
                },
            };
            let envelope: wire::StorageEnvelope = self
                .execute_json(
                    self.http.post(self.url(&path)).json(&body),
                    &format!("POST {path}"),
                )
                .await?;
            Ok(envelope.storage.into())
        })
    }

    fn wait_for_storage_state<'a>(
        &'a self,
        uuid: &'a str,
        target: WaitTarget<StorageState>,
        timeout: Duration,
    ) -> CloudFuture<'a, StorageDetails, Self::Error> {
        Box::pin(async move {
            poll::poll_until(
                || self.fetch_storage(uuid),
                |details| &details.state,
                &target,
                timeout,
                self.poll_interval,
                |state| UpCloudError::Timeout {
                    resource: "storage",
                    uuid: uuid.to_owned(),
                    target: target.to_string(),
                    last_state: state.to_string(),
                },
            )
            .await
        })
    }
}
