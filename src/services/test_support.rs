//! Canned-response S3 client used by unit tests.

use crate::{config::StorageConfig, services::storage_service::{ObjectStore, sdk_config}};
use aws_sdk_s3::Client;
use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
use aws_smithy_runtime_api::client::{
    http::{
        HttpClient, HttpConnector, HttpConnectorFuture, HttpConnectorSettings,
        SharedHttpConnector,
    },
    orchestrator::{HttpRequest, HttpResponse},
    result::ConnectorError,
    runtime_components::RuntimeComponents,
};
use aws_smithy_types::body::SdkBody;
use http_body_util::BodyExt;
use std::sync::{Arc, Mutex};

pub fn test_storage_config() -> StorageConfig {
    StorageConfig {
        endpoint: "http://localhost:9000".into(),
        access_key_id: "test-access-key".into(),
        secret_access_key: "test-secret-key".into(),
        region: "us-east-1".into(),
        bucket: "test-bucket".into(),
        use_ssl: false,
        operation_timeout: None,
    }
}

/// Store whose requests are answered, in order, by `events`.
pub fn replay_store(events: Vec<ReplayEvent>) -> (ObjectStore, StaticReplayClient) {
    let http = StaticReplayClient::new(events);
    let config = test_storage_config();
    let sdk = sdk_config(&config).http_client(http.clone()).build();
    (ObjectStore::from_client(Client::from_conf(sdk), &config), http)
}

pub fn empty() -> SdkBody {
    SdkBody::empty()
}

pub fn response(status: u16, body: impl Into<SdkBody>) -> ReplayEvent {
    response_with_headers(status, &[], body)
}

pub fn response_with_headers(
    status: u16,
    headers: &[(&str, &str)],
    body: impl Into<SdkBody>,
) -> ReplayEvent {
    let request = http::Request::builder()
        .uri("http://localhost:9000/")
        .body(SdkBody::empty())
        .unwrap();

    let mut builder = http::Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    ReplayEvent::new(request, builder.body(body.into()).unwrap())
}

/// One request as seen by [`BodyReadingClient`], body fully drained.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub method: String,
    pub uri: String,
    pub content_length: Option<String>,
    /// Collected body bytes, or the error the body stream produced.
    pub body: Result<Vec<u8>, String>,
}

/// HTTP client that drains every request body before answering `200`.
/// A body error fails the call the way a dropped connection would.
#[derive(Debug, Clone, Default)]
pub struct BodyReadingClient {
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
}

impl BodyReadingClient {
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }
}

impl HttpConnector for BodyReadingClient {
    fn call(&self, request: HttpRequest) -> HttpConnectorFuture {
        let received = self.received.clone();
        HttpConnectorFuture::new(async move {
            let method = request.method().to_string();
            let uri = request.uri().to_string();
            let content_length = request.headers().get("content-length").map(str::to_string);
            let body = request
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes().to_vec());

            let outcome = match &body {
                Ok(_) => Ok(HttpResponse::new(
                    200u16.try_into().unwrap(),
                    SdkBody::empty(),
                )),
                Err(err) => Err(ConnectorError::io(err.to_string().into())),
            };
            received.lock().unwrap().push(ReceivedRequest {
                method,
                uri,
                content_length,
                body: body.map_err(|err| err.to_string()),
            });
            outcome
        })
    }
}

impl HttpClient for BodyReadingClient {
    fn http_connector(
        &self,
        _settings: &HttpConnectorSettings,
        _components: &RuntimeComponents,
    ) -> SharedHttpConnector {
        SharedHttpConnector::new(self.clone())
    }
}

/// Store backed by a [`BodyReadingClient`].
pub fn body_reading_store() -> (ObjectStore, BodyReadingClient) {
    let http = BodyReadingClient::default();
    let config = test_storage_config();
    let sdk = sdk_config(&config).http_client(http.clone()).build();
    (ObjectStore::from_client(Client::from_conf(sdk), &config), http)
}
