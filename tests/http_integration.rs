//! Integration tests for the REST client using wiremock
//!
//! These tests run the production `Rpc` implementation against mocked
//! endpoints: authentication, error mapping, pagination and full lifecycle
//! calls through the reconciler.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{bearer_token, body_json, header_exists, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};
use yc_provider::cloud::auth::TokenSource;
use yc_provider::cloud::{CloudClient, Endpoint, Rpc};
use yc_provider::codec::AttributeTree;
use yc_provider::operation::PollPolicy;
use yc_provider::resource::{dispatch, fetch_all, get_resource};
use yc_provider::{CancellationToken, Deadline, ProviderContext, ProviderError, Reconciler, StatusCode};

fn client(server: &MockServer, token: &str) -> CloudClient {
    CloudClient::with_endpoint(
        TokenSource::detect(token),
        Endpoint::fixed(&server.uri()).unwrap(),
        false,
    )
    .expect("client should build")
}

fn context(server: &MockServer) -> ProviderContext {
    let mut ctx = ProviderContext::new(Arc::new(client(server, "t1.test"))).with_folder("b1gfolder");
    ctx.poll = PollPolicy {
        initial_interval: Duration::from_millis(10),
        multiplier: 1.5,
        max_interval: Duration::from_millis(50),
    };
    ctx
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(10))
}

/// Transport-level behavior
mod http_client_tests {
    use super::*;

    /// Test GET carries the bearer token, the request id and the get params
    #[tokio::test]
    async fn test_get_sends_bearer_and_request_id() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/compute/v1/instanceGroups/cl1abc"))
            .and(query_param("view", "FULL"))
            .and(bearer_token("t1.test"))
            .and(header_exists("X-Request-Id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "cl1abc", "name": "ig"})))
            .expect(1)
            .mount(&server)
            .await;

        let def = get_resource("yandex_compute_instance_group").unwrap();
        let response = client(&server, "t1.test")
            .invoke(dispatch::get(def, "cl1abc"))
            .await
            .expect("request should succeed");

        assert_eq!(response["name"], "ig");
    }

    /// Test gRPC codes in error bodies win over the HTTP status
    #[tokio::test]
    async fn test_error_body_code_is_kept() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/iam/v1/serviceAccounts/aje404"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": 5,
                "message": "Service account aje404 not found"
            })))
            .mount(&server)
            .await;

        let def = get_resource("yandex_iam_service_account").unwrap();
        let err = client(&server, "t1.test")
            .invoke(dispatch::get(def, "aje404"))
            .await
            .unwrap_err();

        assert_eq!(err.code, StatusCode::NotFound);
        assert_eq!(err.message, "Service account aje404 not found");
    }

    /// Test bodies without a code fall back to the HTTP status
    #[tokio::test]
    async fn test_http_status_mapping() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/resource-manager/v1/folders/b1g:updateAccessBindings"))
            .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/resource-manager/v1/folders/b1g"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let def = get_resource("yandex_resourcemanager_folder").unwrap();
        let client = client(&server, "t1.test");

        let err = client
            .invoke(dispatch::update_access_bindings(def, "b1g", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Aborted);
        assert!(err.code.is_conflict());

        let err = client.invoke(dispatch::get(def, "b1g")).await.unwrap_err();
        assert_eq!(err.code, StatusCode::Unavailable);
        assert_eq!(err.message, "HTTP 503");
    }

    /// Test an OAuth token is exchanged once and the IAM token is cached
    #[tokio::test]
    async fn test_oauth_token_exchange_is_cached() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/iam/v1/tokens"))
            .and(body_json(json!({"yandexPassportOauthToken": "y0_oauth"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "iamToken": "t1.exchanged",
                "expiresAt": "2099-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/resource-manager/v1/clouds/b1gcloud"))
            .and(bearer_token("t1.exchanged"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "b1gcloud"})))
            .expect(2)
            .mount(&server)
            .await;

        let def = get_resource("yandex_resourcemanager_cloud").unwrap();
        let client = client(&server, "y0_oauth");
        client.invoke(dispatch::get(def, "b1gcloud")).await.unwrap();
        client.invoke(dispatch::get(def, "b1gcloud")).await.unwrap();
    }

    /// Test failed exchange surfaces as an authentication error
    #[tokio::test]
    async fn test_rejected_oauth_token() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/iam/v1/tokens"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": 16,
                "message": "invalid OAuth token"
            })))
            .mount(&server)
            .await;

        let def = get_resource("yandex_resourcemanager_cloud").unwrap();
        let err = client(&server, "y0_bad")
            .invoke(dispatch::get(def, "b1gcloud"))
            .await
            .unwrap_err();
        assert_eq!(err.code, StatusCode::Unauthenticated);
    }
}

/// Paginated listing and name resolution
mod listing_tests {
    use super::*;

    /// Test pages are followed until no next token is returned
    #[tokio::test]
    async fn test_fetch_all_follows_page_tokens() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/resource-manager/v1/folders"))
            .and(query_param("cloudId", "b1gcloud"))
            .and(query_param_is_missing("pageToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folders": [{"id": "f1", "name": "default"}],
                "nextPageToken": "page-2"
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/resource-manager/v1/folders"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "folders": [{"id": "f2", "name": "prod"}]
            })))
            .mount(&server)
            .await;

        let ctx = context(&server);
        let def = get_resource("yandex_resourcemanager_folder").unwrap();
        let request = dispatch::list(def, Some((yc_provider::resource::ScopeKind::Cloud, "b1gcloud")), None);
        let items = fetch_all(&ctx, "list folders", request, "folders", &deadline(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["name"], "prod");
    }

    /// Test the name filter is sent and duplicate names are rejected
    #[tokio::test]
    async fn test_data_source_by_ambiguous_name() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/iam/v1/serviceAccounts"))
            .and(query_param("folderId", "b1gfolder"))
            .and(query_param("filter", "name=\"robot\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "serviceAccounts": [
                    {"id": "aje1", "name": "robot"},
                    {"id": "aje2", "name": "robot"}
                ]
            })))
            .mount(&server)
            .await;

        let ctx = context(&server);
        let mut query = AttributeTree::new();
        query.set("name", "robot");

        let err = Reconciler::new(&ctx, "yandex_iam_service_account")
            .unwrap()
            .read_data_source(&query, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AmbiguousName { count: 2, .. }));
    }
}

/// Full lifecycle calls through the reconciler
mod lifecycle_tests {
    use super::*;

    /// Test create waits for the operation and reads the object back
    #[tokio::test]
    async fn test_create_service_account() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/iam/v1/serviceAccounts"))
            .and(body_json(json!({
                "folderId": "b1gfolder",
                "name": "robot",
                "description": "deployer"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op1",
                "description": "Create service account",
                "done": false,
                "metadata": {"serviceAccountId": "aje1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/operations/op1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op1",
                "done": true,
                "response": {"id": "aje1", "folderId": "b1gfolder", "name": "robot"}
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/iam/v1/serviceAccounts/aje1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "aje1",
                "folderId": "b1gfolder",
                "name": "robot",
                "description": "deployer",
                "createdAt": "2024-03-01T10:00:00.123Z"
            })))
            .mount(&server)
            .await;

        let ctx = context(&server);
        let mut desired = AttributeTree::new();
        desired.set("name", "robot");
        desired.set("description", "deployer");

        let (id, state) = Reconciler::new(&ctx, "yandex_iam_service_account")
            .unwrap()
            .create(&desired, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(id, "aje1");
        assert_eq!(state.get_str("service_account_id"), Some("aje1"));
        assert_eq!(state.get_str("folder_id"), Some("b1gfolder"));
        assert_eq!(state.get_str("created_at"), Some("2024-03-01T10:00:00Z"));
    }

    /// Test a failed operation reports the remote code and message
    #[tokio::test]
    async fn test_create_operation_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/iam/v1/serviceAccounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "op2",
                "done": true,
                "error": {"code": 6, "message": "Service account with name robot already exists"}
            })))
            .mount(&server)
            .await;

        let ctx = context(&server);
        let mut desired = AttributeTree::new();
        desired.set("name", "robot");

        let err = Reconciler::new(&ctx, "yandex_iam_service_account")
            .unwrap()
            .create(&desired, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            ProviderError::RemoteOperationFailed { operation_id, code, message, .. } => {
                assert_eq!(operation_id, "op2");
                assert_eq!(code, StatusCode::AlreadyExists);
                assert!(message.contains("already exists"));
            }
            other => panic!("expected remote failure, got {other:?}"),
        }
    }

    /// Test delete of an object that is already gone succeeds
    #[tokio::test]
    async fn test_delete_missing_object_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/iam/v1/serviceAccounts/aje404"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": 5,
                "message": "not found"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = context(&server);
        Reconciler::new(&ctx, "yandex_iam_service_account")
            .unwrap()
            .delete("aje404", &CancellationToken::new())
            .await
            .expect("delete of a missing object should succeed");
    }

    /// Test reading a missing cloud is not an error
    #[tokio::test]
    async fn test_read_missing_object_is_gone() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/resource-manager/v1/clouds/b1gnone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ctx = context(&server);
        let outcome = Reconciler::new(&ctx, "yandex_resourcemanager_cloud")
            .unwrap()
            .read("b1gnone", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, yc_provider::ReadOutcome::Gone);
    }
}
