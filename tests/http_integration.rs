//! Integration tests for the Container API client using wiremock
//!
//! These tests verify request shapes (paths, verbs, bodies) and error
//! classification against mocked GKE endpoints, and drive one full create
//! through the reconciler over HTTP.

use serde_json::json;
use wiremock::matchers::{bearer_token, body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gkepool::gcp::auth::GcpCredentials;
use gkepool::gcp::client::GcpClient;
use gkepool::gcp::container::{ContainerApi, Mutation, NodePoolAutoscaling, RPC_NOT_FOUND};
use gkepool::nodepool::{ClusterId, NodePoolId};

const POOL_PATH: &str = "/v1/projects/my-project/locations/us-central1/clusters/c/nodePools/a";

fn client(server: &MockServer) -> GcpClient {
    GcpClient::with_endpoint(GcpCredentials::from_static_token("test-token"), &server.uri())
        .expect("endpoint should be valid")
}

fn pool_id() -> NodePoolId {
    NodePoolId::parse("my-project/us-central1/c/a", None).unwrap()
}

fn operation(name: &str, status: &str) -> serde_json::Value {
    json!({"name": name, "operationType": "CREATE_NODE_POOL", "status": status})
}

mod container_api_tests {
    use super::*;

    /// Node pool reads go to the v1 path with the bearer token
    #[tokio::test]
    async fn test_get_node_pool_decodes_status() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(POOL_PATH))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "a",
                "initialNodeCount": 3,
                "status": "RECONCILING",
                "management": {"autoUpgrade": true, "autoRepair": true}
            })))
            .mount(&server)
            .await;

        let pool = client(&server).get_node_pool(&pool_id()).await.unwrap();

        assert_eq!(pool.status.as_deref(), Some("RECONCILING"));
        assert_eq!(pool.initial_node_count, Some(3));
        assert!(pool.management.unwrap().auto_repair);
    }

    /// A missing node pool is a 404 ApiError, not a decode failure
    #[tokio::test]
    async fn test_missing_node_pool_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(POOL_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "Not found: a", "status": "NOT_FOUND"}
            })))
            .mount(&server)
            .await;

        let err = client(&server).get_node_pool(&pool_id()).await.unwrap_err();

        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    /// Create posts the pool wrapped in `nodePool` to the cluster's collection
    #[tokio::test]
    async fn test_create_request_shape() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/projects/my-project/locations/us-central1/clusters/c/nodePools"))
            .and(body_partial_json(json!({"nodePool": {"name": "a", "initialNodeCount": 2}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-create", "RUNNING")))
            .expect(1)
            .mount(&server)
            .await;

        let mutation = Mutation::CreateNodePool {
            target: pool_id(),
            node_pool: gkepool::gcp::container::NodePool {
                name: "a".to_string(),
                initial_node_count: Some(2),
                ..Default::default()
            },
        };
        let op = client(&server).issue(&mutation).await.unwrap();

        assert_eq!(op.name, "op-create");
    }

    /// setSize is a custom method on the node pool
    #[tokio::test]
    async fn test_set_size_request_shape() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(format!("{}:setSize", POOL_PATH)))
            .and(body_json(json!({"nodeCount": 5})))
            .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-size", "PENDING")))
            .expect(1)
            .mount(&server)
            .await;

        let mutation = Mutation::SetSize {
            target: pool_id(),
            node_count: 5,
        };
        let op = client(&server).issue(&mutation).await.unwrap();

        assert_eq!(op.name, "op-size");
    }

    /// Autoscaling goes through a cluster update naming the pool
    #[tokio::test]
    async fn test_autoscaling_is_a_cluster_update() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v1/projects/my-project/locations/us-central1/clusters/c"))
            .and(body_partial_json(json!({
                "update": {
                    "desiredNodePoolId": "a",
                    "desiredNodePoolAutoscaling": {"enabled": true, "minNodeCount": 0, "maxNodeCount": 4}
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-scale", "RUNNING")))
            .expect(1)
            .mount(&server)
            .await;

        let mutation = Mutation::SetAutoscaling {
            target: pool_id(),
            autoscaling: NodePoolAutoscaling {
                enabled: true,
                min_node_count: 0,
                max_node_count: 4,
                ..Default::default()
            },
        };
        client(&server).issue(&mutation).await.unwrap();
    }

    /// A busy cluster answers 400 failedPrecondition, which is retryable
    #[tokio::test]
    async fn test_failed_precondition_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path(POOL_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "code": 400,
                    "message": "Cluster is running incompatible operation operation-123",
                    "status": "FAILED_PRECONDITION",
                    "errors": [{"reason": "failedPrecondition"}]
                }
            })))
            .mount(&server)
            .await;

        let mutation = Mutation::DeleteNodePool { target: pool_id() };
        let err = client(&server).issue(&mutation).await.unwrap_err();

        assert_eq!(err.status, 400);
        assert!(err.is_failed_precondition());
        assert!(err.message.contains("incompatible operation"));
    }

    /// Operations are fetched by name under the location
    #[tokio::test]
    async fn test_get_operation_with_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/projects/my-project/locations/us-central1/operations/op-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "op-1",
                "status": "DONE",
                "error": {"code": 5, "message": "node pool a not found"}
            })))
            .mount(&server)
            .await;

        let op = client(&server)
            .get_operation("my-project", "us-central1", "op-1")
            .await
            .unwrap();

        let failure = op.failure().expect("operation should have failed");
        assert_eq!(failure.code, Some(RPC_NOT_FOUND));
    }

    /// Cluster reads carry the status used for resting-state waits
    #[tokio::test]
    async fn test_get_cluster() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/projects/my-project/locations/us-central1/clusters/c"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"name": "c", "status": "DEGRADED"})),
            )
            .mount(&server)
            .await;

        let cluster_id = ClusterId::new("my-project", "us-central1", "c").unwrap();
        let cluster = client(&server).get_cluster(&cluster_id).await.unwrap();

        assert_eq!(cluster.status.as_deref(), Some("DEGRADED"));
    }

    /// Server errors are classified as transient
    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/projects/my-project/locations/us-central1/operations/op-1"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_operation("my-project", "us-central1", "op-1")
            .await
            .unwrap_err();

        assert_eq!(err.status, 503);
        assert!(err.is_retryable());
    }
}

mod reconcile_over_http_tests {
    use super::*;
    use gkepool::nodepool::NodePoolSpec;
    use gkepool::reconcile::{Backoff, MutexStore, NodePoolReconciler, SystemClock};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn reconciler(server: &MockServer) -> NodePoolReconciler {
        NodePoolReconciler::new(
            Arc::new(client(server)),
            Arc::new(MutexStore::new()),
            Arc::new(SystemClock),
            Backoff::new(Duration::from_millis(10), Duration::from_millis(50)),
            CancellationToken::new(),
        )
    }

    /// Create: prefetch 404, POST, poll the operation, wait for RUNNING
    #[tokio::test]
    async fn test_create_end_to_end() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(POOL_PATH))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": 404, "message": "Not found", "status": "NOT_FOUND"}
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(POOL_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "a", "initialNodeCount": 1, "status": "RUNNING"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/my-project/locations/us-central1/clusters/c/nodePools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-1", "RUNNING")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/my-project/locations/us-central1/operations/op-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-1", "RUNNING")))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/my-project/locations/us-central1/operations/op-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(operation("op-1", "DONE")))
            .mount(&server)
            .await;

        let spec = NodePoolSpec::from_yaml(
            "name: a\ncluster: c\nproject: my-project\nlocation: us-central1\ninitial_node_count: 1\n",
        )
        .unwrap();
        let id = spec.identity(None, None).unwrap();

        let state = reconciler(&server)
            .create(&id, &spec, Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(state.status.as_deref(), Some("RUNNING"));
        assert_eq!(state.operation, None);
        assert_eq!(state.id, id.full_name());
    }

    /// Delete of a pool that is already gone issues no DELETE
    #[tokio::test]
    async fn test_delete_absent_pool() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/projects/my-project/locations/us-central1/clusters/c"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"name": "c", "status": "RUNNING"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(POOL_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let deletion = reconciler(&server)
            .delete(&pool_id(), Duration::from_secs(30))
            .await
            .unwrap();

        assert_eq!(deletion, gkepool::reconcile::Deletion::AlreadyAbsent);
    }
}
