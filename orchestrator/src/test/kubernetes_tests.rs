//! Tests for [`crate::backend::kubernetes`], run against an in-process fake
//! API server.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use test_env_log::test;

use super::util::temp_dir;
use crate::{
    backend::{
        kubernetes::{ClusterAccess, KubernetesBackend},
        model::TIMEOUT_MESSAGE,
        ConfigMapData, JobBackend, JobSpecBuilder,
    },
    config::{KubernetesConfig, ServiceConfig},
    runner::RunnerService,
};

const NAMESPACE: &str = "exercism-test-runners";
const TOKEN: &str = "secret-token";

#[derive(Default)]
struct FakeCluster {
    authorization: Vec<String>,
    config_maps: Vec<Value>,
    deleted_config_maps: Vec<String>,
    jobs: Vec<Value>,
    /// Job statuses answered in order; the last one repeats
    statuses: VecDeque<Value>,
    status_reads: usize,
    label_selectors: Vec<String>,
    pods: Vec<String>,
    logs: String,
}

type Shared = Arc<Mutex<FakeCluster>>;

fn record_auth(cluster: &Shared, headers: &HeaderMap) {
    if let Some(v) = headers.get("authorization") {
        cluster
            .lock()
            .unwrap()
            .authorization
            .push(v.to_str().unwrap().to_owned());
    }
}

async fn list_namespaces(State(cluster): State<Shared>, headers: HeaderMap) -> Json<Value> {
    record_auth(&cluster, &headers);
    Json(json!({"kind": "NamespaceList", "items": []}))
}

async fn create_config_map(
    State(cluster): State<Shared>,
    Path(ns): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    assert_eq!(ns, NAMESPACE);
    record_auth(&cluster, &headers);
    cluster.lock().unwrap().config_maps.push(body.clone());
    (StatusCode::CREATED, Json(body))
}

async fn delete_config_map(
    State(cluster): State<Shared>,
    Path((ns, name)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    assert_eq!(ns, NAMESPACE);
    let mut cluster = cluster.lock().unwrap();
    let exists = cluster
        .config_maps
        .iter()
        .any(|cm| cm["metadata"]["name"] == name.as_str());
    if !exists {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"message": format!("configmaps \"{}\" not found", name)})),
        );
    }
    cluster.deleted_config_maps.push(name);
    (StatusCode::OK, Json(json!({"status": "Success"})))
}

async fn create_job(
    State(cluster): State<Shared>,
    Path(ns): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    assert_eq!(ns, NAMESPACE);
    cluster.lock().unwrap().jobs.push(body.clone());
    (StatusCode::CREATED, Json(body))
}

async fn job_status(
    State(cluster): State<Shared>,
    Path((_ns, _name)): Path<(String, String)>,
) -> Json<Value> {
    let mut cluster = cluster.lock().unwrap();
    cluster.status_reads += 1;
    let status = if cluster.statuses.len() > 1 {
        cluster.statuses.pop_front().unwrap()
    } else {
        cluster.statuses.front().cloned().unwrap_or_else(|| json!({}))
    };
    Json(json!({ "status": status }))
}

async fn list_pods(
    State(cluster): State<Shared>,
    Path(_ns): Path<String>,
    Query(query): Query<std::collections::HashMap<String, String>>,
) -> Json<Value> {
    let mut cluster = cluster.lock().unwrap();
    cluster
        .label_selectors
        .push(query.get("labelSelector").cloned().unwrap_or_default());
    let items: Vec<Value> = cluster
        .pods
        .iter()
        .map(|p| json!({"metadata": {"name": p}}))
        .collect();
    Json(json!({ "items": items }))
}

async fn pod_log(
    State(cluster): State<Shared>,
    Path((_ns, pod)): Path<(String, String)>,
) -> Result<String, StatusCode> {
    let cluster = cluster.lock().unwrap();
    if cluster.pods.contains(&pod) {
        Ok(cluster.logs.clone())
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn start_fake_cluster(cluster: FakeCluster) -> (SocketAddr, Shared) {
    let shared = Arc::new(Mutex::new(cluster));
    let app = Router::new()
        .route("/api/v1/namespaces", get(list_namespaces))
        .route("/api/v1/namespaces/:ns/configmaps", post(create_config_map))
        .route(
            "/api/v1/namespaces/:ns/configmaps/:name",
            delete(delete_config_map),
        )
        .route("/apis/batch/v1/namespaces/:ns/jobs", post(create_job))
        .route(
            "/apis/batch/v1/namespaces/:ns/jobs/:name/status",
            get(job_status),
        )
        .route("/api/v1/namespaces/:ns/pods", get(list_pods))
        .route("/api/v1/namespaces/:ns/pods/:pod/log", get(pod_log))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (addr, shared)
}

fn backend_for(addr: SocketAddr) -> KubernetesBackend {
    KubernetesBackend::new(
        ClusterAccess {
            api_server: format!("http://{}", addr),
            token: Some(TOKEN.into()),
            ca_cert: None,
        },
        &KubernetesConfig {
            namespace: NAMESPACE.into(),
            ..Default::default()
        },
    )
    .unwrap()
    .with_wait(Duration::from_secs(5), Duration::from_millis(10))
}

fn job_spec() -> crate::backend::JobSpec {
    JobSpecBuilder::default()
        .name("test")
        .image("test-image")
        .command(vec!["echo".to_string(), "hello".to_string()])
        .env(vec![("VAR".to_string(), "value".to_string())])
        .timeout(Duration::from_secs(120))
        .build()
        .unwrap()
}

#[test(tokio::test)]
async fn connection_check_sends_the_token() {
    let (addr, cluster) = start_fake_cluster(FakeCluster::default()).await;
    let backend = backend_for(addr);

    assert!(backend.is_connected().await);
    assert_eq!(
        cluster.lock().unwrap().authorization,
        vec![format!("Bearer {}", TOKEN)]
    );
}

#[test(tokio::test)]
async fn unreachable_api_server_is_not_connected() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(!backend_for(addr).is_connected().await);
}

#[test(tokio::test)]
async fn creates_config_maps() {
    let (addr, cluster) = start_fake_cluster(FakeCluster::default()).await;
    let backend = backend_for(addr);

    let mut data = ConfigMapData::new();
    data.insert("key".into(), "value".into());
    let name = backend.create_config_map("test", data).await.unwrap();
    assert!(name.starts_with("test-"));

    let cluster = cluster.lock().unwrap();
    assert_eq!(
        cluster.config_maps,
        vec![json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name},
            "data": {"key": "value"},
        })]
    );
}

#[test(tokio::test)]
async fn creates_jobs() {
    let (addr, cluster) = start_fake_cluster(FakeCluster::default()).await;
    let backend = backend_for(addr);

    let name = backend.create_job(job_spec()).await.unwrap();
    assert!(name.starts_with("test-"));

    let cluster = cluster.lock().unwrap();
    let job = &cluster.jobs[0];
    assert_eq!(job["metadata"]["name"], name.as_str());
    assert_eq!(job["spec"]["backoffLimit"], 0);
    assert_eq!(job["spec"]["ttlSecondsAfterFinished"], 300);
    assert_eq!(job["spec"]["activeDeadlineSeconds"], 120);

    let template = &job["spec"]["template"];
    assert_eq!(template["metadata"]["labels"]["app"], name.as_str());
    assert_eq!(template["spec"]["restartPolicy"], "Never");
    let container = &template["spec"]["containers"][0];
    assert_eq!(container["name"], "test-runner");
    assert_eq!(container["image"], "test-image");
    assert_eq!(container["command"], json!(["echo", "hello"]));
    assert_eq!(container["env"], json!([{"name": "VAR", "value": "value"}]));
}

#[test(tokio::test)]
async fn waits_for_successful_jobs() {
    let (addr, cluster) = start_fake_cluster(FakeCluster {
        statuses: vec![json!({"active": 1}), json!({"active": 1}), json!({"succeeded": 1})]
            .into(),
        pods: vec!["test-pod".into()],
        logs: "Test logs".into(),
        ..Default::default()
    })
    .await;
    let backend = backend_for(addr);

    let outcome = backend.wait_for_job_completion("test-job").await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.logs, "Test logs");

    let cluster = cluster.lock().unwrap();
    assert_eq!(cluster.status_reads, 3);
    assert_eq!(cluster.label_selectors, vec!["app=test-job".to_string()]);
}

#[test(tokio::test)]
async fn waits_for_failed_jobs() {
    let (addr, _cluster) = start_fake_cluster(FakeCluster {
        statuses: vec![json!({"failed": 1})].into(),
        pods: vec!["test-pod".into()],
        logs: "Error logs".into(),
        ..Default::default()
    })
    .await;

    let outcome = backend_for(addr)
        .wait_for_job_completion("test-job")
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.logs, "Error logs");
}

#[test(tokio::test)]
async fn reports_missing_pods() {
    let (addr, _cluster) = start_fake_cluster(FakeCluster {
        statuses: vec![json!({"succeeded": 1})].into(),
        ..Default::default()
    })
    .await;

    let outcome = backend_for(addr)
        .wait_for_job_completion("test-job")
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.logs, "No pods found for the job");
}

#[test(tokio::test)]
async fn gives_up_waiting_after_the_timeout() {
    let (addr, _cluster) = start_fake_cluster(FakeCluster {
        statuses: vec![json!({"active": 1})].into(),
        ..Default::default()
    })
    .await;

    let outcome = backend_for(addr)
        .with_wait(Duration::from_millis(50), Duration::from_millis(10))
        .wait_for_job_completion("test-job")
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.logs, TIMEOUT_MESSAGE);
}

#[test(tokio::test)]
async fn deleting_missing_config_maps_is_an_api_error() {
    let (addr, _cluster) = start_fake_cluster(FakeCluster::default()).await;

    let err = backend_for(addr)
        .delete_config_map("missing")
        .await
        .unwrap_err();
    assert!(
        matches!(err, crate::backend::BackendError::Api { status: 404, .. }),
        "{}",
        err
    );
}

#[test(tokio::test)]
async fn runs_tests_end_to_end() {
    let (addr, cluster) = start_fake_cluster(FakeCluster {
        statuses: vec![json!({"active": 1}), json!({"succeeded": 1})].into(),
        pods: vec!["python-test-pod".into()],
        logs: "collecting...\n{\"status\": \"pass\", \"tests\": [{\"name\": \"test_hello\", \"status\": \"pass\"}]}\n".into(),
        ..Default::default()
    })
    .await;
    let runner = RunnerService::new(
        Arc::new(backend_for(addr)),
        Arc::new(ServiceConfig::default()),
    );

    let result = runner
        .run_tests(
            "python",
            "def hello():\n    return \"Hello, World!\"\n",
            &json!({"version": 1, "test_files": ["test_hello.py"]}),
        )
        .await
        .unwrap();
    assert_eq!(
        result,
        json!({"status": "pass", "tests": [{"name": "test_hello", "status": "pass"}]})
    );

    let cluster = cluster.lock().unwrap();
    let cm_name = cluster.config_maps[0]["metadata"]["name"]
        .as_str()
        .unwrap()
        .to_owned();
    assert_eq!(cluster.deleted_config_maps, vec![cm_name.clone()]);

    let volume = &cluster.jobs[0]["spec"]["template"]["spec"]["volumes"][0];
    assert_eq!(volume, &json!({"name": "test-files", "configMap": {"name": cm_name}}));
    let mount = &cluster.jobs[0]["spec"]["template"]["spec"]["containers"][0]["volumeMounts"][0];
    assert_eq!(mount, &json!({"name": "test-files", "mountPath": "/mnt/exercise"}));
}

#[test]
fn resolves_explicit_api_server() {
    let cfg = KubernetesConfig {
        api_server: Some("https://10.0.0.1:6443/".into()),
        token: Some(TOKEN.into()),
        ..Default::default()
    };
    let access = ClusterAccess::resolve(&cfg, |_| None, temp_dir().path()).unwrap();
    assert_eq!(
        access,
        ClusterAccess {
            api_server: "https://10.0.0.1:6443".into(),
            token: Some(TOKEN.into()),
            ca_cert: None,
        }
    );
}

#[test]
fn resolves_in_cluster_access() {
    let sa_dir = temp_dir();
    std::fs::write(sa_dir.path().join("token"), "in-cluster-token\n").unwrap();

    let env = |k: &str| match k {
        "KUBERNETES_SERVICE_HOST" => Some("10.96.0.1".to_string()),
        "KUBERNETES_SERVICE_PORT" => Some("443".to_string()),
        _ => None,
    };
    let access = ClusterAccess::resolve(&KubernetesConfig::default(), env, sa_dir.path()).unwrap();
    assert_eq!(access.api_server, "https://10.96.0.1:443");
    assert_eq!(access.token.as_deref(), Some("in-cluster-token"));
    assert_eq!(access.ca_cert, None);

    let err = ClusterAccess::resolve(&KubernetesConfig::default(), |_| None, sa_dir.path()).unwrap_err();
    assert!(matches!(err, crate::backend::BackendError::Config(_)));
}
