use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use jobba_api::{Route, Server, ServerConfig, ServerError};
use jobba_core::{Job, TaskDescriptor};
use jobba_engine::MemoryEngine;

struct TestServer {
    base_url: String,
    server: Arc<Server>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn spawn(routes: Vec<Route>, tasks: Vec<TaskDescriptor>) -> Self {
        let server = Server::new(ServerConfig::default(), MemoryEngine::arc(), routes, tasks)
            .await
            .expect("server initialises");
        let server = Arc::new(server);

        // Same router as prod, bound to an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let (tx, rx) = oneshot::channel::<()>();
        let srv = server.clone();
        let handle = tokio::spawn(async move {
            srv.serve(listener, async {
                let _ = rx.await;
            })
            .await
        });

        // serve flips the phase before binding the router; wait for it.
        for _ in 0..100 {
            if server.phase() == jobba_api::server::Phase::Listening {
                break;
            }
            tokio::task::yield_now().await;
        }

        Self {
            base_url,
            server,
            shutdown: Some(tx),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.abort();
    }
}

fn email_task() -> TaskDescriptor {
    TaskDescriptor::new("email", |job: Job| async move {
        job.info(["sending"]).await?;
        Ok(json!({"sent": true}))
    })
}

fn flaky_task() -> TaskDescriptor {
    TaskDescriptor::new("flaky", |_job: Job| async move {
        Err::<Value, _>(anyhow::anyhow!("smtp refused"))
    })
}

async fn schedule(client: &reqwest::Client, srv: &TestServer, task: &str, body: Value) -> String {
    let res = client
        .post(srv.url(&format!("/tasks/{task}")))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["task"], task);
    body["job_id"].as_str().unwrap().to_string()
}

async fn job_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    task: &str,
    job_id: &str,
    status: &str,
) -> Value {
    // Processing happens on engine workers; poll briefly until the job settles.
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/tasks/{task}/jobs/{job_id}")))
            .send()
            .await
            .unwrap();

        if res.status() == StatusCode::OK {
            let job: Value = res.json().await.unwrap();
            if job["status"] == status {
                return job;
            }
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {job_id} did not reach `{status}` within timeout");
}

#[tokio::test]
async fn status_check_returns_true() {
    let srv = TestServer::spawn(Vec::new(), Vec::new()).await;

    let res = reqwest::get(srv.url("/")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!(true));
}

#[tokio::test]
async fn route_table_lists_registered_and_synthetic_routes() {
    let custom = Route::post("/hooks/mail", |_ctx| async { "ok" }).describe("Mail webhook.");
    let srv = TestServer::spawn(vec![custom], Vec::new()).await;

    let res = reqwest::get(srv.url("/routes")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let routes: Vec<Value> = res.json().await.unwrap();

    assert!(routes.contains(&json!({"path": "/", "method": "GET", "description": "Status check."})));
    assert!(routes.contains(
        &json!({"path": "/hooks/mail", "method": "POST", "description": "Mail webhook."})
    ));
    assert!(routes.iter().any(|r| r["path"] == "/routes" && r["method"] == "GET"));
    assert!(routes.iter().all(|r| r.get("handler").is_none()));
    assert_eq!(routes.len(), srv.server.routes().len());
}

#[tokio::test]
async fn email_job_end_to_end() {
    let srv = TestServer::spawn(Vec::new(), vec![email_task()]).await;
    let client = reqwest::Client::new();

    let job_id = schedule(&client, &srv, "email", json!({"data": {"to": "a@b.com"}})).await;
    let job = job_eventually(&client, &srv, "email", &job_id, "completed").await;

    assert_eq!(job["return_value"], json!({"sent": true}));
    assert_eq!(job["params"], json!({"to": "a@b.com"}));
    let logs = job["data"]["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["level"], "info");
    assert_eq!(logs[0]["body"], json!(["sending"]));

    let res = client
        .get(srv.url(&format!("/tasks/email/jobs/{job_id}/state")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({"state": "completed"}));
}

#[tokio::test]
async fn scheduling_unknown_task_is_not_found() {
    let srv = TestServer::spawn(Vec::new(), vec![email_task()]).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/tasks/sms"))
        .json(&json!({"data": {}}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unknown_task");
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let srv = TestServer::spawn(Vec::new(), vec![email_task()]).await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/tasks/email"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let config = ServerConfig {
        body_limit: 16,
        ..ServerConfig::default()
    };
    let server = Arc::new(
        Server::new(config, MemoryEngine::arc(), Vec::new(), vec![email_task()])
            .await
            .unwrap(),
    );
    let router = server.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move { axum::serve(listener, router).await });

    let res = reqwest::Client::new()
        .post(format!("http://{addr}/tasks/email"))
        .json(&json!({"data": {"to": "someone-with-a-long-address@example.com"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    handle.abort();
}

#[tokio::test]
async fn failed_job_can_be_retried_but_not_twice_while_waiting() {
    let srv = TestServer::spawn(Vec::new(), vec![flaky_task()]).await;
    let client = reqwest::Client::new();

    let job_id = schedule(&client, &srv, "flaky", json!({"data": 1})).await;
    let job = job_eventually(&client, &srv, "flaky", &job_id, "failed").await;
    assert_eq!(job["failed_reason"], "smtp refused");

    let res = client
        .get(srv.url("/tasks/flaky/jobs?status=failed"))
        .send()
        .await
        .unwrap();
    let failed: Vec<Value> = res.json().await.unwrap();
    assert_eq!(failed.len(), 1);

    let res = client
        .post(srv.url(&format!("/tasks/flaky/jobs/{job_id}/retry")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    job_eventually(&client, &srv, "flaky", &job_id, "failed").await;

    let res = client
        .post(srv.url(&format!("/tasks/flaky/jobs/{job_id}/promote")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_transition");
}

#[tokio::test]
async fn delayed_job_can_be_promoted_and_removed() {
    let srv = TestServer::spawn(Vec::new(), vec![email_task()]).await;
    let client = reqwest::Client::new();

    let job_id = schedule(
        &client,
        &srv,
        "email",
        json!({"data": {"to": "a@b.com"}, "options": {"delay_ms": 60000}}),
    )
    .await;
    job_eventually(&client, &srv, "email", &job_id, "delayed").await;

    let res = client
        .put(srv.url(&format!("/tasks/email/jobs/{job_id}/progress")))
        .json(&json!({"progress": 10}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .post(srv.url(&format!("/tasks/email/jobs/{job_id}/promote")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    job_eventually(&client, &srv, "email", &job_id, "completed").await;

    let res = client
        .delete(srv.url(&format!("/tasks/email/jobs/{job_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(srv.url(&format!("/tasks/email/jobs/{job_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "job_not_found");
}

#[tokio::test]
async fn task_listing_reports_counts() {
    let srv = TestServer::spawn(Vec::new(), vec![email_task(), flaky_task()]).await;
    let client = reqwest::Client::new();

    let job_id = schedule(&client, &srv, "email", json!({"data": {}})).await;
    job_eventually(&client, &srv, "email", &job_id, "completed").await;

    let tasks: Vec<Value> = client
        .get(srv.url("/tasks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["id"], "email");
    assert_eq!(tasks[0]["counts"]["completed"], 1);
    assert_eq!(tasks[1]["id"], "flaky");
    assert_eq!(tasks[1]["counts"]["waiting"], 0);
}

#[tokio::test]
async fn duplicate_route_keeps_first_registration() {
    let first = Route::get("/dup", |_ctx| async { Json(json!("first")) }).describe("First.");
    let second = Route::get("/dup", |_ctx| async { Json(json!("second")) }).describe("Second.");
    let srv = TestServer::spawn(vec![first, second], Vec::new()).await;

    let body: Value = reqwest::get(srv.url("/dup")).await.unwrap().json().await.unwrap();
    assert_eq!(body, json!("first"));
}

#[tokio::test]
async fn handlers_see_params_query_and_body() {
    let echo = Route::post("/echo/:name", |ctx| async move {
        Json(json!({
            "name": ctx.param("name"),
            "verbose": ctx.query("verbose"),
            "body": ctx.body,
            "tasks": ctx.tasks.task_ids(),
        }))
    });
    let srv = TestServer::spawn(vec![echo], vec![email_task()]).await;

    let body: Value = reqwest::Client::new()
        .post(srv.url("/echo/ada?verbose=1"))
        .json(&json!({"n": 1}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(
        body,
        json!({"name": "ada", "verbose": "1", "body": {"n": 1}, "tasks": ["email"]})
    );
}

#[tokio::test]
async fn late_registration_and_second_start_are_rejected() {
    let srv = TestServer::spawn(Vec::new(), Vec::new()).await;

    let err = srv
        .server
        .register(Route::get("/late", |_ctx| async { "late" }))
        .unwrap_err();
    assert!(matches!(err, ServerError::AlreadyListening));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let err = srv.server.serve(listener, async {}).await.unwrap_err();
    assert!(matches!(err, ServerError::AlreadyStarted));

    let res = reqwest::get(srv.url("/late")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn scheduling_honours_per_job_options() {
    let srv = TestServer::spawn(Vec::new(), vec![flaky_task()]).await;
    let client = reqwest::Client::new();

    let job_id = schedule(
        &client,
        &srv,
        "flaky",
        json!({"data": null, "options": {"attempts": 2}}),
    )
    .await;

    let job = job_eventually(&client, &srv, "flaky", &job_id, "failed").await;
    assert_eq!(job["attempts_made"], 2);
}

#[tokio::test]
async fn discarded_job_is_not_retried() {
    let srv = TestServer::spawn(Vec::new(), vec![flaky_task()]).await;
    let client = reqwest::Client::new();

    let job_id = schedule(
        &client,
        &srv,
        "flaky",
        json!({"data": null, "options": {"attempts": 3, "delay_ms": 60000}}),
    )
    .await;
    job_eventually(&client, &srv, "flaky", &job_id, "delayed").await;

    let res = client
        .post(srv.url(&format!("/tasks/flaky/jobs/{job_id}/discard")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .post(srv.url(&format!("/tasks/flaky/jobs/{job_id}/promote")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let job = job_eventually(&client, &srv, "flaky", &job_id, "failed").await;
    assert_eq!(job["attempts_made"], 1);
    assert_eq!(job["discarded"], true);
}

#[tokio::test]
async fn later_static_route_does_not_shadow_task_routes() {
    let shadow = Route::post("/tasks/email", |_ctx| async { Json(json!("custom")) });
    let extra = Route::get("/tasks/email", |_ctx| async { Json(json!("custom-get")) });
    let srv = TestServer::spawn(vec![shadow, extra], vec![email_task()]).await;
    let client = reqwest::Client::new();

    let job_id = schedule(&client, &srv, "email", json!({"data": {"to": "a@b.com"}})).await;
    job_eventually(&client, &srv, "email", &job_id, "completed").await;

    let body: Value = client
        .get(srv.url("/tasks/email"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!("custom-get"));

    let res = client.delete(srv.url("/tasks/email")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn conflicting_route_fails_initialisation() {
    let conflicting = Route::get("/tasks/:name", |_ctx| async { "x" });
    let err = Server::new(
        ServerConfig::default(),
        MemoryEngine::arc(),
        vec![conflicting],
        Vec::new(),
    )
    .await
    .err()
    .expect("conflicting route is rejected");

    assert!(matches!(err, ServerError::InvalidRoute { .. }));
}
