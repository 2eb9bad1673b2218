use async_trait::async_trait;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use leviathan::web::{Form, FormError, Lv, ValidationError, WebError};
use leviathan::{App, Config, Logger, MemoryStore, RequestReport, Severity};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

#[derive(Clone, Default)]
struct Collector(Arc<Mutex<Vec<RequestReport>>>);

impl Collector {
    fn reports(&self) -> Vec<RequestReport> {
        self.0.lock().unwrap().clone()
    }

    fn only(&self) -> RequestReport {
        let reports = self.reports();
        assert_eq!(reports.len(), 1, "exactly one report per request");
        reports.into_iter().next().unwrap()
    }
}

impl Logger for Collector {
    fn report(&self, report: &RequestReport) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(report.clone());
        Ok(())
    }
}

struct FailingLogger;

impl Logger for FailingLogger {
    fn report(&self, _report: &RequestReport) -> anyhow::Result<()> {
        anyhow::bail!("sink unavailable")
    }
}

fn request(uri: &str) -> Request<Body> {
    let mut request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 40000))));
    request
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn finished_line(report: &RequestReport) -> &str {
    &report.entries.last().unwrap().message
}

async fn fan_out(lv: Lv) -> &'static str {
    lv.go(|_| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        anyhow::Ok(())
    });
    lv.go(|_| async {
        if true {
            panic!("job exploded");
        }
        anyhow::Ok(())
    });
    lv.go(|lv| async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        lv.print("slow job done");
        anyhow::Ok(())
    });
    "spawned"
}

#[tokio::test]
async fn test_jobs_finish_before_the_request_does() {
    let logs = Collector::default();
    let router = App::new(Config::new().logger(logs.clone()), MemoryStore::new())
        .get("/fan-out", fan_out)
        .router();

    let response = router.oneshot(request("/fan-out")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "spawned");

    let report = logs.only();
    assert_eq!(report.count(Severity::Panic), 1);
    let panic = report
        .entries
        .iter()
        .find(|entry| entry.severity == Severity::Panic)
        .unwrap();
    assert!(panic.message.starts_with("job exploded"));

    assert!(report.entries.iter().any(|entry| entry.message == "slow job done"));
    assert!(finished_line(&report).starts_with("FINISHED WITH 200 ELAPSED "));
    assert!(report.elapsed >= Duration::from_millis(40));
    assert!(report.entries.last().unwrap().elapsed >= Duration::from_millis(40));
}

async fn explode() -> &'static str {
    panic!("handler exploded")
}

#[tokio::test]
async fn test_handler_panic_is_forbidden_and_logged_once() {
    let logs = Collector::default();
    let router = App::new(Config::new().logger(logs.clone()), MemoryStore::new())
        .get("/explode", explode)
        .router();

    let response = router.oneshot(request("/explode")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let report = logs.only();
    assert_eq!(report.status, 403);
    assert_eq!(report.count(Severity::Panic), 1);
    let panic = report
        .entries
        .iter()
        .find(|entry| entry.severity == Severity::Panic)
        .unwrap();
    assert!(panic.message.starts_with("handler exploded\nat "));
    assert!(finished_line(&report).starts_with("FINISHED WITH 403 ELAPSED "));
}

async fn missing() -> leviathan::web::Result<&'static str> {
    Err(WebError::NotFound("no such widget".into()))
}

#[tokio::test]
async fn test_handler_errors_are_logged_with_their_status() {
    let logs = Collector::default();
    let router = App::new(Config::new().logger(logs.clone()), MemoryStore::new())
        .get("/missing", missing)
        .router();

    let response = router.oneshot(request("/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, json!({ "error": "no such widget", "code": "not_found" }));

    let report = logs.only();
    let errors: Vec<&str> = report
        .entries
        .iter()
        .filter(|entry| entry.severity == Severity::Error)
        .map(|entry| entry.message.as_str())
        .collect();
    assert_eq!(errors, ["no such widget"]);
    assert!(finished_line(&report).starts_with("FINISHED WITH 404 "));
}

struct Signup {
    email: String,
}

#[async_trait]
impl Form for Signup {
    async fn validate(&self, _lv: &Lv) -> Result<(), FormError> {
        if !self.email.contains('@') {
            return Err(ValidationError::field("email", "must contain @").into());
        }
        Ok(())
    }

    async fn apply(self, lv: &Lv) -> leviathan::web::Result<Response> {
        lv.print(format!("signed up {}", self.email));
        Ok(Response::new(Body::from("welcome")))
    }
}

async fn signup(lv: Lv) -> leviathan::web::Result<Response> {
    let email = lv.query_param("email").unwrap_or_default();
    lv.paperwork(Signup { email }).await
}

#[tokio::test]
async fn test_validation_errors_are_client_errors() {
    let logs = Collector::default();
    let router = App::new(Config::new().logger(logs.clone()), MemoryStore::new())
        .post("/signup", signup)
        .router();

    let mut bad = request("/signup?email=nope");
    *bad.method_mut() = axum::http::Method::POST;
    let response = router.clone().oneshot(bad).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(
        body,
        json!({ "ok": false, "field": "email", "message": "must contain @" })
    );
    let report = logs.only();
    assert_eq!(report.count(Severity::Error), 0);
    assert_eq!(report.count(Severity::Panic), 0);

    let mut good = request("/signup?email=a@b.c");
    *good.method_mut() = axum::http::Method::POST;
    let response = router.oneshot(good).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "welcome");
}

async fn whoami(lv: Lv) -> String {
    lv.addr().to_string()
}

#[tokio::test]
async fn test_proxy_header_wins_over_the_socket_address() {
    let logs = Collector::default();
    let router = App::new(Config::new().logger(logs.clone()), MemoryStore::new())
        .get("/whoami", whoami)
        .router();

    let mut proxied = request("/whoami");
    proxied
        .headers_mut()
        .insert("cf-connecting-ip", "203.0.113.7".parse().unwrap());
    let response = router.clone().oneshot(proxied).await.unwrap();
    assert_eq!(body_text(response).await, "203.0.113.7");

    let response = router.oneshot(request("/whoami")).await.unwrap();
    assert_eq!(body_text(response).await, "10.0.0.1");

    let reports = logs.reports();
    assert!(reports[0].entries[0].message.contains(" ADDR 203.0.113.7 "));
    assert!(reports[1].entries[0].message.contains(" ADDR 10.0.0.1 "));
}

async fn login(lv: Lv) -> &'static str {
    lv.put_cookie("sid", "abc", true);
    lv.drop_cookie("legacy");
    "ok"
}

async fn set_cookies(config: Config) -> Vec<String> {
    let router = App::new(config.logger(Collector::default()), MemoryStore::new())
        .get("/login", login)
        .router();
    let response = router.oneshot(request("/login")).await.unwrap();
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_cookie_policy_follows_the_environment() {
    let dev = set_cookies(Config::new()).await;
    assert_eq!(
        dev,
        [
            "sid=abc; Domain=localhost; Path=/; HttpOnly; SameSite=Lax",
            "legacy=; Max-Age=0; Domain=localhost; Path=/; HttpOnly; SameSite=Lax",
        ]
    );

    let prod = set_cookies(Config::new().production(true).domain("example.com")).await;
    assert_eq!(
        prod,
        [
            "sid=abc; Domain=example.com; Path=/; HttpOnly; Secure; SameSite=Strict",
            "legacy=; Max-Age=0; Domain=example.com; Path=/; HttpOnly; Secure; SameSite=Strict",
        ]
    );
}

async fn quiet() -> &'static str {
    "ok"
}

#[tokio::test]
async fn test_pre_request_hook_runs_after_the_incoming_line() {
    let logs = Collector::default();
    let config = Config::new()
        .logger(logs.clone())
        .inb4(|lv: &Lv| lv.debug(format!("hook saw {}", lv.path())));
    let router = App::new(config, MemoryStore::new())
        .get("/quiet", quiet)
        .router();

    router.oneshot(request("/quiet")).await.unwrap();

    let report = logs.only();
    let messages: Vec<&str> = report.entries.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].starts_with("INCOMING GET /quiet NOW "));
    assert_eq!(messages[1], "hook saw /quiet");
    assert!(messages[2].starts_with("FINISHED WITH 200 "));
}

#[tokio::test]
async fn test_logger_failure_does_not_affect_the_response() {
    let router = App::new(Config::new().logger(FailingLogger), MemoryStore::new())
        .get("/quiet", quiet)
        .router();

    let response = router.oneshot(request("/quiet")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

async fn transfer(lv: Lv) -> leviathan::web::Result<&'static str> {
    lv.atomic(|tx| {
        Box::pin(async move {
            tx.execute("UPDATE accounts SET balance = balance - 10 WHERE id = 1")
                .await?;
            tx.execute("UPDATE accounts SET balance = balance + 10 WHERE id = 2")
                .await?;
            Ok(())
        })
    })
    .await?;
    Ok("moved")
}

#[tokio::test]
async fn test_atomic_commits_through_the_request_store() {
    let store = MemoryStore::new();
    let router = App::new(Config::new().logger(Collector::default()), store.clone())
        .post("/transfer", transfer)
        .router();

    let mut req = request("/transfer");
    *req.method_mut() = axum::http::Method::POST;
    let response = router.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.executed().len(), 2);
    assert_eq!(store.transaction_counts(), (1, 0));

    store.fail_on("id = 2");
    let mut req = request("/transfer");
    *req.method_mut() = axum::http::Method::POST;
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(store.executed().len(), 2);
    assert_eq!(store.transaction_counts(), (1, 1));
}

async fn slow(lv: Lv) -> &'static str {
    lv.go(|lv| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        lv.print("job outlived the client");
        anyhow::Ok(())
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    "slow"
}

#[tokio::test]
async fn test_client_disconnect_still_reports_once() {
    let logs = Collector::default();
    let router = App::new(Config::new().logger(logs.clone()), MemoryStore::new())
        .get("/slow", slow)
        .router();

    let dropped =
        tokio::time::timeout(Duration::from_millis(20), router.oneshot(request("/slow"))).await;
    assert!(dropped.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = logs.only();
    assert!(
        report
            .entries
            .iter()
            .any(|entry| entry.message == "job outlived the client")
    );
    assert!(finished_line(&report).starts_with("FINISHED WITH 200 "));
}

async fn eager_job(lv: Lv) -> &'static str {
    lv.go(|_| -> std::future::Ready<anyhow::Result<()>> { panic!("job closure exploded") });
    "ok"
}

#[tokio::test]
async fn test_panicking_job_closure_does_not_reach_the_handler() {
    let logs = Collector::default();
    let router = App::new(Config::new().logger(logs.clone()), MemoryStore::new())
        .get("/eager", eager_job)
        .router();

    let response = router.oneshot(request("/eager")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");

    let report = logs.only();
    assert_eq!(report.count(Severity::Panic), 1);
    assert!(finished_line(&report).starts_with("FINISHED WITH 200 "));
}
