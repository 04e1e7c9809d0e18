//! End-to-end tests: a virtual user loads a page, then submits its form.

use std::collections::HashMap;
use wiremock::matchers::{body_string, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rust_form_manager::config::FormManagerConfig;
use rust_form_manager::executor::{FormStep, SessionExecutor, StepRequest, VirtualUser};
use rust_form_manager::sample::Argument;

const LOGIN_PAGE: &str = r#"
<html><body>
  <form action="/login" method="post">
    <input type="hidden" name="csrf" value="tok123">
    <input type="text" name="user" value="">
    <input type="submit" name="action" value="Sign in">
  </form>
</body></html>"#;

fn step(name: &str, method: &str, path: &str, arguments: Vec<Argument>) -> FormStep {
    FormStep {
        name: name.to_string(),
        request: StepRequest {
            method: method.to_string(),
            path: path.to_string(),
            arguments,
            headers: HashMap::new(),
            raw_body: None,
        },
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .expect("Failed to create HTTP client")
}

async fn mount_login_page(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(LOGIN_PAGE, "text/html"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_submits_token_from_previous_page() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;

    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0u8, 1, 2], "image/png"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("user=alice"))
        .and(body_string_contains("csrf=tok123"))
        .and(body_string_contains("action=Sign+in"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("welcome", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let steps = vec![
        step("Load login page", "GET", "/login", vec![]),
        step("Load logo", "GET", "/logo.png", vec![]),
        step(
            "Submit login",
            "POST",
            "/login",
            vec![Argument::new("user", "alice")],
        ),
    ];

    let executor = SessionExecutor::new(server.uri(), client());
    let mut user = VirtualUser::new(0, FormManagerConfig::default()).unwrap();

    let result = executor.run_iteration(&steps, &mut user).await;

    assert!(result.success, "iteration failed: {:?}", result);
    assert_eq!(result.steps.len(), 3);
    assert_eq!(result.steps[0].form_outcome, "skipped");
    assert_eq!(result.steps[2].form_outcome, "merged");
    assert_eq!(
        result.steps[2].arguments,
        vec![
            Argument::new("user", "alice"),
            Argument::new("csrf", "tok123"),
            Argument::new("action", "Sign in"),
        ]
    );
}

#[tokio::test]
async fn test_first_request_of_next_iteration_is_left_alone() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<p>done</p>", "text/html"))
        .mount(&server)
        .await;

    // The submit comes first, so it may only use a page from the same iteration
    let steps = vec![
        step("Submit login", "POST", "/login", vec![Argument::new("user", "bob")]),
        step("Load login page", "GET", "/login", vec![]),
    ];

    let executor = SessionExecutor::new(server.uri(), client());
    let mut user = VirtualUser::new(7, FormManagerConfig::default()).unwrap();

    let first = executor.run_iteration(&steps, &mut user).await;
    let second = executor.run_iteration(&steps, &mut user).await;

    assert!(first.success && second.success);
    assert_eq!(user.iterations_started(), 2);
    assert_eq!(second.iteration, 2);
    assert_eq!(second.steps[0].form_outcome, "skipped");
    assert_eq!(
        second.steps[0].arguments,
        vec![Argument::new("user", "bob")]
    );
}

#[tokio::test]
async fn test_raw_body_is_sent_unchanged() {
    let server = MockServer::start().await;
    mount_login_page(&server).await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string(r#"{"user":"carol"}"#))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut submit = step("Submit JSON", "POST", "/login", vec![]);
    submit.request.raw_body = Some(r#"{"user":"carol"}"#.to_string());
    let steps = vec![step("Load login page", "GET", "/login", vec![]), submit];

    let executor = SessionExecutor::new(server.uri(), client());
    let mut user = VirtualUser::new(0, FormManagerConfig::default()).unwrap();

    let result = executor.run_iteration(&steps, &mut user).await;

    assert!(result.success, "iteration failed: {:?}", result);
    assert!(result.steps[1].arguments.is_empty());
}

#[tokio::test]
async fn test_server_error_stops_iteration() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let steps = vec![
        step("Broken", "GET", "/broken", vec![]),
        step("Never sent", "GET", "/login", vec![]),
    ];

    let executor = SessionExecutor::new(server.uri(), client());
    let mut user = VirtualUser::new(0, FormManagerConfig::default()).unwrap();

    let result = executor.run_iteration(&steps, &mut user).await;

    assert!(!result.success);
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].status_code, Some(500));
}
