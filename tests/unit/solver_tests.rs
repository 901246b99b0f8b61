//! Command and HTTP solvers.

use serial_test::serial;
use shadow_pool::config::SolverConfig;
use shadow_pool::solver::{self, CommandSolver, HttpSolver, Solver};
use shadow_pool::AppError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

fn sh(script: &str) -> CommandSolver {
    CommandSolver::new("sh".into(), vec!["-c".into(), script.into()])
}

#[tokio::test]
async fn command_solver_returns_trimmed_stdout() {
    let solver = sh("cat >/dev/null; printf '  answer  \\n'");
    let answer = solver.solve("system", "user").await.expect("answer");
    assert_eq!(answer, "answer");
}

#[tokio::test]
async fn command_solver_receives_both_prompts() {
    let solver = sh("cat");
    let answer = solver.solve("be terse", "add 2 and 2").await.expect("echo");
    assert!(answer.starts_with("be terse"));
    assert!(answer.ends_with("add 2 and 2"));
}

#[tokio::test]
async fn command_solver_failure_carries_stderr() {
    let solver = sh("cat >/dev/null; echo 'model offline' >&2; exit 2");
    let err = solver.solve("s", "u").await.expect_err("failure");
    assert!(matches!(err, AppError::Solver(_)));
    assert!(err.to_string().contains("model offline"));
}

#[tokio::test]
async fn command_solver_rejects_empty_output() {
    let err = sh("cat >/dev/null").solve("s", "u").await.expect_err("empty");
    assert!(err.to_string().contains("produced no output"));
}

#[tokio::test]
async fn missing_command_is_a_solver_error() {
    let solver = CommandSolver::new("/nonexistent/solver-binary".into(), Vec::new());
    let err = solver.solve("s", "u").await.expect_err("missing");
    assert!(matches!(err, AppError::Solver(_)));
}

/// Serve one canned HTTP response and hand back the raw request.
async fn one_shot_server(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}/v1/chat/completions", listener.local_addr().expect("addr"));
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut raw = Vec::new();
        let mut chunk = [0_u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.expect("read");
            raw.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&raw);
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if raw.len() >= split + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.expect("write");
        let _ = tx.send(String::from_utf8_lossy(&raw).into_owned());
    });
    (url, rx)
}

fn http_config(url: String, api_key_env: Option<&str>) -> SolverConfig {
    SolverConfig::Http {
        url,
        model: "test-model".into(),
        max_tokens: 64,
        temperature: 0.0,
        request_timeout_seconds: 5,
        api_key_env: api_key_env.map(str::to_owned),
    }
}

#[tokio::test]
async fn http_solver_returns_first_choice() {
    let (url, request) = one_shot_server(
        "200 OK",
        r#"{"choices":[{"message":{"role":"assistant","content":"forty-two"}}]}"#,
    )
    .await;
    let solver = HttpSolver::from_config(&http_config(url, None)).expect("solver");

    let answer = solver.solve("system text", "user text").await.expect("answer");
    assert_eq!(answer, "forty-two");

    let raw = request.await.expect("request");
    assert!(raw.contains("\"model\":\"test-model\""));
    assert!(raw.contains("user text"));
    assert!(!raw.to_ascii_lowercase().contains("authorization"));
}

#[tokio::test]
async fn http_error_status_is_reported() {
    let (url, _request) = one_shot_server("503 Service Unavailable", "{}").await;
    let solver = HttpSolver::from_config(&http_config(url, None)).expect("solver");
    let err = solver.solve("s", "u").await.expect_err("503");
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn http_empty_reply_is_an_error() {
    let (url, _request) = one_shot_server("200 OK", r#"{"choices":[]}"#).await;
    let solver = HttpSolver::from_config(&http_config(url, None)).expect("solver");
    let err = solver.solve("s", "u").await.expect_err("empty");
    assert!(err.to_string().contains("empty reply"));
}

#[tokio::test]
#[serial]
async fn http_solver_sends_bearer_token_from_env() {
    let (url, request) = one_shot_server(
        "200 OK",
        r#"{"choices":[{"message":{"content":"ok"}}]}"#,
    )
    .await;
    std::env::set_var("SHADOW_POOL_TEST_KEY", "sk-test");
    let solver = HttpSolver::from_config(&http_config(url, Some("SHADOW_POOL_TEST_KEY")))
        .expect("solver");
    std::env::remove_var("SHADOW_POOL_TEST_KEY");

    solver.solve("s", "u").await.expect("answer");
    let raw = request.await.expect("request").to_ascii_lowercase();
    assert!(raw.contains("authorization: bearer sk-test"));
}

#[test]
fn from_config_picks_the_variant() {
    let command = SolverConfig::Command {
        program: "llm".into(),
        args: vec!["-q".into()],
    };
    assert_eq!(solver::from_config(&command).expect("command").name(), "llm");

    let http = http_config("http://127.0.0.1:1/v1".into(), None);
    assert_eq!(solver::from_config(&http).expect("http").name(), "http://127.0.0.1:1/v1");
}
