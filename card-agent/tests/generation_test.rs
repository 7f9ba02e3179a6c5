//! End-to-end generation tests
//!
//! Runs the full pipeline against:
//! - canon documents on disk (FileCanonSource)
//! - an OpenAI-compatible HTTP generator (wiremock)

use std::sync::Arc;

use canon::{CanonError, FileCanonSource};
use card_agent::{
    CardMessageService, GenerationConfig, GenerationError, GenerationOutcome, GenerationRequest,
    LlmBackend, OpenAiBackend,
};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const INTENTION: &str = "Where am I on my spiritual journey?";

const PAST_CLEAN: &str = "Not long ago, something in your spiritual journey shook loose, and facing an old fear became the quiet work behind the scenes. What once felt like solid ground gave way, yet that collapse cleared room you had not known you needed. The question of \"my spiritual journey\" was already moving beneath the surface, carrying you past familiar walls. Each loss taught you something about trusting what a new chapter might hold before its first page had turned. You were learning that endings can keep their own kind of grace. That lesson now travels with you into whatever is still unfolding.";

const PAST_UNCOVERED: &str = "Not long ago, something in your spiritual journey shook loose, and the quiet work went on behind the scenes. What once felt like solid ground gave way, yet that collapse cleared room you had not known you needed. The question of \"my spiritual journey\" was already moving beneath the surface, carrying you past familiar walls. Each loss taught you something about what might hold before the next page had turned. You were learning that endings can keep their own kind of grace. That lesson now travels with you into whatever is still unfolding.";

const TOWER_YAML: &str = r#"
card_id: the-tower
status: authored
upright:
  themes: [sudden change, revelation, liberation]
  core:
    - facing an old fear
    - trusting a new chapter
reversed:
  themes: [resisting change]
  core:
    - holding on to what has already fallen
"#;

// =============================================================================
// Helpers
// =============================================================================

fn canon_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("the-tower.yaml"), TOWER_YAML).unwrap();
    dir
}

fn completion(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{
            "message": { "content": serde_json::json!({ "text": text }).to_string() },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 120, "completion_tokens": 40 }
    })
}

async fn server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
        .mount(&server)
        .await;
    server
}

fn service(server: &MockServer, canon: &TempDir) -> CardMessageService {
    let backend: Arc<dyn LlmBackend> = Arc::new(
        OpenAiBackend::new(format!("{}/v1", server.uri()), "test-model", None).unwrap(),
    );
    CardMessageService::new(vec![backend], Arc::new(FileCanonSource::new(canon.path())))
}

fn request() -> GenerationRequest {
    GenerationRequest::new(
        "three-card",
        "past-1",
        "journey",
        INTENTION,
        "the-tower",
        "The Tower",
    )
}

async fn chat_requests(server: &MockServer) -> Vec<serde_json::Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path().ends_with("/chat/completions"))
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_clean_generation_over_http() {
    let server = server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(PAST_CLEAN)))
        .mount(&server)
        .await;

    let canon = canon_dir();
    let result = service(&server, &canon)
        .generate_card_message(request())
        .await
        .unwrap();

    assert_eq!(result.outcome, GenerationOutcome::Clean);
    assert_eq!(result.text, PAST_CLEAN);
    assert_eq!(result.cost.generator_calls, 1);
    assert_eq!(result.cost.input_tokens, 120);
    assert_eq!(result.cost.output_tokens, 40);

    let chats = chat_requests(&server).await;
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0]["model"], "test-model");
    assert_eq!(chats[0]["response_format"]["type"], "json_object");

    let system = chats[0]["messages"][0]["content"].as_str().unwrap();
    assert!(system.contains("## POSITION: PAST"));
    let user = chats[0]["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("facing an old fear"));
    assert!(user.contains("The Tower"));
}

#[tokio::test]
async fn test_rewrite_round_over_http() {
    let server = server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("REWRITE RULES"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(PAST_CLEAN)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(PAST_UNCOVERED)))
        .mount(&server)
        .await;

    let canon = canon_dir();
    let result = service(&server, &canon)
        .generate_card_message(request())
        .await
        .unwrap();

    assert_eq!(result.outcome, GenerationOutcome::SoftRepaired);
    assert_eq!(result.text, PAST_CLEAN);
    assert_eq!(chat_requests(&server).await.len(), 2);
}

#[tokio::test]
async fn test_server_errors_exhaust_attempts() {
    let server = server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let canon = canon_dir();
    let err = service(&server, &canon)
        .generate_card_message(request())
        .await
        .unwrap_err();

    match err {
        GenerationError::GenerationExhausted {
            attempts,
            last_error,
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("model crashed"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(chat_requests(&server).await.len(), 3);
}

#[tokio::test]
async fn test_config_from_yaml_limits_attempts() {
    let server = server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let config = GenerationConfig::from_yaml("budget:\n  draft_attempts: 1\n").unwrap();
    let canon = canon_dir();
    let err = service(&server, &canon)
        .with_config(config)
        .unwrap()
        .generate_card_message(request())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GenerationError::GenerationExhausted { attempts: 1, .. }
    ));
    assert_eq!(chat_requests(&server).await.len(), 1);
}

#[tokio::test]
async fn test_missing_canon_never_calls_generator() {
    let server = server().await;
    let canon = canon_dir();

    let mut request = request();
    request.card_id = "the-star".to_string();

    let err = service(&server, &canon)
        .generate_card_message(request)
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::Canon(CanonError::NotFound(_))));
    assert!(err.is_precondition());
    assert!(chat_requests(&server).await.is_empty());
}

#[tokio::test]
async fn test_reversed_card_uses_reversed_canon() {
    let server = server().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(PAST_CLEAN)))
        .mount(&server)
        .await;

    let canon = canon_dir();
    let result = service(&server, &canon)
        .generate_card_message(request().with_reversed(true))
        .await
        .unwrap();

    assert_ne!(result.key, card_agent::ResultKey::for_request(&request()));

    let chats = chat_requests(&server).await;
    let user = chats[0]["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("holding on to what has already fallen"));
    assert!(!user.contains("facing an old fear"));
}
