//! End-to-end tests for the figurine flow against a mock HTTP server.
//!
//! The mock server plays both roles: the image host answering HEAD probes
//! and the transformation endpoint answering GET requests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use figurine_bot::api::{ApiError, TransformApi, TransformationRequest};
use figurine_bot::{
    Attachment, ChannelMessage, ChannelResult, ChannelType, CliChannel, CommandOutcome, Dispatch,
    FailureKind, FigurineService, ImageReference, OutgoingContent, OutgoingMessage, Outbound,
    TransformationResult, UserId, XxApiClient,
};
use figurine_common::config::{Config, InlineImagePolicy};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingOutbound {
    sent: Mutex<Vec<OutgoingContent>>,
}

impl RecordingOutbound {
    fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.as_text().map(str::to_string))
            .collect()
    }

    fn image_urls(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                OutgoingContent::ImageUrl { url } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn deliver(&self, message: OutgoingMessage) -> ChannelResult<String> {
        self.sent.lock().unwrap().push(message.content);
        Ok("ok".into())
    }
}

fn config_for(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.figurine.credential = "secret-key".into();
    config.figurine.endpoint = format!("{}/figurine", server.uri());
    config.figurine.api_timeout_secs = 5;
    config.figurine.probe_timeout_secs = 2;
    config.figurine.max_image_size_mb = 1;
    config
}

fn image_url(server: &MockServer, name: &str) -> String {
    format!("{}/img/{}", server.uri(), name)
}

fn command_with(text: &str, url: &str) -> ChannelMessage {
    ChannelMessage::text_message(ChannelType::Qq, "group", "tester", text)
        .with_attachment(Attachment::image(url))
}

async fn mount_probe(server: &MockServer, name: &str, content_type: &str, length: u64) {
    Mock::given(method("HEAD"))
        .and(path(format!("/img/{name}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", content_type)
                .insert_header("content-length", length.to_string().as_str()),
        )
        .mount(server)
        .await;
}

fn api_reply(code: i64, msg: &str, data: Option<&str>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": code,
        "msg": msg,
        "data": data,
        "request_id": "req-1",
    }))
}

fn completed(dispatch: Dispatch) -> TransformationResult {
    match dispatch {
        Dispatch::Command(CommandOutcome::Completed(result)) | Dispatch::Resumed(result) => result,
        other => panic!("expected a terminal result, got {other:?}"),
    }
}

#[tokio::test]
async fn client_sends_style_url_and_key() {
    let server = MockServer::start().await;
    let url = image_url(&server, "cat.png");
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .and(query_param("style", "3"))
        .and(query_param("url", url.as_str()))
        .and(query_param("key", "secret-key"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/out.png")))
        .expect(1)
        .mount(&server)
        .await;

    let client = XxApiClient::new(
        format!("{}/figurine", server.uri()),
        "secret-key",
        Duration::from_secs(5),
    );
    let response = client
        .transform(&TransformationRequest {
            user: UserId::new("qq:tester"),
            style: 3,
            image: ImageReference::RemoteUrl(url),
        })
        .await
        .unwrap();

    assert_eq!(response.code, 200);
    assert_eq!(response.data.as_deref(), Some("https://cdn.example/out.png"));
}

#[tokio::test]
async fn command_with_attachment_delivers_figurine() {
    let server = MockServer::start().await;
    mount_probe(&server, "cat.png", "image/png", 2048).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .and(query_param("style", "2"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/fig.png")))
        .expect(1)
        .mount(&server)
        .await;

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let url = image_url(&server, "cat.png");
    let result = completed(service.dispatch(command_with("figurine style=2", &url)).await);

    assert!(result.is_success());
    assert_eq!(outbound.image_urls(), vec!["https://cdn.example/fig.png".to_string()]);
    assert_eq!(
        outbound.texts(),
        vec![figurine_bot::orchestrator::PROCESSING_MESSAGE.to_string()]
    );
}

#[tokio::test]
async fn invalid_credential_code_reported() {
    let server = MockServer::start().await;
    mount_probe(&server, "cat.jpg", "image/jpeg", 2048).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(api_reply(-8, "key invalid", None))
        .mount(&server)
        .await;

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let result = completed(
        service
            .dispatch(command_with("figurine", &image_url(&server, "cat.jpg")))
            .await,
    );

    assert_eq!(result.failure_kind(), Some(FailureKind::RemoteRejected { code: -8 }));
    assert!(outbound.texts().iter().any(|t| t.contains("密钥")));
    assert!(!service.registry().is_in_flight(&UserId::new("qq:tester")));
}

#[tokio::test]
async fn empty_data_reported_as_empty_result() {
    let server = MockServer::start().await;
    mount_probe(&server, "cat.jpg", "image/jpeg", 2048).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(api_reply(200, "ok", Some("")))
        .mount(&server)
        .await;

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let result = completed(
        service
            .dispatch(command_with("figurine", &image_url(&server, "cat.jpg")))
            .await,
    );
    assert_eq!(result.failure_kind(), Some(FailureKind::EmptyResult));
    assert!(outbound.image_urls().is_empty());
}

#[tokio::test]
async fn probe_rejects_non_image_without_calling_api() {
    let server = MockServer::start().await;
    mount_probe(&server, "page.png", "text/html; charset=utf-8", 512).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/x.png")))
        .expect(0)
        .mount(&server)
        .await;

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let result = completed(
        service
            .dispatch(command_with("figurine", &image_url(&server, "page.png")))
            .await,
    );
    assert_eq!(result.failure_kind(), Some(FailureKind::UnsupportedFormat));
    assert!(outbound.texts().iter().any(|t| t.contains("text/html")));
}

#[tokio::test]
async fn probe_rejects_oversized_image() {
    let server = MockServer::start().await;
    mount_probe(&server, "huge.png", "image/png", 5 * 1024 * 1024).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/x.png")))
        .expect(0)
        .mount(&server)
        .await;

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let result = completed(
        service
            .dispatch(command_with("figurine", &image_url(&server, "huge.png")))
            .await,
    );
    assert_eq!(result.failure_kind(), Some(FailureKind::UnsupportedFormat));
    assert!(outbound.texts().iter().any(|t| t.contains("图片过大")));
}

#[tokio::test]
async fn failed_probe_still_submits() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/ok.png")))
        .expect(1)
        .mount(&server)
        .await;

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let result = completed(
        service
            .dispatch(command_with("figurine", &image_url(&server, "cat.webp")))
            .await,
    );
    assert!(result.is_success());
}

#[tokio::test]
async fn slow_api_times_out_as_transport_failure() {
    let server = MockServer::start().await;
    mount_probe(&server, "cat.png", "image/png", 2048).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(
            api_reply(200, "ok", Some("https://cdn.example/late.png"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.figurine.api_timeout_secs = 1;
    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config, outbound.clone()).unwrap();

    let result = completed(
        service
            .dispatch(command_with("figurine", &image_url(&server, "cat.png")))
            .await,
    );
    assert_eq!(result.failure_kind(), Some(FailureKind::RemoteTransport));
    assert!(!service.registry().is_in_flight(&UserId::new("qq:tester")));
}

#[tokio::test]
async fn http_error_without_envelope_maps_to_status() {
    let server = MockServer::start().await;
    let client = XxApiClient::new(
        format!("{}/figurine", server.uri()),
        "k",
        Duration::from_secs(5),
    );
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .mount(&server)
        .await;

    let request = TransformationRequest {
        user: UserId::new("qq:tester"),
        style: 1,
        image: ImageReference::RemoteUrl("https://a.io/x.png".into()),
    };
    match client.transform(&request).await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 502);
            assert!(body.contains("bad gateway"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn garbage_success_body_is_internal_failure() {
    let server = MockServer::start().await;
    mount_probe(&server, "cat.png", "image/png", 2048).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let result = completed(
        service
            .dispatch(command_with("figurine", &image_url(&server, "cat.png")))
            .await,
    );
    assert_eq!(result.failure_kind(), Some(FailureKind::InternalUnexpected));
    assert!(outbound
        .texts()
        .contains(&figurine_bot::orchestrator::INTERNAL_FAILURE_MESSAGE.to_string()));
}

#[tokio::test]
async fn cooldown_blocks_then_admits() {
    let server = MockServer::start().await;
    mount_probe(&server, "cat.png", "image/png", 2048).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/fig.png")))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.figurine.cooldown_secs = 1;
    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config, outbound.clone()).unwrap();
    let url = image_url(&server, "cat.png");

    assert!(completed(service.dispatch(command_with("figurine", &url)).await).is_success());
    assert_eq!(
        service.dispatch(command_with("figurine", &url)).await,
        Dispatch::Command(CommandOutcome::Busy)
    );

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(completed(service.dispatch(command_with("figurine", &url)).await).is_success());
}

#[tokio::test]
async fn follow_up_image_after_prompt() {
    let server = MockServer::start().await;
    mount_probe(&server, "later.gif", "image/gif", 4096).await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .and(query_param("style", "4"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/gif.png")))
        .expect(1)
        .mount(&server)
        .await;

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let prompt = ChannelMessage::text_message(ChannelType::Qq, "group", "tester", "手办化4");
    assert_eq!(
        service.dispatch(prompt).await,
        Dispatch::Command(CommandOutcome::AwaitingImage { style: 4 })
    );

    let chatter = ChannelMessage::text_message(ChannelType::Qq, "group", "tester", "one sec");
    assert_eq!(service.dispatch(chatter).await, Dispatch::Ignored);

    let reply = ChannelMessage::text_message(
        ChannelType::Qq,
        "group",
        "tester",
        format!("here {}", image_url(&server, "later.gif")),
    );
    assert!(completed(service.dispatch(reply).await).is_success());
    service.shutdown();
}

#[tokio::test]
async fn local_file_submitted_inline_when_allowed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/figurine"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/local.png")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("pet.png");
    std::fs::write(&file, b"not-really-a-png").unwrap();

    let mut config = config_for(&server);
    config.figurine.inline_images = InlineImagePolicy::Accept;
    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config, outbound.clone()).unwrap();

    let cli = CliChannel::new().with_user("tester");
    let message = cli.parse_line(&format!("figurine file://{}", file.display()));
    assert!(completed(service.dispatch(message).await).is_success());

    let requests = server.received_requests().await.unwrap();
    let submitted = requests[0]
        .url
        .query_pairs()
        .find(|(k, _)| k == "url")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    assert!(submitted.starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn local_file_refused_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(api_reply(200, "ok", Some("https://cdn.example/x.png")))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("pet.jpg");
    std::fs::write(&file, b"jpeg").unwrap();

    let outbound = Arc::new(RecordingOutbound::default());
    let service = FigurineService::activate(&config_for(&server), outbound.clone()).unwrap();

    let cli = CliChannel::new().with_user("tester");
    let message = cli.parse_line(&format!("figurine file://{}", file.display()));
    let result = completed(service.dispatch(message).await);
    assert_eq!(result.failure_kind(), Some(FailureKind::UnsupportedFormat));
    assert!(outbound.texts().iter().any(|t| t.contains("附件")));
}
