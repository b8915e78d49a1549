//! Bot activation and message dispatch.
//!
//! `FigurineService` owns one orchestrator (and through it the session
//! registry) for the lifetime of the bot. Every inbound message goes
//! through [`FigurineService::admit`] and then [`FigurineService::complete`]
//! (or both at once via `dispatch`): commands take Entry A, everything else
//! is offered to Entry B.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::api::{TransformApi, XxApiClient};
use crate::command::parse_command;
use crate::message::ChannelMessage;
use crate::orchestrator::{Admission, CommandOutcome, Orchestrator, OrchestratorSettings};
use crate::registry::SessionRegistry;
use crate::traits::Outbound;
use crate::validator::{ImageValidator, ValidatorSettings};
use figurine_common::config::Config;

/// What `dispatch` did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The message was a figurine command.
    Command(CommandOutcome),
    /// The message answered a pending wait.
    Resumed(crate::api::TransformationResult),
    /// Not for us.
    Ignored,
}

/// A running figurine bot.
pub struct FigurineService {
    orchestrator: Orchestrator,
}

impl FigurineService {
    /// Validate the configuration and wire up the HTTP-backed API client.
    pub fn activate(config: &Config, outbound: Arc<dyn Outbound>) -> anyhow::Result<Self> {
        if let Err(e) = config.validate() {
            if e.mentions("figurine.credential") {
                tracing::error!("No API credential configured, refusing to activate");
            }
            return Err(figurine_common::Error::from(e)
                .with_context("Invalid figurine configuration")
                .into());
        }

        let figurine = &config.figurine;
        let api = XxApiClient::new(
            figurine.endpoint.clone(),
            figurine.credential.clone(),
            figurine.api_timeout(),
        );

        tracing::info!(
            endpoint = %figurine.endpoint,
            cooldown_secs = figurine.cooldown_secs,
            wait_timeout_secs = figurine.wait_timeout_secs,
            inline_images = ?figurine.inline_images,
            "Figurine service activated"
        );

        Ok(Self::with_api(config, Arc::new(api), outbound))
    }

    /// Build a service around an existing API implementation.
    ///
    /// Skips configuration validation.
    pub fn with_api(
        config: &Config,
        api: Arc<dyn TransformApi>,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        let figurine = &config.figurine;
        let orchestrator = Orchestrator::new(
            SessionRegistry::new(),
            ImageValidator::new(ValidatorSettings::from(figurine)),
            api,
            outbound,
            OrchestratorSettings::from(figurine),
        );
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.orchestrator.registry()
    }

    /// Registry half of dispatch: parse, admit, or consume a pending wait.
    ///
    /// Never yields. `None` means the message is not for the bot.
    pub fn admit(&self, message: &ChannelMessage) -> Option<Admission> {
        match message.text().and_then(parse_command) {
            Some(command) => Some(self.orchestrator.admit_command(message, command)),
            None => self.orchestrator.admit_message(message),
        }
    }

    /// Finish an admission: replies, remote call, delivery.
    pub async fn complete(&self, message: &ChannelMessage, admission: Admission) -> Dispatch {
        let follow_up = admission.is_follow_up();
        match self.orchestrator.complete(message, admission).await {
            CommandOutcome::Completed(result) if follow_up => Dispatch::Resumed(result),
            outcome => Dispatch::Command(outcome),
        }
    }

    /// Route one inbound message.
    pub async fn dispatch(&self, message: ChannelMessage) -> Dispatch {
        match self.admit(&message) {
            Some(admission) => self.complete(&message, admission).await,
            None => Dispatch::Ignored,
        }
    }

    /// Cancel every wait and timer. Idempotent.
    pub fn shutdown(&self) {
        self.registry().shutdown();
        tracing::info!("Figurine service stopped");
    }

    /// Start a background processor that handles messages from a channel.
    ///
    /// Messages are admitted one at a time in arrival order; only the
    /// completion of each admission runs concurrently. Once `rx` closes the
    /// processor waits for every outstanding request before it finishes.
    /// Aborting the returned handle cancels outstanding requests.
    pub fn spawn_processor(
        service: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<ChannelMessage>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Figurine processor started");
            let mut requests = JoinSet::new();

            while let Some(message) = rx.recv().await {
                let Some(admission) = service.admit(&message) else {
                    continue;
                };

                let service = service.clone();
                requests.spawn(async move {
                    let outcome = service.complete(&message, admission).await;
                    tracing::debug!(message_id = %message.id, outcome = ?outcome, "Message dispatched");
                });

                while let Some(joined) = requests.try_join_next() {
                    log_join(joined);
                }
            }

            let outstanding = requests.len();
            if outstanding > 0 {
                tracing::info!(outstanding, "Input closed, waiting for outstanding requests");
            }
            while let Some(joined) = requests.join_next().await {
                log_join(joined);
            }

            tracing::info!("Figurine processor stopped");
        })
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Request task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, FigurineResponse, TransformationRequest};
    use crate::message::{Attachment, ChannelType, OutgoingMessage};
    use crate::traits::ChannelResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Sink(Mutex<Vec<OutgoingMessage>>);

    #[async_trait]
    impl Outbound for Sink {
        async fn deliver(&self, message: OutgoingMessage) -> ChannelResult<String> {
            self.0.lock().unwrap().push(message);
            Ok("ok".into())
        }
    }

    struct FixedApi;

    #[async_trait]
    impl TransformApi for FixedApi {
        async fn transform(
            &self,
            request: &TransformationRequest,
        ) -> Result<FigurineResponse, ApiError> {
            Ok(FigurineResponse {
                code: 200,
                msg: "ok".into(),
                data: Some(format!("https://cdn.io/style{}.png", request.style)),
                request_id: "r".into(),
            })
        }

        fn provider_name(&self) -> &str {
            "fixed"
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.figurine.credential = "secret".into();
        config.figurine.probe_remote_images = false;
        config
    }

    fn msg(text: &str) -> ChannelMessage {
        ChannelMessage::text_message(ChannelType::Qq, "chat", "alice", text)
    }

    #[test]
    fn activate_requires_credential() {
        let config = Config::default();
        let err = FigurineService::activate(&config, Arc::new(Sink::default()))
            .err()
            .expect("activation should fail");
        assert!(format!("{err:#}").contains("figurine.credential"));
    }

    #[test]
    fn activate_with_credential() {
        assert!(FigurineService::activate(&config(), Arc::new(Sink::default())).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_routes_commands_and_followups() {
        let sink = Arc::new(Sink::default());
        let service = FigurineService::with_api(&config(), Arc::new(FixedApi), sink.clone());

        assert_eq!(service.dispatch(msg("hello")).await, Dispatch::Ignored);

        let outcome = service.dispatch(msg("手办化3")).await;
        assert_eq!(outcome, Dispatch::Command(CommandOutcome::AwaitingImage { style: 3 }));

        let image = msg("").with_attachment(Attachment::image("https://a.io/cat.webp"));
        match service.dispatch(image).await {
            Dispatch::Resumed(result) => assert!(result.is_success()),
            other => panic!("unexpected {other:?}"),
        }

        let sent = sink.0.lock().unwrap();
        assert!(sent.iter().any(|m| matches!(
            &m.content,
            crate::message::OutgoingContent::ImageUrl { url } if url == "https://cdn.io/style3.png"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_pending_waits() {
        let sink = Arc::new(Sink::default());
        let service = FigurineService::with_api(&config(), Arc::new(FixedApi), sink.clone());

        service.dispatch(msg("figurine")).await;
        service.shutdown();
        service.shutdown();

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        let notices = sink
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.content.as_text() == Some(crate::orchestrator::EXPIRED_MESSAGE))
            .count();
        assert_eq!(notices, 0);
        assert_eq!(
            service.dispatch(msg("figurine")).await,
            Dispatch::Command(CommandOutcome::Unavailable)
        );
    }

    /// Counts calls and answers after a short real delay.
    #[derive(Default)]
    struct SlowApi {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransformApi for SlowApi {
        async fn transform(
            &self,
            _request: &TransformationRequest,
        ) -> Result<FigurineResponse, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(FigurineResponse {
                code: 200,
                msg: "ok".into(),
                data: Some("https://cdn.io/slow.png".into()),
                request_id: "r".into(),
            })
        }

        fn provider_name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn processor_finishes_outstanding_requests_after_input_closes() {
        let sink = Arc::new(Sink::default());
        let service = Arc::new(FigurineService::with_api(&config(), Arc::new(SlowApi::default()), sink.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = FigurineService::spawn_processor(service, rx);

        tx.send(msg("figurine").with_attachment(Attachment::image("https://a.io/cat.png")))
            .unwrap();
        drop(tx);
        handle.await.unwrap();

        let sent = sink.0.lock().unwrap();
        assert!(sent.iter().any(|m| matches!(
            &m.content,
            crate::message::OutgoingContent::ImageUrl { url } if url == "https://cdn.io/slow.png"
        )));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn processor_keeps_command_and_follow_up_in_order() {
        const USERS: usize = 200;

        let api = Arc::new(SlowApi::default());
        let sink = Arc::new(Sink::default());
        let service = Arc::new(FigurineService::with_api(&config(), api.clone(), sink.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = FigurineService::spawn_processor(service.clone(), rx);

        for i in 0..USERS {
            let user = format!("user-{i}");
            let command = ChannelMessage::text_message(ChannelType::Qq, "chat", user.as_str(), "figurine");
            let image = ChannelMessage::text_message(ChannelType::Qq, "chat", user.as_str(), "")
                .with_attachment(Attachment::image("https://a.io/cat.png"));
            tx.send(command).unwrap();
            tx.send(image).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(api.calls.load(Ordering::SeqCst), USERS);
        for i in 0..USERS {
            let user = crate::registry::UserId::new(format!("qq:user-{i}"));
            assert!(!service.registry().has_pending_wait(&user));
        }
        service.shutdown();
    }
}
