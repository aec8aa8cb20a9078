use tracing::{debug, info, warn};

use crate::backend::{parse_environment_reply, parse_generated_image, BackendClient, BackendCommand};
use crate::config::{AppSettings, ImageSize};
use crate::error::{BackendError, ImageError, SpeechError};
use crate::image::StagedImage;
use crate::presets::{preset, PresetAction};
use crate::routing::{classify_input, InputRoute, RouteError, RoutedRequest};
use crate::session::{ListeningState, Session, SessionView, SystemPersona};
use crate::speech::{SpeechAvailability, SpeechCapability};
use crate::status;
use crate::voice_command::{detect_voice_command, strip_voice_command};

/// A request whose optimistic state change has been applied and whose
/// backend call has not resolved yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDispatch {
    sequence: u64,
    routed: RoutedRequest,
    command: BackendCommand,
}

impl PendingDispatch {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn routed(&self) -> &RoutedRequest {
        &self.routed
    }

    pub fn command(&self) -> &BackendCommand {
        &self.command
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed(String),
    /// Refused locally; no backend call was made.
    Rejected(RouteError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListeningOutcome {
    Started,
    Stopped,
    /// A start or stop is still in progress.
    Busy,
    /// Voice input is off for this session.
    VoiceDisabled,
    Failed(String),
}

/// Owns the session and funnels every mutation through named operations.
pub struct Dispatcher<B: BackendClient, S: SpeechCapability> {
    session: Session,
    backend: B,
    speech: S,
    speech_locale: String,
    image_size: ImageSize,
    listening_state: ListeningState,
    voice_enabled: bool,
    next_sequence: u64,
    last_fired_transcript: Option<String>,
}

impl<B: BackendClient, S: SpeechCapability> Dispatcher<B, S> {
    pub fn new(backend: B, speech: S, settings: &AppSettings) -> Self {
        let mut dispatcher = Self {
            session: Session::new(settings.default_backend, settings.default_model_tier),
            backend,
            speech,
            speech_locale: settings.speech_locale.clone(),
            image_size: settings.image_size,
            listening_state: ListeningState::Idle,
            voice_enabled: true,
            next_sequence: 1,
            last_fired_transcript: None,
        };

        let availability = dispatcher.speech.availability();
        dispatcher.report_speech_availability(availability);
        dispatcher
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn view(&self) -> SessionView {
        self.session.view()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn speech(&self) -> &S {
        &self.speech
    }

    pub fn listening_state(&self) -> ListeningState {
        self.listening_state
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice_enabled
    }

    pub fn set_backend(&mut self, backend: B) {
        info!(backend = backend.label(), "backend replaced");
        self.backend = backend;
    }

    /// Picks up settings that may change while the app runs.
    pub fn apply_settings(&mut self, settings: &AppSettings) {
        self.speech_locale = settings.speech_locale.clone();
        self.image_size = settings.image_size;
    }

    pub fn set_draft(&mut self, text: &str) {
        self.session.draft_message = text.to_string();
    }

    pub fn append_draft(&mut self, text: &str) {
        self.session.draft_message.push_str(text);
    }

    /// Validates a pasted image and stages it for the next chat request.
    pub fn stage_image(&mut self, data_url: &str) -> Result<(), ImageError> {
        match StagedImage::parse(data_url) {
            Ok(image) => {
                debug!(media_type = image.media_type(), "staged pasted image");
                self.session.pending_image = Some(image.into_data_url());
                Ok(())
            }
            Err(error) => {
                self.session.status = status::error(&error);
                Err(error)
            }
        }
    }

    /// Resolves the effective text (falling back to the draft when `raw` is
    /// empty) and picks the backend route for it.
    pub fn normalize_and_route(&mut self, raw: &str) -> Result<RoutedRequest, RouteError> {
        let text = if raw.is_empty() {
            self.session.draft_message.clone()
        } else {
            raw.to_string()
        };

        if text.is_empty() {
            self.session.status = status::EMPTY_MESSAGE.to_string();
            return Err(RouteError::EmptyMessage);
        }

        let routed = match classify_input(&text) {
            InputRoute::FetchAllHistory => RoutedRequest::FetchAllHistory,
            InputRoute::GenerateImage { prompt } => RoutedRequest::GenerateImage { prompt },
            InputRoute::Chat { text } => {
                let image = self.session.pending_image.take();
                if let Some(image) = &image {
                    self.session.attached_images.push(image.clone());
                }
                RoutedRequest::ChatCompletion {
                    backend: self.session.backend,
                    model_tier: self.session.model_tier,
                    text,
                    image,
                }
            }
        };
        debug!(?routed, "routed input");
        Ok(routed)
    }

    /// Applies the optimistic half of a dispatch and hands back what to send.
    pub fn begin_dispatch(&mut self, routed: RoutedRequest) -> PendingDispatch {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.session.status = status::THINKING.to_string();

        let command = routed.to_command(self.image_size);
        info!(sequence, command = command.name(), "dispatching request");
        PendingDispatch {
            sequence,
            routed,
            command,
        }
    }

    /// Reconciles a backend reply. Completions are applied in the order they
    /// arrive; an older request finishing last overwrites a newer one.
    pub fn complete_dispatch(
        &mut self,
        pending: PendingDispatch,
        result: Result<String, BackendError>,
    ) -> DispatchOutcome {
        let PendingDispatch {
            sequence, routed, ..
        } = pending;

        let applied = result.and_then(|reply| self.apply_reply(&routed, reply));
        // A generated image echoes the prompt the backend actually used.
        let heading = match &applied {
            Ok(Some(updated_prompt)) => status::query_heading(updated_prompt),
            _ => routed.query_heading(),
        };

        let outcome = match applied {
            Ok(_) => {
                info!(sequence, "request completed");
                self.session.last_error = None;
                DispatchOutcome::Completed
            }
            Err(error) => {
                warn!(sequence, %error, "request failed");
                let message = error.to_string();
                self.session.last_error = Some(message.clone());
                DispatchOutcome::Failed(message)
            }
        };

        // Runs on both paths; the settled status replaces "Thinking..." and
        // any error text, which stays readable through `last_error`.
        self.session.draft_message.clear();
        self.session.pending_image = None;
        self.session.last_query = heading;
        self.session.status = if self.session.listening {
            status::LISTENING.to_string()
        } else {
            status::NEUTRAL.to_string()
        };

        outcome
    }

    /// Returns the updated prompt when the reply is a generated image.
    fn apply_reply(
        &mut self,
        routed: &RoutedRequest,
        reply: String,
    ) -> Result<Option<String>, BackendError> {
        match routed {
            RoutedRequest::GenerateImage { prompt } => {
                let image = parse_generated_image(&reply)?;
                let updated_prompt = format!("{prompt} to prompt, {}", image.prompt);
                self.session.last_result = updated_prompt.clone();
                self.session.last_image_url = Some(image.url);
                Ok(Some(updated_prompt))
            }
            RoutedRequest::FetchAllHistory | RoutedRequest::ChatCompletion { .. } => {
                self.session.last_result = reply;
                Ok(None)
            }
        }
    }

    pub async fn dispatch_request(&mut self, routed: RoutedRequest) -> DispatchOutcome {
        let pending = self.begin_dispatch(routed);
        let result = self.backend.invoke(pending.command()).await;
        self.complete_dispatch(pending, result)
    }

    /// Typed or pasted submit: routes `raw` (or the draft) and dispatches it.
    pub async fn submit(&mut self, raw: &str) -> DispatchOutcome {
        match self.normalize_and_route(raw) {
            Ok(routed) => self.dispatch_request(routed).await,
            Err(error) => DispatchOutcome::Rejected(error),
        }
    }

    /// Handles one transcript update. Returns the request to send when the
    /// transcript ends with a trigger phrase.
    pub fn on_transcript(&mut self, transcript: &str) -> Option<PendingDispatch> {
        if !self.session.listening {
            return None;
        }

        self.session.draft_message = transcript.to_string();
        self.session.status = status::LISTENING.to_string();

        let command = detect_voice_command(transcript);
        if !command.triggered {
            self.last_fired_transcript = None;
            return None;
        }
        if self.last_fired_transcript.as_deref() == Some(transcript) {
            debug!("ignoring repeated trigger transcript");
            return None;
        }
        self.last_fired_transcript = Some(transcript.to_string());

        // The buffer must be cleared before the request goes out, or the next
        // emission repeats the trigger phrase.
        self.speech.reset_transcript();

        let request = strip_voice_command(transcript, &command.strip_suffix);
        self.session.draft_message = request.clone();
        let routed = self.normalize_and_route(&request).ok()?;
        Some(self.begin_dispatch(routed))
    }

    pub async fn handle_transcript(&mut self, transcript: &str) -> Option<DispatchOutcome> {
        let pending = self.on_transcript(transcript)?;
        let result = self.backend.invoke(pending.command()).await;
        Some(self.complete_dispatch(pending, result))
    }

    pub fn toggle_model_tier(&mut self) {
        self.session.model_tier = self.session.model_tier.toggled();
        self.session.status = self.session.model_tier.switch_notice().to_string();
    }

    pub fn cycle_backend(&mut self) {
        self.session.backend = self.session.backend.next();
        self.session.status = self.session.backend.switch_notice().to_string();
    }

    pub fn start_stop_listening(&mut self) -> ListeningOutcome {
        if !self.voice_enabled {
            if let Some(banner) = &self.session.voice_banner {
                self.session.status = banner.clone();
            }
            return ListeningOutcome::VoiceDisabled;
        }

        match self.listening_state {
            ListeningState::Transitioning => {
                self.session.status = status::LISTENING_BUSY.to_string();
                ListeningOutcome::Busy
            }
            ListeningState::Idle => self.start_listening(),
            ListeningState::Listening => self.stop_listening(),
        }
    }

    fn start_listening(&mut self) -> ListeningOutcome {
        self.listening_state = ListeningState::Transitioning;
        match self.speech.start_continuous(&self.speech_locale) {
            Ok(()) => {
                self.listening_state = ListeningState::Listening;
                self.session.listening = true;
                self.last_fired_transcript = None;
                self.session.status = status::START_LISTENING.to_string();
                info!(locale = %self.speech_locale, "listening started");
                ListeningOutcome::Started
            }
            Err(SpeechError::Unsupported) => {
                self.report_speech_availability(SpeechAvailability::Unsupported);
                ListeningOutcome::VoiceDisabled
            }
            Err(SpeechError::MicrophoneUnavailable) => {
                self.report_speech_availability(SpeechAvailability::MicrophoneUnavailable);
                ListeningOutcome::VoiceDisabled
            }
            Err(error) => {
                warn!(%error, "failed to start listening");
                self.listening_state = ListeningState::Idle;
                self.session.status = status::error(&error);
                ListeningOutcome::Failed(error.to_string())
            }
        }
    }

    fn stop_listening(&mut self) -> ListeningOutcome {
        self.listening_state = ListeningState::Transitioning;
        self.speech.reset_transcript();

        // A one-shot session flushes whatever the recognizer still buffers.
        if let Err(error) = self.speech.start_one_shot(&self.speech_locale) {
            warn!(%error, "failed to flush speech buffer");
        }
        if let Err(error) = self.speech.stop() {
            warn!(%error, "failed to stop speech recognition");
        }

        self.listening_state = ListeningState::Idle;
        self.session.listening = false;
        self.last_fired_transcript = None;
        self.session.status = status::STOP_LISTENING.to_string();
        info!("listening stopped");
        ListeningOutcome::Stopped
    }

    /// Unsupported speech or a missing microphone turns voice off for the rest
    /// of the session and leaves a persistent banner.
    pub fn report_speech_availability(&mut self, availability: SpeechAvailability) {
        let Some(notice) = availability.notice() else {
            return;
        };

        warn!(?availability, "voice input disabled");
        self.voice_enabled = false;
        self.listening_state = ListeningState::Idle;
        self.session.listening = false;
        self.session.voice_banner = Some(notice.to_string());
        self.session.status = notice.to_string();
    }

    /// Archives the conversation as a memo, then clears the backend history.
    pub async fn reset_session(&mut self) {
        let memo = self.backend.invoke(&BackendCommand::CreateMemo).await;
        let history = self.backend.invoke(&BackendCommand::ResetHistory).await;
        self.finish_reset(memo, history);
    }

    /// Applies the memo and history-reset replies. Neither failure blocks the
    /// local reset.
    pub fn finish_reset(
        &mut self,
        memo: Result<String, BackendError>,
        history: Result<String, BackendError>,
    ) {
        match memo {
            Ok(memo) => self.session.last_memo = Some(memo),
            Err(error) => warn!(%error, "memo before reset failed"),
        }
        if let Err(error) = history {
            warn!(%error, "history reset failed");
        }

        self.session.attached_images.clear();
        self.session.status = status::RESET_DONE.to_string();
        info!("session reset");
    }

    pub async fn request_with_persona(&mut self, persona: SystemPersona) -> DispatchOutcome {
        let command = self.begin_persona(persona);
        let result = self.backend.invoke(&command).await;
        self.finish_persona(persona, result)
    }

    /// Records the chosen persona and returns the directive to send.
    pub fn begin_persona(&mut self, persona: SystemPersona) -> BackendCommand {
        self.session.system_persona = persona;
        BackendCommand::SystemDirective { persona }
    }

    pub fn finish_persona(
        &mut self,
        persona: SystemPersona,
        result: Result<String, BackendError>,
    ) -> DispatchOutcome {
        match result {
            Ok(reply) => {
                self.session.status = reply;
                DispatchOutcome::Completed
            }
            Err(error) => {
                warn!(persona_id = persona.id(), %error, "system directive failed");
                self.session.status = status::error(&error);
                DispatchOutcome::Failed(error.to_string())
            }
        }
    }

    /// Runs the preset at `index`; unknown indexes do nothing.
    pub async fn select_preset(&mut self, index: usize) -> Option<DispatchOutcome> {
        match preset(index)?.action {
            PresetAction::Persona(persona) => Some(self.request_with_persona(persona).await),
            PresetAction::Prompt(text) => Some(self.submit(text).await),
        }
    }

    /// Asks the backend whether provider credentials are configured. A missing
    /// key only leaves an alert in the result area.
    pub async fn check_environment(&mut self) -> bool {
        let result = self.backend.invoke(&BackendCommand::EnvironmentCheck).await;
        self.finish_environment_check(result)
    }

    pub fn finish_environment_check(&mut self, result: Result<String, BackendError>) -> bool {
        let ready = match result {
            Ok(reply) => parse_environment_reply(&reply),
            Err(error) => {
                warn!(%error, "environment check failed");
                false
            }
        };

        if !ready {
            self.session.last_result = status::MISSING_CREDENTIALS.to_string();
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::session::{Backend, ModelTier};
    use crate::speech::{SpeechCall, StubSpeech};

    const PNG: &str = "data:image/png;base64,iVBORw0KGgo=";

    fn dispatcher_with(backend: StubBackend) -> Dispatcher<StubBackend, StubSpeech> {
        Dispatcher::new(backend, StubSpeech::default(), &AppSettings::default())
    }

    fn dispatcher() -> Dispatcher<StubBackend, StubSpeech> {
        dispatcher_with(StubBackend::new())
    }

    fn failure(message: &str) -> Result<String, BackendError> {
        Err(BackendError::Failed {
            status: Some(1),
            message: message.to_string(),
        })
    }

    #[test]
    fn all_history_ignores_staged_draft() {
        let mut dispatcher = dispatcher();
        dispatcher.set_draft("something typed earlier");

        let routed = dispatcher
            .normalize_and_route("/all")
            .expect("history route should succeed");
        assert_eq!(routed, RoutedRequest::FetchAllHistory);
    }

    #[test]
    fn image_marker_is_removed_once() {
        let mut dispatcher = dispatcher();
        let routed = dispatcher
            .normalize_and_route("describe this /image of a cat")
            .expect("image route should succeed");
        assert_eq!(
            routed,
            RoutedRequest::GenerateImage {
                prompt: "describe this  of a cat".to_string()
            }
        );
    }

    #[test]
    fn empty_input_without_draft_is_rejected_locally() {
        let mut dispatcher = dispatcher();
        assert_eq!(
            dispatcher.normalize_and_route(""),
            Err(RouteError::EmptyMessage)
        );
        assert_eq!(dispatcher.session().status, "Please enter a msg.");
    }

    #[tokio::test]
    async fn empty_submit_makes_no_backend_call() {
        let mut dispatcher = dispatcher();
        let outcome = dispatcher.submit("").await;

        assert_eq!(outcome, DispatchOutcome::Rejected(RouteError::EmptyMessage));
        assert!(dispatcher.backend().calls().is_empty());
        assert_eq!(dispatcher.session().status, status::EMPTY_MESSAGE);
    }

    #[test]
    fn empty_input_falls_back_to_draft() {
        let mut dispatcher = dispatcher();
        dispatcher.set_draft("hello");
        dispatcher.append_draft(" world");

        let routed = dispatcher
            .normalize_and_route("")
            .expect("draft should be used");
        assert_eq!(
            routed,
            RoutedRequest::ChatCompletion {
                backend: Backend::Claude,
                model_tier: ModelTier::Performance,
                text: "hello world".to_string(),
                image: None,
            }
        );
    }

    #[test]
    fn cycle_backend_has_period_three() {
        let mut dispatcher = dispatcher();
        let original = dispatcher.session().backend;

        dispatcher.cycle_backend();
        assert_eq!(dispatcher.session().status, "Switch to ChatGPT.");
        dispatcher.cycle_backend();
        assert_eq!(dispatcher.session().status, "Switch to Gemini.");
        dispatcher.cycle_backend();
        assert_eq!(dispatcher.session().backend, original);
        assert_eq!(dispatcher.session().status, "Switch to Claude.");
    }

    #[test]
    fn toggle_model_tier_flips_and_reports() {
        let mut dispatcher = dispatcher();
        dispatcher.toggle_model_tier();
        assert_eq!(dispatcher.session().model_tier, ModelTier::Economical);
        assert_eq!(dispatcher.session().status, status::MODEL_ECONOMICAL);
        dispatcher.toggle_model_tier();
        assert_eq!(dispatcher.session().model_tier, ModelTier::Performance);
    }

    #[tokio::test]
    async fn successful_dispatch_settles_to_neutral() {
        let mut dispatcher = dispatcher_with(
            StubBackend::new().with_reply("claude_request", Ok("<p>answer</p>".to_string())),
        );
        dispatcher.set_draft("question");

        let outcome = dispatcher.submit("").await;

        let session = dispatcher.session();
        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(session.last_result, "<p>answer</p>");
        assert_eq!(session.status, "");
        assert_eq!(session.draft_message, "");
        assert_eq!(
            session.last_query,
            "<h2 class=\"line_wrap\">Q: question</h2>\n"
        );
    }

    #[tokio::test]
    async fn failed_dispatch_keeps_result_and_records_error() {
        let mut dispatcher = dispatcher_with(
            StubBackend::new()
                .with_reply("claude_request", Ok("<p>first</p>".to_string()))
                .with_reply("claude_request", failure("quota exceeded")),
        );
        dispatcher.submit("one").await;

        let outcome = dispatcher.submit("two").await;

        let session = dispatcher.session();
        assert_eq!(outcome, DispatchOutcome::Failed("quota exceeded".to_string()));
        assert_eq!(session.last_result, "<p>first</p>");
        assert_eq!(session.last_error.as_deref(), Some("quota exceeded"));
        assert_eq!(session.status, "");
        assert_eq!(session.draft_message, "");
    }

    #[test]
    fn begin_dispatch_is_optimistic() {
        let mut dispatcher = dispatcher();
        let routed = dispatcher
            .normalize_and_route("hi")
            .expect("route should succeed");
        let pending = dispatcher.begin_dispatch(routed);

        assert_eq!(dispatcher.session().status, "Thinking...");
        assert_eq!(pending.command().name(), "claude_request");
    }

    #[test]
    fn completion_while_listening_restores_listening_status() {
        let mut dispatcher = dispatcher();
        assert_eq!(dispatcher.start_stop_listening(), ListeningOutcome::Started);

        for result in [Ok("<p>ok</p>".to_string()), failure("offline")] {
            let routed = dispatcher
                .normalize_and_route("hi")
                .expect("route should succeed");
            let pending = dispatcher.begin_dispatch(routed);
            dispatcher.complete_dispatch(pending, result);
            assert_eq!(dispatcher.session().status, "Listening...");
        }
    }

    #[test]
    fn overlapping_completions_apply_in_arrival_order() {
        let mut dispatcher = dispatcher();
        let routed = dispatcher
            .normalize_and_route("first")
            .expect("route should succeed");
        let first = dispatcher.begin_dispatch(routed);
        let routed = dispatcher
            .normalize_and_route("second")
            .expect("route should succeed");
        let second = dispatcher.begin_dispatch(routed);
        assert!(second.sequence() > first.sequence());

        dispatcher.complete_dispatch(second, Ok("<p>second</p>".to_string()));
        dispatcher.complete_dispatch(first, Ok("<p>first</p>".to_string()));

        assert_eq!(dispatcher.session().last_result, "<p>first</p>");
        assert_eq!(
            dispatcher.session().last_query,
            "<h2 class=\"line_wrap\">Q: first</h2>\n"
        );
    }

    #[tokio::test]
    async fn pending_image_attaches_once() {
        let mut dispatcher = dispatcher();
        dispatcher.stage_image(PNG).expect("png should stage");

        dispatcher.submit("look at this").await;
        dispatcher.submit("and again").await;

        let calls = dispatcher.backend().calls();
        let images = calls
            .iter()
            .map(|call| match call {
                BackendCommand::ChatCompletion { image, .. } => image.clone(),
                other => panic!("unexpected command {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(images, vec![Some(PNG.to_string()), None]);
        assert_eq!(dispatcher.session().attached_images, vec![PNG.to_string()]);
        assert!(dispatcher.session().pending_image.is_none());
    }

    #[tokio::test]
    async fn image_route_does_not_consume_pending_image() {
        let mut dispatcher = dispatcher();
        dispatcher.stage_image(PNG).expect("png should stage");

        let routed = dispatcher
            .normalize_and_route("/image a cat")
            .expect("image route should succeed");

        assert!(matches!(routed, RoutedRequest::GenerateImage { .. }));
        assert!(dispatcher.session().attached_images.is_empty());
        assert_eq!(dispatcher.session().pending_image.as_deref(), Some(PNG));
    }

    #[test]
    fn invalid_image_is_not_staged() {
        let mut dispatcher = dispatcher();
        let error = dispatcher
            .stage_image("data:image/gif;base64,R0lGOD==")
            .expect_err("gif should be rejected");

        assert_eq!(error, ImageError::UnsupportedMediaType("image/gif".to_string()));
        assert!(dispatcher.session().pending_image.is_none());
        assert!(dispatcher.session().status.starts_with("error: "));
    }

    #[tokio::test]
    async fn generated_image_reply_fills_result_and_url() {
        let reply = r#"{"prompt":"a fluffy cat on a sofa","url":"https://img.example/cat.png"}"#;
        let mut dispatcher = dispatcher_with(
            StubBackend::new().with_reply("generate_image", Ok(reply.to_string())),
        );

        let outcome = dispatcher.submit("/image a cat").await;

        let session = dispatcher.session();
        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(session.last_result, " a cat to prompt, a fluffy cat on a sofa");
        assert_eq!(
            session.last_image_url.as_deref(),
            Some("https://img.example/cat.png")
        );
        assert_eq!(
            session.last_query,
            "<h2 class=\"line_wrap\"> a cat to prompt, a fluffy cat on a sofa</h2>\n"
        );
        assert!(matches!(
            dispatcher.backend().calls().first(),
            Some(BackendCommand::GenerateImage {
                size: ImageSize::Square,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn malformed_image_reply_is_a_failure() {
        let mut dispatcher = dispatcher_with(
            StubBackend::new().with_reply("generate_image", Ok("not json".to_string())),
        );

        let outcome = dispatcher.submit("/image a cat").await;

        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
        assert!(dispatcher.session().last_image_url.is_none());
        assert_eq!(
            dispatcher.session().last_query,
            "<h2 class=\"line_wrap\"> a cat</h2>\n"
        );
    }

    #[tokio::test]
    async fn history_reply_uses_history_heading() {
        let mut dispatcher = dispatcher();
        dispatcher.submit("/all").await;

        assert_eq!(dispatcher.session().last_result, "<p>no history</p>");
        assert_eq!(
            dispatcher.session().last_query,
            "<h2 class=\"line_wrap\">historical messages: </h2>\n"
        );
    }

    #[test]
    fn transcripts_are_ignored_when_not_listening() {
        let mut dispatcher = dispatcher();
        assert!(dispatcher.on_transcript("日本語でエンター。").is_none());
        assert_eq!(dispatcher.session().draft_message, "");
    }

    #[test]
    fn transcript_updates_draft_and_status() {
        let mut dispatcher = dispatcher();
        dispatcher.start_stop_listening();

        assert!(dispatcher.on_transcript("日本語で").is_none());
        assert_eq!(dispatcher.session().draft_message, "日本語で");
        assert_eq!(dispatcher.session().status, "Listening...");
    }

    #[test]
    fn trigger_phrase_resets_buffer_before_dispatch() {
        let mut dispatcher = dispatcher();
        dispatcher.start_stop_listening();

        let pending = dispatcher
            .on_transcript("日本語でエンター。")
            .expect("trigger should dispatch");

        assert_eq!(
            pending.command(),
            &BackendCommand::ChatCompletion {
                backend: Backend::Claude,
                model_tier: ModelTier::Performance,
                text: "日本語で".to_string(),
                image: None,
            }
        );
        assert_eq!(dispatcher.session().draft_message, "日本語で");
        assert_eq!(dispatcher.session().status, "Thinking...");
        assert_eq!(
            dispatcher.speech().calls().last(),
            Some(&SpeechCall::ResetTranscript)
        );
    }

    #[test]
    fn ask_phrase_sends_whole_transcript() {
        let mut dispatcher = dispatcher();
        dispatcher.start_stop_listening();

        let pending = dispatcher
            .on_transcript("これはテストです教えて。")
            .expect("trigger should dispatch");
        assert!(matches!(
            pending.routed(),
            RoutedRequest::ChatCompletion { text, .. } if text == "これはテストです教えて。"
        ));
    }

    #[test]
    fn repeated_trigger_transcript_fires_once() {
        let mut dispatcher = dispatcher();
        dispatcher.start_stop_listening();

        assert!(dispatcher.on_transcript("送信。").is_none());
        assert!(dispatcher.on_transcript("質問です送信。").is_some());
        assert!(dispatcher.on_transcript("質問です送信。").is_none());

        assert!(dispatcher.on_transcript("次の").is_none());
        assert!(dispatcher.on_transcript("質問です送信。").is_some());
    }

    #[tokio::test]
    async fn voice_dispatch_keeps_listening_status() {
        let mut dispatcher = dispatcher();
        dispatcher.start_stop_listening();

        let outcome = dispatcher.handle_transcript("天気を教えて。").await;

        assert_eq!(outcome, Some(DispatchOutcome::Completed));
        assert_eq!(dispatcher.session().status, "Listening...");
        assert_eq!(dispatcher.session().draft_message, "");
        assert_eq!(
            dispatcher.session().last_result,
            "<p>echo: 天気を教えて。</p>"
        );
    }

    #[test]
    fn listening_toggle_drives_speech_capability() {
        let mut dispatcher = dispatcher();

        assert_eq!(dispatcher.start_stop_listening(), ListeningOutcome::Started);
        assert!(dispatcher.session().listening);
        assert_eq!(dispatcher.session().status, "Start listening.");

        assert_eq!(dispatcher.start_stop_listening(), ListeningOutcome::Stopped);
        assert!(!dispatcher.session().listening);
        assert_eq!(dispatcher.session().status, "Stopped listening.");
        assert_eq!(dispatcher.listening_state(), ListeningState::Idle);

        assert_eq!(
            dispatcher.speech().calls(),
            vec![
                SpeechCall::StartContinuous("ja".to_string()),
                SpeechCall::ResetTranscript,
                SpeechCall::StartOneShot("ja".to_string()),
                SpeechCall::Stop,
            ]
        );
    }

    #[test]
    fn toggle_during_transition_is_busy() {
        let mut dispatcher = dispatcher();
        dispatcher.listening_state = ListeningState::Transitioning;

        assert_eq!(dispatcher.start_stop_listening(), ListeningOutcome::Busy);
        assert_eq!(dispatcher.session().status, status::LISTENING_BUSY);
        assert!(dispatcher.speech().calls().is_empty());
    }

    #[test]
    fn capability_failure_reverts_to_idle() {
        let speech =
            StubSpeech::default().failing_start(SpeechError::Capability("busy".to_string()));
        let mut dispatcher = Dispatcher::new(StubBackend::new(), speech, &AppSettings::default());

        let outcome = dispatcher.start_stop_listening();

        assert!(matches!(outcome, ListeningOutcome::Failed(_)));
        assert_eq!(dispatcher.listening_state(), ListeningState::Idle);
        assert!(!dispatcher.session().listening);
        assert!(dispatcher.session().status.starts_with("error: "));
        assert!(dispatcher.voice_enabled());
    }

    #[test]
    fn missing_microphone_disables_voice_for_session() {
        let speech = StubSpeech::default().failing_start(SpeechError::MicrophoneUnavailable);
        let mut dispatcher = Dispatcher::new(StubBackend::new(), speech, &AppSettings::default());

        assert_eq!(
            dispatcher.start_stop_listening(),
            ListeningOutcome::VoiceDisabled
        );
        assert_eq!(
            dispatcher.session().voice_banner.as_deref(),
            Some(status::MICROPHONE_UNAVAILABLE)
        );

        dispatcher.set_draft("typing still works");
        dispatcher.toggle_model_tier();
        assert_eq!(
            dispatcher.start_stop_listening(),
            ListeningOutcome::VoiceDisabled
        );
        assert_eq!(dispatcher.session().status, status::MICROPHONE_UNAVAILABLE);
    }

    #[test]
    fn unsupported_speech_is_reported_at_startup() {
        let dispatcher = Dispatcher::new(
            StubBackend::new(),
            StubSpeech::new(SpeechAvailability::Unsupported),
            &AppSettings::default(),
        );

        assert!(!dispatcher.voice_enabled());
        assert_eq!(dispatcher.session().status, status::SPEECH_UNSUPPORTED);
    }

    #[tokio::test]
    async fn reset_memos_then_clears_history() {
        let mut dispatcher = dispatcher();
        dispatcher.stage_image(PNG).expect("png should stage");
        dispatcher.submit("with image").await;
        let answer = dispatcher.session().last_result.clone();

        dispatcher.reset_session().await;

        let names = dispatcher
            .backend()
            .calls()
            .iter()
            .map(BackendCommand::name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["claude_request", "memo", "reset"]);

        let session = dispatcher.session();
        assert!(session.attached_images.is_empty());
        assert_eq!(session.status, "Done! reset message history.");
        assert_eq!(session.last_result, answer);
        assert_eq!(session.last_memo.as_deref(), Some("memo saved"));
    }

    #[tokio::test]
    async fn reset_survives_backend_failures() {
        let mut dispatcher = dispatcher_with(
            StubBackend::new()
                .with_reply("memo", failure("no history"))
                .with_reply("reset", failure("offline")),
        );

        dispatcher.reset_session().await;

        assert_eq!(dispatcher.session().status, status::RESET_DONE);
        assert!(dispatcher.session().last_memo.is_none());
    }

    #[tokio::test]
    async fn persona_reply_becomes_status() {
        let mut dispatcher = dispatcher();
        dispatcher.set_draft("untouched");

        let outcome = dispatcher.request_with_persona(SystemPersona::Strict).await;

        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(dispatcher.session().status, "system directive 1 applied");
        assert_eq!(dispatcher.session().draft_message, "untouched");
        assert_eq!(
            dispatcher.backend().calls(),
            vec![BackendCommand::SystemDirective {
                persona: SystemPersona::Strict
            }]
        );
    }

    #[tokio::test]
    async fn persona_failure_is_surfaced() {
        let mut dispatcher =
            dispatcher_with(StubBackend::new().with_reply("request_system", failure("denied")));

        dispatcher.request_with_persona(SystemPersona::Critical).await;

        assert_eq!(dispatcher.session().status, "error: denied");
    }

    #[tokio::test]
    async fn presets_route_to_persona_or_prompt() {
        let mut dispatcher = dispatcher();

        assert_eq!(dispatcher.select_preset(99).await, None);
        assert_eq!(
            dispatcher.select_preset(2).await,
            Some(DispatchOutcome::Completed)
        );
        assert_eq!(dispatcher.session().system_persona, SystemPersona::Positive);
        assert_eq!(
            dispatcher.select_preset(0).await,
            Some(DispatchOutcome::Completed)
        );
        assert_eq!(dispatcher.session().system_persona, SystemPersona::None);
        assert_eq!(
            dispatcher.select_preset(5).await,
            Some(DispatchOutcome::Completed)
        );

        let calls = dispatcher.backend().calls();
        let names = calls.iter().map(BackendCommand::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["request_system", "request_system", "claude_request"]);
        assert_eq!(calls[1].args(), serde_json::json!({"persona_id": 0}));
    }

    #[test]
    fn voice_dispatch_proceeds_while_persona_is_in_flight() {
        let mut dispatcher = dispatcher();
        dispatcher.start_stop_listening();

        let directive = dispatcher.begin_persona(SystemPersona::Strict);
        let pending = dispatcher
            .on_transcript("質問です送信。")
            .expect("trigger should dispatch while the directive is pending");
        assert_eq!(
            dispatcher.speech().calls().last(),
            Some(&SpeechCall::ResetTranscript)
        );

        dispatcher.complete_dispatch(pending, Ok("<p>answer</p>".to_string()));
        let outcome = dispatcher.finish_persona(SystemPersona::Strict, Ok("strict on".to_string()));

        assert_eq!(directive.args(), serde_json::json!({"persona_id": 1}));
        assert_eq!(outcome, DispatchOutcome::Completed);
        assert_eq!(dispatcher.session().status, "strict on");
        assert_eq!(dispatcher.session().last_result, "<p>answer</p>");
        assert_eq!(dispatcher.session().system_persona, SystemPersona::Strict);
    }

    #[test]
    fn split_reset_and_environment_check_apply_late_replies() {
        let mut dispatcher = dispatcher();
        dispatcher.session.attached_images.push(PNG.to_string());

        dispatcher.finish_reset(Ok("memo text".to_string()), failure("offline"));
        assert_eq!(dispatcher.session().status, status::RESET_DONE);
        assert_eq!(dispatcher.session().last_memo.as_deref(), Some("memo text"));
        assert!(dispatcher.session().attached_images.is_empty());

        assert!(!dispatcher.finish_environment_check(failure("timed out")));
        assert_eq!(dispatcher.session().last_result, status::MISSING_CREDENTIALS);
    }

    #[tokio::test]
    async fn missing_credentials_leave_alert_but_stay_usable() {
        let mut dispatcher = dispatcher_with(
            StubBackend::new().with_reply("is_there_env", Ok("false".to_string())),
        );

        assert!(!dispatcher.check_environment().await);
        assert_eq!(dispatcher.session().last_result, status::MISSING_CREDENTIALS);

        let outcome = dispatcher.submit("still works").await;
        assert_eq!(outcome, DispatchOutcome::Completed);
    }

    #[tokio::test]
    async fn present_credentials_leave_result_alone() {
        let mut dispatcher = dispatcher();
        assert!(dispatcher.check_environment().await);
        assert_eq!(dispatcher.session().last_result, "");
    }
}
