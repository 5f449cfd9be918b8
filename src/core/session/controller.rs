//! Top-level session controller.
//!
//! Owns at most one live [`Session`] and the tasks attached to it: the event
//! loop reading the data channel and, in video mode, the periodic frame
//! capture. All asynchronous work is bound to a per-call
//! [`CancellationToken`]; hang-up cancels it before releasing any resource.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::{AssistantState, dispatch};
use crate::config::AssistantConfig;
use crate::core::media::{FrameEncoding, MediaCapability, MediaLifecycleManager};
use crate::core::negotiation::{
    ChannelEvent, ConnectionNegotiator, CredentialIssuer, DataChannel, HttpCredentialIssuer,
    HttpSignalingClient, PeerConnection, PeerFactory, Session, SignalingClient,
    WebRtcPeerFactory,
};
use crate::core::realtime::tools::error_output;
use crate::core::realtime::{
    ClientEvent, ConversationItem, PendingToolCall, ServerEvent, SyntheticToolExecutor,
    ToolCallTracker, ToolExecutor, Transcript, TranscriptItem,
};
use crate::errors::{SessionError, SessionResult};

const EVENT_BUFFER: usize = 256;

/// Notifications published to the surrounding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Assistant state changed
    State(AssistantState),
    /// A transcript item was created or updated
    Transcript(TranscriptItem),
    /// A tool result was submitted to the service
    ToolCall(PendingToolCall),
    /// Something went wrong; `fatal` errors end the session
    Error { message: String, fatal: bool },
    /// The session was hung up
    Closed,
}

// =============================================================================
// Shared state
// =============================================================================

/// State shared between the controller and its background tasks.
struct Shared {
    state: watch::Sender<AssistantState>,
    events: broadcast::Sender<SessionEvent>,
    transcript: Mutex<Transcript>,
    tools: Mutex<ToolCallTracker>,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(AssistantState::default());
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state,
            events,
            transcript: Mutex::new(Transcript::new()),
            tools: Mutex::new(ToolCallTracker::new()),
        }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: AssistantState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = %next, "Assistant state");
            self.publish(SessionEvent::State(next));
        }
    }

    fn reset(&self) {
        *self.transcript.lock() = Transcript::new();
        *self.tools.lock() = ToolCallTracker::new();
    }

    /// Apply one server event; returns a tool call ready for execution.
    fn handle_event(&self, event: &ServerEvent, elapsed: Duration) -> Option<PendingToolCall> {
        let patch = dispatch(*self.state.borrow(), event);
        if let (Some(turn), ServerEvent::Error { error }) = (&patch.error, event) {
            let err = SessionError::Protocol(error.clone());
            if turn.tool_error {
                warn!(error = %err, "Server rejected tool configuration");
            } else {
                warn!(error = %err, "Server error event");
            }
            self.publish(SessionEvent::Error {
                message: turn.message.clone(),
                fatal: err.is_fatal(),
            });
        }
        if let Some(next) = patch.state {
            self.set_state(next);
        }

        let updated: Vec<TranscriptItem> = {
            let mut transcript = self.transcript.lock();
            let touched = transcript.fold(event, elapsed);
            touched
                .into_iter()
                .map(|idx| transcript.items()[idx].clone())
                .collect()
        };
        for item in updated {
            self.publish(SessionEvent::Transcript(item));
        }

        self.tools.lock().observe(event)
    }

    fn fail(&self, message: String, fatal: bool) {
        self.set_state(AssistantState::Error);
        self.publish(SessionEvent::Error { message, fatal });
    }
}

async fn send_event(channel: &dyn DataChannel, event: &ClientEvent) -> SessionResult<()> {
    if !channel.is_open() {
        return Err(SessionError::NotConnected);
    }
    channel.send_text(event.to_json()?).await
}

// =============================================================================
// Background tasks
// =============================================================================

#[derive(Clone)]
struct LoopContext {
    shared: Arc<Shared>,
    channel: Arc<dyn DataChannel>,
    executor: Arc<dyn ToolExecutor>,
    cancel: CancellationToken,
    started: Instant,
}

impl LoopContext {
    async fn run_events(self, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(ChannelEvent::Message(text)) => self.handle_message(&text).await,
                Some(ChannelEvent::Error(e)) => {
                    self.channel_lost(format!("Data channel error: {e}"));
                    break;
                }
                Some(ChannelEvent::Closed) | None => {
                    self.channel_lost("Data channel closed".to_string());
                    break;
                }
            }
        }
        debug!("Event loop stopped");
    }

    fn channel_lost(&self, message: String) {
        if self.cancel.is_cancelled() {
            return;
        }
        error!(%message, "Session channel lost");
        self.shared.fail(message, true);
    }

    async fn handle_message(&self, text: &str) {
        let event = match ServerEvent::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to decode server event");
                return;
            }
        };
        debug!(kind = event.kind(), "Server event");

        if let Some(call) = self.shared.handle_event(&event, self.started.elapsed())
            && let Err(e) = self.submit_tool_result(call).await
        {
            warn!(error = %e, "Failed to submit tool result");
        }
    }

    async fn submit_tool_result(&self, call: PendingToolCall) -> SessionResult<()> {
        let name = call.name_or_default().to_string();
        info!(call_id = %call.call_id, tool = %name, "Executing tool call");
        let output = match self.executor.execute(&name, &call.arguments).await {
            Ok(output) => output,
            Err(e) => {
                warn!(call_id = %call.call_id, error = %e, "Tool execution failed");
                error_output(&e.to_string())
            }
        };

        let item = ConversationItem::function_output(call.call_id.clone(), output);
        send_event(self.channel.as_ref(), &ClientEvent::create_item(item)).await?;
        if let Some(sent) = self.shared.tools.lock().mark_sent(&call.call_id) {
            self.shared.publish(SessionEvent::ToolCall(sent));
        }
        send_event(self.channel.as_ref(), &ClientEvent::create_response()).await
    }

    async fn run_frames(self, media: Arc<AsyncMutex<MediaLifecycleManager>>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.channel.is_open() {
                continue;
            }
            let captured = {
                let media = media.lock().await;
                if !media.can_capture_frame() {
                    continue;
                }
                media.capture_frame_data_uri().await
            };
            let result = match captured {
                Ok(uri) => {
                    let item = ConversationItem::user_image(uri);
                    send_event(self.channel.as_ref(), &ClientEvent::create_item(item)).await
                }
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                debug!(error = %e, "Skipped periodic frame");
            }
        }
        debug!("Frame loop stopped");
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Resources owned by one live session.
struct LiveSession {
    id: String,
    peer: Arc<dyn PeerConnection>,
    channel: Arc<dyn DataChannel>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveSession {
    async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Err(e) = self.channel.close().await {
            debug!(error = %e, "Data channel close failed");
        }
        if let Err(e) = self.peer.close().await {
            debug!(error = %e, "Peer connection close failed");
        }
        info!(session_id = %self.id, "Session resources released");
    }
}

/// Drives negotiation, media and the event protocol for one call at a time.
pub struct SessionController {
    config: Arc<AssistantConfig>,
    negotiator: ConnectionNegotiator,
    media: Arc<AsyncMutex<MediaLifecycleManager>>,
    executor: Arc<dyn ToolExecutor>,
    shared: Arc<Shared>,
    /// Token of the current call; `Some` while a call is starting or live
    active: Mutex<Option<CancellationToken>>,
    live: AsyncMutex<Option<LiveSession>>,
}

impl SessionController {
    pub fn new(
        config: AssistantConfig,
        capability: Arc<dyn MediaCapability>,
        issuer: Arc<dyn CredentialIssuer>,
        signaling: Arc<dyn SignalingClient>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        let config = Arc::new(config);
        let encoding = FrameEncoding {
            max_width: config.frame_max_width,
            quality: config.jpeg_quality,
        };
        let media = MediaLifecycleManager::new(config.call_mode, capability, encoding);
        Self {
            negotiator: ConnectionNegotiator::new(config.clone(), issuer, signaling, peers),
            config,
            media: Arc::new(AsyncMutex::new(media)),
            executor: Arc::new(SyntheticToolExecutor),
            shared: Arc::new(Shared::new()),
            active: Mutex::new(None),
            live: AsyncMutex::new(None),
        }
    }

    /// Controller talking to the configured HTTP collaborators over webrtc-rs.
    pub fn from_config(config: AssistantConfig, capability: Arc<dyn MediaCapability>) -> Self {
        let issuer = HttpCredentialIssuer::new(config.credential_url.clone())
            .with_api_key(config.credential_api_key.clone())
            .with_timeout(config.http_timeout);
        let signaling = HttpSignalingClient::new(
            config.signaling_url.clone(),
            config.model.as_str(),
            config.realtime_version.clone(),
        )
        .with_timeout(config.http_timeout);
        Self::new(
            config,
            capability,
            Arc::new(issuer),
            Arc::new(signaling),
            Arc::new(WebRtcPeerFactory::new()),
        )
    }

    /// Replace the tool executor used for function calls.
    pub fn with_tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn state(&self) -> AssistantState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<AssistantState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the transcript so far.
    pub fn transcript(&self) -> Transcript {
        self.shared.transcript.lock().clone()
    }

    pub fn negotiator(&self) -> &ConnectionNegotiator {
        &self.negotiator
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.live.lock().await.as_ref().map(|live| live.id.clone())
    }

    // =========================================================================
    // Call lifecycle
    // =========================================================================

    /// Start a call: capture audio, negotiate, then run the event loop.
    ///
    /// On failure every acquired resource is released and the state moves to
    /// `Error` with a user-facing message.
    pub async fn start(&self) -> SessionResult<()> {
        let cancel = {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(SessionError::AlreadyActive);
            }
            let token = CancellationToken::new();
            *active = Some(token.clone());
            token
        };

        self.shared.reset();
        self.shared.set_state(AssistantState::Connecting);
        info!(mode = %self.config.call_mode, model = %self.config.model, "Starting session");

        match self.connect(&cancel).await {
            Ok(session) => self.go_live(session, cancel).await,
            Err(SessionError::Cancelled) => {
                // Hang-up already released the session; catch audio acquired late.
                self.media.lock().await.stop_all();
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                self.media.lock().await.stop_all();
                self.release_token(&cancel);
                self.shared.fail(e.user_message(), true);
                Err(e)
            }
        }
    }

    async fn connect(&self, cancel: &CancellationToken) -> SessionResult<Session> {
        // Audio must exist before the offer is created.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            started = async { self.media.lock().await.start_audio().await } => started?,
        }
        self.negotiator.negotiate(&self.media, cancel).await
    }

    async fn go_live(&self, session: Session, cancel: CancellationToken) -> SessionResult<()> {
        let mut live = self.live.lock().await;
        if cancel.is_cancelled() {
            let Session { peer, channel, .. } = session;
            LiveSession {
                id: String::new(),
                peer,
                channel,
                tasks: Vec::new(),
            }
            .shutdown()
            .await;
            self.media.lock().await.stop_all();
            return Err(SessionError::Cancelled);
        }

        let Session {
            id,
            peer,
            channel,
            events,
            ..
        } = session;
        let context = LoopContext {
            shared: self.shared.clone(),
            channel: channel.clone(),
            executor: self.executor.clone(),
            cancel,
            started: Instant::now(),
        };

        let mut tasks = vec![tokio::spawn(context.clone().run_events(events))];
        if self.config.call_mode.is_video() {
            tasks.push(tokio::spawn(
                context.run_frames(self.media.clone(), self.config.frame_interval),
            ));
        }

        info!(session_id = %id, "Session live");
        *live = Some(LiveSession {
            id,
            peer,
            channel,
            tasks,
        });
        self.shared.set_state(AssistantState::Idle);
        Ok(())
    }

    fn release_token(&self, token: &CancellationToken) {
        let mut active = self.active.lock();
        // A cancelled token was already taken by `stop`.
        if !token.is_cancelled() {
            *active = None;
        }
    }

    /// Hang up: cancel pending work, close the channel and peer, stop local
    /// tracks. Safe to call any number of times.
    pub async fn stop(&self) {
        let Some(token) = self.active.lock().take() else {
            debug!("Stop requested with no active session");
            return;
        };
        token.cancel();

        if let Some(live) = self.live.lock().await.take() {
            live.shutdown().await;
            self.negotiator.mark_closed();
        }
        self.media.lock().await.stop_all();

        self.shared.set_state(AssistantState::Idle);
        self.shared.publish(SessionEvent::Closed);
        info!("Session closed");
    }

    /// Alias of [`SessionController::stop`].
    pub async fn hang_up(&self) {
        self.stop().await;
    }

    // =========================================================================
    // Media controls
    // =========================================================================

    pub async fn set_muted(&self, muted: bool) {
        self.media.lock().await.set_muted(muted);
    }

    /// Flip mute, returning the new value.
    pub async fn toggle_mute(&self) -> bool {
        self.media.lock().await.toggle_mute()
    }

    pub async fn is_muted(&self) -> bool {
        self.media.lock().await.is_muted()
    }

    /// Flip the camera, returning whether it is now on.
    ///
    /// Failures leave the call running with the previous media.
    pub async fn toggle_camera(&self) -> SessionResult<bool> {
        let result = self.media.lock().await.toggle_camera().await;
        if let Err(e) = &result {
            warn!(error = %e, "Camera toggle failed");
        }
        result
    }

    pub async fn is_camera_on(&self) -> bool {
        self.media.lock().await.is_camera_on()
    }

    // =========================================================================
    // Client events
    // =========================================================================

    async fn channel(&self) -> SessionResult<Arc<dyn DataChannel>> {
        self.live
            .lock()
            .await
            .as_ref()
            .map(|live| live.channel.clone())
            .ok_or(SessionError::NotConnected)
    }

    /// Send the current camera frame and ask for a response.
    pub async fn send_frame(&self) -> SessionResult<()> {
        let channel = self.channel().await?;
        let uri = self.media.lock().await.capture_frame_data_uri().await?;
        send_event(
            channel.as_ref(),
            &ClientEvent::create_item(ConversationItem::user_image(uri)),
        )
        .await?;
        send_event(channel.as_ref(), &ClientEvent::create_response()).await
    }

    /// Send a typed user message and ask for a response.
    pub async fn send_text(&self, text: &str) -> SessionResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::InvalidState("message is empty".to_string()));
        }
        let channel = self.channel().await?;
        send_event(
            channel.as_ref(),
            &ClientEvent::create_item(ConversationItem::user_text(text)),
        )
        .await?;
        send_event(channel.as_ref(), &ClientEvent::create_response()).await
    }
}
