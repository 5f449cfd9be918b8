//! Negotiation state machine.

use std::future::Future;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::credential::{Credential, CredentialIssuer};
use super::peer::{ChannelEvent, DataChannel, PeerConnection, PeerFactory};
use super::signaling::SignalingClient;
use crate::config::AssistantConfig;
use crate::core::media::MediaLifecycleManager;
use crate::core::realtime::{ClientEvent, EVENTS_CHANNEL_LABEL};
use crate::errors::{SessionError, SessionResult};

/// Negotiation progress, published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    AcquiringCredential,
    BuildingConnection,
    CapturingMedia,
    GatheringCandidates,
    ExchangingSdp,
    OpeningChannel,
    Ready,
    /// Terminal; reachable from any step
    Error,
    /// Terminal; reached from `Ready` on hang-up
    Closed,
}

impl NegotiationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationPhase::Idle => "idle",
            NegotiationPhase::AcquiringCredential => "acquiring_credential",
            NegotiationPhase::BuildingConnection => "building_connection",
            NegotiationPhase::CapturingMedia => "capturing_media",
            NegotiationPhase::GatheringCandidates => "gathering_candidates",
            NegotiationPhase::ExchangingSdp => "exchanging_sdp",
            NegotiationPhase::OpeningChannel => "opening_channel",
            NegotiationPhase::Ready => "ready",
            NegotiationPhase::Error => "error",
            NegotiationPhase::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationPhase::Error | NegotiationPhase::Closed)
    }
}

impl std::fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One negotiated realtime connection.
pub struct Session {
    /// Opaque identifier from the credential issuer
    pub id: String,
    pub credential: Credential,
    pub expires_at: OffsetDateTime,
    pub peer: Arc<dyn PeerConnection>,
    pub channel: Arc<dyn DataChannel>,
    /// Server events in arrival order
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("expires_at", &self.expires_at)
            .field("channel", &self.channel.label())
            .finish()
    }
}

/// Drives one negotiation at a time through [`NegotiationPhase`].
pub struct ConnectionNegotiator {
    config: Arc<AssistantConfig>,
    issuer: Arc<dyn CredentialIssuer>,
    signaling: Arc<dyn SignalingClient>,
    peers: Arc<dyn PeerFactory>,
    phase: watch::Sender<NegotiationPhase>,
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = SessionResult<T>>,
) -> SessionResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Cancelled),
        result = fut => result,
    }
}

impl ConnectionNegotiator {
    pub fn new(
        config: Arc<AssistantConfig>,
        issuer: Arc<dyn CredentialIssuer>,
        signaling: Arc<dyn SignalingClient>,
        peers: Arc<dyn PeerFactory>,
    ) -> Self {
        let (phase, _) = watch::channel(NegotiationPhase::Idle);
        Self {
            config,
            issuer,
            signaling,
            peers,
            phase,
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<NegotiationPhase> {
        self.phase.subscribe()
    }

    /// Record hang-up of a ready session.
    pub fn mark_closed(&self) {
        self.set_phase(NegotiationPhase::Closed);
    }

    fn set_phase(&self, phase: NegotiationPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "Negotiation phase");
        }
    }

    /// Establish a session, attaching local media from `media`.
    ///
    /// Any failure closes the partially built peer connection and leaves the
    /// phase at `Error`; cancellation leaves it at `Closed`.
    pub async fn negotiate(
        &self,
        media: &Mutex<MediaLifecycleManager>,
        cancel: &CancellationToken,
    ) -> SessionResult<Session> {
        let mut peer = None;
        match self.establish(media, cancel, &mut peer).await {
            Ok(session) => {
                self.set_phase(NegotiationPhase::Ready);
                info!(session_id = %session.id, "Session ready");
                Ok(session)
            }
            Err(e) => {
                if let Some(peer) = peer
                    && let Err(close_err) = peer.close().await
                {
                    debug!(error = %close_err, "Failed to close peer after negotiation failure");
                }
                if matches!(e, SessionError::Cancelled) {
                    info!("Negotiation cancelled");
                    self.set_phase(NegotiationPhase::Closed);
                } else {
                    error!(error = %e, "Negotiation failed");
                    self.set_phase(NegotiationPhase::Error);
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        media: &Mutex<MediaLifecycleManager>,
        cancel: &CancellationToken,
        peer_slot: &mut Option<Arc<dyn PeerConnection>>,
    ) -> SessionResult<Session> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        self.set_phase(NegotiationPhase::AcquiringCredential);
        let credential = cancellable(cancel, self.issuer.issue()).await?;
        credential.ensure_fresh(self.config.credential_min_ttl, OffsetDateTime::now_utc())?;
        debug!(session_id = %credential.session_id, "Credential acquired");

        self.set_phase(NegotiationPhase::BuildingConnection);
        let peer = cancellable(cancel, self.peers.create(&self.config.ice_servers)).await?;
        *peer_slot = Some(peer.clone());
        let handle = cancellable(cancel, peer.create_data_channel(EVENTS_CHANNEL_LABEL)).await?;

        self.set_phase(NegotiationPhase::CapturingMedia);
        cancellable(cancel, async { media.lock().await.attach(peer.clone()).await }).await?;

        self.set_phase(NegotiationPhase::GatheringCandidates);
        cancellable(cancel, peer.create_offer()).await?;
        let ice_timeout = self.config.ice_gathering_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            gathered = tokio::time::timeout(ice_timeout, peer.wait_ice_gathering_complete()) => {
                if gathered.is_err() {
                    warn!(
                        timeout_ms = ice_timeout.as_millis() as u64,
                        "ICE gathering incomplete, proceeding with available candidates"
                    );
                }
            }
        }

        self.set_phase(NegotiationPhase::ExchangingSdp);
        let offer = peer.local_description().await?;
        let answer = cancellable(cancel, self.signaling.exchange(&offer, &credential)).await?;
        cancellable(cancel, peer.set_remote_answer(answer)).await?;

        self.set_phase(NegotiationPhase::OpeningChannel);
        let channel = handle.channel;
        let open_timeout = self.config.data_channel_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            opened = tokio::time::timeout(open_timeout, channel.wait_open()) => {
                if opened.is_err() {
                    return Err(SessionError::NegotiationTimeout(format!(
                        "data channel did not open within {}ms (peer state {:?})",
                        open_timeout.as_millis(),
                        peer.state()
                    )));
                }
            }
        }

        // The service ignores events sent before the channel is open.
        let update = ClientEvent::SessionUpdate {
            session: self.config.session_params(),
        };
        channel.send_text(update.to_json()?).await?;

        Ok(Session {
            id: credential.session_id.clone(),
            expires_at: credential.expires_at,
            credential,
            peer,
            channel,
            events: handle.events,
        })
    }
}
