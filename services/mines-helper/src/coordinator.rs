//! Session coordinator.
//!
//! Owns the registry and the timeout scheduler and drives every claimed session from pickup to
//! its terminal status. All events (pickups, player actions, timer expiries) are handled one at a
//! time by [`SessionCoordinator::run`].
//!
//! ## Requirements
//! - The store claim decides ownership; a lost claim is not an error.
//! - Only the owner may act on a session. Anyone else gets an acknowledgement and nothing else.
//! - A session reaches exactly one terminal status and then leaves the registry, even when the
//!   final store write fails.
//! - Presenter failures never end a session, except a failed first render (there is nothing to
//!   recover through).

use mines_execution::{apply_action, apply_timeout, Outcome};
use mines_types::{PlayerActionKind, PlayerId, Session, SessionId, SessionStatus};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::pickup::PickupNotice;
use crate::presenter::{AckToken, Acknowledgement, Annotation, Presenter, PresenterError, SessionView};
use crate::registry::SessionRegistry;
use crate::store::SessionStore;
use crate::timeout::{Expiry, TimeoutPhase, TimeoutScheduler};

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Recorded on every session this worker claims.
    pub worker_id: String,
    pub offer_timeout: Duration,
    pub turn_timeout: Duration,
    /// Fixed seed for board generation; entropy when unset.
    pub rng_seed: Option<u64>,
}

/// A button press routed back from the chat transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerAction {
    pub session_id: SessionId,
    pub actor_id: PlayerId,
    pub ack: AckToken,
    pub kind: PlayerActionKind,
}

pub struct SessionCoordinator {
    worker_id: String,
    store: Arc<dyn SessionStore>,
    presenter: Arc<dyn Presenter>,
    registry: SessionRegistry,
    scheduler: TimeoutScheduler,
    rng: Mutex<StdRng>,
}

fn phase_for(status: SessionStatus) -> Option<TimeoutPhase> {
    match status {
        SessionStatus::AwaitingDifficulty => Some(TimeoutPhase::Offer),
        SessionStatus::InProgress => Some(TimeoutPhase::Turn),
        _ => None,
    }
}

fn presenter_ok(result: Result<(), PresenterError>) -> Result<(), PresenterError> {
    match result {
        Err(PresenterError::NotModified) => Ok(()),
        other => other,
    }
}

impl SessionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn SessionStore>,
        presenter: Arc<dyn Presenter>,
    ) -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (scheduler, expiries) =
            TimeoutScheduler::new(config.offer_timeout, config.turn_timeout);
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        (
            Self {
                worker_id: config.worker_id,
                store,
                presenter,
                registry: SessionRegistry::new(),
                scheduler,
                rng: Mutex::new(rng),
            },
            expiries,
        )
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Multiplex pickups, actions and expiries until both inbound channels close.
    pub async fn run(
        &self,
        mut pickups: mpsc::Receiver<PickupNotice>,
        mut actions: mpsc::Receiver<PlayerAction>,
        mut expiries: mpsc::UnboundedReceiver<Expiry>,
    ) {
        let mut pickups_open = true;
        let mut actions_open = true;
        info!(worker_id = %self.worker_id, "coordinator started");
        while pickups_open || actions_open {
            tokio::select! {
                notice = pickups.recv(), if pickups_open => match notice {
                    Some(notice) => self.handle_pickup(notice).await,
                    None => {
                        warn!("pickup channel closed");
                        pickups_open = false;
                    }
                },
                action = actions.recv(), if actions_open => match action {
                    Some(action) => self.handle_action(action).await,
                    None => {
                        warn!("action channel closed");
                        actions_open = false;
                    }
                },
                Some(expiry) = expiries.recv() => self.handle_expiry(expiry).await,
                else => break,
            }
        }
        info!(active = self.registry.len(), "coordinator stopped");
    }

    pub async fn handle_pickup(&self, notice: PickupNotice) {
        let external_game_id = notice.external_game_id;
        let mut session = match self
            .store
            .claim_pending(&external_game_id, &self.worker_id)
            .await
        {
            Ok(Some(session)) => session,
            Ok(None) => {
                info!(%external_game_id, "session already claimed or unknown");
                return;
            }
            Err(err) => {
                warn!(%external_game_id, ?err, "claim failed");
                return;
            }
        };
        let session_id = session.id;
        info!(%session_id, %external_game_id, owner = %session.owner_id, "claimed session");
        self.registry.put(session.clone());

        match self.presenter.render(&SessionView::build(&session), None).await {
            Ok(message) => session.state.message_ref = Some(message),
            Err(err) => {
                warn!(%session_id, ?err, "initial render failed");
                session.status = SessionStatus::CompletedErrorUi;
                session.state.error = Some(err.to_string());
                self.finish(session).await;
                return;
            }
        }

        if !self.registry.replace(session.clone()) {
            debug!(%session_id, "session left the registry during render");
            return;
        }
        self.arm(session_id, TimeoutPhase::Offer);
        self.persist_state(&session).await;
    }

    pub async fn handle_action(&self, action: PlayerAction) {
        let session_id = action.session_id;
        let Some(session) = self.registry.get(session_id) else {
            debug!(%session_id, action = action.kind.name(), "action on inactive session");
            self.acknowledge(&action.ack, Acknowledgement::NotActionable)
                .await;
            return;
        };
        if action.actor_id != session.owner_id {
            info!(%session_id, actor = %action.actor_id, "action from non-owner ignored");
            self.acknowledge(&action.ack, Acknowledgement::Unauthorized)
                .await;
            return;
        }

        let previous_timer = self.registry.cancel_timer(session_id);
        self.acknowledge(&action.ack, Acknowledgement::Received).await;

        let Some(mut session) = self.registry.get(session_id) else {
            debug!(%session_id, "session finished while acknowledging");
            return;
        };
        let result = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            apply_action(&mut session, &action.kind, &mut *rng)
        };
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => {
                info!(%session_id, action = action.kind.name(), %err, "action rejected");
                // A rejected move does not buy the player more time.
                if let Some(phase) = phase_for(session.status) {
                    match previous_timer.filter(|timer| timer.phase() == phase) {
                        Some(timer) => {
                            let timer =
                                self.scheduler.arm_until(session_id, phase, timer.deadline());
                            self.registry.set_timer(session_id, timer);
                        }
                        None => self.arm(session_id, phase),
                    }
                }
                return;
            }
        };

        if outcome.is_terminal() {
            self.finish(session).await;
            return;
        }
        if !self.registry.replace(session.clone()) {
            return;
        }
        self.arm(session_id, TimeoutPhase::Turn);
        self.refresh(&session).await;
        if outcome == Outcome::Started {
            self.persist_state(&session).await;
        }
    }

    pub async fn handle_expiry(&self, expiry: Expiry) {
        let session_id = expiry.session_id;
        if self.registry.timer_generation(session_id) != Some(expiry.generation) {
            debug!(%session_id, generation = expiry.generation, "stale expiry ignored");
            return;
        }
        let Some(mut session) = self.registry.get(session_id) else {
            return;
        };
        if let Err(err) = apply_timeout(&mut session) {
            warn!(%session_id, %err, "expiry on unexpired session");
            self.registry.remove(session_id);
            return;
        }
        info!(%session_id, phase = %expiry.phase, "session timed out");
        self.finish(session).await;
    }

    /// Terminal path: leave the registry, show the final state, record the status.
    async fn finish(&self, session: Session) {
        let session_id = session.id;
        if self.registry.remove(session_id).is_none() {
            debug!(%session_id, "session already finished");
            return;
        }

        if let Some(message) = session.message_ref() {
            let result = if session.status == SessionStatus::CompletedCancelled {
                self.presenter.dispose(&session.chat, message).await
            } else {
                self.presenter
                    .update_render(
                        message,
                        &SessionView::build(&session),
                        Annotation::for_session(&session),
                    )
                    .await
            };
            if let Err(err) = presenter_ok(result) {
                warn!(%session_id, ?err, "final render failed");
            }
        }

        match self
            .store
            .finalize(session_id, session.status, &session.state)
            .await
        {
            Ok(()) => info!(%session_id, status = %session.status, "session finalized"),
            Err(err) => error!(
                %session_id,
                status = %session.status,
                ?err,
                "CRITICAL: failed to finalize session"
            ),
        }
    }

    async fn refresh(&self, session: &Session) {
        let Some(message) = session.message_ref() else {
            return;
        };
        let result = self
            .presenter
            .update_render(message, &SessionView::build(session), None)
            .await;
        if let Err(err) = presenter_ok(result) {
            warn!(session_id = %session.id, ?err, "render update failed");
        }
    }

    async fn persist_state(&self, session: &Session) {
        if let Err(err) = self.store.write_state(session.id, &session.state).await {
            warn!(session_id = %session.id, ?err, "state write failed");
        }
    }

    async fn acknowledge(&self, ack: &AckToken, acknowledgement: Acknowledgement) {
        if let Err(err) = self.presenter.acknowledge(ack, acknowledgement).await {
            debug!(?err, ?acknowledgement, "acknowledgement failed");
        }
    }

    fn arm(&self, session_id: SessionId, phase: TimeoutPhase) {
        let timer = self.scheduler.arm(session_id, phase);
        self.registry.set_timer(session_id, timer);
    }
}
