//! End-to-end coordinator scenarios against the in-memory store and a recording presenter.

use mines_types::{
    Board, CellPos, ChatContext, DifficultyKey, ExternalGameId, Multiplier, PlayerActionKind,
    PlayerId, SessionId, SessionStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::coordinator::{CoordinatorConfig, PlayerAction, SessionCoordinator};
use crate::mocks::{FlakyStore, PresenterCall, RecordingPresenter};
use crate::pickup::PickupNotice;
use crate::presenter::{AckToken, Acknowledgement, Annotation};
use crate::store::{NewSession, SessionStore};
use crate::timeout::{Expiry, TimeoutPhase};

const OWNER: &str = "1001";
const WAGER: u64 = 1_000_000_000;

struct Harness {
    coordinator: SessionCoordinator,
    presenter: Arc<RecordingPresenter>,
    store: Arc<FlakyStore>,
    expiries: mpsc::UnboundedReceiver<Expiry>,
    next_ack: u32,
}

fn config(worker_id: &str) -> CoordinatorConfig {
    CoordinatorConfig {
        worker_id: worker_id.to_string(),
        offer_timeout: Duration::from_millis(30_000),
        turn_timeout: Duration::from_millis(45_000),
        rng_seed: Some(7),
    }
}

fn harness() -> Harness {
    let presenter = Arc::new(RecordingPresenter::new());
    let store = Arc::new(FlakyStore::new());
    let (coordinator, expiries) =
        SessionCoordinator::new(config("worker-a"), store.clone(), presenter.clone());
    Harness {
        coordinator,
        presenter,
        store,
        expiries,
        next_ack: 0,
    }
}

fn new_session(external: &str) -> NewSession {
    NewSession {
        external_game_id: ExternalGameId::new(external),
        owner_id: PlayerId::new(OWNER),
        owner_name: Some("alice".to_string()),
        chat: ChatContext::new("chat-1"),
        wager: WAGER,
    }
}

fn pickup(external: &str) -> PickupNotice {
    PickupNotice {
        external_game_id: ExternalGameId::new(external),
    }
}

impl Harness {
    async fn open(&mut self, external: &str) -> SessionId {
        let id = self.store.insert_pending(new_session(external)).await.unwrap();
        self.coordinator.handle_pickup(pickup(external)).await;
        id
    }

    async fn act_as(&mut self, actor: &str, session_id: SessionId, kind: PlayerActionKind) -> AckToken {
        self.next_ack += 1;
        let ack = AckToken(format!("ack-{}", self.next_ack));
        self.coordinator
            .handle_action(PlayerAction {
                session_id,
                actor_id: PlayerId::new(actor),
                ack: ack.clone(),
                kind,
            })
            .await;
        ack
    }

    async fn act(&mut self, session_id: SessionId, kind: PlayerActionKind) -> AckToken {
        self.act_as(OWNER, session_id, kind).await
    }

    async fn start_easy(&mut self, external: &str) -> SessionId {
        let id = self.open(external).await;
        self.act(
            id,
            PlayerActionKind::ChooseDifficulty {
                difficulty: DifficultyKey::Easy,
            },
        )
        .await;
        id
    }

    fn board(&self, id: SessionId) -> Board {
        self.coordinator
            .registry()
            .get(id)
            .and_then(|session| session.state.board)
            .expect("live session with a board")
    }

    async fn status(&self, id: SessionId) -> SessionStatus {
        self.store.load(id).await.unwrap().unwrap().status
    }

    fn ack_result(&self, ack: &AckToken) -> Option<Acknowledgement> {
        self.presenter
            .acknowledgements()
            .into_iter()
            .find(|(token, _)| token == ack)
            .map(|(_, result)| result)
    }
}

fn safe_cells(board: &Board) -> Vec<CellPos> {
    let mut cells = Vec::new();
    for row in 0..board.grid.rows() {
        for col in 0..board.grid.cols() {
            let pos = CellPos::new(row, col);
            if !board.mine_locations.contains(&pos) {
                cells.push(pos);
            }
        }
    }
    cells
}

fn reveal(pos: CellPos) -> PlayerActionKind {
    PlayerActionKind::RevealTile {
        row: pos.row,
        col: pos.col,
    }
}

#[tokio::test(start_paused = true)]
async fn test_pickup_claims_renders_and_arms_offer() {
    let mut h = harness();
    let id = h.open("g-1").await;

    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::AwaitingDifficulty);
    assert_eq!(stored.claimed_by.as_deref(), Some("worker-a"));
    assert_eq!(stored.state.message_ref.as_ref().unwrap().as_str(), "m-1");

    assert!(h.coordinator.registry().contains(id));
    assert!(h.coordinator.registry().timer_generation(id).is_some());
    let (view, annotation) = h.presenter.last_view(id).unwrap();
    assert_eq!(annotation, None);
    assert_eq!(view.actions.len(), 4);
    assert!(view.has_action(&PlayerActionKind::Cancel));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_pickup_is_a_no_op() {
    let mut h = harness();
    let id = h.open("g-1").await;
    h.coordinator.handle_pickup(pickup("g-1")).await;
    h.coordinator.handle_pickup(pickup("unknown")).await;

    assert_eq!(h.coordinator.registry().len(), 1);
    let renders = h
        .presenter
        .calls()
        .into_iter()
        .filter(|call| matches!(call, PresenterCall::Render { .. }))
        .count();
    assert_eq!(renders, 1);
    assert_eq!(h.status(id).await, SessionStatus::AwaitingDifficulty);
}

#[tokio::test(start_paused = true)]
async fn test_only_one_worker_claims() {
    let presenter = Arc::new(RecordingPresenter::new());
    let store = Arc::new(FlakyStore::new());
    let (a, _a_expiries) = SessionCoordinator::new(config("a"), store.clone(), presenter.clone());
    let (b, _b_expiries) = SessionCoordinator::new(config("b"), store.clone(), presenter.clone());
    store.insert_pending(new_session("shared")).await.unwrap();

    a.handle_pickup(pickup("shared")).await;
    b.handle_pickup(pickup("shared")).await;

    assert_eq!(a.registry().len() + b.registry().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_a_one_safe_reveal() {
    let mut h = harness();
    let id = h.start_easy("g-a").await;
    let stored = h.store.load(id).await.unwrap().unwrap();
    assert!(stored.state.board.is_some(), "board persisted at difficulty selection");
    // The durable status only changes again at finalization.
    assert_eq!(stored.status, SessionStatus::AwaitingDifficulty);

    let safe = safe_cells(&h.board(id))[0];
    let ack = h.act(id, reveal(safe)).await;
    assert_eq!(h.ack_result(&ack), Some(Acknowledgement::Received));

    let session = h.coordinator.registry().get(id).unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.state.board.as_ref().unwrap().gems_found, 1);

    let (view, _) = h.presenter.last_view(id).unwrap();
    assert_eq!(view.gems_found, 1);
    assert_eq!(view.current_multiplier, Multiplier::from_bps(10_800));
    assert_eq!(view.current_multiplier.to_string(), "x1.08");
    assert_eq!(view.potential_payout, 1_080_000_000);
    assert!(view.has_action(&PlayerActionKind::CashOut));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_mine_hit() {
    let mut h = harness();
    let id = h.start_easy("g-b").await;
    let mine = h.board(id).mine_locations[0];

    h.act(id, reveal(mine)).await;

    assert!(!h.coordinator.registry().contains(id));
    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::CompletedMineHit);
    assert!(stored.state.board.as_ref().unwrap().grid.all_revealed());

    let (view, annotation) = h.presenter.last_view(id).unwrap();
    assert_eq!(annotation, Some(Annotation::MineHit));
    assert!(!view.has_action(&PlayerActionKind::CashOut));
    assert!(view.actions.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_all_gems_found() {
    let mut h = harness();
    let id = h.start_easy("g-c").await;
    let safe = safe_cells(&h.board(id));
    assert_eq!(safe.len(), 22);

    for pos in &safe[..21] {
        h.act(id, reveal(*pos)).await;
    }
    assert_eq!(
        h.coordinator.registry().get(id).unwrap().status,
        SessionStatus::InProgress
    );

    h.act(id, reveal(safe[21])).await;
    assert_eq!(h.status(id).await, SessionStatus::CompletedAllGemsFound);
    assert!(h.coordinator.registry().is_empty());
    let (_, annotation) = h.presenter.last_view(id).unwrap();
    assert_eq!(
        annotation,
        Some(Annotation::AllGemsFound {
            payout: 50_000_000_000
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_scenario_d_cash_out() {
    let mut h = harness();
    let id = h.start_easy("g-d").await;

    // Nothing found yet: rejected, timer re-armed, state untouched.
    let before = h.coordinator.registry().get(id).unwrap();
    let generation = h.coordinator.registry().timer_generation(id).unwrap();
    h.act(id, PlayerActionKind::CashOut).await;
    assert_eq!(h.coordinator.registry().get(id).unwrap(), before);
    let rearmed = h.coordinator.registry().timer_generation(id).unwrap();
    assert_ne!(rearmed, generation);

    let safe = safe_cells(&h.board(id))[3];
    h.act(id, reveal(safe)).await;
    h.act(id, PlayerActionKind::CashOut).await;

    assert_eq!(h.status(id).await, SessionStatus::CompletedCashedOut);
    let (_, annotation) = h.presenter.last_view(id).unwrap();
    assert_eq!(
        annotation,
        Some(Annotation::CashedOut {
            payout: 1_080_000_000
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_scenario_e_turn_timeout() {
    let mut h = harness();
    let id = h.start_easy("g-e").await;
    let safe = safe_cells(&h.board(id))[0];
    h.act(id, reveal(safe)).await;

    let expiry = h.expiries.recv().await.unwrap();
    assert_eq!(expiry.session_id, id);
    assert_eq!(expiry.phase, TimeoutPhase::Turn);
    h.coordinator.handle_expiry(expiry).await;

    assert!(h.coordinator.registry().is_empty());
    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::CompletedTimeout);
    assert!(stored.state.board.as_ref().unwrap().grid.all_revealed());
    assert_eq!(
        h.presenter.last_view(id).unwrap().1,
        Some(Annotation::TimedOut)
    );

    let late = h.act(id, reveal(safe_cells(&stored.state.board.unwrap())[1])).await;
    assert_eq!(h.ack_result(&late), Some(Acknowledgement::NotActionable));
    assert_eq!(h.status(id).await, SessionStatus::CompletedTimeout);
}

#[tokio::test(start_paused = true)]
async fn test_offer_timeout_without_board() {
    let mut h = harness();
    let id = h.open("g-offer").await;

    let expiry = h.expiries.recv().await.unwrap();
    assert_eq!(expiry.phase, TimeoutPhase::Offer);
    h.coordinator.handle_expiry(expiry).await;

    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::CompletedTimeout);
    assert!(stored.state.board.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_actions_do_not_extend_offer() {
    let mut h = harness();
    let id = h.open("g-stall").await;

    tokio::time::sleep(Duration::from_millis(20_000)).await;
    let ack = h.act(id, PlayerActionKind::RevealTile { row: 0, col: 0 }).await;
    assert_eq!(h.ack_result(&ack), Some(Acknowledgement::Received));
    h.act(id, PlayerActionKind::CashOut).await;

    tokio::time::sleep(Duration::from_millis(9_999)).await;
    assert!(h.expiries.try_recv().is_err());
    let expiry = h.expiries.recv().await.unwrap();
    assert_eq!(expiry.phase, TimeoutPhase::Offer);
    h.coordinator.handle_expiry(expiry).await;

    assert_eq!(h.status(id).await, SessionStatus::CompletedTimeout);
    assert!(h.coordinator.registry().is_empty());
    assert_eq!(h.store.inner().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_expiry_is_ignored() {
    let mut h = harness();
    let id = h.start_easy("g-stale").await;
    let generation = h.coordinator.registry().timer_generation(id).unwrap();

    h.coordinator
        .handle_expiry(Expiry {
            session_id: id,
            generation: generation - 1,
            phase: TimeoutPhase::Offer,
        })
        .await;

    assert_eq!(
        h.coordinator.registry().get(id).unwrap().status,
        SessionStatus::InProgress
    );
}

#[tokio::test(start_paused = true)]
async fn test_action_keeps_session_alive_past_original_deadline() {
    let mut h = harness();
    let id = h.start_easy("g-alive").await;
    let safe = safe_cells(&h.board(id));

    tokio::time::sleep(Duration::from_millis(40_000)).await;
    h.act(id, reveal(safe[0])).await;
    tokio::time::sleep(Duration::from_millis(40_000)).await;
    assert!(h.expiries.try_recv().is_err());
    assert!(h.coordinator.registry().contains(id));
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_action_changes_nothing() {
    let mut h = harness();
    let id = h.start_easy("g-auth").await;
    let before = h.coordinator.registry().get(id).unwrap();
    let generation = h.coordinator.registry().timer_generation(id);
    let stored_before = h.store.load(id).await.unwrap().unwrap();

    let ack = h
        .act_as("intruder", id, reveal(safe_cells(&h.board(id))[0]))
        .await;
    let cash = h.act_as("intruder", id, PlayerActionKind::CashOut).await;

    assert_eq!(h.ack_result(&ack), Some(Acknowledgement::Unauthorized));
    assert_eq!(h.ack_result(&cash), Some(Acknowledgement::Unauthorized));
    assert_eq!(h.coordinator.registry().get(id).unwrap(), before);
    assert_eq!(h.coordinator.registry().timer_generation(id), generation);
    assert_eq!(h.store.load(id).await.unwrap().unwrap(), stored_before);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_reveals_leave_state() {
    let mut h = harness();
    let id = h.start_easy("g-reject").await;
    let safe = safe_cells(&h.board(id))[0];
    h.act(id, reveal(safe)).await;
    let before = h.coordinator.registry().get(id).unwrap();

    h.act(id, reveal(safe)).await;
    h.act(id, PlayerActionKind::RevealTile { row: 9, col: 0 }).await;
    h.act(
        id,
        PlayerActionKind::ChooseDifficulty {
            difficulty: DifficultyKey::Hard,
        },
    )
    .await;
    h.act(id, PlayerActionKind::Cancel).await;

    assert_eq!(h.coordinator.registry().get(id).unwrap(), before);
    assert!(h.coordinator.registry().timer_generation(id).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_disposes_message() {
    let mut h = harness();
    let id = h.open("g-cancel").await;
    h.act(id, PlayerActionKind::Cancel).await;

    assert_eq!(h.status(id).await, SessionStatus::CompletedCancelled);
    assert!(h.coordinator.registry().is_empty());
    assert!(h.presenter.calls().iter().any(|call| matches!(
        call,
        PresenterCall::Dispose { message, .. } if message.as_str() == "m-1"
    )));
}

#[tokio::test(start_paused = true)]
async fn test_failed_first_render_ends_session() {
    let mut h = harness();
    h.presenter.set_fail_render(true);
    let id = h.open("g-ui").await;

    assert!(h.coordinator.registry().is_empty());
    let stored = h.store.load(id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::CompletedErrorUi);
    assert!(stored.state.error.is_some());
    assert!(stored.state.message_ref.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_presenter_and_write_failures_are_not_fatal() {
    let mut h = harness();
    h.store.set_fail_writes(true);
    let id = h.start_easy("g-flaky").await;
    h.presenter.set_fail_update(true);

    let safe = safe_cells(&h.board(id))[0];
    h.act(id, reveal(safe)).await;

    let session = h.coordinator.registry().get(id).unwrap();
    assert_eq!(session.state.board.as_ref().unwrap().gems_found, 1);
    assert!(h.coordinator.registry().timer_generation(id).is_some());
    // Memory is authoritative; the store never saw the board.
    assert!(h.store.load(id).await.unwrap().unwrap().state.board.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failed_finalize_still_clears_registry() {
    let mut h = harness();
    let id = h.start_easy("g-final").await;
    h.store.set_fail_finalize(true);
    let mine = h.board(id).mine_locations[0];

    h.act(id, reveal(mine)).await;

    assert!(!h.coordinator.registry().contains(id));
    assert!(!h.status(id).await.is_terminal());
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_processes_events_in_order() {
    let presenter = Arc::new(RecordingPresenter::new());
    let store = Arc::new(FlakyStore::new());
    let (coordinator, expiries) =
        SessionCoordinator::new(config("loop"), store.clone(), presenter.clone());
    let id = store.insert_pending(new_session("g-loop")).await.unwrap();

    let (pickup_tx, pickup_rx) = mpsc::channel(8);
    let (action_tx, action_rx) = mpsc::channel(8);
    pickup_tx.send(pickup("g-loop")).await.unwrap();
    drop(pickup_tx);

    let run = tokio::spawn(async move {
        coordinator.run(pickup_rx, action_rx, expiries).await;
        coordinator
    });

    // The loop picks among ready branches at random; wait for the pickup to land first.
    while presenter.calls().is_empty() {
        tokio::task::yield_now().await;
    }
    action_tx
        .send(PlayerAction {
            session_id: id,
            actor_id: PlayerId::new(OWNER),
            ack: AckToken("a".to_string()),
            kind: PlayerActionKind::Cancel,
        })
        .await
        .unwrap();
    drop(action_tx);

    let coordinator = run.await.unwrap();
    assert!(coordinator.registry().is_empty());
    assert_eq!(
        store.load(id).await.unwrap().unwrap().status,
        SessionStatus::CompletedCancelled
    );
}
