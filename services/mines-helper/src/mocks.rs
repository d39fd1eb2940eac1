//! Test doubles for the presenter and the store.

use async_trait::async_trait;
use mines_types::{ChatContext, ExternalGameId, GameState, MessageRef, Session, SessionId, SessionStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::presenter::{
    AckToken, Acknowledgement, Annotation, Presenter, PresenterError, SessionView,
};
use crate::store::{MemoryStore, NewSession, SessionStore, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PresenterCall {
    Render {
        message: MessageRef,
        view: SessionView,
        annotation: Option<Annotation>,
    },
    Update {
        message: MessageRef,
        view: SessionView,
        annotation: Option<Annotation>,
    },
    Dispose {
        chat: ChatContext,
        message: MessageRef,
    },
    Acknowledge {
        ack: AckToken,
        acknowledgement: Acknowledgement,
    },
}

/// Presenter that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingPresenter {
    calls: Mutex<Vec<PresenterCall>>,
    next_message: AtomicU64,
    fail_render: AtomicBool,
    fail_update: AtomicBool,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_render(&self, fail: bool) {
        self.fail_render.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PresenterCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn acknowledgements(&self) -> Vec<(AckToken, Acknowledgement)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PresenterCall::Acknowledge {
                    ack,
                    acknowledgement,
                } => Some((ack, acknowledgement)),
                _ => None,
            })
            .collect()
    }

    /// Most recent view drawn for `session_id`, with its annotation.
    pub fn last_view(&self, session_id: SessionId) -> Option<(SessionView, Option<Annotation>)> {
        self.calls().into_iter().rev().find_map(|call| match call {
            PresenterCall::Render {
                view, annotation, ..
            }
            | PresenterCall::Update {
                view, annotation, ..
            } if view.session_id == session_id => Some((view, annotation)),
            _ => None,
        })
    }

    fn record(&self, call: PresenterCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn render(
        &self,
        view: &SessionView,
        annotation: Option<Annotation>,
    ) -> Result<MessageRef, PresenterError> {
        if self.fail_render.load(Ordering::SeqCst) {
            return Err(PresenterError::Unavailable("render disabled".to_string()));
        }
        let id = self.next_message.fetch_add(1, Ordering::SeqCst) + 1;
        let message = MessageRef::new(format!("m-{id}"));
        self.record(PresenterCall::Render {
            message: message.clone(),
            view: view.clone(),
            annotation,
        });
        Ok(message)
    }

    async fn update_render(
        &self,
        message: &MessageRef,
        view: &SessionView,
        annotation: Option<Annotation>,
    ) -> Result<(), PresenterError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(PresenterError::Unavailable("update disabled".to_string()));
        }
        self.record(PresenterCall::Update {
            message: message.clone(),
            view: view.clone(),
            annotation,
        });
        Ok(())
    }

    async fn dispose(
        &self,
        chat: &ChatContext,
        message: &MessageRef,
    ) -> Result<(), PresenterError> {
        self.record(PresenterCall::Dispose {
            chat: chat.clone(),
            message: message.clone(),
        });
        Ok(())
    }

    async fn acknowledge(
        &self,
        ack: &AckToken,
        acknowledgement: Acknowledgement,
    ) -> Result<(), PresenterError> {
        self.record(PresenterCall::Acknowledge {
            ack: ack.clone(),
            acknowledgement,
        });
        Ok(())
    }
}

/// [`MemoryStore`] with switchable write failures.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_finalize: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_finalize(&self, fail: bool) {
        self.fail_finalize.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn insert_pending(&self, session: NewSession) -> Result<SessionId, StoreError> {
        self.inner.insert_pending(session).await
    }

    async fn claim_pending(
        &self,
        external_game_id: &ExternalGameId,
        worker_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        self.inner.claim_pending(external_game_id, worker_id).await
    }

    async fn write_state(
        &self,
        session_id: SessionId,
        state: &GameState,
    ) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("write disabled".to_string()));
        }
        self.inner.write_state(session_id, state).await
    }

    async fn finalize(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        state: &GameState,
    ) -> Result<(), StoreError> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("finalize disabled".to_string()));
        }
        self.inner.finalize(session_id, status, state).await
    }

    async fn load(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        self.inner.load(session_id).await
    }
}
