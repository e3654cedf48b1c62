//! Shared chat runtime.
//!
//! `ChatSession` owns one [`SessionState`] together with its store and client.
//! Mutations are applied to a copy, persisted, and only then swapped in, so a
//! failed write leaves memory and store unchanged. A send releases the lock
//! while the service call is in flight; a per-conversation ticket rejects
//! overlapping sends with [`SkipReason::Busy`]. Deleting a conversation
//! revokes its ticket, so a late reply never lands in a conversation that
//! reuses the id.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::{error, info, warn};

use super::persistence::{self, PersistentStore};
use super::session::{ConversationId, Message, SessionError, SessionState};
use super::turn::{
    QuestionCounter, SendOutcome, SkipReason, TurnOutcome, TurnSettings, build_request,
    check_send, request_reply,
};
use crate::providers::CompletionClient;

struct Inner {
    state: SessionState,
    counter: QuestionCounter,
}

/// Tickets of the sends currently awaiting a reply.
#[derive(Default)]
struct InFlight {
    next_ticket: u64,
    tickets: HashMap<ConversationId, u64>,
}

/// Session state shared between a front end and in-flight sends.
pub struct ChatSession<S, C> {
    store: S,
    client: C,
    settings: TurnSettings,
    inner: Mutex<Inner>,
    in_flight: Mutex<InFlight>,
}

/// Holds a conversation's in-flight ticket and releases it when dropped.
struct InFlightGuard<'a> {
    set: &'a Mutex<InFlight>,
    id: ConversationId,
    ticket: u64,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<InFlight>, id: ConversationId) -> Option<Self> {
        let mut in_flight = set.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.tickets.contains_key(&id) {
            return None;
        }
        let ticket = in_flight.next_ticket;
        in_flight.next_ticket = ticket.wrapping_add(1);
        in_flight.tickets.insert(id, ticket);
        Some(Self { set, id, ticket })
    }

    /// False once the conversation was deleted after this send started.
    fn is_current(&self) -> bool {
        let in_flight = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        in_flight.tickets.get(&self.id) == Some(&self.ticket)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.tickets.get(&self.id) == Some(&self.ticket) {
            in_flight.tickets.remove(&self.id);
        }
    }
}

impl<S, C> ChatSession<S, C>
where
    S: PersistentStore,
    C: CompletionClient,
{
    /// Loads the stored state and wraps it with the given client.
    pub fn open(store: S, client: C, settings: TurnSettings) -> Self {
        let state = persistence::load(&store);
        let counter = QuestionCounter::new(settings.max_questions);
        Self {
            store,
            client,
            settings,
            inner: Mutex::new(Inner { state, counter }),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    /// Copy of the current state for rendering.
    pub fn snapshot(&self) -> SessionState {
        self.lock().state.clone()
    }

    pub fn active_id(&self) -> Option<ConversationId> {
        self.lock().state.active_id()
    }

    pub fn question_counter(&self) -> QuestionCounter {
        self.lock().counter
    }

    /// Applies `mutate` to a copy of the state and swaps it in once persisted.
    fn commit<T>(
        &self,
        inner: &mut Inner,
        mutate: impl FnOnce(&mut SessionState) -> Result<T, SessionError>,
    ) -> Result<T> {
        let mut next = inner.state.clone();
        let value = mutate(&mut next)?;
        persistence::persist(&self.store, &next)?;
        inner.state = next;
        Ok(value)
    }

    /// Creates a conversation, makes it active and resets the question counter.
    ///
    /// # Errors
    /// Returns an error if no id is left or the state cannot be persisted.
    pub fn create_conversation(&self) -> Result<ConversationId> {
        let mut inner = self.lock();
        let id = self.commit(&mut inner, SessionState::create_conversation)?;
        inner.counter.reset();
        info!(conversation = %id, "created conversation");
        Ok(id)
    }

    /// Deletes a conversation. A send still in flight for it loses its reply.
    ///
    /// # Errors
    /// Returns an error if the id is unknown or the state cannot be persisted.
    pub fn delete_conversation(&self, id: ConversationId) -> Result<()> {
        let mut inner = self.lock();
        self.commit(&mut inner, |state| state.delete_conversation(id))?;
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tickets
            .remove(&id);
        info!(conversation = %id, active = ?inner.state.active_id(), "deleted conversation");
        Ok(())
    }

    /// Makes a conversation active.
    ///
    /// # Errors
    /// Returns an error if the id is unknown or the state cannot be persisted.
    pub fn select_active(&self, id: ConversationId) -> Result<()> {
        let mut inner = self.lock();
        self.commit(&mut inner, |state| state.select_active(id))
    }

    /// Sends to the active conversation.
    pub async fn send_active(&self, text: &str) -> SendOutcome {
        match self.active_id() {
            Some(id) => self.send(id, text).await,
            None => SendOutcome::Skipped(SkipReason::UnknownConversation),
        }
    }

    /// Runs one turn on `id`. Never fails: persistence errors are logged and
    /// the in-memory turn is kept.
    pub async fn send(&self, id: ConversationId, text: &str) -> SendOutcome {
        let (request, guard) = {
            let mut inner = self.lock();
            if let Some(reason) = check_send(&inner.state, id, text) {
                return SendOutcome::Skipped(reason);
            }
            let Some(guard) = InFlightGuard::acquire(&self.in_flight, id) else {
                warn!(conversation = %id, "send already in flight");
                return SendOutcome::Skipped(SkipReason::Busy);
            };
            let appended = inner.state.append_message(id, Message::user(text)).ok();
            let Some(conversation) = appended.and(inner.state.conversation(id)) else {
                return SendOutcome::Skipped(SkipReason::UnknownConversation);
            };
            let request = build_request(&self.settings, conversation.messages());
            self.persist_logged(&inner.state);
            (request, guard)
        };

        let outcome = request_reply(&self.client, &request).await;
        self.finish_turn(&guard, &outcome);
        SendOutcome::Sent(outcome)
    }

    fn finish_turn(&self, guard: &InFlightGuard<'_>, outcome: &TurnOutcome) {
        let id = guard.id;
        let mut inner = self.lock();
        if !guard.is_current() {
            warn!(conversation = %id, "conversation deleted during send, dropping reply");
            return;
        }
        if let Err(e) = inner
            .state
            .append_message(id, Message::assistant(outcome.reply_text()))
        {
            warn!(conversation = %id, error = %e, "dropping reply");
            return;
        }
        inner.counter.record(outcome);
        self.persist_logged(&inner.state);
        info!(
            conversation = %id,
            failed = matches!(outcome, TurnOutcome::Failed(_)),
            questions = inner.counter.count(),
            "turn completed"
        );
    }

    fn persist_logged(&self, state: &SessionState) {
        if let Err(e) = persistence::persist(&self.store, state) {
            error!(error = %format!("{e:#}"), "failed to persist conversations");
        }
    }
}
