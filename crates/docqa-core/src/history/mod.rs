//! Session-scoped conversation history.
//!
//! A session is an append-only list of [`Turn`]s stored under the key
//! `chat_history:<session_id>`. The store contract is deliberately small:
//! [`HistoryStore::append`] is atomic per call and [`HistoryStore::read_all`]
//! returns turns oldest first. Everything else in this module is pure logic
//! over that contract.
//!
//! # Windowing
//!
//! [`window_turns`] trims a history to a turn budget before it is sent to
//! the generation backend:
//!
//! - the system turn is always kept, even when `budget` is 1;
//! - the window ends on the newest user turn (later assistant turns are cut);
//! - the window starts on a user turn;
//! - the oldest non-system turns are dropped first.

pub mod memory;

use async_trait::async_trait;

use crate::error::QaResult;
use crate::models::{Role, Turn};

/// Prefix of every session key in the backing store.
pub const HISTORY_KEY_PREFIX: &str = "chat_history:";

/// Store key for a session.
pub fn history_key(session_id: &str) -> String {
    format!("{HISTORY_KEY_PREFIX}{session_id}")
}

/// Append-only per-session message log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append one turn. Atomic per call.
    async fn append(&self, session_id: &str, turn: &Turn) -> QaResult<()>;

    /// All turns of a session in append order. Unknown sessions are empty.
    async fn read_all(&self, session_id: &str) -> QaResult<Vec<Turn>>;
}

/// Append a system turn unless the session already has one.
///
/// Returns `true` if a turn was appended. The check and the append are two
/// separate store calls, so two processes racing on a brand-new session can
/// both insert one.
pub async fn ensure_system_prompt(
    store: &dyn HistoryStore,
    session_id: &str,
    text: &str,
) -> QaResult<bool> {
    let turns = store.read_all(session_id).await?;
    if turns.iter().any(|t| t.role == Role::System) {
        return Ok(false);
    }
    store.append(session_id, &Turn::system(text)).await?;
    Ok(true)
}

/// Trim `turns` to at most `budget` turns (plus the system turn when the
/// budget is too small to hold it and the newest user turn).
pub fn window_turns(turns: &[Turn], budget: usize) -> Vec<Turn> {
    let system = turns.iter().find(|t| t.role == Role::System);
    let rest: Vec<&Turn> = turns.iter().filter(|t| t.role != Role::System).collect();

    let mut out: Vec<Turn> = system.into_iter().cloned().collect();

    let Some(last_user) = rest.iter().rposition(|t| t.role == Role::User) else {
        return out;
    };
    let rest = &rest[..=last_user];

    let room = budget.saturating_sub(out.len()).max(1);
    let mut window = &rest[rest.len().saturating_sub(room)..];
    while let Some(first) = window.first() {
        if first.role == Role::User {
            break;
        }
        window = &window[1..];
    }

    out.extend(window.iter().map(|t| (*t).clone()));
    out
}

/// A session's turns without the system prompt.
pub async fn visible_history(store: &dyn HistoryStore, session_id: &str) -> QaResult<Vec<Turn>> {
    Ok(store
        .read_all(session_id)
        .await?
        .into_iter()
        .filter(|t| t.role != Role::System)
        .collect())
}
