//! Typing indicators: debounced outgoing flag, staleness-filtered
//! incoming view.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use vitalink_backend::{RealtimeStore, TypingSignal};
use vitalink_shared::{ConversationId, Timestamp, UserId};

/// Incoming side: the set of participants currently typing, as this
/// client should display it.
///
/// Filters out the viewer and any entry older than the staleness
/// window; a stale `is_typing: true` counts as not typing, which
/// covers writers that crashed before clearing their flag.
pub(crate) struct TypingTracker {
    viewer: UserId,
    stale_ms: i64,
    active: HashMap<UserId, Timestamp>,
}

impl TypingTracker {
    pub fn new(viewer: UserId, stale_ms: i64) -> Self {
        Self {
            viewer,
            stale_ms,
            active: HashMap::new(),
        }
    }

    fn is_stale(&self, at: Timestamp, now: Timestamp) -> bool {
        now.millis_since(at) >= self.stale_ms
    }

    /// Fold one signal in. Returns `true` when the displayed set
    /// changed.
    pub fn observe(&mut self, signal: &TypingSignal, now: Timestamp) -> bool {
        if signal.user == self.viewer {
            return false;
        }
        if signal.is_typing && !self.is_stale(signal.at, now) {
            self.active.insert(signal.user.clone(), signal.at) != Some(signal.at)
        } else {
            self.active.remove(&signal.user).is_some()
        }
    }

    /// Drop entries that have gone stale since their signal arrived.
    /// Returns `true` when the displayed set changed.
    pub fn sweep(&mut self, now: Timestamp) -> bool {
        let before = self.active.len();
        let stale_ms = self.stale_ms;
        self.active
            .retain(|_, at| now.millis_since(*at) < stale_ms);
        self.active.len() != before
    }

    /// Currently-typing users, in stable order.
    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.active.keys().cloned().collect();
        users.sort();
        users
    }
}

/// Outgoing side: writes the viewer's ephemeral typing flag with a
/// trailing debounce that clears it after inactivity.
pub(crate) struct TypingWriter {
    conversation: ConversationId,
    user: UserId,
    realtime: Arc<dyn RealtimeStore>,
    debounce: Duration,
    clear_task: Option<JoinHandle<()>>,
}

impl TypingWriter {
    pub fn new(
        conversation: ConversationId,
        user: UserId,
        realtime: Arc<dyn RealtimeStore>,
        debounce: Duration,
    ) -> Self {
        Self {
            conversation,
            user,
            realtime,
            debounce,
            clear_task: None,
        }
    }

    /// Record keyboard activity: set the flag now and re-arm the
    /// trailing clear.
    pub async fn keystroke(&mut self) {
        if let Err(e) = self
            .realtime
            .set_typing(&self.conversation, &self.user, true, Timestamp::now())
            .await
        {
            warn!(conversation = %self.conversation, error = %e, "typing write failed");
        }

        if let Some(task) = self.clear_task.take() {
            task.abort();
        }

        let realtime = self.realtime.clone();
        let conversation = self.conversation.clone();
        let user = self.user.clone();
        let debounce = self.debounce;
        self.clear_task = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(e) = realtime
                .set_typing(&conversation, &user, false, Timestamp::now())
                .await
            {
                warn!(conversation = %conversation, error = %e, "typing clear failed");
            }
        }));
    }

    /// Cancel the pending clear and write `false` immediately. Used on
    /// conversation switch and logout.
    pub fn stop(&mut self) {
        if let Some(task) = self.clear_task.take() {
            task.abort();
        }
        let realtime = self.realtime.clone();
        let conversation = self.conversation.clone();
        let user = self.user.clone();
        tokio::spawn(async move {
            let _ = realtime
                .set_typing(&conversation, &user, false, Timestamp::now())
                .await;
        });
    }
}

impl Drop for TypingWriter {
    fn drop(&mut self) {
        if let Some(task) = self.clear_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(user: &str, is_typing: bool, at: i64) -> TypingSignal {
        TypingSignal {
            user: UserId::new(user),
            is_typing,
            at: Timestamp::from_millis(at),
        }
    }

    #[test]
    fn fresh_typing_is_shown() {
        let mut tracker = TypingTracker::new(UserId::new("me"), 10_000);
        let now = Timestamp::from_millis(100_000);
        assert!(tracker.observe(&signal("u2", true, 99_000), now));
        assert_eq!(tracker.users(), vec![UserId::new("u2")]);
    }

    #[test]
    fn own_signals_are_ignored() {
        let mut tracker = TypingTracker::new(UserId::new("me"), 10_000);
        let now = Timestamp::from_millis(100_000);
        assert!(!tracker.observe(&signal("me", true, 100_000), now));
        assert!(tracker.users().is_empty());
    }

    #[test]
    fn stale_true_flag_counts_as_not_typing() {
        let mut tracker = TypingTracker::new(UserId::new("me"), 10_000);
        let now = Timestamp::from_millis(100_000);
        // 15 s old, boolean still true: crashed writer.
        assert!(!tracker.observe(&signal("u2", true, 85_000), now));
        assert!(tracker.users().is_empty());
    }

    #[test]
    fn false_flag_clears() {
        let mut tracker = TypingTracker::new(UserId::new("me"), 10_000);
        let now = Timestamp::from_millis(100_000);
        tracker.observe(&signal("u2", true, 99_000), now);
        assert!(tracker.observe(&signal("u2", false, 99_500), now));
        assert!(tracker.users().is_empty());
    }

    #[test]
    fn sweep_expires_entries_that_aged_out() {
        let mut tracker = TypingTracker::new(UserId::new("me"), 10_000);
        tracker.observe(&signal("u2", true, 99_000), Timestamp::from_millis(100_000));
        assert!(!tracker.sweep(Timestamp::from_millis(105_000)));
        assert!(tracker.sweep(Timestamp::from_millis(109_100)));
        assert!(tracker.users().is_empty());
    }
}
