/// Reconciler: the canonical message list of one open conversation
///
/// Three sources feed it (store snapshots, optimistic sends, send results) and
/// all of them go through `apply`, so the merge rules live in one place.
/// Confirmed messages are kept sorted by `(created_at, id)`; provisional ones
/// are rendered after them in send order.
use crate::messenger_types::Message;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

/// Result of the store insert backing a provisional message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Confirmed(Message),
    Failed,
}

/// Candidate update for the message list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Rows observed through the initial load, a poll, or the feed.
    /// `complete` marks an authoritative full listing.
    ConfirmedSnapshot {
        messages: Vec<Message>,
        complete: bool,
    },
    OptimisticAdd(Message),
    OptimisticResolve {
        provisional_id: String,
        outcome: SendOutcome,
    },
}

/// What happened to a provisional entry on resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Provisional entry retired in favour of the confirmed message
    Replaced,
    /// Provisional entry removed after a failed send
    Removed { content: String },
    /// A matching confirmed row had already retired the entry
    AlreadyConfirmed { message: Message },
    /// No such provisional entry (already resolved, or never added)
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// The rendered list differs from before the event
    pub changed: bool,
    pub resolution: Option<Resolution>,
}

pub struct Reconciler {
    conversation_id: String,
    confirmed: Vec<Message>,
    pending: Vec<Message>,
    /// Provisional ids retired by a matching confirmed arrival
    settled: HashMap<String, Message>,
    match_window: Duration,
}

impl Reconciler {
    pub fn new(conversation_id: impl Into<String>, match_window: Duration) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            confirmed: Vec::new(),
            pending: Vec::new(),
            settled: HashMap::new(),
            match_window,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Single entry point for every source
    pub fn apply(&mut self, event: SyncEvent) -> Applied {
        match event {
            SyncEvent::ConfirmedSnapshot { messages, complete } => Applied {
                changed: self.merge_confirmed(messages, complete),
                resolution: None,
            },
            SyncEvent::OptimisticAdd(provisional) => Applied {
                changed: self.add_provisional(provisional),
                resolution: None,
            },
            SyncEvent::OptimisticResolve {
                provisional_id,
                outcome,
            } => {
                let (changed, resolution) = self.resolve(&provisional_id, outcome);
                Applied {
                    changed,
                    resolution: Some(resolution),
                }
            }
        }
    }

    pub fn apply_confirmed(&mut self, messages: Vec<Message>, complete: bool) -> bool {
        self.apply(SyncEvent::ConfirmedSnapshot { messages, complete })
            .changed
    }

    pub fn apply_optimistic(&mut self, provisional: Message) -> bool {
        self.apply(SyncEvent::OptimisticAdd(provisional)).changed
    }

    pub fn resolve_optimistic(&mut self, provisional_id: &str, outcome: SendOutcome) -> Applied {
        self.apply(SyncEvent::OptimisticResolve {
            provisional_id: provisional_id.to_string(),
            outcome,
        })
    }

    /// Rendered list: confirmed messages, then provisional ones
    pub fn messages(&self) -> Vec<Message> {
        self.confirmed
            .iter()
            .chain(self.pending.iter())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn merge_confirmed(&mut self, messages: Vec<Message>, complete: bool) -> bool {
        let mut changed = false;
        let mut seen = HashSet::new();

        for msg in messages {
            if !self.accepts(&msg) {
                debug!("Ignoring row {:?} for conversation {}", msg.id, self.conversation_id);
                continue;
            }
            seen.insert(msg.id.clone());
            changed |= self.upsert(msg, true);
        }

        if complete {
            let before = self.confirmed.len();
            self.confirmed.retain(|m| seen.contains(&m.id));
            if self.confirmed.len() != before {
                debug!(
                    "Complete snapshot dropped {} messages from {}",
                    before - self.confirmed.len(),
                    self.conversation_id
                );
                changed = true;
            }
        }

        if changed {
            self.sort();
        }
        changed
    }

    fn add_provisional(&mut self, provisional: Message) -> bool {
        if !provisional.is_provisional() || provisional.conversation_id != self.conversation_id {
            debug!("Rejecting provisional entry {:?}", provisional.id);
            return false;
        }
        if self.pending.iter().any(|m| m.id == provisional.id) {
            return false;
        }
        self.pending.push(provisional);
        true
    }

    fn resolve(&mut self, provisional_id: &str, outcome: SendOutcome) -> (bool, Resolution) {
        let idx = self.pending.iter().position(|m| m.id == provisional_id);

        match outcome {
            SendOutcome::Confirmed(msg) => {
                let mut changed = false;
                if let Some(i) = idx {
                    self.pending.remove(i);
                    changed = true;
                }
                self.settled.remove(provisional_id);
                if self.accepts(&msg) && self.upsert(msg, false) {
                    self.sort();
                    changed = true;
                }
                (changed, Resolution::Replaced)
            }
            SendOutcome::Failed => {
                if let Some(i) = idx {
                    let provisional = self.pending.remove(i);
                    (
                        true,
                        Resolution::Removed {
                            content: provisional.content,
                        },
                    )
                } else if let Some(message) = self.settled.remove(provisional_id) {
                    (false, Resolution::AlreadyConfirmed { message })
                } else {
                    (false, Resolution::Unknown)
                }
            }
        }
    }

    fn accepts(&self, msg: &Message) -> bool {
        !msg.id.is_empty() && !msg.is_provisional() && msg.conversation_id == self.conversation_id
    }

    /// Insert or replace by id. Returns whether the list changed.
    fn upsert(&mut self, msg: Message, retire_match: bool) -> bool {
        if let Some(existing) = self.confirmed.iter_mut().find(|m| m.id == msg.id) {
            if *existing == msg {
                return false;
            }
            *existing = msg;
            return true;
        }

        if retire_match {
            if let Some(i) = self.find_match(&msg) {
                let provisional = self.pending.remove(i);
                debug!("Confirmed {} retires provisional {}", msg.id, provisional.id);
                self.settled.insert(provisional.id, msg.clone());
            }
        }

        self.confirmed.push(msg);
        true
    }

    /// Oldest pending send from the same sender with the same text, close in time.
    /// Two identical sends in quick succession are indistinguishable here.
    fn find_match(&self, msg: &Message) -> Option<usize> {
        let window_ms = u64::try_from(self.match_window.as_millis()).unwrap_or(u64::MAX);
        self.pending.iter().position(|p| {
            p.sender_id == msg.sender_id
                && p.content == msg.content
                && (p.created_at.timestamp_millis() - msg.created_at.timestamp_millis())
                    .unsigned_abs()
                    <= window_ms
        })
    }

    fn sort(&mut self) {
        self.confirmed
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger_types::SenderRole;
    use chrono::{DateTime, TimeZone, Utc};

    const CONV: &str = "conv-1";

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn confirmed(id: &str, content: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: CONV.to_string(),
            sender_id: "client-1".to_string(),
            sender_role: SenderRole::Client,
            content: content.to_string(),
            created_at: at(secs),
            read: false,
            read_at: None,
        }
    }

    fn provisional(id: &str, content: &str, secs: i64) -> Message {
        confirmed(&format!("temp-{}", id), content, secs)
    }

    fn ids(r: &Reconciler) -> Vec<String> {
        r.messages().into_iter().map(|m| m.id).collect()
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(CONV, Duration::from_secs(60))
    }

    #[test]
    fn test_duplicate_snapshots_are_idempotent() {
        let mut r = reconciler();
        let m1 = confirmed("1", "hi", 1);
        let m2 = confirmed("2", "there", 2);

        assert!(r.apply_confirmed(vec![m1.clone(), m2.clone()], false));
        assert!(!r.apply_confirmed(vec![m2.clone(), m1.clone()], false));
        assert!(!r.apply_confirmed(vec![m1.clone(), m1.clone()], false));
        assert_eq!(ids(&r), vec!["1", "2"]);
    }

    #[test]
    fn test_sorted_by_created_at_then_id() {
        let mut r = reconciler();
        r.apply_confirmed(vec![confirmed("b", "x", 5), confirmed("c", "y", 1)], false);
        r.apply_confirmed(vec![confirmed("a", "z", 5)], false);
        assert_eq!(ids(&r), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_changed_copy_replaces_existing() {
        let mut r = reconciler();
        let m1 = confirmed("1", "hi", 1);
        r.apply_confirmed(vec![m1.clone()], false);

        let mut read = m1.clone();
        read.read = true;
        read.read_at = Some(at(10));
        assert!(r.apply_confirmed(vec![read.clone()], false));
        assert_eq!(r.messages(), vec![read]);
    }

    #[test]
    fn test_partial_snapshot_never_regresses() {
        let mut r = reconciler();
        r.apply_confirmed(vec![confirmed("1", "a", 1), confirmed("2", "b", 2)], false);
        assert!(!r.apply_confirmed(vec![confirmed("2", "b", 2)], false));
        assert_eq!(ids(&r), vec!["1", "2"]);
    }

    #[test]
    fn test_complete_snapshot_is_authoritative() {
        let mut r = reconciler();
        r.apply_confirmed(vec![confirmed("1", "a", 1), confirmed("2", "b", 2)], false);
        r.apply_optimistic(provisional("x", "pending", 3));

        assert!(r.apply_confirmed(vec![confirmed("2", "b", 2)], true));
        assert_eq!(ids(&r), vec!["2", "temp-x"]);
    }

    #[test]
    fn test_malformed_rows_ignored() {
        let mut r = reconciler();
        let mut other = confirmed("9", "elsewhere", 1);
        other.conversation_id = "conv-2".to_string();
        let empty = confirmed("", "no id", 1);
        let sneaky = provisional("1", "not confirmed", 1);

        assert!(!r.apply_confirmed(vec![other, empty, sneaky], false));
        assert!(r.is_empty());
    }

    #[test]
    fn test_optimistic_appends_after_confirmed() {
        let mut r = reconciler();
        r.apply_confirmed(vec![confirmed("1", "a", 100)], false);
        // client clock behind the server; still rendered last
        assert!(r.apply_optimistic(provisional("1", "hello", 50)));
        assert!(!r.apply_optimistic(provisional("1", "hello", 50)));
        assert_eq!(ids(&r), vec!["1", "temp-1"]);
        assert!(r.messages()[1].is_provisional());

        // a confirmed id can never be projected as provisional
        assert!(!r.apply_optimistic(confirmed("5", "nope", 1)));
    }

    #[test]
    fn test_resolve_success_replaces_provisional() {
        let mut r = reconciler();
        r.apply_optimistic(provisional("1", "hello", 10));

        let applied = r.resolve_optimistic("temp-1", SendOutcome::Confirmed(confirmed("42", "hello", 11)));
        assert!(applied.changed);
        assert_eq!(applied.resolution, Some(Resolution::Replaced));
        assert_eq!(ids(&r), vec!["42"]);
        assert_eq!(r.messages()[0].content, "hello");
    }

    #[test]
    fn test_resolve_failure_returns_content() {
        let mut r = reconciler();
        r.apply_confirmed(vec![confirmed("1", "earlier", 1)], false);
        r.apply_optimistic(provisional("1", "hello", 10));

        let applied = r.resolve_optimistic("temp-1", SendOutcome::Failed);
        assert!(applied.changed);
        assert_eq!(
            applied.resolution,
            Some(Resolution::Removed {
                content: "hello".to_string()
            })
        );
        assert_eq!(ids(&r), vec!["1"]);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_feed_before_insert_response_retires_provisional() {
        let mut r = reconciler();
        r.apply_optimistic(provisional("1", "hello", 10));

        assert!(r.apply_confirmed(vec![confirmed("42", "hello", 11)], false));
        assert_eq!(ids(&r), vec!["42"]);

        let applied = r.resolve_optimistic("temp-1", SendOutcome::Confirmed(confirmed("42", "hello", 11)));
        assert!(!applied.changed);
        assert_eq!(ids(&r), vec!["42"]);
    }

    #[test]
    fn test_failure_after_implicit_match_reports_confirmed() {
        let mut r = reconciler();
        r.apply_optimistic(provisional("1", "hello", 10));
        r.apply_confirmed(vec![confirmed("42", "hello", 11)], false);

        let applied = r.resolve_optimistic("temp-1", SendOutcome::Failed);
        assert!(!applied.changed);
        assert_eq!(
            applied.resolution,
            Some(Resolution::AlreadyConfirmed {
                message: confirmed("42", "hello", 11)
            })
        );
        assert_eq!(ids(&r), vec!["42"]);
    }

    #[test]
    fn test_match_requires_sender_content_and_recency() {
        let mut r = reconciler();
        r.apply_optimistic(provisional("1", "hello", 10));

        let mut from_mover = confirmed("40", "hello", 11);
        from_mover.sender_id = "mover-1".to_string();
        from_mover.sender_role = SenderRole::Mover;
        let different_text = confirmed("41", "hello!", 11);
        let too_old = confirmed("39", "hello", 10 - 3600);

        r.apply_confirmed(vec![from_mover, different_text, too_old], false);
        assert_eq!(r.pending_count(), 1);
        assert_eq!(ids(&r), vec!["39", "40", "41", "temp-1"]);
    }

    #[test]
    fn test_huge_match_window_saturates() {
        let mut r = Reconciler::new(CONV, Duration::MAX);
        r.apply_optimistic(provisional("1", "hello", 10));

        r.apply_confirmed(vec![confirmed("39", "hello", 10 - 3600)], false);
        assert_eq!(r.pending_count(), 0);
        assert_eq!(ids(&r), vec!["39"]);
    }

    #[test]
    fn test_arrival_order_does_not_matter() {
        let m = confirmed("42", "hello", 11);
        let sources: Vec<SyncEvent> = vec![
            SyncEvent::OptimisticResolve {
                provisional_id: "temp-1".to_string(),
                outcome: SendOutcome::Confirmed(m.clone()),
            },
            SyncEvent::ConfirmedSnapshot {
                messages: vec![m.clone()],
                complete: false,
            },
            SyncEvent::ConfirmedSnapshot {
                messages: vec![confirmed("7", "before", 1), m.clone()],
                complete: false,
            },
        ];
        let orders = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

        let mut results = Vec::new();
        for order in orders {
            let mut r = reconciler();
            r.apply_optimistic(provisional("1", "hello", 10));
            for i in order {
                r.apply(sources[i].clone());
            }
            results.push(r.messages());
        }

        for result in &results {
            assert_eq!(result, &vec![confirmed("7", "before", 1), m.clone()]);
        }
    }

    #[test]
    fn test_identical_rapid_sends_converge() {
        let mut r = reconciler();
        r.apply_optimistic(provisional("1", "ok", 10));
        r.apply_optimistic(provisional("2", "ok", 10));

        // the second row arrives first and is paired with the older provisional
        r.apply_confirmed(vec![confirmed("51", "ok", 11)], false);
        r.resolve_optimistic("temp-1", SendOutcome::Confirmed(confirmed("50", "ok", 11)));
        r.resolve_optimistic("temp-2", SendOutcome::Confirmed(confirmed("51", "ok", 11)));

        assert_eq!(ids(&r), vec!["50", "51"]);
    }
}
