//! Host-side change-detection state machine.
//!
//! One instance per attach. The in-page collector reports every message-like
//! node it encounters, in whatever order the view hydrates them; this state
//! machine decides which of those are genuinely new.
//!
//! Per attach the machine moves `Init → Priming → Locked`. While priming,
//! every observation joins the seen set and advances the baseline ordinal;
//! nothing is emitted. Once the view has been quiet for the configured
//! period (and at least one ordinal was captured), the baseline freezes and
//! becomes the forwarding threshold: anything at or below it is absorbed as
//! late-hydrating history, anything above it is a new message.

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use mirrelay_common::types::RawEvent;

use crate::ordinal::OrdinalStrategy;

/// Timing knobs for the state machine.
#[derive(Debug, Clone, Copy)]
pub struct ObserverConfig {
    /// How long the view must stay quiet before the baseline locks.
    pub quiet_period: Duration,
    /// Window from attach during which nothing is forwarded even after
    /// locking, absorbing stragglers from a burst that ended just in time.
    pub warmup: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Priming,
    Locked,
}

/// Per-attach observer state. Reconstructed fresh on every (re)attach;
/// nothing here survives a view replacement.
pub struct ChangeObserver {
    config: ObserverConfig,
    strategy: Box<dyn OrdinalStrategy>,
    phase: Phase,
    seen: HashSet<String>,
    baseline: Option<u64>,
    attached_at: Instant,
    quiet_deadline: Option<Instant>,
}

impl ChangeObserver {
    pub fn new(config: ObserverConfig, strategy: Box<dyn OrdinalStrategy>, now: Instant) -> Self {
        Self {
            config,
            strategy,
            phase: Phase::Init,
            seen: HashSet::new(),
            baseline: None,
            attached_at: now,
            quiet_deadline: None,
        }
    }

    /// Reset unconditionally, as on a reattach or view replacement.
    pub fn reset(&mut self, now: Instant) {
        self.phase = Phase::Init;
        self.seen.clear();
        self.baseline = None;
        self.attached_at = now;
        self.quiet_deadline = None;
    }

    /// Feed one observed node. Returns the event to forward, if this node is
    /// a genuinely new message.
    pub fn observe(&mut self, event: RawEvent, now: Instant) -> Option<RawEvent> {
        // A node arriving after the quiet period has already elapsed must be
        // judged against the locked baseline, not folded into it.
        self.tick(now);

        match self.phase {
            Phase::Init => {
                self.phase = Phase::Priming;
                self.prime(&event, now);
                None
            },
            Phase::Priming => {
                self.prime(&event, now);
                None
            },
            Phase::Locked => self.judge(event, now),
        }
    }

    /// Advance time without an observation; locks the baseline when the
    /// quiet period has elapsed.
    pub fn tick(&mut self, now: Instant) {
        if self.phase == Phase::Priming
            && self.baseline.is_some()
            && self.quiet_deadline.is_some_and(|deadline| now >= deadline)
        {
            self.phase = Phase::Locked;
        }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.phase == Phase::Locked
    }

    #[must_use]
    pub fn baseline(&self) -> Option<u64> {
        self.baseline
    }

    #[must_use]
    pub fn has_seen(&self, native_id: &str) -> bool {
        self.seen.contains(native_id)
    }

    fn prime(&mut self, event: &RawEvent, now: Instant) {
        self.seen.insert(event.native_id.clone());
        if let Some(ordinal) = self.strategy.decode(&event.native_id) {
            self.baseline = Some(self.baseline.map_or(ordinal, |b| b.max(ordinal)));
        }
        self.quiet_deadline = Some(now + self.config.quiet_period);
    }

    fn judge(&mut self, event: RawEvent, now: Instant) -> Option<RawEvent> {
        if !self.seen.insert(event.native_id.clone()) {
            // Re-rendered node we already accounted for.
            return None;
        }

        let in_warmup = now < self.attached_at + self.config.warmup;

        match self.strategy.decode(&event.native_id) {
            Some(ordinal) => {
                if self.baseline.is_some_and(|baseline| ordinal <= baseline) {
                    // Late-hydrating history; absorbed.
                    return None;
                }
                if in_warmup || event.is_empty() {
                    return None;
                }
                self.baseline = Some(ordinal);
                Some(event)
            },
            None => {
                // No decodable ordinal: backfill protection degrades to
                // seen-set membership, and only content-bearing nodes are
                // admitted.
                if in_warmup || event.is_empty() {
                    return None;
                }
                Some(event)
            },
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordinal::LongestNumericToken;

    const QUIET: Duration = Duration::from_millis(1_000);
    const WARMUP: Duration = Duration::from_millis(1_500);

    fn observer(t0: Instant) -> ChangeObserver {
        ChangeObserver::new(
            ObserverConfig {
                quiet_period: QUIET,
                warmup: WARMUP,
            },
            Box::new(LongestNumericToken),
            t0,
        )
    }

    fn node(ordinal: u64, text: &str) -> RawEvent {
        RawEvent {
            native_id: format!("chat-messages-{ordinal}"),
            author: "alice".into(),
            text: text.into(),
            attachments: vec![],
            timestamp: None,
        }
    }

    #[test]
    fn hydration_bursts_emit_nothing_and_lock_on_max_ordinal() {
        let t0 = Instant::now();
        let mut obs = observer(t0);
        let base = 1_199_000_000_000_000_000u64;

        // 50 historical nodes in three bursts over 1.5s.
        let bursts = [
            (Duration::from_millis(0), 0..20u64),
            (Duration::from_millis(700), 20..35),
            (Duration::from_millis(1_500), 35..50),
        ];
        for (at, range) in bursts {
            for i in range {
                let emitted = obs.observe(node(base + i, "old"), t0 + at);
                assert!(emitted.is_none(), "no emission before lock");
            }
        }
        assert!(!obs.is_locked());

        // Quiet period of 1.0s after the last burst.
        obs.tick(t0 + Duration::from_millis(2_600));
        assert!(obs.is_locked());
        assert_eq!(obs.baseline(), Some(base + 49));
    }

    #[test]
    fn new_node_after_lock_emits_exactly_once() {
        let t0 = Instant::now();
        let mut obs = observer(t0);

        obs.observe(node(100_000_000_000_000_000, "old"), t0);
        obs.tick(t0 + Duration::from_secs(2));
        assert!(obs.is_locked());

        let fresh = RawEvent {
            native_id: "chat-messages-100000000000000001".into(),
            author: "bob".into(),
            text: "new message".into(),
            attachments: vec!["https://cdn.example.com/a.png".into()],
            timestamp: Some("2026-08-01T12:00:00Z".into()),
        };
        let at = t0 + Duration::from_secs(3);
        let emitted = obs.observe(fresh.clone(), at);
        assert_eq!(emitted, Some(fresh.clone()));
        assert_eq!(obs.baseline(), Some(100_000_000_000_000_001));

        // Same node re-rendered: absorbed.
        assert!(obs.observe(fresh, at + Duration::from_secs(1)).is_none());
    }

    #[test]
    fn historical_ordinal_after_lock_is_absorbed_into_seen() {
        let t0 = Instant::now();
        let mut obs = observer(t0);

        obs.observe(node(200_000_000_000_000_005, "old"), t0);
        obs.tick(t0 + Duration::from_secs(2));
        assert!(obs.is_locked());

        let late = node(200_000_000_000_000_001, "late hydration");
        let emitted = obs.observe(late.clone(), t0 + Duration::from_secs(3));
        assert!(emitted.is_none());
        assert!(obs.has_seen(&late.native_id));
        assert_eq!(obs.baseline(), Some(200_000_000_000_000_005));
    }

    #[test]
    fn warmup_window_absorbs_even_above_baseline() {
        let t0 = Instant::now();
        let mut obs = ChangeObserver::new(
            ObserverConfig {
                quiet_period: Duration::from_millis(100),
                warmup: Duration::from_secs(10),
            },
            Box::new(LongestNumericToken),
            t0,
        );

        obs.observe(node(300_000_000_000_000_000, "old"), t0);
        obs.tick(t0 + Duration::from_secs(1));
        assert!(obs.is_locked());

        // Above baseline but still inside the warm-up window from attach.
        let early = node(300_000_000_000_000_001, "too early");
        assert!(obs.observe(early, t0 + Duration::from_secs(2)).is_none());
    }

    #[test]
    fn no_lock_without_any_decodable_ordinal() {
        let t0 = Instant::now();
        let mut obs = observer(t0);

        let unparseable = RawEvent {
            native_id: "divider-top".into(),
            author: String::new(),
            text: "— new messages —".into(),
            attachments: vec![],
            timestamp: None,
        };
        obs.observe(unparseable, t0);
        obs.tick(t0 + Duration::from_secs(30));
        assert!(!obs.is_locked());
    }

    #[test]
    fn ordinal_less_node_admitted_by_content_after_lock() {
        let t0 = Instant::now();
        let mut obs = observer(t0);

        obs.observe(node(400_000_000_000_000_000, "old"), t0);
        obs.tick(t0 + Duration::from_secs(2));

        let at = t0 + Duration::from_secs(3);
        let odd = RawEvent {
            native_id: "pending-message-temp".into(),
            author: "carol".into(),
            text: "hello".into(),
            attachments: vec![],
            timestamp: None,
        };
        assert!(obs.observe(odd.clone(), at).is_some());
        // Seen-set membership is the only protection left for these.
        assert!(obs.observe(odd, at + Duration::from_secs(1)).is_none());

        let empty = RawEvent {
            native_id: "spinner-node".into(),
            author: String::new(),
            text: String::new(),
            attachments: vec![],
            timestamp: None,
        };
        assert!(obs.observe(empty, at).is_none());
    }

    #[test]
    fn node_arriving_past_quiet_deadline_locks_first() {
        let t0 = Instant::now();
        let mut obs = observer(t0);

        obs.observe(node(500_000_000_000_000_000, "old"), t0);

        // No tick ran in between; the observation itself must trigger the
        // lock and then be judged against the frozen baseline.
        let fresh = node(500_000_000_000_000_001, "new");
        let emitted = obs.observe(fresh, t0 + Duration::from_secs(5));
        assert!(obs.is_locked());
        assert!(emitted.is_some());
    }

    #[test]
    fn reset_clears_everything() {
        let t0 = Instant::now();
        let mut obs = observer(t0);

        obs.observe(node(600_000_000_000_000_000, "old"), t0);
        obs.tick(t0 + Duration::from_secs(2));
        assert!(obs.is_locked());

        let t1 = t0 + Duration::from_secs(10);
        obs.reset(t1);
        assert!(!obs.is_locked());
        assert_eq!(obs.baseline(), None);
        assert!(!obs.has_seen("chat-messages-600000000000000000"));
    }
}
