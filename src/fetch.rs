//! Fetch cycle state machine.
//!
//! Decides *when* snapshots are fetched; never performs I/O itself. Time is
//! supplied by the caller, so the whole cycle is testable without a runtime.
//!
//! Two triggers feed the cycle:
//! - a repeating timer armed at `refresh_period` after each restart
//! - a one-second countdown that issues an early fetch at `trigger_at`
//!
//! Both are suppressed while an entity fetch is outstanding.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::{Options, TrackerConfig};

/// What a fetch request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Vehicle positions
    Entities,
    /// Route path shapes
    Overlays,
}

/// A fetch the host should perform. The ticket identifies the completion;
/// the scope is the selected group set at issue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: u64,
    pub kind: FetchKind,
    pub scope: BTreeSet<String>,
}

impl FetchRequest {
    pub fn is_entity_fetch(&self) -> bool {
        self.kind == FetchKind::Entities
    }

    /// Comma-joined scope, as sent to the backend.
    pub fn scope_param(&self) -> String {
        self.scope.iter().cloned().collect::<Vec<_>>().join(",")
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: u64,
    from_countdown: bool,
}

#[derive(Debug, Clone, Copy)]
struct RepeatingTimer {
    period: Duration,
    next_due: Instant,
}

#[derive(Debug)]
pub struct FetchController {
    countdown_start: u32,
    trigger_at: u32,
    countdown: i64,
    next_ticket: u64,
    in_flight: Option<InFlight>,
    timer: Option<RepeatingTimer>,
    scope: BTreeSet<String>,
}

impl FetchController {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            countdown_start: config.countdown_seconds,
            trigger_at: config.countdown_trigger_at,
            countdown: i64::from(config.countdown_seconds),
            next_ticket: 1,
            in_flight: None,
            timer: None,
            scope: BTreeSet::new(),
        }
    }

    /// Seconds left on the countdown.
    pub fn countdown(&self) -> i64 {
        self.countdown
    }

    pub fn is_timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.timer.map(|t| t.next_due)
    }

    /// Ticket of the outstanding entity fetch, if any.
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.map(|f| f.ticket)
    }

    pub fn scope(&self) -> &BTreeSet<String> {
        &self.scope
    }

    fn issue(&mut self, kind: FetchKind) -> FetchRequest {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        FetchRequest {
            ticket,
            kind,
            scope: self.scope.clone(),
        }
    }

    fn issue_entity_fetch(&mut self, from_countdown: bool) -> FetchRequest {
        let request = self.issue(FetchKind::Entities);
        self.in_flight = Some(InFlight {
            ticket: request.ticket,
            from_countdown,
        });
        request
    }

    fn reset_countdown(&mut self) {
        self.countdown = i64::from(self.countdown_start);
    }

    /// Start a fresh cycle for `scope`.
    ///
    /// Cancels the repeating timer and resets the countdown, then issues the
    /// initial fetches and re-arms the timer when live tracking is on. The
    /// initial entity fetch replaces any outstanding one.
    pub fn restart(
        &mut self,
        scope: &BTreeSet<String>,
        options: &Options,
        now: Instant,
    ) -> Vec<FetchRequest> {
        self.cancel_timer();
        self.reset_countdown();
        self.scope = scope.clone();

        if scope.is_empty() {
            self.in_flight = None;
            info!("[FetchController] No groups selected, fetch cycle stopped");
            return Vec::new();
        }

        let mut requests = Vec::with_capacity(2);
        if options.show_paths_enabled {
            requests.push(self.issue(FetchKind::Overlays));
        }
        requests.push(self.issue_entity_fetch(false));

        if options.live_tracking_enabled {
            self.timer = Some(RepeatingTimer {
                period: options.refresh_period(),
                next_due: now + options.refresh_period(),
            });
        }

        info!(
            "[FetchController] Restarted for {} groups (live: {}, paths: {}, period: {}ms)",
            scope.len(),
            options.live_tracking_enabled,
            options.show_paths_enabled,
            options.refresh_period().as_millis()
        );
        requests
    }

    /// Fire the repeating fetch if it is due, re-arming it for the next
    /// period.
    pub fn poll_timer(&mut self, now: Instant) -> Option<FetchRequest> {
        let timer = self.timer.as_mut()?;
        if now < timer.next_due {
            return None;
        }
        timer.next_due = now + timer.period;

        if self.in_flight.is_some() {
            debug!("[FetchController] Timer fired with a fetch in flight, skipping");
            return None;
        }
        Some(self.issue_entity_fetch(false))
    }

    /// Advance the one-second countdown.
    ///
    /// Only runs while the repeating timer is armed (live tracking on and
    /// something selected).
    pub fn tick_countdown(&mut self) -> Option<FetchRequest> {
        self.timer?;
        self.countdown -= 1;

        if self.in_flight.is_some() {
            return None;
        }
        if self.countdown <= i64::from(self.trigger_at) && self.countdown > 0 {
            debug!(
                "[FetchController] Countdown at {}s, fetching early",
                self.countdown
            );
            return Some(self.issue_entity_fetch(true));
        }
        if self.countdown <= 0 {
            self.reset_countdown();
        }
        None
    }

    /// Record a completion. Returns whether `ticket` was the outstanding
    /// entity fetch.
    pub fn complete(&mut self, ticket: u64) -> bool {
        match self.in_flight {
            Some(f) if f.ticket == ticket => {
                self.in_flight = None;
                if f.from_countdown || self.countdown <= i64::from(self.trigger_at) {
                    self.reset_countdown();
                }
                true
            }
            _ => false,
        }
    }

    /// Stop the repeating timer (and with it the countdown).
    pub fn cancel_timer(&mut self) {
        if self.timer.take().is_some() {
            debug!("[FetchController] Repeating timer cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(groups: &[&str]) -> BTreeSet<String> {
        groups.iter().map(|g| g.to_string()).collect()
    }

    fn controller() -> FetchController {
        FetchController::new(&TrackerConfig::default())
    }

    #[test]
    fn test_restart_issues_initial_fetches() {
        let mut fc = controller();
        let now = Instant::now();
        let requests = fc.restart(&scope(&["R1", "R2"]), &Options::default(), now);

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].kind, FetchKind::Overlays);
        assert!(requests[1].is_entity_fetch());
        assert_eq!(requests[1].scope_param(), "R1,R2");
        assert_eq!(fc.in_flight(), Some(requests[1].ticket));
        assert_eq!(fc.next_due(), Some(now + Duration::from_secs(20)));
    }

    #[test]
    fn test_restart_respects_options() {
        let mut fc = controller();
        let options = Options {
            live_tracking_enabled: false,
            show_paths_enabled: false,
            ..Options::default()
        };
        let requests = fc.restart(&scope(&["R1"]), &options, Instant::now());
        assert_eq!(requests.len(), 1);
        assert!(!fc.is_timer_armed());
        assert!(fc.tick_countdown().is_none());
    }

    #[test]
    fn test_empty_scope_cancels_cycle() {
        let mut fc = controller();
        let now = Instant::now();
        fc.restart(&scope(&["R1"]), &Options::default(), now);
        assert!(fc.restart(&BTreeSet::new(), &Options::default(), now).is_empty());
        assert!(!fc.is_timer_armed());
        assert!(fc.poll_timer(now + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_timer_suppressed_while_in_flight() {
        let mut fc = controller();
        let now = Instant::now();
        let initial = fc.restart(&scope(&["R1"]), &Options::default(), now);
        let ticket = initial.last().unwrap().ticket;

        let due = now + Duration::from_secs(20);
        assert!(fc.poll_timer(now + Duration::from_secs(19)).is_none());
        assert!(fc.poll_timer(due).is_none());
        assert_eq!(fc.next_due(), Some(due + Duration::from_secs(20)));

        assert!(fc.complete(ticket));
        let request = fc.poll_timer(due + Duration::from_secs(20)).unwrap();
        assert!(request.is_entity_fetch());
        assert!(!fc.complete(ticket));
    }

    #[test]
    fn test_countdown_early_fetch_and_reset() {
        let mut fc = controller();
        let initial = fc.restart(&scope(&["R1"]), &Options::default(), Instant::now());
        fc.complete(initial.last().unwrap().ticket);

        for expected in (2..10).rev() {
            assert!(fc.tick_countdown().is_none());
            assert_eq!(fc.countdown(), expected);
        }
        let early = fc.tick_countdown().unwrap();
        assert_eq!(fc.countdown(), 1);

        // Still in flight at zero: no reset, no second fetch
        assert!(fc.tick_countdown().is_none());
        assert_eq!(fc.countdown(), 0);

        assert!(fc.complete(early.ticket));
        assert_eq!(fc.countdown(), 10);
    }

    #[test]
    fn test_countdown_resets_at_zero_when_idle() {
        let config = TrackerConfig {
            countdown_seconds: 2,
            countdown_trigger_at: 0,
            ..TrackerConfig::default()
        };
        let mut fc = FetchController::new(&config);
        let initial = fc.restart(&scope(&["R1"]), &Options::default(), Instant::now());
        fc.complete(initial.last().unwrap().ticket);

        assert!(fc.tick_countdown().is_none());
        assert!(fc.tick_countdown().is_none());
        assert_eq!(fc.countdown(), 2);
    }

    #[test]
    fn test_stale_ticket_ignored() {
        let mut fc = controller();
        let now = Instant::now();
        let first = fc.restart(&scope(&["R1"]), &Options::default(), now);
        let second = fc.restart(&scope(&["R2"]), &Options::default(), now);
        assert!(!fc.complete(first.last().unwrap().ticket));
        assert!(fc.complete(second.last().unwrap().ticket));
    }

    #[test]
    fn test_zero_period_does_not_rearm_immediately() {
        let mut fc = controller();
        let now = Instant::now();
        let options = Options {
            refresh_period_ms: 0,
            ..Options::default()
        };
        fc.restart(&scope(&["R1"]), &options, now);
        assert_eq!(fc.next_due(), Some(now + Duration::from_secs(1)));
        assert!(fc.poll_timer(now).is_none());

        // Suppressed while in flight, but still pushed a full second out
        let due = now + Duration::from_secs(1);
        assert!(fc.poll_timer(due).is_none());
        assert_eq!(fc.next_due(), Some(due + Duration::from_secs(1)));
    }
}
