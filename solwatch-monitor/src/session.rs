//! Session activity monitor.
//!
//! Decides when the live telemetry subscription is open. The bus connection
//! costs real bandwidth and gateway battery, so the subscription follows
//! recent user input rather than raw page visibility: signed-in users get a
//! live feed, and 60 seconds without input suspends it until the next
//! activity ping.
//!
//! The decision logic is a pure state machine ([`SessionMonitor::handle`])
//! fed typed events; the controller task owns the idle deadline and applies
//! the resulting actions to the feed. Deadlines carry a generation counter,
//! so re-arming invalidates any previously armed deadline outright — a stale
//! timer can never close a subscription that was re-opened after it was
//! armed. When an activity event and the deadline fire in the same tick, the
//! controller's biased select dispatches the activity first: activity wins.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, info};

use crate::feed::TelemetryFeed;
use crate::state::Shared;

/// Derived session phase, for the `/live` view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Unauthenticated,
    Active,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    /// Any qualifying user input (pointer, keyboard, scroll, touch).
    /// `foreground` is the frontend's visibility state at ping time.
    Activity { foreground: bool },
    /// The armed idle deadline elapsed. Only honored when `generation`
    /// matches the latest arm.
    DeadlineElapsed { generation: u64 },
    /// Page-hide / shutdown safety net: close no matter what the timer says.
    Suspend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    OpenFeed,
    CloseFeed,
    ArmIdleDeadline { generation: u64 },
    CancelIdleDeadline,
}

/// Pure session state machine. One instance per process.
#[derive(Debug)]
pub struct SessionMonitor {
    authenticated: bool,
    feed_open: bool,
    generation: u64,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self {
            authenticated: false,
            feed_open: false,
            generation: 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Invariant: never true while unauthenticated.
    pub fn subscription_active(&self) -> bool {
        self.feed_open
    }

    pub fn phase(&self) -> SessionPhase {
        if !self.authenticated {
            SessionPhase::Unauthenticated
        } else if self.feed_open {
            SessionPhase::Active
        } else {
            SessionPhase::Idle
        }
    }

    /// Apply one event, returning the actions the controller must perform.
    /// Open/close come out at most once per event: the flags flip here,
    /// optimistically, and double-opens/closes are absorbed as no-ops.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        match event {
            SessionEvent::SignedIn => {
                self.authenticated = true;
                if !self.feed_open {
                    self.feed_open = true;
                    actions.push(SessionAction::OpenFeed);
                }
                self.generation += 1;
                actions.push(SessionAction::ArmIdleDeadline { generation: self.generation });
            }
            SessionEvent::SignedOut => {
                self.authenticated = false;
                self.generation += 1;
                actions.push(SessionAction::CancelIdleDeadline);
                if self.feed_open {
                    self.feed_open = false;
                    actions.push(SessionAction::CloseFeed);
                }
            }
            SessionEvent::Activity { foreground } => {
                if !self.authenticated {
                    return actions;
                }
                // A backgrounded tab re-arms the deadline but never re-opens:
                // a closed subscription only wakes for input the user can see.
                if !self.feed_open && foreground {
                    self.feed_open = true;
                    actions.push(SessionAction::OpenFeed);
                }
                self.generation += 1;
                actions.push(SessionAction::ArmIdleDeadline { generation: self.generation });
            }
            SessionEvent::DeadlineElapsed { generation } => {
                if generation != self.generation {
                    // Superseded by a later arm or a sign-out.
                    return actions;
                }
                if self.feed_open {
                    self.feed_open = false;
                    actions.push(SessionAction::CloseFeed);
                }
            }
            SessionEvent::Suspend => {
                self.generation += 1;
                actions.push(SessionAction::CancelIdleDeadline);
                if self.feed_open {
                    self.feed_open = false;
                    actions.push(SessionAction::CloseFeed);
                }
            }
        }
        actions
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the session machine: receives events from the REST layer, owns the
/// idle deadline, applies actions to the feed.
pub fn spawn_session_controller(
    session: Shared<SessionMonitor>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    feed: TelemetryFeed,
    idle_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut deadline: Option<(u64, Instant)> = None;

        loop {
            let event = if let Some((generation, at)) = deadline {
                tokio::select! {
                    // Activity ahead of the timer: if both are ready in the
                    // same tick, the subscription stays open.
                    biased;
                    ev = events.recv() => match ev {
                        Some(ev) => ev,
                        None => break,
                    },
                    _ = sleep_until(at) => {
                        deadline = None;
                        SessionEvent::DeadlineElapsed { generation }
                    }
                }
            } else {
                match events.recv().await {
                    Some(ev) => ev,
                    None => break,
                }
            };

            let actions = session.lock().handle(event);
            for action in actions {
                match action {
                    SessionAction::OpenFeed => {
                        info!("session active, opening live feed");
                        feed.open().await;
                    }
                    SessionAction::CloseFeed => {
                        info!("closing live feed ({:?})", event);
                        feed.close().await;
                    }
                    SessionAction::ArmIdleDeadline { generation } => {
                        debug!("idle deadline armed (generation {})", generation);
                        deadline = Some((generation, Instant::now() + idle_timeout));
                    }
                    SessionAction::CancelIdleDeadline => {
                        deadline = None;
                    }
                }
            }
        }
        debug!("session controller stopped (event channel closed)");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm_generation(actions: &[SessionAction]) -> Option<u64> {
        actions.iter().find_map(|a| match a {
            SessionAction::ArmIdleDeadline { generation } => Some(*generation),
            _ => None,
        })
    }

    #[test]
    fn sign_in_opens_and_arms() {
        let mut m = SessionMonitor::new();
        let actions = m.handle(SessionEvent::SignedIn);
        assert!(actions.contains(&SessionAction::OpenFeed));
        assert!(arm_generation(&actions).is_some());
        assert_eq!(m.phase(), SessionPhase::Active);
        assert!(m.subscription_active());
    }

    #[test]
    fn sign_out_closes_unconditionally_and_cancels() {
        let mut m = SessionMonitor::new();
        m.handle(SessionEvent::SignedIn);
        let actions = m.handle(SessionEvent::SignedOut);
        assert_eq!(
            actions,
            vec![SessionAction::CancelIdleDeadline, SessionAction::CloseFeed]
        );
        assert_eq!(m.phase(), SessionPhase::Unauthenticated);
        assert!(!m.subscription_active());
    }

    #[test]
    fn subscription_stays_closed_after_sign_out_until_next_sign_in() {
        let mut m = SessionMonitor::new();
        m.handle(SessionEvent::SignedIn);
        m.handle(SessionEvent::SignedOut);

        // No event other than SignedIn may reopen.
        assert!(m.handle(SessionEvent::Activity { foreground: true }).is_empty());
        assert!(!m.subscription_active());
        assert!(m
            .handle(SessionEvent::DeadlineElapsed { generation: 99 })
            .is_empty());
        assert!(!m.subscription_active());

        let actions = m.handle(SessionEvent::SignedIn);
        assert!(actions.contains(&SessionAction::OpenFeed));
        assert!(m.subscription_active());
    }

    #[test]
    fn deadline_closes_exactly_once() {
        let mut m = SessionMonitor::new();
        let generation = arm_generation(&m.handle(SessionEvent::SignedIn)).unwrap();

        let actions = m.handle(SessionEvent::DeadlineElapsed { generation });
        assert_eq!(actions, vec![SessionAction::CloseFeed]);
        assert_eq!(m.phase(), SessionPhase::Idle);

        // A duplicate fire of the same deadline produces no second close.
        let actions = m.handle(SessionEvent::DeadlineElapsed { generation });
        assert!(actions.is_empty());
    }

    #[test]
    fn activity_while_idle_and_foreground_reopens() {
        let mut m = SessionMonitor::new();
        let generation = arm_generation(&m.handle(SessionEvent::SignedIn)).unwrap();
        m.handle(SessionEvent::DeadlineElapsed { generation });
        assert_eq!(m.phase(), SessionPhase::Idle);

        let actions = m.handle(SessionEvent::Activity { foreground: true });
        assert!(actions.contains(&SessionAction::OpenFeed));
        assert_eq!(m.phase(), SessionPhase::Active);
    }

    #[test]
    fn activity_while_backgrounded_does_not_reopen() {
        let mut m = SessionMonitor::new();
        let generation = arm_generation(&m.handle(SessionEvent::SignedIn)).unwrap();
        m.handle(SessionEvent::DeadlineElapsed { generation });

        let actions = m.handle(SessionEvent::Activity { foreground: false });
        assert!(!actions.contains(&SessionAction::OpenFeed));
        assert!(arm_generation(&actions).is_some());
        assert_eq!(m.phase(), SessionPhase::Idle);
    }

    #[test]
    fn rearming_twice_rejects_the_first_deadline() {
        let mut m = SessionMonitor::new();
        let first = arm_generation(&m.handle(SessionEvent::SignedIn)).unwrap();
        let second =
            arm_generation(&m.handle(SessionEvent::Activity { foreground: true })).unwrap();
        assert_ne!(first, second);

        // The superseded deadline must not close the feed early.
        assert!(m.handle(SessionEvent::DeadlineElapsed { generation: first }).is_empty());
        assert!(m.subscription_active());

        // The latest one governs.
        let actions = m.handle(SessionEvent::DeadlineElapsed { generation: second });
        assert_eq!(actions, vec![SessionAction::CloseFeed]);
    }

    #[test]
    fn suspend_closes_regardless_of_timer() {
        let mut m = SessionMonitor::new();
        m.handle(SessionEvent::SignedIn);
        let actions = m.handle(SessionEvent::Suspend);
        assert!(actions.contains(&SessionAction::CloseFeed));
        assert!(!m.subscription_active());

        // Suspend on an already-closed feed is a no-op apart from the cancel.
        let actions = m.handle(SessionEvent::Suspend);
        assert_eq!(actions, vec![SessionAction::CancelIdleDeadline]);
    }

    // Controller-level checks run against a real client handle that is never
    // connected: subscribe/unsubscribe just queue into its request channel.
    fn offline_feed() -> TelemetryFeed {
        let (client, _eventloop) = rumqttc::AsyncClient::new(
            rumqttc::MqttOptions::new("test", "localhost", 1883),
            10,
        );
        TelemetryFeed::new(client, &crate::config::MqttConf::default())
    }

    #[tokio::test]
    async fn controller_closes_feed_after_idle_timeout() {
        let session = crate::state::new_state(SessionMonitor::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let _controller = spawn_session_controller(
            session.clone(),
            rx,
            offline_feed(),
            Duration::from_millis(50),
        );

        tx.send(SessionEvent::SignedIn).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.lock().phase(), SessionPhase::Active);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.lock().phase(), SessionPhase::Idle);

        tx.send(SessionEvent::Activity { foreground: true }).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.lock().phase(), SessionPhase::Active);
    }

    #[tokio::test]
    async fn controller_activity_postpones_the_deadline() {
        let session = crate::state::new_state(SessionMonitor::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let _controller = spawn_session_controller(
            session.clone(),
            rx,
            offline_feed(),
            Duration::from_millis(100),
        );

        tx.send(SessionEvent::SignedIn).unwrap();
        // Keep poking before the deadline; the feed must stay open well past
        // the first deadline's original expiry.
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(SessionEvent::Activity { foreground: true }).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.lock().phase(), SessionPhase::Active);
    }

    #[test]
    fn feed_never_open_while_unauthenticated() {
        let mut m = SessionMonitor::new();
        for ev in [
            SessionEvent::Activity { foreground: true },
            SessionEvent::DeadlineElapsed { generation: 0 },
            SessionEvent::Suspend,
        ] {
            m.handle(ev);
            assert!(!m.subscription_active());
        }
    }
}
