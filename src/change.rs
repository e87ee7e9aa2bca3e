//! Replayable state-change streams.
//!
//! Every layer owns one [`ChangeSubject`].  A transition publishes the new
//! state together with the action that caused it; a late subscriber is
//! immediately handed `(current state, initial)` so it never has to query
//! and subscribe as two racing steps.
//!
//! ```text
//!   layer ──publish(state, action)──▶ ChangeSubject ──▶ subscriber₁
//!                                          │          ──▶ subscriber₂
//!   subscribe(f) ──▶ f(state, initial) ────┘
//! ```
//!
//! Subscribers run synchronously, in subscription order, on the caller's
//! stack.  They must not call back into the layer that is publishing.

/// Actions that can describe a replay of the current state.
pub trait ChangeAction: Clone {
    /// The action attached to the replay handed to new subscribers.
    fn initial() -> Self;
}

/// One published transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<S, A> {
    pub state: S,
    pub action: A,
}

impl<S, A> Change<S, A> {
    pub fn new(state: S, action: A) -> Self {
        Self { state, action }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<T> = Box<dyn FnMut(&T)>;

// ── ChangeSubject ────────────────────────────────────────────

/// Holds the current state and fans out every transition.
pub struct ChangeSubject<S, A> {
    state: S,
    subscribers: Vec<(SubscriptionId, Subscriber<Change<S, A>>)>,
    next_id: u64,
}

impl<S: Clone, A: ChangeAction> ChangeSubject<S, A> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// The current state tagged with the replay action.
    pub fn current(&self) -> Change<S, A> {
        Change::new(self.state.clone(), A::initial())
    }

    /// Register `f`; it is called at once with the replay.
    pub fn subscribe(&mut self, mut f: impl FnMut(&Change<S, A>) + 'static) -> SubscriptionId {
        f(&self.current());
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(f)));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Replace the state and notify every subscriber.
    pub fn publish(&mut self, state: S, action: A) {
        self.state = state;
        let change = Change::new(self.state.clone(), action);
        for (_, f) in &mut self.subscribers {
            f(&change);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<S: core::fmt::Debug, A> core::fmt::Debug for ChangeSubject<S, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChangeSubject")
            .field("state", &self.state)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

// ── ValueSubject ─────────────────────────────────────────────

/// A replaying value stream with no action attached.
pub struct ValueSubject<T> {
    value: T,
    subscribers: Vec<(SubscriptionId, Subscriber<T>)>,
    next_id: u64,
}

impl<T: Clone + PartialEq> ValueSubject<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn subscribe(&mut self, mut f: impl FnMut(&T) + 'static) -> SubscriptionId {
        f(&self.value);
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(f)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    /// Store `value`; subscribers hear about it only if it changed.
    pub fn set(&mut self, value: T) {
        if self.value == value {
            return;
        }
        self.value = value;
        for (_, f) in &mut self.subscribers {
            f(&self.value);
        }
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for ValueSubject<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValueSubject")
            .field("value", &self.value)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        Initial,
        Bump,
    }

    impl ChangeAction for Action {
        fn initial() -> Self {
            Self::Initial
        }
    }

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl FnMut(&T) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |v: &T| sink.borrow_mut().push(v.clone()))
    }

    #[test]
    fn subscribe_replays_current_state() {
        let mut subject: ChangeSubject<u32, Action> = ChangeSubject::new(7);
        let (log, f) = recorder();
        subject.subscribe(f);
        assert_eq!(*log.borrow(), [Change::new(7, Action::Initial)]);
    }

    #[test]
    fn publish_reaches_subscribers_in_order() {
        let mut subject: ChangeSubject<u32, Action> = ChangeSubject::new(0);
        let (log, f) = recorder();
        subject.subscribe(f);
        subject.publish(1, Action::Bump);
        subject.publish(2, Action::Bump);

        let seen: Vec<_> = log.borrow().iter().map(|c| c.state).collect();
        assert_eq!(seen, [0, 1, 2]);
        assert_eq!(*subject.state(), 2);
    }

    #[test]
    fn late_subscriber_sees_latest_state_only() {
        let mut subject: ChangeSubject<u32, Action> = ChangeSubject::new(0);
        subject.publish(5, Action::Bump);
        let (log, f) = recorder();
        subject.subscribe(f);
        assert_eq!(*log.borrow(), [Change::new(5, Action::Initial)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut subject: ChangeSubject<u32, Action> = ChangeSubject::new(0);
        let (log, f) = recorder();
        let id = subject.subscribe(f);
        assert!(subject.unsubscribe(id));
        assert!(!subject.unsubscribe(id));
        subject.publish(1, Action::Bump);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn value_subject_skips_duplicates() {
        let mut subject = ValueSubject::new(false);
        let (log, f) = recorder();
        subject.subscribe(f);
        subject.set(false);
        subject.set(true);
        subject.set(true);
        assert_eq!(*log.borrow(), [false, true]);
    }
}
