// Subscription bookkeeping: sid-keyed table, delivery budgets, and the
// callback each delivery is routed to.
use std::collections::HashMap;

use bytes::Bytes;

/// One delivered message, handed to a subscription callback or returned
/// from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub reply: Option<String>,
    pub payload: Bytes,
    pub sid: u64,
}

pub type Callback = Box<dyn FnMut(Message) + Send + 'static>;

/// A registered subscription. Owned by the table until it is removed by
/// an unsubscribe or by its own delivery budget running out.
pub struct Subscription {
    sid: u64,
    subject: String,
    queue_group: String,
    callback: Callback,
    delivered: u64,
    budget: Option<u64>,
}

impl Subscription {
    pub fn new(sid: u64, subject: String, queue_group: String, callback: Callback) -> Self {
        Self {
            sid,
            subject,
            queue_group,
            callback,
            delivered: 0,
            budget: None,
        }
    }

    pub fn sid(&self) -> u64 {
        self.sid
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn queue_group(&self) -> &str {
        &self.queue_group
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn invoke(&mut self, message: Message) {
        (self.callback)(message);
    }

    fn exhausted(&self) -> bool {
        self.budget.is_some_and(|max| self.delivered >= max)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("sid", &self.sid)
            .field("subject", &self.subject)
            .field("queue_group", &self.queue_group)
            .field("delivered", &self.delivered)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

/// All live subscriptions, keyed by sid. Sids are assigned by the
/// client and keep rising across reconnects, so a stale sid from a
/// previous session never aliases a live entry.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: HashMap<u64, Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subscription: Subscription) {
        self.entries.insert(subscription.sid(), subscription);
    }

    pub fn remove(&mut self, sid: u64) -> Option<Subscription> {
        self.entries.remove(&sid)
    }

    pub fn contains(&self, sid: u64) -> bool {
        self.entries.contains_key(&sid)
    }

    pub fn get_mut(&mut self, sid: u64) -> Option<&mut Subscription> {
        self.entries.get_mut(&sid)
    }

    /// Cap the subscription at `max_messages` total deliveries. A cap
    /// the delivered count has already met retires the entry on the
    /// spot, so no further message can reach its callback.
    pub fn limit(&mut self, sid: u64, max_messages: u64) -> bool {
        match self.entries.get_mut(&sid) {
            Some(subscription) => {
                subscription.budget = Some(max_messages);
                if subscription.exhausted() {
                    self.entries.remove(&sid);
                }
                true
            }
            None => false,
        }
    }

    /// Count a delivery against `sid`. Returns `None` when the sid is
    /// unknown, otherwise whether this delivery met the budget and the
    /// entry should be retired after the callback runs. The count never
    /// passes the budget: an entry already at its cap does not count
    /// another delivery.
    pub fn mark_delivered(&mut self, sid: u64) -> Option<bool> {
        let subscription = self.entries.get_mut(&sid)?;
        if subscription.exhausted() {
            self.entries.remove(&sid);
            return None;
        }
        subscription.delivered += 1;
        Some(subscription.exhausted())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
