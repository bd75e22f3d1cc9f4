//! Subscription dispatch for inbound bus messages.

use zonebridge_common::{is_wildcard, topic_matches};

use crate::bus::{BusClient, QoS};
use crate::error::BusError;

/// Callback invoked with the router context, the concrete topic and the payload.
pub type Handler<C> = Box<dyn FnMut(&mut C, &str, &str) + Send>;

struct Subscription<C> {
    pattern: String,
    handlers: Vec<Handler<C>>,
}

impl<C> Subscription<C> {
    fn fire(&mut self, ctx: &mut C, topic: &str, payload: &str) -> usize {
        for handler in &mut self.handlers {
            handler(&mut *ctx, topic, payload);
        }
        self.handlers.len()
    }
}

/// Maps inbound topics to the handlers subscribed on them.
///
/// A pattern ending in `+` or `#` matches every topic sharing its literal
/// prefix. A topic can match a wildcard pattern and an exact pattern at the
/// same time; both sets of handlers fire.
///
/// Handlers receive a `&mut C` supplied at dispatch time, so they can act on
/// bridge state without capturing it.
pub struct TopicRouter<C> {
    subscriptions: Vec<Subscription<C>>,
}

impl<C: 'static> Default for TopicRouter<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: 'static> TopicRouter<C> {
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    /// Subscribe on the bus and register `handler` under `pattern`.
    ///
    /// Every subscription also gets a handler that logs received messages. If
    /// the bus subscription fails nothing is registered.
    pub fn subscribe<B, F>(
        &mut self,
        bus: &mut B,
        pattern: &str,
        qos: QoS,
        handler: F,
    ) -> Result<(), BusError>
    where
        B: BusClient + ?Sized,
        F: FnMut(&mut C, &str, &str) + Send + 'static,
    {
        bus.subscribe(pattern, qos)?;

        let index = match self.subscriptions.iter().position(|s| s.pattern == pattern) {
            Some(index) => index,
            None => {
                self.subscriptions.push(Subscription {
                    pattern: pattern.to_string(),
                    handlers: Vec::new(),
                });
                self.subscriptions.len() - 1
            }
        };

        let handlers = &mut self.subscriptions[index].handlers;
        handlers.push(Box::new(handler));
        handlers.push(Box::new(echo::<C>));

        tracing::debug!(pattern = %pattern, "Subscribed");
        Ok(())
    }

    /// Fire every handler whose pattern matches `topic`.
    ///
    /// Wildcard patterns are checked first, then the exact pattern. Returns the
    /// number of handlers invoked.
    pub fn dispatch(&mut self, ctx: &mut C, topic: &str, payload: &str) -> usize {
        let mut fired = 0;

        let wildcards = self
            .subscriptions
            .iter_mut()
            .filter(|s| is_wildcard(&s.pattern) && topic_matches(&s.pattern, topic));
        for subscription in wildcards {
            fired += subscription.fire(ctx, topic, payload);
        }

        if let Some(subscription) = self
            .subscriptions
            .iter_mut()
            .find(|s| !is_wildcard(&s.pattern) && topic_matches(&s.pattern, topic))
        {
            fired += subscription.fire(ctx, topic, payload);
        }

        fired
    }

    /// Registered patterns, in subscription order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(|s| s.pattern.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

fn echo<C: 'static>(_ctx: &mut C, topic: &str, payload: &str) {
    tracing::info!(topic = %topic, payload = %payload, "Message received");
}
