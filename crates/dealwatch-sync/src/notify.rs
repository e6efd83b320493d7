use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use dealwatch_adapters::format;
use dealwatch_adapters::{normalize_address, MessagingChannel, PushChannel, PushOutcome, PushPayload};
use dealwatch_core::{EventType, Listing, NotificationEvent, PushEndpoint, Subscriber, MESSAGING, PUSH};
use dealwatch_storage::SubscriberDirectory;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelTally {
    pub sent: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    pub push: ChannelTally,
    pub messaging: ChannelTally,
    /// Push endpoints disabled because the push service rejected them.
    pub expired_endpoints: usize,
}

impl FanoutReport {
    pub fn delivered(&self) -> usize {
        self.push.sent + self.messaging.sent
    }
}

/// Delivers private notifications to subscribers over push and messaging.
pub struct NotificationFanout {
    directory: Arc<dyn SubscriberDirectory>,
    push: Arc<dyn PushChannel>,
    messaging: Arc<dyn MessagingChannel>,
    public_key: Option<String>,
}

impl std::fmt::Debug for NotificationFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationFanout")
            .field("public_key", &self.public_key.is_some())
            .finish()
    }
}

impl NotificationFanout {
    pub fn new(
        directory: Arc<dyn SubscriberDirectory>,
        push: Arc<dyn PushChannel>,
        messaging: Arc<dyn MessagingChannel>,
        public_key: Option<String>,
    ) -> Self {
        Self {
            directory,
            push,
            messaging,
            public_key,
        }
    }

    /// Public key browsers subscribe with, `None` when push is not configured.
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    /// `listing` is the stored record, so its price is the old one.
    pub async fn notify_price_drop(&self, listing: &Listing, new_price: f64) -> Result<FanoutReport> {
        self.handle(&NotificationEvent::price_drop(listing.clone(), new_price))
            .await
    }

    /// Fan one event out to every active subscriber watching its listing.
    pub async fn handle(&self, event: &NotificationEvent) -> Result<FanoutReport> {
        let listing = &event.listing;
        let subscribers = self
            .directory
            .find_watching(&listing.id)
            .await
            .with_context(|| format!("loading watchers of {}", listing.id))?;

        let mut report = FanoutReport::default();
        for subscriber in subscribers.iter().filter(|s| s.active) {
            if event.targets(PUSH) {
                if let Some(endpoint) = subscriber.push_endpoint() {
                    self.deliver_push(subscriber, endpoint, &push_payload(event), &mut report)
                        .await;
                }
            }
            if event.targets(MESSAGING) {
                self.deliver_message(subscriber, listing, &message_text(event), &mut report)
                    .await;
            }
        }

        info!(
            listing_id = %listing.id,
            event = %event.event_type,
            watchers = subscribers.len(),
            push_sent = report.push.sent,
            messaging_sent = report.messaging.sent,
            "notification fan-out finished"
        );
        Ok(report)
    }

    /// Push the best new deal of a category to the subscribers following it.
    pub async fn notify_new_category_deals(&self, listings: &[Listing], category: &str) -> Result<FanoutReport> {
        let mut report = FanoutReport::default();
        // first listing wins ties
        let Some(best) = listings.iter().reduce(|best, l| {
            if l.discount_percentage > best.discount_percentage {
                l
            } else {
                best
            }
        }) else {
            return Ok(report);
        };

        let subscribers = self
            .directory
            .find_watching_category(category)
            .await
            .with_context(|| format!("loading followers of {category}"))?;
        let payload = push_payload(&NotificationEvent::new_deal(best.clone(), &[PUSH]));
        for subscriber in subscribers.iter().filter(|s| s.active) {
            if !subscriber.accepts_discount(best.discount_percentage) {
                debug!(subscriber_id = %subscriber.id, "below subscriber discount preference");
                continue;
            }
            if let Some(endpoint) = subscriber.push_endpoint() {
                self.deliver_push(subscriber, endpoint, &payload, &mut report).await;
            }
        }
        info!(category, listing_id = %best.id, push_sent = report.push.sent, "category deal fan-out finished");
        Ok(report)
    }

    /// Tell one subscriber about a watchlist listing on every channel they enabled.
    pub async fn notify_subscriber_about_deal(&self, subscriber_id: &str, listing: &Listing) -> Result<FanoutReport> {
        let subscriber = self
            .directory
            .find_by_id(subscriber_id)
            .await
            .with_context(|| format!("loading subscriber {subscriber_id}"))?
            .ok_or_else(|| anyhow!("subscriber {subscriber_id} not found"))?;

        let mut report = FanoutReport::default();
        if !subscriber.active {
            return Ok(report);
        }
        if let Some(endpoint) = subscriber.push_endpoint() {
            let payload = PushPayload::watchlist(listing);
            self.deliver_push(&subscriber, endpoint, &payload, &mut report).await;
        }
        let message = message_text(&NotificationEvent::new_deal(listing.clone(), &[MESSAGING]));
        self.deliver_message(&subscriber, listing, &message, &mut report)
            .await;
        Ok(report)
    }

    async fn deliver_push(
        &self,
        subscriber: &Subscriber,
        endpoint: &PushEndpoint,
        payload: &PushPayload,
        report: &mut FanoutReport,
    ) {
        match self.push.send(endpoint, payload).await {
            PushOutcome::Sent => report.push.sent += 1,
            PushOutcome::Failed(err) => {
                warn!(subscriber_id = %subscriber.id, error = %err, "push delivery failed");
                report.push.failed += 1;
            }
            PushOutcome::Expired => {
                report.push.failed += 1;
                report.expired_endpoints += 1;
                info!(subscriber_id = %subscriber.id, "push endpoint expired, disabling push");
                if let Err(err) = self.directory.disable_push(&subscriber.id).await {
                    warn!(subscriber_id = %subscriber.id, error = %err, "could not disable expired push endpoint");
                }
            }
        }
    }

    async fn deliver_message(
        &self,
        subscriber: &Subscriber,
        listing: &Listing,
        message: &str,
        report: &mut FanoutReport,
    ) {
        let Some(raw) = subscriber.messaging_address() else {
            return;
        };
        let Some(address) = normalize_address(raw) else {
            debug!(subscriber_id = %subscriber.id, "messaging address is not E.164, skipping");
            return;
        };
        let result = self
            .messaging
            .send(&address, message, listing.image_url.as_deref())
            .await;
        if result.success {
            report.messaging.sent += 1;
        } else {
            warn!(
                subscriber_id = %subscriber.id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "messaging delivery failed"
            );
            report.messaging.failed += 1;
        }
    }
}

fn push_payload(event: &NotificationEvent) -> PushPayload {
    match event.event_type {
        EventType::PriceDrop => PushPayload::price_drop(&event.listing, event.previous_price, event.new_price),
        EventType::NewDeal => PushPayload::deal(&event.listing),
    }
}

fn message_text(event: &NotificationEvent) -> String {
    match event.event_type {
        EventType::PriceDrop => format::messaging_price_drop(&event.listing, event.previous_price, event.new_price),
        EventType::NewDeal => format::messaging_deal(&event.listing),
    }
}
