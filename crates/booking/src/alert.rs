//! Background check warning operations when a slot is nearly sold out.
//!
//! Each pass reads the slots at or below the threshold and emits one
//! [`BookingEvent::InventoryLow`] per slot, at most once per cooldown.
//! Cooldowns live in memory, so a restart may repeat the latest alerts.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{BookingEvent, SlotKey};
use serde::Serialize;
use store::BookingStore;
use tokio::sync::watch;

use crate::clock::SharedClock;
use crate::error::Result;
use crate::notify::SharedNotifier;

pub const DEFAULT_ALERT_THRESHOLD: u32 = 5;
pub const DEFAULT_ALERT_COOLDOWN_SECS: i64 = 4 * 60 * 60;
pub const DEFAULT_ALERT_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertSettings {
    /// Alert once a slot has this many cabins left or fewer.
    pub threshold: u32,
    /// Minimum time between two alerts for the same slot.
    pub cooldown: chrono::Duration,
    pub interval: Duration,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_ALERT_THRESHOLD,
            cooldown: chrono::Duration::seconds(DEFAULT_ALERT_COOLDOWN_SECS),
            interval: DEFAULT_ALERT_INTERVAL,
        }
    }
}

/// Counts from one check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertReport {
    /// Slots at or below the threshold.
    pub low: usize,
    pub alerted: usize,
    /// Low slots still inside their cooldown.
    pub suppressed: usize,
}

pub struct InventoryAlert<S> {
    store: S,
    notifier: SharedNotifier,
    clock: SharedClock,
    settings: AlertSettings,
    last_alerted: HashMap<SlotKey, DateTime<Utc>>,
    shutdown: watch::Receiver<bool>,
}

impl<S: BookingStore> InventoryAlert<S> {
    /// Returns the check and its shutdown sender.
    pub fn new(
        store: S,
        notifier: SharedNotifier,
        clock: SharedClock,
        settings: AlertSettings,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let alert = Self {
            store,
            notifier,
            clock,
            settings,
            last_alerted: HashMap::new(),
            shutdown: shutdown_rx,
        };
        (alert, shutdown_tx)
    }

    fn cooling_down(&self, slot: &SlotKey, now: DateTime<Utc>) -> bool {
        self.last_alerted
            .get(slot)
            .is_some_and(|at| now - *at < self.settings.cooldown)
    }

    #[tracing::instrument(skip(self), fields(threshold = self.settings.threshold))]
    pub async fn run_once(&mut self) -> Result<AlertReport> {
        let now = self.clock.now();
        let cooldown = self.settings.cooldown;
        self.last_alerted.retain(|_, at| now - *at < cooldown);

        let low = self
            .store
            .low_inventory_slots(self.settings.threshold)
            .await?;
        let mut report = AlertReport {
            low: low.len(),
            ..AlertReport::default()
        };

        for slot in low {
            if self.cooling_down(&slot.key, now) {
                report.suppressed += 1;
                continue;
            }
            let available = slot.available();
            tracing::warn!(
                voyage_id = %slot.key.voyage_id,
                cabin_type_id = %slot.key.cabin_type_id,
                available,
                capacity = slot.capacity,
                "inventory running low"
            );
            self.notifier.notify(BookingEvent::InventoryLow {
                slot: slot.key,
                available,
                threshold: self.settings.threshold,
                occurred_at: now,
            });
            metrics::counter!("inventory_low_alerts_total").increment(1);
            self.last_alerted.insert(slot.key, now);
            report.alerted += 1;
        }

        metrics::gauge!("inventory_low_slots").set(report.low as f64);
        if report.alerted > 0 {
            tracing::info!(
                alerted = report.alerted,
                suppressed = report.suppressed,
                "inventory alerts sent"
            );
        }
        Ok(report)
    }

    /// Checks every interval until shutdown is signalled.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            interval = ?self.settings.interval,
            threshold = self.settings.threshold,
            "inventory alert started"
        );

        while !*self.shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        metrics::counter!("inventory_alert_errors_total").increment(1);
                        tracing::error!(error = %e, "inventory alert check failed");
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("inventory alert stopped");
    }
}
