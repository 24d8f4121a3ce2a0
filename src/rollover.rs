//! Day boundary cutover.
//!
//! # Responsibility
//! - Compare the live day key with the clock, at startup and on a fixed
//!   interval.
//! - On change, reset the status engine onto the new partition, then ask the
//!   store to drop the previous one.
//!
//! # Invariants
//! - A transition is applied once; checking again for the same day is a no-op.
//! - Purge failures are logged and never undo or block the local reset.

use crate::calendar::{Calendar, Clock};
use crate::errors::CoreError;
use crate::status::StatusEngine;
use crate::store::EventStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollover {
    Unchanged { day_key: String },
    RolledOver { from: String, to: String, purged: bool },
}

pub struct RolloverController<S> {
    engine: Arc<StatusEngine<S>>,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    calendar: Calendar,
    purge_previous: bool,
}

impl<S: EventStore> RolloverController<S> {
    pub fn new(engine: Arc<StatusEngine<S>>, store: Arc<S>, clock: Arc<dyn Clock>, calendar: Calendar) -> Self {
        Self {
            engine,
            store,
            clock,
            calendar,
            purge_previous: true,
        }
    }

    /// Keep the previous day's partition for reporting instead of purging it.
    pub fn retain_previous(mut self) -> Self {
        self.purge_previous = false;
        self
    }

    pub async fn check_day(&self) -> Result<Rollover, CoreError> {
        let today = self.calendar.day_key(self.clock.now());
        let current = self.engine.current_day_key().await;
        if today == current {
            return Ok(Rollover::Unchanged { day_key: today });
        }

        if !self.engine.advance_day(&current, &today).await? {
            // Another check already moved the view.
            return Ok(Rollover::Unchanged {
                day_key: self.engine.current_day_key().await,
            });
        }
        info!(from = %current, to = %today, "day rolled over; live status reset");

        let mut purged = false;
        if self.purge_previous {
            match self.store.purge_partition(&current).await {
                Ok(removed) => {
                    purged = true;
                    info!(day_key = %current, removed, "purged previous partition");
                }
                Err(err) => warn!(day_key = %current, "failed to purge previous partition: {err}"),
            }
        }

        Ok(Rollover::RolledOver {
            from: current,
            to: today,
            purged,
        })
    }

    /// Checks immediately, then every `period`, until the task is dropped.
    pub async fn run(self, period: Duration) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.check_day().await {
                warn!("day rollover check failed: {err}");
            }
        }
    }
}
