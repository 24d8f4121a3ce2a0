use crate::calendar::{Calendar, Clock};
use crate::rollover::RolloverController;
use crate::roster::Roster;
use crate::status::StatusEngine;
use crate::storage::StateFile;
use crate::store::LocalStore;
use std::sync::Arc;

/// Everything a request handler needs, wired once at startup.
#[derive(Clone)]
pub struct AppState {
    pub calendar: Calendar,
    pub clock: Arc<dyn Clock>,
    pub roster: Roster,
    pub store: Arc<LocalStore>,
    pub engine: Arc<StatusEngine<LocalStore>>,
}

impl AppState {
    pub async fn new(file: StateFile, clock: Arc<dyn Clock>, calendar: Calendar) -> Self {
        let store = Arc::new(LocalStore::new(file.clone()).await);
        let roster = Roster::new(file.clone());
        let engine = Arc::new(
            StatusEngine::new(Arc::clone(&store), Arc::clone(&clock), calendar)
                .with_status_file(file)
                .with_roster(roster.clone()),
        );
        Self {
            calendar,
            clock,
            roster,
            store,
            engine,
        }
    }

    pub fn rollover(&self, purge_previous: bool) -> RolloverController<LocalStore> {
        let controller = RolloverController::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.calendar,
        );
        if purge_previous {
            controller
        } else {
            controller.retain_previous()
        }
    }
}
