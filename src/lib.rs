pub mod app;
pub mod calendar;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod report;
pub mod rollover;
pub mod roster;
pub mod state;
pub mod status;
pub mod storage;
pub mod store;

pub use app::router;
pub use config::Config;
pub use state::AppState;
pub use storage::{StateFile, load_data};
