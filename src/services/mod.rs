//! Desktop services: periodic station tasks on tokio and log setup.
//!
//! On the desktop the production cooperative scheduler is replaced by three
//! tokio tasks sharing one [`SharedStation`](crate::SharedStation):
//!
//! | Task | Period | Work |
//! |------|--------|------|
//! | check | `power.check_interval_ms` | over-current check of every output |
//! | refresh | `turnouts.refresh_interval_ms` | drain commands, send one refresh packet |
//! | persist | `turnouts.persist_interval_ms` | write the turnout registry if dirty |
//!
//! A fourth task delivers signal link ready notifications received over a
//! channel (see [`ReadyNotifier`]).
//!
//! ```ignore
//! use std::sync::Arc;
//! use rs_dccstation::services::{init_tracing, spawn_station_tasks};
//!
//! init_tracing("rs_dccstation=info");
//! let shared = Arc::new(SharedStation::new(station));
//! let (tasks, notifier) = spawn_station_tasks(Arc::clone(&shared));
//! // hand `notifier` to the signal generator driver
//! ```

pub mod logging;
pub mod runner;

pub use logging::*;
pub use runner::*;
