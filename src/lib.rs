#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::float_cmp)]

//! # Hostwatch
//!
//! Terminal-resident multi-host monitoring dashboard with pluggable probes.
//!
//! Hostwatch runs independent probes (ping, HTTP, process checks, UDP
//! heartbeats, SSH commands, a self-healing watchdog) against a set of
//! configured hosts and aggregates the results into a continuously
//! refreshed status view the operator can query and act on.
//!
//! ## Quick Start
//!
//! ```bash
//! # One TOML file per host in the config directory
//! mkdir -p ~/.config/hostwatch
//!
//! # Start the dashboard
//! hostwatch
//!
//! # Validate the configuration without starting anything
//! hostwatch check
//! ```

pub mod app;
pub mod core;
pub mod net;
pub mod probes;
pub mod tui;

pub use app::App;
pub use core::{Aggregator, DashboardSnapshot, Severity, StatusRow};
