//! Terminal user interface.

mod app;
mod input;
mod theme;
mod ui;

pub use app::run_tui;
pub use input::UiState;
pub use theme::Theme;
