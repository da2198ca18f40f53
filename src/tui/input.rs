//! Input handling for the dashboard.
//!
//! Processes keyboard events: host selection, log scrolling and the command
//! input buffer. Commands are plain typed tokens dispatched through the
//! aggregator on Enter.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::core::Aggregator;

/// Lines moved per PgUp/PgDn press.
const LOG_PAGE: usize = 10;

/// Mutable interactive state of the dashboard.
#[derive(Debug, Default)]
pub struct UiState {
    /// Command buffer shown in the footer.
    pub input: String,
    /// Log scroll offset in lines, counted back from the tail. Zero follows
    /// the newest entries.
    pub log_scroll: usize,
    pub should_quit: bool,
}

/// Handle one keyboard event.
pub fn handle_key(key: KeyEvent, state: &mut UiState, aggregator: &Aggregator) {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            state.should_quit = true;
        }

        KeyCode::Up => aggregator.select_delta(-1),
        KeyCode::Down => aggregator.select_delta(1),

        KeyCode::PageUp => state.log_scroll = state.log_scroll.saturating_add(LOG_PAGE),
        KeyCode::PageDown => state.log_scroll = state.log_scroll.saturating_sub(LOG_PAGE),

        KeyCode::Enter => {
            let token = std::mem::take(&mut state.input);
            aggregator.dispatch(&token);
        }
        KeyCode::Backspace => {
            state.input.pop();
        }
        KeyCode::Esc => {
            if state.input.is_empty() {
                state.should_quit = true;
            } else {
                state.input.clear();
            }
        }

        KeyCode::Char(c) if !c.is_control() => state.input.push(c),

        _ => {}
    }
}
