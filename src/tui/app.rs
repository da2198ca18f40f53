//! Dashboard runner.
//!
//! Terminal setup/teardown and the fixed-rate tick/render/input loop. The
//! loop polls key events with the configured refresh interval, ticks every
//! probe and renders a fresh aggregator snapshot each pass, so the frame rate
//! doubles as the event poll timeout.

use std::io::{self, stdout};

use anyhow::Result;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::app::App;
use crate::tui::input::{handle_key, UiState};
use crate::tui::theme::Theme;
use crate::tui::ui::draw;

/// Run the dashboard until the operator quits.
pub fn run_tui(app: &App) -> Result<()> {
    setup_terminal()?;

    let backend = CrosstermBackend::new(stdout());
    let mut terminal = Terminal::new(backend)?;

    let result = run_main_loop(&mut terminal, app);

    restore_terminal()?;
    result
}

/// Setup the terminal for TUI mode.
fn setup_terminal() -> Result<()> {
    enable_raw_mode()?;
    execute!(stdout(), EnterAlternateScreen)?;

    // Restore the terminal on panic; probe worker threads keep their own
    // error handling, this only covers the foreground.
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));

    Ok(())
}

/// Restore the terminal to normal mode.
fn restore_terminal() -> Result<()> {
    disable_raw_mode()?;
    execute!(stdout(), LeaveAlternateScreen)?;
    Ok(())
}

fn run_main_loop(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &App) -> Result<()> {
    let tick_rate = app.refresh_interval();
    let theme = Theme::default();
    let mut state = UiState::default();

    loop {
        let snapshot = app.aggregator().snapshot();
        terminal.draw(|frame| draw(frame, &snapshot, &state, &theme))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                handle_key(key, &mut state, app.aggregator());
            }
        }

        if state.should_quit {
            break;
        }

        app.tick();
    }

    Ok(())
}
