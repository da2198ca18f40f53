//! Color theme for the dashboard.

use ratatui::style::Color;

use crate::core::Severity;

/// Color assignments used by the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Theme {
    /// Header/title accents.
    pub primary: Color,
    /// Main text color.
    pub text: Color,
    /// Dimmed text (log timestamps, hints, footer).
    pub text_dim: Color,
    /// Selected host row background.
    pub selected_bg: Color,
    pub border: Color,
    /// Severity colors.
    pub info: Color,
    pub ok: Color,
    pub warn: Color,
    pub bad: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            primary: Color::Rgb(99, 102, 241),
            text: Color::White,
            text_dim: Color::Rgb(156, 163, 175),
            selected_bg: Color::Rgb(55, 65, 81),
            border: Color::Rgb(75, 85, 99),
            info: Color::Rgb(156, 163, 175),
            ok: Color::Rgb(34, 197, 94),
            warn: Color::Rgb(234, 179, 8),
            bad: Color::Rgb(239, 68, 68),
        }
    }
}

impl Theme {
    /// Color for a severity label.
    pub fn severity(&self, severity: Severity) -> Color {
        match severity {
            Severity::Info => self.info,
            Severity::Ok => self.ok,
            Severity::Warn => self.warn,
            Severity::Bad => self.bad,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severities_map_to_distinct_colors() {
        let theme = Theme::default();
        let colors = [
            theme.severity(Severity::Ok),
            theme.severity(Severity::Warn),
            theme.severity(Severity::Bad),
        ];
        assert_ne!(colors[0], colors[1]);
        assert_ne!(colors[1], colors[2]);
        assert_ne!(colors[0], colors[2]);
    }
}
