//! Output styles using owo-colors stylesheet pattern.

use owo_colors::Style;

/// Centralized stylesheet for CLI output colors.
#[derive(Default, Clone)]
pub struct Styles {
    /// Step header lines
    pub header: Style,
    /// Success / completion messages
    pub success: Style,
    /// Warning banners
    pub warning: Style,
    /// Fatal error banners
    pub error: Style,
    /// Verbose/debug text
    pub dim: Style,
}

impl Styles {
    /// Apply colors to the stylesheet.
    pub fn colorize(&mut self) {
        self.header = Style::new().bold().cyan();
        self.success = Style::new().green();
        self.warning = Style::new().yellow();
        self.error = Style::new().red().bold();
        self.dim = Style::new().dimmed();
    }
}
