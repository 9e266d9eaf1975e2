use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// Terminal styles used by the CLI
#[derive(Debug, Clone)]
pub struct Theme {
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub warn: Style,
    pub info: Style,
    pub dim: Style,
    /// Type codes in listings
    pub type_code: Style,
    /// Rows that are soft-deleted
    pub inactive: Style,
}

impl Theme {
    /// Colors on a terminal, plain text when piped
    pub fn detect() -> Self {
        if console::Term::stdout().is_term() && console::colors_enabled() {
            Self::colored()
        } else {
            Self::plain()
        }
    }

    pub fn colored() -> Self {
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            warn: Style::new().yellow().bold(),
            info: Style::new().magenta(),
            dim: Style::new().white().dimmed(),
            type_code: Style::new().blue(),
            inactive: Style::new().bright_black().strikethrough(),
        }
    }

    pub fn plain() -> Self {
        let none = Style::new();
        Self {
            header: none,
            success: none,
            error: none,
            warn: none,
            info: none,
            dim: none,
            type_code: none,
            inactive: none,
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}
