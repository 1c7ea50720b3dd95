//! Status badges for stderr output.

use std::io::IsTerminal;

use owo_colors::OwoColorize;

/// Badge types for status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Ok,
    Warn,
    Change,
}

impl Badge {
    pub fn text(&self) -> &'static str {
        match self {
            Self::Ok => "[OK]",
            Self::Warn => "[WARN]",
            Self::Change => "[CHANGE]",
        }
    }

    /// Badge text, colored when `color` is set.
    pub fn render(&self, color: bool) -> String {
        let text = self.text();
        if !color {
            return text.to_string();
        }
        match self {
            Self::Ok => text.green().to_string(),
            Self::Warn => text.yellow().to_string(),
            Self::Change => text.cyan().to_string(),
        }
    }
}

/// Color only for a terminal, and never with `NO_COLOR` set.
pub fn stderr_color() -> bool {
    std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal()
}

pub fn status(badge: Badge, message: &str) {
    eprintln!("{} {}", badge.render(stderr_color()), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_badge_text() {
        assert_eq!(Badge::Ok.text(), "[OK]");
        assert_eq!(Badge::Warn.text(), "[WARN]");
        assert_eq!(Badge::Change.text(), "[CHANGE]");
    }

    #[test]
    fn test_plain_render_has_no_escapes() {
        assert_eq!(Badge::Warn.render(false), "[WARN]");
        assert!(Badge::Warn.render(true).contains("\x1b["));
    }
}
