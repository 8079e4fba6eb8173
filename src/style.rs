use std::{
    env,
    fmt::{self, Display},
    io::{self, IsTerminal},
};

use clap::builder::styling::{AnsiColor, Style};

/// Console colors, passed to whatever prints
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn new(enabled: bool) -> Self {
        Palette { enabled }
    }

    pub fn plain() -> Self {
        Palette::new(false)
    }

    /// Colors only when stdout is a terminal and `NO_COLOR` is unset.
    pub fn detect() -> Self {
        Palette::new(io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none())
    }

    fn paint<T: Display>(&self, style: Style, value: T) -> Painted<T> {
        Painted {
            style: self.enabled.then_some(style),
            value,
        }
    }

    pub fn bold_green<T: Display>(&self, value: T) -> Painted<T> {
        self.paint(AnsiColor::Green.on_default().bold(), value)
    }

    pub fn bold_white<T: Display>(&self, value: T) -> Painted<T> {
        self.paint(AnsiColor::White.on_default().bold(), value)
    }

    pub fn bold_yellow<T: Display>(&self, value: T) -> Painted<T> {
        self.paint(AnsiColor::Yellow.on_default().bold(), value)
    }

    pub fn bold_red<T: Display>(&self, value: T) -> Painted<T> {
        self.paint(AnsiColor::Red.on_default().bold(), value)
    }

    pub fn blue<T: Display>(&self, value: T) -> Painted<T> {
        self.paint(AnsiColor::Blue.on_default(), value)
    }

    pub fn green<T: Display>(&self, value: T) -> Painted<T> {
        self.paint(AnsiColor::Green.on_default(), value)
    }

    pub fn yellow<T: Display>(&self, value: T) -> Painted<T> {
        self.paint(AnsiColor::Yellow.on_default(), value)
    }

    pub fn red<T: Display>(&self, value: T) -> Painted<T> {
        self.paint(AnsiColor::Red.on_default(), value)
    }
}

pub struct Painted<T> {
    style: Option<Style>,
    value: T,
}

impl<T: Display> Display for Painted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.style {
            Some(style) => write!(f, "{}{}{}", style.render(), self.value, style.render_reset()),
            None => write!(f, "{}", self.value),
        }
    }
}
