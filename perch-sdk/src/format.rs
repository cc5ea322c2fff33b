//! mIRC text formatting control codes.

pub const BOLD: char = '\x02';
pub const COLOR: char = '\x03';
pub const ITALIC: char = '\x1d';
pub const UNDERLINE: char = '\x1f';
pub const REVERSE: char = '\x16';
pub const RESET: char = '\x0f';

/// The 16 standard mIRC colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White = 0,
    Black = 1,
    Blue = 2,
    Green = 3,
    Red = 4,
    Brown = 5,
    Purple = 6,
    Orange = 7,
    Yellow = 8,
    LightGreen = 9,
    Cyan = 10,
    LightCyan = 11,
    LightBlue = 12,
    Pink = 13,
    Grey = 14,
    LightGrey = 15,
}

impl Color {
    pub fn code(self) -> u8 {
        self as u8
    }
}

pub fn bold(text: &str) -> String {
    format!("{BOLD}{text}{BOLD}")
}

pub fn color(text: &str, fg: Color) -> String {
    format!("{COLOR}{:02}{text}{COLOR}", fg.code())
}

/// Render a percentage with two decimals, green when positive and red
/// otherwise (zero counts as red).
pub fn colorize_percentage(percentage: f64) -> String {
    let fg = if percentage > 0.0 {
        Color::LightGreen
    } else {
        Color::Red
    };
    color(&format!("{percentage:.2}%"), fg)
}

/// Remove every formatting code, including color arguments (`\x03FF,BB`).
pub fn strip(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            BOLD | ITALIC | UNDERLINE | REVERSE | RESET => {}
            COLOR => {
                take_digits(&mut chars);
                if chars.peek() == Some(&',') {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                        chars.next();
                        take_digits(&mut chars);
                    }
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    for _ in 0..2 {
        if chars.peek().is_some_and(|d| d.is_ascii_digit()) {
            chars.next();
        } else {
            break;
        }
    }
}
