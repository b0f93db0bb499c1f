//! Terminal output helpers: colors, spinner frames, small formatters.

pub use ralph_core::fmt::{fmt_duration, fmt_tokens};

// 256-color codes for consistent rendering in iTerm2 + tmux.
pub const DIM: &str = "\x1b[90m";
pub const BOLD: &str = "\x1b[1m";
pub const RED: &str = "\x1b[38;5;203m";
pub const GREEN: &str = "\x1b[38;5;114m";
pub const YELLOW: &str = "\x1b[38;5;221m";
pub const BLUE: &str = "\x1b[38;5;75m";
pub const CYAN: &str = "\x1b[38;5;81m";
pub const WHITE: &str = "\x1b[38;5;255m";
pub const RESET: &str = "\x1b[0m";
pub const CLEAR_LINE: &str = "\x1b[2K\r";

pub const SPINNER_FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
pub const PANEL_WIDTH: usize = 70;

/// Timestamped log line.
pub fn log(msg: &str) {
    let ts = chrono::Local::now().format("%H:%M:%S");
    println!("  {DIM}{ts}{RESET}  {msg}");
}

/// Timestamped dim line for streamed child text.
pub fn box_line(text: &str) -> String {
    let ts = chrono::Local::now().format("%H:%M:%S");
    format!("  {DIM}{ts}  {text}{RESET}")
}

/// `claude-sonnet-4` renders as `sonnet-4` in the usage table.
pub fn short_model(model: &str) -> String {
    model.replace("claude-", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_model_strips_prefix() {
        assert_eq!(short_model("claude-sonnet-4"), "sonnet-4");
        assert_eq!(short_model("gpt-x"), "gpt-x");
    }

    #[test]
    fn box_line_is_dim_and_stamped() {
        let line = box_line("hello");
        assert!(line.starts_with(&format!("  {DIM}")));
        assert!(line.ends_with(&format!("hello{RESET}")));
    }
}
