// Notifier
// Telegram delivery and HTML rendering for the scanner

pub mod format;
pub mod telegram;

pub use format::{escape_html, render_error, render_signal, render_startup, render_summary, StartupInfo};
pub use telegram::{TelegramConfig, TelegramNotifier};
