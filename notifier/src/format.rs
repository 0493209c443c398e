// Message rendering
// Telegram HTML bodies for signals, errors, summaries and the startup banner

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use signal_generation::{AnalystSignal, Direction, HeuristicSignal, ScanSummary, TradeSignal, TradeType};
use std::fmt::Write;

/// Telegram rejects bodies longer than this
pub const MAX_MESSAGE_CHARS: usize = 4096;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Escape the three characters Telegram's HTML parse mode treats as markup.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Cut a body down to Telegram's limit on a character boundary.
pub fn truncate_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    out.push('…');
    out
}

fn marker(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "🟢",
        Direction::Short => "🔴",
    }
}

fn price(value: Decimal) -> String {
    value.normalize().to_string()
}

fn pct(value: Decimal) -> String {
    format!("{:+.1}%", value.round_dp(1))
}

fn write_prices(out: &mut String, signal: &TradeSignal) {
    let _ = writeln!(out, "💰 <b>PRICES</b>");
    let _ = writeln!(out, "Entry: {}", price(signal.entry_price()));
    let _ = writeln!(out, "Stop: {} ({})", price(signal.stop_loss()), pct(signal.risk_pct()));
    let _ = writeln!(out, "Target: {} ({})", price(signal.take_profit()), pct(signal.reward_pct()));
    let _ = writeln!(out, "R/R: 1:{}\n", signal.risk_reward().round_dp(2));
}

fn write_header(out: &mut String, signal: &TradeSignal) {
    let direction = signal.direction();
    let _ = writeln!(
        out,
        "{} <b>{} SIGNAL</b> {}\n",
        marker(direction),
        direction,
        marker(direction)
    );
    let _ = writeln!(out, "💎 <b>{}</b>", escape_html(signal.symbol()));
    let _ = writeln!(out, "⏰ Timeframe: {}", signal.timeframe());
}

pub fn render_signal(signal: &TradeSignal) -> String {
    match signal {
        TradeSignal::Heuristic(inner) => render_heuristic(signal, inner),
        TradeSignal::Analyst(inner) => render_analyst(signal, inner),
    }
}

fn render_heuristic(signal: &TradeSignal, inner: &HeuristicSignal) -> String {
    let mut out = String::new();
    write_header(&mut out, signal);
    let _ = writeln!(out, "📊 Score: {}", inner.score);
    let _ = writeln!(out, "🏗️ Structure: {}\n", inner.structure);
    write_prices(&mut out, signal);

    let _ = writeln!(out, "📈 <b>RSI</b>");
    for (label, value) in [("1h", inner.rsi.h1), ("4h", inner.rsi.h4), ("1d", inner.rsi.d1)] {
        if let Some(rsi) = value {
            let _ = writeln!(out, "{}: {:.1}", label, rsi);
        }
    }

    let _ = writeln!(out, "\n✅ <b>REASONS</b>");
    for reason in &inner.reasons {
        let _ = writeln!(out, "• {}", escape_html(reason));
    }

    let _ = write!(out, "\n⏰ {}", inner.created_at.format(TIMESTAMP_FORMAT));
    out
}

fn trade_type_marker(trade_type: TradeType) -> (&'static str, &'static str) {
    match trade_type {
        TradeType::Scalp => ("⚡", "SCALP"),
        TradeType::Swing => ("📊", "SWING"),
        TradeType::Position => ("🎯", "POSITION"),
    }
}

fn render_analyst(signal: &TradeSignal, inner: &AnalystSignal) -> String {
    let mut out = String::new();
    write_header(&mut out, signal);
    let _ = writeln!(out, "🎯 Confidence: {}/10", inner.confidence);
    if let Some(trade_type) = inner.trade_type {
        let (icon, label) = trade_type_marker(trade_type);
        let _ = writeln!(out, "{} Type: {}", icon, label);
    }
    out.push('\n');
    write_prices(&mut out, signal);

    if let Some(factors) = inner.confluence_factors {
        let (icon, grade) = if factors >= 5 {
            ("⭐", "strong")
        } else if factors >= 3 {
            ("✅", "good")
        } else {
            ("⚠️", "weak")
        };
        let _ = writeln!(out, "{} <b>CONFLUENCE: {}/7</b> ({})\n", icon, factors, grade);
    }

    if let Some(context) = &inner.context {
        let _ = writeln!(out, "🌍 <b>CONTEXT</b>\n{}\n", escape_html(context));
    }

    let _ = writeln!(out, "🧠 <b>ANALYSIS</b>");
    for (i, reason) in inner.reasoning.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, escape_html(reason));
    }

    let _ = write!(out, "\n⏰ {}", inner.created_at.format(TIMESTAMP_FORMAT));

    if inner.confidence < 6 {
        out.push_str("\n\n⚠️ <i>Moderate confidence, consider a smaller position</i>");
    }
    out
}

pub fn render_error(message: &str, now: DateTime<Utc>) -> String {
    format!(
        "❌ <b>SCANNER ERROR</b>\n\n{}\n\n⏰ {}",
        escape_html(message),
        now.format(TIMESTAMP_FORMAT)
    )
}

/// What the startup banner announces
#[derive(Debug, Clone, PartialEq)]
pub struct StartupInfo {
    pub mode: String,
    pub instruments: usize,
    pub interval_minutes: u64,
}

pub fn render_startup(info: &StartupInfo, now: DateTime<Utc>) -> String {
    format!(
        "🤖 <b>SCANNER STARTED</b>\n\n\
         ✅ Mode: {}\n\
         👀 Watching {} instruments\n\
         ⏰ Scan every {} minutes\n\
         🔔 One alert per valid setup\n\n\
         📅 {}",
        escape_html(&info.mode),
        info.instruments,
        info.interval_minutes,
        now.format(TIMESTAMP_FORMAT)
    )
}

fn write_symbol_list(out: &mut String, title: &str, symbols: &[String]) {
    if symbols.is_empty() {
        return;
    }
    let shown: Vec<String> = symbols.iter().take(10).map(|s| escape_html(s)).collect();
    let _ = write!(out, "\n{} ({}): {}", title, symbols.len(), shown.join(", "));
    if symbols.len() > shown.len() {
        let _ = write!(out, ", +{} more", symbols.len() - shown.len());
    }
    out.push('\n');
}

pub fn render_summary(summary: &ScanSummary, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "📊 <b>SCAN SUMMARY</b>\n");
    if let (Some(start), Some(end)) = (summary.started_at, summary.finished_at) {
        let _ = writeln!(
            out,
            "🕐 {} → {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
    }
    let _ = writeln!(out, "🔍 Scans: {} ({} instruments)", summary.scans, summary.instruments);
    let _ = writeln!(out, "📡 Signals detected: {}", summary.detected);
    let _ = writeln!(out, "  • LONG: {}", summary.longs);
    let _ = writeln!(out, "  • SHORT: {}", summary.shorts);
    let _ = writeln!(out, "📨 Sent: {}", summary.emitted);
    let _ = writeln!(out, "🔕 In cooldown: {}", summary.suppressed);
    if summary.invalid > 0 {
        let _ = writeln!(out, "🚫 Failed validation: {}", summary.invalid);
    }
    if summary.delivery_failures > 0 {
        let _ = writeln!(out, "⚠️ Delivery failures: {}", summary.delivery_failures);
    }
    write_symbol_list(&mut out, "⏭️ Skipped", &summary.skipped);
    write_symbol_list(&mut out, "❌ Failed", &summary.failed);
    let _ = write!(out, "\n⏰ {}", now.format(TIMESTAMP_FORMAT));
    out
}
