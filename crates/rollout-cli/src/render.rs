use std::io::IsTerminal;
use std::time::Duration;

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use rollout_engine::Tone;

const LOG_LINE_WIDTH: usize = 120;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

/// Resolved once at startup and injected into the flow layer; the only
/// process-wide piece of render state.
pub fn current_output_style() -> OutputStyle {
    if std::env::var_os("NO_COLOR").is_some() {
        return OutputStyle::Plain;
    }
    if std::io::stdout().is_terminal() {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

fn tone_style(tone: Tone) -> Option<Style> {
    match tone {
        Tone::Normal => None,
        Tone::Stage => Some(Style::new().fg_color(Some(AnsiColor::Green.into()))),
        Tone::Warning => Some(Style::new().fg_color(Some(AnsiColor::Yellow.into()))),
        Tone::Error => Some(
            Style::new()
                .fg_color(Some(AnsiColor::Red.into()))
                .effects(Effects::BOLD),
        ),
        Tone::Notice => Some(Style::new().fg_color(Some(AnsiColor::Cyan.into()))),
    }
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

/// Elide from the left so the file name at the end of a long path stays
/// visible in the log.
pub fn elide_left(message: &str, max_chars: usize) -> String {
    let count = message.chars().count();
    if count <= max_chars {
        return message.to_string();
    }
    let tail: String = message
        .chars()
        .skip(count - max_chars.saturating_sub(1))
        .collect();
    format!("\u{2026}{tail}")
}

pub fn render_log_line(style: OutputStyle, tone: Tone, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let elided = elide_left(message, LOG_LINE_WIDTH);
            match tone_style(tone) {
                Some(color) => colorize(color, &elided),
                None => elided,
            }
        }
    }
}

pub fn render_progress_line(style: OutputStyle, description: &str, ok: bool) -> String {
    let suffix = if ok { "OK" } else { "ERROR" };
    let line = format!("{description}    {suffix}");
    match style {
        OutputStyle::Plain => line,
        OutputStyle::Rich if ok => elide_left(&line, LOG_LINE_WIDTH),
        OutputStyle::Rich => colorize(
            Style::new().fg_color(Some(AnsiColor::Red.into())),
            &elide_left(&line, LOG_LINE_WIDTH),
        ),
    }
}

/// The progress screen's log pane: colored lines that coexist with an
/// optional indicatif bar.
pub struct LogPane {
    style: OutputStyle,
    bar: Option<ProgressBar>,
}

impl LogPane {
    pub fn new(style: OutputStyle) -> Self {
        Self { style, bar: None }
    }

    pub fn line(&self, tone: Tone, message: &str) {
        let rendered = render_log_line(self.style, tone, message);
        match &self.bar {
            Some(bar) => bar.println(rendered),
            None => println!("{rendered}"),
        }
    }

    pub fn file_outcome(&self, description: &str, ok: bool) {
        let rendered = render_progress_line(self.style, description, ok);
        match &self.bar {
            Some(bar) => {
                bar.println(rendered);
                bar.inc(1);
            }
            None => println!("{rendered}"),
        }
    }

    pub fn begin_steps(&mut self, total: u64) {
        if self.style != OutputStyle::Rich {
            return;
        }
        let bar = ProgressBar::new(total.max(1));
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan.bold} [{bar:24.cyan/blue}] {pos:>4}/{len:4} {elapsed_precise}",
        ) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        self.bar = Some(bar);
    }

    pub fn download_progress(&mut self, received: u64, total: Option<u64>) {
        if self.style != OutputStyle::Rich {
            return;
        }
        let bar = self.bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total.unwrap_or(0).max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} downloading [{bar:24.cyan/blue}] {bytes}/{total_bytes}",
            ) {
                bar.set_style(style.progress_chars("=>-"));
            }
            bar
        });
        if let Some(total) = total {
            bar.set_length(total.max(1));
            bar.set_position(received.min(total));
        } else {
            bar.set_position(received);
        }
    }

    /// Downloads and file steps use different bars; drop the current one
    /// before the next phase starts.
    pub fn reset_bar(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
