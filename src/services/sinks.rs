use super::{BadgeSink, Notifier};
use crate::models::*;
use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use std::path::PathBuf;
use tokio::fs;

/// Prints alerts to the terminal and the log
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        log::info!("Notification {}: {}", notification.id, notification.body);
        println!(
            "{} {}",
            format!("🔔 {}", notification.title).bright_yellow().bold(),
            notification.body
        );
        Ok(())
    }
}

/// Renders the badge as a coloured chip and mirrors it to a JSON file
/// that status bars can poll.
pub struct ConsoleBadge {
    mirror_path: Option<PathBuf>,
}

impl ConsoleBadge {
    pub fn new(mirror_path: Option<PathBuf>) -> Self {
        Self { mirror_path }
    }
}

#[async_trait]
impl BadgeSink for ConsoleBadge {
    async fn set_badge(&self, badge: &Badge) -> Result<()> {
        if badge.is_cleared() {
            log::debug!("Badge cleared");
        } else {
            println!("Badge {}", render_chip(badge));
        }

        if let Some(path) = &self.mirror_path {
            fs::write(path, serde_json::to_string_pretty(badge)?).await?;
        }
        Ok(())
    }
}

/// `#RRGGBB` to RGB; `None` for anything else
pub fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some((r, g, b))
}

pub fn render_chip(badge: &Badge) -> String {
    let text = format!(" {} ", badge.text);
    let mut chip = text.bold();
    if let Some((r, g, b)) = parse_hex_color(&badge.text_color) {
        chip = chip.truecolor(r, g, b);
    }
    if let Some((r, g, b)) = parse_hex_color(&badge.background_color) {
        chip = chip.on_truecolor(r, g, b);
    }
    chip.to_string()
}
