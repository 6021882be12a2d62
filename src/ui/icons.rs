//! Shared UI icons.
//!
//! Each icon falls back to a plain-text tag on terminals without emoji support.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static PAUSE: Emoji<'_, '_> = Emoji("⏸️  ", "[||]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");

// Stage indicators
pub static REVIEW: Emoji<'_, '_> = Emoji("🔍 ", "[R]");
pub static REFACTOR: Emoji<'_, '_> = Emoji("🛠️  ", "[F]");
pub static EXECUTE: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static DOCUMENT: Emoji<'_, '_> = Emoji("📝 ", "[D]");
pub static INJECT: Emoji<'_, '_> = Emoji("💉 ", "[I]");
