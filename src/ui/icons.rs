//! Shared UI icons.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("\u{2705} ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("\u{274C} ", "[ERR]");
pub static WARN: Emoji<'_, '_> = Emoji("\u{26A0}\u{FE0F}  ", "[WARN]");
pub static RETRY: Emoji<'_, '_> = Emoji("\u{1F504} ", "[RETRY]");
pub static ESCALATE: Emoji<'_, '_> = Emoji("\u{1F6A8} ", "[ESCALATE]");
pub static PHASE: Emoji<'_, '_> = Emoji("\u{25B6}\u{FE0F}  ", "[>]");
pub static CLOCK: Emoji<'_, '_> = Emoji("\u{23F1}\u{FE0F}  ", "[T]");
pub static LOCK: Emoji<'_, '_> = Emoji("\u{1F512} ", "[LOCK]");
pub static LAND: Emoji<'_, '_> = Emoji("\u{1F6EC} ", "[LAND]");
