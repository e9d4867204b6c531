pub mod diff_stats;
pub mod framework;
pub mod language;
