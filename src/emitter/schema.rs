//! `schema.sql` rendering.

use super::artifact::MigrationDocument;

pub const PGCRYPTO: &str = "CREATE EXTENSION IF NOT EXISTS pgcrypto;";

/// Shared by every `<table>_touch_updated_at` trigger.
pub const TOUCH_FUNCTION: &str = "CREATE OR REPLACE FUNCTION touch_updated_at() RETURNS trigger AS $$
BEGIN
  NEW.updated_at = now();
  RETURN NEW;
END;
$$ LANGUAGE plpgsql;";

pub const DROP_TOUCH_FUNCTION: &str = "DROP FUNCTION IF EXISTS touch_updated_at();";

pub fn render(migration: Option<&MigrationDocument>) -> String {
    match migration {
        Some(m) if !m.up.is_empty() => format!("{}\n", m.up.join("\n")),
        _ => String::new(),
    }
}
