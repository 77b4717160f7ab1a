//! Magic database bundled in the crate

use super::ruleset;
use super::MagicTable;

/// Source text of the bundled database.
pub const SOURCE: &str = include_str!("builtin/magic");

lazy_static! {
    /// The bundled database, compiled on first use.
    pub static ref BUILTIN: MagicTable = load();
}

fn load() -> MagicTable {
    match ruleset::compile(SOURCE) {
        Ok((table, errors)) => {
            for e in &errors {
                tracing::warn!("builtin magic, {}", e);
            }
            table
        }
        Err(e) => {
            tracing::warn!("builtin magic not loaded: {}", e);
            MagicTable::default()
        }
    }
}
