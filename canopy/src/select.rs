//! Operator leaf selection.
//!
//! Parsing and validation only; the interactive prompt loop lives with
//! the binary so this stays scriptable in tests.

use crate::error::{Result, SelectionError};
use crate::fit::LeafModel;

/// Outcome of one selection reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Chosen leaf ids, duplicates collapsed to first occurrence.
    Leaves(Vec<u32>),
    /// Operator asked to quit.
    Quit,
}

/// Parse a selection reply against the detected leaves.
///
/// Accepts whitespace-separated ids, the keyword `all`, or `q`/`quit`.
/// Unknown ids are rejected all together so the operator sees every
/// offending id at once.
pub fn parse_selection(input: &str, models: &[LeafModel]) -> Result<Selection> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("q") || trimmed.eq_ignore_ascii_case("quit") {
        return Ok(Selection::Quit);
    }
    if trimmed.eq_ignore_ascii_case("all") {
        return Ok(Selection::Leaves(models.iter().map(|m| m.id).collect()));
    }
    if trimmed.is_empty() {
        return Err(SelectionError::Empty.into());
    }

    let mut ids = Vec::new();
    for token in trimmed.split_whitespace() {
        let id: u32 = token
            .parse()
            .map_err(|_| SelectionError::Malformed(token.to_string()))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    let unknown: Vec<u32> =
        ids.iter().copied().filter(|id| models.iter().all(|m| m.id != *id)).collect();
    if !unknown.is_empty() {
        return Err(SelectionError::UnknownIds(unknown).into());
    }

    Ok(Selection::Leaves(ids))
}

/// Render the leaf summary table shown before the prompt.
pub fn format_leaf_table(models: &[LeafModel]) -> String {
    let mut out = String::from("ID | Points | Centroid (x, y, z) | Normal (x, y, z)\n");
    out.push_str(&"-".repeat(70));
    out.push('\n');
    for m in models {
        out.push_str(&format!(
            "{:2} | {:6} | ({:.3}, {:.3}, {:.3}) | ({:.3}, {:.3}, {:.3})\n",
            m.id,
            m.point_count,
            m.centroid.x,
            m.centroid.y,
            m.centroid.z,
            m.normal.x,
            m.normal.y,
            m.normal.z,
        ));
    }
    out
}
