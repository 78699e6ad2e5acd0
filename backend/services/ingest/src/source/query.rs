use chrono::{DateTime, Utc};

use docsync_common::timestamp::to_source_literal;

/// Build the incremental query for one object.
///
/// Generates: `SELECT Id, SystemModstamp FROM Obj WHERE SystemModstamp > 2024-01-01T00:00:00.000Z ORDER BY SystemModstamp ASC`
///
/// The bound is exclusive and ordering is ascending, so the last record seen
/// in any prefix of the result is a valid resume point.
pub fn build_incremental_query(object: &str, fields: &[&str], resume_after: DateTime<Utc>) -> String {
    format!(
        "SELECT {} FROM {object} WHERE SystemModstamp > {} ORDER BY SystemModstamp ASC",
        fields.join(", "),
        to_source_literal(resume_after)
    )
}
