/// Keep alphanumerics, spaces, dots, underscores and hyphens, trim, then
/// replace spaces with underscores.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect::<String>()
        .trim()
        .replace(' ', "_")
}

/// Deterministic object name for a record's payload, so a re-run overwrites
/// the object written by an earlier attempt.
pub fn blob_name(record_id: &str, title: Option<&str>, extension: Option<&str>) -> String {
    let title = title
        .map(sanitize)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| record_id.to_string());
    let extension = extension
        .map(sanitize)
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "bin".to_string());

    format!("{record_id}_{title}.{extension}")
}
