//! Slash-delimited locator helpers shared by the host, runtimes and doozers.

/// Joins segments with `/`, trimming separators at each seam.
///
/// Empty segments are skipped; the leading separator of the first segment and
/// the trailing separator of the last one are kept.
pub fn combine<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for segment in segments {
        let segment = segment.as_ref();
        if segment.is_empty() {
            continue;
        }
        if out.is_empty() {
            out.push_str(segment);
            continue;
        }
        let trimmed_out = out.trim_end_matches(['/', '\\']).len();
        out.truncate(trimmed_out);
        out.push('/');
        out.push_str(segment.trim_start_matches(['/', '\\']));
    }
    out
}

/// Everything before the last `/` or `\`; empty when there is none.
pub fn parent(path: &str) -> &str {
    path.rfind(['/', '\\']).map(|i| &path[..i]).unwrap_or("")
}

/// Non-empty `/`-separated segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
