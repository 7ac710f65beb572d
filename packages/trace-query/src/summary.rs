//! Text helpers for structural summaries and trace id listings.

/// Prefix of the line that opens a trace block in a structural summary.
pub const TRACE_HEADER: &str = "Trace ID: ";

/// The block of `trace_id` in a summary: its header line through the line
/// before the next header.
pub fn extract_trace<'a>(content: &'a str, trace_id: &str) -> Option<&'a str> {
    let header = format!("{}{}:", TRACE_HEADER, trace_id);
    let start = content
        .match_indices(&header)
        .map(|(pos, _)| pos)
        .find(|&pos| pos == 0 || content.as_bytes()[pos - 1] == b'\n')?;

    let body = start + header.len();
    let end = content[body..]
        .find(&format!("\n{}", TRACE_HEADER))
        .map_or(content.len(), |offset| body + offset + 1);
    Some(&content[start..end])
}

/// First id of `trace_ids` present in the summary, with its block.
pub fn first_present_trace<'a, 'b>(
    content: &'a str,
    trace_ids: &'b [String],
) -> Option<(&'b str, &'a str)> {
    trace_ids
        .iter()
        .find_map(|id| extract_trace(content, id).map(|block| (id.as_str(), block)))
}

/// Newline-separated trace ids; blank lines are ignored.
pub fn parse_trace_ids(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Span ids of a trace block whose `service:instance` equals `label`.
pub fn span_ids_with_label<'a>(block: &'a str, label: &str) -> Vec<&'a str> {
    block
        .lines()
        .filter(|line| !line.starts_with(TRACE_HEADER))
        .filter_map(|line| {
            let mut fields = line.trim_end_matches('\r').split(':');
            let _parent = fields.next()?;
            let span = fields.next()?;
            let service = fields.next()?;
            let instance = fields.next()?;
            if fields.next().is_some() {
                return None;
            }
            (label.split_once(':') == Some((service, instance))).then_some(span)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUMMARY: &str = "Trace ID: t1:\n\
        :a1:frontend:fe-1\n\
        a1:b2:checkout:co-1\n\
        Trace ID: t2:\n\
        :x1:frontend:fe-1\n\
        x1:x2:cart:ca-1\n\
        x1:x3:cart:ca-1\n";

    #[test]
    fn test_extract_trace_blocks() {
        let t1 = extract_trace(SUMMARY, "t1").unwrap();
        assert!(t1.starts_with("Trace ID: t1:"));
        assert!(t1.contains("checkout"));
        assert!(!t1.contains("t2"));

        let t2 = extract_trace(SUMMARY, "t2").unwrap();
        assert!(t2.ends_with("x1:x3:cart:ca-1\n"));
        assert!(extract_trace(SUMMARY, "t3").is_none());
    }

    #[test]
    fn test_extract_trace_requires_full_id() {
        let summary = "Trace ID: t11:\n:a1:frontend:fe-1\n";
        assert!(extract_trace(summary, "t1").is_none());
        assert!(extract_trace(summary, "t11").is_some());
    }

    #[test]
    fn test_first_present_trace() {
        let ids = vec!["nope".to_string(), "t2".to_string(), "t1".to_string()];
        let (id, block) = first_present_trace(SUMMARY, &ids).unwrap();
        assert_eq!(id, "t2");
        assert!(block.contains("cart"));
        assert!(first_present_trace(SUMMARY, &["zz".to_string()]).is_none());
    }

    #[test]
    fn test_parse_trace_ids() {
        assert_eq!(parse_trace_ids("t1\n\nt2\r\n  \nt3"), vec!["t1", "t2", "t3"]);
        assert!(parse_trace_ids("").is_empty());
    }

    #[test]
    fn test_span_ids_with_label() {
        let t2 = extract_trace(SUMMARY, "t2").unwrap();
        assert_eq!(span_ids_with_label(t2, "cart:ca-1"), vec!["x2", "x3"]);
        assert_eq!(span_ids_with_label(t2, "frontend:fe-1"), vec!["x1"]);
        assert!(span_ids_with_label(t2, "cart:ca-2").is_empty());
    }
}
