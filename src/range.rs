/// Outcome of applying a `Range` header to an object of known size, with
/// the tolerant semantics of the real service: malformed or inverted
/// ranges fall back to the whole content instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeOutcome {
    /// Serve the full content with a 200.
    Whole,
    /// Serve `start..=end` with a 206 and a `Content-Range` header.
    Partial { start: u64, end: u64 },
    /// 416 with an XML `InvalidRange` body.
    Unsatisfiable,
}

/// Parses `header` (the raw `Range` value) against `size`.
///
/// - unit other than `bytes` -> whole content
/// - `bytes=<start>-<end>`, `bytes=<start>-`, `bytes=-<suffix>`
/// - `start >= size` -> unsatisfiable
/// - `end < start` -> whole content
/// - otherwise start/end are clamped into `0..size`
pub fn parse_range(header: &str, size: u64) -> RangeOutcome {
    let header = header.trim();
    let spec = match header.strip_prefix("bytes=") {
        Some(s) => s,
        None => return RangeOutcome::Whole,
    };
    // Multiple ranges are not supported; first one wins.
    let spec = spec.split(',').next().unwrap_or("").trim();

    let (start_s, end_s) = match spec.split_once('-') {
        Some(pair) => pair,
        None => return RangeOutcome::Whole,
    };

    if start_s.is_empty() {
        // Suffix form: last <suffix> bytes.
        let suffix: i64 = match end_s.trim().parse() {
            Ok(n) => n,
            Err(_) => return RangeOutcome::Whole,
        };
        if suffix <= 0 || size == 0 {
            return RangeOutcome::Whole;
        }
        let start = size.saturating_sub(suffix as u64);
        return RangeOutcome::Partial {
            start,
            end: size - 1,
        };
    }

    let start: i64 = match start_s.trim().parse() {
        Ok(n) => n,
        Err(_) => return RangeOutcome::Whole,
    };
    let start = start.max(0) as u64;

    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end_s.trim().is_empty() {
        size - 1
    } else {
        match end_s.trim().parse::<i64>() {
            Ok(n) if n >= 0 => (n as u64).min(size - 1),
            _ => return RangeOutcome::Whole,
        }
    };

    if end < start {
        return RangeOutcome::Whole;
    }

    RangeOutcome::Partial { start, end }
}
