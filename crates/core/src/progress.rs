// crates/core/src/progress.rs
//! Best-effort progress extraction from analysis-tool stdout.
//!
//! One line in, at most one normalized update out. Strictly a UI signal:
//! the authoritative job outcome is always {exit code, collected files},
//! never a parsed log line.

use serde::{Deserialize, Serialize};

/// The fixed six-phase documentation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extract,
    Analyze,
    Order,
    Generate,
    Review,
    Finalize,
}

impl Phase {
    pub const COUNT: u32 = 6;

    /// 1-based position in the pipeline.
    pub fn number(self) -> u32 {
        match self {
            Phase::Extract => 1,
            Phase::Analyze => 2,
            Phase::Order => 3,
            Phase::Generate => 4,
            Phase::Review => 5,
            Phase::Finalize => 6,
        }
    }

    pub fn from_number(n: u32) -> Option<Phase> {
        match n {
            1 => Some(Phase::Extract),
            2 => Some(Phase::Analyze),
            3 => Some(Phase::Order),
            4 => Some(Phase::Generate),
            5 => Some(Phase::Review),
            6 => Some(Phase::Finalize),
            _ => None,
        }
    }

    /// Map free text onto a phase by keyword. Longest-pipeline-first is not
    /// needed; the stems are disjoint.
    pub fn from_keyword(text: &str) -> Option<Phase> {
        let lower = text.to_lowercase();
        if lower.contains("extract") || lower.contains("abstraction") {
            Some(Phase::Extract)
        } else if lower.contains("analyz") || lower.contains("relationship") {
            Some(Phase::Analyze)
        } else if lower.contains("order") || lower.contains("sequenc") {
            Some(Phase::Order)
        } else if lower.contains("generat") || lower.contains("writing chapter") {
            Some(Phase::Generate)
        } else if lower.contains("review") {
            Some(Phase::Review)
        } else if lower.contains("finaliz") || lower.contains("combin") {
            Some(Phase::Finalize)
        } else {
            None
        }
    }
}

/// A normalized progress event forwarded to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub message: String,
    pub phase: Option<Phase>,
    pub step: Option<u32>,
    pub total: Option<u32>,
}

impl ProgressUpdate {
    fn with_phase(message: String, phase: Option<Phase>) -> Self {
        Self {
            message,
            phase,
            step: phase.map(Phase::number),
            total: phase.map(|_| Phase::COUNT),
        }
    }
}

/// Parse one stdout line. Rules in priority order, first match wins:
/// 1. structured single-line JSON with a `msg`/`message` field
/// 2. bracketed tags (`[review] polishing chapter 2`)
/// 3. numeric step headers (`Step 3:` / `3/6 ...`)
/// 4. free-text phase keywords
///
/// Unmatched lines yield `None`: dropped silently, never an error.
pub fn parse_line(line: &str) -> Option<ProgressUpdate> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(update) = parse_json_record(trimmed) {
        return Some(update);
    }
    if let Some(update) = parse_bracket_tag(trimmed) {
        return Some(update);
    }
    if let Some(update) = parse_step_header(trimmed) {
        return Some(update);
    }
    Phase::from_keyword(trimmed)
        .map(|phase| ProgressUpdate::with_phase(trimmed.to_string(), Some(phase)))
}

/// Rule 1: a whole-line JSON object carrying a message field.
fn parse_json_record(line: &str) -> Option<ProgressUpdate> {
    if !line.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let message = value
        .get("msg")
        .or_else(|| value.get("message"))
        .and_then(|v| v.as_str())?
        .to_string();
    let phase = Phase::from_keyword(&message);
    Some(ProgressUpdate::with_phase(message, phase))
}

/// Rule 2: a leading `[tag]`. The tag itself may name a phase.
fn parse_bracket_tag(line: &str) -> Option<ProgressUpdate> {
    let rest = line.strip_prefix('[')?;
    let close = rest.find(']')?;
    let tag = &rest[..close];
    if tag.is_empty() || tag.len() > 32 {
        return None;
    }
    let body = rest[close + 1..].trim();
    let message = if body.is_empty() {
        tag.to_string()
    } else {
        body.to_string()
    };
    let phase = Phase::from_keyword(tag).or_else(|| Phase::from_keyword(&message));
    Some(ProgressUpdate::with_phase(message, phase))
}

/// Rule 3: `Step N` / `Step N:` / `N/Total`.
fn parse_step_header(line: &str) -> Option<ProgressUpdate> {
    if let Some(rest) = line.strip_prefix("Step ").or_else(|| line.strip_prefix("step ")) {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        let step: u32 = digits.parse().ok()?;
        let phase = Phase::from_number(step);
        return Some(ProgressUpdate {
            message: line.to_string(),
            phase,
            step: Some(step),
            total: Some(Phase::COUNT),
        });
    }

    // "3/6 Ordering chapters" — digits, slash, digits, then whitespace or end.
    let slash = line.find('/')?;
    let (lhs, rhs) = line.split_at(slash);
    let rhs = &rhs[1..];
    if lhs.is_empty() || !lhs.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let digits: String = rhs.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    match rhs.as_bytes().get(digits.len()) {
        None | Some(b' ') | Some(b':') | Some(b'\t') => {}
        _ => return None,
    }
    let step: u32 = lhs.parse().ok()?;
    let total: u32 = digits.parse().ok()?;
    Some(ProgressUpdate {
        message: line.to_string(),
        phase: if total == Phase::COUNT {
            Phase::from_number(step)
        } else {
            None
        },
        step: Some(step),
        total: Some(total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_record_with_msg_field() {
        let update = parse_line(r#"{"msg":"Extracting core abstractions"}"#).unwrap();
        assert_eq!(update.message, "Extracting core abstractions");
        assert_eq!(update.phase, Some(Phase::Extract));
        assert_eq!(update.step, Some(1));
        assert_eq!(update.total, Some(6));
    }

    #[test]
    fn test_json_record_message_field() {
        let update = parse_line(r#"{"level":"info","message":"Reviewing chapter 4"}"#).unwrap();
        assert_eq!(update.phase, Some(Phase::Review));
    }

    #[test]
    fn test_json_without_message_field_is_dropped() {
        assert_eq!(parse_line(r#"{"level":"debug","elapsed_ms":42}"#), None);
    }

    #[test]
    fn test_malformed_json_falls_through_to_keywords() {
        // Not valid JSON, but contains a phase keyword.
        let update = parse_line(r#"{broken json but analyzing anyway"#).unwrap();
        assert_eq!(update.phase, Some(Phase::Analyze));
    }

    #[test]
    fn test_bracket_tag_names_phase() {
        let update = parse_line("[review] polishing chapter 2").unwrap();
        assert_eq!(update.message, "polishing chapter 2");
        assert_eq!(update.phase, Some(Phase::Review));
        assert_eq!(update.step, Some(5));
    }

    #[test]
    fn test_bracket_tag_unknown_phase_still_progress() {
        let update = parse_line("[docwright] warming caches").unwrap();
        assert_eq!(update.message, "warming caches");
        assert_eq!(update.phase, None);
        assert_eq!(update.step, None);
    }

    #[test]
    fn test_step_header() {
        let update = parse_line("Step 3: ordering chapters").unwrap();
        assert_eq!(update.step, Some(3));
        assert_eq!(update.total, Some(6));
        assert_eq!(update.phase, Some(Phase::Order));
    }

    #[test]
    fn test_step_slash_total() {
        let update = parse_line("4/6 generating chapters").unwrap();
        assert_eq!(update.step, Some(4));
        assert_eq!(update.total, Some(6));
        assert_eq!(update.phase, Some(Phase::Generate));
    }

    #[test]
    fn test_step_slash_non_pipeline_total() {
        let update = parse_line("7/10 embedding files").unwrap();
        assert_eq!(update.step, Some(7));
        assert_eq!(update.total, Some(10));
        assert_eq!(update.phase, None);
    }

    #[test]
    fn test_path_with_slash_is_not_a_step() {
        // "src/main.rs" has a slash but no leading digits.
        assert_eq!(parse_line("compiling src/main.rs"), None);
    }

    #[test]
    fn test_keyword_fallback() {
        let update = parse_line("Finalizing tutorial output").unwrap();
        assert_eq!(update.phase, Some(Phase::Finalize));
        assert_eq!(update.step, Some(6));
    }

    #[test]
    fn test_unrecognized_line_yields_none() {
        assert_eq!(parse_line("warning: unused variable `x`"), None);
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
    }

    #[test]
    fn test_json_rule_wins_over_step_rule() {
        // The message mentions "Step 2" but rule 1 fires first and the
        // phase comes from the message keywords, not the step header.
        let update = parse_line(r#"{"msg":"Step 2 skipped, analyzing directly"}"#).unwrap();
        assert_eq!(update.message, "Step 2 skipped, analyzing directly");
        assert_eq!(update.phase, Some(Phase::Analyze));
    }

    #[test]
    fn test_phase_numbering_is_dense() {
        for n in 1..=Phase::COUNT {
            assert_eq!(Phase::from_number(n).unwrap().number(), n);
        }
        assert_eq!(Phase::from_number(0), None);
        assert_eq!(Phase::from_number(7), None);
    }
}
