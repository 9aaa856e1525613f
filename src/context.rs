use crate::message::ContextSegment;
use crate::text_util::squash_whitespace;

/// Number of segments kept verbatim in prompts.
pub const MAX_VERBATIM_SEGMENTS: usize = 4;
/// Upper bound for the folded summary, in characters.
pub const SUMMARY_CAP: usize = 420;

const BEAT_EXCERPT: usize = 120;

fn excerpt(text: &str, limit: usize) -> String {
    let flat = squash_whitespace(text);
    if flat.chars().count() <= limit {
        return flat;
    }
    let cut: String = flat.chars().take(limit).collect();
    format!("{}…", cut.trim_end())
}

/// One-line digest of a segment used inside the summary.
fn fold_line(segment: &ContextSegment) -> String {
    let beat = excerpt(&segment.text, BEAT_EXCERPT);
    match &segment.option_title {
        Some(choice) if !choice.trim().is_empty() => {
            format!("Арка {}: {} → {}", segment.arc, beat, choice.trim())
        }
        _ => format!("Арка {}: {}", segment.arc, beat),
    }
}

/// Append `segment` to `summary`, keeping the result under [`SUMMARY_CAP`].
pub fn fold_into_summary(summary: &str, segment: &ContextSegment) -> String {
    let line = fold_line(segment);
    let joined = if summary.trim().is_empty() {
        line
    } else {
        format!("{} {}", summary.trim(), line)
    };
    if joined.chars().count() <= SUMMARY_CAP {
        return joined;
    }
    let cut: String = joined.chars().take(SUMMARY_CAP - 1).collect();
    format!("{}…", cut.trim_end())
}

/// Trim `segments` to the newest [`MAX_VERBATIM_SEGMENTS`], folding the rest
/// (oldest first) into the summary.
pub fn condense(
    mut segments: Vec<ContextSegment>,
    summary: Option<String>,
) -> (Vec<ContextSegment>, Option<String>) {
    let mut summary = summary.unwrap_or_default();
    let overflow = segments.len().saturating_sub(MAX_VERBATIM_SEGMENTS);
    for old in segments.drain(..overflow) {
        summary = fold_into_summary(&summary, &old);
    }
    let summary = if summary.trim().is_empty() {
        None
    } else {
        Some(summary)
    };
    (segments, summary)
}

/// Rolling story memory for a session.
///
/// Keeps a sliding window of recent beats while older beats survive only as
/// a compact summary.
#[derive(Debug, Clone, Default)]
pub struct StoryContext {
    segments: Vec<ContextSegment>,
    summary: String,
}

impl StoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, segment: ContextSegment) {
        self.segments.push(segment);
        while self.segments.len() > MAX_VERBATIM_SEGMENTS {
            let old = self.segments.remove(0);
            self.summary = fold_into_summary(&self.summary, &old);
        }
    }

    /// The verbatim window, oldest first.
    pub fn segments(&self) -> &[ContextSegment] {
        &self.segments
    }

    pub fn summary(&self) -> Option<&str> {
        if self.summary.is_empty() {
            None
        } else {
            Some(&self.summary)
        }
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.summary.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(arc: u32, text: &str, choice: Option<&str>) -> ContextSegment {
        ContextSegment {
            text: text.into(),
            arc,
            option_title: choice.map(str::to_string),
            option_description: None,
        }
    }

    #[test]
    fn keeps_four_and_folds_older() {
        let mut ctx = StoryContext::new();
        for arc in 1..=6 {
            ctx.push(seg(arc, &format!("сцена {arc}"), Some("вперёд")));
        }
        assert_eq!(ctx.segments().len(), 4);
        assert_eq!(ctx.segments()[0].arc, 3);
        assert_eq!(
            ctx.summary(),
            Some("Арка 1: сцена 1 → вперёд Арка 2: сцена 2 → вперёд")
        );
    }

    #[test]
    fn summary_is_capped_with_ellipsis() {
        let long = "слово ".repeat(200);
        let mut summary = String::new();
        for arc in 1..=10 {
            summary = fold_into_summary(&summary, &seg(arc, &long, None));
        }
        assert!(summary.chars().count() <= SUMMARY_CAP);
        assert!(summary.ends_with('…'));
        assert!(summary.starts_with("Арка 1:"));
    }

    #[test]
    fn condense_matches_incremental_push() {
        let segments: Vec<_> = (1..=7).map(|a| seg(a, "шаг", None)).collect();
        let mut ctx = StoryContext::new();
        for s in segments.clone() {
            ctx.push(s);
        }
        let (window, summary) = condense(segments, None);
        assert_eq!(window, ctx.segments());
        assert_eq!(summary.as_deref(), ctx.summary());
    }

    #[test]
    fn condense_leaves_short_context_untouched() {
        let (window, summary) = condense(vec![seg(1, "a", None)], Some("  ".into()));
        assert_eq!(window.len(), 1);
        assert!(summary.is_none());
    }
}
