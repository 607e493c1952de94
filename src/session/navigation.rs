use std::collections::HashSet;

use tracing::debug;

use crate::state::data::{AssetId, DecisionLookup, ReviewSequence};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Browsing,
    Completed,
}

/// Tracks where the user is in a review session.
///
/// The position is held by identity, not by index, because the visible
/// sequence (the full sequence minus hidden items) changes every time a
/// decision is made while "hide decided" is on. While browsing, the current
/// item is always visible. Every search scans left to right through the full
/// sequence, so the first match is always the lowest index.
#[derive(Debug, Clone)]
pub struct Navigator {
    sequence: ReviewSequence,
    hide_decided: bool,
    current: Option<AssetId>,
    /// Items known to be gone from the source; never visible again
    retired: HashSet<AssetId>,
}

impl Navigator {
    /// Start on the first undecided item, else the first visible one.
    /// An empty sequence (or nothing visible) starts completed.
    pub fn open(
        sequence: ReviewSequence,
        hide_decided: bool,
        decisions: &impl DecisionLookup,
    ) -> Self {
        let mut navigator = Self {
            sequence,
            hide_decided,
            current: None,
            retired: HashSet::new(),
        };
        navigator.restart(decisions);
        navigator
    }

    /// Re-run the opening rule
    pub fn restart(&mut self, decisions: &impl DecisionLookup) {
        let first_unset = self.find(0..self.sequence.len(), |nav, id| {
            nav.is_live(id) && !decisions.is_decided(id)
        });
        let start = first_unset.or_else(|| {
            self.find(0..self.sequence.len(), |nav, id| nav.is_visible(id, decisions))
        });
        self.current = start;
        debug!(current = ?self.current, "Navigation (re)started");
    }

    // ========== Queries ==========

    pub fn phase(&self) -> Phase {
        if self.current.is_some() {
            Phase::Browsing
        } else {
            Phase::Completed
        }
    }

    pub fn is_completed(&self) -> bool {
        self.current.is_none()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn hide_decided(&self) -> bool {
        self.hide_decided
    }

    pub fn sequence(&self) -> &ReviewSequence {
        &self.sequence
    }

    pub fn is_visible(&self, id: &str, decisions: &impl DecisionLookup) -> bool {
        self.is_live(id) && !(self.hide_decided && decisions.is_decided(id))
    }

    /// The sequence filtered by the current settings
    pub fn visible(&self, decisions: &impl DecisionLookup) -> Vec<AssetId> {
        self.sequence
            .iter()
            .filter(|id| self.is_visible(id, decisions))
            .cloned()
            .collect()
    }

    /// 1-based position of the current item and the number of visible items
    pub fn position(&self, decisions: &impl DecisionLookup) -> (Option<usize>, usize) {
        let visible = self.visible(decisions);
        let index = self
            .current
            .as_ref()
            .and_then(|current| visible.iter().position(|id| id == current));
        (index.map(|i| i + 1), visible.len())
    }

    /// "3 / 17", or "Done" once completed
    pub fn position_text(&self, decisions: &impl DecisionLookup) -> String {
        match self.position(decisions) {
            (Some(position), count) => format!("{} / {}", position, count),
            (None, _) => "Done".to_string(),
        }
    }

    // ========== Transitions ==========

    /// Step to the neighbouring visible item.
    ///
    /// `Next` past the last visible item completes the session; `Previous`
    /// at the first one does nothing. `Previous` from completed returns to
    /// the last visible item.
    pub fn advance(&mut self, direction: Direction, decisions: &impl DecisionLookup) {
        let len = self.sequence.len();
        let Some(index) = self.current_index() else {
            if direction == Direction::Previous {
                self.current = self.rfind(0..len, |nav, id| nav.is_visible(id, decisions));
            }
            return;
        };

        match direction {
            Direction::Next => {
                self.current = self.find(index + 1..len, |nav, id| nav.is_visible(id, decisions));
                if self.current.is_none() {
                    debug!("Reached the end of the visible sequence");
                }
            }
            Direction::Previous => {
                if let Some(previous) = self.rfind(0..index, |nav, id| nav.is_visible(id, decisions)) {
                    self.current = Some(previous);
                }
            }
        }
    }

    /// Move on after `decided` just received a decision.
    ///
    /// With the filter off this is `advance(Next)`. With it on, `decided`
    /// has probably just become hidden, so the search runs over the full
    /// sequence: forward from just after `decided`, then wrapping from the
    /// start up to `decided`. Nothing undecided left completes the session.
    pub fn advance_after_decision(&mut self, decided: &str, decisions: &impl DecisionLookup) {
        if self.is_completed() {
            return;
        }
        if !self.hide_decided {
            self.advance(Direction::Next, decisions);
            return;
        }

        let len = self.sequence.len();
        let Some(index) = self.sequence.index_of(decided).or_else(|| self.current_index()) else {
            self.restart(decisions);
            return;
        };

        let visible = |nav: &Self, id: &str| nav.is_visible(id, decisions);
        self.current = self
            .find(index + 1..len, visible)
            .or_else(|| self.find(0..index, visible));
        if self.current.is_none() {
            debug!("Every item is decided");
        }
    }

    /// Apply a new filter setting.
    ///
    /// If the current item is still visible nothing moves. Otherwise the
    /// nearest visible item wins: forward first, then backward toward the
    /// start. A completed session stays completed.
    pub fn on_filter_toggled(&mut self, hide_decided: bool, decisions: &impl DecisionLookup) {
        self.hide_decided = hide_decided;
        self.reposition_if_hidden(decisions);
    }

    /// Drop items that no longer exist from the session
    pub fn retire<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a AssetId>,
        decisions: &impl DecisionLookup,
    ) {
        for id in ids {
            if self.sequence.contains(id) {
                self.retired.insert(id.clone());
            }
        }
        self.reposition_if_hidden(decisions);
    }

    fn reposition_if_hidden(&mut self, decisions: &impl DecisionLookup) {
        let Some(index) = self.current_index() else {
            return;
        };
        let still_visible = self
            .sequence
            .get(index)
            .is_some_and(|id| self.is_visible(id, decisions));
        if still_visible {
            return;
        }

        let len = self.sequence.len();
        let visible = |nav: &Self, id: &str| nav.is_visible(id, decisions);
        self.current = self
            .find(index + 1..len, visible)
            .or_else(|| self.rfind(0..index, visible));
        debug!(current = ?self.current, "Current item hidden, repositioned");
    }

    // ========== Helpers ==========

    fn is_live(&self, id: &str) -> bool {
        !self.retired.contains(id)
    }

    fn current_index(&self) -> Option<usize> {
        self.current
            .as_deref()
            .and_then(|id| self.sequence.index_of(id))
    }

    fn find(
        &self,
        range: std::ops::Range<usize>,
        matches: impl Fn(&Self, &str) -> bool,
    ) -> Option<AssetId> {
        range
            .filter_map(|i| self.sequence.get(i))
            .find(|id| matches(self, id.as_str()))
            .cloned()
    }

    fn rfind(
        &self,
        range: std::ops::Range<usize>,
        matches: impl Fn(&Self, &str) -> bool,
    ) -> Option<AssetId> {
        range
            .rev()
            .filter_map(|i| self.sequence.get(i))
            .find(|id| matches(self, id.as_str()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::Decision;
    use std::collections::HashMap;

    type Decisions = HashMap<AssetId, Decision>;

    fn seq(ids: &[&str]) -> ReviewSequence {
        ReviewSequence::new(ids.iter().copied())
    }

    fn decide(decisions: &mut Decisions, id: &str, decision: Decision) {
        decisions.insert(id.to_string(), decision);
    }

    #[test]
    fn test_opens_on_first_undecided() {
        let mut decisions = Decisions::new();
        decide(&mut decisions, "a", Decision::Kept);
        decide(&mut decisions, "b", Decision::Deleted);

        let nav = Navigator::open(seq(&["a", "b", "c", "d"]), false, &decisions);
        assert_eq!(nav.current_id(), Some("c"));
        assert_eq!(nav.position_text(&decisions), "3 / 4");
    }

    #[test]
    fn test_opens_on_first_item_when_all_decided() {
        let mut decisions = Decisions::new();
        decide(&mut decisions, "a", Decision::Kept);
        decide(&mut decisions, "b", Decision::Kept);

        let nav = Navigator::open(seq(&["a", "b"]), false, &decisions);
        assert_eq!(nav.current_id(), Some("a"));

        let hidden = Navigator::open(seq(&["a", "b"]), true, &decisions);
        assert!(hidden.is_completed());
        assert_eq!(hidden.position(&decisions), (None, 0));
    }

    #[test]
    fn test_empty_sequence_starts_completed() {
        let decisions = Decisions::new();
        let nav = Navigator::open(seq(&[]), false, &decisions);
        assert_eq!(nav.phase(), Phase::Completed);
        assert_eq!(nav.position_text(&decisions), "Done");
    }

    #[test]
    fn test_advance_and_wrap_edges() {
        let decisions = Decisions::new();
        let mut nav = Navigator::open(seq(&["a", "b", "c"]), false, &decisions);

        nav.advance(Direction::Previous, &decisions);
        assert_eq!(nav.current_id(), Some("a"));

        nav.advance(Direction::Next, &decisions);
        nav.advance(Direction::Next, &decisions);
        assert_eq!(nav.current_id(), Some("c"));

        nav.advance(Direction::Next, &decisions);
        assert!(nav.is_completed());

        nav.advance(Direction::Previous, &decisions);
        assert_eq!(nav.current_id(), Some("c"));
    }

    #[test]
    fn test_advance_skips_hidden_items() {
        let mut decisions = Decisions::new();
        decide(&mut decisions, "b", Decision::Kept);
        let mut nav = Navigator::open(seq(&["a", "b", "c"]), true, &decisions);

        nav.advance(Direction::Next, &decisions);
        assert_eq!(nav.current_id(), Some("c"));
        assert_eq!(nav.position_text(&decisions), "2 / 2");
    }

    #[test]
    fn test_deciding_everything_with_filter_completes() {
        let mut decisions = Decisions::new();
        let mut nav = Navigator::open(seq(&["p1", "p2", "p3", "p4", "p5"]), true, &decisions);
        assert_eq!(nav.current_id(), Some("p1"));

        decide(&mut decisions, "p1", Decision::Kept);
        nav.advance_after_decision("p1", &decisions);
        assert_eq!(nav.current_id(), Some("p2"));

        for id in ["p2", "p3", "p4", "p5"] {
            assert_eq!(nav.current_id(), Some(id));
            decide(&mut decisions, id, Decision::Kept);
            nav.advance_after_decision(id, &decisions);
        }
        assert!(nav.is_completed());
    }

    #[test]
    fn test_advance_after_decision_wraps_to_earlier_undecided() {
        let mut decisions = Decisions::new();
        decide(&mut decisions, "c", Decision::Kept);
        let mut nav = Navigator::open(seq(&["a", "b", "c", "d"]), true, &decisions);

        // Jump to "d" and decide it; "a" and "b" are still open
        nav.advance(Direction::Next, &decisions);
        nav.advance(Direction::Next, &decisions);
        assert_eq!(nav.current_id(), Some("d"));

        decide(&mut decisions, "d", Decision::Deleted);
        nav.advance_after_decision("d", &decisions);
        assert_eq!(nav.current_id(), Some("a"));
    }

    #[test]
    fn test_advance_after_decision_without_filter_moves_next() {
        let mut decisions = Decisions::new();
        let mut nav = Navigator::open(seq(&["a", "b"]), false, &decisions);
        decide(&mut decisions, "a", Decision::Kept);
        nav.advance_after_decision("a", &decisions);
        assert_eq!(nav.current_id(), Some("b"));

        decide(&mut decisions, "b", Decision::Kept);
        nav.advance_after_decision("b", &decisions);
        assert!(nav.is_completed());
    }

    #[test]
    fn test_filter_on_keeps_visible_current() {
        let mut decisions = Decisions::new();
        decide(&mut decisions, "a", Decision::Kept);
        let mut nav = Navigator::open(seq(&["a", "b", "c"]), false, &decisions);
        assert_eq!(nav.current_id(), Some("b"));

        nav.on_filter_toggled(true, &decisions);
        assert_eq!(nav.current_id(), Some("b"));
        assert_eq!(nav.position_text(&decisions), "1 / 2");
    }

    #[test]
    fn test_filter_on_moves_forward_first() {
        let mut decisions = Decisions::new();
        let mut nav = Navigator::open(seq(&["a", "b", "c"]), false, &decisions);
        decide(&mut decisions, "a", Decision::Kept);

        nav.on_filter_toggled(true, &decisions);
        assert_eq!(nav.current_id(), Some("b"));
    }

    #[test]
    fn test_filter_on_falls_back_to_nearest_earlier_item() {
        let mut decisions = Decisions::new();
        for id in ["c", "d", "e"] {
            decide(&mut decisions, id, Decision::Kept);
        }
        let mut nav = Navigator::open(seq(&["a", "b", "c", "d", "e"]), false, &decisions);
        nav.advance(Direction::Next, &decisions);
        nav.advance(Direction::Next, &decisions);
        nav.advance(Direction::Next, &decisions);
        assert_eq!(nav.current_id(), Some("d"));

        nav.on_filter_toggled(true, &decisions);
        assert_eq!(nav.current_id(), Some("b"));
    }

    #[test]
    fn test_filter_on_with_nothing_left_completes() {
        let mut decisions = Decisions::new();
        decide(&mut decisions, "a", Decision::Kept);
        let mut nav = Navigator::open(seq(&["a"]), false, &decisions);

        nav.on_filter_toggled(true, &decisions);
        assert!(nav.is_completed());

        // Completed is sticky across filter changes
        nav.on_filter_toggled(false, &decisions);
        assert!(nav.is_completed());
        nav.restart(&decisions);
        assert_eq!(nav.current_id(), Some("a"));
    }

    #[test]
    fn test_retired_current_moves_on() {
        let decisions = Decisions::new();
        let mut nav = Navigator::open(seq(&["a", "b", "c"]), false, &decisions);
        let gone = vec!["a".to_string(), "zzz".to_string()];

        nav.retire(&gone, &decisions);
        assert_eq!(nav.current_id(), Some("b"));
        assert_eq!(nav.position_text(&decisions), "1 / 2");
        assert!(!nav.visible(&decisions).contains(&"a".to_string()));
    }
}
