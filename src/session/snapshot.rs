use crate::cache::prefetch::ContentState;
use crate::state::data::{AssetId, Decision, DecisionStats};

use super::navigation::Phase;

/// Everything a presentation layer needs to draw the session.
///
/// Published after every transition. Snapshots are immutable copies, so a
/// reader never observes a half-applied command.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub current_id: Option<AssetId>,
    /// 1-based position among visible items; `None` once completed
    pub position: Option<usize>,
    pub visible_count: usize,
    pub total_count: usize,
    pub current_decision: Decision,
    pub hide_decided: bool,
    pub phase: Phase,
    pub content: ContentState,
    pub stats: DecisionStats,
    /// The last save failed and is waiting for the next attempt
    pub unsaved_changes: bool,
}

impl SessionSnapshot {
    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// "3 / 17", or "Done" once completed
    pub fn position_text(&self) -> String {
        match self.position {
            Some(position) => format!("{} / {}", position, self.visible_count),
            None => "Done".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(position: Option<usize>, phase: Phase) -> SessionSnapshot {
        SessionSnapshot {
            current_id: position.map(|p| format!("p{}", p)),
            position,
            visible_count: 17,
            total_count: 20,
            current_decision: Decision::Unset,
            hide_decided: true,
            phase,
            content: ContentState::Idle,
            stats: DecisionStats::default(),
            unsaved_changes: false,
        }
    }

    #[test]
    fn test_position_text() {
        assert_eq!(snapshot(Some(3), Phase::Browsing).position_text(), "3 / 17");

        let done = snapshot(None, Phase::Completed);
        assert_eq!(done.position_text(), "Done");
        assert!(done.is_completed());
    }
}
