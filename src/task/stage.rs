use serde::{Deserialize, Serialize};

/// Position of a Task in its lifecycle state machine (§3, §4.2). Generalises
/// the teacher's `TaskState` tagged enum (`New`/`WaitingForUrl`/`Running`/
/// `Success`/`Failure`) to the full pipeline named in `task_manager.py`'s
/// `TaskStatus`, which this engine's `/leech` flow actually needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    CommandReceived,
    ToolSelectionPending,
    WaitingForDone,
    Downloading,
    Merging,
    Uploading,
    Completed,
    Cancelling,
    Cancelled,
    Failed,
}

pub const CANCELLABLE_STAGES: &[Stage] = &[
    Stage::CommandReceived,
    Stage::ToolSelectionPending,
    Stage::WaitingForDone,
    Stage::Downloading,
    Stage::Merging,
    Stage::Uploading,
];

impl Stage {
    pub fn is_cancellable(self) -> bool {
        CANCELLABLE_STAGES.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Cancelled | Stage::Failed)
    }

    /// Legal next stages from `self`, per §4.2's ordering and the "terminal
    /// states absorb" rule (§8 property 2). `Failed` is reachable from any
    /// non-terminal stage and is checked separately by callers, since it
    /// represents an out-of-band abort rather than a scheduled transition.
    pub fn legal_successors(self) -> &'static [Stage] {
        use Stage::*;
        match self {
            CommandReceived => &[ToolSelectionPending, Cancelling, Failed],
            ToolSelectionPending => &[WaitingForDone, Cancelling, Failed],
            WaitingForDone => &[Downloading, ToolSelectionPending, Cancelling, Failed],
            Downloading => &[Merging, Cancelling, Failed],
            Merging => &[Uploading, Cancelling, Failed],
            Uploading => &[Completed, Cancelling, Failed],
            Cancelling => &[Cancelled],
            Completed | Cancelled | Failed => &[],
        }
    }

    pub fn can_advance_to(self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Stage::Failed || self.legal_successors().contains(&next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_stages_absorb() {
        for terminal in [Stage::Completed, Stage::Cancelled, Stage::Failed] {
            assert!(terminal.is_terminal());
            assert!(terminal.legal_successors().is_empty());
            assert!(!terminal.can_advance_to(Stage::Downloading));
        }
    }

    #[test]
    fn failed_is_reachable_from_any_non_terminal_stage() {
        for stage in [
            Stage::CommandReceived,
            Stage::ToolSelectionPending,
            Stage::WaitingForDone,
            Stage::Downloading,
            Stage::Merging,
            Stage::Uploading,
        ] {
            assert!(stage.can_advance_to(Stage::Failed));
        }
    }

    #[test]
    fn happy_path_is_strictly_monotonic() {
        let path = [
            Stage::CommandReceived,
            Stage::ToolSelectionPending,
            Stage::WaitingForDone,
            Stage::Downloading,
            Stage::Merging,
            Stage::Uploading,
            Stage::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn cancellable_set_matches_spec() {
        assert!(Stage::Downloading.is_cancellable());
        assert!(!Stage::Completed.is_cancellable());
        assert!(!Stage::Cancelled.is_cancellable());
    }
}
