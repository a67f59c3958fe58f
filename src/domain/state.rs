use std::fmt;

/// Progress of one posting through its unit of work.
///
/// ```text
/// Initiated -> Validated -> Debited -> Credited -> Recorded -> Completed
///      \___________\___________\__________\___________\--> Failed
/// ```
///
/// A posting without a debit (or credit) side still passes through the
/// corresponding state so every run walks the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Initiated,
    /// All checks passed under lock; the pending record is being written
    Validated,
    Debited,
    Credited,
    /// Record moved to its final status, not yet committed
    Recorded,
    Completed,
    Failed,
}

impl TransferState {
    pub fn next(self) -> Option<TransferState> {
        match self {
            TransferState::Initiated => Some(TransferState::Validated),
            TransferState::Validated => Some(TransferState::Debited),
            TransferState::Debited => Some(TransferState::Credited),
            TransferState::Credited => Some(TransferState::Recorded),
            TransferState::Recorded => Some(TransferState::Completed),
            TransferState::Completed | TransferState::Failed => None,
        }
    }

    /// Move one step forward. Terminal states do not move.
    pub fn advance(&mut self) -> TransferState {
        if let Some(next) = self.next() {
            *self = next;
        }
        *self
    }

    /// Absorb into `Failed` unless already completed; returns the state left behind.
    pub fn fail(&mut self) -> TransferState {
        let left = *self;
        if *self != TransferState::Completed {
            *self = TransferState::Failed;
        }
        left
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Completed | TransferState::Failed)
    }

    /// True once validation passed, i.e. a pending record may exist.
    pub fn is_past_validation(&self) -> bool {
        matches!(
            self,
            TransferState::Validated
                | TransferState::Debited
                | TransferState::Credited
                | TransferState::Recorded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Initiated => "initiated",
            TransferState::Validated => "validated",
            TransferState::Debited => "debited",
            TransferState::Credited => "credited",
            TransferState::Recorded => "recorded",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
