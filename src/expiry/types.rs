/// Result of arming a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    /// A timer is pending for the id.
    Armed,
    /// The deadline already passed; nothing was scheduled and the caller
    /// must remove the item itself.
    FireNow,
}
