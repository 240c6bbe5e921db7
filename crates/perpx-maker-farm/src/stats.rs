/*
[INPUT]:  Strategy lifecycle notifications (placements, cancels, fills)
[OUTPUT]: Per-symbol farming counters for logs and front-ends
[POS]:    Shared runtime counters between strategy loop and reporting
[UPDATE]: When adding/removing strategy-level counters
*/

/// Counters accumulated over a strategy run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FarmingStats {
    pub orders_placed: u64,
    pub orders_cancelled: u64,
    pub rebalances: u64,
    /// Fills are adverse selection for this strategy, not profit.
    pub fills: u64,
    /// Reducing market orders issued to flatten after a fill.
    pub liquidations: u64,
}
