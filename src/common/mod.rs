//! Crate-wide type aliases shared by the simulation core.

/// Identifier of a simulated transaction, assigned from the script's
/// own `T<i>` numbering (not regenerated by the simulator).
pub type TransactionId = u64;

/// Identifier of a variable `x_i`, `i` taken directly from the script.
pub type VariableId = u64;

/// Identifier of a site, `1..=NUM_SITES`.
pub type SiteId = u64;

/// Logical clock tick. Advances by exactly one per input operation.
pub type Tick = u64;

/// Number of variables in the data model (`x_1..x_20`).
pub const NUM_VARIABLES: u64 = 20;

/// Number of sites (`1..=10`).
pub const NUM_SITES: u64 = 10;
