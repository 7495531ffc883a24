//! Weighted representative-vote tally and scheduling for contested
//! (account, height) slots (spec §4.3).

pub mod container;
pub mod tally;
pub mod types;
pub mod weight;

pub use container::Elections;
pub use tally::{tally as tally_votes, Tally};
pub use types::{Candidate, Election, RepVoteInfo, Vote};
pub use weight::weight_factor;
