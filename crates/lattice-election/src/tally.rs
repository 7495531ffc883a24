//! Weighted vote tally and the confirm/win predicates (spec §4.3 "Tally").

use lattice_types::constants::{CONFIRM_WEIGHT_PERCENTAGE, FORK_ELECTION_ROUNDS_THRESHOLD};
use lattice_types::{BlockHash, Timestamp};

use crate::types::Election;
use crate::weight::weight_factor;

/// Outcome of tallying one election at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub first: Option<BlockHash>,
    pub first_weight: u128,
    pub second_weight: u128,
    pub confirm: bool,
    pub win: bool,
}

/// Sums `weight * factor / 100` per candidate over non-conflicting votes,
/// then applies the confirm/win predicates from the spec.
///
/// `online` is the weight of representatives seen recently; `total` is the
/// global representative weight from the ledger's weight cache.
pub fn tally(election: &Election, now: Timestamp, online: u64, total: u64) -> Tally {
    let mut sums: Vec<(BlockHash, u128)> = election
        .candidates
        .keys()
        .map(|hash| (*hash, 0u128))
        .collect();

    let mut voted_weight: u128 = 0;
    for info in election.votes.values() {
        voted_weight += info.weight as u128;
        if info.conflict_found {
            continue;
        }
        let Some(vote) = &info.last_vote else {
            continue;
        };
        let factor = weight_factor(vote.timestamp, now) as u128;
        if let Some(entry) = sums.iter_mut().find(|(hash, _)| *hash == vote.block_hash) {
            entry.1 += info.weight as u128 * factor / 100;
        }
    }

    // Deterministic ordering: weight descending, hash ascending-then-reversed
    // so that on an exact tie the lexicographically larger hash sorts first.
    sums.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));

    let first = sums.first().copied();
    let first_weight = first.map(|(_, w)| w).unwrap_or(0);
    let second_weight = sums.get(1).map(|(_, w)| w).unwrap_or(0);
    let not_voting_weight = (total as u128).saturating_sub(voted_weight);

    let total = total as u128;
    let online = online as u128;
    let pct = CONFIRM_WEIGHT_PERCENTAGE as u128;
    let quorum_threshold = total * pct / 100;

    let confirm = first_weight * 100 > total * pct;
    let majority_online = online * 100 > total * pct && first_weight > second_weight + not_voting_weight;
    let stale_fork_break = voted_weight >= quorum_threshold
        && election.rounds_fork > 2 * FORK_ELECTION_ROUNDS_THRESHOLD
        && first_weight > second_weight;
    let win = confirm || majority_online || stale_fork_break;

    Tally {
        first: first.map(|(hash, _)| hash),
        first_weight,
        second_weight,
        confirm,
        win,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candidate, RepVoteInfo, Vote};
    use lattice_types::{Account, AirdropBlock, Amount, Block, Common, Opcode, Signature512};

    fn block_with(balance: u128) -> Block {
        Block::Airdrop(AirdropBlock {
            common: Common {
                opcode: Opcode::Reward,
                credit: 1,
                counter: 1,
                timestamp: 0,
                height: 0,
                account: Account::ZERO,
                previous: BlockHash::default(),
                balance: Amount(balance),
                link: [0u8; 32],
                signature: Signature512::default(),
            },
        })
    }

    #[test]
    fn lone_candidate_with_supermajority_confirms() {
        let b = block_with(1);
        let hash = b.hash();
        let mut election = Election::new(Account::ZERO, 1, 0);
        election.candidates.insert(
            hash,
            Candidate {
                block: b,
                seen_count: 1,
            },
        );
        election.votes.insert(
            Account([1u8; 32]),
            RepVoteInfo {
                conflict_found: false,
                weight: 100,
                last_vote: Some(Vote {
                    timestamp: 0,
                    signature: Signature512::default(),
                    block_hash: hash,
                }),
            },
        );

        let result = tally(&election, 0, 100, 100);
        assert!(result.confirm);
        assert!(result.win);
        assert_eq!(result.first, Some(hash));
    }

    #[test]
    fn conflicted_vote_does_not_count() {
        let b = block_with(1);
        let hash = b.hash();
        let mut election = Election::new(Account::ZERO, 1, 0);
        election.candidates.insert(
            hash,
            Candidate {
                block: b,
                seen_count: 1,
            },
        );
        election.votes.insert(
            Account([1u8; 32]),
            RepVoteInfo {
                conflict_found: true,
                weight: 100,
                last_vote: Some(Vote {
                    timestamp: 0,
                    signature: Signature512::default(),
                    block_hash: hash,
                }),
            },
        );

        let result = tally(&election, 0, 100, 100);
        assert!(!result.confirm);
        assert_eq!(result.first_weight, 0);
    }
}
