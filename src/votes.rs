//! Vote transitions and the per-(subject, user) vote ledger.
//!
//! A user holds at most one vote per subject. Re-sending the polarity already
//! held retracts the vote; sending the opposite polarity flips it in place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{Id, Polarity, SubjectKind, SubjectRef, Tally, Vote, VoteOutcome};

/// What a vote request does to the stored row and the tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTransition {
    /// No prior vote: insert.
    Cast(Polarity),
    /// Same polarity again: delete.
    Retract(Polarity),
    /// Opposite polarity: update in place.
    Flip { from: Polarity, to: Polarity },
    /// Downvote on a subject without a downvote counter.
    Unsupported,
}

impl VoteTransition {
    pub fn between(existing: Option<Polarity>, requested: Polarity, kind: SubjectKind) -> Self {
        if requested == Polarity::Down && !kind.supports_downvotes() {
            return VoteTransition::Unsupported;
        }
        match existing {
            None => VoteTransition::Cast(requested),
            Some(held) if held == requested => VoteTransition::Retract(held),
            Some(held) => VoteTransition::Flip { from: held, to: requested },
        }
    }

    /// Counters after the transition. Decrements stop at zero.
    pub fn apply(self, tally: Tally) -> Tally {
        match self {
            VoteTransition::Cast(p) => bump(tally, p),
            VoteTransition::Retract(p) => drop_one(tally, p),
            VoteTransition::Flip { from, to } => bump(drop_one(tally, from), to),
            VoteTransition::Unsupported => tally,
        }
    }

    /// The voter's polarity once the transition is stored.
    pub fn resulting_polarity(self, existing: Option<Polarity>) -> Option<Polarity> {
        match self {
            VoteTransition::Cast(p) => Some(p),
            VoteTransition::Retract(_) => None,
            VoteTransition::Flip { to, .. } => Some(to),
            VoteTransition::Unsupported => existing,
        }
    }
}

fn bump(mut tally: Tally, p: Polarity) -> Tally {
    match p {
        Polarity::Up => tally.upvotes += 1,
        Polarity::Down => tally.downvotes += 1,
    }
    tally
}

fn drop_one(mut tally: Tally, p: Polarity) -> Tally {
    match p {
        Polarity::Up => tally.upvotes = (tally.upvotes - 1).max(0),
        Polarity::Down => tally.downvotes = (tally.downvotes - 1).max(0),
    }
    tally
}

/// Pure form of a vote: what the voter and the subject look like afterwards.
pub fn apply_vote(tally: Tally, existing: Option<Polarity>, requested: Polarity, kind: SubjectKind) -> VoteOutcome {
    let transition = VoteTransition::between(existing, requested, kind);
    VoteOutcome {
        tally: transition.apply(tally),
        polarity: transition.resulting_polarity(existing),
    }
}

/// Stored votes, one polarity per (subject, user).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Vote>", into = "Vec<Vote>")]
pub struct VoteLedger {
    votes: HashMap<(SubjectRef, Id), Polarity>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn polarity(&self, subject: SubjectRef, user_id: Id) -> Option<Polarity> {
        self.votes.get(&(subject, user_id)).copied()
    }

    /// Record `requested` for `user_id` and move `tally` to match.
    pub fn apply(&mut self, subject: SubjectRef, user_id: Id, requested: Polarity, tally: &mut Tally) -> VoteOutcome {
        let key = (subject, user_id);
        let existing = self.votes.get(&key).copied();
        let transition = VoteTransition::between(existing, requested, subject.kind);
        match transition {
            VoteTransition::Cast(p) | VoteTransition::Flip { to: p, .. } => {
                self.votes.insert(key, p);
            }
            VoteTransition::Retract(_) => {
                self.votes.remove(&key);
            }
            VoteTransition::Unsupported => {}
        }
        *tally = transition.apply(*tally);
        VoteOutcome { tally: *tally, polarity: transition.resulting_polarity(existing) }
    }

    /// Drop every vote on a deleted subject.
    pub fn forget_subject(&mut self, subject: SubjectRef) {
        self.votes.retain(|(s, _), _| *s != subject);
    }

    /// Tally recomputed from the stored votes alone.
    pub fn recount(&self, subject: SubjectRef) -> Tally {
        self.votes
            .iter()
            .filter(|((s, _), _)| *s == subject)
            .fold(Tally::default(), |t, (_, p)| bump(t, *p))
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }
}

impl From<Vec<Vote>> for VoteLedger {
    fn from(rows: Vec<Vote>) -> Self {
        let votes = rows.into_iter().map(|v| ((v.subject, v.user_id), v.polarity)).collect();
        Self { votes }
    }
}

impl From<VoteLedger> for Vec<Vote> {
    fn from(ledger: VoteLedger) -> Self {
        let mut rows: Vec<Vote> = ledger
            .votes
            .into_iter()
            .map(|((subject, user_id), polarity)| Vote { subject, user_id, polarity })
            .collect();
        rows.sort_by_key(|v| (v.subject, v.user_id));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: Id = 1;
    const BOB: Id = 2;

    #[test]
    fn flip_moves_score_by_two() {
        let mut ledger = VoteLedger::new();
        let post = SubjectRef::post(7);
        let mut tally = Tally::new(5, 2);
        assert_eq!(tally.score(), 3);

        let out = ledger.apply(post, ALICE, Polarity::Down, &mut tally);
        assert_eq!(out.tally, Tally::new(5, 3));
        assert_eq!(out.tally.score(), 2);
        assert_eq!(out.polarity, Some(Polarity::Down));

        let out = ledger.apply(post, ALICE, Polarity::Up, &mut tally);
        assert_eq!(out.tally, Tally::new(6, 2));
        assert_eq!(out.tally.score(), 4);
        assert_eq!(out.polarity, Some(Polarity::Up));
    }

    #[test]
    fn same_polarity_twice_retracts() {
        let mut ledger = VoteLedger::new();
        let post = SubjectRef::post(1);
        let mut tally = Tally::new(3, 1);
        ledger.apply(post, ALICE, Polarity::Up, &mut tally);
        let out = ledger.apply(post, ALICE, Polarity::Up, &mut tally);
        assert_eq!(out.tally, Tally::new(3, 1));
        assert_eq!(out.polarity, None);
        assert!(ledger.is_empty());
    }

    #[test]
    fn any_sequence_matches_net_vote() {
        let post = SubjectRef::comment(9);
        let baseline = Tally::new(10, 4);
        let sequences: &[&[Polarity]] = &[
            &[Polarity::Up, Polarity::Up],
            &[Polarity::Down, Polarity::Up, Polarity::Down],
            &[Polarity::Up, Polarity::Down, Polarity::Down, Polarity::Up],
            &[Polarity::Down, Polarity::Down, Polarity::Down],
        ];
        for seq in sequences {
            let mut ledger = VoteLedger::new();
            let mut tally = baseline;
            for p in seq.iter() {
                ledger.apply(post, ALICE, *p, &mut tally);
            }
            // replay only the net vote on a fresh subject
            let mut expected = baseline;
            if let Some(net) = ledger.polarity(post, ALICE) {
                expected = VoteTransition::Cast(net).apply(expected);
            }
            assert_eq!(tally, expected, "sequence {seq:?}");
        }
    }

    #[test]
    fn solution_downvote_is_a_no_op() {
        let mut ledger = VoteLedger::new();
        let sol = SubjectRef::solution(3);
        let mut tally = Tally::new(2, 0);
        let out = ledger.apply(sol, ALICE, Polarity::Down, &mut tally);
        assert_eq!(out.tally, Tally::new(2, 0));
        assert_eq!(out.polarity, None);

        ledger.apply(sol, ALICE, Polarity::Up, &mut tally);
        let out = ledger.apply(sol, ALICE, Polarity::Down, &mut tally);
        assert_eq!(out.polarity, Some(Polarity::Up), "downvote must not disturb the held upvote");
        assert_eq!(out.tally.score(), 3);
    }

    #[test]
    fn voters_are_independent() {
        let mut ledger = VoteLedger::new();
        let post = SubjectRef::post(1);
        let mut tally = Tally::default();
        ledger.apply(post, ALICE, Polarity::Up, &mut tally);
        ledger.apply(post, BOB, Polarity::Down, &mut tally);
        ledger.apply(post, ALICE, Polarity::Up, &mut tally);
        assert_eq!(tally, Tally::new(0, 1));
        assert_eq!(ledger.recount(post), tally);
    }

    #[test]
    fn retract_on_drifted_tally_stays_non_negative() {
        let out = apply_vote(Tally::new(0, 0), Some(Polarity::Up), Polarity::Up, SubjectKind::Post);
        assert_eq!(out.tally, Tally::new(0, 0));
    }

    #[test]
    fn ledger_survives_json_snapshot() {
        let mut ledger = VoteLedger::new();
        let mut tally = Tally::default();
        ledger.apply(SubjectRef::post(1), ALICE, Polarity::Down, &mut tally);
        let json = serde_json::to_string(&ledger).unwrap();
        let back: VoteLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back.polarity(SubjectRef::post(1), ALICE), Some(Polarity::Down));
    }
}
