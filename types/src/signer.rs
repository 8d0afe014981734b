//! The ranked-signer state machine. A set of replicas shares one validator
//! identity; only the replica at rank 1 signs. Backups count blocks that were
//! committed without the validator's signature and move up one rank once the
//! configured threshold of consecutive misses is reached.

use thiserror::Error;
use tracing::{debug, info};

use crate::gauge::Gauges;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignerError {
    /// The threshold of too many blocks missed in a row was exceeded.
    #[error("threshold exceeded due to too many blocks missed in a row")]
    ThresholdExceeded,

    /// Rank 1 cannot be promoted any further and must be shut down instead.
    #[error("node cannot be promoted anymore, so it must be shut down")]
    MustShutdown,

    /// The miss counter has not been unlocked yet: no commit carrying the
    /// validator's signature has been observed since startup.
    #[error("waiting for first commit signature from the validator to unlock the miss counter")]
    CounterLocked,
}

/// Mutable signing-permission state of one replica.
///
/// The counter starts out locked: until a commit carrying the shared
/// validator address has been seen on-chain, a backup cannot tell "rank 1 is
/// failing" apart from "I have not synced yet", so misses must not count.
pub struct RankedSigner {
    rank: u32,
    missed_in_a_row: u32,
    threshold: u32,
    set_size: u32,
    current_height: i64,
    last_height: i64,
    counter_locked: bool,
    gauges: Gauges,
}

impl RankedSigner {
    pub fn new(threshold: u32, set_size: u32, rank: u32, gauges: Gauges) -> Self {
        gauges.rank.set(i64::from(rank));
        gauges.missed_blocks_in_a_row.set(0);

        Self {
            rank,
            missed_in_a_row: 0,
            threshold,
            set_size,
            current_height: 1,
            last_height: 1,
            counter_locked: true,
            gauges,
        }
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn missed_in_a_row(&self) -> u32 {
        self.missed_in_a_row
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn set_size(&self) -> u32 {
        self.set_size
    }

    pub fn current_height(&self) -> i64 {
        self.current_height
    }

    pub fn last_height(&self) -> i64 {
        self.last_height
    }

    pub fn counter_locked(&self) -> bool {
        self.counter_locked
    }

    pub fn set_current_height(&mut self, height: i64) {
        self.current_height = height;
    }

    pub fn set_last_height(&mut self, height: i64) {
        self.last_height = height;
    }

    /// Unlocks the miss counter. Idempotent; only the first transition is
    /// worth a log line.
    pub fn unlock_counter(&mut self) {
        if self.counter_locked {
            info!("Found first commit signature from the validator, start counting missed blocks");
            self.counter_locked = false;
        }
    }

    /// Re-locks the miss counter. Called when the link to the validator is
    /// lost: blocks produced while disconnected must not count as misses.
    pub fn lock_counter(&mut self) {
        self.counter_locked = true;
    }

    /// Resets the counter for missed blocks in a row.
    pub fn reset(&mut self) {
        if self.missed_in_a_row > 0 {
            debug!("Reset counter for missed blocks in a row");
            self.missed_in_a_row = 0;
            self.gauges.missed_blocks_in_a_row.set(0);
        }
    }

    /// Records one block committed without the validator's signature.
    ///
    /// Returns `CounterLocked` (and mutates nothing) while the counter is
    /// locked, `ThresholdExceeded` after a successful promotion, and
    /// `MustShutdown` if the replica is already rank 1 and cannot rotate.
    pub fn missed(&mut self) -> Result<(), SignerError> {
        if self.counter_locked {
            return Err(SignerError::CounterLocked);
        }

        self.missed_in_a_row += 1;
        self.gauges
            .missed_blocks_in_a_row
            .set(i64::from(self.missed_in_a_row));

        if self.missed_in_a_row < self.threshold {
            info!(
                missed = self.missed_in_a_row,
                threshold = self.threshold,
                "Missed a block"
            );
            return Ok(());
        }

        info!(
            missed = self.missed_in_a_row,
            threshold = self.threshold,
            "Missed too many blocks in a row"
        );
        self.promote()?;

        // The next block carries the commit of the block that was just
        // missed, so it cannot contain the validator's signature. Skip it to
        // keep the fresh counter unbiased.
        self.current_height += 1;
        Err(SignerError::ThresholdExceeded)
    }

    /// Moves the replica up one rank. Rank 1 is never rotated to the tail:
    /// a signer that exhausted its threshold stops instead, because demoting
    /// it while other replicas are still behind the counter lock could leave
    /// two replicas believing they hold rank 1.
    fn promote(&mut self) -> Result<(), SignerError> {
        if self.rank == 1 {
            return Err(SignerError::MustShutdown);
        }

        info!(from = self.rank, to = self.rank - 1, "Promoting validator");
        self.rank -= 1;
        self.gauges.rank.set(i64::from(self.rank));
        self.reset();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(threshold: u32, set_size: u32, rank: u32) -> RankedSigner {
        RankedSigner::new(threshold, set_size, rank, Gauges::new().unwrap())
    }

    #[test]
    fn counter_starts_locked_and_missed_does_not_mutate() {
        let mut s = signer(3, 2, 2);

        for _ in 0..10 {
            assert_eq!(s.missed(), Err(SignerError::CounterLocked));
        }
        assert_eq!(s.missed_in_a_row(), 0);
        assert_eq!(s.rank(), 2);
        assert_eq!(s.current_height(), 1);
    }

    #[test]
    fn unlock_is_idempotent() {
        let mut s = signer(3, 2, 2);
        s.unlock_counter();
        s.unlock_counter();
        assert!(!s.counter_locked());

        s.lock_counter();
        assert!(s.counter_locked());
        assert_eq!(s.missed(), Err(SignerError::CounterLocked));
    }

    #[test]
    fn misses_below_threshold_accumulate() {
        let mut s = signer(3, 2, 2);
        s.unlock_counter();

        assert_eq!(s.missed(), Ok(()));
        assert_eq!(s.missed(), Ok(()));
        assert_eq!(s.missed_in_a_row(), 2);
        assert_eq!(s.rank(), 2);
    }

    #[test]
    fn threshold_promotes_backup_and_skips_one_height() {
        let mut s = signer(2, 2, 2);
        s.unlock_counter();
        s.set_current_height(10);

        assert_eq!(s.missed(), Ok(()));
        assert_eq!(s.missed(), Err(SignerError::ThresholdExceeded));

        assert_eq!(s.rank(), 1);
        assert_eq!(s.missed_in_a_row(), 0);
        assert_eq!(s.current_height(), 11);
    }

    #[test]
    fn threshold_at_rank_one_demands_shutdown() {
        let mut s = signer(2, 2, 1);
        s.unlock_counter();
        s.set_current_height(10);

        assert_eq!(s.missed(), Ok(()));
        assert_eq!(s.missed(), Err(SignerError::MustShutdown));

        // No promotion, no skip-ahead.
        assert_eq!(s.rank(), 1);
        assert_eq!(s.current_height(), 10);
    }

    #[test]
    fn threshold_one_rank_one_shuts_down_on_first_miss() {
        let mut s = signer(1, 2, 1);
        s.unlock_counter();
        assert_eq!(s.missed(), Err(SignerError::MustShutdown));
    }

    #[test]
    fn threshold_one_rank_two_promotes_on_first_miss() {
        let mut s = signer(1, 2, 2);
        s.unlock_counter();
        assert_eq!(s.missed(), Err(SignerError::ThresholdExceeded));
        assert_eq!(s.rank(), 1);
        assert_eq!(s.missed_in_a_row(), 0);
    }

    #[test]
    fn reset_clears_counter_only_when_nonzero() {
        let mut s = signer(5, 2, 2);
        s.unlock_counter();

        s.reset();
        assert_eq!(s.missed_in_a_row(), 0);

        s.missed().unwrap();
        s.missed().unwrap();
        s.reset();
        assert_eq!(s.missed_in_a_row(), 0);
    }

    #[test]
    fn rank_never_changes_while_counter_is_locked() {
        // Counter-lock safety: any number of miss outcomes before the first
        // co-signed commit must leave the rank untouched.
        let mut s = signer(1, 3, 3);
        for _ in 0..100 {
            let _ = s.missed();
        }
        assert_eq!(s.rank(), 3);
    }

    #[test]
    fn gauges_track_rank_and_counter() {
        let gauges = Gauges::new().unwrap();
        let mut s = RankedSigner::new(3, 2, 2, gauges.clone());
        s.unlock_counter();

        s.missed().unwrap();
        assert_eq!(gauges.missed_blocks_in_a_row.get(), 1);

        s.missed().unwrap();
        assert_eq!(s.missed(), Err(SignerError::ThresholdExceeded));
        assert_eq!(gauges.rank.get(), 1);
        assert_eq!(gauges.missed_blocks_in_a_row.get(), 0);
    }
}
