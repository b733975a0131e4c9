//! The two-phase-commit contract every durable component of the forest
//! implements so a [`Forest`](crate::forest::Forest) (and later the archive
//! controller) can checkpoint them all atomically: prepare stages the
//! boundary, commit makes it durable, abort discards a failed prepare, and
//! restore rolls a component back to a previously committed boundary.

use crate::error::ForestError;
use crate::stock::{Stock, StockRecord};

pub trait CheckpointParticipant {
    fn prepare_checkpoint(&self, number: u64) -> Result<(), ForestError>;
    fn commit_checkpoint(&self, number: u64) -> Result<(), ForestError>;
    fn abort_checkpoint(&self, number: u64) -> Result<(), ForestError>;
    fn restore_checkpoint(&self, number: u64) -> Result<(), ForestError>;
}

impl<T: StockRecord> CheckpointParticipant for Stock<T> {
    fn prepare_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        Stock::prepare_checkpoint(self, number)
    }

    fn commit_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        Stock::commit_checkpoint(self, number)
    }

    fn abort_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        Stock::abort_checkpoint(self, number)
    }

    fn restore_checkpoint(&self, number: u64) -> Result<(), ForestError> {
        Stock::restore_checkpoint(self, number)
    }
}
