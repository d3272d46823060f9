//! Paired fixture/programmer resources.
//!
//! A fixture controller is always serviced by the same programmer link. Both
//! handles live in one `BenchPair` behind one async mutex, so a pair can be
//! reordered only as a whole and a programmer session is never driven by two
//! operations at once.

use tokio::sync::{Mutex, MutexGuard};

use super::{FixtureController, ProgrammerLink};
use crate::error::ConfigError;

/// The two handles of one physical bank.
pub struct PairHandles {
    pub fixture: Box<dyn FixtureController>,
    pub programmer: Box<dyn ProgrammerLink>,
}

/// One fixture controller together with its programmer link.
pub struct BenchPair {
    name: String,
    serial: String,
    /// Operator-facing device numbers for sockets 1..=N, if configured.
    dut_numbers: Vec<u32>,
    handles: Mutex<PairHandles>,
}

impl BenchPair {
    pub fn new(fixture: Box<dyn FixtureController>, programmer: Box<dyn ProgrammerLink>) -> Self {
        BenchPair {
            name: fixture.name(),
            serial: programmer.serial(),
            dut_numbers: Vec::new(),
            handles: Mutex::new(PairHandles { fixture, programmer }),
        }
    }

    pub fn with_dut_numbers(mut self, numbers: Vec<u32>) -> Self {
        self.dut_numbers = numbers;
        self
    }

    pub fn fixture_name(&self) -> &str {
        &self.name
    }

    pub fn programmer_serial(&self) -> &str {
        &self.serial
    }

    /// Configured device number for a 1-based socket.
    pub fn dut_number(&self, socket: u32) -> Option<u32> {
        socket
            .checked_sub(1)
            .and_then(|i| self.dut_numbers.get(i as usize))
            .copied()
    }

    /// Exclusive access to both handles for the duration of one unit of work.
    pub async fn lock(&self) -> MutexGuard<'_, PairHandles> {
        self.handles.lock().await
    }
}

/// Ordered sequence of pairs making up the whole bench.
pub struct Bench {
    pairs: Vec<BenchPair>,
}

impl Bench {
    pub fn new(pairs: Vec<BenchPair>) -> Self {
        Bench { pairs }
    }

    /// Build a bench from two index-aligned sequences.
    ///
    /// `fixtures[i]` is paired with `programmers[i]`; sequences of different
    /// length are rejected.
    pub fn from_parallel(
        fixtures: Vec<Box<dyn FixtureController>>,
        programmers: Vec<Box<dyn ProgrammerLink>>,
    ) -> Result<Self, ConfigError> {
        if fixtures.len() != programmers.len() {
            return Err(ConfigError::PairingMismatch {
                fixtures: fixtures.len(),
                programmers: programmers.len(),
            });
        }

        let pairs = fixtures
            .into_iter()
            .zip(programmers)
            .map(|(fixture, programmer)| BenchPair::new(fixture, programmer))
            .collect();
        Ok(Bench { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pair(&self, index: usize) -> Option<&BenchPair> {
        self.pairs.get(index)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (usize, &BenchPair)> {
        self.pairs.iter().enumerate()
    }

    /// Reorder two banks. Each fixture keeps its own programmer.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.pairs.swap(a, b);
    }
}
