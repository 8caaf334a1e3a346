//! Turning a batch request into dispatchable jobs.
use std::num::NonZeroUsize;

use rand::seq::SliceRandom;
use rand::Rng;

/// Fraction of a batch which is reads, in `[0, 1]`, kept in parts per
/// million so decimal ratios split exactly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadRatio(u32);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Read ratio must be within [0, 1], got {0}")]
pub struct InvalidReadRatio(pub String);

impl ReadRatio {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(Self::PPM);

    const PPM: u32 = 1_000_000;

    /// Rounds to the nearest millionth.
    pub fn new(ratio: f64) -> Result<Self, InvalidReadRatio> {
        if (0.0..=1.0).contains(&ratio) {
            Ok(Self((ratio * f64::from(Self::PPM)).round() as u32))
        } else {
            Err(InvalidReadRatio(ratio.to_string()))
        }
    }

    pub fn from_parts_per_million(ppm: u32) -> Result<Self, InvalidReadRatio> {
        if ppm <= Self::PPM {
            Ok(Self(ppm))
        } else {
            Err(InvalidReadRatio(format!("{ppm} ppm")))
        }
    }

    pub fn parts_per_million(&self) -> u32 {
        self.0
    }

    pub fn get(&self) -> f64 {
        f64::from(self.0) / f64::from(Self::PPM)
    }
}

impl std::str::FromStr for ReadRatio {
    type Err = InvalidReadRatio;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ratio = s
            .trim()
            .parse::<f64>()
            .map_err(|_| InvalidReadRatio(s.to_owned()))?;
        Self::new(ratio)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OperationCounts {
    pub reads: usize,
    pub writes: usize,
}

impl OperationCounts {
    /// `writes = floor(batch_size * (1 - read_ratio))`, the rest are reads.
    pub fn split(batch_size: usize, read_ratio: ReadRatio) -> Self {
        let write_ppm = u128::from(ReadRatio::PPM - read_ratio.0);
        let writes = (batch_size as u128 * write_ppm / u128::from(ReadRatio::PPM)) as usize;

        Self {
            reads: batch_size - writes,
            writes,
        }
    }

    pub fn total(&self) -> usize {
        self.reads + self.writes
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

/// All operations of a batch in random order.
pub fn operations<R: Rng + ?Sized>(counts: OperationCounts, rng: &mut R) -> Vec<Operation> {
    let mut operations = std::iter::repeat(Operation::Read)
        .take(counts.reads)
        .chain(std::iter::repeat(Operation::Write).take(counts.writes))
        .collect::<Vec<_>>();
    operations.shuffle(rng);
    operations
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobKind {
    Read,
    /// One invoke transaction carrying one call per update. Updates are
    /// numbered by order of appearance across the batch.
    Write { updates: Vec<usize> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub id: usize,
    /// Index into the account pool.
    pub account: usize,
    pub kind: JobKind,
}

impl Job {
    pub fn is_write(&self) -> bool {
        matches!(self.kind, JobKind::Write { .. })
    }
}

/// Groups writes into bundles of `bundle_size` in order of appearance and
/// assigns accounts round robin over the job index.
///
/// A write bundle is emitted once it is full, so it sits at the position of
/// its last write. Trailing partial bundles go last.
pub fn jobs(
    operations: &[Operation],
    bundle_size: NonZeroUsize,
    num_accounts: NonZeroUsize,
) -> Vec<Job> {
    let mut kinds = Vec::new();
    let mut bundle = Vec::with_capacity(bundle_size.get());
    let mut next_update = 0;

    for operation in operations {
        match operation {
            Operation::Read => kinds.push(JobKind::Read),
            Operation::Write => {
                bundle.push(next_update);
                next_update += 1;
                if bundle.len() == bundle_size.get() {
                    kinds.push(JobKind::Write {
                        updates: std::mem::take(&mut bundle),
                    });
                }
            }
        }
    }

    if !bundle.is_empty() {
        kinds.push(JobKind::Write { updates: bundle });
    }

    kinds
        .into_iter()
        .enumerate()
        .map(|(id, kind)| Job {
            id,
            account: id % num_accounts.get(),
            kind,
        })
        .collect()
}
