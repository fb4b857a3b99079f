//! Running per-channel normalization statistics.
//!
//! Accumulators keep `count`, `mean` and `M2` (sum of squared deviations)
//! instead of raw samples, so partial accumulators built over disjoint tiles
//! can be merged in any grouping.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};

/// Per-channel mean and standard deviation, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizingDict {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

// ---------------------------------------------------------------------------
// NormalizingAccumulator
// ---------------------------------------------------------------------------

/// Welford accumulator over rows of `n_channels` values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizingAccumulator {
    /// Rows folded so far.
    count: usize,
    /// Arrays folded so far.
    instances: usize,
    mean: Array1<f64>,
    m2: Array1<f64>,
}

impl NormalizingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of arrays (instances) folded in.
    pub fn instances(&self) -> usize {
        self.instances
    }

    pub fn n_channels(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    /// Sample variance per channel; `None` before two rows have been seen.
    pub fn variance(&self) -> Option<Array1<f64>> {
        (self.count >= 2).then(|| &self.m2 / (self.count - 1) as f64)
    }

    /// Mean and standard deviation, `None` before two rows have been seen.
    pub fn finalize(&self) -> Option<NormalizingDict> {
        let variance = self.variance()?;
        Some(NormalizingDict {
            mean: self.mean.to_vec(),
            std: variance.mapv(f64::sqrt).to_vec(),
        })
    }

    /// Fail if the accumulator already tracks a different channel count.
    pub fn check_channels(&self, n_channels: usize) -> Result<()> {
        if self.count > 0 && self.n_channels() != n_channels {
            return Err(ExtractError::ChannelMismatch {
                expected: self.n_channels(),
                actual: n_channels,
            });
        }
        Ok(())
    }

    /// Fold every row of a `[rows, channels]` array as one instance.
    pub fn update(&mut self, rows: ArrayView2<f64>) -> Result<()> {
        self.check_channels(rows.ncols())?;
        if self.count == 0 {
            self.mean = Array1::zeros(rows.ncols());
            self.m2 = Array1::zeros(rows.ncols());
        }
        for row in rows.rows() {
            self.update_row(row);
        }
        self.instances += 1;
        Ok(())
    }

    /// Fold a `[timesteps, channels, neighbours]` array, each
    /// (timestep, neighbour) pair being one row.
    pub fn update_surrounding(&mut self, array: &Array3<f64>) -> Result<()> {
        let (timesteps, channels, neighbours) = array.dim();
        let rows = Array2::from_shape_fn((timesteps * neighbours, channels), |(r, c)| {
            array[[r / neighbours, c, r % neighbours]]
        });
        self.update(rows.view())
    }

    fn update_row(&mut self, row: ArrayView1<f64>) {
        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(row) {
            let delta = x - *mean;
            *mean += delta / n;
            *m2 += delta * (x - *mean);
        }
    }

    /// Combine with an accumulator built over disjoint data.
    pub fn merge(&mut self, other: &NormalizingAccumulator) -> Result<()> {
        if other.count == 0 {
            self.instances += other.instances;
            return Ok(());
        }
        self.check_channels(other.n_channels())?;
        if self.count == 0 {
            let instances = self.instances + other.instances;
            *self = other.clone();
            self.instances = instances;
            return Ok(());
        }

        let (na, nb) = (self.count as f64, other.count as f64);
        let n = na + nb;
        let delta = &other.mean - &self.mean;
        self.mean = &self.mean + &(&delta * (nb / n));
        self.m2 = &self.m2 + &other.m2 + &(delta.mapv(|d| d * d) * (na * nb / n));
        self.count += other.count;
        self.instances += other.instances;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TileStats – the pair of session accumulators
// ---------------------------------------------------------------------------

/// Labelled-pixel and surrounding-pixel accumulators of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileStats {
    pub labelled: NormalizingAccumulator,
    pub surrounding: NormalizingAccumulator,
}

/// Finalized [`TileStats`], the content of `normalizing_dict.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizingDicts {
    pub labelled: Option<NormalizingDict>,
    pub surrounding: Option<NormalizingDict>,
}

impl TileStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one instance into both accumulators. Channel counts are checked
    /// up front so a failure leaves both untouched.
    pub fn fold(&mut self, labelled: &Array2<f64>, surrounding: &Array3<f64>) -> Result<()> {
        self.labelled.check_channels(labelled.ncols())?;
        self.surrounding.check_channels(surrounding.dim().1)?;
        self.labelled.update(labelled.view())?;
        self.surrounding.update_surrounding(surrounding)
    }

    /// Fold a `[n, timesteps, channels]` batch of unlabelled series into the
    /// labelled accumulator, one instance per series. The channel count is
    /// checked before any series is folded.
    pub fn fold_unlabelled(&mut self, batch: &Array3<f64>) -> Result<()> {
        self.labelled.check_channels(batch.dim().2)?;
        for series in batch.outer_iter() {
            self.labelled.update(series)?;
        }
        Ok(())
    }

    pub fn merge(&mut self, other: &TileStats) -> Result<()> {
        self.labelled.check_channels(other.labelled.n_channels())?;
        self.surrounding.check_channels(other.surrounding.n_channels())?;
        self.labelled.merge(&other.labelled)?;
        self.surrounding.merge(&other.surrounding)
    }

    pub fn finalize(&self) -> NormalizingDicts {
        NormalizingDicts {
            labelled: self.labelled.finalize(),
            surrounding: self.surrounding.finalize(),
        }
    }
}
