//! Immutable sample buffers shared with running units.
//!
//! The control side appends buffers; units read them from the audio thread
//! through the `get_data_floats` host call. The table is published through an
//! [`ArcSwap`], so readers never take a lock and never observe a half-built
//! table. Stored buffers are never mutated.

use std::{path::Path, sync::Arc};

use arc_swap::ArcSwap;

use crate::{
    error::{Error, Missing},
    io::converter::floats_from_ne_bytes,
};

pub type SampleId = u32;

/// Length of each built-in single-cycle wave.
pub const WAVE_SIZE: usize = 256;

/// Built-in wavetables, in the order they occupy sample ids 0..4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinWave {
    Sine,
    Square,
    Triangle,
    Saw,
}

impl BuiltinWave {
    pub const ALL: [BuiltinWave; 4] = [
        BuiltinWave::Sine,
        BuiltinWave::Square,
        BuiltinWave::Triangle,
        BuiltinWave::Saw,
    ];

    /// One cycle of the wave, `size` points long, in [-1.0, 1.0].
    pub fn single_cycle(self, size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = i as f32 / size as f32;
                match self {
                    BuiltinWave::Sine => (phase * std::f32::consts::TAU).sin(),
                    BuiltinWave::Square => {
                        if phase < 0.5 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    BuiltinWave::Triangle => 1.0 - 4.0 * (phase.round() - phase).abs(),
                    BuiltinWave::Saw => 1.0 - 2.0 * phase,
                }
            })
            .collect()
    }
}

pub struct SampleStore {
    table: ArcSwap<Vec<Arc<[f32]>>>,
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleStore {
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// A store whose first four ids hold the [`BuiltinWave`] tables.
    pub fn with_builtin_waves() -> Self {
        let store = Self::new();
        for wave in BuiltinWave::ALL {
            store.add_floats(wave.single_cycle(WAVE_SIZE));
        }
        store
    }

    /// Store raw native-endian f32 bytes. Nothing is stored on error.
    pub fn add_sample(&self, bytes: &[u8]) -> Result<SampleId, Error> {
        let floats = floats_from_ne_bytes(bytes)?;
        Ok(self.add_floats(floats))
    }

    pub fn add_floats(&self, samples: Vec<f32>) -> SampleId {
        let buffer: Arc<[f32]> = samples.into();
        let previous = self.table.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&buffer));
            next
        });
        previous.len() as SampleId
    }

    pub fn load_file(&self, path: &Path) -> Result<SampleId, Error> {
        let bytes = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_sample(&bytes)
    }

    pub fn len(&self) -> usize {
        self.table.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of floats in a sample.
    pub fn sample_len(&self, id: SampleId) -> Option<usize> {
        self.table.load().get(id as usize).map(|s| s.len())
    }

    /// Copy `length` floats starting at `offset`. Positions past the end of
    /// the sample read as zero.
    pub fn get(&self, id: SampleId, offset: usize, length: usize) -> Result<Vec<f32>, Error> {
        let mut out = vec![0.0; length];
        if self.read(id, offset, &mut out) {
            Ok(out)
        } else {
            Err(Missing::Sample(id).into())
        }
    }

    /// Fill `out` from the sample without allocating. Returns `false` (and
    /// zeroes `out`) when the id is unknown.
    pub fn read(&self, id: SampleId, offset: usize, out: &mut [f32]) -> bool {
        let table = self.table.load();
        let Some(sample) = table.get(id as usize) else {
            out.fill(0.0);
            return false;
        };

        let available = sample.get(offset..).unwrap_or(&[]);
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        out[n..].fill(0.0);
        true
    }

    /// Write the range as little-endian f32 bytes, the layout of unit memory.
    /// `out.len()` must be a multiple of 4; unknown ids and out-of-range
    /// positions write zeros.
    pub(crate) fn copy_le_bytes(&self, id: SampleId, offset: usize, out: &mut [u8]) {
        let table = self.table.load();
        let sample: &[f32] = table.get(id as usize).map(|s| &s[..]).unwrap_or(&[]);
        let available = sample.get(offset..).unwrap_or(&[]);

        for (i, chunk) in out.chunks_exact_mut(4).enumerate() {
            let value = available.get(i).copied().unwrap_or(0.0);
            chunk.copy_from_slice(&value.to_le_bytes());
        }
    }
}
