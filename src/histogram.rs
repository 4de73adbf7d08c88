// Mergeable duration histogram used by percentile aggregates.
//
// Small populations are kept as exact values so low-volume transactions report exact
// percentiles. Past MAX_EXACT_VALUES the values move into an auto-resizing HDR histogram
// (log-linear buckets). Both forms merge without loss and encode/decode losslessly, so
// repeated rollups never compound error.
//
// Encoded layout: [tag: u8][payload]. Tag 0 = exact (u64 LE values), tag 1 = HDR V2.

use std::io::Cursor;

use hdrhistogram::Histogram;
use hdrhistogram::serialization::{Deserializer, Serializer, V2Serializer};

const MAX_EXACT_VALUES: usize = 1024;
const SIGNIFICANT_DIGITS: u8 = 3;

const TAG_EXACT: u8 = 0;
const TAG_HDR: u8 = 1;

#[derive(Debug, Clone)]
pub struct LazyHistogram {
    inner: Inner,
}

#[derive(Debug, Clone)]
enum Inner {
    Exact(Vec<u64>),
    Hdr(Histogram<u64>),
}

impl Default for LazyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyHistogram {
    pub fn new() -> Self {
        Self {
            inner: Inner::Exact(Vec::new()),
        }
    }

    pub fn from_values(values: impl IntoIterator<Item = u64>) -> anyhow::Result<Self> {
        let mut h = Self::new();
        for v in values {
            h.add(v)?;
        }
        Ok(h)
    }

    /// Records one sample (nanoseconds).
    pub fn add(&mut self, value: u64) -> anyhow::Result<()> {
        match &mut self.inner {
            Inner::Exact(values) => {
                values.push(value);
                if values.len() > MAX_EXACT_VALUES {
                    self.convert_to_hdr()?;
                }
            }
            Inner::Hdr(hdr) => hdr.record(value)?,
        }
        Ok(())
    }

    /// Folds `other` into this histogram. Sample counts are preserved exactly.
    pub fn merge(&mut self, other: &LazyHistogram) -> anyhow::Result<()> {
        if let (Inner::Exact(values), Inner::Exact(other_values)) = (&mut self.inner, &other.inner)
            && values.len() + other_values.len() <= MAX_EXACT_VALUES
        {
            values.extend_from_slice(other_values);
            return Ok(());
        }
        let hdr = self.convert_to_hdr()?;
        match &other.inner {
            Inner::Exact(other_values) => {
                for v in other_values {
                    hdr.record(*v)?;
                }
            }
            Inner::Hdr(other_hdr) => hdr.add(other_hdr)?,
        }
        Ok(())
    }

    pub fn count(&self) -> u64 {
        match &self.inner {
            Inner::Exact(values) => values.len() as u64,
            Inner::Hdr(hdr) => hdr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Value at `percentile` (0..=100) using nearest rank; `None` when empty.
    pub fn value_at_percentile(&self, percentile: f64) -> Option<u64> {
        match &self.inner {
            Inner::Exact(values) => {
                if values.is_empty() {
                    return None;
                }
                let mut sorted = values.clone();
                sorted.sort_unstable();
                let n = sorted.len();
                let rank = ((percentile.clamp(0.0, 100.0) / 100.0) * n as f64).ceil() as usize;
                Some(sorted[rank.clamp(1, n) - 1])
            }
            Inner::Hdr(hdr) => {
                if hdr.len() == 0 {
                    None
                } else {
                    Some(hdr.value_at_percentile(percentile.clamp(0.0, 100.0)))
                }
            }
        }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        match &self.inner {
            Inner::Exact(values) => {
                let mut out = Vec::with_capacity(1 + values.len() * 8);
                out.push(TAG_EXACT);
                for v in values {
                    out.extend_from_slice(&v.to_le_bytes());
                }
                Ok(out)
            }
            Inner::Hdr(hdr) => {
                let mut out = vec![TAG_HDR];
                V2Serializer::new()
                    .serialize(hdr, &mut out)
                    .map_err(|e| anyhow::anyhow!("hdr histogram serialize: {:?}", e))?;
                Ok(out)
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let Some((&tag, payload)) = bytes.split_first() else {
            anyhow::bail!("empty histogram blob");
        };
        match tag {
            TAG_EXACT => {
                anyhow::ensure!(
                    payload.len() % 8 == 0,
                    "exact histogram payload length {} is not a multiple of 8",
                    payload.len()
                );
                let values = payload
                    .chunks_exact(8)
                    .map(|c| {
                        let mut buf = [0u8; 8];
                        buf.copy_from_slice(c);
                        u64::from_le_bytes(buf)
                    })
                    .collect();
                Ok(Self {
                    inner: Inner::Exact(values),
                })
            }
            TAG_HDR => {
                let mut hdr: Histogram<u64> = Deserializer::new()
                    .deserialize(&mut Cursor::new(payload))
                    .map_err(|e| anyhow::anyhow!("hdr histogram deserialize: {:?}", e))?;
                hdr.auto(true);
                Ok(Self {
                    inner: Inner::Hdr(hdr),
                })
            }
            other => anyhow::bail!("unknown histogram tag {}", other),
        }
    }

    /// Moves exact values into an auto-resizing HDR histogram. `record` grows the histogram
    /// before counting, so no sample is clamped to the initial trackable range.
    fn convert_to_hdr(&mut self) -> anyhow::Result<&mut Histogram<u64>> {
        if let Inner::Exact(values) = &self.inner {
            let mut hdr = Histogram::<u64>::new(SIGNIFICANT_DIGITS)?;
            hdr.auto(true);
            for v in values {
                hdr.record(*v)?;
            }
            self.inner = Inner::Hdr(hdr);
        }
        match &mut self.inner {
            Inner::Hdr(hdr) => Ok(hdr),
            Inner::Exact(_) => anyhow::bail!("histogram still in exact mode after conversion"),
        }
    }
}
