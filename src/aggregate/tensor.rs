use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::NaiveDate;

use super::axis::AxisSet;

/// Dense daily counter tensor.
///
/// Shape is `[days, |axis_1|, …, |axis_N|, channels]`, row-major,
/// zero-initialized. Mutation is strictly additive during ingest; once
/// derivation starts the tensor is only read.
#[derive(Debug, Clone)]
pub struct CounterTensor {
    first_date: NaiveDate,
    days: usize,
    axes: Arc<AxisSet>,
    channels: usize,
    data: Vec<f64>,
}

impl CounterTensor {
    /// Creates a zeroed tensor spanning `[first_date, last_date]`
    /// inclusive over the given coordinate space.
    pub fn new(
        axes: Arc<AxisSet>,
        first_date: NaiveDate,
        last_date: NaiveDate,
        channels: usize,
    ) -> Result<Self> {
        if last_date < first_date {
            bail!("tensor day span ends ({last_date}) before it starts ({first_date})");
        }
        if channels == 0 {
            bail!("tensor needs at least one metric channel");
        }
        if axes.cardinality() == 0 {
            bail!("coordinate space is empty (an axis has no observed values)");
        }

        let days = (last_date - first_date).num_days() as usize + 1;
        let cells = days * axes.cardinality() * channels;

        Ok(Self {
            first_date,
            days,
            axes,
            channels,
            data: vec![0.0; cells],
        })
    }

    pub(crate) fn from_parts(
        first_date: NaiveDate,
        days: usize,
        axes: Arc<AxisSet>,
        channels: usize,
        data: Vec<f64>,
    ) -> Self {
        debug_assert_eq!(data.len(), days * axes.cardinality() * channels);
        Self {
            first_date,
            days,
            axes,
            channels,
            data,
        }
    }

    /// First day covered by the tensor.
    pub fn first_date(&self) -> NaiveDate {
        self.first_date
    }

    /// Number of days covered (time axis length).
    pub fn days(&self) -> usize {
        self.days
    }

    /// Metric channel count (trailing axis length).
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The shared coordinate space.
    pub fn axes(&self) -> &Arc<AxisSet> {
        &self.axes
    }

    pub(crate) fn data(&self) -> &[f64] {
        &self.data
    }

    /// Calendar date for a day offset.
    pub fn date_at(&self, day: usize) -> NaiveDate {
        self.first_date + chrono::Duration::days(day as i64)
    }

    /// Resolves a date to its day offset, failing outside the span.
    pub fn day_offset(&self, date: NaiveDate) -> Result<usize> {
        let offset = (date - self.first_date).num_days();
        if offset < 0 || offset as usize >= self.days {
            bail!(
                "date {date} outside tensor span {}..{}",
                self.first_date,
                self.date_at(self.days - 1)
            );
        }
        Ok(offset as usize)
    }

    /// Adds `amount` to the cell addressed by date, categorical tuple
    /// and channel.
    ///
    /// An out-of-span date, a categorical value missing from its axis
    /// or an out-of-range channel all indicate the tensor was not sized
    /// from the record set being accumulated; each is a hard error.
    pub fn accumulate(
        &mut self,
        date: NaiveDate,
        coords: &[&str],
        channel: usize,
        amount: f64,
    ) -> Result<()> {
        let day = self.day_offset(date)?;
        let flat = self.axes.flat_index(coords)?;
        if channel >= self.channels {
            bail!("channel {channel} out of range (tensor has {})", self.channels);
        }

        let index = (day * self.axes.cardinality() + flat) * self.channels + channel;
        self.data[index] += amount;
        Ok(())
    }

    /// Channel vector at one (day offset, flat coordinate) cell.
    pub fn row(&self, day: usize, flat_coord: usize) -> &[f64] {
        let start = (day * self.axes.cardinality() + flat_coord) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Sums one categorical axis out, producing a tensor over the
    /// remaining axes.
    pub fn sum_axis(&self, axis: usize) -> CounterTensor {
        let dims = self.axes.dims();
        assert!(axis < dims.len(), "axis {axis} out of range");

        let keep: Vec<usize> = (0..dims.len()).filter(|&i| i != axis).collect();
        let reduced_axes = Arc::new(self.axes.project(&keep));
        let reduced_card = reduced_axes.cardinality();
        let mut data = vec![0.0; self.days * reduced_card * self.channels];

        let card = self.axes.cardinality();
        let mut index = vec![0usize; dims.len()];
        for day in 0..self.days {
            index.iter_mut().for_each(|i| *i = 0);
            for flat in 0..card {
                let mut reduced_flat = 0usize;
                for &i in &keep {
                    reduced_flat = reduced_flat * dims[i] + index[i];
                }

                let src = self.row(day, flat);
                let dst = (day * reduced_card + reduced_flat) * self.channels;
                for (c, value) in src.iter().enumerate() {
                    data[dst + c] += value;
                }

                // Advance the mixed-radix coordinate.
                for i in (0..dims.len()).rev() {
                    index[i] += 1;
                    if index[i] < dims[i] {
                        break;
                    }
                    index[i] = 0;
                }
            }
        }

        CounterTensor::from_parts(self.first_date, self.days, reduced_axes, self.channels, data)
    }
}
