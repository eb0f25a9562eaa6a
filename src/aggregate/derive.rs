use super::tensor::CounterTensor;

/// How the input tensor's channels are to be interpreted along the time
/// axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Channels hold raw per-day increments.
    Incremental,
    /// Channels hold running totals.
    Cumulative,
}

/// Number of derived series produced per input channel.
pub const DERIVED_PER_CHANNEL: usize = 4;

/// Offsets of the derived series within one input channel's block.
pub const DERIVED_CUMULATIVE: usize = 0;
pub const DERIVED_DAILY: usize = 1;
pub const DERIVED_WEEKLY: usize = 2;
pub const DERIVED_WEEKLY_SHIFTED: usize = 3;

/// Derives the standard metric set from a counter tensor.
///
/// The output has the same shape except the channel axis is four times
/// as wide: for input channel `c`, output channels `4c..4c+3` hold the
/// cumulative total, the daily delta, the 7-day delta and the 7-day
/// delta shifted back one week, in that order.
///
/// For cumulative input the daily delta is the day-over-day difference
/// clamped at zero; apparent decreases from upstream data corrections
/// are dropped rather than propagated. The 7-day deltas are clamped the
/// same way and are zero for day offsets below 7 (below 14 for the
/// shifted series).
///
/// Pure function: the input tensor is not modified and the result is
/// repeatable.
pub fn derive_channels(input: &CounterTensor, kind: ChannelKind) -> CounterTensor {
    let days = input.days();
    let card = input.axes().cardinality();
    let width = input.channels();
    let out_width = width * DERIVED_PER_CHANNEL;

    let data = input.data();
    let mut out = vec![0.0; days * card * out_width];

    let cell = |day: usize, coord: usize, channel: usize| (day * card + coord) * width + channel;
    let out_cell =
        |day: usize, coord: usize, channel: usize| (day * card + coord) * out_width + channel;

    let mut cumulative = vec![0.0; days];
    let mut daily = vec![0.0; days];

    for coord in 0..card {
        for channel in 0..width {
            match kind {
                ChannelKind::Cumulative => {
                    for day in 0..days {
                        cumulative[day] = data[cell(day, coord, channel)];
                    }
                    daily[0] = 0.0;
                    for day in 1..days {
                        daily[day] = (cumulative[day] - cumulative[day - 1]).max(0.0);
                    }
                }
                ChannelKind::Incremental => {
                    let mut running = 0.0;
                    for day in 0..days {
                        let value = data[cell(day, coord, channel)];
                        running += value;
                        daily[day] = value;
                        cumulative[day] = running;
                    }
                }
            }

            let base = channel * DERIVED_PER_CHANNEL;
            for day in 0..days {
                let weekly = if day >= 7 {
                    (cumulative[day] - cumulative[day - 7]).max(0.0)
                } else {
                    0.0
                };
                let weekly_shifted = if day >= 14 {
                    (cumulative[day - 7] - cumulative[day - 14]).max(0.0)
                } else {
                    0.0
                };

                out[out_cell(day, coord, base + DERIVED_CUMULATIVE)] = cumulative[day];
                out[out_cell(day, coord, base + DERIVED_DAILY)] = daily[day];
                out[out_cell(day, coord, base + DERIVED_WEEKLY)] = weekly;
                out[out_cell(day, coord, base + DERIVED_WEEKLY_SHIFTED)] = weekly_shifted;
            }
        }
    }

    CounterTensor::from_parts(
        input.first_date(),
        days,
        input.axes().clone(),
        out_width,
        out,
    )
}
