use anyhow::{bail, Result};
use chrono::{NaiveDate, NaiveTime};

use crate::influx::line::{FieldValue, Point};

use super::tensor::CounterTensor;

/// Iterator turning a dense tensor back into a sparse stream of tagged
/// points.
///
/// Walks every day offset and every point of the Cartesian product of
/// the axis key sets, in axis order. Rows whose channel vector is
/// entirely zero are skipped: the coordinate space is the full product
/// of all axes, so combinations that never co-occur in the data (a
/// district under the wrong state) would otherwise dominate the output.
pub struct PointSeries<'a> {
    tensor: &'a CounterTensor,
    measurement: String,
    tag_labels: Vec<String>,
    field_labels: Vec<String>,
    day: usize,
    coord: usize,
}

impl<'a> PointSeries<'a> {
    /// Creates the series.
    ///
    /// `tag_labels` must match the tensor's axis count and
    /// `field_labels` its channel count; a mismatch means the caller is
    /// labelling a tensor it did not build.
    pub fn new(
        tensor: &'a CounterTensor,
        measurement: impl Into<String>,
        tag_labels: Vec<String>,
        field_labels: Vec<String>,
    ) -> Result<Self> {
        if tag_labels.len() != tensor.axes().axis_count() {
            bail!(
                "{} tag labels for {} axes",
                tag_labels.len(),
                tensor.axes().axis_count()
            );
        }
        if field_labels.len() != tensor.channels() {
            bail!(
                "{} field labels for {} channels",
                field_labels.len(),
                tensor.channels()
            );
        }

        Ok(Self {
            tensor,
            measurement: measurement.into(),
            tag_labels,
            field_labels,
            day: 0,
            coord: 0,
        })
    }

    /// Number of rows the walk visits, counting the all-zero rows that
    /// are skipped. Upper bound on emitted points; used for progress
    /// estimates.
    pub fn dense_len(&self) -> usize {
        self.tensor.days() * self.tensor.axes().cardinality()
    }
}

impl Iterator for PointSeries<'_> {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        let card = self.tensor.axes().cardinality();

        while self.day < self.tensor.days() {
            let day = self.day;
            let coord = self.coord;

            self.coord += 1;
            if self.coord == card {
                self.coord = 0;
                self.day += 1;
            }

            let row = self.tensor.row(day, coord);
            if row.iter().all(|&v| v == 0.0) {
                continue;
            }

            let values = self.tensor.axes().coord_values(coord);
            let tags = self
                .tag_labels
                .iter()
                .zip(values)
                .map(|(label, value)| (label.clone(), value.to_string()))
                .collect();
            let fields = self
                .field_labels
                .iter()
                .zip(row)
                .map(|(label, value)| (label.clone(), FieldValue::Float(*value)))
                .collect();

            return Some(Point {
                measurement: self.measurement.clone(),
                tags,
                fields,
                timestamp: self.tensor.date_at(day).and_time(NaiveTime::MIN),
                ns_part: 0,
            });
        }

        None
    }
}

/// Repeats a set of template points once per day, starting at
/// `first_date`.
///
/// Used for constant-valued overlay series (per-coordinate population
/// counts) that accompany the derived counters at every day so they can
/// be joined at query time.
pub fn constant_points(
    templates: Vec<Point>,
    first_date: NaiveDate,
    days: usize,
) -> impl Iterator<Item = Point> {
    (0..days).flat_map(move |day| {
        let timestamp = (first_date + chrono::Duration::days(day as i64)).and_time(NaiveTime::MIN);
        templates
            .clone()
            .into_iter()
            .map(move |mut point| {
                point.timestamp = timestamp;
                point
            })
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::aggregate::axis::AxisSet;

    fn date(s: &str) -> NaiveDate {
        s.parse().expect("valid date")
    }

    struct Rec((String, String));

    fn tensor() -> CounterTensor {
        let records = vec![
            Rec(("BY".to_string(), "Traunstein".to_string())),
            Rec(("BE".to_string(), "Mitte".to_string())),
        ];
        let axes = Arc::new(
            AxisSet::from_records(&records, 2, |r: &Rec| vec![&r.0 .0, &r.0 .1])
                .expect("build axes"),
        );
        let mut tensor = CounterTensor::new(axes, date("2021-01-15"), date("2021-01-16"), 2)
            .expect("create tensor");
        tensor
            .accumulate(date("2021-01-15"), &["BY", "Traunstein"], 0, 5.0)
            .unwrap();
        tensor
            .accumulate(date("2021-01-16"), &["BE", "Mitte"], 1, 2.0)
            .unwrap();
        tensor
    }

    #[test]
    fn test_skips_all_zero_rows() {
        let tensor = tensor();
        let series = PointSeries::new(
            &tensor,
            "cases",
            vec!["state".to_string(), "district".to_string()],
            vec!["ref".to_string(), "pub".to_string()],
        )
        .expect("labels match");

        // 2 days x 4 coordinate combinations, only 2 rows are non-zero.
        assert_eq!(series.dense_len(), 8);
        let points: Vec<Point> = series.collect();
        assert_eq!(points.len(), 2);

        assert_eq!(points[0].tags[0], ("state".to_string(), "BY".to_string()));
        assert_eq!(
            points[0].tags[1],
            ("district".to_string(), "Traunstein".to_string())
        );
        assert_eq!(points[0].fields[0].1, FieldValue::Float(5.0));
        assert_eq!(points[0].timestamp, date("2021-01-15").and_time(NaiveTime::MIN));
        assert_eq!(points[0].ns_part, 0);

        assert_eq!(points[1].tags[0].1, "BE");
        assert_eq!(points[1].fields[1].1, FieldValue::Float(2.0));
    }

    #[test]
    fn test_round_trip_recovers_nonzero_coordinates() {
        let tensor = tensor();
        let series = PointSeries::new(
            &tensor,
            "cases",
            vec!["state".to_string(), "district".to_string()],
            vec!["ref".to_string(), "pub".to_string()],
        )
        .expect("labels match");

        // Re-resolve every emitted point against the tensor: the set of
        // (day, coordinate) pairs must be exactly the non-zero rows.
        let mut emitted: Vec<(usize, usize)> = series
            .map(|p| {
                let day = tensor
                    .day_offset(p.timestamp.date())
                    .expect("emitted day in span");
                let values: Vec<&str> = p.tags.iter().map(|(_, v)| v.as_str()).collect();
                let coord = tensor.axes().flat_index(&values).expect("known coordinate");
                (day, coord)
            })
            .collect();
        emitted.sort_unstable();

        let mut expected = Vec::new();
        for day in 0..tensor.days() {
            for coord in 0..tensor.axes().cardinality() {
                if tensor.row(day, coord).iter().any(|&v| v != 0.0) {
                    expected.push((day, coord));
                }
            }
        }

        assert_eq!(emitted, expected);
    }

    #[test]
    fn test_rejects_label_mismatch() {
        let tensor = tensor();
        assert!(PointSeries::new(
            &tensor,
            "cases",
            vec!["state".to_string()],
            vec!["ref".to_string(), "pub".to_string()],
        )
        .is_err());
        assert!(PointSeries::new(
            &tensor,
            "cases",
            vec!["state".to_string(), "district".to_string()],
            vec!["ref".to_string()],
        )
        .is_err());
    }

    #[test]
    fn test_constant_points_repeat_daily() {
        let template = Point {
            measurement: "cases".to_string(),
            tags: vec![("state".to_string(), "BY".to_string())],
            fields: vec![("population".to_string(), FieldValue::Integer(13_000_000))],
            timestamp: date("2000-01-01").and_time(NaiveTime::MIN),
            ns_part: 0,
        };

        let points: Vec<Point> = constant_points(vec![template], date("2021-01-15"), 3).collect();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].timestamp.date(), date("2021-01-15"));
        assert_eq!(points[2].timestamp.date(), date("2021-01-17"));
        assert!(points
            .iter()
            .all(|p| p.fields[0].1 == FieldValue::Integer(13_000_000)));
    }
}
