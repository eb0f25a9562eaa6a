use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Result};

/// Sorted distinct values of one categorical axis plus the reverse
/// value-to-dense-index map.
///
/// Built once from the records that will later be indexed against it
/// (closed-world assumption), immutable afterwards.
#[derive(Debug, Clone)]
pub struct AxisKeys {
    keys: Vec<String>,
    indices: HashMap<String, usize>,
}

impl AxisKeys {
    fn from_values(values: BTreeSet<String>) -> Self {
        let keys: Vec<String> = values.into_iter().collect();
        let indices = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), i))
            .collect();
        Self { keys, indices }
    }

    /// Number of distinct values on this axis.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Values in ascending order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Dense index of a value, if it was observed during construction.
    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.indices.get(value).copied()
    }

    /// Value at a dense index.
    pub fn key_at(&self, index: usize) -> &str {
        &self.keys[index]
    }
}

/// Ordered set of categorical axes spanning one coordinate space.
///
/// The tensor and the sparsifier share a single `AxisSet` (behind an
/// `Arc`) so both resolve the same value-to-index mapping.
#[derive(Debug, Clone)]
pub struct AxisSet {
    axes: Vec<AxisKeys>,
}

impl AxisSet {
    /// Scans `records` once, projecting each to `axis_count` categorical
    /// values, and builds the per-axis sorted key sets.
    ///
    /// Fails if the projection ever returns a tuple of the wrong arity.
    pub fn from_records<'a, T: 'a, I, P>(records: I, axis_count: usize, projection: P) -> Result<Self>
    where
        I: IntoIterator<Item = &'a T>,
        P: Fn(&T) -> Vec<&str>,
    {
        let mut value_sets: Vec<BTreeSet<String>> = vec![BTreeSet::new(); axis_count];

        for record in records {
            let values = projection(record);
            if values.len() != axis_count {
                bail!(
                    "axis projection returned {} values, expected {axis_count}",
                    values.len()
                );
            }
            for (set, value) in value_sets.iter_mut().zip(values) {
                if !set.contains(value) {
                    set.insert(value.to_string());
                }
            }
        }

        Ok(Self {
            axes: value_sets.into_iter().map(AxisKeys::from_values).collect(),
        })
    }

    /// Number of axes.
    pub fn axis_count(&self) -> usize {
        self.axes.len()
    }

    /// One axis by position.
    pub fn axis(&self, index: usize) -> &AxisKeys {
        &self.axes[index]
    }

    /// Per-axis cardinalities, in axis order.
    pub fn dims(&self) -> Vec<usize> {
        self.axes.iter().map(AxisKeys::len).collect()
    }

    /// Total number of points in the Cartesian product of all axes.
    pub fn cardinality(&self) -> usize {
        self.axes.iter().map(AxisKeys::len).product()
    }

    /// Resolves a categorical tuple to its flat row-major coordinate.
    ///
    /// Fails on arity mismatch or on a value absent from its axis; both
    /// indicate the caller is indexing with records the axes were not
    /// built from.
    pub fn flat_index(&self, coords: &[&str]) -> Result<usize> {
        if coords.len() != self.axes.len() {
            bail!(
                "coordinate has {} components, expected {}",
                coords.len(),
                self.axes.len()
            );
        }

        let mut flat = 0usize;
        for (axis, value) in self.axes.iter().zip(coords) {
            let Some(index) = axis.index_of(value) else {
                bail!("value {value:?} not present in axis key set");
            };
            flat = flat * axis.len() + index;
        }
        Ok(flat)
    }

    /// Decomposes a flat coordinate back into per-axis values.
    pub fn coord_values(&self, mut flat: usize) -> Vec<&str> {
        let mut values = vec![""; self.axes.len()];
        for (slot, axis) in values.iter_mut().zip(&self.axes).rev() {
            *slot = axis.key_at(flat % axis.len());
            flat /= axis.len();
        }
        values
    }

    /// Builds a new set from a subset of axes, in the order given.
    ///
    /// Used when an axis has been summed out of a tensor and the
    /// remaining axes describe the reduced coordinate space.
    pub fn project(&self, keep: &[usize]) -> AxisSet {
        AxisSet {
            axes: keep.iter().map(|&i| self.axes[i].clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rec {
        state: String,
        district: String,
    }

    fn rec(state: &str, district: &str) -> Rec {
        Rec {
            state: state.to_string(),
            district: district.to_string(),
        }
    }

    fn sample_records() -> Vec<Rec> {
        vec![
            rec("Bayern", "LK Traunstein"),
            rec("Berlin", "SK Berlin Mitte"),
            rec("Bayern", "SK München"),
            rec("Bayern", "LK Traunstein"),
        ]
    }

    fn project(r: &Rec) -> Vec<&str> {
        vec![&r.state, &r.district]
    }

    #[test]
    fn test_axis_keys_sorted_and_distinct() {
        let records = sample_records();
        let axes = AxisSet::from_records(&records, 2, project).expect("build axes");

        assert_eq!(axes.axis(0).keys(), ["Bayern", "Berlin"]);
        assert_eq!(
            axes.axis(1).keys(),
            ["LK Traunstein", "SK Berlin Mitte", "SK München"]
        );
    }

    #[test]
    fn test_axis_build_is_deterministic() {
        let records = sample_records();
        let a = AxisSet::from_records(&records, 2, project).expect("build axes");
        let b = AxisSet::from_records(&records, 2, project).expect("build axes");

        for i in 0..2 {
            assert_eq!(a.axis(i).keys(), b.axis(i).keys());
        }
    }

    #[test]
    fn test_axis_build_rejects_wrong_arity() {
        let records = sample_records();
        let err = AxisSet::from_records(&records, 3, project).unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[test]
    fn test_flat_index_round_trip() {
        let records = sample_records();
        let axes = AxisSet::from_records(&records, 2, project).expect("build axes");

        assert_eq!(axes.cardinality(), 6);
        for flat in 0..axes.cardinality() {
            let values = axes.coord_values(flat);
            assert_eq!(axes.flat_index(&values).expect("known coordinate"), flat);
        }
    }

    #[test]
    fn test_flat_index_rejects_unknown_value() {
        let records = sample_records();
        let axes = AxisSet::from_records(&records, 2, project).expect("build axes");
        assert!(axes.flat_index(&["Sachsen", "LK Traunstein"]).is_err());
    }

    #[test]
    fn test_project_keeps_selected_axes() {
        let records = sample_records();
        let axes = AxisSet::from_records(&records, 2, project).expect("build axes");
        let reduced = axes.project(&[1]);

        assert_eq!(reduced.axis_count(), 1);
        assert_eq!(reduced.axis(0).keys(), axes.axis(1).keys());
    }
}
