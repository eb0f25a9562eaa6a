use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Deserialize;

/// One raw event record as produced by an upstream source decoder.
///
/// The engine does not care where records come from; it only needs a
/// calendar day, an ordered tuple of categorical values and one numeric
/// value per metric channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventRecord {
    /// Calendar day the event is attributed to.
    pub date: NaiveDate,

    /// Categorical coordinate, one value per aggregation axis, in the
    /// axis order declared by the run configuration.
    pub axes: Vec<String>,

    /// One count per metric channel.
    pub values: Vec<f64>,
}

/// Groups records by calendar day.
///
/// The returned map is ordered, so the first and last keys give the
/// tensor's day span.
pub fn bin_by_date(records: Vec<EventRecord>) -> BTreeMap<NaiveDate, Vec<EventRecord>> {
    let mut bins: BTreeMap<NaiveDate, Vec<EventRecord>> = BTreeMap::new();
    for record in records {
        bins.entry(record.date).or_default().push(record);
    }
    bins
}
