//! Partition splitting

use crate::data::Batch;
use crate::feed::Record;
use std::collections::BTreeMap;

/// Group drained records into one batch per partition date.
///
/// Batches come back in ascending partition order; records keep their
/// drain order within each batch.
pub fn split_by_partition(records: Vec<Record>) -> Vec<Batch> {
    let mut partitions: BTreeMap<_, Vec<Record>> = BTreeMap::new();
    for record in records {
        partitions
            .entry(record.partition_key())
            .or_default()
            .push(record);
    }

    partitions
        .into_iter()
        .map(|(partition, records)| Batch { partition, records })
        .collect()
}
