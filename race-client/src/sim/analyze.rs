//! Simulated `analyzeShardKey`.
//!
//! Phases, each re-resolving the collection against the identity it started
//! with:
//! 1. resolve the namespace
//! 2. pause point: key characteristics
//! 3. batched scan of the shard key values
//! 4. pause point: read/write distribution
//! 5. split point generation and (empty) query sample metrics

use ddl_race_types::{CollectionUuid, CommandFailure, ErrorCode, Namespace, ShardKey};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{SimServer, Step};
use crate::{KEY_CHARACTERISTICS_FAIL_POINT, READ_WRITE_DISTRIBUTION_FAIL_POINT};

/// Correlation above which a shard key counts as monotonic.
const MONOTONICITY_THRESHOLD: f64 = 0.7;

/// Number of most common values reported.
const MOST_COMMON_VALUES: usize = 5;

/// One scanned document: its shard key value and size.
struct Scanned {
    key: Value,
    size: usize,
}

impl SimServer {
    pub(super) async fn analyze_shard_key(&self, ns: &Namespace, key: &ShardKey) -> Step<Value> {
        let uuid = self.resolve(ns, None)?;
        tracing::debug!(%ns, %uuid, key = %key.to_document(), "analyzeShardKey resolved collection");

        self.pause_at(KEY_CHARACTERISTICS_FAIL_POINT, ns).await?;
        self.resolve(ns, Some(uuid))?;
        let scanned = self.scan(ns, uuid, key).await?;
        let key_characteristics = key_characteristics(&scanned);

        self.pause_at(READ_WRITE_DISTRIBUTION_FAIL_POINT, ns).await?;
        self.resolve(ns, Some(uuid))?;
        self.generate_split_points(ns, key)?;

        Ok(json!({
            "keyCharacteristics": key_characteristics,
            "readDistribution": {
                "sampleSize": {"total": 0, "find": 0, "aggregate": 0, "count": 0, "distinct": 0},
            },
            "writeDistribution": {
                "sampleSize": {"total": 0, "update": 0, "delete": 0, "findAndModify": 0},
            },
            "ok": 1,
        }))
    }

    /// Scan the collection in batches, yielding between them. The scan dies if
    /// the collection it started on is dropped, renamed away or replaced.
    async fn scan(&self, ns: &Namespace, uuid: CollectionUuid, key: &ShardKey) -> Step<Vec<Scanned>> {
        let batch_size = self.options.scan_batch_size.max(1);
        let mut scanned: Vec<Scanned> = Vec::new();
        loop {
            self.ensure_up(self.data_host)?;
            let batch: Vec<Scanned> = {
                let catalog = self.catalog();
                match catalog.get(ns) {
                    Some(coll) if coll.uuid == uuid => coll
                        .docs
                        .iter()
                        .skip(scanned.len())
                        .take(batch_size)
                        .map(|doc| Scanned {
                            key: key.extract(doc),
                            size: doc.to_string().len(),
                        })
                        .collect(),
                    _ => {
                        return Err(CommandFailure::new(
                            ErrorCode::QueryPlanKilled,
                            format!("collection {} dropped or renamed during scan", ns),
                        )
                        .into())
                    }
                }
            };
            if batch.is_empty() {
                break;
            }
            scanned.extend(batch);
            self.yield_for_work().await;
        }

        if scanned.is_empty() {
            return Err(CommandFailure::new(
                ErrorCode::IllegalOperation,
                format!("cannot analyze a shard key for the empty collection {}", ns),
            )
            .into());
        }
        Ok(scanned)
    }

    /// Split points need enough distinct shard key values per range.
    fn generate_split_points(&self, ns: &Namespace, key: &ShardKey) -> Step<()> {
        let distinct = {
            let catalog = self.catalog();
            let docs = catalog.get(ns).map(|c| c.docs.as_slice()).unwrap_or_default();
            frequencies(docs.iter().map(|doc| key.extract(doc))).len() as u64
        };
        let required = self.options.analyze_num_ranges * self.options.samples_per_split_point;
        if distinct < required {
            return Err(CommandFailure::new(
                ErrorCode::InsufficientDistinctValues,
                format!(
                    "cannot generate {} split points for {}: only {} distinct shard key values, need {}",
                    self.options.analyze_num_ranges, ns, distinct, required
                ),
            )
            .into());
        }
        Ok(())
    }
}

/// Distinct values with their counts, in first-seen order.
fn frequencies(values: impl Iterator<Item = Value>) -> Vec<(Value, u64)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<(Value, u64)> = Vec::new();
    for value in values {
        match index.get(&value.to_string()) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(value.to_string(), counts.len());
                counts.push((value, 1));
            }
        }
    }
    counts
}

fn key_characteristics(scanned: &[Scanned]) -> Value {
    let num_docs = scanned.len() as u64;
    let mut counts = frequencies(scanned.iter().map(|s| s.key.clone()));
    let num_distinct = counts.len() as u64;
    let avg_doc_size = scanned.iter().map(|s| s.size).sum::<usize>() as u64 / num_docs.max(1);

    // Stable sort keeps first-seen order among ties.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let most_common: Vec<Value> = counts
        .iter()
        .take(MOST_COMMON_VALUES)
        .map(|(value, frequency)| json!({"value": value, "frequency": frequency}))
        .collect();

    json!({
        "numDocs": num_docs,
        "isUnique": num_distinct == num_docs,
        "numDistinctValues": num_distinct,
        "mostCommonValues": most_common,
        "monotonicity": monotonicity(scanned),
        "avgDocSizeBytes": avg_doc_size,
    })
}

/// Correlation between record id order and shard key order. Only numeric
/// keys are ranked.
fn monotonicity(scanned: &[Scanned]) -> Value {
    let keys: Option<Vec<f64>> = scanned.iter().map(|s| s.key.as_f64()).collect();
    let coefficient = keys.and_then(|keys| {
        let record_ids: Vec<f64> = (0..keys.len()).map(|i| i as f64).collect();
        pearson(&record_ids, &keys)
    });
    match coefficient {
        Some(r) => {
            let kind = if r.abs() >= MONOTONICITY_THRESHOLD {
                "monotonic"
            } else {
                "not monotonic"
            };
            json!({"recordIdCorrelationCoefficient": r, "type": kind})
        }
        None => json!({"type": "unknown"}),
    }
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return None;
    }
    let mean = |v: &[f64]| v.iter().sum::<f64>() / n as f64;
    let (mx, my) = (mean(xs), mean(ys));
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}
