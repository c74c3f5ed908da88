//! Bounded access history and the successor prediction table derived from it.

use crate::request::{EndpointId, Params};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};

/// One observed call.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub endpoint: EndpointId,
    pub params: Params,
    pub timestamp: DateTime<Utc>,
}

impl AccessRecord {
    pub fn new(endpoint: EndpointId, params: Params) -> Self {
        Self {
            endpoint,
            params,
            timestamp: Utc::now(),
        }
    }
}

/// A likely next endpoint after some predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub endpoint: EndpointId,
    /// Share of observed successors that were this endpoint (0.0 to 1.0).
    pub probability: f64,
    /// Times this endpoint directly followed the predecessor.
    pub count: usize,
    /// Parameters of the most recent observed call to this endpoint as a
    /// successor.
    pub params: Params,
}

/// Access history plus the predictions computed from consecutive pairs.
///
/// Rows are kept in sync with the bounded history: appending or evicting a
/// record recomputes exactly the rows whose pair counts changed.
#[derive(Debug)]
pub struct PredictionModel {
    max_history: usize,
    history: VecDeque<AccessRecord>,
    table: HashMap<EndpointId, Vec<Prediction>>,
}

impl PredictionModel {
    /// Creates an empty model. A `max_history` of zero is treated as one.
    pub fn new(max_history: usize) -> Self {
        let max_history = max_history.max(1);
        Self {
            max_history,
            history: VecDeque::with_capacity(max_history),
            table: HashMap::new(),
        }
    }

    /// Appends a record and refreshes the affected rows.
    pub fn track(&mut self, record: AccessRecord) {
        let mut dirty = HashSet::new();
        dirty.insert(record.endpoint.clone());
        if let Some(previous) = self.history.back() {
            dirty.insert(previous.endpoint.clone());
        }

        self.history.push_back(record);
        while self.history.len() > self.max_history {
            if let Some(evicted) = self.history.pop_front() {
                dirty.insert(evicted.endpoint);
            }
        }

        for endpoint in dirty {
            self.recompute(endpoint);
        }
    }

    fn recompute(&mut self, predecessor: EndpointId) {
        // successor -> (count, params of latest occurrence)
        let mut successors: HashMap<&EndpointId, (usize, &Params)> = HashMap::new();
        let mut total = 0usize;

        for (current, next) in self.history.iter().zip(self.history.iter().skip(1)) {
            if current.endpoint != predecessor {
                continue;
            }
            total += 1;
            let slot = successors.entry(&next.endpoint).or_insert((0, &next.params));
            slot.0 += 1;
            slot.1 = &next.params;
        }

        if total == 0 {
            self.table.remove(&predecessor);
            return;
        }

        let mut row: Vec<Prediction> = successors
            .into_iter()
            .map(|(endpoint, (count, params))| Prediction {
                endpoint: endpoint.clone(),
                probability: count as f64 / total as f64,
                count,
                params: params.clone(),
            })
            .collect();
        row.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.endpoint.cmp(&b.endpoint))
        });

        self.table.insert(predecessor, row);
    }

    /// Returns the predictions for `endpoint`, most likely first.
    pub fn predictions(&self, endpoint: &EndpointId) -> &[Prediction] {
        self.table.get(endpoint).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    /// Iterates over the history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &AccessRecord> {
        self.history.iter()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.table.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn track_all(model: &mut PredictionModel, endpoints: &[&str]) {
        for (i, endpoint) in endpoints.iter().enumerate() {
            model.track(AccessRecord::new(
                EndpointId::new(*endpoint),
                json!({ "seq": i }),
            ));
        }
    }

    fn row(model: &PredictionModel, endpoint: &str) -> Vec<(String, f64, usize)> {
        model
            .predictions(&EndpointId::new(endpoint))
            .iter()
            .map(|p| (p.endpoint.to_string(), p.probability, p.count))
            .collect()
    }

    #[test]
    fn test_successor_probabilities() {
        let mut model = PredictionModel::new(100);
        track_all(&mut model, &["A", "B", "A", "B", "A", "C"]);

        let a = row(&model, "A");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].0, "B");
        assert!((a[0].1 - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(a[0].2, 2);
        assert_eq!(a[1].0, "C");
        assert!((a[1].1 - 1.0 / 3.0).abs() < 1e-9);

        assert_eq!(row(&model, "B"), vec![("A".to_string(), 1.0, 2)]);
        assert!(row(&model, "C").is_empty());
    }

    #[test]
    fn test_prediction_keeps_latest_params() {
        let mut model = PredictionModel::new(100);
        track_all(&mut model, &["A", "B", "A", "B"]);

        let predictions = model.predictions(&EndpointId::new("A"));
        assert_eq!(predictions[0].params, json!({ "seq": 3 }));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut model = PredictionModel::new(3);
        track_all(&mut model, &["A", "B", "C", "D", "E"]);

        assert_eq!(model.history_len(), 3);
        let endpoints: Vec<_> = model.history().map(|r| r.endpoint.to_string()).collect();
        assert_eq!(endpoints, vec!["C", "D", "E"]);
    }

    #[test]
    fn test_eviction_updates_rows() {
        let mut model = PredictionModel::new(3);
        track_all(&mut model, &["A", "B", "C"]);
        assert_eq!(row(&model, "A").len(), 1);

        // Evicts A, so the pair A -> B no longer exists
        track_all(&mut model, &["D"]);
        assert!(row(&model, "A").is_empty());
        assert_eq!(row(&model, "C"), vec![("D".to_string(), 1.0, 1)]);
    }

    #[test]
    fn test_ties_sorted_by_name() {
        let mut model = PredictionModel::new(100);
        track_all(&mut model, &["A", "Z", "A", "M"]);

        let names: Vec<_> = row(&model, "A").into_iter().map(|r| r.0).collect();
        assert_eq!(names, vec!["M", "Z"]);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        let mut model = PredictionModel::new(0);
        track_all(&mut model, &["A", "B"]);
        assert_eq!(model.history_len(), 1);
        assert_eq!(model.max_history(), 1);
    }
}
