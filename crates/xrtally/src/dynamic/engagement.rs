//! Engagement intervals on dynamic objects.
//!
//! Each engagement is stored once per object with an `is_active` flag; the
//! active view is derived from it. Occurrence counters live apart from the
//! events so pruning ended engagements never rewinds them.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct EngagementEvent {
    pub object_id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub is_active: bool,
    pub start_time: f64,
    pub engagement_number: u32,
    /// Seconds between begin and end, set when the engagement ends
    pub end_time: Option<f64>,
}

/// Engagement as it appears inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementSummary {
    #[serde(rename = "engagementtype")]
    pub engagement_type: String,
    #[serde(rename = "engagementparent", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub engagement_count: u32,
    pub engagement_time: f64,
}

#[derive(Debug, Default)]
pub struct EngagementBook {
    counters: HashMap<(String, String), u32>,
    events: HashMap<String, Vec<EngagementEvent>>,
}

impl EngagementBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an engagement and return its occurrence number.
    pub fn begin(&mut self, object_id: &str, name: &str, parent_id: Option<&str>, now: f64) -> u32 {
        let counter = self
            .counters
            .entry((object_id.to_string(), name.to_string()))
            .or_insert(0);
        *counter += 1;
        let number = *counter;

        self.events
            .entry(object_id.to_string())
            .or_default()
            .push(EngagementEvent {
                object_id: object_id.to_string(),
                name: name.to_string(),
                parent_id: parent_id.map(str::to_string),
                is_active: true,
                start_time: now,
                engagement_number: number,
                end_time: None,
            });
        number
    }

    /// Close the first matching open engagement. With no match, one is opened
    /// and closed on the spot.
    pub fn end(&mut self, object_id: &str, name: &str, parent_id: Option<&str>, now: f64) {
        if self.close_match(object_id, name, parent_id, now) {
            return;
        }

        warn!(
            object_id,
            engagement = name,
            "ending engagement that was never begun"
        );
        self.begin(object_id, name, parent_id, now);
        self.close_match(object_id, name, parent_id, now);
    }

    fn close_match(&mut self, object_id: &str, name: &str, parent_id: Option<&str>, now: f64) -> bool {
        let Some(events) = self.events.get_mut(object_id) else {
            return false;
        };
        let found = events.iter_mut().find(|e| {
            e.is_active
                && e.name == name
                && parent_id.map_or(true, |p| e.parent_id.as_deref() == Some(p))
        });
        match found {
            Some(event) => {
                event.is_active = false;
                event.end_time = Some(now - event.start_time);
                true
            }
            None => false,
        }
    }

    /// Close every open engagement on the object. Returns how many closed.
    pub fn end_all(&mut self, object_id: &str, now: f64) -> usize {
        let Some(events) = self.events.get_mut(object_id) else {
            return 0;
        };
        let mut closed = 0;
        for event in events.iter_mut().filter(|e| e.is_active) {
            event.is_active = false;
            event.end_time = Some(now - event.start_time);
            closed += 1;
        }
        closed
    }

    pub fn has_history(&self, object_id: &str) -> bool {
        self.events.get(object_id).is_some_and(|e| !e.is_empty())
    }

    /// Summaries of every engagement on the object, then drop the ended ones.
    pub fn summarize_and_prune(&mut self, object_id: &str, now: f64) -> Vec<EngagementSummary> {
        let Some(events) = self.events.get_mut(object_id) else {
            return Vec::new();
        };

        let summaries = events
            .iter()
            .map(|e| EngagementSummary {
                engagement_type: e.name.clone(),
                parent_id: e.parent_id.clone(),
                engagement_count: e.engagement_number,
                engagement_time: e.end_time.unwrap_or(now - e.start_time),
            })
            .collect();

        events.retain(|e| e.is_active);
        if events.is_empty() {
            self.events.remove(object_id);
        }
        summaries
    }

    pub fn active(&self, object_id: &str) -> Vec<EngagementEvent> {
        self.events
            .get(object_id)
            .map(|events| events.iter().filter(|e| e.is_active).cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self, object_id: &str) -> Vec<EngagementEvent> {
        self.events.get(object_id).cloned().unwrap_or_default()
    }

    /// Occurrences of `name` on the object this session.
    pub fn count(&self, object_id: &str, name: &str) -> u32 {
        self.counters
            .get(&(object_id.to_string(), name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.counters.clear();
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_end_pairs() {
        let mut book = EngagementBook::new();
        assert_eq!(book.begin("cube", "grab", None, 10.0), 1);
        assert_eq!(book.active("cube").len(), 1);

        book.end("cube", "grab", None, 12.5);
        assert!(book.active("cube").is_empty());
        let all = book.all("cube");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].end_time, Some(2.5));
    }

    #[test]
    fn test_end_matches_parent_when_given() {
        let mut book = EngagementBook::new();
        book.begin("cube", "grab", Some("left"), 0.0);
        book.begin("cube", "grab", Some("right"), 0.0);

        book.end("cube", "grab", Some("right"), 1.0);
        let active = book.active("cube");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].parent_id.as_deref(), Some("left"));
    }

    #[test]
    fn test_unmatched_end_auto_pairs() {
        let mut book = EngagementBook::new();
        book.end("cube", "look", None, 5.0);

        let all = book.all("cube");
        assert_eq!(all.len(), 1);
        assert!(!all[0].is_active);
        assert_eq!(all[0].end_time, Some(0.0));
        assert_eq!(book.count("cube", "look"), 1);
    }

    #[test]
    fn test_counters_survive_pruning() {
        let mut book = EngagementBook::new();
        book.begin("cube", "grab", None, 0.0);
        book.end("cube", "grab", None, 1.0);
        book.begin("cube", "grab", None, 2.0);

        let summaries = book.summarize_and_prune("cube", 4.0);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].engagement_time, 1.0);
        assert_eq!(summaries[1].engagement_count, 2);
        assert_eq!(summaries[1].engagement_time, 2.0);

        // Ended engagement pruned, open one kept
        assert_eq!(book.all("cube").len(), 1);
        assert_eq!(book.begin("cube", "grab", None, 5.0), 3);
    }

    #[test]
    fn test_end_all_and_reset() {
        let mut book = EngagementBook::new();
        book.begin("cube", "grab", None, 0.0);
        book.begin("cube", "look", None, 0.0);
        assert_eq!(book.end_all("cube", 3.0), 2);
        assert!(book.active("cube").is_empty());

        book.reset();
        assert!(!book.has_history("cube"));
        assert_eq!(book.count("cube", "grab"), 0);
    }
}
