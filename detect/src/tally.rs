//! Per-image detection counts.

use crate::common::*;

/// One counter per configured label, in label order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    counts: IndexMap<String, usize>,
}

impl Tally {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            counts: labels.into_iter().map(|label| (label.into(), 0)).collect(),
        }
    }

    pub fn from_detections<'a, I, S, D>(labels: I, detections: D) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        D: IntoIterator<Item = &'a Detection>,
    {
        let mut tally = Self::new(labels);
        detections.into_iter().for_each(|detection| {
            tally.record(&detection.label);
        });
        tally
    }

    /// Count one detection. Returns false if the label is not configured.
    pub fn record(&mut self, label: &str) -> bool {
        match self.counts.get_mut(label) {
            Some(count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    pub fn count(&self, label: &str) -> usize {
        self.counts.get(label).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts
            .iter()
            .map(|(label, &count)| (label.as_str(), count))
    }

    /// Whether every configured label was seen at least once.
    pub fn all_present(&self) -> bool {
        !self.counts.is_empty() && self.counts.values().all(|&count| count >= 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [&str; 5] = ["T", "C", "L", "NM", "NB"];

    fn detection(label: &str) -> Detection {
        Detection {
            rect: TLBR::from_tlhw([0.0, 0.0, 1.0, 1.0]),
            label: label.to_string(),
            confidence: 1.0,
        }
    }

    #[test]
    fn count_exact_labels() {
        let detections: Vec<_> = ["T", "T", "C", "NM", "N", "t", "NBX", "", "L"]
            .iter()
            .map(|label| detection(label))
            .collect();
        let tally = Tally::from_detections(LABELS, &detections);

        let counts: Vec<_> = tally.iter().collect();
        assert_eq!(
            counts,
            [("T", 2), ("C", 1), ("L", 1), ("NM", 1), ("NB", 0)]
        );
        assert_eq!(tally.count("N"), 0);
        assert!(!tally.all_present());
    }

    #[test]
    fn unknown_labels_are_rejected() {
        let mut tally = Tally::new(LABELS);
        assert!(!tally.record("X"));
        assert!(tally.record("NB"));
        assert_eq!(tally.iter().map(|(_, count)| count).sum::<usize>(), 1);
    }

    #[test]
    fn all_present_iff_every_label_seen() {
        let mut detections: Vec<_> = LABELS.iter().map(|label| detection(label)).collect();
        assert!(Tally::from_detections(LABELS, &detections).all_present());

        detections.retain(|det| det.label != "L");
        detections.push(detection("T"));
        assert!(!Tally::from_detections(LABELS, &detections).all_present());
    }

    #[test]
    fn images_are_counted_independently() {
        let first: Vec<_> = ["T", "T", "C"].iter().map(|label| detection(label)).collect();
        let second = vec![detection("L")];

        let first_tally = Tally::from_detections(LABELS, &first);
        let second_tally = Tally::from_detections(LABELS, &second);

        assert_eq!(
            first_tally.iter().collect::<Vec<_>>(),
            [("T", 2), ("C", 1), ("L", 0), ("NM", 0), ("NB", 0)]
        );
        assert_eq!(
            second_tally.iter().collect::<Vec<_>>(),
            [("T", 0), ("C", 0), ("L", 1), ("NM", 0), ("NB", 0)]
        );
    }

    #[test]
    fn empty_label_set_is_never_complete() {
        assert!(!Tally::new(Vec::<String>::new()).all_present());
    }
}
