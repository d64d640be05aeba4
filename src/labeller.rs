use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Hands out ids that are unique within one namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueLabeller {
    prefix: String,
    next: u64,
    used: BTreeSet<String>,
}

impl UniqueLabeller {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
            used: BTreeSet::new(),
        }
    }

    pub fn next_label(&mut self) -> String {
        loop {
            let candidate = format!("{}{}", self.prefix, self.next);
            self.next += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// The label `next_label` would hand out, without taking it.
    pub fn peek_label(&self) -> String {
        let mut next = self.next;
        loop {
            let candidate = format!("{}{}", self.prefix, next);
            if !self.used.contains(&candidate) {
                return candidate;
            }
            next += 1;
        }
    }

    /// Registers a caller-chosen label; false when it is already taken.
    pub fn add_existing_label(&mut self, label: &str) -> bool {
        self.used.insert(label.to_string())
    }

    /// Like `add_existing_label`, but an already registered label is fine.
    pub fn add_existing_legacy_label(&mut self, label: &str) {
        self.used.insert(label.to_string());
    }

    pub fn remove_label(&mut self, label: &str) -> bool {
        self.used.remove(label)
    }

    pub fn is_used(&self, label: &str) -> bool {
        self.used.contains(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_labels_registered_externally() {
        let mut labels = UniqueLabeller::new("n");
        assert!(labels.add_existing_label("n0"));
        assert!(!labels.add_existing_label("n0"));
        assert_eq!(labels.peek_label(), "n1");
        assert_eq!(labels.peek_label(), "n1");
        assert_eq!(labels.next_label(), "n1");
        assert!(labels.remove_label("n0"));
        assert!(!labels.is_used("n0"));
    }
}
