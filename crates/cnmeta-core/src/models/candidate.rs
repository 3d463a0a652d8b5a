use serde::{Deserialize, Serialize};

/// One search hit: the detail-page URL and a one-line summary for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub url: String,
    pub summary: String,
}

/// Ordered mapping from detail-page URL to summary.
///
/// Keys are unique. Inserting an existing URL replaces its summary in place,
/// so the first occurrence keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateSet {
    entries: Vec<Candidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, summary: impl Into<String>) {
        let url = url.into();
        let summary = summary.into();
        match self.entries.iter_mut().find(|c| c.url == url) {
            Some(existing) => existing.summary = summary,
            None => self.entries.push(Candidate { url, summary }),
        }
    }

    pub fn get(&self, url: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|c| c.url == url)
            .map(|c| c.summary.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.entries.iter()
    }

    pub fn urls(&self) -> Vec<String> {
        self.entries.iter().map(|c| c.url.clone()).collect()
    }
}

impl FromIterator<(String, String)> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (url, summary) in iter {
            set.insert(url, summary);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_duplicate_overwrites_in_place() {
        let mut set = CandidateSet::new();
        set.insert("a", "first");
        set.insert("b", "second");
        set.insert("a", "third");

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("a"), Some("third"));
        assert_eq!(set.urls(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_collect_from_pairs() {
        let set: CandidateSet = vec![("x".to_string(), "X".to_string())].into_iter().collect();
        assert_eq!(set.get("x"), Some("X"));
        assert!(!set.is_empty());
    }
}
