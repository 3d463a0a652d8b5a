use cnmeta_core::{CandidateSelector, CandidateSet};
use tracing::info;

/// How a search's candidates narrowed down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The search returned nothing.
    NoCandidates,
    /// There were candidates but the user picked none.
    Declined,
    /// URLs to convert, in the order the user gave them.
    Chosen(Vec<String>),
}

/// A single candidate is taken without asking; two or more go to `selector`.
pub async fn disambiguate(candidates: &CandidateSet, selector: &dyn CandidateSelector) -> Selection {
    match candidates.len() {
        0 => Selection::NoCandidates,
        1 => Selection::Chosen(candidates.urls()),
        n => {
            info!("prompting for {n} candidates");
            let picked = selector
                .prompt_selection(candidates)
                .await
                .unwrap_or_default()
                .into_iter()
                .filter(|url| candidates.get(url).is_some())
                .collect::<Vec<_>>();
            if picked.is_empty() {
                Selection::Declined
            } else {
                Selection::Chosen(picked)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers with a fixed choice and remembers what it was shown.
    struct Scripted {
        answer: Option<Vec<String>>,
        shown: Mutex<Vec<CandidateSet>>,
    }

    impl Scripted {
        fn new(answer: Option<Vec<&str>>) -> Self {
            Self {
                answer: answer.map(|urls| urls.into_iter().map(String::from).collect()),
                shown: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<CandidateSet> {
            self.shown.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CandidateSelector for Scripted {
        async fn prompt_selection(&self, candidates: &CandidateSet) -> Option<Vec<String>> {
            self.shown.lock().unwrap().push(candidates.clone());
            self.answer.clone()
        }
    }

    fn set(urls: &[&str]) -> CandidateSet {
        urls.iter()
            .map(|u| (u.to_string(), format!("{u} | author")))
            .collect()
    }

    #[tokio::test]
    async fn zero_candidates_never_prompt() {
        let selector = Scripted::new(Some(vec!["a"]));
        assert_eq!(disambiguate(&set(&[]), &selector).await, Selection::NoCandidates);
        assert!(selector.prompts().is_empty());
    }

    #[tokio::test]
    async fn single_candidate_is_auto_selected() {
        let selector = Scripted::new(None);
        assert_eq!(
            disambiguate(&set(&["a"]), &selector).await,
            Selection::Chosen(vec!["a".into()])
        );
        assert!(selector.prompts().is_empty());
    }

    #[tokio::test]
    async fn several_candidates_prompt_with_all_entries() {
        let selector = Scripted::new(Some(vec!["c", "a"]));
        let candidates = set(&["a", "b", "c"]);
        assert_eq!(
            disambiguate(&candidates, &selector).await,
            Selection::Chosen(vec!["c".into(), "a".into()])
        );
        assert_eq!(selector.prompts(), vec![candidates]);
    }

    #[tokio::test]
    async fn closing_or_empty_choice_is_declined() {
        let closed = Scripted::new(None);
        assert_eq!(disambiguate(&set(&["a", "b"]), &closed).await, Selection::Declined);

        let empty = Scripted::new(Some(vec![]));
        assert_eq!(disambiguate(&set(&["a", "b"]), &empty).await, Selection::Declined);

        let unknown = Scripted::new(Some(vec!["zzz"]));
        assert_eq!(disambiguate(&set(&["a", "b"]), &unknown).await, Selection::Declined);
    }
}
