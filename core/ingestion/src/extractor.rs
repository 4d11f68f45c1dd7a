use idea_graph_schemas::ExtractionResult;

/// What to do with one analysis result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Thread-starter inviting others to share; nothing to extract
    Meta,
    /// No scored candidate and no product
    Empty,
    Usable,
}

pub fn classify(result: &ExtractionResult) -> Classification {
    if result.is_meta {
        Classification::Meta
    } else if result.is_empty() {
        Classification::Empty
    } else {
        Classification::Usable
    }
}

/// Case-insensitive substring match against the configured sharing phrases
pub fn is_sharing_post(title: &str, keywords: &[String]) -> bool {
    let title = title.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .any(|k| !k.is_empty() && title.contains(&k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use idea_graph_schemas::{IdeaCandidate, ProblemCandidate, ProductCandidate};

    #[test]
    fn test_meta_wins_over_scores() {
        let result = ExtractionResult {
            is_meta: true,
            problem: ProblemCandidate {
                score: 90,
                ..Default::default()
            },
            idea: IdeaCandidate {
                score: 80,
                ..Default::default()
            },
            products: vec![],
        };
        assert_eq!(classify(&result), Classification::Meta);
    }

    #[test]
    fn test_empty_and_usable() {
        assert_eq!(classify(&ExtractionResult::default()), Classification::Empty);

        let idea_only = ExtractionResult {
            idea: IdeaCandidate {
                score: 5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(classify(&idea_only), Classification::Usable);

        let product_only = ExtractionResult {
            products: vec![ProductCandidate::default()],
            ..Default::default()
        };
        assert_eq!(classify(&product_only), Classification::Usable);
    }

    #[test]
    fn test_sharing_keywords() {
        let keywords = vec!["share your startup".to_string(), "Showcase".to_string()];

        assert!(is_sharing_post("Weekly thread: SHARE YOUR STARTUP here", &keywords));
        assert!(is_sharing_post("Monday showcase", &keywords));
        assert!(!is_sharing_post("My invoicing tool failed", &keywords));
        assert!(!is_sharing_post("anything", &[String::new()]));
    }
}
