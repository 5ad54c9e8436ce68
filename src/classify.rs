use std::sync::{Arc, Mutex};

use regex::{Regex, RegexBuilder};
use tracing::debug;

/// Compiles one pattern source the way every classifier matcher is compiled:
/// case-insensitive, otherwise default regex syntax.
pub fn compile_pattern(source: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(source).case_insensitive(true).build()
}

/// Compiled include/exclude matcher sets deciding whether an endpoint counts
/// as API traffic.
#[derive(Debug)]
pub struct Classifier {
    includes: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl Classifier {
    /// Compiles the configured pattern sources. A source that fails to
    /// compile is dropped without affecting the rest; a bad pattern must
    /// never take classification down.
    pub fn compile(include_sources: &[String], exclude_sources: &[String]) -> Self {
        Self {
            includes: compile_all(include_sources, "include"),
            excludes: compile_all(exclude_sources, "exclude"),
        }
    }

    /// An endpoint is API traffic when it matches some include pattern (an
    /// empty include set admits everything) and no exclude pattern. Exclude
    /// wins over include.
    pub fn is_api_endpoint(&self, endpoint: &str) -> bool {
        let included = self.includes.is_empty()
            || self.includes.iter().any(|regex| regex.is_match(endpoint));
        let excluded = self.excludes.iter().any(|regex| regex.is_match(endpoint));
        included && !excluded
    }
}

fn compile_all(sources: &[String], kind: &str) -> Vec<Regex> {
    sources
        .iter()
        .filter_map(|source| match compile_pattern(source) {
            Ok(regex) => Some(regex),
            Err(err) => {
                debug!(kind, pattern = %source, error = %err, "dropping invalid pattern");
                None
            }
        })
        .collect()
}

/// Caches the compiled classifier across events, recompiling only when the
/// pattern sources actually change. Settings are re-read per event, so
/// without this every event would pay regex compilation.
#[derive(Debug, Default)]
pub struct ClassifierCache {
    inner: Mutex<Option<CachedClassifier>>,
}

#[derive(Debug)]
struct CachedClassifier {
    include_sources: Vec<String>,
    exclude_sources: Vec<String>,
    classifier: Arc<Classifier>,
}

impl ClassifierCache {
    pub fn classifier_for(
        &self,
        include_sources: &[String],
        exclude_sources: &[String],
    ) -> Arc<Classifier> {
        let mut cached = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(entry) = cached.as_ref() {
            if entry.include_sources == include_sources && entry.exclude_sources == exclude_sources
            {
                return Arc::clone(&entry.classifier);
            }
        }

        let classifier = Arc::new(Classifier::compile(include_sources, exclude_sources));
        *cached = Some(CachedClassifier {
            include_sources: include_sources.to_vec(),
            exclude_sources: exclude_sources.to_vec(),
            classifier: Arc::clone(&classifier),
        });
        classifier
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Classifier, ClassifierCache};

    fn patterns(sources: &[&str]) -> Vec<String> {
        sources.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn empty_include_set_admits_everything() {
        let classifier = Classifier::compile(&[], &[]);
        assert!(classifier.is_api_endpoint("https://x.com/anything"));
    }

    #[test]
    fn include_match_is_required_when_includes_exist() {
        let classifier = Classifier::compile(&patterns(&["/api/"]), &[]);
        assert!(classifier.is_api_endpoint("https://x.com/api/users"));
        assert!(!classifier.is_api_endpoint("https://x.com/static/logo"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let classifier = Classifier::compile(&patterns(&["/api/"]), &patterns(&[r"\.js$"]));
        assert!(classifier.is_api_endpoint("https://x.com/api/users"));
        assert!(!classifier.is_api_endpoint("https://x.com/api/bundle.js"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let classifier = Classifier::compile(&patterns(&["/API/"]), &[]);
        assert!(classifier.is_api_endpoint("https://x.com/api/users"));
    }

    #[test]
    fn invalid_pattern_is_dropped_without_breaking_the_rest() {
        let classifier = Classifier::compile(&patterns(&["[unclosed", "/api/"]), &[]);
        assert!(classifier.is_api_endpoint("https://x.com/api/users"));
        assert!(!classifier.is_api_endpoint("https://x.com/other"));
    }

    #[test]
    fn cache_reuses_compiled_set_until_sources_change() {
        let cache = ClassifierCache::default();
        let includes = patterns(&["/api/"]);

        let first = cache.classifier_for(&includes, &[]);
        let second = cache.classifier_for(&includes, &[]);
        assert!(Arc::ptr_eq(&first, &second));

        let third = cache.classifier_for(&patterns(&["/v2/"]), &[]);
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.is_api_endpoint("https://x.com/v2/users"));
    }
}
