// ABOUTME: Fuzzy resolution of user-supplied table and field names to canonical handles
// ABOUTME: Scores candidates with Jaro-Winkler and Levenshtein similarity from strsim

use crate::config::EtlConfig;
use crate::error::{EtlError, Result};
use std::collections::BTreeMap;
use strsim::{jaro_winkler, normalized_levenshtein};

/// Outcome of resolving a fuzzy name
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Canonical name of the best candidate
    pub handle: String,
    /// Similarity on a 0-100 scale
    pub score: f64,
    /// Whether `score` reached the resolver's cutoff
    pub confident: bool,
}

/// Maps a fuzzy or partial name to a canonical handle.
///
/// A low-confidence result is still returned as a best guess; whether that is fatal
/// is the caller's decision.
pub trait SchemaResolver {
    fn resolve(&self, name: &str) -> Option<Resolution>;
}

/// Similarity of two names on a 0-100 scale, case-insensitive
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    100.0 * jaro_winkler(&a, &b).max(normalized_levenshtein(&a, &b))
}

/// Resolver over a fixed list of candidate names (tables of a database, fields of a table)
#[derive(Debug, Clone)]
pub struct FuzzyResolver {
    candidates: Vec<String>,
    score_cutoff: f64,
    root_preference: f64,
    synonyms: BTreeMap<String, Vec<String>>,
}

impl FuzzyResolver {
    pub fn new<S: Into<String>>(candidates: impl IntoIterator<Item = S>) -> Self {
        Self {
            candidates: candidates.into_iter().map(Into::into).collect(),
            score_cutoff: 50.0,
            root_preference: 1.02,
            synonyms: BTreeMap::new(),
        }
    }

    /// Resolver tuned by the cutoff, root preference and synonym table of `config`
    pub fn from_config<S: Into<String>>(
        candidates: impl IntoIterator<Item = S>,
        config: &EtlConfig,
    ) -> Self {
        Self::new(candidates)
            .with_cutoff(config.score_cutoff)
            .with_root_preference(config.root_preference)
            .with_synonyms(config.synonyms.clone())
    }

    pub fn with_cutoff(mut self, score_cutoff: f64) -> Self {
        self.score_cutoff = score_cutoff;
        self
    }

    pub fn with_root_preference(mut self, root_preference: f64) -> Self {
        self.root_preference = root_preference;
        self
    }

    pub fn with_synonyms(mut self, synonyms: BTreeMap<String, Vec<String>>) -> Self {
        self.synonyms = synonyms;
        self
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Highest scoring candidate regardless of the cutoff; ties keep the earlier candidate
    pub fn best_match(&self, name: &str) -> Option<(String, f64)> {
        let mut best: Option<(&String, f64)> = None;
        for candidate in &self.candidates {
            let score = similarity(name, candidate);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((candidate, score));
            }
        }
        best.map(|(c, s)| (c.clone(), s))
    }

    /// Best candidate scoring at least the cutoff
    pub fn find_field(&self, name: &str) -> Option<String> {
        self.best_match(name)
            .filter(|(_, score)| *score >= self.score_cutoff)
            .map(|(handle, _)| handle)
    }

    /// Resolve several names; unresolved names become `None` when `pad_with_none`
    /// is set and are dropped otherwise
    pub fn find_fields<S: AsRef<str>>(&self, names: &[S], pad_with_none: bool) -> Vec<Option<String>> {
        names
            .iter()
            .map(|n| self.find_field(n.as_ref()))
            .filter(|m| pad_with_none || m.is_some())
            .collect()
    }

    /// Resolve `name` or any of its synonyms.
    ///
    /// Candidates are tried in order: the name itself, then its synonyms. A later
    /// match replaces the current best only when it scores more than
    /// `root_preference` times the best score, so the literal name wins near-ties.
    pub fn find_synonymous_field(&self, name: &str) -> Option<String> {
        let mut best: Option<(String, f64)> = None;
        for alias in self.aliases(name) {
            let Some((handle, score)) = self.best_match(&alias) else {
                continue;
            };
            if score < self.score_cutoff {
                continue;
            }
            let replace = match &best {
                None => true,
                Some((_, best_score)) => score > self.root_preference * best_score,
            };
            if replace {
                tracing::debug!("'{}' matched '{}' (score {:.1})", alias, handle, score);
                best = Some((handle, score));
            }
        }
        best.map(|(handle, _)| handle)
    }

    /// Like [`Self::find_field`] but a miss is a `LookupAmbiguous` error carrying the best guess
    pub fn resolve_strict(&self, name: &str) -> Result<String> {
        match self.best_match(name) {
            Some((handle, score)) if score >= self.score_cutoff => Ok(handle),
            Some((handle, score)) => Err(EtlError::LookupAmbiguous {
                name: name.to_string(),
                best: Some(handle),
                score,
            }),
            None => Err(EtlError::LookupAmbiguous {
                name: name.to_string(),
                best: None,
                score: 0.0,
            }),
        }
    }

    /// The name, then its listed synonyms, then names that list it as a synonym
    fn aliases(&self, name: &str) -> Vec<String> {
        let mut aliases = vec![name.to_string()];
        let lowered = name.to_lowercase();
        for (root, alternatives) in &self.synonyms {
            let listed = alternatives.iter().any(|a| a.to_lowercase() == lowered);
            if root.to_lowercase() == lowered {
                aliases.extend(alternatives.iter().cloned());
            } else if listed {
                aliases.push(root.clone());
            }
        }
        aliases
    }
}

impl SchemaResolver for FuzzyResolver {
    fn resolve(&self, name: &str) -> Option<Resolution> {
        self.best_match(name).map(|(handle, score)| Resolution {
            handle,
            score,
            confident: score >= self.score_cutoff,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FuzzyResolver {
        FuzzyResolver::new(["date_time", "title", "net_sales"])
    }

    #[test]
    fn test_find_field() {
        let r = fields();
        assert_eq!(r.find_field("date"), Some("date_time".to_string()));
        assert_eq!(r.find_field("NetSales"), Some("net_sales".to_string()));
        assert_eq!(r.find_field("$#!@"), None);
    }

    #[test]
    fn test_find_fields_padding() {
        let r = fields();
        let names = ["TITLE", "$#!@"];
        assert_eq!(
            r.find_fields(&names, true),
            vec![Some("title".to_string()), None]
        );
        assert_eq!(r.find_fields(&names, false), vec![Some("title".to_string())]);
    }

    #[test]
    fn test_synonym_rescues_unmatched_name() {
        let mut synonyms = BTreeMap::new();
        synonyms.insert("when".to_string(), vec!["date".to_string()]);
        let r = FuzzyResolver::new(["date_time", "net_sales"]).with_synonyms(synonyms);
        assert_eq!(r.find_field("when"), None);
        assert_eq!(r.find_synonymous_field("when"), Some("date_time".to_string()));
    }

    #[test]
    fn test_root_name_wins_ties() {
        let mut synonyms = BTreeMap::new();
        synonyms.insert("zip".to_string(), vec!["zipcode".to_string()]);
        let r = FuzzyResolver::new(["zip", "zipcode"]).with_synonyms(synonyms);
        assert_eq!(r.find_synonymous_field("zip"), Some("zip".to_string()));
    }

    #[test]
    fn test_resolve_reports_confidence() {
        let r = fields().with_cutoff(95.0);
        let res = r.resolve("date").unwrap();
        assert_eq!(res.handle, "date_time");
        assert!(!res.confident);

        match r.resolve_strict("date") {
            Err(EtlError::LookupAmbiguous { best, .. }) => {
                assert_eq!(best, Some("date_time".to_string()))
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
        assert_eq!(r.resolve_strict("Title").unwrap(), "title");
    }

    #[test]
    fn test_no_candidates() {
        let r = FuzzyResolver::new(Vec::<String>::new());
        assert!(r.resolve("x").is_none());
        assert!(matches!(
            r.resolve_strict("x"),
            Err(EtlError::LookupAmbiguous { best: None, .. })
        ));
    }
}
