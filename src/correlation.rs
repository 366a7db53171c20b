use std::sync::OnceLock;

use regex::Regex;

use crate::types::CorrelationId;

/// Response formats the migration CLI is known to print on a queued migration.
///
/// Tried in order; the first capture group of the first match wins.
pub const KNOWN_PATTERNS: &[&str] = &[
    // "A repository migration (ID: RM_kgDaACQkOGI3...) was successfully queued."
    r"\(ID:\s*(RM_[A-Za-z0-9_\-]+)\)",
    // "Migration ID: RM_kgDaACQkOGI3..."
    r"(?i)migration\s+id:\s*([A-Za-z0-9_\-]+)",
    // JSON output: {"migrationId": "RM_..."}
    r#""migration_?[iI]d"\s*:\s*"([^"]+)""#,
    // Follow-up hint: "gh ado2gh wait-for-migration --migration-id RM_..."
    r"--migration-id\s+([A-Za-z0-9_\-]+)",
];

/// Pulls a correlation id out of the migration tool's text output.
///
/// Returning `None` is a supported outcome: the adapter then falls back to
/// polling by target repository.
pub trait CorrelationExtractor: Send + Sync {
    fn extract(&self, output: &str) -> Option<CorrelationId>;
}

impl<F> CorrelationExtractor for F
where
    F: Fn(&str) -> Option<CorrelationId> + Send + Sync,
{
    fn extract(&self, output: &str) -> Option<CorrelationId> {
        self(output)
    }
}

/// Ordered list of regexes, each with one capture group holding the id.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    patterns: Vec<Regex>,
}

fn known_regexes() -> &'static Vec<Regex> {
    static KNOWN: OnceLock<Vec<Regex>> = OnceLock::new();
    KNOWN.get_or_init(|| {
        KNOWN_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("known correlation pattern"))
            .collect()
    })
}

impl PatternExtractor {
    /// Extractor over the built-in `KNOWN_PATTERNS`.
    pub fn known() -> Self {
        Self {
            patterns: known_regexes().clone(),
        }
    }

    /// Compile custom patterns. Each must contain at least one capture group.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, String> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let raw = raw.as_ref();
            let re = Regex::new(raw)
                .map_err(|e| format!("Invalid correlation pattern '{}': {}", raw, e))?;
            if re.captures_len() < 2 {
                return Err(format!(
                    "Correlation pattern '{}' has no capture group for the id",
                    raw
                ));
            }
            compiled.push(re);
        }
        Ok(Self { patterns: compiled })
    }

    /// Custom patterns when configured, otherwise the built-in ones.
    pub fn from_config(patterns: &[String]) -> Result<Self, String> {
        if patterns.is_empty() {
            Ok(Self::known())
        } else {
            Self::new(patterns)
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::known()
    }
}

impl CorrelationExtractor for PatternExtractor {
    fn extract(&self, output: &str) -> Option<CorrelationId> {
        self.patterns.iter().find_map(|re| {
            re.captures(output)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().trim())
                .filter(|id| !id.is_empty())
                .map(CorrelationId::new)
        })
    }
}

/// Never finds an id. Forces the poll-by-target path.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExtraction;

impl CorrelationExtractor for NoExtraction {
    fn extract(&self, _output: &str) -> Option<CorrelationId> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_patterns_all_compile() {
        assert_eq!(PatternExtractor::known().pattern_count(), KNOWN_PATTERNS.len());
    }

    #[test]
    fn queued_banner_is_preferred_over_later_hint() {
        let output = "[INFO] A repository migration (ID: RM_first) was successfully queued.\n\
                      [INFO] To check status run: gh ado2gh wait-for-migration --migration-id RM_second";
        let id = PatternExtractor::known().extract(output);
        assert_eq!(id, Some(CorrelationId::new("RM_first")));
    }
}
