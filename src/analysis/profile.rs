//! Profile-guided analysis.
//!
//! Loads a profile log from a previous run and exposes per-relation
//! sizes for the profile-aware SIPS metric. Relations missing from the
//! profile report the maximum size so they sort last.

use crate::analysis::{Analysis, TranslationUnit};
use crate::ast::QualifiedName;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use tracing::warn;

/// Relation sizes recovered from a profile log.
///
/// The reader accepts the line-oriented records the profiler emits;
/// only `@relation-size;<name>;<tuples>` entries are consumed here,
/// everything else is skipped.
pub struct ProfileUse {
    sizes: HashMap<String, usize>,
}

impl Analysis for ProfileUse {
    const NAME: &'static str = "profile-use";

    fn run(tu: &TranslationUnit) -> Self {
        let mut sizes = HashMap::new();
        if let Some(path) = &tu.config().profile_use {
            match fs::read_to_string(path) {
                Ok(content) => {
                    sizes = parse_profile_log(&content);
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "could not read profile log");
                }
            }
        }
        ProfileUse { sizes }
    }

    fn print(&self) -> String {
        let mut entries: Vec<_> = self.sizes.iter().collect();
        entries.sort();
        entries
            .iter()
            .map(|(name, size)| format!("{name}: {size}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ProfileUse {
    /// Whether the profile recorded a size for the relation
    pub fn has_relation_size(&self, relation: &QualifiedName) -> bool {
        self.sizes.contains_key(&relation.to_string())
    }

    /// Recorded relation size; `usize::MAX` when the profile has none
    pub fn relation_size(&self, relation: &QualifiedName) -> usize {
        self.sizes
            .get(&relation.to_string())
            .copied()
            .unwrap_or(usize::MAX)
    }
}

fn parse_profile_log(content: &str) -> HashMap<String, usize> {
    let mut sizes = HashMap::new();
    let line_re = Regex::new(r"^@relation-size;([^;]+);(\d+)$").expect("valid regex");
    for line in content.lines() {
        if let Some(caps) = line_re.captures(line.trim()) {
            if let Ok(size) = caps[2].parse::<usize>() {
                sizes.insert(caps[1].to_string(), size);
            }
        }
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::ProgramBuilder;
    use crate::config::EvaluationConfig;
    use std::io::Write;

    #[test]
    fn test_parse_profile_log() {
        let content = "@relation-size;edge;120\n@frequency-atom;x;0;c;a;t;1;5\n@relation-size;path;4000\n";
        let sizes = parse_profile_log(content);
        assert_eq!(sizes.get("edge"), Some(&120));
        assert_eq!(sizes.get("path"), Some(&4000));
        assert_eq!(sizes.len(), 2);
    }

    #[test]
    fn test_missing_relation_is_max() {
        let sizes = parse_profile_log("@relation-size;edge;7\n");
        let profile = ProfileUse { sizes };
        assert_eq!(profile.relation_size(&QualifiedName::new("edge")), 7);
        assert_eq!(profile.relation_size(&QualifiedName::new("ghost")), usize::MAX);
        assert!(!profile.has_relation_size(&QualifiedName::new("ghost")));
    }

    #[test]
    fn test_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "@relation-size;edge;3").expect("write");

        let mut config = EvaluationConfig::default();
        config.profile_use = Some(file.path().to_path_buf());
        let program = ProgramBuilder::new().relation("edge", 2).build();
        let tu = TranslationUnit::new(program, config);
        let profile = tu.get_analysis::<ProfileUse>();
        assert_eq!(profile.relation_size(&QualifiedName::new("edge")), 3);
    }
}
