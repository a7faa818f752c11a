//! Case corpus loading and id lookup.
//!
//! A corpus is a file or directory tree of YAML documents whose
//! `case_info` (alias `teststeps`) list holds the case records. Files
//! that do not parse as corpus documents are logged and skipped, so a
//! corpus directory can hold environment files alongside cases.

use crate::error::{TauonError, TauonResult};
use crate::model::CaseRecord;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct CorpusDocument {
    #[serde(alias = "teststeps")]
    case_info: Vec<CaseRecord>,
}

#[derive(Debug, Default)]
pub struct CaseCorpus {
    cases: Vec<CaseRecord>,
}

impl CaseCorpus {
    /// Load a corpus from a YAML file or a directory searched
    /// recursively for `.yaml` / `.yml` files.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let files = if path.is_dir() {
            let mut files = Vec::new();
            collect_yaml_files(path, &mut files)
                .context(format!("failed to scan corpus directory: {}", path.display()))?;
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            anyhow::bail!("corpus path does not exist: {}", path.display());
        };

        let mut cases = Vec::new();
        for file in &files {
            let content = fs::read_to_string(file)
                .context(format!("failed to read corpus file: {}", file.display()))?;
            match serde_yaml::from_str::<CorpusDocument>(&content) {
                Ok(document) => {
                    debug!(
                        "loaded {} case(s) from {}",
                        document.case_info.len(),
                        file.display()
                    );
                    cases.extend(document.case_info);
                }
                Err(err) => {
                    warn!("skipping {}: {err}", file.display());
                }
            }
        }

        info!("corpus holds {} case(s) from {} file(s)", cases.len(), files.len());
        Ok(Self { cases })
    }

    /// Build a corpus from already-parsed records.
    pub fn from_cases(cases: Vec<CaseRecord>) -> Self {
        Self { cases }
    }

    /// Look a case up by id; the first record with a matching id wins.
    pub fn find(&self, id: &str) -> TauonResult<&CaseRecord> {
        self.cases
            .iter()
            .find(|case| case.id == id)
            .ok_or_else(|| TauonError::CaseNotFound(id.to_string()))
    }

    pub fn cases(&self) -> &[CaseRecord] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

fn collect_yaml_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_yaml_files(&path, out)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASES: &str = r#"
case_info:
  - id: login_01
    title: login
    url: /api/user/login
    method: POST
  - id: info_01
    title: user info
    url: /api/user/info
    method: GET
"#;

    #[test]
    fn test_load_single_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cases.yaml"), CASES).unwrap();

        let corpus = CaseCorpus::load(dir.path().join("cases.yaml")).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.find("login_01").unwrap().title, "login");
    }

    #[test]
    fn test_load_directory_recursively_and_skip_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("project");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("cases.yml"), CASES).unwrap();
        std::fs::write(dir.path().join("env.yaml"), "host: http://example.test\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml\n").unwrap();

        let corpus = CaseCorpus::load(dir.path()).unwrap();
        assert_eq!(corpus.len(), 2);
    }

    #[test]
    fn test_teststeps_alias() {
        let dir = tempfile::tempdir().unwrap();
        let content = CASES.replace("case_info:", "teststeps:");
        std::fs::write(dir.path().join("cases.yaml"), content).unwrap();

        let corpus = CaseCorpus::load(dir.path()).unwrap();
        assert_eq!(corpus.len(), 2);
    }

    #[test]
    fn test_find_unknown_id_is_not_found() {
        let corpus = CaseCorpus::from_cases(Vec::new());
        let err = corpus.find("ghost_01").unwrap_err();
        assert!(matches!(err, TauonError::CaseNotFound(_)));
    }

    #[test]
    fn test_missing_path_is_an_error() {
        assert!(CaseCorpus::load("does/not/exist").is_err());
    }
}
