//! `using` 의존성 전개
//!
//! 진입 파일에서 시작해 `using` 선언을 깊이 우선으로 따라가며 유닛을
//! 잎부터(의존되는 쪽부터) 정렬해 돌려준다. 순환 의존은 오류다. 한
//! 파일은 한 번만 적재된다.

use crate::Diagnostic;
use crate::parser::ast::{Stmt, StmtS};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub struct Unit {
    pub path: PathBuf,
    pub source: String,
    pub stmts: Vec<StmtS>,
}

#[derive(Debug)]
pub enum PreprocessError {
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: String,
        diagnostics: Vec<Diagnostic>,
    },
    Cycle {
        path: PathBuf,
    },
}

impl std::fmt::Display for PreprocessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessError::Io { path, error } => {
                write!(f, "cannot read '{}': {}", path.display(), error)
            }
            PreprocessError::Parse { path, .. } => {
                write!(f, "parse failed in '{}'", path.display())
            }
            PreprocessError::Cycle { path } => {
                write!(f, "circular 'using' involving '{}'", path.display())
            }
        }
    }
}

/// Collect the entry file and everything it `using`s, dependency-first.
pub fn collect_units(entry: &Path) -> Result<Vec<Unit>, PreprocessError> {
    let mut ordered = Vec::new();
    let mut visiting = HashSet::new();
    let mut loaded = HashSet::new();
    visit(entry, &mut ordered, &mut visiting, &mut loaded)?;
    Ok(ordered)
}

fn visit(
    path: &Path,
    ordered: &mut Vec<Unit>,
    visiting: &mut HashSet<PathBuf>,
    loaded: &mut HashSet<PathBuf>,
) -> Result<(), PreprocessError> {
    let canonical = path.canonicalize().map_err(|error| PreprocessError::Io {
        path: path.to_path_buf(),
        error,
    })?;
    if loaded.contains(&canonical) {
        return Ok(());
    }
    if !visiting.insert(canonical.clone()) {
        return Err(PreprocessError::Cycle { path: canonical });
    }

    let source = std::fs::read_to_string(&canonical).map_err(|error| PreprocessError::Io {
        path: canonical.clone(),
        error,
    })?;
    let stmts = crate::parse_source(&source).map_err(|diagnostics| PreprocessError::Parse {
        path: canonical.clone(),
        source: source.clone(),
        diagnostics,
    })?;

    // dependencies first
    let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
    for (stmt, _) in &stmts {
        if let Stmt::Using { path: dep } = stmt {
            visit(&base.join(dep), ordered, visiting, loaded)?;
        }
    }

    visiting.remove(&canonical);
    loaded.insert(canonical.clone());
    ordered.push(Unit {
        path: canonical,
        source,
        stmts,
    });
    Ok(())
}
