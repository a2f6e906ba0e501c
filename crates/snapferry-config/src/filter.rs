//! Include/exclude selection of participating filesystems

use crate::ConfigResult;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Decides which source filesystems take part in a backup run
///
/// A filesystem participates when it matches at least one include pattern
/// and no exclude pattern. `/` is a literal separator: `tank/*` matches
/// `tank/home` but not `tank/home/alice`, while `tank/**` matches both.
#[derive(Debug, Clone)]
pub struct FilesystemFilter {
    includes: GlobSet,
    excludes: GlobSet,
}

impl FilesystemFilter {
    /// Compile include and exclude patterns
    pub fn new<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> ConfigResult<Self> {
        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
        })
    }

    /// Filter that lets every filesystem through
    pub fn allow_all() -> Self {
        Self {
            includes: compile(&["**"]).unwrap_or_else(|_| GlobSet::empty()),
            excludes: GlobSet::empty(),
        }
    }

    /// Whether `filesystem` takes part
    pub fn matches(&self, filesystem: &str) -> bool {
        self.includes.is_match(filesystem) && !self.excludes.is_match(filesystem)
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> ConfigResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern.as_ref())
            .literal_separator(true)
            .build()?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}
