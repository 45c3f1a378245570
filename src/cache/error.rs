use std::{io, path::{Path, PathBuf}};

use thiserror::Error;

use crate::domain::kind::CalculationKind;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage i/o failed for `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode cache namespace `{namespace}`: {message}")]
    Encode {
        namespace: &'static str,
        message: String,
    },
    #[error("cache store for `{kind}` was already opened with a different result type")]
    KindTypeMismatch { kind: CalculationKind },
}

impl CacheError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
