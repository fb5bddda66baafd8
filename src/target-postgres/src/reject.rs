// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Where rejected batches go.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

/// Receives the encoded rows of batches the database refused.
#[async_trait]
pub trait RejectionSink: Send + Sync {
    /// Persists `content`, the `sequence`-th rejected batch of `stream`.
    async fn reject(&self, stream: &str, sequence: usize, content: &[u8]) -> io::Result<()>;
}

/// Writes each rejected batch to `<dir>/<stream>-<NNNN>.rej.csv`.
#[derive(Debug, Clone)]
pub struct DirectoryRejectionSink {
    dir: PathBuf,
}

impl DirectoryRejectionSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryRejectionSink { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file a rejected batch is saved to. Always directly inside
    /// [`Self::dir`]: path separators in the stream name are replaced.
    pub fn path_for(&self, stream: &str, sequence: usize) -> PathBuf {
        let stream: String = stream
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                c => c,
            })
            .collect();
        self.dir.join(format!("{stream}-{sequence:04}.rej.csv"))
    }
}

#[async_trait]
impl RejectionSink for DirectoryRejectionSink {
    async fn reject(&self, stream: &str, sequence: usize, content: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(stream, sequence);
        tokio::fs::write(&path, content).await?;
        info!(path = %path.display(), "saved rejected batch");
        Ok(())
    }
}
