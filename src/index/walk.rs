//! Lazy namespace walk
//!
//! Pages through the live pieces of one namespace in key order. Each page is
//! one short query; the index lock is not held between pages, so the consumer
//! may call back into the store while iterating.

use std::collections::VecDeque;

use rusqlite::params;

use crate::blob::BlobInfo;
use crate::error::Result;

use super::pieces::info_from_row;
use super::MetaIndex;

/// Iterator over live pieces of a namespace, ordered by key
pub struct NamespaceWalk<'a> {
    index: &'a MetaIndex,
    namespace: Vec<u8>,

    /// Last key handed out; the next page starts strictly after it
    cursor: Option<Vec<u8>>,

    page: VecDeque<BlobInfo>,
    exhausted: bool,
}

impl<'a> NamespaceWalk<'a> {
    fn new(index: &'a MetaIndex, namespace: &[u8]) -> Self {
        Self {
            index,
            namespace: namespace.to_vec(),
            cursor: None,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fetch_page(&mut self) -> Result<()> {
        let limit = i64::try_from(self.index.walk_batch_size).unwrap_or(i64::MAX);
        let rows = self.index.with_conn(|conn| {
            let rows = match &self.cursor {
                None => {
                    let mut stmt = conn.prepare_cached(
                        "SELECT namespace, key, size, created FROM pieces \
                         WHERE namespace = ?1 AND trash = 0 ORDER BY key LIMIT ?2",
                    )?;
                    let rows = stmt
                        .query_map(params![self.namespace, limit], info_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                Some(after) => {
                    let mut stmt = conn.prepare_cached(
                        "SELECT namespace, key, size, created FROM pieces \
                         WHERE namespace = ?1 AND trash = 0 AND key > ?2 ORDER BY key LIMIT ?3",
                    )?;
                    let rows = stmt
                        .query_map(params![self.namespace, after, limit], info_from_row)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            Ok(rows)
        })?;

        if rows.len() < self.index.walk_batch_size {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.cursor = Some(last.blob_ref.key.clone());
        }
        self.page.extend(rows);
        Ok(())
    }
}

impl Iterator for NamespaceWalk<'_> {
    type Item = Result<BlobInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.page.pop_front().map(Ok)
    }
}

impl MetaIndex {
    /// Walk the live pieces of `namespace`. Every call starts from scratch.
    pub fn walk_namespace(&self, namespace: &[u8]) -> NamespaceWalk<'_> {
        NamespaceWalk::new(self, namespace)
    }
}
