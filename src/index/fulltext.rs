use std::collections::{HashMap, HashSet};

use crate::core::error::{Error, Result};
use crate::core::types::IndexId;
use crate::index::key::lookup_path;
use crate::storage::headers::{HeaderId, MasterPointers};

/// Fulltext index over a single text attribute. Words shorter than
/// `min_word_length` are not indexed. Removals leave empty posting lists
/// behind; the collection garbage loop calls `cleanup` to compact them.
#[derive(Debug)]
pub struct FulltextIndex {
    id: IndexId,
    field: String,
    min_word_length: usize,
    postings: HashMap<String, HashSet<HeaderId>>,
    documents: HashMap<HeaderId, Vec<String>>,
}

pub const DEFAULT_MIN_WORD_LENGTH: usize = 2;

impl FulltextIndex {
    pub fn new(id: IndexId, field: String, min_word_length: usize) -> FulltextIndex {
        FulltextIndex {
            id,
            field,
            min_word_length: min_word_length.max(1),
            postings: HashMap::new(),
            documents: HashMap::new(),
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn min_word_length(&self) -> usize {
        self.min_word_length
    }

    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut words = Vec::new();
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= self.min_word_length)
        {
            let word = word.to_lowercase();
            if seen.insert(word.clone()) {
                words.push(word);
            }
        }
        words
    }

    pub fn insert(
        &mut self,
        pool: &MasterPointers,
        header_id: HeaderId,
        _is_rollback: bool,
    ) -> Result<()> {
        let header = pool
            .get(header_id)
            .ok_or_else(|| Error::Internal("fulltext index fed an unallocated header".into()))?;
        let Some(text) = lookup_path(&header.data, &self.field).and_then(|v| v.as_str()) else {
            return Ok(());
        };

        let words = self.tokenize(text);
        for word in &words {
            self.postings
                .entry(word.clone())
                .or_default()
                .insert(header_id);
        }
        self.documents.insert(header_id, words);
        Ok(())
    }

    pub fn remove(
        &mut self,
        _pool: &MasterPointers,
        header_id: HeaderId,
        _is_rollback: bool,
    ) -> Result<()> {
        if let Some(words) = self.documents.remove(&header_id) {
            for word in words {
                if let Some(ids) = self.postings.get_mut(&word) {
                    ids.remove(&header_id);
                }
            }
        }
        Ok(())
    }

    /// All documents containing `word`.
    pub fn query(&self, word: &str) -> Vec<HeaderId> {
        let word = word.to_lowercase();
        let mut ids: Vec<HeaderId> = self
            .postings
            .get(&word)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Compact the posting table: drop words with no remaining documents.
    pub fn cleanup(&mut self) -> Result<()> {
        self.postings.retain(|_, ids| !ids.is_empty());
        self.postings.shrink_to_fit();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Posting-table size, visible to the cleanup tests.
    pub fn word_count(&self) -> usize {
        self.postings.len()
    }

    pub fn memory(&self) -> usize {
        self.postings.len() * std::mem::size_of::<(String, HashSet<HeaderId>)>()
            + self
                .documents
                .values()
                .map(|words| words.len() * std::mem::size_of::<String>())
                .sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Fid, Tick};
    use crate::storage::headers::Header;
    use serde_json::json;
    use std::sync::Arc;

    fn put(pool: &mut MasterPointers, key: &str, text: &str) -> HeaderId {
        pool.request(Header {
            fid: Fid(1),
            revision: Tick(1),
            key_hash: 0,
            marker_size: 64,
            data: Arc::new(json!({ "_key": key, "text": text })),
        })
        .unwrap()
    }

    #[test]
    fn indexes_words_above_minimum_length() {
        let mut pool = MasterPointers::new();
        let mut index = FulltextIndex::new(IndexId(5), "text".into(), 3);

        let doc = put(&mut pool, "d1", "a quick Brown fox, the fox!");
        index.insert(&pool, doc, false).unwrap();

        assert_eq!(index.query("fox"), vec![doc]);
        assert_eq!(index.query("BROWN"), vec![doc]);
        // Shorter than the minimum word length.
        assert!(index.query("a").is_empty());
        assert!(index.query("the").len() == 1);
    }

    #[test]
    fn cleanup_drops_empty_postings() {
        let mut pool = MasterPointers::new();
        let mut index = FulltextIndex::new(IndexId(5), "text".into(), 2);

        let doc = put(&mut pool, "d1", "compaction target words");
        index.insert(&pool, doc, false).unwrap();
        assert_eq!(index.word_count(), 3);

        index.remove(&pool, doc, false).unwrap();
        // Postings stay allocated until cleanup runs.
        assert_eq!(index.word_count(), 3);

        index.cleanup().unwrap();
        assert_eq!(index.word_count(), 0);
    }
}
