//! In-memory stores for testing
//!
//! Configurable stores that record every call and can simulate upload or
//! write failures.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Result, StoreError};
use crate::store::{
    Authorizer, ChapterRecord, ChapterWrite, ObjectStore, RecordStore, UpsertOutcome,
    UserIdentity,
};

/// An object captured by [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// An object store keeping uploads in memory
pub struct MemoryObjectStore {
    /// Number of calls to fail before succeeding (0 = always succeed)
    fail_count: AtomicUsize,
    /// Current call count
    call_count: AtomicUsize,
    /// Names containing any of these fragments always fail
    fail_names: Vec<String>,
    objects: Mutex<Vec<StoredObject>>,
    base_url: String,
}

impl MemoryObjectStore {
    /// Create a store where every upload succeeds
    pub fn new() -> Self {
        Self {
            fail_count: AtomicUsize::new(0),
            call_count: AtomicUsize::new(0),
            fail_names: Vec::new(),
            objects: Mutex::new(Vec::new()),
            base_url: "https://cdn.test".to_string(),
        }
    }

    /// Create a store that fails the first `n` uploads, then succeeds
    pub fn fails_then_succeeds(n: usize) -> Self {
        let store = Self::new();
        store.fail_count.store(n, Ordering::SeqCst);
        store
    }

    /// Create a store that always fails
    pub fn always_fails() -> Self {
        Self::fails_then_succeeds(usize::MAX)
    }

    /// Fail every upload whose name contains `fragment`
    pub fn failing_names(mut self, fragment: &str) -> Self {
        self.fail_names.push(fragment.to_string());
        self
    }

    /// Number of times put() was called
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Successfully stored objects, in upload order
    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let call_num = self.call_count.fetch_add(1, Ordering::SeqCst);

        if call_num < self.fail_count.load(Ordering::SeqCst)
            || self.fail_names.iter().any(|f| name.contains(f.as_str()))
        {
            return Err(StoreError::ApiError {
                message: format!("simulated upload failure for {}", name),
                status_code: Some(500),
            });
        }

        self.objects.lock().unwrap().push(StoredObject {
            name: name.to_string(),
            bytes: bytes.to_vec(),
            content_type: content_type.to_string(),
        });
        Ok(format!("{}/{}", self.base_url, name))
    }

    fn name(&self) -> &'static str {
        "memory-objects"
    }
}

/// A record store keeping chapters in memory
#[derive(Default)]
pub struct MemoryRecordStore {
    chapters: Mutex<BTreeMap<(String, u32), ChapterRecord>>,
    covers: Mutex<HashMap<String, String>>,
    /// Chapter numbers whose upsert always fails
    fail_numbers: HashSet<u32>,
    call_count: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every upsert for the given chapter numbers
    pub fn failing_on(numbers: &[u32]) -> Self {
        Self {
            fail_numbers: numbers.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Pre-populate a chapter, as if left by an earlier ingestion
    pub fn seed(&self, record: ChapterRecord) {
        self.chapters
            .lock()
            .unwrap()
            .insert((record.novel_id.clone(), record.number), record);
    }

    /// Number of upsert calls made
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// All chapters stored for a novel, by number
    pub fn chapters_for(&self, novel_id: &str) -> Vec<ChapterRecord> {
        self.chapters
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.novel_id == novel_id)
            .cloned()
            .collect()
    }

    pub fn cover_for(&self, novel_id: &str) -> Option<String> {
        self.covers.lock().unwrap().get(novel_id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_chapter(
        &self,
        novel_id: &str,
        number: u32,
        write: &ChapterWrite,
    ) -> Result<UpsertOutcome> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.fail_numbers.contains(&number) {
            return Err(StoreError::ApiError {
                message: format!("simulated write failure for chapter {}", number),
                status_code: Some(500),
            });
        }

        let mut chapters = self.chapters.lock().unwrap();
        match chapters.get_mut(&(novel_id.to_string(), number)) {
            Some(existing) => {
                existing.apply(write);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                chapters.insert(
                    (novel_id.to_string(), number),
                    ChapterRecord::from_write(novel_id, number, write),
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn update_novel_cover(&self, novel_id: &str, cover_url: &str) -> Result<()> {
        self.covers
            .lock()
            .unwrap()
            .insert(novel_id.to_string(), cover_url.to_string());
        Ok(())
    }

    async fn get_chapter(&self, novel_id: &str, number: u32) -> Result<Option<ChapterRecord>> {
        Ok(self
            .chapters
            .lock()
            .unwrap()
            .get(&(novel_id.to_string(), number))
            .cloned())
    }

    fn name(&self) -> &'static str {
        "memory-records"
    }
}

/// An authorizer backed by a fixed token table
#[derive(Default)]
pub struct StaticAuthorizer {
    users: HashMap<String, UserIdentity>,
    admins: HashSet<String>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user, optionally granting the admin role
    pub fn with_user(mut self, token: &str, user_id: &str, admin: bool) -> Self {
        self.users.insert(
            token.to_string(),
            UserIdentity {
                id: user_id.to_string(),
                email: None,
            },
        );
        if admin {
            self.admins.insert(user_id.to_string());
        }
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity> {
        self.users
            .get(token)
            .cloned()
            .ok_or_else(|| StoreError::Unauthorized("unknown token".to_string()))
    }

    async fn is_admin(&self, user_id: &str) -> Result<bool> {
        Ok(self.admins.contains(user_id))
    }
}
