//! Fork database: an indexed container of candidate block states with a
//! best-branch total order, a cached head, and an irreversible root anchor.
//!
//! Three indices back the container: id lookup, previous-id children lists,
//! and an ordered map over the branch key. Every public method holds one
//! mutex; branch scans are bounded by the distance from root to head.

use crate::block_state::BlockState;
use crate::error::ChainError;
use parking_lot::Mutex;
use savanna_types::pack::{Pack, Unpack, VarUint32};
use savanna_types::{BlockId, BlockTimestamp};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File magic for the current fork database format.
pub const FORK_DB_MAGIC: u32 = 0x5346_4442; // "SFDB"

/// Magic of the retired pre-finality format; recognized and refused.
pub const LEGACY_FORK_DB_MAGIC: u32 = 0x3051_0FDB;

pub const MIN_SUPPORTED_VERSION: u32 = 1;
pub const MAX_SUPPORTED_VERSION: u32 = 1;

/// An entry the fork database can index. The branch key defines the
/// best-branch total order; `preferred_over` is the same comparison without
/// the validated flag and the id tiebreak, used when weighing a candidate
/// against the current head.
pub trait ForkItem: Send + Sync {
    type Key: Ord + Clone;

    fn id(&self) -> BlockId;
    fn previous(&self) -> BlockId;
    fn block_num(&self) -> u32;
    fn is_valid(&self) -> bool;
    fn set_valid(&self, valid: bool);
    fn branch_key(&self) -> Self::Key;
    fn preferred_over(&self, other: &Self) -> bool;
}

/// Best-branch key of the instant-finality protocol: validated entries
/// first, then highest finality, highest QC claim, latest timestamp, with
/// byte-wise id order as the final tiebreak. Lower keys sort first.
#[derive(Clone, PartialEq, Eq)]
pub struct SavannaBranchKey {
    pub valid: bool,
    pub last_final_block_num: u32,
    pub last_qc_block_num: u32,
    pub timestamp: BlockTimestamp,
    pub id: BlockId,
}

impl Ord for SavannaBranchKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .valid
            .cmp(&self.valid)
            .then_with(|| other.last_final_block_num.cmp(&self.last_final_block_num))
            .then_with(|| other.last_qc_block_num.cmp(&self.last_qc_block_num))
            .then_with(|| other.timestamp.cmp(&self.timestamp))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for SavannaBranchKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl ForkItem for BlockState {
    type Key = SavannaBranchKey;

    fn id(&self) -> BlockId {
        BlockState::id(self)
    }

    fn previous(&self) -> BlockId {
        BlockState::previous(self)
    }

    fn block_num(&self) -> u32 {
        BlockState::block_num(self)
    }

    fn is_valid(&self) -> bool {
        BlockState::is_valid(self)
    }

    fn set_valid(&self, valid: bool) {
        BlockState::set_valid(self, valid)
    }

    fn branch_key(&self) -> SavannaBranchKey {
        SavannaBranchKey {
            valid: self.is_valid(),
            last_final_block_num: self.last_final_block_num(),
            last_qc_block_num: self.last_qc_block_num(),
            timestamp: self.timestamp(),
            id: self.id(),
        }
    }

    fn preferred_over(&self, other: &Self) -> bool {
        (
            self.last_final_block_num(),
            self.last_qc_block_num(),
            self.timestamp(),
        ) > (
            other.last_final_block_num(),
            other.last_qc_block_num(),
            other.timestamp(),
        )
    }
}

/// Serialization hooks for the durability file.
pub trait ForkItemCodec: ForkItem + Sized {
    fn pack_item(&self, out: &mut Vec<u8>);
    fn unpack_item(buf: &mut &[u8]) -> Result<Self, ChainError>;
}

impl ForkItemCodec for BlockState {
    fn pack_item(&self, out: &mut Vec<u8>) {
        self.pack_state(out)
    }

    fn unpack_item(buf: &mut &[u8]) -> Result<Self, ChainError> {
        BlockState::unpack_state(buf)
    }
}

struct Inner<T: ForkItem> {
    by_id: HashMap<BlockId, Arc<T>>,
    by_prev: HashMap<BlockId, Vec<BlockId>>,
    best: BTreeMap<T::Key, Arc<T>>,
    root: Option<Arc<T>>,
    head: Option<Arc<T>>,
}

impl<T: ForkItem> Default for Inner<T> {
    fn default() -> Self {
        Self {
            by_id: HashMap::new(),
            by_prev: HashMap::new(),
            best: BTreeMap::new(),
            root: None,
            head: None,
        }
    }
}

/// The fork database engine, generic over the branch-order key via
/// [`ForkItem`].
pub struct ForkDb<T: ForkItem> {
    magic: u32,
    inner: Mutex<Inner<T>>,
}

/// The instant-finality instantiation.
pub type ForkDatabase = ForkDb<BlockState>;

impl ForkDatabase {
    pub fn new() -> Self {
        ForkDb::with_magic(FORK_DB_MAGIC)
    }
}

impl Default for ForkDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ForkItem> ForkDb<T> {
    pub fn with_magic(magic: u32) -> Self {
        Self {
            magic,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn has_root(&self) -> bool {
        self.inner.lock().root.is_some()
    }

    pub fn root(&self) -> Option<Arc<T>> {
        self.inner.lock().root.clone()
    }

    pub fn head(&self) -> Option<Arc<T>> {
        self.inner.lock().head.clone()
    }

    /// The first entry in best-branch order even if unvalidated, when it
    /// beats the current head; otherwise the head.
    pub fn pending_head(&self) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        let head = inner.head.clone()?;
        // validated entries form a prefix of the order, so the first
        // unvalidated entry is the best unvalidated candidate
        if let Some(candidate) = inner.best.values().find(|item| !item.is_valid()) {
            if candidate.preferred_over(head.as_ref()) {
                return Some(candidate.clone());
            }
        }
        Some(head)
    }

    /// Clear everything and install `root` as the irreversible anchor. The
    /// root is validated by definition and becomes head.
    pub fn reset_root(&self, root: Arc<T>) {
        let mut inner = self.inner.lock();
        inner.by_id.clear();
        inner.by_prev.clear();
        inner.best.clear();
        root.set_valid(true);
        inner.head = Some(root.clone());
        inner.root = Some(root);
    }

    /// Insert a block state whose parent is the root or already present.
    pub fn add(&self, item: Arc<T>, mark_valid: bool, ignore_duplicate: bool) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        inner.add(item, mark_valid, ignore_duplicate)
    }

    /// Exact id lookup. The root itself is not part of the index.
    pub fn get_block(&self, id: &BlockId) -> Option<Arc<T>> {
        self.inner.lock().by_id.get(id).cloned()
    }

    /// Like [`get_block`](Self::get_block) but also answers for the root.
    pub fn get_block_header(&self, id: &BlockId) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        if let Some(root) = &inner.root {
            if root.id() == *id {
                return Some(root.clone());
            }
        }
        inner.by_id.get(id).cloned()
    }

    /// Flip a present entry to validated and re-evaluate the head.
    pub fn mark_valid(&self, item: &Arc<T>) -> Result<(), ChainError> {
        let inner = &mut *self.inner.lock();
        if item.is_valid() {
            return Ok(());
        }
        if !inner.by_id.contains_key(&item.id()) {
            return Err(ChainError::UnknownBlock(item.id()));
        }

        let old_key = item.branch_key();
        inner.best.remove(&old_key);
        item.set_valid(true);
        inner.best.insert(item.branch_key(), item.clone());

        if let Some((_, candidate)) = inner.best.iter().next() {
            let better = match &inner.head {
                Some(head) => candidate.preferred_over(head.as_ref()),
                None => true,
            };
            if better {
                debug!(head = %candidate.id(), "fork database head switched");
                inner.head = Some(candidate.clone());
            }
        }
        Ok(())
    }

    /// Flip every entry back to unvalidated and reset head to root.
    pub fn rollback_head_to_root(&self) {
        let mut inner = self.inner.lock();
        let entries: Vec<Arc<T>> = inner.by_id.values().cloned().collect();
        inner.best.clear();
        for item in entries {
            item.set_valid(false);
            inner.best.insert(item.branch_key(), item);
        }
        inner.head = inner.root.clone();
    }

    /// Advance the root to a validated descendant of the current root.
    /// Branches hanging off the skipped-over ancestors are pruned; the new
    /// root leaves the index but keeps its subtree alive.
    pub fn advance_root(&self, id: &BlockId) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        let root = inner.root.clone().ok_or(ChainError::RootNotSet)?;

        if root.id() == *id {
            return Ok(());
        }

        let new_root = inner
            .by_id
            .get(id)
            .cloned()
            .ok_or(ChainError::UnknownBlock(*id))?;
        if !new_root.is_valid() {
            return Err(ChainError::NotValidated(*id));
        }

        // collect the ancestors between the new root and the old root
        let mut ancestors = VecDeque::new();
        let mut cursor = new_root.clone();
        loop {
            let prev = cursor.previous();
            let parent = inner.by_id.get(&prev).cloned();
            if parent.is_none() && prev != root.id() {
                return Err(ChainError::ForkDatabase(
                    "orphaned branch was present in the fork database".to_string(),
                ));
            }
            ancestors.push_back(prev);
            match parent {
                Some(p) => cursor = p,
                None => break,
            }
        }

        // the new root is erased individually so its descendants survive
        inner.erase_single(&new_root.id());

        // everything hanging off the skipped ancestors is pruned
        for ancestor in ancestors {
            inner.remove_subtree(&ancestor)?;
        }

        info!(root = %new_root.id(), num = new_root.block_num(), "fork database root advanced");
        inner.root = Some(new_root);
        Ok(())
    }

    /// Remove a block and all of its descendants. Fails if that would remove
    /// the current head.
    pub fn remove(&self, id: &BlockId) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        inner.remove_subtree(id)
    }

    /// Branch from `h` down to (not including) the root, trimmed to entries
    /// at or below `trim_after_block_num`.
    pub fn fetch_branch(&self, h: &BlockId, trim_after_block_num: u32) -> Vec<Arc<T>> {
        let inner = self.inner.lock();
        let mut result = Vec::new();
        let mut cursor = inner.by_id.get(h).cloned();
        while let Some(item) = cursor {
            if item.block_num() <= trim_after_block_num {
                result.push(item.clone());
            }
            cursor = inner.by_id.get(&item.previous()).cloned();
        }
        result
    }

    /// Branch from `h` down to and including the root.
    pub fn fetch_full_branch(&self, h: &BlockId) -> Vec<Arc<T>> {
        let inner = self.inner.lock();
        let mut result = Vec::new();
        let mut cursor = inner.by_id.get(h).cloned();
        while let Some(item) = cursor {
            cursor = inner.by_id.get(&item.previous()).cloned();
            result.push(item);
        }
        if let Some(root) = &inner.root {
            result.push(root.clone());
        }
        result
    }

    /// The entry at height `block_num` on the branch ending at `h`, if any.
    pub fn search_on_branch(&self, h: &BlockId, block_num: u32) -> Option<Arc<T>> {
        let inner = self.inner.lock();
        let mut cursor = inner.by_id.get(h).cloned();
        while let Some(item) = cursor {
            if item.block_num() == block_num {
                return Some(item);
            }
            cursor = inner.by_id.get(&item.previous()).cloned();
        }
        None
    }

    /// [`search_on_branch`](Self::search_on_branch) on the head branch.
    pub fn search_on_head_branch(&self, block_num: u32) -> Option<Arc<T>> {
        let head_id = match self.inner.lock().head.as_ref() {
            Some(head) => head.id(),
            None => return None,
        };
        self.search_on_branch(&head_id, block_num)
    }

    /// Given two block ids, return the two divergent tails down to (not
    /// including) their lowest common ancestor. Identical ids produce an
    /// empty pair.
    pub fn fetch_branch_from(
        &self,
        first: &BlockId,
        second: &BlockId,
    ) -> Result<(Vec<Arc<T>>, Vec<Arc<T>>), ChainError> {
        let inner = self.inner.lock();
        let mut result = (Vec::new(), Vec::new());

        let mut first_item = inner.get_or_root(first)?;
        let mut second_item = inner.get_or_root(second)?;

        while first_item.block_num() > second_item.block_num() {
            result.0.push(first_item.clone());
            first_item = inner.get_or_root(&first_item.previous())?;
        }
        while second_item.block_num() > first_item.block_num() {
            result.1.push(second_item.clone());
            second_item = inner.get_or_root(&second_item.previous())?;
        }

        if first_item.id() == second_item.id() {
            return Ok(result);
        }

        while first_item.previous() != second_item.previous() {
            result.0.push(first_item.clone());
            result.1.push(second_item.clone());
            first_item = inner.get_or_root(&first_item.previous())?;
            second_item = inner.get_or_root(&second_item.previous())?;
        }

        result.0.push(first_item);
        result.1.push(second_item);
        Ok(result)
    }
}

impl<T: ForkItem> Inner<T> {
    fn add(&mut self, item: Arc<T>, mark_valid: bool, ignore_duplicate: bool) -> Result<(), ChainError> {
        let root = self.root.clone().ok_or(ChainError::RootNotSet)?;

        let prev = item.previous();
        let linked = prev == root.id() || self.by_id.contains_key(&prev);
        if !linked {
            return Err(ChainError::Unlinkable {
                id: item.id(),
                previous: prev,
            });
        }

        if self.by_id.contains_key(&item.id()) {
            if ignore_duplicate {
                return Ok(());
            }
            return Err(ChainError::DuplicateBlock(item.id()));
        }

        if mark_valid {
            item.set_valid(true);
        }

        self.by_id.insert(item.id(), item.clone());
        self.by_prev.entry(prev).or_default().push(item.id());
        self.best.insert(item.branch_key(), item);

        if let Some((_, candidate)) = self.best.iter().next() {
            if candidate.is_valid() {
                self.head = Some(candidate.clone());
            }
        }
        Ok(())
    }

    fn get_or_root(&self, id: &BlockId) -> Result<Arc<T>, ChainError> {
        if let Some(root) = &self.root {
            if root.id() == *id {
                return Ok(root.clone());
            }
        }
        self.by_id
            .get(id)
            .cloned()
            .ok_or(ChainError::UnknownBlock(*id))
    }

    /// Remove one entry from every index without touching its subtree.
    fn erase_single(&mut self, id: &BlockId) {
        if let Some(item) = self.by_id.remove(id) {
            self.best.remove(&item.branch_key());
            if let Some(children) = self.by_prev.get_mut(&item.previous()) {
                children.retain(|child| child != id);
                if children.is_empty() {
                    self.by_prev.remove(&item.previous());
                }
            }
        }
    }

    /// Breadth-first removal of `id` and all of its descendants.
    fn remove_subtree(&mut self, id: &BlockId) -> Result<(), ChainError> {
        let head_id = self.head.as_ref().map(|h| h.id());

        let mut queue: VecDeque<BlockId> = VecDeque::new();
        let mut to_remove: Vec<BlockId> = Vec::new();
        queue.push_back(*id);

        while let Some(current) = queue.pop_front() {
            if Some(current) == head_id {
                return Err(ChainError::WouldRemoveHead(current));
            }
            if let Some(children) = self.by_prev.get(&current) {
                for child in children {
                    queue.push_back(*child);
                }
            }
            to_remove.push(current);
        }

        for block_id in to_remove {
            self.erase_single(&block_id);
            // children lists keyed by a removed parent
            self.by_prev.remove(&block_id);
        }
        Ok(())
    }
}

impl<T: ForkItemCodec> ForkDb<T> {
    /// Serialize the database: magic, version, packed root, entry count,
    /// entries with all validated ones first (each group in best-branch
    /// order), and finally the head id.
    pub fn save(&self, path: &Path) -> Result<(), ChainError> {
        let inner = self.inner.lock();
        let root = match &inner.root {
            Some(root) => root.clone(),
            None => {
                if !inner.by_id.is_empty() {
                    warn!("fork database has entries but no root; not writing {}", path.display());
                }
                return Ok(());
            }
        };
        let head = inner.head.clone().ok_or_else(|| {
            ChainError::ForkDatabase("head not set in fork database".to_string())
        })?;

        let mut out = Vec::new();
        self.magic.pack(&mut out);
        MAX_SUPPORTED_VERSION.pack(&mut out);
        root.pack_item(&mut out);

        VarUint32(inner.by_id.len() as u32).pack(&mut out);
        for item in inner.best.values().filter(|item| item.is_valid()) {
            item.pack_item(&mut out);
        }
        for item in inner.best.values().filter(|item| !item.is_valid()) {
            item.pack_item(&mut out);
        }

        head.id().pack(&mut out);

        std::fs::write(path, &out)?;
        debug!(
            entries = inner.by_id.len(),
            file = %path.display(),
            "fork database written"
        );
        Ok(())
    }

    /// Load a previously saved database. The file is deleted after a
    /// successful load so it cannot be replayed; on any failure it is left
    /// in place for diagnosis.
    pub fn load(&self, path: &Path) -> Result<(), ChainError> {
        let bytes = std::fs::read(path)?;
        let mut buf = bytes.as_slice();

        let magic = u32::unpack(&mut buf)?;
        if magic == LEGACY_FORK_DB_MAGIC && self.magic != LEGACY_FORK_DB_MAGIC {
            return Err(ChainError::ForkDatabase(format!(
                "'{}' is a legacy fork database file and cannot be loaded",
                path.display()
            )));
        }
        if magic != self.magic {
            return Err(ChainError::ForkDatabase(format!(
                "'{}' has unexpected magic number {magic:#010x}, expected {:#010x}",
                path.display(),
                self.magic
            )));
        }

        let version = u32::unpack(&mut buf)?;
        if !(MIN_SUPPORTED_VERSION..=MAX_SUPPORTED_VERSION).contains(&version) {
            return Err(ChainError::ForkDatabase(format!(
                "unsupported fork database version {version}; supported range is [{MIN_SUPPORTED_VERSION},{MAX_SUPPORTED_VERSION}]"
            )));
        }

        let root = Arc::new(T::unpack_item(&mut buf)?);
        self.reset_root(root.clone());

        let count = VarUint32::unpack(&mut buf)?.0;
        let mut entries = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            entries.push(T::unpack_item(&mut buf)?);
        }
        // file order is preference order, not topological order; parents
        // always have lower block numbers than their descendants
        entries.sort_by_key(|item| item.block_num());

        {
            let mut inner = self.inner.lock();
            for entry in entries {
                inner.add(Arc::new(entry), false, false)?;
            }

            let head_id = BlockId::unpack(&mut buf)?;
            if !buf.is_empty() {
                return Err(ChainError::ForkDatabase(format!(
                    "'{}' has {} trailing bytes",
                    path.display(),
                    buf.len()
                )));
            }

            let head = if root.id() == head_id {
                root.clone()
            } else {
                inner.by_id.get(&head_id).cloned().ok_or_else(|| {
                    ChainError::ForkDatabase(format!(
                        "could not find head {head_id} while reconstructing the fork database; '{}' is likely corrupted",
                        path.display()
                    ))
                })?
            };
            inner.head = Some(head.clone());

            match inner.best.iter().next() {
                Some((_, candidate)) if candidate.is_valid() => {
                    if candidate.preferred_over(head.as_ref()) {
                        return Err(ChainError::ForkDatabase(format!(
                            "head not set to the best available option; '{}' is likely corrupted",
                            path.display()
                        )));
                    }
                }
                _ => {
                    if head.id() != root.id() {
                        return Err(ChainError::ForkDatabase(format!(
                            "head not set to root despite no better option; '{}' is likely corrupted",
                            path.display()
                        )));
                    }
                }
            }
        }

        std::fs::remove_file(path)?;
        info!(file = %path.display(), "fork database restored");
        Ok(())
    }
}
