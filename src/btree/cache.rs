use std::collections::HashMap;

use super::page::{Node, PageId};
use super::storage::PageStore;
use crate::error::Result;

/// State of one page inside the write-back cache.
enum Slot<K> {
	Clean(Node<K>),
	Dirty(Node<K>),
	Freed,
}

/// Write-back page buffer scoped to a single remove operation.
///
/// Rebalancing revisits pages (splice and sibling repair touch the same
/// ancestors more than once), so reads are served from here after the first
/// store fetch and every mutation is buffered until [`WriteCache::flush`].
/// The buffered entry is the canonical copy of a page for the duration of
/// the operation.
pub(crate) struct WriteCache<'s, K, S> {
	store: &'s mut S,
	slots: HashMap<PageId, Slot<K>>,
}

impl<'s, K, S> WriteCache<'s, K, S>
where
	K: Ord + Clone,
	S: PageStore<K>,
{
	pub(crate) fn new(store: &'s mut S) -> Self {
		WriteCache {
			store,
			slots: HashMap::new(),
		}
	}

	pub(crate) fn read(&mut self, id: PageId) -> Result<Node<K>> {
		match self.slots.get(&id) {
			Some(Slot::Clean(node)) | Some(Slot::Dirty(node)) => Ok(node.clone()),
			Some(Slot::Freed) => panic!("page {id} read back after free"),
			None => {
				let node = self.store.read_page(id)?;
				node.ensure_well_formed(id)?;
				self.slots.insert(id, Slot::Clean(node.clone()));
				Ok(node)
			}
		}
	}

	pub(crate) fn write(&mut self, id: PageId, node: Node<K>) {
		self.slots.insert(id, Slot::Dirty(node));
	}

	pub(crate) fn free(&mut self, id: PageId) {
		self.slots.insert(id, Slot::Freed);
	}

	/// Push every buffered effect to the store: dirty pages first, then the
	/// frees, so a referencing page is never written after its referent is
	/// gone.
	pub(crate) fn flush(self) -> Result<()> {
		let WriteCache { store, slots } = self;
		let mut freed = Vec::new();
		for (id, slot) in slots {
			match slot {
				Slot::Clean(_) => {}
				Slot::Dirty(node) => store.write_page(id, node)?,
				Slot::Freed => freed.push(id),
			}
		}
		for id in freed {
			store.free_page(id)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::btree::page::Item;
	use crate::btree::storage::MemoryStore;

	fn leaf(keys: &[u32]) -> Node<u32> {
		Node {
			leftmost: None,
			items: keys.iter().map(|&key| Item { key, right: None }).collect(),
		}
	}

	#[test]
	fn read_serves_buffered_state_without_touching_the_store() {
		let mut store = MemoryStore::new();
		let id = store.allocate_page().unwrap();
		store.write_page(id, leaf(&[1, 2])).unwrap();

		let mut cache = WriteCache::new(&mut store);
		assert_eq!(cache.read(id).unwrap().items.len(), 2);
		cache.write(id, leaf(&[1]));
		assert_eq!(cache.read(id).unwrap().items.len(), 1);
		drop(cache);

		assert_eq!(
			store.read_page(id).unwrap().items.len(),
			2,
			"the store must not see unflushed writes"
		);
	}

	#[test]
	fn flush_applies_writes_before_frees() {
		#[derive(Default)]
		struct RecordingStore {
			inner: MemoryStore<u32>,
			ops: Vec<&'static str>,
		}

		impl PageStore<u32> for RecordingStore {
			fn read_page(&self, id: PageId) -> Result<Node<u32>> {
				self.inner.read_page(id)
			}

			fn write_page(&mut self, id: PageId, node: Node<u32>) -> Result<()> {
				self.ops.push("write");
				self.inner.write_page(id, node)
			}

			fn allocate_page(&mut self) -> Result<PageId> {
				self.inner.allocate_page()
			}

			fn free_page(&mut self, id: PageId) -> Result<()> {
				self.ops.push("free");
				self.inner.free_page(id)
			}
		}

		let mut store = RecordingStore::default();
		let a = store.allocate_page().unwrap();
		let b = store.allocate_page().unwrap();
		let c = store.allocate_page().unwrap();
		for id in [a, b, c] {
			store.inner.write_page(id, leaf(&[id.get() as u32])).unwrap();
		}

		let mut cache = WriteCache::new(&mut store);
		cache.read(c).unwrap(); // stays clean
		cache.free(b);
		cache.write(a, leaf(&[7, 8]));
		cache.flush().unwrap();

		assert_eq!(
			store.ops,
			vec!["write", "free"],
			"dirty pages must reach the store before any free"
		);
		assert_eq!(store.read_page(a).unwrap().items.len(), 2);
		assert!(store.read_page(b).is_err());
		assert_eq!(store.read_page(c).unwrap().items.len(), 1);
	}

	#[test]
	#[should_panic(expected = "read back after free")]
	fn read_after_free_panics() {
		let mut store = MemoryStore::new();
		let id = store.allocate_page().unwrap();
		store.write_page(id, leaf(&[1, 2])).unwrap();

		let mut cache = WriteCache::new(&mut store);
		cache.free(id);
		let _ = cache.read(id);
	}
}
