use std::collections::HashMap;

use super::page::{Node, PageId};
use crate::error::{Error, Result};

/// Storage abstraction for the tree: four operations over opaque pages.
///
/// Persistence, byte layout, allocation policy and durability all live
/// behind this seam. The engine promises in return that every completed
/// insert or remove has pushed each page it touched back through
/// [`PageStore::write_page`] or [`PageStore::free_page`], so the store is
/// fully up to date between operations.
pub trait PageStore<K> {
	/// Fetch a page body by id.
	fn read_page(&self, id: PageId) -> Result<Node<K>>;

	/// Install a page body at `id`. Must be idempotent.
	fn write_page(&mut self, id: PageId, node: Node<K>) -> Result<()>;

	/// Hand out a fresh id. The body is undefined until first written.
	fn allocate_page(&mut self) -> Result<PageId>;

	/// Release an id. The engine will not read it again.
	fn free_page(&mut self, id: PageId) -> Result<()>;
}

/// In-memory page store, the reference back-end for tests and benchmarks.
#[derive(Clone, Debug)]
pub struct MemoryStore<K> {
	pages: HashMap<PageId, Node<K>>,
	next_id: u64,
}

impl<K> MemoryStore<K> {
	pub fn new() -> Self {
		MemoryStore {
			pages: HashMap::new(),
			next_id: 0,
		}
	}

	/// Number of live pages. Lets tests assert that merges and root shrinks
	/// release everything they should.
	pub fn page_count(&self) -> usize {
		self.pages.len()
	}
}

impl<K> Default for MemoryStore<K> {
	fn default() -> Self {
		MemoryStore::new()
	}
}

impl<K: Clone> PageStore<K> for MemoryStore<K> {
	fn read_page(&self, id: PageId) -> Result<Node<K>> {
		self.pages
			.get(&id)
			.cloned()
			.ok_or_else(|| Error::Corruption(format!("read of unallocated page {id}")))
	}

	fn write_page(&mut self, id: PageId, node: Node<K>) -> Result<()> {
		self.pages.insert(id, node);
		Ok(())
	}

	fn allocate_page(&mut self) -> Result<PageId> {
		self.next_id += 1;
		PageId::new(self.next_id).ok_or(Error::Exhausted)
	}

	fn free_page(&mut self, id: PageId) -> Result<()> {
		match self.pages.remove(&id) {
			Some(_) => Ok(()),
			None => Err(Error::Corruption(format!("free of unallocated page {id}"))),
		}
	}
}

/// A page store assembled from four callbacks around an opaque handle, for
/// callers who would rather wire closures than implement [`PageStore`].
pub struct FnStore<H, K> {
	handle: H,
	read: Box<dyn Fn(&H, PageId) -> Result<Node<K>>>,
	write: Box<dyn FnMut(&mut H, PageId, Node<K>) -> Result<()>>,
	allocate: Box<dyn FnMut(&mut H) -> Result<PageId>>,
	free: Box<dyn FnMut(&mut H, PageId) -> Result<()>>,
}

impl<H, K> FnStore<H, K> {
	pub fn new(
		handle: H,
		read: impl Fn(&H, PageId) -> Result<Node<K>> + 'static,
		write: impl FnMut(&mut H, PageId, Node<K>) -> Result<()> + 'static,
		allocate: impl FnMut(&mut H) -> Result<PageId> + 'static,
		free: impl FnMut(&mut H, PageId) -> Result<()> + 'static,
	) -> Self {
		FnStore {
			handle,
			read: Box::new(read),
			write: Box::new(write),
			allocate: Box::new(allocate),
			free: Box::new(free),
		}
	}

	pub fn handle(&self) -> &H {
		&self.handle
	}
}

impl<H, K> PageStore<K> for FnStore<H, K> {
	fn read_page(&self, id: PageId) -> Result<Node<K>> {
		(self.read)(&self.handle, id)
	}

	fn write_page(&mut self, id: PageId, node: Node<K>) -> Result<()> {
		(self.write)(&mut self.handle, id, node)
	}

	fn allocate_page(&mut self) -> Result<PageId> {
		(self.allocate)(&mut self.handle)
	}

	fn free_page(&mut self, id: PageId) -> Result<()> {
		(self.free)(&mut self.handle, id)
	}
}
