use std::cmp::Ordering;
use std::fmt;
use std::fmt::Write as _;
use std::marker::PhantomData;

use super::cache::WriteCache;
use super::page::{probe, Item, Node, PageId, Probe};
use super::storage::PageStore;
use crate::error::{Error, Result};

/// Smallest permitted order.
pub const MIN_ORDER: usize = 2;

/// An ordered set of unique keys kept as a B-tree of fixed-capacity pages.
///
/// The order `N` is the minimum item count of a non-root page: every page
/// holds between `N` and `2N` items (the root alone may hold fewer) and all
/// leaves sit at the same depth. Pages live in the [`PageStore`]; the engine
/// only ever refers to them by id, so the back-end decides layout,
/// allocation and durability.
///
/// Inserts write pages straight to the store, children before the parents
/// that point at them. Removes route all page traffic through a write-back
/// cache that is flushed as the operation returns, writes before frees.
/// Either way the store is fully up to date between operations.
pub struct BTreeSet<K, S> {
	store: S,
	order: usize,
	root: Option<PageId>,
	_marker: PhantomData<K>,
}

/// One step of a descent: the page visited and the child slot taken, which
/// doubles as the in-page insertion index.
struct PathStep {
	page: PageId,
	slot: usize,
}

enum Lookup {
	Hit,
	/// The descent path, deepest page first.
	Miss(Vec<PathStep>),
}

impl<K, S> BTreeSet<K, S>
where
	K: Ord + Clone,
	S: PageStore<K>,
{
	/// Create an empty set of the given order on top of `store`.
	pub fn new(store: S, order: usize) -> Result<Self> {
		Self::open(store, order, None)
	}

	/// Attach to a tree whose pages already live in `store`. `root` is the
	/// id a previous session ended with, or `None` for an empty set; keeping
	/// that id somewhere durable is the back-end's job.
	pub fn open(store: S, order: usize, root: Option<PageId>) -> Result<Self> {
		if order < MIN_ORDER {
			return Err(Error::InvalidOrder(order));
		}
		Ok(BTreeSet {
			store,
			order,
			root,
			_marker: PhantomData,
		})
	}

	pub fn order(&self) -> usize {
		self.order
	}

	pub fn root(&self) -> Option<PageId> {
		self.root
	}

	pub fn is_empty(&self) -> bool {
		self.root.is_none()
	}

	pub fn store(&self) -> &S {
		&self.store
	}

	pub fn store_mut(&mut self) -> &mut S {
		&mut self.store
	}

	pub fn into_store(self) -> S {
		self.store
	}

	fn capacity(&self) -> usize {
		2 * self.order
	}

	fn load(&self, id: PageId) -> Result<Node<K>> {
		let node = self.store.read_page(id)?;
		node.ensure_well_formed(id)?;
		Ok(node)
	}

	/// Membership test; costs one page read per level.
	pub fn contains(&self, key: &K) -> Result<bool> {
		Ok(matches!(self.lookup(key)?, Lookup::Hit))
	}

	fn lookup(&self, key: &K) -> Result<Lookup> {
		let mut path = Vec::new();
		let mut next = self.root;
		while let Some(id) = next {
			let node = self.load(id)?;
			match probe(&node.items, key) {
				Probe::Hit(_) => return Ok(Lookup::Hit),
				Probe::Miss(slot) => {
					next = node.child(slot);
					path.push(PathStep { page: id, slot });
				}
			}
		}
		path.reverse();
		Ok(Lookup::Miss(path))
	}

	/// All keys in ascending order.
	pub fn keys(&self) -> Result<Vec<K>> {
		let mut out = Vec::new();
		self.append_keys(self.root, &mut out)?;
		Ok(out)
	}

	fn append_keys(&self, id: Option<PageId>, out: &mut Vec<K>) -> Result<()> {
		let Some(id) = id else {
			return Ok(());
		};
		let node = self.load(id)?;
		self.append_keys(node.leftmost, out)?;
		for item in node.items {
			out.push(item.key);
			self.append_keys(item.right, out)?;
		}
		Ok(())
	}

	/// Insert `key`, reporting whether the set changed. Inserting a present
	/// key is a no-op.
	pub fn insert(&mut self, key: K) -> Result<bool> {
		let path = match self.lookup(&key)? {
			Lookup::Hit => return Ok(false),
			Lookup::Miss(path) => path,
		};

		let mut carry = Item { key, right: None };
		for step in path {
			let mut node = self.load(step.page)?;
			if node.items.len() < self.capacity() {
				node.items.insert(step.slot, carry);
				self.store.write_page(step.page, node)?;
				return Ok(true);
			}

			// Page is full: split it and keep bubbling the median.
			let (mut median, sibling) = split_full(&mut node, step.slot, carry, self.order);
			let sibling_id = self.store.allocate_page()?;
			self.store.write_page(sibling_id, sibling)?;
			self.store.write_page(step.page, node)?;
			median.right = Some(sibling_id);
			carry = median;
		}

		// The split reached the top, or the tree was empty: grow a root.
		let root_id = self.store.allocate_page()?;
		let root = Node {
			leftmost: self.root,
			items: vec![carry],
		};
		self.store.write_page(root_id, root)?;
		log::debug!("tree root grew to page {root_id}");
		self.root = Some(root_id);
		Ok(true)
	}

	/// Remove `key`, reporting whether it was present. Removing an absent
	/// key is a success, not an error.
	pub fn remove(&mut self, key: &K) -> Result<bool> {
		let Some(root_id) = self.root else {
			return Ok(false);
		};

		let order = self.order;
		let mut cache = WriteCache::new(&mut self.store);
		let mut removed = false;
		let undersized = remove_rec(&mut cache, order, key, root_id, &mut removed)?;

		let mut root = self.root;
		if undersized {
			let node = cache.read(root_id)?;
			if node.items.is_empty() {
				// The root emptied: its lone subtree, if any, takes over.
				root = node.leftmost;
				cache.free(root_id);
				log::debug!("tree root page {root_id} released");
			}
		}
		cache.flush()?;
		self.root = root;
		Ok(removed)
	}

	/// Validate every structural invariant: occupancy bounds, leaf/internal
	/// uniformity, in-page key order, subtree key bounds and uniform leaf
	/// depth. The first violation comes back as [`Error::Corruption`].
	pub fn check(&self) -> Result<()> {
		let Some(root) = self.root else {
			return Ok(());
		};
		self.check_page(root, None, None, true).map(|_| ())
	}

	fn check_page(
		&self,
		id: PageId,
		lower: Option<&K>,
		upper: Option<&K>,
		is_root: bool,
	) -> Result<usize> {
		let node = self.load(id)?;
		let count = node.items.len();
		if count > self.capacity() {
			return Err(Error::Corruption(format!(
				"page {id} holds {count} items (max {})",
				self.capacity()
			)));
		}
		if is_root {
			if count == 0 {
				return Err(Error::Corruption(format!("root page {id} is empty")));
			}
		} else if count < self.order {
			return Err(Error::Corruption(format!(
				"page {id} holds {count} items (min {})",
				self.order
			)));
		}
		if let (Some(bound), Some(item)) = (lower, node.items.first()) {
			if item.key <= *bound {
				return Err(Error::Corruption(format!("page {id} breaks its lower bound")));
			}
		}
		if let (Some(bound), Some(item)) = (upper, node.items.last()) {
			if item.key >= *bound {
				return Err(Error::Corruption(format!("page {id} breaks its upper bound")));
			}
		}
		if node.is_leaf() {
			return Ok(1);
		}

		let mut depth = None;
		for slot in 0..=count {
			let child = require_child(&node, slot, id)?;
			let low = if slot == 0 {
				lower
			} else {
				Some(&node.items[slot - 1].key)
			};
			let high = if slot == count {
				upper
			} else {
				Some(&node.items[slot].key)
			};
			let child_depth = self.check_page(child, low, high, false)?;
			if *depth.get_or_insert(child_depth) != child_depth {
				return Err(Error::Corruption(format!(
					"page {id} has children at unequal depths"
				)));
			}
		}
		Ok(depth.unwrap_or(0) + 1)
	}

	/// Render the tree one page per line, indented by depth. Debug aid.
	pub fn render(&self) -> Result<String>
	where
		K: fmt::Debug,
	{
		let mut out = String::new();
		self.render_page(self.root, 0, &mut out)?;
		Ok(out)
	}

	fn render_page(&self, id: Option<PageId>, depth: usize, out: &mut String) -> Result<()>
	where
		K: fmt::Debug,
	{
		let Some(id) = id else {
			return Ok(());
		};
		let node = self.load(id)?;
		let keys: Vec<String> = node
			.items
			.iter()
			.map(|item| format!("{:?}", item.key))
			.collect();
		for _ in 0..depth {
			out.push_str("    ");
		}
		let _ = writeln!(out, "[{id}] {}", keys.join(" "));
		self.render_page(node.leftmost, depth + 1, out)?;
		for item in &node.items {
			self.render_page(item.right, depth + 1, out)?;
		}
		Ok(())
	}
}

/// Split a full page around insertion slot `slot`, returning the median item
/// and the new right sibling. The sibling adopts the median's old subtree as
/// its leftmost child; the caller re-points the median at the sibling before
/// bubbling it up. Each half keeps exactly `order` items.
fn split_full<K>(
	node: &mut Node<K>,
	slot: usize,
	carry: Item<K>,
	order: usize,
) -> (Item<K>, Node<K>) {
	let median;
	let right_items;
	match slot.cmp(&order) {
		Ordering::Equal => {
			// The incoming item is itself the median.
			right_items = node.items.split_off(order);
			median = carry;
		}
		Ordering::Less => {
			right_items = node.items.split_off(order);
			median = node.items.pop().unwrap();
			node.items.insert(slot, carry);
		}
		Ordering::Greater => {
			let mut tail = node.items.split_off(order + 1);
			median = node.items.pop().unwrap();
			tail.insert(slot - order - 1, carry);
			right_items = tail;
		}
	}

	let sibling = Node {
		leftmost: median.right,
		items: right_items,
	};
	(median, sibling)
}

fn remove_rec<K, S>(
	cache: &mut WriteCache<'_, K, S>,
	order: usize,
	key: &K,
	id: PageId,
	removed: &mut bool,
) -> Result<bool>
where
	K: Ord + Clone,
	S: PageStore<K>,
{
	let mut node = cache.read(id)?;
	match probe(&node.items, key) {
		Probe::Hit(index) => {
			*removed = true;
			match node.child(index) {
				None => {
					// Leaf: take the item out directly.
					node.items.remove(index);
					let undersized = node.items.len() < order;
					cache.write(id, node);
					Ok(undersized)
				}
				Some(left) => {
					// Internal: the key is replaced by its in-order
					// predecessor, found in the rightmost leaf of the left
					// subtree.
					if splice_rec(cache, order, left, id, index)? {
						rebalance(cache, order, id, left, index)
					} else {
						Ok(false)
					}
				}
			}
		}
		Probe::Miss(slot) => match node.child(slot) {
			None => Ok(false), // ran off the bottom: key absent
			Some(child) => {
				if remove_rec(cache, order, key, child, removed)? {
					rebalance(cache, order, id, child, slot)
				} else {
					Ok(false)
				}
			}
		},
	}
}

/// Walk to the rightmost leaf below `id`, move its last key into item
/// `index` of page `target` (the subtree pointer there stays put), and drop
/// that item from the leaf. Returns whether the leaf was left undersized;
/// intermediate pages repair their rightmost child on the way back up.
fn splice_rec<K, S>(
	cache: &mut WriteCache<'_, K, S>,
	order: usize,
	id: PageId,
	target: PageId,
	index: usize,
) -> Result<bool>
where
	K: Ord + Clone,
	S: PageStore<K>,
{
	let mut node = cache.read(id)?;
	let last_slot = node.items.len();
	match node.child(last_slot) {
		Some(next) => {
			if splice_rec(cache, order, next, target, index)? {
				rebalance(cache, order, id, next, last_slot)
			} else {
				Ok(false)
			}
		}
		None => {
			let Some(last) = node.items.pop() else {
				return Err(Error::Corruption(format!("empty leaf at page {id}")));
			};
			let mut dest = cache.read(target)?;
			dest.items[index].key = last.key;
			cache.write(target, dest);
			let undersized = node.items.len() < order;
			cache.write(id, node);
			Ok(undersized)
		}
	}
}

/// Repair `a_id`, left undersized at child slot `slot` of `c_id`, by
/// borrowing from an adjacent sibling or merging with it. The right sibling
/// is preferred when one exists. Returns whether the parent itself dropped
/// below `order` items.
fn rebalance<K, S>(
	cache: &mut WriteCache<'_, K, S>,
	order: usize,
	c_id: PageId,
	a_id: PageId,
	slot: usize,
) -> Result<bool>
where
	K: Ord + Clone,
	S: PageStore<K>,
{
	let mut parent = cache.read(c_id)?;
	let mut page = cache.read(a_id)?;

	if slot < parent.items.len() {
		// A right sibling exists; the separator is parent.items[slot].
		let sibling_id = require_child(&parent, slot + 1, c_id)?;
		let mut sibling = cache.read(sibling_id)?;
		let spare = (sibling.items.len() + 1).saturating_sub(order) / 2;

		if spare > 0 {
			// Borrow: the separator comes down as the page's new last item,
			// `spare - 1` sibling items follow it, and the sibling's next
			// item goes up in the separator's place.
			page.items.push(Item {
				key: parent.items[slot].key.clone(),
				right: sibling.leftmost,
			});
			page.items.extend(sibling.items.drain(..spare - 1));
			let promoted = sibling.items.remove(0);
			sibling.leftmost = promoted.right;
			parent.items[slot] = Item {
				key: promoted.key,
				right: Some(sibling_id),
			};

			cache.write(a_id, page);
			cache.write(sibling_id, sibling);
			cache.write(c_id, parent);
			Ok(false)
		} else {
			// Merge the sibling into the page around the separator.
			let separator = parent.items.remove(slot);
			page.items.push(Item {
				key: separator.key,
				right: sibling.leftmost,
			});
			page.items.append(&mut sibling.items);

			let undersized = parent.items.len() < order;
			cache.write(a_id, page);
			cache.write(c_id, parent);
			cache.free(sibling_id);
			Ok(undersized)
		}
	} else {
		// The page is the rightmost child; work with the left sibling and
		// the separator parent.items[slot - 1].
		let sibling_id = require_child(&parent, slot - 1, c_id)?;
		let mut sibling = cache.read(sibling_id)?;
		let spare = (sibling.items.len() + 1).saturating_sub(order) / 2;

		if spare > 0 {
			// Borrow: the last `spare - 1` sibling items plus the
			// descending separator become the head of the page; the sibling
			// item before them goes up.
			let tail_at = sibling.items.len() - (spare - 1);
			let mut moved = sibling.items.split_off(tail_at);
			moved.push(Item {
				key: parent.items[slot - 1].key.clone(),
				right: page.leftmost,
			});
			moved.append(&mut page.items);
			page.items = moved;

			let promoted = sibling.items.pop().unwrap();
			page.leftmost = promoted.right;
			parent.items[slot - 1] = Item {
				key: promoted.key,
				right: Some(a_id),
			};

			cache.write(a_id, page);
			cache.write(sibling_id, sibling);
			cache.write(c_id, parent);
			Ok(false)
		} else {
			// Merge the page into the left sibling; the separator is the
			// parent's last item.
			let separator = parent.items.remove(slot - 1);
			sibling.items.push(Item {
				key: separator.key,
				right: page.leftmost,
			});
			sibling.items.append(&mut page.items);

			let undersized = parent.items.len() < order;
			cache.write(sibling_id, sibling);
			cache.write(c_id, parent);
			cache.free(a_id);
			Ok(undersized)
		}
	}
}

fn require_child<K>(node: &Node<K>, slot: usize, of: PageId) -> Result<PageId> {
	node.child(slot).ok_or_else(|| {
		Error::Corruption(format!("page {of} missing child pointer at slot {slot}"))
	})
}
