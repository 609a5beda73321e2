use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroU64;

use crate::error::{Error, Result};

/// Identifier of a page in the backing store.
///
/// Ids are positive; "no page" is `Option::<PageId>::None`. The `NonZeroU64`
/// niche makes the option free in memory, and back-ends can encode the
/// absent case smaller than any real id on disk.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PageId(NonZeroU64);

impl PageId {
	pub fn new(raw: u64) -> Option<PageId> {
		NonZeroU64::new(raw).map(PageId)
	}

	pub fn get(self) -> u64 {
		self.0.get()
	}
}

impl fmt::Display for PageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// One key plus the subtree of keys strictly greater than it (and strictly
/// less than the next item's key on the same page).
#[derive(Clone, Debug, PartialEq)]
pub struct Item<K> {
	pub key: K,
	pub right: Option<PageId>,
}

/// Body of one page: the leftmost subtree followed by the ordered items.
///
/// Either every subtree reference is `None` (a leaf) or every one is a real
/// id (an internal page). Mixed pages are corrupt.
#[derive(Clone, Debug, PartialEq)]
pub struct Node<K> {
	pub leftmost: Option<PageId>,
	pub items: Vec<Item<K>>,
}

impl<K> Node<K> {
	pub fn is_leaf(&self) -> bool {
		self.leftmost.is_none()
	}

	/// Child at descent slot `slot`: slot 0 is the leftmost subtree, slot
	/// `i` the subtree to the right of item `i - 1`.
	pub fn child(&self, slot: usize) -> Option<PageId> {
		if slot == 0 {
			self.leftmost
		} else {
			self.items[slot - 1].right
		}
	}
}

impl<K: Ord> Node<K> {
	/// Reject bodies that are corrupt on their face: mixed leaf/internal
	/// children or out-of-order keys. Occupancy and depth are whole-tree
	/// properties and belong to the tree-level integrity check.
	pub(crate) fn ensure_well_formed(&self, id: PageId) -> Result<()> {
		let leaf = self.is_leaf();
		if self.items.iter().any(|item| item.right.is_none() != leaf) {
			return Err(Error::Corruption(format!(
				"page {id} mixes leaf and internal children"
			)));
		}
		if self.items.windows(2).any(|pair| pair[0].key >= pair[1].key) {
			return Err(Error::Corruption(format!("page {id} has unsorted keys")));
		}
		Ok(())
	}
}

/// Outcome of the in-page binary search.
pub(crate) enum Probe {
	/// The key sits at this item index.
	Hit(usize),
	/// Not on this page; the value is the number of items with smaller keys,
	/// which doubles as the descent slot and the in-page insertion index.
	Miss(usize),
}

pub(crate) fn probe<K: Ord>(items: &[Item<K>], key: &K) -> Probe {
	let mut low = 0;
	let mut high = items.len();

	while low < high {
		let mid = low + (high - low) / 2;
		match key.cmp(&items[mid].key) {
			Ordering::Less => high = mid,
			Ordering::Equal => return Probe::Hit(mid),
			Ordering::Greater => low = mid + 1,
		}
	}

	Probe::Miss(low)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn leaf_items(keys: &[u32]) -> Vec<Item<u32>> {
		keys.iter().map(|&key| Item { key, right: None }).collect()
	}

	#[test]
	fn probe_hits_every_present_key() {
		let items = leaf_items(&[2, 4, 6, 8, 10]);
		for (index, item) in items.iter().enumerate() {
			match probe(&items, &item.key) {
				Probe::Hit(found) => assert_eq!(found, index),
				Probe::Miss(_) => panic!("missed key {}", item.key),
			}
		}
	}

	#[test]
	fn probe_reports_descent_slot_for_misses() {
		let items = leaf_items(&[2, 4, 6, 8]);
		for (key, slot) in [(1, 0), (3, 1), (5, 2), (7, 3), (9, 4)] {
			match probe(&items, &key) {
				Probe::Miss(found) => assert_eq!(found, slot, "slot for probe {key}"),
				Probe::Hit(_) => panic!("{key} is not in the page"),
			}
		}
	}

	#[test]
	fn probe_on_empty_page_misses_at_slot_zero() {
		match probe::<u32>(&[], &7) {
			Probe::Miss(0) => {}
			_ => panic!("an empty page must miss at slot 0"),
		}
	}

	#[test]
	fn child_slots_cover_leftmost_and_items() {
		let a = PageId::new(1).unwrap();
		let b = PageId::new(2).unwrap();
		let node = Node {
			leftmost: Some(a),
			items: vec![Item {
				key: 5u32,
				right: Some(b),
			}],
		};
		assert!(!node.is_leaf());
		assert_eq!(node.child(0), Some(a));
		assert_eq!(node.child(1), Some(b));
	}

	#[test]
	fn well_formed_rejects_mixed_and_unsorted_pages() {
		let id = PageId::new(9).unwrap();
		let leaf = Node {
			leftmost: None,
			items: leaf_items(&[1, 2, 3]),
		};
		leaf.ensure_well_formed(id).unwrap();

		let mut mixed = leaf.clone();
		mixed.items[1].right = PageId::new(4);
		assert!(mixed.ensure_well_formed(id).is_err());

		let unsorted = Node {
			leftmost: None,
			items: leaf_items(&[3, 1, 2]),
		};
		assert!(unsorted.ensure_well_formed(id).is_err());
	}
}
