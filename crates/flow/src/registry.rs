// Copyright (c) weirdb.io 2025
// This file is licensed under the Apache-2.0 license, see license.md file

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// A '/'-separated trie from path prefixes to shared values.
///
/// Lookups are read-copy-update: they load the current root and walk an
/// immutable tree, taking no lock. Registration and removal rebuild the
/// affected path copy-on-write under a single registration mutex and
/// swap the root. The registry is only mutated off the critical path;
/// lookups happen on every delivery.
pub struct PrefixRegistry<T> {
	root: Mutex<Arc<TrieNode<T>>>,
}

struct TrieNode<T> {
	value: Option<Arc<T>>,
	children: HashMap<String, Arc<TrieNode<T>>>,
}

impl<T> TrieNode<T> {
	fn empty() -> Self {
		Self {
			value: None,
			children: HashMap::new(),
		}
	}

	fn shallow_clone(&self) -> Self {
		Self {
			value: self.value.clone(),
			children: self.children.clone(),
		}
	}
}

fn components(prefix: &str) -> Vec<&str> {
	prefix.split('/').filter(|component| !component.is_empty()).collect()
}

impl<T> PrefixRegistry<T> {
	pub fn new() -> Self {
		Self {
			root: Mutex::new(Arc::new(TrieNode::empty())),
		}
	}

	fn load_root(&self) -> Arc<TrieNode<T>> {
		Arc::clone(&self.root.lock())
	}

	/// Rebuilds the path down to the node for `components`, applying
	/// `update` to (a shallow clone of) the target node, and swaps the
	/// new root in. `update` returns false to abort without swapping.
	fn update_path(
		&self,
		components: &[&str],
		create: bool,
		update: impl FnOnce(&mut TrieNode<T>) -> bool,
	) -> bool {
		let mut root_guard = self.root.lock();

		// Collect the existing nodes along the path.
		let mut chain: Vec<Arc<TrieNode<T>>> = vec![Arc::clone(&root_guard)];
		for component in components {
			match chain.last().and_then(|node| node.children.get(*component)) {
				Some(child) => chain.push(Arc::clone(child)),
				None if create => break,
				None => return false,
			}
		}
		let found = chain.len() - 1;

		// Clone the target (or a fresh node past the existing chain)
		// and apply the update.
		let mut target = if found == components.len() {
			chain[found].shallow_clone()
		} else {
			TrieNode::empty()
		};
		if !update(&mut target) {
			return false;
		}

		// Wire fresh nodes for any missing tail, then rebuild the
		// existing chain bottom-up.
		let mut rebuilt = Arc::new(target);
		for at in (found..components.len()).rev() {
			let mut parent = if at == found {
				chain[found].shallow_clone()
			} else {
				TrieNode::empty()
			};
			parent.children.insert(components[at].to_string(), rebuilt);
			rebuilt = Arc::new(parent);
		}
		for at in (0..found).rev() {
			let mut parent = chain[at].shallow_clone();
			parent.children.insert(components[at].to_string(), rebuilt);
			rebuilt = Arc::new(parent);
		}
		*root_guard = rebuilt;
		true
	}

	/// Registers `value` under `prefix` (format
	/// `/component/.../component/`; anything after the trailing
	/// separator is ignored). Fails if a value is already registered
	/// there.
	pub fn register_prefix(&self, prefix: &str, value: T) -> bool {
		let components = components(prefix);
		self.update_path(&components, true, |node| {
			if node.value.is_some() {
				return false;
			}
			node.value = Some(Arc::new(value));
			true
		})
	}

	/// Clears the value at `prefix`. The node stays if it has
	/// children.
	pub fn remove_prefix(&self, prefix: &str) -> bool {
		let components = components(prefix);
		self.update_path(&components, false, |node| {
			if node.value.is_none() {
				return false;
			}
			node.value = None;
			true
		})
	}

	/// Atomically replaces the value at `prefix` with `modifier(value)`
	/// under the registration lock. With `create`, absent path nodes
	/// are created.
	pub fn atomically_modify(
		&self,
		prefix: &str,
		modifier: impl FnOnce(Option<&Arc<T>>) -> Option<Arc<T>>,
		create: bool,
	) -> bool {
		let components = components(prefix);
		self.update_path(&components, create, |node| {
			node.value = modifier(node.value.as_ref());
			true
		})
	}

	pub fn is_registered(&self, prefix: &str) -> bool {
		self.get_value(prefix).is_some()
	}

	pub fn get_value(&self, prefix: &str) -> Option<Arc<T>> {
		let mut node = self.load_root();
		for component in components(prefix) {
			node = Arc::clone(node.children.get(component)?);
		}
		node.value.clone()
	}

	/// Walks `path`'s pathname from the root, emitting every value
	/// registered along the way, shortest prefix first. The collector
	/// receives the matched prefix (ending in '/') and the value.
	pub fn collect_values_for_prefixes(&self, path: &str, mut collector: impl FnMut(&str, &Arc<T>)) {
		let pathname = match path.rfind('/') {
			Some(at) => &path[..=at],
			None => return,
		};
		let mut node = self.load_root();
		let mut prefix = String::from("/");
		if let Some(value) = &node.value {
			collector(&prefix, value);
		}
		for component in components(pathname) {
			match node.children.get(component) {
				None => return,
				Some(child) => {
					let child = Arc::clone(child);
					prefix.push_str(component);
					prefix.push('/');
					if let Some(value) = &child.value {
						collector(&prefix, value);
					}
					node = child;
				}
			}
		}
	}
}

impl<T> Default for PrefixRegistry<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn collect(registry: &PrefixRegistry<u32>, path: &str) -> Vec<(String, u32)> {
		let mut out = Vec::new();
		registry.collect_values_for_prefixes(path, |prefix, value| {
			out.push((prefix.to_string(), **value));
		});
		out
	}

	#[test]
	fn test_register_and_lookup() {
		let registry = PrefixRegistry::new();
		assert!(registry.register_prefix("/pool/a/", 1));
		assert!(registry.register_prefix("/pool/", 2));
		assert!(registry.register_prefix("/pool/a/deep/", 3));

		assert!(registry.is_registered("/pool/a/"));
		assert_eq!(registry.get_value("/pool/").as_deref(), Some(&2));
		assert!(!registry.is_registered("/pool/missing/"));
	}

	#[test]
	fn test_double_registration_fails() {
		let registry = PrefixRegistry::new();
		assert!(registry.register_prefix("/pool/a/", 1));
		assert!(!registry.register_prefix("/pool/a/", 2));
		assert_eq!(registry.get_value("/pool/a/").as_deref(), Some(&1));
	}

	#[test]
	fn test_collect_is_shortest_first() {
		let registry = PrefixRegistry::new();
		registry.register_prefix("/pool/", 1);
		registry.register_prefix("/pool/a/", 2);
		registry.register_prefix("/pool/a/b/", 3);
		registry.register_prefix("/other/", 9);

		let matched = collect(&registry, "/pool/a/b/key");
		assert_eq!(
			matched,
			vec![
				("/pool/".to_string(), 1),
				("/pool/a/".to_string(), 2),
				("/pool/a/b/".to_string(), 3)
			]
		);

		// Only the pathname participates: a key directly under /pool/
		// does not match /pool/a/.
		assert_eq!(collect(&registry, "/pool/key"), vec![("/pool/".to_string(), 1)]);
	}

	#[test]
	fn test_component_matching_is_exact() {
		let registry = PrefixRegistry::new();
		registry.register_prefix("/pool/a/", 1);
		// "/pool/ab/..." must not match "/pool/a/".
		assert!(collect(&registry, "/pool/ab/key").is_empty());
	}

	#[test]
	fn test_remove_keeps_children() {
		let registry = PrefixRegistry::new();
		registry.register_prefix("/pool/", 1);
		registry.register_prefix("/pool/a/", 2);

		assert!(registry.remove_prefix("/pool/"));
		assert!(!registry.remove_prefix("/pool/"));
		assert!(!registry.is_registered("/pool/"));
		assert_eq!(registry.get_value("/pool/a/").as_deref(), Some(&2));
	}

	#[test]
	fn test_atomically_modify_creates_and_replaces() {
		let registry = PrefixRegistry::new();
		registry.atomically_modify("/pool/a/", |current| {
			assert!(current.is_none());
			Some(Arc::new(10))
		}, true);
		registry.atomically_modify("/pool/a/", |current| {
			current.map(|value| Arc::new(**value + 1))
		}, false);
		assert_eq!(registry.get_value("/pool/a/").as_deref(), Some(&11));
	}

	#[test]
	fn test_lookups_race_registration() {
		use std::sync::atomic::{AtomicBool, Ordering};

		let registry = Arc::new(PrefixRegistry::new());
		registry.register_prefix("/stable/", 1);
		let done = Arc::new(AtomicBool::new(false));

		let reader = {
			let registry = Arc::clone(&registry);
			let done = Arc::clone(&done);
			std::thread::spawn(move || {
				while !done.load(Ordering::Acquire) {
					// The stable registration must stay visible no
					// matter what the writer is doing.
					assert_eq!(collect(&registry, "/stable/key").len(), 1);
				}
			})
		};

		for round in 0..1_000u32 {
			let prefix = format!("/churn/{}/", round % 16);
			registry.register_prefix(&prefix, round);
			registry.remove_prefix(&prefix);
		}
		done.store(true, Ordering::Release);
		reader.join().expect("reader panicked");
	}
}
