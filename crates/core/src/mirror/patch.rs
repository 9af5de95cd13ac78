//! In-place tree patching.
//!
//! The live tree is morphed toward the incoming one instead of being
//! replaced, so elements that survive keep their [`NodeId`] and whatever host
//! state hangs off it (focus, selection, scroll offset).
//!
//! [`NodeId`]: super::markup::NodeId

use std::mem;

use super::markup::{Element, Node};

/// What a patch touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchStats {
	/// Elements matched and kept.
	pub kept: usize,
	/// Nodes inserted from the incoming tree.
	pub inserted: usize,
	/// Live nodes dropped.
	pub removed: usize,
	/// Elements whose attribute list changed.
	pub attributes: usize,
	/// Text or comment nodes whose content changed.
	pub text: usize,
}

impl PatchStats {
	pub fn is_noop(&self) -> bool {
		self.inserted == 0 && self.removed == 0 && self.attributes == 0 && self.text == 0
	}
}

/// Morphs `live` into `incoming`. The tag of `live` is left alone.
pub fn morph(live: &mut Element, incoming: Element) -> PatchStats {
	let mut stats = PatchStats::default();
	morph_element(live, incoming, &mut stats);
	stats
}

fn morph_element(live: &mut Element, incoming: Element, stats: &mut PatchStats) {
	stats.kept += 1;
	if live.attrs != incoming.attrs {
		live.attrs = incoming.attrs;
		stats.attributes += 1;
	}
	morph_children(live, incoming.children, stats);
}

fn key(node: &Node) -> Option<&str> {
	node.as_element().and_then(|e| e.attr("id"))
}

/// Whether `live` can be morphed into `incoming` rather than replaced.
fn compatible(live: &Node, incoming: &Node) -> bool {
	match (live, incoming) {
		(Node::Element(a), Node::Element(b)) => a.tag == b.tag && a.attr("id") == b.attr("id"),
		(Node::Text(_), Node::Text(_)) | (Node::Comment(_), Node::Comment(_)) => true,
		_ => false,
	}
}

fn morph_children(live: &mut Element, incoming: Vec<Node>, stats: &mut PatchStats) {
	let mut old: Vec<Option<Node>> = mem::take(&mut live.children).into_iter().map(Some).collect();
	let mut cursor = 0;
	let mut next = Vec::with_capacity(incoming.len());

	for node in incoming {
		// Keyed elements may have moved anywhere; unkeyed ones only match in order.
		let matched = match key(&node) {
			Some(id) => old
				.iter()
				.position(|slot| slot.as_ref().is_some_and(|n| key(n) == Some(id) && compatible(n, &node))),
			None => {
				while old.get(cursor).is_some_and(|slot| slot.is_none()) {
					cursor += 1;
				}
				old.get(cursor)
					.and_then(Option::as_ref)
					.is_some_and(|n| compatible(n, &node))
					.then_some(cursor)
			}
		};

		let Some(position) = matched.and_then(|i| old[i].take().map(|n| (i, n))) else {
			stats.inserted += 1;
			next.push(node);
			continue;
		};
		let (index, existing) = position;
		if index == cursor {
			cursor += 1;
		}

		let merged = match (existing, node) {
			(Node::Element(mut current), Node::Element(replacement)) => {
				morph_element(&mut current, replacement, stats);
				Node::Element(current)
			}
			(Node::Text(current), Node::Text(replacement)) => Node::Text(update_text(current, replacement, stats)),
			(Node::Comment(current), Node::Comment(replacement)) => {
				Node::Comment(update_text(current, replacement, stats))
			}
			(_, replacement) => {
				stats.inserted += 1;
				stats.removed += 1;
				replacement
			}
		};
		next.push(merged);
	}

	stats.removed += old.iter().filter(|slot| slot.is_some()).count();
	live.children = next;
}

fn update_text(current: String, replacement: String, stats: &mut PatchStats) -> String {
	if current == replacement {
		return current;
	}
	stats.text += 1;
	replacement
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mirror::markup::parse_into;

	fn ids(root: &Element) -> Vec<u64> {
		root.child_elements().map(|e| e.id).collect()
	}

	#[test]
	fn identical_tree_is_a_noop() {
		let html = r#"<p>one</p><p>two</p>"#;
		let mut live = parse_into("div", html);
		let stats = morph(&mut live, parse_into("div", html));
		assert!(stats.is_noop());
		assert_eq!(live, parse_into("div", html));
	}

	#[test]
	fn unchanged_elements_keep_their_identity() {
		let mut live = parse_into("div", r#"<p>one</p><p>two</p>"#);
		let before = ids(&live);

		let stats = morph(&mut live, parse_into("div", r#"<p>one</p><p>two!</p><p>three</p>"#));
		assert_eq!(stats.text, 1);
		assert_eq!(stats.inserted, 1);
		assert_eq!(&ids(&live)[..2], &before[..]);
		assert_eq!(live.to_html(), "<div><p>one</p><p>two!</p><p>three</p></div>");
	}

	#[test]
	fn keyed_elements_are_matched_after_reordering() {
		let mut live = parse_into("div", r#"<section id="a">A</section><section id="b">B</section>"#);
		let a = live.find(&|e| e.attr("id") == Some("a")).unwrap().id;

		morph(&mut live, parse_into("div", r#"<section id="b">B</section><section id="a">A</section>"#));
		assert_eq!(live.child_elements().nth(1).unwrap().id, a);
		assert_eq!(live.to_html(), r#"<div><section id="b">B</section><section id="a">A</section></div>"#);
	}

	#[test]
	fn tag_change_replaces_the_node() {
		let mut live = parse_into("div", "<p>x</p><span>y</span>");
		let stats = morph(&mut live, parse_into("div", "<p>x</p><button>y</button>"));
		assert_eq!(stats.inserted, 1);
		assert_eq!(stats.removed, 1);
		assert_eq!(live.to_html(), "<div><p>x</p><button>y</button></div>");
	}

	#[test]
	fn attribute_changes_are_applied_in_place() {
		let mut live = parse_into("div", r#"<button class="a" data-cdp-click="0">Run</button>"#);
		let id = live.child_elements().next().unwrap().id;
		let stats = morph(&mut live, parse_into("div", r#"<button class="b" data-cdp-click="0">Run</button>"#));
		assert_eq!(stats.attributes, 1);
		let button = live.child_elements().next().unwrap();
		assert_eq!(button.id, id);
		assert_eq!(button.attr("class"), Some("b"));
	}
}
