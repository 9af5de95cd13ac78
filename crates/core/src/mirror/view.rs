//! Persistent mirror tree and the snapshot application pipeline.

use cascade_protocol::Snapshot;
use tracing::debug;

use super::layout::{ScrollMetrics, compress_virtual_rows, content_bottom};
use super::markup::{Element, NodeId, parse_fragment};
use super::patch::{PatchStats, morph};
use crate::rules::{self, Classification, ElementInfo, classify_element};

/// Id of the element snapshots are patched into.
pub const VIEWPORT_ID: &str = "chat-viewport";

const CLICK_ATTR: &str = "data-cdp-click";
const FILE_NAME_ATTR: &str = "data-file-name";
const POPUP_ROLES: &[&str] = &["dialog", "listbox", "menu"];
const POPUP_CLASSES: &[&str] = &["monaco-menu-container", "context-view"];
const BLOCK_TAGS: &[&str] = &["p", "pre", "code", "table", "ul", "ol", "iframe"];
const OPTION_TAGS: &[&str] = &["option", "vscode-option"];

/// The UI surface a [`MirrorView`] renders into.
pub trait MirrorHost {
	fn scroll_metrics(&self) -> ScrollMetrics;

	fn set_scroll_top(&mut self, top: f64);

	/// Shows text left behind in the IDE's own input control.
	fn input_text(&mut self, text: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
	/// Same content hash as the tree already shows.
	Skipped,
	Patched {
		stats: PatchStats,
		/// Scroll offset the host was moved to, if the view was anchored.
		anchored: Option<f64>,
	},
}

#[derive(Debug)]
pub struct MirrorView {
	root: Element,
	last_hash: Option<String>,
	surfaced_input: Option<String>,
}

impl Default for MirrorView {
	fn default() -> Self {
		Self::new()
	}
}

impl MirrorView {
	pub fn new() -> Self {
		Self {
			root: Element::new("div").with_attr("id", VIEWPORT_ID),
			last_hash: None,
			surfaced_input: None,
		}
	}

	pub fn root(&self) -> &Element {
		&self.root
	}

	pub fn last_hash(&self) -> Option<&str> {
		self.last_hash.as_deref()
	}

	/// Forgets the current content, as when another session is selected.
	pub fn reset(&mut self) {
		*self = Self::new();
	}

	/// Patches `snapshot` into the tree.
	///
	/// The view is re-anchored to the bottom of real content only when the
	/// host was already near the bottom or this is the first load.
	pub fn apply(&mut self, snapshot: &Snapshot, host: &mut dyn MirrorHost) -> ApplyOutcome {
		if self.last_hash.as_deref() == Some(snapshot.hash.as_str()) {
			return ApplyOutcome::Skipped;
		}
		let initial = self.last_hash.is_none();
		let at_bottom = host.scroll_metrics().is_near_bottom();

		let mut incoming = Element::new(self.root.tag.clone());
		incoming.attrs = self.root.attrs.clone();
		incoming.children = parse_fragment(&snapshot.html);

		self.surface_input(&incoming, host);
		strip_popups(&mut incoming);
		tag_file_names(&mut incoming);
		let compressed = compress_virtual_rows(&mut incoming);

		let stats = morph(&mut self.root, incoming);
		self.last_hash = Some(snapshot.hash.clone());

		let anchored = (initial || at_bottom).then(|| {
			let target = host.scroll_metrics().anchor_target(content_bottom(&self.root));
			host.set_scroll_top(target);
			target
		});
		debug!(
			target = "cascade.mirror",
			inserted = stats.inserted,
			removed = stats.removed,
			compressed,
			anchored = anchored.is_some(),
			"snapshot applied"
		);
		ApplyOutcome::Patched { stats, anchored }
	}

	fn surface_input(&mut self, incoming: &Element, host: &mut dyn MirrorHost) {
		let Some(editor) = incoming.find(&is_editor) else {
			return;
		};
		let text = match editor.tag.as_str() {
			"input" => editor.attr("value").unwrap_or_default().to_string(),
			_ => editor.text_content(),
		};
		let text = text.trim();
		if text.is_empty() || self.surfaced_input.as_deref() == Some(text) {
			return;
		}
		host.input_text(text);
		self.surfaced_input = Some(text.to_string());
	}

	/// Id of the element stamped with click index `index`.
	pub fn node_for_index(&self, index: usize) -> Option<NodeId> {
		let value = index.to_string();
		self.root
			.find(&|e| e.attr(CLICK_ATTR) == Some(value.as_str()))
			.map(|e| e.id)
	}

	/// Decides what a tap on `node` should do.
	pub fn classify(&self, node: NodeId) -> Classification {
		let Some(path) = self.root.path_to(node) else {
			return Classification::Ignored;
		};
		let infos: Vec<ElementInfo> = path.into_iter().rev().map(element_info).collect();
		classify_element(&infos)
	}
}

fn is_editor(element: &Element) -> bool {
	match element.tag.as_str() {
		"textarea" => true,
		"input" => element.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("text")),
		_ => element.attr("contenteditable") == Some("true"),
	}
}

fn is_popup(element: &Element) -> bool {
	element.attr("role").is_some_and(|role| POPUP_ROLES.contains(&role))
		|| POPUP_CLASSES.iter().any(|class| element.has_class(class))
}

/// Empties and hides overlays that were open in the IDE at capture time.
fn strip_popups(root: &mut Element) {
	root.for_each_mut(&mut |element| {
		if is_popup(element) {
			element.children.clear();
			element.set_style("display", "none");
		}
	});
}

fn tag_file_names(root: &mut Element) {
	root.for_each_mut(&mut |element| {
		if element.attr(CLICK_ATTR).is_none() || element.attr(FILE_NAME_ATTR).is_some() {
			return;
		}
		if let Some(name) = rules::file_name(&element.text_content()) {
			element.set_attr(FILE_NAME_ATTR, &name);
		}
	});
}

fn count(element: &Element, predicate: &dyn Fn(&Element) -> bool) -> usize {
	element
		.child_elements()
		.map(|child| usize::from(predicate(child)) + count(child, predicate))
		.sum()
}

fn element_info(element: &Element) -> ElementInfo {
	ElementInfo {
		tag: element.tag.clone(),
		role: element.attr("role").map(str::to_string),
		class: element.attr("class").unwrap_or_default().to_string(),
		id: element.attr("id").map(str::to_string),
		text: element.text_content().trim().to_string(),
		aria_haspopup: element.attr("aria-haspopup").map(str::to_string),
		cdp_index: element.attr(CLICK_ATTR).and_then(|v| v.parse().ok()),
		has_block_content: element.find(&|e| BLOCK_TAGS.contains(&e.tag.as_str())).is_some(),
		option_count: count(element, &|e| OPTION_TAGS.contains(&e.tag.as_str())),
		file_name: element.attr(FILE_NAME_ATTR).map(str::to_string),
	}
}
