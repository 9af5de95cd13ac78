//! Virtualized list compensation and scroll anchoring.
//!
//! The IDE renders long conversations through a virtual list whose rows are
//! absolutely positioned inside a container padded to the full history
//! height. Only the rendered rows are captured, which leaves a large blank
//! band above them in the mirror.

use super::markup::Element;

const VIRTUAL_ROWS_CLASS: &str = "monaco-list-rows";
/// Leading offset below which rows are left untouched.
const MIN_COMPRESSIBLE_GAP: f64 = 100.0;
/// Distance from the bottom that still counts as "at the bottom".
pub const NEAR_BOTTOM_PX: f64 = 50.0;
/// Breathing room left below the last row when anchoring.
pub const ANCHOR_PADDING_PX: f64 = 60.0;

/// Scroll geometry of the mirror viewport as reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollMetrics {
	pub scroll_top: f64,
	pub scroll_height: f64,
	pub client_height: f64,
}

impl ScrollMetrics {
	pub fn max_scroll(&self) -> f64 {
		(self.scroll_height - self.client_height).max(0.0)
	}

	pub fn is_near_bottom(&self) -> bool {
		self.scroll_height - self.scroll_top - self.client_height < NEAR_BOTTOM_PX
	}

	/// Scroll offset that puts the bottom of real content at the bottom of the viewport.
	///
	/// Falls back to the nominal bottom when content fits the viewport, and
	/// never exceeds the scrollable range.
	pub fn anchor_target(&self, content_bottom: f64) -> f64 {
		let target = if content_bottom > self.client_height {
			content_bottom - self.client_height + ANCHOR_PADDING_PX
		} else {
			self.scroll_height
		};
		target.min(self.max_scroll())
	}
}

/// Shifts virtual rows up by their common leading gap and shrinks the padded
/// containers to match. Returns the number of lists compressed.
pub fn compress_virtual_rows(root: &mut Element) -> usize {
	let mut compressed = 0;
	compress_in(root, &mut compressed);
	compressed
}

fn compress_in(parent: &mut Element, compressed: &mut usize) {
	let mut gaps = Vec::new();
	for list in parent.child_elements_mut() {
		if !list.has_class(VIRTUAL_ROWS_CLASS) {
			continue;
		}
		let gap = list
			.child_elements()
			.filter_map(|row| row.style_px("top"))
			.fold(f64::INFINITY, f64::min);
		if !(gap.is_finite() && gap > MIN_COMPRESSIBLE_GAP) {
			continue;
		}
		for row in list.child_elements_mut() {
			if let Some(top) = row.style_px("top") {
				row.set_style("top", &px(top - gap));
			}
		}
		shrink_height(list, gap);
		gaps.push((list.id, gap));
		*compressed += 1;
	}

	// Spacer siblings of a compressed list are padded by the same gap.
	for (list_id, gap) in gaps {
		for sibling in parent.child_elements_mut() {
			if sibling.id != list_id {
				shrink_height(sibling, gap);
			}
		}
	}

	for child in parent.child_elements_mut() {
		compress_in(child, compressed);
	}
}

fn shrink_height(element: &mut Element, by: f64) {
	if let Some(height) = element.style_px("height") {
		if height > by {
			element.set_style("height", &px(height - by));
		}
	}
}

fn px(value: f64) -> String {
	format!("{value}px")
}

/// Lowest bottom edge among virtual rows, from their inline `top` and `height`.
pub fn content_bottom(root: &Element) -> f64 {
	let mut bottom: f64 = 0.0;
	visit(root, &mut |element| {
		if element.has_class(VIRTUAL_ROWS_CLASS) {
			for row in element.child_elements() {
				let top = row.style_px("top").unwrap_or(0.0);
				let height = row.style_px("height").unwrap_or(0.0);
				bottom = bottom.max(top + height);
			}
		}
	});
	bottom
}

fn visit(element: &Element, f: &mut dyn FnMut(&Element)) {
	f(element);
	for child in element.child_elements() {
		visit(child, f);
	}
}
