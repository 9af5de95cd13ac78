//! Minimal markup tree for snapshot HTML.
//!
//! Snapshots are the serialized output of a live DOM, so the parser only has
//! to cope with well-formed markup: void elements, self-closing foreign
//! elements, raw-text elements and comments. Text is kept in its escaped
//! form and written back verbatim; attribute values are decoded.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of an element in a mirror tree. Survives patching.
pub type NodeId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> NodeId {
	NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

const VOID: &[&str] = &[
	"area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];
const RAW_TEXT: &[&str] = &["script", "style", "textarea"];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	Element(Element),
	/// Escaped text.
	Text(String),
	Comment(String),
}

#[derive(Debug, Clone)]
pub struct Element {
	pub id: NodeId,
	/// Lowercase tag name.
	pub tag: String,
	pub attrs: Vec<(String, String)>,
	pub children: Vec<Node>,
}

/// Structural equality, ignoring node ids.
impl PartialEq for Element {
	fn eq(&self, other: &Self) -> bool {
		self.tag == other.tag && self.attrs == other.attrs && self.children == other.children
	}
}

impl Element {
	pub fn new(tag: impl Into<String>) -> Self {
		Self {
			id: next_id(),
			tag: tag.into().to_ascii_lowercase(),
			attrs: Vec::new(),
			children: Vec::new(),
		}
	}

	pub fn with_attr(mut self, name: &str, value: &str) -> Self {
		self.set_attr(name, value);
		self
	}

	pub fn attr(&self, name: &str) -> Option<&str> {
		self.attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
	}

	pub fn set_attr(&mut self, name: &str, value: &str) {
		match self.attrs.iter_mut().find(|(n, _)| n == name) {
			Some(slot) => slot.1 = value.to_string(),
			None => self.attrs.push((name.to_string(), value.to_string())),
		}
	}

	pub fn remove_attr(&mut self, name: &str) -> Option<String> {
		let position = self.attrs.iter().position(|(n, _)| n == name)?;
		Some(self.attrs.remove(position).1)
	}

	pub fn has_class(&self, class: &str) -> bool {
		self.attr("class").is_some_and(|c| c.split_whitespace().any(|c| c == class))
	}

	pub fn is_void(&self) -> bool {
		VOID.contains(&self.tag.as_str())
	}

	/// Value of one inline style property.
	pub fn style(&self, property: &str) -> Option<&str> {
		self.attr("style")?.split(';').find_map(|decl| {
			let (name, value) = decl.split_once(':')?;
			(name.trim().eq_ignore_ascii_case(property)).then(|| value.trim())
		})
	}

	/// Sets one inline style property, keeping the others in order.
	pub fn set_style(&mut self, property: &str, value: &str) {
		let mut declarations: Vec<String> = self
			.attr("style")
			.unwrap_or_default()
			.split(';')
			.map(str::trim)
			.filter(|d| !d.is_empty())
			.map(str::to_string)
			.collect();
		let replacement = format!("{property}: {value}");
		match declarations.iter_mut().find(|d| {
			d.split_once(':')
				.is_some_and(|(name, _)| name.trim().eq_ignore_ascii_case(property))
		}) {
			Some(slot) => *slot = replacement,
			None => declarations.push(replacement),
		}
		let style = declarations.join("; ");
		self.set_attr("style", &style);
	}

	/// Inline style length in pixels, e.g. `top: 120px`.
	pub fn style_px(&self, property: &str) -> Option<f64> {
		let value = self.style(property)?;
		value.trim_end_matches("px").trim().parse().ok().filter(|v: &f64| v.is_finite())
	}

	/// Decoded text of all descendant text nodes.
	pub fn text_content(&self) -> String {
		let mut out = String::new();
		self.collect_text(&mut out);
		decode_entities(&out)
	}

	fn collect_text(&self, out: &mut String) {
		for child in &self.children {
			match child {
				Node::Text(text) => out.push_str(text),
				Node::Element(element) => element.collect_text(out),
				Node::Comment(_) => {}
			}
		}
	}

	pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
		self.children.iter().filter_map(Node::as_element)
	}

	pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
		self.children.iter_mut().filter_map(Node::as_element_mut)
	}

	/// First descendant (excluding `self`) matching `predicate`, depth-first.
	pub fn find(&self, predicate: &dyn Fn(&Element) -> bool) -> Option<&Element> {
		for child in self.child_elements() {
			if predicate(child) {
				return Some(child);
			}
			if let Some(hit) = child.find(predicate) {
				return Some(hit);
			}
		}
		None
	}

	/// Visits every descendant element, parents before children.
	pub fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
		for child in self.child_elements_mut() {
			f(child);
			child.for_each_mut(f);
		}
	}

	/// Chain of elements from `self` down to the element with `id`, inclusive.
	pub fn path_to(&self, id: NodeId) -> Option<Vec<&Element>> {
		if self.id == id {
			return Some(vec![self]);
		}
		for child in self.child_elements() {
			if let Some(mut path) = child.path_to(id) {
				path.insert(0, self);
				return Some(path);
			}
		}
		None
	}

	pub fn to_html(&self) -> String {
		let mut out = String::new();
		self.write_html(&mut out);
		out
	}

	fn write_html(&self, out: &mut String) {
		out.push('<');
		out.push_str(&self.tag);
		for (name, value) in &self.attrs {
			out.push(' ');
			out.push_str(name);
			out.push_str("=\"");
			out.push_str(&value.replace('"', "&quot;"));
			out.push('"');
		}
		out.push('>');
		if self.is_void() {
			return;
		}
		for child in &self.children {
			match child {
				Node::Element(element) => element.write_html(out),
				Node::Text(text) => out.push_str(text),
				Node::Comment(text) => {
					out.push_str("<!--");
					out.push_str(text);
					out.push_str("-->");
				}
			}
		}
		out.push_str("</");
		out.push_str(&self.tag);
		out.push('>');
	}
}

impl Node {
	pub fn as_element(&self) -> Option<&Element> {
		match self {
			Node::Element(element) => Some(element),
			_ => None,
		}
	}

	pub fn as_element_mut(&mut self) -> Option<&mut Element> {
		match self {
			Node::Element(element) => Some(element),
			_ => None,
		}
	}
}

/// Decodes the handful of entities a serialized DOM emits.
pub fn decode_entities(text: &str) -> String {
	if !text.contains('&') {
		return text.to_string();
	}
	text.replace("&nbsp;", "\u{a0}")
		.replace("&lt;", "<")
		.replace("&gt;", ">")
		.replace("&quot;", "\"")
		.replace("&#39;", "'")
		.replace("&amp;", "&")
}

/// Parses a fragment into a list of top-level nodes.
pub fn parse_fragment(html: &str) -> Vec<Node> {
	Parser { src: html, pos: 0 }.parse()
}

/// Parses `html` as the children of a fresh `<tag>` element.
pub fn parse_into(tag: &str, html: &str) -> Element {
	let mut root = Element::new(tag);
	root.children = parse_fragment(html);
	root
}

struct Parser<'a> {
	src: &'a str,
	pos: usize,
}

impl<'a> Parser<'a> {
	fn rest(&self) -> &'a str {
		&self.src[self.pos..]
	}

	fn parse(mut self) -> Vec<Node> {
		// Open elements; index 0 collects top-level nodes.
		let mut stack: Vec<Element> = vec![Element::new("#fragment")];

		while self.pos < self.src.len() {
			let rest = self.rest();
			if let Some(comment) = rest.strip_prefix("<!--") {
				let end = comment.find("-->").unwrap_or(comment.len());
				push_node(&mut stack, Node::Comment(comment[..end].to_string()));
				self.pos += 4 + end + if end < comment.len() { 3 } else { 0 };
			} else if rest.starts_with("<!") || rest.starts_with("<?") {
				self.pos += rest.find('>').map_or(rest.len(), |i| i + 1);
			} else if rest.starts_with("</") {
				let end = rest.find('>').unwrap_or(rest.len());
				let tag = rest[2..end].trim().to_ascii_lowercase();
				self.pos += (end + 1).min(rest.len());
				close_element(&mut stack, &tag);
			} else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
				let (element, self_closing) = self.open_tag();
				if element.is_void() || self_closing {
					push_node(&mut stack, Node::Element(element));
				} else if RAW_TEXT.contains(&element.tag.as_str()) {
					let element = self.raw_text(element);
					push_node(&mut stack, Node::Element(element));
				} else {
					stack.push(element);
				}
			} else {
				let first = rest.chars().next().map_or(1, char::len_utf8);
				let end = rest[first..].find('<').map_or(rest.len(), |i| i + first);
				push_node(&mut stack, Node::Text(rest[..end].to_string()));
				self.pos += end;
			}
		}

		while stack.len() > 1 {
			let top = stack.pop().map(Node::Element);
			if let Some(node) = top {
				push_node(&mut stack, node);
			}
		}
		stack.pop().map(|root| root.children).unwrap_or_default()
	}

	/// Parses `<tag attrs...>` at the cursor. Returns the element and whether it was self-closing.
	fn open_tag(&mut self) -> (Element, bool) {
		self.pos += 1;
		let name_len = self
			.rest()
			.find(|c: char| c.is_whitespace() || c == '>' || c == '/')
			.unwrap_or(self.rest().len());
		let mut element = Element::new(&self.rest()[..name_len]);
		self.pos += name_len;

		loop {
			self.skip_whitespace();
			let rest = self.rest();
			if rest.is_empty() {
				return (element, false);
			}
			if let Some(after) = rest.strip_prefix("/>") {
				self.pos = self.src.len() - after.len();
				return (element, true);
			}
			if rest.starts_with('>') {
				self.pos += 1;
				return (element, false);
			}
			if rest.starts_with('/') {
				self.pos += 1;
				continue;
			}

			let name_len = rest
				.find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
				.unwrap_or(rest.len())
				.max(1);
			let name = rest[..name_len].to_ascii_lowercase();
			self.pos += name_len;
			self.skip_whitespace();

			let value = if self.rest().starts_with('=') {
				self.pos += 1;
				self.skip_whitespace();
				self.attr_value()
			} else {
				String::new()
			};
			element.attrs.push((name, decode_entities(&value)));
		}
	}

	fn attr_value(&mut self) -> String {
		let rest = self.rest();
		match rest.chars().next() {
			Some(quote @ ('"' | '\'')) => {
				let body = &rest[1..];
				let end = body.find(quote).unwrap_or(body.len());
				let value = body[..end].to_string();
				self.pos += 1 + end + usize::from(end < body.len());
				value
			}
			_ => {
				let end = rest
					.find(|c: char| c.is_whitespace() || c == '>')
					.unwrap_or(rest.len());
				self.pos += end;
				rest[..end].to_string()
			}
		}
	}

	fn raw_text(&mut self, mut element: Element) -> Element {
		let closing = format!("</{}", element.tag);
		let rest = self.rest();
		let end = rest.to_ascii_lowercase().find(&closing).unwrap_or(rest.len());
		if end > 0 {
			element.children.push(Node::Text(rest[..end].to_string()));
		}
		self.pos += end;
		let rest = self.rest();
		self.pos += rest.find('>').map_or(rest.len(), |i| i + 1);
		element
	}

	fn skip_whitespace(&mut self) {
		let rest = self.rest();
		self.pos += rest.len() - rest.trim_start().len();
	}
}

fn push_node(stack: &mut [Element], node: Node) {
	if let Some(top) = stack.last_mut() {
		top.children.push(node);
	}
}

/// Closes the innermost open `tag`, implicitly closing anything opened inside it.
/// A stray end tag is ignored.
fn close_element(stack: &mut Vec<Element>, tag: &str) {
	let Some(depth) = stack.iter().skip(1).rposition(|e| e.tag == tag) else {
		return;
	};
	let target = depth + 1;
	while stack.len() > target {
		if let Some(element) = stack.pop() {
			push_node(stack, Node::Element(element));
		}
	}
}
