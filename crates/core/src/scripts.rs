//! Scripts evaluated inside the IDE renderer, and the shapes they return.
//!
//! Every script is an arrow function invoked with a single JSON argument and
//! starts with a `/*cascade:<name>*/` marker so it can be recognized in
//! protocol traces. Arguments are embedded as serialized JSON, never spliced
//! into the script text.

use cascade_protocol::{PopupItem, QuotaInfo, ScrollRequest};
use serde::Deserialize;
use serde_json::{Value, json};

/// Helpers shared by all scripts.
const PRELUDE: &str = r#"
	const chatRoot = () => document.getElementById('cascade')
		|| document.getElementById('conversation')
		|| document.getElementById('chat');
	const OVERLAYS = '[role="dialog"], [role="listbox"], [role="menu"], .monaco-menu-container, .context-view, [data-radix-popper-content-wrapper]';
	const isVisible = (el) => {
		const r = el.getBoundingClientRect();
		const s = getComputedStyle(el);
		return r.width > 0 && r.height > 0 && s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0';
	};
	const center = (el) => {
		const r = el.getBoundingClientRect();
		return { x: r.left + r.width / 2, y: r.top + r.height / 2 };
	};
	const signature = (el) => (el.textContent || '').trim().slice(0, 200);
"#;

const METADATA: &str = r#"
	if (!chatRoot()) return { found: false };
	let chatTitle = null;
	for (const sel of ['h1', 'h2', 'header', '[class*="title"]', '[class*="Title"]']) {
		const el = document.querySelector(sel);
		const text = el ? el.textContent.trim() : '';
		if (text.length > 2 && text.length < 80) { chatTitle = text; break; }
	}
	let quota = null;
	const badge = document.querySelector('.profile-badge, [class*="quota"]');
	if (badge) {
		const label = (badge.getAttribute('aria-label') || badge.textContent || '').trim();
		const pct = label.match(/(\d+(?:\.\d+)?)\s*%/);
		if (label) quota = { label: label.slice(0, 80), percent: pct ? parseFloat(pct[1]) : null };
	}
	return { found: true, chatTitle: chatTitle || 'Agent', isActive: document.hasFocus(), quota };
"#;

const CAPTURE: &str = r#"
	const pathOf = (el) => {
		const parts = [];
		let current = el;
		while (current && current !== document.body && current !== document.documentElement) {
			if (current.id) { parts.unshift('#' + CSS.escape(current.id)); break; }
			let part = current.tagName.toLowerCase();
			const parent = current.parentElement;
			if (parent) {
				const same = Array.from(parent.children).filter(c => c.tagName === current.tagName);
				if (same.length > 1) part += ':nth-of-type(' + (same.indexOf(current) + 1) + ')';
			}
			parts.unshift(part);
			current = parent;
		}
		return parts.join(' > ');
	};
	const root = chatRoot();
	if (!root) return null;

	const clickable = 'button, a, [role="button"], [class*="cursor-pointer"]';
	const live = Array.from(root.querySelectorAll(clickable));
	const clickMap = live.map(pathOf);
	const clone = root.cloneNode(true);
	Array.from(clone.querySelectorAll(clickable)).forEach((el, i) => {
		if (i < live.length) el.setAttribute('data-cdp-click', String(i));
	});

	const markers = Array.from(root.querySelectorAll(
		'[data-tooltip-id*="feedback"], [aria-label*="Good response"], [aria-label*="Bad response"], [class*="thumbs"]'
	));
	let hasFeedback = false;
	let fingerprint = null;
	if (markers.length >= 2) {
		hasFeedback = true;
		const last = markers[markers.length - 1];
		const block = last.closest('[class*="message"], [class*="response"]') || last.parentElement;
		const text = block ? block.textContent.trim() : '';
		fingerprint = markers.length + ':' + text.length + ':' + text.slice(-80);
	}

	const editor = clone.querySelector('[contenteditable="true"]');
	if (editor) {
		const box = editor.closest('div[class*="relative"]') || editor.parentElement;
		if (box && box !== clone) box.remove();
	}
	return { html: clone.outerHTML, clickMap, hasFeedback, fingerprint };
"#;

const STYLES: &str = r#"
	let css = '';
	for (const sheet of document.styleSheets) {
		try {
			for (const rule of sheet.cssRules) {
				css += rule.cssText
					.replace(/(^|[\s,}])body(?=[\s,{])/gi, '$1#chat-viewport')
					.replace(/(^|[\s,}])html(?=[\s,{])/gi, '$1#chat-viewport') + '\n';
			}
		} catch (e) { }
	}
	return css;
"#;

const LOCATE: &str = r#"
	const el = document.querySelector(arg.path);
	if (!el) return { found: false };
	el.scrollIntoView({ block: 'center', inline: 'center' });
	return { found: true, ...center(el), text: (el.textContent || '').trim().slice(0, 50) };
"#;

const OVERLAY_SIGNATURES: &str = r#"
	return Array.from(document.querySelectorAll(OVERLAYS)).filter(isVisible).map(signature);
"#;

const EXTRACT_POPUP: &str = r#"
	const before = new Set(arg.before);
	const rowSelector = '[role="option"], [role="menuitem"], [role="menuitemcheckbox"], [role="menuitemradio"], .monaco-list-row, .action-item, li';
	for (const box of Array.from(document.querySelectorAll(OVERLAYS)).filter(isVisible)) {
		if (before.has(signature(box))) continue;
		const rows = Array.from(box.querySelectorAll(rowSelector)).filter(isVisible);
		const items = [];
		for (const row of rows) {
			const lines = (row.innerText || row.textContent || '').split('\n').map(s => s.trim()).filter(Boolean);
			if (!lines.length) continue;
			const group = row.closest('[role="group"]');
			items.push({
				title: lines[0],
				description: lines[1] || null,
				badges: Array.from(row.querySelectorAll('[class*="badge"], [class*="tag"]')).map(b => b.textContent.trim()).filter(Boolean),
				checked: row.getAttribute('aria-checked') === 'true' || row.getAttribute('aria-selected') === 'true' || !!row.querySelector('.codicon-check'),
				header: group ? group.getAttribute('aria-label') : null,
				...center(row),
			});
		}
		if (items.length) return items;
	}
	return [];
"#;

const FIND_POPUP_ITEM: &str = r#"
	const boxes = Array.from(document.querySelectorAll(OVERLAYS)).filter(isVisible).reverse();
	for (const box of boxes) {
		if (!(box.textContent || '').includes(arg.title)) continue;
		let hit = box;
		for (const el of box.querySelectorAll('*')) {
			if ((el.textContent || '').includes(arg.title) && isVisible(el)) hit = el;
		}
		return { found: true, ...center(hit), text: (hit.textContent || '').trim().slice(0, 50) };
	}
	return { found: false };
"#;

const SCROLL: &str = r#"
	const root = chatRoot();
	if (!root) return { found: false };
	const scrollable = (el) => {
		const s = getComputedStyle(el);
		return /(auto|scroll)/.test(s.overflowY) && el.scrollHeight > el.clientHeight + 1;
	};
	let target = null;
	let level = [root];
	for (let depth = 0; depth <= arg.depth && level.length && !target; depth++) {
		target = level.find(scrollable) || null;
		level = level.flatMap(el => Array.from(el.children));
	}
	if (!target) return { found: false };
	const max = Math.max(0, target.scrollHeight - target.clientHeight);
	let top = typeof arg.scrollTop === 'number' ? arg.scrollTop
		: typeof arg.ratio === 'number' ? arg.ratio * max
		: target.scrollTop;
	top = Math.min(Math.max(top, 0), max);
	const previous = target.scrollTop;
	target.scrollTop = top;
	target.dispatchEvent(new Event('scroll', { bubbles: true }));
	return { found: true, ...center(target), scrollTop: top, direction: Math.sign(top - previous) };
"#;

const INSERT_MESSAGE: &str = r#"
	const editor = document.querySelector('[contenteditable="true"]') || document.querySelector('textarea');
	if (!editor) return { ok: false, reason: 'no editor found' };
	editor.focus();
	if (editor.tagName === 'TEXTAREA') {
		const setter = Object.getOwnPropertyDescriptor(window.HTMLTextAreaElement.prototype, 'value').set;
		setter.call(editor, arg.text);
		editor.dispatchEvent(new Event('input', { bubbles: true }));
	} else {
		document.execCommand('selectAll', false, null);
		document.execCommand('insertText', false, arg.text);
	}
	await new Promise(r => setTimeout(r, 100));
	const btn = document.querySelector('button[class*="arrow"]')
		|| document.querySelector('button[aria-label*="Send"]')
		|| document.querySelector('button[type="submit"]');
	return { ok: true, button: btn ? center(btn) : null };
"#;

const NEW_CONVERSATION: &str = r#"
	const btn = document.querySelector('[data-tooltip-id="new-conversation-tooltip"]');
	if (!btn) return { found: false };
	return { found: true, ...center(btn) };
"#;

fn invoke(name: &str, body: &str, arg: Value, is_async: bool) -> String {
	let prefix = if is_async { "async " } else { "" };
	format!("/*cascade:{name}*/({prefix}(arg) => {{{PRELUDE}{body}}})({arg})")
}

/// Name embedded in a script's leading marker.
pub fn script_name(expression: &str) -> Option<&str> {
	let rest = expression.strip_prefix("/*cascade:")?;
	rest.split_once("*/").map(|(name, _)| name)
}

pub fn metadata() -> String {
	invoke("metadata", METADATA, Value::Null, false)
}

pub fn capture() -> String {
	invoke("capture", CAPTURE, Value::Null, false)
}

pub fn styles() -> String {
	invoke("styles", STYLES, Value::Null, false)
}

/// Scrolls the element at `path` into view and reports its new center.
pub fn locate(path: &str) -> String {
	invoke("locate", LOCATE, json!({ "path": path }), false)
}

pub fn overlay_signatures() -> String {
	invoke("overlay-signatures", OVERLAY_SIGNATURES, Value::Null, false)
}

/// Items of the first visible overlay whose signature is not in `before`.
pub fn extract_popup(before: &[String]) -> String {
	invoke("extract-popup", EXTRACT_POPUP, json!({ "before": before }), false)
}

/// Newest visible overlay entry whose text contains `title`.
pub fn find_popup_item(title: &str) -> String {
	invoke("find-popup-item", FIND_POPUP_ITEM, json!({ "title": title }), false)
}

pub fn scroll(request: ScrollRequest, depth: u32) -> String {
	invoke(
		"scroll",
		SCROLL,
		json!({ "scrollTop": request.scroll_top, "ratio": request.ratio, "depth": depth }),
		false,
	)
}

/// Must be evaluated with `awaitPromise`.
pub fn insert_message(text: &str) -> String {
	invoke("insert-message", INSERT_MESSAGE, json!({ "text": text }), true)
}

pub fn new_conversation() -> String {
	invoke("new-conversation", NEW_CONVERSATION, Value::Null, false)
}

/// Result of the metadata script.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetadataReport {
	pub found: bool,
	pub chat_title: Option<String>,
	pub is_active: bool,
	pub quota: Option<QuotaInfo>,
}

/// Viewport position of a live element.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ElementTarget {
	pub found: bool,
	pub x: f64,
	pub y: f64,
	pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScrollResult {
	pub found: bool,
	pub x: f64,
	pub y: f64,
	pub scroll_top: f64,
	/// Sign of the applied movement: -1, 0 or 1.
	pub direction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Point {
	pub x: f64,
	pub y: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InsertResult {
	pub ok: bool,
	pub reason: Option<String>,
	pub button: Option<Point>,
}

/// Overlay items as returned by [`extract_popup`].
pub type PopupItems = Vec<PopupItem>;
