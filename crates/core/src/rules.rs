//! Classification of tapped mirror elements.
//!
//! A tap walks the element path from the innermost node outward. The first
//! blocked element stops the walk, and the first element carrying a click
//! index decides the outcome through [`RULES`], evaluated in order.

use std::sync::LazyLock;

use regex::Regex;

/// What the mirror knows about one element on the tap path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementInfo {
	pub tag: String,
	pub role: Option<String>,
	pub class: String,
	pub id: Option<String>,
	/// Trimmed text content.
	pub text: String,
	pub aria_haspopup: Option<String>,
	/// Value of `data-cdp-click`, when stamped.
	pub cdp_index: Option<usize>,
	/// Contains paragraphs, code, tables, lists or frames.
	pub has_block_content: bool,
	/// Number of `option`/`vscode-option` descendants.
	pub option_count: usize,
	/// Value of `data-file-name`, when present.
	pub file_name: Option<String>,
}

impl ElementInfo {
	pub fn new(tag: impl Into<String>) -> Self {
		Self {
			tag: tag.into(),
			..Default::default()
		}
	}

	fn is_tag(&self, tag: &str) -> bool {
		self.tag.eq_ignore_ascii_case(tag)
	}

	fn role(&self) -> &str {
		self.role.as_deref().unwrap_or_default()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
	/// Native selection or editing should win; nothing is sent.
	Blocked,
	/// Has its own option list, rendered locally.
	NativeDropdown { index: usize },
	/// Opens an IDE overlay; use popup extraction.
	PopupTrigger { index: usize },
	/// Plain click on an element naming a file.
	FileLink { index: usize, name: String },
	Click { index: usize },
	/// No actionable element on the path.
	Ignored,
}

/// The clickable element under consideration plus its parent on the path.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
	pub element: &'a ElementInfo,
	pub parent: Option<&'a ElementInfo>,
	pub index: usize,
}

pub struct Rule {
	pub name: &'static str,
	pub applies: fn(&Candidate<'_>) -> bool,
	pub classify: fn(&Candidate<'_>) -> Classification,
}

/// Outcome rules for an actionable element, highest priority first.
pub static RULES: &[Rule] = &[
	Rule {
		name: "native-dropdown",
		applies: |c| c.element.option_count > 0 || c.element.is_tag("SELECT") || c.element.is_tag("VSCODE-DROPDOWN"),
		classify: |c| Classification::NativeDropdown { index: c.index },
	},
	Rule {
		name: "popup-trigger",
		applies: is_popup_trigger,
		classify: |c| Classification::PopupTrigger { index: c.index },
	},
	Rule {
		name: "file-link",
		applies: |c| c.element.file_name.is_some() || file_name(&c.element.text).is_some(),
		classify: |c| Classification::FileLink {
			index: c.index,
			name: c
				.element
				.file_name
				.clone()
				.or_else(|| file_name(&c.element.text))
				.unwrap_or_default(),
		},
	},
	Rule {
		name: "click",
		applies: |_| true,
		classify: |c| Classification::Click { index: c.index },
	},
];

/// Popup trigger heuristics, any match wins.
pub static POPUP_TRIGGER_RULES: &[(&str, fn(&ElementInfo) -> bool)] = &[
	("role", |e: &ElementInfo| ROLE_LIST.is_match(e.role())),
	("class", |e: &ElementInfo| TRIGGER_CLASS.is_match(&e.class)),
	("select-none", |e: &ElementInfo| {
		SELECT_NONE.is_match(&e.class) && e.text.chars().count() < 50
	}),
	("known-label", |e: &ElementInfo| {
		e.text.chars().count() < 40 && KNOWN_LABEL.is_match(&e.text)
	}),
	("aria-haspopup", has_popup_attr),
	("listbox-button-id", |e: &ElementInfo| {
		e.id.as_deref().is_some_and(|id| LISTBOX_BUTTON.is_match(id))
	}),
];

static BLOCKED_TAG: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)^(CODE|PRE|TABLE|THEAD|TBODY|TR|TH|TD|SUMMARY|DETAILS|INPUT|TEXTAREA)$").unwrap()
});
static ACTION_TAG: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?i)^(A|BUTTON|SPAN|I|SVG|PATH|SELECT|VSCODE-DROPDOWN)$").unwrap());
static ACTION_ROLE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?i)^(button|menuitem|option|combobox|listbox|tab)$").unwrap());
static ACTION_CLASS: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)pointer|btn|button|action|clickable|menu|toolbar|select|dropdown|backdrop|overlay|dialog|context-view")
		.unwrap()
});
static ROLE_LIST: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"combobox|listbox").unwrap());
static TRIGGER_CLASS: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?i)dropdown|select|picker|combobox|trigger").unwrap());
static SELECT_NONE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)select-none").unwrap());
static KNOWN_LABEL: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"(?i)^(planning|fast|normal|gemini|claude|gpt|o1|o3|o4|always run|ask first|never)").unwrap()
});
static LISTBOX_BUTTON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"headlessui-listbox-button").unwrap());
static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(
		r"(?i)\b([\w.-]+\.(?:md|txt|js|ts|jsx|tsx|py|rs|go|java|c|cpp|h|css|html|json|yaml|yml|toml|xml|sh|bash|sql|rb|php|swift|kt|vue|svelte))\b",
	)
	.unwrap()
});

/// First file name mentioned in `text`.
pub fn file_name(text: &str) -> Option<String> {
	FILE_NAME.captures(text).map(|c| c[1].to_string())
}

fn has_popup_attr(element: &ElementInfo) -> bool {
	matches!(element.aria_haspopup.as_deref(), Some("listbox" | "true"))
}

/// Whether the candidate looks like it opens an IDE overlay.
pub fn is_popup_trigger(candidate: &Candidate<'_>) -> bool {
	let element = candidate.element;
	if element.is_tag("SELECT") || element.is_tag("VSCODE-DROPDOWN") {
		return true;
	}
	if POPUP_TRIGGER_RULES.iter().any(|(_, rule)| rule(element)) {
		return true;
	}
	candidate.parent.is_some_and(|parent| {
		has_popup_attr(parent)
			|| parent.id.as_deref().is_some_and(|id| LISTBOX_BUTTON.is_match(id))
			|| ROLE_LIST.is_match(parent.role())
	})
}

fn is_actionable(element: &ElementInfo) -> bool {
	ACTION_TAG.is_match(&element.tag)
		|| ACTION_ROLE.is_match(element.role())
		|| (element.is_tag("DIV") && ACTION_CLASS.is_match(&element.class) && !element.has_block_content)
}

/// Classifies a tap from its element path, innermost element first.
pub fn classify_element(path: &[ElementInfo]) -> Classification {
	for (position, element) in path.iter().enumerate() {
		if BLOCKED_TAG.is_match(&element.tag) {
			return Classification::Blocked;
		}
		let Some(index) = element.cdp_index else {
			continue;
		};
		if !is_actionable(element) {
			return Classification::Ignored;
		}
		let candidate = Candidate {
			element,
			parent: path.get(position + 1),
			index,
		};
		return RULES
			.iter()
			.find(|rule| (rule.applies)(&candidate))
			.map(|rule| (rule.classify)(&candidate))
			.unwrap_or(Classification::Ignored);
	}
	Classification::Ignored
}
