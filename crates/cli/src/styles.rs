//! Help output styling for the `cascade` command.

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;

/// Green bold headings with cyan flags and placeholders. Errors are red.
pub fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.error(AnsiColor::Red.on_default().bold())
}
