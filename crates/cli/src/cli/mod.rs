
use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::styles::cli_styles;

/// Mirror IDE chat panels to remote browsers.
#[derive(Parser, Debug)]
#[command(name = "cascade")]
#[command(about = "Mirror IDE chat panels over their remote-debug port and drive them from anywhere")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Configuration file (defaults to the user config directory)
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Port the mirror server listens on
	#[arg(short, long, value_name = "PORT")]
	pub port: Option<u16>,

	/// Address the mirror server binds to
	#[arg(long, value_name = "ADDR")]
	pub bind: Option<IpAddr>,

	/// Password clients log in with
	#[arg(long, value_name = "PASSWORD")]
	pub password: Option<String>,

	/// Remote-debug port to scan for IDE windows (repeatable)
	#[arg(long = "cdp-port", value_name = "PORT", action = clap::ArgAction::Append)]
	pub cdp_ports: Vec<u16>,

	/// Directory of static client pages served behind the login
	#[arg(long, value_name = "DIR")]
	pub static_dir: Option<PathBuf>,
}
