use std::path::PathBuf;

use clap::Subcommand;

/// Operations the command line can run against the store.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store an already encoded image read from FILE
    Capture { file: PathBuf },
    /// Print the live images
    List {
        /// Print a JSON array instead of one line per image
        #[arg(long)]
        json: bool,
    },
    /// Remove every expired image now
    Sweep,
    /// Remove every image
    Clear,
    /// Keep the store running with the periodic sweeper until Ctrl-C
    Watch,
}
