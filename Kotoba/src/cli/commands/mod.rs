//! Subcommand definitions

use clap::Subcommand;
use std::path::PathBuf;

pub mod execute;
pub mod pipeline;
pub mod workspace;

#[derive(Subcommand)]
pub enum Commands {
    /// Write default settings and create an empty workspace
    Init,

    /// Read the game container into the workspace
    Dump {
        /// Only merge these tables (repeatable)
        #[arg(short, long = "table")]
        tables: Vec<String>,

        /// Discard existing entries of the dumped assets
        #[arg(long)]
        overwrite: bool,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Fill repetitive entries from translated ones
    Autofill {
        /// Only run the rule with this name
        #[arg(short, long)]
        rule: Option<String>,
    },

    /// Rebuild the game assets from the workspace
    Build {
        /// Do not notify a running game
        #[arg(long)]
        no_sync: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Talk to a running game
    Sync {
        /// Jump the open story to this block
        #[arg(long, conflicts_with = "all")]
        goto_block: Option<u32>,

        /// With --goto-block: advance from the current block
        #[arg(long, requires = "goto_block")]
        incremental: bool,

        /// Reload every translation instead of the last build's assets
        #[arg(long)]
        all: bool,
    },

    /// Show translation progress
    Status {
        /// Only this asset
        #[arg(short, long)]
        asset: Option<String>,

        /// List every asset, not just unfinished ones
        #[arg(long)]
        all: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search source text
    Find {
        /// Text to look for
        text: String,

        /// Also search translations
        #[arg(short = 't', long)]
        translations: bool,

        /// Match case
        #[arg(short = 'c', long)]
        case_sensitive: bool,

        /// Maximum number of results
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Set the translation of one entry
    Edit {
        /// Asset id, e.g. `table/text` or `story/story_data/1001/script`
        asset: String,
        /// Field path, e.g. `1/text` or `block/0/text`
        field: String,
        /// New translation
        text: String,
    },

    /// Mark an entry as reviewed
    Review {
        asset: String,
        field: String,
    },

    /// List orphaned entries, or drop them
    Orphans {
        /// Drop the listed orphans
        #[arg(long)]
        confirm: bool,

        /// Only this asset
        #[arg(short, long)]
        asset: Option<String>,

        /// Only this field (requires --asset)
        #[arg(short, long, requires = "asset")]
        field: Option<String>,
    },

    /// Export entries for translators (.tsv or .csv)
    Export {
        /// Output file
        output: PathBuf,

        /// Only this asset
        #[arg(short, long)]
        asset: Option<String>,

        /// Only entries without a translation
        #[arg(short, long)]
        untranslated: bool,
    },

    /// Import translations from a .tsv or .csv file
    Import {
        /// Input file
        input: PathBuf,
    },
}
