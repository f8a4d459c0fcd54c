//! Command execution

use std::path::Path;

use super::Commands;
use super::{pipeline, workspace};
use crate::config::Settings;

impl Commands {
    /// Execute the selected command.
    ///
    /// # Errors
    /// Returns an error if settings cannot be loaded or the command fails.
    pub fn execute(&self, config: &Path) -> anyhow::Result<()> {
        if let Commands::Init = self {
            return pipeline::init(config);
        }
        let settings = Settings::load_or_create(config)?;

        match self {
            Commands::Init => Ok(()),
            Commands::Dump {
                tables,
                overwrite,
                quiet,
            } => pipeline::dump(settings, tables, *overwrite, *quiet),
            Commands::Autofill { rule } => pipeline::autofill(settings, rule.clone()),
            Commands::Build {
                no_sync,
                json,
                quiet,
            } => pipeline::build(settings, !*no_sync, *json, *quiet),
            Commands::Sync {
                goto_block,
                incremental,
                all,
            } => pipeline::sync(&settings, *goto_block, *incremental, *all),
            Commands::Status { asset, all, json } => {
                workspace::status(&settings, asset.as_deref(), *all, *json)
            }
            Commands::Find {
                text,
                translations,
                case_sensitive,
                limit,
            } => workspace::find(&settings, text, *translations, *case_sensitive, *limit),
            Commands::Edit { asset, field, text } => workspace::edit(&settings, asset, field, text),
            Commands::Review { asset, field } => workspace::review(&settings, asset, field),
            Commands::Orphans {
                confirm,
                asset,
                field,
            } => workspace::orphans(&settings, *confirm, asset.as_deref(), field.as_deref()),
            Commands::Export {
                output,
                asset,
                untranslated,
            } => workspace::export(&settings, output, asset.as_deref(), *untranslated),
            Commands::Import { input } => workspace::import(&settings, input),
        }
    }
}
