// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod cli;
mod importers;
mod settings;

use anyhow::Context;
use tracing::{error, info};

use crate::cli::Command;

fn main() -> anyhow::Result<()> {
    let opts = cli::options().run();

    tracing_subscriber::fmt()
        .with_max_level(opts.verbosity_level)
        .init();

    match opts.command {
        Command::Verify { file, skinned } => importers::verify::verify(&file, skinned),
        Command::Reimport => {
            let settings_path = opts
                .settings
                .context("The import settings file must be given with --settings to reimport")?;
            let settings = settings::read(&settings_path)?;
            let mut failures = 0;
            for import in settings.imports() {
                if let Err(err) = importers::import(import) {
                    error!("Reimport failed: {err:?}");
                    failures += 1;
                }
            }
            info!(
                "Reimported {} of {} assets.",
                settings.imports().len() - failures,
                settings.imports().len(),
            );
            anyhow::ensure!(failures == 0, "{failures} reimports failed");
            Ok(())
        }
        import => {
            importers::import(&import)?;
            if let Some(settings_path) = &opts.settings {
                let mut settings = settings::read(settings_path)?;
                settings.record(import);
                settings::write(settings_path, &settings)?;
            }
            Ok(())
        }
    }
}
