// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::cli::Command;

/// The import settings file, containing the import commands of past
/// import-asset invocations, so that the assets can be packed again after the
/// source files (or the packers) change.
///
/// Has enum variants for breaking changes in the format of the settings file,
/// but [`read`] always returns the newest variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "settings_file_version", rename_all = "snake_case")]
pub enum ImportSettings {
    V1 { imports: Vec<Command> },
}

impl ImportSettings {
    pub fn imports(&self) -> &[Command] {
        match self {
            ImportSettings::V1 { imports } => imports,
        }
    }

    /// Adds the import command, replacing the earlier import of the same
    /// output file. Commands which don't write anything aren't recorded.
    pub fn record(&mut self, command: Command) {
        let ImportSettings::V1 { imports } = self;
        let Some(output) = command.output() else {
            return;
        };
        if let Some(existing) = imports.iter_mut().find(|c| c.output() == Some(output)) {
            *existing = command;
        } else {
            imports.push(command);
        }
    }
}

pub fn read(settings: &Path) -> anyhow::Result<ImportSettings> {
    let settings = if settings.exists() {
        let settings =
            fs::read_to_string(settings).context("Failed to open the import settings file")?;
        serde_json::from_str(&settings).context("Failed to parse the import settings file")?
    } else {
        ImportSettings::V1 {
            imports: Vec::new(),
        }
    };

    // NOTE: When there's new versions of ImportSettings, convert to the newest
    // here (record and reimport assume it)

    Ok(settings)
}

pub fn write(path: &Path, settings: &ImportSettings) -> anyhow::Result<()> {
    let json =
        serde_json::to_string_pretty(settings).context("Failed to serialize the import settings")?;
    fs::write(path, json).context("Failed to write the import settings file")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::cli::{Command, ImportedTextureFormat};

    use super::ImportSettings;

    #[test]
    fn settings_files_parse() {
        let json = r#"{
            "settings_file_version": "v1",
            "imports": [
                { "kind": "animation", "description": "walk.json", "output": "walk.ranm" },
                {
                    "kind": "texture",
                    "image": "grass.png",
                    "output": "grass.rtex",
                    "format": "rgb8",
                    "uncompressed": false,
                    "mipmaps": true
                }
            ]
        }"#;
        let settings: ImportSettings = serde_json::from_str(json).unwrap();
        assert_eq!(2, settings.imports().len());
        assert_eq!(
            Command::Texture {
                image: PathBuf::from("grass.png"),
                output: PathBuf::from("grass.rtex"),
                format: ImportedTextureFormat::Rgb8,
                uncompressed: false,
                mipmaps: true,
            },
            settings.imports()[1],
        );

        let written = serde_json::to_string(&settings).unwrap();
        assert_eq!(settings, serde_json::from_str::<ImportSettings>(&written).unwrap());
    }

    #[test]
    fn reimports_replace_earlier_imports() {
        let mut settings = ImportSettings::V1 {
            imports: Vec::new(),
        };
        settings.record(Command::Model {
            description: PathBuf::from("hero.json"),
            output: PathBuf::from("hero.rmdl"),
        });
        settings.record(Command::Verify {
            file: PathBuf::from("hero.rmdl"),
            skinned: true,
        });
        settings.record(Command::Model {
            description: PathBuf::from("hero_v2.json"),
            output: PathBuf::from("hero.rmdl"),
        });
        assert_eq!(
            &[Command::Model {
                description: PathBuf::from("hero_v2.json"),
                output: PathBuf::from("hero.rmdl"),
            }][..],
            settings.imports(),
        );
    }
}
