// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use bpaf::{
    batteries::verbose_by_slice, construct, long, positional, pure, short, OptionParser, Parser,
    ShellComp,
};
use engine::resources::assets::TextureFormat;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone)]
pub struct Options {
    pub verbosity_level: LevelFilter,
    pub settings: Option<PathBuf>,
    pub command: Command,
}

/// One invocation of the tool. The import commands are also what the import
/// settings file records, so they can be re-run with `reimport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Texture {
        image: PathBuf,
        output: PathBuf,
        format: ImportedTextureFormat,
        uncompressed: bool,
        mipmaps: bool,
    },
    Animation {
        description: PathBuf,
        output: PathBuf,
    },
    Model {
        description: PathBuf,
        output: PathBuf,
    },
    Verify {
        file: PathBuf,
        skinned: bool,
    },
    Reimport,
}

impl Command {
    /// The asset file written by the command, if it writes one.
    pub fn output(&self) -> Option<&Path> {
        match self {
            Command::Texture { output, .. }
            | Command::Animation { output, .. }
            | Command::Model { output, .. } => Some(output),
            Command::Verify { .. } | Command::Reimport => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportedTextureFormat {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
}

impl From<ImportedTextureFormat> for TextureFormat {
    fn from(format: ImportedTextureFormat) -> Self {
        match format {
            ImportedTextureFormat::R8 => TextureFormat::R8,
            ImportedTextureFormat::Rg8 => TextureFormat::Rg8,
            ImportedTextureFormat::Rgb8 => TextureFormat::Rgb8,
            ImportedTextureFormat::Rgba8 => TextureFormat::Rgba8,
        }
    }
}

impl FromStr for ImportedTextureFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r8" => Ok(ImportedTextureFormat::R8),
            "rg8" => Ok(ImportedTextureFormat::Rg8),
            "rgb8" => Ok(ImportedTextureFormat::Rgb8),
            "rgba8" => Ok(ImportedTextureFormat::Rgba8),
            _ => Err(format!("unknown texture format {s:?}, expected r8, rg8, rgb8 or rgba8")),
        }
    }
}

impl Display for ImportedTextureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImportedTextureFormat::R8 => "r8",
            ImportedTextureFormat::Rg8 => "rg8",
            ImportedTextureFormat::Rgb8 => "rgb8",
            ImportedTextureFormat::Rgba8 => "rgba8",
        };
        f.write_str(name)
    }
}

fn output() -> impl Parser<PathBuf> {
    short('o')
        .long("output")
        .help("The asset file to write")
        .argument::<PathBuf>("FILE")
}

fn description() -> impl Parser<PathBuf> {
    positional::<PathBuf>("DESCRIPTION")
        .help("A JSON description of the asset")
        .complete_shell(ShellComp::File {
            mask: Some("*.json"),
        })
}

pub fn options() -> OptionParser<Options> {
    let verbosity_level = verbose_by_slice(
        3,
        [
            LevelFilter::OFF,
            LevelFilter::ERROR,
            LevelFilter::WARN,
            LevelFilter::INFO,
            LevelFilter::DEBUG,
            LevelFilter::TRACE,
        ],
    );

    let settings = long("settings")
        .help("Records the imports in this import settings file, or reads them for reimport")
        .argument::<PathBuf>("FILE")
        .complete_shell(ShellComp::File {
            mask: Some("*.json"),
        })
        .optional();

    let texture = {
        let format = long("format")
            .help("The pixel format of the texture: r8, rg8, rgb8 or rgba8")
            .argument::<ImportedTextureFormat>("FORMAT")
            .fallback(ImportedTextureFormat::Rgba8)
            .display_fallback();
        let uncompressed = long("uncompressed")
            .help("Stores the mips without LZ4 compression")
            .switch();
        let mipmaps = long("no-mipmaps")
            .help("Only stores the full-size image")
            .flag(false, true);
        let output = output();
        let image = positional::<PathBuf>("IMAGE")
            .help("A png, jpeg, webp or qoi image")
            .complete_shell(ShellComp::File { mask: None });
        construct!(Command::Texture {
            format,
            uncompressed,
            mipmaps,
            output,
            image,
        })
        .to_options()
        .descr("Packs an image into a texture file (rtex)")
        .command("texture")
    };

    let animation = {
        let output = output();
        let description = description();
        construct!(Command::Animation {
            output,
            description,
        })
        .to_options()
        .descr("Packs a JSON keyframe description into an animation file (ranm)")
        .command("animation")
    };

    let model = {
        let output = output();
        let description = description();
        construct!(Command::Model {
            output,
            description,
        })
        .to_options()
        .descr("Packs a JSON scene description into a model file (rmdl)")
        .command("model")
    };

    let verify = {
        let skinned = long("skinned")
            .help("Loads model files with their bones and skeleton")
            .switch();
        let file = positional::<PathBuf>("FILE").help("A packed asset file");
        construct!(Command::Verify { skinned, file })
            .to_options()
            .descr("Sizes and loads a packed asset file like the engine would")
            .command("verify")
    };

    let reimport = pure(Command::Reimport)
        .to_options()
        .descr("Re-runs every import recorded in the import settings file")
        .command("reimport");

    let command = construct!([texture, animation, model, verify, reimport]);

    construct!(Options {
        verbosity_level,
        settings,
        command,
    })
    .to_options()
    .descr("Packs assets into the engine's asset file formats")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tracing::level_filters::LevelFilter;

    use super::{options, Command, ImportedTextureFormat};

    #[test]
    fn check_bpaf_invariants() {
        options().check_invariants(true);
    }

    #[test]
    fn texture_defaults() {
        let opts = options()
            .run_inner(&["texture", "-o", "grass.rtex", "grass.png"])
            .unwrap();
        assert_eq!(LevelFilter::INFO, opts.verbosity_level);
        assert_eq!(None, opts.settings);
        assert_eq!(
            Command::Texture {
                image: PathBuf::from("grass.png"),
                output: PathBuf::from("grass.rtex"),
                format: ImportedTextureFormat::Rgba8,
                uncompressed: false,
                mipmaps: true,
            },
            opts.command,
        );
    }

    #[test]
    fn verbosity_and_settings_are_global() {
        let opts = options()
            .run_inner(&["-vv", "--settings", "imports.json", "verify", "--skinned", "hero.rmdl"])
            .unwrap();
        assert_eq!(LevelFilter::TRACE, opts.verbosity_level);
        assert_eq!(Some(PathBuf::from("imports.json")), opts.settings);
        assert_eq!(
            Command::Verify {
                file: PathBuf::from("hero.rmdl"),
                skinned: true,
            },
            opts.command,
        );
    }

    #[test]
    fn unknown_formats_are_rejected() {
        assert!(options()
            .run_inner(&["texture", "--format", "bc7", "-o", "a.rtex", "a.png"])
            .is_err());
    }
}
