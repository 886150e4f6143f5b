//! Command-line front end: generate code for, upgrade, or replay a saved
//! analysis outside an interactive session.

use crate::config::EngineSettings;
use crate::saved_analysis::SavedAnalysis;
use crate::steps::simple_import::read_csv;
use crate::steps_manager::StepsManager;
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
#[command(name = "sheetstep", version, about = "Replay spreadsheet edits as pandas code")]
pub struct Cli {
    /// Settings file to use instead of the per-user one
    #[arg(long, global = true, env = "SHEETSTEP_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// A named input dataframe, given as `name=path.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArg {
    pub name: String,
    pub path: PathBuf,
}

fn parse_input(arg: &str) -> std::result::Result<InputArg, String> {
    let (name, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=path, got '{arg}'"))?;
    if name.trim().is_empty() || path.trim().is_empty() {
        return Err(format!("expected name=path, got '{arg}'"));
    }
    Ok(InputArg {
        name: name.trim().to_owned(),
        path: PathBuf::from(path.trim()),
    })
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the script a saved analysis generates
    Code {
        /// Saved analysis JSON file
        analysis: PathBuf,

        /// Input dataframe as name=path.csv (repeatable)
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<InputArg>,

        /// Precede each chunk with a comment describing it
        #[arg(long)]
        comments: bool,

        /// Emit every chunk as generated, without optimizing
        #[arg(long)]
        no_optimize: bool,
    },
    /// Print a saved analysis upgraded to the current format
    Upgrade {
        /// Saved analysis JSON file
        analysis: PathBuf,

        /// Write the upgraded analysis here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replay a saved analysis and print the shape of every sheet
    Replay {
        /// Saved analysis JSON file
        analysis: PathBuf,

        /// Input dataframe as name=path.csv (repeatable)
        #[arg(short, long = "input", value_parser = parse_input)]
        inputs: Vec<InputArg>,
    },
}

/// Settings from `path`, or the per-user settings file.
pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings {}", path.display()))?;
            EngineSettings::from_json(&json)
        }
        None => EngineSettings::load(),
    }
}

fn session(inputs: &[InputArg], settings: EngineSettings) -> Result<StepsManager> {
    let frames = inputs
        .iter()
        .map(|input| {
            read_csv(&input.path)
                .map(|df| (input.name.clone(), df))
                .with_context(|| format!("Failed to read input {}", input.path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(StepsManager::with_settings(frames, settings)?)
}

fn replayed(analysis: &Path, inputs: &[InputArg], settings: EngineSettings) -> Result<StepsManager> {
    let analysis = SavedAnalysis::from_file(analysis)?;
    let mut manager = session(inputs, settings)?;
    manager
        .load_analysis(&analysis)
        .context("Failed to replay saved analysis")?;
    Ok(manager)
}

/// Run one command, writing its output to `out`.
pub fn run_command(command: Commands, settings: EngineSettings, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Code {
            analysis,
            inputs,
            comments,
            no_optimize,
        } => {
            let settings = EngineSettings {
                optimize_code: settings.optimize_code && !no_optimize,
                ..settings
            };
            let manager = replayed(&analysis, &inputs, settings)?;
            let report = manager.optimization_report();
            tracing::info!(
                before = report.chunks_before,
                after = report.chunks_after,
                rewrites = report.rewrites,
                "generated code"
            );
            if comments {
                write!(out, "{}", manager.script())?;
            } else {
                for line in manager.transpiled_code() {
                    writeln!(out, "{line}")?;
                }
            }
        }
        Commands::Upgrade { analysis, output } => {
            let upgraded = SavedAnalysis::from_file(&analysis)?.upgrade()?;
            match output {
                Some(path) => {
                    upgraded.to_file(&path)?;
                    tracing::info!(path = %path.display(), "wrote upgraded analysis");
                }
                None => writeln!(out, "{}", upgraded.to_json()?)?,
            }
        }
        Commands::Replay { analysis, inputs } => {
            let manager = replayed(&analysis, &inputs, settings)?;
            for sheet in manager.current_state().sheets() {
                let (rows, columns) = sheet.data.shape();
                writeln!(out, "{}\t{rows} rows\t{columns} columns", sheet.name)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_input() {
        assert_eq!(
            parse_input("df1=data/a.csv"),
            Ok(InputArg {
                name: "df1".to_owned(),
                path: PathBuf::from("data/a.csv"),
            })
        );
        assert!(parse_input("data.csv").is_err());
        assert!(parse_input("=data.csv").is_err());
    }

    #[test]
    fn test_cli_parses_repeated_inputs() {
        let cli = Cli::parse_from([
            "sheetstep",
            "code",
            "analysis.json",
            "--input",
            "df1=a.csv",
            "-i",
            "df2=b.csv",
            "--comments",
        ]);
        let Commands::Code { inputs, comments, .. } = cli.command else {
            panic!("expected code command");
        };
        assert_eq!(inputs.len(), 2);
        assert!(comments);
    }

    #[test]
    fn test_code_and_replay_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv = dir.path().join("a.csv");
        fs::write(&csv, "A\n1\n2\n").expect("write csv");
        let analysis = dir.path().join("analysis.json");
        fs::write(
            &analysis,
            r#"{"version": "0.4.0", "steps_data": [{"step_version": 2, "step_type": "add_column", "params": {"sheet_index": 0, "column_header": "B", "column_header_index": -1}}]}"#,
        )
        .expect("write analysis");
        let inputs = vec![InputArg {
            name: "df1".to_owned(),
            path: csv,
        }];
        let settings = EngineSettings::default();

        let mut out = Vec::new();
        run_command(
            Commands::Code {
                analysis: analysis.clone(),
                inputs: inputs.clone(),
                comments: false,
                no_optimize: false,
            },
            settings.clone(),
            &mut out,
        )
        .expect("code");
        let code = String::from_utf8(out).expect("utf8");
        assert!(code.contains("df1.insert(1, 'B', 0)"));

        let mut out = Vec::new();
        run_command(Commands::Replay { analysis, inputs }, settings, &mut out).expect("replay");
        assert_eq!(String::from_utf8(out).expect("utf8"), "df1\t2 rows\t2 columns\n");
    }

    #[test]
    fn test_upgrade_command_writes_current_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let analysis = dir.path().join("old.json");
        fs::write(
            &analysis,
            r#"{"version": "0.1.59", "steps": {"1": {"step_version": 1, "step_type": "add_column", "sheet_index": 0, "column_header": "B"}}}"#,
        )
        .expect("write analysis");
        let mut out = Vec::new();
        run_command(
            Commands::Upgrade {
                analysis,
                output: None,
            },
            EngineSettings::default(),
            &mut out,
        )
        .expect("upgrade");
        let upgraded = SavedAnalysis::from_json(&String::from_utf8(out).expect("utf8")).expect("parse");
        assert!(upgraded.is_current());
        assert_eq!(upgraded.steps_data.len(), 2);
    }
}
