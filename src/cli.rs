//! CLI argument parsing for Recuento

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "recuento")]
#[command(version)]
#[command(about = "Merge and diff call-stack attribution trees", long_about = None)]
pub struct Cli {
    /// Enable debug logging to stderr
    #[arg(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accumulate two or more trees with identical column schemas
    Merge {
        /// Output tree file
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Input tree files to merge, in order
        #[arg(value_name = "INPUT", num_args = 2..)]
        inputs: Vec<PathBuf>,
    },

    /// Three-way diff of a test tree against a base tree
    ///
    /// The output carries tripled columns: test values, base values, and
    /// their elementwise difference.
    Diff {
        /// Output tree file
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Test tree file
        #[arg(value_name = "TEST")]
        test: PathBuf,

        /// Base tree file
        #[arg(value_name = "BASE")]
        base: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_requires_two_inputs() {
        assert!(Cli::try_parse_from(["recuento", "merge", "out.json", "a.json"]).is_err());
        let cli =
            Cli::try_parse_from(["recuento", "merge", "out.json", "a.json", "b.json"]).unwrap();
        match cli.command {
            Command::Merge { output, inputs } => {
                assert_eq!(output, PathBuf::from("out.json"));
                assert_eq!(inputs.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_diff_argument_order() {
        // Second input is always "test", third is "base"
        let cli = Cli::try_parse_from(["recuento", "diff", "out.json", "test.json", "base.json"])
            .unwrap();
        match cli.command {
            Command::Diff { output, test, base } => {
                assert_eq!(output, PathBuf::from("out.json"));
                assert_eq!(test, PathBuf::from("test.json"));
                assert_eq!(base, PathBuf::from("base.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
