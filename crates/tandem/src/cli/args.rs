//! Clap argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tandem_core::model::JsonValue;

/// Offline-first object database synchronized through per-device journals
#[derive(Parser, Debug)]
#[command(name = "tandem", version, about)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a replica and write its config
    Init {
        /// Directory for journals and snapshots
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Shared directory used as the remote
        #[arg(long)]
        remote: Option<PathBuf>,

        /// Journal identifier (a random UUID if omitted)
        #[arg(long)]
        replica_id: Option<String>,

        /// Keep object histories in SQLite
        #[arg(long)]
        sqlite: bool,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Insert (or replace) an object
    Insert {
        /// Object identifier
        id: String,

        /// Object type
        #[arg(short = 't', long = "type")]
        object_type: String,

        /// Property as key=value (repeatable)
        #[arg(short, long = "set", value_parser = parse_assignment)]
        set: Vec<(String, JsonValue)>,
    },

    /// Merge properties into an object
    Update {
        /// Object identifier
        id: String,

        /// Property as key=value (repeatable)
        #[arg(short, long = "set", required = true, value_parser = parse_assignment)]
        set: Vec<(String, JsonValue)>,
    },

    /// Remove an object
    Remove {
        /// Object identifier
        id: String,
    },

    /// Print one object as JSON
    Get {
        /// Object identifier
        id: String,
    },

    /// List objects
    List {
        /// Only objects of this type
        #[arg(short = 't', long = "type")]
        object_type: Option<String>,

        /// Only objects whose property equals the value, as key=value (repeatable)
        #[arg(short = 'w', long = "where", value_parser = parse_assignment)]
        filters: Vec<(String, JsonValue)>,

        /// Maximum number of objects to print
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Count objects
    Count {
        /// Only objects of this type
        #[arg(short = 't', long = "type")]
        object_type: Option<String>,

        /// Only objects whose property equals the value, as key=value (repeatable)
        #[arg(short = 'w', long = "where", value_parser = parse_assignment)]
        filters: Vec<(String, JsonValue)>,
    },

    /// Exchange journals with the remote and merge new diffs
    Sync,

    /// Show replica and journal status
    Status,

    /// Dump records from a journal
    Journal {
        /// Journal identifier (defaults to this replica's)
        id: Option<String>,

        /// Byte offset to start reading at
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Maximum records to print
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },
}

/// Parse `key=value`, reading the value as a JSON scalar when possible.
pub fn parse_assignment(raw: &str) -> Result<(String, JsonValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing property name in '{}'", raw));
    }
    Ok((key.to_string(), JsonValue::parse_lenient(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_assignment() {
        assert_eq!(
            parse_assignment("age=23").unwrap(),
            ("age".to_string(), JsonValue::Int(23))
        );
        assert_eq!(
            parse_assignment("name=John").unwrap(),
            ("name".to_string(), JsonValue::String("John".to_string()))
        );
        assert_eq!(
            parse_assignment("note=a=b").unwrap(),
            ("note".to_string(), JsonValue::String("a=b".to_string()))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn test_parse_insert_command() {
        let cli = Cli::try_parse_from([
            "tandem", "insert", "p1", "--type", "person", "--set", "name=Ada", "-s", "age=36",
        ])
        .unwrap();
        match cli.command {
            Commands::Insert {
                id,
                object_type,
                set,
            } => {
                assert_eq!(id, "p1");
                assert_eq!(object_type, "person");
                assert_eq!(set.len(), 2);
                assert_eq!(set[1], ("age".to_string(), JsonValue::Int(36)));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_update_requires_a_property() {
        assert!(Cli::try_parse_from(["tandem", "update", "p1"]).is_err());
    }
}
