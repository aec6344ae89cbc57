//! Init command handler

use std::path::{Path, PathBuf};

use tandem_core::config::{Config, HistoryBackend};
use tandem_core::journal::validate_journal_id;
use tandem_core::session::open_replica;

use crate::cli::{report, resolve_data_dir};

/// Handle the init command
/// Returns true on success, false on error
pub fn handle_init(
    config_path: &Path,
    data_dir: Option<PathBuf>,
    remote: Option<PathBuf>,
    replica_id: Option<String>,
    sqlite: bool,
    force: bool,
) -> bool {
    if config_path.exists() && !force {
        eprintln!(
            "✗ Config already exists at {}. Use --force to overwrite it.",
            config_path.display()
        );
        return false;
    }

    let mut config = Config::new(resolve_data_dir(data_dir));
    if let Some(id) = replica_id {
        if let Err(e) = validate_journal_id(&id) {
            eprintln!("✗ {}", e);
            return false;
        }
        config.replica_id = id;
    }
    config.remote_dir = remote;
    if sqlite {
        config.history_backend = HistoryBackend::Sqlite;
    }

    let result = config.save_to(config_path).and_then(|()| {
        // Creates the journal directory and the empty local journal.
        open_replica(&config).map(|_| ())
    });
    if !report(result) {
        return false;
    }

    println!("✓ Initialized replica {}", config.replica_id);
    println!("  Config: {}", config_path.display());
    println!("  Data directory: {}", config.data_dir.display());
    match &config.remote_dir {
        Some(remote) => println!("  Remote: {}", remote.display()),
        None => println!("  Remote: (not configured)"),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{object, open_session};
    use tandem_core::model::JsonValue;

    #[test]
    fn test_init_then_edit_objects() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let data_dir = dir.path().join("data");

        assert!(handle_init(
            &config_path,
            Some(data_dir.clone()),
            None,
            Some("laptop".to_string()),
            false,
            false
        ));
        assert!(data_dir.join("journals").join("laptop.journal").exists());
        // Refuses to overwrite without --force
        assert!(!handle_init(&config_path, None, None, None, false, false));

        assert!(object::handle_insert(
            &config_path,
            "p1",
            "person",
            vec![("name".to_string(), JsonValue::from("Ada"))]
        ));
        assert!(object::handle_update(
            &config_path,
            "p1",
            vec![("age".to_string(), JsonValue::from(36))]
        ));
        assert!(!object::handle_update(
            &config_path,
            "missing",
            vec![("age".to_string(), JsonValue::from(1))]
        ));

        let (config, session) = open_session(&config_path).unwrap();
        assert_eq!(config.replica_id, "laptop");
        let p1 = session.object("p1").unwrap().unwrap();
        assert_eq!(p1.get("name"), Some(&JsonValue::from("Ada")));
        assert_eq!(p1.get("age"), Some(&JsonValue::from(36)));
        drop(session);

        assert!(object::handle_remove(&config_path, "p1"));
        let (_, session) = open_session(&config_path).unwrap();
        assert!(session.object("p1").unwrap().is_none());
    }

    #[test]
    fn test_init_rejects_invalid_replica_id() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        assert!(!handle_init(
            &config_path,
            Some(dir.path().join("data")),
            None,
            Some("../escape".to_string()),
            false,
            false
        ));
        assert!(!config_path.exists());
    }
}
