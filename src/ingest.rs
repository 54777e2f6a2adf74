//! Loading test definitions from `*.json` files into the store.

use crate::probes::TestDefinition;
use crate::storage::{Store, StoreError};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Read every `*.json` file under `root` (recursively). Each file holds a
/// JSON array of test definitions.
pub fn load_dir(root: &Path) -> Result<Vec<TestDefinition>> {
    if !root.is_dir() {
        anyhow::bail!("Test directory {} does not exist", root.display());
    }

    let mut files = Vec::new();
    collect_json_files(root, &mut files)?;
    files.sort();

    let mut tests = Vec::new();
    for path in files {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read file {}", path.display()))?;
        let parsed: Vec<TestDefinition> = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid json from file {}", path.display()))?;
        debug!(file = %path.display(), count = parsed.len(), "Loaded test file");
        tests.extend(parsed);
    }
    Ok(tests)
}

fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("Could not list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Give a definition a fresh id when it has none.
pub fn assign_id(test: &mut TestDefinition) {
    if test.id.trim().is_empty() {
        test.id = uuid::Uuid::new_v4().to_string();
    }
}

/// Fill in a missing id, reusing the one already stored under the same
/// name so the test keeps its result history.
pub fn resolve_id(store: &dyn Store, test: &mut TestDefinition) -> Result<(), StoreError> {
    if test.id.trim().is_empty() {
        if let Some(existing) = store.get_test_by_name(&test.name)? {
            test.id = existing.id;
        }
    }
    assign_id(test);
    Ok(())
}

/// Store every definition, resolving ids where missing. Every definition
/// is attempted; fails if any of them could not be stored.
pub fn import(store: &dyn Store, tests: Vec<TestDefinition>) -> Result<usize> {
    let total = tests.len();
    let mut count = 0;
    for mut test in tests {
        let stored = resolve_id(store, &mut test).and_then(|_| store.put_test(&test));
        match stored {
            Ok(()) => count += 1,
            Err(e) => warn!(test = %test.name, "Failed to store test {}: {}", test.name, e),
        }
    }
    info!(count, total, "Imported tests");
    if count < total {
        anyhow::bail!("Failed to store {} of {} test(s)", total - count, total);
    }
    Ok(count)
}

/// Startup ingestion: import `dir` if given, then load everything stored.
/// A bad directory or a failed import is logged; only reading the store
/// back can fail.
pub fn load_for_startup(store: &dyn Store, dir: Option<&Path>) -> Result<Vec<TestDefinition>> {
    if let Some(dir) = dir {
        match load_dir(dir).and_then(|tests| import(store, tests)) {
            Ok(count) => info!(dir = %dir.display(), count, "Ingested test files"),
            Err(e) => warn!("Failed to ingest tests from {}, error {:#}", dir.display(), e),
        }
    }
    store.all_tests().context("Failed to load tests")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_memory_pool, SqliteStore};
    use std::fs;

    const HOME: &str = r#"[
        {"name": "home", "url": "http://localhost:8080/", "cron": "*/5 * * * * *"},
        {"id": "fixed", "name": "login", "url": "http://localhost:8080/login", "method": "POST",
         "headers": {"Content-Type": "application/json"}, "body": "{}", "cron": "0 * * * * *"}
    ]"#;

    #[test]
    fn test_load_dir_recurses_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("home.json"), HOME).unwrap();
        fs::write(dir.path().join("README.md"), "not a test").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("nested/api.json"),
            r#"[{"name": "api", "url": "http://localhost/api", "cron": "0 0 * * * *"}]"#,
        )
        .unwrap();

        let tests = load_dir(dir.path()).unwrap();
        let mut names: Vec<_> = tests.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["api", "home", "login"]);

        let login = tests.iter().find(|t| t.name == "login").unwrap();
        assert_eq!(login.method, "POST");
        assert_eq!(login.headers.get("Content-Type").unwrap(), "application/json");
    }

    #[test]
    fn test_invalid_json_names_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let err = load_dir(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn test_missing_dir_is_error() {
        assert!(load_dir(Path::new("/nonexistent/tests")).is_err());
    }

    #[test]
    fn test_import_assigns_missing_ids_only() {
        let store = SqliteStore::new(open_memory_pool().unwrap());
        let tests: Vec<TestDefinition> = serde_json::from_str(HOME).unwrap();

        assert_eq!(import(&store, tests).unwrap(), 2);

        let stored = store.all_tests().unwrap();
        let home = stored.iter().find(|t| t.name == "home").unwrap();
        let login = stored.iter().find(|t| t.name == "login").unwrap();
        assert!(uuid::Uuid::parse_str(&home.id).is_ok());
        assert_eq!(login.id, "fixed");
    }

    #[test]
    fn test_reimport_keeps_generated_id_and_history() {
        let store = SqliteStore::new(open_memory_pool().unwrap());
        let file = r#"[{"name": "home", "url": "http://localhost:8080/", "cron": "*/5 * * * * *"}]"#;

        import(&store, serde_json::from_str(file).unwrap()).unwrap();
        let first = store.get_test_by_name("home").unwrap().unwrap();
        store
            .save_result(&crate::probes::ProbeResult {
                test_id: first.id.clone(),
                timestamp: chrono::Utc::now(),
                status: Some(200),
                error: None,
                duration_ms: 3,
            })
            .unwrap();

        import(&store, serde_json::from_str(file).unwrap()).unwrap();
        let second = store.get_test_by_name("home").unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(store.results_for(&second.id, 10).unwrap().len(), 1);

        store.delete_test(&second.id).unwrap();
        assert!(store.results_for(&first.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_import_rename_with_fixed_id() {
        let store = SqliteStore::new(open_memory_pool().unwrap());
        let before = r#"[{"id": "fixed", "name": "login", "url": "http://localhost/login", "cron": "0 * * * * *"},
                         {"name": "home", "url": "http://localhost/", "cron": "0 * * * * *"}]"#;
        let after = r#"[{"id": "fixed", "name": "login2", "url": "http://localhost/login", "cron": "0 * * * * *"},
                        {"name": "home", "url": "http://localhost/", "cron": "0 * * * * *"}]"#;

        assert_eq!(import(&store, serde_json::from_str(before).unwrap()).unwrap(), 2);
        assert_eq!(import(&store, serde_json::from_str(after).unwrap()).unwrap(), 2);

        let mut names: Vec<_> = store.all_tests().unwrap().into_iter().map(|t| t.name).collect();
        names.sort();
        assert_eq!(names, vec!["home", "login2"]);
        assert_eq!(store.get_test("fixed").unwrap().unwrap().name, "login2");
    }

    #[test]
    fn test_startup_survives_broken_dir() {
        let store = SqliteStore::new(open_memory_pool().unwrap());
        store
            .put_test(&TestDefinition::new("fixed", "login", "http://localhost/login", "0 * * * * *"))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_broken.json"), "{ not json").unwrap();
        fs::write(
            dir.path().join("b_renamed.json"),
            r#"[{"id": "fixed", "name": "login2", "url": "http://localhost/login", "cron": "0 * * * * *"}]"#,
        )
        .unwrap();

        let tests = load_for_startup(&store, Some(dir.path())).unwrap();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].id, "fixed");
        assert_eq!(tests[0].name, "login");
    }

    #[test]
    fn test_startup_applies_conflicting_definition() {
        let store = SqliteStore::new(open_memory_pool().unwrap());
        store
            .put_test(&TestDefinition::new("fixed", "login", "http://localhost/login", "0 * * * * *"))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tests.json"),
            r#"[{"id": "fixed", "name": "login2", "url": "http://localhost/login", "cron": "0 * * * * *"},
                {"name": "home", "url": "http://localhost/", "cron": "0 * * * * *"}]"#,
        )
        .unwrap();

        let tests = load_for_startup(&store, Some(dir.path())).unwrap();
        let mut names: Vec<_> = tests.iter().map(|t| t.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["home", "login2"]);
    }

    #[test]
    fn test_startup_logs_failed_import_and_continues() {
        let store = crate::scheduler::testing::MemoryStore::rejecting_puts();
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tests.json"),
            r#"[{"name": "home", "url": "http://localhost/", "cron": "0 * * * * *"}]"#,
        )
        .unwrap();

        assert!(import(store.as_ref(), load_dir(dir.path()).unwrap()).is_err());
        let tests = load_for_startup(store.as_ref(), Some(dir.path())).unwrap();
        assert!(tests.is_empty());
    }

    #[test]
    fn test_startup_without_dir_reads_store() {
        let store = SqliteStore::new(open_memory_pool().unwrap());
        store
            .put_test(&TestDefinition::new("a", "alpha", "http://a/", "0 * * * * *"))
            .unwrap();
        assert_eq!(load_for_startup(&store, None).unwrap().len(), 1);
        assert_eq!(load_for_startup(&store, Some(Path::new("/nonexistent/tests"))).unwrap().len(), 1);
    }
}
