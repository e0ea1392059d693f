/// Signaling tests
///
/// Two registries services sharing one server stand for two processes
/// serving the same database.
/// Run with: cargo test --test signaling_tests
use ormregistry::registry::Signal;
use ormregistry::{
    BaseCursor, Changes, ConnectionInfo, DbError, Field, MemoryServer, ModelDef, Module, OrmCache,
    Params, Registries, Registry, RegistryConfig, StaticLoader, Value,
};
use std::sync::Arc;

struct Cluster {
    server: Arc<MemoryServer>,
    first: Registries,
    second: Registries,
}

fn process(server: &Arc<MemoryServer>, loader: &Arc<StaticLoader>) -> Registries {
    Registries::new(
        RegistryConfig::new(),
        server.clone(),
        ConnectionInfo::new("postgres"),
        loader.clone(),
    )
    .unwrap()
}

fn cluster() -> Cluster {
    let server = MemoryServer::new();
    server.create_database("db").unwrap();
    let loader = Arc::new(StaticLoader::new(vec![
        Module::new("base").model(ModelDef::new("res.partner").field(Field::char("name"))),
    ]));
    Cluster {
        first: process(&server, &loader),
        second: process(&server, &loader),
        server,
    }
}

fn fill(registry: &Registry, cache: &OrmCache) {
    registry
        .cached(cache, "ir.asset", vec![Value::from("web.assets")], || Ok(vec![1u8, 2, 3]))
        .unwrap();
}

fn signal_rows(cluster: &Cluster, table: &str) -> i64 {
    let db = cluster.first.database("db");
    ormregistry::cursor::scoped(db.cursor(true).unwrap(), |cr| {
        let result = cr.execute(&format!("SELECT count(*) FROM {table}"), &Params::None)?;
        Ok(result.scalar()?.as_i64().unwrap_or(-1))
    })
    .unwrap()
}

#[test]
fn test_both_processes_agree_after_install() {
    let cluster = cluster();
    let first = cluster.first.get("db").unwrap();
    let second = cluster.second.get("db").unwrap();

    // seed row plus the install signal
    assert_eq!(signal_rows(&cluster, "orm_signaling_registry"), 2);
    assert_eq!(first.registry_sequence(), second.registry_sequence());
    assert_eq!(first.sequences(), second.sequences());
    assert_eq!(
        second.sequences().caches.keys().map(String::as_str).collect::<Vec<_>>(),
        second.cache_layout().names().collect::<Vec<_>>()
    );
    assert_eq!(first.check_signaling().unwrap(), Signal::UpToDate);
    assert_eq!(second.check_signaling().unwrap(), Signal::UpToDate);
    assert!(cluster.server.database("db").is_some());
}

#[test]
fn test_cache_invalidation_reaches_the_other_process() {
    let cluster = cluster();
    let first = cluster.first.get("db").unwrap();
    let second = cluster.second.get("db").unwrap();
    let cache = OrmCache::new("ir.asset._get_asset_paths").in_partition("assets");
    let templates = OrmCache::new("ir.ui.view._get_template").in_partition("templates");
    fill(&second, &cache);
    fill(&second, &templates);
    assert_eq!(second.caches().get("assets").unwrap().len(), 1);

    first
        .manage_changes(|changes| first.clear_cache(changes, &["assets"]))
        .unwrap();

    assert_eq!(first.check_signaling().unwrap(), Signal::UpToDate);
    assert_eq!(
        second.check_signaling().unwrap(),
        Signal::Cleared(vec!["assets".into(), "templates.cached_values".into()])
    );
    assert!(second.caches().get("assets").unwrap().is_empty());
    // other partitions keep their entries
    assert_eq!(second.caches().get("templates").unwrap().len(), 1);
    assert_eq!(second.check_signaling().unwrap(), Signal::UpToDate);
    assert_eq!(first.sequences(), second.sequences());
}

#[test]
fn test_registry_change_rebuilds_the_other_registry() {
    let cluster = cluster();
    let first = cluster.first.get("db").unwrap();
    let second = cluster.second.get("db").unwrap();

    first
        .manage_changes(|changes| {
            changes.registry_invalidated = true;
            Ok(())
        })
        .unwrap();

    assert!(matches!(second.check_signaling().unwrap(), Signal::Reload(_)));
    let rebuilt = cluster.second.check_signaling("db").unwrap();
    assert!(!Arc::ptr_eq(&rebuilt, &second));
    assert_eq!(rebuilt.registry_sequence(), first.registry_sequence());
    assert!(rebuilt.contains("res.partner"));

    let again = cluster.second.check_signaling("db").unwrap();
    assert!(Arc::ptr_eq(&again, &rebuilt));
    assert!(Arc::ptr_eq(&cluster.first.check_signaling("db").unwrap(), &first));
}

#[test]
fn test_failed_unit_of_work_signals_nothing() {
    let cluster = cluster();
    let first = cluster.first.get("db").unwrap();
    let second = cluster.second.get("db").unwrap();
    let cache = OrmCache::new("ir.asset._get_asset_paths").in_partition("assets");
    fill(&first, &cache);
    let rows = signal_rows(&cluster, "orm_signaling_assets");

    let result: ormregistry::Result<()> = first.manage_changes(|changes| {
        first.clear_cache(changes, &["assets"])?;
        changes.registry_invalidated = true;
        Err(DbError::Query("write conflict".into()))
    });
    assert!(matches!(result, Err(DbError::Query(_))));

    // reset locally, nothing written for the others
    assert!(first.caches().get("assets").unwrap().is_empty());
    assert!(first.contains("res.partner"));
    assert_eq!(signal_rows(&cluster, "orm_signaling_assets"), rows);
    assert_eq!(second.check_signaling().unwrap(), Signal::UpToDate);
    assert_eq!(first.check_signaling().unwrap(), Signal::UpToDate);
}

#[test]
fn test_registry_change_supersedes_cache_changes() {
    let cluster = cluster();
    let first = cluster.first.get("db").unwrap();
    let assets = signal_rows(&cluster, "orm_signaling_assets");

    let mut changes = Changes::new();
    first.clear_cache(&mut changes, &["assets"]).unwrap();
    changes.registry_invalidated = true;
    first.signal_changes(&mut changes).unwrap();

    assert!(changes.is_empty());
    assert_eq!(signal_rows(&cluster, "orm_signaling_assets"), assets);
    assert_eq!(signal_rows(&cluster, "orm_signaling_registry"), 3);
}

#[test]
fn test_unpublished_registry_does_not_signal() {
    let cluster = cluster();
    cluster.first.get("db").unwrap();
    let registry = Registry::new(cluster.first.database("db"), cluster.first.config());

    let mut changes = Changes::new();
    changes.registry_invalidated = true;
    registry.signal_changes(&mut changes).unwrap();

    assert!(!changes.is_empty());
    assert_eq!(signal_rows(&cluster, "orm_signaling_registry"), 2);
}

#[test]
fn test_clear_all_caches_records_every_partition() {
    let cluster = cluster();
    let first = cluster.first.get("db").unwrap();
    let second = cluster.second.get("db").unwrap();

    first.manage_changes(|changes| {
        first.clear_all_caches(changes);
        assert_eq!(changes.cache_invalidated.len(), first.cache_layout().names().count());
        Ok(())
    })
    .unwrap();

    match second.check_signaling().unwrap() {
        Signal::Cleared(names) => assert_eq!(names.len(), second.cache_layout().names().count()),
        other => panic!("unexpected signal {other:?}"),
    }
}
