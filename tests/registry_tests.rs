/// Registry tests
///
/// Module loading, table reconciliation, trigger trees and the registries
/// service over the in-process server.
/// Run with: cargo test --test registry_tests
use ormregistry::cursor::scoped;
use ormregistry::registry::model::{Model, ModelHooks};
use ormregistry::registry::{FieldType, IndexKind, ModuleState};
use ormregistry::{
    BaseCursor, Changes, ConnectionInfo, DbError, Field, FieldId, LoadOptions, MemoryServer,
    ModelDef, Module, OrmCache, Params, Registries, Registry, RegistryConfig, StaticLoader, Value,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Env {
    server: Arc<MemoryServer>,
    loader: Arc<StaticLoader>,
    registries: Registries,
}

fn env(modules: Vec<Module>) -> Env {
    env_with(RegistryConfig::new(), &["db"], modules)
}

fn env_with(config: RegistryConfig, dbnames: &[&str], modules: Vec<Module>) -> Env {
    let server = MemoryServer::new();
    for dbname in dbnames {
        server.create_database(dbname).unwrap();
    }
    let loader = Arc::new(StaticLoader::new(modules));
    let registries = Registries::new(
        config,
        server.clone(),
        ConnectionInfo::new("postgres"),
        loader.clone(),
    )
    .unwrap();
    Env {
        server,
        loader,
        registries,
    }
}

fn base() -> Module {
    Module::new("base")
        .model(
            ModelDef::new("res.partner")
                .field(Field::char("name").required())
                .field(Field::char("email").index(IndexKind::Btree))
                .field(Field::many2one("parent_id", "res.partner"))
                .field(Field::one2many("child_ids", "res.partner", "parent_id")),
        )
        .model(
            ModelDef::new("res.users")
                .inherits("res.partner", "partner_id")
                .field(Field::char("login").required())
                .sql_constraint("login_key", "UNIQUE (login)", "You can not have two users with the same login!"),
        )
}

fn sale() -> Module {
    Module::new("sale")
        .model(
            ModelDef::new("sale.order")
                .field(Field::many2one("partner_id", "res.partner").required())
                .field(Field::char("currency"))
                .field(Field::one2many("line_ids", "sale.line", "order_id"))
                .field(Field::char("summary").compute("_compute_summary", &["line_ids.currency_name"]))
                .field(Field::integer("line_count").compute("_compute_line_count", &["line_ids"])),
        )
        .model(
            ModelDef::new("sale.line")
                .field(Field::many2one("order_id", "sale.order").required().ondelete("cascade"))
                .field(Field::char("currency_name").compute("_compute_currency", &["order_id.currency"])),
        )
}

fn query(env: &Env, dbname: &str, sql: &str, params: Params) -> Vec<Vec<Value>> {
    scoped(env.registries.database(dbname).cursor(true).unwrap(), |cr| {
        Ok(cr.execute(sql, &params)?.rows)
    })
    .unwrap()
}

fn tables(env: &Env) -> Vec<Value> {
    query(
        env,
        "db",
        "SELECT table_name FROM information_schema.tables ORDER BY table_name",
        Params::None,
    )
    .into_iter()
    .flatten()
    .collect()
}

fn ddl_count(env: &Env) -> u64 {
    env.server.database("db").unwrap().ddl_count()
}

fn id(model: &str, name: &str) -> FieldId {
    FieldId::new(model, name)
}

#[test]
fn test_install_creates_tables_and_constraints() {
    let env = env(vec![base(), sale()]);
    let registry = env.registries.get("db").unwrap();

    assert!(registry.is_ready());
    assert!(registry.is_loaded());
    assert_eq!(env.loader.state("db", "base"), ModuleState::Installed);
    assert_eq!(env.loader.state("db", "sale"), ModuleState::Installed);

    let tables = tables(&env);
    for table in ["res_partner", "res_users", "sale_order", "sale_line", "ir_model", "orm_signaling_registry"] {
        assert!(tables.contains(&Value::from(table)), "missing table {table}");
    }

    let foreign_keys = query(
        &env,
        "db",
        "SELECT conname, confdeltype FROM pg_constraint WHERE contype = 'f' ORDER BY conname",
        Params::None,
    );
    let expected = [
        ("res_partner_parent_id_fkey", "n"),
        ("res_users_partner_id_fkey", "c"),
        ("sale_line_order_id_fkey", "c"),
        ("sale_order_partner_id_fkey", "r"),
    ];
    for (name, deltype) in expected {
        assert!(
            foreign_keys.contains(&vec![Value::from(name), Value::from(deltype)]),
            "missing foreign key {name} ({deltype})"
        );
    }

    let unique = query(
        &env,
        "db",
        "SELECT conname FROM pg_constraint WHERE contype = 'u' AND relname = %s",
        Params::from(["res_users"]),
    );
    assert_eq!(unique, vec![vec![Value::from("res_users_login_key")]]);

    let indexes = query(
        &env,
        "db",
        "SELECT tablename FROM pg_indexes WHERE indexname = %s",
        Params::from(["res_partner__email_index"]),
    );
    assert_eq!(indexes, vec![vec![Value::from("res_partner")]]);

    let not_null = registry.not_null_fields();
    assert!(not_null.contains(&id("res.partner", "name")));
    assert!(not_null.contains(&id("res.users", "login")));
    assert!(!not_null.contains(&id("res.partner", "email")));
}

#[test]
fn test_delegation_and_reflection() {
    let env = env(vec![base()]);
    let registry = env.registries.get("db").unwrap();

    let users = registry.model("res.users").unwrap();
    let name = users.field("name").unwrap();
    assert_eq!(name.related.as_deref(), Some("partner_id.name"));
    assert!(name.column_type().is_none());
    assert_eq!(users.field("partner_id").unwrap().ftype, FieldType::Many2one);

    let columns: Vec<Value> = query(
        &env,
        "db",
        "SELECT column_name FROM information_schema.columns WHERE table_name = %s ORDER BY ordinal_position",
        Params::from(["res_users"]),
    )
    .into_iter()
    .flatten()
    .collect();
    assert_eq!(
        columns,
        vec![Value::from("id"), Value::from("login"), Value::from("partner_id")]
    );

    let reflected = query(
        &env,
        "db",
        "SELECT related FROM ir_model_fields WHERE model = %s AND name = %s",
        Params::from(["res.users", "email"]),
    );
    assert_eq!(reflected, vec![vec![Value::from("partner_id.email")]]);

    let inherits = query(
        &env,
        "db",
        "SELECT parent, parent_field FROM ir_model_inherit WHERE model = %s",
        Params::from(["res.users"]),
    );
    assert_eq!(inherits, vec![vec![Value::from("res.partner"), Value::from("partner_id")]]);
}

#[test]
fn test_repeated_init_is_a_ddl_fixed_point() {
    let env = env(vec![base(), sale()]);
    let registry = env.registries.get("db").unwrap();
    let before = ddl_count(&env);

    scoped(registry.cursor(false).unwrap(), |cr| {
        let names = registry.model_names();
        registry.init_models(&mut **cr, &names, Some("base"), false)?;
        registry.check_foreign_keys(&mut **cr)?;
        let graph = registry.graph();
        let models: Vec<&Model> = graph.models.values().collect();
        registry.check_indexes(&mut **cr, &models)
    })
    .unwrap();

    assert_eq!(ddl_count(&env), before);
    assert!(registry.pending_constraints().is_empty());
    assert_eq!(registry.expected_foreign_keys().len(), 4);
}

#[test]
fn test_upgrade_reloads_without_ddl() {
    let env = env(vec![base(), sale()]);
    env.registries.get("db").unwrap();
    let before = ddl_count(&env);

    let registry = env
        .registries
        .new_registry("db", &LoadOptions::default().update_module(true))
        .unwrap();
    assert!(registry.is_ready());
    assert_eq!(ddl_count(&env), before);
}

#[test]
fn test_setup_models_is_idempotent() {
    let env = env(vec![base(), sale()]);
    let registry = env.registries.get("db").unwrap();
    let before = registry.graph();

    scoped(registry.cursor(false).unwrap(), |cr| registry.setup_models(&mut **cr)).unwrap();

    let after = registry.graph();
    assert_eq!(before.field_depends, after.field_depends);
    for (name, model) in &before.models {
        assert_eq!(model.fields, after.models[name].fields, "fields of {name} changed");
    }
}

#[test]
fn test_trigger_tree_collapses_inverse_pairs() {
    let env = env(vec![base(), sale()]);
    let registry = env.registries.get("db").unwrap();

    let tree = registry.get_field_trigger_tree(&id("sale.order", "currency"));
    assert_eq!(
        tree.root.iter().cloned().collect::<Vec<_>>(),
        vec![id("sale.order", "summary")]
    );
    let lines = tree.child(&id("sale.line", "order_id")).unwrap();
    assert_eq!(
        lines.root.iter().cloned().collect::<Vec<_>>(),
        vec![id("sale.line", "currency_name")]
    );
    assert_eq!(tree.children.len(), 1);

    assert_eq!(
        registry.get_dependent_fields(&id("sale.order", "currency")),
        vec![id("sale.order", "summary"), id("sale.line", "currency_name")]
    );
    assert!(registry.get_dependent_fields(&id("sale.order", "summary")).is_empty());

    assert!(registry.is_modifying_relations(&id("sale.order", "line_ids")));
    assert!(!registry.is_modifying_relations(&id("sale.order", "summary")));

    let inverses = registry.field_inverses();
    assert!(inverses[&id("sale.order", "line_ids")].contains(&id("sale.line", "order_id")));
    assert!(inverses[&id("sale.line", "order_id")].contains(&id("sale.order", "line_ids")));

    let selected = registry.get_trigger_tree(&[id("sale.order", "currency")], &|f: &FieldId| {
        f.model == "sale.line"
    });
    assert!(selected.root.is_empty());
    assert!(selected.child(&id("sale.line", "order_id")).is_some());
}

#[test]
fn test_discard_fields_updates_triggers() {
    let env = env(vec![base(), sale()]);
    let registry = env.registries.get("db").unwrap();
    assert_eq!(registry.get_dependent_fields(&id("sale.order", "currency")).len(), 2);

    registry.discard_fields(&[id("sale.order", "summary")]).unwrap();

    assert!(registry.model("sale.order").unwrap().field("summary").is_none());
    assert_eq!(
        registry.get_dependent_fields(&id("sale.order", "currency")),
        vec![id("sale.line", "currency_name")]
    );
}

struct FailingInit;

impl ModelHooks for FailingInit {
    fn init(&self, _registry: &Registry, model: &Model, _cr: &mut dyn BaseCursor) -> anyhow::Result<()> {
        anyhow::bail!("cannot initialize {}", model.name)
    }
}

#[test]
fn test_failed_load_keeps_the_previous_registry() {
    let env = env(vec![base()]);
    let current = env.registries.get("db").unwrap();

    env.loader.add_module(
        Module::new("broken").model(ModelDef::new("x.broken").field(Field::char("name")).hooks(Arc::new(FailingInit))),
    );
    let err = env
        .registries
        .new_registry("db", &LoadOptions::default())
        .unwrap_err();
    match err {
        DbError::RegistryLoad { db, source } => {
            assert_eq!(db, "db");
            assert!(matches!(*source, DbError::Hook(_)));
        }
        other => panic!("unexpected error {other}"),
    }

    assert!(Arc::ptr_eq(&env.registries.peek("db").unwrap(), &current));
    assert_eq!(env.loader.resets(), 1);
    assert_eq!(env.loader.state("db", "broken"), ModuleState::ToInstall);
    // the table of the failed module was rolled back
    assert!(!tables(&env).contains(&Value::from("x_broken")));
}

#[test]
fn test_extension_of_unknown_model_fails() {
    let env = env(vec![base(), Module::new("ghost").model(ModelDef::extend("x.ghost"))]);
    let err = env.registries.get("db").unwrap_err();
    assert!(matches!(
        err,
        DbError::RegistryLoad { ref source, .. } if matches!(**source, DbError::Model(_))
    ));
    assert!(env.registries.peek("db").is_none());
    assert!(env.registries.get("").is_err());
}

#[test]
fn test_install_constraint_failure_aborts_the_load() {
    let env = env(vec![
        base(),
        Module::new("rates").model(ModelDef::new("x.rate").field(Field::char("code").required())),
    ]);
    scoped(env.registries.database("db").cursor(false).unwrap(), |cr| {
        cr.execute("CREATE TABLE x_rate (id SERIAL PRIMARY KEY, code VARCHAR)", &Params::None)?;
        cr.execute("INSERT INTO x_rate DEFAULT VALUES", &Params::None)
    })
    .unwrap();

    let err = env.registries.get("db").unwrap_err();
    assert!(matches!(
        err,
        DbError::RegistryLoad { ref source, .. } if matches!(**source, DbError::Constraint(_))
    ));
    assert_eq!(env.loader.state("db", "rates"), ModuleState::ToInstall);
}

#[test]
fn test_upgrade_constraint_failure_is_deferred() {
    let env = env(vec![
        base(),
        Module::new("notes").model(ModelDef::new("note.note").field(Field::char("title"))),
    ]);
    env.registries.get("db").unwrap();
    scoped(env.registries.database("db").cursor(false).unwrap(), |cr| {
        cr.execute("INSERT INTO note_note DEFAULT VALUES", &Params::None)
    })
    .unwrap();

    env.loader
        .add_module(Module::new("notes_required").model(ModelDef::extend("note.note").field(Field::char("title").required())));
    env.loader.set_state("db", "notes_required", ModuleState::ToUpgrade);

    let registry = env.registries.new_registry("db", &LoadOptions::default()).unwrap();
    assert!(registry.is_ready());
    assert!(registry.pending_constraints().is_empty());
    assert!(registry.model("note.note").unwrap().field("title").unwrap().required);
    assert!(!registry.not_null_fields().contains(&id("note.note", "title")));
    assert_eq!(env.loader.state("db", "notes_required"), ModuleState::Installed);
}

#[test]
fn test_test_mode_writes_do_not_persist() {
    let env = env(vec![base()]);
    let physical = env.registries.database("db").cursor(false).unwrap();
    env.registries.enter_test_mode("db", Box::new(physical)).unwrap();
    assert!(env.registries.is_test_mode());

    let registry = env.registries.get("db").unwrap();
    assert!(registry.in_test_mode());
    scoped(registry.cursor(false).unwrap(), |cr| {
        cr.execute("INSERT INTO res_partner (name) VALUES (%s)", &Params::from(["Test"]))
    })
    .unwrap();
    let seen = scoped(registry.cursor(true).unwrap(), |cr| {
        Ok(cr.execute("SELECT name FROM res_partner", &Params::None)?.rows)
    })
    .unwrap();
    assert_eq!(seen, vec![vec![Value::from("Test")]]);

    let mut physical = env.registries.leave_test_mode("db").unwrap();
    assert!(!env.registries.is_test_mode());
    physical.rollback().unwrap();
    physical.close().unwrap();

    assert!(query(&env, "db", "SELECT name FROM res_partner", Params::None).is_empty());
}

#[test]
fn test_leave_test_mode_with_open_cursor_fails() {
    let env = env(vec![base()]);
    let physical = env.registries.database("db").cursor(false).unwrap();
    env.registries.enter_test_mode("db", Box::new(physical)).unwrap();
    let registry = env.registries.get("db").unwrap();

    let mut open = registry.cursor(false).unwrap();
    assert!(matches!(
        env.registries.leave_test_mode("db"),
        Err(DbError::Interface(_))
    ));
    open.close().unwrap();
    drop(open);

    let mut physical = env.registries.leave_test_mode("db").unwrap();
    physical.close().unwrap();
}

#[test]
fn test_registries_lru_evicts_oldest_database() {
    let env = env_with(RegistryConfig::new().registry_lru_size(1), &["db1", "db2"], vec![base()]);
    env.registries.get("db1").unwrap();
    env.registries.get("db2").unwrap();

    assert_eq!(env.registries.len(), 1);
    assert!(env.registries.contains("db2"));
    assert!(!env.registries.contains("db1"));
    assert_eq!(env.registries.names(), vec!["db2".to_string()]);

    assert!(env.registries.delete("db2").is_some());
    assert!(env.registries.is_empty());
}

#[test]
fn test_cached_methods_follow_clear_cache() {
    let env = env(vec![base()]);
    let registry = env.registries.get("db").unwrap();
    let cache = OrmCache::new("res.partner._get_display_name");
    let calls = AtomicUsize::new(0);
    let compute = || {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(String::from("Azure Interior"))
    };

    registry.cached(&cache, "res.partner", vec![Value::Integer(1)], compute).unwrap();
    registry.cached(&cache, "res.partner", vec![Value::Integer(1)], compute).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let default_seq = registry.sequences().caches["default"];
    let mut changes = Changes::new();
    registry.clear_cache(&mut changes, &[]).unwrap();
    assert!(changes.cache_invalidated.contains("default"));
    assert!(changes.cache_invalidated.contains("templates.cached_values"));

    registry.cached(&cache, "res.partner", vec![Value::Integer(1)], compute).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    registry.signal_changes(&mut changes).unwrap();
    assert!(changes.is_empty());
    assert_eq!(registry.sequences().caches["default"], default_seq + 1);
    assert!(registry.clear_cache(&mut changes, &["nowhere"]).is_err());
}

#[test]
fn test_extensions_are_detected() {
    let env = env(vec![base()]);
    env.server.enable_extension("db", "unaccent").unwrap();
    let registry = env.registries.get("db").unwrap();
    assert!(registry.has_unaccent());
    assert!(!registry.has_trigram());
}

fn notes() -> Module {
    Module::new("notes").model(
        ModelDef::new("note.note")
            .field(Field::char("name"))
            .field(Field::text("body").index(IndexKind::Trigram)),
    )
}

#[test]
fn test_trigram_index_needs_pg_trgm() {
    let env = env(vec![base(), notes()]);
    let registry = env.registries.get("db").unwrap();
    assert!(!registry.has_trigram());
    let indexes = query(
        &env,
        "db",
        "SELECT tablename FROM pg_indexes WHERE indexname = %s",
        Params::from(["note_note__body_index"]),
    );
    assert!(indexes.is_empty());

    let env = env_with(RegistryConfig::new(), &["db"], vec![base(), notes()]);
    env.server.enable_extension("db", "pg_trgm").unwrap();
    let registry = env.registries.get("db").unwrap();
    assert!(registry.has_trigram());
    let indexes = query(
        &env,
        "db",
        "SELECT tablename FROM pg_indexes WHERE indexname = %s",
        Params::from(["note_note__body_index"]),
    );
    assert_eq!(indexes, vec![vec![Value::from("note_note")]]);
}
