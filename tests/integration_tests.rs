//! Integration tests for Larder

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use serde_json::{json, Value};
use larder::{
    devtools, tick, ActionValue, App, Binding, Cell, ComponentLifetime, Extensions, Flush,
    LarderError, Memo, Mutation, MutationKind, OptionsDef, Pending, Registry, StoreDefinition,
    SubscribeOptions,
};

fn counter_def() -> StoreDefinition {
    StoreDefinition::options(
        "counter",
        OptionsDef::new(|| json!({"count": 0, "label": "a"}))
            .getter("doubled", |store| {
                json!(store.get_as::<i64>("count").unwrap_or(0) * 2)
            })
            .action("increment", |store, _args| {
                let current = store.get_as::<i64>("count").unwrap_or(0);
                store.set("count", json!(current + 1));
                Ok(ActionValue::unit())
            }),
    )
}

fn record_mutations(log: &Arc<Mutex<Vec<Mutation>>>) -> impl Fn(&Mutation, &Value) + Send + Sync {
    let log = log.clone();
    move |mutation, _state| log.lock().unwrap().push(mutation.clone())
}

#[test]
fn accessor_returns_identical_instance() {
    let registry = Registry::new();
    let def = counter_def();

    let first = def.get_with(&registry).unwrap();
    let second = def.get_with(&registry).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn get_resolves_against_scoped_registry() {
    let registry = Registry::new();
    let def = counter_def();

    registry.with_active(|| {
        let store = def.get().unwrap();
        assert!(store.registry().is_some_and(|r| Arc::ptr_eq(&r, &registry)));
    });
}

#[test]
fn get_resolves_through_component_injection() {
    let app = App::new();
    let registry = Registry::new();
    registry.install(&app);

    let def = counter_def();
    let component = app.component();
    let store = component.enter(|| def.get()).unwrap();
    assert!(store.registry().is_some_and(|r| Arc::ptr_eq(&r, &registry)));
}

#[test]
fn patches_merge_and_notify_once_each() {
    let registry = Registry::new();
    let store = StoreDefinition::options("pair", OptionsDef::new(|| json!({"a": 0, "b": 0})))
        .get_with(&registry)
        .unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    store.subscribe(record_mutations(&log), SubscribeOptions::default());

    store.patch(json!({"a": 1}));
    store.patch(json!({"b": 2}));
    tick();

    assert_eq!(store.state(), json!({"a": 1, "b": 2}));
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].kind, MutationKind::PatchObject);
    assert_eq!(log[0].payload, Some(json!({"a": 1})));
    assert_eq!(log[1].payload, Some(json!({"b": 2})));
}

#[test]
fn object_patch_deep_merges_nested_fields() {
    let registry = Registry::new();
    let store = StoreDefinition::options(
        "profile",
        OptionsDef::new(|| json!({"user": {"name": "eva", "age": 3}, "tags": [1, 2]})),
    )
    .get_with(&registry)
    .unwrap();

    store.patch(json!({"user": {"age": 4}, "tags": [9]}));
    assert_eq!(
        store.state(),
        json!({"user": {"name": "eva", "age": 4}, "tags": [9]})
    );
}

#[test]
fn mutator_patch_records_field_events() {
    let registry = Registry::new();
    let store = StoreDefinition::options("count", OptionsDef::new(|| json!({"count": 5})))
        .get_with(&registry)
        .unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    store.subscribe(record_mutations(&log), SubscribeOptions::default());

    store.patch_with(|state| {
        state.update("count", |v| *v = json!(v.as_i64().unwrap() + 1));
    });

    assert_eq!(store.get("count"), Some(json!(6)));
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, MutationKind::PatchFunction);
    assert_eq!(log[0].payload, None);
    assert_eq!(log[0].events.len(), 1);
    assert_eq!(log[0].events[0].key, "count");
    assert_eq!(log[0].events[0].old, json!(5));
    assert_eq!(log[0].events[0].new, json!(6));
}

#[test]
fn subscribers_fire_in_order_and_unsubscribe_independently() {
    let registry = Registry::new();
    let store = counter_def().get_with(&registry).unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    let first_order = order.clone();
    let first = store.subscribe(
        move |_m, _s| first_order.lock().unwrap().push("first"),
        SubscribeOptions::default(),
    );
    let second_order = order.clone();
    store.subscribe(
        move |_m, _s| second_order.lock().unwrap().push("second"),
        SubscribeOptions::default(),
    );

    store.patch(json!({"count": 1}));
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);

    first.unsubscribe();
    assert!(!first.is_active());
    first.unsubscribe(); // idempotent

    store.patch(json!({"count": 2}));
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "second"]);
}

#[test]
fn direct_writes_coalesce_per_tick() {
    let registry = Registry::new();
    let store = StoreDefinition::options("pair", OptionsDef::new(|| json!({"a": 0, "b": 0})))
        .get_with(&registry)
        .unwrap();

    let deferred = Arc::new(Mutex::new(Vec::new()));
    store.subscribe(record_mutations(&deferred), SubscribeOptions::default());
    let sync = Arc::new(Mutex::new(Vec::new()));
    store.subscribe(
        record_mutations(&sync),
        SubscribeOptions {
            flush: Flush::Sync,
            ..SubscribeOptions::default()
        },
    );

    store.set("a", json!(1));
    store.set("b", json!(2));

    // sync delivery is per write, deferred waits for the tick
    assert_eq!(sync.lock().unwrap().len(), 2);
    assert!(deferred.lock().unwrap().is_empty());

    tick();
    let deferred = deferred.lock().unwrap();
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].kind, MutationKind::Direct);
    assert_eq!(deferred[0].events.len(), 2);
    assert_eq!(deferred[0].events[0].key, "a");
    assert_eq!(deferred[0].events[1].key, "b");
}

#[test]
fn getter_memoizes_until_state_changes() {
    let registry = Registry::new();
    let computes = Arc::new(AtomicUsize::new(0));
    let computes_clone = computes.clone();

    let store = StoreDefinition::options(
        "lazy",
        OptionsDef::new(|| json!({"count": 3})).getter("doubled", move |store| {
            computes_clone.fetch_add(1, Ordering::SeqCst);
            json!(store.get_as::<i64>("count").unwrap_or(0) * 2)
        }),
    )
    .get_with(&registry)
    .unwrap();

    assert_eq!(store.get("doubled"), Some(json!(6)));
    assert_eq!(store.get("doubled"), Some(json!(6)));
    assert_eq!(computes.load(Ordering::SeqCst), 1);

    store.set("count", json!(5));
    assert_eq!(store.get("doubled"), Some(json!(10)));
    assert_eq!(computes.load(Ordering::SeqCst), 2);
}

#[test]
fn action_listeners_observe_calls_and_after_fires_on_ready() {
    let registry = Registry::new();
    let store = counter_def().get_with(&registry).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let afters = Arc::new(AtomicUsize::new(0));

    let seen_clone = seen.clone();
    let afters_clone = afters.clone();
    store.on_action(
        move |call| {
            seen_clone
                .lock()
                .unwrap()
                .push((call.name().to_owned(), call.args().to_vec()));
            let afters = afters_clone.clone();
            call.after(move |_value| {
                afters.fetch_add(1, Ordering::SeqCst);
            });
        },
        false,
    );

    store.call("increment", &[]).unwrap();
    assert_eq!(store.get("count"), Some(json!(1)));
    assert_eq!(*seen.lock().unwrap(), vec![("increment".to_owned(), vec![])]);
    assert_eq!(afters.load(Ordering::SeqCst), 1);
}

#[test]
fn pending_action_defers_after_until_settlement() {
    let registry = Registry::new();
    let handle_slot: Arc<Mutex<Option<larder::PendingHandle>>> = Arc::new(Mutex::new(None));

    let slot = handle_slot.clone();
    let store = StoreDefinition::options(
        "async",
        OptionsDef::new(|| json!({})).action("fetch", move |_store, _args| {
            let (pending, handle) = Pending::new();
            *slot.lock().unwrap() = Some(handle);
            Ok(ActionValue::Pending(pending))
        }),
    )
    .get_with(&registry)
    .unwrap();

    let results = Arc::new(Mutex::new(Vec::new()));
    let results_clone = results.clone();
    store.on_action(
        move |call| {
            let results = results_clone.clone();
            call.after(move |value| results.lock().unwrap().push(value.clone()));
        },
        false,
    );

    let outcome = store.call("fetch", &[]).unwrap();
    assert!(results.lock().unwrap().is_empty());

    let handle = handle_slot.lock().unwrap().take().unwrap();
    handle.resolve(42);
    assert_eq!(*results.lock().unwrap(), vec![json!(42)]);
    assert_eq!(outcome.value(), Some(json!(42)));
}

#[test]
fn failing_action_triggers_on_error_and_reraises() {
    let registry = Registry::new();
    let store = StoreDefinition::options(
        "failing",
        OptionsDef::new(|| json!({})).action("explode", |_store, _args| {
            Err(anyhow::anyhow!("boom"))
        }),
    )
    .get_with(&registry)
    .unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let afters = Arc::new(AtomicUsize::new(0));

    let errors_clone = errors.clone();
    let afters_clone = afters.clone();
    store.on_action(
        move |call| {
            let errors = errors_clone.clone();
            call.on_error(move |error| errors.lock().unwrap().push(error.to_string()));
            let afters = afters_clone.clone();
            call.after(move |_| {
                afters.fetch_add(1, Ordering::SeqCst);
            });
        },
        false,
    );

    let result = store.call("explode", &[]);
    assert_eq!(result.unwrap_err().to_string(), "boom");
    assert_eq!(*errors.lock().unwrap(), vec!["boom".to_owned()]);
    assert_eq!(afters.load(Ordering::SeqCst), 0);
}

#[test]
fn rejected_pending_action_skips_after() {
    let registry = Registry::new();
    let handle_slot: Arc<Mutex<Option<larder::PendingHandle>>> = Arc::new(Mutex::new(None));

    let slot = handle_slot.clone();
    let store = StoreDefinition::options(
        "async",
        OptionsDef::new(|| json!({})).action("fetch", move |_store, _args| {
            let (pending, handle) = Pending::new();
            *slot.lock().unwrap() = Some(handle);
            Ok(ActionValue::Pending(pending))
        }),
    )
    .get_with(&registry)
    .unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    let afters = Arc::new(AtomicUsize::new(0));
    let errors_clone = errors.clone();
    let afters_clone = afters.clone();
    store.on_action(
        move |call| {
            let errors = errors_clone.clone();
            call.on_error(move |error| errors.lock().unwrap().push(error.to_string()));
            let afters = afters_clone.clone();
            call.after(move |_| {
                afters.fetch_add(1, Ordering::SeqCst);
            });
        },
        false,
    );

    store.call("fetch", &[]).unwrap();
    let handle = handle_slot.lock().unwrap().take().unwrap();
    handle.reject(anyhow::anyhow!("offline"));

    assert_eq!(*errors.lock().unwrap(), vec!["offline".to_owned()]);
    assert_eq!(afters.load(Ordering::SeqCst), 0);
}

#[test]
fn unknown_action_is_an_error() {
    let registry = Registry::new();
    let store = counter_def().get_with(&registry).unwrap();

    let error = store.call("missing", &[]).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<LarderError>(),
        Some(LarderError::UnknownAction { .. })
    ));
}

#[test]
fn dispose_rebuilds_with_fresh_state() {
    let registry = Registry::new();
    let def = counter_def();

    let store = def.get_with(&registry).unwrap();
    store.set("count", json!(99));
    store.dispose();

    let rebuilt = def.get_with(&registry).unwrap();
    assert!(!Arc::ptr_eq(&store, &rebuilt));
    assert_eq!(rebuilt.state(), json!({"count": 0, "label": "a"}));
}

#[test]
fn reset_restores_initial_state_with_one_notification() {
    let registry = Registry::new();
    let store = counter_def().get_with(&registry).unwrap();
    store.patch(json!({"count": 7}));

    let log = Arc::new(Mutex::new(Vec::new()));
    store.subscribe(record_mutations(&log), SubscribeOptions::default());

    store.reset().unwrap();
    tick();

    assert_eq!(store.get("count"), Some(json!(0)));
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, MutationKind::PatchFunction);
}

#[test]
fn setup_stores_refuse_reset() {
    let registry = Registry::new();
    let store = StoreDefinition::setup("session", |_ctx| {
        larder::SetupBindings::new().state("token", Cell::new(json!("anonymous")))
    })
    .get_with(&registry)
    .unwrap();

    assert!(matches!(
        store.reset(),
        Err(LarderError::SetupStoreReset { .. })
    ));
}

#[test]
fn hydration_round_trips_excluding_skipped_fields() {
    let session_def = || {
        StoreDefinition::setup("session", |_ctx| {
            larder::SetupBindings::new()
                .state("user", Cell::new(json!({"name": "guest"})))
                .state_skip_hydrate("local_draft", Cell::new(json!("")))
        })
    };

    let registry = Registry::new();
    let counter = counter_def().get_with(&registry).unwrap();
    let session = session_def().get_with(&registry).unwrap();
    counter.patch(json!({"count": 12, "label": "warm"}));
    session.set("user", json!({"name": "eva"}));
    session.set("local_draft", json!("unsaved"));

    let tree = registry.snapshot();
    let restored = Registry::with_state(&tree);
    let counter2 = counter_def().get_with(&restored).unwrap();
    let session2 = session_def().get_with(&restored).unwrap();

    assert_eq!(counter2.state(), json!({"count": 12, "label": "warm"}));
    assert_eq!(session2.get("user"), Some(json!({"name": "eva"})));
    // skipped fields keep their setup-time value
    assert_eq!(session2.get("local_draft"), Some(json!("")));
}

#[test]
fn options_hydrate_hook_replaces_default_merge() {
    let def = || {
        StoreDefinition::options(
            "clock",
            OptionsDef::new(|| json!({"ticks": 0}))
                .on_hydrate(|store, initial| {
                    // custom hook: double whatever the snapshot carried
                    let ticks = initial
                        .get("ticks")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    store.set("ticks", json!(ticks * 2));
                }),
        )
    };

    let registry = Registry::new();
    def().get_with(&registry).unwrap().set("ticks", json!(21));

    let restored = Registry::with_state(&registry.snapshot());
    let store = def().get_with(&restored).unwrap();
    assert_eq!(store.get("ticks"), Some(json!(42)));
}

#[test]
fn circular_stores_resolve_each_other() {
    let registry = Registry::new();

    let warehouse = StoreDefinition::options(
        "warehouse",
        OptionsDef::new(|| json!({"stock": 10})).getter("order_summary", |store| {
            // reaches back into the orders store
            let orders = store
                .registry()
                .and_then(|registry| registry.store("orders"))
                .and_then(|orders| orders.get("placed"))
                .unwrap_or(Value::Null);
            json!({"orders": orders})
        }),
    );
    let warehouse_def = warehouse.clone();

    let orders = StoreDefinition::options(
        "orders",
        OptionsDef::new(|| json!({"placed": 0})).action("place", move |store, _args| {
            let registry = store
                .registry()
                .ok_or_else(|| anyhow::anyhow!("registry gone"))?;
            let warehouse = warehouse_def.get_with(&registry)?;
            let stock = warehouse.get_as::<i64>("stock").unwrap_or(0);
            warehouse.set("stock", json!(stock - 1));
            let placed = store.get_as::<i64>("placed").unwrap_or(0);
            store.set("placed", json!(placed + 1));
            Ok(ActionValue::unit())
        }),
    );

    let orders_store = orders.get_with(&registry).unwrap();
    orders_store.call("place", &[]).unwrap();
    orders_store.call("place", &[]).unwrap();

    let warehouse_store = warehouse.get_with(&registry).unwrap();
    assert_eq!(warehouse_store.get("stock"), Some(json!(8)));
    assert_eq!(
        warehouse_store.get("order_summary"),
        Some(json!({"orders": 2}))
    );
}

#[test]
fn plugins_extend_stores_with_custom_properties() {
    let app = App::new();
    let registry = Registry::new();
    registry.use_plugin(|ctx: &larder::PluginContext<'_>| {
        let mut extensions = Extensions::new();
        extensions.insert(
            "audit_tag".to_owned(),
            Binding::State {
                cell: Cell::new(json!(format!("audited:{}", ctx.store.id()))),
                hydrate: false,
            },
        );
        extensions.insert(
            "flavor_note".to_owned(),
            Binding::Opaque(Arc::new(format!("{:?}", ctx.options.flavor))),
        );
        extensions
    });
    registry.install(&app);

    let store = counter_def().get_with(&registry).unwrap();
    assert_eq!(store.get("audit_tag"), Some(json!("audited:counter")));
    assert_eq!(
        store.custom_property_names(),
        vec!["audit_tag".to_owned(), "flavor_note".to_owned()]
    );
    let note = store.opaque("flavor_note").unwrap();
    assert_eq!(note.downcast_ref::<String>().map(String::as_str), Some("Options"));
}

#[test]
fn component_teardown_unbinds_subscriptions() {
    let registry = Registry::new();
    let store = counter_def().get_with(&registry).unwrap();

    let bound_hits = Arc::new(AtomicUsize::new(0));
    let detached_hits = Arc::new(AtomicUsize::new(0));

    let component = ComponentLifetime::new();
    component.enter(|| {
        let bound = bound_hits.clone();
        store.subscribe(
            move |_m, _s| {
                bound.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions::default(),
        );
        let detached = detached_hits.clone();
        store.subscribe(
            move |_m, _s| {
                detached.fetch_add(1, Ordering::SeqCst);
            },
            SubscribeOptions {
                detached: true,
                ..SubscribeOptions::default()
            },
        );
    });

    store.patch(json!({"count": 1}));
    component.teardown();
    store.patch(json!({"count": 2}));

    assert_eq!(bound_hits.load(Ordering::SeqCst), 1);
    assert_eq!(detached_hits.load(Ordering::SeqCst), 2);
}

#[test]
fn hot_swap_keeps_state_and_subscribers() {
    let registry = Registry::new();
    let original = StoreDefinition::options(
        "counter",
        OptionsDef::new(|| json!({"count": 0}))
            .getter("doubled", |store| {
                json!(store.get_as::<i64>("count").unwrap_or(0) * 2)
            })
            .action("increment", |store, _args| {
                let current = store.get_as::<i64>("count").unwrap_or(0);
                store.set("count", json!(current + 1));
                Ok(ActionValue::unit())
            }),
    );

    let store = original.get_with(&registry).unwrap();
    store.set("count", json!(5));
    tick();

    let notifications = Arc::new(AtomicUsize::new(0));
    let notifications_clone = notifications.clone();
    store.subscribe(
        move |_m, _s| {
            notifications_clone.fetch_add(1, Ordering::SeqCst);
        },
        SubscribeOptions::default(),
    );

    let edited = StoreDefinition::options(
        "counter",
        OptionsDef::new(|| json!({"count": 0, "step": 3}))
            .getter("tripled", |store| {
                json!(store.get_as::<i64>("count").unwrap_or(0) * 3)
            })
            .action("increment", |store, _args| {
                let step = store.get_as::<i64>("step").unwrap_or(1);
                let current = store.get_as::<i64>("count").unwrap_or(0);
                store.set("count", json!(current + step));
                Ok(ActionValue::unit())
            }),
    );
    edited.hot_update(&registry).unwrap();
    tick();

    // same live instance, surviving state, new field with its default
    assert!(Arc::ptr_eq(&store, &registry.store("counter").unwrap()));
    assert_eq!(store.get("count"), Some(json!(5)));
    assert_eq!(store.get("step"), Some(json!(3)));
    // replaced getters and actions
    assert_eq!(store.get("doubled"), None);
    assert_eq!(store.get("tripled"), Some(json!(15)));
    store.call("increment", &[]).unwrap();
    assert_eq!(store.get("count"), Some(json!(8)));

    // subscribers registered before the swap still hear about changes
    store.patch(json!({"count": 0}));
    assert!(notifications.load(Ordering::SeqCst) > 0);
    // no staging leftovers
    assert_eq!(registry.store_ids(), vec!["counter".to_owned()]);
}

#[test]
fn registry_dispose_severs_every_store() {
    let registry = Registry::new();
    let store = counter_def().get_with(&registry).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    store.subscribe(
        move |_m, _s| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        },
        SubscribeOptions::default(),
    );

    registry.dispose();
    assert!(registry.is_disposed());
    assert!(store.is_disposed());

    store.patch(json!({"count": 1}));
    tick();
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // a disposed registry refuses new builds
    assert!(matches!(
        counter_def().get_with(&registry),
        Err(LarderError::RegistryDisposed)
    ));
}

#[test]
fn setup_store_exports_all_binding_kinds() {
    let registry = Registry::new();
    let store = StoreDefinition::setup("cart", |ctx| {
        let items = Cell::new(json!([]));
        let total = Memo::new({
            let items = items.clone();
            move || json!(items.get().as_array().map_or(0, Vec::len))
        });
        let add = ctx.action(|store, args| {
            let item = args.first().cloned().unwrap_or(Value::Null);
            store.set(
                "items",
                match store.get("items") {
                    Some(Value::Array(mut list)) => {
                        list.push(item);
                        Value::Array(list)
                    }
                    _ => json!([item]),
                },
            );
            Ok(ActionValue::unit())
        });
        larder::SetupBindings::new()
            .state("items", items)
            .getter("total", total)
            .insert("add", Binding::Action(add))
            .opaque("client", Arc::new("http".to_owned()))
    })
    .get_with(&registry)
    .unwrap();

    assert_eq!(store.get("total"), Some(json!(0)));
    store.call("add", &[json!("apple")]).unwrap();
    store.call("add", &[json!("pear")]).unwrap();
    assert_eq!(store.get("items"), Some(json!(["apple", "pear"])));
    assert_eq!(store.get("total"), Some(json!(2)));
    assert!(store.opaque("client").is_some());

    // state flows into the shared tree
    assert_eq!(
        registry.slice_value("cart"),
        Some(json!({"items": ["apple", "pear"]}))
    );
}

#[test]
fn devtools_payloads_describe_a_registry() {
    let registry = Registry::new();
    let store = counter_def().get_with(&registry).unwrap();
    store.set("count", json!(4));

    let tree = devtools::tree(&registry);
    assert_eq!(tree[0].id, devtools::ROOT_ID);
    assert_eq!(tree[1].id, "counter");

    let root_state = devtools::registry_state(&registry);
    assert_eq!(root_state.state[0].key, "counter");

    let state = devtools::store_state(&store);
    assert!(state.state.iter().any(|e| e.key == "count" && e.value == json!(4)));
    assert!(state
        .getters
        .iter()
        .any(|e| e.key == "doubled" && e.value == json!(8) && !e.editable));
}
