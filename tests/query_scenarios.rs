#![allow(missing_docs)]

use qdb::query::{QueryEngine, QueryError};
use qdb::{HKey, MemStore};
use serde_json::json;

/// users {u1,u2}, orders {o1,o2,o3} with o1,o2 -> u1 and o3 -> u2.
fn users_orders() -> MemStore {
    let mut store = MemStore::new();
    for (u, name) in [("u1", "ada"), ("u2", "alan")] {
        store.insert(HKey::new("users", u), [("name", name)]);
    }
    for (o, u, amount) in [("o1", "u1", "100"), ("o2", "u1", "40"), ("o3", "u2", "75")] {
        let key = HKey::new("orders", o);
        store.insert(key.clone(), [("amount", amount)]);
        store.link(&key, &HKey::new("users", u));
    }
    store
}

fn key_strings(keys: &[HKey]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}

#[test]
fn filter_on_related_index_yields_reachable_root_keys() {
    let store = users_orders();
    let mut engine = QueryEngine::new(&store);
    let out = engine.query("users", &["orders:amount=100"], true).unwrap();
    assert_eq!(key_strings(out.keys().unwrap()), vec!["users:u1"]);

    let out = engine.query("users", &["orders:amount=100"], false).unwrap();
    let tree = out.tree().unwrap();
    assert!(!tree.flat);
    assert_eq!(
        serde_json::to_value(&tree.tree).unwrap(),
        json!({"orders": {"orders:o1": {"users": {"users:u1": {}}}}})
    );
}

#[test]
fn bare_index_lists_keys_or_flat_tree() {
    let store = users_orders();
    let mut engine = QueryEngine::new(&store);
    let out = engine.query("users", &[], true).unwrap();
    assert_eq!(key_strings(out.keys().unwrap()), vec!["users:u1", "users:u2"]);

    let out = engine.query("users", &[], false).unwrap();
    assert_eq!(
        serde_json::to_value(&out.tree().unwrap().tree).unwrap(),
        json!({"users": {"users:u1": {}, "users:u2": {}}})
    );
}

#[test]
fn selecting_a_field_keeps_records_flat() {
    let store = users_orders();
    let mut engine = QueryEngine::new(&store);
    let out = engine.query("users", &["name"], false).unwrap();
    let tree = out.tree().unwrap();
    assert!(tree.flat);
    assert_eq!(tree.fields.get("users").unwrap().fields, vec!["name"]);
    assert_eq!(tree.tree.get("users").unwrap().keys(), vec!["users:u1", "users:u2"]);
}

#[test]
fn key_root_maps_into_primary_index() {
    let store = users_orders();
    let mut engine = QueryEngine::new(&store);
    let out = engine.query("users:u1", &["orders:amount"], false).unwrap();
    let orders = out.tree().unwrap().tree.get("orders").unwrap();
    assert_eq!(orders.keys(), vec!["orders:o1", "orders:o2"]);
    assert_eq!(
        orders.get("orders:o2").unwrap().get("users").unwrap().keys(),
        vec!["users:u1"]
    );
}

#[test]
fn reductions_skip_null_values() {
    let mut store = MemStore::new();
    store.create_index("orders", ["amount", "status"]);
    for (o, amount) in [("o1", Some("10")), ("o2", Some("20")), ("o3", None), ("o4", Some("30"))] {
        let mut fields = vec![("status", "paid")];
        if let Some(amount) = amount {
            fields.push(("amount", amount));
        }
        store.insert(HKey::new("orders", o), fields);
    }
    let mut engine = QueryEngine::new(&store);
    let out = engine
        .query(
            "orders",
            &["@[sum:amount,avg:amount,count:amount,count,min:amount,max:amount]"],
            false,
        )
        .unwrap();
    let node = out.tree().unwrap().tree.get("orders").unwrap();
    assert_eq!(node.aggregate_value("orders:sum:amount"), Some(Some("60")));
    assert_eq!(node.aggregate_value("orders:avg:amount"), Some(Some("20.00")));
    assert_eq!(node.aggregate_value("orders:count:amount"), Some(Some("3")));
    assert_eq!(node.aggregate_value("orders:count"), Some(Some("4")));
    assert_eq!(node.aggregate_value("orders:min:amount"), Some(Some("10")));
    assert_eq!(node.aggregate_value("orders:max:amount"), Some(Some("30")));
}

#[test]
fn null_only_group_reduces_to_null() {
    let mut store = MemStore::new();
    for (o, status, amount) in [("o1", "paid", Some("10")), ("o2", "paid", Some("50")), ("o3", "open", None)] {
        let mut fields = vec![("status", status)];
        if let Some(amount) = amount {
            fields.push(("amount", amount));
        }
        store.insert(HKey::new("orders", o), fields);
    }
    let mut engine = QueryEngine::new(&store);
    let out = engine.query("orders", &["status", "@[sum:amount,count]"], false).unwrap();
    assert_eq!(
        serde_json::to_value(&out.tree().unwrap().tree).unwrap(),
        json!({"orders": {"status": {
            "paid": {"@[aggregate]": {"orders:sum:amount": {"60": {}}, "orders:count": {"2": {}}}},
            "open": {"@[aggregate]": {"orders:sum:amount": null, "orders:count": {"1": {}}}}
        }}})
    );
}

#[test]
fn unreachable_aggregate_names_alternatives() {
    let mut store = users_orders();
    store.insert(HKey::new("products", "p1"), [("price", "3")]);
    let mut engine = QueryEngine::new(&store);
    let err = engine.query("users:u1", &["products:@[count]"], false).unwrap_err();
    match &err {
        QueryError::UnresolvedAggregate { index, alternatives, .. } => {
            assert_eq!(index, "products");
            assert_eq!(alternatives, &vec!["products".to_owned()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_no_data());
}

#[test]
fn reachable_aggregate_without_rows_is_no_data() {
    let mut store = users_orders();
    store.insert(HKey::new("users", "u3"), [("name", "grace")]);
    let mut engine = QueryEngine::new(&store);
    let err = engine.query("users:u3", &["orders:@[sum:amount]"], false).unwrap_err();
    assert!(err.is_no_data());
    assert_eq!(err.to_string(), "No `orders` data found.");
}

#[test]
fn empty_match_is_no_data() {
    let store = users_orders();
    let mut engine = QueryEngine::new(&store);
    let err = engine.query("users", &["orders:amount>1000"], false).unwrap_err();
    assert!(err.is_no_data());
    assert_eq!(err.code(), "NoData");
}

#[test]
fn unjustified_field_names_index_and_field() {
    let store = users_orders();
    let mut engine = QueryEngine::new(&store);
    let err = engine.query("users", &["users:email"], false).unwrap_err();
    assert!(err.to_string().contains("users:email"));
}

#[test]
fn virtual_field_only_supports_inclusion() {
    let store = users_orders();
    let mut engine = QueryEngine::new(&store);
    let out = engine.query("users", &["@id=[u2]"], true).unwrap();
    assert_eq!(key_strings(out.keys().unwrap()), vec!["users:u2"]);
    assert!(matches!(
        engine.query("users", &["@id>u1"], true),
        Err(QueryError::VirtualFieldOperator { .. })
    ));
}

#[test]
fn identical_queries_render_identically() {
    let store = users_orders();
    let mut engine = QueryEngine::new(&store);
    let first = serde_json::to_string(&engine.query("users", &["orders:amount>10", "users:name"], false).unwrap()).unwrap();
    let second = serde_json::to_string(&engine.query("users", &["orders:amount>10", "users:name"], false).unwrap()).unwrap();
    let fresh = serde_json::to_string(
        &QueryEngine::new(&store)
            .query("users", &["orders:amount>10", "users:name"], false)
            .unwrap(),
    )
    .unwrap();
    assert_eq!(first, second);
    assert_eq!(first, fresh);
}

#[test]
fn field_count_alone_keeps_one_group() {
    let mut store = MemStore::new();
    for (o, status, amount) in [("o1", "paid", Some("10")), ("o2", "paid", Some("50")), ("o3", "open", None)] {
        let mut fields = vec![("status", status)];
        if let Some(amount) = amount {
            fields.push(("amount", amount));
        }
        store.insert(HKey::new("orders", o), fields);
    }
    let mut engine = QueryEngine::new(&store);
    let out = engine.query("orders", &["status", "@[count:amount]"], false).unwrap();
    assert_eq!(
        serde_json::to_value(&out.tree().unwrap().tree).unwrap(),
        json!({"orders": {"@[aggregate]": {"orders:count:amount": {"2": {}}}}})
    );
}

/// accounts {a1..a4}; orders o1,o2 -> a4 and o3 -> a3. The sampled
/// accounts mostly lack orders, so the pair classifies as unknown.
fn sparse_accounts() -> MemStore {
    let mut store = MemStore::new();
    for (a, name) in [("a1", "ann"), ("a2", "bob"), ("a3", "kate"), ("a4", "mike")] {
        store.insert(HKey::new("accounts", a), [("name", name)]);
    }
    for (o, a, amount) in [("o1", "a4", "10"), ("o2", "a4", "20"), ("o3", "a3", "5")] {
        let key = HKey::new("orders", o);
        store.insert(key.clone(), [("amount", amount)]);
        store.link(&key, &HKey::new("accounts", a));
    }
    store
}

#[test]
fn scored_primary_drives_aggregated_tree() {
    let store = sparse_accounts();
    let mut engine = QueryEngine::new(&store);
    let out = engine
        .query("accounts", &["accounts:name$e", "orders:@[sum:amount,count]"], false)
        .unwrap();
    let tree = &out.tree().unwrap().tree;
    assert_eq!(tree.keys(), vec!["orders"]);
    let orders = tree.get("orders").unwrap();
    assert_eq!(orders.keys(), vec!["orders:o1", "orders:o2", "orders:o3"]);
    let sum_under = |order: &str, account: &str| {
        orders
            .get(order)
            .and_then(|n| n.get("accounts"))
            .and_then(|n| n.get(account))
            .and_then(|n| n.get("orders"))
            .and_then(|n| n.aggregate_value("orders:sum:amount"))
            .flatten()
            .map(str::to_owned)
    };
    assert_eq!(sum_under("orders:o1", "accounts:a4").as_deref(), Some("10"));
    assert_eq!(sum_under("orders:o3", "accounts:a3").as_deref(), Some("5"));
    assert_eq!(sum_under("orders:o1", "accounts:a3"), None);
}

#[test]
fn root_limit_applies_before_projecting_to_primary() {
    let store = sparse_accounts();
    let mut engine = QueryEngine::new(&store);
    let out = engine
        .query("accounts!1", &["accounts:name$e", "orders:@[sum:amount,count]"], false)
        .unwrap();
    let orders = out.tree().unwrap().tree.get("orders").unwrap();
    assert_eq!(orders.keys(), vec!["orders:o3"]);
    let reduced = orders
        .get("orders:o3")
        .and_then(|n| n.get("accounts"))
        .and_then(|n| n.get("accounts:a3"))
        .and_then(|n| n.get("orders"))
        .unwrap();
    assert_eq!(reduced.aggregate_value("orders:sum:amount"), Some(Some("5")));
    assert_eq!(reduced.aggregate_value("orders:count"), Some(Some("1")));
}

/// users -> orders -> items, with every item also linked to its user.
fn users_orders_items() -> MemStore {
    let mut store = MemStore::new();
    for u in ["u1", "u2"] {
        store.insert(HKey::new("users", u), [("name", u)]);
    }
    for (o, u, amount) in [("o1", "u1", "100"), ("o2", "u1", "20"), ("o3", "u2", "80"), ("o4", "u2", "10")] {
        let key = HKey::new("orders", o);
        store.insert(key.clone(), [("amount", amount)]);
        store.link(&key, &HKey::new("users", u));
    }
    for n in 1..=8usize {
        let order = format!("o{}", (n + 1) / 2);
        let user = if n <= 4 { "u1" } else { "u2" };
        let key = HKey::new("items", &format!("i{n}"));
        store.insert(key.clone(), [("qty", n.to_string())]);
        store.link(&key, &HKey::new("orders", &order));
        store.link(&key, &HKey::new("users", user));
    }
    store
}

#[test]
fn aggregate_nests_under_filtered_third_index() {
    let store = users_orders_items();
    let mut engine = QueryEngine::new(&store);
    let out = engine
        .query("users", &["orders:amount>50", "items:@[sum:qty]"], false)
        .unwrap();
    assert_eq!(
        serde_json::to_value(&out.tree().unwrap().tree).unwrap(),
        json!({"users": {
            "users:u1": {"orders": {"orders:o1": {"items": {"@[aggregate]": {"items:sum:qty": {"3": {}}}}}}},
            "users:u2": {"orders": {"orders:o3": {"items": {"@[aggregate]": {"items:sum:qty": {"11": {}}}}}}}
        }})
    );
}
