use chrono::NaiveDate;
use serde::Serialize;
use utag::{Engine, ToValue, Value, to_value};

#[derive(ToValue)]
struct User {
    name: String,
    #[value("mail")]
    email: Option<String>,
    #[value(rename = "joined_on")]
    joined: NaiveDate,
    #[value(ignore)]
    #[allow(dead_code)]
    password: String,
    visits: u32,
}

fn user() -> User {
    User {
        name: "ada".to_string(),
        email: None,
        joined: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        password: "secret".to_string(),
        visits: 3,
    }
}

#[test]
fn test_derive_to_value_keys() {
    let Value::Map(map) = user().to_value() else {
        panic!("Expected Map");
    };
    assert_eq!(map.get("name"), Some(&Value::from("ada")));
    assert_eq!(map.get("mail"), Some(&Value::Null));
    assert!(map.contains_key("joined_on"));
    assert!(!map.contains_key("password"));
    assert!(!map.contains_key("email"));
    assert_eq!(map.get("visits"), Some(&Value::I64(3)));
}

#[test]
fn test_render_derived_struct() {
    let engine = Engine::new();
    let out = engine
        .render_str(
            "{{ name|upper }} joined {{ joined_on }}{{ mail }}; {% repeat(visits) %}*{% endrepeat %}{{ password }}",
            &user(),
        )
        .unwrap();
    assert_eq!(out, "ADA joined 2024-03-09; ***");
}

#[derive(Serialize)]
struct Order {
    id: u64,
    items: Vec<Item>,
}

#[derive(Serialize)]
struct Item {
    sku: &'static str,
    qty: i32,
}

#[test]
fn test_serde_bridge_renders() {
    let order = Order {
        id: 7,
        items: vec![Item { sku: "A-1", qty: 2 }, Item { sku: "B-2", qty: 1 }],
    };
    let vars = to_value(&order).unwrap();
    let out = Engine::new()
        .render_str(
            "#{{ id }}: {{ items.0.sku }}x{{ items.0.qty }}, {{ items|length }} lines",
            &vars,
        )
        .unwrap();
    assert_eq!(out, "#7: A-1x2, 2 lines");
}
