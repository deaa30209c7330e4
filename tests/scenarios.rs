//! End-to-end coverage for the concrete scenarios and quantified invariants.
//! Network-dependent steps (live LLM, vector store, graph store, database)
//! are exercised in degraded mode, matching how each collaborator behaves
//! when unreachable — the same path a real deployment takes when an
//! external service is down.

use std::collections::HashMap;

use dbvybe_core::config::{Config, GraphConfig, LlmConfig, OrchestratorConfig, VectorConfig};
use dbvybe_core::observability::Sensitive;
use dbvybe_core::orchestrator::Orchestrator;
use dbvybe_core::registry::ConnectionRegistry;
use dbvybe_core::sanitizer;
use dbvybe_core::types::{
    Column, ConnectionDescriptor, Credentials, EngineKind, ForeignKey, GeneratedQuery, Schema, Table,
};
use dbvybe_core::{Core, KnowledgeCache, Response};

fn unreachable_config() -> Config {
    Config {
        llm: LlmConfig {
            endpoint: "http://127.0.0.1:1/unreachable".to_string(),
            api_key: String::new(),
            model: "test".to_string(),
            temperature: 0.0,
            max_tokens: 16,
            timeout_ms: 200,
        },
        vector: VectorConfig { endpoint: String::new(), api_key: String::new(), collection: "c".to_string() },
        graph: GraphConfig { uri: String::new(), user: String::new(), password: String::new(), database: String::new() },
        orchestrator: OrchestratorConfig { request_timeout_ms: 2_000, top_k: 8 },
    }
}

fn descriptor(user_id: &str, connection_id: &str) -> ConnectionDescriptor {
    ConnectionDescriptor {
        user_id: user_id.to_string(),
        connection_id: connection_id.to_string(),
        engine: EngineKind::RelationalA,
        host: "localhost".to_string(),
        port: 5432,
        database: "pizza_shop".to_string(),
        credentials: Credentials { username: "app".to_string(), password: Sensitive::new("secret".to_string()) },
        properties: HashMap::new(),
    }
}

fn table(namespace: &str, name: &str, columns: Vec<&str>, foreign_keys: Vec<ForeignKey>) -> Table {
    Table {
        namespace: namespace.to_string(),
        name: name.to_string(),
        comment: None,
        columns: columns
            .into_iter()
            .enumerate()
            .map(|(i, n)| Column {
                name: n.to_string(),
                type_name: "text".to_string(),
                size: None,
                nullable: true,
                default_value: None,
                comment: None,
                ordinal: i as i32,
            })
            .collect(),
        primary_key: Default::default(),
        foreign_keys,
        indexes: Vec::new(),
    }
}

/// Scenario 1: a cached schema answers a knowledge question without
/// touching the LLM, listing both tables in registration order.
#[tokio::test]
async fn knowledge_answer_lists_both_tables() {
    let core = Core::new(unreachable_config());
    core.orchestrator.registry().register(descriptor("alice", "c1")).await;
    // Registration normally provisions the cache from a live database via
    // `register_connection`; seed it directly here to isolate this test
    // from needing a reachable one.
    core.orchestrator
        .cache()
        .put(
            "c1",
            Schema {
                engine: EngineKind::RelationalA,
                database_name: "pizza_shop".to_string(),
                namespaces: Default::default(),
                tables: vec![
                    table("pizza_shop", "customer", vec!["id", "name", "email", "phone", "address", "created_at"], Vec::new()),
                    table("pizza_shop", "order", vec!["id", "customer_id", "total", "status", "created_at"], Vec::new()),
                ],
            },
        )
        .await;

    let response = core.ask("alice", "c1", "which tables does this database have?", "s1").await;
    match response {
        Response::KnowledgeAnswer { text } => {
            let customer = text.find("pizza_shop.customer").expect("customer table listed");
            let order = text.find("pizza_shop.order").expect("order table listed");
            assert!(customer < order, "customer must be listed before order");
        }
        other => panic!("expected KnowledgeAnswer, got {other:?}"),
    }
}

/// Scenario 2 (sanitization half — the LLM/execution half needs a live
/// model and database): the literal generated query from the scenario is
/// qualified to quoted `"{namespace}"."{name}"` form for every bare table
/// reference.
#[test]
fn relational_generation_is_schema_qualified() {
    let schema = Schema {
        engine: EngineKind::RelationalA,
        database_name: "pizza_shop".to_string(),
        namespaces: ["pizza_shop".to_string()].into_iter().collect(),
        tables: vec![
            table("pizza_shop", "customer", vec!["customer_id"], Vec::new()),
            table("pizza_shop", "order", vec!["order_id", "customer_id"], Vec::new()),
            table("pizza_shop", "payment", vec!["order_id", "amount"], Vec::new()),
        ],
    };
    let generated = GeneratedQuery {
        engine: EngineKind::RelationalA,
        text: "SELECT DISTINCT c.* FROM customer c JOIN \"order\" o ON c.customer_id=o.customer_id \
               JOIN payment p ON o.order_id=p.order_id WHERE p.amount > 20"
            .to_string(),
        explanation: String::new(),
    };

    let sanitized = sanitizer::sanitize(&generated, &schema).unwrap();
    assert!(sanitized.text.contains("FROM \"pizza_shop\".\"customer\""));
    assert!(sanitized.text.contains("JOIN \"order\""), "quoted identifiers pass through unchanged");
    assert!(sanitized.text.contains("JOIN \"pizza_shop\".\"payment\""));
}

/// Scenario 3: a destructive statement is blocked before it ever reaches
/// an EngineDriver.
#[test]
fn drop_table_is_blocked_with_reason() {
    let schema = Schema {
        engine: EngineKind::RelationalA,
        database_name: "pizza_shop".to_string(),
        namespaces: ["pizza_shop".to_string()].into_iter().collect(),
        tables: vec![table("pizza_shop", "customer", vec!["id"], Vec::new())],
    };
    let generated = GeneratedQuery {
        engine: EngineKind::RelationalA,
        text: "DROP TABLE pizza_shop.customer;".to_string(),
        explanation: String::new(),
    };

    let err = sanitizer::sanitize(&generated, &schema).unwrap_err();
    match err {
        dbvybe_core::AppError::Blocked { reason, .. } => assert_eq!(reason, "dangerous operation: DROP"),
        other => panic!("expected Blocked, got {other:?}"),
    }
}

/// Scenario 5: with the vector store unreachable, a query request still
/// produces a response through schema cache + graph alone — never an
/// Error surfaced to the caller for that reason.
#[tokio::test]
async fn degraded_vector_store_does_not_error_the_request() {
    let orchestrator = Orchestrator::new(unreachable_config(), ConnectionRegistry::new(), KnowledgeCache::new());
    assert!(orchestrator.vector().is_degraded());
    assert!(orchestrator.graph().is_degraded());

    orchestrator.registry().register(descriptor("alice", "c1")).await;
    orchestrator
        .cache()
        .put("c1", Schema {
            engine: EngineKind::RelationalA,
            database_name: "pizza_shop".to_string(),
            namespaces: Default::default(),
            tables: vec![table("pizza_shop", "customer", vec!["id"], Vec::new())],
        })
        .await;

    // The LLM is unreachable too, so generation itself fails — but the
    // failure must be an LLMError or Timeout, never a store-unavailable
    // kind: the degraded vector and graph stores are tolerated, not
    // escalated into the request's failure.
    let response = orchestrator.handle("alice", "c1", "select total amount per customer", "s1").await;
    match response {
        Response::Error { kind, .. } => {
            assert_ne!(kind, "VectorStoreUnavailable");
            assert_ne!(kind, "GraphStoreUnavailable");
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

/// Scenario 6: a connection owned by one user is invisible to another;
/// no engine or LLM call is ever reached.
#[tokio::test]
async fn cross_user_access_is_not_found() {
    let core = Core::new(unreachable_config());
    core.orchestrator.registry().register(descriptor("alice", "c1")).await;

    let response = core.ask("bob", "c1", "which tables does this have?", "s1").await;
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, "NotFound"),
        other => panic!("expected Error(NotFound), got {other:?}"),
    }
}

/// Boundary: empty user text is rejected before resolution.
#[tokio::test]
async fn empty_text_is_invalid_input() {
    let core = Core::new(unreachable_config());
    core.orchestrator.registry().register(descriptor("alice", "c1")).await;

    let response = core.ask("alice", "c1", "", "s1").await;
    match response {
        Response::Error { kind, .. } => assert_eq!(kind, "InvalidInput"),
        other => panic!("expected Error(InvalidInput), got {other:?}"),
    }
}

/// Invariant 1 + round-trip law: sanitizing an already-sanitized query is a
/// no-op, and the result never contains a DANGEROUS-set token.
#[test]
fn sanitize_is_idempotent_and_dangerous_free() {
    let schema = Schema {
        engine: EngineKind::RelationalA,
        database_name: "pizza_shop".to_string(),
        namespaces: ["pizza_shop".to_string()].into_iter().collect(),
        tables: vec![table("pizza_shop", "customer", vec!["id"], Vec::new())],
    };
    let generated = GeneratedQuery {
        engine: EngineKind::RelationalA,
        text: "SELECT * FROM customer".to_string(),
        explanation: String::new(),
    };

    let first = sanitizer::sanitize(&generated, &schema).unwrap();
    let second = sanitizer::sanitize(
        &GeneratedQuery { engine: first.engine, text: first.text.clone(), explanation: first.explanation.clone() },
        &schema,
    )
    .unwrap();

    assert_eq!(first.text, second.text);
    const DANGEROUS: &[&str] = &["DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "TRUNCATE"];
    let upper = second.text.to_ascii_uppercase();
    for token in DANGEROUS {
        assert!(!upper.contains(token), "sanitized query must never contain {token}");
    }
}

/// Invariant: an identifier collision across namespaces is left unqualified
/// by the sanitizer rather than guessed at.
#[test]
fn ambiguous_table_name_is_left_unqualified() {
    let schema = Schema {
        engine: EngineKind::RelationalA,
        database_name: "db".to_string(),
        namespaces: ["north".to_string(), "south".to_string()].into_iter().collect(),
        tables: vec![
            table("north", "order", vec!["id"], Vec::new()),
            table("south", "order", vec!["id"], Vec::new()),
        ],
    };
    let generated =
        GeneratedQuery { engine: EngineKind::RelationalA, text: "SELECT * FROM order".to_string(), explanation: String::new() };

    let sanitized = sanitizer::sanitize(&generated, &schema).unwrap();
    assert_eq!(sanitized.text, "SELECT * FROM order");
}
