mod support;

use runlog_store::{
    ListSessionsOptions, ReplicaConnection, SchemaProvisioner, SessionStats, Value, get_session,
    list_sessions, search_sessions, session_stats,
};
use support::TestDb;

async fn seeded() -> TestDb {
    let db = TestDb::new().await;
    assert!(
        SchemaProvisioner::new()
            .ensure_schema(db.conn.as_ref())
            .await
    );

    let sessions = [
        ("s-old", "implementation", "completed", "2025-01-01 10:00:00"),
        ("s-mid", "review", "error", "2025-01-02 10:00:00"),
        ("s-new", "implementation", "running", "2025-01-03 10:00:00"),
    ];
    for (id, agent_type, status, started_at) in sessions {
        db.conn
            .execute(
                "INSERT INTO sessions (id, agent_type, model, status, started_at)
                 VALUES (?1, ?2, 'm', ?3, ?4)",
                vec![
                    Value::Text(id.to_string()),
                    Value::Text(agent_type.to_string()),
                    Value::Text(status.to_string()),
                    Value::Text(started_at.to_string()),
                ],
            )
            .await
            .expect("seed session");
    }

    let messages = [
        ("m1", "s-old", 1, "user", "please fix the parser"),
        ("m2", "s-old", 2, "assistant", "parser fixed"),
        ("m3", "s-old", 3, "user", "thanks"),
        ("m4", "s-mid", 1, "user", "review the diff"),
        ("m5", "s-new", 2, "assistant", "second"),
        ("m6", "s-new", 1, "user", "first"),
    ];
    for (id, session_id, sequence, role, content) in messages {
        db.conn
            .execute(
                "INSERT INTO messages (id, session_id, sequence, role, content, tool_input)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                vec![
                    Value::Text(id.to_string()),
                    Value::Text(session_id.to_string()),
                    Value::Integer(sequence),
                    Value::Text(role.to_string()),
                    Value::Text(content.to_string()),
                    if id == "m5" {
                        Value::Text("not json".to_string())
                    } else {
                        Value::Null
                    },
                ],
            )
            .await
            .expect("seed message");
    }

    let tools = [
        ("t1", "s-old", "Edit", "success", "2025-01-01T10:00:05.000Z"),
        ("t2", "s-old", "Bash", "error", "2025-01-01T10:00:01.000Z"),
    ];
    for (id, session_id, tool_name, status, started_at) in tools {
        db.conn
            .execute(
                "INSERT INTO tool_executions (id, session_id, tool_name, status, input, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                vec![
                    Value::Text(id.to_string()),
                    Value::Text(session_id.to_string()),
                    Value::Text(tool_name.to_string()),
                    Value::Text(status.to_string()),
                    Value::Text(r#"{"path":"src/parser.rs"}"#.to_string()),
                    Value::Text(started_at.to_string()),
                ],
            )
            .await
            .expect("seed tool");
    }
    db
}

#[tokio::test]
async fn list_orders_newest_first_with_counts() {
    let db = seeded().await;
    let sessions = list_sessions(db.conn.as_ref(), &ListSessionsOptions::default())
        .await
        .expect("list sessions");

    let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s-new", "s-mid", "s-old"]);

    let old = &sessions[2];
    assert_eq!(old.message_count, 3);
    assert_eq!(old.tool_count, 2);
    assert_eq!(sessions[1].message_count, 1);
    assert_eq!(sessions[1].tool_count, 0);
}

#[tokio::test]
async fn list_applies_filters_and_paging() {
    let db = seeded().await;

    let implementation = list_sessions(
        db.conn.as_ref(),
        &ListSessionsOptions {
            agent_type: Some("implementation".to_string()),
            ..ListSessionsOptions::default()
        },
    )
    .await
    .expect("filter by agent type");
    assert_eq!(implementation.len(), 2);

    let errors = list_sessions(
        db.conn.as_ref(),
        &ListSessionsOptions {
            status: Some("error".to_string()),
            ..ListSessionsOptions::default()
        },
    )
    .await
    .expect("filter by status");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].id, "s-mid");

    let window = list_sessions(
        db.conn.as_ref(),
        &ListSessionsOptions {
            started_after: Some("2025-01-02 00:00:00".to_string()),
            started_before: Some("2025-01-02 23:59:59".to_string()),
            ..ListSessionsOptions::default()
        },
    )
    .await
    .expect("filter by time");
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].id, "s-mid");

    let page = list_sessions(
        db.conn.as_ref(),
        &ListSessionsOptions {
            limit: 1,
            offset: 1,
            ..ListSessionsOptions::default()
        },
    )
    .await
    .expect("paged list");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, "s-mid");
}

#[tokio::test]
async fn iso_time_bounds_match_stored_timestamps() {
    let db = seeded().await;

    let window = list_sessions(
        db.conn.as_ref(),
        &ListSessionsOptions {
            started_after: Some("2025-01-02T00:00:00Z".to_string()),
            started_before: Some("2025-01-02T23:59:59.999Z".to_string()),
            ..ListSessionsOptions::default()
        },
    )
    .await
    .expect("filter by ISO time");
    let ids: Vec<&str> = window.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["s-mid"]);

    // Same instant as s-mid; a raw text comparison would put 'T' after ' '.
    let inclusive = list_sessions(
        db.conn.as_ref(),
        &ListSessionsOptions {
            started_after: Some("2025-01-02T10:00:00Z".to_string()),
            ..ListSessionsOptions::default()
        },
    )
    .await
    .expect("inclusive lower bound");
    assert_eq!(inclusive.len(), 2);

    let stats = session_stats(db.conn.as_ref(), None, Some("2025-01-03T00:00:00Z"))
        .await
        .expect("stats since ISO time");
    assert_eq!(stats.total_sessions, 1);
}

#[tokio::test]
async fn detail_orders_children_and_parses_json() {
    let db = seeded().await;
    let detail = get_session(db.conn.as_ref(), "s-new")
        .await
        .expect("get session")
        .expect("session exists");

    let sequences: Vec<i64> = detail.messages.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(detail.messages[0].content.as_deref(), Some("first"));
    assert_eq!(
        detail.messages[1].tool_input,
        Some(serde_json::Value::String("not json".to_string()))
    );
    assert!(detail.tool_executions.is_empty());

    let old = get_session(db.conn.as_ref(), "s-old")
        .await
        .expect("get session")
        .expect("session exists");
    let tools: Vec<&str> = old
        .tool_executions
        .iter()
        .map(|t| t.tool_name.as_str())
        .collect();
    assert_eq!(tools, vec!["Bash", "Edit"]);
    assert_eq!(
        old.tool_executions[0].input,
        Some(serde_json::json!({"path": "src/parser.rs"}))
    );
    assert_eq!(old.status, "completed");
}

#[tokio::test]
async fn missing_session_is_none() {
    let db = seeded().await;
    assert!(
        get_session(db.conn.as_ref(), "nope")
            .await
            .expect("get session")
            .is_none()
    );
}

#[tokio::test]
async fn search_matches_message_content() {
    let db = seeded().await;

    let hits = search_sessions(db.conn.as_ref(), "parser", 20)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "s-old");
    assert_eq!(hits[0].message_count, 3);

    let broad = search_sessions(db.conn.as_ref(), "r", 2)
        .await
        .expect("limited search");
    assert_eq!(broad.len(), 2);

    let none = search_sessions(db.conn.as_ref(), "kubernetes", 20)
        .await
        .expect("empty search");
    assert!(none.is_empty());
}

#[tokio::test]
async fn stats_aggregate_with_filters() {
    let db = seeded().await;

    let all = session_stats(db.conn.as_ref(), None, None)
        .await
        .expect("stats");
    assert_eq!(all.total_sessions, 3);
    assert_eq!(all.completed_sessions, 1);
    assert_eq!(all.error_sessions, 1);
    assert_eq!(all.total_messages, 6);
    assert_eq!(all.total_tool_executions, 2);
    assert!((all.avg_messages_per_session - 2.0).abs() < f64::EPSILON);

    let filtered = session_stats(
        db.conn.as_ref(),
        Some("implementation"),
        Some("2025-01-02 00:00:00"),
    )
    .await
    .expect("filtered stats");
    assert_eq!(filtered.total_sessions, 1);
    assert_eq!(filtered.completed_sessions, 0);
    assert_eq!(filtered.total_messages, 2);
    assert_eq!(filtered.total_tool_executions, 0);
}

#[tokio::test]
async fn stats_on_empty_store_are_zero() {
    let db = TestDb::new().await;
    assert!(
        SchemaProvisioner::new()
            .ensure_schema(db.conn.as_ref())
            .await
    );
    let stats = session_stats(db.conn.as_ref(), None, None)
        .await
        .expect("stats");
    assert_eq!(stats, SessionStats::default());
}

#[tokio::test]
async fn queries_report_errors_instead_of_swallowing() {
    let db = TestDb::new().await;
    // No schema: the tables do not exist.
    assert!(
        list_sessions(db.conn.as_ref(), &ListSessionsOptions::default())
            .await
            .is_err()
    );
    db.conn.fail_queries(true);
    assert!(get_session(db.conn.as_ref(), "s").await.is_err());
}
