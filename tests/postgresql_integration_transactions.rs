//! Transaction tests for the suspending facade.
//!
//! Tests needing a live server skip gracefully when
//! POSTGRES_CONNECTION_STRING is not set; the deferred-operation rejection
//! tests run unconditionally since they fail before connecting.

#![cfg(feature = "postgresql")]

use serde_json::json;
use sqlconduit::{Command, ConduitError, PostgresConduit};

fn connection_string() -> Option<String> {
    std::env::var("POSTGRES_CONNECTION_STRING").ok()
}

async fn setup(table: &str) -> Option<PostgresConduit> {
    let conduit = PostgresConduit::new(connection_string()?);
    conduit
        .execute(&Command::text(format!("DROP TABLE IF EXISTS {table}")))
        .await
        .expect("failed to drop test table");
    conduit
        .execute(&Command::text(format!(
            "CREATE TABLE {table} (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, balance INTEGER NOT NULL)"
        )))
        .await
        .expect("failed to create test table");
    Some(conduit)
}

async fn count_rows(conduit: &PostgresConduit, table: &str) -> i64 {
    conduit
        .query_scalar(&Command::text(format!("SELECT count(*) FROM {table}")))
        .await
        .unwrap()
        .as_i64()
        .unwrap()
}

#[tokio::test]
async fn successful_script_commits_and_sums_affected_rows() {
    let table = "conduit_accounts_commit";
    let Some(conduit) = setup(table).await else {
        println!("Skipping PostgreSQL test: POSTGRES_CONNECTION_STRING not set");
        return;
    };

    let scripts = vec![
        Command::text(format!(
            "INSERT INTO {table} (id, name, balance) VALUES (@id, @name, @balance)"
        ))
        .param("id", 1)
        .param("name", "ada")
        .param("balance", 100),
        Command::text(format!(
            "INSERT INTO {table} (id, name, balance) VALUES (2, 'bo', 50)"
        )),
        Command::text(format!("UPDATE {table} SET balance = balance + 10")),
    ];

    let total = conduit.execute_transaction(&scripts).await.unwrap();
    assert_eq!(total, 4);
    assert_eq!(count_rows(&conduit, table).await, 2);

    let _ = conduit
        .execute(&Command::text(format!("DROP TABLE {table}")))
        .await;
}

#[tokio::test]
async fn failing_script_rolls_back_and_returns_the_zero_sentinel() {
    let table = "conduit_accounts_rollback";
    let Some(conduit) = setup(table).await else {
        println!("Skipping PostgreSQL test: POSTGRES_CONNECTION_STRING not set");
        return;
    };

    let scripts = vec![
        Command::text(format!(
            "INSERT INTO {table} (id, name, balance) VALUES (1, 'ada', 100)"
        )),
        // Violates the unique constraint on name
        Command::text(format!(
            "INSERT INTO {table} (id, name, balance) VALUES (2, 'ada', 50)"
        )),
    ];

    let total = conduit.execute_transaction(&scripts).await.unwrap();
    assert_eq!(total, 0);
    assert_eq!(count_rows(&conduit, table).await, 0);

    let _ = conduit
        .execute(&Command::text(format!("DROP TABLE {table}")))
        .await;
}

#[tokio::test]
async fn scripts_with_explicit_transaction_control_are_rejected_up_front() {
    let Some(conn_str) = connection_string() else {
        println!("Skipping PostgreSQL test: POSTGRES_CONNECTION_STRING not set");
        return;
    };
    let conduit = PostgresConduit::new(conn_str);

    let scripts = vec![Command::text("ROLLBACK")];
    let err = conduit.execute_transaction(&scripts).await.unwrap_err();
    assert!(
        matches!(err, ConduitError::ExplicitTransactionControl(keyword) if keyword == "ROLLBACK")
    );
}

#[tokio::test]
async fn operation_transaction_commits_and_returns_the_operation_value() {
    let table = "conduit_accounts_operation";
    let Some(conduit) = setup(table).await else {
        println!("Skipping PostgreSQL test: POSTGRES_CONNECTION_STRING not set");
        return;
    };

    let insert_one = Command::text(format!(
        "INSERT INTO {table} (id, name, balance) VALUES (1, 'ada', 100)"
    ));
    let insert_two = Command::text(format!(
        "INSERT INTO {table} (id, name, balance) VALUES (2, 'bo', 50)"
    ));

    let total: u64 = conduit
        .execute_transaction_with(|txn| {
            let insert_one = insert_one.clone();
            let insert_two = insert_two.clone();
            Box::pin(async move {
                let mut total = txn.execute(&insert_one).await?;
                total += txn.execute(&insert_two).await?;
                // The operation observes its own uncommitted writes
                let seen = txn
                    .query_scalar(&Command::text(format!("SELECT count(*) FROM {table}")))
                    .await?;
                assert_eq!(seen, json!(2));
                Ok(total)
            })
        })
        .await
        .unwrap();

    assert_eq!(total, 2);
    assert_eq!(count_rows(&conduit, table).await, 2);

    let _ = conduit
        .execute(&Command::text(format!("DROP TABLE {table}")))
        .await;
}

#[tokio::test]
async fn failing_operation_rolls_back_and_returns_default() {
    let table = "conduit_accounts_operation_rollback";
    let Some(conduit) = setup(table).await else {
        println!("Skipping PostgreSQL test: POSTGRES_CONNECTION_STRING not set");
        return;
    };

    let insert = Command::text(format!(
        "INSERT INTO {table} (id, name, balance) VALUES (1, 'ada', 100)"
    ));
    let conflicting = Command::text(format!(
        "INSERT INTO {table} (id, name, balance) VALUES (2, 'ada', 50)"
    ));

    let result: u64 = conduit
        .execute_transaction_with(|txn| {
            let insert = insert.clone();
            let conflicting = conflicting.clone();
            Box::pin(async move {
                txn.execute(&insert).await?;
                txn.execute(&conflicting).await?;
                Ok(7)
            })
        })
        .await
        .unwrap();

    assert_eq!(result, 0);
    assert_eq!(count_rows(&conduit, table).await, 0);

    let _ = conduit
        .execute(&Command::text(format!("DROP TABLE {table}")))
        .await;
}

#[tokio::test]
async fn deferred_operations_are_rejected_before_connecting() {
    // No server needed: the result type is inspected before any connection
    // is provisioned, so even an unreachable host never gets dialed.
    let conduit = PostgresConduit::new("host=127.0.0.1 port=1 user=nobody");

    // Were the guard to let this through, the operation would run, return
    // Ok(None) and commit against the dead host, surfacing a different error.
    let result = conduit
        .execute_transaction_with::<Option<tokio::task::JoinHandle<()>>, _>(|_txn| {
            Box::pin(async move { Ok(None) })
        })
        .await;

    assert!(matches!(
        result,
        Err(ConduitError::DeferredOperationNotSupported(_))
    ));
}
