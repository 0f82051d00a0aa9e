//! Invoice sequencer integration tests: uniqueness under concurrency,
//! year rollover and no reuse after void.
//!
//! Run with: ./scripts/integ-tests.sh -p billing-service

mod common;

use billing_service::models::{CreateLine, IssueOptions, LineType};
use billing_service::services::{lifecycle, sequencer};
use common::{create_test_client, create_test_draft, date, dec, setup_db, test_codes};
use serial_test::serial;
use std::collections::HashSet;
use tokio::task::JoinSet;

/// 50 issuance requests for the same year fired concurrently must produce
/// strictly increasing, unique, gap-free numbers.
#[tokio::test]
#[ignore]
#[serial]
async fn concurrent_issuance_yields_unique_numbers() {
    let db = setup_db().await;
    let codes = test_codes();

    // One draft per client; the concurrency is across invoices of one year.
    let mut invoice_ids = Vec::new();
    for _ in 0..50 {
        let client = create_test_client(&db).await;
        let invoice = create_test_draft(&db, client.client_id).await;
        lifecycle::add_line(
            &db,
            invoice.invoice_id,
            &CreateLine {
                line_type: LineType::General,
                description: "Retainer".to_string(),
                quantity: dec("1.00"),
                unit_price: dec("100.00"),
            },
        )
        .await
        .unwrap();
        invoice_ids.push(invoice.invoice_id);
    }

    let mut tasks = JoinSet::new();
    for invoice_id in invoice_ids {
        let db = db.clone();
        let codes = codes.clone();
        tasks.spawn(async move {
            let result = lifecycle::issue_invoice(
                &db,
                &codes,
                invoice_id,
                IssueOptions {
                    issue_date: Some(date(2030, 6, 15)),
                    ..IssueOptions::default()
                },
            )
            .await
            .expect("issue should succeed");
            result.invoice.sequence_number.expect("sequence assigned")
        });
    }

    let mut sequences = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        sequences.push(joined.expect("task panicked"));
    }

    assert_eq!(sequences.len(), 50);
    let unique: HashSet<i32> = sequences.iter().copied().collect();
    assert_eq!(unique.len(), 50, "sequence numbers must be unique");

    // Serialized max+1 issuance leaves no gaps.
    let min = *sequences.iter().min().unwrap();
    let max = *sequences.iter().max().unwrap();
    assert_eq!(max - min + 1, 50);
}

#[tokio::test]
#[ignore]
async fn year_rollover_restarts_at_one() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;

    // Everything inside one rolled-back transaction: the scan sees rows of
    // its own transaction, and years 2060/2061 stay untouched on disk.
    let mut tx = db.pool().begin().await.unwrap();

    let (seq, number) = sequencer::next_number(&mut tx, 2060).await.unwrap();
    assert_eq!(seq, 1);
    assert_eq!(number, "2060-001");

    sqlx::query(
        r#"
        INSERT INTO invoices (invoice_id, client_id, invoice_number, sequence_year,
            sequence_number, status, issue_date)
        VALUES ($1, $2, $3, 2060, $4, 'issued', $5)
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(client.client_id)
    .bind(&number)
    .bind(seq)
    .bind(date(2060, 1, 15))
    .execute(&mut *tx)
    .await
    .unwrap();

    let (seq, number) = sequencer::next_number(&mut tx, 2060).await.unwrap();
    assert_eq!(seq, 2);
    assert_eq!(number, "2060-002");

    // A new year starts back at 1.
    let (seq, number) = sequencer::next_number(&mut tx, 2061).await.unwrap();
    assert_eq!(seq, 1);
    assert_eq!(number, "2061-001");

    tx.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn voided_numbers_are_never_reused() {
    let db = setup_db().await;
    let codes = test_codes();
    let opts = || IssueOptions {
        issue_date: Some(date(2031, 2, 1)),
        ..IssueOptions::default()
    };

    let client = create_test_client(&db).await;
    let first = create_test_draft(&db, client.client_id).await;
    lifecycle::add_line(
        &db,
        first.invoice_id,
        &CreateLine {
            line_type: LineType::General,
            description: "Retainer".to_string(),
            quantity: dec("1.00"),
            unit_price: dec("100.00"),
        },
    )
    .await
    .unwrap();

    let first = lifecycle::issue_invoice(&db, &codes, first.invoice_id, opts()).await.unwrap();
    let first_seq = first.invoice.sequence_number.unwrap();

    lifecycle::void_invoice(&db, first.invoice.invoice_id, None).await.unwrap();

    // The voided invoice keeps its number; the next issuance moves past it.
    let second = create_test_draft(&db, client.client_id).await;
    lifecycle::add_line(
        &db,
        second.invoice_id,
        &CreateLine {
            line_type: LineType::General,
            description: "Retainer".to_string(),
            quantity: dec("1.00"),
            unit_price: dec("100.00"),
        },
    )
    .await
    .unwrap();
    let second = lifecycle::issue_invoice(&db, &codes, second.invoice_id, opts()).await.unwrap();

    assert!(second.invoice.sequence_number.unwrap() > first_seq);
    assert_ne!(second.invoice.invoice_number, first.invoice.invoice_number);
}
