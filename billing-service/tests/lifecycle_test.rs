//! Invoice lifecycle integration tests: draft uniqueness, attachment
//! eligibility, cached totals and status transitions.
//!
//! Run with: ./scripts/integ-tests.sh -p billing-service

mod common;

use billing_service::error::BillingError;
use billing_service::models::{
    AllocationTarget, CreateDraftInvoice, CreateLine, IssueOptions, ItemRef, LineType,
    PaymentMethod, RecordPayment,
};
use billing_service::services::{allocation, ledger, lifecycle};
use common::{
    create_test_client, create_test_draft, create_test_expense, create_test_time_entry, date, dec,
    draft_with_time, setup_db, test_codes,
};
use rust_decimal::Decimal;

#[tokio::test]
#[ignore]
async fn create_draft_starts_empty() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;

    let invoice = create_test_draft(&db, client.client_id).await;

    assert_eq!(invoice.status, "draft");
    assert!(invoice.invoice_number.is_none());
    assert_eq!(invoice.total, Decimal::ZERO);
    assert!(invoice.issue_date.is_none());
}

#[tokio::test]
#[ignore]
async fn second_draft_for_client_is_rejected() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;

    create_test_draft(&db, client.client_id).await;

    let result = lifecycle::create_draft(
        &db,
        &CreateDraftInvoice {
            client_id: client.client_id,
            notes: String::new(),
        },
    )
    .await;

    assert!(matches!(result, Err(BillingError::DraftAlreadyExists { .. })));
}

#[tokio::test]
#[ignore]
async fn attach_links_items_and_recomputes_totals() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;
    let entry = create_test_time_entry(&db, client.client_id, "8.00", "150.00").await;
    let expense = create_test_expense(&db, client.client_id, "250.00").await;

    let result = lifecycle::attach_items(
        &db,
        invoice.invoice_id,
        &[ItemRef::time(entry.time_entry_id), ItemRef::expense(expense.expense_id)],
    )
    .await
    .unwrap();

    assert_eq!(result.attached, 2);
    assert_eq!(result.invoice.subtotal, dec("1450.00"));
    assert_eq!(result.invoice.total, dec("1450.00"));

    let lines = db.get_invoice_lines(invoice.invoice_id).await.unwrap();
    assert_eq!(lines.len(), 2);
    let line_sum: Decimal = lines.iter().map(|l| l.line_total).sum();
    assert_eq!(result.invoice.total, line_sum);

    // Both sides of the link are set; items stay unbilled until issuance.
    let entry = db.get_time_entry(entry.time_entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "unbilled");
    assert!(entry.invoice_line_id.is_some());
    assert_eq!(
        lines.iter().find(|l| l.line_type == "time").unwrap().time_entry_id,
        Some(entry.time_entry_id)
    );
}

#[tokio::test]
#[ignore]
async fn attach_rejects_items_of_another_client() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;
    let other = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;
    let entry = create_test_time_entry(&db, other.client_id, "2.00", "100.00").await;

    let result =
        lifecycle::attach_items(&db, invoice.invoice_id, &[ItemRef::time(entry.time_entry_id)])
            .await;

    match result {
        Err(BillingError::ItemNotEligible { rejected }) => {
            assert_eq!(rejected.len(), 1);
            assert_eq!(rejected[0].item.id, entry.time_entry_id);
        }
        other => panic!("expected ItemNotEligible, got {:?}", other.map(|r| r.attached)),
    }

    let invoice = db.get_invoice(invoice.invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.total, Decimal::ZERO);
}

#[tokio::test]
#[ignore]
async fn attach_is_atomic_per_batch() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;
    let other = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;
    let good = create_test_time_entry(&db, client.client_id, "3.00", "150.00").await;
    let bad = create_test_time_entry(&db, other.client_id, "1.00", "150.00").await;

    let result = lifecycle::attach_items(
        &db,
        invoice.invoice_id,
        &[ItemRef::time(good.time_entry_id), ItemRef::time(bad.time_entry_id)],
    )
    .await;

    assert!(matches!(result, Err(BillingError::ItemNotEligible { .. })));

    // Nothing attached, not even the eligible item.
    let good = db.get_time_entry(good.time_entry_id).await.unwrap().unwrap();
    assert!(good.invoice_line_id.is_none());
    let invoice = db.get_invoice(invoice.invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.total, Decimal::ZERO);
    assert!(db.get_invoice_lines(invoice.invoice_id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn attach_rejects_non_billable_expense() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;

    let expense = db
        .create_expense(&billing_service::models::CreateExpense {
            client_id: client.client_id,
            expense_date: date(2025, 3, 12),
            amount: dec("99.00"),
            description: "Internal".to_string(),
            billable: false,
        })
        .await
        .unwrap();

    let result =
        lifecycle::attach_items(&db, invoice.invoice_id, &[ItemRef::expense(expense.expense_id)])
            .await;

    assert!(matches!(result, Err(BillingError::ItemNotEligible { .. })));
}

#[tokio::test]
#[ignore]
async fn attach_rejects_already_attached_item() {
    let db = setup_db().await;
    let codes = test_codes();

    let (client, first_invoice, entry) = draft_with_time(&db, "5.00", "100.00").await;
    lifecycle::issue_invoice(&db, &codes, first_invoice.invoice_id, IssueOptions::default())
        .await
        .unwrap();

    let second = create_test_draft(&db, client.client_id).await;
    let result =
        lifecycle::attach_items(&db, second.invoice_id, &[ItemRef::time(entry.time_entry_id)])
            .await;

    assert!(matches!(result, Err(BillingError::ItemNotEligible { .. })));

    // Neither invoice's totals moved.
    let first_invoice = db.get_invoice(first_invoice.invoice_id).await.unwrap().unwrap();
    assert_eq!(first_invoice.total, dec("500.00"));
    let second = db.get_invoice(second.invoice_id).await.unwrap().unwrap();
    assert_eq!(second.total, Decimal::ZERO);
}

#[tokio::test]
#[ignore]
async fn issue_assigns_number_and_bills_items() {
    let db = setup_db().await;
    let codes = test_codes();

    let (_client, invoice, entry) = draft_with_time(&db, "8.00", "150.00").await;
    let issue_date = date(2025, 4, 1);
    let result = lifecycle::issue_invoice(
        &db,
        &codes,
        invoice.invoice_id,
        IssueOptions {
            issue_date: Some(issue_date),
            ..IssueOptions::default()
        },
    )
    .await
    .unwrap();

    let issued = &result.invoice;
    assert_eq!(issued.status, "issued");
    let number = issued.invoice_number.as_deref().expect("number assigned");
    assert!(number.starts_with("2025-"), "got {}", number);
    assert_eq!(issued.sequence_year, Some(2025));
    assert_eq!(issued.issue_date, Some(issue_date));
    // Net 30 from the client's payment terms.
    assert_eq!(issued.due_date, Some(date(2025, 5, 1)));
    assert_eq!(issued.total, dec("1200.00"));

    let entry = db.get_time_entry(entry.time_entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "billed");

    assert!(result.entry_id.is_some());
    let entries = ledger::entries_for_document(db.pool(), "invoice", invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].description, format!("Invoice {} posted", number));
    let _ = client;
}

#[tokio::test]
#[ignore]
async fn double_issue_creates_one_forward_entry() {
    let db = setup_db().await;
    let codes = test_codes();

    let (_client, invoice, _entry) = draft_with_time(&db, "2.00", "200.00").await;

    lifecycle::issue_invoice(&db, &codes, invoice.invoice_id, IssueOptions::default())
        .await
        .unwrap();
    let second =
        lifecycle::issue_invoice(&db, &codes, invoice.invoice_id, IssueOptions::default()).await;

    assert!(matches!(second, Err(BillingError::InvoiceNotDraft { .. })));

    let entries = ledger::entries_for_document(db.pool(), "invoice", invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1, "double issue must not double post");
}

#[tokio::test]
#[ignore]
async fn issue_without_lines_needs_confirmation() {
    let db = setup_db().await;
    let codes = test_codes();
    let client = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;

    let refused =
        lifecycle::issue_invoice(&db, &codes, invoice.invoice_id, IssueOptions::default()).await;
    assert!(matches!(refused, Err(BillingError::NoLinesAttached { .. })));

    let result = lifecycle::issue_invoice(
        &db,
        &codes,
        invoice.invoice_id,
        IssueOptions {
            allow_empty: true,
            ..IssueOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(result.invoice.status, "issued");
    assert!(result.invoice.invoice_number.is_some());
    // Zero-value invoice: nothing to post.
    assert!(result.entry_id.is_none());
}

#[tokio::test]
#[ignore]
async fn detach_reverts_item_and_totals() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;
    let entry = create_test_time_entry(&db, client.client_id, "8.00", "150.00").await;
    let expense = create_test_expense(&db, client.client_id, "250.00").await;

    lifecycle::attach_items(
        &db,
        invoice.invoice_id,
        &[ItemRef::time(entry.time_entry_id), ItemRef::expense(expense.expense_id)],
    )
    .await
    .unwrap();

    let lines = db.get_invoice_lines(invoice.invoice_id).await.unwrap();
    let expense_line = lines.iter().find(|l| l.line_type == "expense").unwrap();

    let invoice = lifecycle::detach_item(&db, expense_line.line_id).await.unwrap();
    assert_eq!(invoice.total, dec("1200.00"));

    let expense = db.get_expense(expense.expense_id).await.unwrap().unwrap();
    assert_eq!(expense.status, "unbilled");
    assert!(expense.invoice_line_id.is_none());
}

#[tokio::test]
#[ignore]
async fn detach_on_issued_invoice_fails() {
    let db = setup_db().await;
    let codes = test_codes();

    let (_client, invoice, _entry) = draft_with_time(&db, "1.00", "100.00").await;
    lifecycle::issue_invoice(&db, &codes, invoice.invoice_id, IssueOptions::default())
        .await
        .unwrap();

    let lines = db.get_invoice_lines(invoice.invoice_id).await.unwrap();
    let result = lifecycle::detach_item(&db, lines[0].line_id).await;

    assert!(matches!(result, Err(BillingError::InvoiceNotDraft { .. })));
}

#[tokio::test]
#[ignore]
async fn adjustment_lines_participate_in_totals() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;
    let entry = create_test_time_entry(&db, client.client_id, "4.00", "150.00").await;

    lifecycle::attach_items(&db, invoice.invoice_id, &[ItemRef::time(entry.time_entry_id)])
        .await
        .unwrap();

    lifecycle::add_line(
        &db,
        invoice.invoice_id,
        &CreateLine {
            line_type: LineType::Adjustment,
            description: "Goodwill discount".to_string(),
            quantity: dec("1.00"),
            unit_price: dec("-100.00"),
        },
    )
    .await
    .unwrap();

    let invoice = db.get_invoice(invoice.invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.total, dec("500.00"));

    // Time and expense lines only come from attach.
    let result = lifecycle::add_line(
        &db,
        invoice.invoice_id,
        &CreateLine {
            line_type: LineType::Time,
            description: "bogus".to_string(),
            quantity: dec("1.00"),
            unit_price: dec("1.00"),
        },
    )
    .await;
    assert!(matches!(result, Err(BillingError::Validation(_))));
}

#[tokio::test]
#[ignore]
async fn void_reverses_and_releases_items() {
    let db = setup_db().await;
    let codes = test_codes();

    let (_client, invoice, entry) = draft_with_time(&db, "8.00", "125.00").await;
    lifecycle::issue_invoice(&db, &codes, invoice.invoice_id, IssueOptions::default())
        .await
        .unwrap();

    let voided = lifecycle::void_invoice(&db, invoice.invoice_id, None).await.unwrap();
    assert_eq!(voided.status, "void");
    assert!(voided.voided_utc.is_some());

    // Items are released on both sides of the link...
    let entry = db.get_time_entry(entry.time_entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "unbilled");
    assert!(entry.invoice_line_id.is_none());

    // ...but the invoice lines are preserved as history.
    let lines = db.get_invoice_lines(invoice.invoice_id).await.unwrap();
    assert_eq!(lines.len(), 1);

    let entries = ledger::entries_for_document(db.pool(), "invoice", invoice.invoice_id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
#[ignore]
async fn void_requires_issued() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;

    let result = lifecycle::void_invoice(&db, invoice.invoice_id, None).await;
    assert!(matches!(result, Err(BillingError::InvoiceNotIssued { .. })));
}

#[tokio::test]
#[ignore]
async fn revert_keeps_links_and_number() {
    let db = setup_db().await;
    let codes = test_codes();

    let (_client, invoice, entry) = draft_with_time(&db, "8.00", "125.00").await;
    let issued = lifecycle::issue_invoice(&db, &codes, invoice.invoice_id, IssueOptions::default())
        .await
        .unwrap();
    let number = issued.invoice.invoice_number.clone().unwrap();

    let reverted = lifecycle::revert_to_draft(&db, invoice.invoice_id, None).await.unwrap();
    assert_eq!(reverted.status, "draft");
    assert_eq!(reverted.invoice_number.as_deref(), Some(number.as_str()));

    // Items go back to unbilled but the line link is kept for re-issue.
    let entry = db.get_time_entry(entry.time_entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "unbilled");
    assert!(entry.invoice_line_id.is_some());

    // Re-issue keeps the original number; sequence numbers are never reused.
    let reissued =
        lifecycle::issue_invoice(&db, &codes, invoice.invoice_id, IssueOptions::default())
            .await
            .unwrap();
    assert_eq!(reissued.invoice.invoice_number.as_deref(), Some(number.as_str()));
}

#[tokio::test]
#[ignore]
async fn revert_with_payments_fails() {
    let db = setup_db().await;
    let codes = test_codes();

    let (client, invoice, _entry) = draft_with_time(&db, "4.00", "100.00").await;
    lifecycle::issue_invoice(&db, &codes, invoice.invoice_id, IssueOptions::default())
        .await
        .unwrap();

    allocation::record_payment(
        &db,
        &codes,
        &RecordPayment {
            client_id: client.client_id,
            date: date(2025, 4, 10),
            amount: dec("100.00"),
            method: PaymentMethod::Check,
            memo: String::new(),
            actor: None,
        },
        &[AllocationTarget {
            invoice_id: invoice.invoice_id,
            amount: dec("100.00"),
        }],
    )
    .await
    .unwrap();

    let result = lifecycle::revert_to_draft(&db, invoice.invoice_id, None).await;
    assert!(matches!(result, Err(BillingError::HasPayments { .. })));
}

#[tokio::test]
#[ignore]
async fn delete_draft_releases_items() {
    let db = setup_db().await;
    let client = create_test_client(&db).await;
    let invoice = create_test_draft(&db, client.client_id).await;
    let entry = create_test_time_entry(&db, client.client_id, "2.00", "150.00").await;

    lifecycle::attach_items(&db, invoice.invoice_id, &[ItemRef::time(entry.time_entry_id)])
        .await
        .unwrap();

    lifecycle::delete_draft(&db, invoice.invoice_id).await.unwrap();

    assert!(db.get_invoice(invoice.invoice_id).await.unwrap().is_none());
    let entry = db.get_time_entry(entry.time_entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, "unbilled");
    assert!(entry.invoice_line_id.is_none());
}
