//! Domain models for billing-service.

mod account;
mod invoice;
mod item;
mod journal;
mod payment;

pub use account::{Account, AccountType, CreateAccount};
pub use invoice::{
    AttachResult, CreateDraftInvoice, CreateLine, Invoice, InvoiceLine, InvoiceStatus,
    IssueOptions, IssueResult, LineType,
};
pub use item::{
    BillableStatus, Client, CreateExpense, CreateTimeEntry, Expense, ItemKind, ItemRef,
    RejectedItem, TimeEntry,
};
pub use journal::{
    DocumentKind, DocumentRef, JournalEntry, JournalEntrySpec, JournalLine, LineSpec,
    PostingIntent,
};
pub use payment::{AllocationTarget, Payment, PaymentApplication, PaymentMethod, RecordPayment};
