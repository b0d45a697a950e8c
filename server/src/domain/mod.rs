//! Domain logic for traceback aggregation and triage.
//!
//! - `model` - core data types (Traceback, ApiCall, Ticket, ...)
//! - `parser` - C1 LineParser
//! - `traceback` - C2 TracebackAssembler
//! - `apicall` - C3 ApiCallExtractor
//! - `enrich` - C4 ProfileNameEnricher
//! - `correlator` - C9 Correlator
//! - `scheduler` - C11 Scheduler
//! - `ticket_sync` - C10 ticket/index reconciliation
//! - `ingest` - C5 ArchiveIngestor + C6 RealtimeIngestor
//! - `notification` - C12 NotificationDispatcher
//! - `cache_coordinator` - C13 CacheCoordinator

pub mod apicall;
pub mod cache_coordinator;
pub mod correlator;
pub mod enrich;
pub mod ingest;
pub mod model;
pub mod notification;
pub mod parser;
pub mod scheduler;
pub mod ticket_sync;
pub mod traceback;

pub use apicall::extract_api_call;
pub use cache_coordinator::CacheCoordinator;
pub use correlator::Correlator;
pub use enrich::{EnrichmentLine, enrich};
pub use ingest::{ArchiveIngestor, IngestStats, RealtimeIngestor};
pub use model::{ApiCall, CorrelationFilter, CorrelationResult, MatchLevel, Ticket, Traceback};
pub use notification::{NotificationDispatcher, NotifyError, TicketOption};
pub use parser::{ParseError, ParsedLine, parse_line};
pub use scheduler::{Scheduler, TaskHandler, TaskPayload};
pub use ticket_sync::TicketSync;
pub use traceback::{TracebackAssembler, is_error_line};
