pub mod aggregate;
pub mod backend;
pub mod deps;
pub mod generation;
pub mod inspect;
pub mod provenance;
pub mod report;
pub mod scan_import;
pub mod similarity;
pub mod store;

pub use aggregate::{aggregate, detection_rate, AggregateReport, GroupStats};
pub use backend::{build_backends, BackendMode, BackendSettings, CodeBackend};
pub use deps::{AuditReport, DependencyAuditor, LicenseTable, Severity};
pub use generation::{GenerationDriver, GenerationSpec, GenerationSummary, SpecValidationError};
pub use inspect::{DetailedReport, FileRisk, Issue, IssueRule, IssueScanner};
pub use provenance::{Attribution, AttributionSource, ProvenanceResolver, UNKNOWN_BACKEND};
pub use report::{render_aggregate, render_detailed, OutputFormat, ReportWriter};
pub use scan_import::{import_scan_reports, parse_scan_report, ImportSummary};
pub use similarity::score_generated_tree;
pub use store::{GeneratedFileRecord, LicenseDetection, ResultStore, SimilarityRecord};
