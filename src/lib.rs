//! Landscaper Import Resolution
//!
//! Context scoping and import resolution for nested, dependent installations.
//! Every installation declares the values it imports and exports; this crate
//! decides which installations an installation may see and turns its import
//! declarations into a schema-validated configuration map.
//!
//! ## Features
//!
//! - **Context Scoping**: an installation sees its parent and its siblings, nothing else
//! - **Import Construction**: sibling exports, parent pass-through and static data, in that order
//! - **Schema Validation**: JSON Schema draft 7 with `local://` and `blueprint://` refs
//! - **Import Ledger**: per-import provenance with SHA256 fingerprints for change detection
//! - **Templating**: engine registry with deadline-bounded execution
//!
//! ## Architecture
//!
//! ```text
//! InstallationStore ──► resolve_context ──► Constructor::construct ──► Construction
//!        ▲                                        │                      │
//!        │                                  ReferenceLoader              ▼
//!        └────────── ImportStatusWriter::record_construction ◄──── Templating
//! ```

pub mod checksum;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod import_status;
pub mod imports;
pub mod installation;
pub mod schema;
pub mod template;

pub use checksum::Fingerprint;
pub use config::ResolverConfig;
pub use context::{resolve_context, Context};
pub use error::{ErrorKind, ImportError, Result};
pub use graph::{ImportStatusWriter, InstallationGraph, InstallationStore};
pub use import_status::{ImportStatus, ImportStatusEntry};
pub use imports::{
    construct_imports, ConfigMap, Construction, Constructor, ConstructorOptions, ResolutionOutcome,
    ResolutionState,
};
pub use installation::{ExportValue, ImportType, Installation, ObjectRef, Phase, Target};
pub use schema::{Blueprint, LoaderError, ReferenceLoader};
pub use template::{TemplateError, TemplateType, Templater, Templating};
