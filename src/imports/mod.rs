//! Import construction
//!
//! Turns the import declarations of an installation into a validated
//! configuration map plus the ledger entries describing where every value came
//! from.

pub mod constructor;

pub use constructor::{
    ConfigMap, Construction, Constructor, ConstructorOptions, ResolutionOutcome, ResolutionState,
};

use crate::context::resolve_context;
use crate::error::Result;
use crate::graph::InstallationStore;
use crate::installation::Installation;
use crate::schema::ReferenceLoader;

/// Resolve the context of `installation` and construct its imports
pub fn construct_imports<S>(
    store: &S,
    installation: &Installation,
    loader: ReferenceLoader,
    options: ConstructorOptions,
) -> Result<Construction>
where
    S: InstallationStore + ?Sized,
{
    let context = resolve_context(store, installation)?;
    Constructor::new(store, loader)
        .with_options(options)
        .construct(installation, &context)
}
